//! Jobs: the record, its lifecycle and the operator actions on it.

pub mod manager;
pub mod model;
pub mod state;

pub use manager::{JobManager, Submission};
pub use model::{Job, PrivacyMode, Target, Transition};
pub use state::JobStatus;
