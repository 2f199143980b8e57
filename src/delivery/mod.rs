//! Resilient, strictly ordered delivery of a job's items.

pub mod engine;
pub mod policy;
pub mod report;

pub use engine::DeliveryEngine;
pub use policy::{CircuitBreaker, Pacing, RetryPolicy};
pub use report::{DeliveryOutcome, DeliveryReport};
