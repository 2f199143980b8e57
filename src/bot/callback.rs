//! Inline-keyboard callback data and the keyboards that carry it.
//!
//! Wire format is `|`-separated: `privacy|<job>|public`, `target|<job>|<index>`,
//! `cancel|<job>`. Job ids use the 32-hex-digit simple form and targets are
//! referenced by position in the configured list, so the data stays under
//! Telegram's 64-byte callback limit whatever the chat names are.

use uuid::Uuid;

use crate::gateway::types::{InlineButton, InlineKeyboard};
use crate::jobs::{PrivacyMode, Target};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Privacy { job: Uuid, mode: PrivacyMode },
    /// Position in the configured target list.
    Target { job: Uuid, index: usize },
    Cancel { job: Uuid },
}

impl CallbackAction {
    pub fn job(&self) -> Uuid {
        match self {
            Self::Privacy { job, .. } | Self::Target { job, .. } | Self::Cancel { job } => *job,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Privacy { job, mode } => format!("privacy|{}|{mode}", job.simple()),
            Self::Target { job, index } => format!("target|{}|{index}", job.simple()),
            Self::Cancel { job } => format!("cancel|{}", job.simple()),
        }
    }

    pub fn decode(data: &str) -> Option<Self> {
        let mut parts = data.splitn(3, '|');
        let kind = parts.next()?;
        let job = Uuid::parse_str(parts.next()?).ok()?;
        let rest = parts.next();
        match (kind, rest) {
            ("privacy", Some(mode)) => Some(Self::Privacy {
                job,
                mode: mode.parse().ok()?,
            }),
            ("target", Some(index)) => Some(Self::Target {
                job,
                index: index.parse().ok()?,
            }),
            ("cancel", None) => Some(Self::Cancel { job }),
            _ => None,
        }
    }
}

fn button(text: &str, action: CallbackAction) -> InlineButton {
    InlineButton::new(text, action.encode())
}

pub fn privacy_keyboard(job: Uuid) -> InlineKeyboard {
    InlineKeyboard::default()
        .row(vec![
            button(
                "👥 Public",
                CallbackAction::Privacy {
                    job,
                    mode: PrivacyMode::Public,
                },
            ),
            button(
                "🕶 Anonymous",
                CallbackAction::Privacy {
                    job,
                    mode: PrivacyMode::Anonymous,
                },
            ),
        ])
        .row(vec![button("✖️ Cancel", CallbackAction::Cancel { job })])
}

/// One button per configured chat, two per row.
pub fn target_keyboard(job: Uuid, targets: &[Target]) -> InlineKeyboard {
    let mut keyboard = InlineKeyboard::default();
    let buttons: Vec<InlineButton> = targets
        .iter()
        .enumerate()
        .map(|(index, t)| button(&t.name, CallbackAction::Target { job, index }))
        .collect();
    for pair in buttons.chunks(2) {
        keyboard = keyboard.row(pair.to_vec());
    }
    keyboard.row(vec![button("✖️ Cancel", CallbackAction::Cancel { job })])
}
