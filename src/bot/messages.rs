//! Operator-facing texts.

use crate::error::{Error, JobError};
use crate::jobs::{Job, Target};
use crate::parser::ParseResult;

/// Items listed in a job preview before it is cut short.
const PREVIEW_ITEMS: usize = 10;
const PREVIEW_CHARS: usize = 60;

pub const HELP: &str = "\
Send quiz text and I will post it as quiz polls.

DES: announcement text
Q: question prompt
A: option
B: option
ANS: B
EXP: optional explanation

Options may be written A: / A) / (A) / [A]. Lines starting with # or // are ignored.

Commands:
/chats – list target chats
/help – show this message";

pub const NOT_A_QUIZ: &str =
    "That does not look like quiz text. It needs at least one Q: or DES: line. Send /help for the format.";

pub const INTERNAL_ERROR: &str = "⚠️ Something went wrong. Please try again.";

pub fn chats(targets: &[Target]) -> String {
    if targets.is_empty() {
        return "No target chats are configured. Set QUIZCAST_TARGET_CHATS.".into();
    }
    let mut text = String::from("Target chats:");
    for t in targets {
        text.push_str(&format!("\n• {}", t.name));
    }
    text
}

/// Summary of an accepted job, shown above the privacy keyboard.
pub fn preview(job: &Job, parse: &ParseResult) -> String {
    let mut text = format!(
        "📋 Job {}: {} question(s), {} announcement(s).\n",
        job.short_id(),
        job.sequence.question_count(),
        job.sequence.announcement_count()
    );
    for (i, item) in job.sequence.iter().take(PREVIEW_ITEMS).enumerate() {
        text.push_str(&format!("\n{}. {}", i + 1, item.preview(PREVIEW_CHARS)));
    }
    if job.sequence.len() > PREVIEW_ITEMS {
        text.push_str(&format!("\n… and {} more", job.sequence.len() - PREVIEW_ITEMS));
    }
    if parse.warnings().next().is_some() {
        text.push_str("\n\n");
        text.push_str(&parse.report());
    }
    text.push_str("\n\nChoose the poll privacy mode:");
    text
}

pub fn choose_target(job: &Job, targets: &[Target]) -> String {
    let privacy = job.privacy_mode.map_or("unset", |m| m.as_str());
    if targets.is_empty() {
        format!(
            "Job {}: privacy {privacy}.\nNo target chats are configured, so this job can only be cancelled.",
            job.short_id()
        )
    } else {
        format!("Job {}: privacy {privacy}.\nChoose the target chat:", job.short_id())
    }
}

pub fn queued(job: &Job) -> String {
    format!(
        "🚀 Job {} queued for {} ({} item(s)). You will get a summary when it finishes.",
        job.short_id(),
        job.target.as_ref().map_or("?", |t| t.name.as_str()),
        job.total_count()
    )
}

pub fn status(job: &Job) -> String {
    format!("Job {} is {}.", job.short_id(), job.status)
}

/// Short text for a failed operator action. Internal faults stay generic.
pub fn for_error(error: &Error) -> String {
    match error {
        Error::Job(JobError::NotFound { .. }) => "That job no longer exists.".into(),
        Error::Job(JobError::NotOwner { .. }) => "That job belongs to another operator.".into(),
        Error::Job(JobError::InvalidTransition { state, .. }) => {
            format!("That job is already {state}.")
        }
        Error::Job(JobError::UnknownTarget(name)) => format!("Unknown target chat: {name}"),
        Error::Job(JobError::Incomplete { what, .. }) => format!("That job is missing {what}."),
        Error::Job(JobError::NotReady { errors }) => {
            format!("Fix the {errors} format error(s) first.")
        }
        _ => INTERNAL_ERROR.into(),
    }
}
