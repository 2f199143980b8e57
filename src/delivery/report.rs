//! Delivery outcome and the operator summary rendered from it.

use crate::jobs::JobStatus;

/// What one delivery run achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// Items posted, announcements included.
    pub delivered_count: usize,
    pub total_count: usize,
    /// The circuit breaker stopped the run.
    pub aborted: bool,
    /// 0-based index of the item that tripped the breaker.
    pub failing_item_index: Option<usize>,
    /// 0-based indices of questions that could not be posted.
    pub failed_items: Vec<usize>,
}

impl DeliveryOutcome {
    /// Terminal status this outcome maps to.
    pub fn status(&self) -> JobStatus {
        if self.aborted {
            JobStatus::Aborted
        } else if self.failed_items.is_empty() {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        }
    }
}

/// Renders the single terminal notification for a job.
pub struct DeliveryReport<'a> {
    pub outcome: &'a DeliveryOutcome,
    pub job_ref: &'a str,
    pub target_name: &'a str,
}

impl DeliveryReport<'_> {
    pub fn render(&self) -> String {
        let o = self.outcome;
        let mut text = match o.status() {
            JobStatus::Completed => format!(
                "✅ Job {} delivered to {}.\nPosted {}/{} item(s).",
                self.job_ref, self.target_name, o.delivered_count, o.total_count
            ),
            JobStatus::Aborted => format!(
                "❌ Job {} aborted after repeated failures at item {}.\nPosted {}/{} item(s) to {}.",
                self.job_ref,
                o.failing_item_index.map_or(0, |i| i + 1),
                o.delivered_count,
                o.total_count,
                self.target_name
            ),
            _ => format!(
                "⚠️ Job {} finished with failures.\nPosted {}/{} item(s) to {}.",
                self.job_ref, o.delivered_count, o.total_count, self.target_name
            ),
        };
        if !o.failed_items.is_empty() {
            let items: Vec<String> = o.failed_items.iter().map(|i| (i + 1).to_string()).collect();
            text.push_str(&format!("\nNot posted: item {}.", items.join(", ")));
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(delivered: usize, aborted: bool, failed: Vec<usize>) -> DeliveryOutcome {
        DeliveryOutcome {
            delivered_count: delivered,
            total_count: 5,
            aborted,
            failing_item_index: aborted.then(|| *failed.last().unwrap_or(&0)),
            failed_items: failed,
        }
    }

    fn render(o: &DeliveryOutcome) -> String {
        DeliveryReport {
            outcome: o,
            job_ref: "abcd1234",
            target_name: "Class 9",
        }
        .render()
    }

    #[test]
    fn status_follows_outcome() {
        assert_eq!(outcome(5, false, vec![]).status(), JobStatus::Completed);
        assert_eq!(outcome(4, false, vec![2]).status(), JobStatus::Failed);
        assert_eq!(outcome(2, true, vec![2, 3, 4]).status(), JobStatus::Aborted);
    }

    #[test]
    fn completed_summary() {
        let text = render(&outcome(5, false, vec![]));
        assert!(text.starts_with("✅"));
        assert!(text.contains("Posted 5/5"));
        assert!(text.contains("Class 9"));
        assert!(!text.contains("Not posted"));
    }

    #[test]
    fn aborted_summary_uses_one_based_positions() {
        let text = render(&outcome(2, true, vec![2, 3, 4]));
        assert!(text.contains("at item 5"));
        assert!(text.contains("Not posted: item 3, 4, 5."));
    }
}
