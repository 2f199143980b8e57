//! Content items and the ordered sequence the parser produces.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A multiple-choice quiz question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub prompt: String,
    /// Uppercase label → option text, iterated in ascending label order.
    pub options: BTreeMap<char, String>,
    /// `None` only when the parser reported an error for this question.
    pub correct_label: Option<char>,
    pub explanation: Option<String>,
}

impl Question {
    /// Option texts ordered by ascending label.
    pub fn ordered_options(&self) -> Vec<String> {
        self.options.values().cloned().collect()
    }

    /// Position of the correct label within [`Self::ordered_options`].
    pub fn correct_index(&self) -> Option<usize> {
        let label = self.correct_label?;
        self.options.keys().position(|l| *l == label)
    }
}

/// One deliverable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Item {
    Announcement { text: String },
    Question(Question),
}

impl Item {
    pub fn announcement(text: impl Into<String>) -> Self {
        Self::Announcement { text: text.into() }
    }

    pub fn is_question(&self) -> bool {
        matches!(self, Self::Question(_))
    }

    /// Short one-line label for previews and logs.
    pub fn preview(&self, max_chars: usize) -> String {
        let (tag, text) = match self {
            Self::Announcement { text } => ("DES", text.as_str()),
            Self::Question(q) => ("Q", q.prompt.as_str()),
        };
        let first_line = text.lines().next().unwrap_or_default();
        let mut clipped: String = first_line.chars().take(max_chars).collect();
        if first_line.chars().count() > max_chars {
            clipped.push('…');
        }
        format!("[{tag}] {clipped}")
    }
}

/// Ordered, immutable list of items.
///
/// Order is both parse order and delivery order. Clones share storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Item>", into = "Vec<Item>")]
pub struct Sequence {
    items: Arc<[Item]>,
}

impl Sequence {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items: items.into(),
        }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Item> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn question_count(&self) -> usize {
        self.items.iter().filter(|i| i.is_question()).count()
    }

    pub fn announcement_count(&self) -> usize {
        self.len() - self.question_count()
    }

    /// Every question carries a correct label that resolves to an option.
    pub fn is_deliverable(&self) -> bool {
        !self.is_empty()
            && self.items.iter().all(|item| match item {
                Item::Announcement { .. } => true,
                Item::Question(q) => q.correct_index().is_some(),
            })
    }
}

impl From<Vec<Item>> for Sequence {
    fn from(items: Vec<Item>) -> Self {
        Self::new(items)
    }
}

impl From<Sequence> for Vec<Item> {
    fn from(seq: Sequence) -> Self {
        seq.items.to_vec()
    }
}

impl<'a> IntoIterator for &'a Sequence {
    type Item = &'a Item;
    type IntoIter = std::slice::Iter<'a, Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
