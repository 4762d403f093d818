//! Conversation history: lexical relevance scoring and the bounded log.
//!
//! Past queries are ranked against a new query by plain word overlap:
//!
//! ```text
//! score = |words(new query) ∩ words(record.query)|
//! ```
//!
//! Words are lower-cased and split on whitespace; punctuation stays
//! attached. Records with no overlap are excluded. Ties go to the newer
//! record.
//!
//! [`ConversationLog`] is the in-process ring buffer that caps each
//! owner's history at [`DEFAULT_HISTORY_CAPACITY`] records.

use std::collections::{HashSet, VecDeque};

use crate::models::ConversationRecord;

/// Records kept per owner.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Records returned by default from [`score_history`].
pub const DEFAULT_HISTORY_TOP_N: usize = 3;

/// Maximum characters of the stored query shown in a rendered line.
pub const QUERY_PREFIX_CHARS: usize = 100;

/// A history record paired with its overlap score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub record: ConversationRecord,
    pub score: usize,
}

impl ScoredRecord {
    /// Render as `"<kind>: <query prefix>"`.
    pub fn render(&self) -> String {
        render_line(&self.record)
    }
}

/// Lower-cased, whitespace-delimited word set.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.split_whitespace().map(|w| w.to_lowercase()).collect()
}

/// Rank `records` against `query` and keep the best `top_n`.
///
/// Sorted by score descending, then timestamp descending. The input
/// order only matters for records identical in both.
pub fn score_history(
    query: &str,
    records: &[ConversationRecord],
    top_n: usize,
) -> Vec<ScoredRecord> {
    let query_words = tokenize(query);
    if query_words.is_empty() || top_n == 0 {
        return Vec::new();
    }

    let mut scored: Vec<ScoredRecord> = records
        .iter()
        .filter_map(|record| {
            let score = tokenize(&record.query).intersection(&query_words).count();
            (score > 0).then(|| ScoredRecord {
                record: record.clone(),
                score,
            })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| b.record.timestamp.cmp(&a.record.timestamp))
    });
    scored.truncate(top_n);
    scored
}

pub fn render_line(record: &ConversationRecord) -> String {
    let prefix: String = record.query.chars().take(QUERY_PREFIX_CHARS).collect();
    format!("{}: {}", record.kind, prefix)
}

/// Append-only history with oldest-first eviction.
#[derive(Debug, Clone)]
pub struct ConversationLog {
    capacity: usize,
    records: VecDeque<ConversationRecord>,
}

impl Default for ConversationLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ConversationLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a record, returning the evicted oldest record when full.
    pub fn push(&mut self, record: ConversationRecord) -> Option<ConversationRecord> {
        let evicted = if self.records.len() == self.capacity {
            self.records.pop_front()
        } else {
            None
        };
        self.records.push_back(record);
        evicted
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ConversationRecord> {
        self.records.iter()
    }

    pub fn to_vec(&self) -> Vec<ConversationRecord> {
        self.records.iter().cloned().collect()
    }
}
