//! Budgeted context assembly.
//!
//! Turns ordered groups of candidate blocks into one bounded string.
//! Each group has its own character budget, spent greedily in candidate
//! order:
//!
//! 1. A block whose text fits the remaining budget is appended whole.
//! 2. Otherwise, if the remaining budget exceeds the minimum fragment
//!    size, a prefix ending in [`ELLIPSIS`] that exactly fills the
//!    budget is appended and the group stops.
//! 3. Otherwise the group stops with nothing more appended.
//!
//! Budgets count block text (ellipsis included) in characters. Group
//! title lines and block header lines are fixed overhead, bounded by
//! [`overhead_bound`].
//!
//! # Output format
//!
//! ```text
//! === USER CONTEXT ===
//! --- notes ---
//! <block text>
//!
//! === HISTORY ===
//! chat: <query prefix>
//! ```
//!
//! Blocks without a header render as a bare line. Groups with no
//! included block are omitted from the text but still reported.

use serde::{Deserialize, Serialize};

/// Marker appended to a truncated block.
pub const ELLIPSIS: &str = "...";

/// Remaining budget a truncated fragment must exceed to be worth adding.
pub const DEFAULT_MIN_FRAGMENT_CHARS: usize = 200;

/// Characters spent against a maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    pub max_chars: usize,
    pub used_chars: usize,
}

impl ContextBudget {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            used_chars: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.max_chars.saturating_sub(self.used_chars)
    }

    pub fn fits(&self, chars: usize) -> bool {
        chars <= self.remaining()
    }

    /// Return a budget with `chars` more spent.
    pub fn consume(self, chars: usize) -> Self {
        Self {
            max_chars: self.max_chars,
            used_chars: self.used_chars + chars,
        }
    }
}

/// One candidate piece of context.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBlock {
    pub header: Option<String>,
    pub text: String,
}

impl ContextBlock {
    pub fn titled(header: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            header: Some(header.into()),
            text: text.into(),
        }
    }

    pub fn line(text: impl Into<String>) -> Self {
        Self {
            header: None,
            text: text.into(),
        }
    }

    fn render(&self, text: &str, out: &mut String) {
        if let Some(header) = &self.header {
            out.push_str("--- ");
            out.push_str(header);
            out.push_str(" ---\n");
        }
        out.push_str(text);
        out.push('\n');
    }

    fn overhead(&self) -> usize {
        // "--- " + header + " ---\n", then the trailing newline
        self.header
            .as_ref()
            .map(|h| h.chars().count() + 9)
            .unwrap_or(0)
            + 1
    }
}

/// An ordered list of candidates sharing one budget.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextGroup {
    /// Stable identifier, e.g. `"passages"`.
    pub name: String,
    /// Rendered in the group header line.
    pub title: String,
    pub budget: usize,
    pub blocks: Vec<ContextBlock>,
}

impl ContextGroup {
    pub fn new(name: impl Into<String>, title: impl Into<String>, budget: usize) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            budget,
            blocks: Vec::new(),
        }
    }

    pub fn with_blocks(mut self, blocks: Vec<ContextBlock>) -> Self {
        self.blocks = blocks;
        self
    }

    fn title_overhead(&self) -> usize {
        // "=== " + title + " ===\n", plus the blank separator line
        self.title.chars().count() + 9 + 1
    }
}

/// What happened to one group during assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupReport {
    pub name: String,
    /// Blocks appended, including a truncated one.
    pub included: usize,
    pub truncated: bool,
    /// Candidates not appended at all.
    pub dropped: usize,
    pub used_chars: usize,
    pub budget: usize,
}

/// Spend a group's budget, returning the rendered blocks and a report.
pub fn fill_group(group: &ContextGroup, min_fragment_chars: usize) -> (String, GroupReport) {
    let mut out = String::new();
    let mut budget = ContextBudget::new(group.budget);
    let mut included = 0;
    let mut truncated = false;

    for block in &group.blocks {
        let len = block.text.chars().count();
        if budget.fits(len) {
            block.render(&block.text, &mut out);
            budget = budget.consume(len);
            included += 1;
            continue;
        }

        let remaining = budget.remaining();
        let marker = ELLIPSIS.chars().count();
        if remaining > min_fragment_chars && remaining > marker {
            let mut fragment: String = block.text.chars().take(remaining - marker).collect();
            fragment.push_str(ELLIPSIS);
            block.render(&fragment, &mut out);
            budget = budget.consume(remaining);
            included += 1;
            truncated = true;
        }
        break;
    }

    let report = GroupReport {
        name: group.name.clone(),
        included,
        truncated,
        dropped: group.blocks.len() - included,
        used_chars: budget.used_chars,
        budget: group.budget,
    };
    (out, report)
}

/// Assemble groups in the given order into one string.
pub fn assemble(groups: &[ContextGroup], min_fragment_chars: usize) -> (String, Vec<GroupReport>) {
    let mut sections = Vec::new();
    let mut reports = Vec::with_capacity(groups.len());

    for group in groups {
        let (body, report) = fill_group(group, min_fragment_chars);
        if report.included > 0 {
            sections.push(format!("=== {} ===\n{}", group.title, body));
        }
        reports.push(report);
    }

    (sections.join("\n"), reports)
}

/// Upper bound on characters [`assemble`] adds beyond block text.
pub fn overhead_bound(groups: &[ContextGroup]) -> usize {
    groups
        .iter()
        .map(|g| g.title_overhead() + g.blocks.iter().map(ContextBlock::overhead).sum::<usize>())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(len: usize, c: char) -> ContextBlock {
        ContextBlock::titled(format!("block-{}", c), c.to_string().repeat(len))
    }

    #[test]
    fn test_budget_arithmetic() {
        let b = ContextBudget::new(100).consume(80);
        assert_eq!(b.remaining(), 20);
        assert!(b.fits(20));
        assert!(!b.fits(21));
        assert_eq!(ContextBudget::new(5).consume(9).remaining(), 0);
    }

    #[test]
    fn test_second_block_omitted_at_threshold() {
        let group = ContextGroup::new("g", "G", 100).with_blocks(vec![block(80, 'a'), block(80, 'b')]);
        let (text, report) = fill_group(&group, 20);
        assert!(text.contains(&"a".repeat(80)));
        assert!(!text.contains("block-b"));
        assert_eq!(report.included, 1);
        assert_eq!(report.dropped, 1);
        assert!(!report.truncated);
        assert_eq!(report.used_chars, 80);
    }

    #[test]
    fn test_truncates_when_above_threshold() {
        let group = ContextGroup::new("g", "G", 100).with_blocks(vec![
            block(50, 'a'),
            block(80, 'b'),
            block(10, 'c'),
        ]);
        let (text, report) = fill_group(&group, 20);
        let expected = format!("{}...", "b".repeat(47));
        assert!(text.contains(&expected));
        assert!(!text.contains("block-c"));
        assert_eq!(report.included, 2);
        assert!(report.truncated);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.used_chars, 100);
    }

    #[test]
    fn test_later_block_that_would_fit_is_still_dropped() {
        let group = ContextGroup::new("g", "G", 100).with_blocks(vec![
            block(90, 'a'),
            block(50, 'b'),
            block(5, 'c'),
        ]);
        let (_, report) = fill_group(&group, 20);
        assert_eq!(report.included, 1);
        assert_eq!(report.dropped, 2);
    }

    #[test]
    fn test_assemble_order_and_empty_groups() {
        let groups = vec![
            ContextGroup::new("user_context", "USER CONTEXT", 100)
                .with_blocks(vec![ContextBlock::titled("notes", "prefers short answers")]),
            ContextGroup::new("history", "HISTORY", 100),
            ContextGroup::new("passages", "PASSAGES", 100)
                .with_blocks(vec![ContextBlock::titled("report.pdf #0", "liquidity fell")]),
        ];
        let (text, reports) = assemble(&groups, 20);
        assert_eq!(
            text,
            "=== USER CONTEXT ===\n--- notes ---\nprefers short answers\n\n\
             === PASSAGES ===\n--- report.pdf #0 ---\nliquidity fell\n"
        );
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[1].included, 0);
    }

    #[test]
    fn test_line_blocks_have_no_header() {
        let group = ContextGroup::new("history", "HISTORY", 100)
            .with_blocks(vec![ContextBlock::line("chat: banking risk")]);
        let (text, _) = assemble(&[group], 20);
        assert_eq!(text, "=== HISTORY ===\nchat: banking risk\n");
    }

    #[test]
    fn test_output_within_budget_plus_overhead() {
        let sizes = [0usize, 1, 19, 20, 21, 99, 100, 101, 250, 1000];
        for &budget in &[0usize, 3, 20, 100, 500] {
            for &min_fragment in &[0usize, 20, 200] {
                let blocks: Vec<ContextBlock> = sizes.iter().map(|&n| block(n, 'x')).collect();
                let groups = vec![
                    ContextGroup::new("a", "A", budget).with_blocks(blocks.clone()),
                    ContextGroup::new("b", "B", budget).with_blocks(blocks.into_iter().rev().collect()),
                ];
                let (text, reports) = assemble(&groups, min_fragment);
                let total_budget: usize = groups.iter().map(|g| g.budget).sum();
                assert!(
                    text.chars().count() <= total_budget + overhead_bound(&groups),
                    "budget={} min_fragment={}",
                    budget,
                    min_fragment
                );
                for r in reports {
                    assert!(r.used_chars <= r.budget);
                }
            }
        }
    }

    #[test]
    fn test_deterministic() {
        let group = ContextGroup::new("g", "G", 300).with_blocks(vec![block(250, 'a'), block(250, 'b')]);
        assert_eq!(assemble(&[group.clone()], 20), assemble(&[group], 20));
    }

    #[test]
    fn test_multibyte_truncation_counts_chars() {
        let group = ContextGroup::new("g", "G", 10)
            .with_blocks(vec![ContextBlock::line("äöüäöüäöüäöüäöü")]);
        let (_, report) = fill_group(&group, 5);
        assert!(report.truncated);
        assert_eq!(report.used_chars, 10);
    }
}
