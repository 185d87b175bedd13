//! Line-level diff engine.
//!
//! The engine builds the full longest-common-subsequence table for the two
//! inputs, so both time and memory are O(old_lines × new_lines). That is fine
//! for source files but it is the scalability limit of this engine: callers
//! diffing very large inputs should expect quadratic cost, not a fallback.

use crate::config::DiffConfig;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

pub const DEFAULT_CONTEXT_LINES: usize = 3;
pub const DEFAULT_MAX_HUNK_LINES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineType {
    Context,
    Addition,
    Deletion,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    #[serde(rename = "type")]
    pub line_type: LineType,
    pub content: String,
    /// 1-based line number on the old side, absent for additions.
    pub old_num: Option<usize>,
    /// 1-based line number on the new side, absent for deletions.
    pub new_num: Option<usize>,
}

/// A run of changed lines plus its surrounding context.
///
/// `old_start`/`new_start` are the 1-based positions of the first changed
/// line on each side; `old_lines`/`new_lines` count the deletions and
/// additions. Context lines carry their own numbers in `lines`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub old_start: usize,
    pub old_lines: usize,
    pub new_start: usize,
    pub new_lines: usize,
    pub lines: Vec<Line>,
}

impl Hunk {
    /// `(start, len)` of the old side including context, unified-diff style.
    pub fn old_range(&self) -> (usize, usize) {
        Self::range(self.lines.iter().filter_map(|l| l.old_num), self.old_start)
    }

    /// `(start, len)` of the new side including context, unified-diff style.
    pub fn new_range(&self) -> (usize, usize) {
        Self::range(self.lines.iter().filter_map(|l| l.new_num), self.new_start)
    }

    fn range(mut nums: impl Iterator<Item = usize>, anchor: usize) -> (usize, usize) {
        match nums.next() {
            Some(first) => (first, 1 + nums.count()),
            None => (anchor.saturating_sub(1), 0),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub additions: usize,
    pub deletions: usize,
    pub changes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    pub hunks: Vec<Hunk>,
    pub stats: DiffStats,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }

    /// Renders the hunks with `@@ -a,b +c,d @@` headers.
    pub fn format(&self) -> String {
        let mut out = String::new();
        for hunk in &self.hunks {
            let (old_start, old_len) = hunk.old_range();
            let (new_start, new_len) = hunk.new_range();
            let _ = writeln!(
                out,
                "@@ -{},{} +{},{} @@",
                old_start, old_len, new_start, new_len
            );
            for line in &hunk.lines {
                let prefix = match line.line_type {
                    LineType::Addition => '+',
                    LineType::Deletion => '-',
                    LineType::Context => ' ',
                };
                out.push(prefix);
                out.push_str(&line.content);
                out.push('\n');
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Equal,
    Insert,
    Delete,
}

/// One step of the edit script; `old`/`new` are the lines consumed on each
/// side before this step.
#[derive(Debug, Clone, Copy)]
struct Op {
    kind: OpKind,
    old: usize,
    new: usize,
}

#[derive(Debug, Clone)]
pub struct DiffEngine {
    context_lines: usize,
    max_hunk_lines: usize,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_LINES)
    }
}

impl DiffEngine {
    pub fn new(context_lines: usize) -> Self {
        Self {
            context_lines,
            max_hunk_lines: DEFAULT_MAX_HUNK_LINES,
        }
    }

    pub fn from_config(config: &DiffConfig) -> Self {
        Self::new(config.context_lines).with_max_hunk_lines(config.max_hunk_lines)
    }

    pub fn with_max_hunk_lines(mut self, max_hunk_lines: usize) -> Self {
        self.max_hunk_lines = max_hunk_lines.max(1);
        self
    }

    pub fn context_lines(&self) -> usize {
        self.context_lines
    }

    pub fn diff(&self, old: &[u8], new: &[u8]) -> DiffResult {
        self.diff_with_context(old, new, self.context_lines)
    }

    pub fn diff_with_context(&self, old: &[u8], new: &[u8], context_lines: usize) -> DiffResult {
        let old_lines = split_lines(old);
        let new_lines = split_lines(new);

        let ops = edit_script(&old_lines, &new_lines);
        let ranges = self.change_ranges(&ops);

        let mut hunks = Vec::with_capacity(ranges.len());
        let mut prev_end = 0;
        for (idx, &(start, end)) in ranges.iter().enumerate() {
            let next_start = ranges.get(idx + 1).map_or(ops.len(), |r| r.0);
            let lead = start.saturating_sub(context_lines).max(prev_end);
            let trail = (end + context_lines).min(next_start);

            hunks.push(build_hunk(&ops[lead..trail], &ops[start], &old_lines, &new_lines));
            prev_end = trail;
        }

        let mut stats = DiffStats::default();
        for line in hunks.iter().flat_map(|h| h.lines.iter()) {
            match line.line_type {
                LineType::Addition => stats.additions += 1,
                LineType::Deletion => stats.deletions += 1,
                LineType::Context => {}
            }
        }
        stats.changes = stats.additions + stats.deletions;

        DiffResult { hunks, stats }
    }

    /// Op-index ranges of contiguous non-equal runs, split at the hunk cap.
    fn change_ranges(&self, ops: &[Op]) -> Vec<(usize, usize)> {
        let mut ranges = Vec::new();
        let mut k = 0;
        while k < ops.len() {
            if ops[k].kind == OpKind::Equal {
                k += 1;
                continue;
            }
            let start = k;
            while k < ops.len() && ops[k].kind != OpKind::Equal && k - start < self.max_hunk_lines {
                k += 1;
            }
            ranges.push((start, k));
        }
        ranges
    }
}

/// Strips one trailing newline, then splits on `\n`. Empty input has no lines.
fn split_lines(buf: &[u8]) -> Vec<&[u8]> {
    if buf.is_empty() {
        return Vec::new();
    }
    let trimmed = buf.strip_suffix(b"\n").unwrap_or(buf);
    trimmed.split(|b| *b == b'\n').collect()
}

fn edit_script(old: &[&[u8]], new: &[&[u8]]) -> Vec<Op> {
    let (n, m) = (old.len(), new.len());
    let width = m + 1;

    let mut lcs = vec![0u32; (n + 1) * width];
    for i in 1..=n {
        for j in 1..=m {
            lcs[i * width + j] = if old[i - 1] == new[j - 1] {
                lcs[(i - 1) * width + (j - 1)] + 1
            } else {
                lcs[(i - 1) * width + j].max(lcs[i * width + (j - 1)])
            };
        }
    }

    // Backward walk. On a tie an addition is taken first, which puts
    // deletions ahead of additions once the script is reversed.
    let mut kinds = Vec::with_capacity(n + m);
    let (mut i, mut j) = (n, m);
    while i > 0 || j > 0 {
        if i > 0 && j > 0 && old[i - 1] == new[j - 1] {
            kinds.push(OpKind::Equal);
            i -= 1;
            j -= 1;
        } else if j > 0 && (i == 0 || lcs[i * width + (j - 1)] >= lcs[(i - 1) * width + j]) {
            kinds.push(OpKind::Insert);
            j -= 1;
        } else {
            kinds.push(OpKind::Delete);
            i -= 1;
        }
    }
    kinds.reverse();

    let (mut old_pos, mut new_pos) = (0, 0);
    kinds
        .into_iter()
        .map(|kind| {
            let op = Op {
                kind,
                old: old_pos,
                new: new_pos,
            };
            match kind {
                OpKind::Equal => {
                    old_pos += 1;
                    new_pos += 1;
                }
                OpKind::Insert => new_pos += 1,
                OpKind::Delete => old_pos += 1,
            }
            op
        })
        .collect()
}

fn build_hunk(ops: &[Op], first_change: &Op, old: &[&[u8]], new: &[&[u8]]) -> Hunk {
    let mut hunk = Hunk {
        old_start: first_change.old + 1,
        old_lines: 0,
        new_start: first_change.new + 1,
        new_lines: 0,
        lines: Vec::with_capacity(ops.len()),
    };

    for op in ops {
        let line = match op.kind {
            OpKind::Equal => Line {
                line_type: LineType::Context,
                content: String::from_utf8_lossy(old[op.old]).into_owned(),
                old_num: Some(op.old + 1),
                new_num: Some(op.new + 1),
            },
            OpKind::Delete => {
                hunk.old_lines += 1;
                Line {
                    line_type: LineType::Deletion,
                    content: String::from_utf8_lossy(old[op.old]).into_owned(),
                    old_num: Some(op.old + 1),
                    new_num: None,
                }
            }
            OpKind::Insert => {
                hunk.new_lines += 1;
                Line {
                    line_type: LineType::Addition,
                    content: String::from_utf8_lossy(new[op.new]).into_owned(),
                    old_num: None,
                    new_num: Some(op.new + 1),
                }
            }
        };
        hunk.lines.push(line);
    }

    hunk
}
