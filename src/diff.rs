//! Line-based LCS diffing between two document versions.
//!
//! Deliberately not built on the `similar` crate's Myers implementation:
//! the backtrack tie-break required here (prefer the **added** direction
//! when the "down" and "right" cells are equal) is a specific, deterministic
//! choice that a general-purpose diff library doesn't guarantee. The LCS
//! table itself is the same technique, just hand-rolled so the tie-break is
//! pinned down.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    Added,
    Removed,
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffLine {
    pub kind: DiffKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_line: Option<usize>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DiffStats {
    pub additions: usize,
    pub deletions: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffResult {
    pub lines: Vec<DiffLine>,
    pub stats: DiffStats,
}

/// Diff two document contents as `\n`-split line sequences.
pub fn diff_lines(old: &str, new: &str) -> DiffResult {
    let old_lines: Vec<&str> = old.split('\n').collect();
    let new_lines: Vec<&str> = new.split('\n').collect();
    let m = old_lines.len();
    let n = new_lines.len();

    // table[i][j] = length of the LCS of old_lines[i..] and new_lines[j..].
    let mut table = vec![vec![0u32; n + 1]; m + 1];
    for i in (0..m).rev() {
        for j in (0..n).rev() {
            table[i][j] = if old_lines[i] == new_lines[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut lines = Vec::with_capacity(m + n);
    let mut stats = DiffStats::default();
    let (mut i, mut j) = (0usize, 0usize);
    let (mut old_no, mut new_no) = (1usize, 1usize);

    while i < m && j < n {
        if old_lines[i] == new_lines[j] {
            lines.push(DiffLine {
                kind: DiffKind::Unchanged,
                content: old_lines[i].to_string(),
                old_line: Some(old_no),
                new_line: Some(new_no),
            });
            stats.unchanged += 1;
            i += 1;
            j += 1;
            old_no += 1;
            new_no += 1;
        } else if table[i + 1][j] > table[i][j + 1] {
            lines.push(DiffLine {
                kind: DiffKind::Removed,
                content: old_lines[i].to_string(),
                old_line: Some(old_no),
                new_line: None,
            });
            stats.deletions += 1;
            i += 1;
            old_no += 1;
        } else {
            // table[i+1][j] < table[i][j+1], or a tie — both favor "added".
            lines.push(DiffLine {
                kind: DiffKind::Added,
                content: new_lines[j].to_string(),
                old_line: None,
                new_line: Some(new_no),
            });
            stats.additions += 1;
            j += 1;
            new_no += 1;
        }
    }

    while i < m {
        lines.push(DiffLine {
            kind: DiffKind::Removed,
            content: old_lines[i].to_string(),
            old_line: Some(old_no),
            new_line: None,
        });
        stats.deletions += 1;
        i += 1;
        old_no += 1;
    }

    while j < n {
        lines.push(DiffLine {
            kind: DiffKind::Added,
            content: new_lines[j].to_string(),
            old_line: None,
            new_line: Some(new_no),
        });
        stats.additions += 1;
        j += 1;
        new_no += 1;
    }

    DiffResult { lines, stats }
}
