use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::grammars::RuleId;
use crate::grammars::backend::{CaptureSpans, CompiledPattern};
use crate::source::SourceLine;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PatternSetMatch {
    pub rule_id: RuleId,
    pub start: usize,
    pub end: usize,
    pub capture_pos: CaptureSpans,
}

/// Last search of a pattern, reused while scanning forward on the same line
#[derive(Debug)]
struct Memo {
    line_id: u64,
    from: usize,
    result: Option<CaptureSpans>,
}

struct Entry {
    rule_id: RuleId,
    /// `None` when the pattern failed to compile, it then never matches
    pattern: Option<Arc<dyn CompiledPattern>>,
    /// `\G` matches depend on the search start so can't be memoized
    has_g_anchor: bool,
    memo: Option<Memo>,
}

fn match_start(spans: &CaptureSpans) -> Option<usize> {
    spans.first().copied().flatten().map(|(start, _)| start)
}

impl Entry {
    fn search(&mut self, line: &SourceLine, from: usize) -> Option<CaptureSpans> {
        let pattern = self.pattern.as_ref()?;

        if !self.has_g_anchor
            && let Some(memo) = &self.memo
            && memo.line_id == line.id()
            && memo.from <= from
        {
            match &memo.result {
                None => return None,
                Some(spans) if match_start(spans).is_some_and(|start| start >= from) => {
                    return Some(spans.clone());
                }
                Some(_) => (),
            }
        }

        let result = pattern.search(line.as_str(), from);
        if !self.has_g_anchor {
            self.memo = Some(Memo {
                line_id: line.id(),
                from,
                result: result.clone(),
            });
        }
        result
    }
}

/// The candidate patterns at a scan position, in priority order.
///
/// Built for a given rule and anchor flavour and kept for the duration of a line so
/// each pattern remembers its last result.
pub struct PatternSet {
    entries: Vec<Entry>,
}

impl PatternSet {
    pub fn new(items: Vec<(RuleId, Option<Arc<dyn CompiledPattern>>, bool)>) -> Self {
        let entries = items
            .into_iter()
            .map(|(rule_id, pattern, has_g_anchor)| Entry {
                rule_id,
                pattern,
                has_g_anchor,
                memo: None,
            })
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Finds the match starting the earliest at or after `pos`.
    /// On ties the pattern declared first wins and a match at `pos` stops the search.
    pub(crate) fn find_at(&mut self, line: &SourceLine, pos: usize) -> Option<PatternSetMatch> {
        let mut best: Option<PatternSetMatch> = None;

        for entry in &mut self.entries {
            let Some(spans) = entry.search(line, pos) else {
                continue;
            };
            let Some((start, end)) = spans.first().copied().flatten() else {
                continue;
            };
            if best.as_ref().is_none_or(|b| start < b.start) {
                best = Some(PatternSetMatch {
                    rule_id: entry.rule_id,
                    start,
                    end,
                    capture_pos: spans,
                });
                if start == pos {
                    break;
                }
            }
        }

        best
    }
}

impl Debug for PatternSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PatternSet({} rules)", self.entries.len())
    }
}
