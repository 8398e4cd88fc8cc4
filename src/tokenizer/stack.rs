use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use crate::grammars::RuleId;
use crate::tokenizer::scope_list::ScopeListElement;

/// One frame of the persistent parse state carried from a line to the next.
///
/// Frames are immutable and shared: every operation returns a new frame pointing to
/// the same parent chain.
pub struct StackElement {
    parent: Option<Arc<StackElement>>,
    /// 1 for the root frame
    depth: usize,
    rule_id: RuleId,
    /// Byte offset where this rule was entered on the current line, for loop detection.
    /// `None` once the line is done.
    enter_pos: Option<usize>,
    /// Byte offset where `\G` matches on the current line
    anchor_pos: Option<usize>,
    /// The begin pattern matched up to the end of the line, so `\G` matches at the start
    /// of the next line for the while pattern
    begin_rule_captured_eol: bool,
    /// End or while pattern with the back-references resolved
    end_rule: Option<Arc<str>>,
    /// Scopes of the begin/end delimiters
    name_scopes: Arc<ScopeListElement>,
    /// Scopes of the content between the delimiters
    content_name_scopes: Arc<ScopeListElement>,
    /// Hash of the depth, rule and end rule of the whole chain
    structural_hash: u64,
}

fn structural_hash(parent: Option<&StackElement>, depth: usize, rule_id: RuleId, end_rule: Option<&str>) -> u64 {
    let mut hasher = DefaultHasher::new();
    parent.map(|p| p.structural_hash).hash(&mut hasher);
    depth.hash(&mut hasher);
    rule_id.hash(&mut hasher);
    end_rule.hash(&mut hasher);
    hasher.finish()
}

impl StackElement {
    pub(crate) fn root(rule_id: RuleId, scopes: Arc<ScopeListElement>) -> Arc<Self> {
        Arc::new(Self {
            parent: None,
            depth: 1,
            rule_id,
            enter_pos: None,
            anchor_pos: None,
            begin_rule_captured_eol: false,
            end_rule: None,
            name_scopes: scopes.clone(),
            content_name_scopes: scopes,
            structural_hash: structural_hash(None, 1, rule_id, None),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        parent: Option<Arc<StackElement>>,
        rule_id: RuleId,
        enter_pos: Option<usize>,
        anchor_pos: Option<usize>,
        begin_rule_captured_eol: bool,
        end_rule: Option<Arc<str>>,
        name_scopes: Arc<ScopeListElement>,
        content_name_scopes: Arc<ScopeListElement>,
    ) -> Self {
        let depth = parent.as_ref().map_or(1, |p| p.depth + 1);
        let structural_hash = structural_hash(parent.as_deref(), depth, rule_id, end_rule.as_deref());
        Self {
            parent,
            depth,
            rule_id,
            enter_pos,
            anchor_pos,
            begin_rule_captured_eol,
            end_rule,
            name_scopes,
            content_name_scopes,
            structural_hash,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn rule_id(&self) -> RuleId {
        self.rule_id
    }

    pub fn parent(&self) -> Option<&Arc<StackElement>> {
        self.parent.as_ref()
    }

    pub(crate) fn enter_pos(&self) -> Option<usize> {
        self.enter_pos
    }

    pub(crate) fn anchor_pos(&self) -> Option<usize> {
        self.anchor_pos
    }

    pub(crate) fn begin_rule_captured_eol(&self) -> bool {
        self.begin_rule_captured_eol
    }

    pub fn end_rule(&self) -> Option<&Arc<str>> {
        self.end_rule.as_ref()
    }

    pub fn name_scopes(&self) -> &Arc<ScopeListElement> {
        &self.name_scopes
    }

    pub fn content_name_scopes(&self) -> &Arc<ScopeListElement> {
        &self.content_name_scopes
    }

    /// Called when entering a nested context, or for the duration of a match rule
    pub(crate) fn push(
        self: &Arc<Self>,
        rule_id: RuleId,
        enter_pos: Option<usize>,
        anchor_pos: Option<usize>,
        begin_rule_captured_eol: bool,
        scopes: Arc<ScopeListElement>,
    ) -> Arc<Self> {
        Arc::new(Self::new(
            Some(self.clone()),
            rule_id,
            enter_pos,
            anchor_pos,
            begin_rule_captured_eol,
            None,
            scopes.clone(),
            scopes,
        ))
    }

    /// Exits the current context. `None` at the root.
    pub fn pop(&self) -> Option<Arc<Self>> {
        self.parent.clone()
    }

    /// Pop but never go below root state - used in infinite loop protection
    pub(crate) fn safe_pop(self: &Arc<Self>) -> Arc<Self> {
        self.parent.clone().unwrap_or_else(|| self.clone())
    }

    pub(crate) fn with_content_name_scopes(self: &Arc<Self>, scopes: Arc<ScopeListElement>) -> Arc<Self> {
        if Arc::ptr_eq(&self.content_name_scopes, &scopes) {
            return self.clone();
        }
        Arc::new(Self::new(
            self.parent.clone(),
            self.rule_id,
            self.enter_pos,
            self.anchor_pos,
            self.begin_rule_captured_eol,
            self.end_rule.clone(),
            self.name_scopes.clone(),
            scopes,
        ))
    }

    pub(crate) fn with_end_rule(self: &Arc<Self>, end_rule: Arc<str>) -> Arc<Self> {
        if self.end_rule.as_ref() == Some(&end_rule) {
            return self.clone();
        }
        Arc::new(Self::new(
            self.parent.clone(),
            self.rule_id,
            self.enter_pos,
            self.anchor_pos,
            self.begin_rule_captured_eol,
            Some(end_rule),
            self.name_scopes.clone(),
            self.content_name_scopes.clone(),
        ))
    }

    /// Whether `other`'s rule was already entered at the same position further down
    /// the stack, ie the grammar is about to loop.
    pub(crate) fn has_same_rule_as(&self, other: &StackElement) -> bool {
        let mut current = Some(self);
        while let Some(element) = current
            && element.enter_pos == other.enter_pos
        {
            if element.rule_id == other.rule_id {
                return true;
            }
            current = element.parent.as_deref();
        }
        false
    }

    /// Forgets the line-local positions of the whole chain. Frames that have none are
    /// reused as is.
    pub(crate) fn reset(self: &Arc<Self>) -> Arc<Self> {
        let mut frames: Vec<&Arc<Self>> = Vec::with_capacity(self.depth);
        let mut node = Some(self);
        while let Some(frame) = node {
            frames.push(frame);
            node = frame.parent.as_ref();
        }

        // Rebuilt from the root so each frame can point to its reset parent
        let mut parent: Option<Arc<Self>> = None;
        for frame in frames.into_iter().rev() {
            let same_parent = match (&parent, &frame.parent) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            };
            let element = if same_parent && frame.enter_pos.is_none() && frame.anchor_pos.is_none() {
                frame.clone()
            } else {
                Arc::new(Self {
                    parent: parent.take(),
                    depth: frame.depth,
                    rule_id: frame.rule_id,
                    enter_pos: None,
                    anchor_pos: None,
                    begin_rule_captured_eol: frame.begin_rule_captured_eol,
                    end_rule: frame.end_rule.clone(),
                    name_scopes: frame.name_scopes.clone(),
                    content_name_scopes: frame.content_name_scopes.clone(),
                    structural_hash: frame.structural_hash,
                })
            };
            parent = Some(element);
        }
        parent.unwrap_or_else(|| self.clone())
    }

    /// Same rules and end patterns all along the chain, scopes are not compared
    pub fn structural_eq(&self, other: &StackElement) -> bool {
        let mut a = Some(self);
        let mut b = Some(other);
        loop {
            match (a, b) {
                (None, None) => return true,
                (Some(x), Some(y)) => {
                    if std::ptr::eq(x, y) {
                        return true;
                    }
                    if x.structural_hash != y.structural_hash
                        || x.depth != y.depth
                        || x.rule_id != y.rule_id
                        || x.end_rule != y.end_rule
                    {
                        return false;
                    }
                    a = x.parent.as_deref();
                    b = y.parent.as_deref();
                }
                _ => return false,
            }
        }
    }

    /// Frames from this one down to the root
    pub(crate) fn iter(&self) -> impl Iterator<Item = &StackElement> {
        std::iter::successors(Some(self), |e| e.parent.as_deref())
    }
}

/// Structurally equal and with the same content scopes: tokenizing the next line from
/// either state gives the same result.
impl PartialEq for StackElement {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
            || (self.structural_eq(other) && self.content_name_scopes == other.content_name_scopes)
    }
}

impl Eq for StackElement {}

/// Unlinks the parents one by one: the default drop recurses once per frame
impl Drop for StackElement {
    fn drop(&mut self) {
        let mut parent = self.parent.take();
        while let Some(frame) = parent {
            parent = match Arc::into_inner(frame) {
                Some(mut frame) => frame.parent.take(),
                None => None,
            };
        }
    }
}

impl Hash for StackElement {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.structural_hash.hash(state);
    }
}

impl fmt::Debug for StackElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rules: Vec<u32> = self.iter().map(|e| *e.rule_id).collect();
        f.debug_struct("StackElement")
            .field("depth", &self.depth)
            .field("rules", &rules)
            .field("end_rule", &self.end_rule)
            .field("content_scopes", &self.content_name_scopes)
            .finish()
    }
}
