//! Substitution of captured text into end/while patterns and scope names.

use std::borrow::Cow;
use std::sync::LazyLock;

use onig::{Captures, Regex};

use crate::grammars::backend::CaptureSpans;

static BACKREFERENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\(\d+)").expect("Invalid backreference regex"));

static CAPTURE_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(\d+)|\$\{(\d+):\/(downcase|upcase)\}").expect("Invalid capture name regex")
});

/// Escapes every character that has a meaning in a regex
pub fn escape_regex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '-' | '\\'
                | '{'
                | '}'
                | '*'
                | '+'
                | '?'
                | '|'
                | '^'
                | '$'
                | '.'
                | ','
                | '['
                | ']'
                | '('
                | ')'
                | '#'
        ) || c.is_whitespace()
        {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn captured_text<'a>(text: &'a str, spans: &CaptureSpans, index: usize) -> Option<&'a str> {
    let (start, end) = spans.get(index).copied().flatten()?;
    text.get(start..end)
}

/// Replaces `\1`, `\2`... in an end or while pattern with the escaped text captured by
/// the begin pattern.
///
/// Groups that didn't participate in the match are replaced with an empty string.
/// If the template refers to a group the begin pattern doesn't have, it is returned
/// unchanged.
pub fn resolve_backreferences<'t>(template: &'t str, text: &str, spans: &CaptureSpans) -> Cow<'t, str> {
    let out_of_range = BACKREFERENCE_REGEX
        .captures_iter(template)
        .filter_map(|caps| caps.at(1)?.parse::<usize>().ok())
        .any(|index| index >= spans.len());
    if out_of_range {
        log::warn!("Backreference out of range in {template:?}, keeping it as is");
        return Cow::Borrowed(template);
    }

    let resolved = BACKREFERENCE_REGEX.replace_all(template, |caps: &Captures| {
        let index = caps.at(1).and_then(|i| i.parse::<usize>().ok()).unwrap_or(0);
        captured_text(text, spans, index)
            .map(escape_regex)
            .unwrap_or_default()
    });
    Cow::Owned(resolved)
}

pub(crate) fn has_capture_references(name: &str) -> bool {
    CAPTURE_NAME_REGEX.find(name).is_some()
}

/// Replaces `$1` and `${1:/downcase}`/`${1:/upcase}` in a scope name with the captured text.
/// References to missing groups are left as is.
pub fn replace_captures<'n>(name: &'n str, text: &str, spans: &CaptureSpans) -> Cow<'n, str> {
    if !has_capture_references(name) {
        return Cow::Borrowed(name);
    }

    let replaced = CAPTURE_NAME_REGEX.replace_all(name, |caps: &Captures| {
        let whole = caps.at(0).unwrap_or_default();
        let index = caps
            .at(1)
            .or_else(|| caps.at(2))
            .and_then(|i| i.parse::<usize>().ok());
        let Some(captured) = index.and_then(|i| captured_text(text, spans, i)) else {
            return whole.to_string();
        };
        // A leading dot would produce an invalid scope
        let captured = captured.trim_start_matches('.');
        match caps.at(3) {
            Some("downcase") => captured.to_lowercase(),
            Some("upcase") => captured.to_uppercase(),
            _ => captured.to_string(),
        }
    });
    Cow::Owned(replaced)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_regex_characters() {
        assert_eq!(escape_regex("a.b*c"), r"a\.b\*c");
        assert_eq!(escape_regex("<<EOF"), "<<EOF");
        assert_eq!(escape_regex("[x] y"), r"\[x\]\ y");
    }

    #[test]
    fn resolves_backreferences() {
        let text = "<<-EOF.x";
        let spans = vec![Some((0, 8)), Some((3, 6)), Some((6, 8)), None];
        assert_eq!(resolve_backreferences(r"^\1$", text, &spans), "^EOF$");
        assert_eq!(resolve_backreferences(r"\1\2", text, &spans), r"EOF\.x");
        // Non participating group
        assert_eq!(resolve_backreferences(r"a\3b", text, &spans), "ab");
        // Out of range keeps the template
        assert_eq!(resolve_backreferences(r"\1\7", text, &spans), r"\1\7");
    }

    #[test]
    fn replaces_captures_in_names() {
        let text = "def Foo";
        let spans = vec![Some((0, 7)), Some((0, 3)), Some((4, 7))];
        assert_eq!(replace_captures("keyword.$1", text, &spans), "keyword.def");
        assert_eq!(
            replace_captures("entity.${2:/downcase}.${2:/upcase}", text, &spans),
            "entity.foo.FOO"
        );
        assert_eq!(replace_captures("meta.$5", text, &spans), "meta.$5");
        assert!(matches!(
            replace_captures("plain.name", text, &spans),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn strips_leading_dots_from_captures() {
        let text = "..x";
        let spans = vec![Some((0, 3)), Some((0, 3))];
        assert_eq!(replace_captures("a.$1", text, &spans), "a.x");
    }
}
