use std::borrow::Cow;
use std::fmt;

/// Which of `\A` and `\G` can match at the current scan position.
///
/// `\A` only makes sense on the first line of a document and `\G` only where the
/// previous match ended, so the regexes are compiled in up to 4 flavours with the
/// inactive anchors replaced by something that never matches.
#[derive(Copy, Clone, PartialEq, Hash, Eq)]
pub enum AnchorActive {
    /// Only \A is active
    A,
    /// Only \G is active
    G,
    /// Both \A and \G are active
    AG,
    /// Neither \A nor \G are active
    None,
}

impl AnchorActive {
    pub fn new(is_first_line: bool, anchor_position: Option<usize>, current_pos: usize) -> Self {
        let g_active = anchor_position == Some(current_pos);

        match (is_first_line, g_active) {
            (true, true) => AnchorActive::AG,
            (true, false) => AnchorActive::A,
            (false, true) => AnchorActive::G,
            (false, false) => AnchorActive::None,
        }
    }

    /// Slot in a per-flavour cache
    pub(crate) fn index(self) -> usize {
        match self {
            AnchorActive::AG => 0,
            AnchorActive::A => 1,
            AnchorActive::G => 2,
            AnchorActive::None => 3,
        }
    }

    fn allows(self, anchor: char) -> bool {
        match (self, anchor) {
            (AnchorActive::AG, _) => true,
            (AnchorActive::A, 'A') => true,
            (AnchorActive::G, 'G') => true,
            _ => false,
        }
    }

    /// Replaces the inactive anchors with `\u{FFFF}`, a non character that won't be
    /// in the text. Escaped backslashes are skipped so `\\G` is left alone.
    pub fn replace_anchors<'a>(&self, pat: &'a str) -> Cow<'a, str> {
        if *self == AnchorActive::AG {
            return Cow::Borrowed(pat);
        }

        let mut out: Option<String> = None;
        let mut last = 0;
        let mut chars = pat.char_indices();
        while let Some((i, c)) = chars.next() {
            if c != '\\' {
                continue;
            }
            let Some((_, next)) = chars.next() else {
                break;
            };
            if (next == 'A' || next == 'G') && !self.allows(next) {
                let buf = out.get_or_insert_with(|| String::with_capacity(pat.len()));
                buf.push_str(&pat[last..i]);
                buf.push('\u{FFFF}');
                last = i + 2;
            }
        }

        match out {
            Some(mut buf) => {
                buf.push_str(&pat[last..]);
                Cow::Owned(buf)
            }
            None => Cow::Borrowed(pat),
        }
    }
}

impl fmt::Debug for AnchorActive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnchorActive::A => "allow_A=true, allow_G=false",
            AnchorActive::G => "allow_A=false, allow_G=true",
            AnchorActive::AG => "allow_A=true, allow_G=true",
            AnchorActive::None => "allow_A=false, allow_G=false",
        };
        f.write_str(s)
    }
}
