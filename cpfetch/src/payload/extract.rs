//! Content-based detection of base64 payload lines.
//!
//! There are no sentinel markers around the dump, so a line is taken as
//! payload purely by its shape: long enough and made only of the base64
//! alphabet. A prompt or echo that happens to have that shape is a false
//! positive this filter cannot rule out.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// Shortest line accepted as payload.
pub const MIN_CANDIDATE_LEN: usize = 40;

static BASE64_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9+/=]+$").unwrap());

/// Check whether an already cleaned line qualifies as payload.
pub fn is_candidate(line: &str) -> bool {
    line.len() >= MIN_CANDIDATE_LEN && BASE64_LINE.is_match(line)
}

/// Candidate lines in stream order. Lines are borrowed from the collected
/// text unless carriage returns had to be removed from them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload<'a> {
    lines: Vec<Cow<'a, str>>,
}

impl<'a> Payload<'a> {
    /// The candidate lines, in the order they were received.
    pub fn lines(&self) -> &[Cow<'a, str>] {
        &self.lines
    }

    /// Number of candidate lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Check if no line qualified.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// First candidate line.
    pub fn first(&self) -> Option<&str> {
        self.lines.first().map(|l| l.as_ref())
    }

    /// Last candidate line.
    pub fn last(&self) -> Option<&str> {
        self.lines.last().map(|l| l.as_ref())
    }

    /// Total length of the base64 text.
    pub fn encoded_len(&self) -> usize {
        self.lines.iter().map(|l| l.len()).sum()
    }

    /// Concatenate all lines into one base64 string.
    pub fn concat(&self) -> String {
        let mut out = String::with_capacity(self.encoded_len());
        for line in &self.lines {
            out.push_str(line);
        }
        out
    }
}

impl<'a> FromIterator<Cow<'a, str>> for Payload<'a> {
    fn from_iter<I: IntoIterator<Item = Cow<'a, str>>>(iter: I) -> Self {
        Self {
            lines: iter.into_iter().collect(),
        }
    }
}

impl<'a> FromIterator<&'a str> for Payload<'a> {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        iter.into_iter().map(Cow::Borrowed).collect()
    }
}

/// Trim a line and drop every carriage return in it. PTYs emit `\r\n`
/// line endings and sometimes a stray `\r` mid-line when output is redrawn.
fn clean_line(line: &str) -> Cow<'_, str> {
    let line = line.trim();
    if line.contains('\r') {
        Cow::Owned(line.replace('\r', ""))
    } else {
        Cow::Borrowed(line)
    }
}

/// Pick the payload lines out of raw session output.
///
/// Each line is trimmed and stripped of carriage returns, then kept only if
/// the whole line is base64 alphabet and at least [`MIN_CANDIDATE_LEN`]
/// long. A single foreign character anywhere rejects the line.
pub fn extract_candidates(raw: &str) -> Payload<'_> {
    raw.split('\n')
        .map(clean_line)
        .filter(|l| is_candidate(l))
        .collect()
}
