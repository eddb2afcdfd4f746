//! Series key model.
//!
//! A series+field key looks like `cpu,host=a,region=west#usage`:
//!
//! - everything before the first unescaped `#` is the **series key**, the
//!   rest is the **field**;
//! - the series key is the **measurement**, then `,`-separated `key=value`
//!   **tags**;
//! - a backslash escapes `,`, `=`, ` ` and `#`. Any other byte after a
//!   backslash keeps the backslash.

use std::fmt;

/// Separator between series key and field.
pub const FIELD_SEPARATOR: u8 = b'#';

const ESCAPE: u8 = b'\\';

fn is_escapable(b: u8) -> bool {
    matches!(b, b',' | b'=' | b' ' | b'#')
}

/// One `key=value` pair of a series key, unescaped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Tag {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Tag set of a series, sorted by tag key.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tags(Vec<Tag>);

impl Tags {
    /// Build a tag set; tags are sorted by key.
    pub fn new(mut tags: Vec<Tag>) -> Self {
        tags.sort();
        Self(tags)
    }

    /// Value of tag `key`.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.0
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_slice())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tag> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a Tags {
    type Item = &'a Tag;
    type IntoIter = std::slice::Iter<'a, Tag>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, tag) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(
                f,
                "{}={}",
                String::from_utf8_lossy(&tag.key),
                String::from_utf8_lossy(&tag.value)
            )?;
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Parsing
// ------------------------------------------------------------------------------------------------

/// Position of the first unescaped `needle` in `buf`.
fn find_unescaped(buf: &[u8], needle: u8) -> Option<usize> {
    let mut i = 0;
    while i < buf.len() {
        match buf[i] {
            ESCAPE => i += 2,
            b if b == needle => return Some(i),
            _ => i += 1,
        }
    }
    None
}

/// Split `buf` on every unescaped `sep`.
fn split_unescaped(buf: &[u8], sep: u8) -> Vec<&[u8]> {
    let mut parts = Vec::new();
    let mut rest = buf;
    while let Some(pos) = find_unescaped(rest, sep) {
        parts.push(&rest[..pos]);
        rest = &rest[pos + 1..];
    }
    parts.push(rest);
    parts
}

/// Drop the backslash in front of escaped bytes.
pub fn unescape(buf: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(buf.len());
    let mut i = 0;
    while i < buf.len() {
        if buf[i] == ESCAPE && i + 1 < buf.len() && is_escapable(buf[i + 1]) {
            out.push(buf[i + 1]);
            i += 2;
        } else {
            out.push(buf[i]);
            i += 1;
        }
    }
    out
}

/// Backslash-escape `,`, `=`, ` ` and `#`.
pub fn escape(buf: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(buf.len());
    for &b in buf {
        if is_escapable(b) {
            out.push(ESCAPE);
        }
        out.push(b);
    }
    out
}

/// Split a series+field key into `(series_key, field)` at the first
/// unescaped `#`. Without a separator the whole key is the series key.
pub fn series_and_field(key: &[u8]) -> (&[u8], &[u8]) {
    match find_unescaped(key, FIELD_SEPARATOR) {
        Some(pos) => (&key[..pos], &key[pos + 1..]),
        None => (key, &key[key.len()..]),
    }
}

/// Measurement name and tags of a series key, both unescaped.
///
/// Empty tag segments are ignored; a segment without `=` becomes a tag with
/// an empty value.
pub fn parse_key(series_key: &[u8]) -> (Vec<u8>, Tags) {
    let mut parts = split_unescaped(series_key, b',').into_iter();
    let name = parts.next().map(unescape).unwrap_or_default();
    let tags = parts
        .filter(|part| !part.is_empty())
        .map(|part| match find_unescaped(part, b'=') {
            Some(pos) => Tag::new(unescape(&part[..pos]), unescape(&part[pos + 1..])),
            None => Tag::new(unescape(part), Vec::new()),
        })
        .collect();
    (name, Tags::new(tags))
}

/// Build an escaped series key from a measurement and tags.
pub fn make_key(name: &[u8], tags: &Tags) -> Vec<u8> {
    let mut key = escape(name);
    for tag in tags {
        key.push(b',');
        key.extend_from_slice(&escape(&tag.key));
        key.push(b'=');
        key.extend_from_slice(&escape(&tag.value));
    }
    key
}

/// `series_key#field`.
pub fn composite_key(series_key: &[u8], field: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(series_key.len() + 1 + field.len());
    key.extend_from_slice(series_key);
    key.push(FIELD_SEPARATOR);
    key.extend_from_slice(field);
    key
}
