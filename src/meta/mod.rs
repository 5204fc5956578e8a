//! Zettel metadata.
//!
//! Metadata is stored as `key: value` lines, either in a `.meta` file next
//! to the content or as the header of a `.zettel` file.

use std::collections::BTreeMap;

use crate::id::Zid;

pub mod keys;

pub use keys::{KeyType, is_property, is_valid_key, key_type};

/// Keys written first, in this order. Remaining keys follow alphabetically.
const FIRST_KEYS: &[&str] = &[keys::KEY_TITLE, keys::KEY_ROLE, keys::KEY_TAGS, keys::KEY_SYNTAX];

/// Metadata record of one zettel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Meta {
    pub zid: Zid,
    pairs: BTreeMap<String, String>,
}

impl Meta {
    pub fn new(zid: Zid) -> Self {
        Self {
            zid,
            pairs: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.get(key).map(String::as_str)
    }

    pub fn has(&self, key: &str) -> bool {
        self.pairs.contains_key(key)
    }

    /// Set `key` to `value`.
    ///
    /// Invalid keys and the `id` key are ignored; the identifier lives in
    /// `zid`. Line breaks become single spaces, so a value always stays on
    /// one line. Tag values are normalized to carry a leading `#`.
    pub fn set(&mut self, key: &str, value: &str) {
        if key == keys::KEY_ID || !is_valid_key(key) {
            return;
        }
        let value = single_line(value);
        let value = if key_type(key) == KeyType::TagSet {
            normalize_tags(&value)
        } else {
            value
        };
        self.pairs.insert(key.to_string(), value);
    }

    pub fn delete(&mut self, key: &str) -> Option<String> {
        self.pairs.remove(key)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Elements of a set-valued key.
    pub fn get_list(&self, key: &str) -> Vec<&str> {
        self.get(key).map(split_list).unwrap_or_default()
    }

    /// Remove all computed keys so they never reach storage.
    pub fn clean_properties(&mut self) {
        self.pairs.retain(|k, _| !is_property(k));
    }

    /// Parse `key: value` lines.
    pub fn parse(zid: Zid, text: &str) -> Self {
        let mut meta = Meta::new(zid);
        let mut last: Option<String> = None;
        for line in text.lines() {
            if line.starts_with([' ', '\t']) {
                if let Some(key) = &last
                    && let Some(prev) = meta.get(key)
                {
                    let joined = format!("{prev} {}", line.trim());
                    meta.set(key, &joined);
                }
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                last = None;
                continue;
            };
            let key = key.trim().to_lowercase();
            if !is_valid_key(&key) {
                last = None;
                continue;
            }
            match meta.get(&key) {
                Some(prev) if key_type(&key).is_set() => {
                    let joined = format!("{prev} {}", value.trim());
                    meta.set(&key, &joined);
                }
                _ => meta.set(&key, value),
            }
            last = Some(key);
        }
        meta
    }

    /// Parse the metadata header of a `.zettel` file.
    ///
    /// The header ends at the first empty line. Returns the metadata and the
    /// byte offset where the content starts.
    pub fn parse_header(zid: Zid, data: &[u8]) -> (Self, usize) {
        let mut pos = 0;
        let mut end = data.len();
        while pos < data.len() {
            let line_end = data[pos..]
                .iter()
                .position(|&b| b == b'\n')
                .map_or(data.len(), |i| pos + i);
            let line = &data[pos..line_end];
            let next = (line_end + 1).min(data.len());
            if line.iter().all(|b| *b == b'\r') {
                end = pos;
                pos = next;
                let header = String::from_utf8_lossy(&data[..end]);
                return (Meta::parse(zid, &header), pos);
            }
            pos = next;
        }
        let header = String::from_utf8_lossy(&data[..end]);
        (Meta::parse(zid, &header), data.len())
    }

    /// Append the canonical text form to `out`.
    pub fn write_to(&self, out: &mut String) {
        for key in FIRST_KEYS {
            if let Some(value) = self.get(key) {
                push_line(out, key, value);
            }
        }
        for (key, value) in &self.pairs {
            if !FIRST_KEYS.contains(&key.as_str()) {
                push_line(out, key, value);
            }
        }
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        self.write_to(&mut out);
        out
    }
}

fn push_line(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push_str(": ");
    out.push_str(value);
    out.push('\n');
}

/// Split a set value on whitespace and commas.
pub fn split_list(value: &str) -> Vec<&str> {
    value
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .collect()
}

fn normalize_tags(value: &str) -> String {
    split_list(value)
        .into_iter()
        .map(|t| {
            if t.starts_with('#') {
                t.to_string()
            } else {
                format!("#{t}")
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Join the lines of `value`, trimmed, with single spaces.
fn single_line(value: &str) -> String {
    value
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
