//! Metadata key registry.
//!
//! Every key has a value type that decides how query comparisons work on
//! it. Known keys are registered here; unknown keys are typed by suffix.

pub const KEY_ID: &str = "id";
pub const KEY_TITLE: &str = "title";
pub const KEY_ROLE: &str = "role";
pub const KEY_TAGS: &str = "tags";
pub const KEY_SYNTAX: &str = "syntax";
pub const KEY_CREATED: &str = "created";
pub const KEY_MODIFIED: &str = "modified";
pub const KEY_BOX_NUMBER: &str = "box-number";
pub const KEY_BACK: &str = "back";
pub const KEY_BACKWARD: &str = "backward";
pub const KEY_FORWARD: &str = "forward";
pub const KEY_DEAD: &str = "dead";
pub const KEY_URL: &str = "url";
pub const KEY_USELESS_FILES: &str = "useless-files";

/// Value type of a metadata key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// A single zettel identifier.
    Zid,
    /// Space separated identifiers.
    IdSet,
    /// 14-digit `YYYYMMDDhhmmss`, possibly truncated.
    Timestamp,
    Number,
    /// Space separated `#tag` values.
    TagSet,
    /// A single word, compared case-insensitively.
    Word,
    WordSet,
    /// Free text.
    String,
    Url,
    /// Never revealed through queries.
    Credential,
}

impl KeyType {
    pub fn is_set(self) -> bool {
        matches!(self, KeyType::IdSet | KeyType::TagSet | KeyType::WordSet)
    }
}

struct KeyDescr {
    name: &'static str,
    ty: KeyType,
    property: bool,
}

const fn key(name: &'static str, ty: KeyType) -> KeyDescr {
    KeyDescr {
        name,
        ty,
        property: false,
    }
}

const fn property(name: &'static str, ty: KeyType) -> KeyDescr {
    KeyDescr {
        name,
        ty,
        property: true,
    }
}

const REGISTERED: &[KeyDescr] = &[
    key(KEY_ID, KeyType::Zid),
    key(KEY_TITLE, KeyType::String),
    key(KEY_ROLE, KeyType::Word),
    key(KEY_TAGS, KeyType::TagSet),
    key(KEY_SYNTAX, KeyType::Word),
    property(KEY_BACK, KeyType::IdSet),
    property(KEY_BACKWARD, KeyType::IdSet),
    property(KEY_BOX_NUMBER, KeyType::Number),
    key("copyright", KeyType::String),
    key(KEY_CREATED, KeyType::Timestamp),
    key("credential", KeyType::Credential),
    property(KEY_DEAD, KeyType::IdSet),
    property("folge", KeyType::IdSet),
    key("folge-role", KeyType::Word),
    property(KEY_FORWARD, KeyType::IdSet),
    key("lang", KeyType::Word),
    key("license", KeyType::String),
    key(KEY_MODIFIED, KeyType::Timestamp),
    key("precursor", KeyType::IdSet),
    property("published", KeyType::Timestamp),
    key("summary", KeyType::String),
    property("successors", KeyType::IdSet),
    key(KEY_URL, KeyType::Url),
    property(KEY_USELESS_FILES, KeyType::String),
    key("user-id", KeyType::Word),
    key("visibility", KeyType::Word),
];

fn lookup(key: &str) -> Option<&'static KeyDescr> {
    REGISTERED.iter().find(|d| d.name == key)
}

/// Value type of `key`; unregistered keys are typed by their suffix.
pub fn key_type(key: &str) -> KeyType {
    if let Some(descr) = lookup(key) {
        return descr.ty;
    }
    if key.ends_with("-number") {
        KeyType::Number
    } else if key.ends_with("-role") {
        KeyType::Word
    } else if key.ends_with("-set") {
        KeyType::WordSet
    } else if key.ends_with("-url") {
        KeyType::Url
    } else if key.ends_with("-zids") {
        KeyType::IdSet
    } else if key.ends_with("-zid") {
        KeyType::Zid
    } else if key.ends_with("-date") {
        KeyType::Timestamp
    } else {
        KeyType::String
    }
}

/// Property keys are computed on the read path and never stored.
pub fn is_property(key: &str) -> bool {
    lookup(key).is_some_and(|d| d.property)
}

/// Keys are lowercase ASCII letters, digits and hyphens, starting with a letter.
pub fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}
