//! Zettel identifiers.
//!
//! A `Zid` is a 14-digit number derived from a timestamp (`YYYYMMDDhhmmss`).
//! It doubles as lookup key and approximate creation time. Its textual form
//! is always zero-padded to 14 digits, so lexicographic order on the text
//! equals numeric order.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BoxError;

/// Number of digits of the textual identifier form.
pub const ZID_LEN: usize = 14;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Zid(pub u64);

impl Zid {
    pub const INVALID: Zid = Zid(0);
    pub const MAX: Zid = Zid(99_999_999_999_999);

    /// Parse exactly 14 ASCII digits. Zero is rejected.
    pub fn parse(s: &str) -> Result<Self, BoxError> {
        if s.len() != ZID_LEN || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(BoxError::InvalidId(s.to_string()));
        }
        match s.parse::<u64>() {
            Ok(0) | Err(_) => Err(BoxError::InvalidId(s.to_string())),
            Ok(n) => Ok(Zid(n)),
        }
    }

    /// Identifier for the current local wall-clock second.
    pub fn now() -> Self {
        let dt = jiff::Zoned::now().datetime();
        let n = dt.year() as u64 * 10_000_000_000
            + dt.month() as u64 * 100_000_000
            + dt.day() as u64 * 1_000_000
            + dt.hour() as u64 * 10_000
            + dt.minute() as u64 * 100
            + dt.second() as u64;
        Zid(n)
    }

    pub fn is_valid(self) -> bool {
        self.0 > 0 && self.0 <= Self::MAX.0
    }

    /// The next identifier in numeric order.
    pub fn next(self) -> Self {
        Zid(self.0 + 1)
    }

    /// Lower and upper 32-bit halves, used by the worker routing hash.
    pub fn halves(self) -> (u32, u32) {
        (self.0 as u32, (self.0 >> 32) as u32)
    }
}

impl fmt::Display for Zid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:014}", self.0)
    }
}

impl FromStr for Zid {
    type Err = BoxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Zid::parse(s)
    }
}

/// Ordered set of identifiers.
pub type ZidSet = BTreeSet<Zid>;

/// Extract the identifier a file name starts with.
///
/// The first 14 characters must be digits and must not be followed by a
/// further digit (`202301011200001.md` is not an identifier-prefixed name).
pub fn parse_leading_zid(name: &str) -> Option<Zid> {
    let head = name.get(..ZID_LEN)?;
    if name[ZID_LEN..].starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    Zid::parse(head).ok()
}
