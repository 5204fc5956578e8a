//! File extension to syntax table.
//!
//! When several files share one identifier, the one whose extension ranks
//! best becomes the content file. The rank is the position in `SYNTAXES`:
//! structured markup first, then other text formats, then graphics.
//! Extensions missing from the table rank after all known ones, ordered
//! among themselves by name so the choice stays deterministic.

use std::cmp::Ordering;

/// Extension of files that hold metadata for a sibling content file.
pub const META_EXT: &str = "meta";
/// Extension of files that hold metadata header and content together.
pub const ZETTEL_EXT: &str = "zettel";
/// Syntax assumed for `.zettel` files that declare none.
pub const DEFAULT_SYNTAX: &str = "zmk";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    StructuredMarkup,
    Text,
    Graphics,
    Unknown,
}

#[derive(Debug, Clone, Copy)]
pub struct SyntaxInfo {
    pub ext: &'static str,
    pub syntax: &'static str,
    pub tier: Tier,
    pub binary: bool,
}

const fn info(ext: &'static str, syntax: &'static str, tier: Tier, binary: bool) -> SyntaxInfo {
    SyntaxInfo {
        ext,
        syntax,
        tier,
        binary,
    }
}

const SYNTAXES: &[SyntaxInfo] = &[
    info(ZETTEL_EXT, DEFAULT_SYNTAX, Tier::StructuredMarkup, false),
    info("zmk", "zmk", Tier::StructuredMarkup, false),
    info("md", "markdown", Tier::StructuredMarkup, false),
    info("markdown", "markdown", Tier::StructuredMarkup, false),
    info("sxn", "sxn", Tier::Text, false),
    info("txt", "text", Tier::Text, false),
    info("plain", "plain", Tier::Text, false),
    info("html", "html", Tier::Text, false),
    info("htm", "html", Tier::Text, false),
    info("css", "css", Tier::Text, false),
    info("mustache", "mustache", Tier::Text, false),
    info("svg", "svg", Tier::Graphics, false),
    info("png", "png", Tier::Graphics, true),
    info("jpg", "jpeg", Tier::Graphics, true),
    info("jpeg", "jpeg", Tier::Graphics, true),
    info("gif", "gif", Tier::Graphics, true),
    info("webp", "webp", Tier::Graphics, true),
];

pub fn by_ext(ext: &str) -> Option<&'static SyntaxInfo> {
    SYNTAXES.iter().find(|s| s.ext == ext)
}

/// Syntax of content stored with extension `ext`.
pub fn syntax_for_ext(ext: &str) -> &str {
    by_ext(ext).map_or(ext, |s| s.syntax)
}

/// Extension used when storing content of the given syntax.
///
/// `zmk` content is stored as a `.zettel` file with an inline header.
pub fn ext_for_syntax(syntax: &str) -> String {
    if syntax.is_empty() || syntax == DEFAULT_SYNTAX {
        return ZETTEL_EXT.to_string();
    }
    if let Some(info) = SYNTAXES
        .iter()
        .find(|s| s.syntax == syntax && s.ext != ZETTEL_EXT)
    {
        return info.ext.to_string();
    }
    if syntax.chars().all(|c| c.is_ascii_alphanumeric()) {
        syntax.to_string()
    } else {
        "txt".to_string()
    }
}

/// True if content with this extension is binary.
pub fn is_binary_ext(ext: &str) -> bool {
    by_ext(ext).is_some_and(|s| s.binary)
}

/// Extension of a file name: everything after the last dot, or "".
pub fn file_ext(name: &str) -> &str {
    match name.rfind('.') {
        Some(pos) => &name[pos + 1..],
        None => "",
    }
}

fn rank(ext: &str) -> Option<usize> {
    SYNTAXES.iter().position(|s| s.ext == ext)
}

/// Total order on extensions; `Ordering::Less` means `a` is the better one.
pub fn compare_ext(a: &str, b: &str) -> Ordering {
    match (rank(a), rank(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// True if a file with extension `new` should replace one with `old`.
pub fn ext_is_better(new: &str, old: &str) -> bool {
    compare_ext(new, old) == Ordering::Less
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiers_are_ordered_by_rank() {
        let mut last = Tier::StructuredMarkup;
        for info in SYNTAXES {
            assert!(info.tier >= last, "{} out of tier order", info.ext);
            last = info.tier;
        }
    }

    #[test]
    fn test_better_extension() {
        assert!(ext_is_better("zettel", "md"));
        assert!(ext_is_better("md", "txt"));
        assert!(ext_is_better("txt", "png"));
        assert!(ext_is_better("png", "xyz"));
        assert!(ext_is_better("abc", "xyz"));
        assert!(!ext_is_better("md", "md"));
        assert!(!ext_is_better("png", "zmk"));
    }

    #[test]
    fn test_compare_is_total_and_antisymmetric() {
        let exts = ["zettel", "zmk", "md", "txt", "svg", "png", "foo", "bar", ""];
        for a in exts {
            for b in exts {
                assert_eq!(compare_ext(a, b), compare_ext(b, a).reverse());
            }
        }
    }

    #[test]
    fn test_ext_for_syntax() {
        assert_eq!(ext_for_syntax("zmk"), "zettel");
        assert_eq!(ext_for_syntax(""), "zettel");
        assert_eq!(ext_for_syntax("markdown"), "md");
        assert_eq!(ext_for_syntax("jpeg"), "jpg");
        assert_eq!(ext_for_syntax("toml"), "toml");
        assert_eq!(ext_for_syntax("a/b"), "txt");
    }

    #[test]
    fn test_file_ext() {
        assert_eq!(file_ext("20230101120000.zettel"), "zettel");
        assert_eq!(file_ext("20230101120000 a.b.md"), "md");
        assert_eq!(file_ext("20230101120000"), "");
    }
}
