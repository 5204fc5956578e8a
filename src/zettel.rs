use crate::id::Zid;
use crate::meta::Meta;

/// A stored note: metadata plus opaque content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Zettel {
    pub meta: Meta,
    pub content: Vec<u8>,
}

impl Zettel {
    pub fn new(meta: Meta, content: impl Into<Vec<u8>>) -> Self {
        Self {
            meta,
            content: content.into(),
        }
    }

    pub fn zid(&self) -> Zid {
        self.meta.zid
    }

    /// Content that is not UTF-8 or contains NUL bytes is binary.
    pub fn is_binary(&self) -> bool {
        self.content.contains(&0) || std::str::from_utf8(&self.content).is_err()
    }

    /// Content as text, if it is text.
    pub fn text(&self) -> Option<&str> {
        if self.content.contains(&0) {
            return None;
        }
        std::str::from_utf8(&self.content).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_detection() {
        let meta = Meta::new(Zid(20230101120000));
        assert!(!Zettel::new(meta.clone(), "plain text").is_binary());
        assert!(Zettel::new(meta.clone(), vec![0x89, 0x50, 0x00]).is_binary());
        assert!(Zettel::new(meta, vec![0xff, 0xfe]).is_binary());
    }
}
