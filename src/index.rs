//! Search index over zettel words, URLs and references.
//!
//! The manager feeds every created, changed or deleted zettel to an
//! [`Indexer`]. Reference properties (`forward`, `backward`, `dead`) are
//! computed from the index when metadata is read, so they never go stale.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::RwLock;

use crate::id::{ZID_LEN, Zid, ZidSet};
use crate::meta::keys::{KEY_BACKWARD, KEY_DEAD, KEY_FORWARD};
use crate::meta::{KeyType, Meta, is_property, key_type, split_list};
use crate::query::compiler::{fold_case, word_matches};
use crate::query::{CompareOp, Searcher};
use crate::zettel::Zettel;

/// Case-folded alphanumeric words of `text`.
pub fn split_words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(fold_case)
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub zettel: usize,
    pub words: usize,
    pub urls: usize,
    /// Number of index updates since creation.
    pub updates: u64,
}

/// Keeps derived data of zettel up to date.
///
/// Calls for the same identifier may repeat; each replaces what was known.
pub trait Indexer: Searcher {
    fn update_zettel(&self, zettel: &Zettel);

    fn delete_zettel(&self, zid: Zid);

    /// Identifiers currently known to the index.
    fn indexed(&self) -> ZidSet;

    /// Add reference properties to `meta`.
    fn enrich(&self, meta: &mut Meta);

    fn stats(&self) -> IndexStats;
}

/// Derived data of one zettel.
#[derive(Debug, Default)]
struct ZettelIndex {
    refs: ZidSet,
    words: BTreeSet<String>,
    urls: BTreeSet<String>,
}

impl ZettelIndex {
    fn collect(zettel: &Zettel) -> Self {
        let mut index = ZettelIndex::default();
        for (key, value) in zettel.meta.iter() {
            if is_property(key) {
                continue;
            }
            match key_type(key) {
                KeyType::Zid | KeyType::IdSet => {
                    index
                        .refs
                        .extend(split_list(value).into_iter().filter_map(|v| Zid::parse(v).ok()));
                }
                KeyType::Url => {
                    index.urls.insert(value.to_string());
                }
                KeyType::String | KeyType::Word | KeyType::WordSet | KeyType::TagSet => {
                    index.words.extend(split_words(value));
                }
                _ => {}
            }
        }
        if let Some(text) = zettel.text() {
            for token in text.split_whitespace() {
                if token.starts_with("http://") || token.starts_with("https://") {
                    index.urls.insert(token.to_string());
                    continue;
                }
                index.refs.extend(content_refs(token));
            }
            index.words.extend(split_words(text));
        }
        index.refs.remove(&zettel.zid());
        index
    }
}

/// Identifiers written as standalone 14-digit runs in `token`.
fn content_refs(token: &str) -> impl Iterator<Item = Zid> + '_ {
    token
        .split(|c: char| !c.is_ascii_digit())
        .filter(|run| run.len() == ZID_LEN)
        .filter_map(|run| Zid::parse(run).ok())
}

#[derive(Default)]
struct IndexStore {
    zettel: HashMap<Zid, ZettelIndex>,
    words: BTreeMap<String, ZidSet>,
    urls: BTreeMap<String, ZidSet>,
    backrefs: HashMap<Zid, ZidSet>,
    updates: u64,
}

impl IndexStore {
    fn remove(&mut self, zid: Zid) -> bool {
        let Some(old) = self.zettel.remove(&zid) else {
            return false;
        };
        for word in &old.words {
            unlink_word(&mut self.words, word, zid);
        }
        for url in &old.urls {
            unlink_word(&mut self.urls, url, zid);
        }
        for target in &old.refs {
            unlink_ref(&mut self.backrefs, *target, zid);
        }
        true
    }

    fn insert(&mut self, zid: Zid, index: ZettelIndex) {
        for word in &index.words {
            self.words.entry(word.clone()).or_default().insert(zid);
        }
        for url in &index.urls {
            self.urls.entry(url.clone()).or_default().insert(zid);
        }
        for target in &index.refs {
            self.backrefs.entry(*target).or_default().insert(zid);
        }
        self.zettel.insert(zid, index);
    }
}

fn unlink_word(map: &mut BTreeMap<String, ZidSet>, key: &str, zid: Zid) {
    if let Some(set) = map.get_mut(key) {
        set.remove(&zid);
        if set.is_empty() {
            map.remove(key);
        }
    }
}

fn unlink_ref(map: &mut HashMap<Zid, ZidSet>, key: Zid, zid: Zid) {
    if let Some(set) = map.get_mut(&key) {
        set.remove(&zid);
        if set.is_empty() {
            map.remove(&key);
        }
    }
}

/// Index kept in process memory.
#[derive(Default)]
pub struct MemoryIndex {
    store: RwLock<IndexStore>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifiers of zettel mentioning `url`.
    pub fn search_url(&self, url: &str) -> ZidSet {
        self.store.read().urls.get(url).cloned().unwrap_or_default()
    }

    pub fn contains(&self, zid: Zid) -> bool {
        self.store.read().zettel.contains_key(&zid)
    }
}

impl Searcher for MemoryIndex {
    fn search(&self, op: CompareOp, word: &str) -> ZidSet {
        let store = self.store.read();
        match op {
            CompareOp::Equal => store.words.get(word).cloned().unwrap_or_default(),
            CompareOp::Prefix => store
                .words
                .range(word.to_string()..)
                .take_while(|(w, _)| w.starts_with(word))
                .flat_map(|(_, zids)| zids.iter().copied())
                .collect(),
            _ => store
                .words
                .iter()
                .filter(|(w, _)| word_matches(op, w, word))
                .flat_map(|(_, zids)| zids.iter().copied())
                .collect(),
        }
    }
}

impl Indexer for MemoryIndex {
    fn update_zettel(&self, zettel: &Zettel) {
        let index = ZettelIndex::collect(zettel);
        let mut store = self.store.write();
        store.remove(zettel.zid());
        store.insert(zettel.zid(), index);
        store.updates += 1;
        tracing::trace!("indexed zettel {}", zettel.zid());
    }

    fn delete_zettel(&self, zid: Zid) {
        let mut store = self.store.write();
        if store.remove(zid) {
            store.updates += 1;
            tracing::trace!("removed zettel {zid} from index");
        }
    }

    fn indexed(&self) -> ZidSet {
        self.store.read().zettel.keys().copied().collect()
    }

    fn enrich(&self, meta: &mut Meta) {
        let store = self.store.read();
        if let Some(index) = store.zettel.get(&meta.zid) {
            let (forward, dead): (Vec<Zid>, Vec<Zid>) = index
                .refs
                .iter()
                .copied()
                .partition(|z| store.zettel.contains_key(z));
            set_ids(meta, KEY_FORWARD, forward.iter());
            set_ids(meta, KEY_DEAD, dead.iter());
        }
        if let Some(back) = store.backrefs.get(&meta.zid) {
            set_ids(meta, KEY_BACKWARD, back.iter());
        }
    }

    fn stats(&self) -> IndexStats {
        let store = self.store.read();
        IndexStats {
            zettel: store.zettel.len(),
            words: store.words.len(),
            urls: store.urls.len(),
            updates: store.updates,
        }
    }
}

fn set_ids<'a>(meta: &mut Meta, key: &str, zids: impl Iterator<Item = &'a Zid>) {
    let value = zids.map(Zid::to_string).collect::<Vec<_>>().join(" ");
    if !value.is_empty() {
        meta.set(key, &value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zettel(zid: u64, pairs: &[(&str, &str)], content: &str) -> Zettel {
        let mut meta = Meta::new(Zid(zid));
        for (k, v) in pairs {
            meta.set(k, v);
        }
        Zettel::new(meta, content)
    }

    #[test]
    fn test_split_words() {
        assert_eq!(
            split_words("Hello, World! #rust-lang 42"),
            vec!["hello", "world", "rust", "lang", "42"]
        );
    }

    #[test]
    fn test_word_search() {
        let index = MemoryIndex::new();
        index.update_zettel(&zettel(20230101120000, &[("title", "Alpha Beta")], "gamma"));
        index.update_zettel(&zettel(20230101120001, &[("role", "task")], "alphabet soup"));

        let one = ZidSet::from([Zid(20230101120000)]);
        let both = ZidSet::from([Zid(20230101120000), Zid(20230101120001)]);
        assert_eq!(index.search(CompareOp::Equal, "alpha"), one);
        assert_eq!(index.search(CompareOp::Prefix, "alpha"), both);
        assert_eq!(index.search(CompareOp::Match, "amm"), one);
        assert_eq!(
            index.search(CompareOp::Equal, "task"),
            ZidSet::from([Zid(20230101120001)])
        );
    }

    #[test]
    fn test_update_replaces_old_words() {
        let index = MemoryIndex::new();
        index.update_zettel(&zettel(20230101120000, &[], "old words"));
        index.update_zettel(&zettel(20230101120000, &[], "new text"));
        assert!(index.search(CompareOp::Equal, "old").is_empty());
        assert_eq!(index.search(CompareOp::Equal, "new").len(), 1);
        assert_eq!(index.stats().updates, 2);
        assert_eq!(index.stats().zettel, 1);
        assert_eq!(index.indexed(), ZidSet::from([Zid(20230101120000)]));
    }

    #[test]
    fn test_references_and_enrichment() {
        let index = MemoryIndex::new();
        index.update_zettel(&zettel(
            20230101120000,
            &[("precursor", "20230101120001")],
            "see 20230101120002 and 20991231235959",
        ));
        index.update_zettel(&zettel(20230101120001, &[], "target"));
        index.update_zettel(&zettel(20230101120002, &[], "other"));

        let mut meta = Meta::new(Zid(20230101120000));
        index.enrich(&mut meta);
        assert_eq!(meta.get("forward"), Some("20230101120001 20230101120002"));
        assert_eq!(meta.get("dead"), Some("20991231235959"));

        let mut target = Meta::new(Zid(20230101120001));
        index.enrich(&mut target);
        assert_eq!(target.get("backward"), Some("20230101120000"));

        index.delete_zettel(Zid(20230101120000));
        let mut target = Meta::new(Zid(20230101120001));
        index.enrich(&mut target);
        assert!(!target.has("backward"));
    }

    #[test]
    fn test_urls() {
        let index = MemoryIndex::new();
        index.update_zettel(&zettel(
            20230101120000,
            &[("url", "https://example.org")],
            "more at https://rust-lang.org",
        ));
        assert_eq!(index.search_url("https://example.org").len(), 1);
        assert_eq!(index.search_url("https://rust-lang.org").len(), 1);
        assert_eq!(index.stats().urls, 2);
    }
}
