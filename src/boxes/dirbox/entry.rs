use crate::id::Zid;
use crate::meta::{Meta, keys::KEY_SYNTAX};
use crate::syntax::{self, META_EXT, ZETTEL_EXT};

/// Which files on disk belong to one zettel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirEntry {
    pub zid: Zid,
    pub meta_name: Option<String>,
    pub content_name: Option<String>,
    /// Files sharing the identifier that lost against the current ones.
    pub useless_files: Vec<String>,
}

impl DirEntry {
    pub fn new(zid: Zid) -> Self {
        Self {
            zid,
            ..Default::default()
        }
    }

    pub fn content_ext(&self) -> &str {
        self.content_name.as_deref().map_or("", syntax::file_ext)
    }

    /// True if the content file starts with a metadata header.
    pub fn has_meta_in_content(&self) -> bool {
        self.content_ext() == ZETTEL_EXT
    }

    /// No file refers to this identifier any more.
    pub fn is_empty(&self) -> bool {
        self.meta_name.is_none() && self.content_name.is_none() && self.useless_files.is_empty()
    }

    pub fn contains_file(&self, name: &str) -> bool {
        self.meta_name.as_deref() == Some(name)
            || self.content_name.as_deref() == Some(name)
            || self.useless_files.iter().any(|f| f == name)
    }

    /// All file names of this entry.
    pub fn file_names(&self) -> Vec<String> {
        self.meta_name
            .iter()
            .chain(self.content_name.iter())
            .chain(self.useless_files.iter())
            .cloned()
            .collect()
    }

    /// Record a file for this identifier.
    ///
    /// A `.meta` file becomes the metadata file unless one is already set.
    /// Any other file becomes the content file if its extension ranks better
    /// than the current one. Losers go to `useless_files`.
    pub fn add_file(&mut self, name: &str) {
        if self.contains_file(name) {
            return;
        }
        let ext = syntax::file_ext(name);
        if ext == META_EXT {
            match &self.meta_name {
                None => self.meta_name = Some(name.to_string()),
                Some(_) => self.push_useless(name),
            }
            return;
        }
        match self.content_name.take() {
            None => self.content_name = Some(name.to_string()),
            Some(current) => {
                if syntax::ext_is_better(ext, syntax::file_ext(&current)) {
                    self.content_name = Some(name.to_string());
                    self.push_useless(&current);
                } else {
                    self.content_name = Some(current);
                    self.push_useless(name);
                }
            }
        }
    }

    /// Forget a file. A removed metadata or content file is replaced by the
    /// best remaining useless file of the same kind. Returns false if the
    /// file did not belong to this entry.
    pub fn remove_file(&mut self, name: &str) -> bool {
        if let Some(pos) = self.useless_files.iter().position(|f| f == name) {
            self.useless_files.remove(pos);
            return true;
        }
        if self.meta_name.as_deref() == Some(name) {
            self.meta_name = self.take_best_useless(|ext| ext == META_EXT);
            return true;
        }
        if self.content_name.as_deref() == Some(name) {
            self.content_name = self.take_best_useless(|ext| ext != META_EXT);
            return true;
        }
        false
    }

    fn push_useless(&mut self, name: &str) {
        self.useless_files.push(name.to_string());
        self.useless_files.sort();
    }

    fn take_best_useless(&mut self, kind: impl Fn(&str) -> bool) -> Option<String> {
        let best = self
            .useless_files
            .iter()
            .enumerate()
            .filter(|(_, f)| kind(syntax::file_ext(f)))
            .min_by(|(_, a), (_, b)| {
                syntax::compare_ext(syntax::file_ext(a), syntax::file_ext(b)).then(a.cmp(b))
            })
            .map(|(i, _)| i)?;
        Some(self.useless_files.remove(best))
    }

    /// Entry describing where `meta` and its content are written.
    ///
    /// Keeps the current file names when the extension stays the same, so
    /// hand-chosen names like `20230101120000 Notes.md` survive updates.
    /// Returns the new entry and the files that become obsolete.
    pub fn for_write(&self, meta: &Meta, binary: bool) -> (DirEntry, Vec<String>) {
        let syntax_name = meta.get(KEY_SYNTAX).unwrap_or("");
        let mut ext = syntax::ext_for_syntax(syntax_name);
        if binary && ext == ZETTEL_EXT {
            ext = "bin".to_string();
        }

        let content_name = match &self.content_name {
            Some(current) if syntax::file_ext(current) == ext => current.clone(),
            _ => format!("{}.{ext}", self.zid),
        };
        let meta_name = if ext == ZETTEL_EXT {
            None
        } else {
            Some(
                self.meta_name
                    .clone()
                    .unwrap_or_else(|| format!("{}.{META_EXT}", self.zid)),
            )
        };

        let next = DirEntry {
            zid: self.zid,
            meta_name,
            content_name: Some(content_name),
            useless_files: self.useless_files.clone(),
        };
        let obsolete = [&self.meta_name, &self.content_name]
            .into_iter()
            .flatten()
            .filter(|name| !next.contains_file(name))
            .cloned()
            .collect();
        (next, obsolete)
    }
}
