//! Mapping from URI scheme to box constructor.

use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use super::{BoxContext, DirBox, ManagedBox, MemBox};
use crate::error::{BoxError, Result};

/// Builds a box from its parsed URI.
pub type BoxFactory = Arc<dyn Fn(&Url, BoxContext) -> Result<Arc<dyn ManagedBox>> + Send + Sync>;

/// Known box kinds, keyed by URI scheme.
#[derive(Clone, Default)]
pub struct BoxRegistry {
    factories: HashMap<String, BoxFactory>,
}

impl BoxRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry knowing `dir` and `mem` boxes.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("dir", |url, ctx| {
            Ok(Arc::new(DirBox::from_url(url, ctx)?) as Arc<dyn ManagedBox>)
        });
        registry.register("mem", |url, ctx| {
            Ok(Arc::new(MemBox::from_url(url, ctx)?) as Arc<dyn ManagedBox>)
        });
        registry
    }

    /// Register `factory` for `scheme`, replacing any earlier one.
    pub fn register<F>(&mut self, scheme: &str, factory: F)
    where
        F: Fn(&Url, BoxContext) -> Result<Arc<dyn ManagedBox>> + Send + Sync + 'static,
    {
        self.factories
            .insert(scheme.to_ascii_lowercase(), Arc::new(factory));
    }

    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }

    /// Build the box described by `uri`.
    pub fn connect(&self, uri: &str, ctx: BoxContext) -> Result<Arc<dyn ManagedBox>> {
        let url = Url::parse(uri).map_err(|e| {
            tracing::warn!("cannot parse box URI '{uri}': {e}");
            BoxError::InvalidUri(uri.to_string())
        })?;
        let factory = self
            .factories
            .get(url.scheme())
            .ok_or_else(|| BoxError::UnknownScheme(url.scheme().to_string()))?;
        factory(&url, ctx)
    }
}
