pub mod boxes;
pub mod commands;
pub mod config;
pub mod error;
pub mod fs;
pub mod id;
pub mod index;
pub mod manager;
pub mod meta;
pub mod query;
pub mod syntax;
pub mod watch;
pub mod zettel;

pub use boxes::{BoxContext, BoxDefaults, BoxRegistry, BoxState, Capabilities, ManagedBox};
pub use error::{BoxError, Result};
pub use id::{Zid, ZidSet};
pub use index::{Indexer, MemoryIndex};
pub use manager::Manager;
pub use meta::Meta;
pub use query::Query;
pub use zettel::Zettel;
