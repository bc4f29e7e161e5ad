//! # Search
//!
//! Full-text search over everything the browser knows about: built-in
//! pages, visited resources, the active collection's children and
//! host-supplied items.
//!
//! - [`item`]: what a result is
//! - [`index`]: the tantivy index and its scoring
//! - [`store`]: query semantics and the event-driven [`SearchIndexer`]

pub mod index;
pub mod item;
pub mod store;

pub use index::{Document, IndexError, ItemIndex, SearchHit};
pub use item::{SearchAction, SearchIndexItem, SearchItemKind, SearchSource};
pub use store::{
    DEFAULT_DYNAMIC_LIMIT, DEFAULT_NUMBER_OF_RESULTS, SearchIndexer, SearchOptions, SearchStore,
};
