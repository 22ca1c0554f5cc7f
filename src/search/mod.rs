//! Denormalized prospect search: document mapping, index management, typed
//! query compilation, and suggestions.
//!
//! The index holds one document per prospect, joined with its company
//! (`ProspectDocument`). Writes go through [`IndexManager`], which applies
//! upsert/delete batches idempotently with last-writer-wins by
//! `last_updated`. Reads go through [`SearchService`] (filtered, paginated
//! queries) and [`SuggestionEngine`] (per-field typeahead values).

mod document;
mod error;
mod index;
mod query;
mod service;
mod suggest;

pub use document::{build_prospect_schema, ProspectDocument, SearchDocument};
pub use error::{SearchError, SearchResult};
pub use index::{BatchOutcome, IndexManager, IndexOp, IndexStats};
pub use query::{FilterSpec, PageRequest, QueryBuilder};
pub use service::{PageInfo, ProspectHit, SearchResponse, SearchService};
pub use suggest::{SuggestField, SuggestionEngine};
