//! Use-case search and ranking
//!
//! Text matching works on normalized tokens precomputed at write time and
//! stored on the document; queries are normalized the same way so matching
//! is case-insensitive and ignores incidental diacritics between the
//! platform's two languages. Ranking runs inside a single MongoDB
//! aggregation round trip with deterministic tie-breaks, so repeating an
//! identical query against an unchanged dataset pages identically.

pub mod engine;
pub mod query;
pub mod text;

pub use engine::{SearchEngine, SearchResponse, UseCaseSummary};
pub use query::{SearchQuery, SortMode, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
