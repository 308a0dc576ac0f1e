// ABOUTME: Data sync - key range chunking, row fetching, merge-diff and apply
// ABOUTME: Shared by the bulk commands and the change stream

pub mod chunk;
pub mod diff;
pub mod engine;
pub mod fetch;
pub mod value;

pub use chunk::{chunk_primary_keys, Chunker, KeyRange};
pub use diff::{merge_diff, ChunkPlan, RowKey, RowUpdate};
pub use engine::{BatchSummary, ChunkOutcome, SyncEngine, SyncMode};
pub use fetch::{fetch, Row};
