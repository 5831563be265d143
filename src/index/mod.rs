//! Indexing side of the pipeline: ignore-rule composition, per-codebase
//! change snapshots, and the chunk → embed → insert pipeline.

pub mod ignore;
pub mod indexer;
pub mod snapshot;
