//! Retrieval side of the pipeline.

pub mod retriever;

pub use retriever::Retriever;
