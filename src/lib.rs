//! Definition graph builder: mines XML definition documents into a
//! deduplicated graph of tags, relationships, values and definitions.

pub mod analyzer;
pub mod archive;
pub mod config;
pub mod error;
pub mod export;
pub mod graph;
