//! paperbase - document ingestion and grounded question answering
//!
//! Uploaded PDFs stream through content hashing into blob storage, get
//! parsed, chunked, and embedded by a durable job queue, and land in a
//! vector index that is always rebuildable from the relational store.
//! Questions are answered strictly from retrieved evidence, with citations.

pub mod answer;
pub mod chunk;
pub mod config;
pub mod embed;
pub mod error;
pub mod hash;
pub mod index;
pub mod ingest;
pub mod jobs;
pub mod meta;
pub mod parse;
pub mod retrieve;
pub mod storage;

pub use error::{Error, Result};
