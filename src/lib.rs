//! Mention Pipeline — entity-mention sentiment ingestion.

pub mod catalog;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod sentiment;
pub mod source;
pub mod store;
pub mod transport;
