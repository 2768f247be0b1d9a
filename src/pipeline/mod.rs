//! Mention pipeline.
//!
//! Producer side, once per cycle:
//! 1. `EntityCatalog` — pick a channel and its entities
//! 2. `CommentSource::fetch_recent()` — pull recent comments
//! 3. `MentionFilter::filter()` — keep comments naming an entity
//! 4. `Publisher::publish_all()` — hand envelopes to the transport and wait
//!
//! Consumer side, once per delivery:
//! `ConsumerCycle::handle_payload()` decodes, scores and commits via `FactWriter`.

pub mod cycle;
pub mod fact_writer;
pub mod filter;
pub mod publisher;
pub mod types;
