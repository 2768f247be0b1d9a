//! Mention filter — literal, case-sensitive entity lookup over comment bodies.
//!
//! A comment matching k entities yields one envelope carrying all k names;
//! fan-out into rows happens later, in the fact writer.

use tracing::debug;

use crate::pipeline::types::{MentionSet, PublishEnvelope, RawComment};

/// Entity matcher for one channel.
#[derive(Debug, Clone, Default)]
pub struct MentionFilter {
    entities: Vec<String>,
}

impl MentionFilter {
    /// Build from entity names. Order is kept, duplicates and empty names are
    /// dropped (an empty name would match every body).
    pub fn new<I, S>(entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut kept: Vec<String> = Vec::new();
        for entity in entities {
            let entity = entity.into();
            if entity.is_empty() || kept.contains(&entity) {
                continue;
            }
            kept.push(entity);
        }
        Self { entities: kept }
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Entities that occur as substrings of `body`, in filter order.
    pub fn mentions_in(&self, body: &str) -> MentionSet {
        self.entities
            .iter()
            .filter(|entity| body.contains(entity.as_str()))
            .cloned()
            .collect()
    }

    /// Keep comments that mention at least one entity, preserving input order.
    pub fn filter(&self, comments: Vec<RawComment>) -> Vec<PublishEnvelope> {
        let total = comments.len();
        let envelopes: Vec<PublishEnvelope> = comments
            .into_iter()
            .filter_map(|comment| {
                let mentions = self.mentions_in(&comment.body);
                if mentions.is_empty() {
                    None
                } else {
                    Some(PublishEnvelope::new(comment, mentions))
                }
            })
            .collect();

        debug!(
            total,
            matched = envelopes.len(),
            entities = self.entities.len(),
            "Filtered comments for mentions"
        );
        envelopes
    }
}
