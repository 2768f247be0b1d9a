//! Shared types for the ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ── Catalog ─────────────────────────────────────────────────────────

/// One tracked entity and the channel it is tracked in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityCatalogEntry {
    pub entity_name: String,
    pub channel: String,
}

impl EntityCatalogEntry {
    pub fn new(entity_name: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            channel: channel.into(),
        }
    }
}

// ── Raw comment ─────────────────────────────────────────────────────

/// A comment as returned by the comment source.
///
/// Field names on the wire follow the upstream API (`created_utc`, `subreddit`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawComment {
    pub id: String,
    #[serde(rename = "created_utc", deserialize_with = "unix_seconds")]
    pub created_at_unix_seconds: i64,
    pub author: String,
    #[serde(rename = "subreddit")]
    pub channel: String,
    pub body: String,
}

impl RawComment {
    /// Creation time as a UTC timestamp, if representable.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.created_at_unix_seconds, 0)
    }
}

/// Accept both integer and float epoch seconds; floats are truncated.
fn unix_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Int(i64),
        Float(f64),
    }

    match Seconds::deserialize(deserializer)? {
        Seconds::Int(s) => Ok(s),
        Seconds::Float(f) if f.is_finite() => Ok(f.trunc() as i64),
        Seconds::Float(f) => Err(serde::de::Error::custom(format!(
            "created_utc is not a finite number: {f}"
        ))),
    }
}

// ── Mention set ─────────────────────────────────────────────────────

/// Ordered, deduplicated entity names found in one comment body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct MentionSet(Vec<String>);

impl MentionSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a name unless it is already present. Returns whether it was added.
    pub fn insert(&mut self, entity: impl Into<String>) -> bool {
        let entity = entity.into();
        if self.0.contains(&entity) {
            return false;
        }
        self.0.push(entity);
        true
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl From<Vec<String>> for MentionSet {
    fn from(names: Vec<String>) -> Self {
        names.into_iter().collect()
    }
}

impl From<MentionSet> for Vec<String> {
    fn from(set: MentionSet) -> Self {
        set.0
    }
}

impl<S: Into<String>> FromIterator<S> for MentionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for name in iter {
            set.insert(name);
        }
        set
    }
}

impl<'a> IntoIterator for &'a MentionSet {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ── Envelope ────────────────────────────────────────────────────────

/// The unit of transport: a matching comment plus what it mentions.
///
/// Encoded as a two-element JSON array `[comment, mentions]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishEnvelope {
    pub comment: RawComment,
    pub mentions: MentionSet,
}

impl PublishEnvelope {
    pub fn new(comment: RawComment, mentions: MentionSet) -> Self {
        Self { comment, mentions }
    }

    /// Serialize to the transport payload.
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode a transport payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

impl Serialize for PublishEnvelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.comment, &self.mentions).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublishEnvelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (comment, mentions) = <(RawComment, MentionSet)>::deserialize(deserializer)?;
        Ok(Self { comment, mentions })
    }
}

// ── Fact row ────────────────────────────────────────────────────────

/// One persisted (comment, entity, sentiment) record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRow {
    pub comment_id: String,
    pub created_at_unix_seconds: i64,
    pub author: String,
    pub channel: String,
    pub entity_name: String,
    pub sentiment_compound: f64,
}

impl FactRow {
    /// Expand an envelope into one row per mentioned entity, all sharing `score`.
    pub fn expand(envelope: &PublishEnvelope, score: f64) -> Vec<FactRow> {
        let comment = &envelope.comment;
        envelope
            .mentions
            .iter()
            .map(|entity| FactRow {
                comment_id: comment.id.clone(),
                created_at_unix_seconds: comment.created_at_unix_seconds,
                author: comment.author.clone(),
                channel: comment.channel.clone(),
                entity_name: entity.clone(),
                sentiment_compound: score,
            })
            .collect()
    }
}
