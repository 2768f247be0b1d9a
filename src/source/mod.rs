//! Comment sources — pure I/O, no filtering.

pub mod pushshift;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::pipeline::types::RawComment;

pub use pushshift::PushshiftSource;

/// Yields the most recent comments for a channel.
#[async_trait]
pub trait CommentSource: Send + Sync {
    /// Source name for logging (e.g. "pushshift").
    fn name(&self) -> &str;

    /// Fetch up to `limit` of the newest comments posted in `channel`.
    async fn fetch_recent(
        &self,
        channel: &str,
        limit: usize,
    ) -> Result<Vec<RawComment>, SourceError>;
}
