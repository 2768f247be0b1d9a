//! Pushshift-style comment search client.
//!
//! `GET {base}/reddit/search/comment/?size=N&subreddit=C` returning
//! `{"data": [ {id, created_utc, author, subreddit, body, ...}, ... ]}`.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::SourceError;
use crate::pipeline::types::RawComment;
use crate::source::CommentSource;

const SEARCH_PATH: &str = "/reddit/search/comment/";

/// Response envelope. Extra comment fields are ignored.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    data: Vec<RawComment>,
}

pub struct PushshiftSource {
    client: reqwest::Client,
    base_url: String,
}

impl PushshiftSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn search_url(&self) -> String {
        format!("{}{SEARCH_PATH}", self.base_url)
    }
}

/// Decode a search response body.
fn parse_search_response(body: &str) -> Result<Vec<RawComment>, SourceError> {
    let resp: SearchResponse =
        serde_json::from_str(body).map_err(|e| SourceError::Decode(e.to_string()))?;
    Ok(resp.data)
}

#[async_trait]
impl CommentSource for PushshiftSource {
    fn name(&self) -> &str {
        "pushshift"
    }

    async fn fetch_recent(
        &self,
        channel: &str,
        limit: usize,
    ) -> Result<Vec<RawComment>, SourceError> {
        let resp = self
            .client
            .get(self.search_url())
            .query(&[("size", limit.to_string()), ("subreddit", channel.to_string())])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let comments = parse_search_response(&body)?;
        debug!(channel, requested = limit, received = comments.len(), "Fetched comments");
        Ok(comments)
    }
}
