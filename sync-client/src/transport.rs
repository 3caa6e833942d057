//! The HTTP leg of the Sync Protocol (§6) as seen from the client: thin
//! `reqwest` wrappers around `POST /sync/push` and `GET /sync/pull`,
//! deserializing the server's `{ok, ...}` envelope back into
//! `sync-protocol`'s wire types.

use serde::Deserialize;
use sync_protocol::{PullResponse, PushRequest, PushResponse, WireTableChanges};

use crate::error::ClientError;

/// A thin HTTP client for one server, carrying whatever bearer token the
/// caller's auth flow (out of this core's scope, §1) last obtained.
#[derive(Clone)]
pub struct SyncTransport {
    http: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PushEnvelope {
    #[serde(flatten)]
    inner: PushResponse,
}

#[derive(Debug, Deserialize)]
struct PullEnvelope {
    changes: Vec<WireTableChanges>,
    next_cursor: i64,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl SyncTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into(), access_token: None }
    }

    pub fn with_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(access_token.into());
        self
    }

    pub fn set_token(&mut self, access_token: impl Into<String>) {
        self.access_token = Some(access_token.into());
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// `POST /sync/push`.
    pub async fn push(&self, request: &PushRequest) -> Result<PushResponse, ClientError> {
        let url = format!("{}/sync/push", self.base_url);
        let response = self.authed(self.http.post(&url)).json(request).send().await?;

        if !response.status().is_success() {
            return Err(server_error(response).await);
        }
        let envelope: PushEnvelope = response.json().await?;
        Ok(envelope.inner)
    }

    /// `GET /sync/pull?cursor=&limit=`.
    pub async fn pull(&self, cursor_seq: i64, limit: Option<u32>) -> Result<PullResponse, ClientError> {
        let url = format!("{}/sync/pull", self.base_url);
        let mut query = vec![("cursor", cursor_seq.to_string())];
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        let response = self.authed(self.http.get(&url)).query(&query).send().await?;

        if !response.status().is_success() {
            return Err(server_error(response).await);
        }
        let envelope: PullEnvelope = response.json().await?;
        Ok(PullResponse {
            changes: envelope.changes,
            next_cursor: envelope.next_cursor,
            has_more: envelope.has_more,
        })
    }
}

async fn server_error(response: reqwest::Response) -> ClientError {
    let status = response.status();
    match response.json::<ErrorEnvelope>().await {
        Ok(body) => ClientError::Server(format!(
            "{status}: {}",
            body.message.or(body.error).unwrap_or_else(|| "unknown error".to_string())
        )),
        Err(_) => ClientError::Server(status.to_string()),
    }
}
