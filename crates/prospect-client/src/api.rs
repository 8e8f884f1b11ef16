//! HTTP operations against the bulk-research backend.

use serde_json::{Value, json};
use tracing::debug;

use prospect_core::entry::ResultEntry;
use prospect_settings::ApiSettings;

use crate::errors::{ClientError, Result};
use crate::types::{
    ErrorBody, ReconnectResponse, ReplaceListingRequest, ResultsResponse, SessionListResponse,
    StartResponse,
};

/// Header carrying the CSRF token on mutating requests.
const CSRF_HEADER: &str = "X-CSRFToken";

/// Typed client over reqwest. Cheap to clone.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    csrf_token: Option<String>,
}

impl ApiClient {
    pub fn new(settings: &ApiSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: settings.base_url.trim_end_matches('/').to_string(),
            csrf_token: settings.csrf_token.clone(),
        }
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn stream_url(&self, session_id: &str) -> String {
        format!("{}/api/bulk-research/stream/{session_id}/", self.base)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.post(self.url(path)).header("Accept", "application/json");
        if let Some(token) = &self.csrf_token {
            builder = builder.header(CSRF_HEADER, token);
        }
        builder
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http.get(self.url(path)).header("Accept", "application/json")
    }

    /// Start a research session. Returns the new session id.
    pub async fn start(&self, keyword: &str, desired_total: u64) -> Result<String> {
        let resp = self
            .post("/api/bulk-research/start/")
            .json(&json!({"keyword": keyword, "desired_total": desired_total}))
            .send()
            .await?;
        let out: StartResponse = read_json(resp).await?;
        Ok(out.session_id.to_string())
    }

    /// Fetch the session list (polling reconciliation).
    pub async fn list(&self) -> Result<SessionListResponse> {
        let resp = self.get("/api/bulk-research/list/").send().await?;
        read_json(resp).await
    }

    /// Fetch a session's results, optionally limited for a quick first paint.
    pub async fn results(&self, session_id: &str, limit: Option<usize>) -> Result<Vec<ResultEntry>> {
        let path = format!("/api/bulk-research/result/{session_id}/");
        let mut builder = self.get(&path);
        if let Some(limit) = limit {
            builder = builder.query(&[("limit", limit)]);
        }
        let resp = builder.send().await?;
        let out: ResultsResponse = read_json(resp).await?;
        Ok(out.into_entries())
    }

    /// Delete a session.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        let resp = self
            .post(&format!("/api/bulk-research/delete/{session_id}/"))
            .send()
            .await?;
        read_ok(resp).await
    }

    /// Reconnect a session: refreshes status/progress and may carry inline
    /// entries when the job finished while we were away.
    pub async fn reconnect(&self, session_id: &str) -> Result<ReconnectResponse> {
        let resp = self
            .post(&format!("/api/bulk-research/reconnect/{session_id}/"))
            .send()
            .await?;
        read_json(resp).await
    }

    /// Request a replacement of one listing's data.
    pub async fn replace_listing(&self, request: &ReplaceListingRequest) -> Result<()> {
        let resp = self
            .post("/api/bulk-research/replace-listing/")
            .json(request)
            .send()
            .await?;
        read_ok(resp).await
    }

    /// Single-keyword insight lookup (companion page). Returns the raw body;
    /// normalization is `prospect_core::insight`'s job.
    pub async fn keyword_insight(&self, keyword: &str) -> Result<Value> {
        let resp = self
            .post("/api/keyword-insight/search/")
            .json(&json!({"keyword": keyword.trim()}))
            .send()
            .await?;
        read_json(resp).await
    }
}

/// Check status only, tolerating any (even empty) success body. Mutation
/// endpoints respond `{}` on success but some deployments send nothing.
async fn read_ok(resp: reqwest::Response) -> Result<()> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let text = resp.text().await?;
    let message = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(|b| b.message());
    Err(ClientError::Server {
        status: status.as_u16(),
        message,
    })
}

/// Read a response body: non-2xx becomes [`ClientError::Server`] with the
/// structured message when one exists; a 2xx body that doesn't parse becomes
/// [`ClientError::Decode`].
async fn read_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|b| b.message());
        debug!(status = status.as_u16(), ?message, "server error response");
        return Err(ClientError::Server {
            status: status.as_u16(),
            message,
        });
    }
    serde_json::from_str(&text).map_err(|e| ClientError::Decode(e.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
