//! HTTP dispatcher for the engine's `GET /answerQuestion` endpoint.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::debug;
use url::Url;

use super::{
    check_http_response, map_reqwest_error, parse_response, EngineError, EngineRequest,
    EngineResponse, QueryEngine,
};
use crate::credentials::EngineCredentials;

/// Path of the question-answering endpoint, relative to the base URL.
pub const ANSWER_PATH: &str = "answerQuestion";

/// Engine client shared by all roles.
///
/// Every role uses the same transport credentials; the resource hint is the
/// only per-role signal sent outbound.
#[derive(Debug, Clone)]
pub struct HttpEngine {
    endpoint: Url,
    credentials: EngineCredentials,
    client: reqwest::Client,
}

impl HttpEngine {
    /// Create a dispatcher for an engine base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        credentials: EngineCredentials,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let endpoint = answer_endpoint(base_url)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build engine HTTP client")?;
        Ok(Self {
            endpoint,
            credentials,
            client,
        })
    }
}

/// Resolve the `/answerQuestion` URL under a base URL.
///
/// # Errors
///
/// Returns an error if `base_url` is not an absolute http(s) URL.
pub fn answer_endpoint(base_url: &str) -> anyhow::Result<Url> {
    let mut base = Url::parse(base_url.trim())
        .with_context(|| format!("invalid engine base URL {base_url:?}"))?;
    if !matches!(base.scheme(), "http" | "https") {
        anyhow::bail!("engine base URL must be http or https, got {base_url:?}");
    }
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(ANSWER_PATH)
        .with_context(|| format!("cannot join {ANSWER_PATH} onto {base_url:?}"))
}

/// Build the query string for one request.
#[doc(hidden)]
pub fn build_query(request: &EngineRequest) -> Vec<(&'static str, String)> {
    let hint = serde_json::to_string(&request.resource_hint).unwrap_or_else(|_| "[]".to_owned());
    vec![
        ("question", request.wire_question()),
        ("verbose", "true".to_owned()),
        ("tables", hint),
    ]
}

#[async_trait]
impl QueryEngine for HttpEngine {
    async fn answer_question(
        &self,
        request: &EngineRequest,
    ) -> Result<EngineResponse, EngineError> {
        debug!(
            endpoint = %self.endpoint,
            hint_len = request.resource_hint.len(),
            history_len = request.history.len(),
            "dispatching question to engine"
        );

        let response = self
            .client
            .get(self.endpoint.clone())
            .basic_auth(
                &self.credentials.username,
                Some(self.credentials.password()),
            )
            .query(&build_query(request))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let payload = check_http_response(response).await?;
        parse_response(&payload)
    }

    fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }
}
