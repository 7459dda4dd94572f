//! reqwest implementations of the HTTP collaborators.

use async_trait::async_trait;
use parley_tools::{ToolInvocation, ToolOutput, ToolSourceCatalog};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use url::Url;

use crate::api::error::ApiError;
use crate::api::sse::{parse_sse_stream, with_cancellation};
use crate::api::transport::{ToolCatalog, ToolEndpoint, Transport, TransportResponse};
use crate::api::wire::{CatalogRequest, CatalogResponse, ChatRequest};
use crate::config::EngineConfig;

const STREAM_ENDPOINT: &str = "stream";
const RUN_TOOL_ENDPOINT: &str = "run_tool";
const CATALOG_ENDPOINT: &str = "tool_catalog";

#[derive(Clone)]
pub struct HttpClient {
    http_client: reqwest::Client,
    stream_url: Url,
    run_tool_url: Url,
    catalog_url: Url,
}

impl HttpClient {
    pub fn new(config: &EngineConfig) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder().build()?;
        Self::with_client(http_client, config)
    }

    pub fn with_client(http_client: reqwest::Client, config: &EngineConfig) -> Result<Self, ApiError> {
        let url = |result: crate::error::Result<Url>| {
            result.map_err(|e| ApiError::Configuration(e.to_string()))
        };
        Ok(Self {
            http_client,
            stream_url: url(config.stream_url())?,
            run_tool_url: url(config.run_tool_url())?,
            catalog_url: url(config.tool_catalog_url())?,
        })
    }

    async fn post_json<B, T>(
        &self,
        endpoint: &str,
        url: &Url,
        body: &B,
        token: &CancellationToken,
    ) -> Result<T, ApiError>
    where
        B: serde::Serialize + Sync,
        T: DeserializeOwned,
    {
        let request = self.http_client.post(url.clone()).json(body).send();
        let response = tokio::select! {
            biased;
            () = token.cancelled() => {
                return Err(ApiError::Cancelled { endpoint: endpoint.to_string() });
            }
            response = request => response?,
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            debug!(target: "parley::api", "{endpoint} error status={} body={}", status, body);
            return Err(ApiError::ServerError {
                endpoint: endpoint.to_string(),
                status_code: status.as_u16(),
                details: body,
            });
        }

        let body_text = tokio::select! {
            biased;
            () = token.cancelled() => {
                return Err(ApiError::Cancelled { endpoint: endpoint.to_string() });
            }
            text = response.text() => text?,
        };

        serde_json::from_str(&body_text).map_err(|e| {
            error!(target: "parley::api", "Failed to parse {endpoint} response: {} body={}", e, body_text);
            ApiError::ResponseParsingError {
                endpoint: endpoint.to_string(),
                details: e.to_string(),
            }
        })
    }
}

fn is_event_stream(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("text/event-stream"))
}

#[async_trait]
impl Transport for HttpClient {
    async fn open(
        &self,
        request: ChatRequest,
        token: CancellationToken,
    ) -> Result<TransportResponse, ApiError> {
        debug!(
            target: "parley::api",
            url = %self.stream_url,
            session_id = ?request.session_id,
            tool_group_id = ?request.tool_group_id,
            "Opening stream"
        );

        let send = self
            .http_client
            .post(self.stream_url.clone())
            .header(ACCEPT, "text/event-stream")
            .json(&request)
            .send();
        let response = tokio::select! {
            biased;
            () = token.cancelled() => {
                return Err(ApiError::Cancelled { endpoint: STREAM_ENDPOINT.to_string() });
            }
            response = send => response?,
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            debug!(target: "parley::api", "Stream request failed status={} body={}", status, body);
            return Err(ApiError::ServerError {
                endpoint: STREAM_ENDPOINT.to_string(),
                status_code: status.as_u16(),
                details: body,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        if content_type.as_deref().is_some_and(is_event_stream) {
            let sse_stream = parse_sse_stream(response.bytes_stream());
            return Ok(TransportResponse::Stream(with_cancellation(sse_stream, token)));
        }

        warn!(
            target: "parley::api",
            content_type = ?content_type,
            "Stream request answered without an event stream"
        );
        let body = tokio::select! {
            biased;
            () = token.cancelled() => {
                return Err(ApiError::Cancelled { endpoint: STREAM_ENDPOINT.to_string() });
            }
            text = response.text() => text?,
        };
        Ok(TransportResponse::Buffered { content_type, body })
    }
}

#[async_trait]
impl ToolEndpoint for HttpClient {
    async fn run_tool(
        &self,
        invocation: ToolInvocation,
        token: CancellationToken,
    ) -> Result<ToolOutput, ApiError> {
        debug!(
            target: "parley::api",
            tool = %invocation.tool_name,
            source = %invocation.tool_source_id,
            "Running tool"
        );
        self.post_json(RUN_TOOL_ENDPOINT, &self.run_tool_url, &invocation, &token)
            .await
    }
}

#[async_trait]
impl ToolCatalog for HttpClient {
    async fn fetch_catalogs(&self, source_ids: &[String]) -> Result<Vec<ToolSourceCatalog>, ApiError> {
        let body = CatalogRequest {
            tool_source_ids: source_ids,
        };
        let response: CatalogResponse = self
            .post_json(
                CATALOG_ENDPOINT,
                &self.catalog_url,
                &body,
                &CancellationToken::new(),
            )
            .await?;
        Ok(response.into_catalogs())
    }
}
