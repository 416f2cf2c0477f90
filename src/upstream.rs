// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Upstream fetcher for the open-data proxy.
//!
//! Performs exactly one outbound call per cache miss and classifies the body
//! as JSON, XML (for upstreams that are allowed to answer in XML) or raw text.

use anyhow::anyhow;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use reqwest::{Client, Method, Url};
use serde_json::Value;
use thiserror::Error;

use crate::config::Credential;
use crate::error::AppError;
use crate::xml;

/// A parsed upstream body.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamResult {
    Json(Value),
    Xml(Value),
    /// The body was neither JSON nor (where allowed) XML.
    Text(String),
}

/// Which decoders to try, in order, after JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    Json,
    JsonOrXml,
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream returned status {status}")]
    Status { status: u16, body: String },
    #[error("upstream request failed: {0}")]
    Transport(#[source] reqwest::Error),
}

/// One outbound call. The credential is kept apart from the URL so it can be
/// left out of cache keys and logs.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    method: Method,
    url: Url,
    credential: Option<(&'static str, Credential)>,
    body: Option<Value>,
    format: BodyFormat,
}

impl UpstreamRequest {
    pub fn get(url: &str) -> Result<Self, AppError> {
        Self::new(Method::GET, url)
    }

    pub fn post_json(url: &str, body: Value) -> Result<Self, AppError> {
        let mut request = Self::new(Method::POST, url)?;
        request.body = Some(body);
        Ok(request)
    }

    fn new(method: Method, url: &str) -> Result<Self, AppError> {
        let url = Url::parse(url)
            .map_err(|e| AppError::Internal(anyhow!("invalid upstream url {url}: {e}")))?;

        Ok(Self {
            method,
            url,
            credential: None,
            body: None,
            format: BodyFormat::Json,
        })
    }

    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.url.query_pairs_mut().append_pair(key, value);
        self
    }

    pub fn credential(mut self, param: &'static str, credential: Credential) -> Self {
        self.credential = Some((param, credential));
        self
    }

    pub fn format(mut self, format: BodyFormat) -> Self {
        self.format = format;
        self
    }

    /// Deterministic key for this call. Never contains the credential.
    pub fn cache_key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn resolved_url(&self) -> Url {
        let mut url = self.url.clone();
        if let Some((param, credential)) = &self.credential {
            url.query_pairs_mut().append_pair(param, credential.expose());
        }
        url
    }

    /// Mask the credential in an upstream body, raw or as it went on the wire.
    fn redact(&self, text: String) -> String {
        let Some((param, credential)) = &self.credential else {
            return text;
        };
        if credential.expose().is_empty() {
            return text;
        }

        let mut forms = vec![credential.expose().to_string()];
        if let Some(wire) = self.wire_credential(param) {
            let spaced = wire.replace('+', "%20");
            forms.push(lowercase_escapes(&wire));
            forms.push(lowercase_escapes(&spaced));
            forms.push(spaced);
            forms.push(wire);
        }
        forms.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        forms.dedup();

        forms
            .iter()
            .fold(text, |text, form| text.replace(form.as_str(), "***"))
    }

    // The credential exactly as `resolved_url` encodes it.
    fn wire_credential(&self, param: &str) -> Option<String> {
        let resolved = self.resolved_url();
        let prefix = format!("{param}=");
        resolved
            .query()?
            .rsplit('&')
            .find_map(|pair| pair.strip_prefix(prefix.as_str()))
            .map(str::to_string)
    }
}

fn lowercase_escapes(encoded: &str) -> String {
    let mut out = String::with_capacity(encoded.len());
    let mut hex_left = 0;
    for c in encoded.chars() {
        if hex_left > 0 {
            out.push(c.to_ascii_lowercase());
            hex_left -= 1;
        } else {
            if c == '%' {
                hex_left = 2;
            }
            out.push(c);
        }
    }
    out
}

/// HTTP client wrapper for the public data upstreams.
///
/// Relies on reqwest's default timeouts; there are no retries.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
}

impl UpstreamClient {
    pub fn try_new() -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(concat!("opendata-proxy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Internal(anyhow!("Failed to build upstream client: {}", e)))?;

        Ok(Self { client })
    }

    /// Perform the call and classify the body.
    pub async fn fetch(&self, request: &UpstreamRequest) -> Result<UpstreamResult, UpstreamError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.resolved_url());
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.without_url()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::Transport(e.without_url()))?;

        if !status.is_success() {
            let body = request.redact(body);
            tracing::warn!(
                upstream = %request.url(),
                status = status.as_u16(),
                body = %crate::error::truncate(&body, 200),
                "upstream returned error status"
            );
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let result = classify(body, request.format);
        if let UpstreamResult::Text(raw) = &result {
            tracing::warn!(
                upstream = %request.url(),
                body = %crate::error::truncate(raw, 200),
                "upstream body could not be parsed, forwarding raw text"
            );
        }

        Ok(result)
    }
}

/// JSON first, then XML when the format allows it, then raw text.
pub fn classify(body: String, format: BodyFormat) -> UpstreamResult {
    let trimmed = body.trim_start_matches('\u{feff}');

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return UpstreamResult::Json(value);
    }

    if format == BodyFormat::JsonOrXml {
        match xml::parse_tree(trimmed) {
            Ok(tree) => return UpstreamResult::Xml(tree),
            Err(err) => tracing::debug!(error = %err, "body is not XML either"),
        }
    }

    UpstreamResult::Text(body)
}

impl UpstreamResult {
    /// Whether the result is worth memoizing. Raw text never is.
    pub fn is_structured(&self) -> bool {
        !matches!(self, UpstreamResult::Text(_))
    }
}

impl IntoResponse for UpstreamResult {
    fn into_response(self) -> Response {
        match self {
            UpstreamResult::Json(value) | UpstreamResult::Xml(value) => Json(value).into_response(),
            UpstreamResult::Text(raw) => (
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                raw,
            )
                .into_response(),
        }
    }
}
