// Copyright 2025 Memophor Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HTTP API handlers for the open-data proxy.
//!
//! - `GET /api/bizinfo` - BizInfo support programs (JSON, XML fallback)
//! - `GET /api/smes` - SMES24 notices, filtered and tagged with status/D-day
//! - `GET /api/kstartup` - K-Startup announcements, businesses, content, stats
//! - `GET /api/exchange` - Korea Eximbank exchange rates
//! - `POST /api/ntsstatus` - NTS business registration status (alias `/api/ntscheck`)
//! - `GET /healthz` - Service health check
//! - `GET /metrics` - Prometheus metrics export
//!
//! Every response carries CORS headers, including error responses, and every
//! error body is JSON.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::cache::CacheStore;
use crate::config::{AppConfig, Credential};
use crate::error::AppError;
use crate::metrics::Metrics;
use crate::model::{
    BizinfoQuery, ExchangeQuery, KstartupKind, KstartupQuery, SmesQuery, StatusFailure,
};
use crate::notice::{parse_ymd_like, today_kst, RecruitRules};
use crate::upstream::{BodyFormat, UpstreamClient, UpstreamError, UpstreamRequest, UpstreamResult};

/// The NTS API accepts at most this many numbers per call.
const MAX_BUSINESS_NUMBERS: usize = 100;

/// Parameters a client may not override on the K-Startup call.
const KSTARTUP_RESERVED: &[&str] = &["ServiceKey", "serviceKey", "returnType", "page", "perPage"];

#[derive(Clone)]
pub struct AppState {
    pub cache: CacheStore,
    pub metrics: Metrics,
    pub upstream: UpstreamClient,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn try_new(config: AppConfig) -> Result<Self, AppError> {
        Ok(Self {
            cache: CacheStore::new(),
            metrics: Metrics::new()?,
            upstream: UpstreamClient::try_new()?,
            config: Arc::new(config),
        })
    }
}

pub fn router(state: AppState) -> Router {
    let listings = Router::new()
        .route("/api/bizinfo", get(handle_bizinfo).fallback(method_not_allowed))
        .route("/api/smes", get(handle_smes).fallback(method_not_allowed))
        .route("/api/kstartup", get(handle_kstartup).fallback(method_not_allowed))
        .route("/api/exchange", get(handle_exchange).fallback(method_not_allowed));

    let status = Router::new()
        .route("/api/ntsstatus", post(handle_status).fallback(method_not_allowed))
        .route("/api/ntscheck", post(handle_status).fallback(method_not_allowed));

    Router::new()
        .merge(with_cors(listings, [Method::GET, Method::OPTIONS], "GET, OPTIONS"))
        .merge(with_cors(status, [Method::POST, Method::OPTIONS], "POST, OPTIONS"))
        .route("/healthz", get(health).fallback(method_not_allowed))
        .route("/metrics", get(metrics).fallback(method_not_allowed))
        .fallback(not_found)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// CorsLayer answers every OPTIONS request itself with 200 and an empty body.
// The outer layers give preflight and regular responses the same
// Allow-Methods and Allow-Headers values.
fn with_cors(
    routes: Router<AppState>,
    methods: [Method; 2],
    allow_methods: &'static str,
) -> Router<AppState> {
    routes
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(methods)
                .allow_headers([header::CONTENT_TYPE]),
        )
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(allow_methods),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type"),
        ))
}

/// Health check endpoint
pub async fn health() -> Result<Json<Value>, AppError> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "opendata-proxy",
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

/// Metrics endpoint
pub async fn metrics(State(state): State<AppState>) -> Result<String, AppError> {
    state.metrics.export()
}

async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

async fn not_found() -> AppError {
    AppError::NotFound
}

/// BizInfo support programs, passed through.
pub async fn handle_bizinfo(
    State(state): State<AppState>,
    query: Result<Query<BizinfoQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let key = require(&state.config.credentials.bizinfo, "BIZINFO_KEY")?;
    let Query(query) = query?;

    let mut request = UpstreamRequest::get(&state.config.endpoints.bizinfo)?
        .query("dataType", "json")
        .query("pageIndex", &query.page)
        .query("pageUnit", &query.per_page);

    if let Some(category) = non_empty(query.category.as_deref()) {
        request = request.query("searchLclasId", category);
    }
    if let Some(area) = non_empty(query.area.as_deref()).filter(|area| *area != "전국") {
        request = request.query("hashtags", area);
    }

    // BizInfo occasionally answers with an XML error document.
    let request = request
        .credential("crtfcKey", key)
        .format(BodyFormat::JsonOrXml);

    let result = fetch_cached(&state, &request, state.config.ttls.bizinfo).await?;
    Ok(result.into_response())
}

/// SMES24 notices, filtered by mode and tagged with `_status` / `_dday`.
pub async fn handle_smes(
    State(state): State<AppState>,
    query: Result<Query<SmesQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let key = require(&state.config.credentials.smes, "SMES_KEY")?;
    let Query(query) = query?;

    // Date filters are applied here, the upstream mishandles them.
    let request = UpstreamRequest::get(&state.config.endpoints.smes)?
        .query("html", &query.html)
        .credential("token", key);

    let result = fetch_cached(&state, &request, state.config.ttls.smes).await?;
    let base = match result {
        UpstreamResult::Json(base) => base,
        other => return Ok(other.into_response()),
    };

    let shaped =
        RecruitRules::default().reshape_envelope(base, query.listing_mode(), today_kst());
    Ok(Json(shaped).into_response())
}

/// K-Startup open API, passed through.
pub async fn handle_kstartup(
    State(state): State<AppState>,
    query: Result<Query<KstartupQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let key = require(&state.config.credentials.kstartup, "KSTARTUP_KEY")?;
    let Query(query) = query?;

    let kind = KstartupKind::parse(&query.kind).ok_or_else(|| {
        AppError::bad_request(
            "INVALID_TYPE",
            "Invalid type. Use: announcement | business | content | stat",
        )
    })?;

    let url = format!(
        "{}/{}",
        state.config.endpoints.kstartup.trim_end_matches('/'),
        kind.operation()
    );
    let mut request = UpstreamRequest::get(&url)?
        .query("page", &query.page)
        .query("perPage", &query.per_page)
        .query("returnType", "json");

    for (name, value) in &query.filters {
        if value.is_empty() || KSTARTUP_RESERVED.contains(&name.as_str()) {
            continue;
        }
        request = request.query(name, value);
    }
    let request = request.credential("ServiceKey", key);

    let ttl = if kind.is_listing() {
        state.config.ttls.kstartup_listing
    } else {
        state.config.ttls.kstartup_reference
    };

    let result = fetch_cached(&state, &request, ttl).await?;
    Ok(result.into_response())
}

/// Eximbank daily exchange rates (`AP01`), passed through.
pub async fn handle_exchange(
    State(state): State<AppState>,
    query: Result<Query<ExchangeQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let key = require(&state.config.credentials.exim, "EXIM_KEY")?;
    let Query(query) = query?;

    let search_date = match non_empty(query.date.as_deref()) {
        Some(raw) => parse_ymd_like(raw).ok_or_else(|| {
            AppError::bad_request("INVALID_DATE", "date must be formatted as YYYYMMDD")
        })?,
        None => today_kst(),
    };

    let request = UpstreamRequest::get(&state.config.endpoints.exim)?
        .query("searchdate", &search_date.format("%Y%m%d").to_string())
        .query("data", "AP01")
        .credential("authkey", key);

    let result = fetch_cached(&state, &request, state.config.ttls.exchange).await?;
    Ok(result.into_response())
}

/// NTS business registration status. Never cached.
///
/// Upstream failures are answered with HTTP 200 and an `error` field so the
/// browser does not mistake them for network errors.
pub async fn handle_status(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, AppError> {
    let key = require(&state.config.credentials.nts, "NTS_KEY")?;

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|_| AppError::bad_request("INVALID_JSON", "요청 body JSON 파싱 실패"))?;
    let numbers = business_numbers(&payload)?;

    let request =
        UpstreamRequest::post_json(&state.config.endpoints.nts, json!({ "b_no": numbers }))?
            .credential("serviceKey", key);

    match fetch_observed(&state, &request).await {
        Ok(result) => Ok(result.into_response()),
        Err(UpstreamError::Status { status, .. }) => {
            Ok(Json(StatusFailure::from_status(status)).into_response())
        }
        Err(err) => Err(err.into()),
    }
}

fn business_numbers(payload: &Value) -> Result<Vec<String>, AppError> {
    let entries = payload
        .get("b_no")
        .and_then(Value::as_array)
        .filter(|entries| !entries.is_empty())
        .ok_or_else(|| {
            AppError::bad_request(
                "INVALID_BODY",
                "요청 body에 b_no: [사업자번호, ...] 배열이 필요합니다.",
            )
        })?;

    if entries.len() > MAX_BUSINESS_NUMBERS {
        return Err(AppError::bad_request(
            "TOO_MANY_BNO",
            format!("b_no는 한 번에 최대 {MAX_BUSINESS_NUMBERS}개까지 조회할 수 있습니다."),
        ));
    }

    entries
        .iter()
        .map(|entry| {
            let raw = match entry {
                Value::String(text) => text.trim().to_string(),
                Value::Number(number) => number.to_string(),
                other => other.to_string(),
            };
            let digits: String = raw.chars().filter(|c| *c != '-').collect();

            if digits.len() == 10 && digits.bytes().all(|b| b.is_ascii_digit()) {
                Ok(digits)
            } else {
                Err(AppError::bad_request(
                    "INVALID_BNO",
                    format!("사업자번호 형식이 올바르지 않습니다: {raw}"),
                ))
            }
        })
        .collect()
}

/// Serve from the cache, or fetch and memoize structured results for `ttl`.
///
/// Concurrent misses on one key may each reach the upstream; the last
/// writer wins.
async fn fetch_cached(
    state: &AppState,
    request: &UpstreamRequest,
    ttl: Duration,
) -> Result<UpstreamResult, UpstreamError> {
    let key = request.cache_key();

    if let Some(hit) = state.cache.get(&key).await {
        state.metrics.record_cache_hit();
        tracing::debug!(%key, "cache hit");
        return Ok(hit);
    }
    state.metrics.record_cache_miss();

    let result = fetch_observed(state, request).await?;

    if result.is_structured() {
        state.cache.set(key, result.clone(), ttl).await;
        state.metrics.record_cache_store(state.cache.len().await);
    }

    Ok(result)
}

async fn fetch_observed(
    state: &AppState,
    request: &UpstreamRequest,
) -> Result<UpstreamResult, UpstreamError> {
    state.metrics.record_upstream_request();
    let start = Instant::now();

    let outcome = state.upstream.fetch(request).await;
    state
        .metrics
        .record_upstream_latency(start.elapsed().as_secs_f64());

    if let Err(err) = &outcome {
        state.metrics.record_upstream_failure();
        if let UpstreamError::Transport(cause) = err {
            tracing::error!(upstream = %request.url(), error = %cause, "upstream unreachable");
        }
    }

    outcome
}

fn require(credential: &Option<Credential>, env_key: &'static str) -> Result<Credential, AppError> {
    credential
        .clone()
        .ok_or(AppError::MissingCredential(env_key))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
