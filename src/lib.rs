// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! CORS-enabled caching proxy for Korean public open-data APIs.
//!
//! Each endpoint forwards a browser request to one upstream (BizInfo, SMES24,
//! K-Startup, Korea Eximbank, NTS), memoizes parsed responses in a
//! process-scoped [`cache::CacheStore`], and lightly reshapes the result.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod notice;
pub mod upstream;
pub mod xml;

pub use api::{router, AppState};
pub use cache::CacheStore;
pub use config::AppConfig;
pub use error::AppError;
pub use upstream::{UpstreamClient, UpstreamResult};
