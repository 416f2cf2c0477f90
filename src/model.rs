// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Request parameters and response envelopes for the proxy endpoints.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::notice::ListingMode;

fn default_page() -> String {
    "1".to_string()
}

fn default_bizinfo_page_size() -> String {
    "15".to_string()
}

fn default_kstartup_page_size() -> String {
    "10".to_string()
}

fn default_kstartup_type() -> String {
    "announcement".to_string()
}

fn default_html() -> String {
    "no".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BizinfoQuery {
    #[serde(default = "default_page")]
    pub page: String,
    #[serde(default = "default_bizinfo_page_size")]
    pub per_page: String,
    /// Field code, `01` to `09`.
    #[serde(default)]
    pub category: Option<String>,
    /// Region name, sent as a hashtag filter.
    #[serde(default)]
    pub area: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SmesQuery {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub range: Option<String>,
    #[serde(default = "default_html")]
    pub html: String,
}

impl SmesQuery {
    pub fn listing_mode(&self) -> ListingMode {
        let always = self.mode.as_deref() == Some("always")
            || matches!(self.range.as_deref(), Some("always") | Some("all"));

        if always {
            ListingMode::AlwaysOpen
        } else {
            ListingMode::Recent
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KstartupQuery {
    #[serde(default = "default_kstartup_type", rename = "type")]
    pub kind: String,
    #[serde(default = "default_page")]
    pub page: String,
    #[serde(default = "default_kstartup_page_size")]
    pub per_page: String,
    /// Remaining filters (region, field, title, ...) forwarded as-is.
    #[serde(flatten)]
    pub filters: BTreeMap<String, String>,
}

/// K-Startup operations, selected by the `type` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KstartupKind {
    Announcement,
    Business,
    Content,
    Stat,
}

impl KstartupKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "announcement" => Some(Self::Announcement),
            "business" => Some(Self::Business),
            "content" => Some(Self::Content),
            "stat" => Some(Self::Stat),
            _ => None,
        }
    }

    pub fn operation(self) -> &'static str {
        match self {
            Self::Announcement => "getAnnouncementInformation01",
            Self::Business => "getBusinessInformation01",
            Self::Content => "getContentInformation01",
            Self::Stat => "getStatisticalInformation01",
        }
    }

    pub fn is_listing(self) -> bool {
        matches!(self, Self::Announcement | Self::Business)
    }
}

#[derive(Debug, Deserialize)]
pub struct ExchangeQuery {
    /// `YYYYMMDD`; defaults to today in KST.
    #[serde(default)]
    pub date: Option<String>,
}

/// Returned with HTTP 200 when the NTS API fails, so browser clients can
/// tell an upstream rejection apart from a network error.
#[derive(Debug, Serialize)]
pub struct StatusFailure {
    pub data: Vec<Value>,
    pub error: String,
    pub message: String,
}

impl StatusFailure {
    pub fn from_status(status: u16) -> Self {
        Self {
            data: Vec::new(),
            error: format!("NTS_API_FAILED_{status}"),
            message: format!("국세청 API 호출 실패 (코드 {status})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smes_mode_aliases() {
        let query = |mode: Option<&str>, range: Option<&str>| SmesQuery {
            mode: mode.map(String::from),
            range: range.map(String::from),
            html: default_html(),
        };

        assert_eq!(query(Some("always"), None).listing_mode(), ListingMode::AlwaysOpen);
        assert_eq!(query(None, Some("all")).listing_mode(), ListingMode::AlwaysOpen);
        assert_eq!(query(Some("default"), None).listing_mode(), ListingMode::Recent);
        assert_eq!(query(None, None).listing_mode(), ListingMode::Recent);
    }

    #[test]
    fn kstartup_kinds() {
        assert_eq!(
            KstartupKind::parse("stat").map(KstartupKind::operation),
            Some("getStatisticalInformation01")
        );
        assert!(KstartupKind::parse("business").unwrap().is_listing());
        assert!(!KstartupKind::parse("content").unwrap().is_listing());
        assert!(KstartupKind::parse("news").is_none());
    }
}
