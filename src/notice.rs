// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Classification of government support-program notices.
//!
//! Works on raw upstream items (`pblancNm`, `pblancBgnDt`, `pblancEndDt`, ...)
//! and derives a recruiting status and a D-day label for each one.

use chrono::{Duration, Months, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

const ALWAYS_OPEN_KEYWORDS: &[&str] = &["상시", "연중", "수시", "모집시까지", "접수시까지"];
const NO_END_MARKERS: &[&str] = &["", "0000-00-00", "9999-12-31", "2999-12-31"];
const DESCRIPTION_FIELDS: &[&str] = &["cn", "rm", "etc", "pblancCn"];

const KST_OFFSET_HOURS: i64 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecruitStatus {
    Upcoming,
    Ongoing,
    Closed,
    Always,
}

/// Outcome marker added to reshaped listing envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Success,
    Empty,
    Error,
}

/// Which notices a listing keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingMode {
    /// Dated notices from the last year, always-open ones excluded.
    Recent,
    /// Only always-open notices, regardless of date.
    AlwaysOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct RecruitRules {
    /// End dates on or after this day are treated as "no deadline".
    pub far_future_cutoff: Option<NaiveDate>,
}

impl Default for RecruitRules {
    fn default() -> Self {
        Self {
            far_future_cutoff: NaiveDate::from_ymd_opt(2099, 1, 1),
        }
    }
}

impl RecruitRules {
    pub fn without_far_future() -> Self {
        Self {
            far_future_cutoff: None,
        }
    }

    pub fn is_always_open(&self, item: &Map<String, Value>) -> bool {
        let title = text_field(item, "pblancNm")
            .or_else(|| text_field(item, "title"))
            .unwrap_or_default();
        let description = DESCRIPTION_FIELDS
            .iter()
            .map(|field| text_field(item, field).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(" ");
        let text = format!("{title} {description}").to_lowercase();

        if ALWAYS_OPEN_KEYWORDS.iter().any(|kw| text.contains(kw)) {
            return true;
        }

        // An absent end date is unknown, an explicit null or marker means "none".
        match item.get("pblancEndDt") {
            Some(Value::Null) => return true,
            Some(Value::String(end)) if NO_END_MARKERS.contains(&end.trim()) => return true,
            _ => {}
        }

        match (self.far_future_cutoff, date_field(item, "pblancEndDt")) {
            (Some(cutoff), Some(end)) => end >= cutoff,
            _ => false,
        }
    }

    pub fn status(&self, item: &Map<String, Value>, today: NaiveDate) -> RecruitStatus {
        if self.is_always_open(item) {
            return RecruitStatus::Always;
        }

        let start = date_field(item, "pblancBgnDt");
        let end = date_field(item, "pblancEndDt");

        match (start, end) {
            (Some(start), _) if today < start => RecruitStatus::Upcoming,
            (_, Some(end)) if today > end => RecruitStatus::Closed,
            _ => RecruitStatus::Ongoing,
        }
    }

    /// Filter `items` for `mode` and tag each kept object with `_status` and `_dday`.
    pub fn reshape(&self, items: &[Value], mode: ListingMode, today: NaiveDate) -> Vec<Value> {
        let one_year_ago = today
            .checked_sub_months(Months::new(12))
            .unwrap_or(NaiveDate::MIN);

        items
            .iter()
            .filter_map(Value::as_object)
            .filter(|item| match mode {
                ListingMode::AlwaysOpen => self.is_always_open(item),
                ListingMode::Recent => {
                    if self.is_always_open(item) {
                        return false;
                    }
                    let start = date_field(item, "pblancBgnDt");
                    let end = date_field(item, "pblancEndDt");
                    start.is_some_and(|s| s >= one_year_ago)
                        || end.is_some_and(|e| e >= one_year_ago)
                }
            })
            .map(|item| {
                let status = self.status(item, today);
                let label = d_day_label(status, date_field(item, "pblancEndDt"), today);

                let mut enriched = item.clone();
                enriched.insert("_status".into(), serde_json::to_value(status).unwrap_or(Value::Null));
                enriched.insert("_dday".into(), Value::String(label));
                Value::Object(enriched)
            })
            .collect()
    }

    /// Reshape an upstream envelope `{resultCd, data: [...], ...}` in place of
    /// its `data`, keeping every other field and adding `status`.
    ///
    /// A failing `resultCd` is passed through untouched apart from `status`.
    /// Anything that is not an object is returned unchanged.
    pub fn reshape_envelope(&self, mut base: Value, mode: ListingMode, today: NaiveDate) -> Value {
        if let Some(envelope) = base.as_object_mut() {
            if result_code_failed(envelope.get("resultCd")) {
                envelope.insert("status".into(), listing_status(ListingStatus::Error));
                return base;
            }

            let items = envelope
                .get("data")
                .and_then(Value::as_array)
                .map(|items| self.reshape(items, mode, today))
                .unwrap_or_default();
            let status = if items.is_empty() {
                ListingStatus::Empty
            } else {
                ListingStatus::Success
            };

            envelope.insert("status".into(), listing_status(status));
            envelope.insert("data".into(), Value::Array(items));
        }

        base
    }
}

fn listing_status(status: ListingStatus) -> Value {
    serde_json::to_value(status).unwrap_or(Value::Null)
}

// "0", 0, "", null and a missing code all mean success.
fn result_code_failed(code: Option<&Value>) -> bool {
    match code {
        None | Some(Value::Null) => false,
        Some(Value::String(code)) => !code.is_empty() && code != "0",
        Some(Value::Number(code)) => code.as_f64() != Some(0.0),
        Some(Value::Bool(flag)) => *flag,
        Some(_) => true,
    }
}

pub fn d_day_label(status: RecruitStatus, end: Option<NaiveDate>, today: NaiveDate) -> String {
    match (status, end) {
        (RecruitStatus::Always, _) => "상시".to_string(),
        (RecruitStatus::Closed, _) => "마감".to_string(),
        (RecruitStatus::Upcoming, _) => "예정".to_string(),
        (RecruitStatus::Ongoing, Some(end)) => match (end - today).num_days() {
            0 => "D-Day".to_string(),
            days => format!("D-{days}"),
        },
        (RecruitStatus::Ongoing, None) => "진행중".to_string(),
    }
}

/// Accepts `2025-11-03` as well as `20251103`.
pub fn parse_ymd_like(raw: &str) -> Option<NaiveDate> {
    let mut rest = raw.trim();
    let mut digits = String::with_capacity(8);

    for (index, width) in [4, 2, 2].into_iter().enumerate() {
        if index > 0 {
            rest = rest.strip_prefix('-').unwrap_or(rest);
        }
        let part = rest.get(..width)?;
        if !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.push_str(part);
        rest = &rest[width..];
    }
    if !rest.is_empty() {
        return None;
    }

    NaiveDate::parse_from_str(&digits, "%Y%m%d").ok()
}

/// Today's calendar date in Korea.
pub fn today_kst() -> NaiveDate {
    (Utc::now() + Duration::hours(KST_OFFSET_HOURS)).date_naive()
}

fn text_field<'a>(item: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    item.get(key).and_then(Value::as_str)
}

fn date_field(item: &Map<String, Value>, key: &str) -> Option<NaiveDate> {
    text_field(item, key).and_then(parse_ymd_like)
}
