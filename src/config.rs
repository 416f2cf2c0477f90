use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

const DEFAULT_BIZINFO_URL: &str = "https://www.bizinfo.go.kr/uss/rss/bizinfoApi.do";
const DEFAULT_SMES_URL: &str = "https://www.smes.go.kr/fnct/apiReqst/extPblancInfo";
const DEFAULT_KSTARTUP_URL: &str = "https://apis.data.go.kr/B552735/kisedKstartupService01";
const DEFAULT_EXIM_URL: &str =
    "https://oapi.koreaexim.go.kr/site/program/financial/exchangeJSON";
const DEFAULT_NTS_URL: &str = "https://api.odcloud.kr/api/nts-businessman/v1/status";

pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub credentials: Credentials,
    pub endpoints: UpstreamEndpoints,
    pub ttls: CacheTtls,
}

/// A service key read from the environment.
///
/// Held in its raw (decoded) form and percent-encoded exactly once when the
/// upstream URL is built. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(Arc<str>);

#[derive(Clone, Default)]
pub struct Credentials {
    pub bizinfo: Option<Credential>,
    pub smes: Option<Credential>,
    pub kstartup: Option<Credential>,
    pub exim: Option<Credential>,
    pub nts: Option<Credential>,
}

#[derive(Clone, Debug)]
pub struct UpstreamEndpoints {
    pub bizinfo: String,
    pub smes: String,
    pub kstartup: String,
    pub exim: String,
    pub nts: String,
}

#[derive(Clone, Copy, Debug)]
pub struct CacheTtls {
    pub bizinfo: Duration,
    pub smes: Duration,
    /// Announcement and business listings change often.
    pub kstartup_listing: Duration,
    /// Content and statistics listings.
    pub kstartup_reference: Duration,
    pub exchange: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let listen_addr: SocketAddr = env::var("PROXY_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .context("invalid PROXY_ADDR")?;

        let endpoints = match env::var("PROXY_UPSTREAM_ROOT") {
            Ok(root) if !root.trim().is_empty() => UpstreamEndpoints::rooted_at(&root),
            _ => UpstreamEndpoints::from_env(),
        };

        Ok(Self {
            listen_addr,
            credentials: Credentials::from_env(),
            endpoints,
            ttls: CacheTtls::from_env()?,
        })
    }

    /// Read before the rest of the config so logging is up when it loads.
    pub fn json_logs_from_env() -> bool {
        env::var("PROXY_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false)
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }
}

impl Credential {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(Arc::from(raw.into()))
    }

    fn from_env(env_key: &str) -> Option<Self> {
        let raw = env::var(env_key).ok()?;
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        if raw.contains('%') {
            tracing::warn!(
                env_key,
                "credential looks percent-encoded; configure the decoded key, it is encoded once per request"
            );
        }

        Some(Self::new(raw))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl Credentials {
    pub fn from_env() -> Self {
        Self {
            bizinfo: Credential::from_env("BIZINFO_KEY"),
            smes: Credential::from_env("SMES_KEY"),
            kstartup: Credential::from_env("KSTARTUP_KEY"),
            exim: Credential::from_env("EXIM_KEY"),
            nts: Credential::from_env("NTS_KEY")
                .or_else(|| Credential::from_env("SSWK_NTS_STATUS_KEY")),
        }
    }

    /// Names of the upstreams that have a key configured.
    pub fn configured(&self) -> Vec<&'static str> {
        [
            ("bizinfo", self.bizinfo.is_some()),
            ("smes", self.smes.is_some()),
            ("kstartup", self.kstartup.is_some()),
            ("exim", self.exim.is_some()),
            ("nts", self.nts.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, present)| present.then_some(name))
        .collect()
    }
}

impl UpstreamEndpoints {
    fn from_env() -> Self {
        let read = |env_key: &str, default: &str| {
            env::var(env_key).unwrap_or_else(|_| default.to_string())
        };

        Self {
            bizinfo: read("BIZINFO_URL", DEFAULT_BIZINFO_URL),
            smes: read("SMES_URL", DEFAULT_SMES_URL),
            kstartup: read("KSTARTUP_URL", DEFAULT_KSTARTUP_URL),
            exim: read("EXIM_URL", DEFAULT_EXIM_URL),
            nts: read("NTS_URL", DEFAULT_NTS_URL),
        }
    }

    /// Point every upstream at one host, e.g. a staging mirror or a local mock.
    pub fn rooted_at(root: &str) -> Self {
        let root = root.trim_end_matches('/');
        Self {
            bizinfo: format!("{root}/bizinfo"),
            smes: format!("{root}/smes"),
            kstartup: format!("{root}/kstartup"),
            exim: format!("{root}/exim"),
            nts: format!("{root}/nts"),
        }
    }
}

impl Default for UpstreamEndpoints {
    fn default() -> Self {
        Self {
            bizinfo: DEFAULT_BIZINFO_URL.to_string(),
            smes: DEFAULT_SMES_URL.to_string(),
            kstartup: DEFAULT_KSTARTUP_URL.to_string(),
            exim: DEFAULT_EXIM_URL.to_string(),
            nts: DEFAULT_NTS_URL.to_string(),
        }
    }
}

impl CacheTtls {
    fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            bizinfo: parse_duration("PROXY_TTL_BIZINFO_SECS", defaults.bizinfo)?,
            smes: parse_duration("PROXY_TTL_SMES_SECS", defaults.smes)?,
            kstartup_listing: parse_duration(
                "PROXY_TTL_KSTARTUP_LISTING_SECS",
                defaults.kstartup_listing,
            )?,
            kstartup_reference: parse_duration(
                "PROXY_TTL_KSTARTUP_REFERENCE_SECS",
                defaults.kstartup_reference,
            )?,
            exchange: parse_duration("PROXY_TTL_EXCHANGE_SECS", defaults.exchange)?,
        })
    }
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            bizinfo: Duration::from_secs(30 * 60),
            smes: Duration::from_secs(30 * 60),
            kstartup_listing: Duration::from_secs(60),
            kstartup_reference: Duration::from_secs(10 * 60),
            exchange: Duration::from_secs(60 * 60),
        }
    }
}

fn parse_duration(env_key: &str, default: Duration) -> Result<Duration> {
    let Ok(raw) = env::var(env_key) else {
        return Ok(default);
    };
    let secs: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("{env_key} must be an integer number of seconds"))?;

    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_debug_is_redacted() {
        let key = Credential::new("super-secret");
        assert_eq!(format!("{key:?}"), "Credential(<redacted>)");
        assert_eq!(key.expose(), "super-secret");
    }

    #[test]
    fn rooted_endpoints_share_one_host() {
        let endpoints = UpstreamEndpoints::rooted_at("http://127.0.0.1:4000/");
        assert_eq!(endpoints.bizinfo, "http://127.0.0.1:4000/bizinfo");
        assert_eq!(endpoints.nts, "http://127.0.0.1:4000/nts");
    }

    #[test]
    fn configured_lists_present_keys_only() {
        let credentials = Credentials {
            smes: Some(Credential::new("a")),
            nts: Some(Credential::new("b")),
            ..Credentials::default()
        };
        assert_eq!(credentials.configured(), vec!["smes", "nts"]);
    }
}
