use anyhow::{bail, Context};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub redirect_server: ServerConfig,
    pub auth: AuthConfig,
    pub partner: PartnerConfig,
    pub cookie: CookieConfig,
    pub rate_limit: RateLimitConfig,
    pub click_log: ClickLogConfig,
    pub client_ip: ClientIpConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// API keys accepted by the reporting API. Empty disables auth.
    pub api_keys: Vec<String>,
}

/// Everything the redirect path needs to know about the affiliate partner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartnerConfig {
    /// Hosts (and their subdomains) we are willing to redirect to
    pub allowed_domains: Vec<String>,
    pub partner_id: String,
    pub tracking_id: String,
    /// Partner search page used when a tour cannot be resolved
    pub fallback_url: String,
    pub default_utm_source: String,
    pub default_utm_medium: String,
    pub default_utm_campaign: String,
}

/// Browsers cap cookie Max-Age at 400 days.
pub const MAX_COOKIE_LIFETIME_DAYS: i64 = 400;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieConfig {
    pub name: String,
    /// HMAC secret. When unset a random per-process key is used.
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    pub lifetime_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickLogConfig {
    pub buffer_size: usize,
    pub write_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    /// Use the socket peer address only
    None,
    /// Forwarded / X-Forwarded-For, validated against the trusted proxy list
    Standard,
    /// CF-Connecting-IP
    Cloudflare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientIpConfig {
    pub trusted_proxy_mode: TrustedProxyMode,
    pub trusted_proxies: Vec<IpNet>,
    pub num_trusted_proxies: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_entries: u64,
    pub ttl_secs: u64,
    /// Lifetime of a cached "no such tour" result
    pub miss_ttl_secs: u64,
}

impl Default for PartnerConfig {
    fn default() -> Self {
        Self {
            allowed_domains: vec!["bnadventure.com".to_string()],
            partner_id: "9".to_string(),
            tracking_id: "tourlink".to_string(),
            fallback_url: "https://www.bnadventure.com/tours/".to_string(),
            default_utm_source: "tourlink".to_string(),
            default_utm_medium: "affiliate".to_string(),
            default_utm_campaign: "tour-booking".to_string(),
        }
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: "bna_attr".to_string(),
            secret: None,
            lifetime_days: 30,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 30,
            window_secs: 60,
        }
    }
}

impl Default for ClickLogConfig {
    fn default() -> Self {
        Self {
            buffer_size: 10_000,
            write_timeout_ms: 3_000,
        }
    }
}

impl Default for ClientIpConfig {
    fn default() -> Self {
        Self {
            trusted_proxy_mode: TrustedProxyMode::None,
            trusted_proxies: Vec::new(),
            num_trusted_proxies: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl_secs: 300,
            miss_ttl_secs: 10,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        Err(_) => Ok(default),
    }
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str = env_or("DATABASE_BACKEND", "sqlite");
        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            "sqlite" => DatabaseBackend::Sqlite,
            other => {
                tracing::warn!(
                    "Unknown DATABASE_BACKEND '{other}', falling back to 'sqlite'. Supported values: sqlite, postgres"
                );
                DatabaseBackend::Sqlite
            }
        };

        let database = DatabaseConfig {
            backend,
            url: env_or("DATABASE_URL", "sqlite://./tourlink.db?mode=rwc"),
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10)?,
        };

        let api_server = ServerConfig {
            host: env_or("API_HOST", "127.0.0.1"),
            port: env_parse("API_PORT", 8080)?,
        };
        let redirect_server = ServerConfig {
            host: env_or("REDIRECT_HOST", "127.0.0.1"),
            port: env_parse("REDIRECT_PORT", 3000)?,
        };

        let defaults = PartnerConfig::default();
        let mut allowed_domains = env_list("PARTNER_ALLOWED_DOMAINS");
        if allowed_domains.is_empty() {
            allowed_domains = defaults.allowed_domains.clone();
        }
        let partner = PartnerConfig {
            allowed_domains: allowed_domains
                .into_iter()
                .map(|d| d.trim_end_matches('.').to_ascii_lowercase())
                .collect(),
            partner_id: env_or("PARTNER_ID", &defaults.partner_id),
            tracking_id: env_or("PARTNER_TRACKING_ID", &defaults.tracking_id),
            fallback_url: env_or("PARTNER_FALLBACK_URL", &defaults.fallback_url),
            default_utm_source: env_or("UTM_DEFAULT_SOURCE", &defaults.default_utm_source),
            default_utm_medium: env_or("UTM_DEFAULT_MEDIUM", &defaults.default_utm_medium),
            default_utm_campaign: env_or("UTM_DEFAULT_CAMPAIGN", &defaults.default_utm_campaign),
        };

        let cookie_defaults = CookieConfig::default();
        let cookie = CookieConfig {
            name: env_or("ATTRIBUTION_COOKIE_NAME", &cookie_defaults.name),
            secret: std::env::var("ATTRIBUTION_COOKIE_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            lifetime_days: env_parse("ATTRIBUTION_COOKIE_DAYS", cookie_defaults.lifetime_days)?,
        };

        let rate_defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            max_requests: env_parse("RATE_LIMIT_MAX_REQUESTS", rate_defaults.max_requests)?,
            window_secs: env_parse("RATE_LIMIT_WINDOW_SECS", rate_defaults.window_secs)?,
        };

        let log_defaults = ClickLogConfig::default();
        let click_log = ClickLogConfig {
            buffer_size: env_parse("CLICK_LOG_BUFFER_SIZE", log_defaults.buffer_size)?,
            write_timeout_ms: env_parse("CLICK_LOG_TIMEOUT_MS", log_defaults.write_timeout_ms)?,
        };

        let trusted_proxy_mode = match env_or("TRUSTED_PROXY_MODE", "none")
            .to_lowercase()
            .as_str()
        {
            "none" => TrustedProxyMode::None,
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'none'. Supported values: none, standard, cloudflare"
                );
                TrustedProxyMode::None
            }
        };
        let trusted_proxies = env_list("TRUSTED_PROXIES")
            .iter()
            .map(|cidr| parse_cidr(cidr))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let num_trusted_proxies = match std::env::var("NUM_TRUSTED_PROXIES") {
            Ok(raw) => Some(
                raw.trim()
                    .parse::<usize>()
                    .with_context(|| format!("NUM_TRUSTED_PROXIES has an invalid value: {raw:?}"))?,
            ),
            Err(_) => None,
        };

        let cache_defaults = CacheConfig::default();
        let cache = CacheConfig {
            max_entries: env_parse("TOUR_CACHE_MAX_ENTRIES", cache_defaults.max_entries)?,
            ttl_secs: env_parse("TOUR_CACHE_TTL_SECS", cache_defaults.ttl_secs)?,
            miss_ttl_secs: env_parse("TOUR_CACHE_MISS_TTL_SECS", cache_defaults.miss_ttl_secs)?,
        };

        let config = Config {
            database,
            api_server,
            redirect_server,
            auth: AuthConfig {
                api_keys: env_list("API_KEYS"),
            },
            partner,
            cookie,
            rate_limit,
            click_log,
            client_ip: ClientIpConfig {
                trusted_proxy_mode,
                trusted_proxies,
                num_trusted_proxies,
            },
            cache,
        };
        config.validate()?;

        Ok(config)
    }

    /// Reject settings the redirect path cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.partner.allowed_domains.is_empty() {
            bail!("PARTNER_ALLOWED_DOMAINS must name at least one domain");
        }
        if self.partner.partner_id.is_empty() || self.partner.tracking_id.is_empty() {
            bail!("PARTNER_ID and PARTNER_TRACKING_ID must not be empty");
        }
        crate::affiliate::AffiliatePolicy::new(self.partner.clone())
            .context("PARTNER_FALLBACK_URL must be an allow-listed partner URL")?;
        if self.rate_limit.max_requests == 0 || self.rate_limit.window_secs == 0 {
            bail!("RATE_LIMIT_MAX_REQUESTS and RATE_LIMIT_WINDOW_SECS must be positive");
        }
        if !(1..=MAX_COOKIE_LIFETIME_DAYS).contains(&self.cookie.lifetime_days) {
            bail!("ATTRIBUTION_COOKIE_DAYS must be between 1 and {MAX_COOKIE_LIFETIME_DAYS}");
        }
        if self.click_log.buffer_size == 0 {
            bail!("CLICK_LOG_BUFFER_SIZE must be positive");
        }
        Ok(())
    }
}

/// Accepts either a CIDR range or a bare address (treated as a host route).
fn parse_cidr(raw: &str) -> anyhow::Result<IpNet> {
    if let Ok(net) = raw.parse::<IpNet>() {
        return Ok(net);
    }
    let addr = raw
        .parse::<std::net::IpAddr>()
        .with_context(|| format!("TRUSTED_PROXIES entry is not a CIDR or IP: {raw:?}"))?;
    let prefix = if addr.is_ipv4() { 32 } else { 128 };
    Ok(IpNet::new(addr, prefix)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            database: DatabaseConfig {
                backend: DatabaseBackend::Sqlite,
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
            },
            api_server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            redirect_server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            auth: AuthConfig { api_keys: vec![] },
            partner: PartnerConfig::default(),
            cookie: CookieConfig::default(),
            rate_limit: RateLimitConfig::default(),
            click_log: ClickLogConfig::default(),
            client_ip: ClientIpConfig::default(),
            cache: CacheConfig::default(),
        }
    }

    #[test]
    fn test_defaults_validate() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_fallback_must_be_allow_listed() {
        let mut config = sample();
        config.partner.fallback_url = "https://elsewhere.example.com/search".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_rate_limit_rejected() {
        let mut config = sample();
        config.rate_limit.max_requests = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cookie_lifetime_bounds() {
        let mut config = sample();
        config.cookie.lifetime_days = 0;
        assert!(config.validate().is_err());

        config.cookie.lifetime_days = MAX_COOKIE_LIFETIME_DAYS;
        assert!(config.validate().is_ok());

        config.cookie.lifetime_days = i64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_cidr_accepts_bare_ip() {
        let net = parse_cidr("10.0.0.1").unwrap();
        assert!(net.contains(&"10.0.0.1".parse::<std::net::IpAddr>().unwrap()));
        assert!(parse_cidr("10.0.0.0/8").is_ok());
        assert!(parse_cidr("not-an-ip").is_err());
    }
}
