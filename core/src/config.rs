use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{GatewayError, Result};

/// Secret API key. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Bounded exponential backoff applied to transient upstream failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 disables retrying
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31) as i32;
        let delay = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(delay.min(self.max_backoff_ms as f64) as u64)
    }
}

/// Settings for a single upstream vendor
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Key pool; the first entry is the primary credential
    pub credentials: Vec<Credential>,
    pub base_url: String,
    /// Per-attempt timeout in milliseconds
    pub timeout_ms: u64,
    pub retry: RetryPolicy,
    /// Ceiling on in-flight requests to this vendor
    pub max_concurrency: usize,
    pub user_agent: String,
    /// Vendor-specific settings (`lang` for QWeather, `user_id` for Mem0)
    pub options: BTreeMap<String, String>,
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            credentials: Vec::new(),
            base_url: base_url.into(),
            timeout_ms: 10_000,
            retry: RetryPolicy::default(),
            max_concurrency: 8,
            user_agent: format!("toolgate/{}", env!("CARGO_PKG_VERSION")),
            options: BTreeMap::new(),
        }
    }

    pub fn with_credential(mut self, key: impl Into<String>) -> Self {
        self.credentials.push(Credential::new(key));
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// First non-blank credential
    pub fn credential(&self) -> Option<&Credential> {
        self.credentials.iter().find(|c| !c.is_blank())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Read `<PREFIX>_API_HOST`, `<PREFIX>_TIMEOUT_MS`, `<PREFIX>_MAX_RETRIES`,
    /// `<PREFIX>_MAX_CONCURRENCY` and the first non-empty key variable.
    fn from_lookup<F>(lookup: &F, prefix: &str, key_vars: &[&str], default_base_url: &str) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::new(
            var(&format!("{prefix}_API_HOST"))
                .unwrap_or_else(|| default_base_url.to_string())
                .trim_end_matches('/')
                .to_string(),
        );

        if let Some(keys) = key_vars.iter().find_map(|name| var(name)) {
            config.credentials = split_keys(&keys);
        }
        if let Some(ms) = var(&format!("{prefix}_TIMEOUT_MS")).and_then(|v| v.parse().ok()) {
            config.timeout_ms = ms;
        }
        if let Some(n) = var(&format!("{prefix}_MAX_RETRIES")).and_then(|v| v.parse().ok()) {
            config.retry.max_retries = n;
        }
        if let Some(n) = var(&format!("{prefix}_MAX_CONCURRENCY")).and_then(|v| v.parse().ok()) {
            config.max_concurrency = n;
        }
        config
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(GatewayError::Config(format!("{name}: timeout_ms must be > 0")));
        }
        if self.max_concurrency == 0 {
            return Err(GatewayError::Config(format!(
                "{name}: max_concurrency must be > 0"
            )));
        }
        if self.retry.multiplier < 1.0 {
            return Err(GatewayError::Config(format!(
                "{name}: backoff multiplier must be >= 1.0"
            )));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(GatewayError::Config(format!(
                "{name}: base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        Ok(())
    }
}

fn split_keys(raw: &str) -> Vec<Credential> {
    non_blank(raw.split(',').map(|k| Credential::new(k.trim())))
}

fn non_blank(keys: impl IntoIterator<Item = Credential>) -> Vec<Credential> {
    keys.into_iter().filter(|k| !k.is_blank()).collect()
}

/// How the MCP surface is exposed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServeMode {
    /// Newline-delimited JSON-RPC on stdin/stdout
    Stdio,
    /// JSON-RPC over HTTP POST
    Http,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub mode: ServeMode,
    pub addr: String,
    pub name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: ServeMode::Stdio,
            addr: "0.0.0.0:6537".to_string(),
            name: "toolgate".to_string(),
        }
    }
}

/// Process-wide configuration, built once at startup and never mutated
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub weather: ProviderConfig,
    pub geo: ProviderConfig,
    pub memory: ProviderConfig,
    pub search: ProviderConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl GatewayConfig {
    /// Defaults overlaid with the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source (the environment in production)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut server = ServerConfig::default();
        match lookup("TOOLGATE_TRANSPORT").as_deref().map(str::trim) {
            Some("http") => server.mode = ServeMode::Http,
            Some("stdio") | None => {}
            Some(other) => {
                tracing::warn!(target: "config", transport = %other, "Unknown transport; using stdio")
            }
        }
        if let Some(addr) = lookup("TOOLGATE_ADDR").filter(|a| !a.is_empty()) {
            server.addr = addr;
        }

        let mut weather = ProviderConfig::from_lookup(
            &lookup,
            "QWEATHER",
            &["QWEATHER_API_KEY"],
            "https://devapi.qweather.com",
        );
        weather.options.insert(
            "lang".to_string(),
            lookup("QWEATHER_LANG").unwrap_or_else(|| "zh-hans".to_string()),
        );
        // City lookups go to the API host unless a separate GeoAPI URL is given
        if let Some(url) = lookup("QWEATHER_GEO_URL").filter(|u| !u.trim().is_empty()) {
            weather.options.insert("geo_url".to_string(), url.trim().to_string());
        }

        let geo = ProviderConfig::from_lookup(
            &lookup,
            "AMAP",
            &["AMAP_API_KEY"],
            "https://restapi.amap.com",
        );

        let mut memory = ProviderConfig::from_lookup(
            &lookup,
            "MEM0",
            &["MEM0_API_KEY"],
            "https://api.mem0.ai",
        );
        memory.options.insert(
            "user_id".to_string(),
            lookup("MEM0_USER_ID").unwrap_or_else(|| "default".to_string()),
        );
        if lookup("MEM0_TIMEOUT_MS").is_none() {
            memory.timeout_ms = 30_000;
        }

        let mut search = ProviderConfig::from_lookup(
            &lookup,
            "TAVILY",
            &["TAVILY_API_KEYS", "TAVILY_API_KEY"],
            "https://api.tavily.com",
        );
        if lookup("TAVILY_TIMEOUT_MS").is_none() {
            search.timeout_ms = 30_000;
        }

        Self {
            server,
            weather,
            geo,
            memory,
            search,
        }
    }

    /// Load configuration from a TOML file (path via TOOLGATE_CONFIG or ./toolgate.toml),
    /// overlaying values onto env-driven defaults. A missing file is not an error;
    /// an unreadable or invalid one is.
    pub fn load() -> Result<Self> {
        let path = std::env::var("TOOLGATE_CONFIG").unwrap_or_else(|_| "toolgate.toml".into());
        let base = Self::from_env();
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(target: "config", path = %path, "No TOML config found; using defaults/env");
            base.validate()?;
            return Ok(base);
        }
        Self::load_from(p, base)
    }

    /// Overlay the TOML file at `path` onto `base`
    pub fn load_from(path: &Path, base: Self) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let overlay: GatewayToml = toml::from_str(&raw)?;
        let config = overlay.overlay(base);
        config.validate()?;
        tracing::info!(target: "config", path = %path.display(), "Loaded TOML config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.weather.validate("weather")?;
        self.geo.validate("geo")?;
        self.memory.validate("memory")?;
        self.search.validate("search")?;
        Ok(())
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, Deserialize)]
struct GatewayToml {
    server: Option<ServerToml>,
    weather: Option<ProviderToml>,
    geo: Option<ProviderToml>,
    memory: Option<ProviderToml>,
    search: Option<ProviderToml>,
}

impl GatewayToml {
    fn overlay(self, mut base: GatewayConfig) -> GatewayConfig {
        if let Some(s) = self.server {
            s.apply(&mut base.server);
        }
        if let Some(p) = self.weather {
            p.apply(&mut base.weather);
        }
        if let Some(p) = self.geo {
            p.apply(&mut base.geo);
        }
        if let Some(p) = self.memory {
            p.apply(&mut base.memory);
        }
        if let Some(p) = self.search {
            p.apply(&mut base.search);
        }
        base
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ServerToml {
    mode: Option<ServeMode>,
    addr: Option<String>,
    name: Option<String>,
}

impl ServerToml {
    fn apply(self, s: &mut ServerConfig) {
        if let Some(x) = self.mode {
            s.mode = x;
        }
        if let Some(x) = self.addr {
            s.addr = x;
        }
        if let Some(x) = self.name {
            s.name = x;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ProviderToml {
    api_key: Option<Credential>,
    api_keys: Option<Vec<Credential>>,
    base_url: Option<String>,
    timeout_ms: Option<u64>,
    max_retries: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    backoff_multiplier: Option<f64>,
    max_concurrency: Option<usize>,
    user_agent: Option<String>,
    options: Option<BTreeMap<String, String>>,
}

impl ProviderToml {
    fn apply(self, p: &mut ProviderConfig) {
        if let Some(keys) = self.api_keys {
            p.credentials = non_blank(keys);
        } else if let Some(key) = self.api_key {
            p.credentials = non_blank([key]);
        }
        if let Some(x) = self.base_url {
            p.base_url = x.trim_end_matches('/').to_string();
        }
        if let Some(x) = self.timeout_ms {
            p.timeout_ms = x;
        }
        if let Some(x) = self.max_retries {
            p.retry.max_retries = x;
        }
        if let Some(x) = self.initial_backoff_ms {
            p.retry.initial_backoff_ms = x;
        }
        if let Some(x) = self.max_backoff_ms {
            p.retry.max_backoff_ms = x;
        }
        if let Some(x) = self.backoff_multiplier {
            p.retry.multiplier = x;
        }
        if let Some(x) = self.max_concurrency {
            p.max_concurrency = x;
        }
        if let Some(x) = self.user_agent {
            p.user_agent = x;
        }
        if let Some(x) = self.options {
            p.options.extend(x);
        }
    }
}
