use std::{path::PathBuf, time::Duration};

use crate::transport::Headers;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36";

pub const DEFAULT_DOMAINS: [&str; 2] = ["https://daddylive.sx/", "https://dlhd.dad/"];

pub const DEFAULT_DELIVERY_ROOT: &str = "newkso.ru";

pub const DEFAULT_ENDPOINT_TAG: &str = "hls_manifest_proxy";

pub const CACHE_FILE_NAME: &str = ".dlhd_cache";

/// Everything an [`Extractor`](crate::pipeline::Extractor) needs to know
/// about its environment. The CLI fills this from flags and environment
/// variables; library users usually start from `Default`.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Static headers merged into every request.
    pub extra_headers: Headers,
    /// Proxy URLs, one is picked at random for each new connection context.
    pub proxies: Vec<String>,
    /// Where the obfuscated cache lives. `None` means next to the executable.
    pub cache_path: Option<PathBuf>,
    /// Candidate base domains, probed in order.
    pub domain_candidates: Vec<String>,
    /// Root domain of the stream-delivery hosts.
    pub delivery_root: String,
    pub user_agent: String,
    pub endpoint_tag: String,

    pub retries: usize,
    pub initial_delay: Duration,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub validation_timeout: Duration,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            extra_headers: Headers::new(),
            proxies: Vec::new(),
            cache_path: None,
            domain_candidates: DEFAULT_DOMAINS.iter().map(|d| d.to_string()).collect(),
            delivery_root: DEFAULT_DELIVERY_ROOT.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            endpoint_tag: DEFAULT_ENDPOINT_TAG.to_string(),
            retries: 3,
            initial_delay: Duration::from_secs(2),
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            validation_timeout: Duration::from_secs(10),
        }
    }
}

impl ExtractorConfig {
    pub fn resolved_cache_path(&self) -> PathBuf {
        match &self.cache_path {
            Some(path) => path.clone(),
            None => default_cache_path(),
        }
    }
}

/// `.dlhd_cache` next to the running executable, or in the working
/// directory when the executable path is unknown.
pub fn default_cache_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.to_path_buf()))
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_default()
        .join(CACHE_FILE_NAME)
}

pub fn parse_proxies(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

pub fn parse_extra_headers(value: &str) -> Headers {
    if value.trim().is_empty() {
        return Headers::new();
    }

    match serde_json::from_str(value) {
        Ok(headers) => headers,
        Err(e) => {
            warn!("Ignoring extra request headers, not a JSON object of strings: {}", e);
            Headers::new()
        }
    }
}
