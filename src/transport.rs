use std::{
    collections::BTreeMap,
    io::{self, Read},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use rand::seq::SliceRandom;
use reqwest::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    StatusCode,
};
use reqwest_cookie_store::CookieStoreMutex;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, RwLock};
use tokio_retry::RetryIf;
use url::Url;

use crate::config::ExtractorConfig;

pub const ACCEPT_ENCODING: &str = "gzip, deflate, br, zstd";

/// Header name to value, ordered so descriptors serialize stably.
pub type Headers = BTreeMap<String, String>;

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("could not build http client: {0}")]
    Build(#[source] reqwest::Error),
    #[error("invalid proxy {0}: {1}")]
    Proxy(String, #[source] reqwest::Error),
    #[error("invalid url {0}: {1}")]
    InvalidUrl(String, #[source] url::ParseError),
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("all {attempts} attempts failed for {url}: {source}")]
    Exhausted {
        url: String,
        attempts: usize,
        #[source]
        source: reqwest::Error,
    },
    #[error("could not decode {encoding} body: {source}")]
    Decode {
        encoding: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid json body: {0}")]
    Json(#[from] serde_json::Error),
}

impl TransportError {
    /// Connection resets, disconnects, truncated bodies and timeouts.
    /// Everything else means the upstream answered and retrying won't help.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Request { source, .. } => {
                source.is_connect() || source.is_timeout() || source.is_request() || source.is_body()
            }
            _ => false,
        }
    }

    fn exhausted(self, attempts: usize) -> Self {
        match self {
            TransportError::Request { url, source } => TransportError::Exhausted {
                url,
                attempts,
                source,
            },
            other => other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub body: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// URL after redirects.
    pub final_url: String,
}

impl FetchedPage {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_str(&self.body).map_err(TransportError::Json)
    }
}

/// A connection context: one connection pool plus the cookie jar that
/// carries the upstream's anti-bot state.
struct Session {
    client: reqwest::Client,
    cookies: Arc<CookieStoreMutex>,
}

/// Shared HTTP layer. Holds one lazily created session, retries transient
/// failures with exponential backoff and decodes bodies itself.
pub struct HttpClient {
    base_headers: HeaderMap,
    user_agent: String,
    proxies: Vec<String>,
    delivery_root: String,
    retries: usize,
    initial_delay: Duration,
    request_timeout: Duration,
    connect_timeout: Duration,
    session: Mutex<Option<Arc<Session>>>,
    iframe_context: RwLock<Option<String>>,
}

impl HttpClient {
    pub fn new(config: &ExtractorConfig) -> Result<HttpClient, TransportError> {
        for proxy in &config.proxies {
            reqwest::Proxy::all(proxy).map_err(|e| TransportError::Proxy(proxy.clone(), e))?;
        }

        let mut base = Headers::new();
        base.insert("User-Agent".to_string(), config.user_agent.clone());
        base.extend(config.extra_headers.clone());

        Ok(HttpClient {
            base_headers: to_header_map(&base),
            user_agent: config.user_agent.clone(),
            proxies: config.proxies.clone(),
            delivery_root: config.delivery_root.clone(),
            retries: config.retries,
            initial_delay: config.initial_delay,
            request_timeout: config.request_timeout,
            connect_timeout: config.connect_timeout,
            session: Mutex::new(None),
            iframe_context: RwLock::new(None),
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub async fn set_iframe_context(&self, iframe_url: &str) {
        *self.iframe_context.write().await = Some(iframe_url.to_string());
    }

    pub async fn iframe_context(&self) -> Option<String> {
        self.iframe_context.read().await.clone()
    }

    /// Cookie jar of the live session, if any.
    pub async fn cookie_jar(&self) -> Option<Arc<CookieStoreMutex>> {
        self.session.lock().await.as_ref().map(|s| s.cookies.clone())
    }

    pub async fn has_session(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Drops the current session. The next request builds a fresh one,
    /// possibly through a different proxy.
    pub async fn close(&self) {
        if self.session.lock().await.take().is_some() {
            debug!("Connection context torn down");
        }
    }

    async fn session(&self) -> Result<Arc<Session>, TransportError> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }

        let session = Arc::new(self.build_session()?);
        *guard = Some(session.clone());
        Ok(session)
    }

    fn build_session(&self) -> Result<Session, TransportError> {
        let cookies = Arc::new(CookieStoreMutex::default());

        let mut builder = reqwest::Client::builder()
            .cookie_provider(cookies.clone())
            .default_headers(self.base_headers.clone())
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            .pool_max_idle_per_host(3)
            .tcp_keepalive(Duration::from_secs(30))
            .danger_accept_invalid_certs(true)
            .no_gzip()
            .no_brotli()
            .no_deflate();

        if let Some(proxy) = self.proxies.choose(&mut rand::thread_rng()) {
            debug!("New connection context through proxy {}", proxy);
            let proxy_cfg =
                reqwest::Proxy::all(proxy).map_err(|e| TransportError::Proxy(proxy.clone(), e))?;
            builder = builder.proxy(proxy_cfg);
        }

        let client = builder.build().map_err(TransportError::Build)?;
        Ok(Session { client, cookies })
    }

    /// Per-request headers on top of the base set. Delivery hosts only
    /// answer when `Referer`/`Origin` match the player iframe, so those
    /// are forced here for every request that targets them.
    pub async fn headers_for(&self, url: &Url, headers: &Headers) -> HeaderMap {
        let mut merged = to_header_map(headers);

        let host = url.host_str().unwrap_or_default();
        if is_delivery_host(host, &self.delivery_root) {
            let (referer, origin) = match self.iframe_context().await {
                Some(iframe) => {
                    let origin = origin_of(&iframe).unwrap_or_else(|| url_origin(url));
                    (iframe, origin)
                }
                None => (url_origin(url), url_origin(url)),
            };
            for (name, value) in [
                (header::USER_AGENT, self.user_agent.as_str()),
                (header::REFERER, referer.as_str()),
                (header::ORIGIN, origin.as_str()),
            ] {
                if let Ok(value) = HeaderValue::from_str(value) {
                    merged.insert(name, value);
                }
            }
        }

        merged.insert(
            header::ACCEPT_ENCODING,
            HeaderValue::from_static(ACCEPT_ENCODING),
        );
        merged
    }

    /// GET with the configured retry policy.
    pub async fn get(
        &self,
        url: &str,
        headers: &Headers,
    ) -> Result<FetchedPage, TransportError> {
        self.fetch(url, headers, self.retries, self.initial_delay).await
    }

    /// GET with a single attempt, for probes and best-effort requests.
    pub async fn get_once(
        &self,
        url: &str,
        headers: &Headers,
    ) -> Result<FetchedPage, TransportError> {
        self.fetch(url, headers, 1, self.initial_delay).await
    }

    pub async fn fetch(
        &self,
        url: &str,
        headers: &Headers,
        retries: usize,
        initial_delay: Duration,
    ) -> Result<FetchedPage, TransportError> {
        let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(url.to_string(), e))?;
        let request_headers = self.headers_for(&parsed, headers).await;
        let attempts = retries.max(1);

        let result = RetryIf::start(
            backoff_schedule(initial_delay, attempts),
            || self.attempt(&parsed, &request_headers),
            |e: &TransportError| {
                let transient = e.is_transient();
                if transient {
                    warn!("{}", e);
                }
                transient
            },
        )
        .await;

        match result {
            Err(e) if e.is_transient() => {
                warn!("Giving up on {} after {} attempts", url, attempts);
                self.close().await;
                Err(e.exhausted(attempts))
            }
            other => other,
        }
    }

    async fn attempt(&self, url: &Url, headers: &HeaderMap) -> Result<FetchedPage, TransportError> {
        let session = self.session().await?;
        let request_error = |source| TransportError::Request {
            url: url.to_string(),
            source,
        };

        let response = session
            .client
            .get(url.clone())
            .headers(headers.clone())
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(TransportError::Status {
                url: url.to_string(),
                status,
            });
        }

        let final_url = response.url().to_string();
        let response_headers = response.headers().clone();
        let encoding = response_headers
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_ascii_lowercase());

        let raw = response.bytes().await.map_err(request_error)?;
        let body = decode_body(encoding.as_deref(), &raw)?;

        Ok(FetchedPage {
            body,
            status,
            headers: response_headers,
            final_url,
        })
    }

    /// Status of a HEAD request on a short-lived client, used to check
    /// whether a cached manifest still answers.
    pub async fn head_status(
        &self,
        url: &str,
        headers: &Headers,
        timeout: Duration,
    ) -> Result<StatusCode, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(TransportError::Build)?;

        client
            .head(url)
            .headers(to_header_map(headers))
            .send()
            .await
            .map(|r| r.status())
            .map_err(|source| TransportError::Request {
                url: url.to_string(),
                source,
            })
    }
}

/// Delays slept between attempts: `initial_delay * 2^n` for each retry.
/// `attempts` requests therefore sleep `attempts - 1` times.
pub fn backoff_schedule(initial_delay: Duration, attempts: usize) -> impl Iterator<Item = Duration> {
    (0..attempts.saturating_sub(1) as u32).map(move |n| initial_delay * 2u32.saturating_pow(n))
}

pub fn decode_body(encoding: Option<&str>, raw: &[u8]) -> Result<String, TransportError> {
    let encoding = encoding.unwrap_or("identity");
    let decode_error = |source| TransportError::Decode {
        encoding: encoding.to_string(),
        source,
    };

    let bytes = match encoding {
        "gzip" | "x-gzip" => read_all(GzDecoder::new(raw)).map_err(decode_error)?,
        "deflate" => read_all(ZlibDecoder::new(raw))
            .or_else(|_| read_all(DeflateDecoder::new(raw)))
            .map_err(decode_error)?,
        "br" => read_all(brotli::Decompressor::new(raw, 4096)).map_err(decode_error)?,
        "zstd" => zstd::stream::decode_all(raw).map_err(decode_error)?,
        _ => raw.to_vec(),
    };

    String::from_utf8(bytes).map_err(|e| decode_error(io::Error::new(io::ErrorKind::InvalidData, e)))
}

fn read_all<R: Read>(mut reader: R) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out)?;
    Ok(out)
}

pub fn to_header_map(headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        match (HeaderName::from_str(key), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!("Skipping invalid header {}", key),
        }
    }
    map
}

/// True for `root` itself and any of its subdomains.
pub fn is_delivery_host(host: &str, root: &str) -> bool {
    let host = host.to_ascii_lowercase();
    host == root || host.ends_with(&format!(".{}", root))
}

pub fn url_origin(url: &Url) -> String {
    url.origin().ascii_serialization()
}

pub fn origin_of(url: &str) -> Option<String> {
    Url::parse(url).ok().map(|u| url_origin(&u))
}
