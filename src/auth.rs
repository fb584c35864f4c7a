use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_aux::prelude::*;
use url::Url;

use crate::{
    error::StructureError,
    params::AuthParams,
    transport::{origin_of, Headers, HttpClient, TransportError},
};

// The retry-wrapped call first, then any string literal of the same shape.
static LOOKUP_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"fetchWithRetry\(['"](/server_lookup\.(?:js|php)\?channel_id=)['"]"#,
        r#"['"](/server_lookup\.(?:js|php)\?channel_id=)['"]"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid lookup pattern"))
    .collect()
});

#[derive(thiserror::Error, Debug)]
pub enum LookupError {
    #[error(transparent)]
    Request(#[from] TransportError),
    #[error("no server_key in lookup response")]
    NoServerKey,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerLookup {
    #[serde(default, deserialize_with = "deserialize_string_from_number")]
    pub server_key: String,
}

/// `a.php` is an alias upstream serves as `auth.php`.
pub fn normalize_script(script: &str) -> &str {
    if script.trim().trim_start_matches('/') == "a.php" {
        "auth.php"
    } else {
        script
    }
}

pub fn build_auth_url(auth: &AuthParams, channel_key: &str) -> Result<String, StructureError> {
    let script = normalize_script(&auth.script);
    let base = Url::parse(&auth.host)
        .and_then(|host| host.join(script))
        .map_err(|_| StructureError::InvalidUrl(format!("{}{}", auth.host, script)))?;
    let signature: String = url::form_urlencoded::byte_serialize(auth.signature.as_bytes()).collect();

    Ok(format!(
        "{}?channel_id={}&ts={}&rnd={}&sig={}",
        base, channel_key, auth.timestamp, auth.nonce, signature
    ))
}

pub fn extract_lookup_path(html: &str) -> Option<String> {
    LOOKUP_PATTERNS
        .iter()
        .find_map(|re| re.captures(html))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn lookup_url(iframe_url: &str, lookup_path: &str, channel_key: &str) -> Result<String, StructureError> {
    let origin = origin_of(iframe_url).ok_or_else(|| StructureError::InvalidUrl(iframe_url.to_string()))?;
    Ok(format!("{}{}{}", origin, lookup_path, channel_key))
}

/// Signed handshake. The upstream only needs to see it succeed, the body
/// is ignored. Single attempt.
pub async fn authenticate(
    client: &HttpClient,
    auth_url: &str,
    iframe_url: &str,
    headers: &Headers,
) -> Result<(), TransportError> {
    let mut headers = headers.clone();
    headers.insert("Referer".to_string(), iframe_url.to_string());
    if let Some(origin) = origin_of(iframe_url) {
        headers.insert("Origin".to_string(), origin);
    }

    client.get_once(auth_url, &headers).await.map(|_| ())
}

pub async fn lookup_server_key(
    client: &HttpClient,
    lookup_url: &str,
    headers: &Headers,
) -> Result<String, LookupError> {
    let lookup: ServerLookup = client.get(lookup_url, headers).await?.json()?;
    if lookup.server_key.is_empty() {
        return Err(LookupError::NoServerKey);
    }

    Ok(lookup.server_key)
}
