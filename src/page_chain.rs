use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::{
    error::{ResolveError, StructureError},
    transport::{origin_of, Headers, HttpClient, TransportError},
};

static PLAYER_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<button[^>]*data-url="([^"]+)"[^>]*>Player\s*\d+</button>"#).unwrap()
});

static IFRAME_SRC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"iframe src="([^"]*)"#).unwrap());

/// The end of the chain: the player iframe and the headers that got us
/// there, which later requests on the same chain reuse.
#[derive(Debug, Clone)]
pub struct IframePage {
    pub url: String,
    pub body: String,
    pub headers: Headers,
}

/// `data-url` of every "Player N" button, in document order.
pub fn player_links(html: &str) -> Vec<String> {
    PLAYER_LINK
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

pub fn iframe_src(html: &str) -> Option<String> {
    IFRAME_SRC
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .find(|src| !src.is_empty())
        .map(String::from)
}

pub fn absolutize(base: &str, href: &str) -> Option<String> {
    if href.starts_with("http") {
        return Some(href.to_string());
    }
    Url::parse(base).and_then(|b| b.join(href)).ok().map(String::from)
}

/// Fetches one player page and returns the absolute iframe URL on it.
async fn iframe_from_player(
    client: &HttpClient,
    player_url: &str,
    headers: &Headers,
) -> Result<Option<String>, TransportError> {
    let page = client.get(player_url, headers).await?;
    Ok(iframe_src(&page.body).and_then(|src| absolutize(player_url, &src)))
}

/// Watch page → player page → iframe. Player links are tried in order,
/// the first one that leads to an iframe wins.
pub async fn walk(
    client: &HttpClient,
    base_url: &str,
    watch_url: &str,
) -> Result<IframePage, ResolveError> {
    let base_origin =
        origin_of(base_url).ok_or_else(|| StructureError::InvalidUrl(base_url.to_string()))?;

    let mut headers = Headers::new();
    headers.insert("User-Agent".to_string(), client.user_agent().to_string());
    headers.insert("Referer".to_string(), base_url.to_string());
    headers.insert("Origin".to_string(), base_origin);

    let watch_page = client.get(watch_url, &headers).await?;
    let links = player_links(&watch_page.body);
    if links.is_empty() {
        return Err(StructureError::NoPlayerLinks.into());
    }
    debug!("Found {} player links on {}", links.len(), watch_url);

    let mut last_error = None;
    let mut iframe_url = None;
    for link in &links {
        let Some(player_url) = absolutize(base_url, link) else {
            debug!("Skipping unusable player link {}", link);
            continue;
        };

        headers.insert("Referer".to_string(), player_url.clone());
        match iframe_from_player(client, &player_url, &headers).await {
            Ok(Some(url)) => {
                iframe_url = Some(url);
                break;
            }
            Ok(None) => debug!("No iframe on {}", player_url),
            Err(e) => {
                debug!("Player {} failed: {}", player_url, e);
                last_error = Some(e);
            }
        }
    }

    let iframe_url = match (iframe_url, last_error) {
        (Some(url), _) => url,
        (None, Some(e)) => return Err(StructureError::AllPlayersFailed(e).into()),
        (None, None) => return Err(StructureError::NoIframe.into()),
    };

    info!("Resolved player iframe {}", iframe_url);
    client.set_iframe_context(&iframe_url).await;
    let iframe = client.get(&iframe_url, &headers).await?;

    Ok(IframePage {
        url: iframe_url,
        body: iframe.body,
        headers,
    })
}
