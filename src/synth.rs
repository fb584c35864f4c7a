use serde::{Deserialize, Serialize};
use url::Url;

use crate::transport::{is_delivery_host, origin_of, Headers};

/// Server key that lives on a fixed CDN path instead of a per-key host.
const FIXED_CDN_KEY: &str = "top1/cdn";

/// A playable manifest and the headers a player must send to fetch it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub destination_url: String,
    pub request_headers: Headers,
    #[serde(alias = "mediaflow_endpoint")]
    pub endpoint_tag: String,
}

pub fn manifest_url(server_key: &str, channel_key: &str, delivery_root: &str) -> String {
    if server_key == FIXED_CDN_KEY {
        return format!(
            "https://top1.{}/{}/{}/mono.m3u8",
            delivery_root, FIXED_CDN_KEY, channel_key
        );
    }

    if let Some((domain, _)) = server_key.split_once('/') {
        return format!(
            "https://{}.{}/{}/{}/mono.m3u8",
            domain, delivery_root, server_key, channel_key
        );
    }

    // upstream names the top2 edge "top1new"
    format!(
        "https://{}new.{}/{}/{}/mono.m3u8",
        server_key, delivery_root, server_key, channel_key
    )
    .replace("top2new", "top1new")
}

/// Headers for the manifest. Delivery hosts want the full iframe URL as
/// referer; anything else gets the iframe origin for both.
pub fn stream_headers(
    manifest_url: &str,
    iframe_url: &str,
    user_agent: &str,
    delivery_root: &str,
) -> Headers {
    let iframe_origin = origin_of(iframe_url).unwrap_or_else(|| iframe_url.to_string());
    let on_delivery_host = Url::parse(manifest_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| is_delivery_host(h, delivery_root)))
        .unwrap_or(false);

    let referer = if on_delivery_host {
        iframe_url.to_string()
    } else {
        iframe_origin.clone()
    };

    let mut headers = Headers::new();
    headers.insert("User-Agent".to_string(), user_agent.to_string());
    headers.insert("Referer".to_string(), referer);
    headers.insert("Origin".to_string(), iframe_origin);
    headers
}

pub fn synthesize(
    server_key: &str,
    channel_key: &str,
    iframe_url: &str,
    user_agent: &str,
    delivery_root: &str,
    endpoint_tag: &str,
) -> StreamDescriptor {
    let destination_url = manifest_url(server_key, channel_key, delivery_root);
    let request_headers = stream_headers(&destination_url, iframe_url, user_agent, delivery_root);

    StreamDescriptor {
        destination_url,
        request_headers,
        endpoint_tag: endpoint_tag.to_string(),
    }
}
