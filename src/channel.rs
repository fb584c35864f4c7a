use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

// Most specific first: a manifest URL beats any page URL shape.
static CHANNEL_ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"/premium(\d+)/mono\.m3u8$",
        r"/(?:watch|stream|cast|player)/stream-(\d+)\.php",
        r"watch\.php\?id=(\d+)",
        r"(?:%2F|/)stream-(\d+)\.php",
        r"stream-(\d+)\.php",
    ]
    .iter()
    .map(|p| {
        RegexBuilder::new(p)
            .case_insensitive(true)
            .build()
            .expect("Invalid channel ID pattern")
    })
    .collect()
});

/// Channel ID embedded in a watch page, player page or manifest URL.
pub fn extract_channel_id(url: &str) -> Option<String> {
    CHANNEL_ID_PATTERNS
        .iter()
        .find_map(|re| re.captures(url))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
