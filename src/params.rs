use std::sync::LazyLock;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::StructureError;

static CHANNEL_KEY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"const\s+CHANNEL_KEY\s*=\s*"([^"']+)""#,
        r#"channelKey\s*=\s*"([^"']+)""#,
        r#"(?:let|const)\s+channelKey\s*=\s*"([^"']+)""#,
        r#"var\s+channelKey\s*=\s*"([^"']+)""#,
        r#"channel_id\s*:\s*"([^"']+)""#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid channel key pattern"))
    .collect()
});

// Uppercase constants holding a long base64 string.
static AUTH_BLOB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:const|var|let)\s+[A-Z0-9_]+\s*=\s*["']([a-zA-Z0-9+/=]{50,})["']"#).unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthField {
    Host,
    Script,
    Timestamp,
    Nonce,
    Signature,
}

/// Key names each field has been seen under, most common first.
pub const AUTH_FIELD_ALIASES: [(AuthField, &[&str]); 5] = [
    (AuthField::Host, &["host", "b_host", "server", "domain"]),
    (AuthField::Script, &["script", "b_script", "php", "path"]),
    (AuthField::Timestamp, &["ts", "b_ts", "timestamp", "time"]),
    (AuthField::Nonce, &["rnd", "b_rnd", "random", "nonce"]),
    (AuthField::Signature, &["sig", "b_sig", "signature", "sign"]),
];

impl AuthField {
    pub fn name(self) -> &'static str {
        match self {
            AuthField::Host => "host",
            AuthField::Script => "script",
            AuthField::Timestamp => "timestamp",
            AuthField::Nonce => "nonce",
            AuthField::Signature => "signature",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthParams {
    pub host: String,
    pub script: String,
    pub timestamp: String,
    pub nonce: String,
    pub signature: String,
}

impl AuthParams {
    fn set(&mut self, field: AuthField, value: String) {
        match field {
            AuthField::Host => self.host = value,
            AuthField::Script => self.script = value,
            AuthField::Timestamp => self.timestamp = value,
            AuthField::Nonce => self.nonce = value,
            AuthField::Signature => self.signature = value,
        }
    }

    /// All five fields from one decoded blob, or the names of the ones
    /// it lacks. The first alias present in the blob decides the field,
    /// so an empty or `null` value there leaves it missing.
    pub fn from_object(obj: &Map<String, Value>) -> Result<Self, Vec<&'static str>> {
        let mut params = AuthParams::default();
        let mut missing = Vec::new();

        for (field, aliases) in AUTH_FIELD_ALIASES {
            let present = aliases.iter().find_map(|alias| obj.get(*alias));
            match present.and_then(field_value) {
                Some(value) => params.set(field, value),
                None => missing.push(field.name()),
            }
        }

        if missing.is_empty() {
            Ok(params)
        } else {
            Err(missing)
        }
    }
}

/// Strings may themselves be base64 text; numbers are taken as written.
fn field_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(decode_b64_text(s).unwrap_or_else(|| s.clone())),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn decode_b64_text(s: &str) -> Option<String> {
    STANDARD
        .decode(s)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

fn decode_blob(b64: &str) -> Option<Map<String, Value>> {
    let json = decode_b64_text(b64)?;
    match serde_json::from_str(&json).ok()? {
        Value::Object(obj) => Some(obj),
        _ => None,
    }
}

pub fn extract_channel_key(html: &str) -> Option<String> {
    CHANNEL_KEY_PATTERNS
        .iter()
        .find_map(|re| re.captures(html))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// First embedded blob that yields every auth field. On failure, the
/// missing names of the most complete candidate (all five when no blob
/// decoded at all).
pub fn extract_auth_params(html: &str) -> Result<AuthParams, Vec<&'static str>> {
    let all_missing = || AUTH_FIELD_ALIASES.iter().map(|(f, _)| f.name()).collect::<Vec<_>>();
    let mut best: Option<Vec<&'static str>> = None;
    for caps in AUTH_BLOB.captures_iter(html) {
        let Some(obj) = caps.get(1).and_then(|m| decode_blob(m.as_str())) else {
            continue;
        };

        match AuthParams::from_object(&obj) {
            Ok(params) => return Ok(params),
            Err(missing) => {
                if best.as_ref().map_or(true, |b| missing.len() < b.len()) {
                    best = Some(missing);
                }
            }
        }
    }

    Err(best.unwrap_or_else(all_missing))
}

/// Everything the auth handshake needs, pulled from the player iframe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IframeParams {
    pub channel_key: String,
    pub auth: AuthParams,
}

impl IframeParams {
    pub fn from_html(html: &str) -> Result<Self, StructureError> {
        let channel_key = extract_channel_key(html);
        let auth = extract_auth_params(html);

        match (channel_key, auth) {
            (Some(channel_key), Ok(auth)) => Ok(Self { channel_key, auth }),
            (channel_key, auth) => {
                let mut missing = Vec::new();
                if channel_key.is_none() {
                    missing.push("channel_key");
                }
                if let Err(fields) = auth {
                    missing.extend(fields);
                }
                Err(StructureError::MissingParams(missing))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(s: &str) -> String {
        STANDARD.encode(s)
    }

    fn iframe_with(blob_json: &str) -> String {
        format!(
            r#"<script>
            const CHANNEL_KEY = "premium42";
            const XJZ_CFG = "{}";
            </script>"#,
            b64(blob_json)
        )
    }

    fn expected() -> AuthParams {
        AuthParams {
            host: "https://auth.example.net/".into(),
            script: "a.php".into(),
            timestamp: "1712345678".into(),
            nonce: "f3a9c1".into(),
            signature: "abc+/def=".into(),
        }
    }

    #[test]
    fn channel_key_idioms() {
        assert_eq!(extract_channel_key(r#"const CHANNEL_KEY = "premium1";"#).as_deref(), Some("premium1"));
        assert_eq!(extract_channel_key(r#"channelKey="premium2""#).as_deref(), Some("premium2"));
        assert_eq!(extract_channel_key(r#"let channelKey = "premium3";"#).as_deref(), Some("premium3"));
        assert_eq!(extract_channel_key(r#"{ channel_id: "premium4" }"#).as_deref(), Some("premium4"));
        assert_eq!(extract_channel_key("var x = 1;"), None);

        // declaration order in the pattern list wins over document order
        let html = r#"channel_id: "late"; const CHANNEL_KEY = "early";"#;
        assert_eq!(extract_channel_key(html).as_deref(), Some("early"));
    }

    #[test]
    fn alias_permutations_agree() {
        let plain = iframe_with(
            r#"{"host":"https://auth.example.net/","script":"a.php","ts":"1712345678","rnd":"f3a9c1","sig":"abc+/def="}"#,
        );
        let aliased = iframe_with(&format!(
            r#"{{"b_host":"{}","php":"{}","b_ts":"{}","random":"{}","sign":"{}"}}"#,
            b64("https://auth.example.net/"),
            b64("a.php"),
            b64("1712345678"),
            b64("f3a9c1"),
            b64("abc+/def=")
        ));

        assert_eq!(extract_auth_params(&plain), Ok(expected()));
        assert_eq!(extract_auth_params(&aliased), Ok(expected()));
    }

    #[test]
    fn numbers_are_accepted() {
        let html = iframe_with(
            r#"{"domain":"https://auth.example.net/","path":"a.php","time":1712345678,"nonce":"f3a9c1","signature":"abc+/def="}"#,
        );
        assert_eq!(extract_auth_params(&html), Ok(expected()));
    }

    #[test]
    fn incomplete_blob_rejected() {
        let fields = [
            ("host", "\"https://auth.example.net/\""),
            ("script", "\"a.php\""),
            ("ts", "\"1712345678\""),
            ("rnd", "\"f3a9c1\""),
            ("sig", "\"abc+/def=\""),
        ];

        for (skip, (field, _)) in AUTH_FIELD_ALIASES.iter().enumerate() {
            let body = fields
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != skip)
                .map(|(_, (key, value))| format!("\"{}\":{}", key, value))
                .collect::<Vec<_>>()
                .join(",");
            let html = iframe_with(&format!(r#"{{{},"padding":"xxxxxxxxxxxxxxxx"}}"#, body));

            assert_eq!(extract_auth_params(&html), Err(vec![field.name()]), "without {}", fields[skip].0);
        }
    }

    #[test]
    fn first_present_alias_decides() {
        let html = iframe_with(
            r#"{"host":"https://auth.example.net/","script":"a.php","ts":"1712345678","rnd":"f3a9c1","sig":"","sign":"fallbacksig1"}"#,
        );
        assert_eq!(extract_auth_params(&html), Err(vec!["signature"]));

        let html = iframe_with(
            r#"{"host":null,"b_host":"https://auth.example.net/","script":"a.php","ts":"1712345678","rnd":"f3a9c1","sig":"abc+/def="}"#,
        );
        assert_eq!(extract_auth_params(&html), Err(vec!["host"]));
    }

    #[test]
    fn patterns_compile() {
        assert_eq!(CHANNEL_KEY_PATTERNS.len(), 5);
        assert!(AUTH_BLOB.is_match(&iframe_with(r#"{"host":"h","padding":"xxxxxxxxxxxxxxxxxxxxxxxxxx"}"#)));
    }

    #[test]
    fn later_complete_blob_wins() {
        let partial = b64(r#"{"host":"h","script":"s","ts":"1","note":"this blob has no nonce or signature"}"#);
        let complete = b64(
            r#"{"host":"https://auth.example.net/","script":"a.php","ts":"1712345678","rnd":"f3a9c1","sig":"abc+/def="}"#,
        );
        let html = format!(
            r#"var FIRST = "{}"; let NOT_BASE64 = "{}"; const SECOND = '{}';"#,
            partial,
            "!".repeat(60),
            complete
        );
        assert_eq!(extract_auth_params(&html), Ok(expected()));
    }

    #[test]
    fn missing_reported_together() {
        let err = IframeParams::from_html("<html>nothing here</html>").unwrap_err();
        match err {
            StructureError::MissingParams(missing) => assert_eq!(
                missing,
                vec!["channel_key", "host", "script", "timestamp", "nonce", "signature"]
            ),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn full_iframe() {
        let html = iframe_with(
            r#"{"host":"https://auth.example.net/","script":"a.php","ts":"1712345678","rnd":"f3a9c1","sig":"abc+/def="}"#,
        );
        let params = IframeParams::from_html(&html).unwrap();
        assert_eq!(params.channel_key, "premium42");
        assert_eq!(params.auth, expected());
    }
}
