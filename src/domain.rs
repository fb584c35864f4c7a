use tokio::sync::RwLock;

use crate::transport::{Headers, HttpClient};

/// Finds which of the mirror domains is currently alive and remembers it
/// for the life of the process.
#[derive(Debug)]
pub struct DomainResolver {
    candidates: Vec<String>,
    resolved: RwLock<Option<String>>,
}

impl DomainResolver {
    pub fn new(candidates: Vec<String>) -> Self {
        Self {
            candidates,
            resolved: RwLock::new(None),
        }
    }

    pub async fn cached(&self) -> Option<String> {
        self.resolved.read().await.clone()
    }

    /// Base URL ending in `/`. Probes each candidate once, `preferred`
    /// first, and keeps the post-redirect URL of the first one that answers.
    /// Never fails: with every probe down the first candidate is used as is.
    pub async fn resolve(&self, client: &HttpClient, preferred: Option<&str>, force: bool) -> String {
        if !force {
            if let Some(base) = self.cached().await {
                return base;
            }
        }

        let candidates = preferred
            .into_iter()
            .chain(self.candidates.iter().map(String::as_str));

        for candidate in candidates {
            match client.get_once(candidate, &Headers::new()).await {
                Ok(page) => {
                    let base = with_trailing_slash(page.final_url);
                    info!("Using base domain {}", base);
                    *self.resolved.write().await = Some(base.clone());
                    return base;
                }
                Err(e) => debug!("Domain {} is not usable: {}", candidate, e),
            }
        }

        let fallback = self.candidates.first().cloned().unwrap_or_default();
        warn!("No candidate domain answered, falling back to {}", fallback);
        *self.resolved.write().await = Some(fallback.clone());
        fallback
    }
}

fn with_trailing_slash(mut url: String) -> String {
    if !url.ends_with('/') {
        url.push('/');
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractorConfig;

    async fn dead_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}/", addr)
    }

    async fn live_url() -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                    .await;
            }
        });
        format!("http://{}", addr)
    }

    #[test]
    fn slash_normalization() {
        assert_eq!(with_trailing_slash("https://a.b".into()), "https://a.b/");
        assert_eq!(with_trailing_slash("https://a.b/".into()), "https://a.b/");
    }

    #[tokio::test]
    async fn all_down_falls_back_to_first() {
        let client = HttpClient::new(&ExtractorConfig::default()).unwrap();
        let first = dead_url().await;
        let second = dead_url().await;
        let resolver = DomainResolver::new(vec![first.clone(), second]);

        assert_eq!(resolver.resolve(&client, None, false).await, first);
        assert_eq!(resolver.cached().await, Some(first));
    }

    #[tokio::test]
    async fn preferred_probed_first() {
        let client = HttpClient::new(&ExtractorConfig::default()).unwrap();
        let live = live_url().await;
        let resolver = DomainResolver::new(vec![dead_url().await]);

        let base = resolver.resolve(&client, Some(&live), false).await;
        assert_eq!(base, format!("{}/", live));
        assert_eq!(resolver.cached().await, Some(base));
    }

    #[tokio::test]
    async fn cached_until_forced() {
        let client = HttpClient::new(&ExtractorConfig::default()).unwrap();
        let resolver = DomainResolver::new(vec![dead_url().await]);
        *resolver.resolved.write().await = Some("https://cached.example/".to_string());

        assert_eq!(
            resolver.resolve(&client, None, false).await,
            "https://cached.example/"
        );
        assert_ne!(
            resolver.resolve(&client, None, true).await,
            "https://cached.example/"
        );
    }
}
