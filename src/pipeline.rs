use std::sync::Arc;

use reqwest::StatusCode;

use crate::{
    auth,
    cache::{CacheStore, StreamCache},
    channel::extract_channel_id,
    config::ExtractorConfig,
    domain::DomainResolver,
    error::{ExtractionError, ResolveError, StructureError},
    gate::ChannelGate,
    page_chain,
    params::IframeParams,
    synth::{self, StreamDescriptor},
    transport::{Headers, HttpClient, TransportError},
};

/// How many times an auth failure may drop a stale cache entry and start
/// the chain over.
const AUTH_HEALS: usize = 1;

/// Resolves watch page URLs into [`StreamDescriptor`]s.
///
/// One instance owns the shared connection context, the persistent cache,
/// the resolved base domain and the per-channel locks, so it is meant to
/// be created once and shared (it is `Send + Sync`).
pub struct Extractor {
    config: ExtractorConfig,
    client: Arc<HttpClient>,
    cache: StreamCache,
    gate: ChannelGate,
    domains: DomainResolver,
}

impl Extractor {
    pub fn new(config: ExtractorConfig) -> Result<Self, TransportError> {
        let client = Arc::new(HttpClient::new(&config)?);
        let cache = StreamCache::open(CacheStore::new(config.resolved_cache_path()));
        let domains = DomainResolver::new(config.domain_candidates.clone());

        Ok(Self {
            config,
            client,
            cache,
            gate: ChannelGate::new(),
            domains,
        })
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    pub fn cache(&self) -> &StreamCache {
        &self.cache
    }

    /// Cached descriptor if it still plays, otherwise a fresh resolution.
    /// `force_refresh` skips the cache and re-probes the base domain.
    pub async fn extract(
        &self,
        url: &str,
        force_refresh: bool,
    ) -> Result<StreamDescriptor, ExtractionError> {
        self.try_extract(url, force_refresh)
            .await
            .map_err(ExtractionError::from)
    }

    async fn try_extract(
        &self,
        url: &str,
        force_refresh: bool,
    ) -> Result<StreamDescriptor, ResolveError> {
        let channel_id =
            extract_channel_id(url).ok_or_else(|| ResolveError::InvalidInput(url.to_string()))?;

        if !force_refresh {
            if let Some(cached) = self.validated_cache_hit(url, &channel_id).await {
                return Ok(cached);
            }
        }

        let _guard = self.gate.acquire(&channel_id).await;
        if !force_refresh {
            if let Some(cached) = self.cache.get(&channel_id) {
                debug!("Channel {} was resolved while waiting", channel_id);
                return Ok(cached);
            }
        }

        let base_url = self.domains.resolve(&self.client, None, force_refresh).await;
        self.resolve(&base_url, url, &channel_id).await
    }

    /// A cached entry counts only if its manifest still answers 200.
    /// Anything else drops it.
    async fn validated_cache_hit(&self, url: &str, channel_id: &str) -> Option<StreamDescriptor> {
        let cached = self.cache.get(channel_id)?;

        let status = self
            .client
            .head_status(
                &cached.destination_url,
                &cached.request_headers,
                self.config.validation_timeout,
            )
            .await;

        match status {
            Ok(StatusCode::OK) => {
                info!("Cache hit for channel {}", channel_id);
                self.touch_upstream(url);
                Some(cached)
            }
            Ok(status) => {
                warn!(
                    "Cached stream for channel {} answered {}, invalidating",
                    channel_id, status
                );
                self.cache.remove(channel_id);
                None
            }
            Err(e) => {
                warn!(
                    "Cached stream for channel {} is unreachable, invalidating: {}",
                    channel_id, e
                );
                self.cache.remove(channel_id);
                None
            }
        }
    }

    /// Re-fetches the watch page in the background so the upstream session
    /// stays warm. Result ignored.
    fn touch_upstream(&self, url: &str) {
        let client = self.client.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            if let Err(e) = client.get_once(&url, &Headers::new()).await {
                debug!("Background refresh of {} failed: {}", url, e);
            }
        });
    }

    async fn resolve(
        &self,
        base_url: &str,
        watch_url: &str,
        channel_id: &str,
    ) -> Result<StreamDescriptor, ResolveError> {
        let mut heals_left = AUTH_HEALS;
        loop {
            let err = match self.resolve_once(base_url, watch_url, channel_id).await {
                Ok(descriptor) => return Ok(descriptor),
                Err(e) => e,
            };

            let auth_failed = matches!(err, ResolveError::AuthFailed(_));
            if !auth_failed || heals_left == 0 || !self.cache.remove(channel_id) {
                return Err(err);
            }

            heals_left -= 1;
            warn!(
                "{} for channel {}; dropped its stale cache entry, starting over",
                err, channel_id
            );
        }
    }

    async fn resolve_once(
        &self,
        base_url: &str,
        watch_url: &str,
        channel_id: &str,
    ) -> Result<StreamDescriptor, ResolveError> {
        let iframe = page_chain::walk(&self.client, base_url, watch_url).await?;
        let params = IframeParams::from_html(&iframe.body)?;

        let auth_url = auth::build_auth_url(&params.auth, &params.channel_key)?;
        auth::authenticate(&self.client, &auth_url, &iframe.url, &iframe.headers)
            .await
            .map_err(ResolveError::AuthFailed)?;

        let lookup_path =
            auth::extract_lookup_path(&iframe.body).ok_or(StructureError::NoLookupPath)?;
        let lookup_url = auth::lookup_url(&iframe.url, &lookup_path, &params.channel_key)?;
        let server_key = auth::lookup_server_key(&self.client, &lookup_url, &iframe.headers).await?;
        debug!("Channel {} is served by {}", channel_id, server_key);

        let descriptor = synth::synthesize(
            &server_key,
            &params.channel_key,
            &iframe.url,
            self.client.user_agent(),
            &self.config.delivery_root,
            &self.config.endpoint_tag,
        );
        self.cache.insert(channel_id, descriptor.clone());
        info!(
            "Resolved channel {} to {}",
            channel_id, descriptor.destination_url
        );

        Ok(descriptor)
    }

    /// Drops the cached descriptor for the channel behind `url`. Returns
    /// whether there was one.
    pub fn invalidate(&self, url: &str) -> bool {
        let Some(channel_id) = extract_channel_id(url) else {
            return false;
        };

        let removed = self.cache.remove(&channel_id);
        if removed {
            info!("Invalidated cached stream for channel {}", channel_id);
        }
        removed
    }

    pub async fn close(&self) {
        self.client.close().await;
    }
}
