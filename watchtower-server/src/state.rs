//! Shared application state.

use std::sync::Arc;

use watchtower_core::{
    AlertSink, EventStore, MonitorScheduler, PersistedEndpointStats, ProfileService,
    ResilientClient,
};
use watchtower_types::models::AppConfig;

struct AppStateInner {
    config: AppConfig,
    client: Arc<ResilientClient>,
    service: Arc<ProfileService>,
    scheduler: Arc<MonitorScheduler>,
    store: Arc<dyn EventStore>,
}

/// Cheap-to-clone handle shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn EventStore>,
        sink: Arc<dyn AlertSink>,
    ) -> anyhow::Result<Self> {
        let client = Arc::new(
            ResilientClient::new(&config.rate_limit, &config.request)
                .map_err(|e| anyhow::anyhow!("http client init failed: {e}"))?,
        );
        let service = Arc::new(ProfileService::new(Arc::clone(&client), &config));
        let lookup = Arc::clone(&service) as Arc<dyn watchtower_core::ProfileLookup>;
        let scheduler =
            Arc::new(MonitorScheduler::new(lookup, Arc::clone(&store), sink, &config));

        Ok(Self {
            inner: Arc::new(AppStateInner { config, client, service, scheduler, store }),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn client(&self) -> &Arc<ResilientClient> {
        &self.inner.client
    }

    pub fn service(&self) -> &Arc<ProfileService> {
        &self.inner.service
    }

    pub fn scheduler(&self) -> &Arc<MonitorScheduler> {
        &self.inner.scheduler
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.inner.store
    }

    /// Whether `operator` may manage the authorized-user roster.
    pub fn is_owner(&self, operator: i64) -> bool {
        operator == self.inner.config.owner_id
    }

    /// Seed mirror health from stats persisted by a previous run.
    pub async fn restore_endpoint_stats(&self) -> anyhow::Result<usize> {
        let persisted = self.inner.store.load_endpoint_stats().await?;
        let mirrors = self.inner.service.mirrors();
        let mut restored = 0;
        for s in &persisted {
            mirrors.restore_stats(&s.url, s.success_count, s.failure_count, s.avg_response_time);
            restored += 1;
        }
        Ok(restored)
    }

    /// Persist current mirror and proxy stats.
    pub async fn persist_endpoint_stats(&self) -> anyhow::Result<()> {
        let mut stats: Vec<PersistedEndpointStats> = Vec::new();
        for snap in self
            .inner
            .service
            .mirrors()
            .snapshots()
            .into_iter()
            .chain(self.inner.scheduler.proxies().snapshots())
        {
            stats.push(PersistedEndpointStats {
                url: snap.url,
                success_count: snap.success_count,
                failure_count: snap.failure_count,
                avg_response_time: snap.avg_response_time,
            });
        }
        self.inner.store.save_endpoint_stats(&stats).await?;
        Ok(())
    }
}
