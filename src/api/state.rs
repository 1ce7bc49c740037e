use std::sync::Arc;

use crate::channel::{ChannelConnector, ChannelCoordinator};
use crate::config::Config;
use crate::engine::{ConcurrencyManager, Engine};
use crate::extract::MediaExtractor;
use crate::media::MediaIntake;
use crate::notify::NotificationSink;
use crate::observability::Metrics;
use crate::store::RecordStore;
use crate::transcode::Transcoder;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<RecordStore>,
    pub engine: Engine,
    pub coordinator: ChannelCoordinator,
    pub intake: MediaIntake,
    pub transcoder: Arc<Transcoder>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Wire the full dependency graph from its injected edges: the record
    /// store, the extraction adapter, the channel connector and the
    /// notification sink.
    pub fn new(
        config: Config,
        store: RecordStore,
        extractor: Arc<dyn MediaExtractor>,
        connector: Arc<dyn ChannelConnector>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(store);
        let concurrency = Arc::new(ConcurrencyManager::new());
        let transcoder = Arc::new(Transcoder::new(config.transcode.clone()));
        let metrics = Arc::new(Metrics::new());

        let engine = Engine::new(
            config.clone(),
            store.clone(),
            extractor,
            concurrency.clone(),
            transcoder.clone(),
            notifier.clone(),
            metrics.clone(),
        );
        let coordinator = ChannelCoordinator::new(
            config.clone(),
            store.clone(),
            concurrency,
            connector,
            transcoder.clone(),
            notifier,
        );
        let intake = MediaIntake::new(config.clone(), store.clone(), transcoder.clone());

        Self {
            config,
            store,
            engine,
            coordinator,
            intake,
            transcoder,
            metrics,
        }
    }
}
