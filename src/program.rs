use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    app_state::AppError,
    cache::HashCache,
    config::{self, CONFIG},
    content::{mdblist::Mdblist, overseerr::Overseerr, plex_watchlist::PlexWatchlist, ContentSource},
    db::Db,
    downloaders::Downloader,
    events::{ContentSourceKind, Emitter, Event, EventBus, ServiceKind},
    indexer::TraktIndexer,
    item::{MediaItem, MediaKind},
    scrapers::Scraping,
    symlinker::{SymlinkLibrary, Symlinker},
    transition::{self, ProcessedEvent},
    updater::Updater,
};

const RATE_LIMIT_RETRY: Duration = Duration::from_secs(60);
const RETRY_SWEEP_BATCH: i64 = 1000;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub initialized: bool,
}

/// Everything that can act on an item, constructed and validated together.
pub struct Services {
    pub indexer: TraktIndexer,
    pub scraping: Scraping,
    pub downloader: Downloader,
    pub symlinker: Symlinker,
    pub updater: Updater,
    pub content_sources: Vec<Box<dyn ContentSource>>,
}

impl Services {
    pub async fn construct(cache: &'static HashCache) -> Self {
        let content_sources: Vec<Box<dyn ContentSource>> = vec![
            Box::new(Overseerr::new()),
            Box::new(Mdblist::new()),
            Box::new(PlexWatchlist::new()),
        ];
        if !content_sources.iter().any(|source| source.initialized()) {
            tracing::warn!("No content services initialized, items need to be added manually.");
        }
        Self {
            indexer: TraktIndexer::new(),
            scraping: Scraping::new(cache),
            downloader: Downloader::new(cache).await,
            symlinker: Symlinker::new(cache),
            updater: Updater::new(),
            content_sources,
        }
    }

    /// The pipeline cannot move items without these.
    pub fn core_ready(&self) -> bool {
        self.scraping.validate()
            && self.downloader.validate()
            && self.indexer.initialized()
            && self.symlinker.initialized()
            && self.updater.initialized()
    }

    pub fn statuses(&self) -> Vec<ServiceStatus> {
        let mut out = vec![
            ServiceStatus {
                name: ServiceKind::TraktIndexer.name().to_string(),
                initialized: self.indexer.initialized(),
            },
            ServiceStatus {
                name: ServiceKind::Scraping.name().to_string(),
                initialized: self.scraping.initialized(),
            },
            ServiceStatus {
                name: ServiceKind::Downloader.name().to_string(),
                initialized: self.downloader.initialized(),
            },
            ServiceStatus {
                name: ServiceKind::Symlinker.name().to_string(),
                initialized: self.symlinker.initialized(),
            },
            ServiceStatus {
                name: ServiceKind::Updater.name().to_string(),
                initialized: self.updater.initialized(),
            },
        ];
        for source in &self.content_sources {
            out.push(ServiceStatus {
                name: source.kind().name().to_string(),
                initialized: source.initialized(),
            });
        }
        out
    }

    async fn run_service(
        &self,
        service: ServiceKind,
        item: MediaItem,
    ) -> Result<Vec<MediaItem>, AppError> {
        match service {
            ServiceKind::TraktIndexer => self.indexer.run(item).await,
            ServiceKind::Scraping => self.scraping.run(item).await,
            ServiceKind::Downloader => self.downloader.run(item).await,
            ServiceKind::Symlinker => self.symlinker.run(item).await,
            ServiceKind::Updater => self.updater.run(item).await,
            ServiceKind::PostProcessing => {
                // subtitle handling lives behind an external provider; the
                // core only records that the item went through
                let mut item = item;
                item.meta_mut().postprocessed = true;
                Ok(vec![item])
            }
        }
    }
}

#[derive(Debug)]
struct JobOutcome {
    event: Event,
    service: ServiceKind,
    origin: Option<(i64, MediaKind)>,
    result: Result<Vec<MediaItem>, AppError>,
}

/// The long running orchestrator: consumes bus events, applies the state
/// machine and fans work out to per service worker pools.
pub struct Program {
    pub db: &'static Db,
    pub cache: &'static HashCache,
    pub bus: &'static EventBus,
    services: RwLock<Services>,
    pools: HashMap<ServiceKind, Arc<Semaphore>>,
    pub tracker: TaskTracker,
    outcome_tx: mpsc::Sender<JobOutcome>,
    outcome_rx: std::sync::Mutex<Option<mpsc::Receiver<JobOutcome>>>,
    token: CancellationToken,
}

impl Program {
    pub async fn new(
        db: &'static Db,
        cache: &'static HashCache,
        bus: &'static EventBus,
        token: CancellationToken,
    ) -> Self {
        let services = Services::construct(cache).await;
        let mut pools = HashMap::new();
        for kind in ServiceKind::ALL {
            let workers = config::max_workers(kind.name());
            if workers > 1 {
                tracing::info!("{} runs with {workers} workers", kind.name());
            }
            pools.insert(kind, Arc::new(Semaphore::new(workers)));
        }
        let (outcome_tx, outcome_rx) = mpsc::channel(256);
        Self {
            db,
            cache,
            bus,
            services: RwLock::new(services),
            pools,
            tracker: TaskTracker::new(),
            outcome_tx,
            outcome_rx: std::sync::Mutex::new(Some(outcome_rx)),
            token,
        }
    }

    pub async fn service_statuses(&self) -> Vec<ServiceStatus> {
        self.services.read().await.statuses()
    }

    pub async fn content_source_intervals(&self) -> Vec<(ContentSourceKind, Duration)> {
        self.services
            .read()
            .await
            .content_sources
            .iter()
            .filter(|source| source.initialized())
            .map(|source| (source.kind(), source.update_interval()))
            .collect()
    }

    pub fn symlink_repair_interval(&self) -> Option<Duration> {
        if !CONFIG.get_value::<config::SymlinkRepairEnabled>().0 {
            return None;
        }
        let hours = CONFIG.get_value::<config::SymlinkRepairInterval>().0;
        Some(Duration::from_secs(hours * 3600))
    }

    /// Reconcile the store from the on-disk library when starting fresh.
    pub async fn boot(&self) -> anyhow::Result<()> {
        if !self.db.is_empty().await? {
            let stats = self.db.stats().await?;
            tracing::info!(
                "Movies: {} Shows: {} Seasons: {} Episodes: {} Total: {}",
                stats.movies,
                stats.shows,
                stats.seasons,
                stats.episodes,
                stats.total
            );
            return Ok(());
        }
        let items = {
            let services = self.services.read().await;
            if !services.symlinker.initialized() {
                return Ok(());
            }
            SymlinkLibrary::new(services.symlinker.library_path()).scan()
        };
        if items.is_empty() {
            return Ok(());
        }
        tracing::info!(
            "Collecting {} items from symlinks, this may take a while",
            items.len()
        );
        for mut item in items {
            item.store_state();
            match self.db.upsert(&mut item).await {
                Ok(id) => {
                    self.bus
                        .add_event(Event::new(
                            Emitter::ContentSource(ContentSourceKind::SymlinkLibrary),
                            id,
                        ))
                        .await;
                }
                Err(e) => tracing::error!("Failed to store {}: {e}", item.log_string()),
            }
        }
        Ok(())
    }

    /// Main loop. Idles loudly when no scraper or downloader is configured
    /// and comes back once the configuration changes.
    pub async fn run(&'static self) {
        let mut outcome_rx = self
            .outcome_rx
            .lock()
            .unwrap()
            .take()
            .expect("program runs once");
        loop {
            if !self.services.read().await.core_ready() {
                tracing::error!("----------------------------------------------");
                tracing::error!("Waiting for configuration before processing items!");
                tracing::error!("----------------------------------------------");
                tokio::select! {
                    _ = self.token.cancelled() => return,
                    _ = CONFIG.changed() => {
                        self.rebuild_services().await;
                        continue;
                    }
                }
            }
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = CONFIG.changed() => {
                    self.rebuild_services().await;
                }
                Some(outcome) = outcome_rx.recv() => {
                    self.handle_outcome(outcome).await;
                }
                event = self.bus.next() => {
                    self.dispatch(event).await;
                }
            }
        }
    }

    async fn rebuild_services(&self) {
        tracing::info!("Configuration changed, re-validating services");
        let new_services = Services::construct(self.cache).await;
        *self.services.write().await = new_services;
    }

    /// One queued event: look the item up, run the transition and route the
    /// results.
    async fn dispatch(&'static self, event: Event) {
        self.bus.mark_running(event.clone());
        let item = match self.db.get_by_id(event.item_id).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                tracing::debug!("Event for removed item {}, dropping", event.item_id);
                self.bus.complete(event.id);
                return;
            }
            Err(e) => {
                tracing::error!("Failed to load item for event: {e}");
                self.bus.complete(event.id);
                return;
            }
        };
        let processed = transition::process_event(Some(&item), event.emitter, &item);
        self.bus.complete(event.id);
        self.route(processed).await;
    }

    /// Persist the canonical copy and move submissions onwards, either into
    /// a worker pool or back onto the bus.
    async fn route(&'static self, processed: ProcessedEvent) {
        let ProcessedEvent {
            updated_item,
            next_service,
            items_to_submit,
            deferred,
        } = processed;
        if let Some(mut updated) = updated_item {
            updated.store_state();
            if let Err(e) = self.db.upsert(&mut updated).await {
                tracing::error!("Failed to persist {}: {e}", updated.log_string());
            }
        }
        for (mut deferred_item, run_at) in deferred {
            let Some(id) = self.ensure_stored(&mut deferred_item).await else {
                continue;
            };
            self.bus
                .add_event(Event::scheduled(Emitter::StateTransition, id, run_at))
                .await;
        }
        match next_service {
            Some(service) => {
                for item in items_to_submit {
                    self.submit_job(service, item).await;
                }
            }
            None => {
                for mut item in items_to_submit {
                    let Some(id) = self.ensure_stored(&mut item).await else {
                        continue;
                    };
                    self.bus
                        .add_event(Event::new(Emitter::StateTransition, id))
                        .await;
                }
            }
        }
    }

    async fn ensure_stored(&self, item: &mut MediaItem) -> Option<i64> {
        if let Some(id) = item.id() {
            return Some(id);
        }
        match self.db.upsert(item).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!("Failed to store {}: {e}", item.log_string());
                None
            }
        }
    }

    /// Hand the item to the service's bounded pool. The fresh store copy is
    /// reloaded inside the job so concurrent passes never act on stale
    /// trees.
    async fn submit_job(&'static self, service: ServiceKind, mut item: MediaItem) {
        let Some(id) = self.ensure_stored(&mut item).await else {
            return;
        };
        let event = Event::new(Emitter::Service(service), id);
        tracing::debug!(
            "Submitting {} to {} ({})",
            item.log_string(),
            service,
            event.id
        );
        self.bus.mark_running(event.clone());
        let semaphore = self
            .pools
            .get(&service)
            .cloned()
            .expect("every service kind has a pool");
        let outcome_tx = self.outcome_tx.clone();
        let job_event = event.clone();
        let handle = self.tracker.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let fresh = match self.db.get_by_id(id).await {
                Ok(Some(fresh)) => fresh,
                _ => {
                    let _ = outcome_tx
                        .send(JobOutcome {
                            event: job_event,
                            service,
                            origin: None,
                            result: Ok(Vec::new()),
                        })
                        .await;
                    return;
                }
            };
            let origin = Some((id, fresh.kind()));
            // the service runs in its own task so a panic surfaces as a
            // failed outcome instead of leaking the running-set entry
            let inner = tokio::spawn(async move {
                let services = self.services.read().await;
                services.run_service(service, fresh).await
            });
            let result = match inner.await {
                Ok(result) => result,
                Err(e) => Err(AppError::internal_error(format!(
                    "service task died: {e}"
                ))),
            };
            let _ = outcome_tx
                .send(JobOutcome {
                    event: job_event,
                    service,
                    origin,
                    result,
                })
                .await;
        });
        self.bus.register_job(event, service, handle.abort_handle());
    }

    /// Completion handler: remove the event from the running set and feed
    /// every yielded item back through the state machine.
    async fn handle_outcome(&'static self, outcome: JobOutcome) {
        self.bus.complete(outcome.event.id);
        match outcome.result {
            Ok(items) => {
                for item in items {
                    // the indexer settles the real type of placeholder
                    // requests; drop the stale row when it changed
                    if outcome.service == ServiceKind::TraktIndexer {
                        if let Some((origin_id, origin_kind)) = outcome.origin {
                            if item.kind() != origin_kind {
                                if let Err(e) = self.db.remove(origin_id).await {
                                    tracing::error!("Failed to drop re-typed item: {e}");
                                }
                            }
                        }
                    }
                    let existing = self.load_existing(&item).await;
                    let processed = transition::process_event(
                        existing.as_ref(),
                        Emitter::Service(outcome.service),
                        &item,
                    );
                    self.route(processed).await;
                }
                tracing::debug!("Service {} executed", outcome.service);
            }
            Err(e) if e.is_rate_limit() => {
                tracing::warn!("{} was rate limited, rescheduling", outcome.service);
                let run_at = time::OffsetDateTime::now_utc() + RATE_LIMIT_RETRY;
                self.bus
                    .add_event(Event::scheduled(
                        Emitter::StateTransition,
                        outcome.event.item_id,
                        run_at,
                    ))
                    .await;
            }
            Err(e) => {
                // the retry sweep will pick the item up again
                tracing::error!("Service {} failed: {e}", outcome.service);
            }
        }
    }

    async fn load_existing(&self, item: &MediaItem) -> Option<MediaItem> {
        if let Some(id) = item.id() {
            if let Ok(existing) = self.db.get_by_id(id).await {
                return existing;
            }
        }
        if let Some(imdb) = item.imdb_id() {
            if matches!(item.kind(), MediaKind::Movie | MediaKind::Show) {
                if let Ok(existing) = self.db.get_by_imdb(imdb).await {
                    return existing;
                }
            }
        }
        None
    }

    /// Content source tick: store unknown items and put them on the bus.
    pub async fn poll_content_source(&'static self, kind: ContentSourceKind) {
        let fetched = {
            let services = self.services.read().await;
            let Some(source) = services
                .content_sources
                .iter()
                .find(|source| source.kind() == kind)
            else {
                return;
            };
            if !source.initialized() {
                return;
            }
            source.fetch().await
        };
        let items = match fetched {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!("{} poll failed: {e}", kind.name());
                return;
            }
        };
        let mut added = 0usize;
        for mut item in items {
            let Some(imdb) = item.imdb_id().map(str::to_string) else {
                continue;
            };
            match self.db.get_by_imdb(&imdb).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!("Store lookup failed: {e}");
                    continue;
                }
            }
            item.store_state();
            let Ok(id) = self.db.upsert(&mut item).await else {
                continue;
            };
            if self
                .bus
                .add_event(Event::new(Emitter::ContentSource(kind), id))
                .await
            {
                added += 1;
            }
        }
        if added > 0 {
            tracing::info!("Added {added} items from {}", kind.name());
        }
    }

    /// Re-queue everything that is neither Completed nor Unreleased.
    pub async fn retry_library(&'static self) {
        let count = match self.db.count_retryable().await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!("Retry sweep count failed: {e}");
                return;
            }
        };
        if count == 0 {
            return;
        }
        tracing::info!("Starting retry process for {count} items");
        let mut offset = 0;
        loop {
            let ids = match self.db.retryable_ids(RETRY_SWEEP_BATCH, offset).await {
                Ok(ids) => ids,
                Err(e) => {
                    tracing::error!("Retry sweep batch failed: {e}");
                    return;
                }
            };
            if ids.is_empty() {
                break;
            }
            offset += ids.len() as i64;
            for id in ids {
                self.bus.add_event(Event::new(Emitter::RetryLibrary, id)).await;
            }
        }
    }

    /// Daily housekeeping: store vacuum and stale log files.
    pub async fn maintenance(&self) {
        if let Err(e) = self.db.vacuum_analyze().await {
            tracing::error!("Store maintenance failed: {e}");
        }
        let logs_dir = config::AppResources::logs_dir();
        let cutoff = std::time::SystemTime::now() - Duration::from_secs(7 * 24 * 3600);
        if let Ok(entries) = std::fs::read_dir(logs_dir) {
            for entry in entries.flatten() {
                let stale = entry
                    .metadata()
                    .and_then(|metadata| metadata.modified())
                    .map(|modified| modified < cutoff)
                    .unwrap_or(false);
                if stale {
                    let _ = std::fs::remove_file(entry.path());
                }
            }
        }
    }

    pub async fn repair_symlinks(&self) {
        let services = self.services.read().await;
        if !services.symlinker.initialized() {
            return;
        }
        match services.symlinker.repair_broken_symlinks().await {
            Ok(0) => {}
            Ok(removed) => tracing::info!("Removed {removed} broken symlinks"),
            Err(e) => tracing::error!("Symlink repair sweep failed: {e}"),
        }
    }
}
