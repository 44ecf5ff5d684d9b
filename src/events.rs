use std::{fmt::Display, sync::Mutex, time::Duration};

use time::OffsetDateTime;
use tokio::{sync::Notify, task::AbortHandle};
use uuid::Uuid;

use crate::db::Db;

/// Worker pool service classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ServiceKind {
    TraktIndexer,
    Scraping,
    Downloader,
    Symlinker,
    Updater,
    PostProcessing,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 6] = [
        ServiceKind::TraktIndexer,
        ServiceKind::Scraping,
        ServiceKind::Downloader,
        ServiceKind::Symlinker,
        ServiceKind::Updater,
        ServiceKind::PostProcessing,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ServiceKind::TraktIndexer => "TraktIndexer",
            ServiceKind::Scraping => "Scraping",
            ServiceKind::Downloader => "Downloader",
            ServiceKind::Symlinker => "Symlinker",
            ServiceKind::Updater => "Updater",
            ServiceKind::PostProcessing => "PostProcessing",
        }
    }
}

impl Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ContentSourceKind {
    Overseerr,
    Mdblist,
    PlexWatchlist,
    SymlinkLibrary,
}

impl ContentSourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            ContentSourceKind::Overseerr => "Overseerr",
            ContentSourceKind::Mdblist => "Mdblist",
            ContentSourceKind::PlexWatchlist => "PlexWatchlist",
            ContentSourceKind::SymlinkLibrary => "SymlinkLibrary",
        }
    }
}

/// Who produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Emitter {
    ContentSource(ContentSourceKind),
    Service(ServiceKind),
    RetryLibrary,
    StateTransition,
    Manual,
}

impl Emitter {
    pub fn is_content_source(&self) -> bool {
        matches!(self, Emitter::ContentSource(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Emitter::ContentSource(kind) => kind.name(),
            Emitter::Service(kind) => kind.name(),
            Emitter::RetryLibrary => "RetryLibrary",
            Emitter::StateTransition => "StateTransition",
            Emitter::Manual => "Manual",
        }
    }
}

impl Display for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub id: Uuid,
    pub emitter: Emitter,
    pub item_id: i64,
    pub run_at: OffsetDateTime,
}

impl Event {
    pub fn new(emitter: Emitter, item_id: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            emitter,
            item_id,
            run_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn scheduled(emitter: Emitter, item_id: i64, run_at: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            emitter,
            item_id,
            run_at,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct EventSnapshot {
    pub id: Uuid,
    pub emitter: &'static str,
    pub item_id: i64,
    pub run_at: String,
    pub status: &'static str,
    pub service: Option<&'static str>,
}

#[derive(Debug)]
struct RunningJob {
    event: Event,
    service: ServiceKind,
    abort: AbortHandle,
}

#[derive(Debug, Default)]
struct BusInner {
    queued: Vec<Event>,
    running: Vec<Event>,
    jobs: Vec<RunningJob>,
}

/// The central coordinator. Guarantees at most one queued or running event
/// per item tree; everything else is rejected at admission.
#[derive(Debug)]
pub struct EventBus {
    db: Db,
    inner: Mutex<BusInner>,
    notify: Notify,
}

impl EventBus {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            inner: Mutex::new(BusInner::default()),
            notify: Notify::new(),
        }
    }

    /// Admit an event unless its item, or any ancestor or descendant of it,
    /// is already queued or running. Rejection is silent.
    pub async fn add_event(&self, event: Event) -> bool {
        let related = match self.db.related_ids(event.item_id).await {
            Ok(related) => related,
            Err(e) => {
                tracing::error!("Failed to resolve related ids for admission: {e}");
                vec![event.item_id]
            }
        };
        let mut inner = self.inner.lock().unwrap();
        let conflict = inner
            .queued
            .iter()
            .chain(inner.running.iter())
            .any(|existing| related.contains(&existing.item_id));
        if conflict {
            tracing::debug!(
                item_id = event.item_id,
                "Item or relative already queued or running, skipping"
            );
            return false;
        }
        inner.queued.push(event);
        drop(inner);
        // a stored permit keeps the admission visible even when the
        // consumer is between its queue check and the wait
        self.notify.notify_one();
        true
    }

    /// Block until the earliest due event is ready and return it. FIFO on
    /// `run_at` ties by arrival order.
    pub async fn next(&self) -> Event {
        loop {
            let wait = {
                let mut inner = self.inner.lock().unwrap();
                inner.queued.sort_by_key(|event| event.run_at);
                match inner.queued.first() {
                    Some(event) => {
                        let now = OffsetDateTime::now_utc();
                        if event.run_at <= now {
                            return inner.queued.remove(0);
                        }
                        let delta = event.run_at - now;
                        Some(Duration::try_from(delta).unwrap_or(Duration::from_secs(1)))
                    }
                    None => None,
                }
            };
            match wait {
                Some(duration) => {
                    tokio::select! {
                        _ = tokio::time::sleep(duration) => {}
                        _ = self.notify.notified() => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    pub fn mark_running(&self, event: Event) {
        self.inner.lock().unwrap().running.push(event);
    }

    pub fn register_job(&self, event: Event, service: ServiceKind, abort: AbortHandle) {
        self.inner.lock().unwrap().jobs.push(RunningJob {
            event,
            service,
            abort,
        });
    }

    /// Remove an event from the running set and drop its job handle.
    pub fn complete(&self, event_id: Uuid) {
        let mut inner = self.inner.lock().unwrap();
        inner.running.retain(|event| event.id != event_id);
        inner.jobs.retain(|job| job.event.id != event_id);
        drop(inner);
        self.notify.notify_one();
    }

    /// Drop queued and running events across the item's tree and abort any
    /// in-flight job. Blocking provider I/O finishes on its own but yielded
    /// results are discarded.
    pub async fn cancel_job(&self, item_id: i64) {
        let related = match self.db.related_ids(item_id).await {
            Ok(related) => related,
            Err(e) => {
                tracing::error!("Failed to resolve related ids for cancellation: {e}");
                vec![item_id]
            }
        };
        let mut inner = self.inner.lock().unwrap();
        inner.queued.retain(|event| !related.contains(&event.item_id));
        inner.running.retain(|event| !related.contains(&event.item_id));
        inner.jobs.retain(|job| {
            if related.contains(&job.event.item_id) {
                job.abort.abort();
                false
            } else {
                true
            }
        });
    }

    pub fn contains(&self, item_id: i64) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .queued
            .iter()
            .chain(inner.running.iter())
            .any(|event| event.item_id == item_id)
    }

    /// Current queue contents for the admin API.
    pub fn snapshot(&self) -> Vec<EventSnapshot> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::with_capacity(inner.queued.len() + inner.running.len());
        for event in &inner.queued {
            out.push(EventSnapshot {
                id: event.id,
                emitter: event.emitter.name(),
                item_id: event.item_id,
                run_at: event.run_at.to_string(),
                status: "queued",
                service: None,
            });
        }
        for event in &inner.running {
            let service = inner
                .jobs
                .iter()
                .find(|job| job.event.id == event.id)
                .map(|job| job.service.name());
            out.push(EventSnapshot {
                id: event.id,
                emitter: event.emitter.name(),
                item_id: event.item_id,
                run_at: event.run_at.to_string(),
                status: "running",
                service,
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use time::Duration as TimeDuration;

    use crate::{
        db::Db,
        item::{ItemMeta, MediaItem, Movie},
    };

    use super::*;

    async fn bus_with_items() -> (EventBus, i64, i64, i64) {
        let db = Db::connect_memory().await.unwrap();
        let mut show = crate::db::tests_support::show_tree("tt0000001", &[(1, &[1])]);
        let show_id = db.upsert(&mut show).await.unwrap();
        let MediaItem::Show(tree) = &show else {
            panic!()
        };
        let season_id = tree.seasons[0].meta.id.unwrap();
        let mut movie = MediaItem::Movie(Movie {
            meta: ItemMeta {
                imdb_id: Some("tt0000002".into()),
                requested_by: Some("test".into()),
                ..Default::default()
            },
        });
        let movie_id = db.upsert(&mut movie).await.unwrap();
        (EventBus::new(db), show_id, season_id, movie_id)
    }

    #[tokio::test]
    async fn add_event_is_idempotent_per_tree() {
        let (bus, show_id, season_id, _) = bus_with_items().await;
        assert!(bus.add_event(Event::new(Emitter::Manual, show_id)).await);
        // same item
        assert!(!bus.add_event(Event::new(Emitter::Manual, show_id)).await);
        // descendant of a queued item
        assert!(!bus.add_event(Event::new(Emitter::Manual, season_id)).await);

        let event = bus.next().await;
        assert_eq!(event.item_id, show_id);
        // queue drained, admission opens again
        assert!(bus.add_event(Event::new(Emitter::Manual, show_id)).await);
    }

    #[tokio::test]
    async fn running_blocks_ancestors() {
        let (bus, show_id, season_id, _) = bus_with_items().await;
        bus.mark_running(Event::new(Emitter::Service(ServiceKind::Scraping), season_id));
        assert!(!bus.add_event(Event::new(Emitter::Manual, show_id)).await);
        assert!(bus.add_event(Event::new(Emitter::Manual, i64::MAX)).await);
    }

    #[tokio::test]
    async fn unrelated_items_are_admitted() {
        let (bus, show_id, _, movie_id) = bus_with_items().await;
        assert!(bus.add_event(Event::new(Emitter::Manual, show_id)).await);
        assert!(bus.add_event(Event::new(Emitter::Manual, movie_id)).await);
    }

    #[tokio::test]
    async fn future_events_wait_for_run_at() {
        let (bus, _, _, movie_id) = bus_with_items().await;
        let run_at = OffsetDateTime::now_utc() + TimeDuration::seconds(30);
        bus.add_event(Event::scheduled(Emitter::StateTransition, movie_id, run_at))
            .await;
        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), bus.next()).await;
        assert!(result.is_err(), "future dated event must not dispatch yet");
    }

    #[tokio::test]
    async fn earliest_run_at_dispatches_first() {
        let (bus, show_id, _, movie_id) = bus_with_items().await;
        let now = OffsetDateTime::now_utc();
        bus.add_event(Event::scheduled(Emitter::Manual, movie_id, now))
            .await;
        bus.add_event(Event::scheduled(
            Emitter::Manual,
            show_id,
            now - TimeDuration::seconds(5),
        ))
        .await;
        assert_eq!(bus.next().await.item_id, show_id);
        assert_eq!(bus.next().await.item_id, movie_id);
    }

    #[tokio::test]
    async fn cancel_clears_tree() {
        let (bus, show_id, season_id, _) = bus_with_items().await;
        bus.add_event(Event::new(Emitter::Manual, season_id)).await;
        bus.cancel_job(show_id).await;
        assert!(!bus.contains(season_id));
        assert!(bus.add_event(Event::new(Emitter::Manual, show_id)).await);
    }
}
