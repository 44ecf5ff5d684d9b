use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use notify::{RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    db::Db,
    events::EventBus,
    item::MediaItem,
    utils::{imdb_from_segment, season_episode_from_name},
};

const DEBOUNCE_WINDOW: Duration = Duration::from_secs(2);

/// What a deleted library path means for the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalAction {
    WholeTree {
        imdb_id: String,
    },
    Season {
        imdb_id: String,
        season: i64,
    },
    Episode {
        imdb_id: String,
        season: i64,
        episode: i64,
    },
}

impl RemovalAction {
    /// Derive the action from the deleted path's segments. Anything outside
    /// the four known roots or without an imdb marker is ignored.
    pub fn from_path(library_path: &Path, deleted: &Path) -> Option<RemovalAction> {
        let relative = deleted.strip_prefix(library_path).ok()?;
        let segments: Vec<String> = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy().to_string())
            .collect();
        if segments.len() < 2 {
            return None;
        }
        if !matches!(
            segments[0].as_str(),
            "movies" | "shows" | "anime_movies" | "anime_shows"
        ) {
            return None;
        }
        let imdb_id = imdb_from_segment(&segments[1])?;
        match segments.len() {
            // the whole item folder is gone
            2 => Some(RemovalAction::WholeTree { imdb_id }),
            3 => {
                if let Some(rest) = segments[2].strip_prefix("Season ") {
                    let season = rest.trim().parse().ok()?;
                    Some(RemovalAction::Season { imdb_id, season })
                } else {
                    // a movie folder holds exactly one file
                    Some(RemovalAction::WholeTree { imdb_id })
                }
            }
            _ => {
                let (season, episode) = season_episode_from_name(&segments[3])?;
                Some(RemovalAction::Episode {
                    imdb_id,
                    season,
                    episode,
                })
            }
        }
    }

    pub async fn apply(&self, db: &Db, bus: &EventBus) -> anyhow::Result<()> {
        let imdb_id = match self {
            RemovalAction::WholeTree { imdb_id }
            | RemovalAction::Season { imdb_id, .. }
            | RemovalAction::Episode { imdb_id, .. } => imdb_id,
        };
        let Some(tree) = db.get_by_imdb(imdb_id).await? else {
            return Ok(());
        };
        let root_id = tree
            .id()
            .ok_or_else(|| anyhow::anyhow!("stored tree has no id"))?;
        bus.cancel_job(root_id).await;

        match self {
            RemovalAction::WholeTree { .. } => {
                tracing::info!("Removing {} from the library", tree.log_string());
                db.remove(root_id).await?;
            }
            RemovalAction::Season { season, .. } => {
                let MediaItem::Show(show) = &tree else {
                    return Ok(());
                };
                let Some(season) = show.seasons.iter().find(|s| s.number == *season) else {
                    return Ok(());
                };
                let Some(season_id) = season.meta.id else {
                    return Ok(());
                };
                tracing::info!(
                    "Removing {} S{:02} from the library",
                    tree.log_string(),
                    season.number
                );
                db.remove(season_id).await?;
                self.refresh_remaining(db, imdb_id).await?;
            }
            RemovalAction::Episode {
                season, episode, ..
            } => {
                let MediaItem::Show(show) = &tree else {
                    return Ok(());
                };
                let Some(found) = show
                    .seasons
                    .iter()
                    .find(|s| s.number == *season)
                    .and_then(|s| s.episodes.iter().find(|e| e.number == *episode))
                else {
                    return Ok(());
                };
                let Some(episode_id) = found.meta.id else {
                    return Ok(());
                };
                tracing::info!(
                    "Removing {} S{:02}E{:02} from the library",
                    tree.log_string(),
                    season,
                    episode
                );
                db.remove(episode_id).await?;
                self.refresh_remaining(db, imdb_id).await?;
            }
        }
        Ok(())
    }

    /// Sibling removal changes the parent aggregates; refresh the cached
    /// states of what is left.
    async fn refresh_remaining(&self, db: &Db, imdb_id: &str) -> anyhow::Result<()> {
        if let Some(mut remaining) = db.get_by_imdb(imdb_id).await? {
            remaining.store_state();
            db.save_last_state(&remaining).await?;
        }
        Ok(())
    }
}

/// Watches the library tree for symlink deletions and prunes the store.
/// Failures here never reach the scheduler.
pub fn spawn(
    library_path: PathBuf,
    db: &'static Db,
    bus: &'static EventBus,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel::<notify::Event>(256);
    let mut watcher =
        notify::recommended_watcher(move |result: Result<notify::Event, notify::Error>| {
            match result {
                Ok(event) => {
                    if matches!(event.kind, notify::EventKind::Remove(_)) {
                        let _ = tx.blocking_send(event);
                    }
                }
                Err(e) => tracing::error!("Library watcher error: {e}"),
            }
        })?;
    watcher.watch(&library_path, RecursiveMode::Recursive)?;
    tracing::info!("Symlink deletion monitoring started");

    tokio::spawn(async move {
        // the watcher thread lives as long as this task
        let _watcher = watcher;
        let mut recently_removed: Vec<(PathBuf, Instant)> = Vec::new();
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            for path in event.paths {
                recently_removed.retain(|(_, seen)| seen.elapsed() < DEBOUNCE_WINDOW);
                let debounced = recently_removed
                    .iter()
                    .any(|(ancestor, _)| path.starts_with(ancestor) && path != *ancestor);
                recently_removed.push((path.clone(), Instant::now()));
                if debounced {
                    tracing::debug!("Skipping child of an already handled deletion");
                    continue;
                }
                let Some(action) = RemovalAction::from_path(&library_path, &path) else {
                    continue;
                };
                if let Err(e) = action.apply(db, bus).await {
                    tracing::error!("Failed to apply library removal: {e}");
                }
            }
        }
        tracing::info!("Stopped monitoring for symlink deletions");
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{db::tests_support::show_tree, item::State};

    use super::*;

    #[test]
    fn paths_map_to_removal_actions() {
        let library = Path::new("/library");
        let tests = [
            (
                "/library/shows/Foo (2020) {imdb-tt0000001}/Season 02/Foo (2020) - s02e03 - title.mkv",
                Some(RemovalAction::Episode {
                    imdb_id: "tt0000001".into(),
                    season: 2,
                    episode: 3,
                }),
            ),
            (
                "/library/shows/Foo (2020) {imdb-tt0000001}/Season 02",
                Some(RemovalAction::Season {
                    imdb_id: "tt0000001".into(),
                    season: 2,
                }),
            ),
            (
                "/library/shows/Foo (2020) {imdb-tt0000001}",
                Some(RemovalAction::WholeTree {
                    imdb_id: "tt0000001".into(),
                }),
            ),
            (
                "/library/movies/The Matrix (1999) {imdb-tt0133093}/The Matrix (1999) {imdb-tt0133093}.mkv",
                Some(RemovalAction::WholeTree {
                    imdb_id: "tt0133093".into(),
                }),
            ),
            ("/library/movies/NoTag (1999)", None),
            ("/elsewhere/shows/Foo {imdb-tt1}", None),
        ];
        for (path, expected) in tests {
            assert_eq!(
                RemovalAction::from_path(library, Path::new(path)),
                expected,
                "{path}"
            );
        }
    }

    #[tokio::test]
    async fn episode_removal_updates_parent_aggregate() {
        let db = Db::connect_memory().await.unwrap();
        let mut tree = show_tree("tt0000001", &[(2, &[1, 2, 3])]);
        {
            let MediaItem::Show(show) = &mut tree else { panic!() };
            for episode in &mut show.seasons[0].episodes {
                episode.meta.key = Some("done".into());
            }
        }
        tree.store_state();
        db.upsert(&mut tree).await.unwrap();
        db.save_last_state(&tree).await.unwrap();
        assert_eq!(tree.state(), State::Completed);

        let bus = EventBus::new(db.clone());
        let action = RemovalAction::Episode {
            imdb_id: "tt0000001".into(),
            season: 2,
            episode: 3,
        };
        action.apply(&db, &bus).await.unwrap();

        let remaining = db.get_by_imdb("tt0000001").await.unwrap().unwrap();
        let MediaItem::Show(show) = &remaining else {
            panic!()
        };
        assert_eq!(show.seasons[0].episodes.len(), 2);
        // siblings still complete, so the season stays complete
        assert_eq!(remaining.state(), State::Completed);
    }

    #[tokio::test]
    async fn whole_tree_removal_empties_store() {
        let db = Db::connect_memory().await.unwrap();
        let mut tree = show_tree("tt0000001", &[(1, &[1])]);
        db.upsert(&mut tree).await.unwrap();
        let bus = EventBus::new(db.clone());

        RemovalAction::WholeTree {
            imdb_id: "tt0000001".into(),
        }
        .apply(&db, &bus)
        .await
        .unwrap();
        assert!(db.is_empty().await.unwrap());
    }
}
