use time::OffsetDateTime;

use crate::{
    config::{SubtitlesEnabled, CONFIG},
    events::{Emitter, ServiceKind},
    indexer,
    item::{ItemMeta, MediaItem, Show, State},
    scrapers,
};

/// Output of one pass of the state machine over an item.
#[derive(Debug, Default)]
pub struct ProcessedEvent {
    /// Canonical copy to persist, when it changed.
    pub updated_item: Option<MediaItem>,
    /// Worker pool the submissions go to. `None` re-enters the bus as a
    /// plain state transition.
    pub next_service: Option<ServiceKind>,
    pub items_to_submit: Vec<MediaItem>,
    /// Submissions that are not ready yet; queued with a future `run_at`.
    pub deferred: Vec<(MediaItem, OffsetDateTime)>,
}

impl ProcessedEvent {
    fn nothing() -> Self {
        Self::default()
    }
}

/// A stub item pointing at the stored show owning a season. Jobs reload the
/// full tree by id before running.
fn parent_show_stub(season: &crate::item::Season) -> MediaItem {
    MediaItem::Show(Show {
        meta: ItemMeta {
            id: season.show.id,
            imdb_id: season.show.imdb_id.clone(),
            title: season.show.title.clone(),
            year: season.show.year,
            aired_at: season.show.aired_at,
            requested_at: season.meta.requested_at,
            requested_by: season.meta.requested_by.clone(),
            ..Default::default()
        },
        seasons: Vec::new(),
    })
}

/// Pure mapping `(existing item, emitter, item) -> what happens next`.
/// First matching row wins.
pub fn process_event(
    existing: Option<&MediaItem>,
    emitter: Emitter,
    item: &MediaItem,
) -> ProcessedEvent {
    let state = item.state();

    if emitter.is_content_source() || emitter == Emitter::Manual || state == State::Requested {
        let submit = match item {
            MediaItem::Season(season) => parent_show_stub(season),
            rest => rest.clone(),
        };
        if let Some(existing) = existing {
            if !indexer::should_submit(existing) {
                return ProcessedEvent::nothing();
            }
        }
        return ProcessedEvent {
            updated_item: None,
            next_service: Some(ServiceKind::TraktIndexer),
            items_to_submit: vec![submit],
            deferred: Vec::new(),
        };
    }

    match state {
        State::Unknown | State::PartiallyCompleted => {
            if matches!(item, MediaItem::Movie(_) | MediaItem::Episode(_))
                && state == State::PartiallyCompleted
            {
                // cannot arise on leaves, refuse to act on it
                tracing::error!(
                    "PartiallyCompleted on a leaf item: {}",
                    item.log_string()
                );
                return ProcessedEvent::nothing();
            }
            // children sit in different states, so no single service covers
            // the batch; each submission re-enters the bus as a plain state
            // transition and resolves its own service on the next pass
            let mut out = ProcessedEvent {
                updated_item: Some(item.clone()),
                ..Default::default()
            };
            for child in item.children() {
                if child.state() == State::Completed {
                    continue;
                }
                let sub = process_event(Some(&child), emitter, &child);
                out.items_to_submit.extend(sub.items_to_submit);
                out.deferred.extend(sub.deferred);
            }
            out
        }
        State::Indexed => {
            let mut canonical = item.clone();
            if let Some(existing) = existing {
                if existing.meta().indexed_at.is_none() {
                    // the store holds an unindexed stub: adopt it (and its
                    // row ids), fill in the children the index produced
                    let mut merged = existing.clone();
                    merged.merge_indexed(&canonical);
                    canonical = merged;
                    if canonical.state() == State::Completed {
                        return ProcessedEvent {
                            updated_item: Some(canonical),
                            ..Default::default()
                        };
                    }
                } else if existing.state() == State::Completed {
                    return ProcessedEvent {
                        updated_item: Some(existing.clone()),
                        ..Default::default()
                    };
                }
            }

            let mut out = ProcessedEvent {
                updated_item: Some(canonical.clone()),
                next_service: Some(ServiceKind::Scraping),
                ..Default::default()
            };
            if emitter != Emitter::Service(ServiceKind::Scraping)
                && canonical.is_released()
            {
                if scrapers::should_submit(&canonical) {
                    out.items_to_submit.push(canonical);
                } else {
                    let run_at = scrapers::next_scrape_at(&canonical);
                    out.deferred.push((canonical, run_at));
                }
            } else {
                for child in canonical.children() {
                    if child.state() == State::Completed || !child.is_released() {
                        continue;
                    }
                    if scrapers::should_submit(&child) {
                        out.items_to_submit.push(child);
                    } else {
                        let run_at = scrapers::next_scrape_at(&child);
                        out.deferred.push((child, run_at));
                    }
                }
            }
            out
        }
        State::Scraped => ProcessedEvent {
            updated_item: Some(item.clone()),
            next_service: Some(ServiceKind::Downloader),
            items_to_submit: vec![item.clone()],
            deferred: Vec::new(),
        },
        State::Downloaded => ProcessedEvent {
            updated_item: Some(item.clone()),
            next_service: Some(ServiceKind::Symlinker),
            items_to_submit: vec![item.clone()],
            deferred: Vec::new(),
        },
        State::Symlinked => ProcessedEvent {
            updated_item: Some(item.clone()),
            next_service: Some(ServiceKind::Updater),
            items_to_submit: vec![item.clone()],
            deferred: Vec::new(),
        },
        State::Completed => {
            let subtitles_enabled = CONFIG.get_value::<SubtitlesEnabled>().0;
            if subtitles_enabled && emitter != Emitter::Service(ServiceKind::PostProcessing) {
                let items_to_submit: Vec<MediaItem> = match item {
                    MediaItem::Movie(_) | MediaItem::Episode(_) => {
                        if item.meta().postprocessed {
                            Vec::new()
                        } else {
                            vec![item.clone()]
                        }
                    }
                    compound => compound
                        .episodes()
                        .into_iter()
                        .filter(|episode| {
                            episode.meta.leaf_state() == State::Completed
                                && !episode.meta.postprocessed
                        })
                        .cloned()
                        .map(MediaItem::Episode)
                        .collect(),
                };
                if items_to_submit.is_empty() {
                    return ProcessedEvent {
                        updated_item: Some(item.clone()),
                        ..Default::default()
                    };
                }
                return ProcessedEvent {
                    updated_item: Some(item.clone()),
                    next_service: Some(ServiceKind::PostProcessing),
                    items_to_submit,
                    deferred: Vec::new(),
                };
            }
            ProcessedEvent {
                updated_item: Some(item.clone()),
                ..Default::default()
            }
        }
        // Requested is handled above, everything else is terminal for now
        _ => ProcessedEvent {
            updated_item: Some(item.clone()),
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::{
        db::tests_support::{movie, show_tree},
        item::Stream,
    };

    use super::*;

    fn with_state(mut item: MediaItem, target: State) -> MediaItem {
        {
            let meta = item.meta_mut();
            match target {
                State::Requested => {}
                State::Indexed => {
                    meta.title = Some("Foo".into());
                    meta.aired_at = Some(OffsetDateTime::now_utc() - time::Duration::days(30));
                }
                State::Scraped => {
                    meta.title = Some("Foo".into());
                    meta.aired_at = Some(OffsetDateTime::now_utc() - time::Duration::days(30));
                    meta.streams = BTreeMap::from([(
                        "a".repeat(40),
                        Stream {
                            raw_title: "Foo.1080p".into(),
                            rank: 1,
                            fetch_ok: true,
                        },
                    )]);
                }
                State::Downloaded => {
                    meta.title = Some("Foo".into());
                    meta.file = Some("foo.mkv".into());
                    meta.folder = Some("foo".into());
                }
                State::Symlinked => {
                    meta.title = Some("Foo".into());
                    meta.file = Some("foo.mkv".into());
                    meta.folder = Some("foo".into());
                    meta.symlinked = true;
                }
                State::Completed => {
                    meta.key = Some("1".into());
                }
                _ => {}
            }
        }
        item
    }

    #[test]
    fn requested_goes_to_indexer() {
        let item = movie("tt0133093", "The Matrix");
        let mut item = item;
        item.meta_mut().title = None;
        let out = process_event(None, Emitter::StateTransition, &item);
        assert_eq!(out.next_service, Some(ServiceKind::TraktIndexer));
        assert_eq!(out.items_to_submit.len(), 1);
    }

    #[test]
    fn content_source_emission_goes_to_indexer_regardless_of_state() {
        let item = with_state(movie("tt0133093", "The Matrix"), State::Scraped);
        let out = process_event(
            None,
            Emitter::ContentSource(crate::events::ContentSourceKind::Overseerr),
            &item,
        );
        assert_eq!(out.next_service, Some(ServiceKind::TraktIndexer));
    }

    #[test]
    fn indexed_goes_to_scraping() {
        let item = with_state(movie("tt0133093", "The Matrix"), State::Indexed);
        let out = process_event(None, Emitter::Service(ServiceKind::TraktIndexer), &item);
        assert_eq!(out.next_service, Some(ServiceKind::Scraping));
        assert_eq!(out.items_to_submit.len(), 1);
    }

    #[test]
    fn indexed_with_completed_existing_is_terminal() {
        let item = with_state(movie("tt0133093", "The Matrix"), State::Indexed);
        let mut existing = with_state(movie("tt0133093", "The Matrix"), State::Completed);
        existing.meta_mut().indexed_at = Some(OffsetDateTime::now_utc());
        let out = process_event(
            Some(&existing),
            Emitter::Service(ServiceKind::TraktIndexer),
            &item,
        );
        assert_eq!(out.next_service, None);
        assert!(out.items_to_submit.is_empty());
    }

    #[test]
    fn scraped_goes_to_downloader() {
        let item = with_state(movie("tt0133093", "The Matrix"), State::Scraped);
        let out = process_event(None, Emitter::Service(ServiceKind::Scraping), &item);
        assert_eq!(out.next_service, Some(ServiceKind::Downloader));
    }

    #[test]
    fn downloaded_goes_to_symlinker() {
        let item = with_state(movie("tt0133093", "The Matrix"), State::Downloaded);
        let out = process_event(None, Emitter::Service(ServiceKind::Downloader), &item);
        assert_eq!(out.next_service, Some(ServiceKind::Symlinker));
    }

    #[test]
    fn symlinked_goes_to_updater() {
        let item = with_state(movie("tt0133093", "The Matrix"), State::Symlinked);
        let out = process_event(None, Emitter::Service(ServiceKind::Symlinker), &item);
        assert_eq!(out.next_service, Some(ServiceKind::Updater));
    }

    #[test]
    fn completed_is_terminal() {
        let item = with_state(movie("tt0133093", "The Matrix"), State::Completed);
        let out = process_event(None, Emitter::Service(ServiceKind::Updater), &item);
        assert!(out.next_service.is_none());
        assert!(out.items_to_submit.is_empty());
        assert!(out.updated_item.is_some());
    }

    #[test]
    fn season_request_substitutes_parent_show() {
        let tree = show_tree("tt0000001", &[(1, &[1])]);
        let MediaItem::Show(show) = &tree else { panic!() };
        let mut season = show.seasons[0].clone();
        season.meta.requested_by = Some("test".into());
        season.meta.title = None;
        let item = MediaItem::Season(season);
        let out = process_event(None, Emitter::StateTransition, &item);
        assert_eq!(out.next_service, Some(ServiceKind::TraktIndexer));
        assert!(matches!(out.items_to_submit[0], MediaItem::Show(_)));
    }

    #[test]
    fn empty_streams_indexed_submits_to_scraping_not_completed() {
        // boundary: empty streams must not look complete or error
        let item = with_state(movie("tt0133093", "The Matrix"), State::Indexed);
        assert!(item.meta().streams.is_empty());
        let out = process_event(None, Emitter::Service(ServiceKind::TraktIndexer), &item);
        assert_eq!(out.next_service, Some(ServiceKind::Scraping));
        assert_eq!(out.items_to_submit.len(), 1);
    }

    #[test]
    fn backoff_defers_rescrape() {
        let mut item = with_state(movie("tt0133093", "The Matrix"), State::Indexed);
        {
            let meta = item.meta_mut();
            meta.scraped_at = Some(OffsetDateTime::now_utc());
            meta.scraped_times = 3;
        }
        let out = process_event(None, Emitter::Service(ServiceKind::TraktIndexer), &item);
        assert!(out.items_to_submit.is_empty());
        assert_eq!(out.deferred.len(), 1);
        assert!(out.deferred[0].1 > OffsetDateTime::now_utc());
    }

    #[test]
    fn partially_completed_show_recurses_into_children() {
        let mut tree = show_tree("tt0000001", &[(1, &[1, 2])]);
        {
            let MediaItem::Show(show) = &mut tree else { panic!() };
            for season in &mut show.seasons {
                season.meta.aired_at =
                    Some(OffsetDateTime::now_utc() - time::Duration::days(30));
                for episode in &mut season.episodes {
                    episode.meta.aired_at =
                        Some(OffsetDateTime::now_utc() - time::Duration::days(30));
                }
            }
            show.seasons[0].episodes[0].meta.key = Some("done".into());
        }
        assert_eq!(tree.state(), State::PartiallyCompleted);
        let out = process_event(Some(&tree), Emitter::RetryLibrary, &tree);
        // drills down to the incomplete episode rather than the whole show
        assert!(!out.items_to_submit.is_empty() || !out.deferred.is_empty());
        assert_eq!(out.next_service, None);
    }

    #[test]
    fn mixed_children_are_never_bundled_behind_one_service() {
        // episode states: [Completed, Indexed, Scraped] - the Indexed one
        // needs Scraping, the Scraped one needs the Downloader, so the
        // batch must carry no service and let each item route itself
        let mut tree = show_tree("tt0000001", &[(1, &[1, 2, 3])]);
        {
            let MediaItem::Show(show) = &mut tree else { panic!() };
            let season = &mut show.seasons[0];
            season.meta.aired_at = Some(OffsetDateTime::now_utc() - time::Duration::days(30));
            for episode in &mut season.episodes {
                episode.meta.aired_at =
                    Some(OffsetDateTime::now_utc() - time::Duration::days(30));
            }
            season.episodes[0].meta.key = Some("done".into());
            season.episodes[2].meta.streams.insert(
                "a".repeat(40),
                Stream {
                    raw_title: "Foo.S01E03.1080p".into(),
                    rank: 1,
                    fetch_ok: true,
                },
            );
        }
        let MediaItem::Show(show) = &tree else { panic!() };
        let season = MediaItem::Season(show.seasons[0].clone());
        assert_eq!(season.state(), State::PartiallyCompleted);

        let out = process_event(Some(&season), Emitter::RetryLibrary, &season);
        assert_eq!(out.next_service, None);
        assert_eq!(out.items_to_submit.len() + out.deferred.len(), 2);
        let submitted_states: Vec<State> = out
            .items_to_submit
            .iter()
            .chain(out.deferred.iter().map(|(item, _)| item))
            .map(|item| item.state())
            .collect();
        assert!(submitted_states.contains(&State::Indexed));
        assert!(submitted_states.contains(&State::Scraped));
    }
}
