use std::collections::BTreeMap;
use std::time::Duration;

use time::OffsetDateTime;

use crate::{
    app_state::AppError,
    cache::HashCache,
    config::{ScrapeAfter10, ScrapeAfter2, ScrapeAfter5, CONFIG},
    item::{MediaItem, State, Stream},
    parser::{self, RankingProfile},
};

pub mod comet;
pub mod jackett;
pub mod mediafusion;
pub mod orionoid;
pub mod torbox;
pub mod torrentio;

/// A torrent surfaced by a scraper before filtering and ranking.
#[derive(Debug, Clone)]
pub struct RawCandidate {
    pub infohash: String,
    pub raw_title: String,
}

/// What a scraper needs to know about the item it searches for.
#[derive(Debug, Clone)]
pub struct ScrapeQuery {
    pub imdb_id: String,
    pub title: String,
    pub year: Option<i32>,
    pub season: Option<i64>,
    pub episode: Option<i64>,
}

impl ScrapeQuery {
    pub fn from_item(item: &MediaItem) -> Option<Self> {
        let title = item.top_title()?.to_string();
        match item {
            MediaItem::Movie(movie) => Some(Self {
                imdb_id: movie.meta.imdb_id.clone()?,
                title,
                year: movie.meta.year,
                season: None,
                episode: None,
            }),
            MediaItem::Season(season) => Some(Self {
                imdb_id: season.show.imdb_id.clone()?,
                title,
                year: season.show.year,
                season: Some(season.number),
                episode: None,
            }),
            MediaItem::Episode(episode) => Some(Self {
                imdb_id: episode.show.imdb_id.clone()?,
                title,
                year: episode.show.year,
                season: Some(episode.season_number),
                episode: Some(episode.number),
            }),
            MediaItem::Show(_) => None,
        }
    }

    pub fn is_show(&self) -> bool {
        self.season.is_some()
    }
}

#[async_trait::async_trait]
pub trait TorrentScraper: Send + Sync {
    fn key(&self) -> &'static str;
    fn initialized(&self) -> bool;
    async fn scrape(&self, query: &ScrapeQuery) -> Result<Vec<RawCandidate>, AppError>;
}

/// Per attempt threshold before an item may be scraped again.
pub fn scrape_threshold(scraped_times: u32) -> Duration {
    let hours = |h: f64| Duration::from_secs_f64(h * 3600.0);
    match scraped_times {
        0 | 1 => Duration::from_secs(5),
        2..=5 => hours(CONFIG.get_value::<ScrapeAfter2>().0),
        6..=10 => hours(CONFIG.get_value::<ScrapeAfter5>().0),
        _ => hours(CONFIG.get_value::<ScrapeAfter10>().0),
    }
}

/// Backoff gate: true when enough time has passed since the last scrape.
pub fn should_submit(item: &MediaItem) -> bool {
    let meta = item.meta();
    match meta.scraped_at {
        None => true,
        Some(scraped_at) => {
            let threshold = scrape_threshold(meta.scraped_times);
            OffsetDateTime::now_utc() - scraped_at > threshold
        }
    }
}

/// When the backoff opens again, used as `run_at` for deferred events.
pub fn next_scrape_at(item: &MediaItem) -> OffsetDateTime {
    let meta = item.meta();
    let threshold = scrape_threshold(meta.scraped_times);
    meta.scraped_at.unwrap_or_else(OffsetDateTime::now_utc) + threshold
}

/// Parse, filter and rank raw candidates into the stream map that gets
/// merged into the item. Garbage is the normal majority here and is dropped
/// silently.
pub fn rank_candidates(
    query: &ScrapeQuery,
    candidates: Vec<RawCandidate>,
    profile: &RankingProfile,
    cache: &HashCache,
) -> BTreeMap<String, Stream> {
    let mut out = BTreeMap::new();
    for candidate in candidates {
        let infohash = candidate.infohash.to_lowercase();
        if infohash.len() != 40 || !infohash.chars().all(|c| c.is_ascii_hexdigit()) {
            continue;
        }
        if cache.is_blacklisted(&infohash) {
            continue;
        }
        let parsed = parser::parse_title(&candidate.raw_title);
        if !parser::title_match(&query.title, &parsed.title) {
            continue;
        }
        match (query.season, query.episode) {
            // episode wants its exact numbers or a season pack covering it
            (Some(season), Some(episode)) => {
                let covers_episode = parsed.references_episode(season, episode, false)
                    || (parsed.episodes.is_empty() && parsed.seasons.contains(&season));
                if !covers_episode {
                    continue;
                }
            }
            // season wants packs for its number
            (Some(season), None) => {
                if !parsed.seasons.contains(&season) {
                    continue;
                }
            }
            // movie candidates must not carry episode markers
            (None, _) => {
                if !parsed.is_movie() {
                    continue;
                }
            }
        }
        let Some(rank) = parser::rank(&parsed, profile) else {
            continue;
        };
        out.insert(
            infohash,
            Stream {
                raw_title: candidate.raw_title,
                rank,
                fetch_ok: true,
            },
        );
    }
    out
}

/// Umbrella service running every initialized scraper for an item.
pub struct Scraping {
    cache: &'static HashCache,
    scrapers: Vec<Box<dyn TorrentScraper>>,
}

impl Scraping {
    pub fn new(cache: &'static HashCache) -> Self {
        let scrapers: Vec<Box<dyn TorrentScraper>> = vec![
            Box::new(torrentio::Torrentio::new()),
            Box::new(orionoid::Orionoid::new()),
            Box::new(jackett::Jackett::new()),
            Box::new(mediafusion::Mediafusion::new()),
            Box::new(torbox::TorboxScraper::new()),
            Box::new(comet::Comet::new()),
        ];
        for scraper in &scrapers {
            if scraper.initialized() {
                tracing::info!("Scraper {} initialized", scraper.key());
            }
        }
        Self { cache, scrapers }
    }

    pub fn initialized(&self) -> bool {
        self.scrapers.iter().any(|scraper| scraper.initialized())
    }

    pub fn validate(&self) -> bool {
        if !self.initialized() {
            tracing::error!("You have no scraping services enabled, please enable at least one!");
            return false;
        }
        true
    }

    /// Add ranked streams to the item. Hard rate limits bubble up so the
    /// bus can reschedule; everything else degrades to an empty yield.
    pub async fn run(&self, mut item: MediaItem) -> Result<Vec<MediaItem>, AppError> {
        // shows pass through untouched, scraping happens per season/episode
        if matches!(item, MediaItem::Show(_)) {
            return Ok(vec![item]);
        }
        if !item.is_released() {
            tracing::debug!("{} is not released yet, skipping scrape", item.log_string());
            return Ok(vec![item]);
        }
        let Some(query) = ScrapeQuery::from_item(&item) else {
            return Ok(vec![item]);
        };

        let profile = RankingProfile::from_config();
        let mut found = 0usize;
        for scraper in &self.scrapers {
            if !scraper.initialized() {
                continue;
            }
            match scraper.scrape(&query).await {
                Ok(candidates) => {
                    let total = candidates.len();
                    let ranked = rank_candidates(&query, candidates, &profile, self.cache);
                    found += ranked.len();
                    if !ranked.is_empty() {
                        tracing::info!(
                            "Found {} streams out of {} from {} for {}",
                            ranked.len(),
                            total,
                            scraper.key(),
                            item.log_string()
                        );
                    }
                    let streams = &mut item.meta_mut().streams;
                    for (hash, stream) in ranked {
                        streams.entry(hash).or_insert(stream);
                    }
                }
                Err(e) if e.is_rate_limit() => {
                    tracing::warn!("{} rate limit hit for {}", scraper.key(), item.log_string());
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        "{} failed to scrape {}: {e}",
                        scraper.key(),
                        item.log_string()
                    );
                }
            }
        }
        if found == 0 {
            tracing::debug!("Could not find streams for {}", item.log_string());
        }

        let meta = item.meta_mut();
        meta.scraped_at = Some(OffsetDateTime::now_utc());
        meta.scraped_times += 1;
        if let MediaItem::Season(season) = &mut item {
            // the same attempt counts for episodes drilled into later
            for episode in &mut season.episodes {
                if episode.meta.leaf_state() == State::Indexed {
                    episode.meta.scraped_at = Some(OffsetDateTime::now_utc());
                }
            }
        }
        Ok(vec![item])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> &'static HashCache {
        let path = std::env::temp_dir().join("scraping-test-cache.json");
        let _ = std::fs::remove_file(&path);
        Box::leak(Box::new(HashCache::load(path)))
    }

    fn movie_query() -> ScrapeQuery {
        ScrapeQuery {
            imdb_id: "tt0133093".into(),
            title: "The Matrix".into(),
            year: Some(1999),
            season: None,
            episode: None,
        }
    }

    fn candidate(hash_byte: char, title: &str) -> RawCandidate {
        RawCandidate {
            infohash: hash_byte.to_string().repeat(40),
            raw_title: title.to_string(),
        }
    }

    #[test]
    fn ranking_filters_garbage_and_wrong_titles() {
        let cache = cache();
        let profile = RankingProfile::default();
        let candidates = vec![
            candidate('a', "The.Matrix.1999.1080p.BluRay.x264"),
            candidate('b', "The.Matrix.Reloaded.2003.1080p.BluRay"),
            candidate('c', "The.Matrix.1999.CAM"),
            candidate('d', "The.Matrix.S01E01.1080p"),
        ];
        let ranked = rank_candidates(&movie_query(), candidates, &profile, cache);
        assert_eq!(ranked.len(), 1);
        assert!(ranked.contains_key(&"a".repeat(40)));
    }

    #[test]
    fn blacklisted_hashes_never_surface() {
        let cache = cache();
        cache.blacklist(&"e".repeat(40));
        let profile = RankingProfile::default();
        let candidates = vec![candidate('e', "The.Matrix.1999.1080p.BluRay.x264")];
        let ranked = rank_candidates(&movie_query(), candidates, &profile, cache);
        assert!(ranked.is_empty());
    }

    #[test]
    fn episode_query_accepts_packs_covering_it() {
        let cache = cache();
        let profile = RankingProfile::default();
        let query = ScrapeQuery {
            imdb_id: "tt0000001".into(),
            title: "Foo".into(),
            year: None,
            season: Some(1),
            episode: Some(3),
        };
        let candidates = vec![
            candidate('a', "Foo.S01E03.1080p.WEB-DL"),
            candidate('b', "Foo.S01.1080p.WEB-DL"),
            candidate('c', "Foo.S01E04.1080p.WEB-DL"),
            candidate('d', "Foo.S02.1080p.WEB-DL"),
        ];
        let ranked = rank_candidates(&query, candidates, &profile, cache);
        assert_eq!(ranked.len(), 2);
        assert!(ranked.contains_key(&"a".repeat(40)));
        assert!(ranked.contains_key(&"b".repeat(40)));
    }

    #[test]
    fn backoff_thresholds_scale_with_attempts() {
        assert_eq!(scrape_threshold(0), Duration::from_secs(5));
        assert_eq!(scrape_threshold(1), Duration::from_secs(5));
        assert!(scrape_threshold(3) >= Duration::from_secs(60));
        assert!(scrape_threshold(7) >= scrape_threshold(3));
        assert!(scrape_threshold(20) >= scrape_threshold(7));
    }
}
