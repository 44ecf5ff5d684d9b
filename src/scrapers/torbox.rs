use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::{
    app_state::AppError,
    config::{TorboxScraperEnabled, CONFIG},
    request_client::{ProviderClient, RateLimiter},
};

use super::{RawCandidate, ScrapeQuery, TorrentScraper};

const TORBOX_SEARCH_URL: &str = "https://search-api.torbox.app";

#[derive(Debug)]
pub struct TorboxScraper {
    client: ProviderClient,
    minute_limiter: RateLimiter,
    initialized: bool,
}

impl TorboxScraper {
    pub fn new() -> Self {
        Self {
            client: ProviderClient::new(
                "torbox-search",
                1,
                Duration::from_secs(1),
                Duration::from_secs(30),
            ),
            minute_limiter: RateLimiter::new(60, Duration::from_secs(60)),
            initialized: CONFIG.get_value::<TorboxScraperEnabled>().0,
        }
    }
}

impl Default for TorboxScraper {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct TorboxSearchResponse {
    #[serde(default)]
    data: Option<TorboxSearchData>,
}

#[derive(Debug, Deserialize)]
struct TorboxSearchData {
    #[serde(default)]
    torrents: Vec<TorboxTorrent>,
}

#[derive(Debug, Deserialize)]
struct TorboxTorrent {
    hash: Option<String>,
    raw_title: Option<String>,
    title: Option<String>,
}

#[async_trait::async_trait]
impl TorrentScraper for TorboxScraper {
    fn key(&self) -> &'static str {
        "torbox"
    }

    fn initialized(&self) -> bool {
        self.initialized
    }

    async fn scrape(&self, query: &ScrapeQuery) -> Result<Vec<RawCandidate>, AppError> {
        self.minute_limiter.try_acquire()?;
        let id = match (query.season, query.episode) {
            (Some(season), Some(episode)) => {
                format!("{}:{}:{}", query.imdb_id, season, episode)
            }
            (Some(season), None) => format!("{}:{}", query.imdb_id, season),
            _ => query.imdb_id.clone(),
        };
        let url = Url::parse(&format!(
            "{TORBOX_SEARCH_URL}/torrents/imdb:{id}?metadata=false"
        ))
        .map_err(|e| AppError::internal_error(format!("bad torbox url: {e}")))?;
        let response: TorboxSearchResponse = self.client.get_json(url).await?;
        let torrents = response.data.map(|data| data.torrents).unwrap_or_default();
        Ok(torrents
            .into_iter()
            .filter_map(|torrent| {
                Some(RawCandidate {
                    infohash: torrent.hash?,
                    raw_title: torrent.raw_title.or(torrent.title)?,
                })
            })
            .collect())
    }
}
