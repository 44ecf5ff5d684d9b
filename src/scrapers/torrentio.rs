use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::{
    app_state::AppError,
    config::{TorrentioEnabled, TorrentioFilter, CONFIG},
    request_client::{ProviderClient, RateLimiter},
};

use super::{RawCandidate, ScrapeQuery, TorrentScraper};

#[derive(Debug)]
pub struct Torrentio {
    client: ProviderClient,
    minute_limiter: RateLimiter,
    filter: String,
    initialized: bool,
}

impl Torrentio {
    pub fn new() -> Self {
        Self {
            client: ProviderClient::new(
                "torrentio",
                1,
                Duration::from_secs(1),
                Duration::from_secs(30),
            ),
            minute_limiter: RateLimiter::new(60, Duration::from_secs(60)),
            filter: CONFIG.get_value::<TorrentioFilter>().0,
            initialized: CONFIG.get_value::<TorrentioEnabled>().0,
        }
    }

    fn stream_url(&self, query: &ScrapeQuery) -> Result<Url, AppError> {
        let path = match (query.season, query.episode) {
            (Some(season), Some(episode)) => format!(
                "{}/stream/series/{}:{}:{}.json",
                self.filter, query.imdb_id, season, episode
            ),
            (Some(season), None) => format!(
                "{}/stream/series/{}:{}:1.json",
                self.filter, query.imdb_id, season
            ),
            _ => format!("{}/stream/movie/{}.json", self.filter, query.imdb_id),
        };
        Url::parse(&format!("https://torrentio.strem.fun/{path}"))
            .map_err(|e| AppError::internal_error(format!("bad torrentio url: {e}")))
    }
}

impl Default for Torrentio {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct TorrentioResponse {
    #[serde(default)]
    streams: Vec<TorrentioStream>,
}

#[derive(Debug, Deserialize)]
struct TorrentioStream {
    #[serde(rename = "infoHash")]
    info_hash: Option<String>,
    title: Option<String>,
}

#[async_trait::async_trait]
impl TorrentScraper for Torrentio {
    fn key(&self) -> &'static str {
        "torrentio"
    }

    fn initialized(&self) -> bool {
        self.initialized
    }

    async fn scrape(&self, query: &ScrapeQuery) -> Result<Vec<RawCandidate>, AppError> {
        self.minute_limiter.try_acquire()?;
        let url = self.stream_url(query)?;
        let response: TorrentioResponse = self.client.get_json(url).await?;
        Ok(response
            .streams
            .into_iter()
            .filter_map(|stream| {
                let infohash = stream.info_hash?;
                let raw_title = stream.title?;
                // titles come with seeders/size decorations on extra lines
                let raw_title = raw_title.lines().next()?.to_string();
                Some(RawCandidate {
                    infohash,
                    raw_title,
                })
            })
            .collect())
    }
}
