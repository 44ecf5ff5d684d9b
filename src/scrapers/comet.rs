use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::{
    app_state::AppError,
    config::{CometEnabled, CometUrl, CONFIG},
    request_client::{ProviderClient, RateLimiter},
};

use super::{RawCandidate, ScrapeQuery, TorrentScraper};

// Default addon configuration, base64 of the json settings blob the addon
// expects in its path.
const DEFAULT_SETTINGS: &str = "eyJpbmRleGVycyI6WyJiaXRzZWFyY2giLCJlenR2IiwidGhlcGlyYXRlYmF5IiwidGhlcmFyYmciLCJ5dHMiXSwibWF4UmVzdWx0cyI6MH0=";

#[derive(Debug)]
pub struct Comet {
    client: ProviderClient,
    minute_limiter: RateLimiter,
    url: Option<String>,
    initialized: bool,
}

impl Comet {
    pub fn new() -> Self {
        let enabled = CONFIG.get_value::<CometEnabled>().0;
        let url = CONFIG.get_value::<CometUrl>().0;
        if enabled && url.is_none() {
            tracing::warn!("Comet is enabled but no url is set");
        }
        Self {
            client: ProviderClient::new(
                "comet",
                1,
                Duration::from_secs(1),
                Duration::from_secs(30),
            ),
            minute_limiter: RateLimiter::new(60, Duration::from_secs(60)),
            initialized: enabled && url.is_some(),
            url,
        }
    }
}

impl Default for Comet {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct CometResponse {
    #[serde(default)]
    streams: Vec<CometStream>,
}

#[derive(Debug, Deserialize)]
struct CometStream {
    #[serde(rename = "infoHash")]
    info_hash: Option<String>,
    title: Option<String>,
}

#[async_trait::async_trait]
impl TorrentScraper for Comet {
    fn key(&self) -> &'static str {
        "comet"
    }

    fn initialized(&self) -> bool {
        self.initialized
    }

    async fn scrape(&self, query: &ScrapeQuery) -> Result<Vec<RawCandidate>, AppError> {
        self.minute_limiter.try_acquire()?;
        let base = self
            .url
            .as_deref()
            .ok_or_else(|| AppError::internal_error("comet url missing"))?;
        let path = match (query.season, query.episode) {
            (Some(season), Some(episode)) => format!(
                "{DEFAULT_SETTINGS}/stream/series/{}:{}:{}.json",
                query.imdb_id, season, episode
            ),
            (Some(season), None) => format!(
                "{DEFAULT_SETTINGS}/stream/series/{}:{}:1.json",
                query.imdb_id, season
            ),
            _ => format!("{DEFAULT_SETTINGS}/stream/movie/{}.json", query.imdb_id),
        };
        let url = Url::parse(&format!("{}/{}", base.trim_end_matches('/'), path))
            .map_err(|e| AppError::internal_error(format!("bad comet url: {e}")))?;
        let response: CometResponse = self.client.get_json(url).await?;
        Ok(response
            .streams
            .into_iter()
            .filter_map(|stream| {
                let raw_title = stream.title?.lines().next()?.to_string();
                Some(RawCandidate {
                    infohash: stream.info_hash?,
                    raw_title,
                })
            })
            .collect())
    }
}
