use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::{
    app_state::AppError,
    config::{MediafusionEnabled, MediafusionUrl, CONFIG},
    request_client::{ProviderClient, RateLimiter},
};

use super::{RawCandidate, ScrapeQuery, TorrentScraper};

/// Stremio style addon, same stream shape as torrentio behind a self hosted
/// deployment.
#[derive(Debug)]
pub struct Mediafusion {
    client: ProviderClient,
    minute_limiter: RateLimiter,
    url: Option<String>,
    initialized: bool,
}

impl Mediafusion {
    pub fn new() -> Self {
        let enabled = CONFIG.get_value::<MediafusionEnabled>().0;
        let url = CONFIG.get_value::<MediafusionUrl>().0;
        if enabled && url.is_none() {
            tracing::warn!("Mediafusion is enabled but no url is set");
        }
        Self {
            client: ProviderClient::new(
                "mediafusion",
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

impl Default for Mediafusion {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct MediafusionResponse {
    #[serde(default)]
    streams: Vec<MediafusionStream>,
}

#[derive(Debug, Deserialize)]
struct MediafusionStream {
    #[serde(rename = "infoHash")]
    info_hash: Option<String>,
    description: Option<String>,
    title: Option<String>,
}

#[async_trait::async_trait]
impl TorrentScraper for Mediafusion {
    fn key(&self) -> &'static str {
        "mediafusion"
    }

    fn initialized(&self) -> bool {
        self.initialized
    }

    async fn scrape(&self, query: &ScrapeQuery) -> Result<Vec<RawCandidate>, AppError> {
        self.minute_limiter.try_acquire()?;
        let base = self
            .url
            .as_deref()
            .ok_or_else(|| AppError::internal_error("mediafusion url missing"))?;
        let path = match (query.season, query.episode) {
            (Some(season), Some(episode)) => format!(
                "stream/series/{}:{}:{}.json",
                query.imdb_id, season, episode
            ),
            (Some(season), None) => {
                format!("stream/series/{}:{}:1.json", query.imdb_id, season)
            }
            _ => format!("stream/movie/{}.json", query.imdb_id),
        };
        let url = Url::parse(&format!("{}/{}", base.trim_end_matches('/'), path))
            .map_err(|e| AppError::internal_error(format!("bad mediafusion url: {e}")))?;
        let response: MediafusionResponse = self.client.get_json(url).await?;
        Ok(response
            .streams
            .into_iter()
            .filter_map(|stream| {
                let raw_title = stream
                    .description
                    .or(stream.title)?
                    .lines()
                    .next()?
                    .to_string();
                Some(RawCandidate {
                    infohash: stream.info_hash?,
                    raw_title,
                })
            })
            .collect())
    }
}
