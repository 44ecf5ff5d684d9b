use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::{
    app_state::AppError,
    config::{OrionoidApiKey, OrionoidEnabled, CONFIG},
    request_client::{ProviderClient, RateLimiter},
};

use super::{RawCandidate, ScrapeQuery, TorrentScraper};

const ORIONOID_URL: &str = "https://api.orionoid.com";

#[derive(Debug)]
pub struct Orionoid {
    client: ProviderClient,
    minute_limiter: RateLimiter,
    api_key: Option<String>,
    initialized: bool,
}

impl Orionoid {
    pub fn new() -> Self {
        let api_key = CONFIG.get_value::<OrionoidApiKey>().0;
        let enabled = CONFIG.get_value::<OrionoidEnabled>().0;
        if enabled && api_key.is_none() {
            tracing::warn!("Orionoid is enabled but no api key is set");
        }
        Self {
            client: ProviderClient::new(
                "orionoid",
                1,
                Duration::from_secs(1),
                Duration::from_secs(30),
            ),
            minute_limiter: RateLimiter::new(60, Duration::from_secs(60)),
            initialized: enabled && api_key.is_some(),
            api_key,
        }
    }
}

impl Default for Orionoid {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct OrionoidResponse {
    #[serde(default)]
    data: Option<OrionoidData>,
}

#[derive(Debug, Deserialize)]
struct OrionoidData {
    #[serde(default)]
    streams: Vec<OrionoidStream>,
}

#[derive(Debug, Deserialize)]
struct OrionoidStream {
    file: Option<OrionoidFile>,
}

#[derive(Debug, Deserialize)]
struct OrionoidFile {
    hash: Option<String>,
    name: Option<String>,
}

#[async_trait::async_trait]
impl TorrentScraper for Orionoid {
    fn key(&self) -> &'static str {
        "orionoid"
    }

    fn initialized(&self) -> bool {
        self.initialized
    }

    async fn scrape(&self, query: &ScrapeQuery) -> Result<Vec<RawCandidate>, AppError> {
        self.minute_limiter.try_acquire()?;
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::internal_error("orionoid key missing"))?;
        let mut url = Url::parse(ORIONOID_URL).unwrap();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("keyapp", key);
            pairs.append_pair("keyuser", key);
            pairs.append_pair("mode", "stream");
            pairs.append_pair("action", "retrieve");
            pairs.append_pair("streamtype", "torrent");
            pairs.append_pair("idimdb", query.imdb_id.trim_start_matches("tt"));
            match (query.season, query.episode) {
                (Some(season), Some(episode)) => {
                    pairs.append_pair("type", "show");
                    pairs.append_pair("numberseason", &season.to_string());
                    pairs.append_pair("numberepisode", &episode.to_string());
                }
                (Some(season), None) => {
                    pairs.append_pair("type", "show");
                    pairs.append_pair("numberseason", &season.to_string());
                }
                _ => {
                    pairs.append_pair("type", "movie");
                }
            }
        }
        let response: OrionoidResponse = self.client.get_json(url).await?;
        let streams = response.data.map(|data| data.streams).unwrap_or_default();
        Ok(streams
            .into_iter()
            .filter_map(|stream| {
                let file = stream.file?;
                Some(RawCandidate {
                    infohash: file.hash?,
                    raw_title: file.name?,
                })
            })
            .collect())
    }
}
