use std::{sync::Arc, time::Duration};

use reqwest::Url;
use serde::Deserialize;
use tokio::task::JoinSet;

use crate::{
    app_state::AppError,
    config::{JackettApiKey, JackettEnabled, JackettIndexers, JackettUrl, CONFIG},
    request_client::{ProviderClient, RateLimiter},
};

use super::{RawCandidate, ScrapeQuery, TorrentScraper};

const MOVIE_CATEGORIES: &str = "2000,2010,2020,2030,2040,2045,2050,2080";
const TV_CATEGORIES: &str = "5000,5010,5020,5030,5040,5045,5050,5060,5070,5080";

/// One queried indexer with its own call budget.
#[derive(Debug)]
struct Indexer {
    name: String,
    limiter: Arc<RateLimiter>,
}

#[derive(Debug)]
pub struct Jackett {
    client: ProviderClient,
    minute_limiter: Arc<RateLimiter>,
    indexers: Vec<Indexer>,
    url: Option<String>,
    api_key: Option<String>,
    initialized: bool,
}

impl Jackett {
    pub fn new() -> Self {
        let enabled = CONFIG.get_value::<JackettEnabled>().0;
        let url = CONFIG.get_value::<JackettUrl>().0;
        let api_key = CONFIG.get_value::<JackettApiKey>().0;
        if enabled && (url.is_none() || api_key.is_none()) {
            tracing::warn!("Jackett is enabled but url or api key is not set");
        }
        let indexers = CONFIG
            .get_value::<JackettIndexers>()
            .0
            .into_iter()
            .map(|name| Indexer {
                name,
                limiter: Arc::new(RateLimiter::new(1, Duration::from_secs(10))),
            })
            .collect();
        Self {
            client: ProviderClient::new(
                "jackett",
                2,
                Duration::from_secs(1),
                Duration::from_secs(60),
            ),
            minute_limiter: Arc::new(RateLimiter::new(60, Duration::from_secs(60))),
            indexers,
            initialized: enabled && url.is_some() && api_key.is_some(),
            url,
            api_key,
        }
    }

    fn results_url(&self, indexer: &str, query: &ScrapeQuery) -> Result<Url, AppError> {
        let base = self
            .url
            .as_deref()
            .ok_or_else(|| AppError::internal_error("jackett url missing"))?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::internal_error("jackett api key missing"))?;
        let mut url = Url::parse(&format!(
            "{}/api/v2.0/indexers/{}/results",
            base.trim_end_matches('/'),
            indexer
        ))
        .map_err(|e| AppError::internal_error(format!("bad jackett url: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("apikey", api_key);
            match (query.season, query.episode) {
                (Some(season), Some(episode)) => {
                    pairs.append_pair("Category", TV_CATEGORIES);
                    pairs.append_pair(
                        "Query",
                        &format!("{} S{:02}E{:02}", query.title, season, episode),
                    );
                }
                (Some(season), None) => {
                    pairs.append_pair("Category", TV_CATEGORIES);
                    pairs.append_pair("Query", &format!("{} S{:02}", query.title, season));
                }
                _ => {
                    pairs.append_pair("Category", MOVIE_CATEGORIES);
                    let query_string = match query.year {
                        Some(year) => format!("{} {}", query.title, year),
                        None => query.title.clone(),
                    };
                    pairs.append_pair("Query", &query_string);
                }
            }
        }
        Ok(url)
    }
}

impl Default for Jackett {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct JackettResponse {
    #[serde(rename = "Results", default)]
    results: Vec<JackettResult>,
}

#[derive(Debug, Deserialize)]
struct JackettResult {
    #[serde(rename = "Title")]
    title: Option<String>,
    #[serde(rename = "InfoHash")]
    info_hash: Option<String>,
}

#[async_trait::async_trait]
impl TorrentScraper for Jackett {
    fn key(&self) -> &'static str {
        "jackett"
    }

    fn initialized(&self) -> bool {
        self.initialized
    }

    async fn scrape(&self, query: &ScrapeQuery) -> Result<Vec<RawCandidate>, AppError> {
        // the minute budget is hard: exhausting it reschedules the event
        self.minute_limiter.try_acquire()?;

        let mut handles: JoinSet<Result<Vec<RawCandidate>, AppError>> = JoinSet::new();
        for indexer in &self.indexers {
            let limiter = indexer.limiter.clone();
            if limiter.try_acquire().is_err() {
                tracing::debug!("Indexer {} is over its budget, skipping", indexer.name);
                continue;
            }
            let url = self.results_url(&indexer.name, query)?;
            let client = self.client.clone();
            handles.spawn(async move {
                let response: JackettResponse = client.get_json(url).await?;
                Ok(response
                    .results
                    .into_iter()
                    .filter_map(|result| {
                        Some(RawCandidate {
                            infohash: result.info_hash?,
                            raw_title: result.title?,
                        })
                    })
                    .collect())
            });
        }

        let mut candidates = Vec::new();
        while let Some(joined) = handles.join_next().await {
            match joined {
                Ok(Ok(mut found)) => candidates.append(&mut found),
                Ok(Err(e)) if e.is_rate_limit() => {
                    self.minute_limiter.limit_hit();
                    return Err(e);
                }
                Ok(Err(e)) => tracing::warn!("Jackett indexer query failed: {e}"),
                Err(e) => tracing::error!("Jackett indexer task panicked: {e}"),
            }
        }
        Ok(candidates)
    }
}
