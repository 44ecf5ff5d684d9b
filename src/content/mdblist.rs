use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::{
    app_state::AppError,
    config::{MdblistApiKey, MdblistEnabled, MdblistInterval, MdblistLists, CONFIG},
    events::ContentSourceKind,
    item::MediaItem,
    request_client::{ProviderClient, RateLimiter},
};

use super::{looks_like_imdb_id, requested_item, ContentSource};

const MDBLIST_URL: &str = "https://mdblist.com/api";

#[derive(Debug)]
pub struct Mdblist {
    client: ProviderClient,
    rate_limiter: RateLimiter,
    api_key: Option<String>,
    lists: Vec<String>,
    interval: Duration,
    initialized: bool,
}

impl Mdblist {
    pub fn new() -> Self {
        let enabled = CONFIG.get_value::<MdblistEnabled>().0;
        let api_key = CONFIG.get_value::<MdblistApiKey>().0;
        let lists = CONFIG.get_value::<MdblistLists>().0;
        if enabled && api_key.is_none() {
            tracing::warn!("Mdblist is enabled but no api key is set");
        }
        Self {
            client: ProviderClient::new(
                "mdblist",
                1,
                Duration::from_secs(1),
                Duration::from_secs(30),
            ),
            // mdblist allows a small daily budget, keep well under it
            rate_limiter: RateLimiter::new(50, Duration::from_secs(120)),
            initialized: enabled && api_key.is_some() && !lists.is_empty(),
            api_key,
            lists,
            interval: Duration::from_secs(CONFIG.get_value::<MdblistInterval>().0),
        }
    }
}

impl Default for Mdblist {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct MdblistItem {
    imdb_id: Option<String>,
}

#[async_trait::async_trait]
impl ContentSource for Mdblist {
    fn kind(&self) -> ContentSourceKind {
        ContentSourceKind::Mdblist
    }

    fn initialized(&self) -> bool {
        self.initialized
    }

    fn update_interval(&self) -> Duration {
        self.interval
    }

    async fn fetch(&self) -> Result<Vec<MediaItem>, AppError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::internal_error("mdblist api key missing"))?;
        let mut out = Vec::new();
        for list in &self.lists {
            self.rate_limiter.try_acquire()?;
            let url = Url::parse(&format!(
                "{MDBLIST_URL}/lists/{list}/items?apikey={key}"
            ))
            .map_err(|e| AppError::internal_error(format!("bad mdblist url: {e}")))?;
            let items: Vec<MdblistItem> = self.client.get_json(url).await?;
            for item in items {
                if let Some(imdb) = item.imdb_id.filter(|id| looks_like_imdb_id(id)) {
                    out.push(requested_item(&imdb, self.kind()));
                }
            }
        }
        Ok(out)
    }
}
