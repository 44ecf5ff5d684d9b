use std::time::Duration;

use reqwest::{
    header::{HeaderMap, HeaderValue},
    Url,
};
use serde::Deserialize;

use crate::{
    app_state::AppError,
    config::{OverseerrApiKey, OverseerrEnabled, OverseerrInterval, OverseerrUrl, CONFIG},
    events::ContentSourceKind,
    item::MediaItem,
    request_client::ProviderClient,
};

use super::{looks_like_imdb_id, requested_item, ContentSource};

#[derive(Debug)]
pub struct Overseerr {
    client: ProviderClient,
    url: Option<String>,
    interval: Duration,
    initialized: bool,
}

impl Overseerr {
    pub fn new() -> Self {
        let enabled = CONFIG.get_value::<OverseerrEnabled>().0;
        let url = CONFIG.get_value::<OverseerrUrl>().0;
        let api_key = CONFIG.get_value::<OverseerrApiKey>().0;
        if enabled && (url.is_none() || api_key.is_none()) {
            tracing::warn!("Overseerr is enabled but url or api key is not set");
        }
        let mut headers = HeaderMap::new();
        if let Some(key) = &api_key {
            if let Ok(value) = HeaderValue::from_str(key) {
                headers.insert("X-Api-Key", value);
            }
        }
        Self {
            client: ProviderClient::with_default_headers(
                "overseerr",
                2,
                Duration::from_secs(1),
                Duration::from_secs(30),
                headers,
            ),
            interval: Duration::from_secs(CONFIG.get_value::<OverseerrInterval>().0),
            initialized: enabled && url.is_some() && api_key.is_some(),
            url,
        }
    }
}

impl Default for Overseerr {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct RequestsResponse {
    #[serde(default)]
    results: Vec<OverseerrRequest>,
}

#[derive(Debug, Deserialize)]
struct OverseerrRequest {
    media: Option<OverseerrMedia>,
}

#[derive(Debug, Deserialize)]
struct OverseerrMedia {
    #[serde(rename = "imdbId")]
    imdb_id: Option<String>,
    #[serde(rename = "mediaType")]
    media_type: Option<String>,
}

#[async_trait::async_trait]
impl ContentSource for Overseerr {
    fn kind(&self) -> ContentSourceKind {
        ContentSourceKind::Overseerr
    }

    fn initialized(&self) -> bool {
        self.initialized
    }

    fn update_interval(&self) -> Duration {
        self.interval
    }

    async fn fetch(&self) -> Result<Vec<MediaItem>, AppError> {
        let base = self
            .url
            .as_deref()
            .ok_or_else(|| AppError::internal_error("overseerr url missing"))?;
        let url = Url::parse(&format!(
            "{}/api/v1/request?take=100&filter=approved&sort=added",
            base.trim_end_matches('/')
        ))
        .map_err(|e| AppError::internal_error(format!("bad overseerr url: {e}")))?;
        let response: RequestsResponse = self.client.get_json(url).await?;
        let mut out = Vec::new();
        for request in response.results {
            let Some(media) = request.media else { continue };
            match media.imdb_id {
                Some(imdb) if looks_like_imdb_id(&imdb) => {
                    out.push(requested_item(&imdb, self.kind()));
                }
                _ => tracing::debug!(
                    "Overseerr request without imdb id skipped ({:?})",
                    media.media_type
                ),
            }
        }
        Ok(out)
    }
}
