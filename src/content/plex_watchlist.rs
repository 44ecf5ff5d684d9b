use std::time::Duration;

use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT},
    Url,
};

use crate::{
    app_state::AppError,
    config::{PlexToken, PlexWatchlistEnabled, PlexWatchlistInterval, PlexWatchlistRss, CONFIG},
    events::ContentSourceKind,
    item::MediaItem,
    request_client::ProviderClient,
};

use super::{looks_like_imdb_id, requested_item, ContentSource};

const WATCHLIST_URL: &str = "https://metadata.provider.plex.tv/library/sections/watchlist/all";

#[derive(Debug)]
pub struct PlexWatchlist {
    client: ProviderClient,
    token: Option<String>,
    rss_url: Option<String>,
    interval: Duration,
    initialized: bool,
}

impl PlexWatchlist {
    pub fn new() -> Self {
        let enabled = CONFIG.get_value::<PlexWatchlistEnabled>().0;
        let token = CONFIG.get_value::<PlexToken>().0;
        let rss_url = CONFIG.get_value::<PlexWatchlistRss>().0;
        if enabled && token.is_none() && rss_url.is_none() {
            tracing::warn!("Plex watchlist is enabled but neither token nor rss url is set");
        }
        // plex metadata endpoints answer with xml unless asked for json
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        Self {
            client: ProviderClient::with_default_headers(
                "plex-watchlist",
                1,
                Duration::from_secs(1),
                Duration::from_secs(30),
                headers,
            ),
            initialized: enabled && (token.is_some() || rss_url.is_some()),
            token,
            rss_url,
            interval: Duration::from_secs(CONFIG.get_value::<PlexWatchlistInterval>().0),
        }
    }

    /// Guids look like `imdb://tt0133093`; the watchlist json mixes imdb,
    /// tmdb and tvdb entries per item.
    fn imdb_ids_from_container(value: &serde_json::Value) -> Vec<String> {
        let mut out = Vec::new();
        let Some(items) = value
            .pointer("/MediaContainer/Metadata")
            .and_then(|metadata| metadata.as_array())
        else {
            return out;
        };
        for item in items {
            let Some(guids) = item.get("Guid").and_then(|guid| guid.as_array()) else {
                continue;
            };
            for guid in guids {
                let Some(id) = guid.get("id").and_then(|id| id.as_str()) else {
                    continue;
                };
                if let Some(imdb) = id.strip_prefix("imdb://") {
                    if looks_like_imdb_id(imdb) {
                        out.push(imdb.to_string());
                    }
                }
            }
        }
        out
    }

    fn imdb_ids_from_rss(value: &serde_json::Value) -> Vec<String> {
        let mut out = Vec::new();
        let Some(items) = value.pointer("/items").and_then(|items| items.as_array()) else {
            return out;
        };
        for item in items {
            let Some(guids) = item.get("guids").and_then(|guids| guids.as_array()) else {
                continue;
            };
            for guid in guids {
                if let Some(raw) = guid.as_str() {
                    if let Some(imdb) = raw.strip_prefix("imdb://") {
                        if looks_like_imdb_id(imdb) {
                            out.push(imdb.to_string());
                        }
                    }
                }
            }
        }
        out
    }
}

impl Default for PlexWatchlist {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ContentSource for PlexWatchlist {
    fn kind(&self) -> ContentSourceKind {
        ContentSourceKind::PlexWatchlist
    }

    fn initialized(&self) -> bool {
        self.initialized
    }

    fn update_interval(&self) -> Duration {
        self.interval
    }

    async fn fetch(&self) -> Result<Vec<MediaItem>, AppError> {
        let mut ids = Vec::new();
        if let Some(token) = &self.token {
            let mut url = Url::parse(WATCHLIST_URL).unwrap();
            url.query_pairs_mut()
                .append_pair("X-Plex-Token", token)
                .append_pair("format", "json");
            let response: serde_json::Value = self.client.get_json(url).await?;
            ids.extend(Self::imdb_ids_from_container(&response));
        }
        if let Some(rss) = &self.rss_url {
            let url = Url::parse(rss)
                .map_err(|e| AppError::internal_error(format!("bad rss url: {e}")))?;
            match self.client.get_json::<serde_json::Value>(url).await {
                Ok(response) => ids.extend(Self::imdb_ids_from_rss(&response)),
                Err(e) => tracing::warn!("Plex watchlist rss fetch failed: {e}"),
            }
        }
        ids.sort();
        ids.dedup();
        Ok(ids
            .into_iter()
            .map(|imdb| requested_item(&imdb, self.kind()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_guids_yield_imdb_ids() {
        let payload = serde_json::json!({
            "MediaContainer": {
                "Metadata": [
                    {"Guid": [
                        {"id": "imdb://tt0133093"},
                        {"id": "tmdb://603"}
                    ]},
                    {"Guid": [{"id": "tvdb://290434"}]}
                ]
            }
        });
        let ids = PlexWatchlist::imdb_ids_from_container(&payload);
        assert_eq!(ids, vec!["tt0133093".to_string()]);
    }

    #[test]
    fn rss_guids_yield_imdb_ids() {
        let payload = serde_json::json!({
            "items": [
                {"guids": ["imdb://tt0000001", "tmdb://1"]}
            ]
        });
        let ids = PlexWatchlist::imdb_ids_from_rss(&payload);
        assert_eq!(ids, vec!["tt0000001".to_string()]);
    }
}
