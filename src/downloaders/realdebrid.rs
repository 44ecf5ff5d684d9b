use std::{collections::HashMap, time::Duration};

use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION},
    Url,
};
use serde::Deserialize;

use crate::{
    app_state::AppError,
    config::{RealDebridApiKey, RealDebridEnabled, CONFIG},
    request_client::ProviderClient,
};

use super::{
    selector::{ContainerFile, SeasonCoverage, Selection, TorrentContainer},
    DebridClient, TorrentInfo, TorrentInfoFile, TorrentSummary,
};

const RD_BASE_URL: &str = "https://api.real-debrid.com/rest/1.0";

#[derive(Debug)]
pub struct RealDebrid {
    client: ProviderClient,
    initialized: bool,
}

impl RealDebrid {
    pub async fn new() -> Self {
        let enabled = CONFIG.get_value::<RealDebridEnabled>().0;
        let api_key = CONFIG.get_value::<RealDebridApiKey>().0;
        let mut headers = HeaderMap::new();
        if let Some(key) = &api_key {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {key}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        let client = ProviderClient::with_default_headers(
            "realdebrid",
            5,
            Duration::from_secs(1),
            Duration::from_secs(60),
            headers,
        );
        let mut out = Self {
            client,
            initialized: false,
        };
        if !enabled {
            return out;
        }
        if api_key.is_none() {
            tracing::warn!("Real-Debrid is enabled but the api key is not set");
            return out;
        }
        out.initialized = out.validate().await;
        out
    }

    /// Settings are only good when the account is premium.
    async fn validate(&self) -> bool {
        #[derive(Debug, Deserialize)]
        struct User {
            #[serde(default)]
            premium: i64,
        }
        let url = Url::parse(&format!("{RD_BASE_URL}/user")).unwrap();
        match self.client.get_json::<User>(url).await {
            Ok(user) => user.premium > 0,
            Err(e) => {
                tracing::error!("Failed to validate Real-Debrid settings: {e}");
                false
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RdAddMagnetResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RdTorrentInfo {
    id: String,
    filename: Option<String>,
    original_filename: Option<String>,
    #[serde(default)]
    files: Vec<RdTorrentFile>,
}

#[derive(Debug, Deserialize)]
struct RdTorrentFile {
    id: i64,
    path: String,
    bytes: u64,
    #[serde(default)]
    selected: i64,
}

#[derive(Debug, Deserialize)]
struct RdTorrentListEntry {
    id: String,
    hash: String,
    filename: Option<String>,
}

#[async_trait::async_trait]
impl DebridClient for RealDebrid {
    fn key(&self) -> &'static str {
        "realdebrid"
    }

    fn initialized(&self) -> bool {
        self.initialized
    }

    fn season_coverage(&self) -> SeasonCoverage {
        SeasonCoverage::Strict
    }

    async fn instant_availability(
        &self,
        hashes: &[String],
    ) -> Result<HashMap<String, Vec<TorrentContainer>>, AppError> {
        let joined = hashes.join("/");
        let url = Url::parse(&format!(
            "{RD_BASE_URL}/torrents/instantAvailability/{joined}/"
        ))
        .map_err(|e| AppError::internal_error(format!("bad availability url: {e}")))?;
        // uncached hashes come back as empty arrays instead of maps, so the
        // response has to be walked dynamically
        let response: serde_json::Value = self.client.get_json(url).await?;
        let mut out = HashMap::new();
        let Some(object) = response.as_object() else {
            return Ok(out);
        };
        for (hash, providers) in object {
            let Some(rd) = providers.get("rd").and_then(|value| value.as_array()) else {
                continue;
            };
            let mut containers = Vec::new();
            for variant in rd {
                let Some(variant) = variant.as_object() else {
                    continue;
                };
                let files: Vec<ContainerFile> = variant
                    .iter()
                    .filter_map(|(file_id, file)| {
                        Some(ContainerFile {
                            file_id: file_id.parse().ok(),
                            filename: file.get("filename")?.as_str()?.to_string(),
                            filesize: file.get("filesize")?.as_u64()?,
                        })
                    })
                    .collect();
                if !files.is_empty() {
                    containers.push(TorrentContainer { files });
                }
            }
            if !containers.is_empty() {
                out.insert(hash.to_lowercase(), containers);
            }
        }
        Ok(out)
    }

    async fn add_magnet(&self, hash: &str) -> Result<String, AppError> {
        let url = Url::parse(&format!("{RD_BASE_URL}/torrents/addMagnet")).unwrap();
        let magnet = format!("magnet:?xt=urn:btih:{hash}&dn=&tr=");
        let response: RdAddMagnetResponse = self
            .client
            .post_form(url, &[("magnet", magnet.as_str())])
            .await?;
        Ok(response.id)
    }

    async fn select_files(
        &self,
        torrent_id: &str,
        selection: &Selection,
    ) -> Result<(), AppError> {
        let ids = selection.file_ids();
        let files = if ids.is_empty() {
            "all".to_string()
        } else {
            ids.iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        let url = Url::parse(&format!(
            "{RD_BASE_URL}/torrents/selectFiles/{torrent_id}"
        ))
        .unwrap();
        self.client
            .post_form_ok(url, &[("files", files.as_str())])
            .await
    }

    async fn get_torrent_info(&self, torrent_id: &str) -> Result<TorrentInfo, AppError> {
        let url = Url::parse(&format!("{RD_BASE_URL}/torrents/info/{torrent_id}")).unwrap();
        let info: RdTorrentInfo = self.client.get_json(url).await?;
        Ok(TorrentInfo {
            id: info.id,
            filename: info.filename,
            alternative_filename: info.original_filename,
            files: info
                .files
                .into_iter()
                .map(|file| TorrentInfoFile {
                    id: file.id,
                    path: file.path,
                    bytes: file.bytes,
                    selected: file.selected == 1,
                })
                .collect(),
        })
    }

    async fn get_torrents(&self) -> Result<HashMap<String, TorrentSummary>, AppError> {
        let url = Url::parse(&format!("{RD_BASE_URL}/torrents?limit=1000")).unwrap();
        let torrents: Vec<RdTorrentListEntry> = self.client.get_json(url).await?;
        Ok(torrents
            .into_iter()
            .map(|torrent| {
                (
                    torrent.hash.to_lowercase(),
                    TorrentSummary {
                        id: torrent.id,
                        hash: torrent.hash.to_lowercase(),
                        filename: torrent.filename,
                    },
                )
            })
            .collect())
    }
}
