use std::{collections::HashMap, time::Duration};

use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION},
    Url,
};
use serde::Deserialize;

use crate::{
    app_state::AppError,
    config::{TorboxDownloaderApiKey, TorboxDownloaderEnabled, CONFIG},
    request_client::ProviderClient,
};

use super::{
    selector::{ContainerFile, SeasonCoverage, Selection, TorrentContainer},
    DebridClient, TorrentInfo, TorrentInfoFile, TorrentSummary,
};

const TORBOX_BASE_URL: &str = "https://api.torbox.app/v1/api";

#[derive(Debug)]
pub struct TorboxDownloader {
    client: ProviderClient,
    initialized: bool,
}

impl TorboxDownloader {
    pub async fn new() -> Self {
        let enabled = CONFIG.get_value::<TorboxDownloaderEnabled>().0;
        let api_key = CONFIG.get_value::<TorboxDownloaderApiKey>().0;
        let mut headers = HeaderMap::new();
        if let Some(key) = &api_key {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {key}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        let client = ProviderClient::with_default_headers(
            "torbox",
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
            tracing::warn!("TorBox downloader is enabled but the api key is not set");
            return out;
        }
        out.initialized = out.validate().await;
        out
    }

    async fn validate(&self) -> bool {
        #[derive(Debug, Deserialize)]
        struct Response {
            #[serde(default)]
            success: bool,
        }
        let url = Url::parse(&format!("{TORBOX_BASE_URL}/user/me")).unwrap();
        match self.client.get_json::<Response>(url).await {
            Ok(response) => response.success,
            Err(e) => {
                tracing::error!("Failed to validate TorBox settings: {e}");
                false
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TbResponse<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TbCreated {
    torrent_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TbTorrent {
    #[serde(default)]
    id: i64,
    hash: Option<String>,
    name: Option<String>,
    #[serde(default)]
    files: Vec<TbFile>,
}

#[derive(Debug, Deserialize)]
struct TbFile {
    #[serde(default)]
    id: i64,
    #[serde(rename = "short_name")]
    short_name: Option<String>,
    name: Option<String>,
    #[serde(default)]
    size: u64,
}

#[async_trait::async_trait]
impl DebridClient for TorboxDownloader {
    fn key(&self) -> &'static str {
        "torbox"
    }

    fn initialized(&self) -> bool {
        self.initialized
    }

    fn season_coverage(&self) -> SeasonCoverage {
        SeasonCoverage::Half
    }

    async fn instant_availability(
        &self,
        hashes: &[String],
    ) -> Result<HashMap<String, Vec<TorrentContainer>>, AppError> {
        let mut url = Url::parse(&format!("{TORBOX_BASE_URL}/torrents/checkcached")).unwrap();
        url.query_pairs_mut()
            .append_pair("hash", &hashes.join(","))
            .append_pair("format", "object")
            .append_pair("list_files", "true");
        let response: TbResponse<HashMap<String, TbTorrent>> =
            self.client.get_json(url).await?;
        let cached = response.data.unwrap_or_default();
        let mut out = HashMap::new();
        for (hash, torrent) in cached {
            let files: Vec<ContainerFile> = torrent
                .files
                .into_iter()
                .filter_map(|file| {
                    Some(ContainerFile {
                        file_id: Some(file.id),
                        filename: file.short_name.or(file.name)?,
                        filesize: file.size,
                    })
                })
                .collect();
            if !files.is_empty() {
                out.insert(hash.to_lowercase(), vec![TorrentContainer { files }]);
            }
        }
        Ok(out)
    }

    async fn add_magnet(&self, hash: &str) -> Result<String, AppError> {
        let url = Url::parse(&format!("{TORBOX_BASE_URL}/torrents/createtorrent")).unwrap();
        let magnet = format!("magnet:?xt=urn:btih:{hash}");
        let response: TbResponse<TbCreated> = self
            .client
            .post_form(url, &[("magnet", magnet.as_str())])
            .await?;
        response
            .data
            .and_then(|data| data.torrent_id)
            .map(|id| id.to_string())
            .ok_or_else(|| AppError::internal_error("torbox create returned no torrent id"))
    }

    async fn select_files(
        &self,
        _torrent_id: &str,
        _selection: &Selection,
    ) -> Result<(), AppError> {
        // torbox fetches whole torrents, selection happens client side
        Ok(())
    }

    async fn get_torrent_info(&self, torrent_id: &str) -> Result<TorrentInfo, AppError> {
        let mut url = Url::parse(&format!("{TORBOX_BASE_URL}/torrents/mylist")).unwrap();
        url.query_pairs_mut().append_pair("id", torrent_id);
        let response: TbResponse<TbTorrent> = self.client.get_json(url).await?;
        let torrent = response
            .data
            .ok_or_else(|| AppError::not_found("torbox torrent not found"))?;
        Ok(TorrentInfo {
            id: torrent.id.to_string(),
            filename: torrent.name,
            alternative_filename: None,
            files: torrent
                .files
                .into_iter()
                .filter_map(|file| {
                    Some(TorrentInfoFile {
                        id: file.id,
                        path: file.name.or(file.short_name)?,
                        bytes: file.size,
                        selected: true,
                    })
                })
                .collect(),
        })
    }

    async fn get_torrents(&self) -> Result<HashMap<String, TorrentSummary>, AppError> {
        let url = Url::parse(&format!("{TORBOX_BASE_URL}/torrents/mylist")).unwrap();
        let response: TbResponse<Vec<TbTorrent>> = self.client.get_json(url).await?;
        let torrents = response.data.unwrap_or_default();
        Ok(torrents
            .into_iter()
            .filter_map(|torrent| {
                let hash = torrent.hash.clone()?.to_lowercase();
                Some((
                    hash.clone(),
                    TorrentSummary {
                        id: torrent.id.to_string(),
                        hash,
                        filename: torrent.name,
                    },
                ))
            })
            .collect())
    }
}
