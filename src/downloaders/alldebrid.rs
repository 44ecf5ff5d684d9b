use std::{collections::HashMap, time::Duration};

use reqwest::Url;
use serde::Deserialize;

use crate::{
    app_state::AppError,
    config::{AllDebridApiKey, AllDebridEnabled, CONFIG},
    request_client::ProviderClient,
};

use super::{
    selector::{ContainerFile, SeasonCoverage, Selection, TorrentContainer},
    DebridClient, TorrentInfo, TorrentInfoFile, TorrentSummary,
};

const AD_BASE_URL: &str = "https://api.alldebrid.com/v4";
const AD_AGENT: &str = "mediaFetcher";

/// AllDebrid reports one flat file list per magnet and selects everything on
/// upload, so season acceptance runs with the looser half coverage rule.
#[derive(Debug)]
pub struct AllDebrid {
    client: ProviderClient,
    api_key: Option<String>,
    initialized: bool,
}

impl AllDebrid {
    pub async fn new() -> Self {
        let enabled = CONFIG.get_value::<AllDebridEnabled>().0;
        let api_key = CONFIG.get_value::<AllDebridApiKey>().0;
        let client = ProviderClient::new(
            "alldebrid",
            5,
            Duration::from_secs(1),
            Duration::from_secs(60),
        );
        let mut out = Self {
            client,
            api_key,
            initialized: false,
        };
        if !enabled {
            return out;
        }
        if out.api_key.is_none() {
            tracing::warn!("AllDebrid is enabled but the api key is not set");
            return out;
        }
        out.initialized = out.validate().await;
        out
    }

    fn url(&self, path: &str) -> Result<Url, AppError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::internal_error("alldebrid key missing"))?;
        let mut url = Url::parse(&format!("{AD_BASE_URL}/{path}"))
            .map_err(|e| AppError::internal_error(format!("bad alldebrid url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("agent", AD_AGENT)
            .append_pair("apikey", key);
        Ok(url)
    }

    async fn validate(&self) -> bool {
        #[derive(Debug, Deserialize)]
        struct Response {
            data: Option<Data>,
        }
        #[derive(Debug, Deserialize)]
        struct Data {
            user: Option<User>,
        }
        #[derive(Debug, Deserialize)]
        struct User {
            #[serde(rename = "isPremium", default)]
            is_premium: bool,
        }
        let Ok(url) = self.url("user") else {
            return false;
        };
        match self.client.get_json::<Response>(url).await {
            Ok(response) => response
                .data
                .and_then(|data| data.user)
                .map_or(false, |user| user.is_premium),
            Err(e) => {
                tracing::error!("Failed to validate AllDebrid settings: {e}");
                false
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct AdResponse<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct AdMagnets {
    #[serde(default)]
    magnets: Vec<AdMagnet>,
}

#[derive(Debug, Deserialize)]
struct AdMagnet {
    #[serde(default)]
    id: i64,
    hash: Option<String>,
    filename: Option<String>,
    #[serde(default)]
    instant: bool,
    #[serde(default)]
    files: Vec<AdFile>,
    #[serde(default)]
    links: Vec<AdLink>,
}

#[derive(Debug, Deserialize)]
struct AdFile {
    #[serde(rename = "n")]
    name: Option<String>,
    #[serde(rename = "s", default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct AdLink {
    filename: Option<String>,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct AdStatus {
    magnets: Option<AdMagnet>,
}

#[async_trait::async_trait]
impl DebridClient for AllDebrid {
    fn key(&self) -> &'static str {
        "alldebrid"
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
        let mut url = self.url("magnet/instant")?;
        for hash in hashes {
            url.query_pairs_mut().append_pair("magnets[]", hash);
        }
        let response: AdResponse<AdMagnets> = self.client.get_json(url).await?;
        let magnets = response.data.map(|data| data.magnets).unwrap_or_default();
        let mut out = HashMap::new();
        for magnet in magnets {
            if !magnet.instant {
                continue;
            }
            let Some(hash) = magnet.hash else { continue };
            let files: Vec<ContainerFile> = magnet
                .files
                .into_iter()
                .filter_map(|file| {
                    Some(ContainerFile {
                        file_id: None,
                        filename: file.name?,
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
        let mut url = self.url("magnet/upload")?;
        url.query_pairs_mut().append_pair("magnets[]", hash);
        let response: AdResponse<AdMagnets> = self.client.get_json(url).await?;
        response
            .data
            .and_then(|data| data.magnets.into_iter().next())
            .map(|magnet| magnet.id.to_string())
            .ok_or_else(|| AppError::internal_error("alldebrid upload returned no magnet"))
    }

    async fn select_files(
        &self,
        _torrent_id: &str,
        _selection: &Selection,
    ) -> Result<(), AppError> {
        // every file of a magnet is fetched, there is nothing to select
        Ok(())
    }

    async fn get_torrent_info(&self, torrent_id: &str) -> Result<TorrentInfo, AppError> {
        let mut url = self.url("magnet/status")?;
        url.query_pairs_mut().append_pair("id", torrent_id);
        let response: AdResponse<AdStatus> = self.client.get_json(url).await?;
        let magnet = response
            .data
            .and_then(|data| data.magnets)
            .ok_or_else(|| AppError::not_found("alldebrid magnet not found"))?;
        let files = magnet
            .links
            .into_iter()
            .enumerate()
            .filter_map(|(index, link)| {
                Some(TorrentInfoFile {
                    id: index as i64,
                    path: link.filename?,
                    bytes: link.size,
                    selected: true,
                })
            })
            .collect();
        Ok(TorrentInfo {
            id: magnet.id.to_string(),
            filename: magnet.filename,
            alternative_filename: None,
            files,
        })
    }

    async fn get_torrents(&self) -> Result<HashMap<String, TorrentSummary>, AppError> {
        let url = self.url("magnet/status")?;
        let response: AdResponse<AdMagnets> = self.client.get_json(url).await?;
        let magnets = response.data.map(|data| data.magnets).unwrap_or_default();
        Ok(magnets
            .into_iter()
            .filter_map(|magnet| {
                let hash = magnet.hash.clone()?.to_lowercase();
                Some((
                    hash.clone(),
                    TorrentSummary {
                        id: magnet.id.to_string(),
                        hash,
                        filename: magnet.filename,
                    },
                ))
            })
            .collect())
    }
}
