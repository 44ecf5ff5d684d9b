use std::time::Duration;

use reqwest::Url;

use crate::{
    app_state::AppError,
    config::{PlexToken, PlexUrl, CONFIG},
    item::MediaItem,
    request_client::ProviderClient,
};

/// Asks the media server to rescan the folders the symlinker just wrote.
/// Without a configured media server the library tree itself is the index
/// and folders are marked updated directly.
#[derive(Debug)]
pub struct Updater {
    client: ProviderClient,
    url: Option<String>,
    token: Option<String>,
}

impl Updater {
    pub fn new() -> Self {
        let url = CONFIG.get_value::<PlexUrl>().0;
        let token = CONFIG.get_value::<PlexToken>().0;
        if url.is_some() && token.is_some() {
            tracing::info!("Updating the library through the configured media server");
        } else {
            tracing::info!("No media server configured, using the local library updater");
        }
        Self {
            client: ProviderClient::new(
                "plex",
                1,
                Duration::from_secs(1),
                Duration::from_secs(30),
            ),
            url,
            token,
        }
    }

    pub fn initialized(&self) -> bool {
        true
    }

    fn remote(&self) -> Option<(&str, &str)> {
        match (self.url.as_deref(), self.token.as_deref()) {
            (Some(url), Some(token)) => Some((url, token)),
            _ => None,
        }
    }

    /// Refresh every pending update folder of the item and mark it updated,
    /// completing the lifecycle.
    pub async fn run(&self, mut item: MediaItem) -> Result<Vec<MediaItem>, AppError> {
        let mut folders: Vec<String> = Vec::new();
        {
            let meta = item.meta();
            if let Some(folder) = &meta.update_folder {
                if folder != "updated" {
                    folders.push(folder.clone());
                }
            }
        }
        for episode in item.episodes_mut() {
            if let Some(folder) = &episode.meta.update_folder {
                if folder != "updated" && !folders.contains(folder) {
                    folders.push(folder.clone());
                }
            }
        }

        let mut all_ok = true;
        for folder in &folders {
            match self.refresh_folder(folder).await {
                Ok(()) => {}
                Err(e) => {
                    all_ok = false;
                    tracing::warn!("Failed to refresh library folder {folder}: {e}");
                }
            }
        }
        if all_ok {
            if item.meta().update_folder.is_some() {
                item.meta_mut().update_folder = Some("updated".to_string());
            }
            for episode in item.episodes_mut() {
                if episode.meta.update_folder.is_some() {
                    episode.meta.update_folder = Some("updated".to_string());
                }
            }
            tracing::info!("Updated library for {}", item.log_string());
        }
        Ok(vec![item])
    }

    async fn refresh_folder(&self, folder: &str) -> Result<(), AppError> {
        let Some((base, token)) = self.remote() else {
            // local mode: the symlink tree is the library
            return Ok(());
        };
        let mut url = Url::parse(&format!(
            "{}/library/sections/all/refresh",
            base.trim_end_matches('/')
        ))
        .map_err(|e| AppError::internal_error(format!("bad media server url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("path", folder)
            .append_pair("X-Plex-Token", token);
        self.client.get_ok(url).await
    }
}

impl Default for Updater {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::item::State;

    use super::*;

    #[tokio::test]
    async fn local_mode_marks_folders_updated() {
        let updater = Updater {
            client: ProviderClient::new(
                "plex",
                1,
                Duration::from_secs(1),
                Duration::from_secs(1),
            ),
            url: None,
            token: None,
        };
        let mut item = crate::db::tests_support::movie("tt0133093", "The Matrix");
        {
            let meta = item.meta_mut();
            meta.file = Some("m.mkv".into());
            meta.folder = Some("m".into());
            meta.symlinked = true;
            meta.update_folder = Some("/library/movies/The Matrix (1999)".into());
        }
        assert_eq!(item.state(), State::Symlinked);

        let out = updater.run(item).await.unwrap();
        let item = &out[0];
        assert_eq!(item.meta().update_folder.as_deref(), Some("updated"));
        assert_eq!(item.state(), State::Completed);
    }
}
