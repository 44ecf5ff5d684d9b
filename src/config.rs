use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    path::PathBuf,
    sync::LazyLock,
};

use clap::Parser;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::watch;

use crate::app_state::AppError;

const APP_NAME: &str = "media-fetcher";

/// A single typed setting. Every setting is a newtype so lookups are
/// compile-time checked and the TOML/env keys live next to the type.
pub trait ConfigValue:
    'static + Send + Sync + Default + Clone + Serialize + DeserializeOwned
{
    const KEY: &'static str;
    const ENV_KEY: Option<&'static str> = None;
}

#[derive(Debug, Default)]
struct SettingValue<T> {
    default: T,
    config: Option<T>,
    cli: Option<T>,
    env: Option<T>,
}

#[derive(Debug, Serialize)]
pub struct SerializedSetting {
    key: String,
    default_value: serde_json::Value,
    config_value: serde_json::Value,
    cli_value: serde_json::Value,
    env_value: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct ConfigurationApplyError {
    pub message: String,
    pub key: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ConfigurationApplyResult {
    pub errors: Vec<ConfigurationApplyError>,
}

impl<T: ConfigValue> SettingValue<T> {
    fn new(val: T) -> Self {
        let env_key = T::ENV_KEY
            .map(str::to_string)
            .unwrap_or_else(|| T::KEY.to_uppercase());
        let env = std::env::var(env_key).ok().and_then(|val| {
            match serde_plain::from_str(&val) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(
                        found = val,
                        "Found env value but could not parse it as {}. {e}",
                        type_name::<T>()
                    );
                    None
                }
            }
        });
        Self {
            default: val,
            config: None,
            cli: None,
            env,
        }
    }

    /// Setting value with respect to it's source priority
    fn customized(&self) -> &T {
        self.cli
            .as_ref()
            .or(self.env.as_ref())
            .or(self.config.as_ref())
            .unwrap_or(&self.default)
    }
}

trait AnySettingValue: 'static + Send + Sync {
    fn key(&self) -> &'static str;
    fn customized_value(&self) -> &dyn Any;
    fn config_mut(&mut self) -> &mut dyn Any;
    fn cli_mut(&mut self) -> &mut dyn Any;
    fn reset_config_value(&mut self);
    fn serialize_config(&self) -> Option<toml::Value>;
    fn serialize_response(&self) -> SerializedSetting;
    fn deserialize_toml(&mut self, from: toml::Value) -> Result<(), toml::de::Error>;
    fn deserialize_json(&mut self, from: serde_json::Value) -> Result<(), serde_json::Error>;
}

impl<T: ConfigValue> AnySettingValue for SettingValue<T> {
    fn key(&self) -> &'static str {
        T::KEY
    }

    fn deserialize_toml(&mut self, from: toml::Value) -> Result<(), toml::de::Error> {
        let value = T::deserialize(from)?;
        self.config = Some(value);
        Ok(())
    }

    fn deserialize_json(&mut self, json: serde_json::Value) -> Result<(), serde_json::Error> {
        match json {
            serde_json::Value::Null => {
                self.config = None;
            }
            _ => {
                let value = serde_json::from_value(json)?;
                self.config = Some(value);
            }
        }
        Ok(())
    }

    fn serialize_config(&self) -> Option<toml::Value> {
        let value = self.config.clone();
        Some(toml::Value::try_from(value?).unwrap())
    }

    fn serialize_response(&self) -> SerializedSetting {
        let serialize = |t: Option<&T>| serde_json::to_value(t).unwrap();
        SerializedSetting {
            key: self.key().to_string(),
            default_value: serialize(Some(&self.default)),
            config_value: serialize(self.config.as_ref()),
            cli_value: serialize(self.cli.as_ref()),
            env_value: serialize(self.env.as_ref()),
        }
    }

    fn customized_value(&self) -> &dyn Any {
        self.customized()
    }

    fn config_mut(&mut self) -> &mut dyn Any {
        &mut self.config
    }

    fn cli_mut(&mut self) -> &mut dyn Any {
        &mut self.cli
    }

    fn reset_config_value(&mut self) {
        self.config = None;
    }
}

pub static CONFIG: LazyLock<ConfigStore> = LazyLock::new(ConfigStore::construct);

#[derive(Clone)]
pub struct ConfigStore {
    settings: watch::Sender<HashMap<TypeId, Box<dyn AnySettingValue>>>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore").finish()
    }
}

impl ConfigStore {
    pub fn construct() -> Self {
        let store = Self::new();

        store.register_value::<Port>();
        store.register_value::<RclonePath>();
        store.register_value::<LibraryPath>();
        store.register_value::<VideoExtensions>();
        store.register_value::<MovieFilesizeMinMb>();
        store.register_value::<MovieFilesizeMaxMb>();
        store.register_value::<EpisodeFilesizeMinMb>();
        store.register_value::<EpisodeFilesizeMaxMb>();
        store.register_value::<ScrapeAfter2>();
        store.register_value::<ScrapeAfter5>();
        store.register_value::<ScrapeAfter10>();
        store.register_value::<SymlinkRepairEnabled>();
        store.register_value::<SymlinkRepairInterval>();
        store.register_value::<SubtitlesEnabled>();
        store.register_value::<Include4k>();
        store.register_value::<HighestQuality>();
        store.register_value::<RepackProper>();
        store.register_value::<DualAudio>();
        store.register_value::<AllowAv1>();
        store.register_value::<PreferredLanguages>();
        store.register_value::<TraktClientId>();
        store.register_value::<PlexUrl>();
        store.register_value::<PlexToken>();
        store.register_value::<OverseerrEnabled>();
        store.register_value::<OverseerrUrl>();
        store.register_value::<OverseerrApiKey>();
        store.register_value::<OverseerrInterval>();
        store.register_value::<MdblistEnabled>();
        store.register_value::<MdblistApiKey>();
        store.register_value::<MdblistLists>();
        store.register_value::<MdblistInterval>();
        store.register_value::<PlexWatchlistEnabled>();
        store.register_value::<PlexWatchlistRss>();
        store.register_value::<PlexWatchlistInterval>();
        store.register_value::<TorrentioEnabled>();
        store.register_value::<TorrentioFilter>();
        store.register_value::<OrionoidEnabled>();
        store.register_value::<OrionoidApiKey>();
        store.register_value::<JackettEnabled>();
        store.register_value::<JackettUrl>();
        store.register_value::<JackettApiKey>();
        store.register_value::<JackettIndexers>();
        store.register_value::<MediafusionEnabled>();
        store.register_value::<MediafusionUrl>();
        store.register_value::<TorboxScraperEnabled>();
        store.register_value::<CometEnabled>();
        store.register_value::<CometUrl>();
        store.register_value::<RealDebridEnabled>();
        store.register_value::<RealDebridApiKey>();
        store.register_value::<AllDebridEnabled>();
        store.register_value::<AllDebridApiKey>();
        store.register_value::<TorboxDownloaderEnabled>();
        store.register_value::<TorboxDownloaderApiKey>();

        store
    }

    pub fn new() -> Self {
        let (settings_tx, _) = watch::channel(HashMap::new());
        Self {
            settings: settings_tx,
        }
    }

    pub fn register_value<T: ConfigValue>(&self) {
        let default = T::default();
        self.settings.send_modify(|setting| {
            setting.insert(TypeId::of::<T>(), Box::new(SettingValue::new(default)));
        });
    }

    pub fn get_value<T: ConfigValue>(&self) -> T {
        let settings = self.settings.borrow();
        let setting = settings
            .get(&TypeId::of::<T>())
            .unwrap_or_else(|| panic!("unregistered setting type {}", type_name::<T>()));
        let t: &T = setting.customized_value().downcast_ref().unwrap();
        t.clone()
    }

    pub fn update_value<T: ConfigValue>(&self, new: T) {
        self.settings.send_modify(|settings| {
            let setting = settings
                .get_mut(&TypeId::of::<T>())
                .unwrap_or_else(|| panic!("unregistered setting type {}", type_name::<T>()));
            let value = setting.config_mut();
            let value = value.downcast_mut().unwrap();
            *value = Some(new);
        });
    }

    pub fn apply_cli_value<T: ConfigValue>(&self, value: T) {
        self.settings.send_modify(|settings| {
            let setting = settings
                .get_mut(&TypeId::of::<T>())
                .unwrap_or_else(|| panic!("unregistered setting type {}", type_name::<T>()));
            let val = setting.cli_mut().downcast_mut().unwrap();
            *val = Some(value);
        });
    }

    pub fn construct_table(&self) -> toml::Table {
        let mut table = toml::Table::new();
        let settings = self.settings.borrow();
        for setting in settings.values() {
            let Some(value) = setting.serialize_config() else {
                continue;
            };
            table.insert(setting.key().to_string(), value);
        }
        table
    }

    pub fn json(&self) -> Vec<SerializedSetting> {
        let settings = self.settings.borrow();
        let mut out = Vec::with_capacity(settings.len());
        for setting in settings.values() {
            out.push(setting.serialize_response());
        }
        out
    }

    pub fn apply_toml_settings(&self, table: toml::Table) {
        self.settings.send_modify(|settings| {
            for setting in settings.values_mut() {
                if let Some(val) = table.get(setting.key()).cloned() {
                    if let Err(err) = setting.deserialize_toml(val) {
                        tracing::warn!(
                            "Failed to deserialize toml value for {}: {err}",
                            setting.key()
                        )
                    };
                }
            }
        });
    }

    pub fn apply_json(
        &self,
        value: serde_json::Value,
    ) -> Result<ConfigurationApplyResult, AppError> {
        let mut result = ConfigurationApplyResult::default();
        let obj = match value {
            serde_json::Value::Object(obj) => obj,
            _ => return Err(AppError::bad_request("Provided json must be object")),
        };

        self.settings.send_modify(|settings| {
            for setting in settings.values_mut() {
                if let Some(val) = obj.get(setting.key()).cloned() {
                    if let Err(err) = setting.deserialize_json(val) {
                        tracing::warn!(
                            "Failed to deserialize json value for {}: {err}",
                            setting.key()
                        );
                        result.errors.push(ConfigurationApplyError {
                            key: setting.key().to_string(),
                            message: err.to_string(),
                        });
                    }
                }
            }
        });
        Ok(result)
    }

    pub fn reset_config_values(&self) {
        self.settings.send_modify(|settings| {
            for setting in settings.values_mut() {
                setting.reset_config_value();
            }
        });
    }

    /// Future resolves when any setting changes. Used by the orchestrator to
    /// re-validate services after a configuration update.
    pub async fn changed(&self) {
        let mut rx = self.settings.subscribe();
        rx.mark_unchanged();
        let _ = rx.changed().await;
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker pool size for a service, `<SERVICE>_MAX_WORKERS` env (default 1).
pub fn max_workers(service_name: &str) -> usize {
    let env_var = format!("{}_MAX_WORKERS", service_name.to_uppercase());
    std::env::var(&env_var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1)
}

// App file locations

#[derive(Debug)]
pub struct AppResources;

pub static APP_RESOURCES: LazyLock<PathBuf> = LazyLock::new(|| {
    if cfg!(debug_assertions) {
        PathBuf::from(".")
    } else {
        dirs::data_dir()
            .expect("data directory to be resolvable")
            .join(APP_NAME)
    }
});

impl AppResources {
    pub fn initiate() -> anyhow::Result<()> {
        let base = &*APP_RESOURCES;
        std::fs::create_dir_all(base.join("db"))?;
        std::fs::create_dir_all(base.join("logs"))?;
        Ok(())
    }

    pub fn database_path() -> PathBuf {
        APP_RESOURCES.join("db").join("media_fetcher.sqlite")
    }

    pub fn hash_cache_path() -> PathBuf {
        APP_RESOURCES.join("hash_cache.json")
    }

    pub fn config_path() -> PathBuf {
        APP_RESOURCES.join("config.toml")
    }

    pub fn logs_dir() -> PathBuf {
        APP_RESOURCES.join("logs")
    }
}

pub struct ConfigFile;

impl ConfigFile {
    pub async fn open_and_read() -> anyhow::Result<toml::Table> {
        let raw = tokio::fs::read_to_string(AppResources::config_path()).await?;
        Ok(raw.parse()?)
    }

    pub async fn save() -> anyhow::Result<()> {
        let table = CONFIG.construct_table();
        tokio::fs::write(AppResources::config_path(), table.to_string()).await?;
        Ok(())
    }
}

#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Args {
    /// Port for the admin API
    #[arg(long)]
    pub port: Option<u16>,
    /// Root of the debrid provider mount
    #[arg(long)]
    pub rclone_path: Option<PathBuf>,
    /// Root of the symlink library
    #[arg(long)]
    pub library_path: Option<PathBuf>,
}

impl Args {
    pub fn apply_configuration(self) {
        if let Some(port) = self.port {
            CONFIG.apply_cli_value(Port(port));
        }
        if let Some(path) = self.rclone_path {
            CONFIG.apply_cli_value(RclonePath(Some(path)));
        }
        if let Some(path) = self.library_path {
            CONFIG.apply_cli_value(LibraryPath(Some(path)));
        }
    }
}

// Settings

macro_rules! config_value {
    ($(#[$doc:meta])* $name:ident, $inner:ty, $key:literal, $default:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct $name(pub $inner);

        impl Default for $name {
            fn default() -> Self {
                Self($default)
            }
        }

        impl ConfigValue for $name {
            const KEY: &'static str = $key;
        }
    };
}

config_value!(
    /// The network port on which the admin API listens
    Port, u16, "port", 8484
);
config_value!(
    /// Absolute path of the debrid provider mount root
    RclonePath, Option<PathBuf>, "rclone_path", None
);
config_value!(
    /// Absolute path the symlink library is materialized into
    LibraryPath, Option<PathBuf>, "library_path", None
);
config_value!(
    /// File extensions considered playable video
    VideoExtensions, Vec<String>, "video_extensions",
    vec!["mkv".to_string(), "mp4".to_string(), "avi".to_string()]
);
config_value!(MovieFilesizeMinMb, i64, "movie_filesize_min_mb", 200);
config_value!(
    /// -1 disables the bound
    MovieFilesizeMaxMb, i64, "movie_filesize_max_mb", -1
);
config_value!(EpisodeFilesizeMinMb, i64, "episode_filesize_min_mb", 40);
config_value!(EpisodeFilesizeMaxMb, i64, "episode_filesize_max_mb", -1);
config_value!(
    /// Hours between scrapes after the second attempt
    ScrapeAfter2, f64, "scrape_after_2", 0.5
);
config_value!(
    /// Hours between scrapes after the fifth attempt
    ScrapeAfter5, f64, "scrape_after_5", 6.0
);
config_value!(
    /// Hours between scrapes after the tenth attempt
    ScrapeAfter10, f64, "scrape_after_10", 24.0
);
config_value!(SymlinkRepairEnabled, bool, "repair_symlinks", false);
config_value!(
    /// Hours between symlink repair sweeps
    SymlinkRepairInterval, u64, "repair_interval", 6
);
config_value!(SubtitlesEnabled, bool, "subtitles_enabled", false);
config_value!(Include4k, bool, "include_4k", false);
config_value!(HighestQuality, bool, "highest_quality", false);
config_value!(RepackProper, bool, "repack_proper", true);
config_value!(DualAudio, bool, "dual_audio", true);
config_value!(
    /// Not all devices can decode AV1
    AllowAv1, bool, "allow_av1", false
);
config_value!(
    PreferredLanguages, Vec<String>, "preferred_languages",
    vec!["English".to_string()]
);
config_value!(TraktClientId, Option<String>, "trakt_client_id", None);
config_value!(PlexUrl, Option<String>, "plex_url", None);
config_value!(PlexToken, Option<String>, "plex_token", None);
config_value!(OverseerrEnabled, bool, "overseerr_enabled", false);
config_value!(OverseerrUrl, Option<String>, "overseerr_url", None);
config_value!(OverseerrApiKey, Option<String>, "overseerr_api_key", None);
config_value!(
    /// Seconds between Overseerr request polls
    OverseerrInterval, u64, "overseerr_interval", 60
);
config_value!(MdblistEnabled, bool, "mdblist_enabled", false);
config_value!(MdblistApiKey, Option<String>, "mdblist_api_key", None);
config_value!(MdblistLists, Vec<String>, "mdblist_lists", Vec::new());
config_value!(MdblistInterval, u64, "mdblist_interval", 300);
config_value!(PlexWatchlistEnabled, bool, "plex_watchlist_enabled", false);
config_value!(
    /// Optional RSS feed url next to the token based watchlist endpoint
    PlexWatchlistRss, Option<String>, "plex_watchlist_rss", None
);
config_value!(PlexWatchlistInterval, u64, "plex_watchlist_interval", 60);
config_value!(TorrentioEnabled, bool, "torrentio_enabled", false);
config_value!(
    TorrentioFilter, String, "torrentio_filter",
    "sort=qualitysize%7Cqualityfilter:480p,scr,cam".to_string()
);
config_value!(OrionoidEnabled, bool, "orionoid_enabled", false);
config_value!(OrionoidApiKey, Option<String>, "orionoid_api_key", None);
config_value!(JackettEnabled, bool, "jackett_enabled", false);
config_value!(JackettUrl, Option<String>, "jackett_url", None);
config_value!(JackettApiKey, Option<String>, "jackett_api_key", None);
config_value!(
    /// Indexers queried in parallel, each behind its own limiter
    JackettIndexers, Vec<String>, "jackett_indexers", vec!["all".to_string()]
);
config_value!(MediafusionEnabled, bool, "mediafusion_enabled", false);
config_value!(MediafusionUrl, Option<String>, "mediafusion_url", None);
config_value!(TorboxScraperEnabled, bool, "torbox_scraper_enabled", false);
config_value!(CometEnabled, bool, "comet_enabled", false);
config_value!(CometUrl, Option<String>, "comet_url", None);
config_value!(RealDebridEnabled, bool, "real_debrid_enabled", false);
config_value!(RealDebridApiKey, Option<String>, "real_debrid_api_key", None);
config_value!(AllDebridEnabled, bool, "all_debrid_enabled", false);
config_value!(AllDebridApiKey, Option<String>, "all_debrid_api_key", None);
config_value!(TorboxDownloaderEnabled, bool, "torbox_downloader_enabled", false);
config_value!(
    TorboxDownloaderApiKey, Option<String>, "torbox_downloader_api_key", None
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layering_prefers_cli_over_config() {
        let store = ConfigStore::new();
        store.register_value::<Port>();
        assert_eq!(store.get_value::<Port>(), Port(8484));

        store.update_value(Port(9000));
        assert_eq!(store.get_value::<Port>(), Port(9000));

        store.apply_cli_value(Port(9001));
        assert_eq!(store.get_value::<Port>(), Port(9001));
    }

    #[test]
    fn toml_round_trip() {
        let store = ConfigStore::new();
        store.register_value::<ScrapeAfter2>();
        store.register_value::<VideoExtensions>();
        let table: toml::Table = "scrape_after_2 = 1.5\nvideo_extensions = [\"mkv\"]"
            .parse()
            .unwrap();
        store.apply_toml_settings(table);
        assert_eq!(store.get_value::<ScrapeAfter2>(), ScrapeAfter2(1.5));
        assert_eq!(
            store.get_value::<VideoExtensions>().0,
            vec!["mkv".to_string()]
        );

        let out = store.construct_table();
        assert_eq!(out.get("scrape_after_2"), Some(&toml::Value::Float(1.5)));
    }

    #[test]
    fn apply_json_reports_bad_values() {
        let store = ConfigStore::new();
        store.register_value::<Port>();
        let result = store
            .apply_json(serde_json::json!({"port": "not a number"}))
            .unwrap();
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].key, "port");
    }
}
