use std::collections::HashMap;

use crate::{
    app_state::AppError,
    cache::HashCache,
    item::{ActiveStream, MediaItem, State},
    parser,
};

pub mod alldebrid;
pub mod realdebrid;
pub mod selector;
pub mod torbox;

use selector::{FileFilter, SeasonCoverage, Selection, SelectionTarget, TorrentContainer};

const AVAILABILITY_CHUNK: usize = 5;
const MOVIE_VERIFY_MIN_BYTES: u64 = 200_000_000;

#[derive(Debug, Clone, Default)]
pub struct TorrentInfoFile {
    pub id: i64,
    pub path: String,
    pub bytes: u64,
    pub selected: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TorrentInfo {
    pub id: String,
    pub filename: Option<String>,
    pub alternative_filename: Option<String>,
    pub files: Vec<TorrentInfoFile>,
}

#[derive(Debug, Clone)]
pub struct TorrentSummary {
    pub id: String,
    pub hash: String,
    pub filename: Option<String>,
}

/// The debrid side of the download flow. All providers expose the same
/// surface; container shapes are normalized by each adapter.
#[async_trait::async_trait]
pub trait DebridClient: Send + Sync {
    fn key(&self) -> &'static str;
    fn initialized(&self) -> bool;
    fn season_coverage(&self) -> SeasonCoverage;
    /// Containers per infohash that are downloadable right now.
    async fn instant_availability(
        &self,
        hashes: &[String],
    ) -> Result<HashMap<String, Vec<TorrentContainer>>, AppError>;
    async fn add_magnet(&self, hash: &str) -> Result<String, AppError>;
    async fn select_files(&self, torrent_id: &str, selection: &Selection)
        -> Result<(), AppError>;
    async fn get_torrent_info(&self, torrent_id: &str) -> Result<TorrentInfo, AppError>;
    async fn get_torrents(&self) -> Result<HashMap<String, TorrentSummary>, AppError>;
}

/// Wipe everything the failed torrent touched so the next pass rescrapes
/// from zero, and blacklist the hash for good.
pub fn blacklist_item(item: &mut MediaItem, cache: &HashCache) {
    if let Some(active) = &item.meta().active_stream {
        if !active.hash.is_empty() {
            cache.blacklist(&active.hash);
        } else {
            tracing::error!(
                "Failed to retrieve hash for {}, unable to blacklist",
                item.log_string()
            );
        }
    }
    fn reset(meta: &mut crate::item::ItemMeta) {
        meta.file = None;
        meta.folder = None;
        meta.alternative_folder = None;
        meta.streams.clear();
        meta.active_stream = None;
        meta.symlinked = false;
        meta.symlinked_times = 0;
        meta.scraped_times = 0;
        meta.scraped_at = None;
    }
    reset(item.meta_mut());
    for episode in item.episodes_mut() {
        reset(&mut episode.meta);
    }
}

pub struct Downloader {
    cache: &'static HashCache,
    providers: Vec<Box<dyn DebridClient>>,
}

impl Downloader {
    pub async fn new(cache: &'static HashCache) -> Self {
        let providers: Vec<Box<dyn DebridClient>> = vec![
            Box::new(realdebrid::RealDebrid::new().await),
            Box::new(alldebrid::AllDebrid::new().await),
            Box::new(torbox::TorboxDownloader::new().await),
        ];
        for provider in &providers {
            if provider.initialized() {
                tracing::info!("Debrid provider {} initialized", provider.key());
            }
        }
        Self { cache, providers }
    }

    #[cfg(test)]
    pub fn with_providers(
        cache: &'static HashCache,
        providers: Vec<Box<dyn DebridClient>>,
    ) -> Self {
        Self { cache, providers }
    }

    pub fn initialized(&self) -> bool {
        self.active().is_some()
    }

    pub fn validate(&self) -> bool {
        if !self.initialized() {
            tracing::error!("No downloader service initialized, you must enable at least one.");
            return false;
        }
        true
    }

    fn active(&self) -> Option<&dyn DebridClient> {
        self.providers
            .iter()
            .find(|provider| provider.initialized())
            .map(|provider| provider.as_ref())
    }

    /// Pick a cached stream whose file layout satisfies the item, then make
    /// sure the debrid account actually holds it.
    pub async fn run(&self, mut item: MediaItem) -> Result<Vec<MediaItem>, AppError> {
        let Some(provider) = self.active() else {
            return Ok(vec![item]);
        };
        match &mut item {
            MediaItem::Show(show) => {
                // each season carries its own streams; reuse containers
                // already accepted by a sibling where possible
                let mut accepted: Vec<(String, String)> = Vec::new();
                for season in &mut show.seasons {
                    if !season.is_released() {
                        continue;
                    }
                    let mut season_item = MediaItem::Season(season.clone());
                    if season_item.state() == State::Scraped {
                        self.run_single(provider, &mut season_item, &mut accepted)
                            .await;
                    }
                    if let MediaItem::Season(updated) = season_item {
                        *season = updated;
                    }
                }
            }
            _ => {
                let mut accepted = Vec::new();
                self.run_single(provider, &mut item, &mut accepted).await;
            }
        }
        Ok(vec![item])
    }

    async fn run_single(
        &self,
        provider: &dyn DebridClient,
        item: &mut MediaItem,
        accepted: &mut Vec<(String, String)>,
    ) {
        if item.meta().file.is_some() && item.meta().folder.is_some() {
            return;
        }
        if !self.try_reuse_sibling(provider, item, accepted).await
            && !self.is_cached(provider, item).await
        {
            return;
        }
        match self.ensure_downloaded(provider, item).await {
            Ok(true) => {
                if let Some(hash) = item.meta().active_stream.as_ref().map(|a| a.hash.clone()) {
                    accepted.push((
                        hash,
                        item.meta()
                            .active_stream
                            .as_ref()
                            .and_then(|a| a.torrent_id.clone())
                            .unwrap_or_default(),
                    ));
                }
                self.log_item(item);
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!("Download handshake failed for {}: {e}", item.log_string());
                blacklist_item(item, self.cache);
            }
        }
    }

    /// A sibling season may already have bound a container that also covers
    /// this item; reuse its torrent instead of resubmitting.
    async fn try_reuse_sibling(
        &self,
        provider: &dyn DebridClient,
        item: &mut MediaItem,
        accepted: &[(String, String)],
    ) -> bool {
        if accepted.is_empty() || !matches!(item, MediaItem::Season(_)) {
            return false;
        }
        let Some(target) = SelectionTarget::from_item(item) else {
            return false;
        };
        let filter = FileFilter::from_config();
        for (hash, torrent_id) in accepted {
            let Ok(info) = provider.get_torrent_info(torrent_id).await else {
                continue;
            };
            let container = TorrentContainer {
                files: info
                    .files
                    .iter()
                    .map(|file| selector::ContainerFile {
                        file_id: Some(file.id),
                        filename: basename(&file.path).to_string(),
                        filesize: file.bytes,
                    })
                    .collect(),
            };
            if let Some(selection) =
                selector::select(&target, &container, &filter, provider.season_coverage())
            {
                bind_selection(item, hash, &selection);
                if let Some(active) = &mut item.meta_mut().active_stream {
                    active.torrent_id = Some(torrent_id.clone());
                }
                apply_torrent_info(item, &info);
                tracing::debug!(
                    "Reusing sibling season torrent for {}",
                    item.log_string()
                );
                return true;
            }
        }
        false
    }

    /// Query instant availability for every stream in rank order and bind
    /// the first satisfying container.
    async fn is_cached(&self, provider: &dyn DebridClient, item: &mut MediaItem) -> bool {
        let meta = item.meta();
        if meta.streams.is_empty() {
            return false;
        }
        tracing::debug!(
            "Processing {} streams for {}",
            meta.streams.len(),
            item.log_string()
        );

        let mut hashes: Vec<(String, i32)> = meta
            .streams
            .iter()
            .filter(|(hash, _)| !self.cache.is_blacklisted(hash))
            .map(|(hash, stream)| (hash.clone(), stream.rank))
            .collect();
        hashes.sort_by_key(|(_, rank)| std::cmp::Reverse(*rank));
        let hashes: Vec<String> = hashes.into_iter().map(|(hash, _)| hash).collect();
        if hashes.is_empty() {
            tracing::debug!("No streams left after filtering: {}", item.log_string());
            item.meta_mut().streams.clear();
            return false;
        }

        let Some(target) = SelectionTarget::from_item(item) else {
            return false;
        };
        let filter = FileFilter::from_config();

        for chunk in hashes.chunks(AVAILABILITY_CHUNK) {
            let available = match provider.instant_availability(chunk).await {
                Ok(available) => available,
                Err(e) => {
                    tracing::warn!("Availability check failed: {e}");
                    continue;
                }
            };
            for hash in chunk {
                let Some(mut containers) = available.get(hash).cloned() else {
                    self.cache.blacklist(hash);
                    continue;
                };
                containers.retain(|container| !container.files.is_empty());
                if containers.is_empty() {
                    self.cache.blacklist(hash);
                    continue;
                }
                // prefer the variant holding the most files
                containers.sort_by_key(|container| std::cmp::Reverse(container.files.len()));
                let selection = containers.iter().find_map(|container| {
                    selector::select(&target, container, &filter, provider.season_coverage())
                });
                match selection {
                    Some(selection) => {
                        bind_selection(item, hash, &selection);
                        return true;
                    }
                    None => self.cache.blacklist(hash),
                }
            }
        }

        tracing::debug!(
            "No wanted cached streams found for {}",
            item.log_string()
        );
        item.meta_mut().streams.clear();
        false
    }

    /// Make the provider account hold the chosen torrent: reuse an existing
    /// entry when present, otherwise add the magnet and select the matched
    /// files. Any mismatch blacklists the hash and resets the item.
    async fn ensure_downloaded(
        &self,
        provider: &dyn DebridClient,
        item: &mut MediaItem,
    ) -> Result<bool, AppError> {
        let Some(active) = item.meta().active_stream.clone() else {
            return Ok(false);
        };
        if active.hash.is_empty() {
            return Ok(false);
        }
        if self.cache.is_blacklisted(&active.hash) {
            return Ok(false);
        }
        if self.cache.is_downloaded(&active.hash) && active.torrent_id.is_some() {
            tracing::debug!("Item already downloaded for hash: {}", active.hash);
            return Ok(true);
        }

        // a torrent with this hash may already live in the account
        let torrents = provider.get_torrents().await.unwrap_or_default();
        if let Some(existing) = torrents.get(&active.hash) {
            let info = provider.get_torrent_info(&existing.id).await?;
            if !info_matches_item(&info, item) {
                self.cache.blacklist(&active.hash);
                blacklist_item(item, self.cache);
                return Ok(false);
            }
            if let Some(active) = &mut item.meta_mut().active_stream {
                active.torrent_id = Some(existing.id.clone());
            }
            apply_torrent_info(item, &info);
            self.cache.mark_downloaded(&active.hash);
            return Ok(true);
        }

        let selection = rebuild_selection(item);
        let torrent_id = provider.add_magnet(&active.hash).await?;
        if let Some(active) = &mut item.meta_mut().active_stream {
            active.torrent_id = Some(torrent_id.clone());
        }
        let info = provider.get_torrent_info(&torrent_id).await?;
        apply_torrent_info(item, &info);
        provider.select_files(&torrent_id, &selection).await?;

        let info = provider.get_torrent_info(&torrent_id).await?;
        if !info_contains_selection(&info, &selection) {
            return Err(AppError::internal_error(format!(
                "torrent {torrent_id} does not contain the selected files"
            )));
        }
        self.cache.mark_downloaded(&active.hash);
        Ok(true)
    }

    fn log_item(&self, item: &MediaItem) {
        match item {
            MediaItem::Movie(movie) => {
                if let Some(file) = &movie.meta.file {
                    tracing::info!("Downloaded {} with file: {}", item.log_string(), file);
                }
            }
            MediaItem::Episode(episode) => {
                if let Some(file) = &episode.meta.file {
                    tracing::info!("Downloaded {} with file: {}", item.log_string(), file);
                }
            }
            compound => {
                for episode in compound.episodes() {
                    match &episode.meta.file {
                        Some(file) => tracing::info!(
                            "Downloaded {} S{:02}E{:02} with file: {}",
                            compound.top_title().unwrap_or("<unknown>"),
                            episode.season_number,
                            episode.number,
                            file
                        ),
                        None => tracing::debug!(
                            "Episode missing file: S{:02}E{:02}",
                            episode.season_number,
                            episode.number
                        ),
                    }
                }
            }
        }
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Write the chosen files onto the item and stamp the active stream.
fn bind_selection(item: &mut MediaItem, hash: &str, selection: &Selection) {
    item.meta_mut().active_stream = Some(ActiveStream {
        hash: hash.to_string(),
        torrent_id: None,
        filename: None,
        alternative_filename: None,
    });
    match item {
        MediaItem::Movie(movie) => {
            movie.meta.file = selection
                .movie_file
                .as_ref()
                .map(|file| file.filename.clone());
        }
        MediaItem::Episode(episode) => {
            if let Some(file) = selection
                .episode_files
                .get(&(episode.season_number, episode.number))
            {
                episode.meta.file = Some(file.filename.clone());
            }
        }
        MediaItem::Season(season) => {
            for episode in &mut season.episodes {
                if let Some(file) = selection
                    .episode_files
                    .get(&(season.number, episode.number))
                {
                    episode.meta.file = Some(file.filename.clone());
                }
            }
        }
        MediaItem::Show(show) => {
            for season in &mut show.seasons {
                for episode in &mut season.episodes {
                    if let Some(file) = selection
                        .episode_files
                        .get(&(season.number, episode.number))
                    {
                        episode.meta.file = Some(file.filename.clone());
                    }
                }
            }
        }
    }
}

/// Selection as bound on the item, for the select-files call.
fn rebuild_selection(item: &MediaItem) -> Selection {
    let mut selection = Selection::default();
    match item {
        MediaItem::Movie(movie) => {
            selection.movie_file = movie.meta.file.as_ref().map(|file| {
                selector::ContainerFile {
                    file_id: None,
                    filename: file.clone(),
                    filesize: 0,
                }
            });
        }
        compound => {
            for episode in compound.episodes() {
                if let Some(file) = &episode.meta.file {
                    selection.episode_files.insert(
                        (episode.season_number, episode.number),
                        selector::ContainerFile {
                            file_id: None,
                            filename: file.clone(),
                            filesize: 0,
                        },
                    );
                }
            }
        }
    }
    selection
}

/// Folder names come from the torrent info; episodes inherit the folder of
/// the pack they came in.
fn apply_torrent_info(item: &mut MediaItem, info: &TorrentInfo) {
    let folder = info.filename.clone();
    let alternative = info.alternative_filename.clone();
    {
        let meta = item.meta_mut();
        if let Some(active) = &mut meta.active_stream {
            active.filename = folder.clone();
            active.alternative_filename = alternative.clone();
        }
        if meta.folder.is_none() {
            meta.folder = folder.clone();
        }
        if meta.alternative_folder.is_none() {
            meta.alternative_folder = alternative.clone();
        }
    }
    for episode in item.episodes_mut() {
        if episode.meta.file.is_some() && episode.meta.folder.is_none() {
            episode.meta.folder = folder.clone();
            episode.meta.alternative_folder = alternative.clone();
        }
    }
}

/// Check an account side torrent against the item it is supposed to cover.
fn info_matches_item(info: &TorrentInfo, item: &MediaItem) -> bool {
    match item {
        MediaItem::Movie(_) => info
            .files
            .iter()
            .any(|file| file.selected && file.bytes > MOVIE_VERIFY_MIN_BYTES),
        MediaItem::Episode(episode) => {
            let one_season = episode.one_season_show();
            info.files.iter().any(|file| {
                file.selected
                    && parser::parse_title(basename(&file.path)).references_episode(
                        episode.season_number,
                        episode.number,
                        one_season,
                    )
            })
        }
        MediaItem::Season(season) => {
            let needed: Vec<i64> = season.episodes.iter().map(|e| e.number).collect();
            let one_season = season.show.season_count == 1;
            let mut matched = std::collections::BTreeSet::new();
            for file in &info.files {
                if !file.selected {
                    continue;
                }
                let parsed = parser::parse_title(basename(&file.path));
                if parsed.seasons.contains(&season.number)
                    || (one_season && parsed.seasons.is_empty())
                {
                    matched.extend(parsed.episodes.iter().copied());
                }
            }
            matched.iter().filter(|e| needed.contains(e)).count() * 2 >= needed.len()
        }
        MediaItem::Show(show) => show.seasons.iter().all(|season| {
            info_matches_item(info, &MediaItem::Season(season.clone()))
        }),
    }
}

/// After select-files the torrent must actually carry every chosen file.
fn info_contains_selection(info: &TorrentInfo, selection: &Selection) -> bool {
    selection.selected_files().iter().all(|chosen| {
        info.files
            .iter()
            .any(|file| basename(&file.path) == chosen.filename)
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use crate::db::tests_support::show_tree;
    use crate::item::Stream;

    use super::*;

    fn cache(name: &str) -> &'static HashCache {
        let path = std::env::temp_dir().join(format!("downloader-test-{name}.json"));
        let _ = std::fs::remove_file(&path);
        Box::leak(Box::new(HashCache::load(path)))
    }

    /// Provider double driven from test fixtures.
    struct FakeDebrid {
        containers: HashMap<String, Vec<TorrentContainer>>,
        info: Mutex<TorrentInfo>,
        selected: Mutex<Vec<String>>,
    }

    impl FakeDebrid {
        fn new(containers: HashMap<String, Vec<TorrentContainer>>, info: TorrentInfo) -> Self {
            Self {
                containers,
                info: Mutex::new(info),
                selected: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl DebridClient for FakeDebrid {
        fn key(&self) -> &'static str {
            "fake"
        }

        fn initialized(&self) -> bool {
            true
        }

        fn season_coverage(&self) -> SeasonCoverage {
            SeasonCoverage::Strict
        }

        async fn instant_availability(
            &self,
            hashes: &[String],
        ) -> Result<HashMap<String, Vec<TorrentContainer>>, AppError> {
            Ok(hashes
                .iter()
                .filter_map(|hash| {
                    self.containers
                        .get(hash)
                        .map(|containers| (hash.clone(), containers.clone()))
                })
                .collect())
        }

        async fn add_magnet(&self, _hash: &str) -> Result<String, AppError> {
            Ok("torrent-1".to_string())
        }

        async fn select_files(
            &self,
            _torrent_id: &str,
            selection: &Selection,
        ) -> Result<(), AppError> {
            let mut selected = self.selected.lock().unwrap();
            *selected = selection
                .selected_files()
                .iter()
                .map(|file| file.filename.clone())
                .collect();
            // reflect the selection on the torrent info
            let mut info = self.info.lock().unwrap();
            for file in &mut info.files {
                file.selected = selected.contains(&basename(&file.path).to_string());
            }
            Ok(())
        }

        async fn get_torrent_info(&self, _torrent_id: &str) -> Result<TorrentInfo, AppError> {
            Ok(self.info.lock().unwrap().clone())
        }

        async fn get_torrents(&self) -> Result<HashMap<String, TorrentSummary>, AppError> {
            Ok(HashMap::new())
        }
    }

    fn movie_item(hash: &str) -> MediaItem {
        let mut item = crate::db::tests_support::movie("tt0133093", "The Matrix");
        item.meta_mut().streams.insert(
            hash.to_string(),
            Stream {
                raw_title: "The.Matrix.1999.1080p.BluRay".into(),
                rank: 100,
                fetch_ok: true,
            },
        );
        item
    }

    fn movie_container(filename: &str) -> TorrentContainer {
        TorrentContainer {
            files: vec![selector::ContainerFile {
                file_id: Some(1),
                filename: filename.to_string(),
                filesize: 4_000 * MB_U64,
            }],
        }
    }

    const MB_U64: u64 = 1024 * 1024;

    #[tokio::test]
    async fn movie_happy_path_binds_file_and_downloads() {
        let hash = "a".repeat(40);
        let cache = cache("happy");
        let containers = HashMap::from([(hash.clone(), vec![movie_container(
            "The.Matrix.1999.1080p.BluRay.mkv",
        )])]);
        let info = TorrentInfo {
            id: "torrent-1".into(),
            filename: Some("The.Matrix.1999.1080p.BluRay".into()),
            alternative_filename: None,
            files: vec![TorrentInfoFile {
                id: 1,
                path: "The.Matrix.1999.1080p.BluRay/The.Matrix.1999.1080p.BluRay.mkv".into(),
                bytes: 4_000 * MB_U64,
                selected: false,
            }],
        };
        let downloader = Downloader::with_providers(
            cache,
            vec![Box::new(FakeDebrid::new(containers, info))],
        );

        let out = downloader.run(movie_item(&hash)).await.unwrap();
        let item = &out[0];
        assert_eq!(
            item.meta().file.as_deref(),
            Some("The.Matrix.1999.1080p.BluRay.mkv")
        );
        assert_eq!(
            item.meta().folder.as_deref(),
            Some("The.Matrix.1999.1080p.BluRay")
        );
        let active = item.meta().active_stream.as_ref().unwrap();
        assert_eq!(active.hash, hash);
        assert_eq!(active.torrent_id.as_deref(), Some("torrent-1"));
        assert!(cache.is_downloaded(&hash));
        assert_eq!(item.state(), State::Downloaded);
    }

    #[tokio::test]
    async fn mismatch_after_download_blacklists_and_resets() {
        let hash = "b".repeat(40);
        let cache = cache("mismatch");
        let containers = HashMap::from([(hash.clone(), vec![movie_container(
            "The.Matrix.1999.1080p.BluRay.mkv",
        )])]);
        // the torrent actually carries a different file
        let info = TorrentInfo {
            id: "torrent-1".into(),
            filename: Some("Garbage".into()),
            alternative_filename: None,
            files: vec![TorrentInfoFile {
                id: 1,
                path: "Garbage/other-file.mkv".into(),
                bytes: 4_000 * MB_U64,
                selected: true,
            }],
        };
        let downloader = Downloader::with_providers(
            cache,
            vec![Box::new(FakeDebrid::new(containers, info))],
        );

        let out = downloader.run(movie_item(&hash)).await.unwrap();
        let item = &out[0];
        assert!(cache.is_blacklisted(&hash));
        assert!(item.meta().streams.is_empty());
        assert!(item.meta().active_stream.is_none());
        assert!(item.meta().file.is_none());
    }

    #[tokio::test]
    async fn uncached_hashes_are_blacklisted_and_streams_cleared() {
        let hash = "c".repeat(40);
        let cache = cache("uncached");
        let downloader = Downloader::with_providers(
            cache,
            vec![Box::new(FakeDebrid::new(
                HashMap::new(),
                TorrentInfo::default(),
            ))],
        );
        let out = downloader.run(movie_item(&hash)).await.unwrap();
        let item = &out[0];
        assert!(cache.is_blacklisted(&hash));
        assert!(item.meta().streams.is_empty());
    }

    #[tokio::test]
    async fn season_pack_selects_only_needed_files() {
        let hash = "d".repeat(40);
        let cache = cache("season");
        let mut tree = show_tree("tt0000001", &[(1, &[1, 2, 3])]);
        {
            let MediaItem::Show(show) = &mut tree else { panic!() };
            for episode in &mut show.seasons[0].episodes {
                episode.meta.aired_at =
                    Some(time::OffsetDateTime::now_utc() - time::Duration::days(10));
            }
            // episode 3 is already done
            show.seasons[0].episodes[2].meta.key = Some("done".into());
            show.seasons[0].meta.streams.insert(
                hash.clone(),
                Stream {
                    raw_title: "Foo.S01.1080p".into(),
                    rank: 50,
                    fetch_ok: true,
                },
            );
        }
        let MediaItem::Show(show) = &tree else { panic!() };
        let season = MediaItem::Season(show.seasons[0].clone());

        let files: Vec<selector::ContainerFile> = (1..=3)
            .map(|number| selector::ContainerFile {
                file_id: Some(number),
                filename: format!("Foo.S01E{:02}.1080p.mkv", number),
                filesize: 700 * MB_U64,
            })
            .collect();
        let containers =
            HashMap::from([(hash.clone(), vec![TorrentContainer { files: files.clone() }])]);
        let info = TorrentInfo {
            id: "torrent-1".into(),
            filename: Some("Foo.S01.1080p".into()),
            alternative_filename: None,
            files: files
                .iter()
                .map(|file| TorrentInfoFile {
                    id: file.file_id.unwrap(),
                    path: format!("Foo.S01.1080p/{}", file.filename),
                    bytes: file.filesize,
                    selected: false,
                })
                .collect(),
        };
        let provider = FakeDebrid::new(containers, info);
        let downloader = Downloader::with_providers(cache, vec![Box::new(provider)]);

        let out = downloader.run(season).await.unwrap();
        let MediaItem::Season(season) = &out[0] else {
            panic!()
        };
        assert_eq!(
            season.episodes[0].meta.file.as_deref(),
            Some("Foo.S01E01.1080p.mkv")
        );
        assert_eq!(
            season.episodes[1].meta.file.as_deref(),
            Some("Foo.S01E02.1080p.mkv")
        );
        // already completed episode keeps its state, no file bound
        assert!(season.episodes[2].meta.file.is_none());
        assert_eq!(
            season.episodes[0].meta.folder.as_deref(),
            Some("Foo.S01.1080p")
        );
    }
}
