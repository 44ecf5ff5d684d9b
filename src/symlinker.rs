use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use time::OffsetDateTime;

use crate::{
    app_state::AppError,
    cache::HashCache,
    config::{LibraryPath, RclonePath, CONFIG},
    downloaders::blacklist_item,
    item::{Episode, ItemMeta, MediaItem, Movie, Season, Show, ShowRef},
    parser,
    utils::{imdb_from_segment, imdb_tag, sanitize_title, season_episode_from_name, walk_recursive},
};

const WAIT_TOTAL: Duration = Duration::from_secs(90);
const WAIT_STEP: Duration = Duration::from_secs(5);
const WALK_AFTER: Duration = Duration::from_secs(30);
const MAX_SYMLINK_ATTEMPTS: u32 = 3;

/// Materializes the library tree of symlinks into the debrid mount.
#[derive(Debug)]
pub struct Symlinker {
    rclone_path: PathBuf,
    library_path: PathBuf,
    cache: &'static HashCache,
    initialized: bool,
}

impl Symlinker {
    pub fn new(cache: &'static HashCache) -> Self {
        let rclone_path = CONFIG.get_value::<RclonePath>().0.unwrap_or_default();
        let library_path = CONFIG.get_value::<LibraryPath>().0.unwrap_or_default();
        let mut out = Self {
            rclone_path,
            library_path,
            cache,
            initialized: false,
        };
        out.initialized = out.validate();
        if out.initialized {
            tracing::info!(
                "Symlinks point into: {}, library lives in: {}",
                out.rclone_path.display(),
                out.library_path.display()
            );
        }
        out
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    pub fn library_path(&self) -> &Path {
        &self.library_path
    }

    pub fn rclone_path(&self) -> &Path {
        &self.rclone_path
    }

    fn validate(&mut self) -> bool {
        if self.rclone_path.as_os_str().is_empty() || self.library_path.as_os_str().is_empty() {
            tracing::error!("rclone_path or library_path not provided");
            return false;
        }
        if !self.rclone_path.is_absolute() || !self.library_path.is_absolute() {
            tracing::error!("rclone_path and library_path must be absolute");
            return false;
        }
        if !self.rclone_path.exists() {
            tracing::error!("rclone_path does not exist: {}", self.rclone_path.display());
            return false;
        }
        if !self.library_path.exists() {
            tracing::error!(
                "library_path does not exist: {}",
                self.library_path.display()
            );
            return false;
        }
        // zurg mounts expose __all__, plain rclone mounts expose torrents
        if self.rclone_path.join("__all__").is_dir() {
            self.rclone_path = self.rclone_path.join("__all__");
        } else if self.rclone_path.join("torrents").is_dir() {
            self.rclone_path = self.rclone_path.join("torrents");
        }
        for folder in ["movies", "shows", "anime_movies", "anime_shows"] {
            if let Err(e) = std::fs::create_dir_all(self.library_path.join(folder)) {
                tracing::error!("Failed to create library folder {folder}: {e}");
                return false;
            }
        }
        true
    }

    /// Symlink budget gate. Items that burned all attempts are reset for a
    /// full rescrape.
    pub fn should_submit(&self, item: &mut MediaItem) -> bool {
        if item.meta().symlinked_times >= MAX_SYMLINK_ATTEMPTS {
            tracing::warn!(
                "{} still not completed after {} symlink attempts, forcing rescrape",
                item.log_string(),
                MAX_SYMLINK_ATTEMPTS
            );
            blacklist_item(item, self.cache);
            return false;
        }
        true
    }

    /// Create symlinks for the item. Compound items iterate episodes;
    /// partial failures leave individual episodes unlinked so the parent
    /// aggregate stays below Symlinked.
    pub async fn run(&self, mut item: MediaItem) -> Result<Vec<MediaItem>, AppError> {
        if !self.should_submit(&mut item) {
            return Ok(vec![item]);
        }
        let result: anyhow::Result<()> = match &mut item {
            MediaItem::Movie(movie) => {
                let (file, folder) = (movie.meta.file.clone(), movie.meta.folder.clone());
                self.symlink_one(&mut movie.meta, None, None, file, folder)
                    .await
            }
            MediaItem::Episode(episode) => {
                let show = episode.show.clone();
                let numbers = (episode.season_number, episode.number);
                let (file, folder) = (episode.meta.file.clone(), episode.meta.folder.clone());
                self.symlink_one(&mut episode.meta, Some(&show), Some(numbers), file, folder)
                    .await
            }
            MediaItem::Season(season) => {
                self.symlink_season(season).await;
                Ok(())
            }
            MediaItem::Show(show) => {
                for season in &mut show.seasons {
                    self.symlink_season(season).await;
                }
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::error!("Failed to symlink {}: {e}", item.log_string());
            blacklist_item(&mut item, self.cache);
        }
        Ok(vec![item])
    }

    async fn symlink_season(&self, season: &mut Season) {
        let show = season.show.clone();
        let number = season.number;
        let mut all_ok = true;
        for episode in &mut season.episodes {
            if episode.meta.file.is_none() || episode.meta.folder.is_none() {
                continue;
            }
            let (file, folder) = (episode.meta.file.clone(), episode.meta.folder.clone());
            if let Err(e) = self
                .symlink_one(
                    &mut episode.meta,
                    Some(&show),
                    Some((number, episode.number)),
                    file,
                    folder,
                )
                .await
            {
                all_ok = false;
                tracing::error!(
                    "Failed to symlink S{:02}E{:02}: {e}",
                    number,
                    episode.number
                );
            }
        }
        if !all_ok {
            season.meta.symlinked_times += 1;
        }
    }

    async fn symlink_one(
        &self,
        meta: &mut ItemMeta,
        show: Option<&ShowRef>,
        numbers: Option<(i64, i64)>,
        file: Option<String>,
        folder: Option<String>,
    ) -> anyhow::Result<()> {
        let file = file.filter(|f| f != "None.mkv").ok_or_else(|| {
            anyhow::anyhow!("invalid source file, item needs to be rescraped")
        })?;

        let source = self
            .wait_for_source(meta, &file, folder.as_deref())
            .await
            .ok_or_else(|| anyhow::anyhow!("source never appeared under the mount"))?;

        let filename = self.destination_filename(meta, show, numbers, &file)?;
        let directory = self.destination_directory(meta, show, numbers)?;
        std::fs::create_dir_all(&directory)?;
        let destination = directory.join(&filename);

        let already_linked = std::fs::read_link(&destination)
            .map(|target| target == source)
            .unwrap_or(false);
        if !already_linked {
            if destination.exists() || destination.is_symlink() {
                std::fs::remove_file(&destination)?;
            }
            #[cfg(unix)]
            std::os::unix::fs::symlink(&source, &destination)?;
            #[cfg(windows)]
            std::os::windows::fs::symlink_file(&source, &destination)?;
            // verify by reading the link back
            let target = std::fs::read_link(&destination)?;
            anyhow::ensure!(target == source, "symlink verification failed");
            tracing::info!("Created symlink for {}", filename);
            meta.symlinked_at = Some(OffsetDateTime::now_utc());
            meta.symlinked_times += 1;
        }
        meta.symlinked = true;
        meta.update_folder = Some(directory.to_string_lossy().to_string());
        Ok(())
    }

    /// Locate the source under the mount, waiting for the mount to catch up
    /// with the debrid account. This is the only cooperative sleep inside a
    /// worker.
    async fn wait_for_source(
        &self,
        meta: &mut ItemMeta,
        file: &str,
        folder: Option<&str>,
    ) -> Option<PathBuf> {
        let started = std::time::Instant::now();
        let mut walked = false;
        loop {
            let candidates = [
                folder.map(|folder| self.rclone_path.join(folder).join(file)),
                meta.alternative_folder
                    .as_deref()
                    .map(|alt| self.rclone_path.join(alt).join(file)),
                Some(self.rclone_path.join(file).join(file)),
            ];
            for candidate in candidates.into_iter().flatten() {
                if candidate.exists() {
                    if let Some(parent) = candidate.parent() {
                        if parent != self.rclone_path {
                            meta.folder = parent
                                .strip_prefix(&self.rclone_path)
                                .ok()
                                .map(|relative| relative.to_string_lossy().to_string());
                        }
                    }
                    return Some(candidate);
                }
            }
            if started.elapsed() >= WALK_AFTER && !walked {
                walked = true;
                tracing::debug!("Searching the whole mount for {file}");
                if let Ok(paths) = walk_recursive(&self.rclone_path, None::<fn(&PathBuf) -> bool>)
                {
                    if let Some(found) = paths.iter().find(|path| {
                        path.file_name().map_or(false, |name| name == file)
                    }) {
                        meta.folder = found
                            .parent()
                            .and_then(|parent| parent.strip_prefix(&self.rclone_path).ok())
                            .map(|relative| relative.to_string_lossy().to_string());
                        return Some(found.clone());
                    }
                }
            }
            if started.elapsed() >= WAIT_TOTAL {
                tracing::warn!("Timed out waiting for {file} to appear under the mount");
                return None;
            }
            tokio::time::sleep(WAIT_STEP).await;
        }
    }

    fn destination_filename(
        &self,
        meta: &ItemMeta,
        show: Option<&ShowRef>,
        numbers: Option<(i64, i64)>,
        file: &str,
    ) -> anyhow::Result<String> {
        let extension = crate::utils::file_extension(file)
            .ok_or_else(|| anyhow::anyhow!("source file has no extension"))?;
        match (show, numbers) {
            (Some(show), Some((season, episode))) => {
                let show_title = show
                    .title
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("episode is missing its show title"))?;
                let show_year = show
                    .year
                    .or_else(|| show.aired_at.map(|aired| aired.year()))
                    .ok_or_else(|| anyhow::anyhow!("episode is missing its show year"))?;
                let episode_span = episode_span(file, episode);
                let episode_title = meta.title.as_deref().unwrap_or("");
                Ok(sanitize_title(&format!(
                    "{} ({}) - s{:02}{} - {}.{}",
                    show_title, show_year, season, episode_span, episode_title, extension
                )))
            }
            _ => {
                let title = meta
                    .title
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("movie is missing a title"))?;
                let year = meta
                    .year
                    .or_else(|| meta.aired_at.map(|aired| aired.year()))
                    .ok_or_else(|| anyhow::anyhow!("movie is missing a year"))?;
                let imdb = meta
                    .imdb_id
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("movie is missing an imdb id"))?;
                Ok(sanitize_title(&format!(
                    "{} ({}) {}.{}",
                    title,
                    year,
                    imdb_tag(imdb),
                    extension
                )))
            }
        }
    }

    fn destination_directory(
        &self,
        meta: &ItemMeta,
        show: Option<&ShowRef>,
        numbers: Option<(i64, i64)>,
    ) -> anyhow::Result<PathBuf> {
        match (show, numbers) {
            (Some(show), Some((season, _))) => {
                let show_title = show
                    .title
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("episode is missing its show title"))?;
                let show_year = show
                    .year
                    .or_else(|| show.aired_at.map(|aired| aired.year()))
                    .ok_or_else(|| anyhow::anyhow!("episode is missing its show year"))?;
                let imdb = show
                    .imdb_id
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("episode is missing its show imdb id"))?;
                let root = if show.is_anime { "anime_shows" } else { "shows" };
                let show_folder = sanitize_title(&format!(
                    "{} ({}) {}",
                    show_title,
                    show_year,
                    imdb_tag(imdb)
                ));
                Ok(self
                    .library_path
                    .join(root)
                    .join(show_folder)
                    .join(format!("Season {:02}", season)))
            }
            _ => {
                let title = meta
                    .title
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("movie is missing a title"))?;
                let year = meta
                    .year
                    .or_else(|| meta.aired_at.map(|aired| aired.year()))
                    .ok_or_else(|| anyhow::anyhow!("movie is missing a year"))?;
                let imdb = meta
                    .imdb_id
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("movie is missing an imdb id"))?;
                let root = if meta.is_anime {
                    "anime_movies"
                } else {
                    "movies"
                };
                let folder =
                    sanitize_title(&format!("{} ({}) {}", title, year, imdb_tag(imdb)));
                Ok(self.library_path.join(root).join(folder))
            }
        }
    }

    /// Delete library symlinks whose targets vanished from the mount. The
    /// watcher picks the deletions up and prunes the store.
    pub async fn repair_broken_symlinks(&self) -> anyhow::Result<usize> {
        let paths = walk_symlinks(&self.library_path)?;
        let mut removed = 0;
        for path in paths {
            let broken = std::fs::read_link(&path)
                .map(|target| !target.exists())
                .unwrap_or(false);
            if broken {
                tracing::warn!("Removing broken symlink: {}", path.display());
                if std::fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}

fn walk_symlinks(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_symlink() {
            out.push(path);
        } else if path.is_dir() {
            out.append(&mut walk_symlinks(&path)?);
        }
    }
    Ok(out)
}

/// `e03` or `e03-e05` when the source file carries several episodes.
fn episode_span(file: &str, episode: i64) -> String {
    let parsed = parser::parse_title(file);
    if parsed.episodes.first() == Some(&episode) && parsed.episodes.len() > 1 {
        format!(
            "e{:02}-e{:02}",
            episode,
            parsed.episodes.last().copied().unwrap_or(episode)
        )
    } else {
        format!("e{:02}", episode)
    }
}

/// Reverse constructs items from an existing library tree, used on boot when
/// the store is empty.
#[derive(Debug)]
pub struct SymlinkLibrary {
    library_path: PathBuf,
}

impl SymlinkLibrary {
    pub fn new(library_path: impl AsRef<Path>) -> Self {
        Self {
            library_path: library_path.as_ref().to_path_buf(),
        }
    }

    pub fn scan(&self) -> Vec<MediaItem> {
        let mut out = Vec::new();
        for root in ["movies", "anime_movies"] {
            let anime = root.starts_with("anime");
            out.extend(self.scan_movies(&self.library_path.join(root), anime));
        }
        for root in ["shows", "anime_shows"] {
            let anime = root.starts_with("anime");
            out.extend(self.scan_shows(&self.library_path.join(root), anime));
        }
        out
    }

    fn scan_movies(&self, root: &Path, anime: bool) -> Vec<MediaItem> {
        let Ok(entries) = std::fs::read_dir(root) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for entry in entries.flatten() {
            let folder_name = entry.file_name().to_string_lossy().to_string();
            let Some(imdb) = imdb_from_segment(&folder_name) else {
                continue;
            };
            let Some((title, year)) = title_and_year(&folder_name) else {
                continue;
            };
            let Some((file, folder)) = first_link_target(&entry.path()) else {
                continue;
            };
            let mut meta = ItemMeta::requested(imdb, "symlink_library");
            meta.title = Some(title);
            meta.year = year;
            meta.is_anime = anime;
            meta.symlinked = true;
            meta.symlinked_at = Some(OffsetDateTime::now_utc());
            meta.symlinked_times = 1;
            meta.file = Some(file);
            meta.folder = folder;
            out.push(MediaItem::Movie(Movie { meta }));
        }
        out
    }

    fn scan_shows(&self, root: &Path, anime: bool) -> Vec<MediaItem> {
        let Ok(entries) = std::fs::read_dir(root) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for entry in entries.flatten() {
            let folder_name = entry.file_name().to_string_lossy().to_string();
            let Some(imdb) = imdb_from_segment(&folder_name) else {
                continue;
            };
            let Some((title, year)) = title_and_year(&folder_name) else {
                continue;
            };
            let mut show = Show {
                meta: {
                    let mut meta = ItemMeta::requested(imdb, "symlink_library");
                    meta.title = Some(title);
                    meta.year = year;
                    meta.is_anime = anime;
                    meta
                },
                seasons: Vec::new(),
            };
            let Ok(seasons) = std::fs::read_dir(entry.path()) else {
                continue;
            };
            for season_dir in seasons.flatten() {
                let mut episodes = Vec::new();
                let Ok(files) = std::fs::read_dir(season_dir.path()) else {
                    continue;
                };
                let mut season_number = None;
                for file in files.flatten() {
                    let name = file.file_name().to_string_lossy().to_string();
                    let Some((season, episode)) = season_episode_from_name(&name) else {
                        continue;
                    };
                    season_number = Some(season);
                    let target = std::fs::read_link(file.path()).ok();
                    let mut meta = ItemMeta::default();
                    meta.is_anime = anime;
                    meta.symlinked = true;
                    meta.symlinked_at = Some(OffsetDateTime::now_utc());
                    meta.symlinked_times = 1;
                    if let Some(target) = &target {
                        meta.file = target
                            .file_name()
                            .map(|name| name.to_string_lossy().to_string());
                        meta.folder = target
                            .parent()
                            .and_then(|parent| parent.file_name())
                            .map(|name| name.to_string_lossy().to_string());
                    }
                    episodes.push(Episode {
                        meta,
                        number: episode,
                        season_number: season,
                        show: ShowRef::default(),
                    });
                }
                if let Some(number) = season_number {
                    episodes.sort_by_key(|episode| episode.number);
                    show.seasons.push(Season {
                        meta: ItemMeta::default(),
                        number,
                        episodes,
                        show: ShowRef::default(),
                    });
                }
            }
            if !show.seasons.is_empty() {
                show.seasons.sort_by_key(|season| season.number);
                show.refresh_refs();
                out.push(MediaItem::Show(show));
            }
        }
        out
    }
}

/// `Foo (2020) {imdb-tt0000001}` -> ("Foo", 2020)
fn title_and_year(folder: &str) -> Option<(String, Option<i32>)> {
    let before_tag = folder.split('{').next()?.trim();
    match before_tag.rsplit_once('(') {
        Some((title, rest)) => {
            let year = rest.trim_end_matches(')').trim().parse().ok();
            Some((title.trim().to_string(), year))
        }
        None => Some((before_tag.to_string(), None)),
    }
}

fn first_link_target(folder: &Path) -> Option<(String, Option<String>)> {
    let entries = std::fs::read_dir(folder).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_symlink() {
            continue;
        }
        let target = std::fs::read_link(&path).ok()?;
        let file = target.file_name()?.to_string_lossy().to_string();
        let folder = target
            .parent()
            .and_then(|parent| parent.file_name())
            .map(|name| name.to_string_lossy().to_string());
        return Some((file, folder));
    }
    None
}

#[cfg(test)]
mod tests {
    use crate::item::Stream;

    use super::*;

    fn cache(name: &str) -> &'static HashCache {
        let path = std::env::temp_dir().join(format!("symlinker-test-{name}.json"));
        let _ = std::fs::remove_file(&path);
        Box::leak(Box::new(HashCache::load(path)))
    }

    struct Layout {
        root: PathBuf,
        rclone: PathBuf,
        library: PathBuf,
    }

    fn layout(name: &str) -> Layout {
        let root = std::env::temp_dir().join(format!("symlinker-test-{name}"));
        let _ = std::fs::remove_dir_all(&root);
        let rclone = root.join("mnt");
        let library = root.join("library");
        std::fs::create_dir_all(rclone.join("torrents")).unwrap();
        std::fs::create_dir_all(&library).unwrap();
        Layout {
            root,
            rclone: rclone.join("torrents"),
            library,
        }
    }

    fn symlinker(layout: &Layout, name: &str) -> Symlinker {
        Symlinker {
            rclone_path: layout.rclone.clone(),
            library_path: layout.library.clone(),
            cache: cache(name),
            initialized: true,
        }
    }

    fn downloaded_movie(layout: &Layout) -> MediaItem {
        let folder = "The.Matrix.1999.1080p.BluRay";
        let file = "The.Matrix.1999.1080p.BluRay.mkv";
        std::fs::create_dir_all(layout.rclone.join(folder)).unwrap();
        std::fs::write(layout.rclone.join(folder).join(file), b"x").unwrap();

        let mut item = crate::db::tests_support::movie("tt0133093", "The Matrix");
        {
            let meta = item.meta_mut();
            meta.year = Some(1999);
            meta.file = Some(file.to_string());
            meta.folder = Some(folder.to_string());
        }
        item
    }

    #[tokio::test]
    async fn movie_symlink_layout_is_exact() {
        let layout = layout("movie");
        let linker = symlinker(&layout, "movie");
        for folder in ["movies", "shows", "anime_movies", "anime_shows"] {
            std::fs::create_dir_all(layout.library.join(folder)).unwrap();
        }
        let item = downloaded_movie(&layout);

        let out = linker.run(item).await.unwrap();
        let item = &out[0];
        assert!(item.meta().symlinked);
        assert_eq!(item.meta().symlinked_times, 1);

        let expected = layout
            .library
            .join("movies")
            .join("The Matrix (1999) {imdb-tt0133093}")
            .join("The Matrix (1999) {imdb-tt0133093}.mkv");
        assert!(expected.is_symlink());
        let target = std::fs::read_link(&expected).unwrap();
        assert!(target.starts_with(&layout.rclone));
        let _ = std::fs::remove_dir_all(&layout.root);
    }

    #[tokio::test]
    async fn second_run_does_not_bump_attempt_counter() {
        let layout = layout("idempotent");
        let linker = symlinker(&layout, "idempotent");
        for folder in ["movies", "shows", "anime_movies", "anime_shows"] {
            std::fs::create_dir_all(layout.library.join(folder)).unwrap();
        }
        let item = downloaded_movie(&layout);

        let out = linker.run(item).await.unwrap();
        let once = out.into_iter().next().unwrap();
        assert_eq!(once.meta().symlinked_times, 1);

        let out = linker.run(once).await.unwrap();
        let twice = out.into_iter().next().unwrap();
        assert_eq!(twice.meta().symlinked_times, 1);
        let _ = std::fs::remove_dir_all(&layout.root);
    }

    #[tokio::test]
    async fn exhausted_attempts_blacklist_and_reset() {
        let layout = layout("exhausted");
        let linker = symlinker(&layout, "exhausted");
        let mut item = downloaded_movie(&layout);
        {
            let meta = item.meta_mut();
            meta.symlinked_times = MAX_SYMLINK_ATTEMPTS;
            meta.active_stream = Some(crate::item::ActiveStream {
                hash: "f".repeat(40),
                ..Default::default()
            });
            meta.streams.insert(
                "f".repeat(40),
                Stream {
                    raw_title: "x".into(),
                    rank: 1,
                    fetch_ok: true,
                },
            );
        }

        let out = linker.run(item).await.unwrap();
        let item = &out[0];
        assert!(linker.cache.is_blacklisted(&"f".repeat(40)));
        assert!(item.meta().streams.is_empty());
        assert!(item.meta().file.is_none());
        assert_eq!(item.meta().symlinked_times, 0);
        let _ = std::fs::remove_dir_all(&layout.root);
    }

    #[test]
    fn episode_filename_with_range() {
        let layout = layout("naming");
        let linker = symlinker(&layout, "naming");
        let show = ShowRef {
            title: Some("Foo".into()),
            year: Some(2020),
            imdb_id: Some("tt0000001".into()),
            season_count: 2,
            ..Default::default()
        };
        let meta = ItemMeta {
            title: Some("Pilot".into()),
            ..Default::default()
        };
        let name = linker
            .destination_filename(
                &meta,
                Some(&show),
                Some((2, 3)),
                "Foo.S02E03E04.1080p.mkv",
            )
            .unwrap();
        assert_eq!(name, "Foo (2020) - s02e03-e04 - Pilot.mkv");

        let single = linker
            .destination_filename(&meta, Some(&show), Some((2, 3)), "Foo.S02E03.1080p.mkv")
            .unwrap();
        assert_eq!(single, "Foo (2020) - s02e03 - Pilot.mkv");
        let _ = std::fs::remove_dir_all(&layout.root);
    }

    #[test]
    fn library_scan_reverse_constructs_items() {
        let layout = layout("scan");
        let show_dir = layout
            .library
            .join("shows")
            .join("Foo (2020) {imdb-tt0000001}")
            .join("Season 02");
        std::fs::create_dir_all(&show_dir).unwrap();
        let target_dir = layout.rclone.join("Foo.S02.1080p");
        std::fs::create_dir_all(&target_dir).unwrap();
        let target = target_dir.join("Foo.S02E03.mkv");
        std::fs::write(&target, b"x").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(&target, show_dir.join("Foo (2020) - s02e03 - Ep.mkv"))
            .unwrap();

        let scanned = SymlinkLibrary::new(&layout.library).scan();
        assert_eq!(scanned.len(), 1);
        let MediaItem::Show(show) = &scanned[0] else {
            panic!("expected show");
        };
        assert_eq!(show.meta.imdb_id.as_deref(), Some("tt0000001"));
        assert_eq!(show.meta.title.as_deref(), Some("Foo"));
        assert_eq!(show.seasons[0].number, 2);
        assert_eq!(show.seasons[0].episodes[0].number, 3);
        assert!(show.seasons[0].episodes[0].meta.symlinked);
        assert_eq!(
            show.seasons[0].episodes[0].meta.file.as_deref(),
            Some("Foo.S02E03.mkv")
        );
        let _ = std::fs::remove_dir_all(&layout.root);
    }
}
