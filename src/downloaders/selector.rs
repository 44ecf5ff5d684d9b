use std::collections::{BTreeMap, BTreeSet};

use crate::{
    config::{
        EpisodeFilesizeMaxMb, EpisodeFilesizeMinMb, MovieFilesizeMaxMb, MovieFilesizeMinMb,
        VideoExtensions, CONFIG,
    },
    item::MediaItem,
    parser,
    utils::file_extension,
};

const MB: i64 = 1024 * 1024;

/// One downloadable file inside a cached torrent.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerFile {
    /// Provider side file id, needed for the select-files call.
    pub file_id: Option<i64>,
    pub filename: String,
    pub filesize: u64,
}

/// Canonical container shape. Real-Debrid's variant groupings and
/// AllDebrid's flat file lists both adapt into this.
#[derive(Debug, Clone, Default)]
pub struct TorrentContainer {
    pub files: Vec<ContainerFile>,
}

#[derive(Debug, Clone)]
pub struct FileFilter {
    pub video_extensions: Vec<String>,
    pub movie_min_bytes: i64,
    pub movie_max_bytes: i64,
    pub episode_min_bytes: i64,
    pub episode_max_bytes: i64,
}

impl FileFilter {
    pub fn from_config() -> Self {
        let to_bytes = |mb: i64| if mb < 0 { -1 } else { mb * MB };
        Self {
            video_extensions: CONFIG.get_value::<VideoExtensions>().0,
            movie_min_bytes: to_bytes(CONFIG.get_value::<MovieFilesizeMinMb>().0),
            movie_max_bytes: to_bytes(CONFIG.get_value::<MovieFilesizeMaxMb>().0),
            episode_min_bytes: to_bytes(CONFIG.get_value::<EpisodeFilesizeMinMb>().0),
            episode_max_bytes: to_bytes(CONFIG.get_value::<EpisodeFilesizeMaxMb>().0),
        }
    }

    fn extension_ok(&self, filename: &str) -> bool {
        file_extension(filename)
            .map(str::to_lowercase)
            .map_or(false, |ext| self.video_extensions.contains(&ext))
    }

    fn size_ok(&self, size: u64, min: i64, max: i64) -> bool {
        let size = size as i64;
        if min >= 0 && size < min {
            return false;
        }
        if max >= 0 && size > max {
            return false;
        }
        true
    }

    pub fn movie_ok(&self, file: &ContainerFile) -> bool {
        self.extension_ok(&file.filename)
            && self.size_ok(file.filesize, self.movie_min_bytes, self.movie_max_bytes)
    }

    pub fn episode_ok(&self, file: &ContainerFile) -> bool {
        self.extension_ok(&file.filename)
            && self.size_ok(file.filesize, self.episode_min_bytes, self.episode_max_bytes)
    }
}

impl Default for FileFilter {
    fn default() -> Self {
        let to_bytes = |mb: i64| if mb < 0 { -1 } else { mb * MB };
        Self {
            video_extensions: vec!["mkv".into(), "mp4".into(), "avi".into()],
            movie_min_bytes: to_bytes(200),
            movie_max_bytes: -1,
            episode_min_bytes: to_bytes(40),
            episode_max_bytes: -1,
        }
    }
}

/// How much of a season a pack must cover to be accepted. Real-Debrid
/// containers are precise so every needed episode must match; AllDebrid
/// multi file packs are looser and half is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeasonCoverage {
    Strict,
    Half,
}

#[derive(Debug, Clone)]
pub struct SeasonTarget {
    pub number: i64,
    pub needed: BTreeSet<i64>,
    pub one_season: bool,
}

/// What the matcher needs to know about the item, detached from the item
/// tree so the selection stays a pure function.
#[derive(Debug, Clone)]
pub enum SelectionTarget {
    Movie,
    Episode {
        season: i64,
        episode: i64,
        one_season: bool,
    },
    Season(SeasonTarget),
    Show { seasons: Vec<SeasonTarget> },
}

impl SelectionTarget {
    /// Episodes still waiting for a file are the ones a pack must cover.
    pub fn from_item(item: &MediaItem) -> Option<Self> {
        match item {
            MediaItem::Movie(_) => Some(SelectionTarget::Movie),
            MediaItem::Episode(episode) => Some(SelectionTarget::Episode {
                season: episode.season_number,
                episode: episode.number,
                one_season: episode.one_season_show(),
            }),
            MediaItem::Season(season) => Some(SelectionTarget::Season(SeasonTarget {
                number: season.number,
                needed: season
                    .episodes
                    .iter()
                    .filter(|episode| episode.meta.leaf_state().needs_download())
                    .map(|episode| episode.number)
                    .collect(),
                one_season: season.show.season_count == 1,
            })),
            MediaItem::Show(show) => Some(SelectionTarget::Show {
                seasons: show
                    .seasons
                    .iter()
                    .filter(|season| season.is_released())
                    .map(|season| SeasonTarget {
                        number: season.number,
                        needed: season
                            .episodes
                            .iter()
                            .filter(|episode| episode.meta.leaf_state().needs_download())
                            .map(|episode| episode.number)
                            .collect(),
                        one_season: show.seasons.len() == 1,
                    })
                    .collect(),
            }),
        }
    }
}

/// Files chosen out of a container, keyed by (season, episode) for shows.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub movie_file: Option<ContainerFile>,
    pub episode_files: BTreeMap<(i64, i64), ContainerFile>,
}

impl Selection {
    pub fn selected_files(&self) -> Vec<&ContainerFile> {
        let mut out: Vec<&ContainerFile> = self.episode_files.values().collect();
        if let Some(movie) = &self.movie_file {
            out.push(movie);
        }
        out
    }

    pub fn file_ids(&self) -> Vec<i64> {
        self.selected_files()
            .iter()
            .filter_map(|file| file.file_id)
            .collect()
    }
}

/// Decide whether the container satisfies the target and which file belongs
/// to which episode.
pub fn select(
    target: &SelectionTarget,
    container: &TorrentContainer,
    filter: &FileFilter,
    coverage: SeasonCoverage,
) -> Option<Selection> {
    match target {
        SelectionTarget::Movie => {
            let mut files: Vec<&ContainerFile> = container
                .files
                .iter()
                .filter(|file| filter.movie_ok(file))
                .collect();
            files.sort_by_key(|file| std::cmp::Reverse(file.filesize));
            let chosen = files.into_iter().find(|file| {
                let parsed = parser::parse_title(&file.filename);
                parsed.is_movie()
            })?;
            Some(Selection {
                movie_file: Some(chosen.clone()),
                episode_files: BTreeMap::new(),
            })
        }
        SelectionTarget::Episode {
            season,
            episode,
            one_season,
        } => {
            let chosen = container
                .files
                .iter()
                .filter(|file| filter.episode_ok(file))
                .find(|file| {
                    let parsed = parser::parse_title(&file.filename);
                    parsed.references_episode(*season, *episode, *one_season)
                })?;
            let mut episode_files = BTreeMap::new();
            episode_files.insert((*season, *episode), chosen.clone());
            Some(Selection {
                movie_file: None,
                episode_files,
            })
        }
        SelectionTarget::Season(season) => {
            let matched = match_season(season, container, filter)?;
            let mut selection = Selection::default();
            for (episode, file) in matched {
                selection
                    .episode_files
                    .insert((season.number, episode), file);
            }
            accepts_coverage(&selection, season, coverage).then_some(selection)
        }
        SelectionTarget::Show { seasons } => {
            // every released season must be satisfied by this container
            let mut selection = Selection::default();
            for season in seasons {
                let matched = match_season(season, container, filter)?;
                let mut per_season = Selection::default();
                for (episode, file) in matched {
                    per_season
                        .episode_files
                        .insert((season.number, episode), file);
                }
                if !accepts_coverage(&per_season, season, coverage) {
                    return None;
                }
                selection.episode_files.extend(per_season.episode_files);
            }
            Some(selection)
        }
    }
}

/// Map needed episode numbers to their files within the container.
fn match_season(
    season: &SeasonTarget,
    container: &TorrentContainer,
    filter: &FileFilter,
) -> Option<BTreeMap<i64, ContainerFile>> {
    if season.needed.is_empty() {
        return None;
    }
    let mut matched: BTreeMap<i64, ContainerFile> = BTreeMap::new();
    for file in &container.files {
        if !filter.episode_ok(file) {
            continue;
        }
        let parsed = parser::parse_title(&file.filename);
        if parsed.episodes.is_empty() {
            continue;
        }
        let season_matches = parsed.seasons.contains(&season.number)
            || (season.one_season && parsed.seasons.is_empty());
        if !season_matches {
            continue;
        }
        for episode in &parsed.episodes {
            if season.needed.contains(episode) {
                matched.entry(*episode).or_insert_with(|| file.clone());
            }
        }
    }
    (!matched.is_empty()).then_some(matched)
}

fn accepts_coverage(
    selection: &Selection,
    season: &SeasonTarget,
    coverage: SeasonCoverage,
) -> bool {
    let matched = selection
        .episode_files
        .keys()
        .filter(|(_, episode)| season.needed.contains(episode))
        .count();
    match coverage {
        SeasonCoverage::Strict => matched == season.needed.len(),
        SeasonCoverage::Half => matched * 2 >= season.needed.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, size_mb: u64) -> ContainerFile {
        ContainerFile {
            file_id: None,
            filename: name.to_string(),
            filesize: size_mb * MB as u64,
        }
    }

    fn container(files: Vec<ContainerFile>) -> TorrentContainer {
        TorrentContainer { files }
    }

    fn season_target(number: i64, needed: &[i64], one_season: bool) -> SelectionTarget {
        SelectionTarget::Season(SeasonTarget {
            number,
            needed: needed.iter().copied().collect(),
            one_season,
        })
    }

    #[test]
    fn movie_accepts_largest_parsing_file() {
        let target = SelectionTarget::Movie;
        let container = container(vec![
            file("sample.mkv", 50),
            file("The.Matrix.1999.1080p.BluRay.mkv", 8000),
            file("readme.txt", 1),
        ]);
        let selection =
            select(&target, &container, &FileFilter::default(), SeasonCoverage::Strict).unwrap();
        assert_eq!(
            selection.movie_file.unwrap().filename,
            "The.Matrix.1999.1080p.BluRay.mkv"
        );
    }

    #[test]
    fn movie_size_bound_is_exact() {
        let target = SelectionTarget::Movie;
        let filter = FileFilter::default();

        let exactly_min = ContainerFile {
            file_id: None,
            filename: "Movie.2020.1080p.mkv".into(),
            filesize: (filter.movie_min_bytes) as u64,
        };
        let one_byte_under = ContainerFile {
            file_id: None,
            filename: "Movie.2020.1080p.mkv".into(),
            filesize: (filter.movie_min_bytes - 1) as u64,
        };

        assert!(select(
            &target,
            &container(vec![exactly_min]),
            &filter,
            SeasonCoverage::Strict
        )
        .is_some());
        assert!(select(
            &target,
            &container(vec![one_byte_under]),
            &filter,
            SeasonCoverage::Strict
        )
        .is_none());
    }

    #[test]
    fn episode_requires_matching_numbers() {
        let target = SelectionTarget::Episode {
            season: 2,
            episode: 3,
            one_season: false,
        };
        let filter = FileFilter::default();
        let good = container(vec![file("Show.S02E03.1080p.mkv", 700)]);
        let wrong_episode = container(vec![file("Show.S02E04.1080p.mkv", 700)]);
        let wrong_season = container(vec![file("Show.S01E03.1080p.mkv", 700)]);

        assert!(select(&target, &good, &filter, SeasonCoverage::Strict).is_some());
        assert!(select(&target, &wrong_episode, &filter, SeasonCoverage::Strict).is_none());
        assert!(select(&target, &wrong_season, &filter, SeasonCoverage::Strict).is_none());
    }

    #[test]
    fn single_season_show_matches_files_without_season_tag() {
        // a one season show whose pack files carry no season marker
        let target = season_target(1, &[1, 2], true);
        let filter = FileFilter::default();
        let pack = container(vec![
            file("show.name.e01.mkv", 500),
            file("show.name.e02.mkv", 500),
        ]);
        let selection = select(&target, &pack, &filter, SeasonCoverage::Strict).unwrap();
        assert_eq!(selection.episode_files.len(), 2);
        assert_eq!(
            selection.episode_files[&(1, 1)].filename,
            "show.name.e01.mkv"
        );

        // with more than one season the same files must not match
        let target = season_target(1, &[1, 2], false);
        assert!(select(&target, &pack, &filter, SeasonCoverage::Strict).is_none());
    }

    #[test]
    fn season_pack_with_extras_binds_only_needed() {
        // episodes 11 and 12 are complete, a 3 GB bonus file rides along
        let needed: Vec<i64> = (1..=10).collect();
        let target = season_target(1, &needed, false);
        let filter = FileFilter::default();
        let mut files: Vec<ContainerFile> = (1..=12)
            .map(|number| file(&format!("Show.S01E{:02}.1080p.mkv", number), 700))
            .collect();
        files.push(file("Show.Behind.The.Scenes.Bonus.mkv", 3000));

        let selection = select(
            &target,
            &container(files),
            &filter,
            SeasonCoverage::Strict,
        )
        .unwrap();
        assert_eq!(selection.episode_files.len(), 10);
        assert!(!selection.episode_files.contains_key(&(1, 11)));
        assert!(!selection
            .episode_files
            .values()
            .any(|file| file.filename.contains("Bonus")));
    }

    #[test]
    fn strict_coverage_rejects_incomplete_packs() {
        let target = season_target(1, &[1, 2, 3, 4], false);
        let filter = FileFilter::default();
        let half_pack = container(vec![
            file("Show.S01E01.mkv", 500),
            file("Show.S01E02.mkv", 500),
        ]);
        assert!(select(&target, &half_pack, &filter, SeasonCoverage::Strict).is_none());
        assert!(select(&target, &half_pack, &filter, SeasonCoverage::Half).is_some());
    }

    #[test]
    fn show_target_needs_every_released_season() {
        let target = SelectionTarget::Show {
            seasons: vec![
                SeasonTarget {
                    number: 1,
                    needed: [1, 2].into_iter().collect(),
                    one_season: false,
                },
                SeasonTarget {
                    number: 2,
                    needed: [1].into_iter().collect(),
                    one_season: false,
                },
            ],
        };
        let filter = FileFilter::default();
        let complete = container(vec![
            file("Show.S01E01.mkv", 500),
            file("Show.S01E02.mkv", 500),
            file("Show.S02E01.mkv", 500),
        ]);
        let missing_season = container(vec![
            file("Show.S01E01.mkv", 500),
            file("Show.S01E02.mkv", 500),
        ]);
        let selection = select(&target, &complete, &filter, SeasonCoverage::Strict).unwrap();
        assert_eq!(selection.episode_files.len(), 3);
        assert!(select(&target, &missing_season, &filter, SeasonCoverage::Strict).is_none());
    }

    #[test]
    fn multi_episode_file_covers_both_slots() {
        let target = season_target(1, &[1, 2], false);
        let filter = FileFilter::default();
        let pack = container(vec![file("Show.S01E01-E02.1080p.mkv", 1400)]);
        let selection = select(&target, &pack, &filter, SeasonCoverage::Strict).unwrap();
        assert_eq!(selection.episode_files.len(), 2);
        assert_eq!(
            selection.episode_files[&(1, 1)],
            selection.episode_files[&(1, 2)]
        );
    }
}
