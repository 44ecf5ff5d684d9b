use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Lifecycle states. Derived from item attributes on every read, never
/// trusted from the cached `last_state` column inside the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    Unknown,
    Requested,
    Indexed,
    Unreleased,
    Scraped,
    Downloaded,
    Symlinked,
    Completed,
    PartiallyCompleted,
    Failed,
}

impl State {
    pub const ALL: [State; 10] = [
        State::Unknown,
        State::Requested,
        State::Indexed,
        State::Unreleased,
        State::Scraped,
        State::Downloaded,
        State::Symlinked,
        State::Completed,
        State::PartiallyCompleted,
        State::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Unknown => "Unknown",
            State::Requested => "Requested",
            State::Indexed => "Indexed",
            State::Unreleased => "Unreleased",
            State::Scraped => "Scraped",
            State::Downloaded => "Downloaded",
            State::Symlinked => "Symlinked",
            State::Completed => "Completed",
            State::PartiallyCompleted => "PartiallyCompleted",
            State::Failed => "Failed",
        }
    }

    /// States a season pack download still has to cover.
    pub fn needs_download(&self) -> bool {
        matches!(
            self,
            State::Indexed | State::Scraped | State::Unknown | State::Failed
        )
    }
}

impl Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for State {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        State::ALL
            .iter()
            .find(|state| state.as_str() == s)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("unknown state name: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Show,
    Season,
    Episode,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Show => "show",
            MediaKind::Season => "season",
            MediaKind::Episode => "episode",
        }
    }
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(MediaKind::Movie),
            "show" => Ok(MediaKind::Show),
            "season" => Ok(MediaKind::Season),
            "episode" => Ok(MediaKind::Episode),
            rest => Err(anyhow::anyhow!("unknown media kind: {rest}")),
        }
    }
}

/// A candidate torrent, keyed by infohash in [ItemMeta::streams].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stream {
    pub raw_title: String,
    pub rank: i32,
    pub fetch_ok: bool,
}

/// The torrent chosen for an item. `filename`/`alternative_filename` are the
/// debrid-side folder names reported by the torrent info endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActiveStream {
    pub hash: String,
    pub torrent_id: Option<String>,
    pub filename: Option<String>,
    pub alternative_filename: Option<String>,
}

/// Attributes shared by every item variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemMeta {
    pub id: Option<i64>,
    pub parent_id: Option<i64>,
    pub imdb_id: Option<String>,
    pub tmdb_id: Option<String>,
    pub tvdb_id: Option<String>,
    pub title: Option<String>,
    pub year: Option<i32>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub aired_at: Option<OffsetDateTime>,
    pub genres: Vec<String>,
    pub language: Option<String>,
    pub country: Option<String>,
    pub network: Option<String>,
    pub is_anime: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub requested_at: Option<OffsetDateTime>,
    pub requested_by: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub indexed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub scraped_at: Option<OffsetDateTime>,
    pub scraped_times: u32,
    pub symlinked: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub symlinked_at: Option<OffsetDateTime>,
    pub symlinked_times: u32,
    pub streams: BTreeMap<String, Stream>,
    pub active_stream: Option<ActiveStream>,
    pub file: Option<String>,
    pub folder: Option<String>,
    pub alternative_folder: Option<String>,
    pub key: Option<String>,
    pub guid: Option<String>,
    pub update_folder: Option<String>,
    pub postprocessed: bool,
    pub last_state: State,
}

impl Default for ItemMeta {
    fn default() -> Self {
        Self {
            id: None,
            parent_id: None,
            imdb_id: None,
            tmdb_id: None,
            tvdb_id: None,
            title: None,
            year: None,
            aired_at: None,
            genres: Vec::new(),
            language: None,
            country: None,
            network: None,
            is_anime: false,
            requested_at: None,
            requested_by: None,
            indexed_at: None,
            scraped_at: None,
            scraped_times: 0,
            symlinked: false,
            symlinked_at: None,
            symlinked_times: 0,
            streams: BTreeMap::new(),
            active_stream: None,
            file: None,
            folder: None,
            alternative_folder: None,
            key: None,
            guid: None,
            update_folder: None,
            postprocessed: false,
            last_state: State::Unknown,
        }
    }
}

impl ItemMeta {
    pub fn requested(imdb_id: impl Into<String>, requested_by: impl Into<String>) -> Self {
        Self {
            imdb_id: Some(imdb_id.into()),
            requested_by: Some(requested_by.into()),
            requested_at: Some(OffsetDateTime::now_utc()),
            ..Default::default()
        }
    }

    pub fn is_released(&self) -> bool {
        self.aired_at
            .map_or(false, |aired| aired <= OffsetDateTime::now_utc())
    }

    pub fn is_scraped(&self) -> bool {
        !self.streams.is_empty()
    }

    pub fn leaf_state(&self) -> State {
        if self.key.is_some() || self.update_folder.as_deref() == Some("updated") {
            State::Completed
        } else if self.symlinked {
            State::Symlinked
        } else if self.file.is_some() && self.folder.is_some() {
            State::Downloaded
        } else if self.is_scraped() {
            State::Scraped
        } else if self.title.is_some() {
            if self.is_released() {
                State::Indexed
            } else {
                State::Unreleased
            }
        } else if self.imdb_id.is_some() && self.requested_by.is_some() {
            State::Requested
        } else {
            State::Unknown
        }
    }

    /// Copy metadata attributes from `other` where absent on self.
    pub fn copy_absent_attrs(&mut self, other: &ItemMeta) {
        fn fill<T: Clone>(target: &mut Option<T>, source: &Option<T>) {
            if target.is_none() {
                *target = source.clone();
            }
        }
        fill(&mut self.title, &other.title);
        fill(&mut self.tmdb_id, &other.tmdb_id);
        fill(&mut self.tvdb_id, &other.tvdb_id);
        fill(&mut self.network, &other.network);
        fill(&mut self.country, &other.country);
        fill(&mut self.language, &other.language);
        fill(&mut self.aired_at, &other.aired_at);
        fill(&mut self.year, &other.year);
        if self.genres.is_empty() {
            self.genres = other.genres.clone();
        }
        if !self.is_anime {
            self.is_anime = other.is_anime;
        }
    }
}

/// Weak back-pointer to the owning show, carried by value so seasons and
/// episodes remain self-describing outside their tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShowRef {
    pub id: Option<i64>,
    pub imdb_id: Option<String>,
    pub title: Option<String>,
    pub year: Option<i32>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub aired_at: Option<OffsetDateTime>,
    pub season_count: usize,
    pub is_anime: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Movie {
    pub meta: ItemMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Show {
    pub meta: ItemMeta,
    pub seasons: Vec<Season>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Season {
    pub meta: ItemMeta,
    pub number: i64,
    pub episodes: Vec<Episode>,
    pub show: ShowRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub meta: ItemMeta,
    pub number: i64,
    pub season_number: i64,
    pub show: ShowRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MediaItem {
    Movie(Movie),
    Show(Show),
    Season(Season),
    Episode(Episode),
}

impl Show {
    pub fn show_ref(&self) -> ShowRef {
        ShowRef {
            id: self.meta.id,
            imdb_id: self.meta.imdb_id.clone(),
            title: self.meta.title.clone(),
            year: self.meta.year,
            aired_at: self.meta.aired_at,
            season_count: self.seasons.len(),
            is_anime: self.meta.is_anime,
        }
    }

    pub fn add_season(&mut self, mut season: Season) {
        if self.seasons.iter().any(|s| s.number == season.number) {
            return;
        }
        season.meta.is_anime = self.meta.is_anime;
        season.show = self.show_ref();
        self.seasons.push(season);
        self.seasons.sort_by_key(|s| s.number);
    }

    pub fn fill_in_missing_children(&mut self, other: &Show) {
        for season in &other.seasons {
            match self.seasons.iter_mut().find(|s| s.number == season.number) {
                Some(existing) => existing.fill_in_missing_children(season),
                None => self.add_season(season.clone()),
            }
        }
        self.refresh_refs();
    }

    /// Re-stamp the weak show reference on every descendant. Needed after
    /// children are added or show metadata changes.
    pub fn refresh_refs(&mut self) {
        let show_ref = self.show_ref();
        for season in &mut self.seasons {
            season.show = show_ref.clone();
            for episode in &mut season.episodes {
                episode.show = show_ref.clone();
                episode.season_number = season.number;
            }
        }
    }

    /// Propagate attributes the indexer only sets on the show down to
    /// seasons and episodes when theirs are empty.
    pub fn propagate_attributes_to_children(&mut self) {
        fn propagate(target: &mut ItemMeta, source: &ItemMeta) {
            if target.genres.is_empty() {
                target.genres = source.genres.clone();
            }
            if target.country.is_none() {
                target.country = source.country.clone();
            }
            if target.network.is_none() {
                target.network = source.network.clone();
            }
            if target.language.is_none() {
                target.language = source.language.clone();
            }
            if !target.is_anime {
                target.is_anime = source.is_anime;
            }
        }
        let parent = self.meta.clone();
        for season in &mut self.seasons {
            propagate(&mut season.meta, &parent);
            for episode in &mut season.episodes {
                propagate(&mut episode.meta, &parent);
            }
        }
        self.refresh_refs();
    }
}

impl Season {
    pub fn add_episode(&mut self, mut episode: Episode) {
        if self.episodes.iter().any(|e| e.number == episode.number) {
            return;
        }
        episode.meta.is_anime = self.meta.is_anime;
        episode.season_number = self.number;
        episode.show = self.show.clone();
        self.episodes.push(episode);
        self.episodes.sort_by_key(|e| e.number);
    }

    pub fn fill_in_missing_children(&mut self, other: &Season) {
        for episode in &other.episodes {
            if !self.episodes.iter().any(|e| e.number == episode.number) {
                self.add_episode(episode.clone());
            }
        }
    }

    pub fn is_released(&self) -> bool {
        self.episodes.iter().any(|e| e.meta.is_released()) || self.meta.is_released()
    }

    fn aggregate_state(&self) -> State {
        if self.episodes.is_empty() {
            return self.meta.leaf_state();
        }
        let states: Vec<State> = self.episodes.iter().map(|e| e.meta.leaf_state()).collect();
        aggregate(&states, self.meta.is_scraped())
    }
}

impl Episode {
    pub fn one_season_show(&self) -> bool {
        self.show.season_count == 1
    }
}

/// Shared aggregate rules for shows over seasons and seasons over episodes.
fn aggregate(children: &[State], self_scraped: bool) -> State {
    if children.iter().all(|s| *s == State::Completed) {
        return State::Completed;
    }
    if children
        .iter()
        .all(|s| matches!(s, State::Symlinked | State::Completed))
    {
        return State::Symlinked;
    }
    if children
        .iter()
        .all(|s| matches!(s, State::Downloaded | State::Symlinked | State::Completed))
    {
        return State::Downloaded;
    }
    if self_scraped
        || children.iter().all(|s| {
            matches!(
                s,
                State::Scraped | State::Downloaded | State::Symlinked | State::Completed
            )
        })
    {
        return State::Scraped;
    }
    if children.iter().any(|s| *s == State::Completed) {
        return State::PartiallyCompleted;
    }
    if children.iter().any(|s| *s == State::Indexed) {
        return State::Indexed;
    }
    if children.iter().all(|s| *s == State::Unreleased) {
        return State::Unreleased;
    }
    if children.iter().any(|s| *s == State::Requested) {
        return State::Requested;
    }
    State::Unknown
}

impl MediaItem {
    pub fn kind(&self) -> MediaKind {
        match self {
            MediaItem::Movie(_) => MediaKind::Movie,
            MediaItem::Show(_) => MediaKind::Show,
            MediaItem::Season(_) => MediaKind::Season,
            MediaItem::Episode(_) => MediaKind::Episode,
        }
    }

    pub fn meta(&self) -> &ItemMeta {
        match self {
            MediaItem::Movie(m) => &m.meta,
            MediaItem::Show(s) => &s.meta,
            MediaItem::Season(s) => &s.meta,
            MediaItem::Episode(e) => &e.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ItemMeta {
        match self {
            MediaItem::Movie(m) => &mut m.meta,
            MediaItem::Show(s) => &mut s.meta,
            MediaItem::Season(s) => &mut s.meta,
            MediaItem::Episode(e) => &mut e.meta,
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.meta().id
    }

    pub fn imdb_id(&self) -> Option<&str> {
        self.meta().imdb_id.as_deref()
    }

    /// Derive the lifecycle state. Shows and seasons aggregate over children.
    pub fn state(&self) -> State {
        match self {
            MediaItem::Movie(m) => m.meta.leaf_state(),
            MediaItem::Episode(e) => e.meta.leaf_state(),
            MediaItem::Season(s) => s.aggregate_state(),
            MediaItem::Show(s) => {
                if s.seasons.is_empty() {
                    return s.meta.leaf_state();
                }
                let states: Vec<State> = s.seasons.iter().map(|x| x.aggregate_state()).collect();
                aggregate(&states, s.meta.is_scraped())
            }
        }
    }

    /// Title of the owning show for seasons and episodes, own title otherwise.
    pub fn top_title(&self) -> Option<&str> {
        match self {
            MediaItem::Season(s) => s.show.title.as_deref(),
            MediaItem::Episode(e) => e.show.title.as_deref(),
            rest => rest.meta().title.as_deref(),
        }
    }

    pub fn is_released(&self) -> bool {
        match self {
            MediaItem::Season(s) => s.is_released(),
            MediaItem::Show(s) => {
                s.seasons.iter().any(|season| season.is_released()) || s.meta.is_released()
            }
            rest => rest.meta().is_released(),
        }
    }

    pub fn log_string(&self) -> String {
        match self {
            MediaItem::Movie(m) => m
                .meta
                .title
                .clone()
                .or_else(|| m.meta.imdb_id.clone())
                .unwrap_or_else(|| "<unknown movie>".to_string()),
            MediaItem::Show(s) => s
                .meta
                .title
                .clone()
                .or_else(|| s.meta.imdb_id.clone())
                .unwrap_or_else(|| "<unknown show>".to_string()),
            MediaItem::Season(s) => format!(
                "{} S{:02}",
                s.show.title.as_deref().unwrap_or("<unknown show>"),
                s.number
            ),
            MediaItem::Episode(e) => format!(
                "{} S{:02}E{:02}",
                e.show.title.as_deref().unwrap_or("<unknown show>"),
                e.season_number,
                e.number
            ),
        }
    }

    /// Refresh the cached `last_state` column value for the whole tree.
    pub fn store_state(&mut self) {
        let state = self.state();
        match self {
            MediaItem::Show(show) => {
                for season in &mut show.seasons {
                    for episode in &mut season.episodes {
                        episode.meta.last_state = episode.meta.leaf_state();
                    }
                    season.meta.last_state = season.aggregate_state();
                }
            }
            MediaItem::Season(season) => {
                for episode in &mut season.episodes {
                    episode.meta.last_state = episode.meta.leaf_state();
                }
            }
            _ => {}
        }
        self.meta_mut().last_state = state;
    }

    pub fn episodes(&self) -> Vec<&Episode> {
        match self {
            MediaItem::Show(show) => show
                .seasons
                .iter()
                .flat_map(|s| s.episodes.iter())
                .collect(),
            MediaItem::Season(season) => season.episodes.iter().collect(),
            MediaItem::Episode(episode) => vec![episode],
            MediaItem::Movie(_) => Vec::new(),
        }
    }

    pub fn episodes_mut(&mut self) -> Vec<&mut Episode> {
        match self {
            MediaItem::Show(show) => show
                .seasons
                .iter_mut()
                .flat_map(|s| s.episodes.iter_mut())
                .collect(),
            MediaItem::Season(season) => season.episodes.iter_mut().collect(),
            MediaItem::Episode(episode) => vec![episode],
            MediaItem::Movie(_) => Vec::new(),
        }
    }

    /// Direct children as standalone items, used when the transition
    /// function drills into a compound item.
    pub fn children(&self) -> Vec<MediaItem> {
        match self {
            MediaItem::Show(show) => show
                .seasons
                .iter()
                .cloned()
                .map(MediaItem::Season)
                .collect(),
            MediaItem::Season(season) => season
                .episodes
                .iter()
                .cloned()
                .map(MediaItem::Episode)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Merge the freshly indexed `incoming` copy into self. Children are
    /// filled in (never overwritten), absent metadata is copied and the
    /// index timestamp adopted.
    pub fn merge_indexed(&mut self, incoming: &MediaItem) {
        match (&mut *self, incoming) {
            (MediaItem::Show(existing), MediaItem::Show(new)) => {
                existing.fill_in_missing_children(new);
                existing.meta.copy_absent_attrs(&new.meta);
                existing.refresh_refs();
            }
            (MediaItem::Season(existing), MediaItem::Season(new)) => {
                existing.fill_in_missing_children(new);
                existing.meta.copy_absent_attrs(&new.meta);
            }
            _ => {
                let incoming_meta = incoming.meta().clone();
                self.meta_mut().copy_absent_attrs(&incoming_meta);
            }
        }
        self.meta_mut().indexed_at = incoming.meta().indexed_at;
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;

    fn released() -> Option<OffsetDateTime> {
        Some(OffsetDateTime::now_utc() - Duration::days(30))
    }

    fn episode(number: i64) -> Episode {
        Episode {
            meta: ItemMeta {
                imdb_id: Some("tt0000001".into()),
                requested_by: Some("test".into()),
                title: Some(format!("Episode {number}")),
                aired_at: released(),
                ..Default::default()
            },
            number,
            season_number: 1,
            show: ShowRef {
                title: Some("Foo".into()),
                year: Some(2020),
                season_count: 1,
                ..Default::default()
            },
        }
    }

    fn season_with(episodes: Vec<Episode>) -> Season {
        Season {
            meta: ItemMeta {
                imdb_id: Some("tt0000001".into()),
                aired_at: released(),
                ..Default::default()
            },
            number: 1,
            episodes,
            show: ShowRef {
                title: Some("Foo".into()),
                season_count: 1,
                ..Default::default()
            },
        }
    }

    fn complete(e: &mut Episode) {
        e.meta.key = Some("1234".into());
    }

    #[test]
    fn leaf_state_ladder() {
        let mut meta = ItemMeta::default();
        assert_eq!(meta.leaf_state(), State::Unknown);

        meta.imdb_id = Some("tt0133093".into());
        meta.requested_by = Some("overseerr".into());
        assert_eq!(meta.leaf_state(), State::Requested);

        meta.title = Some("The Matrix".into());
        meta.aired_at = released();
        assert_eq!(meta.leaf_state(), State::Indexed);

        meta.streams.insert(
            "a".repeat(40),
            Stream {
                raw_title: "The.Matrix.1999.1080p".into(),
                rank: 10,
                fetch_ok: true,
            },
        );
        assert_eq!(meta.leaf_state(), State::Scraped);

        meta.file = Some("The.Matrix.1999.mkv".into());
        meta.folder = Some("The.Matrix.1999".into());
        assert_eq!(meta.leaf_state(), State::Downloaded);

        meta.symlinked = true;
        assert_eq!(meta.leaf_state(), State::Symlinked);

        meta.update_folder = Some("updated".into());
        assert_eq!(meta.leaf_state(), State::Completed);
    }

    #[test]
    fn unreleased_before_airing() {
        let meta = ItemMeta {
            title: Some("Future".into()),
            aired_at: Some(OffsetDateTime::now_utc() + Duration::days(7)),
            ..Default::default()
        };
        assert_eq!(meta.leaf_state(), State::Unreleased);
    }

    #[test]
    fn season_completed_iff_all_episodes_completed() {
        let mut eps = vec![episode(1), episode(2)];
        complete(&mut eps[0]);
        let season = season_with(eps.clone());
        assert_ne!(MediaItem::Season(season).state(), State::Completed);

        complete(&mut eps[1]);
        let season = season_with(eps);
        assert_eq!(MediaItem::Season(season).state(), State::Completed);
    }

    #[test]
    fn season_partially_completed() {
        let mut eps = vec![episode(1), episode(2), episode(3)];
        complete(&mut eps[0]);
        eps[1].meta.streams.clear();
        let season = season_with(eps);
        assert_eq!(
            MediaItem::Season(season).state(),
            State::PartiallyCompleted
        );
    }

    #[test]
    fn season_downloaded_when_all_have_files() {
        let eps = vec![episode(1), episode(2)]
            .into_iter()
            .map(|mut e| {
                e.meta.file = Some(format!("e{:02}.mkv", e.number));
                e.meta.folder = Some("pack".into());
                e
            })
            .collect();
        let season = season_with(eps);
        assert_eq!(MediaItem::Season(season).state(), State::Downloaded);
    }

    #[test]
    fn show_aggregates_over_seasons() {
        let mut s1 = season_with(vec![episode(1)]);
        complete(&mut s1.episodes[0]);
        let s2 = season_with(vec![episode(1)]);
        let show = Show {
            meta: ItemMeta {
                title: Some("Foo".into()),
                aired_at: released(),
                ..Default::default()
            },
            seasons: vec![s1, s2],
        };
        assert_eq!(MediaItem::Show(show).state(), State::PartiallyCompleted);
    }

    #[test]
    fn fill_in_missing_children_keeps_existing() {
        let mut existing = season_with(vec![episode(1)]);
        existing.episodes[0].meta.file = Some("kept.mkv".into());
        let incoming = season_with(vec![episode(1), episode(2)]);
        existing.fill_in_missing_children(&incoming);
        assert_eq!(existing.episodes.len(), 2);
        assert_eq!(existing.episodes[0].meta.file.as_deref(), Some("kept.mkv"));
    }

    #[test]
    fn copy_absent_attrs_never_overwrites() {
        let mut target = ItemMeta {
            title: Some("Original".into()),
            ..Default::default()
        };
        let source = ItemMeta {
            title: Some("Other".into()),
            year: Some(1999),
            ..Default::default()
        };
        target.copy_absent_attrs(&source);
        assert_eq!(target.title.as_deref(), Some("Original"));
        assert_eq!(target.year, Some(1999));
    }

    #[test]
    fn state_is_pure_over_attributes() {
        let a = episode(4);
        let b = a.clone();
        assert_eq!(
            MediaItem::Episode(a).state(),
            MediaItem::Episode(b).state()
        );
    }
}
