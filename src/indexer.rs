use std::time::Duration;

use reqwest::{
    header::{HeaderMap, HeaderValue},
    Url,
};
use serde::Deserialize;
use time::{format_description::well_known::Rfc3339, Date, OffsetDateTime, Time};

use crate::{
    app_state::AppError,
    config::{TraktClientId, CONFIG},
    item::{Episode, ItemMeta, MediaItem, Movie, Season, Show, ShowRef},
    request_client::ProviderClient,
};

const TRAKT_URL: &str = "https://api.trakt.tv";
const REFRESH_INTERVAL: time::Duration = time::Duration::hours(24);

/// Metadata refreshes are only worth it once a day.
pub fn should_submit(item: &MediaItem) -> bool {
    match item.meta().indexed_at {
        None => true,
        Some(indexed_at) => OffsetDateTime::now_utc() - indexed_at > REFRESH_INTERVAL,
    }
}

/// Fills titles, airing dates and the season/episode tree from Trakt.
#[derive(Debug)]
pub struct TraktIndexer {
    client: ProviderClient,
    initialized: bool,
}

impl TraktIndexer {
    pub fn new() -> Self {
        let client_id = CONFIG.get_value::<TraktClientId>().0;
        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        headers.insert("trakt-api-version", HeaderValue::from_static("2"));
        if let Some(id) = &client_id {
            if let Ok(value) = HeaderValue::from_str(id) {
                headers.insert("trakt-api-key", value);
            }
        }
        if client_id.is_none() {
            tracing::warn!("Trakt client id is not set, indexing is disabled");
        }
        Self {
            client: ProviderClient::with_default_headers(
                "trakt",
                2,
                Duration::from_secs(1),
                Duration::from_secs(30),
                headers,
            ),
            initialized: client_id.is_some(),
        }
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    /// Resolve the imdb id and produce a fully indexed copy. Seasons index
    /// through their whole show.
    pub async fn run(&self, item: MediaItem) -> Result<Vec<MediaItem>, AppError> {
        let Some(imdb_id) = item.imdb_id().map(str::to_string) else {
            tracing::warn!("Cannot index item without imdb id: {}", item.log_string());
            return Ok(vec![]);
        };
        let lookups = self.search_imdb(&imdb_id).await?;
        let Some(lookup) = lookups.into_iter().next() else {
            tracing::warn!("Trakt does not know {imdb_id}");
            return Ok(vec![]);
        };

        let mut indexed = match lookup {
            TraktLookup::Movie(movie) => self.build_movie(&imdb_id, movie),
            TraktLookup::Show(show) => {
                let slug = show
                    .ids
                    .slug
                    .clone()
                    .unwrap_or_else(|| imdb_id.clone());
                let seasons = self.fetch_seasons(&slug).await?;
                build_show(&imdb_id, show, seasons)
            }
        };

        {
            let meta = indexed.meta_mut();
            meta.requested_at = item.meta().requested_at;
            meta.requested_by = item.meta().requested_by.clone();
            meta.indexed_at = Some(OffsetDateTime::now_utc());
        }
        if let MediaItem::Show(show) = &mut indexed {
            show.propagate_attributes_to_children();
        }
        tracing::info!(
            "Indexed {} as {}: {}",
            imdb_id,
            indexed.kind(),
            indexed.log_string()
        );
        Ok(vec![indexed])
    }

    async fn search_imdb(&self, imdb_id: &str) -> Result<Vec<TraktLookup>, AppError> {
        let url = Url::parse(&format!(
            "{TRAKT_URL}/search/imdb/{imdb_id}?type=movie,show&extended=full"
        ))
        .map_err(|e| AppError::internal_error(format!("bad trakt url: {e}")))?;
        let results: Vec<TraktSearchResult> = self.client.get_json(url).await?;
        Ok(results
            .into_iter()
            .filter_map(|result| match result.kind.as_str() {
                "movie" => result.movie.map(TraktLookup::Movie),
                "show" => result.show.map(TraktLookup::Show),
                _ => None,
            })
            .collect())
    }

    async fn fetch_seasons(&self, slug: &str) -> Result<Vec<TraktSeason>, AppError> {
        let url = Url::parse(&format!(
            "{TRAKT_URL}/shows/{slug}/seasons?extended=episodes,full"
        ))
        .map_err(|e| AppError::internal_error(format!("bad trakt url: {e}")))?;
        self.client.get_json(url).await
    }

    fn build_movie(&self, imdb_id: &str, movie: TraktMovie) -> MediaItem {
        let mut meta = ItemMeta::default();
        meta.imdb_id = Some(imdb_id.to_string());
        meta.tmdb_id = movie.ids.tmdb.map(|id| id.to_string());
        meta.tvdb_id = movie.ids.tvdb.map(|id| id.to_string());
        meta.title = movie.title;
        meta.year = movie.year;
        meta.aired_at = movie.released.as_deref().and_then(parse_date);
        meta.genres = movie.genres;
        meta.language = movie.language;
        meta.country = movie.country;
        meta.is_anime = is_anime(&meta.genres, meta.country.as_deref());
        MediaItem::Movie(Movie { meta })
    }
}

impl Default for TraktIndexer {
    fn default() -> Self {
        Self::new()
    }
}

fn build_show(imdb_id: &str, show: TraktShow, seasons: Vec<TraktSeason>) -> MediaItem {
    let mut meta = ItemMeta::default();
    meta.imdb_id = Some(imdb_id.to_string());
    meta.tmdb_id = show.ids.tmdb.map(|id| id.to_string());
    meta.tvdb_id = show.ids.tvdb.map(|id| id.to_string());
    meta.title = show.title;
    meta.year = show.year;
    meta.aired_at = show.first_aired.as_deref().and_then(parse_instant);
    meta.genres = show.genres;
    meta.language = show.language;
    meta.country = show.country;
    meta.network = show.network;
    meta.is_anime = is_anime(&meta.genres, meta.country.as_deref());

    let mut out = Show {
        meta,
        seasons: Vec::new(),
    };
    for season in seasons {
        // specials do not take part in the lifecycle
        if season.number == 0 {
            continue;
        }
        let episodes = season
            .episodes
            .into_iter()
            .map(|episode| Episode {
                meta: {
                    let mut meta = ItemMeta::default();
                    meta.imdb_id = Some(imdb_id.to_string());
                    meta.title = episode.title;
                    meta.aired_at = episode.first_aired.as_deref().and_then(parse_instant);
                    meta
                },
                number: episode.number,
                season_number: season.number,
                show: ShowRef::default(),
            })
            .collect();
        out.seasons.push(Season {
            meta: {
                let mut meta = ItemMeta::default();
                meta.imdb_id = Some(imdb_id.to_string());
                meta.aired_at = season.first_aired.as_deref().and_then(parse_instant);
                meta
            },
            number: season.number,
            episodes,
            show: ShowRef::default(),
        });
    }
    out.seasons.sort_by_key(|season| season.number);
    out.refresh_refs();
    MediaItem::Show(out)
}

fn parse_instant(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).ok()
}

fn parse_date(raw: &str) -> Option<OffsetDateTime> {
    let format = time::macros::format_description!("[year]-[month]-[day]");
    Date::parse(raw, &format)
        .ok()
        .map(|date| date.with_time(Time::MIDNIGHT).assume_utc())
}

fn is_anime(genres: &[String], country: Option<&str>) -> bool {
    let animated = genres
        .iter()
        .any(|genre| genre.eq_ignore_ascii_case("anime") || genre.eq_ignore_ascii_case("animation"));
    let eastern = matches!(country, Some("jp") | Some("kr") | Some("cn"));
    genres.iter().any(|genre| genre.eq_ignore_ascii_case("anime")) || (animated && eastern)
}

#[derive(Debug)]
enum TraktLookup {
    Movie(TraktMovie),
    Show(TraktShow),
}

#[derive(Debug, Deserialize)]
struct TraktSearchResult {
    #[serde(rename = "type")]
    kind: String,
    movie: Option<TraktMovie>,
    show: Option<TraktShow>,
}

#[derive(Debug, Default, Deserialize)]
struct TraktIds {
    slug: Option<String>,
    tmdb: Option<i64>,
    tvdb: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TraktMovie {
    title: Option<String>,
    year: Option<i32>,
    released: Option<String>,
    #[serde(default)]
    genres: Vec<String>,
    language: Option<String>,
    country: Option<String>,
    #[serde(default)]
    ids: TraktIds,
}

#[derive(Debug, Deserialize)]
struct TraktShow {
    title: Option<String>,
    year: Option<i32>,
    first_aired: Option<String>,
    #[serde(default)]
    genres: Vec<String>,
    language: Option<String>,
    country: Option<String>,
    network: Option<String>,
    #[serde(default)]
    ids: TraktIds,
}

#[derive(Debug, Deserialize)]
struct TraktSeason {
    number: i64,
    first_aired: Option<String>,
    #[serde(default)]
    episodes: Vec<TraktEpisode>,
}

#[derive(Debug, Deserialize)]
struct TraktEpisode {
    number: i64,
    title: Option<String>,
    first_aired: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_tree_is_built_with_context() {
        let show = TraktShow {
            title: Some("Foo".into()),
            year: Some(2020),
            first_aired: Some("2020-01-05T02:00:00.000Z".into()),
            genres: vec!["drama".into()],
            language: Some("en".into()),
            country: Some("us".into()),
            network: Some("HBO".into()),
            ids: TraktIds::default(),
        };
        let seasons = vec![
            TraktSeason {
                number: 0,
                first_aired: None,
                episodes: vec![TraktEpisode {
                    number: 1,
                    title: Some("Special".into()),
                    first_aired: None,
                }],
            },
            TraktSeason {
                number: 1,
                first_aired: Some("2020-01-05T02:00:00.000Z".into()),
                episodes: vec![
                    TraktEpisode {
                        number: 1,
                        title: Some("Pilot".into()),
                        first_aired: Some("2020-01-05T02:00:00.000Z".into()),
                    },
                    TraktEpisode {
                        number: 2,
                        title: Some("Second".into()),
                        first_aired: Some("2020-01-12T02:00:00.000Z".into()),
                    },
                ],
            },
        ];
        let item = build_show("tt0000001", show, seasons);
        let MediaItem::Show(show) = item else { panic!() };
        // specials were dropped
        assert_eq!(show.seasons.len(), 1);
        assert_eq!(show.seasons[0].episodes.len(), 2);
        assert_eq!(show.seasons[0].show.title.as_deref(), Some("Foo"));
        assert_eq!(show.seasons[0].episodes[1].season_number, 1);
        assert!(show.seasons[0].episodes[0].meta.aired_at.is_some());
    }

    #[test]
    fn release_dates_parse() {
        assert!(parse_date("1999-03-30").is_some());
        assert!(parse_instant("2020-01-05T02:00:00.000Z").is_some());
        assert!(parse_date("not a date").is_none());
    }

    #[test]
    fn anime_detection_needs_eastern_animation() {
        assert!(is_anime(&["Anime".to_string()], None));
        assert!(is_anime(&["animation".to_string()], Some("jp")));
        assert!(!is_anime(&["animation".to_string()], Some("us")));
        assert!(!is_anime(&["drama".to_string()], Some("jp")));
    }
}
