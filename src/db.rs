use std::{collections::HashMap, path::Path, str::FromStr};

use anyhow::Context;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Row, SqlitePool,
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::item::{
    ActiveStream, Episode, ItemMeta, MediaItem, MediaKind, Movie, Season, Show, ShowRef, State,
    Stream,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    parent_id INTEGER REFERENCES items (id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    number INTEGER,
    imdb_id TEXT,
    tmdb_id TEXT,
    tvdb_id TEXT,
    title TEXT,
    year INTEGER,
    aired_at TEXT,
    genres TEXT NOT NULL DEFAULT '[]',
    language TEXT,
    country TEXT,
    network TEXT,
    is_anime INTEGER NOT NULL DEFAULT 0,
    requested_at TEXT,
    requested_by TEXT,
    indexed_at TEXT,
    scraped_at TEXT,
    scraped_times INTEGER NOT NULL DEFAULT 0,
    symlinked INTEGER NOT NULL DEFAULT 0,
    symlinked_at TEXT,
    symlinked_times INTEGER NOT NULL DEFAULT 0,
    streams TEXT NOT NULL DEFAULT '{}',
    active_stream TEXT,
    file TEXT,
    folder TEXT,
    alternative_folder TEXT,
    key TEXT,
    guid TEXT,
    update_folder TEXT,
    postprocessed INTEGER NOT NULL DEFAULT 0,
    last_state TEXT NOT NULL DEFAULT 'Unknown',
    UNIQUE (parent_id, kind, number)
);
CREATE INDEX IF NOT EXISTS idx_items_imdb ON items (imdb_id);
CREATE INDEX IF NOT EXISTS idx_items_state ON items (last_state);
CREATE INDEX IF NOT EXISTS idx_items_parent ON items (parent_id);
"#;

#[derive(Debug, Clone)]
pub struct Db {
    pub pool: SqlitePool,
}

/// Per-state item counts for the stats endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub total: i64,
    pub movies: i64,
    pub shows: i64,
    pub seasons: i64,
    pub episodes: i64,
    pub states: HashMap<String, i64>,
}

impl Db {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory store, used by tests.
    pub async fn connect_memory() -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn is_empty(&self) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
            .fetch_one(&self.pool)
            .await?;
        Ok(count == 0)
    }

    /// Load the item with this row id, with its subtree and show context.
    pub async fn get_by_id(&self, id: i64) -> anyhow::Result<Option<MediaItem>> {
        let Some(row) = self.fetch_row(id).await? else {
            return Ok(None);
        };
        let root = self.fetch_root(&row).await?;
        let tree = self.assemble_tree(root).await?;
        Ok(extract_node(&tree, id))
    }

    /// Top level movie or show by imdb id.
    pub async fn get_by_imdb(&self, imdb_id: &str) -> anyhow::Result<Option<MediaItem>> {
        let row = sqlx::query(
            "SELECT * FROM items WHERE imdb_id = ? AND kind IN ('movie', 'show') LIMIT 1",
        )
        .bind(imdb_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => {
                let id: i64 = row.get("id");
                let tree = self.assemble_tree(row).await?;
                Ok(extract_node(&tree, id))
            }
            None => Ok(None),
        }
    }

    /// Insert the item, recursively reconciling children against the stored
    /// copy. Nodes loaded from the store (carrying row ids) are written back
    /// in full; id-less nodes only fill gaps and never overwrite stored
    /// children. Returns the root row id.
    pub async fn upsert(&self, item: &mut MediaItem) -> anyhow::Result<i64> {
        let mut tx = self.pool.begin().await?;
        let id = match item {
            MediaItem::Movie(movie) => {
                let id = upsert_leaf(&mut tx, &mut movie.meta, MediaKind::Movie, None, None).await?;
                movie.meta.id = Some(id);
                id
            }
            MediaItem::Show(show) => upsert_show(&mut tx, show).await?,
            MediaItem::Season(season) => {
                let parent_id = resolve_parent_for_season(&mut tx, season).await?;
                upsert_season(&mut tx, season, parent_id).await?
            }
            MediaItem::Episode(episode) => {
                let parent_id = resolve_parent_for_episode(&mut tx, episode).await?;
                upsert_episode(&mut tx, episode, parent_id).await?
            }
        };
        tx.commit().await?;
        Ok(id)
    }

    /// Remove the item and every descendant.
    pub async fn remove(&self, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM items WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Write the derived `last_state` for every node of the item's tree.
    pub async fn save_last_state(&self, item: &MediaItem) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        let mut nodes: Vec<(Option<i64>, State)> = vec![(item.id(), item.state())];
        match item {
            MediaItem::Show(show) => {
                for season in &show.seasons {
                    nodes.push((
                        season.meta.id,
                        MediaItem::Season(season.clone()).state(),
                    ));
                    for episode in &season.episodes {
                        nodes.push((episode.meta.id, episode.meta.last_state));
                    }
                }
            }
            MediaItem::Season(season) => {
                for episode in &season.episodes {
                    nodes.push((episode.meta.id, episode.meta.last_state));
                }
            }
            _ => {}
        }
        for (id, state) in nodes {
            let Some(id) = id else { continue };
            sqlx::query("UPDATE items SET last_state = ? WHERE id = ?")
                .bind(state.as_str())
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Ids the bus admission check treats as one unit: the item itself plus
    /// all ancestors and descendants.
    pub async fn related_ids(&self, id: i64) -> anyhow::Result<Vec<i64>> {
        let mut ids = vec![id];
        // ancestors, tree depth is at most three
        let mut cursor = id;
        while let Some(parent) = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT parent_id FROM items WHERE id = ?",
        )
        .bind(cursor)
        .fetch_optional(&self.pool)
        .await?
        .flatten()
        {
            ids.push(parent);
            cursor = parent;
        }
        // descendants
        let mut frontier = vec![id];
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for node in frontier {
                let children: Vec<i64> =
                    sqlx::query_scalar("SELECT id FROM items WHERE parent_id = ?")
                        .bind(node)
                        .fetch_all(&self.pool)
                        .await?;
                next.extend(children);
            }
            ids.extend(next.iter().copied());
            frontier = next;
        }
        Ok(ids)
    }

    pub async fn count_retryable(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM items
             WHERE last_state NOT IN ('Completed', 'Unreleased')
             AND kind IN ('movie', 'show')",
        )
        .fetch_one(&self.pool)
        .await
    }

    /// Batched ids for the retry sweep, newest requests first.
    pub async fn retryable_ids(&self, limit: i64, offset: i64) -> Result<Vec<i64>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT id FROM items
             WHERE last_state NOT IN ('Completed', 'Unreleased')
             AND kind IN ('movie', 'show')
             ORDER BY requested_at DESC
             LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    /// Top level item ids filtered by cached state, for the admin API.
    pub async fn top_level_ids(
        &self,
        state: Option<State>,
        kind: Option<MediaKind>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<i64>, sqlx::Error> {
        let mut sql = String::from("SELECT id FROM items WHERE kind IN ('movie', 'show')");
        if state.is_some() {
            sql.push_str(" AND last_state = ?");
        }
        if kind.is_some() {
            sql.push_str(" AND kind = ?");
        }
        sql.push_str(" ORDER BY requested_at DESC LIMIT ? OFFSET ?");
        let mut query = sqlx::query_scalar(&sql);
        if let Some(state) = state {
            query = query.bind(state.as_str());
        }
        if let Some(kind) = kind {
            query = query.bind(kind.as_str());
        }
        query
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
    }

    pub async fn stats(&self) -> Result<StoreStats, sqlx::Error> {
        let count_kind = |kind: &'static str| {
            let pool = self.pool.clone();
            async move {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM items WHERE kind = ?")
                    .bind(kind)
                    .fetch_one(&pool)
                    .await
            }
        };
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
            .fetch_one(&self.pool)
            .await?;
        let rows = sqlx::query("SELECT last_state, COUNT(*) as count FROM items GROUP BY last_state")
            .fetch_all(&self.pool)
            .await?;
        let mut states = HashMap::new();
        for row in rows {
            states.insert(row.get::<String, _>("last_state"), row.get::<i64, _>("count"));
        }
        Ok(StoreStats {
            total,
            movies: count_kind("movie").await?,
            shows: count_kind("show").await?,
            seasons: count_kind("season").await?,
            episodes: count_kind("episode").await?,
            states,
        })
    }

    pub async fn vacuum_analyze(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql("VACUUM; ANALYZE;").execute(&self.pool).await?;
        Ok(())
    }

    async fn fetch_row(&self, id: i64) -> Result<Option<SqliteRow>, sqlx::Error> {
        sqlx::query("SELECT * FROM items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn fetch_root(&self, row: &SqliteRow) -> anyhow::Result<SqliteRow> {
        let mut current = row.get::<i64, _>("id");
        let mut parent: Option<i64> = row.get("parent_id");
        while let Some(parent_id) = parent {
            current = parent_id;
            parent = sqlx::query_scalar("SELECT parent_id FROM items WHERE id = ?")
                .bind(parent_id)
                .fetch_one(&self.pool)
                .await?;
        }
        self.fetch_row(current)
            .await?
            .context("tree root disappeared while loading")
    }

    async fn assemble_tree(&self, root: SqliteRow) -> anyhow::Result<MediaItem> {
        let kind: String = root.get("kind");
        let kind = MediaKind::from_str(&kind)?;
        let root_id: i64 = root.get("id");
        let meta = row_to_meta(&root)?;
        match kind {
            MediaKind::Movie => Ok(MediaItem::Movie(Movie { meta })),
            MediaKind::Show => {
                let mut show = Show {
                    meta,
                    seasons: Vec::new(),
                };
                let season_rows = sqlx::query(
                    "SELECT * FROM items WHERE parent_id = ? ORDER BY number",
                )
                .bind(root_id)
                .fetch_all(&self.pool)
                .await?;
                for season_row in season_rows {
                    let season_id: i64 = season_row.get("id");
                    let mut season = Season {
                        meta: row_to_meta(&season_row)?,
                        number: season_row.get::<Option<i64>, _>("number").unwrap_or(0),
                        episodes: Vec::new(),
                        show: Default::default(),
                    };
                    let episode_rows = sqlx::query(
                        "SELECT * FROM items WHERE parent_id = ? ORDER BY number",
                    )
                    .bind(season_id)
                    .fetch_all(&self.pool)
                    .await?;
                    for episode_row in episode_rows {
                        season.episodes.push(Episode {
                            meta: row_to_meta(&episode_row)?,
                            number: episode_row.get::<Option<i64>, _>("number").unwrap_or(0),
                            season_number: season.number,
                            show: Default::default(),
                        });
                    }
                    show.seasons.push(season);
                }
                show.refresh_refs();
                Ok(MediaItem::Show(show))
            }
            rest => anyhow::bail!("{rest} row {root_id} has no parent"),
        }
    }
}

/// Pull the requested node out of an assembled tree.
fn extract_node(tree: &MediaItem, id: i64) -> Option<MediaItem> {
    if tree.id() == Some(id) {
        return Some(tree.clone());
    }
    let MediaItem::Show(show) = tree else {
        return None;
    };
    for season in &show.seasons {
        if season.meta.id == Some(id) {
            return Some(MediaItem::Season(season.clone()));
        }
        for episode in &season.episodes {
            if episode.meta.id == Some(id) {
                return Some(MediaItem::Episode(episode.clone()));
            }
        }
    }
    None
}

async fn upsert_show(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    show: &mut Show,
) -> anyhow::Result<i64> {
    let show_id = upsert_leaf(tx, &mut show.meta, MediaKind::Show, None, None).await?;
    show.meta.id = Some(show_id);
    for season in &mut show.seasons {
        upsert_season_inner(tx, season, show_id).await?;
    }
    show.refresh_refs();
    Ok(show_id)
}

async fn upsert_season(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    season: &mut Season,
    parent_id: i64,
) -> anyhow::Result<i64> {
    upsert_season_inner(tx, season, parent_id).await
}

async fn upsert_season_inner(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    season: &mut Season,
    show_id: i64,
) -> anyhow::Result<i64> {
    let season_id = upsert_leaf(
        tx,
        &mut season.meta,
        MediaKind::Season,
        Some(show_id),
        Some(season.number),
    )
    .await?;
    season.meta.id = Some(season_id);
    season.meta.parent_id = Some(show_id);
    for episode in &mut season.episodes {
        upsert_episode(tx, episode, season_id).await?;
    }
    Ok(season_id)
}

async fn upsert_episode(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    episode: &mut Episode,
    season_id: i64,
) -> anyhow::Result<i64> {
    let episode_id = upsert_leaf(
        tx,
        &mut episode.meta,
        MediaKind::Episode,
        Some(season_id),
        Some(episode.number),
    )
    .await?;
    episode.meta.id = Some(episode_id);
    episode.meta.parent_id = Some(season_id);
    Ok(episode_id)
}

/// Orphan seasons cannot be written; resolve the owning show or fail hard.
async fn resolve_parent_for_season(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    season: &Season,
) -> anyhow::Result<i64> {
    if let Some(parent_id) = season.meta.parent_id.or(season.show.id) {
        return Ok(parent_id);
    }
    if let Some(imdb) = &season.show.imdb_id {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT id FROM items WHERE imdb_id = ? AND kind = 'show'")
                .bind(imdb)
                .fetch_optional(&mut **tx)
                .await?;
        if let Some(id) = found {
            return Ok(id);
        }
    }
    anyhow::bail!("refusing to upsert orphan season {}", season.number)
}

async fn resolve_parent_for_episode(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    episode: &Episode,
) -> anyhow::Result<i64> {
    if let Some(parent_id) = episode.meta.parent_id {
        return Ok(parent_id);
    }
    if let Some(imdb) = &episode.show.imdb_id {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT s.id FROM items s
             JOIN items show ON s.parent_id = show.id
             WHERE show.imdb_id = ? AND s.kind = 'season' AND s.number = ?",
        )
        .bind(imdb)
        .bind(episode.season_number)
        .fetch_optional(&mut **tx)
        .await?;
        if let Some(id) = found {
            return Ok(id);
        }
    }
    anyhow::bail!("refusing to upsert orphan episode {}", episode.number)
}

/// Write a single node. With a known row id the node is written in full;
/// otherwise an existing row claims the node and only absent metadata is
/// filled in, and a missing row is inserted.
async fn upsert_leaf(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    meta: &mut ItemMeta,
    kind: MediaKind,
    parent_id: Option<i64>,
    number: Option<i64>,
) -> anyhow::Result<i64> {
    let existing_id = match meta.id {
        Some(id) => Some(id),
        None => find_existing(tx, meta, kind, parent_id, number).await?,
    };
    match existing_id {
        Some(id) if meta.id.is_some() => {
            update_row(tx, id, meta, parent_id).await?;
            Ok(id)
        }
        Some(id) => {
            // A stored copy exists for an id-less incoming node: keep the
            // stored attributes, fill in only what is missing.
            let row = sqlx::query("SELECT * FROM items WHERE id = ?")
                .bind(id)
                .fetch_one(&mut **tx)
                .await?;
            let mut stored = row_to_meta(&row)?;
            stored.copy_absent_attrs(meta);
            update_row(tx, id, &stored, parent_id).await?;
            *meta = stored;
            meta.id = Some(id);
            Ok(id)
        }
        None => {
            let id = insert_row(tx, meta, kind, parent_id, number).await?;
            meta.id = Some(id);
            meta.parent_id = parent_id;
            Ok(id)
        }
    }
}

async fn find_existing(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    meta: &ItemMeta,
    kind: MediaKind,
    parent_id: Option<i64>,
    number: Option<i64>,
) -> Result<Option<i64>, sqlx::Error> {
    match (parent_id, number) {
        (Some(parent_id), Some(number)) => {
            sqlx::query_scalar(
                "SELECT id FROM items WHERE parent_id = ? AND kind = ? AND number = ?",
            )
            .bind(parent_id)
            .bind(kind.as_str())
            .bind(number)
            .fetch_optional(&mut **tx)
            .await
        }
        _ => match &meta.imdb_id {
            Some(imdb) => {
                sqlx::query_scalar("SELECT id FROM items WHERE imdb_id = ? AND kind = ?")
                    .bind(imdb)
                    .bind(kind.as_str())
                    .fetch_optional(&mut **tx)
                    .await
            }
            None => Ok(None),
        },
    }
}

async fn insert_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    meta: &ItemMeta,
    kind: MediaKind,
    parent_id: Option<i64>,
    number: Option<i64>,
) -> Result<i64, sqlx::Error> {
    let id = sqlx::query_scalar(
        "INSERT INTO items
         (parent_id, kind, number, imdb_id, tmdb_id, tvdb_id, title, year, aired_at,
          genres, language, country, network, is_anime, requested_at, requested_by,
          indexed_at, scraped_at, scraped_times, symlinked, symlinked_at, symlinked_times,
          streams, active_stream, file, folder, alternative_folder, key, guid,
          update_folder, postprocessed, last_state)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         RETURNING id",
    )
    .bind(parent_id)
    .bind(kind.as_str())
    .bind(number)
    .bind(&meta.imdb_id)
    .bind(&meta.tmdb_id)
    .bind(&meta.tvdb_id)
    .bind(&meta.title)
    .bind(meta.year)
    .bind(fmt_ts(meta.aired_at))
    .bind(serde_json::to_string(&meta.genres).unwrap_or_else(|_| "[]".into()))
    .bind(&meta.language)
    .bind(&meta.country)
    .bind(&meta.network)
    .bind(meta.is_anime)
    .bind(fmt_ts(meta.requested_at))
    .bind(&meta.requested_by)
    .bind(fmt_ts(meta.indexed_at))
    .bind(fmt_ts(meta.scraped_at))
    .bind(meta.scraped_times as i64)
    .bind(meta.symlinked)
    .bind(fmt_ts(meta.symlinked_at))
    .bind(meta.symlinked_times as i64)
    .bind(serde_json::to_string(&meta.streams).unwrap_or_else(|_| "{}".into()))
    .bind(
        meta.active_stream
            .as_ref()
            .map(|stream| serde_json::to_string(stream).unwrap_or_default()),
    )
    .bind(&meta.file)
    .bind(&meta.folder)
    .bind(&meta.alternative_folder)
    .bind(&meta.key)
    .bind(&meta.guid)
    .bind(&meta.update_folder)
    .bind(meta.postprocessed)
    .bind(meta.last_state.as_str())
    .fetch_one(&mut **tx)
    .await?;
    Ok(id)
}

async fn update_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    id: i64,
    meta: &ItemMeta,
    parent_id: Option<i64>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE items SET
            parent_id = COALESCE(?, parent_id),
            imdb_id = ?, tmdb_id = ?, tvdb_id = ?, title = ?, year = ?, aired_at = ?,
            genres = ?, language = ?, country = ?, network = ?, is_anime = ?,
            requested_at = ?, requested_by = ?, indexed_at = ?, scraped_at = ?,
            scraped_times = ?, symlinked = ?, symlinked_at = ?, symlinked_times = ?,
            streams = ?, active_stream = ?, file = ?, folder = ?, alternative_folder = ?,
            key = ?, guid = ?, update_folder = ?, postprocessed = ?, last_state = ?
         WHERE id = ?",
    )
    .bind(parent_id)
    .bind(&meta.imdb_id)
    .bind(&meta.tmdb_id)
    .bind(&meta.tvdb_id)
    .bind(&meta.title)
    .bind(meta.year)
    .bind(fmt_ts(meta.aired_at))
    .bind(serde_json::to_string(&meta.genres).unwrap_or_else(|_| "[]".into()))
    .bind(&meta.language)
    .bind(&meta.country)
    .bind(&meta.network)
    .bind(meta.is_anime)
    .bind(fmt_ts(meta.requested_at))
    .bind(&meta.requested_by)
    .bind(fmt_ts(meta.indexed_at))
    .bind(fmt_ts(meta.scraped_at))
    .bind(meta.scraped_times as i64)
    .bind(meta.symlinked)
    .bind(fmt_ts(meta.symlinked_at))
    .bind(meta.symlinked_times as i64)
    .bind(serde_json::to_string(&meta.streams).unwrap_or_else(|_| "{}".into()))
    .bind(
        meta.active_stream
            .as_ref()
            .map(|stream| serde_json::to_string(stream).unwrap_or_default()),
    )
    .bind(&meta.file)
    .bind(&meta.folder)
    .bind(&meta.alternative_folder)
    .bind(&meta.key)
    .bind(&meta.guid)
    .bind(&meta.update_folder)
    .bind(meta.postprocessed)
    .bind(meta.last_state.as_str())
    .bind(id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn fmt_ts(ts: Option<OffsetDateTime>) -> Option<String> {
    ts.and_then(|ts| ts.format(&Rfc3339).ok())
}

fn parse_ts(raw: Option<String>) -> Option<OffsetDateTime> {
    raw.and_then(|raw| OffsetDateTime::parse(&raw, &Rfc3339).ok())
}

fn row_to_meta(row: &SqliteRow) -> anyhow::Result<ItemMeta> {
    let streams: String = row.get("streams");
    let streams: std::collections::BTreeMap<String, Stream> =
        serde_json::from_str(&streams).unwrap_or_default();
    let active_stream: Option<String> = row.get("active_stream");
    let active_stream: Option<ActiveStream> =
        active_stream.and_then(|raw| serde_json::from_str(&raw).ok());
    let genres: String = row.get("genres");
    let last_state: String = row.get("last_state");
    Ok(ItemMeta {
        id: Some(row.get("id")),
        parent_id: row.get("parent_id"),
        imdb_id: row.get("imdb_id"),
        tmdb_id: row.get("tmdb_id"),
        tvdb_id: row.get("tvdb_id"),
        title: row.get("title"),
        year: row.get("year"),
        aired_at: parse_ts(row.get("aired_at")),
        genres: serde_json::from_str(&genres).unwrap_or_default(),
        language: row.get("language"),
        country: row.get("country"),
        network: row.get("network"),
        is_anime: row.get("is_anime"),
        requested_at: parse_ts(row.get("requested_at")),
        requested_by: row.get("requested_by"),
        indexed_at: parse_ts(row.get("indexed_at")),
        scraped_at: parse_ts(row.get("scraped_at")),
        scraped_times: row.get::<i64, _>("scraped_times") as u32,
        symlinked: row.get("symlinked"),
        symlinked_at: parse_ts(row.get("symlinked_at")),
        symlinked_times: row.get::<i64, _>("symlinked_times") as u32,
        streams,
        active_stream,
        file: row.get("file"),
        folder: row.get("folder"),
        alternative_folder: row.get("alternative_folder"),
        key: row.get("key"),
        guid: row.get("guid"),
        update_folder: row.get("update_folder"),
        postprocessed: row.get("postprocessed"),
        last_state: State::from_str(&last_state).unwrap_or(State::Unknown),
    })
}

#[cfg(test)]
pub(crate) mod tests_support {
    use crate::item::ShowRef;

    use super::*;

    pub fn movie(imdb: &str, title: &str) -> MediaItem {
        MediaItem::Movie(Movie {
            meta: ItemMeta {
                imdb_id: Some(imdb.to_string()),
                title: Some(title.to_string()),
                requested_by: Some("test".into()),
                ..Default::default()
            },
        })
    }

    pub fn show_tree(imdb: &str, seasons: &[(i64, &[i64])]) -> MediaItem {
        let mut show = Show {
            meta: ItemMeta {
                imdb_id: Some(imdb.to_string()),
                title: Some("Foo".into()),
                requested_by: Some("test".into()),
                ..Default::default()
            },
            seasons: Vec::new(),
        };
        for (season_number, episodes) in seasons {
            let season = Season {
                meta: ItemMeta {
                    imdb_id: Some(imdb.to_string()),
                    ..Default::default()
                },
                number: *season_number,
                episodes: episodes
                    .iter()
                    .map(|number| Episode {
                        meta: ItemMeta {
                            imdb_id: Some(imdb.to_string()),
                            title: Some(format!("Episode {number}")),
                            ..Default::default()
                        },
                        number: *number,
                        season_number: *season_number,
                        show: ShowRef::default(),
                    })
                    .collect(),
                show: ShowRef::default(),
            };
            show.seasons.push(season);
        }
        show.refresh_refs();
        MediaItem::Show(show)
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::{movie, show_tree};
    use super::*;

    #[tokio::test]
    async fn upsert_and_fetch_tree() {
        let db = Db::connect_memory().await.unwrap();
        let mut item = show_tree("tt0000001", &[(1, &[1, 2]), (2, &[1])]);
        let id = db.upsert(&mut item).await.unwrap();

        let loaded = db.get_by_id(id).await.unwrap().unwrap();
        let MediaItem::Show(show) = loaded else {
            panic!("expected show");
        };
        assert_eq!(show.seasons.len(), 2);
        assert_eq!(show.seasons[0].episodes.len(), 2);
        assert_eq!(show.seasons[0].show.title.as_deref(), Some("Foo"));
    }

    #[tokio::test]
    async fn get_by_id_returns_requested_node() {
        let db = Db::connect_memory().await.unwrap();
        let mut item = show_tree("tt0000001", &[(1, &[1, 2])]);
        db.upsert(&mut item).await.unwrap();
        let MediaItem::Show(show) = &item else {
            panic!()
        };
        let episode_id = show.seasons[0].episodes[1].meta.id.unwrap();

        let loaded = db.get_by_id(episode_id).await.unwrap().unwrap();
        let MediaItem::Episode(episode) = loaded else {
            panic!("expected episode");
        };
        assert_eq!(episode.number, 2);
        assert_eq!(episode.season_number, 1);
        assert_eq!(episode.show.season_count, 1);
    }

    #[tokio::test]
    async fn reconcile_fills_missing_children_without_overwriting() {
        let db = Db::connect_memory().await.unwrap();
        let mut stored = show_tree("tt0000001", &[(1, &[1])]);
        {
            let MediaItem::Show(show) = &mut stored else {
                panic!()
            };
            show.seasons[0].episodes[0].meta.file = Some("kept.mkv".into());
            show.seasons[0].episodes[0].meta.folder = Some("kept".into());
        }
        db.upsert(&mut stored).await.unwrap();

        // freshly indexed copy without row ids
        let mut incoming = show_tree("tt0000001", &[(1, &[1, 2])]);
        let root = db.upsert(&mut incoming).await.unwrap();

        let loaded = db.get_by_id(root).await.unwrap().unwrap();
        let MediaItem::Show(show) = loaded else {
            panic!()
        };
        assert_eq!(show.seasons[0].episodes.len(), 2);
        assert_eq!(
            show.seasons[0].episodes[0].meta.file.as_deref(),
            Some("kept.mkv")
        );
    }

    #[tokio::test]
    async fn remove_cascades() {
        let db = Db::connect_memory().await.unwrap();
        let mut item = show_tree("tt0000001", &[(1, &[1, 2])]);
        let id = db.upsert(&mut item).await.unwrap();
        db.remove(id).await.unwrap();
        assert!(db.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn orphan_season_is_rejected() {
        let db = Db::connect_memory().await.unwrap();
        let mut orphan = MediaItem::Season(Season {
            meta: ItemMeta::default(),
            number: 1,
            episodes: Vec::new(),
            show: ShowRef::default(),
        });
        assert!(db.upsert(&mut orphan).await.is_err());
    }

    #[tokio::test]
    async fn related_ids_cover_ancestors_and_descendants() {
        let db = Db::connect_memory().await.unwrap();
        let mut item = show_tree("tt0000001", &[(1, &[1])]);
        let show_id = db.upsert(&mut item).await.unwrap();
        let MediaItem::Show(show) = &item else {
            panic!()
        };
        let season_id = show.seasons[0].meta.id.unwrap();
        let episode_id = show.seasons[0].episodes[0].meta.id.unwrap();

        let related = db.related_ids(season_id).await.unwrap();
        assert!(related.contains(&show_id));
        assert!(related.contains(&season_id));
        assert!(related.contains(&episode_id));
    }

    #[tokio::test]
    async fn retry_sweep_skips_completed_and_unreleased() {
        let db = Db::connect_memory().await.unwrap();
        let mut pending = movie("tt0000010", "Pending");
        pending.meta_mut().requested_at = Some(OffsetDateTime::now_utc());
        pending.store_state();
        db.upsert(&mut pending).await.unwrap();
        db.save_last_state(&pending).await.unwrap();

        let mut done = movie("tt0000011", "Done");
        done.meta_mut().key = Some("plex".into());
        done.store_state();
        db.upsert(&mut done).await.unwrap();
        db.save_last_state(&done).await.unwrap();

        let ids = db.retryable_ids(1000, 0).await.unwrap();
        assert_eq!(ids, vec![pending.id().unwrap()]);
        assert_eq!(db.count_retryable().await.unwrap(), 1);
    }
}
