use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    app_state::{AppError, AppState},
    config::{ConfigFile, CONFIG},
    content::looks_like_imdb_id,
    events::{Emitter, Event, EventSnapshot},
    item::{ItemMeta, MediaItem, Movie, State as ItemState},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/items", get(list_items))
        .route("/items/extended/{id}", get(extended_item))
        .route("/items/add/imdb/{imdb_id}", post(add_item))
        .route("/items/remove", delete(remove_item))
        .route("/states", get(states))
        .route("/services", get(services))
        .route("/stats", get(stats))
        .route("/events", get(events))
        .route("/health", get(health))
        .route("/configuration", get(configuration))
        .route("/configuration", patch(update_configuration))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    state: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    limit: Option<i64>,
    page: Option<i64>,
}

#[derive(Debug, Serialize)]
struct ItemSummary {
    id: i64,
    imdb_id: Option<String>,
    title: Option<String>,
    #[serde(rename = "type")]
    kind: String,
    state: String,
    requested_by: Option<String>,
    scraped_times: u32,
    symlinked_times: u32,
}

impl ItemSummary {
    fn from_item(item: &MediaItem) -> Option<Self> {
        let meta = item.meta();
        Some(Self {
            id: meta.id?,
            imdb_id: meta.imdb_id.clone(),
            title: meta.title.clone(),
            kind: item.kind().to_string(),
            state: item.state().to_string(),
            requested_by: meta.requested_by.clone(),
            scraped_times: meta.scraped_times,
            symlinked_times: meta.symlinked_times,
        })
    }
}

async fn list_items(
    State(app_state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ItemSummary>>, AppError> {
    let state = query
        .state
        .as_deref()
        .map(str::parse::<ItemState>)
        .transpose()
        .map_err(|_| AppError::bad_request("unknown state name"))?;
    let kind = query
        .kind
        .as_deref()
        .map(str::parse)
        .transpose()
        .map_err(|_| AppError::bad_request("unknown item type"))?;
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.page.unwrap_or(0).max(0) * limit;

    let ids = app_state.db.top_level_ids(state, kind, limit, offset).await?;
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(item) = app_state.db.get_by_id(id).await? {
            if let Some(summary) = ItemSummary::from_item(&item) {
                out.push(summary);
            }
        }
    }
    Ok(Json(out))
}

async fn extended_item(
    State(app_state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MediaItem>, AppError> {
    let item = app_state
        .db
        .get_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found("item not found"))?;
    Ok(Json(item))
}

async fn add_item(
    State(app_state): State<AppState>,
    Path(imdb_id): Path<String>,
) -> Result<Json<ItemSummary>, AppError> {
    if !looks_like_imdb_id(&imdb_id) {
        return Err(AppError::bad_request("not an imdb id"));
    }
    if let Some(existing) = app_state.db.get_by_imdb(&imdb_id).await? {
        // re-enqueue instead of duplicating
        if let Some(id) = existing.id() {
            app_state.bus.add_event(Event::new(Emitter::Manual, id)).await;
        }
        return ItemSummary::from_item(&existing)
            .map(Json)
            .ok_or_else(|| AppError::internal_error("stored item has no id"));
    }
    let mut item = MediaItem::Movie(Movie {
        meta: ItemMeta::requested(&imdb_id, "manual"),
    });
    item.store_state();
    let id = app_state.db.upsert(&mut item).await?;
    app_state.bus.add_event(Event::new(Emitter::Manual, id)).await;
    ItemSummary::from_item(&item)
        .map(Json)
        .ok_or_else(|| AppError::internal_error("freshly stored item has no id"))
}

#[derive(Debug, Deserialize)]
struct RemoveQuery {
    id: Option<i64>,
    imdb_id: Option<String>,
}

async fn remove_item(
    State(app_state): State<AppState>,
    Query(query): Query<RemoveQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let item = match (query.id, query.imdb_id) {
        (Some(id), _) => app_state.db.get_by_id(id).await?,
        (None, Some(imdb_id)) => app_state.db.get_by_imdb(&imdb_id).await?,
        (None, None) => return Err(AppError::bad_request("id or imdb_id is required")),
    };
    let item = item.ok_or_else(|| AppError::not_found("item not found"))?;
    let id = item
        .id()
        .ok_or_else(|| AppError::internal_error("stored item has no id"))?;
    app_state.bus.cancel_job(id).await;
    app_state.db.remove(id).await?;
    tracing::info!("Removed {} through the api", item.log_string());
    Ok(Json(serde_json::json!({ "removed": id })))
}

async fn states() -> Json<Vec<&'static str>> {
    Json(ItemState::ALL.iter().map(|state| state.as_str()).collect())
}

async fn services(State(app_state): State<AppState>) -> Json<serde_json::Value> {
    let statuses = app_state.program.service_statuses().await;
    Json(serde_json::json!({ "services": statuses }))
}

async fn stats(State(app_state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let store = app_state.db.stats().await?;
    let events = app_state.bus.snapshot();
    let queued = events.iter().filter(|event| event.status == "queued").count();
    let running = events.len() - queued;
    Ok(Json(serde_json::json!({
        "items": store,
        "blacklisted_hashes": app_state.cache.blacklisted_count(),
        "queued_events": queued,
        "running_events": running,
    })))
}

async fn events(State(app_state): State<AppState>) -> Json<Vec<EventSnapshot>> {
    Json(app_state.bus.snapshot())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn configuration() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "settings": CONFIG.json() }))
}

async fn update_configuration(
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let result = CONFIG.apply_json(body)?;
    if let Err(e) = ConfigFile::save().await {
        tracing::error!("Failed to write configuration file: {e}");
    }
    Ok(Json(serde_json::json!({ "errors": result.errors })))
}
