use std::time::Duration;

use crate::{
    app_state::AppError,
    events::ContentSourceKind,
    item::{ItemMeta, MediaItem, Movie},
};

pub mod mdblist;
pub mod overseerr;
pub mod plex_watchlist;

/// External catalog of wanted titles, polled on an interval. Sources only
/// know imdb ids; the indexer later settles whether an id is a movie or a
/// show.
#[async_trait::async_trait]
pub trait ContentSource: Send + Sync {
    fn kind(&self) -> ContentSourceKind;
    fn initialized(&self) -> bool;
    fn update_interval(&self) -> Duration;
    async fn fetch(&self) -> Result<Vec<MediaItem>, AppError>;
}

/// A freshly requested item. The movie variant is a placeholder until the
/// indexer resolves the real type.
pub fn requested_item(imdb_id: &str, source: ContentSourceKind) -> MediaItem {
    MediaItem::Movie(Movie {
        meta: ItemMeta::requested(imdb_id, source.name().to_lowercase()),
    })
}

pub fn looks_like_imdb_id(raw: &str) -> bool {
    raw.starts_with("tt") && raw.len() > 2 && raw[2..].chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::State;

    #[test]
    fn requested_items_start_in_requested_state() {
        let item = requested_item("tt0133093", ContentSourceKind::Overseerr);
        assert_eq!(item.state(), State::Requested);
        assert_eq!(item.meta().requested_by.as_deref(), Some("overseerr"));
    }

    #[test]
    fn imdb_id_shapes() {
        assert!(looks_like_imdb_id("tt0133093"));
        assert!(!looks_like_imdb_id("0133093"));
        assert!(!looks_like_imdb_id("ttabc"));
    }
}
