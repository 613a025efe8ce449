use axum::Router;

use crate::AppState;

pub mod chat;
pub mod health;
pub mod listings;
pub mod media;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(listings::router())
        .merge(chat::router())
        .merge(media::router())
        .merge(health::router())
}
