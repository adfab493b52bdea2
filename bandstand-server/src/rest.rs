use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Query, State},
    Json,
};
use bandstand_session::RoomSummary;
use serde::{Deserialize, Serialize};

use crate::{
    context::ServerContext,
    errors::{ServerError, ServerResult},
};

pub async fn list_rooms(State(context): State<ServerContext>) -> Json<Vec<RoomSummary>> {
    Json(context.session.rooms.list())
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    q: String,
}

#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub video_id: String,
    pub title: String,
    pub thumbnail: String,
}

pub async fn search(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(context): State<ServerContext>,
    Query(query): Query<SearchQuery>,
) -> ServerResult<Json<Vec<SearchResult>>> {
    let q = query.q.trim();

    if q.is_empty() {
        return Err(ServerError::MissingParameter("q"));
    }

    if !context.limits.search.allow(&addr.ip().to_string()) {
        return Err(ServerError::RateLimited);
    }

    let results = context
        .provider
        .search(q)
        .await?
        .into_iter()
        .map(|info| SearchResult {
            video_id: info.video_id,
            title: info.title,
            thumbnail: info.thumbnail,
        })
        .collect();

    Ok(Json(results))
}
