use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State as AxumState},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
};
use roster::{DocRef, Identity, PageEvent, RosterView, Synchronizer};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

#[cfg(feature = "verbose")]
use tracing::debug;

use crate::{
    error::AppError,
    pages::log_reports,
    render::{Theme, render_page},
    state::State,
    utils::{SESSION_COOKIE, cookie, unix_now},
};

#[derive(Deserialize)]
pub struct EditQuery {
    theme: Option<String>,
}

fn authenticate(state: &State, headers: &HeaderMap) -> Result<Identity, AppError> {
    let token = cookie(headers, SESSION_COOKIE).ok_or(roster::SessionError::Malformed)?;

    Ok(state.sessions.verify(token, unix_now())?)
}

fn redirect_to_entry(state: &State, theme: Theme) -> Response {
    Redirect::temporary(&format!(
        "{}?theme={}",
        state.config.entry_path,
        theme.as_str()
    ))
    .into_response()
}

pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok").into_response()
}

pub async fn edit_handler(
    AxumState(state): AxumState<Arc<State>>,
    Query(query): Query<EditQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let theme = Theme::from_query(query.theme.as_deref());

    let identity = match authenticate(&state, &headers) {
        Ok(identity) => identity,
        Err(e) => {
            warn!("Session gate rejected request: {e}");
            return Ok(redirect_to_entry(&state, theme));
        }
    };

    state.pages.prune(state.config.page_ttl);

    let doc = DocRef::new(state.config.collection.as_str(), identity.user_id.as_str());
    let (mut synchronizer, reports) =
        Synchronizer::new(state.store.clone(), doc, state.config.retry);
    synchronizer.load().await?;

    let view = synchronizer.view();
    let page = state.pages.open(identity.user_id, synchronizer);
    tokio::spawn(log_reports(page, reports));

    info!("Opened page {page}");

    Ok(Html(render_page(page, &view, theme)).into_response())
}

pub async fn events_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path(page): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RosterView>, AppError> {
    let identity = authenticate(&state, &headers)?;
    let event: PageEvent =
        serde_json::from_slice(&body).map_err(|_| AppError::MalformedPayload)?;

    #[cfg(feature = "verbose")]
    debug!("Page {page}: {event:?}");

    let view = state.pages.with_page(page, &identity.user_id, |synchronizer| {
        synchronizer.apply_page_event(event)?;
        Ok(synchronizer.view())
    })?;

    Ok(Json(view))
}

pub async fn view_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path(page): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<RosterView>, AppError> {
    let identity = authenticate(&state, &headers)?;

    let view = state
        .pages
        .with_page(page, &identity.user_id, |synchronizer| Ok(synchronizer.view()))?;

    Ok(Json(view))
}

pub async fn close_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path(page): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let identity = authenticate(&state, &headers)?;

    state.pages.close(page, &identity.user_id)?;
    info!("Closed page {page}");

    Ok(StatusCode::NO_CONTENT)
}
