//! API router.
//!
//! All paths are nested under the daemon's API version prefix.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use crate::daemon::{AppState, Daemon};
use crate::handlers;
use crate::ops::API_VERSION;

/// Creates the router with every endpoint bound.
#[must_use]
pub fn create_router(daemon: Arc<Daemon>) -> Router {
    let state = AppState { daemon };
    Router::new()
        .nest(&format!("/{API_VERSION}"), api_routes())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/containers",
            get(handlers::list_containers).post(handlers::create_container),
        )
        .route(
            "/containers/:name",
            get(handlers::get_container)
                .put(handlers::update_container)
                .post(handlers::post_container)
                .delete(handlers::delete_container),
        )
        .route(
            "/containers/:name/state",
            get(handlers::get_state).put(handlers::put_state),
        )
        .route(
            "/containers/:name/files",
            get(handlers::get_file).post(handlers::put_file),
        )
        .route(
            "/containers/:name/snapshots",
            get(handlers::list_snapshots).post(handlers::create_snapshot),
        )
        .route(
            "/containers/:name/snapshots/:leaf",
            get(handlers::get_snapshot)
                .post(handlers::rename_snapshot)
                .delete(handlers::delete_snapshot),
        )
        .route("/containers/:name/exec", axum::routing::post(handlers::exec_container))
        .route("/operations/:id", get(handlers::get_operation))
        .route(
            "/operations/:id/websocket",
            get(handlers::operation_websocket),
        )
}
