use axum::Router;

pub mod streams;

use crate::ServiceState;

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .nest("/streams", streams::router(state.clone()))
        .with_state(state)
}
