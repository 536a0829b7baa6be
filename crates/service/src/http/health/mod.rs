use axum::routing::get;
use axum::Router;

use crate::ServiceState;

pub mod data_source;
mod liveness;
mod readiness;
mod version;

pub fn router<S>(state: ServiceState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/livez", get(liveness::handler))
        .route("/readyz", get(readiness::handler))
        .route("/version", get(version::handler))
        .with_state(state)
}
