pub mod invoices;

use axum::{
    Router,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        // Public invoice pages
        .route("/invoice/{public_id}", get(invoices::get_invoice))
        .route("/invoice/{public_id}/check", post(invoices::check_invoice))
        .route("/currencies", get(invoices::list_currencies))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}
