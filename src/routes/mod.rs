use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub mod carriers;
pub mod clients;
pub mod documents;
pub mod health;
pub mod identity;
pub mod operations;
pub mod payment_plans;
pub mod prospects;
pub mod renewals;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/me", get(identity::me))
        .merge(prospects::router())
        .merge(clients::router())
        .merge(renewals::router())
        .merge(carriers::router())
        .merge(operations::router())
        .merge(payment_plans::router())
        .merge(documents::router())
}
