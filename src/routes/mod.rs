use axum::{routing::get, Router};

use crate::state::AppState;

pub mod boundary_contracts;
pub mod branches;
pub mod breakdown_types;
pub mod drivers;
pub mod expenses;
pub mod franchises;
pub mod health;
pub mod reports;
pub mod revenues;
pub mod vehicles;

pub fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .merge(franchises::router())
        .merge(branches::router())
        .merge(drivers::router())
        .merge(vehicles::router())
        .merge(boundary_contracts::router())
        .merge(revenues::router())
        .merge(expenses::router())
        .merge(breakdown_types::router())
        .merge(reports::router())
}
