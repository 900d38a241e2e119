pub mod tickets;
pub mod users;

use axum::{
    routing::{delete, get, patch, post},
    Router,
};

use crate::server::AppState;

/// Create the API router with all endpoint routes
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route("/users/signup", post(users::signup))
        .route("/users/login", post(users::login))
        .route("/users/me", get(users::me))
        .route("/users/seed-junior", post(users::seed_junior))
        .route("/tickets", post(tickets::create_ticket))
        .route("/tickets/me", get(tickets::my_tickets))
        .route("/tickets/all", get(tickets::all_tickets))
        .route("/tickets/unassigned", get(tickets::unassigned_tickets))
        .route("/tickets/juniors", get(tickets::available_juniors))
        .route("/tickets/assign", post(tickets::assign_ticket))
        .route("/tickets/:id/unassign", patch(tickets::unassign_ticket))
        .route("/tickets/:id/complete", patch(tickets::complete_ticket))
        .route("/tickets/:id", delete(tickets::delete_ticket))
}
