//! REST API module

pub mod chat;
pub mod handlers;
pub mod models;
pub mod routes;

pub use routes::{AppState, create_router};
