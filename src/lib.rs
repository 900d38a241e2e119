pub mod api;
pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod server;
pub mod skills;
pub mod workers;
pub mod workflow;
