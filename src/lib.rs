pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod observability;
pub mod platform;
pub mod publisher;
pub mod state;
pub mod store;
pub mod subscriber;
pub mod view;
