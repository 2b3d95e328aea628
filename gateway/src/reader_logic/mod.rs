pub mod alert;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod hardware;
pub mod hub;
pub mod logger;
pub mod model;
pub mod monitor;
pub mod products;
pub mod resolver;
pub mod store;
