pub mod address;
pub mod agent;
pub mod analysis;
pub mod chat;
pub mod classifier;
pub mod completion;
pub mod compose;
pub mod config;
pub mod db;
pub mod dedup;
pub mod geocode;
pub mod hierarchy;
pub mod intent;
pub mod models;
pub mod normalize;
pub mod ollama;
pub mod scoring;
pub mod search;
pub mod server;
pub mod session;

pub use config::AppConfig;
pub use server::run_server;
