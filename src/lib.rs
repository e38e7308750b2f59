pub mod catalog;
pub mod config;
pub mod embed;
pub mod error;
pub mod ingest;
pub mod posters;
pub mod search;
pub mod server;
pub mod store;
