pub mod api;
pub mod broadcast;
pub mod config;
pub mod ingest;
pub mod mqtt;
pub mod series;
pub mod series_store;
