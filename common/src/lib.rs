// Common library shared by the api and runner binaries

pub mod bootstrap;
pub mod config;
pub mod database;
pub mod decimal;
pub mod errors;
pub mod extractor;
pub mod jobs;
pub mod models;
pub mod orchestrator;
pub mod query_source;
pub mod table_writer;
pub mod telemetry;
pub mod transfer;
