pub mod config;
pub mod error;
pub mod ingest;
pub mod models;
pub mod proxy;
pub mod rag;
pub mod rate_limit;
pub mod run_log;
pub mod server;
pub mod store;
pub mod telemetry;

#[cfg(test)]
mod test_support;
