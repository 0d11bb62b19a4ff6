pub mod aggregate;
pub mod config;
pub mod error;
pub mod generator;
pub mod ingest;
pub mod reading;
pub mod refresh;
pub mod render;
pub mod store;

#[cfg(test)]
pub mod test_support;
