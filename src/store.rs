//! Write/read boundary for readings.
//!
//! A store value is one actor's exclusive session. It is obtained from a
//! [`StoreConnector`] when the actor starts and released with
//! [`ReadingStore::close`], which consumes it.

mod postgres;

pub use postgres::{PgConnector, PgReadingStore};

use crate::error::StoreError;
use crate::reading::{Reading, StoredReading};
use std::future::Future;

pub trait ReadingStore: Send + Sync {
    /// Appends one row. The row is committed once this returns `Ok`.
    fn insert(&self, reading: &Reading) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// At most `limit` rows, newest `recorded_at` first. An empty store is `Ok(vec![])`.
    fn query_latest(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<StoredReading>, StoreError>> + Send;

    fn close(self) -> impl Future<Output = ()> + Send
    where
        Self: Sized;
}

pub trait StoreConnector: Send + Sync {
    type Store: ReadingStore + 'static;

    fn connect(&self) -> impl Future<Output = Result<Self::Store, StoreError>> + Send;
}
