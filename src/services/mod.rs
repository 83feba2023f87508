pub mod clock;
pub mod store;
pub mod usage_tracker;

use anyhow::Result;
use chrono::NaiveDate;
use std::sync::Arc;

/// Durable key-value storage holding serialized records
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> impl std::future::Future<Output = Result<Option<String>>> + Send;
    fn set(&self, key: &str, value: &str) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Source of the current calendar day in the device's local time
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

impl<T: KeyValueStore> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> impl std::future::Future<Output = Result<Option<String>>> + Send {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> impl std::future::Future<Output = Result<()>> + Send {
        (**self).set(key, value)
    }
}
