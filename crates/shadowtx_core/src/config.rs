//! Transaction layer configuration.

use std::time::Duration;

/// Configuration for a [`crate::TransactionCoordinator`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Collection holding transaction records.
    pub transaction_collection: String,

    /// Collection holding lock records for every base collection.
    pub lock_collection: String,

    /// Suffix appended to a base collection's name to name its shadow area.
    pub staging_suffix: String,

    /// Active transactions idle for longer than this are rolled back by
    /// recovery.
    pub stale_after: Duration,

    /// Upper bound on compare-and-swap retries when updating a record.
    pub max_cas_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transaction_collection: "transactions".to_string(),
            lock_collection: "transaction_locks".to_string(),
            staging_suffix: ".tx".to_string(),
            stale_after: Duration::from_secs(5 * 60),
            max_cas_retries: 16,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transaction record collection.
    #[must_use]
    pub fn transaction_collection(mut self, name: impl Into<String>) -> Self {
        self.transaction_collection = name.into();
        self
    }

    /// Sets the lock record collection.
    #[must_use]
    pub fn lock_collection(mut self, name: impl Into<String>) -> Self {
        self.lock_collection = name.into();
        self
    }

    /// Sets the shadow area suffix.
    #[must_use]
    pub fn staging_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.staging_suffix = suffix.into();
        self
    }

    /// Sets the staleness threshold used by recovery.
    #[must_use]
    pub const fn stale_after(mut self, value: Duration) -> Self {
        self.stale_after = value;
        self
    }

    /// Sets the compare-and-swap retry bound.
    #[must_use]
    pub const fn max_cas_retries(mut self, value: u32) -> Self {
        self.max_cas_retries = value;
        self
    }

    /// Name of the shadow area for `collection`.
    #[must_use]
    pub fn shadow_name(&self, collection: &str) -> String {
        format!("{collection}{}", self.staging_suffix)
    }

    /// Whether `collection` is reserved for the transaction layer itself.
    #[must_use]
    pub fn is_reserved(&self, collection: &str) -> bool {
        collection == self.transaction_collection
            || collection == self.lock_collection
            || (!self.staging_suffix.is_empty() && collection.ends_with(&self.staging_suffix))
    }
}
