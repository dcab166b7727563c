// PhotonKV - Rust Implementation
// A sharded B-tree key/value store with ordered range queries

#![warn(rust_2018_idioms)]

pub mod btree;
pub mod config;
pub mod metrics;
pub mod protocol;
pub mod query;
pub mod region;
pub mod storage;

// Re-exports for convenience
pub use btree::{Entry, ValueProvider};
pub use config::StoreConfig;
pub use protocol::{Dispatcher, Reply};
pub use query::{rget, rget_region};
pub use region::Region;
pub use storage::{ShardedStore, Slice};

/// Keys are ordered byte strings compared lexicographically.
pub type Key = bytes::Bytes;

/// PhotonKV error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        /// A structural invariant of the tree was violated.
        #[error("Corruption: {0}")]
        Corruption(String),

        #[error("Storage error: {0}")]
        Storage(String),

        #[error("Invalid argument: {0}")]
        InvalidArgument(String),

        #[error("Ordering violation: {0}")]
        OrderViolation(String),

        #[error("Configuration error: {0}")]
        Config(String),

        #[error("Internal error: {0}")]
        Internal(String),
    }

    impl Error {
        /// Fatal errors indicate corruption or a logic defect. The operation
        /// that hit one is aborted and never retried.
        pub fn is_fatal(&self) -> bool {
            matches!(self, Error::Corruption(_))
        }
    }

    impl From<::config::ConfigError> for Error {
        fn from(err: ::config::ConfigError) -> Self {
            Error::Config(err.to_string())
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::error::Error;

    #[test]
    fn test_only_corruption_is_fatal() {
        assert!(Error::Corruption("torn path".into()).is_fatal());
        assert!(!Error::Storage("io".into()).is_fatal());
        assert!(!Error::OrderViolation("late".into()).is_fatal());
    }
}
