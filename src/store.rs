pub use self::error::StoreError;
pub use self::file::{JsonAliasStore, LineLedgerStore};
pub use self::stores::{AliasStore, LedgerStore};

pub mod error;
pub mod file;
pub mod stores;
