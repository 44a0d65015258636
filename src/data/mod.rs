//! Data processing and storage modules.
pub mod export;
pub mod peak;
pub mod store;
