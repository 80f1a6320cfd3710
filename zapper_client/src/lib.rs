use async_trait::async_trait;

pub mod client;
pub mod error;
pub mod types;

pub use client::{crosses_window_start, truncate_to_window, ZapperClient};
pub use error::ZapperError;
pub use types::{TimeWindow, Transaction};

pub type Result<T> = std::result::Result<T, ZapperError>;

/// Source of an address's normalized, in-window transaction history
#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// Newest-first list of transactions inside the analysis window
    async fn fetch_transactions(&self, address: &str) -> Result<Vec<Transaction>>;
}
