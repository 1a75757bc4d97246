pub mod client;
pub mod disposition;
pub mod error;

pub use client::{CdnClient, PendingDownload};
pub use error::CdnError;
