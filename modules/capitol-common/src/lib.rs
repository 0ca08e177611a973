pub mod config;
pub mod error;
pub mod persist;
pub mod types;

pub use config::{Collection, Config};
pub use error::PersistError;
pub use types::{Bill, Chamber, DownloadResult, ExtractionResult, Legislator, Vote};
