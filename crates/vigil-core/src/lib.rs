pub mod channel;
pub mod config;
pub mod error;
pub mod gate;
pub mod ledger;
pub mod obligation;
pub mod quorum;
pub mod resolver;
pub mod scheduler;
pub mod store;
pub mod subject;
pub mod types;

pub use error::{Result, VigilError};
