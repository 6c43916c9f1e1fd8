pub mod config;
pub mod error;
pub mod fetch;
pub mod process;
pub mod select;

pub use error::{IngestError, IngestResult, LoadError};
