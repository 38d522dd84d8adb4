pub mod bus;
pub mod service;

pub use service::{IngestError, IngestService, Reading};
