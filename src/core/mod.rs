pub mod dispatcher;
pub mod historical;
pub mod ingestor;
pub mod lut;
pub mod parser;
pub mod registry;
pub mod token;

pub use dispatcher::{DispatchOutcome, DispatchStats, Dispatcher, FetchQueue};
pub use historical::HistoricalFetcher;
pub use ingestor::Ingestor;
pub use lut::LutCache;
pub use parser::TransactionParser;
pub use registry::DecoderRegistry;
