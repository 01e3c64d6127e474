//! Graph exploration and address analytics over a graph database with a
//! block-explorer fallback.

pub mod config;
pub mod error;
pub mod gateway;
pub mod graph;
pub mod model;
pub mod normalize;
pub mod server;
pub mod source;
pub mod utils;

pub use error::{ExplorerError, Result, SourceError};
pub use gateway::{FetchOrigin, Fetched, Gateway};
pub use graph::{ExpansionController, GraphData, GraphSnapshot};
