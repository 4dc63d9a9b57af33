// cid-catalog - durable catalogue and search index for CIDs pinned on a
// content-addressed storage node.

pub mod analyzer;
pub mod builders;
pub mod config;
pub mod contracts;
pub mod detector;
pub mod gateway;
pub mod http_server;
pub mod http_types;
pub mod metrics;
pub mod node_rpc;
pub mod observability;
pub mod path_index;
pub mod store;
pub mod tagger;
pub mod tags;
pub mod tokenize;
pub mod types;
pub mod validation;
pub mod workers;
pub mod wrappers;

pub use config::Config;
pub use contracts::{CidRecord, LinkKind, PresentSource, Signals, Tags};
pub use observability::{init_logging, init_logging_with_level, log_operation, Operation};
pub use store::Store;
pub use types::{
    Confidence, NonZeroSize, ValidatedCid, ValidatedTag, ValidatedTimestamp, ValidatedToken,
};
