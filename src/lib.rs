//! # Deep Sea
//!
//! Distributes commit packets over Usenet. A directory snapshot is packed
//! into a self-describing JSON packet, posted to a newsgroup, and mirrored by
//! anyone scanning that group into a local commit index. An optional HTTP
//! gateway lets key holders publish without news-server credentials of their
//! own, within a byte quota.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! deepsea = { version = "0.4", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::path::Path;
//! use std::sync::Arc;
//! use deepsea::config::{IndexConfig, NetworkConfig};
//! use deepsea::index::CommitIndex;
//! use deepsea::store::SqliteCommitStore;
//!
//! let store = SqliteCommitStore::new("./data/commits.db").unwrap();
//! store.initialize().unwrap();
//! let index = CommitIndex::new(Arc::new(store), IndexConfig::default());
//!
//! let network = NetworkConfig::load(Path::new("deepsea.toml")).unwrap();
//! let report = index.scan_network(&network).unwrap();
//! println!("{} new commits", report.stored);
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Includes the gateway client and the `deepsea` binary.
//!   Disable with `default-features = false`.

#[cfg(feature = "cli")]
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod index;
pub mod nntp;
pub mod packet;
pub mod server;
pub mod store;
pub mod types;
