//! Backend HTTP contract: path normalization and the reqwest-based client
//! used to talk to the two vector-database instances.

pub mod client;
pub mod path;

pub use client::{BackendClient, CollectionInfo, ForwardedResponse};
