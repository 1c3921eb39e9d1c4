//! Offline-first caching worker for the ShopMart storefront.
//!
//! The storefront UI talks to the network through this layer: a policy
//! selector classifies each outbound request, a strategy engine satisfies
//! it from named cache partitions and/or the network, and a lifecycle
//! manager versions the partitions across deployments. A small control
//! protocol lets the foreground application query cache size, clear the
//! cache, or force activation, and tagged connectivity signals drive
//! background reconciliation (cart sync).

pub mod clients;
pub mod config;
pub mod control;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod policy;
pub mod store;
pub mod strategy;
pub mod sync;
pub mod worker;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::WorkerConfig;
pub use error::Error;
pub use worker::{Worker, WorkerHandle};
