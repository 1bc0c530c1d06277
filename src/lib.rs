//! Administrative console for a local S3-compatible object store.
//!
//! The object listing page ([`page::ObjectListingPage`]) drives a
//! [`services::StorageClient`] and reports through notification, overlay and
//! confirmation seams. The web console and the terminal console each provide
//! their own adapters for those seams.

pub mod batch;
pub mod cli;
pub mod client;
pub mod config;
pub mod console;
pub mod error;
pub mod format;
pub mod models;
pub mod page;
pub mod routes;
pub mod services;
pub mod storage;
pub mod title;

#[cfg(test)]
mod testing;
