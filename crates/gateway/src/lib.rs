//! # fsgate Gateway Library
//!
//! This crate provides the storage side of fsgate: one file API over several
//! storage backends, and signed delivery URLs for backends that cannot serve
//! files to browsers on their own.
//!
//! ## Overview
//!
//! - **Storage Adapters**: local disk, ZIP archive and in-memory backends
//!   behind the [`storage::StorageAdapter`] trait
//! - **Filesystem Facade**: prefix-aware paths, capability checks, URL fallback
//! - **URL Signing**: permanent and expiring URLs carrying encrypted tokens
//! - **Delivery**: stateless token redemption over HTTP
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        Application                            │
//! ├───────────────────────────────────────────────────────────────┤
//! │                   Filesystem (prefix, debug)                  │
//! │         │                                   │                 │
//! │         ▼                                   ▼                 │
//! │  ┌──────────────────┐             ┌────────────────────────┐  │
//! │  │  StorageAdapter  │◀────────────│ SignedUrlIssuer        │  │
//! │  │  local/zip/mem   │             │  AccessTokenCodec      │  │
//! │  └──────────────────┘             └────────────────────────┘  │
//! │         ▲                                   │ same secret     │
//! │         │                                   ▼                 │
//! │  ┌───────────────────────────────────────────────────────┐   │
//! │  │  HTTP: GET <action>?data=<token>  (FileDeliveryHandler) │   │
//! │  └───────────────────────────────────────────────────────┘   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gateway::{Config, Gateway};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load_default()?;
//!     config.apply_env_overrides();
//!
//!     let gateway = Gateway::from_config(config)?;
//!     println!("{}", gateway.filesystem().public_url("docs/report.pdf", &Default::default())?);
//!
//!     gateway.serve().await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading, validation and defaults
//! - [`storage`]: Adapter trait, backends, visibility and MIME detection
//! - [`filesystem`]: The prefix-aware facade
//! - [`signing`]: Signed URL issuing
//! - [`delivery`]: Token redemption
//! - [`server`]: HTTP routes
//! - [`app`]: Wiring from configuration to components

pub mod app;
pub mod config;
pub mod delivery;
pub mod filesystem;
pub mod server;
pub mod signing;
pub mod storage;

// Re-export protocol for convenience
pub use protocol;

pub use app::Gateway;
pub use config::{Config, ConfigError, StorageBackend};
pub use delivery::{DeliveredFile, FileDeliveryHandler, Rejection};
pub use filesystem::Filesystem;
pub use signing::{SignedUrlIssuer, SigningError};
pub use storage::{
    ChecksumAlgorithm, EntryKind, LocalAdapter, MemoryAdapter, StorageAdapter, StorageAttributes,
    StorageError, Visibility, WriteOptions, ZipArchiveAdapter,
};
