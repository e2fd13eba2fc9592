//! # mongo-lifecycle
//!
//! Connection lifecycle management for MongoDB.
//!
//! This crate provides:
//! - Connection URI assembly from host, replica set seeds, credentials and options
//! - Preferred driver defaults merged beneath caller-supplied options
//! - A connection handle with a readiness state and lifecycle events
//! - An idempotent `open()` that never starts a second attempt while one is in flight
//! - Lifecycle diagnostics through an injectable logger
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mongo_lifecycle::{ConnectionManager, ConnectionParameters, TracingLogger};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let params = ConnectionParameters::from_env()?;
//!
//!     // Starts connecting right away; failures are logged, not returned.
//!     let manager = ConnectionManager::builder(params)
//!         .logger(Arc::new(TracingLogger::with_scope("orders")))
//!         .build();
//!
//!     // Joins the attempt already in flight.
//!     let connection = manager.open().await?;
//!     let client = connection.client().expect("connected");
//!     let users = client.database("orders").collection::<bson::Document>("users");
//!
//!     manager.close(false).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Lifecycle events
//!
//! | event              | logged at |
//! |--------------------|-----------|
//! | connecting         | debug     |
//! | connected          | info      |
//! | full setup         | debug     |
//! | disconnected       | warn      |
//! | reconnected        | warn      |
//! | reconnect failed   | error     |
//! | error              | error (message, then the error's debug form) |

pub mod config;
pub mod connection;
pub mod driver;
pub mod env;
pub mod error;
pub mod event;
pub mod logger;
pub mod logging;
pub mod manager;
pub mod options;
pub mod uri;

pub use config::{
    ConnectionParameters, ConnectionParametersBuilder, DEFAULT_PORT, ExtraHost, FileConfig,
    ManagerConfig, ManagerSettings,
};
pub use connection::{Connection, OpenFuture};
pub use driver::{Driver, MongoDriver};
pub use error::{ConfigError, ConfigResult};
pub use event::{ConnectionEvent, EventEmitter, EventKind, EventSink, ReadyState, SharedError};
pub use logger::{LogRecord, Logger, MemoryLogger, TracingLogger};
pub use manager::{ConnectionManager, ConnectionManagerBuilder};
pub use options::{ConnectOptions, ReadPreference, WriteConcern};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{ConnectionParameters, ExtraHost, ManagerConfig};
    pub use crate::connection::Connection;
    pub use crate::driver::{Driver, MongoDriver};
    pub use crate::event::{ConnectionEvent, EventKind, ReadyState};
    pub use crate::logger::{Logger, TracingLogger};
    pub use crate::manager::ConnectionManager;
    pub use crate::options::ConnectOptions;
}
