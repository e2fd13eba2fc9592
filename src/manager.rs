//! Connection manager: one connection, logged lifecycle, idempotent open.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{ConnectionParameters, ManagerConfig};
use crate::connection::Connection;
use crate::driver::{Driver, MongoDriver};
use crate::event::{ConnectionEvent, EventKind, ReadyState};
use crate::logger::Logger;
use crate::options::ConnectOptions;
use crate::uri;

/// Owns one [`Connection`] and reports its lifecycle through a [`Logger`].
///
/// The connection URI and driver options are fixed at construction and
/// reused by every open attempt. Unless `lazy_connect` is set, construction
/// starts the initial open in the background; a failure there is logged and
/// never surfaces as an error or panic.
///
/// ```rust,no_run
/// use mongo_lifecycle::{ConnectionManager, ConnectionParameters, ManagerConfig, ConnectOptions};
///
/// # async fn run() -> Result<(), mongodb::error::Error> {
/// let params = ConnectionParameters::builder("localhost", "orders")
///     .credentials("svc", "secret")
///     .build();
/// let manager = ConnectionManager::new(
///     params,
///     ManagerConfig::new().lazy_connect(true),
///     ConnectOptions::default(),
/// );
///
/// let connection = manager.connect().await?;
/// let client = connection.client().expect("connected");
/// let _orders = client.database("orders");
///
/// manager.disconnect(false).await?;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionManager<D: Driver = MongoDriver> {
    db_config: ConnectionParameters,
    config: ManagerConfig,
    connect_options: ConnectOptions,
    connection_uri: String,
    connection: Connection<D>,
}

impl ConnectionManager<MongoDriver> {
    /// Create a manager backed by the official MongoDB driver.
    pub fn new(
        db_config: ConnectionParameters,
        config: ManagerConfig,
        connect_options: ConnectOptions,
    ) -> Self {
        Self::with_driver(MongoDriver::new(), db_config, config, connect_options)
    }

    /// Create a builder for a manager backed by the official MongoDB driver.
    pub fn builder(db_config: ConnectionParameters) -> ConnectionManagerBuilder<MongoDriver> {
        ConnectionManagerBuilder::new(db_config)
    }
}

impl<D: Driver> ConnectionManager<D> {
    /// Create a manager on top of `driver`.
    ///
    /// Caller options are overlaid on [`ConnectOptions::preferred`]. When
    /// `config.lazy_connect` is false the initial open is spawned on the
    /// current Tokio runtime; outside one, the failure is logged and the
    /// connection stays disconnected until [`open`](Self::open).
    pub fn with_driver(
        driver: D,
        db_config: ConnectionParameters,
        config: ManagerConfig,
        connect_options: ConnectOptions,
    ) -> Self {
        let connect_options = connect_options.overlay(ConnectOptions::preferred());
        let connection_uri = uri::make_connection_uri(&db_config);

        info!(
            uri = %uri::redacted_connection_uri(&db_config),
            database = %db_config.database,
            lazy = config.lazy_connect,
            "Connection manager created"
        );

        let connection = Connection::new(driver);
        bind_listeners(&connection, &db_config, &config.logger);

        let manager = Self {
            db_config,
            config,
            connect_options,
            connection_uri,
            connection,
        };

        if !manager.config.lazy_connect {
            manager.start_initial_open();
        }

        manager
    }

    fn start_initial_open(&self) {
        let logger = Arc::clone(&self.config.logger);
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                logger.error(&format!(
                    "Initial connection to MongoDB failed. Error: {}",
                    err
                ));
                return;
            }
        };

        let attempt = self
            .connection
            .open_uri(self.connection_uri.clone(), &self.connect_options);
        runtime.spawn(async move {
            if let Err(err) = attempt.await {
                logger.error(&format!(
                    "Initial connection to MongoDB failed. Error: {}",
                    err
                ));
            }
        });
    }

    /// Resolve with the connection once it is connected.
    ///
    /// - connected: returns immediately without a driver call
    /// - connecting: waits for the attempt already in flight
    /// - disconnecting: waits for the close to finish, then opens
    /// - disconnected: starts a new open attempt
    ///
    /// Driver errors are returned unchanged.
    pub async fn open(&self) -> Result<Connection<D>, D::Error> {
        loop {
            match self.connection.ready_state() {
                ReadyState::Connected => return Ok(self.connection.clone()),
                ReadyState::Connecting => {
                    if let Some(attempt) = self.connection.as_promise() {
                        debug!("Joining in-flight open attempt");
                        return attempt.await;
                    }
                    break;
                }
                ReadyState::Disconnecting => {
                    let mut state = self.connection.watch_state();
                    // The sender lives as long as the connection we hold.
                    let _ = state
                        .wait_for(|current| *current != ReadyState::Disconnecting)
                        .await;
                }
                ReadyState::Disconnected => break,
            }
        }

        self.connection
            .open_uri(self.connection_uri.clone(), &self.connect_options)
            .await
    }

    /// Alias for [`open`](Self::open).
    pub async fn connect(&self) -> Result<Connection<D>, D::Error> {
        self.open().await
    }

    /// Close the connection. `force` is passed to the driver.
    pub async fn close(&self, force: bool) -> Result<(), D::Error> {
        self.connection.close(force).await
    }

    /// Alias for [`close`](Self::close).
    pub async fn disconnect(&self, force: bool) -> Result<(), D::Error> {
        self.close(force).await
    }

    /// The connection parameters.
    pub fn db_config(&self) -> &ConnectionParameters {
        &self.db_config
    }

    /// The manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Driver options used for every open attempt.
    pub fn connect_options(&self) -> &ConnectOptions {
        &self.connect_options
    }

    /// The connection URI.
    pub fn connection_uri(&self) -> &str {
        &self.connection_uri
    }

    /// The managed connection, for domain operations.
    pub fn connection(&self) -> &Connection<D> {
        &self.connection
    }
}

impl<D: Driver> std::fmt::Debug for ConnectionManager<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("db_config", &self.db_config)
            .field("config", &self.config)
            .field("connect_options", &self.connect_options)
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ConnectionManager`].
pub struct ConnectionManagerBuilder<D: Driver = MongoDriver> {
    driver: D,
    db_config: ConnectionParameters,
    config: ManagerConfig,
    connect_options: ConnectOptions,
}

impl ConnectionManagerBuilder<MongoDriver> {
    /// Create a new builder using the official MongoDB driver.
    pub fn new(db_config: ConnectionParameters) -> Self {
        Self {
            driver: MongoDriver::new(),
            db_config,
            config: ManagerConfig::default(),
            connect_options: ConnectOptions::default(),
        }
    }
}

impl<D: Driver> ConnectionManagerBuilder<D> {
    /// Use a different driver.
    pub fn driver<D2: Driver>(self, driver: D2) -> ConnectionManagerBuilder<D2> {
        ConnectionManagerBuilder {
            driver,
            db_config: self.db_config,
            config: self.config,
            connect_options: self.connect_options,
        }
    }

    /// Defer the initial open until `open()` is called.
    pub fn lazy_connect(mut self, lazy: bool) -> Self {
        self.config.lazy_connect = lazy;
        self
    }

    /// Set the logger.
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.config.logger = logger;
        self
    }

    /// Replace the whole manager configuration.
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the caller's driver options.
    pub fn connect_options(mut self, options: ConnectOptions) -> Self {
        self.connect_options = options;
        self
    }

    /// Build the manager.
    pub fn build(self) -> ConnectionManager<D> {
        ConnectionManager::with_driver(self.driver, self.db_config, self.config, self.connect_options)
    }
}

fn with_user(message: String, username: Option<&str>) -> String {
    match username {
        Some(username) => format!("{} with user {}", message, username),
        None => message,
    }
}

fn bind_listeners<D: Driver>(
    connection: &Connection<D>,
    db_config: &ConnectionParameters,
    logger: &Arc<dyn Logger>,
) {
    let database = db_config.database.clone();
    let username = db_config.username.clone();

    {
        let logger = Arc::clone(logger);
        let message = with_user(
            format!(
                "Start making initial connection to the MongoDB database {}",
                database
            ),
            username.as_deref(),
        );
        connection.on(EventKind::Connecting, move |_| logger.debug(&message));
    }

    {
        let logger = Arc::clone(logger);
        let message = with_user(
            format!("Connected to MongoDB database {}", database),
            username.as_deref(),
        );
        connection.on(EventKind::Connected, move |_| logger.info(&message));
    }

    {
        let logger = Arc::clone(logger);
        connection.on(EventKind::FullSetup, move |_| {
            logger.debug(
                "Connected to the replica set primary and at least one secondary of MongoDB.",
            )
        });
    }

    {
        let logger = Arc::clone(logger);
        connection.on(EventKind::Disconnected, move |_| {
            logger.warn("Lost connection to the MongoDB server.")
        });
    }

    {
        let logger = Arc::clone(logger);
        connection.on(EventKind::Reconnected, move |_| {
            logger.warn("Lost connectivity to MongoDB and successfully reconnected.")
        });
    }

    {
        let logger = Arc::clone(logger);
        connection.on(EventKind::ReconnectFailed, move |_| {
            logger.error("Lost connectivity to MongoDB and ran out of reconnect attempts.")
        });
    }

    {
        let logger = Arc::clone(logger);
        connection.on(EventKind::Error, move |event| {
            if let ConnectionEvent::Error(err) = event {
                logger.error(&format!(
                    "Caught an error on the MongoDB connection. Error: {}",
                    err
                ));
                logger.error(&format!("{:?}", err));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::MemoryLogger;

    #[test]
    fn test_with_user() {
        assert_eq!(
            with_user("Connected".to_string(), Some("svc")),
            "Connected with user svc"
        );
        assert_eq!(with_user("Connected".to_string(), None), "Connected");
    }

    #[test]
    fn test_lazy_manager_needs_no_runtime() {
        let manager = ConnectionManager::new(
            ConnectionParameters::new("localhost", "testdb"),
            ManagerConfig::new().lazy_connect(true),
            ConnectOptions::new(),
        );

        assert_eq!(manager.connection().ready_state(), ReadyState::Disconnected);
        assert_eq!(manager.connection_uri(), "mongodb://localhost:27017/testdb");
        assert_eq!(manager.connect_options().retry_writes, Some(true));
        assert_eq!(manager.connection().listener_count(EventKind::Error), 1);
    }

    #[test]
    fn test_eager_manager_without_runtime_logs_error() {
        let logger = Arc::new(MemoryLogger::new());
        let manager = ConnectionManager::builder(ConnectionParameters::new("localhost", "testdb"))
            .logger(logger.clone())
            .build();

        assert_eq!(manager.connection().ready_state(), ReadyState::Disconnected);
        assert!(logger.contains(tracing::Level::ERROR, "Initial connection to MongoDB failed"));
        assert_eq!(logger.count(tracing::Level::ERROR), 1);
    }
}
