//! The driver a connection delegates network work to.
//!
//! [`Driver`] is the seam between the lifecycle layer and the transport. The
//! default implementation, [`MongoDriver`], is backed by the official
//! `mongodb` crate; tests substitute their own.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bson::doc;
use mongodb::event::sdam::{
    SdamEventHandler, ServerDescriptionChangedEvent, ServerHeartbeatFailedEvent,
};
use mongodb::options::{ClientOptions, ServerAddress};
use mongodb::{Client, ServerType};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::event::{EventSink, SharedError};
use crate::options::ConnectOptions;

/// Transport operations a connection needs.
///
/// `connect` must report runtime events for the returned client through
/// `events` for as long as the client lives.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// A connected client.
    type Client: Clone + Send + Sync + 'static;

    /// Error returned by `connect` and `close`.
    type Error: std::error::Error + Clone + Send + Sync + 'static;

    /// Establish a client for `uri`.
    async fn connect(
        &self,
        uri: &str,
        options: &ConnectOptions,
        events: EventSink,
    ) -> Result<Self::Client, Self::Error>;

    /// Shut `client` down. `force` skips waiting for in-use resources.
    async fn close(&self, client: Self::Client, force: bool) -> Result<(), Self::Error>;
}

/// Driver backed by the official MongoDB client.
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoDriver;

impl MongoDriver {
    /// Create the driver.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Driver for MongoDriver {
    type Client = Client;
    type Error = mongodb::error::Error;

    async fn connect(
        &self,
        uri: &str,
        options: &ConnectOptions,
        events: EventSink,
    ) -> Result<Client, mongodb::error::Error> {
        let mut client_options = ClientOptions::parse(uri).await?;
        options.apply_to(&mut client_options);
        let monitor: Arc<dyn SdamEventHandler> = Arc::new(MonitorBridge::new(events));
        client_options.sdam_event_handler = Some(monitor);

        let client = Client::with_options(client_options)?;

        // The client connects lazily; a ping forces server selection.
        client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await?;

        info!(
            app_name = ?options.app_name,
            "MongoDB client connected"
        );
        Ok(client)
    }

    async fn close(&self, client: Client, force: bool) -> Result<(), mongodb::error::Error> {
        debug!(force, "Shutting down MongoDB client");
        if force {
            client.shutdown_immediate().await;
        } else {
            client.shutdown().await;
        }
        Ok(())
    }
}

/// Translates server monitoring events into lifecycle events.
///
/// A single member going down is not a lost connection. The connection is
/// lost once no known server can take writes, and restored when one can
/// again.
struct MonitorBridge {
    sink: EventSink,
    members: Mutex<Members>,
}

/// Last known type of every server the client monitors.
#[derive(Debug, Default)]
struct Members {
    servers: HashMap<ServerAddress, ServerType>,
    writable_seen: bool,
    lost: bool,
    full_setup: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    FullSetup,
    Lost,
    Restored,
}

impl Members {
    fn update(&mut self, address: ServerAddress, kind: ServerType) -> Vec<Change> {
        self.servers.insert(address, kind);
        let mut changes = Vec::new();

        if self.has_writable() {
            self.writable_seen = true;
            if self.lost {
                self.lost = false;
                changes.push(Change::Restored);
            }
        } else if self.writable_seen && !self.lost {
            self.lost = true;
            changes.push(Change::Lost);
        }

        if !self.full_setup && self.has_primary_and_secondary() {
            self.full_setup = true;
            changes.push(Change::FullSetup);
        }
        changes
    }

    fn has_writable(&self) -> bool {
        self.servers.values().any(|kind| {
            matches!(
                kind,
                ServerType::Standalone
                    | ServerType::Mongos
                    | ServerType::RsPrimary
                    | ServerType::LoadBalancer
            )
        })
    }

    fn has_primary_and_secondary(&self) -> bool {
        let primary = self
            .servers
            .values()
            .any(|kind| matches!(kind, ServerType::RsPrimary));
        let secondary = self
            .servers
            .values()
            .any(|kind| matches!(kind, ServerType::RsSecondary));
        primary && secondary
    }
}

impl MonitorBridge {
    fn new(sink: EventSink) -> Self {
        Self {
            sink,
            members: Mutex::new(Members::default()),
        }
    }

    fn apply(&self, changes: Vec<Change>, cause: Option<SharedError>) {
        let mut cause = cause;
        for change in changes {
            match change {
                Change::FullSetup => self.sink.full_setup(),
                Change::Lost => self.sink.lost(cause.take()),
                Change::Restored => self.sink.reconnected(),
            }
        }
    }
}

impl SdamEventHandler for MonitorBridge {
    fn handle_server_description_changed_event(&self, event: ServerDescriptionChangedEvent) {
        let changes = self
            .members
            .lock()
            .update(event.address.clone(), event.new_description.server_type());
        self.apply(changes, None);
    }

    fn handle_server_heartbeat_failed_event(&self, event: ServerHeartbeatFailedEvent) {
        debug!(server = %event.server_address, "Server heartbeat failed");
        let changes = self
            .members
            .lock()
            .update(event.server_address.clone(), ServerType::Unknown);
        let cause: SharedError = Arc::new(event.failure);
        self.apply(changes, Some(cause));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(host: &str) -> ServerAddress {
        ServerAddress::Tcp {
            host: host.into(),
            port: None,
        }
    }

    #[test]
    fn test_replica_set_completeness() {
        let mut members = Members::default();
        assert!(members.update(server("a"), ServerType::RsPrimary).is_empty());
        assert_eq!(
            members.update(server("b"), ServerType::RsSecondary),
            vec![Change::FullSetup]
        );
        // Reported once.
        assert!(members.update(server("c"), ServerType::RsSecondary).is_empty());
    }

    #[test]
    fn test_secondary_failure_is_not_a_loss() {
        let mut members = Members::default();
        members.update(server("a"), ServerType::RsPrimary);
        members.update(server("b"), ServerType::RsSecondary);
        members.update(server("c"), ServerType::RsSecondary);

        for _ in 0..3 {
            assert!(members.update(server("c"), ServerType::Unknown).is_empty());
            assert!(members.update(server("a"), ServerType::RsPrimary).is_empty());
        }
    }

    #[test]
    fn test_primary_loss_and_recovery() {
        let mut members = Members::default();
        members.update(server("a"), ServerType::RsPrimary);
        members.update(server("b"), ServerType::RsSecondary);

        assert_eq!(
            members.update(server("a"), ServerType::Unknown),
            vec![Change::Lost]
        );
        // Still lost; not reported again.
        assert!(members.update(server("b"), ServerType::Unknown).is_empty());

        assert_eq!(
            members.update(server("b"), ServerType::RsPrimary),
            vec![Change::Restored]
        );
    }

    #[test]
    fn test_discovery_before_first_writable_is_not_a_loss() {
        let mut members = Members::default();
        assert!(members.update(server("a"), ServerType::Unknown).is_empty());
        assert!(members.update(server("a"), ServerType::Standalone).is_empty());
        assert_eq!(
            members.update(server("a"), ServerType::Unknown),
            vec![Change::Lost]
        );
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_uri() {
        let result = MongoDriver::new()
            .connect("not-a-uri", &ConnectOptions::new(), EventSink::detached())
            .await;
        assert!(result.is_err());
    }
}
