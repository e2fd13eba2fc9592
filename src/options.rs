//! Driver connect options.
//!
//! Every field is optional; unset fields fall through to the driver's own
//! defaults when the options are applied to [`ClientOptions`].

use std::time::Duration;

use mongodb::options::{
    Acknowledgment, ClientOptions, ReadPreference as DriverReadPreference, SelectionCriteria,
};

/// MongoDB read preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPreference {
    /// Read from primary only.
    #[default]
    Primary,
    /// Read from primary preferred, fallback to secondary.
    PrimaryPreferred,
    /// Read from secondary only.
    Secondary,
    /// Read from secondary preferred, fallback to primary.
    SecondaryPreferred,
    /// Read from nearest member.
    Nearest,
}

impl ReadPreference {
    fn to_criteria(self) -> SelectionCriteria {
        let pref = match self {
            Self::Primary => DriverReadPreference::Primary,
            Self::PrimaryPreferred => DriverReadPreference::PrimaryPreferred {
                options: Default::default(),
            },
            Self::Secondary => DriverReadPreference::Secondary {
                options: Default::default(),
            },
            Self::SecondaryPreferred => DriverReadPreference::SecondaryPreferred {
                options: Default::default(),
            },
            Self::Nearest => DriverReadPreference::Nearest {
                options: Default::default(),
            },
        };
        SelectionCriteria::ReadPreference(pref)
    }
}

/// MongoDB write concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteConcern {
    /// Acknowledge writes from the specified number of nodes.
    W(u32),
    /// Acknowledge writes from majority of nodes.
    Majority,
    /// Custom tag set.
    Custom(String),
}

impl WriteConcern {
    fn to_driver(&self) -> mongodb::options::WriteConcern {
        let ack = match self {
            Self::W(n) => Acknowledgment::Nodes(*n),
            Self::Majority => Acknowledgment::Majority,
            Self::Custom(tag) => Acknowledgment::Custom(tag.clone()),
        };
        mongodb::options::WriteConcern::builder().w(ack).build()
    }
}

/// Options handed to the driver on every open attempt.
///
/// Built with the chained setters, then combined with a base set through
/// [`ConnectOptions::overlay`]:
///
/// ```rust
/// use std::time::Duration;
/// use mongo_lifecycle::ConnectOptions;
///
/// let options = ConnectOptions::new()
///     .max_pool_size(50)
///     .connect_timeout(Duration::from_secs(2))
///     .overlay(ConnectOptions::preferred());
///
/// assert_eq!(options.max_pool_size, Some(50));
/// assert_eq!(options.retry_writes, Some(true));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectOptions {
    /// Application name (shown in server logs).
    pub app_name: Option<String>,
    /// Minimum connection pool size.
    pub min_pool_size: Option<u32>,
    /// Maximum connection pool size.
    pub max_pool_size: Option<u32>,
    /// Maximum idle time for pooled connections.
    pub max_idle_time: Option<Duration>,
    /// Connection timeout.
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout.
    pub server_selection_timeout: Option<Duration>,
    /// Interval between server monitor heartbeats.
    pub heartbeat_frequency: Option<Duration>,
    /// Read preference.
    pub read_preference: Option<ReadPreference>,
    /// Write concern.
    pub write_concern: Option<WriteConcern>,
    /// Retry writes.
    pub retry_writes: Option<bool>,
    /// Retry reads.
    pub retry_reads: Option<bool>,
    /// Direct connection (bypass replica set discovery).
    pub direct_connection: Option<bool>,
    /// Expected replica set name.
    pub replica_set: Option<String>,
}

impl ConnectOptions {
    /// Options with nothing set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in preferred defaults.
    pub fn preferred() -> Self {
        Self {
            app_name: Some("mongo-lifecycle".to_string()),
            max_pool_size: Some(10),
            max_idle_time: Some(Duration::from_secs(300)),
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            read_preference: Some(ReadPreference::Primary),
            retry_writes: Some(true),
            retry_reads: Some(true),
            ..Self::default()
        }
    }

    /// Keep every field set on `self`, taking the rest from `base`.
    pub fn overlay(self, base: ConnectOptions) -> Self {
        Self {
            app_name: self.app_name.or(base.app_name),
            min_pool_size: self.min_pool_size.or(base.min_pool_size),
            max_pool_size: self.max_pool_size.or(base.max_pool_size),
            max_idle_time: self.max_idle_time.or(base.max_idle_time),
            connect_timeout: self.connect_timeout.or(base.connect_timeout),
            server_selection_timeout: self
                .server_selection_timeout
                .or(base.server_selection_timeout),
            heartbeat_frequency: self.heartbeat_frequency.or(base.heartbeat_frequency),
            read_preference: self.read_preference.or(base.read_preference),
            write_concern: self.write_concern.or(base.write_concern),
            retry_writes: self.retry_writes.or(base.retry_writes),
            retry_reads: self.retry_reads.or(base.retry_reads),
            direct_connection: self.direct_connection.or(base.direct_connection),
            replica_set: self.replica_set.or(base.replica_set),
        }
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    /// Set the minimum pool size.
    pub fn min_pool_size(mut self, size: u32) -> Self {
        self.min_pool_size = Some(size);
        self
    }

    /// Set the maximum pool size.
    pub fn max_pool_size(mut self, size: u32) -> Self {
        self.max_pool_size = Some(size);
        self
    }

    /// Set the maximum idle time for pooled connections.
    pub fn max_idle_time(mut self, duration: Duration) -> Self {
        self.max_idle_time = Some(duration);
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.connect_timeout = Some(duration);
        self
    }

    /// Set the server selection timeout.
    pub fn server_selection_timeout(mut self, duration: Duration) -> Self {
        self.server_selection_timeout = Some(duration);
        self
    }

    /// Set the heartbeat frequency.
    pub fn heartbeat_frequency(mut self, duration: Duration) -> Self {
        self.heartbeat_frequency = Some(duration);
        self
    }

    /// Set the read preference.
    pub fn read_preference(mut self, pref: ReadPreference) -> Self {
        self.read_preference = Some(pref);
        self
    }

    /// Set the write concern.
    pub fn write_concern(mut self, wc: WriteConcern) -> Self {
        self.write_concern = Some(wc);
        self
    }

    /// Enable or disable retry writes.
    pub fn retry_writes(mut self, enabled: bool) -> Self {
        self.retry_writes = Some(enabled);
        self
    }

    /// Enable or disable retry reads.
    pub fn retry_reads(mut self, enabled: bool) -> Self {
        self.retry_reads = Some(enabled);
        self
    }

    /// Enable direct connection (bypass replica set discovery).
    pub fn direct_connection(mut self, enabled: bool) -> Self {
        self.direct_connection = Some(enabled);
        self
    }

    /// Set the expected replica set name.
    pub fn replica_set(mut self, name: impl Into<String>) -> Self {
        self.replica_set = Some(name.into());
        self
    }

    /// Write every set field onto parsed driver options.
    ///
    /// Fields left unset keep whatever the connection string produced.
    pub fn apply_to(&self, options: &mut ClientOptions) {
        if let Some(ref app_name) = self.app_name {
            options.app_name = Some(app_name.clone());
        }
        if let Some(min_pool) = self.min_pool_size {
            options.min_pool_size = Some(min_pool);
        }
        if let Some(max_pool) = self.max_pool_size {
            options.max_pool_size = Some(max_pool);
        }
        if let Some(max_idle) = self.max_idle_time {
            options.max_idle_time = Some(max_idle);
        }
        if let Some(connect_timeout) = self.connect_timeout {
            options.connect_timeout = Some(connect_timeout);
        }
        if let Some(selection_timeout) = self.server_selection_timeout {
            options.server_selection_timeout = Some(selection_timeout);
        }
        if let Some(heartbeat) = self.heartbeat_frequency {
            options.heartbeat_freq = Some(heartbeat);
        }
        if let Some(read_pref) = self.read_preference {
            options.selection_criteria = Some(read_pref.to_criteria());
        }
        if let Some(ref wc) = self.write_concern {
            options.write_concern = Some(wc.to_driver());
        }
        if let Some(retry_writes) = self.retry_writes {
            options.retry_writes = Some(retry_writes);
        }
        if let Some(retry_reads) = self.retry_reads {
            options.retry_reads = Some(retry_reads);
        }
        if let Some(direct) = self.direct_connection {
            options.direct_connection = Some(direct);
        }
        if let Some(ref replica_set) = self.replica_set {
            options.repl_set_name = Some(replica_set.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_keeps_caller_values() {
        let options = ConnectOptions::new()
            .app_name("orders")
            .retry_writes(false)
            .overlay(ConnectOptions::preferred());

        assert_eq!(options.app_name.as_deref(), Some("orders"));
        assert_eq!(options.retry_writes, Some(false));
        assert_eq!(options.retry_reads, Some(true));
        assert_eq!(options.max_pool_size, Some(10));
        assert_eq!(options.min_pool_size, None);
    }

    #[test]
    fn test_overlay_on_empty_base_is_identity() {
        let options = ConnectOptions::new().max_pool_size(3);
        assert_eq!(options.clone().overlay(ConnectOptions::new()), options);
    }

    #[test]
    fn test_read_preference_default() {
        let pref: ReadPreference = Default::default();
        assert_eq!(pref, ReadPreference::Primary);
    }

    #[tokio::test]
    async fn test_apply_to_client_options() {
        let mut client_options = ClientOptions::parse("mongodb://localhost:27017/?appName=uri")
            .await
            .unwrap();

        ConnectOptions::new()
            .max_pool_size(25)
            .connect_timeout(Duration::from_secs(2))
            .write_concern(WriteConcern::Majority)
            .direct_connection(true)
            .apply_to(&mut client_options);

        assert_eq!(client_options.max_pool_size, Some(25));
        assert_eq!(client_options.connect_timeout, Some(Duration::from_secs(2)));
        assert_eq!(client_options.direct_connection, Some(true));
        assert!(client_options.write_concern.is_some());
        // Unset fields leave the connection string's value alone.
        assert_eq!(client_options.app_name.as_deref(), Some("uri"));
    }
}
