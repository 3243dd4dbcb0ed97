use std::fmt;
use std::sync::Arc;

use adbwire_transport::ConnectionOptions;

use crate::auth::Authorizer;
use crate::codec::DEFAULT_MAX_PACKET_PAYLOAD;
use crate::connector::{BackendConnector, DeviceConnector};
use crate::properties::{GetpropProperties, PropertySource};

/// Configuration for a bridge server.
#[derive(Clone)]
pub struct BridgeConfig {
    /// Device to bridge. `None` selects the only attached device.
    pub serial: Option<String>,
    /// How to reach the host daemon for backend connections.
    pub backend: ConnectionOptions,
    /// Largest inbound packet payload accepted. Default: 1 MiB.
    pub max_packet_payload: usize,
    /// Final say on verified client keys. Every verified key is accepted
    /// when unset.
    pub authorizer: Option<Arc<dyn Authorizer>>,
    /// Source of the identity properties. Defaults to `getprop` on the device.
    pub properties: Option<Arc<dyn PropertySource>>,
    /// Backend connection factory. Defaults to a [`DeviceConnector`].
    pub connector: Option<Arc<dyn BackendConnector>>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            serial: None,
            backend: ConnectionOptions::default(),
            max_packet_payload: DEFAULT_MAX_PACKET_PAYLOAD,
            authorizer: None,
            properties: None,
            connector: None,
        }
    }
}

impl BridgeConfig {
    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn with_backend(mut self, backend: ConnectionOptions) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_max_packet_payload(mut self, max: usize) -> Self {
        self.max_packet_payload = max;
        self
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    pub fn with_properties(mut self, properties: Arc<dyn PropertySource>) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn BackendConnector>) -> Self {
        self.connector = Some(connector);
        self
    }
}

impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("serial", &self.serial)
            .field("backend", &self.backend)
            .field("max_packet_payload", &self.max_packet_payload)
            .field("authorizer", &self.authorizer.as_ref().map(|_| "<custom>"))
            .field("properties", &self.properties.as_ref().map(|_| "<custom>"))
            .field("connector", &self.connector.as_ref().map(|_| "<custom>"))
            .finish()
    }
}

/// Collaborators shared by every socket of one server, resolved once.
#[derive(Clone)]
pub struct BridgeContext {
    pub(crate) connector: Arc<dyn BackendConnector>,
    pub(crate) properties: Arc<dyn PropertySource>,
    pub(crate) authorizer: Option<Arc<dyn Authorizer>>,
    pub(crate) max_packet_payload: usize,
}

impl BridgeContext {
    pub fn new(config: &BridgeConfig) -> Self {
        let connector = match &config.connector {
            Some(connector) => Arc::clone(connector),
            None => Arc::new(DeviceConnector::new(
                config.backend.clone(),
                config.serial.clone(),
            )) as Arc<dyn BackendConnector>,
        };
        let properties = match &config.properties {
            Some(properties) => Arc::clone(properties),
            None => Arc::new(GetpropProperties::new(Arc::clone(&connector))) as Arc<dyn PropertySource>,
        };
        Self {
            connector,
            properties,
            authorizer: config.authorizer.clone(),
            max_packet_payload: config.max_packet_payload,
        }
    }
}

impl fmt::Debug for BridgeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeContext")
            .field("authorizer", &self.authorizer.is_some())
            .field("max_packet_payload", &self.max_packet_payload)
            .finish_non_exhaustive()
    }
}
