//! The device side of the ADB wire protocol, served over TCP.
//!
//! A [`BridgeServer`] accepts clients that speak the packet protocol
//! (`CNXN`/`AUTH`/`OPEN`/`OKAY`/`WRTE`/`CLSE`). Each connection is a
//! [`BridgeSocket`]: it runs the RSA challenge, then multiplexes virtual
//! streams. Every stream is a [`BridgeService`] backed by its own
//! host-daemon connection to the bridged device.

pub mod auth;
pub mod codec;
pub mod config;
pub mod connector;
pub mod counter;
pub mod error;
pub mod packet;
pub mod properties;
pub mod server;
pub mod service;
pub mod socket;

pub use auth::{AdbPublicKey, Authorizer};
pub use codec::{PacketCodec, DEFAULT_MAX_PACKET_PAYLOAD};
pub use config::{BridgeConfig, BridgeContext};
pub use connector::{BackendConnection, BackendConnector, BackendIo, BackendStream, DeviceConnector};
pub use counter::RollingCounter;
pub use error::{BridgeError, Result};
pub use packet::{
    checksum, AuthType, Command, Packet, A_VERSION, HEADER_SIZE, MAX_NEGOTIATED_PAYLOAD,
    TOKEN_SIZE,
};
pub use properties::{
    device_identity, parse_getprop, GetpropProperties, Properties, PropertySource,
    StaticProperties, IDENTITY_PROPERTIES,
};
pub use server::{BridgeCloser, BridgeServer};
pub use service::{BridgeService, ServiceState};
pub use socket::{AuthState, BridgeSocket};
