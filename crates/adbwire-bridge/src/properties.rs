use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::debug;

use crate::connector::BackendConnector;
use crate::error::Result;

pub type Properties = HashMap<String, String>;

/// Properties folded into the identity string sent in our `CNXN`.
pub const IDENTITY_PROPERTIES: [&str; 3] =
    ["ro.product.name", "ro.product.model", "ro.product.device"];

/// Supplies device properties.
pub trait PropertySource: Send + Sync {
    fn properties(&self) -> BoxFuture<'_, Result<Properties>>;
}

/// A fixed property map.
#[derive(Debug, Clone, Default)]
pub struct StaticProperties {
    properties: Properties,
}

impl StaticProperties {
    pub fn new(properties: Properties) -> Self {
        Self { properties }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

impl PropertySource for StaticProperties {
    fn properties(&self) -> BoxFuture<'_, Result<Properties>> {
        let properties = self.properties.clone();
        Box::pin(async move { Ok(properties) })
    }
}

/// Reads properties from the device with `shell:getprop`.
#[derive(Clone)]
pub struct GetpropProperties {
    connector: Arc<dyn BackendConnector>,
}

impl GetpropProperties {
    pub fn new(connector: Arc<dyn BackendConnector>) -> Self {
        Self { connector }
    }
}

impl PropertySource for GetpropProperties {
    fn properties(&self) -> BoxFuture<'_, Result<Properties>> {
        Box::pin(async move {
            let mut conn = self.connector.connect().await?;
            conn.request("shell:getprop").await?;
            let output = conn.reader_mut().read_all().await?;
            if let Err(err) = conn.end().await {
                debug!(error = %err, "closing getprop connection failed");
            }
            let properties = parse_getprop(&String::from_utf8_lossy(&output));
            debug!(count = properties.len(), "read device properties");
            Ok(properties)
        })
    }
}

/// Parse `getprop` output: one `[key]: [value]` per line.
pub fn parse_getprop(output: &str) -> Properties {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim_end_matches('\r');
            let (key, value) = line.strip_prefix('[')?.split_once("]: [")?;
            let value = value.strip_suffix(']')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// `device::ro.product.name=..;ro.product.model=..;ro.product.device=..;\0`
pub fn device_identity(properties: &Properties) -> String {
    let mut identity = String::from("device::");
    for key in IDENTITY_PROPERTIES {
        let value = properties.get(key).map(String::as_str).unwrap_or("");
        identity.push_str(key);
        identity.push('=');
        identity.push_str(value);
        identity.push(';');
    }
    identity.push('\0');
    identity
}
