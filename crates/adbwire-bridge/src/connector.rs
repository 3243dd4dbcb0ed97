use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};

use adbwire_transport::{connect_stream, Connection, ConnectionOptions};

/// Any duplex byte stream a backend connection can run over.
///
/// `Sync` lets a service borrow its connection across await points while
/// running on a spawned task.
pub trait BackendIo: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

impl<T> BackendIo for T where T: AsyncRead + AsyncWrite + Send + Sync + Unpin {}

pub type BackendStream = Box<dyn BackendIo>;

/// A host-daemon connection already bound to the bridged device.
pub type BackendConnection = Connection<BackendStream>;

/// Opens the backend connection behind each bridge service.
pub trait BackendConnector: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, adbwire_transport::Result<BackendConnection>>;
}

/// Connects to the host daemon and selects one device.
#[derive(Debug, Clone)]
pub struct DeviceConnector {
    options: ConnectionOptions,
    serial: Option<String>,
}

impl DeviceConnector {
    /// `serial: None` selects the only attached device.
    pub fn new(options: ConnectionOptions, serial: Option<String>) -> Self {
        Self { options, serial }
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }
}

impl BackendConnector for DeviceConnector {
    fn connect(&self) -> BoxFuture<'_, adbwire_transport::Result<BackendConnection>> {
        Box::pin(async move {
            let stream = connect_stream(&self.options).await?;
            let mut conn = Connection::from_stream(Box::new(stream) as BackendStream);
            conn.open_transport(self.serial.as_deref()).await?;
            Ok(conn)
        })
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn device_connector_selects_serial() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let daemon = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 4 + "host:transport:abc123".len()];
            socket.read_exact(&mut request).await.unwrap();
            socket.write_all(b"OKAY").await.unwrap();
            request
        });

        let connector = DeviceConnector::new(
            ConnectionOptions::default()
                .with_port(port)
                .with_auto_launch(false),
            Some("abc123".into()),
        );
        let conn = connector.connect().await.unwrap();
        assert!(!conn.is_ended());
        assert_eq!(daemon.await.unwrap(), b"0015host:transport:abc123");
    }
}
