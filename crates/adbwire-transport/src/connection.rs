use adbwire_frame::{encode_request, FrameConfig, FrameReader, OKAY};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::options::ConnectionOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Ended,
}

/// One stream to the host daemon.
///
/// Reads go through a [`FrameReader`]; writes go straight to the write half
/// and resolve only once the transport accepted every byte.
pub struct Connection<S> {
    reader: FrameReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    state: State,
}

impl Connection<TcpStream> {
    /// Connect to the host daemon described by `options`.
    ///
    /// See [`connect_stream`] for the launch-and-retry policy.
    pub async fn connect(options: &ConnectionOptions) -> Result<Self> {
        Ok(Self::from_stream(connect_stream(options).await?))
    }
}

/// Open a TCP stream to the host daemon.
///
/// A refused first attempt launches the daemon once (when `auto_launch` is
/// set) and retries exactly once. Any failure of the retry is returned as is.
pub async fn connect_stream(options: &ConnectionOptions) -> Result<TcpStream> {
    let addr = options.addr();
    match dial(&addr).await {
        Ok(stream) => Ok(stream),
        Err(err) if err.is_connection_refused() && options.auto_launch => {
            info!(%addr, "host daemon refused connection, launching it");
            options.launcher().launch().await?;
            dial(&addr).await
        }
        Err(err) => Err(err),
    }
}

async fn dial(addr: &str) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| TransportError::Connect {
            addr: addr.to_string(),
            source,
        })?;
    stream.set_nodelay(true)?;
    debug!(%addr, "connected to host daemon");
    Ok(stream)
}

impl<S: AsyncRead + AsyncWrite> Connection<S> {
    /// Wrap an already-connected stream.
    pub fn from_stream(stream: S) -> Self {
        Self::with_config(stream, FrameConfig::default())
    }

    /// Wrap an already-connected stream with explicit reader configuration.
    pub fn with_config(stream: S, config: FrameConfig) -> Self {
        let (read_half, writer) = tokio::io::split(stream);
        Self {
            reader: FrameReader::with_config(read_half, config),
            writer,
            state: State::Open,
        }
    }

    /// Whether [`Connection::end`] was called.
    pub fn is_ended(&self) -> bool {
        self.state == State::Ended
    }

    /// The reader over the inbound half.
    pub fn reader_mut(&mut self) -> &mut FrameReader<ReadHalf<S>> {
        &mut self.reader
    }

    /// Both halves at once, so a caller can read and write concurrently.
    pub fn parts_mut(&mut self) -> (&mut FrameReader<ReadHalf<S>>, &mut WriteHalf<S>) {
        (&mut self.reader, &mut self.writer)
    }

    /// Write `bytes`, waiting for the transport to drain as needed.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.state == State::Ended {
            return Err(TransportError::Closed);
        }
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Send a length-prefixed line-protocol request.
    pub async fn send_request(&mut self, request: &str) -> Result<()> {
        let encoded = encode_request(request)?;
        debug!(request, "sending request");
        self.reader.set_last_request(request);
        self.write(&encoded).await
    }

    /// Read a reply code that must be `OKAY`.
    pub async fn expect_okay(&mut self) -> Result<()> {
        self.reader.read_code(&[OKAY]).await?;
        Ok(())
    }

    /// Send `request` and wait for its `OKAY`.
    pub async fn request(&mut self, request: &str) -> Result<()> {
        self.send_request(request).await?;
        self.expect_okay().await
    }

    /// Bind this connection to one device, or to the only attached one.
    pub async fn open_transport(&mut self, serial: Option<&str>) -> Result<()> {
        let request = match serial {
            Some(serial) => format!("host:transport:{serial}"),
            None => "host:transport-any".to_string(),
        };
        self.request(&request).await
    }

    /// Half-close the outbound direction. Calling it again does nothing.
    pub async fn end(&mut self) -> Result<()> {
        if self.state == State::Ended {
            return Ok(());
        }
        self.state = State::Ended;
        match self.writer.shutdown().await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("buffered", &self.reader.buffered())
            .field("last_request", &self.reader.last_request())
            .finish()
    }
}
