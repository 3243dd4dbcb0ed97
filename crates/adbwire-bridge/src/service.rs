use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connector::{BackendConnection, BackendConnector};
use crate::error::{BridgeError, Result};
use crate::packet::{Command, Packet};

/// Lifecycle of one virtual stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Unopened,
    Opened,
    Ended,
}

/// One virtual stream, backed by its own host-daemon connection.
///
/// At most one `WRTE` towards the client is unacknowledged at a time:
/// backend output is not read again until the client's `OKAY` arrives.
/// Client writes are relayed and acknowledged immediately.
pub struct BridgeService {
    local_id: u32,
    remote_id: u32,
    max_payload: usize,
    state: ServiceState,
    need_ack: bool,
    backend: Option<BackendConnection>,
    connector: Arc<dyn BackendConnector>,
    outbound: mpsc::Sender<Packet>,
}

impl BridgeService {
    pub fn new(
        local_id: u32,
        remote_id: u32,
        max_payload: usize,
        connector: Arc<dyn BackendConnector>,
        outbound: mpsc::Sender<Packet>,
    ) -> Self {
        Self {
            local_id,
            remote_id,
            max_payload,
            state: ServiceState::Unopened,
            need_ack: false,
            backend: None,
            connector,
            outbound,
        }
    }

    pub fn local_id(&self) -> u32 {
        self.local_id
    }

    pub fn remote_id(&self) -> u32 {
        self.remote_id
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// Whether a `WRTE` is waiting for the client's `OKAY`.
    pub fn needs_ack(&self) -> bool {
        self.need_ack
    }

    /// Apply one packet addressed to this stream.
    pub async fn handle(&mut self, packet: Packet) -> Result<()> {
        match packet.command {
            Command::Open => self.on_open(packet).await,
            Command::Okay => self.on_okay(),
            Command::Wrte => self.on_write(packet).await,
            Command::Clse => {
                self.end().await;
                Ok(())
            }
            other => {
                warn!(local_id = self.local_id, command = %other, "ignoring packet");
                Ok(())
            }
        }
    }

    async fn on_open(&mut self, packet: Packet) -> Result<()> {
        match self.state {
            ServiceState::Ended => return Err(BridgeError::LateTransport),
            ServiceState::Opened => {
                warn!(local_id = self.local_id, "ignoring repeated OPEN");
                return Ok(());
            }
            ServiceState::Unopened => {}
        }

        let name = String::from_utf8_lossy(packet.payload_trimmed()).into_owned();
        debug!(
            local_id = self.local_id,
            remote_id = self.remote_id,
            service = %name,
            "opening service"
        );
        let mut backend = self.connector.connect().await?;
        backend.request(&name).await?;

        self.backend = Some(backend);
        self.state = ServiceState::Opened;
        self.send(Packet::empty(Command::Okay, self.local_id, self.remote_id))
            .await
    }

    fn on_okay(&mut self) -> Result<()> {
        match self.state {
            ServiceState::Unopened => Err(BridgeError::PrematurePacket {
                command: Command::Okay,
            }),
            ServiceState::Ended => Ok(()),
            ServiceState::Opened => {
                self.need_ack = false;
                Ok(())
            }
        }
    }

    async fn on_write(&mut self, packet: Packet) -> Result<()> {
        let backend = match (self.state, self.backend.as_mut()) {
            (ServiceState::Unopened, _) => {
                return Err(BridgeError::PrematurePacket {
                    command: Command::Wrte,
                })
            }
            (ServiceState::Opened, Some(backend)) => backend,
            _ => return Ok(()),
        };
        if !packet.payload.is_empty() {
            backend.write(&packet.payload).await?;
        }
        self.send(Packet::empty(Command::Okay, self.local_id, self.remote_id))
            .await
    }

    /// Forward the next backend chunk, if the window allows it.
    ///
    /// Returns `false` when nothing may be sent, or the backend ended (which
    /// also ends the service).
    pub async fn pump(&mut self) -> Result<bool> {
        if self.state != ServiceState::Opened || self.need_ack {
            return Ok(false);
        }
        match read_backend(self.backend.as_mut(), self.max_payload).await? {
            Some(chunk) => {
                self.forward(chunk).await?;
                Ok(true)
            }
            None => {
                self.end().await;
                Ok(false)
            }
        }
    }

    async fn forward(&mut self, chunk: Bytes) -> Result<()> {
        self.need_ack = true;
        self.send(Packet::new(
            Command::Wrte,
            self.local_id,
            self.remote_id,
            chunk,
        ))
        .await
    }

    /// Close the stream: one `CLSE` to the client (with local id 0 if the
    /// open never completed) and the backend shut down. Idempotent.
    pub async fn end(&mut self) {
        if self.state == ServiceState::Ended {
            return;
        }
        let local_id = match self.state {
            ServiceState::Opened => self.local_id,
            _ => 0,
        };
        self.state = ServiceState::Ended;
        if let Some(mut backend) = self.backend.take() {
            if let Err(err) = backend.end().await {
                debug!(local_id = self.local_id, error = %err, "backend shutdown failed");
            }
        }
        if let Err(err) = self
            .send(Packet::empty(Command::Clse, local_id, self.remote_id))
            .await
        {
            debug!(local_id = self.local_id, error = %err, "could not send CLSE");
        }
        debug!(local_id = self.local_id, "service ended");
    }

    async fn send(&self, packet: Packet) -> Result<()> {
        self.outbound
            .send(packet)
            .await
            .map_err(|_| BridgeError::Closed)
    }

    /// Drive the service until it ends, then report its local id on `ended`.
    ///
    /// `cancel` interrupts the service at any await point, including a
    /// backend that never answers the open request.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<Packet>,
        ended: mpsc::UnboundedSender<u32>,
        cancel: CancellationToken,
    ) {
        loop {
            let readable = self.state == ServiceState::Opened && !self.need_ack;
            let max_payload = self.max_payload;
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(local_id = self.local_id, "service cancelled");
                    break;
                }
                packet = inbound.recv() => match packet {
                    Some(packet) => Step::Packet(packet),
                    None => {
                        debug!(local_id = self.local_id, "socket closed");
                        break;
                    }
                },
                chunk = read_backend(self.backend.as_mut(), max_payload), if readable => {
                    Step::Chunk(chunk)
                }
            };
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(local_id = self.local_id, "service cancelled");
                    break;
                }
                outcome = self.apply(step) => outcome,
            };
            match outcome {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    warn!(local_id = self.local_id, error = %err, "service failed");
                    break;
                }
            }
            if self.state == ServiceState::Ended {
                break;
            }
        }
        self.end().await;
        let _ = ended.send(self.local_id);
    }

    /// Returns `false` once the backend ended.
    async fn apply(&mut self, step: Step) -> Result<bool> {
        match step {
            Step::Packet(packet) => self.handle(packet).await.map(|()| true),
            Step::Chunk(chunk) => match chunk? {
                Some(chunk) => self.forward(chunk).await.map(|()| true),
                None => {
                    debug!(local_id = self.local_id, "backend ended");
                    Ok(false)
                }
            },
        }
    }
}

enum Step {
    Packet(Packet),
    Chunk(Result<Option<Bytes>>),
}

async fn read_backend(
    backend: Option<&mut BackendConnection>,
    max_payload: usize,
) -> Result<Option<Bytes>> {
    match backend {
        Some(backend) => Ok(backend.reader_mut().read_chunk(max_payload).await?),
        None => std::future::pending().await,
    }
}

impl std::fmt::Debug for BridgeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeService")
            .field("local_id", &self.local_id)
            .field("remote_id", &self.remote_id)
            .field("state", &self.state)
            .field("need_ack", &self.need_ack)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use adbwire_transport::Connection;
    use futures_util::future::BoxFuture;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::time::timeout;

    use super::*;
    use crate::connector::BackendStream;

    /// Hands the device end of every backend connection to the test.
    pub(crate) struct FakeBackend {
        pub(crate) devices: mpsc::UnboundedSender<DuplexStream>,
    }

    impl BackendConnector for FakeBackend {
        fn connect(&self) -> BoxFuture<'_, adbwire_transport::Result<BackendConnection>> {
            Box::pin(async move {
                let (client, device) = tokio::io::duplex(4096);
                let _ = self.devices.send(device);
                Ok(Connection::from_stream(Box::new(client) as BackendStream))
            })
        }
    }

    pub(crate) async fn expect_request(device: &mut DuplexStream, service: &str) {
        let mut request = vec![0u8; 4 + service.len()];
        device.read_exact(&mut request).await.unwrap();
        assert_eq!(&request[4..], service.as_bytes());
    }

    struct Harness {
        inbound: mpsc::Sender<Packet>,
        outbound: mpsc::Receiver<Packet>,
        devices: mpsc::UnboundedReceiver<DuplexStream>,
        ended: mpsc::UnboundedReceiver<u32>,
        cancel: CancellationToken,
    }

    fn spawn_service(local_id: u32, remote_id: u32) -> Harness {
        let (outbound_tx, outbound) = mpsc::channel(16);
        let (devices_tx, devices) = mpsc::unbounded_channel();
        let (inbound, inbound_rx) = mpsc::channel(16);
        let (ended_tx, ended) = mpsc::unbounded_channel();
        let service = BridgeService::new(
            local_id,
            remote_id,
            4096,
            Arc::new(FakeBackend {
                devices: devices_tx,
            }),
            outbound_tx,
        );
        let cancel = CancellationToken::new();
        tokio::spawn(service.run(inbound_rx, ended_tx, cancel.clone()));
        Harness {
            inbound,
            outbound,
            devices,
            ended,
            cancel,
        }
    }

    async fn open(harness: &mut Harness, name: &str) -> DuplexStream {
        let payload = format!("{name}\0");
        harness
            .inbound
            .send(Packet::new(Command::Open, 77, 0, payload.into_bytes()))
            .await
            .unwrap();
        let mut device = harness.devices.recv().await.unwrap();
        expect_request(&mut device, name).await;
        device
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_write_is_in_flight() {
        let mut h = spawn_service(1, 77);
        let mut device = open(&mut h, "shell:cat").await;
        device.write_all(b"OKAY").await.unwrap();
        assert_eq!(
            h.outbound.recv().await.unwrap(),
            Packet::empty(Command::Okay, 1, 77)
        );

        device.write_all(b"first").await.unwrap();
        assert_eq!(
            h.outbound.recv().await.unwrap(),
            Packet::new(Command::Wrte, 1, 77, &b"first"[..])
        );

        device.write_all(b"second").await.unwrap();
        assert!(
            timeout(Duration::from_millis(50), h.outbound.recv())
                .await
                .is_err(),
            "second WRTE sent before OKAY"
        );

        h.inbound
            .send(Packet::empty(Command::Okay, 77, 1))
            .await
            .unwrap();
        assert_eq!(
            h.outbound.recv().await.unwrap(),
            Packet::new(Command::Wrte, 1, 77, &b"second"[..])
        );
    }

    #[tokio::test]
    async fn client_writes_are_relayed_and_acknowledged() {
        let mut h = spawn_service(3, 9);
        let mut device = open(&mut h, "shell:").await;
        device.write_all(b"OKAY").await.unwrap();
        h.outbound.recv().await.unwrap();

        h.inbound
            .send(Packet::new(Command::Wrte, 9, 3, &b"ls\n"[..]))
            .await
            .unwrap();
        let mut relayed = [0u8; 3];
        device.read_exact(&mut relayed).await.unwrap();
        assert_eq!(&relayed, b"ls\n");
        assert_eq!(
            h.outbound.recv().await.unwrap(),
            Packet::empty(Command::Okay, 3, 9)
        );
    }

    #[tokio::test]
    async fn client_close_ends_service_and_backend() {
        let mut h = spawn_service(4, 8);
        let mut device = open(&mut h, "shell:").await;
        device.write_all(b"OKAY").await.unwrap();
        h.outbound.recv().await.unwrap();

        h.inbound
            .send(Packet::empty(Command::Clse, 8, 4))
            .await
            .unwrap();
        assert_eq!(
            h.outbound.recv().await.unwrap(),
            Packet::empty(Command::Clse, 4, 8)
        );
        assert_eq!(h.ended.recv().await, Some(4));
        let mut rest = Vec::new();
        device.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn backend_end_closes_stream() {
        let mut h = spawn_service(5, 6);
        let mut device = open(&mut h, "shell:true").await;
        device.write_all(b"OKAY").await.unwrap();
        h.outbound.recv().await.unwrap();
        drop(device);

        assert_eq!(
            h.outbound.recv().await.unwrap(),
            Packet::empty(Command::Clse, 5, 6)
        );
        assert_eq!(h.ended.recv().await, Some(5));
    }

    #[tokio::test]
    async fn failed_open_closes_with_zero_id() {
        let mut h = spawn_service(2, 77);
        let mut device = open(&mut h, "bogus:").await;
        device.write_all(b"FAIL0007unknown").await.unwrap();

        assert_eq!(
            h.outbound.recv().await.unwrap(),
            Packet::empty(Command::Clse, 0, 77)
        );
        assert_eq!(h.ended.recv().await, Some(2));
    }

    #[tokio::test]
    async fn cancel_interrupts_open_waiting_on_backend() {
        let mut h = spawn_service(6, 12);
        // The device never answers the service request.
        let _device = open(&mut h, "shell:sleep").await;

        h.cancel.cancel();
        let closed = timeout(Duration::from_secs(5), h.outbound.recv())
            .await
            .expect("cancelled service should close");
        assert_eq!(closed, Some(Packet::empty(Command::Clse, 0, 12)));
        assert_eq!(h.ended.recv().await, Some(6));
    }

    #[tokio::test]
    async fn cancel_interrupts_blocked_backend_write() {
        let (outbound_tx, mut outbound) = mpsc::channel(16);
        let (devices_tx, mut devices) = mpsc::unbounded_channel();
        let (inbound, inbound_rx) = mpsc::channel(16);
        let (ended_tx, mut ended) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let connector = Arc::new(TinyPipeBackend {
            devices: devices_tx,
        });
        let service = BridgeService::new(7, 14, 4096, connector, outbound_tx);
        tokio::spawn(service.run(inbound_rx, ended_tx, cancel.clone()));

        inbound
            .send(Packet::new(Command::Open, 14, 0, &b"shell:\0"[..]))
            .await
            .unwrap();
        let mut device = devices.recv().await.unwrap();
        expect_request(&mut device, "shell:").await;
        device.write_all(b"OKAY").await.unwrap();
        assert_eq!(
            outbound.recv().await.unwrap(),
            Packet::empty(Command::Okay, 7, 14)
        );

        // More than the pipe holds; the device never reads it.
        inbound
            .send(Packet::new(Command::Wrte, 14, 7, vec![b'z'; 1024]))
            .await
            .unwrap();
        assert!(timeout(Duration::from_millis(50), outbound.recv())
            .await
            .is_err());

        cancel.cancel();
        let closed = timeout(Duration::from_secs(5), outbound.recv())
            .await
            .expect("cancelled service should close");
        assert_eq!(closed, Some(Packet::empty(Command::Clse, 7, 14)));
        assert_eq!(ended.recv().await, Some(7));
    }

    /// Like [`FakeBackend`], over a pipe too small for one client write.
    struct TinyPipeBackend {
        devices: mpsc::UnboundedSender<DuplexStream>,
    }

    impl BackendConnector for TinyPipeBackend {
        fn connect(&self) -> BoxFuture<'_, adbwire_transport::Result<BackendConnection>> {
            Box::pin(async move {
                let (client, device) = tokio::io::duplex(64);
                let _ = self.devices.send(device);
                Ok(Connection::from_stream(Box::new(client) as BackendStream))
            })
        }
    }

    fn bare_service() -> (BridgeService, mpsc::Receiver<Packet>) {
        let (outbound_tx, outbound) = mpsc::channel(16);
        let (devices, _) = mpsc::unbounded_channel();
        let service = BridgeService::new(1, 2, 4096, Arc::new(FakeBackend { devices }), outbound_tx);
        (service, outbound)
    }

    #[tokio::test]
    async fn stream_packets_before_open_are_premature() {
        let (mut service, _outbound) = bare_service();
        let err = service
            .handle(Packet::empty(Command::Okay, 2, 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::PrematurePacket {
                command: Command::Okay
            }
        ));
        let err = service
            .handle(Packet::new(Command::Wrte, 2, 1, &b"x"[..]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::PrematurePacket {
                command: Command::Wrte
            }
        ));
        assert!(!err.is_connection_fatal());
    }

    #[tokio::test]
    async fn open_after_end_is_late() {
        let (mut service, mut outbound) = bare_service();
        service.end().await;
        service.end().await;
        assert_eq!(
            outbound.recv().await.unwrap(),
            Packet::empty(Command::Clse, 0, 2)
        );
        assert!(outbound.try_recv().is_err());

        let err = service
            .handle(Packet::new(Command::Open, 2, 0, &b"shell:\0"[..]))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::LateTransport));
        assert_eq!(service.state(), ServiceState::Ended);
    }

    #[tokio::test]
    async fn pump_respects_the_window() {
        let (outbound_tx, mut outbound) = mpsc::channel(16);
        let (devices_tx, mut devices) = mpsc::unbounded_channel();
        let mut service = BridgeService::new(
            1,
            2,
            4,
            Arc::new(FakeBackend {
                devices: devices_tx,
            }),
            outbound_tx,
        );
        let opening = tokio::spawn(async move {
            service
                .handle(Packet::new(Command::Open, 2, 0, &b"shell:\0"[..]))
                .await
                .unwrap();
            service
        });
        let mut device = devices.recv().await.unwrap();
        expect_request(&mut device, "shell:").await;
        device.write_all(b"OKAYabcdefgh").await.unwrap();
        let mut service = opening.await.unwrap();
        outbound.recv().await.unwrap();

        assert!(service.pump().await.unwrap());
        assert!(service.needs_ack());
        assert!(!service.pump().await.unwrap());
        assert_eq!(
            outbound.recv().await.unwrap(),
            Packet::new(Command::Wrte, 1, 2, &b"abcd"[..])
        );

        service.handle(Packet::empty(Command::Okay, 2, 1)).await.unwrap();
        assert!(service.pump().await.unwrap());
        assert_eq!(
            outbound.recv().await.unwrap(),
            Packet::new(Command::Wrte, 1, 2, &b"efgh"[..])
        );
    }
}
