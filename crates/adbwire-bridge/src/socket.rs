use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::auth::AdbPublicKey;
use crate::codec::PacketCodec;
use crate::config::BridgeContext;
use crate::counter::RollingCounter;
use crate::error::{BridgeError, Result};
use crate::packet::{AuthType, Command, Packet, A_VERSION, MAX_NEGOTIATED_PAYLOAD, TOKEN_SIZE};
use crate::properties::device_identity;
use crate::service::BridgeService;

const OUTBOUND_QUEUE: usize = 64;
const SERVICE_QUEUE: usize = 32;

/// Authentication progress of one physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    New,
    IssuedChallenge,
    HaveSignature,
    Authorized,
}

/// Device-side state of one physical client connection.
///
/// Inbound packets are decoded by [`BridgeSocket::serve`] and applied in
/// order. Outbound packets from the socket and its services go through one
/// channel to a single writer task.
pub struct BridgeSocket {
    context: BridgeContext,
    state: AuthState,
    version: u32,
    max_payload: u32,
    token: [u8; TOKEN_SIZE],
    signature: Option<Bytes>,
    local_ids: RollingCounter,
    sync_acks: RollingCounter,
    services: HashMap<u32, ServiceHandle>,
    outbound: mpsc::Sender<Packet>,
    ended: mpsc::UnboundedSender<u32>,
    cancel: CancellationToken,
}

/// The socket's end of one running service.
struct ServiceHandle {
    inbound: mpsc::Sender<Packet>,
    cancel: CancellationToken,
}

impl BridgeSocket {
    pub fn new(
        context: BridgeContext,
        outbound: mpsc::Sender<Packet>,
        ended: mpsc::UnboundedSender<u32>,
    ) -> Self {
        Self {
            context,
            state: AuthState::New,
            version: 0,
            max_payload: MAX_NEGOTIATED_PAYLOAD,
            token: [0; TOKEN_SIZE],
            signature: None,
            local_ids: RollingCounter::new(),
            sync_acks: RollingCounter::new(),
            services: HashMap::new(),
            outbound,
            ended,
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Peer protocol version from its `CNXN`.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Negotiated max payload, at most 65535.
    pub fn max_payload(&self) -> u32 {
        self.max_payload
    }

    /// Number of live services.
    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Serve one physical connection until the client leaves, `shutdown`
    /// fires, or a connection-fatal error occurs.
    pub async fn serve<S>(stream: S, context: BridgeContext, shutdown: CancellationToken) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut packets = FramedRead::new(read_half, PacketCodec::new(context.max_packet_payload));
        let sink = FramedWrite::new(write_half, PacketCodec::new(context.max_packet_payload));

        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let writer = tokio::spawn(write_packets(sink, outbound_rx));
        let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();
        let mut socket = BridgeSocket::new(context, outbound, ended_tx);

        let outcome = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                Some(local_id) = ended_rx.recv() => socket.forget(local_id),
                packet = packets.next() => match packet {
                    Some(Ok(packet)) => {
                        if let Err(err) = socket.handle(packet).await {
                            break Err(err);
                        }
                    }
                    Some(Err(err)) => break Err(err),
                    None => break Ok(()),
                },
            }
        };

        debug!(services = socket.service_count(), "closing bridge connection");
        // Dropping the socket cancels every service; the writer stops once
        // the last one has sent its CLSE.
        drop(socket);
        drop(packets);
        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(error = %err, "bridge writer stopped"),
            Err(err) => warn!(error = %err, "bridge writer task failed"),
        }
        outcome
    }

    /// Apply one inbound packet.
    pub async fn handle(&mut self, packet: Packet) -> Result<()> {
        trace!(?packet, "received");
        match packet.command {
            Command::Cnxn => self.on_connect(packet).await,
            Command::Auth => self.on_auth(packet).await,
            command if self.state != AuthState::Authorized => {
                Err(BridgeError::Unauthorized { command })
            }
            Command::Sync => {
                let ack = self.sync_acks.next_id();
                self.send(Packet::empty(Command::Sync, 1, ack)).await
            }
            Command::Open => self.on_open(packet),
            Command::Okay | Command::Wrte | Command::Clse => self.forward(packet),
        }
    }

    async fn on_connect(&mut self, packet: Packet) -> Result<()> {
        if !self.services.is_empty() {
            debug!(services = self.services.len(), "client reconnected, closing services");
            self.close_services();
        }
        self.version = packet.arg0;
        self.max_payload = packet.arg1.clamp(1, MAX_NEGOTIATED_PAYLOAD);
        self.token = rand::random();
        self.signature = None;
        self.state = AuthState::IssuedChallenge;
        debug!(
            version = format_args!("{:#010x}", self.version),
            max_payload = self.max_payload,
            "client connected, issuing challenge"
        );
        self.send_token().await
    }

    async fn on_auth(&mut self, packet: Packet) -> Result<()> {
        if self.state == AuthState::New {
            return Err(BridgeError::auth("AUTH received before CNXN"));
        }
        match AuthType::from_u32(packet.arg0) {
            Some(AuthType::Signature) => {
                if self.signature.is_none() {
                    self.signature = Some(packet.payload);
                }
                if self.state == AuthState::IssuedChallenge {
                    self.state = AuthState::HaveSignature;
                }
                // Real clients answer a repeated challenge with their key.
                self.send_token().await
            }
            Some(AuthType::RsaPublicKey) => self.on_public_key(packet).await,
            _ => Err(BridgeError::auth(format!(
                "unexpected AUTH type {}",
                packet.arg0
            ))),
        }
    }

    async fn on_public_key(&mut self, packet: Packet) -> Result<()> {
        let Some(signature) = self.signature.clone() else {
            return Err(BridgeError::auth("public key sent before signature"));
        };
        let key = AdbPublicKey::parse(&packet.payload)?;
        if !key.verify(&self.token, &signature) {
            return Err(BridgeError::auth("signature mismatch"));
        }
        if let Some(authorizer) = &self.context.authorizer {
            if !authorizer.authorize(&key).await {
                return Err(BridgeError::auth("key rejected by authorizer"));
            }
        }

        let properties = self.context.properties.properties().await?;
        let identity = device_identity(&properties);
        self.state = AuthState::Authorized;
        info!(
            key = key.comment().unwrap_or("<no comment>"),
            bits = key.bits(),
            "client authorized"
        );
        self.send(Packet::new(
            Command::Cnxn,
            A_VERSION,
            self.max_payload,
            identity.into_bytes(),
        ))
        .await
    }

    fn on_open(&mut self, packet: Packet) -> Result<()> {
        let local_id = self.local_ids.next_id();
        let remote_id = packet.arg0;
        let (inbound, inbound_rx) = mpsc::channel(SERVICE_QUEUE);
        let cancel = self.cancel.child_token();
        let service = BridgeService::new(
            local_id,
            remote_id,
            self.max_payload as usize,
            self.context.connector.clone(),
            self.outbound.clone(),
        );
        tokio::spawn(service.run(inbound_rx, self.ended.clone(), cancel.clone()));
        debug!(local_id, remote_id, "service registered");
        self.services.insert(local_id, ServiceHandle { inbound, cancel });
        self.deliver(local_id, packet);
        Ok(())
    }

    fn forward(&mut self, packet: Packet) -> Result<()> {
        let local_id = packet.arg1;
        if !self.services.contains_key(&local_id) {
            warn!(
                local_id,
                command = %packet.command,
                "packet for unknown service, dropping"
            );
            return Ok(());
        }
        self.deliver(local_id, packet);
        Ok(())
    }

    /// Queue `packet` for a service without waiting on it. A service whose
    /// queue is full is not keeping up with its client and is closed.
    fn deliver(&mut self, local_id: u32, packet: Packet) {
        let Some(service) = self.services.get(&local_id) else {
            return;
        };
        match service.inbound.try_send(packet) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(packet)) => {
                warn!(
                    local_id,
                    command = %packet.command,
                    "service queue full, closing service"
                );
                service.cancel.cancel();
                self.forget(local_id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => self.forget(local_id),
        }
    }

    fn forget(&mut self, local_id: u32) {
        if self.services.remove(&local_id).is_some() {
            debug!(local_id, "service removed");
        }
    }

    fn close_services(&mut self) {
        for (_, service) in self.services.drain() {
            service.cancel.cancel();
        }
    }

    async fn send_token(&self) -> Result<()> {
        self.send(Packet::new(
            Command::Auth,
            AuthType::Token as u32,
            0,
            Bytes::copy_from_slice(&self.token),
        ))
        .await
    }

    async fn send(&self, packet: Packet) -> Result<()> {
        self.outbound
            .send(packet)
            .await
            .map_err(|_| BridgeError::Closed)
    }
}

impl fmt::Debug for BridgeSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeSocket")
            .field("state", &self.state)
            .field("version", &self.version)
            .field("max_payload", &self.max_payload)
            .field("token", &format_args!("<redacted:{TOKEN_SIZE} bytes>"))
            .field(
                "signature",
                &self
                    .signature
                    .as_ref()
                    .map(|s| format!("<redacted:{} bytes>", s.len())),
            )
            .field("services", &self.services.len())
            .finish()
    }
}

impl Drop for BridgeSocket {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn write_packets<W>(
    mut sink: FramedWrite<W, PacketCodec>,
    mut outbound: mpsc::Receiver<Packet>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(packet) = outbound.recv().await {
        trace!(?packet, "sending");
        sink.send(packet).await?;
    }
    sink.close().await
}
