use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use adbwire_frame::{
    encode_sync_header, encode_sync_request, read_u32_le, FrameError, FrameReader, SyncCommand,
    CODE_SIZE, SYNC_DATA_MAX, SYNC_HEADER_SIZE,
};
use adbwire_transport::{Connection, ConnectionOptions};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::stats::{Entry, Stats, DENT_RECORD_SIZE, STAT_RECORD_SIZE, S_IFREG};
use crate::transfer::{PullTransfer, PushTransfer};

/// Permission bits used by `push` callers that have no better idea.
pub const DEFAULT_PUSH_MODE: u32 = 0o644;

/// Sync session tuning.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Largest `DATA` chunk sent by push. Default and maximum: 65536.
    pub chunk_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: SYNC_DATA_MAX,
        }
    }
}

impl SyncConfig {
    /// Set the push chunk size, clamped to `1..=65536`.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.clamp(1, SYNC_DATA_MAX);
        self
    }
}

/// A connection switched into sync mode.
///
/// Requests run strictly one after another: a running push or pull holds
/// the connection until the device finished answering it. A transfer that
/// fails mid-exchange ends the connection, since its framing can no longer
/// be trusted; later calls fail with [`SyncError::Ended`].
pub struct SyncSession<S = TcpStream> {
    conn: Arc<Mutex<Connection<S>>>,
    config: SyncConfig,
}

impl<S> Clone for SyncSession<S> {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            config: self.config.clone(),
        }
    }
}

impl SyncSession<TcpStream> {
    /// Connect to the host daemon, select a device and enter sync mode.
    pub async fn connect(options: &ConnectionOptions, serial: Option<&str>) -> Result<Self> {
        let mut conn = Connection::connect(options).await?;
        conn.open_transport(serial).await?;
        Self::start(conn).await
    }
}

impl<S> SyncSession<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Send `sync:` on a device-bound connection and wrap it.
    pub async fn start(mut conn: Connection<S>) -> Result<Self> {
        conn.request("sync:").await?;
        Ok(Self::new(conn))
    }

    /// Wrap a connection that is already in sync mode.
    pub fn new(conn: Connection<S>) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            config: SyncConfig::default(),
        }
    }

    /// Replace the session configuration.
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    async fn lock(&self) -> Result<OwnedMutexGuard<Connection<S>>> {
        let conn = Arc::clone(&self.conn).lock_owned().await;
        if conn.is_ended() {
            return Err(SyncError::Ended);
        }
        Ok(conn)
    }

    /// Metadata of `path`. A zero mode means the path does not exist.
    pub async fn stat(&self, path: &str) -> Result<Stats> {
        let mut conn = self.lock().await?;
        send_command(&mut conn, SyncCommand::Stat, path).await?;

        let reader = conn.reader_mut();
        read_reply(reader, &[SyncCommand::Stat]).await?;
        let record = reader.read_bytes(STAT_RECORD_SIZE).await?;
        let stats = Stats::from_record(&record);
        if stats.mode == 0 {
            return Err(SyncError::NotFound {
                path: path.to_string(),
            });
        }
        Ok(stats)
    }

    /// Entries of the directory `path`, without `.` and `..`.
    pub async fn readdir(&self, path: &str) -> Result<Vec<Entry>> {
        let mut conn = self.lock().await?;
        send_command(&mut conn, SyncCommand::List, path).await?;

        let reader = conn.reader_mut();
        let mut entries = Vec::new();
        loop {
            let reply = read_reply(reader, &[SyncCommand::Dent, SyncCommand::Done]).await?;
            let record = reader.read_bytes(DENT_RECORD_SIZE).await?;
            if reply == SyncCommand::Done {
                break;
            }
            let name_len = read_u32_le(&record, 12) as usize;
            let max = reader.config().max_value_length;
            if name_len > max {
                return Err(FrameError::PayloadTooLarge {
                    size: name_len,
                    max,
                }
                .into());
            }
            let raw = reader.read_bytes(name_len).await?;
            let name = String::from_utf8_lossy(&raw).into_owned();
            if name == "." || name == ".." {
                continue;
            }
            entries.push(Entry {
                name,
                stats: Stats::from_record(&record),
            });
        }
        debug!(path, entries = entries.len(), "listed directory");
        Ok(entries)
    }

    /// Stream `source` to `path` with permission bits `mode`.
    ///
    /// The regular-file type bit is added to `mode`.
    pub async fn push<R>(&self, source: R, path: &str, mode: u32) -> Result<PushTransfer>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let conn = self.lock().await?;
        let (progress_tx, progress_rx) = watch::channel(0u64);
        let cancel = CancellationToken::new();
        let exchange = PushExchange {
            target: format!("{path},{}", mode | S_IFREG),
            chunk_size: self.config.chunk_size,
            progress: progress_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(exchange.run(conn, source));
        Ok(PushTransfer::new(task, progress_rx, cancel))
    }

    /// Push an in-memory buffer.
    pub async fn push_bytes(
        &self,
        data: impl Into<Bytes>,
        path: &str,
        mode: u32,
    ) -> Result<PushTransfer> {
        self.push(std::io::Cursor::new(data.into()), path, mode)
            .await
    }

    /// Push a local file.
    pub async fn push_file(
        &self,
        local: impl AsRef<Path>,
        path: &str,
        mode: u32,
    ) -> Result<PushTransfer> {
        let file = tokio::fs::File::open(local.as_ref()).await?;
        self.push(file, path, mode).await
    }

    /// Start reading `path`. The returned transfer is an `AsyncRead`.
    pub async fn pull(&self, path: &str) -> Result<PullTransfer> {
        let conn = self.lock().await?;
        let (sink, stream) = tokio::io::duplex(self.config.chunk_size.max(SYNC_HEADER_SIZE));
        let (progress_tx, progress_rx) = watch::channel(0u64);
        let cancel = CancellationToken::new();
        let exchange = PullExchange {
            path: path.to_string(),
            progress: progress_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(exchange.run(conn, sink));
        Ok(PullTransfer::new(stream, task, progress_rx, cancel))
    }

    /// Pull `path` into `sink`. Returns the byte count.
    pub async fn pull_to<W>(&self, path: &str, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.pull(path).await?.copy_to(sink).await
    }

    /// Leave sync mode and close the connection. Calling it again does nothing.
    pub async fn end(&self) -> Result<()> {
        let mut conn = Arc::clone(&self.conn).lock_owned().await;
        if conn.is_ended() {
            return Ok(());
        }
        let mut quit = BytesMut::with_capacity(SYNC_HEADER_SIZE);
        encode_sync_header(SyncCommand::Quit, 0, &mut quit);
        let sent = conn.write(&quit).await;
        conn.end().await?;
        sent.map_err(Into::into)
    }
}

struct PushExchange {
    target: String,
    chunk_size: usize,
    progress: watch::Sender<u64>,
    cancel: CancellationToken,
}

impl PushExchange {
    async fn run<S, R>(self, mut conn: OwnedMutexGuard<Connection<S>>, source: R) -> Result<u64>
    where
        S: AsyncRead + AsyncWrite + Send,
        R: AsyncRead + Unpin,
    {
        let outcome = self.exchange(&mut conn, source).await;
        match &outcome {
            Ok(total) => debug!(target = %self.target, bytes = total, "push finished"),
            Err(err) => {
                warn!(target = %self.target, error = %err, "push failed, ending sync connection");
                let _ = conn.end().await;
            }
        }
        outcome
    }

    async fn exchange<S, R>(&self, conn: &mut Connection<S>, mut source: R) -> Result<u64>
    where
        S: AsyncRead + AsyncWrite,
        R: AsyncRead + Unpin,
    {
        send_command(conn, SyncCommand::Send, &self.target).await?;
        let (reader, writer) = conn.parts_mut();

        let write_half = async {
            let mut chunk = vec![0u8; self.chunk_size];
            let mut header = BytesMut::with_capacity(SYNC_HEADER_SIZE);
            let mut total = 0u64;
            loop {
                if self.cancel.is_cancelled() {
                    return Err(SyncError::Cancelled);
                }
                let n = source.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                header.clear();
                encode_sync_header(SyncCommand::Data, n as u32, &mut header);
                writer.write_all(&header).await?;
                writer.write_all(&chunk[..n]).await?;
                total += n as u64;
                self.progress.send_replace(total);
            }
            header.clear();
            encode_sync_header(SyncCommand::Done, unix_now(), &mut header);
            writer.write_all(&header).await?;
            writer.flush().await?;
            Ok::<u64, SyncError>(total)
        };

        // The device may answer FAIL before the writer is done.
        let read_half = async {
            read_reply(reader, &[SyncCommand::Okay]).await?;
            reader.read_bytes(4).await?;
            Ok::<(), SyncError>(())
        };

        let (total, ()) = tokio::try_join!(write_half, read_half)?;
        Ok(total)
    }
}

struct PullExchange {
    path: String,
    progress: watch::Sender<u64>,
    cancel: CancellationToken,
}

impl PullExchange {
    async fn run<S>(self, mut conn: OwnedMutexGuard<Connection<S>>, mut sink: DuplexStream) -> Result<u64>
    where
        S: AsyncRead + AsyncWrite + Send,
    {
        let outcome = self.exchange(&mut conn, &mut sink).await;
        drop(sink);
        match &outcome {
            Ok(total) => debug!(path = %self.path, bytes = total, "pull finished"),
            Err(err) => {
                warn!(path = %self.path, error = %err, "pull failed, ending sync connection");
                let _ = conn.end().await;
            }
        }
        outcome
    }

    async fn exchange<S>(&self, conn: &mut Connection<S>, sink: &mut DuplexStream) -> Result<u64>
    where
        S: AsyncRead + AsyncWrite,
    {
        send_command(conn, SyncCommand::Recv, &self.path).await?;
        let reader = conn.reader_mut();
        let mut total = 0u64;
        loop {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            match read_reply(reader, &[SyncCommand::Data, SyncCommand::Done]).await? {
                SyncCommand::Data => {
                    let len = read_length(reader).await?;
                    reader.read_byte_flow(len as usize, sink).await?;
                    total += u64::from(len);
                    self.progress.send_replace(total);
                }
                _ => {
                    read_length(reader).await?;
                    break;
                }
            }
        }
        sink.shutdown().await?;
        Ok(total)
    }
}

async fn send_command<S>(conn: &mut Connection<S>, command: SyncCommand, arg: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite,
{
    let mut buf = BytesMut::with_capacity(SYNC_HEADER_SIZE + arg.len());
    encode_sync_request(command, arg.as_bytes(), &mut buf)?;
    debug!(command = command.as_str(), arg, "sync request");
    conn.reader_mut()
        .set_last_request(format!("{} {arg}", command.as_str()));
    conn.write(&buf).await?;
    Ok(())
}

/// Read a reply tag that must be one of `expected`. `FAIL` carries a
/// little-endian length and the failure text.
async fn read_reply<R>(reader: &mut FrameReader<R>, expected: &[SyncCommand]) -> Result<SyncCommand>
where
    R: AsyncRead + Unpin,
{
    let code = reader.read_bytes(CODE_SIZE).await?;
    match SyncCommand::from_code(&code) {
        Some(command) if expected.contains(&command) => Ok(command),
        Some(SyncCommand::Fail) => {
            let len = read_length(reader).await?;
            let message = reader.read_bytes(len as usize).await?;
            Err(SyncError::Fail {
                message: String::from_utf8_lossy(&message).into_owned(),
            })
        }
        _ => Err(SyncError::UnexpectedReply {
            actual: String::from_utf8_lossy(&code).into_owned(),
            expected: expected
                .iter()
                .map(|command| format!("'{}'", command.as_str()))
                .collect::<Vec<_>>()
                .join(" or "),
        }),
    }
}

async fn read_length<R>(reader: &mut FrameReader<R>) -> Result<u32>
where
    R: AsyncRead + Unpin,
{
    let bytes = reader.read_bytes(4).await?;
    Ok(read_u32_le(&bytes, 0))
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::{DuplexStream, ReadBuf};

    use super::*;
    use crate::stats::{S_IFDIR, S_IFMT};

    #[derive(Debug, Clone)]
    struct FakeFile {
        mode: u32,
        mtime: u32,
        data: Vec<u8>,
    }

    #[derive(Debug, Default)]
    struct FakeFs {
        files: BTreeMap<String, FakeFile>,
        data_frames: usize,
    }

    type SharedFs = Arc<std::sync::Mutex<FakeFs>>;

    async fn read_header(io: &mut DuplexStream) -> Option<([u8; 4], u32)> {
        let mut header = [0u8; 8];
        io.read_exact(&mut header).await.ok()?;
        let mut tag = [0u8; 4];
        tag.copy_from_slice(&header[..4]);
        Some((tag, read_u32_le(&header, 4)))
    }

    async fn read_string(io: &mut DuplexStream, len: u32) -> Option<String> {
        let mut buf = vec![0u8; len as usize];
        io.read_exact(&mut buf).await.ok()?;
        Some(String::from_utf8(buf).unwrap())
    }

    fn record(tag: &[u8; 4], words: &[u32]) -> Vec<u8> {
        let mut out = tag.to_vec();
        for word in words {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// A device that keeps its files in memory.
    async fn serve(mut io: DuplexStream, fs: SharedFs) {
        while let Some((tag, len)) = read_header(&mut io).await {
            match &tag {
                b"STAT" => {
                    let Some(path) = read_string(&mut io, len).await else { return };
                    let found = fs.lock().unwrap().files.get(&path).cloned();
                    let words = match found {
                        Some(file) => [file.mode, file.data.len() as u32, file.mtime],
                        None => [0, 0, 0],
                    };
                    io.write_all(&record(b"STAT", &words)).await.unwrap();
                }
                b"LIST" => {
                    let Some(dir) = read_string(&mut io, len).await else { return };
                    let prefix = format!("{}/", dir.trim_end_matches('/'));
                    let mut out = Vec::new();
                    for name in [".", ".."] {
                        out.extend(record(b"DENT", &[S_IFDIR | 0o755, 0, 0, name.len() as u32]));
                        out.extend_from_slice(name.as_bytes());
                    }
                    for (path, file) in fs.lock().unwrap().files.iter() {
                        if let Some(name) = path.strip_prefix(&prefix) {
                            out.extend(record(
                                b"DENT",
                                &[file.mode, file.data.len() as u32, file.mtime, name.len() as u32],
                            ));
                            out.extend_from_slice(name.as_bytes());
                        }
                    }
                    out.extend(record(b"DONE", &[0, 0, 0, 0]));
                    io.write_all(&out).await.unwrap();
                }
                b"SEND" => {
                    let Some(target) = read_string(&mut io, len).await else { return };
                    let (path, mode) = target.rsplit_once(',').unwrap();
                    let mut data = Vec::new();
                    let mtime = loop {
                        let Some((tag, len)) = read_header(&mut io).await else { return };
                        match &tag {
                            b"DATA" => {
                                let mut chunk = vec![0u8; len as usize];
                                if io.read_exact(&mut chunk).await.is_err() {
                                    return;
                                }
                                data.extend_from_slice(&chunk);
                                fs.lock().unwrap().data_frames += 1;
                            }
                            b"DONE" => break len,
                            other => panic!("unexpected tag {other:?}"),
                        }
                    };
                    fs.lock().unwrap().files.insert(
                        path.to_string(),
                        FakeFile {
                            mode: mode.parse().unwrap(),
                            mtime,
                            data,
                        },
                    );
                    io.write_all(&record(b"OKAY", &[0])).await.unwrap();
                }
                b"RECV" => {
                    let Some(path) = read_string(&mut io, len).await else { return };
                    let found = fs.lock().unwrap().files.get(&path).cloned();
                    match found {
                        Some(file) => {
                            for chunk in file.data.chunks(SYNC_DATA_MAX) {
                                io.write_all(&record(b"DATA", &[chunk.len() as u32]))
                                    .await
                                    .unwrap();
                                io.write_all(chunk).await.unwrap();
                            }
                            io.write_all(&record(b"DONE", &[0])).await.unwrap();
                        }
                        None => {
                            let message = b"No such file or directory";
                            io.write_all(&record(b"FAIL", &[message.len() as u32]))
                                .await
                                .unwrap();
                            io.write_all(message).await.unwrap();
                        }
                    }
                }
                b"QUIT" => return,
                other => panic!("unexpected request {other:?}"),
            }
        }
    }

    fn session_with(config: SyncConfig) -> (SyncSession<DuplexStream>, SharedFs) {
        let (client, server) = tokio::io::duplex(4096);
        let fs = SharedFs::default();
        tokio::spawn(serve(server, Arc::clone(&fs)));
        let session = SyncSession::new(Connection::from_stream(client)).with_config(config);
        (session, fs)
    }

    fn session() -> (SyncSession<DuplexStream>, SharedFs) {
        session_with(SyncConfig::default())
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 253) as u8).collect()
    }

    #[tokio::test]
    async fn start_switches_connection_into_sync_mode() {
        let (client, mut server) = tokio::io::duplex(64);
        let peer = tokio::spawn(async move {
            let mut buf = [0u8; 9];
            server.read_exact(&mut buf).await.unwrap();
            server.write_all(b"OKAY").await.unwrap();
            buf
        });
        SyncSession::start(Connection::from_stream(client))
            .await
            .unwrap();
        assert_eq!(&peer.await.unwrap(), b"0005sync:");
    }

    #[tokio::test]
    async fn push_then_pull_roundtrips_across_chunk_boundary() {
        let (session, fs) = session();
        let data = pattern(2 * SYNC_DATA_MAX + 123);

        let pushed = session
            .push_bytes(data.clone(), "/sdcard/big.bin", DEFAULT_PUSH_MODE)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(pushed, data.len() as u64);
        {
            let fs = fs.lock().unwrap();
            let stored = &fs.files["/sdcard/big.bin"];
            assert_eq!(stored.mode, S_IFREG | 0o644);
            assert_eq!(fs.data_frames, 3);
        }

        let pulled = session
            .pull("/sdcard/big.bin")
            .await
            .unwrap()
            .read_all()
            .await
            .unwrap();
        assert_eq!(pulled.as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn push_sends_one_data_frame_per_chunk() {
        let (session, fs) = session_with(SyncConfig::default().with_chunk_size(1000));
        let transfer = session
            .push_bytes(pattern(2500), "/data/local/tmp/x", 0o600)
            .await
            .unwrap();
        let progress = transfer.progress();
        assert_eq!(transfer.wait().await.unwrap(), 2500);
        assert_eq!(*progress.borrow(), 2500);
        assert_eq!(fs.lock().unwrap().data_frames, 3);
    }

    #[tokio::test]
    async fn pulled_transfer_is_an_async_reader() {
        let (session, _fs) = session();
        let data = pattern(70_000);
        session
            .push_bytes(data.clone(), "/sdcard/r.bin", DEFAULT_PUSH_MODE)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        let mut out = Vec::new();
        let copied = session.pull_to("/sdcard/r.bin", &mut out).await.unwrap();
        assert_eq!(copied, 70_000);
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn readdir_skips_dot_entries() {
        let (session, _fs) = session();
        for name in ["a.txt", "b.txt"] {
            session
                .push_bytes(&b"hello"[..], &format!("/sdcard/{name}"), DEFAULT_PUSH_MODE)
                .await
                .unwrap()
                .wait()
                .await
                .unwrap();
        }

        let entries = session.readdir("/sdcard").await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a.txt", "b.txt"]);
        assert!(entries.iter().all(|e| e.stats.is_file() && e.stats.size == 5));
    }

    #[tokio::test]
    async fn readdir_rejects_oversized_entry_name() {
        let (client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let (_, len) = read_header(&mut server).await.unwrap();
            read_string(&mut server, len).await.unwrap();
            server
                .write_all(&record(b"DENT", &[S_IFREG | 0o644, 1, 0, u32::MAX]))
                .await
                .unwrap();
            let _ = tokio::io::copy(&mut server, &mut tokio::io::sink()).await;
        });
        let session = SyncSession::new(Connection::from_stream(client));
        let err = session.readdir("/sdcard").await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Frame(FrameError::PayloadTooLarge { size, .. }) if size == u32::MAX as usize
        ));
    }

    #[tokio::test]
    async fn stat_reports_existing_file() {
        let (session, _fs) = session();
        session
            .push_bytes(&b"abc"[..], "/sdcard/s", 0o640)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        let stats = session.stat("/sdcard/s").await.unwrap();
        assert_eq!(stats.mode & S_IFMT, S_IFREG);
        assert_eq!(stats.permissions(), 0o640);
        assert_eq!(stats.size, 3);
    }

    #[tokio::test]
    async fn stat_missing_is_not_found() {
        let (session, _fs) = session();
        let err = session.stat("/missing").await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound { ref path } if path == "/missing"));
        assert!(err.to_string().contains("/missing"));
    }

    #[tokio::test]
    async fn pull_missing_rejects_with_device_message() {
        let (session, _fs) = session();
        let err = session
            .pull("/nope")
            .await
            .unwrap()
            .read_all()
            .await
            .unwrap_err();
        assert!(
            matches!(err, SyncError::Fail { ref message } if message == "No such file or directory")
        );
    }

    #[tokio::test]
    async fn pull_failure_surfaces_through_async_read() {
        let (session, _fs) = session();
        let mut transfer = session.pull("/nope").await.unwrap();
        let mut out = Vec::new();
        let err = transfer.read_to_end(&mut out).await.unwrap_err();
        assert!(err.to_string().contains("No such file or directory"));
    }

    #[tokio::test]
    async fn device_fail_while_writer_streams_fails_push() {
        let (client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            let (_, len) = read_header(&mut server).await.unwrap();
            read_string(&mut server, len).await.unwrap();
            let message = b"Read-only file system";
            server
                .write_all(&record(b"FAIL", &[message.len() as u32]))
                .await
                .unwrap();
            server.write_all(message).await.unwrap();
            let _ = tokio::io::copy(&mut server, &mut tokio::io::sink()).await;
        });
        let session = SyncSession::new(Connection::from_stream(client));

        let err = session
            .push_bytes(pattern(1 << 20), "/system/x", DEFAULT_PUSH_MODE)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap_err();
        assert!(
            matches!(err, SyncError::Fail { ref message } if message == "Read-only file system")
        );
        assert!(matches!(
            session.stat("/system/x").await,
            Err(SyncError::Ended)
        ));
    }

    struct FailingSource {
        sent: bool,
    }

    impl AsyncRead for FailingSource {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.sent {
                return Poll::Ready(Err(io::Error::other("disk gone")));
            }
            self.sent = true;
            buf.put_slice(b"partial");
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn source_error_while_reader_waits_fails_push() {
        let (session, fs) = session();
        let err = session
            .push(FailingSource { sent: false }, "/sdcard/p", DEFAULT_PUSH_MODE)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Io(ref io) if io.to_string() == "disk gone"));
        assert!(!fs.lock().unwrap().files.contains_key("/sdcard/p"));
    }

    #[tokio::test]
    async fn cancelled_push_stops_between_chunks() {
        let (session, _fs) = session();
        let transfer = session
            .push(tokio::io::repeat(0x5a), "/sdcard/endless", DEFAULT_PUSH_MODE)
            .await
            .unwrap();
        transfer.cancel();
        assert!(transfer.cancellation().is_cancelled());
        assert!(matches!(transfer.wait().await, Err(SyncError::Cancelled)));
    }

    #[tokio::test]
    async fn session_is_unusable_after_end() {
        let (session, _fs) = session();
        session.end().await.unwrap();
        session.end().await.unwrap();
        assert!(matches!(session.stat("/").await, Err(SyncError::Ended)));
        assert!(matches!(
            session.push_bytes(&b"x"[..], "/x", 0o644).await,
            Err(SyncError::Ended)
        ));
    }
}
