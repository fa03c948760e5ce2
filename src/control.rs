//! Line-oriented control protocol.
//!
//! The control channel is a TCP stream of `\n`-terminated ASCII tokens. One
//! background task owns the read half and forwards every complete line, in
//! wire order, into a bounded queue. The driver owns the write half and the
//! queue's receiving end, and never reads the socket itself.
//!
//! # Protocol Flow
//!
//! 1. Client sends `Time?`, peer replies with its clock (optional)
//! 2. Client announces a trial with `Ready` or `Use TCP`
//! 3. Peer echoes `Ready` / `Use TCP` and the client sends the file
//! 4. Peer replies `Do another retransmission` until it has every part
//! 5. Peer replies `File received`
//! 6. Client sends `Stats?`, peer replies `filename,size,completed_at`

use crate::{Error, Result};
use bytes::{BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use log::{debug, error};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

/// Longest control line accepted before the channel is declared broken.
pub const MAX_LINE_LEN: usize = 4096;

/// Default capacity of the reader-to-driver queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

pub const READY: &str = "Ready";
pub const DO_RETRANSMIT: &str = "Do another retransmission";
pub const FILE_RECEIVED: &str = "File received";
pub const STATS_QUERY: &str = "Stats?";
pub const TIME_QUERY: &str = "Time?";
pub const USE_TCP: &str = "Use TCP";

/// Commands the peer sends to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCommand {
    /// Start (or restart) the send for the current trial
    Ready,
    /// Stream-mode counterpart of `Ready`
    UseTcp,
    /// Peer detected loss, resend everything
    Retransmit,
    /// Peer has the whole file
    FileReceived,
    /// Anything outside the vocabulary
    Other(String),
}

impl PeerCommand {
    pub fn parse(line: &str) -> Self {
        match line {
            READY => PeerCommand::Ready,
            USE_TCP => PeerCommand::UseTcp,
            DO_RETRANSMIT => PeerCommand::Retransmit,
            FILE_RECEIVED => PeerCommand::FileReceived,
            other => PeerCommand::Other(other.to_string()),
        }
    }
}

/// Commands the client sends to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    Ready,
    UseTcp,
    Stats,
    Time,
}

impl ClientCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientCommand::Ready => READY,
            ClientCommand::UseTcp => USE_TCP,
            ClientCommand::Stats => STATS_QUERY,
            ClientCommand::Time => TIME_QUERY,
        }
    }
}

/// Splits a byte stream on `\n` and appends `\n` to outgoing lines.
///
/// A trailing `\r` is stripped. End of stream, whether or not an unterminated
/// tail is buffered, decodes to [`Error::PeerExited`].
#[derive(Debug, Clone, Default)]
pub struct ControlLineCodec {
    // bytes of the buffer already searched for a newline
    scanned: usize,
}

impl ControlLineCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for ControlLineCodec {
    type Item = String;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>> {
        let newline = buf[self.scanned..].iter().position(|&b| b == b'\n');
        match newline {
            Some(offset) if self.scanned + offset > MAX_LINE_LEN => Err(Error::Protocol(format!(
                "control line exceeds {} bytes",
                MAX_LINE_LEN
            ))),
            Some(offset) => {
                let end = self.scanned + offset;
                self.scanned = 0;
                let line = buf.split_to(end + 1);
                let mut line = &line[..end];
                if let Some(stripped) = line.strip_suffix(b"\r") {
                    line = stripped;
                }
                Ok(Some(String::from_utf8_lossy(line).into_owned()))
            }
            None if buf.len() > MAX_LINE_LEN => Err(Error::Protocol(format!(
                "control line exceeds {} bytes",
                MAX_LINE_LEN
            ))),
            None => {
                self.scanned = buf.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>> {
        match self.decode(buf)? {
            Some(line) => Ok(Some(line)),
            None if buf.is_empty() => Ok(None),
            None => {
                debug!("Control stream ended mid-line ({} bytes dropped)", buf.len());
                Err(Error::PeerExited)
            }
        }
    }
}

impl Encoder<&str> for ControlLineCodec {
    type Error = Error;

    fn encode(&mut self, line: &str, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

/// Spawns the background reader for `reader`.
///
/// Lines are forwarded in arrival order. The first error, including a clean
/// end of stream, is forwarded as the final item and the task exits.
pub fn spawn_reader<R>(reader: R, capacity: usize) -> (mpsc::Receiver<Result<String>>, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity);
    let handle = tokio::spawn(async move {
        let mut lines = FramedRead::new(reader, ControlLineCodec::new());
        loop {
            let item = match lines.next().await {
                Some(Ok(line)) => {
                    debug!("Control <- {:?}", line);
                    Ok(line)
                }
                Some(Err(e)) => {
                    error!("Control channel read failed: {}", e);
                    Err(e)
                }
                None => {
                    debug!("Control channel closed by peer");
                    Err(Error::PeerExited)
                }
            };
            let last = item.is_err();
            if tx.send(item).await.is_err() || last {
                break;
            }
        }
    });
    (rx, handle)
}

/// Driver-side handle on the control channel: the write half plus the queue
/// fed by the background reader.
pub struct ControlChannel<W> {
    writer: FramedWrite<W, ControlLineCodec>,
    commands: mpsc::Receiver<Result<String>>,
    reader: JoinHandle<()>,
}

impl ControlChannel<tokio::net::tcp::OwnedWriteHalf> {
    /// Connects to the peer's control port and starts the reader task.
    pub async fn connect(addr: &str, capacity: usize) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(stream, capacity))
    }

    pub fn from_stream(stream: TcpStream, capacity: usize) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self::new(read_half, write_half, capacity)
    }
}

impl<W: AsyncWrite + Unpin> ControlChannel<W> {
    pub fn new<R>(reader: R, writer: W, capacity: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (commands, reader) = spawn_reader(reader, capacity);
        Self {
            writer: FramedWrite::new(writer, ControlLineCodec::new()),
            commands,
            reader,
        }
    }

    /// Writes one command line and flushes it.
    pub async fn send(&mut self, command: ClientCommand) -> Result<()> {
        self.send_line(command.as_str()).await
    }

    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        debug!("Control -> {:?}", line);
        self.writer.send(line).await
    }

    /// Blocks until the next line arrives. There is no timeout.
    pub async fn recv(&mut self) -> Result<String> {
        self.commands.recv().await.unwrap_or(Err(Error::PeerExited))
    }

    /// Next line, classified against the peer vocabulary.
    pub async fn recv_command(&mut self) -> Result<PeerCommand> {
        self.recv().await.map(|line| PeerCommand::parse(&line))
    }
}

impl<W> Drop for ControlChannel<W> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
