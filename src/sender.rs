use crate::frame::encode_raw;
use crate::schedule::{part_count, part_range, schedule_order};
use crate::Result;
use log::{debug, warn};
use std::future::Future;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;

/// Destination for data-plane datagrams.
///
/// Implemented for a connected [`UdpSocket`]; tests substitute their own sinks
/// to inject write failures.
pub trait DatagramSink {
    /// Sends one datagram, returning the number of bytes written.
    fn send_datagram(&self, datagram: &[u8]) -> impl Future<Output = io::Result<usize>> + Send;
}

impl DatagramSink for UdpSocket {
    fn send_datagram(&self, datagram: &[u8]) -> impl Future<Output = io::Result<usize>> + Send {
        self.send(datagram)
    }
}

/// Outcome of one datagram send pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Parts in this pass
    pub parts: u64,
    /// Datagrams handed to the transport
    pub sent: u64,
    /// Datagrams whose write failed (logged, not retried)
    pub failed: u64,
    /// Frame bytes written, headers included
    pub bytes: u64,
}

/// Sends every part of `data` once, in a fresh random order.
///
/// Individual write failures are logged and counted; the pass moves on to the
/// next part. A framing error aborts the pass.
pub async fn send_datagram_pass<S: DatagramSink>(
    sink: &S,
    filename: &str,
    data: &[u8],
    chunk_size: usize,
) -> Result<PassReport> {
    let count = part_count(data.len() as u64, chunk_size as u64);
    let mut report = PassReport {
        parts: count,
        ..Default::default()
    };
    let mut frame = Vec::new();

    for index in schedule_order(count) {
        let payload = &data[part_range(index, chunk_size, data.len())];
        encode_raw(filename, index, count, payload, &mut frame)?;

        match sink.send_datagram(&frame).await {
            Ok(n) => {
                report.sent += 1;
                report.bytes += n as u64;
            }
            Err(e) => {
                warn!("Error sending part {}/{}: {}", index, count, e);
                report.failed += 1;
            }
        }
    }

    debug!(
        "Datagram pass: {} parts, {} sent, {} failed, {} bytes",
        report.parts, report.sent, report.failed, report.bytes
    );
    Ok(report)
}

/// Writes the whole file over a reliable stream and closes the write side.
///
/// Any failure here means the connection is broken and is returned as fatal.
pub async fn send_stream_pass<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> Result<()> {
    writer.write_all(data).await?;
    writer.flush().await?;
    writer.shutdown().await?;
    debug!("Stream pass: {} bytes", data.len());
    Ok(())
}
