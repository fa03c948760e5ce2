//! Two-point clock offset estimation.
//!
//! The client brackets one `Time?` request between two local timestamps and
//! assumes the peer composed its reply at the midpoint:
//!
//! ```text
//! offset = (t1 + (t3 - t1) / 2) - t2
//! ```
//!
//! Adding the offset to a peer timestamp expresses it on the local clock.

use crate::control::{ClientCommand, ControlChannel};
use crate::{Error, Result};
use log::info;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWrite;

/// Local clock minus remote clock, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClockOffset {
    seconds: f64,
}

impl ClockOffset {
    /// No skew, used when clock sync is disabled.
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn from_seconds(seconds: f64) -> Self {
        Self { seconds }
    }

    /// Offset from a probe sent at local `t1`, answered with remote `t2`, and
    /// received at local `t3`.
    ///
    /// # Examples
    ///
    /// ```
    /// use udpbench::clock::ClockOffset;
    ///
    /// let offset = ClockOffset::from_probe(100.0, 50.05, 100.2);
    /// assert!((offset.seconds() - 50.05).abs() < 1e-9);
    /// ```
    pub fn from_probe(t1: f64, t2: f64, t3: f64) -> Self {
        Self {
            seconds: (t1 + (t3 - t1) / 2.0) - t2,
        }
    }

    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    /// Converts a peer timestamp to local clock terms.
    pub fn to_local(&self, remote_timestamp: f64) -> f64 {
        remote_timestamp + self.seconds
    }
}

/// Current wall-clock time in seconds since the Unix epoch.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Parses a peer timestamp: decimal seconds since the Unix epoch.
pub fn parse_timestamp(text: &str) -> Result<f64> {
    let text = text.trim();
    text.parse::<f64>()
        .ok()
        .filter(|t| t.is_finite())
        .ok_or_else(|| Error::Protocol(format!("invalid timestamp {:?}", text)))
}

/// Runs one `Time?` exchange over the control channel.
///
/// Must run while no other reply is outstanding, since the answer is taken
/// from the shared command queue.
pub async fn estimate<W: AsyncWrite + Unpin>(control: &mut ControlChannel<W>) -> Result<ClockOffset> {
    let t1 = unix_now();
    control.send(ClientCommand::Time).await?;
    let reply = control.recv().await?;
    let t3 = unix_now();
    let t2 = parse_timestamp(&reply)?;

    let offset = ClockOffset::from_probe(t1, t2, t3);
    info!(
        "Clock offset {:+.6} s (round trip {:.3} ms)",
        offset.seconds(),
        (t3 - t1) * 1000.0
    );
    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[test]
    fn test_offset_formula() {
        let offset = ClockOffset::from_probe(100.000, 50.050, 100.200);
        let expected = (100.000 + (100.200 - 100.000) / 2.0) - 50.050;
        assert_eq!(offset.seconds(), expected);
        assert!((offset.seconds() - 50.05).abs() < 1e-9);
    }

    #[test]
    fn test_to_local() {
        let offset = ClockOffset::from_seconds(-2.5);
        assert_eq!(offset.to_local(1000.0), 997.5);
        assert_eq!(ClockOffset::zero().to_local(12.25), 12.25);
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("1700000000.125").unwrap(), 1_700_000_000.125);
        assert_eq!(parse_timestamp(" 42 ").unwrap(), 42.0);
        assert!(matches!(parse_timestamp("noon"), Err(Error::Protocol(_))));
        assert!(matches!(parse_timestamp("inf"), Err(Error::Protocol(_))));
        assert!(matches!(parse_timestamp(""), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_unix_now_is_recent() {
        // 2020-01-01
        assert!(unix_now() > 1_577_836_800.0);
    }

    #[tokio::test]
    async fn test_estimate_against_skewed_peer() {
        let (client_read, mut peer_write) = tokio::io::duplex(256);
        let (peer_read, client_write) = tokio::io::duplex(256);
        let mut control = ControlChannel::new(client_read, client_write, 4);

        // peer clock runs 1000 s behind
        let peer = tokio::spawn(async move {
            let mut lines = BufReader::new(peer_read).lines();
            let request = lines.next_line().await.unwrap().unwrap();
            assert_eq!(request, "Time?");
            let reply = format!("{:.6}\n", unix_now() - 1000.0);
            peer_write.write_all(reply.as_bytes()).await.unwrap();
        });

        let offset = estimate(&mut control).await.unwrap();
        peer.await.unwrap();
        assert!((offset.seconds() - 1000.0).abs() < 1.0);
    }

    #[tokio::test]
    async fn test_estimate_rejects_garbage() {
        let (client_read, mut peer_write) = tokio::io::duplex(256);
        let (_peer_read, client_write) = tokio::io::duplex(256);
        let mut control = ControlChannel::new(client_read, client_write, 4);

        peer_write.write_all(b"Ready\n").await.unwrap();
        assert!(matches!(
            estimate(&mut control).await,
            Err(Error::Protocol(_))
        ));
    }
}
