use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Outcome of one (chunk size, transport) trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    /// Chunk size in bytes
    pub mtu: usize,
    /// File size in bytes as reported by the peer
    pub size: u64,
    /// Elapsed seconds from announce to peer-side completion
    pub time: f64,
    /// Throughput in kilobits per second
    pub speed: f64,
    /// Send passes, the initial one included
    pub retries: u32,
    /// Whether the file went over the stream transport
    pub tcp: bool,
}

impl BenchmarkResult {
    /// One results-log line: space separated `key=value` pairs.
    pub fn to_log_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BenchmarkResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mtu={} size={} time={:.6} speed={:.3} retries={} tcp={}",
            self.mtu,
            self.size,
            self.time,
            self.speed,
            self.retries,
            u8::from(self.tcp)
        )
    }
}

/// Throughput in kilobits per second; zero when `elapsed_secs` is not positive.
///
/// # Examples
///
/// ```
/// use udpbench::results::throughput_kbps;
///
/// assert_eq!(throughput_kbps(125_000, 1.0), 1000.0);
/// ```
pub fn throughput_kbps(size_bytes: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 {
        size_bytes as f64 * 8.0 / 1000.0 / elapsed_secs
    } else {
        0.0
    }
}

/// Peer reply to `Stats?`: `filename,size,completed_at[,...]`.
///
/// `completed_at` is the peer's clock, in seconds since the Unix epoch, when
/// the last part arrived. Fields past the third are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsReply {
    pub filename: String,
    pub size: u64,
    pub completed_at: f64,
}

impl StatsReply {
    pub fn parse(line: &str) -> Result<Self> {
        let mut fields = line.split(',').map(str::trim);
        let (filename, size, completed_at) = match (fields.next(), fields.next(), fields.next()) {
            (Some(f), Some(s), Some(c)) => (f, s, c),
            _ => {
                return Err(Error::Protocol(format!(
                    "stats reply {:?} has fewer than 3 fields",
                    line
                )))
            }
        };

        let size = size
            .parse::<u64>()
            .map_err(|_| Error::Protocol(format!("invalid size {:?} in stats reply", size)))?;
        let completed_at = crate::clock::parse_timestamp(completed_at)?;

        Ok(Self {
            filename: filename.to_string(),
            size,
            completed_at,
        })
    }
}

/// Append-only results log, one line per trial.
pub struct ResultLog {
    path: PathBuf,
    file: File,
}

impl ResultLog {
    /// Opens `path` for appending, creating it if missing. Never truncates.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one line and flushes it to the file.
    pub async fn append(&mut self, result: &BenchmarkResult) -> Result<()> {
        let mut line = result.to_log_line();
        line.push('\n');
        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await?;
        Ok(())
    }
}
