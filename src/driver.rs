//! Benchmark driver: runs every trial of a [`Config`] against the peer.
//!
//! Each trial walks a small state machine:
//!
//! ```text
//! Announce ──> AwaitOutcome ──(Ready | Use TCP | Do another retransmission)──> Sending
//!                   ^  │                                                         │
//!                   │  └──(File received)──> Record ──> next trial               │
//!                   └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every send pass counts as one attempt, the first included, so a peer that
//! asks for two retransmissions produces `retries == 3`.

use crate::clock::{self, unix_now, ClockOffset};
use crate::config::{Config, Protocol, Trial};
use crate::control::{ClientCommand, ControlChannel, PeerCommand};
use crate::frame::predicted_len;
use crate::results::{throughput_kbps, BenchmarkResult, ResultLog, StatsReply};
use crate::sender::{send_datagram_pass, send_stream_pass, DatagramSink, PassReport};
use crate::{Error, Result};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpStream, UdpSocket};

/// Progress events reported while the driver runs.
#[derive(Debug, Clone)]
pub enum DriverEvent {
    /// The trial was announced to the peer
    TrialStarted { trial: Trial },
    /// One send pass finished. `report` is `None` for stream passes
    PassSent {
        trial: Trial,
        attempt: u32,
        report: Option<PassReport>,
    },
    /// The trial produced its result
    TrialCompleted(BenchmarkResult),
    /// A fatal error ended the run
    Error(String),
}

/// Callback trait for driver progress.
///
/// Implemented for any `Fn(DriverEvent) + Send + Sync` closure.
///
/// ```
/// use udpbench::{DriverCallback, DriverEvent};
///
/// struct Printer;
///
/// impl DriverCallback for Printer {
///     fn on_event(&self, event: DriverEvent) {
///         println!("{:?}", event);
///     }
/// }
/// ```
pub trait DriverCallback: Send + Sync {
    fn on_event(&self, event: DriverEvent);
}

impl<F> DriverCallback for F
where
    F: Fn(DriverEvent) + Send + Sync,
{
    fn on_event(&self, event: DriverEvent) {
        self(event)
    }
}

type CallbackRef = Arc<dyn DriverCallback>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Announce,
    AwaitOutcome,
    Sending,
    Record,
}

/// Mutable state of the trial in progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialState {
    pub trial: Trial,
    /// Send passes so far
    pub retries: u32,
    /// Local Unix time at which the trial was announced
    pub started_at: f64,
}

impl TrialState {
    fn new(trial: Trial) -> Self {
        Self {
            trial,
            retries: 0,
            started_at: 0.0,
        }
    }
}

/// Drives trials over a control channel and a data-plane sink.
pub struct Driver<W, S> {
    config: Config,
    control: ControlChannel<W>,
    datagram: S,
    stream_addr: String,
    filename: String,
    data: Vec<u8>,
    offset: ClockOffset,
    results: Option<ResultLog>,
    callback: Option<CallbackRef>,
}

impl Driver<OwnedWriteHalf, UdpSocket> {
    /// Validates `config`, reads the file, and opens every transport.
    pub async fn connect(config: Config) -> Result<Self> {
        config.validate()?;

        let path = config
            .file
            .as_ref()
            .ok_or_else(|| Error::Config("A file to send is required".to_string()))?;
        let data = tokio::fs::read(path).await?;
        let filename = config.transfer_name()?;
        info!("Loaded {} ({} bytes) as {:?}", path.display(), data.len(), filename);

        let control_addr = config.control_addr()?;
        info!("Connecting control channel to {}", control_addr);
        let control = ControlChannel::connect(&control_addr, config.queue_capacity).await?;

        let data_addr = config.data_addr()?;
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(&data_addr).await?;
        info!("Data plane {} -> {}", socket.local_addr()?, data_addr);

        let results = ResultLog::open(&config.results_path).await?;
        info!("Appending results to {}", results.path().display());

        Ok(Self::from_parts(config, control, socket, data_addr, filename, data).with_result_log(results))
    }
}

impl<W: AsyncWrite + Unpin, S: DatagramSink> Driver<W, S> {
    /// Assembles a driver from already-open transports.
    ///
    /// `stream_addr` is dialled once per stream-mode pass.
    pub fn from_parts(
        config: Config,
        control: ControlChannel<W>,
        datagram: S,
        stream_addr: String,
        filename: String,
        data: Vec<u8>,
    ) -> Self {
        Self {
            config,
            control,
            datagram,
            stream_addr,
            filename,
            data,
            offset: ClockOffset::zero(),
            results: None,
            callback: None,
        }
    }

    pub fn with_result_log(mut self, log: ResultLog) -> Self {
        self.results = Some(log);
        self
    }

    pub fn with_callback<C: DriverCallback + 'static>(mut self, callback: C) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Uses a known clock offset instead of measuring one.
    pub fn with_offset(mut self, offset: ClockOffset) -> Self {
        self.offset = offset;
        self
    }

    pub fn offset(&self) -> ClockOffset {
        self.offset
    }

    fn notify(&self, event: DriverEvent) {
        if let Some(callback) = &self.callback {
            callback.on_event(event);
        }
    }

    /// Runs the clock exchange (if enabled) and then every trial in order.
    pub async fn run(&mut self) -> Result<Vec<BenchmarkResult>> {
        match self.run_all().await {
            Ok(results) => Ok(results),
            Err(e) => {
                self.notify(DriverEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn run_all(&mut self) -> Result<Vec<BenchmarkResult>> {
        if self.config.clock_sync {
            self.offset = clock::estimate(&mut self.control).await?;
        }

        let trials = self.config.trials();
        let mut results = Vec::with_capacity(trials.len());
        for trial in trials {
            results.push(self.run_trial(trial).await?);
        }
        info!("Benchmark finished: {} trials", results.len());
        Ok(results)
    }

    /// Runs a single trial to completion.
    pub async fn run_trial(&mut self, trial: Trial) -> Result<BenchmarkResult> {
        if trial.protocol == Protocol::Udp && predicted_len(trial.chunk_size) > self.config.mtu {
            warn!(
                "May be outside of MTU limit: {}-byte frames for chunk size {} (MTU {})",
                predicted_len(trial.chunk_size),
                trial.chunk_size,
                self.config.mtu
            );
        }

        let mut state = TrialState::new(trial);
        let mut phase = Phase::Announce;
        loop {
            phase = match phase {
                Phase::Announce => {
                    let announce = match trial.protocol {
                        Protocol::Udp => ClientCommand::Ready,
                        Protocol::Tcp => ClientCommand::UseTcp,
                    };
                    self.control.send(announce).await?;
                    state.started_at = unix_now();
                    info!(
                        "Trial {:?} chunk={} cycle={}",
                        trial.protocol, trial.chunk_size, trial.cycle
                    );
                    self.notify(DriverEvent::TrialStarted { trial });
                    Phase::AwaitOutcome
                }
                Phase::AwaitOutcome => match self.control.recv_command().await? {
                    PeerCommand::Ready | PeerCommand::UseTcp | PeerCommand::Retransmit => {
                        state.retries += 1;
                        Phase::Sending
                    }
                    PeerCommand::FileReceived => Phase::Record,
                    PeerCommand::Other(line) => {
                        warn!("Ignoring unexpected control line {:?}", line);
                        Phase::AwaitOutcome
                    }
                },
                Phase::Sending => {
                    self.send_pass(&state).await?;
                    Phase::AwaitOutcome
                }
                Phase::Record => return self.record(state).await,
            };
        }
    }

    async fn send_pass(&self, state: &TrialState) -> Result<()> {
        let trial = state.trial;
        let report = match trial.protocol {
            Protocol::Udp => Some(
                send_datagram_pass(&self.datagram, &self.filename, &self.data, trial.chunk_size)
                    .await?,
            ),
            Protocol::Tcp => {
                let mut stream = TcpStream::connect(&self.stream_addr).await?;
                send_stream_pass(&mut stream, &self.data).await?;
                None
            }
        };
        debug!("Attempt {} sent", state.retries);
        self.notify(DriverEvent::PassSent {
            trial,
            attempt: state.retries,
            report,
        });
        Ok(())
    }

    async fn record(&mut self, state: TrialState) -> Result<BenchmarkResult> {
        self.control.send(ClientCommand::Stats).await?;
        let stats = StatsReply::parse(&self.control.recv().await?)?;

        if stats.filename != self.filename {
            warn!(
                "Peer reported file {:?}, expected {:?}",
                stats.filename, self.filename
            );
        }
        if stats.size != self.data.len() as u64 {
            warn!(
                "Peer reported {} bytes, file has {}",
                stats.size,
                self.data.len()
            );
        }

        let elapsed = self.offset.to_local(stats.completed_at) - state.started_at;
        if elapsed <= 0.0 {
            warn!(
                "Non-positive elapsed time {:.6} s, clock offset may be wrong",
                elapsed
            );
        }

        let result = BenchmarkResult {
            mtu: state.trial.chunk_size,
            size: stats.size,
            time: elapsed,
            speed: throughput_kbps(stats.size, elapsed),
            retries: state.retries,
            tcp: state.trial.protocol.is_stream(),
        };

        if let Some(log) = self.results.as_mut() {
            log.append(&result).await?;
        }
        if self.config.json {
            println!("{}", serde_json::to_string(&result)?);
        } else {
            println!("{}", result);
        }
        self.notify(DriverEvent::TrialCompleted(result.clone()));
        Ok(result)
    }
}
