use crate::control::DEFAULT_QUEUE_CAPACITY;
use crate::frame::MAX_FILENAME_LEN;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Chunk sizes used when the user asks for `all`.
///
/// 1423 fills a 1460-byte segment exactly once the 37-byte frame header is added.
pub const ALL_CHUNK_SIZES: [usize; 6] = [256, 512, 1024, 1050, 1400, 1423];

/// Default chunk size when no `--sizes` are given.
pub const DEFAULT_CHUNK_SIZE: usize = 1050;

/// Datagram size above which the driver warns about fragmentation.
pub const DEFAULT_MTU: usize = 1460;

/// Transport used for the data plane of a trial.
///
/// # Examples
///
/// ```
/// use udpbench::Protocol;
///
/// assert!(Protocol::Tcp.is_stream());
/// assert!(!Protocol::Udp.is_stream());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    /// One datagram per chunk, randomized order, peer-driven resend
    Udp,
    /// The whole file in one write over a reliable stream
    Tcp,
}

impl Protocol {
    pub fn is_stream(&self) -> bool {
        matches!(self, Protocol::Tcp)
    }
}

/// Chunk sizes to benchmark: an explicit list or the built-in ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkSelector {
    All,
    Sizes(Vec<usize>),
}

impl ChunkSelector {
    pub fn sizes(&self) -> Vec<usize> {
        match self {
            ChunkSelector::All => ALL_CHUNK_SIZES.to_vec(),
            ChunkSelector::Sizes(sizes) => sizes.clone(),
        }
    }
}

impl FromStr for ChunkSelector {
    type Err = Error;

    /// Parses `all` or a comma separated list of positive sizes.
    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(ChunkSelector::All);
        }
        let sizes = s
            .split(',')
            .map(|part| {
                let part = part.trim();
                match part.parse::<usize>() {
                    Ok(size) if size > 0 => Ok(size),
                    _ => Err(Error::Config(format!("invalid chunk size {:?}", part))),
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ChunkSelector::Sizes(sizes))
    }
}

/// Which transports each chunk size is benchmarked over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportSelector {
    Udp,
    Tcp,
    Both,
}

impl TransportSelector {
    pub fn protocols(&self) -> Vec<Protocol> {
        match self {
            TransportSelector::Udp => vec![Protocol::Udp],
            TransportSelector::Tcp => vec![Protocol::Tcp],
            TransportSelector::Both => vec![Protocol::Udp, Protocol::Tcp],
        }
    }
}

impl FromStr for TransportSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(TransportSelector::Udp),
            "tcp" => Ok(TransportSelector::Tcp),
            "both" => Ok(TransportSelector::Both),
            other => Err(Error::Config(format!(
                "invalid mode {:?}, expected udp, tcp or both",
                other
            ))),
        }
    }
}

/// One benchmark configuration: a chunk size over one transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trial {
    /// Zero-based outer cycle
    pub cycle: usize,
    pub chunk_size: usize,
    pub protocol: Protocol,
}

/// Configuration for a benchmark run.
///
/// Use the builder methods to customize, then [`Config::validate`] before any
/// network I/O.
///
/// # Examples
///
/// ```
/// use udpbench::{ChunkSelector, Config, TransportSelector};
///
/// let config = Config::client("192.168.1.100".to_string(), "data.bin")
///     .with_chunks(ChunkSelector::Sizes(vec![1000, 1400]))
///     .with_transports(TransportSelector::Both)
///     .with_cycles(2);
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.trials().len(), 8);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Peer host name or address
    pub server_addr: Option<String>,

    /// Peer port for the line-oriented control channel
    pub control_port: u16,

    /// Peer port for file data, UDP datagrams and TCP streams alike
    pub data_port: u16,

    /// File to transfer
    pub file: Option<PathBuf>,

    /// Name carried in frame headers; defaults to the file's base name
    pub transfer_name: Option<String>,

    /// Chunk sizes to benchmark
    pub chunks: ChunkSelector,

    /// Transports to benchmark each chunk size over
    pub transports: TransportSelector,

    /// Full passes over every (chunk size, transport) pair
    pub cycles: usize,

    /// Run the `Time?` exchange before the first trial
    pub clock_sync: bool,

    /// Append-only results log
    pub results_path: PathBuf,

    /// Frame size above which a fragmentation warning is logged
    pub mtu: usize,

    /// Capacity of the control command queue
    pub queue_capacity: usize,

    /// Print each result as JSON
    pub json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: None,
            control_port: 9000,
            data_port: 9001,
            file: None,
            transfer_name: None,
            chunks: ChunkSelector::Sizes(vec![DEFAULT_CHUNK_SIZE]),
            transports: TransportSelector::Udp,
            cycles: 1,
            clock_sync: true,
            results_path: PathBuf::from("results.log"),
            mtu: DEFAULT_MTU,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            json: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration sending `file` to `server_addr`.
    pub fn client(server_addr: String, file: impl Into<PathBuf>) -> Self {
        Self {
            server_addr: Some(server_addr),
            file: Some(file.into()),
            ..Default::default()
        }
    }

    /// Sets the peer's control and data ports.
    ///
    /// The data port carries both UDP datagrams and TCP stream passes.
    ///
    /// # Arguments
    ///
    /// * `control_port` - Control channel port (default: 9000)
    /// * `data_port` - Data plane port (default: 9001)
    ///
    /// # Examples
    ///
    /// ```
    /// use udpbench::Config;
    ///
    /// let config = Config::client("10.0.0.2".to_string(), "data.bin")
    ///     .with_ports(7000, 7001);
    /// assert_eq!(config.data_addr().unwrap(), "10.0.0.2:7001");
    /// ```
    pub fn with_ports(mut self, control_port: u16, data_port: u16) -> Self {
        self.control_port = control_port;
        self.data_port = data_port;
        self
    }

    /// Overrides the name carried in every frame header.
    ///
    /// Must be at most 20 bytes; defaults to the file's base name.
    pub fn with_transfer_name(mut self, name: impl Into<String>) -> Self {
        self.transfer_name = Some(name.into());
        self
    }

    /// Sets the chunk sizes to benchmark.
    ///
    /// # Examples
    ///
    /// ```
    /// use udpbench::{ChunkSelector, Config};
    ///
    /// let config = Config::client("127.0.0.1".to_string(), "data.bin")
    ///     .with_chunks(ChunkSelector::Sizes(vec![512, 1400]));
    /// assert_eq!(config.chunks.sizes(), vec![512, 1400]);
    /// ```
    pub fn with_chunks(mut self, chunks: ChunkSelector) -> Self {
        self.chunks = chunks;
        self
    }

    /// Chooses UDP, TCP, or both for every chunk size.
    pub fn with_transports(mut self, transports: TransportSelector) -> Self {
        self.transports = transports;
        self
    }

    /// Sets how many times the whole size/transport matrix is run.
    ///
    /// # Arguments
    ///
    /// * `cycles` - Number of passes over the matrix (default: 1, must be positive)
    pub fn with_cycles(mut self, cycles: usize) -> Self {
        self.cycles = cycles;
        self
    }

    /// Enables or disables the clock offset exchange.
    ///
    /// Without it, peer timestamps are taken to be on the local clock, which
    /// only holds when both ends share a host or a synchronized clock.
    pub fn with_clock_sync(mut self, clock_sync: bool) -> Self {
        self.clock_sync = clock_sync;
        self
    }

    /// Sets the file results are appended to.
    pub fn with_results_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.results_path = path.into();
        self
    }

    /// Sets the datagram size above which a fragmentation warning is logged.
    ///
    /// # Examples
    ///
    /// ```
    /// use udpbench::Config;
    ///
    /// let config = Config::client("127.0.0.1".to_string(), "data.bin")
    ///     .with_mtu(9000); // jumbo frames
    /// ```
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Sets the capacity of the queue between the control reader and the driver.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Prints each result as a JSON object instead of a plain log line.
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Checks everything that can be checked before touching the network.
    pub fn validate(&self) -> Result<()> {
        if self.server_addr.as_deref().map_or(true, str::is_empty) {
            return Err(Error::Config("Server address is required".to_string()));
        }
        if self.file.is_none() {
            return Err(Error::Config("A file to send is required".to_string()));
        }

        let name = self.transfer_name()?;
        if name.len() > MAX_FILENAME_LEN {
            return Err(Error::Config(format!(
                "transfer name {:?} is {} bytes, at most {} fit in a frame header",
                name,
                name.len(),
                MAX_FILENAME_LEN
            )));
        }

        let sizes = self.chunks.sizes();
        if sizes.is_empty() {
            return Err(Error::Config("No chunk sizes given".to_string()));
        }
        if sizes.contains(&0) {
            return Err(Error::Config("Chunk size must be positive".to_string()));
        }
        if self.cycles == 0 {
            return Err(Error::Config("Cycle count must be positive".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("Queue capacity must be positive".to_string()));
        }
        Ok(())
    }

    /// Name carried in every frame header.
    pub fn transfer_name(&self) -> Result<String> {
        if let Some(name) = &self.transfer_name {
            return Ok(name.clone());
        }
        self.file
            .as_ref()
            .and_then(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Config("Cannot derive a transfer name from the file path".to_string()))
    }

    pub fn control_addr(&self) -> Result<String> {
        self.peer_addr(self.control_port)
    }

    pub fn data_addr(&self) -> Result<String> {
        self.peer_addr(self.data_port)
    }

    fn peer_addr(&self, port: u16) -> Result<String> {
        let host = self
            .server_addr
            .as_ref()
            .ok_or_else(|| Error::Config("Server address not set".to_string()))?;
        Ok(format!("{}:{}", host, port))
    }

    /// Every trial of the run, in execution order.
    pub fn trials(&self) -> Vec<Trial> {
        let sizes = self.chunks.sizes();
        let protocols = self.transports.protocols();
        let mut trials = Vec::with_capacity(self.cycles * sizes.len() * protocols.len());
        for cycle in 0..self.cycles {
            for &chunk_size in &sizes {
                for &protocol in &protocols {
                    trials.push(Trial {
                        cycle,
                        chunk_size,
                        protocol,
                    });
                }
            }
        }
        trials
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.control_port, 9000);
        assert_eq!(config.data_port, 9001);
        assert_eq!(config.chunks.sizes(), vec![DEFAULT_CHUNK_SIZE]);
        assert_eq!(config.cycles, 1);
        assert!(config.clock_sync);
        assert_eq!(config.mtu, 1460);
    }

    #[test]
    fn test_chunk_selector_parse() {
        assert_eq!("all".parse::<ChunkSelector>().unwrap(), ChunkSelector::All);
        assert_eq!("ALL".parse::<ChunkSelector>().unwrap(), ChunkSelector::All);
        assert_eq!(
            "500, 1000,1400".parse::<ChunkSelector>().unwrap(),
            ChunkSelector::Sizes(vec![500, 1000, 1400])
        );
        assert!("0".parse::<ChunkSelector>().is_err());
        assert!("12,abc".parse::<ChunkSelector>().is_err());
        assert!("".parse::<ChunkSelector>().is_err());
    }

    #[test]
    fn test_all_sizes_fit_default_mtu() {
        for size in ALL_CHUNK_SIZES {
            assert!(crate::frame::predicted_len(size) <= DEFAULT_MTU);
        }
    }

    #[test]
    fn test_transport_selector_parse() {
        assert_eq!("udp".parse::<TransportSelector>().unwrap(), TransportSelector::Udp);
        assert_eq!("TCP".parse::<TransportSelector>().unwrap(), TransportSelector::Tcp);
        assert_eq!(
            "both".parse::<TransportSelector>().unwrap().protocols(),
            vec![Protocol::Udp, Protocol::Tcp]
        );
        assert!("sctp".parse::<TransportSelector>().is_err());
    }

    #[test]
    fn test_trial_order() {
        let config = Config::client("h".to_string(), "f")
            .with_chunks(ChunkSelector::Sizes(vec![100, 200]))
            .with_transports(TransportSelector::Both)
            .with_cycles(2);

        let trials = config.trials();
        assert_eq!(trials.len(), 8);
        assert_eq!(
            trials[0],
            Trial {
                cycle: 0,
                chunk_size: 100,
                protocol: Protocol::Udp
            }
        );
        assert_eq!(trials[1].protocol, Protocol::Tcp);
        assert_eq!(trials[2].chunk_size, 200);
        assert_eq!(trials[4].cycle, 1);
    }

    #[test]
    fn test_transfer_name() {
        let config = Config::client("h".to_string(), "/tmp/some/data.bin");
        assert_eq!(config.transfer_name().unwrap(), "data.bin");

        let config = config.with_transfer_name("override");
        assert_eq!(config.transfer_name().unwrap(), "override");
    }

    #[test]
    fn test_validate() {
        let ok = Config::client("h".to_string(), "data.bin");
        assert!(ok.validate().is_ok());

        assert!(matches!(Config::new().validate(), Err(Error::Config(_))));
        assert!(matches!(
            Config::client(String::new(), "data.bin").validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::client("h".to_string(), "a-very-long-benchmark-file.bin").validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ok.clone().with_chunks(ChunkSelector::Sizes(vec![])).validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            ok.clone().with_chunks(ChunkSelector::Sizes(vec![0])).validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(ok.clone().with_cycles(0).validate(), Err(Error::Config(_))));
        assert!(matches!(
            ok.with_queue_capacity(0).validate(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_addresses() {
        let config = Config::client("10.0.0.2".to_string(), "f").with_ports(7000, 7001);
        assert_eq!(config.control_addr().unwrap(), "10.0.0.2:7000");
        assert_eq!(config.data_addr().unwrap(), "10.0.0.2:7001");
    }
}
