use clap::Parser;
use std::path::PathBuf;
use udpbench::{ChunkSelector, Config, Driver, TransportSelector};

#[derive(Parser)]
#[command(name = "udpbench")]
#[command(about = "Benchmark file transfer over UDP against TCP, driven by a remote peer", long_about = None)]
#[command(version)]
struct Cli {
    /// File to send
    file: PathBuf,

    /// Peer host name or address
    server: String,

    /// Peer control channel port
    #[arg(long, default_value = "9000")]
    control_port: u16,

    /// Peer data port (UDP datagrams and TCP streams)
    #[arg(long, default_value = "9001")]
    data_port: u16,

    /// Chunk sizes in bytes, comma separated, or "all"
    #[arg(short, long, default_value = "1050")]
    sizes: ChunkSelector,

    /// Transport to benchmark: udp, tcp or both
    #[arg(short, long, default_value = "udp")]
    mode: TransportSelector,

    /// Number of full passes over every size and mode
    #[arg(short, long, default_value = "1")]
    cycles: usize,

    /// Name sent in frame headers (defaults to the file name, at most 20 bytes)
    #[arg(short, long)]
    name: Option<String>,

    /// Results log, appended to
    #[arg(short, long, default_value = "results.log")]
    results: PathBuf,

    /// Warn when a frame exceeds this many bytes
    #[arg(long, default_value = "1460")]
    mtu: usize,

    /// Capacity of the control command queue
    #[arg(long, default_value = "32")]
    queue: usize,

    /// Skip the clock offset exchange
    #[arg(long)]
    no_clock_sync: bool,

    /// Print results as JSON
    #[arg(short = 'J', long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut config = Config::client(cli.server, cli.file)
        .with_ports(cli.control_port, cli.data_port)
        .with_chunks(cli.sizes)
        .with_transports(cli.mode)
        .with_cycles(cli.cycles)
        .with_results_path(cli.results)
        .with_mtu(cli.mtu)
        .with_queue_capacity(cli.queue)
        .with_clock_sync(!cli.no_clock_sync)
        .with_json(cli.json);

    if let Some(name) = cli.name {
        config = config.with_transfer_name(name);
    }

    let mut driver = Driver::connect(config).await?;
    driver.run().await?;

    Ok(())
}
