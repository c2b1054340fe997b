use std::fs::OpenOptions;
use std::net::SocketAddr;

use clap::Parser;
use p9fs::config::Config;
use p9fs::server::Server;

/// Serve a FAT32 volume over 9P2000.u.
#[derive(Debug, clap::Parser)]
struct Cli {
    /// Path to the FAT32 image or block device to export.
    image: std::path::PathBuf,

    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// TCP port to listen on.
    #[arg(long, default_value_t = p9fs::config::DEFAULT_PORT)]
    port: u16,

    /// Maximum simultaneous client sessions.
    #[arg(long, default_value_t = p9fs::config::DEFAULT_MAX_CLIENTS)]
    max_clients: usize,

    /// Ceiling on the negotiated `msize`.
    #[arg(long, default_value_t = p9fs::config::DEFAULT_MAX_MSIZE)]
    max_msize: u32,

    /// Maximum number of fids tracked per session.
    #[arg(long, default_value_t = p9fs::config::DEFAULT_MAX_FIDS_PER_CLIENT)]
    max_fids_per_client: usize,

    /// Timeout, in milliseconds, for acquiring the filesystem lock.
    #[arg(long, default_value_t = p9fs::config::DEFAULT_FS_LOCK_TIMEOUT_MS)]
    fs_lock_timeout_ms: u64,

    /// Reject every mutating operation, regardless of the client's open mode.
    #[arg(long)]
    readonly: bool,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Config {
        Config {
            port: cli.port,
            max_clients: cli.max_clients,
            max_msize: cli.max_msize,
            max_fids_per_client: cli.max_fids_per_client,
            fs_lock_timeout_ms: cli.fs_lock_timeout_ms,
            readonly: cli.readonly,
        }
    }
}

async fn p9fsd_main(cli: Cli) -> std::io::Result<i32> {
    let image = cli.image.clone();
    let bind = cli.bind.clone();
    let config = Config::from(cli);

    let file = OpenOptions::new()
        .read(true)
        .write(!config.readonly)
        .open(&image)?;

    let addr: SocketAddr = format!("{}:{}", bind, config.port)
        .parse()
        .map_err(std::io::Error::other)?;

    let server = Server::new(config, file).map_err(std::io::Error::other)?;

    println!("[*] Exporting {:?}", image);
    println!("[*] Ready to accept clients: {}", addr);

    server.start(addr).await.and(Ok(0))
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let exit_code = p9fsd_main(Cli::parse()).await.unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        -1
    });

    std::process::exit(exit_code);
}
