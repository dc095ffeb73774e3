use anyhow::{Context, Result, bail};
use dfs_cluster::client::{DfsClient, trim_padding};
use dfs_cluster::config::{MasterConfig, SlaveConfig, validate_liveness, validate_slot_size};
use dfs_cluster::node::master::MasterServer;
use dfs_cluster::node::slave::SlaveServer;
use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        // .with_max_level(tracing::Level::DEBUG)
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage(&args[0]);
        std::process::exit(1);
    }

    let cli = CommandLine::parse(&args[2..])?;

    match args[1].as_str() {
        "master" => run_master(&cli).await,
        "slave" => run_slave(&cli).await,
        "put" => run_put(&cli).await,
        "get" => run_get(&cli).await,
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage(&args[0]);
            std::process::exit(1);
        }
    }
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} <master|slave|put|get> [--flag value ...]", program);
    eprintln!("Example: {} master --client 0.0.0.0:7000 --slave 0.0.0.0:7001", program);
    eprintln!(
        "Example: {} slave --master 127.0.0.1:7001 --port 7101 --storage blocks",
        program
    );
    eprintln!("Example: {} put --master 127.0.0.1:7000 /docs/a.txt ./a.txt", program);
    eprintln!(
        "Example: {} get --master 127.0.0.1:7000 --timeout-secs 5 /docs/a.txt",
        program
    );
}

/// `--flag value` pairs plus leftover positional arguments. A flag that is
/// not given on the command line falls back to its `DFS_*` variable.
struct CommandLine {
    flags: HashMap<String, String>,
    positional: Vec<String>,
}

impl CommandLine {
    fn parse(args: &[String]) -> Result<Self> {
        let mut flags = HashMap::new();
        let mut positional = vec![];

        let mut i = 0;
        while i < args.len() {
            let arg = &args[i];
            if let Some(name) = arg.strip_prefix("--") {
                let Some(value) = args.get(i + 1) else {
                    bail!("missing value for {}", arg);
                };
                flags.insert(name.to_string(), value.clone());
                i += 2;
            } else {
                positional.push(arg.clone());
                i += 1;
            }
        }

        Ok(Self { flags, positional })
    }

    fn raw(&self, flag: &str, env: &str) -> Option<String> {
        self.flags
            .get(flag)
            .cloned()
            .or_else(|| std::env::var(env).ok())
    }

    fn get<T>(&self, flag: &str, env: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.raw(flag, env) {
            Some(value) => {
                let parsed = value
                    .parse()
                    .with_context(|| format!("invalid value for --{}: {}", flag, value))?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    fn secs(&self, flag: &str, env: &str) -> Result<Option<Duration>> {
        Ok(self.get::<u64>(flag, env)?.map(Duration::from_secs))
    }
}

fn master_config(cli: &CommandLine) -> Result<MasterConfig> {
    let mut config = MasterConfig::default();

    if let Some(addr) = cli.get("client", "DFS_CLIENT_ADDR")? {
        config.client_addr = addr;
    }
    if let Some(addr) = cli.get("slave", "DFS_SLAVE_ADDR")? {
        config.slave_addr = addr;
    }
    config.http_addr = cli.get("http", "DFS_HTTP_ADDR")?;
    if let Some(sweep) = cli.secs("sweep-secs", "DFS_SWEEP_SECS")? {
        config.sweep_interval = sweep;
    }
    if let Some(stats) = cli.secs("stats-secs", "DFS_STATS_SECS")? {
        config.stats_interval = stats;
    }

    Ok(config)
}

fn slave_config(cli: &CommandLine) -> Result<SlaveConfig> {
    let mut config = SlaveConfig::default();

    if let Some(addr) = cli.get("master", "DFS_MASTER_ADDR")? {
        config.master_addr = addr;
    }
    if let Some(addr) = cli.get("control", "DFS_CONTROL_ADDR")? {
        config.control_addr = addr;
    }
    if let Some(port) = cli.get("port", "DFS_CLIENT_PORT")? {
        config.client_port = port;
    }
    if let Some(ip) = cli.get("bind-ip", "DFS_BIND_IP")? {
        config.bind_ip = ip;
    }
    if let Some(memory) = cli.get("memory", "DFS_MEMORY")? {
        config.memory = memory;
    }
    if let Some(root) = cli.raw("storage", "DFS_STORAGE_ROOT") {
        config.storage_root = PathBuf::from(root);
    }
    if let Some(slots) = cli.get("slots-per-block", "DFS_SLOTS_PER_BLOCK")? {
        config.slots_per_block = slots;
    }
    if let Some(bytes) = cli.get("bytes-per-slot", "DFS_BYTES_PER_SLOT")? {
        config.bytes_per_slot = bytes;
    }
    if let Some(heartbeat) = cli.secs("heartbeat-secs", "DFS_HEARTBEAT_SECS")? {
        config.heartbeat_interval = heartbeat;
    }
    config.http_addr = cli.get("http", "DFS_HTTP_ADDR")?;
    if let Some(stats) = cli.secs("stats-secs", "DFS_STATS_SECS")? {
        config.stats_interval = stats;
    }

    Ok(config)
}

async fn run_master(cli: &CommandLine) -> Result<()> {
    let config = master_config(cli)?;
    tracing::info!("Starting master: {:?}", config);

    let master = MasterServer::start(config).await?;

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;

    master.shutdown();
    Ok(())
}

async fn run_slave(cli: &CommandLine) -> Result<()> {
    let config = slave_config(cli)?;

    // The sweep interval lives on the master; it is passed here only so the
    // pairing can be checked before the slave joins.
    let sweep = cli
        .secs("sweep-secs", "DFS_SWEEP_SECS")?
        .unwrap_or(MasterConfig::default().sweep_interval);
    validate_liveness(config.heartbeat_interval, sweep)?;
    validate_slot_size(config.bytes_per_slot)?;

    tracing::info!("Starting slave: {:?}", config);

    let slave = SlaveServer::start(config).await?;

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;

    slave.shutdown().await?;
    Ok(())
}

async fn connect_client(cli: &CommandLine) -> Result<DfsClient> {
    let Some(master) = cli.get::<SocketAddr>("master", "DFS_MASTER_CLIENT_ADDR")? else {
        bail!("--master is required");
    };
    let bind: SocketAddr = cli
        .get("bind", "DFS_CLIENT_BIND")?
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));

    let client = DfsClient::connect(bind, master).await?;
    Ok(match cli.secs("timeout-secs", "DFS_CLIENT_TIMEOUT_SECS")? {
        Some(timeout) => client.with_timeout(timeout),
        None => client,
    })
}

async fn run_put(cli: &CommandLine) -> Result<()> {
    let [path, file] = cli.positional.as_slice() else {
        bail!("usage: put --master <addr> <path> <file>");
    };

    let content = std::fs::read(file).with_context(|| format!("reading {}", file))?;
    let mut client = connect_client(cli).await?;
    let location = client.put(path, content).await?;

    println!("{} -> {}", path, location);
    Ok(())
}

async fn run_get(cli: &CommandLine) -> Result<()> {
    let [path] = cli.positional.as_slice() else {
        bail!("usage: get --master <addr> <path>");
    };

    let mut client = connect_client(cli).await?;
    let slot = client.get(path).await?;

    std::io::stdout().write_all(trim_padding(&slot))?;
    Ok(())
}
