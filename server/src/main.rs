//! KNI Server - node network runtime binary.
//!
//! Attaches pod sandboxes to the node's networks on behalf of the container
//! runtime, serving requests over a Unix domain socket or TCP.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use kni_core::config::{KniConfig, MissingRecordPolicy};
use kni_core::plugin::PluginRuntime;
use kni_runtime::{is_simulate_mode, CniRuntime, ConfigSyncer, KniService, SimulatedRuntime};
use kni_server::server::{KniServer, ListenAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Protocol {
    Unix,
    Tcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// KNI Network Runtime
#[derive(Parser, Debug)]
#[command(name = "kni-server", about = "KNI Network Runtime", version)]
struct Args {
    /// Listener type.
    #[arg(long, value_enum, default_value = "unix")]
    protocol: Protocol,

    /// Socket path (unix) or host:port (tcp).
    #[arg(long, default_value = "/tmp/kni.sock")]
    address: String,

    /// YAML configuration file; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Interface name prefix.
    #[arg(long)]
    ifprefix: Option<String>,

    /// Attachment store file.
    #[arg(long)]
    dbname: Option<String>,

    /// Network configuration directory.
    #[arg(long)]
    conf_dir: Option<String>,

    /// Plugin binary directory (repeatable).
    #[arg(long = "bin-dir")]
    bin_dirs: Vec<String>,

    /// Attach through the multi-network annotation path.
    #[arg(long)]
    multi_net: bool,

    /// Detach behavior for sandboxes without a record (error, succeed).
    #[arg(long)]
    missing_record_policy: Option<MissingRecordPolicy>,

    /// Server-side bound on one plugin invocation in seconds (0 = none).
    #[arg(long)]
    plugin_timeout: Option<u64>,

    /// Log output format.
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Use the in-memory plugin runtime (also enabled by KNI_SIMULATE=1).
    #[arg(long)]
    simulate: bool,
}

impl Args {
    /// File configuration (or defaults) with flag overrides applied.
    fn resolve_config(&self) -> Result<KniConfig> {
        let mut config = match &self.config {
            Some(path) => KniConfig::from_file(&expand_home(&path.to_string_lossy()))
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => KniConfig::default(),
        };

        if let Some(prefix) = &self.ifprefix {
            config.if_prefix = prefix.clone();
        }
        if let Some(db) = &self.dbname {
            config.db_path = expand_home(db);
        }
        if let Some(dir) = &self.conf_dir {
            config.plugin_conf_dir = expand_home(dir);
        }
        if !self.bin_dirs.is_empty() {
            config.plugin_bin_dirs = self.bin_dirs.iter().map(|d| expand_home(d)).collect();
        }
        if self.multi_net {
            config.use_multi_net = true;
        }
        if let Some(policy) = self.missing_record_policy {
            config.missing_record_policy = policy;
        }
        if let Some(secs) = self.plugin_timeout {
            config.plugin_timeout_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }

    fn listen_addr(&self) -> ListenAddr {
        match self.protocol {
            Protocol::Unix => ListenAddr::Unix(expand_home(&self.address)),
            Protocol::Tcp => ListenAddr::Tcp(self.address.clone()),
        }
    }
}

/// Resolve a leading `~` against the home directory.
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix('~') {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(rest.trim_start_matches('/'))
    } else {
        PathBuf::from(path)
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

async fn run<R: PluginRuntime>(
    config: KniConfig,
    runtime: R,
    addr: ListenAddr,
) -> Result<()> {
    let conf_dir = config.plugin_conf_dir.clone();
    let service = Arc::new(
        KniService::open(config, runtime)
            .await
            .context("failed to open attachment service")?,
    );
    let syncer = ConfigSyncer::spawn(&conf_dir, service.plugin_handle())
        .context("failed to start config syncer")?;

    let server = KniServer::new(addr, service);
    server
        .serve_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    syncer.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let config = args.resolve_config()?;
    let addr = args.listen_addr();

    tracing::info!(
        addr = %addr,
        if_prefix = %config.if_prefix,
        db = %config.db_path.display(),
        conf_dir = %config.plugin_conf_dir.display(),
        multi_net = config.use_multi_net,
        "Starting KNI network runtime"
    );

    if args.simulate || is_simulate_mode() {
        tracing::warn!("Simulation mode: no network plugins will be executed");
        let (runtime, _control) = SimulatedRuntime::new(&config.if_prefix, &["kni-sim"]);
        run(config, runtime, addr).await
    } else {
        let runtime = CniRuntime::new(
            &config.plugin_conf_dir,
            config.plugin_bin_dirs.clone(),
            config.if_prefix.clone(),
        );
        run(config, runtime, addr).await
    }
}
