//! # Command Line Interface
//!
//! `meshplane compile` runs one compilation pass for a proxy against a policy
//! snapshot file and prints the result. `meshplane validate-config` checks a
//! compiler configuration file.

pub mod output;

use crate::certificate::{CertificateManager, PemBundle};
use crate::config::{self, CompilerConfig};
use crate::dispatcher::Dispatcher;
use crate::domain::{Proxy, ServiceIdentity, Workload};
use crate::observability::{init_logging, log_config_info};
use crate::xds::CompiledResources;
use crate::{Snapshot, APP_NAME, VERSION};
use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use output::{print_output, OutputFormat};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "meshplane")]
#[command(about = "Compiles service-mesh policy into Envoy configuration")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Compiler configuration file (YAML, JSON or TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile the resources of one proxy
    Compile(CompileArgs),

    /// Validate the compiler configuration and print the effective values
    ValidateConfig {
        #[arg(short, long, value_enum, default_value = "json")]
        output: OutputFormat,
    },
}

#[derive(Args)]
pub struct CompileArgs {
    /// Policy snapshot file (YAML or JSON)
    pub snapshot: PathBuf,

    /// Identity the proxy runs as, in `name.namespace` form
    #[arg(long)]
    pub identity: ServiceIdentity,

    /// Proxy id; defaults to the identity
    #[arg(long)]
    pub proxy_id: Option<String>,

    /// Workload reported by the proxy, as `kind/name/pod`
    #[arg(long, value_parser = parse_workload)]
    pub workload: Option<Workload>,

    /// Directory holding cert.pem, key.pem and ca.pem; secrets are only compiled when set
    #[arg(long)]
    pub certs: Option<PathBuf>,

    /// Print the full resources instead of a summary
    #[arg(long)]
    pub dump: bool,

    #[arg(short, long, value_enum, default_value = "json")]
    pub output: OutputFormat,
}

fn parse_workload(s: &str) -> Result<Workload, String> {
    match s.split('/').collect::<Vec<_>>()[..] {
        [kind, name, pod] if !kind.is_empty() && !name.is_empty() && !pod.is_empty() => {
            Ok(Workload { kind: kind.to_string(), name: name.to_string(), pod: pod.to_string() })
        }
        _ => Err(format!("workload '{}' must have the form kind/name/pod", s)),
    }
}

pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut compiler_config = config::load(cli.config.as_deref())
        .with_context(|| format!("Failed to load configuration{}", describe_path(cli.config.as_deref())))?;
    if cli.verbose {
        compiler_config.observability.log_level = "debug".to_string();
    }
    init_logging(&compiler_config.observability)?;
    info!(app_name = APP_NAME, version = VERSION, "Starting meshplane");

    match cli.command {
        Commands::Compile(args) => {
            let resources = compile_once(compiler_config, &args).await?;
            if args.dump {
                print_output(&resources.dump(), args.output)?;
            } else {
                print_output(&resources.summary(), args.output)?;
            }
        }
        Commands::ValidateConfig { output } => {
            log_config_info(&compiler_config);
            print_output(&compiler_config, output)?;
        }
    }

    Ok(())
}

fn describe_path(path: Option<&Path>) -> String {
    path.map(|p| format!(" from {}", p.display())).unwrap_or_default()
}

/// Runs a single pass through the dispatcher and returns its result.
pub async fn compile_once(config: CompilerConfig, args: &CompileArgs) -> anyhow::Result<Arc<CompiledResources>> {
    log_config_info(&config);

    let snapshot = Snapshot::from_file(&args.snapshot)
        .with_context(|| format!("Failed to load snapshot {}", args.snapshot.display()))?;
    let certificates: Option<Arc<dyn CertificateManager>> = match &args.certs {
        Some(dir) => Some(Arc::new(PemBundle::from_dir(dir)?)),
        None => None,
    };

    let proxy_id = args.proxy_id.clone().unwrap_or_else(|| args.identity.to_string());
    let mut proxy = Proxy::new(proxy_id, args.identity.clone());
    proxy.workload = args.workload.clone();

    let dispatcher = Dispatcher::spawn(config, Arc::new(snapshot), certificates);
    let mut state_rx = dispatcher.connect(proxy).await?;
    let state = state_rx
        .wait_for(|s| s.generation > 0)
        .await
        .context("Dispatcher stopped before compiling the proxy")?
        .clone();

    dispatcher.shutdown();
    dispatcher.join().await;

    if let Some(error) = state.last_error {
        bail!("Compilation failed: {}", error);
    }
    match state.resources {
        Some(resources) => Ok(resources),
        None => bail!("Compilation produced no resources"),
    }
}
