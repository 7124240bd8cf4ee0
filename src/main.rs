//! Craftops operator CLI.
//!
//! A thin surface over the library for the tasks an operator runs outside
//! the control plane: configuration checks, vault secret management, and
//! ad-hoc probing of candidate hosts.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use craftops::config::CoreConfig;
use craftops::connection::{ConnectionPool, PoolConfig};
use craftops::model::{AuthMethod, HostCredentials, HostId};
use craftops::remote;
use craftops::telemetry::{LogFormat, LogLevel, LoggingBuilder};
use craftops::vault::SecretVault;

#[derive(Parser)]
#[command(
    name = "craftops",
    version,
    about = "Remote Minecraft server orchestration over SSH"
)]
struct Cli {
    /// Configuration file (JSON); CRAFTOPS_* variables override it
    #[arg(short, long, global = true, env = "CRAFTOPS_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the configuration and run the vault self-check
    VerifyConfig,
    /// Encrypt a secret under the configured master secret
    Encrypt {
        /// Plaintext to encrypt; read from stdin when omitted
        value: Option<String>,
    },
    /// Decrypt a token produced by `encrypt`
    Decrypt {
        /// Token to decrypt; read from stdin when omitted
        token: Option<String>,
    },
    /// Probe a host over SSH and print its capacity
    Probe {
        /// Host address or address:port
        addr: String,
        /// SSH user to connect as
        #[arg(short, long, default_value = "root")]
        user: String,
        /// Private key file; CRAFTOPS_SSH_PASSWORD is used when omitted
        #[arg(short, long)]
        key: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    LoggingBuilder::new()
        .with_level(LogLevel::from_verbosity(cli.verbose))
        .with_format(if cli.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Compact
        })
        .init()
        .context("installing the tracing subscriber")?;

    let config = CoreConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::VerifyConfig => verify_config(&config),
        Commands::Encrypt { value } => encrypt(&config, value),
        Commands::Decrypt { token } => decrypt(&config, token),
        Commands::Probe { addr, user, key } => probe(&config, addr, user, key).await,
    }
}

fn verify_config(config: &CoreConfig) -> Result<()> {
    vault_from(config)?;

    println!("{}", craftops::version_info());
    println!("configuration ok");
    println!(
        "  game ports:     {}-{}",
        config.ports.game.start, config.ports.game.end
    );
    println!(
        "  console ports:  {}-{}",
        config.ports.console.start, config.ports.console.end
    );
    println!(
        "  command timeout: {}s",
        config.ssh.command_timeout.as_secs()
    );
    println!(
        "  reconcile every: {}s",
        config.reconcile.interval.as_secs()
    );
    Ok(())
}

fn encrypt(config: &CoreConfig, value: Option<String>) -> Result<()> {
    let vault = vault_from(config)?;
    let plaintext = arg_or_stdin(value, "plaintext")?;
    println!("{}", vault.encrypt(&plaintext)?);
    Ok(())
}

fn decrypt(config: &CoreConfig, token: Option<String>) -> Result<()> {
    let vault = vault_from(config)?;
    let token = arg_or_stdin(token, "token")?;
    println!("{}", vault.decrypt(&token)?);
    Ok(())
}

async fn probe(
    config: &CoreConfig,
    addr: String,
    user: String,
    key: Option<PathBuf>,
) -> Result<()> {
    let (addr, port) = split_addr(&addr)?;
    let auth = match key {
        Some(path) => AuthMethod::Key {
            private_key: std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?,
            passphrase: std::env::var("CRAFTOPS_KEY_PASSPHRASE").ok(),
        },
        None => AuthMethod::Password {
            password: std::env::var("CRAFTOPS_SSH_PASSWORD")
                .context("no key file given and CRAFTOPS_SSH_PASSWORD is unset")?,
        },
    };
    let credentials = HostCredentials {
        addr,
        port,
        username: user,
        auth,
        host_key_fingerprint: None,
    };

    let pool = ConnectionPool::new(PoolConfig::from(&config.ssh));
    let session = pool.acquire(HostId::new(), &credentials).await?;
    let capacity = remote::probe_capacity(&*session, config.ssh.command_timeout).await?;

    println!("{}", credentials.endpoint());
    println!("  os:      {}", capacity.os_name);
    println!("  memory:  {} MB", capacity.total_memory_mb);
    println!("  cores:   {}", capacity.cpu_cores);
    println!("  disk:    {} MB", capacity.total_disk_mb);
    Ok(())
}

/// Builds the vault from the loaded configuration and fails fast on a
/// missing or undersized master secret.
fn vault_from(config: &CoreConfig) -> Result<SecretVault> {
    let vault = SecretVault::new(config.vault.master_secret.clone());
    vault
        .verify_configuration()
        .context("master secret rejected")?;
    Ok(vault)
}

fn arg_or_stdin(value: Option<String>, what: &str) -> Result<String> {
    match value {
        Some(v) => Ok(v),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .with_context(|| format!("reading {what} from stdin"))?;
            let trimmed = buf.trim_end_matches(['\r', '\n']).to_string();
            if trimmed.is_empty() {
                bail!("no {what} given on the command line or stdin");
            }
            Ok(trimmed)
        }
    }
}

/// Splits `host` or `host:port`, defaulting to the SSH port.
fn split_addr(raw: &str) -> Result<(String, u16)> {
    match raw.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .with_context(|| format!("invalid port in {raw:?}"))?;
            Ok((host.to_string(), port))
        }
        None => Ok((raw.to_string(), 22)),
    }
}
