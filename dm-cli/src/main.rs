//! DistroMate operator CLI
//!
//! Talks to a licensing authority from the command line:
//! 1. Canonicalize JSON the way the client signs and verifies it
//! 2. Activate a license key on this machine
//! 3. Report the stored activation and run a genuine check
//! 4. Ask the update service for a newer version
//!
//! Usage:
//!   dm --base-url https://licensing.example.com activate --product com.example.app --key AAAA-BBBB

use std::{
    io::Read,
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dm_client::{
    ClientOptions, EnvConfig, HttpTransport, LicenseClient, UpdateCheck, UpdateOptions,
    json_to_canonical, library_version, should_skip_check,
};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "dm")]
#[command(about = "DistroMate license activation and update client")]
#[command(version)]
struct Args {
    /// Base URL of the licensing authority
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Bearer token sent with every request
    #[arg(long, global = true)]
    token: Option<String>,

    /// Directory holding the activation store
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Per-request timeout in milliseconds
    #[arg(long, global = true, default_value = "5000")]
    timeout_ms: u64,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the canonical form of a JSON document
    Canonicalize {
        /// Input file. Reads stdin when omitted
        file: Option<PathBuf>,
    },

    /// Activate a license key on this machine
    Activate {
        #[arg(short, long)]
        product: Option<String>,
        #[arg(short, long)]
        key: String,
        /// Use this fingerprint instead of the hardware one
        #[arg(long)]
        fingerprint: Option<String>,
    },

    /// Show the stored activation and run a genuine check
    Status {
        #[arg(short, long)]
        product: Option<String>,
        /// Only report local validity, no network
        #[arg(long)]
        offline: bool,
    },

    /// Ask the update service for a newer version
    CheckUpdates {
        #[arg(short, long)]
        product: Option<String>,
        #[arg(long)]
        channel: Option<String>,
    },

    /// Check whether a development license lets this machine skip checks
    DevCheck {
        #[arg(long)]
        app_id: Option<String>,
        #[arg(long)]
        public_key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    debug!("dm-client {}", library_version());

    let env = EnvConfig::from_env();
    match &args.command {
        Command::Canonicalize { file } => canonicalize(file.as_deref()),
        Command::Activate {
            product,
            key,
            fingerprint,
        } => {
            let client = connect(&args, &env, product.as_deref())?;
            if let Some(fingerprint) = fingerprint {
                client.set_custom_fingerprint(fingerprint)?;
            }
            client.set_license_key(key)?;
            if !client.activate_license().await {
                let failure = client.get_last_activation_error();
                bail!(
                    "activation failed: {}",
                    serde_json::to_string(&failure).unwrap_or_default()
                );
            }
            info!("Activation {} stored", client.get_activation_id()?);
            println!("{}", serde_json::to_string_pretty(&client.metadata()?)?);
            Ok(())
        }
        Command::Status { product, offline } => {
            let client = connect(&args, &env, product.as_deref())?;
            if !client.restore_activation()? {
                println!("not activated");
                return Ok(());
            }
            let genuine = if *offline {
                None
            } else {
                Some(client.is_license_genuine().await)
            };
            let report = serde_json::json!({
                "valid": client.is_license_valid(),
                "genuine": genuine,
                "metadata": client.metadata()?,
                "lastError": client.get_last_error(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::CheckUpdates { product, channel } => {
            let client = connect(&args, &env, product.as_deref())?;
            client.restore_activation()?;
            let options = UpdateOptions {
                channel: channel.clone(),
            };
            match client.check_for_updates(&options).await {
                UpdateCheck::Available(update) => {
                    println!("{}", serde_json::to_string_pretty(&update)?);
                }
                UpdateCheck::UpToDate => println!("up to date"),
                UpdateCheck::Failed(e) => bail!("update check failed: {e}"),
            }
            Ok(())
        }
        Command::DevCheck { app_id, public_key } => {
            let skip = should_skip_check(&env, app_id.as_deref(), public_key.as_deref())?;
            println!("{}", if skip { "skip" } else { "enforce" });
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn canonicalize(file: Option<&std::path::Path>) -> Result<()> {
    let input = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading stdin")?;
            buf
        }
    };
    println!("{}", json_to_canonical(&input)?);
    Ok(())
}

fn connect(args: &Args, env: &EnvConfig, product: Option<&str>) -> Result<LicenseClient> {
    let mut transport = match &args.base_url {
        Some(url) => HttpTransport::new(url.clone())?,
        None => HttpTransport::from_env(env)
            .context("no --base-url given and DM_LAUNCHER_ENDPOINT is not set")?,
    };
    if let Some(token) = &args.token {
        transport = transport.with_token(token.clone());
    }

    let options = ClientOptions {
        timeout: std::time::Duration::from_millis(args.timeout_ms),
        ..ClientOptions::default()
    };
    let client = LicenseClient::builder(Arc::new(transport))
        .options(options)
        .env(env.clone())
        .build();

    match product.or(env.default_app_id.as_deref()) {
        Some(product) => client.set_product_id(product, 0)?,
        None => bail!("no --product given and DM_APP_ID is not set"),
    }
    if let Some(dir) = &args.data_dir {
        client.set_data_directory(dir)?;
    }
    if args.verbose {
        client.set_debug_mode(true)?;
    }
    Ok(client)
}
