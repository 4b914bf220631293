//! Command-line entry point for the dispersed-storage backup client:
//! `disperse <filename> <userID> -u|-d HIGH|LOW` (§A.6 Client CLI),
//! plus a `setup`/`status` pair in the style this workspace's inherited
//! CLI binaries use for configuration management.

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod keyclient;
mod netclient;
mod pipeline;

use config::Config;
use dispersion_core::crypto::SecurityLevel;

#[derive(Parser)]
#[command(name = "disperse")]
#[command(about = "Multi-cloud deduplicated secret-shared backup client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file: disperse shares across every configured cloud
    Upload {
        /// Path to the local file to back up
        filename: PathBuf,
        /// Owning user id
        user_id: u32,
        /// Security level: HIGH (SHA-256 + AES-256) or LOW (MD5 + AES-128)
        #[arg(short = 'u', long = "level", default_value = "HIGH")]
        level: String,
    },
    /// Download a file: reconstruct it from whichever clouds answer
    Download {
        /// Remote path as it was uploaded
        filename: String,
        /// Owning user id
        user_id: u32,
        /// Security level: HIGH (SHA-256 + AES-256) or LOW (MD5 + AES-128)
        #[arg(short = 'd', long = "level", default_value = "HIGH")]
        level: String,
        /// Where to write the recovered file
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
    /// Interactive setup: write the client config (cloud endpoints, k)
    Setup,
    /// Print the resolved client config
    Status,
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "disperse=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() -> anyhow::Result<()> {
    init_logging();
    // The key-manager channel is TLS; rustls 0.23 needs one process-wide
    // default CryptoProvider installed before any ClientConfig::builder()
    // call, or it panics. Ignore the error: a second install (e.g. in
    // tests that construct multiple clients) is harmless.
    let _ = rustls::crypto::ring::default_provider().install_default();
    let cli = Cli::parse();

    match cli.command {
        Commands::Setup => run_setup(),
        Commands::Status => run_status(),
        Commands::Upload { filename, user_id, level } => run_upload(&filename, user_id, &level),
        Commands::Download { filename, user_id, level, output } => {
            run_download(&filename, user_id, &level, output)
        }
    }
}

fn parse_level(level: &str) -> anyhow::Result<SecurityLevel> {
    SecurityLevel::parse(level).ok_or_else(|| anyhow::anyhow!("unknown security level {level:?}, expected HIGH or LOW"))
}

fn load_km_keys(config: &Config) -> anyhow::Result<Vec<dispersion_core::blind::RsaPublicKey>> {
    config
        .clouds
        .iter()
        .map(|c| pipeline::load_km_public_key(&c.km_pubkey_path))
        .collect()
}

fn run_upload(filename: &std::path::Path, user_id: u32, level: &str) -> anyhow::Result<()> {
    let phase_start = Instant::now();
    let config = Config::load()?;
    let level = parse_level(level)?;

    let result = (|| -> anyhow::Result<pipeline::UploadReport> {
        let km_keys = load_km_keys(&config)?;
        pipeline::upload_file(&config, user_id, filename, level, &km_keys)
    })();

    let elapsed = phase_start.elapsed().as_secs_f64();
    match result {
        Ok(report) => {
            println!(
                "{}: upload time is {:.3}s ({} segments, {} bytes, {} shares deduplicated)",
                filename.display(),
                elapsed,
                report.segments_uploaded,
                report.bytes_uploaded,
                report.shares_deduplicated
            );
            Ok(())
        }
        Err(err) => {
            eprintln!("{}: {err}", filename.display());
            std::process::exit(1);
        }
    }
}

fn run_download(remote_name: &str, user_id: u32, level: &str, output: Option<PathBuf>) -> anyhow::Result<()> {
    let phase_start = Instant::now();
    let config = Config::load()?;
    let level = parse_level(level)?;
    let out_path = output.unwrap_or_else(|| PathBuf::from(remote_name));

    let result = pipeline::download_file(&config, user_id, remote_name, level, &out_path);

    let elapsed = phase_start.elapsed().as_secs_f64();
    match result {
        Ok(report) => {
            println!(
                "{remote_name}: download time is {:.3}s ({} secrets, {} bytes)",
                elapsed, report.secrets_recovered, report.bytes_recovered
            );
            Ok(())
        }
        Err(err) => {
            eprintln!("{remote_name}: {err}");
            std::process::exit(1);
        }
    }
}

fn run_setup() -> anyhow::Result<()> {
    let path = Config::config_path()?;
    if !path.exists() {
        Config::default().save()?;
    }
    println!("client config: {}", path.display());
    println!("edit the clouds list, then set k for the confidentiality threshold");
    Ok(())
}

fn run_status() -> anyhow::Result<()> {
    let config = Config::load()?;
    if config.clouds.is_empty() {
        println!("not configured. run: disperse setup");
        return Ok(());
    }
    println!("clouds: {} (k={})", config.n(), config.k());
    for cloud in &config.clouds {
        println!("  {} data={} meta={} km={}", cloud.name, cloud.data_addr, cloud.meta_addr, cloud.km_addr);
    }
    Ok(())
}
