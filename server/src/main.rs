//! Deduplicating storage server for one cloud in a dispersed backup:
//! a meta front end, a data front end, a TLS Key Manager front end,
//! and the two-stage dedup engine shared by the first two.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod dedup;
mod frontend;
mod keymanager;
mod storage;
mod tls;

use config::Config;
use dedup::{BufferRegistry, DedupCore, InodeIndexStore, RecipeStore};
use frontend::ServiceState;
use storage::container::ContainerStore;

#[derive(Parser)]
#[command(name = "dispersiond")]
#[command(about = "Deduplicating storage server for one cloud in a dispersed backup", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the meta, data and key manager front ends
    Serve,
    /// Print the disk layout and configured ports without starting anything
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dispersiond=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // The key-manager front end is TLS-only; rustls 0.23 needs one
    // process-wide default CryptoProvider installed before any
    // ServerConfig::builder() call, or it panics.
    let _ = tokio_rustls::rustls::crypto::ring::default_provider().install_default();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Status => {
            println!("server_name: {}", config.server_name);
            println!("data_root:   {}", config.data_root);
            println!("meta_port:   {}", config.meta_port);
            println!("data_port:   {}", config.data_port);
            println!("km_port:     {} (TLS)", config.km_port);
        }
        Commands::Serve => run_server(config).await?,
    }

    Ok(())
}

fn build_service(db: &sled::Db, tree_name: &str, containers_path: std::path::PathBuf, recipes_path: std::path::PathBuf, inode_tree: &str) -> anyhow::Result<Arc<ServiceState>> {
    let containers = ContainerStore::new(containers_path)?;
    let dedup = DedupCore::new(db, tree_name, containers)?;
    let recipes = RecipeStore::new(recipes_path)?;
    let inodes = InodeIndexStore::new(db, inode_tree)?;
    Ok(Arc::new(ServiceState { dedup, buffers: BufferRegistry::new(), recipes, inodes }))
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(config.indices_path())?;
    std::fs::create_dir_all(config.recipes_path())?;
    std::fs::create_dir_all(config.meta_containers_path())?;
    std::fs::create_dir_all(config.data_containers_path())?;

    let db = sled::open(config.indices_path())?;

    let meta_state = build_service(
        &db,
        "meta_shares",
        config.meta_containers_path(),
        config.recipes_path().join("meta"),
        "meta_inodes",
    )?;
    let data_state = build_service(
        &db,
        "data_shares",
        config.data_containers_path(),
        config.recipes_path().join("data"),
        "data_inodes",
    )?;

    let meta_listener = TcpListener::bind(("0.0.0.0", config.meta_port)).await?;
    let data_listener = TcpListener::bind(("0.0.0.0", config.data_port)).await?;

    tracing::info!(port = config.meta_port, "meta front end listening");
    tracing::info!(port = config.data_port, "data front end listening");

    let meta_task = tokio::spawn(frontend::serve(meta_listener, meta_state, "meta"));
    let data_task = tokio::spawn(frontend::serve(data_listener, data_state, "data"));

    let km_task = match (
        std::path::Path::new(&config.km_tls_cert).exists(),
        std::path::Path::new(&config.km_tls_key).exists(),
        std::path::Path::new(&config.km_rsa_key_path).exists(),
    ) {
        (true, true, true) => {
            let acceptor = tls::build_acceptor(&config.km_tls_cert, &config.km_tls_key)?;
            let key = Arc::new(keymanager::load_private_key(&config.km_rsa_key_path)?);
            let km_listener = TcpListener::bind(("0.0.0.0", config.km_port)).await?;
            tracing::info!(port = config.km_port, "key manager front end listening");
            Some(tokio::spawn(keymanager::serve(km_listener, acceptor, key)))
        }
        _ => {
            tracing::warn!(
                "key manager TLS material or RSA key not found; running without a key manager front end"
            );
            None
        }
    };

    meta_task.await??;
    data_task.await??;
    if let Some(task) = km_task {
        task.await??;
    }

    Ok(())
}
