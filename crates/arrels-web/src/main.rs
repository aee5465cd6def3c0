//! `arrels-server`: the Arrels HTTP service.
//!
//! Settings are layered: the TOML file named by `--config`, then `ARRELS_*`
//! variables for the server keys, then the bare `WIKI_*` variables for the
//! wiki limits. Run with `--hash-password` to turn a password read from
//! stdin into an argon2 PHC string.

use std::{
  io::{self, BufRead, Write},
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::{Context as _, anyhow};
use arrels_governance::Governance;
use arrels_store_sqlite::SqliteStore;
use arrels_web::{AppState, ServerConfig, auth::hash_password};
use clap::Parser;
use config::{Config, Environment, File};
use tokio::net::TcpListener;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Arrels genealogy wiki server")]
struct Cli {
  /// TOML configuration file; missing is fine when the environment has
  /// everything.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Hash a password from stdin, print it and exit.
  #[arg(long)]
  hash_password: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let filter = EnvFilter::builder()
    .with_default_directive(LevelFilter::INFO.into())
    .from_env_lossy();
  tracing_subscriber::fmt().with_env_filter(filter).init();

  let cli = Cli::parse();
  if cli.hash_password {
    let hash = hash_password(&prompt_password()?).map_err(|e| anyhow!("{e}"))?;
    println!("{hash}");
    return Ok(());
  }

  let server_cfg = load_config(cli.config)?;
  serve(server_cfg).await
}

fn load_config(path: PathBuf) -> anyhow::Result<ServerConfig> {
  Config::builder()
    .add_source(File::from(path).required(false))
    .add_source(Environment::with_prefix("ARRELS").try_parsing(true))
    .add_source(Environment::with_prefix("WIKI").keep_prefix(true).try_parsing(true))
    .build()
    .context("could not read configuration")?
    .try_deserialize()
    .context("invalid server configuration")
}

async fn serve(server_cfg: ServerConfig) -> anyhow::Result<()> {
  let store_path = home_relative(&server_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("could not open the store at {}", store_path.display()))?;

  let gov = Governance::new(Arc::new(store), server_cfg.governance.clone());
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);
  let app = arrels_web::router(AppState { gov: Arc::new(gov), config: Arc::new(server_cfg) });

  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("could not bind {address}"))?;
  info!(%address, store = %store_path.display(), "arrels listening");
  axum::serve(listener, app).await.context("server stopped")
}

fn prompt_password() -> anyhow::Result<String> {
  print!("Password: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  Ok(line.trim_end_matches(['\n', '\r']).to_owned())
}

/// `~/x` under `$HOME`; other paths unchanged.
fn home_relative(path: &Path) -> PathBuf {
  match (path.strip_prefix("~"), std::env::var_os("HOME")) {
    (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
    _ => path.to_path_buf(),
  }
}
