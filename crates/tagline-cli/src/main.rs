use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tagline_core::{AudienceKind, Mutation, SystemClock, TagGroups, TagGroupsMutation};
use tagline_historian::{
    HistorianConfig, RecordStore, Registrar, StoredRegistrar, TagGroupHistorian,
};
use tagline_storage::{ConfigStore, SqliteConfigStore};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tagline")]
#[command(about = "Local tag group history for channels and named users", long_about = None)]
struct Cli {
    /// SQLite database holding records and pending queues
    #[arg(long)]
    db: Option<PathBuf>,
    /// TOML historian config
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a mutation for upload
    Enqueue {
        #[arg(long)]
        audience: AudienceKind,
        /// Mutation JSON, e.g. '{"add":{"music":["rock"]}}'
        #[arg(long)]
        mutation: String,
    },
    /// Confirm the oldest pending mutation as uploaded
    Upload {
        #[arg(long)]
        audience: AudienceKind,
    },
    /// Print pending mutations
    Pending {
        #[arg(long)]
        audience: AudienceKind,
    },
    /// Print every stored record, expired ones included
    Records,
    /// Print the effective tag groups
    Apply {
        /// Only replay records at or after this epoch millisecond
        #[arg(long, default_value_t = 0)]
        since: i64,
        /// JSON file with the base tag groups snapshot
        #[arg(long)]
        tags: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = match cli.config.as_deref() {
        Some(path) => HistorianConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => HistorianConfig::default(),
    };
    let db_path = match cli.db {
        Some(path) => path,
        None => default_db_path()?,
    };
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let store: Arc<dyn ConfigStore> = Arc::new(
        SqliteConfigStore::open(&db_path)
            .with_context(|| format!("Failed to open {}", db_path.display()))?,
    );
    let registrar = Arc::new(StoredRegistrar::<TagGroupsMutation>::new(store.clone()));
    let historian = Arc::new(TagGroupHistorian::<TagGroupsMutation>::with_config(
        registrar.clone(),
        store.clone(),
        Arc::new(SystemClock),
        &config,
    ));
    historian.init();
    debug!(event = "tagline_open", db = %db_path.display());

    match cli.command {
        Commands::Enqueue { audience, mutation } => {
            let value: Value =
                serde_json::from_str(&mutation).context("Failed to parse mutation JSON")?;
            let mutation = TagGroupsMutation::from_json(&value)?;
            if mutation.is_empty() {
                bail!("Mutation has no operations");
            }
            registrar.enqueue(audience, &mutation)?;
            info!(event = "tagline_enqueued", audience = %audience);
        }
        Commands::Upload { audience } => match registrar.confirm_upload(audience)? {
            Some(mutation) => print_json(&mutation.to_json())?,
            None => println!("No pending {audience} mutations"),
        },
        Commands::Pending { audience } => {
            let pending = registrar
                .pending_mutations(audience)
                .context("Failed to read pending mutations")?;
            print_json(&Value::Array(pending.iter().map(Mutation::to_json).collect()))?;
        }
        Commands::Records => {
            let records = RecordStore::new(store.clone(), config.records_key.clone())
                .load::<TagGroupsMutation>()?;
            let value = Value::Array(records.iter().map(|record| record.to_json()).collect());
            print_json(&value)?;
        }
        Commands::Apply { since, tags } => {
            let mut base = match tags.as_deref() {
                Some(path) => read_tag_groups(path)?,
                None => TagGroups::new(),
            };
            historian.apply_local_data(&mut base, since)?;
            print_json(&serde_json::to_value(&base)?)?;
        }
    }

    Ok(())
}

fn read_tag_groups(path: &Path) -> Result<TagGroups> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn default_db_path() -> Result<PathBuf> {
    let base = dirs::data_dir().context("No data directory for this platform")?;
    Ok(base.join("tagline").join("tagline.db"))
}

fn init_logging(debug: bool) {
    let level = if debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("TAGLINE_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("log_init_error: subscriber already set");
    }
}
