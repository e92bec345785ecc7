//! VaultLog Storage CLI
//!
//! Local-first entry point for the VaultLog record store. Every mutating
//! command writes the local database first, queues the mutation for the
//! remote document store, and then attempts a best-effort sync.
//!
//! ## Usage
//!
//! ```bash
//! # Record a new pole, syncing if the backend is reachable
//! vaultlog-storage add-pole --brand "UCS Spirit" --length 156 --flex 16.8
//!
//! # Record offline; the mutation stays queued
//! vaultlog-storage --offline add-athlete --name "Jo Vault" --grade 11 --gender female
//!
//! # Drain anything still pending
//! vaultlog-storage sync
//!
//! # Replace a local collection with the remote contents
//! vaultlog-storage pull poles
//! ```

use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vaultlog_storage::records::{new_record_id, to_document};
use vaultlog_storage::sync::refresh_collection;
use vaultlog_storage::{
    Athlete, Attempt, AttemptResult, Collection, Config, DrainOutcome, Gender, GenderGrouping,
    HttpBackend, HttpBackendConfig, Meet, Mutation, MutationQueue, NetworkState, Pole,
    RecordStore, SyncEngine, SyncOptions,
};

#[derive(Parser, Debug)]
#[command(name = "vaultlog-storage")]
#[command(about = "Local-first record store and sync engine for VaultLog")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Base URL of the remote document store
    #[arg(long, env = "VAULTLOG_REMOTE_URL")]
    remote_url: Option<String>,

    /// Bearer token for the remote document store
    #[arg(long, env = "VAULTLOG_API_KEY")]
    api_key: Option<String>,

    /// Treat the device as offline: queue mutations without syncing
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add an athlete
    AddAthlete {
        #[arg(long)]
        name: String,
        #[arg(long)]
        grade: u8,
        #[arg(long, value_enum)]
        gender: Gender,
    },
    /// Add a pole
    AddPole {
        #[arg(long)]
        brand: String,
        /// Length in inches
        #[arg(long)]
        length: f64,
        #[arg(long)]
        flex: String,
        #[arg(long)]
        weight_rating: Option<u32>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Add a meet
    AddMeet {
        #[arg(long)]
        name: String,
        /// Meet date (ISO format)
        #[arg(long)]
        date: String,
        #[arg(long, value_enum, default_value = "separate")]
        gender_grouping: GenderGrouping,
        /// Linked athlete ids (repeatable)
        #[arg(long = "athlete-id")]
        athlete_ids: Vec<String>,
    },
    /// Record a jump attempt
    AddAttempt {
        #[arg(long)]
        meet_id: String,
        #[arg(long)]
        athlete_id: String,
        #[arg(long)]
        pole_id: Option<String>,
        /// Bar height in inches
        #[arg(long)]
        height: f64,
        #[arg(long)]
        grip_height: f64,
        #[arg(long)]
        start_distance: f64,
        #[arg(long)]
        takeoff_distance: f64,
        #[arg(long, value_enum)]
        result: AttemptResult,
        #[arg(long)]
        comment: Option<String>,
        /// 1, 2 or 3
        #[arg(long)]
        attempt_number: u8,
    },
    /// List a collection, newest first
    List {
        #[arg(value_enum)]
        collection: Collection,
    },
    /// Delete a record by id
    Delete {
        #[arg(value_enum)]
        collection: Collection,
        id: String,
    },
    /// Show how many mutations are waiting to sync
    Status,
    /// Drain the pending mutation queue
    Sync,
    /// Replace a local collection with the remote contents
    Pull {
        #[arg(value_enum)]
        collection: Collection,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("vaultlog_storage=info".parse()?),
        )
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if let Some(url) = args.remote_url {
        config.remote_url = url;
    }
    if let Some(key) = args.api_key {
        config.api_key = Some(key);
    }

    // Ensure data directory exists
    tokio::fs::create_dir_all(&config.data_dir).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let store = RecordStore::open(config.records_db_path())?;
    let queue = MutationQueue::open(config.queue_db_path())?;
    let backend = Arc::new(HttpBackend::new(HttpBackendConfig {
        base_url: config.remote_url.clone(),
        api_key: config.api_key.clone(),
        timeout: config.request_timeout(),
    })?);
    let network = Arc::new(NetworkState::new(!args.offline));
    let engine = Arc::new(SyncEngine::new(
        queue,
        backend.clone(),
        network,
        SyncOptions::from_config(&config),
    ));

    // Whether the command needs a drain or a pull once local work is done
    enum Post {
        Drain,
        Pull(Collection),
        Nothing,
    }

    let post = match args.command {
        Command::AddAthlete {
            name,
            grade,
            gender,
        } => {
            let now = Utc::now();
            let athlete = Athlete {
                id: new_record_id(),
                name,
                grade,
                gender,
                created_at: now,
                updated_at: now,
            };
            create_record(&store, &engine, Collection::Athletes, &athlete)?;
            Post::Drain
        }
        Command::AddPole {
            brand,
            length,
            flex,
            weight_rating,
            notes,
        } => {
            let pole = Pole {
                id: new_record_id(),
                brand,
                length,
                flex,
                weight_rating,
                notes,
                created_at: Utc::now(),
            };
            create_record(&store, &engine, Collection::Poles, &pole)?;
            Post::Drain
        }
        Command::AddMeet {
            name,
            date,
            gender_grouping,
            athlete_ids,
        } => {
            let meet = Meet {
                id: new_record_id(),
                name,
                date,
                gender_grouping,
                athlete_ids,
                created_at: Utc::now(),
            };
            create_record(&store, &engine, Collection::Meets, &meet)?;
            Post::Drain
        }
        Command::AddAttempt {
            meet_id,
            athlete_id,
            pole_id,
            height,
            grip_height,
            start_distance,
            takeoff_distance,
            result,
            comment,
            attempt_number,
        } => {
            let attempt = Attempt {
                id: new_record_id(),
                meet_id,
                athlete_id,
                pole_id,
                height,
                grip_height,
                start_distance,
                takeoff_distance,
                result,
                comment,
                attempt_number,
                created_at: Utc::now(),
            };
            create_record(&store, &engine, Collection::Attempts, &attempt)?;
            Post::Drain
        }
        Command::List { collection } => {
            for doc in store.all(collection)? {
                println!("{}", serde_json::to_string_pretty(&doc)?);
            }
            Post::Nothing
        }
        Command::Delete { collection, id } => {
            if store.remove(collection, &id)? {
                engine.enqueue(Mutation::delete(collection, id.clone()))?;
                info!(collection = %collection, id = %id, "Record deleted");
            } else {
                warn!(collection = %collection, id = %id, "No such record");
            }
            Post::Drain
        }
        Command::Status => {
            println!("{} mutation(s) pending sync", engine.pending()?);
            Post::Nothing
        }
        Command::Sync => Post::Drain,
        Command::Pull { collection } => Post::Pull(collection),
    };

    match post {
        Post::Nothing => {}
        Post::Pull(collection) => {
            let count = refresh_collection(&store, backend.as_ref(), collection).await?;
            println!("{collection}: {count} record(s) pulled from remote");
            store.flush()?;
        }
        Post::Drain => {
            // Best-effort drain; failures stay queued for the next run
            match engine.drain().await {
                Ok(DrainOutcome::Completed { applied }) => {
                    info!(applied, "Sync complete");
                }
                Ok(DrainOutcome::Offline) => {
                    info!(pending = engine.pending()?, "Offline, mutations queued");
                }
                Ok(DrainOutcome::Empty) => {}
                Ok(DrainOutcome::Busy) => {
                    info!("Sync already in progress");
                }
                Err(e) => {
                    warn!(error = %e, pending = engine.pending()?, "Sync failed, mutations kept");
                }
            }
            store.flush()?;
        }
    }

    Ok(())
}

/// Write locally, then queue the remote create
fn create_record<T: serde::Serialize>(
    store: &RecordStore,
    engine: &Arc<SyncEngine>,
    collection: Collection,
    record: &T,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fields = to_document(record)?;
    let id = store.insert(collection, &fields)?;
    engine.enqueue(Mutation::create(collection, id.clone(), fields))?;
    info!(collection = %collection, id = %id, "Record added");
    Ok(())
}
