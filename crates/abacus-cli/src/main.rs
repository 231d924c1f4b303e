mod config;
mod recover_cmd;
mod serve_cmd;
mod status_cmd;
mod worker_cmd;

use clap::{Parser, Subcommand};

use abacus_core::dispatch::DispatchConfig;
use abacus_core::latency::OperationTimes;
use abacus_db::pool;

use config::AbacusConfig;

#[derive(Parser)]
#[command(name = "abacus", about = "Distributed arithmetic evaluator")]
struct Cli {
    /// Database URL (overrides ABACUS_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an abacus config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/abacus")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the abacus database (requires config file or env vars)
    DbInit,
    /// Run the orchestrator: public API plus the internal worker RPC
    Serve {
        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        /// Port to listen on
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Run compute workers against an orchestrator
    Work {
        /// Orchestrator base URL
        #[arg(long, default_value = "http://localhost:8080")]
        orchestrator_url: String,
        /// Number of concurrent worker loops (default: COMPUTING_POWER, else 1)
        #[arg(long, default_value_t = worker_cmd::default_concurrency())]
        concurrency: usize,
        /// Worker id prefix; loop i identifies as <name>-<i>
        #[arg(long, default_value = "worker")]
        name: String,
    },
    /// Show recent expressions and task progress
    Status {
        /// Maximum number of expressions to list
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Requeue tasks stranded in progress by a crashed worker
    Recover,
}

/// Execute the `abacus init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let secret = config::generate_auth_secret();

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_string(),
        },
        auth: config::AuthSection {
            secret: secret.clone(),
        },
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!("  auth.secret = {}...{}", &secret[..8], &secret[56..]);
    println!();
    println!("Next: run `abacus db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `abacus db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = AbacusConfig::resolve(cli_db_url)?;

    println!("Initializing abacus database...");

    // 1. Create the database if it does not exist.
    pool::ensure_database_exists(&resolved.db_config).await?;

    // 2. Connect to the target database.
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    // 3. Run migrations.
    pool::run_migrations(&db_pool).await?;

    // 4. Print success with table counts.
    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    // 5. Clean shutdown.
    db_pool.close().await;

    println!("abacus db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Serve { bind, port } => {
            let resolved = AbacusConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;

            // Latency table and dispatch config are read once at startup
            // and immutable afterwards.
            let state = serve_cmd::AppState::new(
                db_pool.clone(),
                OperationTimes::from_env(),
                resolved.auth_config,
                DispatchConfig::from_env(),
            );
            let result = serve_cmd::run_serve(state, &bind, port).await;
            db_pool.close().await;
            result?;
        }
        Commands::Work {
            orchestrator_url,
            concurrency,
            name,
        } => {
            let options = worker_cmd::WorkerOptions {
                orchestrator_url,
                concurrency,
                name,
            };
            worker_cmd::run_work(&options).await?;
        }
        Commands::Status { limit } => {
            let resolved = AbacusConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = status_cmd::run_status(&db_pool, limit).await;
            db_pool.close().await;
            result?;
        }
        Commands::Recover => {
            let resolved = AbacusConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = recover_cmd::run_recover(&db_pool).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}
