use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use registrar::config::Config;
use registrar::grading::validate_rule_set;
use registrar::models::{ActiveTermState, CreateGradingRuleInput};
use registrar::terms::TermLifecycleManager;
use registrar::{api, db};

#[derive(Parser)]
#[command(name = "registrar")]
#[command(about = "Term lifecycle, grade resolution and teaching assignments")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port for HTTP API (overrides REGISTRAR_PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Database file (overrides REGISTRAR_DB_PATH)
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Print the active session and term
    Active {
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Make a term the active term
    Activate {
        term_id: Uuid,

        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Check a JSON file of grading rules without storing it
    ValidateRules { path: PathBuf },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "registrar=debug,tower_http=debug".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn open_database(config: &Config, override_path: Option<PathBuf>) -> anyhow::Result<db::Database> {
    let db = match override_path.or_else(|| config.database_path.clone()) {
        Some(path) => db::Database::open(path)?,
        None => db::Database::open_default()?,
    };
    db.migrate()?;
    Ok(db)
}

async fn serve(config: Config, port: Option<u16>, db_path: Option<PathBuf>) -> anyhow::Result<()> {
    let port = port.unwrap_or(config.port);
    tracing::info!("Starting registrar on port {}", port);

    let db = open_database(&config, db_path)?;
    let app = api::create_router_with_config(db, &config);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!("Registrar listening on http://127.0.0.1:{}", port);

    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = Config::from_env();

    match cli.command {
        Some(Commands::Serve { port, db }) => serve(config, port, db).await?,
        Some(Commands::Active { db }) => {
            let terms = TermLifecycleManager::with_config(open_database(&config, db)?, &config);
            match terms.get_active().await? {
                ActiveTermState::Active(active) => println!(
                    "{} / {} (term {}, version {})",
                    active.session.name, active.term.name, active.term.id, active.version
                ),
                ActiveTermState::NoActiveTerm => println!("No active term"),
            }
        }
        Some(Commands::Activate { term_id, db }) => {
            let terms = TermLifecycleManager::with_config(open_database(&config, db)?, &config);
            let active = terms.activate(term_id).await?;
            println!(
                "Activated {} / {} (version {})",
                active.session.name, active.term.name, active.version
            );
        }
        Some(Commands::ValidateRules { path }) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let rules: Vec<CreateGradingRuleInput> = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", path.display()))?;
            match validate_rule_set(&rules) {
                Ok(()) => println!("{}: {} rules, valid", path.display(), rules.len()),
                Err(violation) => anyhow::bail!("{}: {}", path.display(), violation),
            }
        }
        None => serve(config, None, None).await?,
    }

    Ok(())
}
