use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use pfm_core::{FieldKind, MemoryRecord, millis_to_iso8601};
use pfm_gateway::{
    Gateway, GatewayConfig, GatewayQuery, QueryRequest, RetrievalEngine, SimilarOptions,
};
use pfm_store::{AnalyticsStore, MemoryAnalytics, PatternRow, SqliteStore};
use serde_json::Value;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "pfm", about = "Probability-field memory CLI")]
struct Cli {
    /// Gateway configuration file (TOML). Falls back to PFM_CONFIG.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store pattern records from a JSON file, or stdin when omitted
    Store {
        /// File holding one record or an array of records
        file: Option<PathBuf>,
    },

    /// Run a field query
    Query {
        /// Pattern or category text
        text: String,

        /// Field kind: precision, discovery or creative
        #[arg(long)]
        mode: Option<String>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        confidence: Option<f64>,

        #[arg(long)]
        exploration: Option<f64>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Find records similar to a stored one
    Similar {
        id: String,

        #[arg(long)]
        min: Option<f64>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show the route a gateway request would take
    Route {
        /// Request JSON, or `-` for stdin
        request: String,
    },

    /// Send one request through the gateway and print the response
    Request {
        /// Request JSON, or `-` for stdin
        request: String,
    },

    /// Show system statistics
    Stats,
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn data_dir() -> PathBuf {
    std::env::var("PFM_DATA_DIR")
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir().join(".pfm"))
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

fn load_config(cli: &Cli) -> Result<GatewayConfig> {
    let path = cli
        .config
        .clone()
        .or_else(|| std::env::var("PFM_CONFIG").ok().map(PathBuf::from));
    match path {
        Some(path) => GatewayConfig::load(&path)
            .with_context(|| format!("failed to load {}", path.display())),
        None => Ok(GatewayConfig::default()),
    }
}

/// Everything a command needs, wired over the on-disk store.
struct Session {
    gateway: Gateway,
    store: Arc<SqliteStore>,
    analytics: Arc<MemoryAnalytics>,
    db_path: PathBuf,
}

async fn open_session(cli: &Cli) -> Result<Session> {
    let config = load_config(cli)?;
    let dir = data_dir();
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let db_path = dir.join("pfm.db");
    let store = Arc::new(SqliteStore::open(&db_path).context("failed to open store")?);

    let engine = RetrievalEngine::builder(&config)
        .index(store.clone())
        .persistent(store.clone())
        .build()
        .context("failed to build engine")?;
    let records = store.load_all().await.context("failed to load records")?;
    engine.hydrate(&records).await;

    let analytics = Arc::new(MemoryAnalytics::new());
    let rows: Vec<PatternRow> = records.iter().map(PatternRow::from_record).collect();
    analytics.insert_batch(&rows).await?;

    let gateway = Gateway::builder(config)
        .engine(Arc::new(engine))
        .analytics(analytics.clone())
        .build()
        .context("failed to build gateway")?;
    Ok(Session {
        gateway,
        store,
        analytics,
        db_path,
    })
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(p) if p != Path::new("-") => {
            std::fs::read_to_string(p).with_context(|| format!("failed to read {}", p.display()))
        }
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read stdin")?;
            Ok(buf)
        }
    }
}

fn request_json(arg: &str) -> Result<GatewayQuery> {
    let text = if arg == "-" { read_input(None)? } else { arg.to_string() };
    serde_json::from_str(&text).context("invalid request JSON")
}

/// Records from one object or an array of objects. Missing ids get a v4 UUID.
fn parse_records(text: &str) -> Result<Vec<MemoryRecord>> {
    let value: Value = serde_json::from_str(text).context("invalid record JSON")?;
    let items = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        _ => bail!("expected a record object or an array of records"),
    };
    items
        .into_iter()
        .map(|mut item| {
            if let Some(obj) = item.as_object_mut()
                && !obj.contains_key("id")
            {
                obj.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
            }
            serde_json::from_value(item).context("invalid record")
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Store { file } => cmd_store(&cli, file.as_deref()).await,
        Commands::Query {
            text,
            mode,
            limit,
            confidence,
            exploration,
            json,
        } => {
            let mut request = QueryRequest::text(text.as_str());
            if let Some(mode) = mode {
                request = request.kind(mode.parse::<FieldKind>()?);
            }
            if let Some(n) = limit {
                request = request.max_results(*n);
            }
            if let Some(c) = confidence {
                request = request.confidence(*c);
            }
            if let Some(e) = exploration {
                request = request.exploration(*e);
            }
            cmd_query(&cli, request, *json).await
        }
        Commands::Similar { id, min, limit } => cmd_similar(&cli, id, *min, *limit).await,
        Commands::Route { request } => cmd_route(&cli, request).await,
        Commands::Request { request } => cmd_request(&cli, request).await,
        Commands::Stats => cmd_stats(&cli).await,
    }
}

async fn cmd_store(cli: &Cli, file: Option<&Path>) -> Result<()> {
    let records = parse_records(&read_input(file)?)?;
    let session = open_session(cli).await?;
    let stored = session
        .gateway
        .store_records(&records)
        .await
        .context("failed to store records")?;
    for r in &stored {
        println!("stored {} ({})", r.id, r.category_key());
    }
    println!("done. {} records", stored.len());
    Ok(())
}

async fn cmd_query(cli: &Cli, request: QueryRequest, json: bool) -> Result<()> {
    let session = open_session(cli).await?;
    let result = session.gateway.engine().query(request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    if result.memories.is_empty() {
        println!("(no memories found)");
    }
    for m in &result.memories {
        println!(
            "{:.3}  {:<12} {}  {}",
            m.probability, m.category, m.id, m.record.content.title
        );
    }
    for insight in &result.insights {
        println!("insight: {}", insight.description);
    }
    if cli.verbose {
        eprintln!(
            "--- strategy={:?}, coherence={:.3}, total={:.3}ms ---",
            result.strategy, result.coherence, result.timings.total_ms
        );
    }
    Ok(())
}

async fn cmd_similar(cli: &Cli, id: &str, min: Option<f64>, limit: Option<usize>) -> Result<()> {
    let session = open_session(cli).await?;
    let similar = session
        .gateway
        .engine()
        .find_similar(
            id,
            SimilarOptions {
                min_similarity: min,
                max_results: limit,
            },
        )
        .await?;
    if similar.is_empty() {
        println!("(no similar memories)");
    }
    for m in &similar {
        println!("{:.3}  {:<12} {}", m.probability, m.category, m.id);
    }
    Ok(())
}

async fn cmd_route(cli: &Cli, request: &str) -> Result<()> {
    let query = request_json(request)?;
    let session = open_session(cli).await?;
    let decision = session.gateway.route(&query);
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(())
}

async fn cmd_request(cli: &Cli, request: &str) -> Result<()> {
    let query = request_json(request)?;
    let session = open_session(cli).await?;
    let response = session.gateway.handle_request(query).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.success {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_stats(cli: &Cli) -> Result<()> {
    let session = open_session(cli).await?;
    let stats = session.gateway.engine().stats().await;
    let rows = session.store.count().await?;
    let summary = session.analytics.summary().await?;

    println!("records:    {rows}");
    println!("nodes:      {}", stats.nodes);
    println!("categories: {}", stats.categories);
    println!("occupancy:  {:.3}", stats.occupancy);
    println!("backend:    {}", stats.index_backend);
    if let Some(last) = summary.last_ms {
        println!("last store: {}", millis_to_iso8601(last));
    }
    println!("db:         {}", session.db_path.display());
    Ok(())
}
