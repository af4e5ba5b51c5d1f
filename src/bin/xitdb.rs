//! xitdb command-line tool
//!
//! Inspects and repairs database files:
//! - Header and size information
//! - Per-moment history summary
//! - JSON dump of any moment
//! - Integrity walk over every reachable slot
//! - Explicit recovery of uncommitted bytes
//!
//! # Examples
//!
//! ```bash
//! xitdb info app.db
//! xitdb dump app.db --moment -2
//! xitdb --log-level debug truncate app.db
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use xitdb::{Database, DatabaseConfig, Hasher, ReadCursor, Tag};

/// xitdb - inspect append-only database files
#[derive(Parser, Debug)]
#[command(name = "xitdb")]
#[command(version = xitdb::VERSION)]
#[command(about = "Inspect and repair xitdb database files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log directory path
    #[arg(long, global = true, default_value = "logs", env = "XITDB_LOG_DIR")]
    log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn", env = "RUST_LOG")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// TOML file with database settings
    #[arg(long, global = true, env = "XITDB_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show header fields and sizes
    Info {
        /// Database file
        file: PathBuf,
    },

    /// Summarize each moment of a top-level history
    History {
        /// Database file
        file: PathBuf,
    },

    /// Print a moment as JSON
    Dump {
        /// Database file
        file: PathBuf,
        /// Moment to print; negative values count back from the latest
        #[arg(long, allow_hyphen_values = true)]
        moment: Option<i64>,
    },

    /// Walk every reachable slot and report corruption
    Verify {
        /// Database file
        file: PathBuf,
    },

    /// Discard bytes written after the last commit
    Truncate {
        /// Database file
        file: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli)?;

    let config = DatabaseConfig::load(cli.config.as_deref())?;
    match cli.command {
        Commands::Info { file } => info_command(open(config, &file, true)?),
        Commands::History { file } => history_command(open(config, &file, true)?),
        Commands::Dump { file, moment } => dump_command(open(config, &file, true)?, moment),
        Commands::Verify { file } => verify_command(open(config, &file, true)?),
        Commands::Truncate { file } => truncate_command(config, &file),
    }
}

/// Setup logging with rolling files and console output
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    std::fs::create_dir_all(&cli.log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &cli.log_dir, "xitdb.log");

    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::WARN);

    // stdout carries command output
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!cli.no_color),
        )
        .with(fmt::layer().with_writer(file_appender).with_ansi(false))
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}

fn open(mut config: DatabaseConfig, file: &Path, read_only: bool) -> anyhow::Result<Database> {
    if !file.exists() {
        bail!("database file not found: {}", file.display());
    }
    config.path = Some(file.to_path_buf());
    config.read_only = read_only;
    Database::from_config(&config)
        .with_context(|| format!("failed to open {}", file.display()))
}

/// Cursor at a moment of the history, or at the root of a plain database
fn moment_cursor(db: &Database, moment: Option<i64>) -> anyhow::Result<ReadCursor<'_>> {
    let root = db.root_read_cursor();
    if db.header().tag != Tag::ArrayList {
        if moment.is_some() {
            bail!("--moment requires a top-level history");
        }
        return Ok(root);
    }

    let index = moment.unwrap_or(-1);
    let history = xitdb::ReadArrayList::new(root)?;
    history
        .get_cursor(index)?
        .with_context(|| format!("moment {index} not found"))
}

fn info_command(db: Database) -> anyhow::Result<()> {
    let header = db.header();
    let root = db.root_read_cursor();
    let count = match header.tag {
        Tag::ArrayList | Tag::LinkedArrayList | Tag::CountedHashMap => Some(root.count()?),
        Tag::HashMap => Some(root.iter()?.count() as u64),
        _ => None,
    };

    let summary = json!({
        "version": header.version,
        "hash_id": Hasher::id_to_string(header.hash_id),
        "hash_size": header.hash_size,
        "top_level": format!("{:?}", header.tag),
        "count": count,
        "committed_length": db.committed_length()?,
        "length": db.length()?,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn history_command(db: Database) -> anyhow::Result<()> {
    if db.header().tag != Tag::ArrayList {
        bail!("database has no top-level history");
    }

    let history = xitdb::ReadArrayList::new(db.root_read_cursor())?;
    for (index, moment) in history.iter()?.enumerate() {
        let moment = moment?;
        let slot = moment.slot();
        let entries = match slot.tag {
            Tag::ArrayList | Tag::LinkedArrayList | Tag::CountedHashMap => moment.count()?,
            Tag::HashMap => moment.iter()?.count() as u64,
            _ => 0,
        };
        println!("{index:>6}  {:<16} {entries:>8} entries  @{}", format!("{:?}", slot.tag), slot.value);
    }
    Ok(())
}

fn dump_command(db: Database, moment: Option<i64>) -> anyhow::Result<()> {
    let cursor = moment_cursor(&db, moment)?;
    let value = render(&cursor)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// JSON rendering of the value behind `cursor`
fn render(cursor: &ReadCursor<'_>) -> anyhow::Result<Value> {
    let slot = cursor.slot();
    let value = match slot.tag {
        Tag::None => Value::Null,
        Tag::Uint => json!(cursor.read_uint()?),
        Tag::Int => json!(cursor.read_int()?),
        Tag::Float => json!(cursor.read_float()?),
        Tag::Bytes | Tag::ShortBytes => render_bytes(cursor.read_bytes(None)?),
        Tag::ArrayList | Tag::LinkedArrayList => {
            let mut items = Vec::new();
            for item in cursor.iter()? {
                items.push(render(&item?)?);
            }
            Value::Array(items)
        }
        Tag::HashMap | Tag::CountedHashMap => {
            let mut object = Map::new();
            for entry in cursor.iter()? {
                let pair = entry?.read_key_value_pair()?;
                let key = if pair.key_cursor.slot().empty() {
                    pair.hash.iter().map(|b| format!("{b:02x}")).collect()
                } else {
                    String::from_utf8_lossy(&pair.key_cursor.read_bytes(None)?).into_owned()
                };
                object.insert(key, render(&pair.value_cursor)?);
            }
            Value::Object(object)
        }
        Tag::KvPair | Tag::Index => bail!("unexpected {:?} slot at {:?}", slot.tag, cursor.slot_ptr().position),
    };
    Ok(value)
}

fn render_bytes(bytes: Vec<u8>) -> Value {
    match String::from_utf8(bytes) {
        Ok(text) => Value::String(text),
        Err(err) => json!(err.into_bytes()),
    }
}

fn verify_command(db: Database) -> anyhow::Result<()> {
    let mut report = VerifyReport::default();
    verify_slot(&db.root_read_cursor(), &mut report);

    println!("{} slots visited, {} problems", report.visited, report.problems.len());
    for problem in &report.problems {
        println!("  {problem}");
    }
    if !report.problems.is_empty() {
        bail!("database failed verification");
    }
    Ok(())
}

#[derive(Debug, Default)]
struct VerifyReport {
    visited: u64,
    problems: Vec<String>,
}

fn verify_slot(cursor: &ReadCursor<'_>, report: &mut VerifyReport) {
    report.visited += 1;
    let slot = cursor.slot();
    let result = match slot.tag {
        Tag::ArrayList | Tag::LinkedArrayList | Tag::HashMap | Tag::CountedHashMap => {
            verify_children(cursor, report)
        }
        Tag::Bytes => cursor.read_bytes(None).map(|_| ()).map_err(Into::into),
        Tag::KvPair | Tag::Index => Err(anyhow::anyhow!("{:?} slot outside its structure", slot.tag)),
        _ => Ok(()),
    };
    if let Err(err) = result {
        warn!(position = ?cursor.slot_ptr().position, error = %err, "Verification problem");
        report
            .problems
            .push(format!("slot at {:?}: {err}", cursor.slot_ptr().position));
    }
}

fn verify_children(cursor: &ReadCursor<'_>, report: &mut VerifyReport) -> anyhow::Result<()> {
    let is_map = matches!(cursor.slot().tag, Tag::HashMap | Tag::CountedHashMap);
    let mut entries = 0u64;
    for child in cursor.iter()? {
        entries += 1;
        let child = child?;
        if is_map {
            let pair = child.read_key_value_pair()?;
            verify_slot(&pair.key_cursor, report);
            verify_slot(&pair.value_cursor, report);
        } else {
            verify_slot(&child, report);
        }
    }
    if cursor.slot().tag == Tag::CountedHashMap {
        let stored = cursor.count()?;
        if stored != entries {
            bail!("map count is {stored} but {entries} entries were found");
        }
    }
    Ok(())
}

fn truncate_command(config: DatabaseConfig, file: &Path) -> anyhow::Result<()> {
    let before = std::fs::metadata(file)
        .with_context(|| format!("database file not found: {}", file.display()))?
        .len();

    // opening read-write already discards uncommitted bytes
    let db = open(config, file, false)?;
    db.truncate()?;
    db.sync()?;

    let after = db.length()?;
    let discarded = before.saturating_sub(after);
    info!(before, after, discarded, "Truncation finished");
    println!("discarded {discarded} bytes ({before} -> {after})");
    Ok(())
}
