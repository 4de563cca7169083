use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use statedb_core::buckets::is_deprecated;
use statedb_core::{
    get_stage_progress, get_stage_unwind, read_schema_version, Backend, Stage, Store,
};
use statedb_migrations::{snapshot_block_numbers, unmarshal_migration_payload, Migrator};
use statedb_store_sqlite::SqliteStore;
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const CLI_CONTRACT_VERSION: &str = "sdb.v1";

#[derive(Debug, Parser)]
#[command(name = "sdb")]
#[command(about = "State database maintenance CLI")]
struct Cli {
    #[arg(long, default_value = "./statedb.sqlite3")]
    db: PathBuf,

    /// Scratch root for migrations; defaults to the database's directory.
    #[arg(long)]
    datadir: Option<PathBuf>,

    /// Storage engine whose schema version is stamped after applying migrations.
    #[arg(long, value_enum, default_value_t = BackendArg::Mdbx)]
    backend: BackendArg,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    Lmdb,
    Mdbx,
}

impl From<BackendArg> for Backend {
    fn from(value: BackendArg) -> Self {
        match value {
            BackendArg::Lmdb => Backend::Lmdb,
            BackendArg::Mdbx => Backend::Mdbx,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    Migrations {
        #[command(subcommand)]
        command: Box<MigrationsCommand>,
    },
    Db {
        #[command(subcommand)]
        command: Box<DbCommand>,
    },
}

#[derive(Debug, Subcommand)]
enum MigrationsCommand {
    List,
    Pending,
    Apply(ApplyArgs),
    Payload(PayloadArgs),
}

#[derive(Debug, Args)]
struct ApplyArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct PayloadArgs {
    name: String,
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    /// Forward progress and unwind point of every sync stage.
    Stages,
    /// Registered buckets, flagging the ones older releases left behind.
    Buckets,
}

#[derive(Debug, Serialize)]
struct MigrationStatus<'a> {
    name: &'a str,
    applied: bool,
}

#[derive(Debug, Serialize)]
struct StageStatus {
    stage: Stage,
    progress: u64,
    unwind: u64,
}

#[derive(Debug, Serialize)]
struct BucketStatus {
    name: String,
    deprecated: bool,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn scratch_root(cli: &Cli) -> PathBuf {
    if let Some(datadir) = &cli.datadir {
        return datadir.clone();
    }
    match cli.db.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let store = SqliteStore::open(&cli.db)
        .with_context(|| format!("failed to open state database {}", cli.db.display()))?;
    debug!(db = %cli.db.display(), "opened state database");

    match &cli.command {
        Command::Migrations { command } => run_migrations(command, &cli, &store),
        Command::Db { command } => run_db(command, &cli, &store),
    }
}

fn run_migrations(command: &MigrationsCommand, cli: &Cli, store: &SqliteStore) -> Result<()> {
    let migrator = Migrator::default();
    match command {
        MigrationsCommand::List => run_migrations_list(&migrator, store),
        MigrationsCommand::Pending => run_migrations_pending(&migrator, store),
        MigrationsCommand::Apply(args) => run_migrations_apply(args, cli, &migrator, store),
        MigrationsCommand::Payload(args) => run_migrations_payload(args, store),
    }
}

fn pending_names(migrator: &Migrator, store: &SqliteStore) -> Result<Vec<String>> {
    Ok(migrator
        .pending_migrations(store)?
        .into_iter()
        .map(|migration| migration.name().to_string())
        .collect())
}

fn schema_version_json(store: &SqliteStore) -> Result<Value> {
    let tx = store.begin_ro()?;
    Ok(read_schema_version(&tx)?.map_or(Value::Null, |version| Value::String(version.to_string())))
}

fn run_migrations_list(migrator: &Migrator, store: &SqliteStore) -> Result<()> {
    let applied = Migrator::applied(store, false)?;
    let migrations = migrator
        .migrations()
        .iter()
        .map(|migration| MigrationStatus {
            name: migration.name(),
            applied: applied.contains_key(migration.name()),
        })
        .collect::<Vec<_>>();
    emit_json(serde_json::json!({ "migrations": migrations }))
}

fn run_migrations_pending(migrator: &Migrator, store: &SqliteStore) -> Result<()> {
    let pending = pending_names(migrator, store)?;
    emit_json(serde_json::json!({
        "has_pending": !pending.is_empty(),
        "pending": pending
    }))
}

fn run_migrations_apply(
    args: &ApplyArgs,
    cli: &Cli,
    migrator: &Migrator,
    store: &SqliteStore,
) -> Result<()> {
    let before = pending_names(migrator, store)?;
    let before_version = schema_version_json(store)?;
    if args.dry_run {
        emit_json(serde_json::json!({
            "dry_run": true,
            "would_apply": before,
            "schema_version": before_version
        }))?;
        return Ok(());
    }

    let backend = Backend::from(cli.backend);
    migrator
        .apply(store, &scratch_root(cli), backend)
        .context("failed to apply migrations")?;

    let after = pending_names(migrator, store)?;
    emit_json(serde_json::json!({
        "dry_run": false,
        "applied": before,
        "pending": after,
        "backend": backend.as_str(),
        "before_schema_version": before_version,
        "schema_version": schema_version_json(store)?
    }))
}

fn run_migrations_payload(args: &PayloadArgs, store: &SqliteStore) -> Result<()> {
    let applied = Migrator::applied(store, true)?;
    let payload = applied
        .get(&args.name)
        .ok_or_else(|| anyhow!("migration {} has not been applied", args.name))?;
    let snapshot = unmarshal_migration_payload(payload)
        .with_context(|| format!("failed to decode payload of migration {}", args.name))?;
    let blocks = snapshot_block_numbers(&snapshot);
    let stages = snapshot
        .into_iter()
        .map(|(key, value)| (key, hex::encode(value)))
        .collect::<BTreeMap<_, _>>();
    emit_json(serde_json::json!({
        "name": args.name,
        "stages": stages,
        "blocks": blocks
    }))
}

fn run_db(command: &DbCommand, cli: &Cli, store: &SqliteStore) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => run_db_schema_version(cli, store),
        DbCommand::Stages => run_db_stages(store),
        DbCommand::Buckets => run_db_buckets(store),
    }
}

fn run_db_stages(store: &SqliteStore) -> Result<()> {
    let tx = store.begin_ro()?;
    let mut stages = Vec::with_capacity(Stage::ALL.len());
    for stage in Stage::ALL {
        stages.push(StageStatus {
            stage,
            progress: get_stage_progress(&tx, stage)?,
            unwind: get_stage_unwind(&tx, stage)?,
        });
    }
    emit_json(serde_json::json!({ "stages": stages }))
}

fn run_db_buckets(store: &SqliteStore) -> Result<()> {
    let buckets = store
        .bucket_names()?
        .into_iter()
        .map(|name| BucketStatus { deprecated: is_deprecated(&name), name })
        .collect::<Vec<_>>();
    emit_json(serde_json::json!({
        "has_deprecated": buckets.iter().any(|bucket| bucket.deprecated),
        "buckets": buckets
    }))
}

fn run_db_schema_version(cli: &Cli, store: &SqliteStore) -> Result<()> {
    let expected = Backend::from(cli.backend).schema_version();
    let current = {
        let tx = store.begin_ro()?;
        read_schema_version(&tx)?
    };
    emit_json(serde_json::json!({
        "schema_version": current.map(|version| version.to_string()),
        "expected_version": expected.to_string(),
        "up_to_date": current == Some(expected)
    }))
}
