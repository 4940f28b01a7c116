//! MetaIndex Admin - command line access to a metadata store
//!
//! Opens the redb file directly; run it while no other process has the
//! store open.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use metaindex_common::{
    EntityId, MetaIndexConfig, Metadata, MetadataEntry, SearchTarget, TimeRange, time::parse_time,
};
use metaindex_store::{Clock, HistoryRecord, MetadataError, MetadataStore, SystemClock};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Attempts per maintenance batch before giving up
const BATCH_ATTEMPTS: u32 = 3;

#[derive(Parser, Debug)]
#[command(name = "metaindex-admin")]
#[command(about = "MetaIndex metadata store administration")]
#[command(version)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "/etc/metaindex/metaindex.toml")]
    config: PathBuf,

    /// Database file (overrides data_path from the config file)
    #[arg(short, long, env = "METAINDEX_DATA_PATH")]
    data_path: Option<PathBuf>,

    /// Log level (overrides log_level from the config file)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Property operations
    Property {
        #[command(subcommand)]
        action: PropertyCommands,
    },
    /// Tag operations
    Tag {
        #[command(subcommand)]
        action: TagCommands,
    },
    /// Show the current metadata of entities
    Show {
        /// Entity IDs, e.g. dataset:ns1.purchases
        #[arg(required = true)]
        entities: Vec<EntityId>,
    },
    /// Remove all properties and tags of an entity
    Wipe {
        /// Entity ID
        entity: EntityId,
    },
    /// Search a namespace
    Search {
        /// Namespace to search (system entities are always included)
        namespace: String,
        /// Query terms: `word`, `word*`, `key:value`, `key:value*`
        query: String,
        /// Restrict to entity kinds (repeatable)
        #[arg(short, long = "target")]
        targets: Vec<SearchTarget>,
        /// Print matching entities instead of entries
        #[arg(long)]
        entities: bool,
    },
    /// Show metadata of entities as of a point in time
    Snapshot {
        /// Entity IDs
        #[arg(required = true)]
        entities: Vec<EntityId>,
        /// Epoch millis or now[(+|-)<n>(s|m|h|d)]
        #[arg(long, default_value = "now")]
        at: String,
    },
    /// List recorded states of an entity
    History {
        /// Entity ID
        entity: EntityId,
        /// Range start
        #[arg(long, default_value = "0")]
        from: String,
        /// Range end
        #[arg(long, default_value = "now")]
        to: String,
    },
    /// Search index maintenance
    Index {
        #[command(subcommand)]
        action: IndexCommands,
    },
}

#[derive(Subcommand, Debug)]
enum PropertyCommands {
    /// Set a property
    Set {
        entity: EntityId,
        key: String,
        value: String,
    },
    /// Get one property, or all of them
    Get {
        entity: EntityId,
        key: Option<String>,
    },
    /// Remove the given properties, or all of them when none are given
    Remove { entity: EntityId, keys: Vec<String> },
}

#[derive(Subcommand, Debug)]
enum TagCommands {
    /// Add tags
    Add {
        entity: EntityId,
        #[arg(required = true)]
        tags: Vec<String>,
    },
    /// List tags
    List { entity: EntityId },
    /// Remove the given tags, or all of them when none are given
    Remove { entity: EntityId, tags: Vec<String> },
}

#[derive(Subcommand, Debug)]
enum IndexCommands {
    /// Regenerate every index row with the current indexer
    Rebuild {
        /// Primary rows per batch (overrides rebuild_batch_size)
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Delete every index row, leaving metadata untouched
    Delete {
        /// Index rows per batch (overrides delete_batch_size)
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let text_layer = (args.log_format == LogFormat::Text).then(|| tracing_subscriber::fmt::layer());
    let json_layer =
        (args.log_format == LogFormat::Json).then(|| tracing_subscriber::fmt::layer().json());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(text_layer)
        .with(json_layer)
        .init();

    info!("Opening metadata store at {}", config.data_path.display());
    let store = MetadataStore::open(&config.data_path)
        .with_context(|| format!("failed to open {}", config.data_path.display()))?;
    let out = Output { json: args.json };

    match args.command {
        Commands::Property { action } => handle_property(&store, &out, action),
        Commands::Tag { action } => handle_tag(&store, &out, action),
        Commands::Show { entities } => {
            let found = store.get_metadata(&entities)?;
            out.metadata(sorted(found))
        }
        Commands::Wipe { entity } => {
            store.remove_metadata(&entity)?;
            println!("Removed metadata of {entity}");
            Ok(())
        }
        Commands::Search {
            namespace,
            query,
            targets,
            entities,
        } => {
            if entities {
                out.entities(store.search_entities(&namespace, &query, &targets)?)
            } else {
                out.entries(store.search(&namespace, &query, &targets)?)
            }
        }
        Commands::Snapshot { entities, at } => {
            let timestamp = parse_time(&at, SystemClock.now_millis())?;
            let found = store.get_snapshot_before_time(&entities, timestamp)?;
            out.metadata(sorted(found))
        }
        Commands::History { entity, from, to } => {
            let range = TimeRange::parse(&from, &to, SystemClock.now_millis())?;
            out.history(store.get_history(&entity, range)?)
        }
        Commands::Index { action } => match action {
            IndexCommands::Rebuild { batch_size } => {
                let batch_size = batch_size.unwrap_or(config.rebuild_batch_size);
                let batches = rebuild_all(&store, batch_size, &config)?;
                println!("Rebuilt indexes in {batches} batches");
                Ok(())
            }
            IndexCommands::Delete { batch_size } => {
                let batch_size = batch_size.unwrap_or(config.delete_batch_size);
                let deleted = delete_all(&store, batch_size, &config)?;
                println!("Deleted {deleted} index rows");
                Ok(())
            }
        },
    }
}

/// Read the config file if present, then apply command line overrides
fn load_config(args: &Args) -> Result<MetaIndexConfig> {
    let mut config: MetaIndexConfig = if args.config.exists() {
        let config_str = std::fs::read_to_string(&args.config)
            .with_context(|| format!("failed to read {}", args.config.display()))?;
        toml::from_str(&config_str)
            .with_context(|| format!("failed to parse {}", args.config.display()))?
    } else {
        MetaIndexConfig::default()
    };

    if let Some(data_path) = &args.data_path {
        config.data_path.clone_from(data_path);
    }
    if let Some(log_level) = &args.log_level {
        config.log_level.clone_from(log_level);
    }
    config.validate()?;
    Ok(config)
}

fn handle_property(store: &MetadataStore, out: &Output, action: PropertyCommands) -> Result<()> {
    match action {
        PropertyCommands::Set { entity, key, value } => {
            store.set_property(&entity, &key, &value)?;
            println!("Set {key} on {entity}");
            Ok(())
        }
        PropertyCommands::Get {
            entity,
            key: Some(key),
        } => match store.get_property(&entity, &key)? {
            Some(entry) => out.entries(vec![entry]),
            None => bail!("{entity} has no property '{key}'"),
        },
        PropertyCommands::Get { entity, key: None } => out.properties(&store.get_properties(&entity)?),
        PropertyCommands::Remove { entity, keys } => {
            if keys.is_empty() {
                store.remove_all_properties(&entity)?;
                println!("Removed all properties of {entity}");
            } else {
                store.remove_properties(&entity, &keys)?;
                println!("Removed {} properties of {entity}", keys.len());
            }
            Ok(())
        }
    }
}

fn handle_tag(store: &MetadataStore, out: &Output, action: TagCommands) -> Result<()> {
    match action {
        TagCommands::Add { entity, tags } => {
            store.add_tags(&entity, &tags)?;
            println!("Tagged {entity}");
            Ok(())
        }
        TagCommands::List { entity } => out.tags(store.get_tags(&entity)?.into_iter().collect()),
        TagCommands::Remove { entity, tags } => {
            if tags.is_empty() {
                store.remove_all_tags(&entity)?;
                println!("Removed all tags of {entity}");
            } else {
                store.remove_tags(&entity, &tags)?;
                println!("Untagged {entity}");
            }
            Ok(())
        }
    }
}

/// Walk the whole primary table batch by batch. Returns the batch count.
fn rebuild_all(store: &MetadataStore, batch_size: usize, config: &MetaIndexConfig) -> Result<usize> {
    let mut batches = 0usize;
    let mut cursor: Option<Vec<u8>> = None;
    loop {
        let next = with_retry("rebuild", || store.rebuild_indexes(cursor.as_deref(), batch_size))?;
        batches += 1;
        match next {
            Some(start) => {
                cursor = Some(start);
                pause(config);
            }
            None => return Ok(batches),
        }
    }
}

/// Delete index rows until none are left. Returns the total deleted.
fn delete_all(store: &MetadataStore, batch_size: usize, config: &MetaIndexConfig) -> Result<usize> {
    let mut total = 0usize;
    loop {
        let deleted = with_retry("delete", || store.delete_all_indexes(batch_size))?;
        if deleted == 0 {
            return Ok(total);
        }
        total += deleted;
        pause(config);
    }
}

/// Run one batch, retrying when the store reports a transient failure
fn with_retry<T>(job: &str, mut batch: impl FnMut() -> Result<T, MetadataError>) -> Result<T> {
    let mut attempt = 1;
    loop {
        match batch() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < BATCH_ATTEMPTS => {
                warn!("Index {} batch failed (attempt {}): {}", job, attempt, e);
                attempt += 1;
                std::thread::sleep(Duration::from_millis(100 * u64::from(attempt)));
            }
            Err(e) => return Err(e).with_context(|| format!("index {job} batch failed")),
        }
    }
}

fn pause(config: &MetaIndexConfig) {
    if config.batch_pause_ms > 0 {
        std::thread::sleep(Duration::from_millis(config.batch_pause_ms));
    }
}

fn sorted(found: HashSet<Metadata>) -> Vec<Metadata> {
    let mut found: Vec<Metadata> = found.into_iter().collect();
    found.sort_by_key(|m| m.entity.to_string());
    found
}

/// Renders results as text tables or JSON
struct Output {
    json: bool,
}

impl Output {
    fn print_json(value: &impl Serialize) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    fn entries(&self, entries: Vec<MetadataEntry>) -> Result<()> {
        if self.json {
            return Self::print_json(&entries);
        }
        if entries.is_empty() {
            println!("No entries found");
            return Ok(());
        }
        println!("{:<40} {:<20} VALUE", "ENTITY", "KEY");
        println!("{}", "-".repeat(80));
        for entry in entries {
            println!("{:<40} {:<20} {}", entry.entity.to_string(), entry.key, entry.value);
        }
        Ok(())
    }

    fn entities(&self, entities: Vec<EntityId>) -> Result<()> {
        if self.json {
            return Self::print_json(&entities);
        }
        if entities.is_empty() {
            println!("No entities found");
        }
        for entity in entities {
            println!("{entity}");
        }
        Ok(())
    }

    fn properties(&self, properties: &BTreeMap<String, String>) -> Result<()> {
        if self.json {
            return Self::print_json(properties);
        }
        if properties.is_empty() {
            println!("No properties");
        }
        for (key, value) in properties {
            println!("{key:<20} {value}");
        }
        Ok(())
    }

    fn tags(&self, tags: Vec<String>) -> Result<()> {
        if self.json {
            return Self::print_json(&tags);
        }
        if tags.is_empty() {
            println!("No tags");
        }
        for tag in tags {
            println!("{tag}");
        }
        Ok(())
    }

    fn metadata(&self, metadata: Vec<Metadata>) -> Result<()> {
        if self.json {
            return Self::print_json(&metadata);
        }
        if metadata.is_empty() {
            println!("No metadata found");
        }
        for m in &metadata {
            print_metadata(m);
        }
        Ok(())
    }

    fn history(&self, records: Vec<HistoryRecord>) -> Result<()> {
        if self.json {
            return Self::print_json(&records);
        }
        if records.is_empty() {
            println!("No history in range");
        }
        for record in &records {
            println!("@ {}", record.timestamp);
            print_metadata(&record.metadata);
        }
        Ok(())
    }
}

fn print_metadata(metadata: &Metadata) {
    println!("{}", metadata.entity);
    if metadata.is_empty() {
        println!("  (empty)");
        return;
    }
    for (key, value) in &metadata.properties {
        println!("  {key:<20} {value}");
    }
    if !metadata.tags.is_empty() {
        let tags: Vec<&str> = metadata.tags.iter().map(String::as_str).collect();
        println!("  tags: {}", tags.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_args() {
        let args = Args::try_parse_from([
            "metaindex-admin",
            "--data-path",
            "/tmp/m.redb",
            "search",
            "ns1",
            "tag*",
            "--target",
            "dataset",
            "-t",
            "app",
        ])
        .unwrap();
        match args.command {
            Commands::Search {
                namespace, targets, ..
            } => {
                assert_eq!(namespace, "ns1");
                assert_eq!(targets, vec![SearchTarget::Dataset, SearchTarget::Application]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_rejects_bad_entity_id() {
        assert!(Args::try_parse_from(["metaindex-admin", "show", "dataset"]).is_err());
        assert!(Args::try_parse_from(["metaindex-admin", "show", "dataset:ns1.ds1"]).is_ok());
    }

    #[test]
    fn test_load_config_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metaindex.toml");
        std::fs::write(&path, "rebuild_batch_size = 7\nlog_level = \"warn\"\n").unwrap();

        let args = Args::try_parse_from([
            "metaindex-admin",
            "--config",
            path.to_str().unwrap(),
            "--data-path",
            "/tmp/x.redb",
            "index",
            "rebuild",
        ])
        .unwrap();
        let config = load_config(&args).unwrap();
        assert_eq!(config.rebuild_batch_size, 7);
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.data_path, PathBuf::from("/tmp/x.redb"));
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let args = Args::try_parse_from([
            "metaindex-admin",
            "--config",
            "/nonexistent/m.toml",
            "tag",
            "list",
            "stream:ns1.s1",
        ])
        .unwrap();
        assert_eq!(load_config(&args).unwrap(), MetaIndexConfig::default());
    }

    #[test]
    fn test_maintenance_loops() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(dir.path().join("m.redb")).unwrap();
        let entity: EntityId = "dataset:ns1.ds1".parse().unwrap();
        store.set_property(&entity, "owner", "alice").unwrap();
        store.add_tags(&entity, &["pii", "gold"]).unwrap();
        let config = MetaIndexConfig::default();

        assert!(delete_all(&store, 2, &config).unwrap() > 0);
        assert!(store.search("ns1", "alice", &[]).unwrap().is_empty());
        assert_eq!(rebuild_all(&store, 1, &config).unwrap(), 2);
        assert_eq!(store.search("ns1", "alice", &[]).unwrap().len(), 1);
    }
}
