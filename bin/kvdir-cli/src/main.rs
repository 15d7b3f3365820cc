//! kvdir CLI - Admin Command Line Interface
//!
//! This binary inspects and edits indexes stored in a kvdir chunk store.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kvdir_common::{Config, RetryPolicy};
use kvdir_directory::ChunkedDirectory;
use kvdir_store::{ChunkStore, register_schema};
use serde::Serialize;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "kvdir-cli")]
#[command(about = "kvdir Admin CLI")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "kvdir.toml")]
    config: PathBuf,

    /// Store database path (overrides the config file)
    #[arg(short, long, env = "KVDIR_STORE")]
    store: Option<PathBuf>,

    /// Index to operate on (defaults to directory.default_index)
    #[arg(short, long)]
    index: Option<String>,

    /// Hunk size for indexes created by this invocation
    #[arg(long)]
    hunk_size: Option<usize>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List files in the index
    Ls,
    /// Write a file from a local path or stdin
    Put {
        /// File name in the index
        name: String,
        /// Local file to upload (stdin if omitted)
        source: Option<PathBuf>,
        /// Append to an existing file instead of replacing it
        #[arg(long)]
        append: bool,
    },
    /// Print a file to stdout
    Cat {
        /// File name in the index
        name: String,
        /// Start offset
        #[arg(long, default_value = "0")]
        offset: u64,
        /// Bytes to print (rest of the file if omitted)
        #[arg(long)]
        length: Option<u64>,
    },
    /// Delete a file
    Rm {
        /// File name in the index
        name: String,
    },
    /// Show the hunk layout of a file
    Stat {
        /// File name in the index
        name: String,
    },
    /// Lock operations
    Lock {
        #[command(subcommand)]
        action: LockCommands,
    },
    /// Index operations
    Index {
        #[command(subcommand)]
        action: IndexCommands,
    },
}

#[derive(Subcommand, Debug)]
enum LockCommands {
    /// List outstanding locks
    List,
    /// Obtain a lock and keep it held; prints the holder token
    Obtain {
        /// Lock name
        name: String,
    },
    /// Release a lock obtained earlier
    Release {
        /// Lock name
        name: String,
        /// Holder token printed by `obtain`
        holder: String,
    },
    /// Delete a lock regardless of its holder
    Clear {
        /// Lock name
        name: String,
    },
    /// Show whether a lock is held
    Status {
        /// Lock name
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum IndexCommands {
    /// List indexes in the store
    List,
    /// Delete an index with all files and locks
    Delete {
        /// Index name
        name: String,
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
}

/// Load configuration: defaults, then the file, then `KVDIR__*` variables,
/// then command line flags.
fn load_config(args: &Args) -> Result<Config> {
    let mut config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.as_path()).required(false))
        .add_source(
            config::Environment::with_prefix("KVDIR")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to read config {}", args.config.display()))?
        .try_deserialize()
        .context("Invalid configuration")?;

    if let Some(store) = &args.store {
        config.store.path.clone_from(store);
    }
    if let Some(index) = &args.index {
        config.directory.default_index.clone_from(index);
    }
    if let Some(hunk_size) = args.hunk_size {
        config.directory.hunk_size = hunk_size;
    }
    config.validate()?;
    Ok(config)
}

fn format_time(millis: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(millis)
        .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One row of `ls`
#[derive(Debug, Serialize)]
struct FileEntry {
    name: String,
    length: u64,
    hunk_count: u64,
    last_modified: i64,
}

/// Files of the index, sorted by name, read from segment metadata only.
fn list_files(dir: &ChunkedDirectory) -> Result<Vec<FileEntry>> {
    let mut names = dir.list_all()?;
    names.sort();
    let mut files = Vec::with_capacity(names.len());
    for name in names {
        let segment = match dir.segment(&name) {
            Ok(segment) => segment,
            // Deleted since the listing
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e.into()),
        };
        files.push(FileEntry {
            length: segment.length(),
            hunk_count: segment.hunk_count(),
            last_modified: segment.last_modified(),
            name,
        });
    }
    Ok(files)
}

fn upload(dir: &ChunkedDirectory, name: &str, source: Option<&Path>, append: bool) -> Result<u64> {
    let mut output = if append {
        dir.append_output(name)?
    } else {
        dir.create_output(name)?
    };
    match source {
        Some(path) => {
            let mut file = std::fs::File::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            io::copy(&mut file, &mut output)?;
        }
        None => {
            io::copy(&mut io::stdin().lock(), &mut output)?;
        }
    }
    output.close()?;
    Ok(output.file_pointer())
}

fn download(dir: &ChunkedDirectory, name: &str, offset: u64, length: Option<u64>) -> Result<u64> {
    let mut input = dir.open_input(name)?;
    input.seek(offset);
    let remaining = input.length().saturating_sub(offset);
    let limit = length.map_or(remaining, |l| l.min(remaining));

    let mut stdout = io::stdout().lock();
    let copied = io::copy(&mut input.by_ref().take(limit), &mut stdout)?;
    stdout.flush()?;
    Ok(copied)
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let config = load_config(&args)?;
    register_schema();
    let store = Arc::new(
        ChunkStore::open(&config.store.path, &config.store)
            .with_context(|| format!("Failed to open store {}", config.store.path.display()))?,
    );
    let retry = RetryPolicy::from(&config.retry);

    match args.command {
        Commands::Index { action } => run_index(&store, &config, retry, action, args.json),
        command => {
            let dir =
                ChunkedDirectory::open_default(Arc::clone(&store), &config.directory, retry)?;
            info!("Using index '{}'", dir.name());
            run(&dir, command, args.json)?;
            dir.close()?;
            Ok(())
        }
    }
}

fn run_index(
    store: &Arc<ChunkStore>,
    config: &Config,
    retry: RetryPolicy,
    action: IndexCommands,
    json: bool,
) -> Result<()> {
    match action {
        IndexCommands::List => {
            let namespaces = ChunkedDirectory::list_namespaces(store)?;
            if json {
                return print_json(&namespaces);
            }
            println!("{:<30} {:>12} {:<20}", "INDEX", "HUNK SIZE", "CREATED");
            println!("{}", "-".repeat(64));
            for ns in namespaces {
                println!(
                    "{:<30} {:>12} {:<20}",
                    ns.name,
                    ns.hunk_size,
                    format_time(ns.created_at)
                );
            }
        }
        IndexCommands::Delete { name, yes } => {
            if !yes {
                anyhow::bail!("Refusing to delete index '{name}' without --yes");
            }
            let dir = ChunkedDirectory::open(Arc::clone(store), &name, &config.directory, retry)?;
            dir.delete()?;
            println!("Index '{name}' deleted");
        }
    }
    Ok(())
}

fn run(dir: &ChunkedDirectory, command: Commands, json: bool) -> Result<()> {
    match command {
        Commands::Ls => {
            let files = list_files(dir)?;
            if json {
                return print_json(&files);
            }
            println!("{:<40} {:>14} {:>8} {:<20}", "NAME", "LENGTH", "HUNKS", "MODIFIED");
            println!("{}", "-".repeat(86));
            for file in files {
                println!(
                    "{:<40} {:>14} {:>8} {:<20}",
                    file.name,
                    file.length,
                    file.hunk_count,
                    format_time(file.last_modified)
                );
            }
        }
        Commands::Put {
            name,
            source,
            append,
        } => {
            let written = upload(dir, &name, source.as_deref(), append)?;
            eprintln!("Wrote '{name}' ({written} bytes)");
        }
        Commands::Cat {
            name,
            offset,
            length,
        } => {
            download(dir, &name, offset, length)?;
        }
        Commands::Rm { name } => {
            dir.delete_file(&name)?;
            println!("Deleted '{name}'");
        }
        Commands::Stat { name } => {
            let info = dir.describe(&name)?;
            if json {
                return print_json(&info);
            }
            println!("File:          {}", info.name);
            println!("Length:        {}", info.length);
            println!("Hunks:         {}", info.hunk_count);
            println!("Hunk size:     {}", info.hunk_size);
            println!("Last modified: {}", format_time(info.last_modified));
            for (i, len) in info.hunk_lengths.iter().enumerate() {
                println!("  hunk {:>6}: {} bytes", i + 1, len);
            }
        }
        Commands::Lock { action } => run_lock(dir, action, json)?,
        Commands::Index { action } => {
            anyhow::bail!("index command {action:?} needs no open index");
        }
    }
    Ok(())
}

fn run_lock(dir: &ChunkedDirectory, action: LockCommands, json: bool) -> Result<()> {
    let locks = dir.lock_factory();
    match action {
        LockCommands::List => {
            let mut names = locks.locks()?;
            names.sort();
            if json {
                return print_json(&names);
            }
            for name in names {
                println!("{name}");
            }
        }
        LockCommands::Obtain { name } => {
            let holder = locks.obtain(&name)?.detach();
            println!("{holder}");
        }
        LockCommands::Release { name, holder } => {
            if !locks.release(&name, &holder)? {
                anyhow::bail!("Lock '{name}' is not held by {holder}");
            }
            println!("Released '{name}'");
        }
        LockCommands::Clear { name } => {
            if locks.clear_lock(&name)? {
                println!("Cleared '{name}'");
            } else {
                println!("Lock '{name}' was not held");
            }
        }
        LockCommands::Status { name } => {
            let held = locks.is_locked(&name)?;
            println!("{name}: {}", if held { "held" } else { "free" });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvdir_common::DirectoryConfig;
    use std::fs;
    use tempfile::tempdir;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["kvdir-cli"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_commands() {
        let parsed = args(&["--index", "idx", "put", "seg1", "--append"]);
        assert_eq!(parsed.index.as_deref(), Some("idx"));
        assert!(matches!(
            parsed.command,
            Commands::Put { append: true, .. }
        ));

        let parsed = args(&["lock", "release", "write.lock", "token"]);
        assert!(matches!(
            parsed.command,
            Commands::Lock {
                action: LockCommands::Release { .. }
            }
        ));
    }

    #[test]
    fn test_load_config_file_and_flags() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("kvdir.toml");
        fs::write(
            &path,
            "[store]\npath = \"/tmp/from-file.redb\"\n\n[directory]\nhunk_size = 4096\n",
        )
        .unwrap();

        let path_arg = path.to_string_lossy().to_string();
        let config = load_config(&args(&["--config", &path_arg, "ls"])).unwrap();
        assert_eq!(config.store.path, PathBuf::from("/tmp/from-file.redb"));
        assert_eq!(config.directory.hunk_size, 4096);
        assert_eq!(config.directory.default_index, "defaultIndex");

        let config = load_config(&args(&[
            "--config",
            &path_arg,
            "--index",
            "idx",
            "--hunk-size",
            "512",
            "ls",
        ]))
        .unwrap();
        assert_eq!(config.directory.default_index, "idx");
        assert_eq!(config.directory.hunk_size, 512);
    }

    #[test]
    fn test_load_config_rejects_bad_hunk_size() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("missing.toml");
        let path_arg = path.to_string_lossy().to_string();
        let result = load_config(&args(&["--config", &path_arg, "--hunk-size", "0", "ls"]));
        assert!(result.is_err());
    }

    #[test]
    fn test_upload_and_download() {
        register_schema();
        let tmp = tempdir().unwrap();
        let store = Arc::new(
            ChunkStore::open(tmp.path().join("kvdir.redb"), &Default::default()).unwrap(),
        );
        let dir = ChunkedDirectory::open(
            store,
            "idx",
            &DirectoryConfig::with_hunk_size(4),
            RetryPolicy::no_retry(),
        )
        .unwrap();

        let source = tmp.path().join("source.bin");
        fs::write(&source, b"ABCDEFGHI").unwrap();
        assert_eq!(upload(&dir, "seg1", Some(&source), false).unwrap(), 9);
        assert_eq!(upload(&dir, "seg1", Some(&source), true).unwrap(), 18);
        assert_eq!(dir.file_length("seg1").unwrap(), 18);
        assert_eq!(download(&dir, "seg1", 5, Some(3)).unwrap(), 3);
        assert_eq!(download(&dir, "seg1", 16, None).unwrap(), 2);
    }

    #[test]
    fn test_list_files_skips_hunk_reads() {
        register_schema();
        let store = Arc::new(ChunkStore::in_memory(&Default::default()).unwrap());
        let dir = ChunkedDirectory::open(
            Arc::clone(&store),
            "idx",
            &DirectoryConfig::with_hunk_size(4),
            RetryPolicy::no_retry(),
        )
        .unwrap();

        for (name, data) in [("b.seg", &b"ABCDEFGHI"[..]), ("a.seg", &b"xy"[..])] {
            let mut output = dir.create_output(name).unwrap();
            output.write_bytes(data).unwrap();
            output.close().unwrap();
        }
        // A lost hunk breaks reads of b.seg but not its listing
        let segment = dir.segment("b.seg").unwrap();
        store.delete(&[segment.hunk_key(2)]).unwrap();
        assert!(dir.describe("b.seg").is_err());

        let files = list_files(&dir).unwrap();
        let rows: Vec<_> = files
            .iter()
            .map(|f| (f.name.as_str(), f.length, f.hunk_count))
            .collect();
        assert_eq!(rows, vec![("a.seg", 2, 1), ("b.seg", 9, 3)]);
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0), "1970-01-01 00:00:00");
    }
}
