//! recstore CLI
//!
//! Command-line tool for inspecting and editing a store file.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use recstore::volume::FileChannelVolume;
use recstore::{wal, Config, RecordStore, Result, StoreDirect, StoreWal, VolumeKind};
use tracing_subscriber::{fmt, EnvFilter};

/// recstore CLI
#[derive(Parser, Debug)]
#[command(name = "recstore-cli")]
#[command(about = "Inspect and edit recstore files")]
#[command(version)]
struct Args {
    /// Store file
    #[arg(short, long)]
    path: PathBuf,

    /// Volume implementation used to open the file
    #[arg(long, value_enum, default_value_t = VolumeArg::File)]
    volume: VolumeArg,

    /// Open without the write-ahead log
    #[arg(long)]
    direct: bool,

    /// Store was created with per-record checksums
    #[arg(long)]
    checksum: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum VolumeArg {
    File,
    Mmap,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print header and free-space statistics
    Inspect,

    /// Print the value of a record
    Get {
        recid: u64,

        /// Print bytes as hex instead of text
        #[arg(long)]
        hex: bool,
    },

    /// Store a new record and print its recid
    Put { value: String },

    /// Replace the value of a record
    Update { recid: u64, value: String },

    /// Delete a record
    Delete { recid: u64 },

    /// Rewrite the file without free space
    Compact,

    /// Summarise the pending write-ahead log without applying it
    Wal,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,recstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();
    tracing::debug!("recstore-cli v{}", recstore::VERSION);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let config = Config::builder()
        .path(&args.path)
        .volume_kind(match args.volume {
            VolumeArg::File => VolumeKind::FileChannel,
            VolumeArg::Mmap => VolumeKind::MappedFile,
        })
        .transactions(!args.direct)
        .checksum(args.checksum)
        .read_only(matches!(args.command, Commands::Inspect | Commands::Get { .. }) && args.direct)
        .build();

    match args.command {
        Commands::Wal => print_wal(&config),
        Commands::Inspect => {
            let stats = if config.transactions {
                let store = StoreWal::open(config)?;
                let stats = store.stats();
                store.close()?;
                stats?
            } else {
                let store = StoreDirect::open(config)?;
                let stats = store.stats();
                store.close()?;
                stats?
            };
            println!("features      {}", stats.features);
            println!("store size    {}", stats.store_size);
            println!("file length   {}", stats.volume_len);
            println!("max recid     {}", stats.max_recid);
            println!("index pages   {}", stats.index_pages);
            println!("free recids   {}", stats.free_recids);
            println!("free bytes    {}", stats.free_bytes);
            Ok(())
        }
        command => {
            let store = recstore::open(config)?;
            let result = execute(store.as_ref(), command);
            let closed = store.close();
            result.and(closed)
        }
    }
}

fn execute(store: &dyn RecordStore, command: Commands) -> Result<()> {
    match command {
        Commands::Get { recid, hex } => match store.get(recid)? {
            None => println!("(null)"),
            Some(bytes) if hex => {
                let text: Vec<String> = bytes.iter().map(|b| format!("{:02x}", b)).collect();
                println!("{}", text.join(""));
            }
            Some(bytes) => println!("{}", String::from_utf8_lossy(&bytes)),
        },
        Commands::Put { value } => {
            let recid = store.put(value.as_bytes())?;
            store.commit()?;
            println!("{}", recid);
        }
        Commands::Update { recid, value } => {
            store.update(recid, value.as_bytes())?;
            store.commit()?;
        }
        Commands::Delete { recid } => {
            store.delete(recid)?;
            store.commit()?;
        }
        Commands::Compact => store.compact()?,
        Commands::Inspect | Commands::Wal => {}
    }
    Ok(())
}

fn print_wal(config: &Config) -> Result<()> {
    let Some(path) = config.wal_path() else {
        return Ok(());
    };
    if !path.exists() {
        println!("no pending wal at {}", path.display());
        return Ok(());
    }
    let vol = FileChannelVolume::open(&path, true)?;
    let stats = wal::verify(&vol);
    recstore::volume::Volume::close(&vol)?;
    let stats = stats?;
    println!("committed     {}", stats.transactions_committed);
    println!("rolled back   {}", stats.transactions_rolled_back);
    println!("entries       {}", stats.entries_applied);
    println!("discarded     {}", stats.entries_discarded);
    println!("torn tail     {}", stats.torn_tail);
    println!("valid length  {}", stats.valid_length);
    Ok(())
}
