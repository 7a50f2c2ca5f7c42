//! noisestore CLI
//!
//! Inspects a raw waveform archive through the same store the pipeline uses.

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use crossbeam::channel;
use tracing_subscriber::{fmt, EnvFilter};

use noisestore::cc::CcStore;
use noisestore::params::{encode_metadata, read_metadata, DOWNLOAD_INFO, FFT_CC_INFO};
use noisestore::pipeline::partition_timespans;
use noisestore::timespan::date_range;
use noisestore::{
    select_raw_store, Disposition, PipelineConfig, RawDataStore, Result, StoreError, Timespan,
};

/// Waveform archive inspector
#[derive(Parser, Debug)]
#[command(name = "noisestore")]
#[command(about = "Inspect ambient-noise waveform archives")]
#[command(version)]
struct Args {
    /// Raw data directory
    #[arg(long, global = true, default_value = "./noisestore_data/RAW_DATA")]
    raw_data_path: PathBuf,

    /// Comma separated list of stations or '*' for all
    #[arg(long, global = true, default_value = "*")]
    stations: String,

    /// StationXML file or directory
    #[arg(long, global = true)]
    xml_path: Option<PathBuf>,

    /// Start date (e.g. 2019-02-01 or 2019-02-01T00:00:00Z)
    #[arg(long, global = true)]
    start: Option<String>,

    /// End date
    #[arg(long, global = true)]
    end: Option<String>,

    /// Log filter, overrides RUST_LOG (e.g. debug)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List timespans in the archive
    Timespans,

    /// List channels in one timespan
    Channels {
        /// Timespan name, e.g. 2019_02_01_00_00_00T2019_02_01_01_00_00
        #[arg(long)]
        timespan: String,
    },

    /// Print recorded archive metadata
    Info {
        /// Cross-correlation directory to describe as well
        #[arg(long)]
        ccf_path: Option<PathBuf>,
    },

    /// Read every channel of every timespan and report failures
    Verify {
        /// Worker threads
        #[arg(short, long, default_value = "4")]
        workers: usize,
    },
}

fn main() {
    let args = Args::parse();

    // Initialize tracing/logging
    let filter = match &args.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,noisestore=debug")),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let code = match run(&args) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            match e {
                StoreError::Configuration(_) | StoreError::InvalidRange { .. } => 2,
                _ => 1,
            }
        }
    };
    process::exit(code);
}

fn run(args: &Args) -> Result<i32> {
    let config = PipelineConfig::builder()
        .raw_data_path(&args.raw_data_path)
        .stations(args.stations.split(',').map(str::trim).filter(|s| !s.is_empty()))
        .date_range(date_range(args.start.as_deref(), args.end.as_deref())?);
    let config = match &args.xml_path {
        Some(path) => config.xml_path(path),
        None => config,
    }
    .build();
    config.validate()?;

    if let Commands::Info { ccf_path } = &args.command {
        return info(&config.raw_data_path, ccf_path.as_deref());
    }

    let (backend, store) = select_raw_store(&config.raw_data_path, &config.selector_options())?;
    tracing::info!("noisestore v{} ({} backend)", noisestore::VERSION, backend);

    match &args.command {
        Commands::Timespans => {
            for ts in store.get_timespans()? {
                println!("{}\t{} .. {}", ts.name(), ts.start(), ts.end());
            }
            Ok(0)
        }
        Commands::Channels { timespan } => {
            let ts = Timespan::parse_name(timespan)?;
            for channel in store.get_channels(&ts)? {
                let station = &channel.station;
                println!(
                    "{}\t{}\t{:.4}\t{:.4}\t{:.1}",
                    channel.id(),
                    channel.channel_type,
                    station.latitude,
                    station.longitude,
                    station.elevation
                );
            }
            Ok(0)
        }
        Commands::Verify { workers } => verify(store.as_ref(), *workers),
        Commands::Info { .. } => Ok(0),
    }
}

fn info(raw_dir: &Path, ccf_dir: Option<&Path>) -> Result<i32> {
    match read_metadata(raw_dir, DOWNLOAD_INFO)? {
        Some(params) => println!("{}:\n{}", DOWNLOAD_INFO, encode_metadata(&params)?),
        None => println!("{}: not recorded in {}", DOWNLOAD_INFO, raw_dir.display()),
    }

    if let Some(ccf_dir) = ccf_dir {
        match read_metadata(ccf_dir, FFT_CC_INFO)? {
            Some(params) => println!(
                "{} (fingerprint {}):\n{}",
                FFT_CC_INFO,
                params.fingerprint(),
                encode_metadata(&params)?
            ),
            None => println!("{}: not recorded in {}", FFT_CC_INFO, ccf_dir.display()),
        }
        for fingerprint in CcStore::fingerprints(ccf_dir)? {
            println!("fingerprint directory: {}", fingerprint);
        }
    }
    Ok(0)
}

/// Outcome of reading one (timespan, channel) pair
struct Checked {
    what: String,
    result: Result<usize>,
}

fn verify(store: &dyn RawDataStore, workers: usize) -> Result<i32> {
    store.verify_integrity()?;

    let workers = workers.max(1);
    let timespans = store.get_timespans()?;
    let shares = (0..workers)
        .map(|worker| partition_timespans(timespans.clone(), worker, workers))
        .collect::<Result<Vec<_>>>()?;

    let (tx, rx) = channel::unbounded::<Checked>();
    let scoped = crossbeam::scope(|scope| {
        for share in shares {
            let tx = tx.clone();
            scope.spawn(move |_| {
                for ts in share {
                    let channels = match store.get_channels(&ts) {
                        Ok(channels) => channels,
                        Err(e) => {
                            let _ = tx.send(Checked {
                                what: ts.to_string(),
                                result: Err(e),
                            });
                            continue;
                        }
                    };
                    for ch in channels {
                        let _ = tx.send(Checked {
                            what: format!("{} in {}", ch.id(), ts),
                            result: store.read_data(&ts, &ch).map(|data| data.len()),
                        });
                    }
                }
            });
        }
    });
    drop(tx);

    if scoped.is_err() {
        tracing::error!("A verify worker panicked");
        return Ok(1);
    }

    let (mut ok, mut failed) = (0usize, 0usize);
    for checked in rx.iter() {
        match checked.result {
            Ok(samples) => {
                ok += 1;
                tracing::debug!(samples, "{} ok", checked.what);
            }
            Err(e) => {
                failed += 1;
                match e.disposition() {
                    Disposition::Retry => tracing::warn!("{}: {} (retryable)", checked.what, e),
                    _ => tracing::error!("{}: {}", checked.what, e),
                }
            }
        }
    }

    println!(
        "verified {} timespans: {} channels ok, {} failed",
        timespans.len(),
        ok,
        failed
    );
    Ok(if failed > 0 { 1 } else { 0 })
}
