// This file is part of wavevault, a scheduled internet-radio recorder.
// Copyright (C) 2026 The wavevault contributors.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use base::clock::RealClocks;
use base::Error;
use bpaf::{Bpaf, Parser};
use tracing::{debug, error, info};

mod config;
mod scheduler;
mod sink;
mod station;

// This is either in the environment when `cargo` is invoked or set from within `build.rs`.
const VERSION: &str = env!("VERSION");

/// wavevault: a scheduled internet-radio recorder.
#[derive(Bpaf, Debug)]
#[bpaf(options, version(VERSION))]
struct Args {
    /// Path to the JSON configuration file.
    #[bpaf(positional("CONFIG"))]
    config: PathBuf,
}

fn main() {
    base::tracing_setup::install();

    // Get the program name from the OS (e.g. if invoked as `target/debug/wavevault`:
    // `wavevault`), falling back to the crate name if conversion to a path/UTF-8 string fails.
    // `bpaf`'s default logic is similar but doesn't have the fallback.
    let progname = std::env::args_os().next().map(PathBuf::from);
    let progname = progname
        .as_deref()
        .and_then(Path::file_name)
        .and_then(OsStr::to_str)
        .unwrap_or(env!("CARGO_PKG_NAME"));

    let args = match args()
        .fallback_to_usage()
        .run_inner(bpaf::Args::current_args().set_name(progname))
    {
        Ok(a) => a,
        Err(e) => std::process::exit(e.exit_code()),
    };
    tracing::trace!("Parsed command-line arguments: {args:#?}");

    match run(args) {
        Err(e) => {
            error!(err = %e.chain(), "exiting due to error");
            std::process::exit(1);
        }
        Ok(rv) => {
            debug!("exiting with status {}", rv);
            std::process::exit(rv)
        }
    }
}

fn run(args: Args) -> Result<i32, Error> {
    let config = config::load(&args.config)?;
    info!(path = %args.config.display(), stations = config.stations.len(), programmes = config.programmes.len(), "configuration loaded");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| base::err!(Internal, msg("building tokio runtime"), source(e)))?;
    let r = rt.block_on(async_run(config));
    rt.shutdown_background();
    r
}

async fn async_run(config: config::Config) -> Result<i32, Error> {
    use tokio::signal::unix::{signal, SignalKind};

    let (shutdown_tx, shutdown_rx) = base::shutdown::channel();
    let mut shutdown_tx = Some(shutdown_tx);

    let mut int = signal(SignalKind::interrupt())
        .map_err(|e| base::err!(Internal, msg("installing SIGINT handler"), source(e)))?;
    let mut term = signal(SignalKind::terminate())
        .map_err(|e| base::err!(Internal, msg("installing SIGTERM handler"), source(e)))?;

    tokio::pin! {
        let inner = inner(config, shutdown_rx);
    }

    tokio::select! {
        _ = int.recv() => {
            info!("received SIGINT; shutting down gracefully. \
                   Send another SIGINT or SIGTERM to shut down immediately.");
            shutdown_tx.take();
        },
        _ = term.recv() => {
            info!("received SIGTERM; shutting down gracefully. \
                   Send another SIGINT or SIGTERM to shut down immediately.");
            shutdown_tx.take();
        },
        result = &mut inner => return result,
    }

    tokio::select! {
        _ = int.recv() => Err(base::err!(Cancelled, msg("immediate shutdown due to second SIGINT"))),
        _ = term.recv() => Err(base::err!(Cancelled, msg("immediate shutdown due to second SIGTERM"))),
        result = &mut inner => result,
    }
}

/// Runs every station worker and the scheduler on dedicated OS threads (each
/// entering the Tokio runtime, mirroring how the teacher ran its RTSP
/// streamers) and waits for all of them to notice `shutdown_rx`.
async fn inner(config: config::Config, shutdown_rx: base::shutdown::Receiver) -> Result<i32, Error> {
    let stations: Vec<Arc<station::Station>> = config
        .stations
        .iter()
        .map(|s| {
            Arc::new(station::Station::new(config::Station {
                name: s.name.clone(),
                source_url: s.source_url.clone(),
                strategy: s.strategy,
                timeout_direct: s.timeout_direct,
                timeout_playlist: s.timeout_playlist,
            }))
        })
        .collect();

    let handle = tokio::runtime::Handle::current();
    let mut worker_handles = Vec::with_capacity(stations.len());
    for station in &stations {
        let station = station.clone();
        let shutdown_rx = shutdown_rx.clone();
        let handle = handle.clone();
        let name = format!("station-{}", station.config.name);
        info!(station = %station.config.name, url = %station.config.source_url, "starting station worker");
        worker_handles.push(
            thread::Builder::new()
                .name(name)
                .spawn(move || {
                    let _enter = handle.enter();
                    let opener = match station::HttpOpener::new() {
                        Ok(o) => o,
                        Err(e) => {
                            error!(station = %station.config.name, err = %e.chain(), "failed to build HTTP client");
                            return;
                        }
                    };
                    station::run(&station, &opener, &RealClocks {}, &shutdown_rx);
                })
                .expect("can't create station worker thread"),
        );
    }

    let scheduler_handle = {
        let shutdown_rx = shutdown_rx.clone();
        let handle = handle.clone();
        let stations = stations.clone();
        thread::Builder::new()
            .name("scheduler".into())
            .spawn(move || {
                let _enter = handle.enter();
                scheduler::run(&config, &stations, &RealClocks {}, &shutdown_rx);
            })
            .expect("can't create scheduler thread")
    };

    info!("ready; scheduling {} programmes", stations.len());
    shutdown_rx.as_future().await;

    info!("shutting down station workers and scheduler");
    tokio::task::spawn_blocking(move || {
        scheduler_handle.join().unwrap();
        for h in worker_handles {
            h.join().unwrap();
        }
    })
    .await
    .map_err(|e| base::err!(Internal, msg("joining worker threads"), source(e)))?;

    info!("exiting");
    Ok(0)
}

#[cfg(test)]
mod tests {
    #[test]
    fn bpaf_invariants() {
        super::args().check_invariants(false);
    }
}
