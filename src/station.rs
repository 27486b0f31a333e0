// This file is part of wavevault, a scheduled internet-radio recorder.
// Copyright (C) 2026 The wavevault contributors.

//! The per-station background worker: fetches a station's stream
//! (optionally through a playlist indirection) and fans received bytes out
//! to the station's [`SinkRegistry`].
//!
//! The actual byte source is reached through the [`Opener`]/[`ByteStream`]
//! traits rather than `reqwest` directly, so reconnect and playlist-parsing
//! behavior can be exercised with a synthetic source and no real network.

use std::time::Duration;

use base::clock::Clocks;
use base::shutdown::Receiver;
use base::{err, Error, ErrorKind, ResultExt};
use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::config;
use crate::sink::SinkRegistry;

/// Delay applied after an empty playlist or a failed playlist fetch, to
/// avoid a tight reconnect storm against a broken playlist endpoint.
const PLAYLIST_BACKOFF: Duration = Duration::from_secs(1);

/// Opens a byte-producing connection to a URL. Implemented by [`HttpOpener`]
/// for real use and by synthetic fakes in tests.
pub trait Opener: Send + Sync {
    /// Opens a direct stream at `url`.
    fn open(&self, url: &str) -> Result<Box<dyn ByteStream>, Error>;

    /// Fetches the full body at `url`, bounded by `timeout`.
    fn fetch_playlist(&self, url: &str, timeout: Duration) -> Result<String, Error>;
}

/// An open, in-progress byte stream.
pub trait ByteStream: Send {
    /// Blocks for the next chunk, or `Ok(None)` on a clean end of stream.
    /// Returns `Err` with kind [`ErrorKind::DeadlineExceeded`] if no chunk
    /// arrives within `timeout` (the worker's inactivity timeout).
    fn next_chunk(&mut self, timeout: Duration) -> Result<Option<Bytes>, Error>;
}

/// Real implementation backed by `reqwest`. Runs its blocking calls on the
/// current thread's entered Tokio runtime handle, so it's meant to be used
/// from a station worker thread that has called `Handle::enter()`.
pub struct HttpOpener {
    client: reqwest::Client,
}

impl HttpOpener {
    pub fn new() -> Result<Self, Error> {
        let client = reqwest::Client::builder().build().err_kind(ErrorKind::Internal)?;
        Ok(HttpOpener { client })
    }
}

impl Opener for HttpOpener {
    fn open(&self, url: &str) -> Result<Box<dyn ByteStream>, Error> {
        let handle = tokio::runtime::Handle::current();
        let client = self.client.clone();
        let url = url.to_owned();
        let resp = handle
            .block_on(async move { client.get(&url).send().await?.error_for_status() })
            .err_kind(ErrorKind::Unavailable)?;
        Ok(Box::new(HttpByteStream { resp, handle }))
    }

    fn fetch_playlist(&self, url: &str, timeout: Duration) -> Result<String, Error> {
        let handle = tokio::runtime::Handle::current();
        let client = self.client.clone();
        let url = url.to_owned();
        handle
            .block_on(async move {
                client.get(&url).timeout(timeout).send().await?.error_for_status()?.text().await
            })
            .err_kind(ErrorKind::DeadlineExceeded)
    }
}

struct HttpByteStream {
    resp: reqwest::Response,
    handle: tokio::runtime::Handle,
}

impl ByteStream for HttpByteStream {
    fn next_chunk(&mut self, timeout: Duration) -> Result<Option<Bytes>, Error> {
        let resp = &mut self.resp;
        match self.handle.block_on(async move { tokio::time::timeout(timeout, resp.chunk()).await })
        {
            Ok(Ok(chunk)) => Ok(chunk),
            Ok(Err(e)) => Err(err!(Unavailable, msg("stream read failed"), source(e))),
            Err(_) => Err(err!(DeadlineExceeded, msg("no bytes for {timeout:?}"))),
        }
    }
}

/// The runtime state of a station: its static configuration plus the sinks
/// its worker is currently broadcasting into.
pub struct Station {
    pub config: config::Station,
    pub sinks: SinkRegistry,
}

impl Station {
    pub fn new(config: config::Station) -> Self {
        Station { config, sinks: SinkRegistry::new() }
    }
}

/// Runs a station's worker loop until `shutdown` fires. Never returns
/// otherwise: network errors, inactivity timeouts and playlist hiccups are
/// all handled by reconnecting.
pub fn run<C: Clocks>(station: &Station, opener: &dyn Opener, clocks: &C, shutdown: &Receiver) {
    match station.config.strategy {
        config::Strategy::Direct => run_direct_forever(station, opener, clocks, shutdown),
        config::Strategy::Playlist => run_playlist_forever(station, opener, clocks, shutdown),
    }
}

fn run_direct_forever<C: Clocks>(
    station: &Station,
    opener: &dyn Opener,
    clocks: &C,
    shutdown: &Receiver,
) {
    while shutdown.check().is_ok() {
        run_direct_once(station, opener, clocks, shutdown, &station.config.source_url);
    }
}

/// Opens one connection to `url` and tees bytes into the station's sinks
/// until the connection ends, errors, stalls past `timeout_direct`, or
/// shutdown is observed. Always returns (never itself loops).
fn run_direct_once<C: Clocks>(
    station: &Station,
    opener: &dyn Opener,
    clocks: &C,
    shutdown: &Receiver,
    url: &str,
) {
    debug!(station = %station.config.name, url, "connection attempt");
    let mut stream = match opener.open(url) {
        Ok(s) => s,
        Err(e) => {
            warn!(station = %station.config.name, err = %e.chain(), "connection attempt failed, reconnecting");
            return;
        }
    };

    let mut first_packet_logged = false;
    loop {
        if shutdown.check().is_err() {
            return;
        }
        match stream.next_chunk(station.config.timeout_direct) {
            Ok(Some(chunk)) => {
                if !first_packet_logged {
                    info!(station = %station.config.name, "first packet received");
                    first_packet_logged = true;
                }
                station.sinks.broadcast(&chunk, &clocks.now());
            }
            Ok(None) => {
                debug!(station = %station.config.name, "connection ended");
                return;
            }
            Err(e) if e.kind() == ErrorKind::DeadlineExceeded => {
                warn!(station = %station.config.name, timeout = ?station.config.timeout_direct, "inactivity timeout, reconnecting");
                return;
            }
            Err(e) => {
                warn!(station = %station.config.name, err = %e.chain(), "reconnecting");
                return;
            }
        }
    }
}

fn run_playlist_forever<C: Clocks>(
    station: &Station,
    opener: &dyn Opener,
    clocks: &C,
    shutdown: &Receiver,
) {
    while shutdown.check().is_ok() {
        let body = match opener.fetch_playlist(&station.config.source_url, station.config.timeout_playlist)
        {
            Ok(b) => b,
            Err(e) => {
                warn!(station = %station.config.name, err = %e.chain(), "playlist fetch failed");
                clocks.sleep(PLAYLIST_BACKOFF, shutdown);
                continue;
            }
        };
        let urls = parse_playlist(&body);
        if urls.is_empty() {
            warn!(station = %station.config.name, "playlist empty");
            clocks.sleep(PLAYLIST_BACKOFF, shutdown);
            continue;
        }
        info!(station = %station.config.name, count = urls.len(), "playlist fetched");
        for url in &urls {
            if shutdown.check().is_err() {
                return;
            }
            run_direct_once(station, opener, clocks, shutdown, url);
        }
    }
}

/// Parses a playlist body into an ordered list of absolute URLs: `\r` is
/// normalized to `\n`, lines are trimmed, and empty lines or lines starting
/// with `#` are skipped.
fn parse_playlist(body: &str) -> Vec<String> {
    body.replace('\r', "\n")
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base::clock::SimulatedClocks;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn station(strategy: config::Strategy) -> Station {
        Station::new(config::Station {
            name: "wdr5".into(),
            source_url: "http://example.invalid/stream".into(),
            strategy,
            timeout_direct: Duration::from_secs(5),
            timeout_playlist: Duration::from_secs(5),
        })
    }

    fn clocks() -> SimulatedClocks {
        SimulatedClocks::new("2020-01-01T00:00:00[UTC]".parse().unwrap())
    }

    struct OnceStream(std::vec::IntoIter<Bytes>);

    impl ByteStream for OnceStream {
        fn next_chunk(&mut self, _timeout: Duration) -> Result<Option<Bytes>, Error> {
            Ok(self.0.next())
        }
    }

    /// Fails its first two `open` calls, then yields one chunk and EOF.
    struct FlakyOpener {
        attempts: AtomicUsize,
    }

    impl Opener for FlakyOpener {
        fn open(&self, _url: &str) -> Result<Box<dyn ByteStream>, Error> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                return Err(ErrorKind::Unavailable.into());
            }
            Ok(Box::new(OnceStream(vec![Bytes::from_static(b"abc")].into_iter())))
        }

        fn fetch_playlist(&self, _url: &str, _timeout: Duration) -> Result<String, Error> {
            unreachable!("direct-strategy test never fetches a playlist")
        }
    }

    #[test]
    #[tracing_test::traced_test]
    fn reconnects_then_reports_first_packet() {
        let station = station(config::Strategy::Direct);
        let opener = FlakyOpener { attempts: AtomicUsize::new(0) };
        let clocks = clocks();
        let (_tx, rx) = base::shutdown::channel();

        for _ in 0..3 {
            run_direct_once(&station, &opener, &clocks, &rx, &station.config.source_url);
        }

        // Two failed opens (each logging a reconnect) then one that yields a
        // chunk (logging "first packet received").
        assert_eq!(opener.attempts.load(Ordering::SeqCst), 3);
        assert!(logs_contain("first packet received"));
        assert!(logs_contain("connection attempt failed, reconnecting"));
    }

    #[test]
    fn broadcasts_received_bytes_into_sinks() {
        let station = station(config::Strategy::Direct);
        let opener = FlakyOpener { attempts: AtomicUsize::new(2) };
        let clocks = clocks();
        let (_tx, rx) = base::shutdown::channel();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp3");
        let f = std::fs::OpenOptions::new().create(true).append(true).open(&path).unwrap();
        station.sinks.attach(crate::sink::Sink::new(
            "test".into(),
            "2099-01-01T00:00:00[UTC]".parse().unwrap(),
            f,
        ));

        run_direct_once(&station, &opener, &clocks, &rx, &station.config.source_url);

        let got = std::fs::read(&path).unwrap();
        assert_eq!(got, b"abc");
    }

    #[test]
    fn playlist_parsing_skips_blank_and_comment_lines() {
        let body = "# header\r\nhttp://a.invalid/1\n\n  http://a.invalid/2  \n# trailing\n";
        assert_eq!(
            parse_playlist(body),
            vec!["http://a.invalid/1".to_string(), "http://a.invalid/2".to_string()]
        );
    }

    #[test]
    fn empty_playlist_is_reported_and_backs_off() {
        // Always returns an empty playlist; drops the shutdown sender on
        // its *second* call, so the forever-loop backs off exactly once
        // (advancing the simulated clock by one second) before its next
        // `shutdown.check()` terminates it — deterministic, no real-time
        // wait.
        struct EmptyOnceOpener {
            calls: AtomicUsize,
            tx: std::sync::Mutex<Option<base::shutdown::Sender>>,
        }
        impl Opener for EmptyOnceOpener {
            fn open(&self, _url: &str) -> Result<Box<dyn ByteStream>, Error> {
                unreachable!()
            }
            fn fetch_playlist(&self, _url: &str, _timeout: Duration) -> Result<String, Error> {
                if self.calls.fetch_add(1, Ordering::SeqCst) >= 1 {
                    self.tx.lock().unwrap().take();
                }
                Ok(String::new())
            }
        }

        let station = station(config::Strategy::Playlist);
        let clocks = clocks();
        let (tx, rx) = base::shutdown::channel();
        let before = clocks.now();
        let opener = EmptyOnceOpener { calls: AtomicUsize::new(0), tx: std::sync::Mutex::new(Some(tx)) };
        run_playlist_forever(&station, &opener, &clocks, &rx);
        assert_eq!(clocks.now(), &before + jiff::Span::new().seconds(1));
    }
}
