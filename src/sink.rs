// This file is part of wavevault, a scheduled internet-radio recorder.
// Copyright (C) 2026 The wavevault contributors.

//! [`Sink`] and the per-station [`SinkRegistry`] that fans broadcast bytes
//! into a dynamic, time-limited set of them.

use std::fs::File;
use std::io::Write;
use std::sync::Mutex;

use jiff::Zoned;
use tracing::{debug, warn};

/// A single output: an open append-mode file plus the instant after which
/// it should stop receiving bytes. Ownership of the file is transferred in
/// on [`SinkRegistry::attach`]; nothing outside the owning station holds a
/// writable alias to it.
pub struct Sink {
    label: String,
    valid_until: Zoned,
    output: File,
}

impl Sink {
    pub fn new(label: String, valid_until: Zoned, output: File) -> Self {
        Sink { label, valid_until, output }
    }
}

/// A station's mutable set of sinks, guarded by a single mutex. Both
/// `attach` (called by the scheduler) and `broadcast` (called by the
/// station worker) acquire it only for the span of their own operation.
#[derive(Default)]
pub struct SinkRegistry(Mutex<Vec<Sink>>);

impl SinkRegistry {
    pub fn new() -> Self {
        SinkRegistry(Mutex::new(Vec::new()))
    }

    /// Appends `sink` to the registry.
    pub fn attach(&self, sink: Sink) {
        debug!(label = %sink.label, valid_until = %sink.valid_until, "sink attached");
        self.0.lock().unwrap().push(sink);
    }

    /// Evicts every sink with `valid_until < now` (closing its output as it
    /// drops), then writes `chunk` to every sink that remains. A write
    /// failure on one sink drops just that sink and logs it; it never
    /// affects the others or propagates back to the caller.
    pub fn broadcast(&self, chunk: &[u8], now: &Zoned) {
        let mut sinks = self.0.lock().unwrap();
        sinks.retain_mut(|sink| {
            if sink.valid_until.timestamp() < now.timestamp() {
                debug!(label = %sink.label, "sink evicted (expired)");
                return false;
            }
            if let Err(e) = sink.output.write_all(chunk) {
                warn!(label = %sink.label, err = %e, "sink evicted (write error)");
                return false;
            }
            true
        });
    }

    /// Number of currently-attached sinks (including any that are expired
    /// but haven't yet been observed by a `broadcast` call). Test-only.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}
