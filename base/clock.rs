// This file is part of wavevault, a scheduled internet-radio recorder.
// Copyright (C) 2026 The wavevault contributors.

//! Clock interface and implementations for testability.

use std::mem;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration as StdDuration;
use tracing::warn;

use crate::error::Error;
use crate::shutdown;

/// Abstract interface to the system clocks. This is for testability: the
/// scheduler and station workers never call `std::thread::sleep` or read
/// the system clock directly, so tests can swap in [`SimulatedClocks`] and
/// fast-forward through days of recurrences without any real delay.
pub trait Clocks: Send + Sync + 'static {
    /// Gets the current wall-clock time, zoned to the system time zone.
    fn now(&self) -> jiff::Zoned;

    /// Gets a monotonic instant, suitable only for measuring elapsed time.
    fn monotonic(&self) -> std::time::Instant;

    /// Causes the current thread to sleep for the specified duration, or
    /// until `shutdown` fires, whichever comes first.
    fn sleep(&self, how_long: StdDuration, shutdown: &shutdown::Receiver);

    /// Calls `rcv.recv_timeout` or substitutes a test implementation.
    fn recv_timeout<T>(
        &self,
        rcv: &mpsc::Receiver<T>,
        timeout: StdDuration,
    ) -> Result<T, mpsc::RecvTimeoutError>;
}

/// Retries `f` until it succeeds or `shutdown_rx` fires, sleeping one second
/// between attempts and logging the error each time.
pub fn retry<C, T, E>(
    clocks: &C,
    shutdown_rx: &shutdown::Receiver,
    f: &mut dyn FnMut() -> Result<T, E>,
) -> Result<T, shutdown::ShutdownError>
where
    C: Clocks,
    E: Into<Error>,
{
    loop {
        let e = match f() {
            Ok(t) => return Ok(t),
            Err(e) => e.into(),
        };
        shutdown_rx.check()?;
        warn!(err = %e.chain(), "sleeping for 1 s after error");
        clocks.sleep(StdDuration::from_secs(1), shutdown_rx);
        shutdown_rx.check()?;
    }
}

#[derive(Copy, Clone, Default)]
pub struct RealClocks {}

impl RealClocks {
    fn clock_gettime(&self, clock: libc::clockid_t) -> jiff::Timestamp {
        unsafe {
            let mut ts = mem::MaybeUninit::uninit();
            assert_eq!(0, libc::clock_gettime(clock, ts.as_mut_ptr()));
            let ts = ts.assume_init();
            jiff::Timestamp::new(ts.tv_sec, ts.tv_nsec as i32)
                .expect("clock_gettime should return an in-range timestamp")
        }
    }
}

impl Clocks for RealClocks {
    fn now(&self) -> jiff::Zoned {
        self.clock_gettime(libc::CLOCK_REALTIME)
            .to_zoned(jiff::tz::TimeZone::system())
    }

    fn monotonic(&self) -> std::time::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, how_long: StdDuration, shutdown: &shutdown::Receiver) {
        // `wait_for` returns `Ok` on timeout, `Err` if shutdown fired first;
        // either way there's nothing further for a real sleep to do.
        let _ = shutdown.wait_for(how_long);
    }

    fn recv_timeout<T>(
        &self,
        rcv: &mpsc::Receiver<T>,
        timeout: StdDuration,
    ) -> Result<T, mpsc::RecvTimeoutError> {
        rcv.recv_timeout(timeout)
    }
}

/// Logs a warning if the `TimerGuard` lives "too long", using the label
/// created by a supplied function.
pub struct TimerGuard<'a, C: Clocks + ?Sized, S: AsRef<str>, F: FnOnce() -> S + 'a> {
    clocks: &'a C,
    label_f: Option<F>,
    start: std::time::Instant,
}

impl<'a, C: Clocks + ?Sized, S: AsRef<str>, F: FnOnce() -> S + 'a> TimerGuard<'a, C, S, F> {
    pub fn new(clocks: &'a C, label_f: F) -> Self {
        TimerGuard { clocks, label_f: Some(label_f), start: clocks.monotonic() }
    }
}

impl<'a, C, S, F> Drop for TimerGuard<'a, C, S, F>
where
    C: Clocks + ?Sized,
    S: AsRef<str>,
    F: FnOnce() -> S + 'a,
{
    fn drop(&mut self) {
        let elapsed = self.clocks.monotonic().duration_since(self.start);
        if elapsed.as_secs() >= 1 {
            let label_f = self.label_f.take().unwrap();
            warn!("{} took {:?}!", label_f().as_ref(), elapsed);
        }
    }
}

/// Simulated clock for testing: advances only when explicitly told to, so
/// scheduler and station-worker tests run in microseconds of real time
/// regardless of how far apart their recurrences fire.
#[derive(Clone)]
pub struct SimulatedClocks(Arc<SimulatedClocksInner>);

struct SimulatedClocksInner {
    epoch: jiff::Zoned,
    elapsed: Mutex<StdDuration>,
}

impl SimulatedClocks {
    pub fn new(epoch: jiff::Zoned) -> Self {
        SimulatedClocks(Arc::new(SimulatedClocksInner {
            epoch,
            elapsed: Mutex::new(StdDuration::ZERO),
        }))
    }

    /// Advances the clock by `d` without sleeping, waking anything blocked
    /// on the shutdown receiver's condvar so a simulated sleep can observe
    /// the new time immediately.
    pub fn advance(&self, d: StdDuration) {
        let mut l = self.0.elapsed.lock().unwrap();
        *l += d;
    }
}

impl Clocks for SimulatedClocks {
    fn now(&self) -> jiff::Zoned {
        let elapsed = *self.0.elapsed.lock().unwrap();
        self.0
            .epoch
            .checked_add(jiff::Span::try_from(elapsed).expect("elapsed span should be in range"))
            .expect("simulated time should stay in range")
    }

    fn monotonic(&self) -> std::time::Instant {
        // There is no meaningful simulated `Instant`; callers only use
        // `monotonic` to measure elapsed wall time within a single process,
        // which `TimerGuard` tolerates being real time even under simulation.
        std::time::Instant::now()
    }

    /// Advances the clock by the specified amount without actually sleeping,
    /// unless `shutdown` has already fired.
    fn sleep(&self, how_long: StdDuration, shutdown: &shutdown::Receiver) {
        if shutdown.check().is_err() {
            return;
        }
        self.advance(how_long);
    }

    fn recv_timeout<T>(
        &self,
        rcv: &mpsc::Receiver<T>,
        timeout: StdDuration,
    ) -> Result<T, mpsc::RecvTimeoutError> {
        let r = rcv.recv_timeout(StdDuration::ZERO);
        if r.is_err() {
            self.advance(timeout);
        }
        r
    }
}
