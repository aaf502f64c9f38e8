//! The silence timer measures time since the last activity on the bus.
//!
//! It is reset whenever an octet is received or a frame is transmitted.  Every timeout of the
//! MS/TP state machines is expressed as "silence exceeds some value".
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Source of the elapsed silence on the bus
///
/// Implementations are cheap to clone and all clones share the same timer.
pub trait SilenceTimer {
    /// Milliseconds since the last reset.
    fn elapsed_ms(&self) -> u32;

    /// Restart counting from zero.
    fn reset(&self);
}

fn duration_to_ms(d: Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}

/// Silence timer based on the monotonic system clock
#[derive(Debug, Clone)]
pub struct StdSilenceTimer {
    last_activity: Arc<Mutex<Instant>>,
}

impl StdSilenceTimer {
    pub fn new() -> Self {
        Self {
            last_activity: Arc::new(Mutex::new(Instant::now())),
        }
    }
}

impl Default for StdSilenceTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl SilenceTimer for StdSilenceTimer {
    fn elapsed_ms(&self) -> u32 {
        let last = *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        duration_to_ms(last.elapsed())
    }

    fn reset(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }
}

/// Manually advanced clock for simulations and tests
#[derive(Debug, Clone, Default)]
pub struct SimulatedClock {
    micros: Arc<AtomicU64>,
}

impl SimulatedClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time since the start of the simulation.
    pub fn now(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::SeqCst))
    }

    pub fn advance(&self, dur: Duration) {
        let micros = u64::try_from(dur.as_micros()).unwrap_or(u64::MAX);
        self.micros.fetch_add(micros, Ordering::SeqCst);
    }

    pub fn set(&self, time: Duration) {
        let micros = u64::try_from(time.as_micros()).unwrap_or(u64::MAX);
        self.micros.store(micros, Ordering::SeqCst);
    }

    /// Create a silence timer running on this clock.
    pub fn silence_timer(&self) -> SimulatedSilenceTimer {
        SimulatedSilenceTimer {
            clock: self.clone(),
            last_activity: Arc::new(AtomicU64::new(self.micros.load(Ordering::SeqCst))),
        }
    }
}

/// Silence timer driven by a [`SimulatedClock`]
#[derive(Debug, Clone)]
pub struct SimulatedSilenceTimer {
    clock: SimulatedClock,
    last_activity: Arc<AtomicU64>,
}

impl SilenceTimer for SimulatedSilenceTimer {
    fn elapsed_ms(&self) -> u32 {
        let now = self.clock.micros.load(Ordering::SeqCst);
        let last = self.last_activity.load(Ordering::SeqCst);
        duration_to_ms(Duration::from_micros(now.saturating_sub(last)))
    }

    fn reset(&self) {
        self.last_activity
            .store(self.clock.micros.load(Ordering::SeqCst), Ordering::SeqCst);
    }
}
