//! Randomized IP identifier generation.
//!
//! Every call draws fresh random candidates and rejects any that is zero or
//! was handed out within the last `period` calls. With `period` capped at half
//! the identifier space, at least half of all candidates are always free, so
//! the search ends after two draws on average.

use std::fmt;

use log::{debug, info, warn};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use crate::error::{IdError, Result};
use crate::window::{IdWindow, SystemAlloc, WindowAlloc};

pub const MIN_PERIOD: usize = 512;
pub const MAX_PERIOD: usize = 32768;
pub const DEFAULT_PERIOD: usize = 8192;

/// Returned by [`RandomIdGenerator::next_id`] while the window cannot be
/// allocated.
pub const FALLBACK_ID: u16 = 1;

/// Checks `period` against [`MIN_PERIOD`]..=[`MAX_PERIOD`].
pub fn validate_period(period: usize) -> Result<()> {
    if (MIN_PERIOD..=MAX_PERIOD).contains(&period) {
        Ok(())
    } else {
        Err(IdError::InvalidPeriod {
            requested: period,
            min: MIN_PERIOD,
            max: MAX_PERIOD,
        })
    }
}

struct State<R, A> {
    period: usize,
    window: Option<IdWindow>,
    rng: R,
    alloc: A,
    issued: u64,
    collisions: u64,
    /// Set while allocation keeps failing, so the failure is logged once.
    alloc_failing: bool,
}

impl<R: RngCore, A: WindowAlloc> State<R, A> {
    /// Asks the allocator for a window and checks it matches `period`.
    fn acquire(&mut self) -> Result<IdWindow> {
        let result = self.alloc.alloc(self.period).and_then(|window| {
            if window.period() == self.period {
                Ok(window)
            } else {
                Err(IdError::AllocationFailure {
                    period: self.period,
                })
            }
        });

        match &result {
            Ok(_) if self.alloc_failing => {
                info!("random id window of {} slots allocated, leaving fallback", self.period);
                self.alloc_failing = false;
            }
            Ok(_) => debug!("allocated random id window of {} slots", self.period),
            Err(err) if !self.alloc_failing => {
                warn!("{err}; issuing fallback id {FALLBACK_ID} until allocation succeeds");
                self.alloc_failing = true;
            }
            Err(_) => {}
        }
        result
    }

    fn next(&mut self) -> Result<u16> {
        let window = match self.window.take() {
            Some(window) => window,
            None => {
                let window = self.acquire()?;
                self.issued = 0;
                self.collisions = 0;
                window
            }
        };
        let window = self.window.insert(window);

        let id = loop {
            let candidate: u16 = self.rng.gen();
            if window.is_free(candidate) {
                break candidate;
            }
            self.collisions += 1;
        };

        window.push(id);
        self.issued += 1;
        Ok(id)
    }

    fn reset(&mut self, period: usize) {
        // Release the old buffers before asking for new ones.
        self.window = None;
        self.period = period;
        self.issued = 0;
        self.collisions = 0;

        debug!("random id period set to {period}");
        // On failure the window stays empty and `next` retries.
        self.window = self.acquire().ok();
    }
}

/// Hands out 16-bit identifiers that are unpredictable and never repeat within
/// the last `period` issuances.
///
/// All state sits behind one lock, so a generator can be shared freely between
/// threads. Buffers are allocated on first use.
pub struct RandomIdGenerator<R = StdRng, A = SystemAlloc> {
    state: Mutex<State<R, A>>,
}

impl RandomIdGenerator {
    /// Creates a generator with [`DEFAULT_PERIOD`], seeded from the OS.
    #[must_use]
    pub fn new() -> Self {
        Self::from_parts(DEFAULT_PERIOD, StdRng::from_entropy(), SystemAlloc)
    }

    pub fn with_period(period: usize) -> Result<Self> {
        validate_period(period)?;
        Ok(Self::from_parts(period, StdRng::from_entropy(), SystemAlloc))
    }
}

impl Default for RandomIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, A> RandomIdGenerator<R, A>
where
    R: RngCore,
    A: WindowAlloc,
{
    /// Builds a generator from an explicit random source and window allocator.
    pub fn with_parts(period: usize, rng: R, alloc: A) -> Result<Self> {
        validate_period(period)?;
        Ok(Self::from_parts(period, rng, alloc))
    }

    fn from_parts(period: usize, rng: R, alloc: A) -> Self {
        Self {
            state: Mutex::new(State {
                period,
                window: None,
                rng,
                alloc,
                issued: 0,
                collisions: 0,
                alloc_failing: false,
            }),
        }
    }

    /// Returns the next identifier, in `1..=u16::MAX`.
    ///
    /// Never fails: if the window cannot be allocated this returns
    /// [`FALLBACK_ID`] without touching the window or statistics, and
    /// allocation is retried on the next call.
    pub fn next_id(&self) -> u16 {
        self.try_next_id().unwrap_or(FALLBACK_ID)
    }

    /// Like [`next_id`](Self::next_id), but reports allocation failure.
    pub fn try_next_id(&self) -> Result<u16> {
        self.state.lock().next()
    }

    /// Changes the window length, discarding all history and statistics.
    ///
    /// An out-of-range `period` is rejected and leaves the generator as it was.
    pub fn reconfigure(&self, period: usize) -> Result<()> {
        if let Err(err) = validate_period(period) {
            warn!("rejected reconfiguration: {err}");
            return Err(err);
        }
        self.state.lock().reset(period);
        Ok(())
    }

    pub fn total_issued(&self) -> u64 {
        self.state.lock().issued
    }

    /// Random candidates rejected since the window was (re)initialized.
    pub fn total_collisions(&self) -> u64 {
        self.state.lock().collisions
    }

    pub fn current_period(&self) -> usize {
        self.state.lock().period
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().window.is_some()
    }
}

impl<R, A> fmt::Debug for RandomIdGenerator<R, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RandomIdGenerator")
            .field("period", &state.period)
            .field("initialized", &state.window.is_some())
            .field("issued", &state.issued)
            .field("collisions", &state.collisions)
            .finish_non_exhaustive()
    }
}
