//! Randomized IP identification values.
//!
//! [`RandomIdGenerator`] hands out 16-bit identifiers that an observer cannot
//! predict and that never repeat within a tunable number of issuances.
//! [`IdAssigner`] sits in front of it and decides per datagram whether to use
//! a random identifier, a sequential one, or 0 for atomic datagrams.
//!
//! ```
//! use ip_randomid::RandomIdGenerator;
//!
//! let ids = RandomIdGenerator::with_period(1024).unwrap();
//! let id = ids.next_id();
//! assert_ne!(id, 0);
//! assert_eq!(ids.total_issued(), 1);
//! ```

mod assign;
mod config;
mod error;
mod generator;
mod window;

pub use assign::{FragmentFlags, IdAssigner};
pub use config::IpIdConfig;
pub use error::{IdError, Result};
pub use generator::{
    validate_period, RandomIdGenerator, DEFAULT_PERIOD, FALLBACK_ID, MAX_PERIOD, MIN_PERIOD,
};
pub use window::{IdWindow, SystemAlloc, WindowAlloc, ID_SPACE};
