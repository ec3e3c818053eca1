//! Choosing the identification field of an outgoing datagram.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::debug;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use crate::config::IpIdConfig;
use crate::error::Result;
use crate::generator::RandomIdGenerator;
use crate::window::{SystemAlloc, WindowAlloc};

const IP_DF: u16 = 0x4000;
const IP_MF: u16 = 0x2000;
const IP_OFFMASK: u16 = 0x1fff;

/// Fragmentation state of a datagram, as carried in the IPv4 `ip_off` field.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FragmentFlags {
    pub dont_fragment: bool,
    pub more_fragments: bool,
    /// Fragment offset in 8-byte units.
    pub offset: u16,
}

impl FragmentFlags {
    /// Decodes a host-order `ip_off` field.
    pub fn from_ip_off(ip_off: u16) -> Self {
        Self {
            dont_fragment: ip_off & IP_DF != 0,
            more_fragments: ip_off & IP_MF != 0,
            offset: ip_off & IP_OFFMASK,
        }
    }

    /// An atomic datagram is neither a fragment nor allowed to become one
    /// (RFC 6864, section 4).
    pub fn is_atomic(&self) -> bool {
        self.dont_fragment && !self.more_fragments && self.offset == 0
    }
}

/// Picks identifiers for outgoing datagrams according to the current policy.
///
/// Atomic datagrams get 0 when RFC 6864 mode is on. Otherwise the identifier
/// comes from the [`RandomIdGenerator`] in random mode, or from a sequential
/// counter with a random starting point.
#[derive(Debug)]
pub struct IdAssigner<R = StdRng, A = SystemAlloc> {
    random: RandomIdGenerator<R, A>,
    sequence: AtomicU64,
    random_enabled: AtomicBool,
    rfc6864: AtomicBool,
    /// Serializes [`apply`](IdAssigner::apply) calls.
    apply_lock: Mutex<()>,
}

impl IdAssigner {
    pub fn new(config: &IpIdConfig) -> Result<Self> {
        config.validate()?;
        let generator = RandomIdGenerator::with_period(config.random_id_period)?;
        let seed = StdRng::from_entropy().gen();
        Self::from_parts(config, generator, seed)
    }
}

impl<R, A> IdAssigner<R, A>
where
    R: RngCore,
    A: WindowAlloc,
{
    /// Wraps an existing generator. `sequence_seed` is the starting value of
    /// the sequential counter.
    pub fn from_parts(
        config: &IpIdConfig,
        generator: RandomIdGenerator<R, A>,
        sequence_seed: u64,
    ) -> Result<Self> {
        let assigner = Self {
            random: generator,
            sequence: AtomicU64::new(sequence_seed),
            random_enabled: AtomicBool::new(config.random_id),
            rfc6864: AtomicBool::new(config.rfc6864),
            apply_lock: Mutex::new(()),
        };
        assigner.apply(config)?;
        Ok(assigner)
    }

    /// Returns the identification field for a datagram with `flags`.
    pub fn assign(&self, flags: FragmentFlags) -> u16 {
        if self.rfc6864.load(Ordering::Relaxed) && flags.is_atomic() {
            0
        } else if self.random_enabled.load(Ordering::Relaxed) {
            self.random.next_id()
        } else {
            let count = self.sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            (count & 0xffff) as u16
        }
    }

    /// Applies every tunable in `config`.
    ///
    /// The whole config is validated first, so a bad period changes nothing.
    /// The random window is only reset when the period actually changes.
    ///
    /// Concurrent `apply` calls take effect one after another, never
    /// interleaved. Concurrent [`assign`](Self::assign) calls are not
    /// blocked, so while an update is in progress a datagram may see the new
    /// period together with the old mode flags.
    pub fn apply(&self, config: &IpIdConfig) -> Result<()> {
        config.validate()?;
        let _guard = self.apply_lock.lock();
        if config.random_id_period != self.random.current_period() {
            self.random.reconfigure(config.random_id_period)?;
        }
        self.set_random(config.random_id);
        self.set_rfc6864(config.rfc6864);
        Ok(())
    }

    pub fn set_random(&self, enabled: bool) {
        if self.random_enabled.swap(enabled, Ordering::Relaxed) != enabled {
            debug!("random ip ids {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    pub fn set_rfc6864(&self, enabled: bool) {
        self.rfc6864.store(enabled, Ordering::Relaxed);
    }

    pub fn set_period(&self, period: usize) -> Result<()> {
        self.random.reconfigure(period)
    }

    pub fn is_random(&self) -> bool {
        self.random_enabled.load(Ordering::Relaxed)
    }

    pub fn is_rfc6864(&self) -> bool {
        self.rfc6864.load(Ordering::Relaxed)
    }

    pub fn generator(&self) -> &RandomIdGenerator<R, A> {
        &self.random
    }

    pub fn config(&self) -> IpIdConfig {
        IpIdConfig {
            random_id: self.is_random(),
            random_id_period: self.random.current_period(),
            rfc6864: self.is_rfc6864(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IdError;
    use crate::generator::DEFAULT_PERIOD;
    use std::collections::HashSet;

    const FRAGMENTABLE: FragmentFlags = FragmentFlags {
        dont_fragment: false,
        more_fragments: false,
        offset: 0,
    };

    const ATOMIC: FragmentFlags = FragmentFlags {
        dont_fragment: true,
        more_fragments: false,
        offset: 0,
    };

    fn assigner(config: &IpIdConfig, seed: u64) -> IdAssigner {
        let generator = RandomIdGenerator::with_parts(
            config.random_id_period,
            StdRng::seed_from_u64(seed),
            SystemAlloc,
        )
        .unwrap();
        IdAssigner::from_parts(config, generator, seed).unwrap()
    }

    #[test]
    fn test_fragment_flags() {
        let flags = FragmentFlags::from_ip_off(0x4000);
        assert!(flags.dont_fragment);
        assert!(flags.is_atomic());

        assert!(!FragmentFlags::from_ip_off(0x6000).is_atomic());
        assert!(!FragmentFlags::from_ip_off(0x4001).is_atomic());
        assert!(!FragmentFlags::from_ip_off(0x0000).is_atomic());
        assert_eq!(FragmentFlags::from_ip_off(0x20b9).offset, 0xb9);
    }

    #[test]
    fn test_sequential_ids() {
        let config = IpIdConfig::default();
        let ids = assigner(&config, 0xfffe);

        assert_eq!(ids.assign(FRAGMENTABLE), 0xffff);
        assert_eq!(ids.assign(FRAGMENTABLE), 0);
        assert_eq!(ids.assign(FRAGMENTABLE), 1);
        assert!(!ids.generator().is_initialized());
    }

    #[test]
    fn test_rfc6864_atomic_datagrams() {
        let config = IpIdConfig {
            random_id: true,
            ..IpIdConfig::default()
        };
        let ids = assigner(&config, 1);

        assert_eq!(ids.assign(ATOMIC), 0);
        assert_eq!(ids.generator().total_issued(), 0);
        assert_ne!(ids.assign(FRAGMENTABLE), 0);

        ids.set_rfc6864(false);
        assert_ne!(ids.assign(ATOMIC), 0);
        assert_eq!(ids.generator().total_issued(), 2);
    }

    #[test]
    fn test_random_ids() {
        let config = IpIdConfig {
            random_id: true,
            random_id_period: 4096,
            rfc6864: false,
        };
        let ids = assigner(&config, 9);

        let seen: HashSet<u16> = (0..4096).map(|_| ids.assign(FRAGMENTABLE)).collect();
        assert_eq!(seen.len(), 4096);
        assert!(!seen.contains(&0));
        assert_eq!(ids.generator().total_issued(), 4096);
    }

    #[test]
    fn test_apply() {
        let ids = assigner(&IpIdConfig::default(), 2);
        assert_eq!(ids.config(), IpIdConfig::default());

        let updated = IpIdConfig {
            random_id: true,
            random_id_period: 1024,
            rfc6864: false,
        };
        ids.apply(&updated).unwrap();
        assert_eq!(ids.config(), updated);

        let bad = IpIdConfig {
            random_id: false,
            random_id_period: 100,
            rfc6864: true,
        };
        assert!(matches!(
            ids.apply(&bad),
            Err(IdError::InvalidPeriod { requested: 100, .. })
        ));
        assert_eq!(ids.config(), updated);
    }

    #[test]
    fn test_concurrent_apply_is_not_interleaved() {
        use std::sync::Arc;
        use std::thread;

        let first = IpIdConfig {
            random_id: true,
            random_id_period: 1024,
            rfc6864: false,
        };
        let second = IpIdConfig {
            random_id: false,
            random_id_period: 2048,
            rfc6864: true,
        };
        let ids = Arc::new(assigner(&IpIdConfig::default(), 5));

        let handles: Vec<_> = [first, second]
            .into_iter()
            .map(|config| {
                let ids = ids.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        ids.apply(&config).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let last = ids.config();
        assert!(last == first || last == second, "mixed config {last:?}");
    }

    #[test]
    fn test_set_period() {
        let config = IpIdConfig {
            random_id: true,
            ..IpIdConfig::default()
        };
        let ids = assigner(&config, 4);
        ids.assign(FRAGMENTABLE);
        assert_eq!(ids.generator().current_period(), DEFAULT_PERIOD);

        assert!(ids.set_period(70_000).is_err());
        assert_eq!(ids.generator().total_issued(), 1);

        ids.set_period(512).unwrap();
        assert_eq!(ids.generator().current_period(), 512);
        assert_eq!(ids.generator().total_issued(), 0);
    }
}
