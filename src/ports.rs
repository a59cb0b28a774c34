//! Local port allocation for probe inbounds.
//!
//! Every probe listens on its own loopback SOCKS5 port. [`PortAllocator`]
//! hands them out from a bounded rotating pool: a monotonic counter taken
//! modulo the pool size, offset by a fixed base. The counter is atomic, so
//! probes running in parallel never receive the same port until the pool
//! wraps.
//!
//! ```text
//!   next() #0      #1      ...   #pool-1         #pool
//!     │            │                │              │
//!     ▼            ▼                ▼              ▼
//!   base       base + 1   ...  base + pool - 1    base   (wraps)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};

/// Default first port of the pool.
pub const DEFAULT_PORT_BASE: u16 = 20000;

/// Default number of ports in the pool.
pub const DEFAULT_PORT_POOL: u16 = 10000;

/// Hands out loopback ports from `base..base + pool`.
///
/// Owned by the probe runner and shared through an `Arc`; there is no
/// process-wide counter.
///
/// # Example
///
/// ```rust
/// use obfs_scout::ports::PortAllocator;
///
/// let ports = PortAllocator::new(30000, 2).unwrap();
/// assert_eq!(ports.next(), 30000);
/// assert_eq!(ports.next(), 30001);
/// assert_eq!(ports.next(), 30000);
/// ```
#[derive(Debug)]
pub struct PortAllocator {
    base: u16,
    pool: u16,
    counter: AtomicU64,
}

impl PortAllocator {
    /// Creates an allocator over `pool` ports starting at `base`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the pool is empty or its last port does
    /// not fit in a `u16`.
    pub fn new(base: u16, pool: u16) -> Result<Self> {
        if pool == 0 {
            return Err(Error::Config("port pool must not be empty".to_string()));
        }
        if u32::from(base) + u32::from(pool) - 1 > u32::from(u16::MAX) {
            return Err(Error::Config(format!(
                "port pool {}+{} exceeds {}",
                base,
                pool,
                u16::MAX
            )));
        }
        Ok(Self {
            base,
            pool,
            counter: AtomicU64::new(0),
        })
    }

    /// Returns the next port in rotation.
    pub fn next(&self) -> u16 {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        // Bounded by pool, so the cast cannot truncate.
        self.base + (n % u64::from(self.pool)) as u16
    }

    /// First port of the pool.
    pub fn base(&self) -> u16 {
        self.base
    }

    /// Number of ports in the pool.
    pub fn pool(&self) -> u16 {
        self.pool
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self {
            base: DEFAULT_PORT_BASE,
            pool: DEFAULT_PORT_POOL,
            counter: AtomicU64::new(0),
        }
    }
}
