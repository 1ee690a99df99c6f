//! Injected time source
//!
//! Every timestamp the stores write comes from a [`Clock`] so tests can pin
//! time and assert on exact values.

use chrono::{DateTime, Utc};

/// Time source for record timestamps
///
/// Production code uses [`SystemClock`]; tests inject a fake that returns a
/// controlled value.
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock [`Clock`] backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
