//! Timer primitives.

#[cfg(target_arch = "aarch64")]
#[path = "arch/aarch64/time.rs"]
mod arch_time;

#[cfg(not(target_arch = "aarch64"))]
mod arch_time {
    use core::time::Duration;

    pub fn uptime() -> Duration {
        Duration::ZERO
    }

    pub fn resolution() -> Duration {
        Duration::from_nanos(1)
    }

    pub fn spin_for(_duration: Duration) -> Result<(), &'static str> {
        Ok(())
    }
}

use core::time::Duration;

/// Timing interfaces.
pub mod interface {
    /// Blocking delays used by the bounded polling loops of the drivers.
    pub trait Delay {
        /// Busy-wait for at least `us` microseconds.
        fn delay_us(&self, us: u64);

        /// Busy-wait for at least `ms` milliseconds.
        fn delay_ms(&self, ms: u64) {
            self.delay_us(ms.saturating_mul(1000))
        }
    }
}

impl<D: interface::Delay + ?Sized> interface::Delay for &D {
    fn delay_us(&self, us: u64) {
        (**self).delay_us(us)
    }
}

/// Delay provider backed by the architectural counter.
#[derive(Copy, Clone, Default)]
pub struct SystemTimer;

impl interface::Delay for SystemTimer {
    fn delay_us(&self, us: u64) {
        if let Err(x) = spin_for(Duration::from_micros(us)) {
            crate::warn!("spin_for: {}", x);
        }
    }
}

/// The uptime since power-on of the device.
pub fn uptime() -> Duration {
    arch_time::uptime()
}

/// The timer's resolution.
pub fn resolution() -> Duration {
    arch_time::resolution()
}

/// Spin for a given duration.
pub fn spin_for(duration: Duration) -> Result<(), &'static str> {
    arch_time::spin_for(duration)
}

#[cfg(test)]
pub mod test_support {
    //! Simulated time for bounded polling loops.

    use super::interface::Delay;
    use core::cell::Cell;

    /// Advances a virtual clock instead of waiting.
    #[derive(Default)]
    pub struct SimDelay {
        elapsed_us: Cell<u64>,
    }

    impl SimDelay {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn elapsed_ms(&self) -> u64 {
            self.elapsed_us.get() / 1000
        }
    }

    impl Delay for SimDelay {
        fn delay_us(&self, us: u64) {
            self.elapsed_us.set(self.elapsed_us.get() + us);
        }
    }
}
