use aarch64_cpu::{asm::barrier, registers::*};
use core::{
    num::{NonZeroU128, NonZeroU32, NonZeroU64},
    ops::{Add, Div},
    time::Duration,
};
use tock_registers::interfaces::Readable;

const NANOSEC_PER_SEC: NonZeroU64 = match NonZeroU64::new(1_000_000_000) {
    Some(x) => x,
    None => unreachable!(),
};

/// Boot assembly code overwrites this value with the value of CNTFRQ_EL0 before any Rust code is
/// executed. This given value here is just a (safe) dummy.
#[no_mangle]
static ARCH_TIMER_COUNTER_FREQUENCY: NonZeroU32 = NonZeroU32::MIN;

/// The timer's resolution.
pub fn resolution() -> Duration {
    Duration::from(TimerCounter(1))
}

/// The uptime since power-on of the device.
///
/// This includes time consumed by firmware and the first boot stage.
pub fn uptime() -> Duration {
    TimerCounter::from_cntpct().into()
}

/// Spin for a given duration.
pub fn spin_for(duration: Duration) -> Result<(), &'static str> {
    let curr_timer = TimerCounter::from_cntpct();

    let duration: TimerCounter = duration.try_into()?;
    let timer_target = curr_timer + duration;

    while TimerCounter::from_cntpct_direct() < timer_target {}

    Ok(())
}

fn arch_timer_counter_frequency() -> NonZeroU32 {
    // The boot assembly writes the value behind the compiler's back.
    unsafe { core::ptr::read_volatile(&ARCH_TIMER_COUNTER_FREQUENCY) }
}

#[derive(Copy, Clone, PartialOrd, PartialEq)]
struct TimerCounter(u64);

impl TimerCounter {
    const MAX: Self = Self(u64::MAX);

    /// Reads CNTPCT_EL0 after an instruction barrier.
    #[inline(always)]
    fn from_cntpct() -> Self {
        barrier::isb(barrier::SY);
        Self(CNTPCT_EL0.get())
    }

    /// Reads CNTPCT_EL0 without a barrier.
    #[inline(always)]
    fn from_cntpct_direct() -> Self {
        Self(CNTPCT_EL0.get())
    }
}

impl Add for TimerCounter {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        TimerCounter(self.0.wrapping_add(other.0))
    }
}

impl From<TimerCounter> for Duration {
    fn from(timer: TimerCounter) -> Self {
        if timer.0 == 0 {
            return Duration::ZERO;
        }

        let frequency: NonZeroU64 = arch_timer_counter_frequency().into();

        let secs = timer.0.div(frequency);

        // frequency fits in u32, so the remainder times 1e9 fits in u64.
        let sub_second_counter_value = timer.0 % frequency;
        let nanos =
            (sub_second_counter_value * u64::from(NANOSEC_PER_SEC)).div(frequency) as u32;

        Duration::new(secs, nanos)
    }
}

impl TryFrom<Duration> for TimerCounter {
    type Error = &'static str;

    fn try_from(duration: Duration) -> Result<Self, Self::Error> {
        if duration < resolution() {
            return Ok(TimerCounter(0));
        }

        if duration > Duration::from(TimerCounter::MAX) {
            return Err("Conversion error. Duration too big");
        }

        let frequency: u128 = u32::from(arch_timer_counter_frequency()) as u128;
        let duration: u128 = duration.as_nanos();

        let counter_value = (duration * frequency).div(NonZeroU128::from(NANOSEC_PER_SEC));

        Ok(TimerCounter(counter_value as u64))
    }
}
