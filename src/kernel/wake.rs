// Low-power wait between scheduler passes
//
// run(true) hands the recommended sleep to the idle hook. The default
// hook parks the core in WFI until the clock has moved far enough; any
// interrupt (timer, GPIO, UART) wakes it early and the loop re-checks.
// Boards with deeper sleep modes install their own hook.

use super::time::{Clock, TimeBase};

/// Upper bound for one default idle wait
pub const IDLE_CLAMP_US: u64 = 100_000;

pub type IdleFn = alloc::boxed::Box<dyn FnMut(u64)>;

#[inline]
pub fn wait_for_interrupt() {
    #[cfg(all(any(target_arch = "riscv32", target_arch = "arm"), target_os = "none"))]
    unsafe {
        core::arch::asm!("wfi", options(nomem, nostack));
    }

    #[cfg(not(all(any(target_arch = "riscv32", target_arch = "arm"), target_os = "none")))]
    {
        core::hint::spin_loop();
    }
}

/// Sleep up to `us` (clamped to [`IDLE_CLAMP_US`]) using WFI.
pub fn idle_wait<C: Clock + ?Sized>(clock: &C, us: u64) {
    let tb = TimeBase::new(clock.tick_hz());
    let span = tb.us_to_ticks(us.min(IDLE_CLAMP_US));
    let start = clock.now_ticks();
    while clock.now_ticks().wrapping_sub(start) < span {
        wait_for_interrupt();
    }
}
