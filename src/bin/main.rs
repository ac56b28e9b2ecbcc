// pulp-sched host demo
//
// Boot sequence: logger -> config -> scheduler -> register work -> loop
// Main loop: one pass -> sleep the recommended time -> repeat
//
// A second thread plays the part of an ISR and raises soft interrupts
// through the shared SOFT_INT block. After a few seconds the shell
// prints the tables and the demo exits.

use core::task::{Poll, ready};
use std::thread;
use std::time::{Duration, Instant};

use log::{LevelFilter, Log, Metadata, Record, info, warn};

use pulp_sched::kernel::{
    Clock, CortnMode, Ctx, EventArg, SOFT_INT, SchedConfig, Scheduler, shell,
};
use pulp_sched::run_later;

const DEMO_SECS: u64 = 3;

// would live in SCHED.TXT on the SD card
const SCHED_TXT: &[u8] = b"\
# demo settings
idle_ceiling_us = 500_000
report_period_ms = 1000
report_max_lines = 10
";

struct HostClock {
    start: Instant,
}

impl Clock for HostClock {
    fn now_ticks(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    fn tick_hz(&self) -> u64 {
        1_000_000
    }
}

struct StdoutLogger;

impl Log for StdoutLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            println!("[{:<5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StdoutLogger = StdoutLogger;

#[derive(Default)]
struct Blink {
    on: bool,
    toggles: u32,
}

fn blinker(cx: &mut Ctx<'_, HostClock>, l: &mut Blink) -> Poll<()> {
    let mut at = cx.resume_point();
    loop {
        match at {
            0 => {
                l.on = !l.on;
                info!("led: {}", if l.on { "on" } else { "off" });
                return cx.delay_ms(1, 250);
            }
            1 => {
                l.toggles += 1;
                at = 2;
            }
            _ => {
                if l.toggles % 4 == 0 {
                    let count = l.toggles.to_le_bytes();
                    if let Err(e) = cx.sched().event_trigger_ex("blinked", &count) {
                        warn!("led: trigger failed: {}", e);
                    }
                }
                return Poll::Ready(());
            }
        }
    }
}

fn sink(cx: &mut Ctx<'_, HostClock>, seen: &mut u32) -> Poll<()> {
    let msg = ready!(cx.recv_msg(1));
    if let Ok(reading) = msg.downcast::<u32>() {
        *seen += 1;
        info!("sink: reading {} (#{})", reading, seen);
    }
    Poll::Ready(())
}

fn boot_done(code: u32, load: f32) {
    info!("runlater: boot done, code {} load {:.1}", code, load);
}

fn main() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
    info!("booting...");

    let config = SchedConfig::parse(SCHED_TXT);
    let clock = HostClock {
        start: Instant::now(),
    };
    let mut sched = Scheduler::with_config(clock, config);
    info!("scheduler ready");

    let mut reading: u32 = 0;
    let registered = sched
        .task_create("sample", 2.0, true, 2, move |s| {
            reading = reading.wrapping_mul(31).wrapping_add(7) % 1000;
            if let Err(e) = s.cortn_send_msg("sink", reading) {
                warn!("sample: send failed: {}", e);
            }
        })
        .and_then(|()| sched.task_create("heartbeat", 1.0, true, 1, |_| info!("heartbeat")))
        .and_then(|()| {
            sched.event_create("blinked", true, |_, arg: EventArg| {
                if let Ok(n) = <[u8; 4]>::try_from(arg.as_bytes()) {
                    info!("event: blinked {} times", u32::from_le_bytes(n));
                }
            })
        })
        .and_then(|()| sched.cortn_create("blink", blinker, Blink::default(), true, CortnMode::Loop))
        .and_then(|()| sched.cortn_create("sink", sink, 0u32, true, CortnMode::Loop))
        .and_then(|()| run_later!(sched, boot_done, 500_000, 0u32, 0.25f32));
    if let Err(e) = registered {
        warn!("setup failed: {}", e);
        return;
    }

    sched.set_softint_handler(|s, ch, mask| {
        info!("softint: ch {} mask {:#04x}", ch, mask);
        if ch == 1 {
            if let Err(e) = s.task_run_now("heartbeat") {
                warn!("softint: heartbeat failed: {}", e);
            }
        }
    });
    info!("work registered");

    // stand-in for a timer ISR
    thread::spawn(|| {
        let mut n: u8 = 0;
        loop {
            thread::sleep(Duration::from_millis(700));
            SOFT_INT.trigger(1, n % 8);
            n = n.wrapping_add(1);
        }
    });

    let deadline = Instant::now() + Duration::from_secs(DEMO_SECS);
    while Instant::now() < deadline {
        let sleep_us = sched.run(false);
        // wake often enough to notice the soft interrupts
        thread::sleep(Duration::from_micros(sleep_us.min(10_000)));
    }

    for line in ["task list", "event list", "cortn list", "runlater list"] {
        let mut out = String::new();
        if shell::execute(&mut sched, line, &mut out).is_ok() {
            print!("> {}\n{}", line, out);
        }
    }
    info!("done");
}
