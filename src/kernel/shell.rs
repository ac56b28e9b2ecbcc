// Line-based command surface
//
// Feed one line at a time from whatever transport the board has (UART,
// USB CDC, a test harness); replies go to any fmt::Write.

use alloc::format;
use alloc::vec::Vec;
use core::fmt::{self, Write};

use super::error::Result;
use super::scheduler::Scheduler;
use super::time::Clock;

const HELP: &str = "\
task list
task enable|disable|delete|exec <name>
task setfreq <name> <hz>
task setpri <name> <pri>
event list
event enable|disable|delete <name>
event trigger <name> [content]
cortn list
cortn kill|enable|disable <name>
softint <channel> <sub-channel>
runlater list
";

// first word and the rest with leading blanks stripped
fn word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(end) => (&s[..end], s[end..].trim_start()),
        None => (s, ""),
    }
}

fn outcome<W: Write>(out: &mut W, r: Result<()>) -> fmt::Result {
    match r {
        Ok(()) => writeln!(out, "ok"),
        Err(e) => writeln!(out, "error: {}", e),
    }
}

fn usage<W: Write>(out: &mut W) -> fmt::Result {
    writeln!(out, "unknown command, try `help`")
}

/// Execute one command line against `sched`
pub fn execute<C: Clock + 'static, W: Write>(
    sched: &mut Scheduler<C>,
    line: &str,
    out: &mut W,
) -> fmt::Result {
    let (group, rest) = word(line);
    let (cmd, rest) = word(rest);
    match group {
        "" => Ok(()),
        "help" => out.write_str(HELP),
        "task" => task(sched, cmd, rest, out),
        "event" => event(sched, cmd, rest, out),
        "cortn" => cortn(sched, cmd, rest, out),
        "softint" => softint(sched, cmd, rest, out),
        "runlater" if cmd == "list" => runlater_list(sched, out),
        _ => usage(out),
    }
}

fn task<C: Clock + 'static, W: Write>(
    sched: &mut Scheduler<C>,
    cmd: &str,
    rest: &str,
    out: &mut W,
) -> fmt::Result {
    let (name, rest) = word(rest);
    if cmd == "list" {
        writeln!(out, "name             pri  freq(Hz)   on  runs  desync")?;
        let names: Vec<&'static str> = sched.task_names().collect();
        for info in names.iter().filter_map(|n| sched.task_info(n)) {
            writeln!(
                out,
                "{:<16} {:<4} {:<10.2} {:<3} {:<5} {}",
                info.name,
                info.priority,
                info.freq_hz,
                if info.enabled { "y" } else { "n" },
                info.stats.runs,
                info.stats.desyncs
            )?;
        }
        return Ok(());
    }
    if name.is_empty() {
        return usage(out);
    }

    let r = match cmd {
        "enable" => sched.task_set_enabled(name, true),
        "disable" => sched.task_set_enabled(name, false),
        "delete" => sched.task_delete(name),
        "exec" => sched.task_run_now(name),
        "setfreq" => match word(rest).0.parse::<f32>() {
            Ok(hz) => sched.task_set_freq(name, hz),
            Err(_) => return writeln!(out, "error: bad frequency"),
        },
        "setpri" => match word(rest).0.parse::<u8>() {
            Ok(pri) => sched.task_set_priority(name, pri),
            Err(_) => return writeln!(out, "error: bad priority"),
        },
        _ => return usage(out),
    };
    outcome(out, r)
}

fn event<C: Clock + 'static, W: Write>(
    sched: &mut Scheduler<C>,
    cmd: &str,
    rest: &str,
    out: &mut W,
) -> fmt::Result {
    let (name, content) = word(rest);
    if cmd == "list" {
        writeln!(out, "name             on  pending  triggers  runs")?;
        for info in sched.event_list() {
            writeln!(
                out,
                "{:<16} {:<3} {:<8} {:<9} {}",
                info.name,
                if info.enabled { "y" } else { "n" },
                if info.pending { "y" } else { "n" },
                info.stats.triggers,
                info.stats.runs
            )?;
        }
        return Ok(());
    }
    if name.is_empty() {
        return usage(out);
    }

    let r = match cmd {
        "enable" => sched.event_set_enabled(name, true),
        "disable" => sched.event_set_enabled(name, false),
        "delete" => sched.event_delete(name),
        // the line buffer is transient, so the content is copied
        "trigger" if content.is_empty() => sched.event_trigger_none(name),
        "trigger" => sched.event_trigger_ex(name, content.as_bytes()),
        _ => return usage(out),
    };
    outcome(out, r)
}

fn cortn<C: Clock + 'static, W: Write>(
    sched: &mut Scheduler<C>,
    cmd: &str,
    rest: &str,
    out: &mut W,
) -> fmt::Result {
    let (name, _) = word(rest);
    if cmd == "list" {
        writeln!(out, "name             state     mode        depth  locals")?;
        for info in sched.cortn_list() {
            writeln!(
                out,
                "{:<16} {:<9} {:<11} {:<6} {}",
                info.name,
                info.state.as_str(),
                format!("{:?}", info.mode),
                info.depth,
                info.locals_bytes
            )?;
        }
        return Ok(());
    }
    if name.is_empty() {
        return usage(out);
    }

    let r = match cmd {
        "kill" => sched.cortn_delete(name),
        "enable" => sched.cortn_set_enabled(name, true, false),
        "disable" => sched.cortn_set_enabled(name, false, false),
        _ => return usage(out),
    };
    outcome(out, r)
}

fn softint<C: Clock + 'static, W: Write>(
    sched: &Scheduler<C>,
    main: &str,
    rest: &str,
    out: &mut W,
) -> fmt::Result {
    let (Ok(main), Ok(sub)) = (main.parse::<u8>(), word(rest).0.parse::<u8>()) else {
        return writeln!(out, "usage: softint <channel> <sub-channel>");
    };
    if sched.soft_int_trigger(main, sub) {
        writeln!(out, "ok")
    } else {
        writeln!(out, "error: channel out of range")
    }
}

fn runlater_list<C: Clock + 'static, W: Write>(sched: &Scheduler<C>, out: &mut W) -> fmt::Result {
    let now = sched.now_us();
    writeln!(out, "func                due(us)     slots")?;
    for d in sched.run_later_pending() {
        writeln!(
            out,
            "{:<19p} {:<11} {}",
            d.func,
            d.run_at_us.saturating_sub(now),
            d.slots
        )?;
    }
    Ok(())
}
