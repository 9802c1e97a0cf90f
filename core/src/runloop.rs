//! Breakpoint-driven execution.
//!
//! A [`RunLoop`] drives a [`Core`] either one instruction at a time
//! (`step`) or freely until something stops it (`run`): a breakpoint, an
//! asynchronous interrupt, or a fatal decode/execute fault. It does not own
//! a command queue itself (that belongs to `msp430-gdb`'s per-client
//! runner thread); it only owns the breakpoint set and the interrupt flag
//! the protocol thread signals through.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use log::{debug, info, warn};

use crate::event::{Event, Observer};
use crate::Core;

/// Why a `run` or `step` stopped.
#[derive(Clone, Debug)]
pub enum StopReason {
    /// A breakpoint was hit (or a `step` completed).
    Trap,
    /// An asynchronous interrupt was honoured.
    Interrupt,
    /// A fatal decode or execute error occurred.
    Fault(crate::error::Error),
}

/// After roughly this many steps without a time check, sample the clock
/// again.
const HEARTBEAT_STEPS: u32 = 1000;
/// Emit a heartbeat once this much wall-clock time has passed.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);

/// Drives a [`Core`] under breakpoint and interrupt control.
pub struct RunLoop {
    breakpoints: IndexMap<u16, ()>,
    interrupted: Arc<AtomicBool>,
    observer: Option<Box<dyn Observer>>,
}

impl std::fmt::Debug for RunLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLoop")
            .field("breakpoints", &self.breakpoints.len())
            .field("observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for RunLoop {
    fn default() -> Self {
        Self {
            breakpoints: IndexMap::new(),
            interrupted: Arc::new(AtomicBool::new(false)),
            observer: None,
        }
    }
}

impl RunLoop {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the interrupt flag, for a protocol thread to signal an
    /// asynchronous interrupt without going through the command queue.
    #[must_use]
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// Subscribes an [`Observer`] to this run loop's `Stopped` events.
    ///
    /// The core never calls into a presentation layer directly; this is the
    /// one typed seam a front end (the debug server's signal dispatch, or a
    /// future inspection UI) pulls `trap`/`int`/`segv` notifications through.
    pub fn set_observer(&mut self, observer: impl Observer + 'static) {
        self.observer = Some(Box::new(observer));
    }

    fn notify(&self, reason: &StopReason) {
        if let Some(observer) = &self.observer {
            observer.notify(&Event::Stopped { reason: reason.clone() });
        }
    }

    /// Sets a breakpoint. Idempotent.
    pub fn set_breakpoint(&mut self, addr: u16) {
        self.breakpoints.insert(addr, ());
    }

    /// Clears a breakpoint, returning whether it existed.
    pub fn clear_breakpoint(&mut self, addr: u16) -> bool {
        self.breakpoints.shift_remove(&addr).is_some()
    }

    /// Runs until a breakpoint, interrupt, or fatal fault.
    ///
    /// Illegal instructions are fatal under `run`. A bus anomaly (a width
    /// mismatch or unmapped access) is [`is_fatal`](crate::error::Error::is_fatal)'s
    /// other case: it's logged and stepped past rather than stopping the loop.
    pub fn run(&mut self, core: &mut Core) -> StopReason {
        info!(
            "continuing from {:#06x} (cycle {})",
            core.regs.pc(),
            core.cycles.0
        );
        let mut last_heartbeat = Instant::now();
        let mut steps = 0u32;
        loop {
            if self.interrupted.swap(false, Ordering::SeqCst) {
                info!(
                    "interrupted at {:#06x} (cycle {})",
                    core.regs.pc(),
                    core.cycles.0
                );
                let reason = StopReason::Interrupt;
                self.notify(&reason);
                return reason;
            }
            if let Err(err) = core.step(true) {
                if !err.is_fatal() {
                    debug!("non-fatal bus anomaly at {:#06x}: {err}", core.regs.pc());
                    steps += 1;
                    continue;
                }
                warn!("could not execute instruction: {err}");
                let reason = StopReason::Fault(err);
                self.notify(&reason);
                return reason;
            }
            if self.breakpoints.contains_key(&core.regs.pc()) {
                info!(
                    "breakpoint @{:#06x} (cycle {})",
                    core.regs.pc(),
                    core.cycles.0
                );
                let reason = StopReason::Trap;
                self.notify(&reason);
                return reason;
            }
            steps += 1;
            if steps > HEARTBEAT_STEPS {
                steps = 0;
                if last_heartbeat.elapsed() > HEARTBEAT_INTERVAL {
                    last_heartbeat = Instant::now();
                    debug!(
                        "still running @{:#06x} (cycle {})",
                        core.regs.pc(),
                        core.cycles.0
                    );
                }
            }
        }
    }

    /// Executes exactly one instruction.
    ///
    /// Illegal instructions are not fatal under `step`, so inspection can
    /// continue.
    pub fn step(&mut self, core: &mut Core) -> StopReason {
        info!(
            "single step @{:#06x} (cycle {})",
            core.regs.pc(),
            core.cycles.0
        );
        let reason = match core.step(false) {
            Ok(_) => StopReason::Trap,
            Err(err) => {
                warn!("step raised an error: {err}");
                StopReason::Fault(err)
            }
        };
        self.notify(&reason);
        reason
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mov_immediate_loop(pc: u16) -> Core {
        let mut core = Core::new();
        core.bus.attach_default_ram();
        // MOV #0x1234, R5; JMP $ (spin forever so `run` only stops via our
        // breakpoint/interrupt, not by running off the end of memory).
        core.bus.write_word_quiet(pc, 0x4035);
        core.bus.write_word_quiet(pc + 2, 0x1234);
        core.bus.write_word_quiet(pc + 4, 0x3FFF);
        core.regs.set_pc(pc);
        core
    }

    #[test]
    fn stops_on_breakpoint() {
        let mut core = mov_immediate_loop(0xF000);
        let mut runloop = RunLoop::new();
        runloop.set_breakpoint(0xF004);
        match runloop.run(&mut core) {
            StopReason::Trap => {}
            other => panic!("expected Trap, got {other:?}"),
        }
        assert_eq!(core.regs.pc(), 0xF004);
    }

    #[test]
    fn interrupt_stops_a_running_loop() {
        let mut core = mov_immediate_loop(0xF000);
        let mut runloop = RunLoop::new();
        let flag = runloop.interrupt_handle();
        flag.store(true, Ordering::SeqCst);
        match runloop.run(&mut core) {
            StopReason::Interrupt => {}
            other => panic!("expected Interrupt, got {other:?}"),
        }
    }

    #[test]
    fn step_executes_exactly_one_instruction() {
        let mut core = mov_immediate_loop(0xF000);
        let mut runloop = RunLoop::new();
        runloop.step(&mut core);
        assert_eq!(core.regs.pc(), 0xF004);
        assert_eq!(core.cycles.0, 2);
    }

    #[test]
    fn illegal_instruction_is_fatal_under_run_not_step() {
        let mut core = Core::new();
        core.bus.attach_default_ram();
        core.bus.write_word_quiet(0xF000, 0x1380); // reserved single-operand sub-opcode
        core.regs.set_pc(0xF000);
        let mut runloop = RunLoop::new();
        match runloop.run(&mut core) {
            StopReason::Fault(_) => {}
            other => panic!("expected Fault, got {other:?}"),
        }

        core.regs.set_pc(0xF000);
        match runloop.step(&mut core) {
            StopReason::Trap => {}
            other => panic!("expected Trap (non-fatal step), got {other:?}"),
        }
    }

    #[test]
    fn bus_anomaly_is_non_fatal_under_run() {
        let mut core = Core::new();
        core.bus.attach_default_multiplier();
        // MOV #9, &0x0131 -- a word write to an address inside the
        // multiplier's window that maps to none of its registers: a
        // non-fatal width-mismatch bus anomaly, not an illegal instruction.
        core.bus.write_word_quiet(0xF000, 0x40B2);
        core.bus.write_word_quiet(0xF002, 9);
        core.bus.write_word_quiet(0xF004, 0x0131);
        core.bus.write_word_quiet(0xF006, 0x3FFF); // JMP $
        core.regs.set_pc(0xF000);

        let mut runloop = RunLoop::new();
        runloop.set_breakpoint(0xF006);
        match runloop.run(&mut core) {
            StopReason::Trap => {}
            other => panic!("expected Trap (anomaly logged, not fatal), got {other:?}"),
        }
        assert_eq!(core.regs.pc(), 0xF006);
    }

    #[test]
    fn observer_is_notified_of_stop_events() {
        use std::sync::atomic::AtomicUsize;

        let mut core = mov_immediate_loop(0xF000);
        let mut runloop = RunLoop::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        runloop.set_observer(move |event: &Event| {
            let Event::Stopped { reason: StopReason::Trap } = event else {
                panic!("expected a Stopped{{Trap}} event, got {event:?}");
            };
            seen2.fetch_add(1, Ordering::SeqCst);
        });
        runloop.step(&mut core);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
