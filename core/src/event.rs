//! Typed notifications pulled by interested observers.
//!
//! A typed [`Event`] enum plus an [`Observer`] trait the core calls into
//! explicitly; the core never reaches into a presentation layer itself.
//! The only active subscriber today is the debug server's `trap`/`int`/
//! `segv` signal dispatch (see `msp430-gdb`), but the type is public so a
//! future front end (memory/disassembly grids, register panes) can
//! subscribe too.

use crate::bus::Width;
use crate::runloop::StopReason;

/// A notification the core can emit.
#[derive(Clone, Debug)]
pub enum Event {
    /// A register's value changed.
    RegisterChanged { reg: usize },
    /// A memory location changed.
    MemoryChanged { addr: u16, width: Width },
    /// The run loop stopped, and why.
    Stopped { reason: StopReason },
}

/// Something that wants to be told about [`Event`]s.
pub trait Observer: Send {
    fn notify(&self, event: &Event);
}

impl<F: Fn(&Event) + Send> Observer for F {
    fn notify(&self, event: &Event) {
        self(event);
    }
}
