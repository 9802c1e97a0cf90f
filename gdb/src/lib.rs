//! Remote-debug TCP server for the MSP430 simulator.
//!
//! Speaks the textual `$payload#cc` wire protocol over a plain
//! `TcpListener`, translating packets into commands against a shared
//! [`msp430_core::Core`] and [`msp430_core::runloop::RunLoop`].

#![warn(clippy::pedantic)]

pub mod monitor;
pub mod proto;
mod server;

pub use server::DebugServer;
