//! # MSP430 simulator
//!
//! A 16-bit MSP430 instruction-set simulator with a remote-debug TCP
//! front end.
//!
//! - [`msp430_core`] implements the CPU, bus, decoder, executor, and
//!   breakpoint-driven run loop.
//! - [`msp430_gdb`] implements the remote-debug wire protocol on top of
//!   it.
//!
//! This crate ties the two together into the surface [`apps/cli`][cli]
//! drives.
//!
//! [cli]: https://github.com/example/msp430-sim/tree/main/apps/cli

#![warn(clippy::pedantic)]

pub use msp430_core as core;
pub use msp430_gdb as gdb;

use std::path::Path;

use log::info;
use msp430_arch::Shared;
use thiserror::Error;

pub use msp430_core::Core;
pub use msp430_gdb::DebugServer;

/// An error raised while assembling a [`Simulator`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("could not read image file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse image {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: msp430_core::image::Error,
    },
}

/// A convenient type alias for [`Result`](std::result::Result).
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A simulator instance: a shared core, ready to be handed to a
/// [`DebugServer`] or driven directly.
pub struct Simulator {
    core: Shared<Core>,
}

impl Default for Simulator {
    fn default() -> Self {
        let mut core = Core::new();
        core.bus.attach_defaults();
        Self { core: Shared::new(core) }
    }
}

impl Simulator {
    /// Builds a simulator with no image loaded, a fresh register file,
    /// and the default RAM attached.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a memory image (Intel-HEX or TI-Text, chosen by `path`'s
    /// extension) onto the bus.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Read`] if the file can't be read, or
    /// [`Error::Parse`] if it isn't well-formed.
    pub fn load_image(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.display().to_string(),
            source,
        })?;
        let image = msp430_core::image::parse(path, &text).map_err(|source| Error::Parse {
            path: path.display().to_string(),
            source,
        })?;
        info!("loaded {} bytes from {}", image.len(), path.display());
        self.core.lock().expect("lock poisoned").load_image(image);
        Ok(())
    }

    /// A clone of the shared core handle, for a [`DebugServer`] (or any
    /// other front end) to drive.
    #[must_use]
    pub fn handle(&self) -> Shared<Core> {
        Shared::clone(&self.core)
    }
}
