//! The `qRcmd` monitor sub-vocabulary: simulator-targeted commands
//! delivered through the remote-debug protocol rather than the guest.
//!
//! Grounded on `examples/original_source/gdbserver.py`'s `monitor_*`
//! methods; `eval` is commented out there as a security risk and is not
//! carried over.

use msp430_arch::Shared;
use msp430_core::Core;

/// One monitor command's name and one-line help text, in `help` order.
const COMMANDS: &[(&str, &str)] = &[
    ("help", "list monitor commands"),
    ("reset", "reset target"),
    ("puc", "reset target"),
    ("erase", "erase flash"),
    ("vcc", "set adapter VCC, ignored"),
];

/// Result of dispatching a monitor command.
pub enum Outcome {
    /// The command ran; console lines (if any) have already been emitted
    /// via the callback, and the caller should reply `OK`.
    Ok,
    /// No monitor command by that name exists; the caller should reply
    /// `E02`.
    Unknown,
}

/// Dispatches one monitor command, writing console output through
/// `console` (each call becomes one `O<hex>` packet).
pub fn dispatch(command: &str, core: &Shared<Core>, mut console: impl FnMut(&str)) -> Outcome {
    match command.to_ascii_lowercase().as_str() {
        "help" => {
            console("Supported commands are:\n");
            for (name, help) in COMMANDS {
                console(&format!("{name:<10}: {help}\n"));
            }
            Outcome::Ok
        }
        "reset" | "puc" => {
            core.lock().expect("lock poisoned").reset();
            Outcome::Ok
        }
        "erase" | "vcc" => Outcome::Ok,
        _ => Outcome::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_clears_register_state() {
        let core = Shared::new(Core::new());
        core.lock().unwrap().regs.set(5, 0xBEEF);
        let outcome = dispatch("reset", &core, |_| {});
        assert!(matches!(outcome, Outcome::Ok));
        assert_eq!(core.lock().unwrap().regs.get(5), 0);
    }

    #[test]
    fn help_emits_one_line_per_command() {
        let core = Shared::new(Core::new());
        let mut lines = Vec::new();
        dispatch("help", &core, |line| lines.push(line.to_string()));
        assert_eq!(lines.len(), 1 + COMMANDS.len());
    }

    #[test]
    fn unknown_command_is_reported() {
        let core = Shared::new(Core::new());
        let outcome = dispatch("eval", &core, |_| {});
        assert!(matches!(outcome, Outcome::Unknown));
    }
}
