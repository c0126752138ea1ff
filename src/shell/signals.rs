use log::warn;
use nix::sys::signal::{signal, SigHandler, Signal};

const INTERACTIVE: [Signal; 2] = [Signal::SIGINT, Signal::SIGQUIT];
/// The Rust runtime ignores SIGPIPE before `main`; children must not inherit that.
const CHILD_DEFAULTS: [Signal; 3] = [Signal::SIGINT, Signal::SIGQUIT, Signal::SIGPIPE];

fn set_all(signals: &[Signal], handler: SigHandler) {
    for &sig in signals {
        // SAFETY: SigIgn and SigDfl install no Rust handler code.
        if let Err(e) = unsafe { signal(sig, handler) } {
            warn!("cannot set disposition of {}: {}", sig, e);
        }
    }
}

/// Keeps Ctrl-C and Ctrl-\ from killing the interpreter itself.
pub fn ignore_interactive_signals() {
    set_all(&INTERACTIVE, SigHandler::SigIgn);
}

/// Ignored dispositions survive `exec`, so children put the defaults back.
pub fn restore_default_signals() {
    set_all(&CHILD_DEFAULTS, SigHandler::SigDfl);
}
