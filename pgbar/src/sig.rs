//! Process signal flags and the loop wakeup pipe.
//!
//! The only process-wide mutable state in the daemon: the terminate/reload
//! flag pair and the write end of the wakeup pipe. The handler itself only
//! touches atomics and write(2).
#![allow(unsafe_code)]

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::Result;

static TERMINATE: AtomicBool = AtomicBool::new(false);
static RELOAD: AtomicBool = AtomicBool::new(false);
static WAKE_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn interrupt_handler(signum: i32) {
    match signum {
        x if x == Signal::SIGUSR1 as i32 => {
            RELOAD.store(true, Ordering::SeqCst);
            TERMINATE.store(true, Ordering::SeqCst);
        }
        x if x == Signal::SIGALRM as i32 => {
            // Reserved for self-wakeup, just interrupt the poll below
        }
        _ => TERMINATE.store(true, Ordering::SeqCst),
    }
    let fd = WAKE_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        let _ = nix::unistd::write(fd, b"\0");
    }
}

/// Install handlers for the lifecycle signals and block SIGPIPE.
pub(crate) fn install(wake_fd: RawFd) -> Result<()> {
    WAKE_FD.store(wake_fd, Ordering::SeqCst);
    let action = SigAction::new(
        SigHandler::Handler(interrupt_handler),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for signal in [
        Signal::SIGINT,
        Signal::SIGQUIT,
        Signal::SIGTERM,
        Signal::SIGUSR1,
        Signal::SIGALRM,
    ] {
        unsafe {
            sigaction(signal, &action)?;
        }
    }
    unsafe {
        sigaction(
            Signal::SIGPIPE,
            &SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty()),
        )?;
    }
    Ok(())
}

pub(crate) fn terminated() -> bool {
    TERMINATE.load(Ordering::SeqCst)
}

pub(crate) fn reload_requested() -> bool {
    RELOAD.load(Ordering::SeqCst)
}

/// Request shutdown from inside the process, as if a signal had arrived.
pub(crate) fn request(reload: bool) {
    if reload {
        RELOAD.store(true, Ordering::SeqCst);
    }
    TERMINATE.store(true, Ordering::SeqCst);
    let fd = WAKE_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        let _ = nix::unistd::write(fd, b"\0");
    }
}
