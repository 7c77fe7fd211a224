use std::io;
use std::string::FromUtf8Error;

use x11rb::errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError};

pub(crate) type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub(crate) enum Error {
    #[error(transparent)]
    Core(#[from] pgbar_core::error::Error),
    #[error(transparent)]
    X11Connect(#[from] ConnectError),
    #[error(transparent)]
    X11Connection(#[from] ConnectionError),
    #[error(transparent)]
    X11Reply(#[from] ReplyError),
    #[error(transparent)]
    X11IdCreation(#[from] ReplyOrIdError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Nix(#[from] nix::Error),
    #[error(transparent)]
    ConvertToUtf8(#[from] FromUtf8Error),
    #[error("Monitor {0} not found")]
    MonitorNotFound(String),
    #[error("No 32-bit ARGB visual available on this screen")]
    NoArgbVisual,
    #[error("Failed to load font {path}: {reason}")]
    FontLoad { path: String, reason: String },
    #[error("No fonts could be loaded")]
    NoFontsLoaded,
    #[error("Unknown module type '{0}'")]
    UnknownModuleType(String),
    #[error("No modules started")]
    NoModulesStarted,
    #[error("Exit triggered")]
    GracefulShutdown,
    #[error("Reload triggered")]
    Reload,
}
