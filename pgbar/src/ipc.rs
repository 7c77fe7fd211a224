use std::io::Read;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;

use crate::error::Result;

/// A decoded IPC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum IpcMessage {
    Command(BarCommand),
    Hook { module: String, index: usize },
    Action(String),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum BarCommand {
    Quit,
    Restart,
    Hide,
    Show,
    Toggle,
}

/// Parse one newline-delimited message. Unknown messages warn and drop.
pub(crate) fn decode(line: &str) -> Option<IpcMessage> {
    let line = line.trim_end();
    if line.is_empty() {
        return None;
    }
    if let Some(name) = line.strip_prefix("cmd:") {
        let command = match name {
            "quit" => BarCommand::Quit,
            "restart" => BarCommand::Restart,
            "hide" => BarCommand::Hide,
            "show" => BarCommand::Show,
            "toggle" => BarCommand::Toggle,
            other => {
                log::warn!(target: "ipc", "'{other}' is not a valid ipc command");
                return None;
            }
        };
        Some(IpcMessage::Command(command))
    } else if let Some(rest) = line.strip_prefix("hook:") {
        let (module, index) = rest.rsplit_once(':')?;
        match index.parse() {
            Ok(index) => Some(IpcMessage::Hook {
                module: module.to_owned(),
                index,
            }),
            Err(_) => {
                log::warn!(target: "ipc", "Bad hook index in '{line}'");
                None
            }
        }
    } else if let Some(payload) = line.strip_prefix("action:") {
        Some(IpcMessage::Action(payload.to_owned()))
    } else {
        log::warn!(target: "ipc", "Received unknown ipc message: '{line}'");
        None
    }
}

struct IpcConnection {
    stream: UnixStream,
    buffer: String,
}

/// The IPC endpoint: a pid-stamped unix socket plus an optional legacy
/// FIFO. Connections are short-lived and closed on EOF; the daemon never
/// blocks on a peer.
pub(crate) struct Ipc {
    listener: UnixListener,
    socket_path: PathBuf,
    connections: Vec<IpcConnection>,
    fifo: Option<Fifo>,
}

struct Fifo {
    fd: RawFd,
    path: PathBuf,
    buffer: String,
    created: bool,
}

/// `$XDG_RUNTIME_DIR/pgbar` or `/tmp` as the socket directory.
pub(crate) fn socket_path(pid: u32) -> PathBuf {
    let dir = std::env::var("XDG_RUNTIME_DIR")
        .map(|dir| PathBuf::from(dir).join("pgbar"))
        .unwrap_or_else(|_| PathBuf::from("/tmp"));
    dir.join(format!("pgbar.{pid}.sock"))
}

impl Ipc {
    pub(crate) fn new(fifo_path: Option<&Path>) -> Result<Self> {
        let socket_path = socket_path(std::process::id());
        if let Some(dir) = socket_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        // A stale socket with our pid means a previous instance re-execed
        let _ = std::fs::remove_file(&socket_path);
        let listener = UnixListener::bind(&socket_path)?;
        listener.set_nonblocking(true)?;
        log::info!(
            target: "ipc",
            "Listening for ipc messages on {}",
            socket_path.display()
        );
        let fifo = match fifo_path {
            Some(path) => Some(Fifo::open(path)?),
            None => None,
        };
        Ok(Self {
            listener,
            socket_path,
            connections: Vec::new(),
            fifo,
        })
    }

    pub(crate) fn socket(&self) -> &Path {
        &self.socket_path
    }

    /// Every fd the reader loop should poll on our behalf.
    pub(crate) fn poll_fds(&self) -> Vec<RawFd> {
        let mut fds = vec![self.listener.as_raw_fd()];
        fds.extend(self.connections.iter().map(|c| c.stream.as_raw_fd()));
        if let Some(fifo) = &self.fifo {
            fds.push(fifo.fd);
        }
        fds
    }

    /// Accept pending peers and drain readable connections; returns all
    /// complete messages.
    pub(crate) fn process(&mut self) -> Vec<IpcMessage> {
        let mut messages = Vec::new();
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    if stream.set_nonblocking(true).is_ok() {
                        self.connections.push(IpcConnection {
                            stream,
                            buffer: String::new(),
                        });
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!(target: "ipc", "accept failed: {e}");
                    break;
                }
            }
        }
        self.connections.retain_mut(|conn| {
            let mut chunk = [0_u8; 1024];
            loop {
                match conn.stream.read(&mut chunk) {
                    Ok(0) => {
                        drain_lines(&mut conn.buffer, true, &mut messages);
                        return false;
                    }
                    Ok(n) => {
                        conn.buffer.push_str(&String::from_utf8_lossy(&chunk[..n]));
                        drain_lines(&mut conn.buffer, false, &mut messages);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return true,
                    Err(e) => {
                        log::warn!(target: "ipc", "peer read failed: {e}");
                        return false;
                    }
                }
            }
        });
        if let Some(fifo) = &mut self.fifo {
            fifo.read_into(&mut messages);
        }
        messages
    }

    /// Remove filesystem artifacts; called on the terminate path only, a
    /// reload keeps the path (same pid after re-exec).
    pub(crate) fn cleanup(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
        if let Some(fifo) = &self.fifo {
            let _ = nix::unistd::close(fifo.fd);
            if fifo.created {
                let _ = std::fs::remove_file(&fifo.path);
            }
        }
        self.fifo = None;
    }
}

impl Fifo {
    fn open(path: &Path) -> Result<Self> {
        let created = if path.exists() {
            false
        } else {
            nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o666))?;
            true
        };
        let fd = open(path, OFlag::O_RDONLY | OFlag::O_NONBLOCK, Mode::empty())?;
        log::info!(target: "ipc", "Listening for ipc messages on {}", path.display());
        Ok(Self {
            fd,
            path: path.to_owned(),
            buffer: String::new(),
            created,
        })
    }

    fn read_into(&mut self, messages: &mut Vec<IpcMessage>) {
        let mut chunk = [0_u8; 1024];
        loop {
            match nix::unistd::read(self.fd, &mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    self.buffer.push_str(&String::from_utf8_lossy(&chunk[..n]));
                    drain_lines(&mut self.buffer, false, messages);
                }
                Err(nix::Error::EAGAIN) => break,
                Err(e) => {
                    log::warn!(target: "ipc", "fifo read failed: {e}");
                    break;
                }
            }
        }
    }
}

fn drain_lines(buffer: &mut String, eof: bool, messages: &mut Vec<IpcMessage>) {
    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        if let Some(message) = decode(&line) {
            messages.push(message);
        }
    }
    if eof && !buffer.is_empty() {
        if let Some(message) = decode(buffer) {
            messages.push(message);
        }
        buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn decodes_the_message_surface() {
        assert_eq!(
            decode("cmd:quit"),
            Some(IpcMessage::Command(BarCommand::Quit))
        );
        assert_eq!(
            decode("cmd:toggle"),
            Some(IpcMessage::Command(BarCommand::Toggle))
        );
        assert_eq!(
            decode("hook:mymod:2"),
            Some(IpcMessage::Hook {
                module: "mymod".into(),
                index: 2
            })
        );
        assert_eq!(
            decode("action:#date.toggle"),
            Some(IpcMessage::Action("#date.toggle".into()))
        );
        assert_eq!(decode("cmd:dance"), None);
        assert_eq!(decode("gibberish"), None);
        assert_eq!(decode(""), None);
    }

    #[test]
    fn socket_path_is_pid_stamped() {
        let path = socket_path(4242);
        assert!(path.to_string_lossy().ends_with("pgbar.4242.sock"));
    }

    #[test]
    fn accepts_concurrent_short_connections() {
        // Unique pid-stamped path makes this test isolated
        let mut ipc = Ipc::new(None).unwrap();
        let mut a = UnixStream::connect(ipc.socket()).unwrap();
        let mut b = UnixStream::connect(ipc.socket()).unwrap();
        a.write_all(b"cmd:hide\n").unwrap();
        b.write_all(b"action:doit\n").unwrap();
        drop(a);
        drop(b);
        // Give the kernel a moment to queue the data
        std::thread::sleep(std::time::Duration::from_millis(50));
        let messages = ipc.process();
        assert!(messages.contains(&IpcMessage::Command(BarCommand::Hide)));
        assert!(messages.contains(&IpcMessage::Action("doit".into())));
        ipc.cleanup();
    }
}
