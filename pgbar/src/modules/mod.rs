use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify};

use pgbar_core::config::Config;
use pgbar_core::event::Event;
use pgbar_core::format::builder::Builder;
use pgbar_core::format::Alignment;

use crate::error::{Error, Result};
use crate::modules::formatter::Formatter;

pub(crate) mod date;
pub(crate) mod formatter;
pub(crate) mod fsfile;
pub(crate) mod ipc_hooks;
pub(crate) mod script;
pub(crate) mod text;
pub(crate) mod tray_slot;

/// The module type tags accepted in `module/<name>` sections.
pub(crate) const TYPES: &[&str] = &[
    "custom/text",
    "custom/script",
    "custom/ipc",
    "internal/date",
    "internal/fs",
    "internal/tray",
];

/// How long a module worker gets to wind down before the host complains.
const STOP_BUDGET: Duration = Duration::from_millis(2000);

/// The update discipline a module runs under, selected at construction.
pub(crate) enum Discipline {
    /// Produce output once on start.
    Static,
    /// Re-run the producer every `interval`.
    Timer { interval: Duration },
    /// Run on external triggers delivered through the hook channel.
    Event { signals: Receiver<HookSignal> },
    /// Run whenever an inotify watch on one of `paths` fires.
    Inotify { paths: Vec<PathBuf> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HookSignal {
    Trigger(usize),
    Stop,
}

/// The behavior record a concrete module supplies to its host.
pub(crate) trait Producer: Send {
    /// One-time work before the first update, on the worker thread.
    fn warmup(&mut self) {}
    /// Refresh internal state; false suppresses the broadcast.
    fn update(&mut self) -> bool;
    /// Render one `<token>` of the active format into the builder.
    fn build(&self, builder: &mut Builder, token: &str) -> bool;
    /// Name of the currently active format.
    fn format(&self) -> &str {
        formatter::FORMAT_DEFAULT
    }
    /// Offer a click/IPC payload; true when consumed.
    fn input(&mut self, cmd: &str) -> bool {
        let _ = cmd;
        false
    }
    /// Run a numbered hook (custom/ipc); true if the output changed.
    fn hook(&mut self, index: usize) -> bool {
        let _ = index;
        false
    }
}

/// Handle module workers use to reach the event loop: enqueue, then wake
/// the reader out of poll(2).
#[derive(Clone)]
pub(crate) struct ModuleLink {
    tx: Sender<Event>,
    wake_fd: RawFd,
}

impl ModuleLink {
    pub(crate) fn new(tx: Sender<Event>, wake_fd: RawFd) -> Self {
        Self { tx, wake_fd }
    }

    pub(crate) fn send(&self, event: Event) {
        let _ = self.tx.send(event);
        let _ = nix::unistd::write(self.wake_fd, b"\0");
    }
}

enum StopSignal {
    None,
    Channel(Sender<()>),
    Pipe(RawFd),
    Hooks(Sender<HookSignal>),
}

/// Owns one module: its producer, formatter, worker thread, output string
/// and running state. The host is the only thing the rest of the daemon
/// talks to.
pub(crate) struct ModuleHost {
    name: String,
    alignment: Alignment,
    running: Arc<AtomicBool>,
    contents: Arc<Mutex<String>>,
    producer: Arc<Mutex<Box<dyn Producer>>>,
    formatter: Arc<Formatter>,
    discipline: Option<Discipline>,
    stop: StopSignal,
    worker: Option<JoinHandle<()>>,
    done_rx: Option<Receiver<()>>,
    hooks: Option<Sender<HookSignal>>,
}

/// What a module constructor hands back to the factory.
pub(crate) struct ModuleParts {
    pub producer: Box<dyn Producer>,
    pub formatter: Formatter,
    pub discipline: Discipline,
    pub hooks: Option<Sender<HookSignal>>,
}

/// Construct a module host from its config section.
pub(crate) fn create(cfg: &Config, name: &str, alignment: Alignment) -> Result<ModuleHost> {
    let section = format!("module/{name}");
    let module_type = cfg.get(&section, "type")?;
    let parts = match module_type.as_str() {
        "custom/text" => text::create(cfg, &section, name)?,
        "custom/script" => script::create(cfg, &section, name)?,
        "custom/ipc" => ipc_hooks::create(cfg, &section, name)?,
        "internal/date" => date::create(cfg, &section, name)?,
        "internal/fs" => fsfile::create(cfg, &section, name)?,
        "internal/tray" => tray_slot::create(cfg, &section, name)?,
        other => {
            log::info!(target: "module", "Known module types: {}", TYPES.join(", "));
            return Err(Error::UnknownModuleType(other.to_owned()));
        }
    };
    Ok(ModuleHost {
        name: name.to_owned(),
        alignment,
        running: Arc::new(AtomicBool::new(false)),
        contents: Arc::new(Mutex::new(String::new())),
        producer: Arc::new(Mutex::new(parts.producer)),
        formatter: Arc::new(parts.formatter),
        discipline: Some(parts.discipline),
        stop: StopSignal::None,
        worker: None,
        done_rx: None,
        hooks: parts.hooks,
    })
}

struct Worker {
    name: String,
    running: Arc<AtomicBool>,
    contents: Arc<Mutex<String>>,
    producer: Arc<Mutex<Box<dyn Producer>>>,
    formatter: Arc<Formatter>,
    link: ModuleLink,
    done_tx: Sender<()>,
}

impl Worker {
    /// Rebuild the output string and enqueue an UPDATE.
    fn publish(&self) {
        let output = {
            let producer = self.producer.lock().expect("module lock poisoned");
            self.formatter.expand(&**producer)
        };
        *self.contents.lock().expect("module lock poisoned") = output;
        self.link.send(Event::Update { force: false });
    }

    fn warmup_and_publish(&self) {
        let changed = {
            let mut producer = self.producer.lock().expect("module lock poisoned");
            producer.warmup();
            producer.update()
        };
        if changed {
            self.publish();
        }
    }

    /// Worker teardown: a module that stopped on its own gets a CHECK onto
    /// the queue so the loop can notice when nothing is left running.
    fn exit(self) {
        if self.running.swap(false, Ordering::SeqCst) {
            log::info!(target: "module", "module/{} stopped", self.name);
            self.link.send(Event::Check);
        }
        let _ = self.done_tx.send(());
    }
}

impl ModuleHost {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn alignment(&self) -> Alignment {
        self.alignment
    }

    pub(crate) fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot of the module's current markup.
    pub(crate) fn contents(&self) -> String {
        self.contents.lock().expect("module lock poisoned").clone()
    }

    /// Offer an input payload to the module.
    pub(crate) fn input(&self, cmd: &str) -> bool {
        self.producer
            .lock()
            .expect("module lock poisoned")
            .input(cmd)
    }

    /// Fire a numbered IPC hook, for `custom/ipc` modules.
    pub(crate) fn deliver_hook(&self, index: usize) -> bool {
        if let Some(hooks) = &self.hooks {
            let _ = hooks.send(HookSignal::Trigger(index));
            true
        } else {
            false
        }
    }

    /// Launch the worker for this module's discipline.
    pub(crate) fn start(&mut self, link: &ModuleLink) -> Result<()> {
        let discipline = self.discipline.take().expect("module started twice");
        self.running.store(true, Ordering::SeqCst);
        let (done_tx, done_rx) = bounded(1);
        self.done_rx = Some(done_rx);
        let worker = Worker {
            name: self.name.clone(),
            running: Arc::clone(&self.running),
            contents: Arc::clone(&self.contents),
            producer: Arc::clone(&self.producer),
            formatter: Arc::clone(&self.formatter),
            link: link.clone(),
            done_tx,
        };
        log::info!(target: "module", "Starting module/{}", self.name);
        let handle = match discipline {
            Discipline::Static => std::thread::spawn(move || {
                worker.warmup_and_publish();
                let _ = worker.done_tx.send(());
                // Static modules keep rendering their last output, the
                // running flag stays set
            }),
            Discipline::Timer { interval } => {
                let (stop_tx, stop_rx) = bounded::<()>(1);
                self.stop = StopSignal::Channel(stop_tx);
                std::thread::spawn(move || {
                    {
                        let mut producer = worker.producer.lock().expect("module lock poisoned");
                        producer.warmup();
                    }
                    loop {
                        let changed = {
                            let mut producer =
                                worker.producer.lock().expect("module lock poisoned");
                            producer.update()
                        };
                        if changed {
                            worker.publish();
                        }
                        match stop_rx.recv_timeout(interval) {
                            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                            _ => break,
                        }
                        if !worker.running.load(Ordering::SeqCst) {
                            break;
                        }
                    }
                    worker.exit();
                })
            }
            Discipline::Event { signals } => {
                if let Some(hooks) = self.hooks.clone() {
                    self.stop = StopSignal::Hooks(hooks);
                }
                std::thread::spawn(move || {
                    worker.warmup_and_publish();
                    while worker.running.load(Ordering::SeqCst) {
                        match signals.recv() {
                            Ok(HookSignal::Trigger(index)) => {
                                let changed = {
                                    let mut producer =
                                        worker.producer.lock().expect("module lock poisoned");
                                    producer.hook(index)
                                };
                                if changed {
                                    worker.publish();
                                }
                            }
                            Ok(HookSignal::Stop) | Err(_) => break,
                        }
                    }
                    worker.exit();
                })
            }
            Discipline::Inotify { paths } => {
                let (read_fd, write_fd) = nix::unistd::pipe()?;
                self.stop = StopSignal::Pipe(write_fd);
                std::thread::spawn(move || {
                    let inotify = match Inotify::init(InitFlags::empty()) {
                        Ok(inotify) => inotify,
                        Err(e) => {
                            log::error!(target: "module", "module/{}: inotify init failed: {e}", worker.name);
                            worker.exit();
                            return;
                        }
                    };
                    for path in &paths {
                        if let Err(e) = inotify.add_watch(
                            path,
                            AddWatchFlags::IN_MODIFY
                                | AddWatchFlags::IN_CLOSE_WRITE
                                | AddWatchFlags::IN_CREATE,
                        ) {
                            log::error!(
                                target: "module",
                                "module/{}: failed to watch {}: {e}",
                                worker.name,
                                path.display()
                            );
                            worker.exit();
                            return;
                        }
                    }
                    worker.warmup_and_publish();
                    loop {
                        use std::os::unix::io::AsRawFd;
                        let mut fds = [
                            PollFd::new(inotify.as_raw_fd(), PollFlags::POLLIN),
                            PollFd::new(read_fd, PollFlags::POLLIN),
                        ];
                        match poll(&mut fds, -1) {
                            Ok(_) => {}
                            Err(nix::Error::EINTR) => continue,
                            Err(e) => {
                                log::error!(target: "module", "module/{}: poll failed: {e}", worker.name);
                                break;
                            }
                        }
                        if fds[1]
                            .revents()
                            .unwrap_or_else(PollFlags::empty)
                            .contains(PollFlags::POLLIN)
                            || !worker.running.load(Ordering::SeqCst)
                        {
                            break;
                        }
                        if fds[0]
                            .revents()
                            .unwrap_or_else(PollFlags::empty)
                            .contains(PollFlags::POLLIN)
                        {
                            let _ = inotify.read_events();
                            let changed = {
                                let mut producer =
                                    worker.producer.lock().expect("module lock poisoned");
                                producer.update()
                            };
                            if changed {
                                worker.publish();
                            }
                        }
                    }
                    let _ = nix::unistd::close(read_fd);
                    worker.exit();
                })
            }
        };
        self.worker = Some(handle);
        Ok(())
    }

    /// Stop the worker: clear the flag, poke its wait primitive, then join
    /// within the stop budget.
    pub(crate) fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        match &self.stop {
            StopSignal::None => {}
            StopSignal::Channel(tx) => {
                let _ = tx.send(());
            }
            StopSignal::Pipe(fd) => {
                let _ = nix::unistd::write(*fd, b"\0");
            }
            StopSignal::Hooks(tx) => {
                let _ = tx.send(HookSignal::Stop);
            }
        }
        if let Some(done_rx) = self.done_rx.take() {
            if done_rx.recv_timeout(STOP_BUDGET).is_err() {
                log::warn!(
                    target: "module",
                    "module/{} exceeded its stop budget ({}ms)",
                    self.name,
                    STOP_BUDGET.as_millis()
                );
            }
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        if let StopSignal::Pipe(fd) = &self.stop {
            let _ = nix::unistd::close(*fd);
        }
        self.stop = StopSignal::None;
    }

    /// Channel pair for an Event discipline module.
    pub(crate) fn hook_channel() -> (Sender<HookSignal>, Receiver<HookSignal>) {
        unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_module_publishes_once() {
        let cfg = Config::from_str(
            "[bar/b]\nheight = 1\n[module/hello]\ntype = custom/text\ncontent = hi\n",
            "b",
        )
        .unwrap();
        let mut host = create(&cfg, "hello", Alignment::Left).unwrap();
        let (tx, rx) = unbounded();
        let (wake_r, wake_w) = nix::unistd::pipe().unwrap();
        let link = ModuleLink::new(tx, wake_w);
        host.start(&link).unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            Event::Update { force: false }
        );
        assert!(host.running());
        assert_eq!(host.contents(), "hi");
        host.stop();
        let _ = nix::unistd::close(wake_r);
        let _ = nix::unistd::close(wake_w);
    }

    #[test]
    fn unknown_module_type_is_rejected() {
        let cfg = Config::from_str(
            "[bar/b]\nheight = 1\n[module/x]\ntype = internal/warp\n",
            "b",
        )
        .unwrap();
        assert!(matches!(
            create(&cfg, "x", Alignment::Left),
            Err(Error::UnknownModuleType(_))
        ));
    }

    #[test]
    fn ipc_module_runs_hooks() {
        let cfg = Config::from_str(
            "[bar/b]\nheight = 1\n[module/remote]\ntype = custom/ipc\nhook-0 = echo one\nhook-1 = echo two\n",
            "b",
        )
        .unwrap();
        let mut host = create(&cfg, "remote", Alignment::Left).unwrap();
        let (tx, rx) = unbounded();
        let (wake_r, wake_w) = nix::unistd::pipe().unwrap();
        host.start(&ModuleLink::new(tx, wake_w)).unwrap();
        assert!(host.deliver_hook(1));
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Event::Update { force: false }
        );
        assert_eq!(host.contents(), "two");
        host.stop();
        assert!(!host.running());
        let _ = nix::unistd::close(wake_r);
        let _ = nix::unistd::close(wake_w);
    }

    #[test]
    fn module_types_table_is_closed() {
        for t in TYPES {
            assert!(t.starts_with("custom/") || t.starts_with("internal/"));
        }
    }
}
