use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify};

use pgbar_core::config::BarSettings;
use pgbar_core::event::Event;

use crate::bar::Bar;
use crate::error::{Error, Result};
use crate::modules::ModuleLink;
use crate::sig;

/// Where dequeued events land. `Bar` implements this; tests substitute a
/// recorder.
pub(crate) trait DispatchSink {
    fn update(&mut self, force: bool) -> Result<()>;
    fn input(&mut self, data: String) -> Result<()>;
    /// True when at least one module is still running.
    fn check(&mut self) -> bool;
}

/// Watches the configuration file; a modify or replace triggers a reload.
struct ConfigWatch {
    inotify: Inotify,
    path: PathBuf,
}

impl ConfigWatch {
    const MASK: AddWatchFlags = AddWatchFlags::IN_MODIFY;

    fn new(path: &Path) -> Result<Self> {
        let inotify = Inotify::init(InitFlags::IN_NONBLOCK)?;
        inotify.add_watch(path, Self::MASK | AddWatchFlags::IN_IGNORED)?;
        Ok(Self {
            inotify,
            path: path.to_owned(),
        })
    }

    fn fd(&self) -> RawFd {
        use std::os::unix::io::AsRawFd;
        self.inotify.as_raw_fd()
    }

    /// Drain pending events; true when the file changed. An IN_IGNORED
    /// event means the file was replaced, so the watch is re-attached to
    /// the new inode before reporting the change.
    fn changed(&mut self) -> bool {
        let Ok(events) = self.inotify.read_events() else {
            return false;
        };
        let mut changed = false;
        for event in events {
            changed = true;
            if event.mask.contains(AddWatchFlags::IN_IGNORED) {
                if let Err(e) = self
                    .inotify
                    .add_watch(&self.path, Self::MASK | AddWatchFlags::IN_IGNORED)
                {
                    log::error!(
                        target: "eventloop",
                        "Failed to re-attach config watch to {}: {e}",
                        self.path.display()
                    );
                }
            }
        }
        changed
    }
}

/// The single-reader cooperative loop: poll(2) over the wakeup pipe, the X
/// connection, the IPC endpoints and the config watch, then drain the MPSC
/// queue with output coalescing.
pub(crate) struct EventLoop {
    rx: Receiver<Event>,
    tx: Sender<Event>,
    pending: Option<Event>,
    wake_read: RawFd,
    wake_write: RawFd,
    swallow_limit: usize,
    swallow_time: Duration,
    input_block: Duration,
    last_input: Option<Instant>,
    config_watch: Option<ConfigWatch>,
}

impl EventLoop {
    pub(crate) fn new(settings: &BarSettings, config_path: Option<&Path>) -> Result<Self> {
        let (tx, rx) = unbounded();
        let (wake_read, wake_write) = nix::unistd::pipe()?;
        for fd in [wake_read, wake_write] {
            fcntl(fd, FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;
        }
        let config_watch = match config_path {
            Some(path) => Some(ConfigWatch::new(path)?),
            None => None,
        };
        Ok(Self {
            rx,
            tx,
            pending: None,
            wake_read,
            wake_write,
            swallow_limit: settings.throttle_output.max(1),
            swallow_time: Duration::from_millis(settings.throttle_output_for),
            input_block: Duration::from_millis(settings.throttle_input_for),
            last_input: None,
            config_watch,
        })
    }

    pub(crate) fn wake_fd(&self) -> RawFd {
        self.wake_write
    }

    pub(crate) fn link(&self) -> ModuleLink {
        ModuleLink::new(self.tx.clone(), self.wake_write)
    }

    /// Enqueue an input payload, dropping it when it falls inside the
    /// input throttle window.
    pub(crate) fn enqueue_input(&mut self, data: String) {
        let now = Instant::now();
        if let Some(last) = self.last_input {
            if now.duration_since(last) < self.input_block {
                log::trace!(target: "eventloop", "Swallowing input event (throttled)");
                return;
            }
        }
        self.last_input = Some(now);
        let _ = self.tx.send(Event::Input { data });
    }

    /// Loop until shutdown. Termination always surfaces as
    /// `Error::GracefulShutdown` or `Error::Reload`; any other error is a
    /// real failure.
    pub(crate) fn run(&mut self, bar: &mut Bar) -> Result<()> {
        log::info!(target: "eventloop", "Entering event loop");
        bar.update(true)?;
        loop {
            bar.flush()?;
            if sig::terminated() {
                return Err(quit_error(sig::reload_requested()));
            }
            let mut fds = vec![
                PollFd::new(self.wake_read, PollFlags::POLLIN),
                PollFd::new(bar.x_fd(), PollFlags::POLLIN),
            ];
            if let Some(watch) = &self.config_watch {
                fds.push(PollFd::new(watch.fd(), PollFlags::POLLIN));
            }
            for fd in bar.ipc_fds() {
                fds.push(PollFd::new(fd, PollFlags::POLLIN));
            }
            match poll(&mut fds, -1) {
                Ok(_) => {}
                Err(nix::Error::EINTR) => {}
                Err(e) => return Err(e.into()),
            }
            if sig::terminated() {
                return Err(quit_error(sig::reload_requested()));
            }
            self.drain_wake_pipe();
            if let Some(watch) = &mut self.config_watch {
                if watch.changed() {
                    log::info!(target: "eventloop", "Configuration file changed, reloading");
                    return Err(Error::Reload);
                }
            }
            for input in bar.poll_x()? {
                self.enqueue_input(input);
            }
            let activity = bar.process_ipc(&self.tx);
            for input in activity.inputs {
                self.enqueue_input(input);
            }
            if let Some(reload) = self.dispatch(bar)? {
                return Err(quit_error(reload));
            }
        }
    }

    fn drain_wake_pipe(&self) {
        let mut buffer = [0_u8; 64];
        while matches!(nix::unistd::read(self.wake_read, &mut buffer), Ok(n) if n > 0) {}
    }

    /// Drain the queue. UPDATE and CHECK coalesce within the configured
    /// window; INPUT and QUIT short-circuit a batch and run next; a forced
    /// UPDATE bypasses the coalescer. Returns the reload flag when a QUIT
    /// was processed.
    pub(crate) fn dispatch(&mut self, sink: &mut impl DispatchSink) -> Result<Option<bool>> {
        loop {
            let event = match self.pending.take() {
                Some(event) => event,
                None => match self.rx.try_recv() {
                    Ok(event) => event,
                    Err(_) => return Ok(None),
                },
            };
            match event {
                Event::Input { data } => sink.input(data)?,
                Event::Quit { reload } => return Ok(Some(self.collapse_quit(reload))),
                Event::Update { force: true } => sink.update(true)?,
                first => {
                    let batched = self.coalesce(first);
                    match batched {
                        Event::Update { force } => sink.update(force)?,
                        Event::Input { data } => sink.input(data)?,
                        Event::Quit { reload } => {
                            return Ok(Some(self.collapse_quit(reload)));
                        }
                        Event::Check => {
                            if !sink.check() {
                                log::warn!(target: "eventloop", "No running modules...");
                                return Ok(Some(false));
                            }
                        }
                    }
                }
            }
        }
    }

    /// Swallow up to `throttle-output` compatible events within the
    /// `throttle-output-for` window.
    fn coalesce(&mut self, mut event: Event) -> Event {
        let mut swallowed = 1;
        while swallowed < self.swallow_limit {
            match self.rx.recv_timeout(self.swallow_time) {
                Ok(next @ (Event::Quit { .. } | Event::Input { .. })) => {
                    self.pending = Some(next);
                    break;
                }
                Ok(next) => {
                    if event.coalesces_with(&next) {
                        log::trace!(target: "eventloop", "Swallowing event within timeframe");
                        event = next;
                        swallowed += 1;
                    } else {
                        self.pending = Some(next);
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
            }
        }
        event
    }

    /// Multiple queued QUITs collapse into one; reload wins.
    fn collapse_quit(&mut self, mut reload: bool) -> bool {
        while let Ok(event) = self.rx.try_recv() {
            if let Event::Quit { reload: r } = event {
                reload |= r;
            }
        }
        reload
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        let _ = nix::unistd::close(self.wake_read);
        let _ = nix::unistd::close(self.wake_write);
    }
}

fn quit_error(reload: bool) -> Error {
    if reload {
        Error::Reload
    } else {
        Error::GracefulShutdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Recorder {
        dispatched: Vec<String>,
        running: bool,
    }

    impl DispatchSink for Recorder {
        fn update(&mut self, force: bool) -> Result<()> {
            self.dispatched.push(format!("update:{force}"));
            Ok(())
        }

        fn input(&mut self, data: String) -> Result<()> {
            self.dispatched.push(format!("input:{data}"));
            Ok(())
        }

        fn check(&mut self) -> bool {
            self.dispatched.push("check".to_owned());
            self.running
        }
    }

    fn event_loop(limit: usize, window_ms: u64) -> EventLoop {
        let mut settings = BarSettings::default();
        settings.throttle_output = limit;
        settings.throttle_output_for = window_ms;
        settings.throttle_input_for = 0;
        EventLoop::new(&settings, None).unwrap()
    }

    #[test]
    fn burst_of_updates_coalesces_to_one_render() {
        // E3: 10 updates within the window, throttle-output = 5
        let mut el = event_loop(5, 50);
        for _ in 0..10 {
            el.tx.send(Event::Update { force: false }).unwrap();
        }
        let mut sink = Recorder::default();
        el.dispatch(&mut sink).unwrap();
        assert_eq!(sink.dispatched, vec!["update:false", "update:false"]);
    }

    #[test]
    fn few_updates_coalesce_fully() {
        let mut el = event_loop(5, 50);
        for _ in 0..4 {
            el.tx.send(Event::Update { force: false }).unwrap();
        }
        let mut sink = Recorder::default();
        el.dispatch(&mut sink).unwrap();
        assert_eq!(sink.dispatched, vec!["update:false"]);
    }

    #[test]
    fn input_short_circuits_a_batch() {
        // E3: updates, one input, updates -> [render, input, render]
        let mut el = event_loop(5, 50);
        for _ in 0..3 {
            el.tx.send(Event::Update { force: false }).unwrap();
        }
        el.tx
            .send(Event::Input {
                data: "click".to_owned(),
            })
            .unwrap();
        for _ in 0..3 {
            el.tx.send(Event::Update { force: false }).unwrap();
        }
        let mut sink = Recorder::default();
        el.dispatch(&mut sink).unwrap();
        assert_eq!(
            sink.dispatched,
            vec!["update:false", "input:click", "update:false"]
        );
    }

    #[test]
    fn forced_update_bypasses_the_coalescer() {
        let mut el = event_loop(5, 50);
        el.tx.send(Event::Update { force: true }).unwrap();
        el.tx.send(Event::Update { force: false }).unwrap();
        let mut sink = Recorder::default();
        el.dispatch(&mut sink).unwrap();
        assert_eq!(sink.dispatched, vec!["update:true", "update:false"]);
    }

    #[test]
    fn reload_quit_wins_over_terminate() {
        let mut el = event_loop(5, 10);
        el.tx.send(Event::Quit { reload: false }).unwrap();
        el.tx.send(Event::Quit { reload: true }).unwrap();
        let mut sink = Recorder::default();
        assert_eq!(el.dispatch(&mut sink).unwrap(), Some(true));
    }

    #[test]
    fn check_with_no_running_modules_stops_the_loop() {
        let mut el = event_loop(5, 10);
        el.tx.send(Event::Check).unwrap();
        let mut sink = Recorder {
            running: false,
            ..Recorder::default()
        };
        assert_eq!(el.dispatch(&mut sink).unwrap(), Some(false));
        assert_eq!(sink.dispatched, vec!["check"]);
    }

    #[test]
    fn checks_coalesce_like_updates() {
        let mut el = event_loop(5, 10);
        el.tx.send(Event::Check).unwrap();
        el.tx.send(Event::Check).unwrap();
        let mut sink = Recorder {
            running: true,
            ..Recorder::default()
        };
        el.dispatch(&mut sink).unwrap();
        assert_eq!(sink.dispatched, vec!["check"]);
    }

    #[test]
    fn input_throttle_drops_fast_repeats() {
        let mut settings = BarSettings::default();
        settings.throttle_input_for = 10_000;
        let mut el = EventLoop::new(&settings, None).unwrap();
        el.enqueue_input("one".to_owned());
        el.enqueue_input("two".to_owned());
        let mut sink = Recorder::default();
        el.dispatch(&mut sink).unwrap();
        assert_eq!(sink.dispatched, vec!["input:one"]);
    }
}
