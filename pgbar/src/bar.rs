use std::os::unix::io::{AsRawFd, RawFd};
use std::process::Command;

use crossbeam_channel::Sender;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{
    ButtonPressEvent, ColormapAlloc, ConnectionExt, CreateWindowAux, Cursor, EventMask,
    MotionNotifyEvent, Screen, Window, WindowClass,
};
use x11rb::protocol::Event as XEvent;
use x11rb::rust_connection::RustConnection;

use pgbar_core::actions::NO_ACTION;
use pgbar_core::config::{BarSettings, Config, Position, TrayPosition};
use pgbar_core::error::Error as CoreError;
use pgbar_core::event::{Event, EventTimer};
use pgbar_core::format::{Alignment, MouseButton};
use pgbar_core::geometry::BarGeometry;

use crate::error::{Error, Result};
use crate::eventloop::DispatchSink;
use crate::ipc::{BarCommand, Ipc, IpcMessage};
use crate::modules::{self, ModuleHost, ModuleLink};
use crate::render::font::FontSet;
use crate::render::{Edge, Renderer};
use crate::tray::TrayManager;
use crate::x11::call_wrapper::CallWrapper;
use crate::x11::visual::VisualInfo;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum CursorKind {
    Default,
    Click,
    Scroll,
}

/// Pointer shape hints over clickable and scrollable regions.
struct CursorHints {
    handle: Option<x11rb::cursor::Handle>,
    click_name: Option<String>,
    scroll_name: Option<String>,
    click: Option<Cursor>,
    scroll: Option<Cursor>,
    current: CursorKind,
}

/// Messages the loop needs to act on after an IPC pass.
#[derive(Debug, Default)]
pub(crate) struct IpcActivity {
    pub inputs: Vec<String>,
}

/// The top-level composition: owns the bar window, the renderer, the tray,
/// the IPC endpoint and the module hosts, and routes everything between
/// them.
pub(crate) struct Bar<'a> {
    connection: &'a RustConnection,
    call_wrapper: &'a CallWrapper<'a>,
    settings: BarSettings,
    geometry: BarGeometry,
    screen_num: usize,
    root_height: i32,
    window: Window,
    renderer: Option<Renderer<'a>>,
    tray: Option<TrayManager>,
    modules: Vec<ModuleHost>,
    ipc: Option<Ipc>,
    link: ModuleLink,
    click_timer: EventTimer,
    cursors: CursorHints,
    visible: bool,
    writeback: bool,
    last_contents: String,
}

impl<'a> Bar<'a> {
    pub(crate) fn new(
        connection: &'a RustConnection,
        call_wrapper: &'a CallWrapper<'a>,
        fonts: &'a FontSet,
        vis_info: &VisualInfo,
        screen: &Screen,
        screen_num: usize,
        config: &Config,
        settings: BarSettings,
        geometry: BarGeometry,
        ipc: Option<Ipc>,
        link: ModuleLink,
        monitor_name: &str,
        writeback: bool,
    ) -> Result<Self> {
        let mut bar = Self {
            connection,
            call_wrapper,
            screen_num,
            root_height: i32::from(screen.height_in_pixels),
            window: x11rb::NONE,
            renderer: None,
            tray: None,
            modules: Vec::new(),
            ipc,
            link,
            click_timer: EventTimer::new(settings.double_click_interval),
            cursors: CursorHints {
                handle: None,
                click_name: settings.cursor_click.clone(),
                scroll_name: settings.cursor_scroll.clone(),
                click: None,
                scroll: None,
                current: CursorKind::Default,
            },
            visible: true,
            writeback,
            last_contents: String::new(),
            geometry,
            settings,
        };
        bar.create_modules(config)?;
        if bar.modules.is_empty() {
            return Err(Error::NoModulesStarted);
        }
        if !writeback {
            bar.window = bar.create_window(vis_info, screen, monitor_name)?;
            bar.renderer = Some(Renderer::new(
                call_wrapper,
                fonts,
                vis_info,
                bar.window,
                &bar.geometry,
                &bar.settings,
            )?);
            if bar.settings.tray.position != TrayPosition::None {
                let mut tray = TrayManager::new(
                    call_wrapper,
                    screen,
                    screen_num,
                    bar.settings.tray,
                    bar.window,
                    bar.geometry,
                    bar.link.clone(),
                )?;
                tray.activate(call_wrapper)?;
                bar.tray = Some(tray);
            }
            call_wrapper.map_window(bar.window)?;
            call_wrapper.flush()?;
        }
        Ok(bar)
    }

    fn create_modules(&mut self, config: &Config) -> Result<()> {
        for align in Alignment::ALL {
            for name in &self.settings.modules[align.index()].clone() {
                match modules::create(config, name, align) {
                    Ok(host) => self.modules.push(host),
                    // An unknown format token is a config bug worth dying for
                    Err(e @ Error::Core(CoreError::UndefinedFormatTag { .. })) => return Err(e),
                    Err(e) => {
                        log::error!(target: "bar", "Disabling module \"{name}\" (reason: {e})");
                    }
                }
            }
        }
        Ok(())
    }

    fn create_window(
        &self,
        vis_info: &VisualInfo,
        screen: &Screen,
        monitor_name: &str,
    ) -> Result<Window> {
        let colormap = self.connection.generate_id()?;
        self.connection.create_colormap(
            ColormapAlloc::NONE,
            colormap,
            screen.root,
            vis_info.visual,
        )?;
        let window = self.connection.generate_id()?;
        let aux = CreateWindowAux::new()
            .background_pixel(self.settings.background.argb())
            .border_pixel(0)
            .colormap(colormap)
            .override_redirect(u32::from(self.settings.override_redirect))
            .event_mask(u32::from(
                EventMask::EXPOSURE
                    | EventMask::BUTTON_PRESS
                    | EventMask::POINTER_MOTION
                    | EventMask::STRUCTURE_NOTIFY,
            ));
        self.connection.create_window(
            vis_info.depth,
            window,
            screen.root,
            self.geometry.x as i16,
            self.geometry.y as i16,
            self.geometry.width as u16,
            self.geometry.height as u16,
            0,
            WindowClass::INPUT_OUTPUT,
            vis_info.visual,
            &aux,
        )?;
        let name = self.settings.window_name(monitor_name);
        self.call_wrapper
            .set_wm_properties(window, &name, &self.settings.name, &self.settings.wm_class)?;
        self.call_wrapper.set_dock_properties(window)?;
        if !self.settings.override_redirect {
            self.call_wrapper.set_struts(
                window,
                compute_struts(&self.geometry, self.settings.position, self.root_height),
            )?;
        }
        Ok(window)
    }

    pub(crate) fn start_modules(&mut self) -> Result<()> {
        let link = self.link.clone();
        let mut started = 0;
        for module in &mut self.modules {
            match module.start(&link) {
                Ok(()) => started += 1,
                Err(e) => {
                    log::error!(
                        target: "bar",
                        "Failed to start module/{} (reason: {e})",
                        module.name()
                    );
                }
            }
        }
        if started == 0 {
            return Err(Error::NoModulesStarted);
        }
        Ok(())
    }

    pub(crate) fn x_fd(&self) -> RawFd {
        self.connection.stream().as_raw_fd()
    }

    pub(crate) fn ipc_fds(&self) -> Vec<RawFd> {
        self.ipc.as_ref().map(Ipc::poll_fds).unwrap_or_default()
    }

    pub(crate) fn flush(&self) -> Result<()> {
        self.call_wrapper.flush()
    }

    pub(crate) fn socket_path(&self) -> Option<&std::path::Path> {
        self.ipc.as_ref().map(Ipc::socket)
    }

    /// Drain the X connection; returns input payloads to enqueue.
    pub(crate) fn poll_x(&mut self) -> Result<Vec<String>> {
        let mut inputs = Vec::new();
        while let Some(event) = self.connection.poll_for_event()? {
            if let Some(tray) = &mut self.tray {
                if tray.handle_event(self.call_wrapper, &event)? {
                    continue;
                }
            }
            match event {
                XEvent::ButtonPress(e) if e.event == self.window => {
                    self.on_button_press(&e, &mut inputs);
                }
                XEvent::MotionNotify(e) if e.event == self.window => {
                    self.on_motion(&e);
                }
                XEvent::Expose(e) if e.window == self.window && e.count == 0 => {
                    self.link.send(Event::Update { force: true });
                }
                _ => {}
            }
        }
        Ok(inputs)
    }

    /// Hit-test a press against the frame's action blocks, falling back to
    /// the configured per-button commands.
    fn on_button_press(&mut self, event: &ButtonPressEvent, inputs: &mut Vec<String>) {
        let Some(renderer) = &self.renderer else {
            return;
        };
        let Some(mut button) = MouseButton::from_x_detail(event.detail) else {
            return;
        };
        let x = i32::from(event.event_x);
        if renderer.actions().has_double_click()
            && matches!(
                button,
                MouseButton::Left | MouseButton::Middle | MouseButton::Right
            )
            && !self.click_timer.press(u64::from(event.time))
        {
            button = button.double();
        }
        for candidate in [button, undouble(button)] {
            let id = renderer.actions().action_at(candidate, x);
            if id != NO_ACTION {
                if let Some(block) = renderer.actions().get(id) {
                    inputs.push(block.cmd.clone());
                    return;
                }
            }
            if let Some(cmd) = &self.settings.fallback_click[candidate.code() as usize] {
                inputs.push(cmd.clone());
                return;
            }
            if candidate == undouble(button) {
                break;
            }
        }
        log::warn!(
            target: "bar",
            "Unhandled {button:?} press at x={x}, no action block or fallback"
        );
    }

    fn on_motion(&mut self, event: &MotionNotifyEvent) {
        if self.cursors.click_name.is_none() && self.cursors.scroll_name.is_none() {
            return;
        }
        let Some(renderer) = &self.renderer else {
            return;
        };
        let hits = renderer.actions().actions_at(i32::from(event.event_x));
        let mut kind = CursorKind::Default;
        for button in [
            MouseButton::Left,
            MouseButton::Middle,
            MouseButton::Right,
            MouseButton::DoubleLeft,
            MouseButton::DoubleMiddle,
            MouseButton::DoubleRight,
        ] {
            if hits[button.code() as usize] != NO_ACTION {
                kind = CursorKind::Click;
            }
        }
        for button in [MouseButton::ScrollUp, MouseButton::ScrollDown] {
            if kind == CursorKind::Default && hits[button.code() as usize] != NO_ACTION {
                kind = CursorKind::Scroll;
            }
        }
        if kind != self.cursors.current {
            self.cursors.current = kind;
            if let Err(e) = self.apply_cursor(kind) {
                log::debug!(target: "bar", "Failed to apply cursor hint: {e}");
            }
        }
    }

    fn apply_cursor(&mut self, kind: CursorKind) -> Result<()> {
        if self.cursors.handle.is_none() {
            let database = x11rb::resource_manager::Database::new_from_default(self.connection)?;
            self.cursors.handle = Some(
                x11rb::cursor::Handle::new(self.connection, self.screen_num, &database)?.reply()?,
            );
        }
        let handle = self.cursors.handle.as_ref().expect("cursor handle loaded");
        let cursor = match kind {
            CursorKind::Default => x11rb::NONE,
            CursorKind::Click => match (self.cursors.click, &self.cursors.click_name) {
                (Some(cursor), _) => cursor,
                (None, Some(name)) => {
                    let cursor = handle.load_cursor(self.connection, name)?;
                    self.cursors.click = Some(cursor);
                    cursor
                }
                (None, None) => x11rb::NONE,
            },
            CursorKind::Scroll => match (self.cursors.scroll, &self.cursors.scroll_name) {
                (Some(cursor), _) => cursor,
                (None, Some(name)) => {
                    let cursor = handle.load_cursor(self.connection, name)?;
                    self.cursors.scroll = Some(cursor);
                    cursor
                }
                (None, None) => x11rb::NONE,
            },
        };
        self.call_wrapper.set_cursor(self.window, cursor)
    }

    /// One IPC pass; `tx` receives loop-level events directly since this
    /// runs on the reader thread.
    pub(crate) fn process_ipc(&mut self, tx: &Sender<Event>) -> IpcActivity {
        let mut activity = IpcActivity::default();
        let messages = match &mut self.ipc {
            Some(ipc) => ipc.process(),
            None => return activity,
        };
        for message in messages {
            match message {
                IpcMessage::Command(BarCommand::Quit) => {
                    let _ = tx.send(Event::Quit { reload: false });
                }
                IpcMessage::Command(BarCommand::Restart) => {
                    let _ = tx.send(Event::Quit { reload: true });
                }
                IpcMessage::Command(BarCommand::Hide) => self.set_visible(false),
                IpcMessage::Command(BarCommand::Show) => self.set_visible(true),
                IpcMessage::Command(BarCommand::Toggle) => self.set_visible(!self.visible),
                IpcMessage::Hook { module, index } => self.deliver_hook(&module, index),
                IpcMessage::Action(payload) => activity.inputs.push(payload),
            }
        }
        activity
    }

    fn deliver_hook(&self, module: &str, index: usize) {
        match self.modules.iter().find(|m| m.name() == module) {
            Some(host) => {
                if !host.deliver_hook(index) {
                    log::warn!(target: "bar", "module/{module} does not accept hooks");
                }
            }
            None => log::warn!(target: "bar", "No module named '{module}' for hook"),
        }
    }

    pub(crate) fn set_visible(&mut self, visible: bool) {
        if self.visible == visible || self.writeback {
            return;
        }
        self.visible = visible;
        let result = if visible {
            self.call_wrapper.map_window(self.window).map(|_| ())
        } else {
            self.call_wrapper.unmap_window(self.window).map(|_| ())
        };
        if let Err(e) = result {
            log::error!(target: "bar", "Failed to toggle bar visibility: {e}");
        }
        if let Some(tray) = &mut self.tray {
            tray.bar_visibility_change(self.call_wrapper, visible);
        }
        if visible {
            self.link.send(Event::Update { force: true });
        }
    }

    /// Concatenate per-alignment module outputs into one tag string, with
    /// style resets on every module boundary.
    fn build_contents(&self) -> String {
        let mut out = String::new();
        let margin_left = " ".repeat(self.settings.module_margin.left);
        let margin_right = " ".repeat(self.settings.module_margin.right);
        for align in Alignment::ALL {
            let mut block = String::new();
            for host in self
                .modules
                .iter()
                .filter(|m| m.alignment() == align && m.running())
            {
                let contents = host.contents();
                if contents.is_empty() {
                    continue;
                }
                if !block.is_empty() {
                    block.push_str(&margin_right);
                    block.push_str(&self.settings.separator);
                    block.push_str(&margin_left);
                }
                block.push_str(&contents);
                block.push_str("%{P:R}");
            }
            if block.is_empty() {
                continue;
            }
            match align {
                Alignment::Left => {
                    out.push_str("%{l}");
                    out.push_str(&" ".repeat(self.settings.padding.left));
                }
                Alignment::Center => out.push_str("%{c}"),
                Alignment::Right => {
                    out.push_str("%{r}");
                    block.push_str(&" ".repeat(self.settings.padding.right));
                }
            }
            out.push_str(&block);
        }
        out
    }

    /// Stop every module within its budget, unwind the tray and remove the
    /// IPC socket. Reverse order of construction.
    pub(crate) fn teardown(&mut self) {
        log::info!(target: "bar", "Shutting down");
        for module in &mut self.modules {
            module.stop();
        }
        if let Some(tray) = &mut self.tray {
            let _ = tray.deactivate(self.call_wrapper);
        }
        if let Some(ipc) = &mut self.ipc {
            ipc.cleanup();
        }
        if self.window != x11rb::NONE {
            let _ = self.call_wrapper.destroy_window(self.window);
        }
        let _ = self.call_wrapper.flush();
    }
}

impl DispatchSink for Bar<'_> {
    /// Compose and draw one frame. Without `force`, unchanged contents do
    /// not re-render.
    fn update(&mut self, force: bool) -> Result<()> {
        if let Some(tray) = &mut self.tray {
            tray.tick(self.call_wrapper)?;
        }
        let contents = self.build_contents();
        if !force && contents == self.last_contents {
            return Ok(());
        }
        if self.writeback {
            println!("{contents}");
            self.last_contents = contents;
            return Ok(());
        }
        if !self.visible {
            self.last_contents = contents;
            return Ok(());
        }
        let renderer = self.renderer.as_mut().expect("renderer exists when drawing");
        let tray_width = self.tray.as_ref().map_or(0, TrayManager::width);
        renderer.set_tray_width(tray_width);
        match self.tray.as_ref().map(TrayManager::position) {
            Some(TrayPosition::Left) => renderer.reserve(Edge::Left, tray_width),
            Some(TrayPosition::Right) => renderer.reserve(Edge::Right, tray_width),
            _ => {}
        }
        let report = renderer.render(&contents)?;
        if let Some(tray) = &mut self.tray {
            tray.set_module_anchor(self.call_wrapper, report.tray_anchor);
        }
        self.call_wrapper.flush()?;
        self.last_contents = contents;
        Ok(())
    }

    /// Offer the payload to the modules; what nobody consumes goes to the
    /// shell.
    fn input(&mut self, data: String) -> Result<()> {
        for module in &self.modules {
            if module.input(&data) {
                self.link.send(Event::Update { force: true });
                return Ok(());
            }
        }
        log::info!(
            target: "bar",
            "Uncaught input event, forwarding to shell... (input: {data})"
        );
        match Command::new("sh").arg("-c").arg(&data).spawn() {
            Ok(mut child) => {
                std::thread::spawn(move || {
                    let _ = child.wait();
                });
                self.link.send(Event::Update { force: true });
            }
            Err(e) => log::error!(target: "bar", "Failed to run '{data}': {e}"),
        }
        Ok(())
    }

    fn check(&mut self) -> bool {
        self.modules.iter().any(ModuleHost::running)
    }
}

const fn undouble(button: MouseButton) -> MouseButton {
    match button {
        MouseButton::DoubleLeft => MouseButton::Left,
        MouseButton::DoubleMiddle => MouseButton::Middle,
        MouseButton::DoubleRight => MouseButton::Right,
        other => other,
    }
}

/// The EWMH strut layout: (left, right, top, bottom, then per-edge start
/// and end offsets).
pub(crate) fn compute_struts(
    geometry: &BarGeometry,
    position: Position,
    root_height: i32,
) -> [u32; 12] {
    let mut strut = [0_u32; 12];
    let start_x = geometry.x.max(0) as u32;
    let end_x = (geometry.x + geometry.width - 1).max(0) as u32;
    match position {
        Position::Top => {
            strut[2] = (geometry.y + geometry.height).max(0) as u32;
            strut[8] = start_x;
            strut[9] = end_x;
        }
        Position::Bottom => {
            strut[3] = (root_height - geometry.y).max(0) as u32;
            strut[10] = start_x;
            strut[11] = end_x;
        }
    }
    strut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_bar_struts() {
        let geometry = BarGeometry {
            x: 10,
            y: 0,
            width: 1900,
            height: 24,
            center_x: 950,
            center_y: 12,
        };
        let strut = compute_struts(&geometry, Position::Top, 1080);
        assert_eq!(strut[2], 24);
        assert_eq!(strut[8], 10);
        assert_eq!(strut[9], 10 + 1900 - 1);
        assert_eq!(strut[3], 0);
    }

    #[test]
    fn bottom_bar_struts() {
        let geometry = BarGeometry {
            x: 0,
            y: 1056,
            width: 1920,
            height: 24,
            center_x: 960,
            center_y: 12,
        };
        let strut = compute_struts(&geometry, Position::Bottom, 1080);
        assert_eq!(strut[3], 24);
        assert_eq!(strut[10], 0);
        assert_eq!(strut[11], 1919);
        assert_eq!(strut[2], 0);
    }

    #[test]
    fn double_buttons_fall_back_to_single() {
        assert_eq!(undouble(MouseButton::DoubleLeft), MouseButton::Left);
        assert_eq!(undouble(MouseButton::ScrollUp), MouseButton::ScrollUp);
    }
}
