use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use x11rb::connection::Connection;
use x11rb::protocol::xproto::{
    Atom, ConnectionExt, CreateWindowAux, EventMask, Screen, Window, WindowClass,
};
use x11rb::protocol::Event as XEvent;
use x11rb::COPY_DEPTH_FROM_PARENT;

use pgbar_core::config::{TrayPosition, TraySettings};
use pgbar_core::event::Event;
use pgbar_core::geometry::BarGeometry;

use crate::error::Result;
use crate::modules::ModuleLink;
use crate::x11::call_wrapper::{
    is_window_error, CallWrapper, XembedInfo, _NET_SYSTEM_TRAY_COLORS, _NET_SYSTEM_TRAY_OPCODE,
    _NET_SYSTEM_TRAY_ORIENTATION, _NET_SYSTEM_TRAY_VISUAL, _XEMBED_INFO, XEMBED_MAPPED,
    XEMBED_VERSION,
};

const SYSTEM_TRAY_REQUEST_DOCK: u32 = 0;

/// Selection ownership state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum TrayState {
    Inactive,
    /// Another manager owns the selection; waiting for it to go away.
    WaitingForOwner(Window),
    Active,
}

/// One embedded icon window.
#[derive(Debug, Clone)]
pub(crate) struct TrayClient {
    pub window: Window,
    pub xembed: Option<XembedInfo>,
    pub mapped: bool,
}

impl TrayClient {
    /// Whether the embedder should map this client.
    fn should_map(&self) -> bool {
        match &self.xembed {
            Some(info) => info.flags & XEMBED_MAPPED == XEMBED_MAPPED,
            // Non-XEMBED clients are embedded and mapped anyway
            None => true,
        }
    }
}

/// Container width for `n` mapped clients.
pub(crate) fn layout_width(n: usize, client_size: u16, spacing: u16) -> i32 {
    i32::from(spacing) + n as i32 * i32::from(client_size + spacing)
}

/// X position of mapped client `i` within the container.
pub(crate) fn client_x(i: usize, client_size: u16, spacing: u16) -> i32 {
    i32::from(spacing) + i as i32 * i32::from(client_size + spacing)
}

/// The XEMBED system tray manager: owns the per-screen tray selection, the
/// container window and the embedded client list.
pub(crate) struct TrayManager {
    settings: TraySettings,
    selection: Atom,
    screen_root: Window,
    root_visual: u32,
    bar_window: Window,
    geometry: BarGeometry,
    state: TrayState,
    window: Window,
    clients: Vec<TrayClient>,
    /// A manager we are replacing; its clients need time to unembed.
    previous_owner: Option<Window>,
    hidden: bool,
    mapped: bool,
    /// Bar-relative anchor for `tray-position = module`.
    module_anchor: Option<i32>,
    /// Set by the delayed-broadcast thread; drained on the loop thread.
    notify_due: Arc<AtomicBool>,
    link: ModuleLink,
}

impl TrayManager {
    pub(crate) fn new(
        call_wrapper: &CallWrapper,
        screen: &Screen,
        screen_num: usize,
        settings: TraySettings,
        bar_window: Window,
        geometry: BarGeometry,
        link: ModuleLink,
    ) -> Result<Self> {
        let selection = call_wrapper.intern(&format!("_NET_SYSTEM_TRAY_S{screen_num}"))?;
        Ok(Self {
            settings,
            selection,
            screen_root: screen.root,
            root_visual: screen.root_visual,
            bar_window,
            geometry,
            state: TrayState::Inactive,
            window: x11rb::NONE,
            clients: Vec::new(),
            previous_owner: None,
            hidden: false,
            mapped: false,
            module_anchor: None,
            notify_due: Arc::new(AtomicBool::new(false)),
            link,
        })
    }

    /// Reserved width for the current client set, zero when inactive.
    pub(crate) fn width(&self) -> i32 {
        let mapped = self.mapped_clients();
        if self.state != TrayState::Active || mapped == 0 {
            0
        } else {
            layout_width(mapped, self.settings.client_size, self.settings.spacing)
        }
    }

    pub(crate) fn position(&self) -> TrayPosition {
        self.settings.position
    }

    fn mapped_clients(&self) -> usize {
        self.clients.iter().filter(|c| c.mapped).count()
    }

    /// Become the tray: create the container, acquire the selection and
    /// notify waiting clients. When a previous manager is being replaced
    /// the MANAGER broadcast is deferred so its clients can unembed first.
    pub(crate) fn activate(&mut self, call_wrapper: &CallWrapper) -> Result<()> {
        if self.state == TrayState::Active {
            return Ok(());
        }
        log::info!(target: "tray", "Activating tray manager");
        if self.window == x11rb::NONE {
            self.create_window(call_wrapper)?;
        }
        let owner = call_wrapper.get_selection_owner(self.selection)?;
        if owner != x11rb::NONE && owner != self.window {
            log::info!(
                target: "tray",
                "Tray selection owned by {owner}, waiting for it to go away"
            );
            self.previous_owner = Some(owner);
            // Losing the owner's destroy_notify would strand us, so watch it
            if let Err(e) = call_wrapper.set_client_event_mask(owner, EventMask::STRUCTURE_NOTIFY) {
                if !is_window_error(&e) {
                    return Err(e);
                }
            } else {
                self.state = TrayState::WaitingForOwner(owner);
                return Ok(());
            }
        }
        call_wrapper.set_selection_owner(self.window, self.selection)?;
        if call_wrapper.get_selection_owner(self.selection)? != self.window {
            log::error!(target: "tray", "Failed to take the tray selection, deactivating");
            return Ok(());
        }
        self.state = TrayState::Active;
        if self.previous_owner.take().is_some() {
            self.defer_manager_broadcast();
        } else {
            log::debug!(target: "tray", "Broadcasting MANAGER message");
            call_wrapper.broadcast_manager(self.screen_root, self.selection, self.window)?;
        }
        Ok(())
    }

    /// Unembed every client, give up the selection, destroy the container.
    pub(crate) fn deactivate(&mut self, call_wrapper: &CallWrapper) -> Result<()> {
        if self.state == TrayState::Inactive && self.window == x11rb::NONE {
            return Ok(());
        }
        log::info!(target: "tray", "Deactivating tray manager");
        for client in std::mem::take(&mut self.clients) {
            let _ = unembed(call_wrapper, client.window, self.screen_root);
        }
        if self.state == TrayState::Active
            && call_wrapper.get_selection_owner(self.selection).ok() == Some(self.window)
        {
            let _ = call_wrapper.clear_selection_owner(self.selection);
        }
        if self.window != x11rb::NONE {
            let _ = call_wrapper.destroy_window(self.window);
            self.window = x11rb::NONE;
        }
        self.state = TrayState::Inactive;
        self.mapped = false;
        self.hidden = false;
        self.link.send(Event::Update { force: true });
        Ok(())
    }

    /// The bar hid or reappeared; the container follows it.
    pub(crate) fn bar_visibility_change(&mut self, call_wrapper: &CallWrapper, visible: bool) {
        if self.hidden == !visible {
            return;
        }
        self.hidden = !visible;
        if self.window == x11rb::NONE {
            return;
        }
        let result = if self.hidden && self.mapped {
            self.mapped = false;
            call_wrapper.unmap_window_checked(self.window)
        } else if !self.hidden && !self.mapped && self.mapped_clients() > 0 {
            self.mapped = true;
            call_wrapper.map_window_checked(self.window)
        } else {
            Ok(())
        };
        if let Err(e) = result {
            log::error!(target: "tray", "Failed to toggle container visibility: {e}");
        }
    }

    /// Anchor reported by the renderer for `tray-position = module`.
    pub(crate) fn set_module_anchor(&mut self, call_wrapper: &CallWrapper, anchor: Option<i32>) {
        if self.module_anchor != anchor {
            self.module_anchor = anchor;
            let _ = self.reconfigure(call_wrapper);
        }
    }

    /// Fired from the loop after the delayed-broadcast thread wakes it.
    pub(crate) fn tick(&mut self, call_wrapper: &CallWrapper) -> Result<()> {
        if self.notify_due.swap(false, Ordering::SeqCst) && self.state == TrayState::Active {
            log::debug!(target: "tray", "Broadcasting MANAGER message");
            call_wrapper.broadcast_manager(self.screen_root, self.selection, self.window)?;
        }
        Ok(())
    }

    /// Route an X event; returns true when the tray consumed it.
    pub(crate) fn handle_event(
        &mut self,
        call_wrapper: &CallWrapper,
        event: &XEvent,
    ) -> Result<bool> {
        match event {
            XEvent::ClientMessage(e) if e.type_ == call_wrapper.atom(_NET_SYSTEM_TRAY_OPCODE) => {
                if self.state != TrayState::Active {
                    return Ok(true);
                }
                let data = e.data.as_data32();
                if data[1] == SYSTEM_TRAY_REQUEST_DOCK {
                    if let Err(error) = self.process_docking_request(call_wrapper, data[2]) {
                        if is_window_error(&error) {
                            log::warn!(
                                target: "tray",
                                "Docking request for {} failed, removing client",
                                data[2]
                            );
                            self.remove_client(call_wrapper, data[2])?;
                        } else {
                            return Err(error);
                        }
                    }
                }
                Ok(true)
            }
            XEvent::SelectionClear(e)
                if e.selection == self.selection && e.owner == self.window =>
            {
                log::warn!(target: "tray", "Lost the tray selection, deactivating");
                let new_owner = call_wrapper.get_selection_owner(self.selection).ok();
                self.deactivate(call_wrapper)?;
                if let Some(owner) = new_owner.filter(|o| *o != x11rb::NONE) {
                    if call_wrapper
                        .set_client_event_mask(owner, EventMask::STRUCTURE_NOTIFY)
                        .is_ok()
                    {
                        self.previous_owner = Some(owner);
                        self.state = TrayState::WaitingForOwner(owner);
                    }
                }
                Ok(true)
            }
            XEvent::DestroyNotify(e) => {
                if let TrayState::WaitingForOwner(owner) = self.state {
                    if e.window == owner {
                        log::info!(target: "tray", "Previous tray owner gone, re-activating");
                        self.state = TrayState::Inactive;
                        self.activate(call_wrapper)?;
                        return Ok(true);
                    }
                }
                if e.window == self.window {
                    self.window = x11rb::NONE;
                    self.state = TrayState::Inactive;
                    return Ok(true);
                }
                if self.find_client(e.window).is_some() {
                    self.remove_client(call_wrapper, e.window)?;
                    return Ok(true);
                }
                Ok(false)
            }
            XEvent::ReparentNotify(e) => {
                if e.parent != self.window && self.find_client(e.window).is_some() {
                    log::debug!(target: "tray", "Client {} reparented away", e.window);
                    self.remove_client(call_wrapper, e.window)?;
                    return Ok(true);
                }
                Ok(false)
            }
            XEvent::PropertyNotify(e) if e.atom == call_wrapper.atom(_XEMBED_INFO) => {
                if self.find_client(e.window).is_none() {
                    return Ok(false);
                }
                match call_wrapper.get_xembed_info(e.window) {
                    Ok(info) => {
                        if let Some(client) = self.find_client_mut(e.window) {
                            client.xembed = info;
                        }
                        self.reconfigure(call_wrapper)?;
                    }
                    Err(error) if is_window_error(&error) => {
                        self.remove_client(call_wrapper, e.window)?;
                    }
                    Err(error) => return Err(error),
                }
                Ok(true)
            }
            XEvent::MapNotify(e) => {
                match self.find_client_mut(e.window) {
                    Some(client) if !client.mapped => client.mapped = true,
                    Some(_) => return Ok(true),
                    None => return Ok(false),
                }
                self.reconfigure(call_wrapper)?;
                Ok(true)
            }
            XEvent::UnmapNotify(e) => {
                match self.find_client_mut(e.window) {
                    Some(client) if client.mapped => client.mapped = false,
                    Some(_) => return Ok(true),
                    None => return Ok(false),
                }
                self.reconfigure(call_wrapper)?;
                Ok(true)
            }
            XEvent::ConfigureRequest(e) => {
                if let Some(idx) = self.mapped_index(e.window) {
                    // Clients do not get to pick their own size
                    let size = self.settings.client_size;
                    let x = client_x(idx, size, self.settings.spacing);
                    let result = call_wrapper.send_configure_notify(
                        e.window,
                        x as i16,
                        0,
                        size,
                        size,
                    );
                    if let Err(error) = result {
                        if is_window_error(&error) {
                            self.remove_client(call_wrapper, e.window)?;
                        } else {
                            return Err(error);
                        }
                    }
                    return Ok(true);
                }
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    /// The docking protocol, §"Docking" of the XEMBED tray spec.
    fn process_docking_request(&mut self, call_wrapper: &CallWrapper, win: Window) -> Result<()> {
        if self.find_client(win).is_some() {
            log::warn!(target: "tray", "Tray client {win} already embedded, ignoring request");
            return Ok(());
        }
        log::info!(target: "tray", "Processing docking request from {win}");
        // A missing _XEMBED_INFO property is tolerated
        let xembed = call_wrapper.get_xembed_info(win)?;
        call_wrapper.set_client_event_mask(
            win,
            EventMask::PROPERTY_CHANGE | EventMask::STRUCTURE_NOTIFY,
        )?;
        let size = self.settings.client_size;
        call_wrapper.resize_window_checked(win, size, size)?;
        call_wrapper.add_to_save_set(win)?;
        let client = TrayClient {
            window: win,
            xembed,
            mapped: false,
        };
        let index = self.clients.len();
        call_wrapper.reparent_window(
            win,
            self.window,
            client_x(index, size, self.settings.spacing) as i16,
            0,
        )?;
        if let Some(info) = &client.xembed {
            call_wrapper.send_xembed_embedded_notify(
                win,
                self.window,
                info.version.min(XEMBED_VERSION),
            )?;
        }
        let map_now = client.should_map();
        self.clients.push(client);
        if map_now {
            call_wrapper.map_window_checked(win)?;
        }
        self.reconfigure(call_wrapper)
    }

    fn find_client(&self, win: Window) -> Option<&TrayClient> {
        self.clients.iter().find(|c| c.window == win)
    }

    fn find_client_mut(&mut self, win: Window) -> Option<&mut TrayClient> {
        self.clients.iter_mut().find(|c| c.window == win)
    }

    /// Index of `win` among the mapped clients, for layout math.
    fn mapped_index(&self, win: Window) -> Option<usize> {
        self.clients
            .iter()
            .filter(|c| c.mapped)
            .position(|c| c.window == win)
    }

    fn remove_client(&mut self, call_wrapper: &CallWrapper, win: Window) -> Result<()> {
        self.clients.retain(|c| c.window != win);
        self.reconfigure(call_wrapper)
    }

    /// Re-layout clients, size and position the container, and tell the bar
    /// to account for the new reserved width.
    pub(crate) fn reconfigure(&mut self, call_wrapper: &CallWrapper) -> Result<()> {
        if self.window == x11rb::NONE || self.state != TrayState::Active {
            return Ok(());
        }
        let size = self.settings.client_size;
        let spacing = self.settings.spacing;
        // Make sure mapping state matches each client's XEMBED_MAPPED flag
        for client in &self.clients {
            let result = if client.should_map() && !client.mapped {
                call_wrapper.map_window_checked(client.window)
            } else if !client.should_map() && client.mapped {
                call_wrapper.unmap_window_checked(client.window)
            } else {
                Ok(())
            };
            if let Err(e) = result {
                if !is_window_error(&e) {
                    return Err(e);
                }
            }
        }
        let mapped: Vec<Window> = self
            .clients
            .iter()
            .filter(|c| c.mapped)
            .map(|c| c.window)
            .collect();
        for (i, win) in mapped.iter().enumerate() {
            let x = client_x(i, size, spacing);
            if let Err(e) = call_wrapper.move_resize_window(
                *win,
                x,
                i32::from(spacing),
                u32::from(size),
                u32::from(size),
            ) {
                if !is_window_error(&e) {
                    return Err(e);
                }
            }
        }
        let n = mapped.len();
        if n == 0 {
            if self.mapped {
                self.mapped = false;
                let _ = call_wrapper.unmap_window_checked(self.window);
            }
        } else {
            let width = layout_width(n, size, spacing);
            let height = i32::from(size) + 2 * i32::from(spacing);
            let x = self.container_x(width);
            let y = self.geometry.y + (self.geometry.height - height) / 2;
            call_wrapper.move_resize_window(self.window, x, y, width as u32, height as u32)?;
            if !self.mapped && !self.hidden {
                self.mapped = true;
                call_wrapper.map_window_checked(self.window)?;
            }
            // Keep the container above the bar window in the stack
            let _ = call_wrapper.restack_above(self.window, self.bar_window);
        }
        self.link.send(Event::Update { force: true });
        Ok(())
    }

    /// Container x in root coordinates for the configured tray position.
    fn container_x(&self, width: i32) -> i32 {
        let geom = &self.geometry;
        match self.settings.position {
            TrayPosition::Left => geom.x,
            TrayPosition::Right | TrayPosition::None => geom.x + geom.width - width,
            TrayPosition::Center => geom.x + geom.center_x - width / 2,
            TrayPosition::Module => geom.x + self.module_anchor.unwrap_or(geom.center_x),
        }
    }

    fn create_window(&mut self, call_wrapper: &CallWrapper) -> Result<()> {
        let connection = call_wrapper.inner();
        let window = connection.generate_id()?;
        let aux = CreateWindowAux::new()
            .background_pixel(self.settings.background.argb())
            .override_redirect(1)
            .event_mask(u32::from(
                EventMask::SUBSTRUCTURE_NOTIFY | EventMask::STRUCTURE_NOTIFY,
            ));
        connection.create_window(
            COPY_DEPTH_FROM_PARENT,
            window,
            self.screen_root,
            self.geometry.x as i16,
            self.geometry.y as i16,
            1,
            1,
            0,
            WindowClass::INPUT_OUTPUT,
            x11rb::COPY_FROM_PARENT,
            &aux,
        )?;
        call_wrapper.set_wm_properties(window, "pgbar tray", "tray", "pgbar")?;
        x11rb::wrapper::ConnectionExt::change_property32(
            connection,
            x11rb::protocol::xproto::PropMode::REPLACE,
            window,
            call_wrapper.atom(_NET_SYSTEM_TRAY_ORIENTATION),
            x11rb::protocol::xproto::AtomEnum::CARDINAL,
            &[0],
        )?;
        x11rb::wrapper::ConnectionExt::change_property32(
            connection,
            x11rb::protocol::xproto::PropMode::REPLACE,
            window,
            call_wrapper.atom(_NET_SYSTEM_TRAY_VISUAL),
            x11rb::protocol::xproto::AtomEnum::VISUALID,
            &[self.root_visual],
        )?;
        self.set_tray_colors(call_wrapper, window)?;
        self.window = window;
        Ok(())
    }

    /// `_NET_SYSTEM_TRAY_COLORS`: the configured foreground replicated into
    /// the four spec slots (normal, error, warning, success).
    fn set_tray_colors(&self, call_wrapper: &CallWrapper, window: Window) -> Result<()> {
        let (red, green, blue, _) = self.settings.foreground.to_rgba16();
        let rgb = [u32::from(red), u32::from(green), u32::from(blue)];
        let mut colors = [0_u32; 12];
        for slot in 0..4 {
            colors[slot * 3..slot * 3 + 3].copy_from_slice(&rgb);
        }
        x11rb::wrapper::ConnectionExt::change_property32(
            call_wrapper.inner(),
            x11rb::protocol::xproto::PropMode::REPLACE,
            window,
            call_wrapper.atom(_NET_SYSTEM_TRAY_COLORS),
            x11rb::protocol::xproto::AtomEnum::CARDINAL,
            &colors,
        )?;
        Ok(())
    }

    /// Give clients of a previous manager a second to unembed, then wake
    /// the loop which broadcasts from the reader thread.
    fn defer_manager_broadcast(&self) {
        let due = Arc::clone(&self.notify_due);
        let link = self.link.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(1));
            due.store(true, Ordering::SeqCst);
            link.send(Event::Update { force: true });
        });
    }
}

/// Reparent a client back to the root and unmap it.
fn unembed(call_wrapper: &CallWrapper, win: Window, root: Window) -> Result<()> {
    let _ = call_wrapper.set_client_event_mask(win, EventMask::NO_EVENT);
    let _ = call_wrapper.unmap_window_checked(win);
    call_wrapper.reparent_window(win, root, 0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_math_matches_the_tray_spec() {
        // E4: one mapped client
        assert_eq!(layout_width(1, 16, 2), 2 + (16 + 2));
        assert_eq!(client_x(0, 16, 2), 2);
        // and the general shape
        assert_eq!(layout_width(0, 16, 2), 2);
        assert_eq!(layout_width(3, 24, 4), 4 + 3 * 28);
        assert_eq!(client_x(2, 24, 4), 4 + 2 * 28);
    }

    #[test]
    fn xembed_mapped_flag_controls_mapping() {
        let mapped = TrayClient {
            window: 1,
            xembed: Some(XembedInfo {
                version: 5,
                flags: XEMBED_MAPPED,
            }),
            mapped: false,
        };
        let unmapped = TrayClient {
            window: 2,
            xembed: Some(XembedInfo {
                version: 5,
                flags: 0,
            }),
            mapped: false,
        };
        let plain = TrayClient {
            window: 3,
            xembed: None,
            mapped: false,
        };
        assert!(mapped.should_map());
        assert!(!unmapped.should_map());
        assert!(plain.should_map());
    }
}
