use heapless::FnvIndexMap;
use x11rb::connection::Connection;
use x11rb::cookie::VoidCookie;
use x11rb::errors::ReplyError;
use x11rb::protocol::render::{
    self, CreatePictureAux, Glyphinfo, Glyphset, PictOp, Pictformat, Picture, Repeat,
};
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ChangeWindowAttributesAux, ClientMessageEvent, ConfigureNotifyEvent,
    ConfigureWindowAux, ConnectionExt, CreateGCAux, EventMask, Gcontext, InternAtomReply,
    PropMode, Rectangle, SetMode, StackMode, Window, CONFIGURE_NOTIFY_EVENT,
};
use x11rb::protocol::ErrorKind;
use x11rb::rust_connection::RustConnection;
use x11rb::{CURRENT_TIME, NONE};

use pgbar_core::color::Color;

use crate::error::{Error, Result};

macro_rules! impl_atoms {
    ($( $const_name:ident, $enum_name:ident ),* ) => {
        // Init consts
        $(
            pub(crate) const $const_name: &[u8] = stringify!($const_name).as_bytes();
        )*
        // Init enum
        #[derive(Clone, Copy, Debug, Eq, PartialEq)]
        pub(crate) enum SupportedAtom {
            $(
                $enum_name,
            )*
        }
        fn init_maps(
            connection: &RustConnection,
        ) -> Result<(
            FnvIndexMap<&'static [u8], ResolvedAtom, 32>,
            FnvIndexMap<Atom, ResolvedAtom, 32>,
        )> {
            let mut name_to_atom = FnvIndexMap::new();
            let mut atom_to_resolved = FnvIndexMap::new();
            let mut cookies = heapless::Deque::<
                x11rb::cookie::Cookie<RustConnection, InternAtomReply>,
                32,
            >::new();
            $(
                cookies
                    .push_back(connection.intern_atom(false, $const_name)?)
                    .expect("Not enough space for intern atoms");
            )*
            $(
                let atom = cookies.pop_front().unwrap().reply()?.atom;
                name_to_atom
                    .insert(
                        $const_name,
                        ResolvedAtom {
                            value: atom,
                            intern_atom: SupportedAtom::$enum_name,
                        },
                    )
                    .expect("Not enough space to store atoms in named atom map");
                atom_to_resolved
                    .insert(
                        atom,
                        ResolvedAtom {
                            value: atom,
                            intern_atom: SupportedAtom::$enum_name,
                        },
                    )
                    .expect("Not enough space to store atoms in resolved atom map");
            )*
            Ok((name_to_atom, atom_to_resolved))
        }
    };
}

impl_atoms!(
    UTF8_STRING,
    Utf8String,
    MANAGER,
    Manager,
    _NET_WM_NAME,
    NetWmName,
    _NET_WM_WINDOW_TYPE,
    NetWmWindowType,
    _NET_WM_WINDOW_TYPE_DOCK,
    NetWmWindowTypeDock,
    _NET_WM_WINDOW_TYPE_NORMAL,
    NetWmWindowTypeNormal,
    _NET_WM_STATE,
    NetWmState,
    _NET_WM_STATE_STICKY,
    NetWmStateSticky,
    _NET_WM_STATE_SKIP_TASKBAR,
    NetWmStateSkipTaskbar,
    _NET_WM_STATE_SKIP_PAGER,
    NetWmStateSkipPager,
    _NET_WM_STATE_ABOVE,
    NetWmStateAbove,
    _NET_WM_DESKTOP,
    NetWmDesktop,
    _NET_WM_PID,
    NetWmPid,
    _NET_WM_STRUT,
    NetWmStrut,
    _NET_WM_STRUT_PARTIAL,
    NetWmStrutPartial,
    _NET_SYSTEM_TRAY_OPCODE,
    NetSystemTrayOpcode,
    _NET_SYSTEM_TRAY_ORIENTATION,
    NetSystemTrayOrientation,
    _NET_SYSTEM_TRAY_VISUAL,
    NetSystemTrayVisual,
    _NET_SYSTEM_TRAY_COLORS,
    NetSystemTrayColors,
    _XEMBED,
    Xembed,
    _XEMBED_INFO,
    XembedInfoAtom
);

#[derive(Clone, Copy, Debug)]
pub(crate) struct ResolvedAtom {
    pub(crate) intern_atom: SupportedAtom,
    pub(crate) value: Atom,
}

/// The `_XEMBED_INFO` property of a tray client.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) struct XembedInfo {
    pub version: u32,
    pub flags: u32,
}

pub(crate) const XEMBED_MAPPED: u32 = 1;
pub(crate) const XEMBED_EMBEDDED_NOTIFY: u32 = 0;
pub(crate) const XEMBED_VERSION: u32 = 5;

/// Typed wrapper over the raw X requests the daemon issues.
pub(crate) struct CallWrapper<'a> {
    connection: &'a RustConnection,
    name_to_atom: FnvIndexMap<&'static [u8], ResolvedAtom, 32>,
    atom_to_resolved: FnvIndexMap<Atom, ResolvedAtom, 32>,
}

impl<'a> CallWrapper<'a> {
    pub(crate) fn new(connection: &'a RustConnection) -> Result<Self> {
        let (name_to_atom, atom_to_resolved) = init_maps(connection)?;
        Ok(CallWrapper {
            connection,
            name_to_atom,
            atom_to_resolved,
        })
    }

    pub(crate) fn inner(&self) -> &'a RustConnection {
        self.connection
    }

    pub(crate) fn atom(&self, name: &'static [u8]) -> Atom {
        self.name_to_atom[name].value
    }

    pub(crate) fn resolve_atom(&self, atom: Atom) -> Option<SupportedAtom> {
        self.atom_to_resolved.get(&atom).map(|r| r.intern_atom)
    }

    pub(crate) fn intern(&self, name: &str) -> Result<Atom> {
        Ok(self
            .connection
            .intern_atom(false, name.as_bytes())?
            .reply()?
            .atom)
    }

    pub(crate) fn flush(&self) -> Result<()> {
        self.connection.flush()?;
        Ok(())
    }

    // Bar window dressing

    pub(crate) fn set_wm_properties(
        &self,
        win: Window,
        name: &str,
        instance: &str,
        class: &str,
    ) -> Result<()> {
        x11rb::wrapper::ConnectionExt::change_property8(
            self.connection,
            PropMode::REPLACE,
            win,
            AtomEnum::WM_NAME,
            AtomEnum::STRING,
            name.as_bytes(),
        )?;
        x11rb::wrapper::ConnectionExt::change_property8(
            self.connection,
            PropMode::REPLACE,
            win,
            self.atom(_NET_WM_NAME),
            self.atom(UTF8_STRING),
            name.as_bytes(),
        )?;
        let mut wm_class = Vec::with_capacity(instance.len() + class.len() + 2);
        wm_class.extend_from_slice(instance.as_bytes());
        wm_class.push(0);
        wm_class.extend_from_slice(class.as_bytes());
        wm_class.push(0);
        x11rb::wrapper::ConnectionExt::change_property8(
            self.connection,
            PropMode::REPLACE,
            win,
            AtomEnum::WM_CLASS,
            AtomEnum::STRING,
            &wm_class,
        )?;
        Ok(())
    }

    pub(crate) fn set_dock_properties(&self, win: Window) -> Result<()> {
        x11rb::wrapper::ConnectionExt::change_property32(
            self.connection,
            PropMode::REPLACE,
            win,
            self.atom(_NET_WM_WINDOW_TYPE),
            AtomEnum::ATOM,
            &[
                self.atom(_NET_WM_WINDOW_TYPE_DOCK),
                self.atom(_NET_WM_WINDOW_TYPE_NORMAL),
            ],
        )?;
        x11rb::wrapper::ConnectionExt::change_property32(
            self.connection,
            PropMode::REPLACE,
            win,
            self.atom(_NET_WM_STATE),
            AtomEnum::ATOM,
            &[
                self.atom(_NET_WM_STATE_STICKY),
                self.atom(_NET_WM_STATE_SKIP_TASKBAR),
                self.atom(_NET_WM_STATE_SKIP_PAGER),
                self.atom(_NET_WM_STATE_ABOVE),
            ],
        )?;
        x11rb::wrapper::ConnectionExt::change_property32(
            self.connection,
            PropMode::REPLACE,
            win,
            self.atom(_NET_WM_DESKTOP),
            AtomEnum::CARDINAL,
            &[0xFFFF_FFFF],
        )?;
        x11rb::wrapper::ConnectionExt::change_property32(
            self.connection,
            PropMode::REPLACE,
            win,
            self.atom(_NET_WM_PID),
            AtomEnum::CARDINAL,
            &[std::process::id()],
        )?;
        Ok(())
    }

    /// The 12-value partial strut plus the legacy 4-value strut.
    pub(crate) fn set_struts(&self, win: Window, strut: [u32; 12]) -> Result<()> {
        x11rb::wrapper::ConnectionExt::change_property32(
            self.connection,
            PropMode::REPLACE,
            win,
            self.atom(_NET_WM_STRUT),
            AtomEnum::CARDINAL,
            &strut[..4],
        )?;
        x11rb::wrapper::ConnectionExt::change_property32(
            self.connection,
            PropMode::REPLACE,
            win,
            self.atom(_NET_WM_STRUT_PARTIAL),
            AtomEnum::CARDINAL,
            &strut,
        )?;
        Ok(())
    }

    pub(crate) fn map_window(&self, win: Window) -> Result<VoidCookie<'a, RustConnection>> {
        Ok(self.connection.map_window(win)?)
    }

    pub(crate) fn unmap_window(&self, win: Window) -> Result<VoidCookie<'a, RustConnection>> {
        Ok(self.connection.unmap_window(win)?)
    }

    pub(crate) fn destroy_window(&self, win: Window) -> Result<VoidCookie<'a, RustConnection>> {
        Ok(self.connection.destroy_window(win)?)
    }

    pub(crate) fn set_cursor(&self, win: Window, cursor: u32) -> Result<()> {
        self.connection
            .change_window_attributes(win, &ChangeWindowAttributesAux::new().cursor(cursor))?;
        Ok(())
    }

    // Tray plumbing. Requests against client windows are checked so a
    // vanished window surfaces as a reply error the tray can recover from.

    pub(crate) fn get_selection_owner(&self, selection: Atom) -> Result<Window> {
        Ok(self
            .connection
            .get_selection_owner(selection)?
            .reply()?
            .owner)
    }

    pub(crate) fn set_selection_owner(&self, owner: Window, selection: Atom) -> Result<()> {
        self.connection
            .set_selection_owner(owner, selection, CURRENT_TIME)?
            .check()?;
        Ok(())
    }

    pub(crate) fn clear_selection_owner(&self, selection: Atom) -> Result<()> {
        self.connection
            .set_selection_owner(NONE, selection, CURRENT_TIME)?;
        Ok(())
    }

    /// Broadcast the MANAGER client message to the root window.
    pub(crate) fn broadcast_manager(
        &self,
        root: Window,
        selection: Atom,
        owner: Window,
    ) -> Result<()> {
        let event = ClientMessageEvent::new(
            32,
            root,
            self.atom(MANAGER),
            [CURRENT_TIME, selection, owner, 0, 0],
        );
        self.connection
            .send_event(false, root, EventMask::STRUCTURE_NOTIFY, &event)?;
        Ok(())
    }

    pub(crate) fn get_xembed_info(&self, win: Window) -> Result<Option<XembedInfo>> {
        let reply = self
            .connection
            .get_property(
                false,
                win,
                self.atom(_XEMBED_INFO),
                AtomEnum::ANY,
                0,
                2,
            )?
            .reply()?;
        let data: Vec<u32> = reply.value32().into_iter().flatten().collect();
        if data.len() >= 2 {
            Ok(Some(XembedInfo {
                version: data[0],
                flags: data[1],
            }))
        } else {
            Ok(None)
        }
    }

    pub(crate) fn send_xembed_embedded_notify(
        &self,
        win: Window,
        embedder: Window,
        version: u32,
    ) -> Result<()> {
        let event = ClientMessageEvent::new(
            32,
            win,
            self.atom(_XEMBED),
            [CURRENT_TIME, XEMBED_EMBEDDED_NOTIFY, 0, embedder, version],
        );
        self.connection
            .send_event(false, win, EventMask::NO_EVENT, &event)?
            .check()?;
        Ok(())
    }

    pub(crate) fn set_client_event_mask(&self, win: Window, mask: EventMask) -> Result<()> {
        self.connection
            .change_window_attributes(
                win,
                &ChangeWindowAttributesAux::new().event_mask(u32::from(mask)),
            )?
            .check()?;
        Ok(())
    }

    pub(crate) fn add_to_save_set(&self, win: Window) -> Result<()> {
        self.connection.change_save_set(SetMode::INSERT, win)?.check()?;
        Ok(())
    }

    pub(crate) fn reparent_window(&self, win: Window, parent: Window, x: i16, y: i16) -> Result<()> {
        self.connection.reparent_window(win, parent, x, y)?.check()?;
        Ok(())
    }

    pub(crate) fn resize_window_checked(&self, win: Window, width: u16, height: u16) -> Result<()> {
        self.connection
            .configure_window(
                win,
                &ConfigureWindowAux::new()
                    .width(u32::from(width))
                    .height(u32::from(height)),
            )?
            .check()?;
        Ok(())
    }

    pub(crate) fn move_window(&self, win: Window, x: i32, y: i32) -> Result<()> {
        self.connection
            .configure_window(win, &ConfigureWindowAux::new().x(x).y(y))?;
        Ok(())
    }

    pub(crate) fn move_resize_window(
        &self,
        win: Window,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<()> {
        self.connection.configure_window(
            win,
            &ConfigureWindowAux::new().x(x).y(y).width(width).height(height),
        )?;
        Ok(())
    }

    pub(crate) fn restack_above(&self, win: Window, sibling: Window) -> Result<()> {
        self.connection
            .configure_window(
                win,
                &ConfigureWindowAux::new()
                    .sibling(sibling)
                    .stack_mode(StackMode::ABOVE),
            )?
            .check()?;
        Ok(())
    }

    pub(crate) fn map_window_checked(&self, win: Window) -> Result<()> {
        self.connection.map_window(win)?.check()?;
        Ok(())
    }

    pub(crate) fn unmap_window_checked(&self, win: Window) -> Result<()> {
        self.connection.unmap_window(win)?.check()?;
        Ok(())
    }

    /// Tell a client where its window sits without letting it resize.
    pub(crate) fn send_configure_notify(
        &self,
        win: Window,
        x: i16,
        y: i16,
        width: u16,
        height: u16,
    ) -> Result<()> {
        let event = ConfigureNotifyEvent {
            response_type: CONFIGURE_NOTIFY_EVENT,
            sequence: 0,
            event: win,
            window: win,
            above_sibling: NONE,
            x,
            y,
            width,
            height,
            border_width: 0,
            override_redirect: false,
        };
        self.connection
            .send_event(false, win, EventMask::STRUCTURE_NOTIFY, &event)?
            .check()?;
        Ok(())
    }

    // Render plumbing

    pub(crate) fn create_picture(
        &self,
        drawable: u32,
        format: Pictformat,
        repeat: bool,
    ) -> Result<Picture> {
        let picture = self.connection.generate_id()?;
        let aux = if repeat {
            CreatePictureAux::new().repeat(Repeat::NORMAL)
        } else {
            CreatePictureAux::new()
        };
        render::create_picture(self.connection, picture, drawable, format, &aux)?;
        Ok(picture)
    }

    pub(crate) fn create_glyphset(&self, format: Pictformat) -> Result<Glyphset> {
        let id = self.connection.generate_id()?;
        render::create_glyph_set(self.connection, id, format)?;
        Ok(id)
    }

    pub(crate) fn add_glyphs(
        &self,
        glyph_set: Glyphset,
        glyph_ids: &[u32],
        glyph_info: &[Glyphinfo],
        data: &[u8],
    ) -> Result<()> {
        render::add_glyphs(self.connection, glyph_set, glyph_ids, glyph_info, data)?;
        Ok(())
    }

    pub(crate) fn fill_rect(
        &self,
        picture: Picture,
        color: Color,
        x: i16,
        y: i16,
        width: u16,
        height: u16,
    ) -> Result<()> {
        let (red, green, blue, alpha) = color.to_rgba16();
        render::fill_rectangles(
            self.connection,
            PictOp::SRC,
            picture,
            render::Color {
                red,
                green,
                blue,
                alpha,
            },
            &[Rectangle {
                x,
                y,
                width,
                height,
            }],
        )?;
        Ok(())
    }

    // https://lists.freedesktop.org/archives/xcb/2006-October/002157.html
    // The elt32 stream is a length-prefixed run with the destination origin
    pub(crate) fn draw_glyphs(
        &self,
        x: i16,
        y: i16,
        glyphs: Glyphset,
        brush: Picture,
        target: Picture,
        glyph_ids: &[u32],
    ) -> Result<()> {
        let render = if glyph_ids.len() > 254 {
            &glyph_ids[..254]
        } else {
            glyph_ids
        };
        let mut buf = Vec::with_capacity(8 + render.len() * 4);
        buf.extend_from_slice(&[render.len() as u8, 0, 0, 0]);
        buf.extend_from_slice(&x.to_ne_bytes());
        buf.extend_from_slice(&y.to_ne_bytes());
        for glyph in render {
            buf.extend_from_slice(&glyph.to_ne_bytes());
        }
        render::composite_glyphs32(
            self.connection,
            PictOp::OVER,
            brush,
            target,
            0,
            glyphs,
            0,
            0,
            &buf,
        )?;
        Ok(())
    }

    pub(crate) fn create_gc(&self, drawable: u32) -> Result<Gcontext> {
        let gc = self.connection.generate_id()?;
        self.connection
            .create_gc(gc, drawable, &CreateGCAux::new().graphics_exposures(0))?;
        Ok(gc)
    }

    pub(crate) fn copy_area(
        &self,
        src: u32,
        dst: u32,
        gc: Gcontext,
        src_x: i16,
        src_y: i16,
        dst_x: i16,
        dst_y: i16,
        width: u16,
        height: u16,
    ) -> Result<()> {
        self.connection
            .copy_area(src, dst, gc, src_x, src_y, dst_x, dst_y, width, height)?;
        Ok(())
    }
}

/// Whether an error is a per-window failure the caller can tolerate by
/// dropping the offending entity.
pub(crate) fn is_window_error(error: &Error) -> bool {
    if let Error::X11Reply(ReplyError::X11Error(e)) = error {
        matches!(
            e.error_kind,
            ErrorKind::Window | ErrorKind::Drawable | ErrorKind::Match | ErrorKind::Value
        )
    } else {
        false
    }
}
