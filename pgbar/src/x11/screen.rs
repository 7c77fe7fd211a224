use x11rb::connection::Connection;
use x11rb::protocol::randr::ConnectionExt as _;
use x11rb::protocol::xproto::{ConnectionExt as _, Screen, Window};
use x11rb::rust_connection::RustConnection;

use pgbar_core::geometry::Rect;

use crate::error::{Error, Result};

/// A connected output as the bar sees it.
#[derive(Debug, Clone)]
pub(crate) struct Monitor {
    pub name: String,
    pub rect: Rect,
    pub primary: bool,
}

/// Enumerate monitors via RandR 1.5; a missing or old extension degrades to
/// the whole screen as one anonymous monitor.
pub(crate) fn monitors(connection: &RustConnection, screen: &Screen) -> Result<Vec<Monitor>> {
    match randr_monitors(connection, screen.root) {
        Ok(list) if !list.is_empty() => Ok(list),
        Ok(_) | Err(_) => {
            log::warn!(target: "screen", "RandR >= 1.5 unavailable, using screen geometry");
            Ok(vec![Monitor {
                name: "screen".to_owned(),
                rect: Rect::new(
                    0,
                    0,
                    i32::from(screen.width_in_pixels),
                    i32::from(screen.height_in_pixels),
                ),
                primary: true,
            }])
        }
    }
}

fn randr_monitors(connection: &RustConnection, root: Window) -> Result<Vec<Monitor>> {
    let version = connection.randr_query_version(1, 5)?.reply()?;
    if (version.major_version, version.minor_version) < (1, 5) {
        return Ok(Vec::new());
    }
    let reply = connection.randr_get_monitors(root, true)?.reply()?;
    let mut out = Vec::with_capacity(reply.monitors.len());
    for info in &reply.monitors {
        let name = connection.get_atom_name(info.name)?.reply()?.name;
        out.push(Monitor {
            name: String::from_utf8(name)?,
            rect: Rect::new(
                i32::from(info.x),
                i32::from(info.y),
                i32::from(info.width),
                i32::from(info.height),
            ),
            primary: info.primary,
        });
    }
    Ok(out)
}

/// Pick the configured monitor, the primary one, or the first one.
pub(crate) fn find_monitor(
    connection: &RustConnection,
    screen: &Screen,
    configured: Option<&str>,
) -> Result<Monitor> {
    let mut list = monitors(connection, screen)?;
    if let Some(wanted) = configured {
        return list
            .into_iter()
            .find(|m| m.name == wanted)
            .ok_or_else(|| Error::MonitorNotFound(wanted.to_owned()));
    }
    if let Some(primary) = list.iter().position(|m| m.primary) {
        return Ok(list.swap_remove(primary));
    }
    list.into_iter()
        .next()
        .ok_or_else(|| Error::MonitorNotFound("any".to_owned()))
}

/// RandR monitor query, used by `--print-wmname` and startup alike.
pub(crate) fn connect_and_find(
    configured: Option<&str>,
) -> Result<(RustConnection, usize, Monitor)> {
    let (connection, screen_num) = x11rb::connect(None)?;
    let monitor = {
        let screen = &connection.setup().roots[screen_num];
        find_monitor(&connection, screen, configured)?
    };
    Ok((connection, screen_num, monitor))
}
