use x11rb::protocol::render::{self, Directformat, PictType, Pictformat};
use x11rb::protocol::xproto::{Screen, VisualClass, Visualid};
use x11rb::rust_connection::RustConnection;

use crate::error::{Error, Result};

/// The 32-bit ARGB visual the bar window and pixmap are created with, plus
/// the matching XRender picture format.
#[derive(Debug, Copy, Clone)]
pub(crate) struct VisualInfo {
    pub visual: Visualid,
    pub depth: u8,
    pub pict_format: Pictformat,
    pub direct: Directformat,
}

impl VisualInfo {
    /// Find a true-color depth-32 visual whose render format carries an
    /// alpha channel in ARGB layout.
    pub(crate) fn find_argb(connection: &RustConnection, screen: &Screen) -> Result<Self> {
        let formats = render::query_pict_formats(connection)?.reply()?;
        let argb = formats
            .formats
            .iter()
            .find(|f| {
                f.type_ == PictType::DIRECT
                    && f.depth == 32
                    && f.direct.alpha_mask == 0xFF
                    && f.direct.red_shift == 16
                    && f.direct.green_shift == 8
                    && f.direct.blue_shift == 0
            })
            .ok_or(Error::NoArgbVisual)?;

        for depth in &screen.allowed_depths {
            if depth.depth != 32 {
                continue;
            }
            for visual in &depth.visuals {
                if visual.class != VisualClass::TRUE_COLOR {
                    continue;
                }
                if format_of_visual(&formats, visual.visual_id) == Some(argb.id) {
                    return Ok(Self {
                        visual: visual.visual_id,
                        depth: 32,
                        pict_format: argb.id,
                        direct: argb.direct,
                    });
                }
            }
        }
        Err(Error::NoArgbVisual)
    }
}

fn format_of_visual(
    formats: &render::QueryPictFormatsReply,
    visual: Visualid,
) -> Option<Pictformat> {
    formats
        .screens
        .iter()
        .flat_map(|s| &s.depths)
        .flat_map(|d| &d.visuals)
        .find(|pv| pv.visual == visual)
        .map(|pv| pv.format)
}
