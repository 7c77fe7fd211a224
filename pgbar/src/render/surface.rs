use x11rb::connection::Connection;
use x11rb::protocol::xproto::{ConnectionExt as _, Gcontext, Pixmap, Window};

use pgbar_core::color::Color;

use crate::error::Result;
use crate::render::font::FontSet;
use crate::x11::call_wrapper::CallWrapper;
use crate::x11::visual::VisualInfo;

/// The drawing capabilities the render pipeline needs from its backing
/// store: solid fills, full-height band copies and glyph runs at a pen
/// position. The drawing context is written against this so it can run
/// against a recording implementation in tests.
pub(crate) trait Surface {
    fn fill_rect(&mut self, x: i32, y: i32, width: i32, height: i32, color: Color);
    /// Copy the full-height band starting at `src_x` to `dst_x`.
    fn copy_band(&mut self, src_x: i32, dst_x: i32, width: i32);
    fn glyph_run(&mut self, x: i32, baseline: i32, font: usize, text: &str, color: Color);
}

/// XRender-backed surface: a depth-32 pixmap drawn through a picture, with
/// a 1x1 repeating brush picture for glyph color and a core GC for band
/// copies and presenting.
pub(crate) struct XSurface<'a> {
    call_wrapper: &'a CallWrapper<'a>,
    fonts: &'a FontSet,
    pub pixmap: Pixmap,
    picture: u32,
    brush_pixmap: Pixmap,
    brush: u32,
    gc: Gcontext,
    width: i32,
    height: i32,
}

impl<'a> XSurface<'a> {
    pub(crate) fn new(
        call_wrapper: &'a CallWrapper<'a>,
        fonts: &'a FontSet,
        vis_info: &VisualInfo,
        window: Window,
        width: i32,
        height: i32,
    ) -> Result<Self> {
        let connection = call_wrapper.inner();
        let pixmap = connection.generate_id()?;
        connection.create_pixmap(vis_info.depth, pixmap, window, width as u16, height as u16)?;
        let picture = call_wrapper.create_picture(pixmap, vis_info.pict_format, false)?;
        let brush_pixmap = connection.generate_id()?;
        connection.create_pixmap(vis_info.depth, brush_pixmap, window, 1, 1)?;
        let brush = call_wrapper.create_picture(brush_pixmap, vis_info.pict_format, true)?;
        let gc = call_wrapper.create_gc(pixmap)?;
        Ok(Self {
            call_wrapper,
            fonts,
            pixmap,
            picture,
            brush_pixmap,
            brush,
            gc,
            width,
            height,
        })
    }

    /// Copy the pixmap onto the bar window.
    pub(crate) fn present(&self, window: Window) -> Result<()> {
        self.call_wrapper.copy_area(
            self.pixmap,
            window,
            self.gc,
            0,
            0,
            0,
            0,
            self.width as u16,
            self.height as u16,
        )
    }
}

impl Surface for XSurface<'_> {
    fn fill_rect(&mut self, x: i32, y: i32, width: i32, height: i32, color: Color) {
        if width <= 0 || height <= 0 {
            return;
        }
        if let Err(e) =
            self.call_wrapper
                .fill_rect(self.picture, color, x as i16, y as i16, width as u16, height as u16)
        {
            log::error!(target: "renderer", "fill_rect failed: {e}");
        }
    }

    fn copy_band(&mut self, src_x: i32, dst_x: i32, width: i32) {
        if width <= 0 || src_x == dst_x {
            return;
        }
        if let Err(e) = self.call_wrapper.copy_area(
            self.pixmap,
            self.pixmap,
            self.gc,
            src_x as i16,
            0,
            dst_x as i16,
            0,
            width as u16,
            self.height as u16,
        ) {
            log::error!(target: "renderer", "copy_band failed: {e}");
        }
    }

    fn glyph_run(&mut self, x: i32, baseline: i32, font: usize, text: &str, color: Color) {
        let run = || -> Result<()> {
            self.fonts.ensure_glyphs(self.call_wrapper, font, text)?;
            self.call_wrapper.fill_rect(self.brush, color, 0, 0, 1, 1)?;
            let glyph_ids: Vec<u32> = text.chars().map(|ch| ch as u32).collect();
            self.call_wrapper.draw_glyphs(
                x as i16,
                baseline as i16,
                self.fonts.glyph_set(font),
                self.brush,
                self.picture,
                &glyph_ids,
            )
        };
        if let Err(e) = run() {
            log::error!(target: "renderer", "glyph_run failed: {e}");
        }
    }
}

/// Records primitives instead of drawing them; the test double for the
/// drawing context.
#[cfg(test)]
#[derive(Debug, PartialEq)]
pub(crate) enum Primitive {
    Fill {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        color: Color,
    },
    Copy {
        src_x: i32,
        dst_x: i32,
        width: i32,
    },
    Glyphs {
        x: i32,
        baseline: i32,
        font: usize,
        text: String,
        color: Color,
    },
}

#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingSurface {
    pub ops: Vec<Primitive>,
}

#[cfg(test)]
impl Surface for RecordingSurface {
    fn fill_rect(&mut self, x: i32, y: i32, width: i32, height: i32, color: Color) {
        self.ops.push(Primitive::Fill {
            x,
            y,
            width,
            height,
            color,
        });
    }

    fn copy_band(&mut self, src_x: i32, dst_x: i32, width: i32) {
        self.ops.push(Primitive::Copy {
            src_x,
            dst_x,
            width,
        });
    }

    fn glyph_run(&mut self, x: i32, baseline: i32, font: usize, text: &str, color: Color) {
        self.ops.push(Primitive::Glyphs {
            x,
            baseline,
            font,
            text: text.to_owned(),
            color,
        });
    }
}
