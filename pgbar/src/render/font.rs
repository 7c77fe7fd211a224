use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use fontdue::{Font, FontSettings};
use x11rb::protocol::render::{Glyphinfo, Glyphset};

use pgbar_core::config::FontCfg;

use crate::error::{Error, Result};
use crate::x11::call_wrapper::CallWrapper;
use crate::x11::visual::VisualInfo;

/// Metrics needed to place a run on the bar's baseline.
#[derive(Debug, Copy, Clone)]
pub(crate) struct FontMetrics {
    pub ascent: i32,
    /// Positive distance below the baseline.
    pub descent: i32,
    /// Configured per-font vertical tweak.
    pub offset: i32,
}

struct LoadedFont {
    font: Font,
    px: f32,
    metrics: FontMetrics,
    glyph_set: Glyphset,
    uploaded: RefCell<HashSet<char>>,
    advances: RefCell<HashMap<char, i32>>,
}

/// The configured fonts in preference order, rasterized lazily per char
/// into XRender glyph sets. Index 0 is the default font; `%{T}` indices
/// are 1-based on top of this list.
pub(crate) struct FontSet {
    fonts: Vec<LoadedFont>,
}

impl FontSet {
    pub(crate) fn load(
        call_wrapper: &CallWrapper,
        vis_info: &VisualInfo,
        cfgs: &[FontCfg],
    ) -> Result<Self> {
        let mut fonts = Vec::with_capacity(cfgs.len());
        for cfg in cfgs {
            let px: f32 = cfg.size.parse().map_err(|_| Error::FontLoad {
                path: cfg.path.clone(),
                reason: format!("bad size '{}'", cfg.size),
            })?;
            let data = std::fs::read(&cfg.path).map_err(|e| Error::FontLoad {
                path: cfg.path.clone(),
                reason: e.to_string(),
            })?;
            let font = Font::from_bytes(data, FontSettings::default()).map_err(|reason| {
                Error::FontLoad {
                    path: cfg.path.clone(),
                    reason: reason.to_owned(),
                }
            })?;
            let line = font.horizontal_line_metrics(px).ok_or_else(|| Error::FontLoad {
                path: cfg.path.clone(),
                reason: "no horizontal metrics".to_owned(),
            })?;
            let glyph_set = call_wrapper.create_glyphset(vis_info.pict_format)?;
            fonts.push(LoadedFont {
                font,
                px,
                metrics: FontMetrics {
                    ascent: line.ascent.ceil() as i32,
                    descent: (-line.descent).ceil() as i32,
                    offset: cfg.offset,
                },
                glyph_set,
                uploaded: RefCell::new(HashSet::new()),
                advances: RefCell::new(HashMap::new()),
            });
        }
        if fonts.is_empty() {
            return Err(Error::NoFontsLoaded);
        }
        Ok(Self { fonts })
    }

    pub(crate) fn len(&self) -> usize {
        self.fonts.len()
    }

    /// Pick the first font able to render `ch`, trying the preferred index
    /// first and then the configured order.
    pub(crate) fn match_char(&self, preferred: Option<usize>, ch: char) -> Option<usize> {
        if let Some(idx) = preferred {
            if let Some(font) = self.fonts.get(idx) {
                if font.font.lookup_glyph_index(ch) != 0 {
                    return Some(idx);
                }
            }
        }
        self.fonts
            .iter()
            .position(|f| f.font.lookup_glyph_index(ch) != 0)
    }

    pub(crate) fn advance(&self, font: usize, ch: char) -> i32 {
        let loaded = &self.fonts[font];
        if let Some(cached) = loaded.advances.borrow().get(&ch) {
            return *cached;
        }
        let advance = loaded.font.metrics(ch, loaded.px).advance_width.ceil() as i32;
        loaded.advances.borrow_mut().insert(ch, advance);
        advance
    }

    pub(crate) fn metrics(&self, font: usize) -> FontMetrics {
        self.fonts[font].metrics
    }

    pub(crate) fn glyph_set(&self, font: usize) -> Glyphset {
        self.fonts[font].glyph_set
    }

    /// Rasterize and upload any glyphs of `text` this font set has not seen
    /// yet. Glyph ids are the chars themselves.
    pub(crate) fn ensure_glyphs(
        &self,
        call_wrapper: &CallWrapper,
        font: usize,
        text: &str,
    ) -> Result<()> {
        let loaded = &self.fonts[font];
        let mut ids = Vec::new();
        let mut infos = Vec::new();
        let mut raw_data = Vec::new();
        {
            let mut uploaded = loaded.uploaded.borrow_mut();
            for ch in text.chars() {
                if !uploaded.insert(ch) {
                    continue;
                }
                let (metrics, coverage) = loaded.font.rasterize(ch, loaded.px);
                ids.push(ch as u32);
                // The glyphset's format is ARGB32, expand coverage so alpha
                // carries it
                for byte in coverage {
                    raw_data.extend_from_slice(&[byte, byte, byte, byte]);
                }
                infos.push(Glyphinfo {
                    width: metrics.width as u16,
                    height: metrics.height as u16,
                    x: -metrics.xmin as i16,
                    y: (metrics.height as i32 + metrics.ymin) as i16,
                    x_off: metrics.advance_width.ceil() as i16,
                    y_off: 0,
                });
            }
        }
        if !ids.is_empty() {
            call_wrapper.add_glyphs(loaded.glyph_set, &ids, &infos, &raw_data)?;
        }
        Ok(())
    }
}
