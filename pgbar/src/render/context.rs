use pgbar_core::actions::ActionContext;
use pgbar_core::color::Color;
use pgbar_core::config::LineStyle;
use pgbar_core::format::{Alignment, ColorValue, FontValue, MouseButton};

use crate::render::font::{FontMetrics, FontSet};
use crate::render::surface::Surface;

/// Text measurement and font matching as the drawing context needs it,
/// separated out so tests can substitute fixed metrics.
pub(crate) trait TextShaper {
    fn num_fonts(&self) -> usize;
    fn match_char(&self, preferred: Option<usize>, ch: char) -> Option<usize>;
    fn advance(&self, font: usize, ch: char) -> i32;
    fn metrics(&self, font: usize) -> FontMetrics;
}

impl TextShaper for &FontSet {
    fn num_fonts(&self) -> usize {
        self.len()
    }

    fn match_char(&self, preferred: Option<usize>, ch: char) -> Option<usize> {
        FontSet::match_char(self, preferred, ch)
    }

    fn advance(&self, font: usize, ch: char) -> i32 {
        FontSet::advance(self, font, ch)
    }

    fn metrics(&self, font: usize) -> FontMetrics {
        FontSet::metrics(self, font)
    }
}

/// Immutable per-frame drawing parameters derived from the bar settings.
#[derive(Debug, Copy, Clone)]
pub(crate) struct ContextSettings {
    pub width: i32,
    pub height: i32,
    pub center_x: i32,
    pub center_y: i32,
    pub border_left: i32,
    pub border_right: i32,
    pub border_top: i32,
    pub border_bottom: i32,
    pub background: Color,
    pub foreground: Color,
    pub underline: LineStyle,
    pub overline: LineStyle,
}

#[derive(Debug, Copy, Clone)]
struct Style {
    fg: Color,
    bg: Color,
    font: Option<usize>,
    underline: bool,
    overline: bool,
    underline_color: Color,
    overline_color: Color,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Segment {
    start: i32,
    end: i32,
    color: Color,
}

#[derive(Debug, Copy, Clone, Default)]
struct Block {
    pen: i32,
    /// Leftmost drawn position relative to the block origin, <= 0.
    lo: i32,
    /// Block width: the rightmost drawn position.
    hi: i32,
    origin: i32,
    underline: Option<Segment>,
    overline: Option<Segment>,
}

/// The drawing context: turns the element stream into surface primitives.
///
/// Pens are tracked relative to each alignment block's origin; center and
/// right origins move as their blocks grow and previously drawn content is
/// translated with a band copy, so action block coordinates can stay
/// alignment-relative throughout.
pub(crate) struct DrawContext<S, F> {
    surface: S,
    shaper: F,
    settings: ContextSettings,
    reserve_left: i32,
    reserve_right: i32,
    style: Style,
    align: Alignment,
    blocks: [Block; 3],
    tray_anchor: Option<(Alignment, i32)>,
}

impl<S: Surface, F: TextShaper> DrawContext<S, F> {
    pub(crate) fn new(surface: S, shaper: F, settings: ContextSettings) -> Self {
        let style = default_style(&settings);
        Self {
            surface,
            shaper,
            settings,
            reserve_left: 0,
            reserve_right: 0,
            style,
            align: Alignment::Left,
            blocks: [Block::default(); 3],
            tray_anchor: None,
        }
    }

    pub(crate) fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub(crate) fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    pub(crate) fn set_reserve(&mut self, left: i32, right: i32) {
        self.reserve_left = left;
        self.reserve_right = right;
    }

    /// Reset all per-frame state and repaint the (non-reserved) background.
    pub(crate) fn begin(&mut self, actions: &mut ActionContext) {
        self.style = default_style(&self.settings);
        self.align = Alignment::Left;
        self.blocks = [Block::default(); 3];
        self.tray_anchor = None;
        for align in Alignment::ALL {
            let origin = self.origin_for(align, 0);
            self.blocks[align.index()].origin = origin;
            actions.set_alignment_start(align, origin);
        }
        self.surface.fill_rect(
            self.reserve_left,
            0,
            self.settings.width - self.reserve_left - self.reserve_right,
            self.settings.height,
            self.settings.background,
        );
    }

    /// Flush pending decoration, close leftover action blocks and record
    /// final alignment origins. Returns the tray anchor in bar coordinates
    /// when a `%{P:t}` marker was drawn.
    pub(crate) fn finish(&mut self, actions: &mut ActionContext) -> Option<i32> {
        for align in Alignment::ALL {
            self.flush_segments(align);
            let block = &self.blocks[align.index()];
            actions.set_alignment_start(align, block.origin);
            let leftover = actions.close_remaining(align, block.pen);
            if leftover > 0 {
                log::warn!(
                    target: "renderer",
                    "{leftover} unclosed action block(s) at end of {align:?} block"
                );
            }
        }
        self.tray_anchor
            .map(|(align, rel)| self.blocks[align.index()].origin + rel)
    }

    pub(crate) fn set_alignment(&mut self, align: Alignment, actions: &mut ActionContext) {
        if align == self.align {
            return;
        }
        self.flush_segments(self.align);
        self.align = align;
        // Switching into an alignment resets its horizontal cursor
        self.blocks[align.index()].pen = 0;
        actions.set_alignment_start(align, self.blocks[align.index()].origin);
    }

    pub(crate) fn set_foreground(&mut self, value: ColorValue) {
        self.style.fg = match value {
            ColorValue::Reset => self.settings.foreground,
            ColorValue::Set(c) => c,
        };
    }

    pub(crate) fn set_background(&mut self, value: ColorValue) {
        self.style.bg = match value {
            ColorValue::Reset => self.settings.background,
            ColorValue::Set(c) => c,
        };
    }

    pub(crate) fn reverse(&mut self) {
        core::mem::swap(&mut self.style.fg, &mut self.style.bg);
    }

    pub(crate) fn set_font(&mut self, value: FontValue) {
        self.style.font = match value {
            FontValue::Reset => None,
            FontValue::Index(i) => {
                if i <= self.shaper.num_fonts() {
                    Some(i - 1)
                } else {
                    log::warn!(target: "renderer", "Font index {i} out of range");
                    None
                }
            }
        };
    }

    pub(crate) fn set_underline_color(&mut self, value: ColorValue) {
        self.style.underline_color = match value {
            ColorValue::Reset => self.settings.underline.color,
            ColorValue::Set(c) => c,
        };
    }

    pub(crate) fn set_overline_color(&mut self, value: ColorValue) {
        self.style.overline_color = match value {
            ColorValue::Reset => self.settings.overline.color,
            ColorValue::Set(c) => c,
        };
    }

    pub(crate) fn set_underline(&mut self, on: bool) {
        if self.style.underline && !on {
            let seg = self.blocks[self.align.index()].underline.take();
            self.emit_underline(self.align, seg);
        }
        self.style.underline = on;
    }

    pub(crate) fn set_overline(&mut self, on: bool) {
        if self.style.overline && !on {
            let seg = self.blocks[self.align.index()].overline.take();
            self.emit_overline(self.align, seg);
        }
        self.style.overline = on;
    }

    pub(crate) fn underline_state(&self) -> bool {
        self.style.underline
    }

    pub(crate) fn overline_state(&self) -> bool {
        self.style.overline
    }

    /// `%{P:R}`: back to bar defaults at a module boundary.
    pub(crate) fn reset_style(&mut self) {
        self.set_underline(false);
        self.set_overline(false);
        self.style = default_style(&self.settings);
    }

    /// A positive offset is a blank run; a negative one retreats the pen
    /// and widens any open action blocks over the skipped range.
    pub(crate) fn offset(&mut self, px: i32, actions: &mut ActionContext) {
        if px > 0 {
            self.append(px, None, actions);
        } else if px < 0 {
            let old = self.blocks[self.align.index()].pen;
            let new = old + px;
            self.blocks[self.align.index()].pen = new;
            actions.compensate_for_negative_move(self.align, old, new);
        }
    }

    pub(crate) fn begin_action(&mut self, button: MouseButton, command: String, actions: &mut ActionContext) {
        actions.open(button, command, self.align, self.blocks[self.align.index()].pen);
    }

    pub(crate) fn end_action(&mut self, actions: &mut ActionContext) {
        let pen = self.blocks[self.align.index()].pen;
        let (id, _) = actions.close(MouseButton::None, self.align, pen);
        if id == pgbar_core::actions::NO_ACTION {
            log::warn!(target: "renderer", "Unmatched action close");
        }
    }

    /// Record the tray anchor at the current pen and pad for its width.
    pub(crate) fn tray_slot(&mut self, tray_width: i32, actions: &mut ActionContext) {
        self.tray_anchor = Some((self.align, self.blocks[self.align.index()].pen));
        if tray_width > 0 {
            self.append(tray_width, None, actions);
        }
    }

    /// Draw a text run: split into maximal single-font subruns, dropping
    /// characters no font can render.
    pub(crate) fn text(&mut self, run: &str, actions: &mut ActionContext) {
        let mut sub = String::new();
        let mut sub_font: Option<usize> = None;
        let mut sub_width = 0;
        for ch in run.chars() {
            let Some(font) = self.shaper.match_char(self.style.font, ch) else {
                log::warn!(target: "renderer", "No font can render {ch:?}, dropping");
                continue;
            };
            if sub_font != Some(font) && !sub.is_empty() {
                let (text, width, prev) = (core::mem::take(&mut sub), sub_width, sub_font);
                self.append(width, prev.map(|f| (f, text)), actions);
                sub_width = 0;
            }
            sub_font = Some(font);
            sub.push(ch);
            sub_width += self.shaper.advance(font, ch);
        }
        if !sub.is_empty() {
            let (text, width, font) = (sub, sub_width, sub_font);
            self.append(width, font.map(|f| (f, text)), actions);
        }
    }

    fn origin_for(&self, align: Alignment, hi: i32) -> i32 {
        match align {
            Alignment::Left => self.settings.border_left + self.reserve_left,
            Alignment::Center => self.settings.center_x - hi / 2,
            Alignment::Right => {
                self.settings.width - self.settings.border_right - self.reserve_right - hi
            }
        }
    }

    /// Append a run of `width` pixels at the pen: translate the block if its
    /// origin moves, fill the background, draw glyphs, extend decoration.
    fn append(
        &mut self,
        width: i32,
        glyphs: Option<(usize, String)>,
        actions: &mut ActionContext,
    ) {
        debug_assert!(width >= 0);
        let align = self.align;
        let idx = align.index();
        let (start, end, new_hi, new_origin, old_origin, old_lo, old_hi) = {
            let block = &self.blocks[idx];
            let start = block.pen;
            let end = start + width;
            let new_hi = block.hi.max(end);
            (
                start,
                end,
                new_hi,
                self.origin_for(align, new_hi),
                block.origin,
                block.lo,
                block.hi,
            )
        };
        if new_origin != old_origin {
            if old_hi > old_lo {
                self.surface
                    .copy_band(old_origin + old_lo, new_origin + old_lo, old_hi - old_lo);
            }
            actions.set_alignment_start(align, new_origin);
        }
        let abs = new_origin + start;
        if self.style.bg != self.settings.background && width > 0 {
            self.surface
                .fill_rect(abs, 0, width, self.settings.height, self.style.bg);
        }
        if let Some((font, text)) = glyphs {
            let metrics = self.shaper.metrics(font);
            let baseline =
                self.settings.center_y + metrics.ascent / 2 - metrics.descent + metrics.offset;
            self.surface.glyph_run(abs, baseline, font, &text, self.style.fg);
        }
        let block = &mut self.blocks[idx];
        block.origin = new_origin;
        block.pen = end;
        block.hi = new_hi;
        block.lo = block.lo.min(start);
        if width > 0 {
            if self.style.underline && self.settings.underline.size > 0 {
                let seg = extend_segment(
                    &mut self.blocks[idx].underline,
                    start,
                    end,
                    self.style.underline_color,
                );
                self.emit_underline(align, seg);
            }
            if self.style.overline && self.settings.overline.size > 0 {
                let seg = extend_segment(
                    &mut self.blocks[idx].overline,
                    start,
                    end,
                    self.style.overline_color,
                );
                self.emit_overline(align, seg);
            }
        }
    }

    fn flush_segments(&mut self, align: Alignment) {
        let underline = self.blocks[align.index()].underline.take();
        let overline = self.blocks[align.index()].overline.take();
        self.emit_underline(align, underline);
        self.emit_overline(align, overline);
    }

    fn emit_underline(&mut self, align: Alignment, seg: Option<Segment>) {
        if let Some(seg) = seg {
            let y = self.settings.height - self.settings.border_bottom - self.settings.underline.size;
            self.emit_line(align, seg, y, self.settings.underline.size);
        }
    }

    fn emit_overline(&mut self, align: Alignment, seg: Option<Segment>) {
        if let Some(seg) = seg {
            self.emit_line(align, seg, self.settings.border_top, self.settings.overline.size);
        }
    }

    fn emit_line(&mut self, align: Alignment, seg: Segment, y: i32, size: i32) {
        if seg.end > seg.start && size > 0 {
            let origin = self.blocks[align.index()].origin;
            self.surface
                .fill_rect(origin + seg.start, y, seg.end - seg.start, size, seg.color);
        }
    }
}

fn default_style(settings: &ContextSettings) -> Style {
    Style {
        fg: settings.foreground,
        bg: settings.background,
        font: None,
        underline: false,
        overline: false,
        underline_color: settings.underline.color,
        overline_color: settings.overline.color,
    }
}

/// Grow the pending segment when the new span continues it with the same
/// color; otherwise hand back the finished segment for emission.
fn extend_segment(
    pending: &mut Option<Segment>,
    start: i32,
    end: i32,
    color: Color,
) -> Option<Segment> {
    match pending {
        Some(seg) if seg.end == start && seg.color == color => {
            seg.end = end;
            None
        }
        _ => pending.replace(Segment { start, end, color }),
    }
}

/// Fixed-metrics shaper shared by the render tests: every char is 8 pixels
/// wide in font 0 and 6 pixels in font 1.
#[cfg(test)]
pub(crate) mod tests_support {
    use super::{FontMetrics, TextShaper};

    pub(crate) struct FixedShaper;

    impl TextShaper for FixedShaper {
        fn num_fonts(&self) -> usize {
            2
        }

        fn match_char(&self, preferred: Option<usize>, _ch: char) -> Option<usize> {
            Some(preferred.unwrap_or(0))
        }

        fn advance(&self, font: usize, _ch: char) -> i32 {
            if font == 0 {
                8
            } else {
                6
            }
        }

        fn metrics(&self, _font: usize) -> FontMetrics {
            FontMetrics {
                ascent: 10,
                descent: 2,
                offset: 0,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::FixedShaper;
    use super::*;
    use crate::render::surface::{Primitive, RecordingSurface};
    use pgbar_core::actions::ActionContext;

    fn settings() -> ContextSettings {
        ContextSettings {
            width: 100,
            height: 24,
            center_x: 50,
            center_y: 12,
            border_left: 0,
            border_right: 0,
            border_top: 0,
            border_bottom: 0,
            background: Color::parse("#000000").unwrap(),
            foreground: Color::parse("#ffffff").unwrap(),
            underline: LineStyle {
                size: 2,
                color: Color::parse("#00ff00").unwrap(),
            },
            overline: LineStyle {
                size: 1,
                color: Color::parse("#0000ff").unwrap(),
            },
        }
    }

    fn context() -> DrawContext<RecordingSurface, FixedShaper> {
        DrawContext::new(RecordingSurface::default(), FixedShaper, settings())
    }

    #[test]
    fn styled_text_with_underline_segment() {
        // E1: %{F#ff0000}A%{F-}%{+u}B%{-u} on a left block
        let mut ctx = context();
        let mut actions = ActionContext::new();
        ctx.begin(&mut actions);
        let red = Color::parse("#ff0000").unwrap();
        ctx.set_foreground(ColorValue::Set(red));
        ctx.text("A", &mut actions);
        ctx.set_foreground(ColorValue::Reset);
        ctx.set_underline(true);
        ctx.text("B", &mut actions);
        ctx.set_underline(false);
        ctx.finish(&mut actions);

        let ops = &ctx.surface.ops;
        // background clear, glyphs A, glyphs B, underline under B
        assert_eq!(
            ops[1],
            Primitive::Glyphs {
                x: 0,
                baseline: 12 + 5 - 2,
                font: 0,
                text: "A".into(),
                color: red,
            }
        );
        assert_eq!(
            ops[2],
            Primitive::Glyphs {
                x: 8,
                baseline: 15,
                font: 0,
                text: "B".into(),
                color: settings().foreground,
            }
        );
        assert_eq!(
            ops[3],
            Primitive::Fill {
                x: 8,
                y: 24 - 2,
                width: 8,
                height: 2,
                color: settings().underline.color,
            }
        );
        assert_eq!(ops.len(), 4);
    }

    #[test]
    fn underline_coalesces_across_runs() {
        let mut ctx = context();
        let mut actions = ActionContext::new();
        ctx.begin(&mut actions);
        ctx.set_underline(true);
        ctx.text("AB", &mut actions);
        ctx.set_font(FontValue::Index(2));
        ctx.text("C", &mut actions);
        ctx.set_underline(false);
        ctx.finish(&mut actions);
        // one merged underline rect across both subruns: 2*8 + 6 wide
        let fills: Vec<_> = ctx
            .surface
            .ops
            .iter()
            .skip(1)
            .filter(|p| matches!(p, Primitive::Fill { .. }))
            .collect();
        assert_eq!(
            fills,
            vec![&Primitive::Fill {
                x: 0,
                y: 22,
                width: 22,
                height: 2,
                color: settings().underline.color,
            }]
        );
    }

    #[test]
    fn action_block_with_negative_offset() {
        // E2: %{A1:do:}X%{O-10}Y%{A}
        let mut ctx = context();
        let mut actions = ActionContext::new();
        ctx.begin(&mut actions);
        ctx.begin_action(MouseButton::Left, "do".into(), &mut actions);
        ctx.text("X", &mut actions);
        ctx.offset(-10, &mut actions);
        ctx.text("Y", &mut actions);
        // Y is 8 wide under FixedShaper font 0; close at pen -2 + 8 = 6
        ctx.end_action(&mut actions);
        ctx.finish(&mut actions);
        assert_eq!(actions.num_unclosed(), 0);
        let action = actions.get(0).unwrap();
        assert_eq!(action.start_x, -2);
        assert_eq!(action.end_x, 8);
        assert_eq!(action.cmd, "do");
    }

    #[test]
    fn right_block_translates_as_it_grows() {
        let mut ctx = context();
        let mut actions = ActionContext::new();
        ctx.begin(&mut actions);
        ctx.set_alignment(Alignment::Right, &mut actions);
        ctx.text("A", &mut actions);
        // origin moved 100 -> 92, nothing to copy yet, glyph at 92
        assert_eq!(
            ctx.surface.ops[1],
            Primitive::Glyphs {
                x: 92,
                baseline: 15,
                font: 0,
                text: "A".into(),
                color: settings().foreground,
            }
        );
        ctx.text("B", &mut actions);
        // block grew to 16: band [92, 100) copied to 84, new glyph at 92+8
        assert_eq!(
            ctx.surface.ops[2],
            Primitive::Copy {
                src_x: 92,
                dst_x: 84,
                width: 8,
            }
        );
        assert_eq!(
            ctx.surface.ops[3],
            Primitive::Glyphs {
                x: 92,
                baseline: 15,
                font: 0,
                text: "B".into(),
                color: settings().foreground,
            }
        );
        ctx.finish(&mut actions);
    }

    #[test]
    fn center_block_centers_on_the_midpoint() {
        let mut ctx = context();
        let mut actions = ActionContext::new();
        ctx.begin(&mut actions);
        ctx.set_alignment(Alignment::Center, &mut actions);
        ctx.text("AB", &mut actions);
        ctx.finish(&mut actions);
        // 16 px wide block centered on 50 -> origin 42
        assert_eq!(
            ctx.surface.ops[1],
            Primitive::Glyphs {
                x: 42,
                baseline: 15,
                font: 0,
                text: "AB".into(),
                color: settings().foreground,
            }
        );
    }

    #[test]
    fn right_actions_hit_test_after_translation() {
        let mut ctx = context();
        let mut actions = ActionContext::new();
        ctx.begin(&mut actions);
        ctx.set_alignment(Alignment::Right, &mut actions);
        ctx.begin_action(MouseButton::Left, "cmd".into(), &mut actions);
        ctx.text("AB", &mut actions);
        ctx.end_action(&mut actions);
        ctx.finish(&mut actions);
        // block is [84, 100): relative [0, 16) with origin 84
        assert_eq!(actions.action_at(MouseButton::Left, 90), 0);
        assert_eq!(actions.action_at(MouseButton::Left, 80), -1);
    }

    #[test]
    fn positive_offset_is_a_blank_run_extending_decoration() {
        let mut ctx = context();
        let mut actions = ActionContext::new();
        ctx.begin(&mut actions);
        ctx.set_underline(true);
        ctx.text("A", &mut actions);
        ctx.offset(10, &mut actions);
        ctx.text("B", &mut actions);
        ctx.set_underline(false);
        let fills: Vec<_> = ctx
            .surface
            .ops
            .iter()
            .skip(1)
            .filter(|p| matches!(p, Primitive::Fill { .. }))
            .collect();
        assert_eq!(
            fills,
            vec![&Primitive::Fill {
                x: 0,
                y: 22,
                width: 26,
                height: 2,
                color: settings().underline.color,
            }]
        );
    }

    #[test]
    fn tray_slot_records_anchor_and_pads() {
        let mut ctx = context();
        let mut actions = ActionContext::new();
        ctx.begin(&mut actions);
        ctx.text("A", &mut actions);
        ctx.tray_slot(20, &mut actions);
        ctx.text("B", &mut actions);
        let anchor = ctx.finish(&mut actions);
        assert_eq!(anchor, Some(8));
        assert_eq!(
            ctx.surface.ops.last().unwrap(),
            &Primitive::Glyphs {
                x: 28,
                baseline: 15,
                font: 0,
                text: "B".into(),
                color: settings().foreground,
            }
        );
    }
}
