use x11rb::protocol::xproto::Window;

use pgbar_core::actions::ActionContext;
use pgbar_core::config::{BarSettings, Borders};
use pgbar_core::format::parser::Parser;
use pgbar_core::format::{AttrAction, Attribute, Tag, TagSink};
use pgbar_core::geometry::BarGeometry;

use crate::error::Result;
use crate::render::context::{ContextSettings, DrawContext};
use crate::render::font::FontSet;
use crate::render::surface::{Surface, XSurface};
use crate::x11::call_wrapper::CallWrapper;
use crate::x11::visual::VisualInfo;

pub(crate) mod context;
pub(crate) mod font;
pub(crate) mod surface;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Edge {
    Left,
    Right,
}

/// The per-frame orchestrator: owns the pixmap surface, the drawing
/// context and the action context, and drives the parser over the combined
/// module output.
pub(crate) struct Renderer<'a> {
    window: Window,
    context: DrawContext<XSurface<'a>, &'a FontSet>,
    actions: ActionContext,
    borders: Borders,
    reserve: (i32, i32),
    tray_width: i32,
}

/// What one frame produced besides pixels.
#[derive(Debug, Copy, Clone, Default)]
pub(crate) struct FrameReport {
    /// Bar-relative x of the `%{P:t}` marker, when present.
    pub tray_anchor: Option<i32>,
}

impl<'a> Renderer<'a> {
    pub(crate) fn new(
        call_wrapper: &'a CallWrapper<'a>,
        fonts: &'a FontSet,
        vis_info: &VisualInfo,
        window: Window,
        geometry: &BarGeometry,
        settings: &BarSettings,
    ) -> Result<Self> {
        let surface = XSurface::new(
            call_wrapper,
            fonts,
            vis_info,
            window,
            geometry.width,
            geometry.height,
        )?;
        let context_settings = ContextSettings {
            width: geometry.width,
            height: geometry.height,
            center_x: geometry.center_x,
            center_y: geometry.center_y,
            border_left: settings.borders.left.size,
            border_right: settings.borders.right.size,
            border_top: settings.borders.top.size,
            border_bottom: settings.borders.bottom.size,
            background: settings.background,
            foreground: settings.foreground,
            underline: settings.underline,
            overline: settings.overline,
        };
        Ok(Self {
            window,
            context: DrawContext::new(surface, fonts, context_settings),
            actions: ActionContext::new(),
            borders: settings.borders,
            reserve: (0, 0),
            tray_width: 0,
        })
    }

    /// Reserve a strip on one edge for the next frames (the tray slot).
    pub(crate) fn reserve(&mut self, edge: Edge, width: i32) {
        match edge {
            Edge::Left => self.reserve.0 = width,
            Edge::Right => self.reserve.1 = width,
        }
        self.context.set_reserve(self.reserve.0, self.reserve.1);
    }

    /// Width the `%{P:t}` marker pads for.
    pub(crate) fn set_tray_width(&mut self, width: i32) {
        self.tray_width = width;
    }

    pub(crate) fn actions(&self) -> &ActionContext {
        &self.actions
    }

    /// Run one full frame: begin, parse and draw, borders, present.
    pub(crate) fn render(&mut self, input: &str) -> Result<FrameReport> {
        self.actions.reset();
        self.context.begin(&mut self.actions);
        let mut parser = Parser::new();
        {
            let mut sink = FrameSink {
                context: &mut self.context,
                actions: &mut self.actions,
                tray_width: self.tray_width,
            };
            parser.parse(input, &mut sink);
        }
        let tray_anchor = self.context.finish(&mut self.actions);
        self.fill_borders();
        self.context.surface_mut().present(self.window)?;
        Ok(FrameReport { tray_anchor })
    }

    fn fill_borders(&mut self) {
        let settings = *self.context.settings();
        let (width, height) = (settings.width, settings.height);
        let borders = self.borders;
        let surface = self.context.surface_mut();
        if borders.top.size > 0 {
            surface.fill_rect(
                borders.left.size,
                0,
                width - borders.left.size - borders.right.size,
                borders.top.size,
                borders.top.color,
            );
        }
        if borders.bottom.size > 0 {
            surface.fill_rect(
                borders.left.size,
                height - borders.bottom.size,
                width - borders.left.size - borders.right.size,
                borders.bottom.size,
                borders.bottom.color,
            );
        }
        if borders.left.size > 0 {
            surface.fill_rect(0, 0, borders.left.size, height, borders.left.color);
        }
        if borders.right.size > 0 {
            surface.fill_rect(
                width - borders.right.size,
                0,
                borders.right.size,
                height,
                borders.right.color,
            );
        }
    }
}

/// Routes parser output into the drawing and action contexts; the only
/// place tag semantics are interpreted.
struct FrameSink<'s, S, F> {
    context: &'s mut DrawContext<S, F>,
    actions: &'s mut ActionContext,
    tray_width: i32,
}

impl<S: Surface, F: context::TextShaper> TagSink for FrameSink<'_, S, F> {
    fn tag(&mut self, tag: Tag) {
        match tag {
            Tag::Foreground(value) => self.context.set_foreground(value),
            Tag::Background(value) => self.context.set_background(value),
            Tag::Font(value) => self.context.set_font(value),
            Tag::Reverse => self.context.reverse(),
            Tag::Offset(px) => self.context.offset(px, self.actions),
            Tag::UnderlineColor(value) => self.context.set_underline_color(value),
            Tag::OverlineColor(value) => self.context.set_overline_color(value),
            Tag::Attr(action, attribute) => {
                let current = match attribute {
                    Attribute::Underline => self.context.underline_state(),
                    Attribute::Overline => self.context.overline_state(),
                };
                let on = match action {
                    AttrAction::Set => true,
                    AttrAction::Unset => false,
                    AttrAction::Toggle => !current,
                };
                match attribute {
                    Attribute::Underline => self.context.set_underline(on),
                    Attribute::Overline => self.context.set_overline(on),
                }
            }
            Tag::Align(align) => self.context.set_alignment(align, self.actions),
            Tag::ActionOpen { button, command } => {
                self.context.begin_action(button, command, self.actions);
            }
            Tag::ActionClose => self.context.end_action(self.actions),
            Tag::Reset => self.context.reset_style(),
            Tag::TraySlot => self.context.tray_slot(self.tray_width, self.actions),
        }
    }

    fn text(&mut self, run: &str) {
        self.context.text(run, self.actions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::context::tests_support::FixedShaper;
    use crate::render::surface::{Primitive, RecordingSurface};
    use pgbar_core::color::Color;
    use pgbar_core::config::LineStyle;
    use pgbar_core::format::MouseButton;

    fn sink_render(input: &str) -> (RecordingSurface, ActionContext) {
        let settings = ContextSettings {
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
                size: 1,
                color: Color::parse("#ff00ff").unwrap(),
            },
            overline: LineStyle {
                size: 1,
                color: Color::parse("#ff00ff").unwrap(),
            },
        };
        let mut context = DrawContext::new(RecordingSurface::default(), FixedShaper, settings);
        let mut actions = ActionContext::new();
        actions.reset();
        context.begin(&mut actions);
        let mut parser = Parser::new();
        {
            let mut sink = FrameSink {
                context: &mut context,
                actions: &mut actions,
                tray_width: 16,
            };
            parser.parse(input, &mut sink);
        }
        context.finish(&mut actions);
        (core::mem::take(context.surface_mut()), actions)
    }

    #[test]
    fn full_pipeline_records_actions_and_glyphs() {
        let (surface, actions) = sink_render("%{A1:left:}ab%{A}%{r}%{A3:right:}c%{A}");
        assert_eq!(actions.num_actions(), 2);
        assert_eq!(actions.num_unclosed(), 0);
        // left action covers [0, 16), right action covers [92, 100)
        assert_eq!(actions.action_at(MouseButton::Left, 4), 0);
        assert_eq!(actions.action_at(MouseButton::Right, 95), 1);
        assert!(surface
            .ops
            .iter()
            .any(|op| matches!(op, Primitive::Glyphs { text, .. } if text == "ab")));
    }

    #[test]
    fn toggle_attribute_flows_through_state() {
        let (surface, _) = sink_render("%{!u}x%{!u}");
        assert!(surface.ops.iter().any(|op| matches!(
            op,
            Primitive::Fill { y: 23, height: 1, .. }
        )));
    }

    #[test]
    fn tray_marker_pads_by_tray_width() {
        let (surface, _) = sink_render("%{P:t}x");
        assert!(surface.ops.iter().any(|op| matches!(
            op,
            Primitive::Glyphs { x: 16, text, .. } if text == "x"
        )));
    }
}
