use core::fmt::Write;

use crate::format::MouseButton;

/// Canonical writer for the `%{...}` markup.
///
/// Modules and the formatter build their output through this type instead of
/// splicing tag strings by hand. Open tags are tracked so `flush` can close
/// whatever was left open, in reverse nesting order.
#[derive(Debug, Default)]
pub struct Builder {
    output: String,
    actions: u32,
    backgrounds: u32,
    foregrounds: u32,
    fonts: u32,
    underlines: u32,
    overlines: u32,
}

impl Builder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.output.is_empty()
    }

    /// Append raw text without inspecting it.
    pub fn append(&mut self, text: &str) {
        self.output.push_str(text);
    }

    /// Append text that may itself carry tags, passed through untouched.
    pub fn node(&mut self, text: &str) {
        self.output.push_str(text);
    }

    pub fn space(&mut self, n: usize) {
        for _ in 0..n {
            self.output.push(' ');
        }
    }

    pub fn offset(&mut self, px: i32) {
        if px != 0 {
            let _ = write!(self.output, "%{{O{px}}}");
        }
    }

    /// `color` is the raw config literal, written through unmodified so the
    /// parser is the single place where colors are decoded and premultiplied.
    pub fn foreground(&mut self, color: &str) {
        let _ = write!(self.output, "%{{F{color}}}");
        self.foregrounds += 1;
    }

    pub fn foreground_close(&mut self) {
        if self.foregrounds > 0 {
            self.output.push_str("%{F-}");
            self.foregrounds -= 1;
        }
    }

    pub fn background(&mut self, color: &str) {
        let _ = write!(self.output, "%{{B{color}}}");
        self.backgrounds += 1;
    }

    pub fn background_close(&mut self) {
        if self.backgrounds > 0 {
            self.output.push_str("%{B-}");
            self.backgrounds -= 1;
        }
    }

    pub fn font(&mut self, index: usize) {
        if index > 0 {
            let _ = write!(self.output, "%{{T{index}}}");
            self.fonts += 1;
        }
    }

    pub fn font_close(&mut self) {
        if self.fonts > 0 {
            self.output.push_str("%{T-}");
            self.fonts -= 1;
        }
    }

    pub fn underline(&mut self, color: &str) {
        let _ = write!(self.output, "%{{u{color}}}%{{+u}}");
        self.underlines += 1;
    }

    pub fn underline_close(&mut self) {
        if self.underlines > 0 {
            self.output.push_str("%{-u}%{u-}");
            self.underlines -= 1;
        }
    }

    pub fn overline(&mut self, color: &str) {
        let _ = write!(self.output, "%{{o{color}}}%{{+o}}");
        self.overlines += 1;
    }

    pub fn overline_close(&mut self) {
        if self.overlines > 0 {
            self.output.push_str("%{-o}%{o-}");
            self.overlines -= 1;
        }
    }

    /// Open an action block. Colons inside the command are escaped.
    pub fn action(&mut self, button: MouseButton, command: &str) {
        let _ = write!(self.output, "%{{A{}:", button.code());
        for ch in command.chars() {
            if ch == ':' {
                self.output.push('\\');
            }
            self.output.push(ch);
        }
        self.output.push_str(":}");
        self.actions += 1;
    }

    pub fn action_close(&mut self) {
        if self.actions > 0 {
            self.output.push_str("%{A}");
            self.actions -= 1;
        }
    }

    /// Module boundary marker, clears all open tag state in the parser.
    pub fn style_reset(&mut self) {
        self.output.push_str("%{P:R}");
    }

    /// The reserved tray slot marker.
    pub fn tray_slot(&mut self) {
        self.output.push_str("%{P:t}");
    }

    /// Close every open tag and hand out the built string.
    pub fn flush(&mut self) -> String {
        while self.actions > 0 {
            self.action_close();
        }
        while self.underlines > 0 {
            self.underline_close();
        }
        while self.overlines > 0 {
            self.overline_close();
        }
        while self.fonts > 0 {
            self.font_close();
        }
        while self.foregrounds > 0 {
            self.foreground_close();
        }
        while self.backgrounds > 0 {
            self.background_close();
        }
        core::mem::take(&mut self.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::format::parser::Parser;
    use crate::format::{CollectSink, ColorValue, Element, Tag};

    #[test]
    fn flush_closes_in_nesting_order() {
        let mut b = Builder::new();
        b.foreground("#ff0000");
        b.underline("#00ff00");
        b.append("hi");
        assert_eq!(
            b.flush(),
            "%{F#ff0000}%{u#00ff00}%{+u}hi%{-u}%{u-}%{F-}"
        );
        assert!(b.is_empty());
    }

    #[test]
    fn action_commands_escape_colons() {
        let mut b = Builder::new();
        b.action(MouseButton::Right, "mpc seek :10");
        b.append("x");
        assert_eq!(b.flush(), r"%{A3:mpc seek \:10:}x%{A}");
    }

    #[test]
    fn built_output_parses_back() {
        let mut b = Builder::new();
        b.background("#222222");
        b.foreground("#ff0000");
        b.action(MouseButton::Left, "echo hi");
        b.append("A");
        let built = b.flush();

        let mut sink = CollectSink::default();
        Parser::new().parse(&built, &mut sink);
        assert_eq!(
            sink.elements,
            vec![
                Element::Tag(Tag::Background(ColorValue::Set(
                    Color::parse("#222222").unwrap()
                ))),
                Element::Tag(Tag::Foreground(ColorValue::Set(
                    Color::parse("#ff0000").unwrap()
                ))),
                Element::Tag(Tag::ActionOpen {
                    button: MouseButton::Left,
                    command: "echo hi".into()
                }),
                Element::Text("A".into()),
                Element::Tag(Tag::ActionClose),
                Element::Tag(Tag::Foreground(ColorValue::Reset)),
                Element::Tag(Tag::Background(ColorValue::Reset)),
            ]
        );
    }
}
