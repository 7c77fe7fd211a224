use crate::color::Color;
use crate::format::{
    Alignment, AttrAction, Attribute, ColorValue, FontValue, MouseButton, Tag, TagSink,
};

/// Lexer/decoder for the `%{...}` in-band markup.
///
/// Every non-tag byte is forwarded as text in order. Recovery is local: an
/// unknown letter skips that letter, an unterminated `%{` degrades to literal
/// text, an unmatched action close is dropped. A parse never fails.
#[derive(Debug, Default)]
pub struct Parser {
    open_actions: Vec<MouseButton>,
}

impl Parser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of action blocks opened but not closed by the last parse.
    #[must_use]
    pub fn unclosed_actions(&self) -> usize {
        self.open_actions.len()
    }

    pub fn parse(&mut self, input: &str, sink: &mut impl TagSink) {
        self.open_actions.clear();
        let mut rest = input;
        while !rest.is_empty() {
            if let Some(after_open) = rest.strip_prefix("%{") {
                if let Some(end) = after_open.find('}') {
                    self.group(&after_open[..end], sink);
                    rest = &after_open[end + 1..];
                } else {
                    log::warn!(target: "parser", "Unterminated tag in {input:?}");
                    sink.text("%{");
                    rest = after_open;
                }
            } else {
                let len = rest.find("%{").unwrap_or(rest.len());
                sink.text(&rest[..len]);
                rest = &rest[len..];
            }
        }
        if !self.open_actions.is_empty() {
            log::warn!(
                target: "parser",
                "{} unclosed action block(s) in {input:?}",
                self.open_actions.len()
            );
        }
    }

    /// Decode the bodies inside one `%{ ... }` group.
    fn group(&mut self, body: &str, sink: &mut impl TagSink) {
        let mut rest = body;
        loop {
            rest = rest.trim_start_matches(' ');
            let Some(letter) = rest.chars().next() else {
                break;
            };
            rest = &rest[letter.len_utf8()..];
            match letter {
                'F' => {
                    let value = take_value(&mut rest);
                    sink.tag(Tag::Foreground(parse_color(value)));
                }
                'B' => {
                    let value = take_value(&mut rest);
                    sink.tag(Tag::Background(parse_color(value)));
                }
                'u' => {
                    let value = take_value(&mut rest);
                    sink.tag(Tag::UnderlineColor(parse_color(value)));
                }
                'o' => {
                    let value = take_value(&mut rest);
                    sink.tag(Tag::OverlineColor(parse_color(value)));
                }
                'T' => {
                    let value = take_value(&mut rest);
                    sink.tag(Tag::Font(parse_font_index(value)));
                }
                'O' => {
                    let value = take_value(&mut rest);
                    match value.parse::<i32>() {
                        Ok(px) => sink.tag(Tag::Offset(px)),
                        Err(_) => {
                            log::warn!(target: "parser", "Bad offset value {value:?}");
                        }
                    }
                }
                'R' => sink.tag(Tag::Reverse),
                'l' => sink.tag(Tag::Align(Alignment::Left)),
                'c' => sink.tag(Tag::Align(Alignment::Center)),
                'r' => sink.tag(Tag::Align(Alignment::Right)),
                '+' | '-' | '!' => {
                    let value = take_value(&mut rest);
                    let action = match letter {
                        '+' => AttrAction::Set,
                        '-' => AttrAction::Unset,
                        _ => AttrAction::Toggle,
                    };
                    match value.chars().next() {
                        Some('u') => sink.tag(Tag::Attr(action, Attribute::Underline)),
                        Some('o') => sink.tag(Tag::Attr(action, Attribute::Overline)),
                        other => {
                            log::warn!(target: "parser", "Unrecognized attribute {other:?}");
                        }
                    }
                }
                'P' => {
                    let value = take_value(&mut rest);
                    match value.strip_prefix(':').unwrap_or(value) {
                        "R" => sink.tag(Tag::Reset),
                        "t" => sink.tag(Tag::TraySlot),
                        other => {
                            log::warn!(target: "parser", "Unrecognized control tag {other:?}");
                        }
                    }
                }
                'A' => self.action(&mut rest, sink),
                other => {
                    // Skip the letter and whatever value it carried
                    let skipped = take_value(&mut rest);
                    log::warn!(
                        target: "parser",
                        "Unrecognized token '{other}' (value {skipped:?})"
                    );
                }
            }
        }
    }

    /// `A<btn>:<cmd>:` opens a block, a bare `A` closes the innermost one.
    fn action(&mut self, rest: &mut &str, sink: &mut impl TagSink) {
        let button = match rest.as_bytes().first().copied() {
            Some(b @ b'1'..=b'9') => {
                let Some(button) = MouseButton::from_code(b - b'0') else {
                    log::warn!(target: "parser", "Bad action button '{}'", b as char);
                    *rest = &rest[1..];
                    return;
                };
                *rest = &rest[1..];
                Some(button)
            }
            Some(b':') => None,
            _ => {
                // Closing tag
                if self.open_actions.pop().is_none() {
                    log::warn!(target: "parser", "Unmatched action close");
                } else {
                    sink.tag(Tag::ActionClose);
                }
                return;
            }
        };
        let Some((command, consumed)) = take_command(rest) else {
            log::warn!(target: "parser", "Unterminated action command in {rest:?}");
            *rest = "";
            return;
        };
        *rest = &rest[consumed..];
        let button = button.unwrap_or(MouseButton::Left);
        self.open_actions.push(button);
        sink.tag(Tag::ActionOpen { button, command });
    }
}

/// A tag value runs to the next space or the end of the group.
fn take_value<'a>(rest: &mut &'a str) -> &'a str {
    let len = rest.find(' ').unwrap_or(rest.len());
    let value = &rest[..len];
    *rest = &rest[len..];
    value
}

/// Read `:<cmd>:` with `\:` escapes, returning the unescaped command and the
/// number of input bytes consumed. `None` if the command is unterminated.
fn take_command(rest: &str) -> Option<(String, usize)> {
    let inner = rest.strip_prefix(':')?;
    let mut command = String::new();
    let mut chars = inner.char_indices();
    while let Some((i, ch)) = chars.next() {
        match ch {
            '\\' => {
                if let Some((_, next)) = chars.next() {
                    if next != ':' {
                        command.push('\\');
                    }
                    command.push(next);
                }
            }
            ':' => return Some((command, i + 2)),
            _ => command.push(ch),
        }
    }
    None
}

fn parse_color(value: &str) -> ColorValue {
    if value.is_empty() || value.starts_with('-') {
        return ColorValue::Reset;
    }
    match Color::parse(value) {
        Ok(color) => ColorValue::Set(color),
        Err(_) => {
            log::warn!(target: "parser", "Bad color literal {value:?}, treating as reset");
            ColorValue::Reset
        }
    }
}

fn parse_font_index(value: &str) -> FontValue {
    match value.parse::<usize>() {
        Ok(index) if index >= 1 => FontValue::Index(index),
        _ => FontValue::Reset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{CollectSink, Element};

    fn parse(input: &str) -> Vec<Element> {
        let mut sink = CollectSink::default();
        Parser::new().parse(input, &mut sink);
        sink.elements
    }

    #[test]
    fn styled_module_output() {
        // E1
        let elements = parse("%{F#ff0000}A%{F-}%{+u}B%{-u}");
        assert_eq!(
            elements,
            vec![
                Element::Tag(Tag::Foreground(ColorValue::Set(
                    Color::parse("#ff0000").unwrap()
                ))),
                Element::Text("A".into()),
                Element::Tag(Tag::Foreground(ColorValue::Reset)),
                Element::Tag(Tag::Attr(AttrAction::Set, Attribute::Underline)),
                Element::Text("B".into()),
                Element::Tag(Tag::Attr(AttrAction::Unset, Attribute::Underline)),
            ]
        );
    }

    #[test]
    fn grouped_bodies_share_one_brace_pair() {
        let elements = parse("%{F#fff B#000 +o}x");
        assert_eq!(
            elements,
            vec![
                Element::Tag(Tag::Foreground(ColorValue::Set(
                    Color::parse("#fff").unwrap()
                ))),
                Element::Tag(Tag::Background(ColorValue::Set(
                    Color::parse("#000").unwrap()
                ))),
                Element::Tag(Tag::Attr(AttrAction::Set, Attribute::Overline)),
                Element::Text("x".into()),
            ]
        );
    }

    #[test]
    fn action_open_and_close() {
        let elements = parse("%{A1:do:}X%{A}");
        assert_eq!(
            elements,
            vec![
                Element::Tag(Tag::ActionOpen {
                    button: MouseButton::Left,
                    command: "do".into()
                }),
                Element::Text("X".into()),
                Element::Tag(Tag::ActionClose),
            ]
        );
    }

    #[test]
    fn action_button_defaults_to_left() {
        let elements = parse("%{A:cmd:}%{A}");
        assert!(matches!(
            elements[0],
            Element::Tag(Tag::ActionOpen {
                button: MouseButton::Left,
                ..
            })
        ));
    }

    #[test]
    fn action_command_unescapes_colons() {
        let elements = parse(r"%{A3:mpc seek \:10:}x%{A}");
        assert_eq!(
            elements[0],
            Element::Tag(Tag::ActionOpen {
                button: MouseButton::Right,
                command: "mpc seek :10".into()
            })
        );
    }

    #[test]
    fn unmatched_close_is_dropped() {
        let elements = parse("x%{A}y");
        assert_eq!(
            elements,
            vec![Element::Text("x".into()), Element::Text("y".into())]
        );
    }

    #[test]
    fn unterminated_tag_is_literal_text() {
        let elements = parse("a%{F#ff0000");
        assert_eq!(elements, vec![Element::Text("a%{F#ff0000".into())]);
    }

    #[test]
    fn unknown_letter_skips_only_that_body() {
        let elements = parse("%{X123 F-}ok");
        assert_eq!(
            elements,
            vec![
                Element::Tag(Tag::Foreground(ColorValue::Reset)),
                Element::Text("ok".into()),
            ]
        );
    }

    #[test]
    fn offsets_and_alignment() {
        let elements = parse("%{l}%{O-10}%{c}%{O24}");
        assert_eq!(
            elements,
            vec![
                Element::Tag(Tag::Align(Alignment::Left)),
                Element::Tag(Tag::Offset(-10)),
                Element::Tag(Tag::Align(Alignment::Center)),
                Element::Tag(Tag::Offset(24)),
            ]
        );
    }

    #[test]
    fn control_tags() {
        let elements = parse("%{P:R}%{P:t}");
        assert_eq!(
            elements,
            vec![
                Element::Tag(Tag::Reset),
                Element::Tag(Tag::TraySlot),
            ]
        );
    }

    #[test]
    fn font_selection() {
        let elements = parse("%{T2}x%{T-}");
        assert_eq!(
            elements,
            vec![
                Element::Tag(Tag::Font(FontValue::Index(2))),
                Element::Text("x".into()),
                Element::Tag(Tag::Font(FontValue::Reset)),
            ]
        );
    }

    #[test]
    fn utf8_text_passes_through() {
        let elements = parse("åäö %{F-}漢");
        assert_eq!(
            elements,
            vec![
                Element::Text("åäö ".into()),
                Element::Tag(Tag::Foreground(ColorValue::Reset)),
                Element::Text("漢".into()),
            ]
        );
    }
}
