use crate::color::Color;

pub mod builder;
pub mod parser;

/// One of the three independently rendered bar columns.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Alignment {
    Left,
    Center,
    Right,
}

impl Alignment {
    pub const ALL: [Alignment; 3] = [Alignment::Left, Alignment::Center, Alignment::Right];

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Alignment::Left => 0,
            Alignment::Center => 1,
            Alignment::Right => 2,
        }
    }
}

/// Mouse buttons as used in `%{A}` tags and X button events.
///
/// The numeric codes are the ones accepted inside action tags.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum MouseButton {
    None,
    Left,
    Middle,
    Right,
    ScrollUp,
    ScrollDown,
    DoubleLeft,
    DoubleMiddle,
    DoubleRight,
}

impl MouseButton {
    /// None plus the nine tag codes.
    pub const COUNT: usize = 10;

    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            MouseButton::None => 0,
            MouseButton::Left => 1,
            MouseButton::Middle => 2,
            MouseButton::Right => 3,
            MouseButton::ScrollUp => 4,
            MouseButton::ScrollDown => 5,
            MouseButton::DoubleLeft => 6,
            MouseButton::DoubleMiddle => 7,
            MouseButton::DoubleRight => 8,
        }
    }

    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => MouseButton::Left,
            2 => MouseButton::Middle,
            3 => MouseButton::Right,
            4 => MouseButton::ScrollUp,
            5 => MouseButton::ScrollDown,
            6 => MouseButton::DoubleLeft,
            7 => MouseButton::DoubleMiddle,
            8 => MouseButton::DoubleRight,
            _ => return None,
        })
    }

    /// Map an X button press detail onto a tag button.
    #[must_use]
    pub const fn from_x_detail(detail: u8) -> Option<Self> {
        Some(match detail {
            1 => MouseButton::Left,
            2 => MouseButton::Middle,
            3 => MouseButton::Right,
            4 => MouseButton::ScrollUp,
            5 => MouseButton::ScrollDown,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn double(self) -> Self {
        match self {
            MouseButton::Left => MouseButton::DoubleLeft,
            MouseButton::Middle => MouseButton::DoubleMiddle,
            MouseButton::Right => MouseButton::DoubleRight,
            other => other,
        }
    }

    #[must_use]
    pub const fn is_double(self) -> bool {
        matches!(
            self,
            MouseButton::DoubleLeft | MouseButton::DoubleMiddle | MouseButton::DoubleRight
        )
    }
}

/// A color payload: either a concrete color or the `-` reset sentinel.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ColorValue {
    Reset,
    Set(Color),
}

/// A font payload: a 1-based index or the `-` reset sentinel.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FontValue {
    Reset,
    Index(usize),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Attribute {
    Underline,
    Overline,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AttrAction {
    Set,
    Unset,
    Toggle,
}

/// A decoded formatting tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    Foreground(ColorValue),
    Background(ColorValue),
    Font(FontValue),
    /// Swap foreground and background.
    Reverse,
    /// Horizontal pen offset in pixels, may be negative.
    Offset(i32),
    UnderlineColor(ColorValue),
    OverlineColor(ColorValue),
    Attr(AttrAction, Attribute),
    Align(Alignment),
    ActionOpen {
        button: MouseButton,
        command: String,
    },
    /// `%{A}`: close the innermost open action block.
    ActionClose,
    /// `%{P:R}`: reset tag state at a module boundary.
    Reset,
    /// `%{P:t}`: the reserved tray slot marker.
    TraySlot,
}

/// A parsed stream element; text runs keep every non-tag byte in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Element {
    Text(String),
    Tag(Tag),
}

/// The contract through which parser output reaches a consumer.
///
/// This is the typed-channel replacement for the original signal web: the
/// parser knows only this trait, consumers subscribe by implementing it.
pub trait TagSink {
    fn tag(&mut self, tag: Tag);
    fn text(&mut self, run: &str);
}

/// Sink collecting the element stream, used by tests and diagnostics.
#[derive(Debug, Default)]
pub struct CollectSink {
    pub elements: Vec<Element>,
}

impl TagSink for CollectSink {
    fn tag(&mut self, tag: Tag) {
        self.elements.push(Element::Tag(tag));
    }

    fn text(&mut self, run: &str) {
        // Merge adjacent runs so lexer chunking is not observable
        if let Some(Element::Text(prev)) = self.elements.last_mut() {
            prev.push_str(run);
        } else {
            self.elements.push(Element::Text(run.to_owned()));
        }
    }
}
