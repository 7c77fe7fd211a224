use crate::config::{BarSettings, Position};
use crate::error::{Error, Result};

/// A monitor rectangle in root coordinates.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    #[must_use]
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// A size or offset value, either absolute pixels or a percentage of the
/// monitor dimension it applies to.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Extent {
    Pixels(i32),
    Percentage(f64),
}

impl Extent {
    pub fn parse(s: &str) -> Option<Self> {
        if let Some(pct) = s.strip_suffix('%') {
            pct.trim().parse::<f64>().ok().map(Extent::Percentage)
        } else {
            s.trim().parse::<i32>().ok().map(Extent::Pixels)
        }
    }

    #[must_use]
    pub fn to_pixels(self, whole: i32) -> i32 {
        match self {
            Extent::Pixels(px) => px,
            Extent::Percentage(pct) => percentage_to_value(pct, whole),
        }
    }
}

#[must_use]
pub fn percentage_to_value(percentage: f64, whole: i32) -> i32 {
    (percentage * f64::from(whole) / 100.0 + 0.5) as i32
}

/// The realized bar rectangle plus the derived center point.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BarGeometry {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    /// Includes the top and bottom border.
    pub height: i32,
    pub center_x: i32,
    pub center_y: i32,
}

/// Resolve the configured size and offsets against a monitor rectangle.
///
/// Fails when the resulting window would not fit inside the monitor.
pub fn compute_geometry(settings: &BarSettings, monitor: Rect) -> Result<BarGeometry> {
    let width = settings.width.to_pixels(monitor.width);
    let mut height = settings.height.to_pixels(monitor.height);
    let offset_x = settings.offset_x.to_pixels(monitor.width);
    let offset_y = settings.offset_y.to_pixels(monitor.height);

    height += settings.borders.top.size + settings.borders.bottom.size;

    let x = offset_x + monitor.x;
    let y = match settings.position {
        Position::Bottom => monitor.y + monitor.height - height - offset_y,
        Position::Top => offset_y + monitor.y,
    };

    if width <= 0 || height <= 0 || width > monitor.width {
        return Err(Error::GeometryOutOfBounds);
    }

    Ok(BarGeometry {
        x,
        y,
        width,
        height,
        center_x: (width - settings.borders.right.size) / 2 + settings.borders.left.size,
        center_y: (height - settings.borders.bottom.size) / 2 + settings.borders.top.size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BarSettings;

    fn settings() -> BarSettings {
        let mut s = BarSettings::default();
        s.width = Extent::Percentage(100.0);
        s.height = Extent::Pixels(24);
        s
    }

    #[test]
    fn percentages_resolve_against_the_monitor() {
        assert_eq!(percentage_to_value(50.0, 1920), 960);
        assert_eq!(percentage_to_value(33.0, 100), 33);
        assert_eq!(Extent::parse("50%"), Some(Extent::Percentage(50.0)));
        assert_eq!(Extent::parse("24"), Some(Extent::Pixels(24)));
    }

    #[test]
    fn top_bar_geometry() {
        let geom = compute_geometry(&settings(), Rect::new(0, 0, 1920, 1080)).unwrap();
        assert_eq!((geom.x, geom.y, geom.width, geom.height), (0, 0, 1920, 24));
        assert_eq!(geom.center_x, 960);
        assert_eq!(geom.center_y, 12);
    }

    #[test]
    fn bottom_bar_sits_on_the_lower_edge() {
        let mut s = settings();
        s.position = Position::Bottom;
        let geom = compute_geometry(&s, Rect::new(100, 50, 1280, 800)).unwrap();
        assert_eq!(geom.y, 50 + 800 - 24);
        assert_eq!(geom.x, 100);
    }

    #[test]
    fn borders_grow_the_height_and_shift_the_center() {
        let mut s = settings();
        s.borders.top.size = 2;
        s.borders.bottom.size = 4;
        let geom = compute_geometry(&s, Rect::new(0, 0, 1000, 1000)).unwrap();
        assert_eq!(geom.height, 30);
        assert_eq!(geom.center_y, (30 - 4) / 2 + 2);
    }

    #[test]
    fn too_wide_bar_is_rejected() {
        let mut s = settings();
        s.width = Extent::Pixels(2000);
        assert!(compute_geometry(&s, Rect::new(0, 0, 1920, 1080)).is_err());
    }
}
