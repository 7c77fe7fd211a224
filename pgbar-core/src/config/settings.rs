use crate::color::Color;
use crate::config::{
    Config, DEFAULT_DOUBLE_CLICK_INTERVAL_MS, DEFAULT_THROTTLE_INPUT_FOR_MS,
    DEFAULT_THROTTLE_OUTPUT, DEFAULT_THROTTLE_OUTPUT_FOR_MS,
};
use crate::error::{Error, Result};
use crate::format::{Alignment, MouseButton};
use crate::geometry::Extent;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum Position {
    #[default]
    Top,
    Bottom,
}

#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Border {
    pub size: i32,
    pub color: Color,
}

#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Borders {
    pub left: Border,
    pub right: Border,
    pub top: Border,
    pub bottom: Border,
}

#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct LineStyle {
    pub size: i32,
    pub color: Color,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct SideValues {
    pub left: usize,
    pub right: usize,
}

/// A loadable font: file path, pixel size and a vertical offset applied to
/// the computed baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontCfg {
    pub path: String,
    pub size: String,
    pub offset: i32,
}

impl FontCfg {
    /// `path;size;offset`, with size and offset optional.
    fn parse(value: &str) -> Option<Self> {
        let mut parts = value.split(';');
        let path = parts.next()?.trim();
        if path.is_empty() {
            return None;
        }
        let size = parts.next().unwrap_or("12").trim();
        let offset = parts.next().unwrap_or("0").trim().parse().ok()?;
        Some(Self {
            path: path.to_owned(),
            size: size.to_owned(),
            offset,
        })
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum TrayPosition {
    #[default]
    None,
    Left,
    Center,
    Right,
    /// Anchored by the `%{P:t}` marker of an `internal/tray` module.
    Module,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TraySettings {
    pub position: TrayPosition,
    /// Icon cell size, clients are resized to this square.
    pub client_size: u16,
    pub spacing: u16,
    pub background: Color,
    pub foreground: Color,
}

impl Default for TraySettings {
    fn default() -> Self {
        Self {
            position: TrayPosition::None,
            client_size: 16,
            spacing: 2,
            background: Color::TRANSPARENT,
            foreground: Color::from_premultiplied(0xFFFF_FFFF),
        }
    }
}

/// Everything about the bar that is immutable after startup.
#[derive(Debug, Clone, PartialEq)]
pub struct BarSettings {
    pub name: String,
    pub monitor: Option<String>,
    pub position: Position,
    pub width: Extent,
    pub height: Extent,
    pub offset_x: Extent,
    pub offset_y: Extent,
    pub background: Color,
    pub foreground: Color,
    pub underline: LineStyle,
    pub overline: LineStyle,
    pub borders: Borders,
    pub padding: SideValues,
    pub module_margin: SideValues,
    pub separator: String,
    pub fonts: Vec<FontCfg>,
    pub wm_name: Option<String>,
    pub wm_class: String,
    pub override_redirect: bool,
    pub double_click_interval: u64,
    pub cursor_click: Option<String>,
    pub cursor_scroll: Option<String>,
    /// Indexed by `MouseButton::code()`.
    pub fallback_click: [Option<String>; MouseButton::COUNT],
    pub tray: TraySettings,
    pub modules: [Vec<String>; 3],
    pub throttle_output: usize,
    pub throttle_output_for: u64,
    pub throttle_input_for: u64,
    pub enable_ipc: bool,
}

impl Default for BarSettings {
    fn default() -> Self {
        Self {
            name: "main".to_owned(),
            monitor: None,
            position: Position::Top,
            width: Extent::Percentage(100.0),
            height: Extent::Pixels(24),
            offset_x: Extent::Pixels(0),
            offset_y: Extent::Pixels(0),
            background: Color::parse("#000000").expect("static color"),
            foreground: Color::parse("#ffffff").expect("static color"),
            underline: LineStyle::default(),
            overline: LineStyle::default(),
            borders: Borders::default(),
            padding: SideValues::default(),
            module_margin: SideValues::default(),
            separator: String::new(),
            fonts: Vec::new(),
            wm_name: None,
            wm_class: "pgbar".to_owned(),
            override_redirect: false,
            double_click_interval: DEFAULT_DOUBLE_CLICK_INTERVAL_MS,
            cursor_click: None,
            cursor_scroll: None,
            fallback_click: Default::default(),
            tray: TraySettings::default(),
            modules: [Vec::new(), Vec::new(), Vec::new()],
            throttle_output: DEFAULT_THROTTLE_OUTPUT,
            throttle_output_for: DEFAULT_THROTTLE_OUTPUT_FOR_MS,
            throttle_input_for: DEFAULT_THROTTLE_INPUT_FOR_MS,
            enable_ipc: true,
        }
    }
}

impl BarSettings {
    pub fn load(cfg: &Config, bar_name: &str) -> Result<Self> {
        let mut out = Self {
            name: bar_name.to_owned(),
            ..Self::default()
        };
        let bar = cfg.bar_section().to_owned();
        let bar = bar.as_str();

        out.monitor = cfg.opt(bar, "monitor")?;
        if cfg.get_bool(bar, "bottom", false)? {
            out.position = Position::Bottom;
        }
        out.width = cfg.get_extent(bar, "width", out.width)?;
        out.height = cfg.get_extent(bar, "height", out.height)?;
        out.offset_x = cfg.get_extent(bar, "offset-x", out.offset_x)?;
        out.offset_y = cfg.get_extent(bar, "offset-y", out.offset_y)?;
        out.background = cfg.get_color(bar, "background", out.background)?;
        out.foreground = cfg.get_color(bar, "foreground", out.foreground)?;

        out.underline.size = cfg.get_int(bar, "underline-size", 0)? as i32;
        out.underline.color = cfg.get_color(bar, "underline-color", out.foreground)?;
        out.overline.size = cfg.get_int(bar, "overline-size", 0)? as i32;
        out.overline.color = cfg.get_color(bar, "overline-color", out.foreground)?;

        let border_size = cfg.get_int(bar, "border-size", 0)? as i32;
        let border_color = cfg.get_color(bar, "border-color", out.background)?;
        for (edge, border) in [
            ("left", &mut out.borders.left),
            ("right", &mut out.borders.right),
            ("top", &mut out.borders.top),
            ("bottom", &mut out.borders.bottom),
        ] {
            border.size = cfg.get_int(bar, &format!("border-{edge}-size"), i64::from(border_size))?
                as i32;
            border.color = cfg.get_color(bar, &format!("border-{edge}-color"), border_color)?;
        }

        out.padding.left = cfg.get_int(bar, "padding-left", 0)?.max(0) as usize;
        out.padding.right = cfg.get_int(bar, "padding-right", 0)?.max(0) as usize;
        out.module_margin.left = cfg.get_int(bar, "module-margin-left", 0)?.max(0) as usize;
        out.module_margin.right = cfg.get_int(bar, "module-margin-right", 0)?.max(0) as usize;
        out.separator = cfg.get_or(bar, "separator", "")?;

        for value in cfg.get_list(bar, "font")? {
            let font = FontCfg::parse(&value).ok_or_else(|| Error::ConfigValue {
                section: bar.to_owned(),
                key: format!("font-{}", out.fonts.len()),
                reason: format!("expected `path;size;offset`, got '{value}'"),
            })?;
            out.fonts.push(font);
        }

        out.wm_name = cfg.opt(bar, "wm-name")?;
        out.wm_class = cfg.get_or(bar, "wm-class", &out.wm_class)?;
        out.override_redirect = cfg.get_bool(bar, "override-redirect", false)?;
        out.double_click_interval = cfg
            .get_int(bar, "double-click-interval", out.double_click_interval as i64)?
            .max(0) as u64;
        out.cursor_click = cfg.opt(bar, "cursor-click")?;
        out.cursor_scroll = cfg.opt(bar, "cursor-scroll")?;

        for (key, button) in [
            ("click-left", MouseButton::Left),
            ("click-middle", MouseButton::Middle),
            ("click-right", MouseButton::Right),
            ("scroll-up", MouseButton::ScrollUp),
            ("scroll-down", MouseButton::ScrollDown),
            ("double-click-left", MouseButton::DoubleLeft),
            ("double-click-middle", MouseButton::DoubleMiddle),
            ("double-click-right", MouseButton::DoubleRight),
        ] {
            out.fallback_click[button.code() as usize] = cfg.opt(bar, key)?;
        }

        out.tray.position = match cfg.get_or(bar, "tray-position", "none")?.as_str() {
            "none" => TrayPosition::None,
            "left" => TrayPosition::Left,
            "center" => TrayPosition::Center,
            "right" => TrayPosition::Right,
            "module" => TrayPosition::Module,
            other => {
                return Err(Error::ConfigValue {
                    section: bar.to_owned(),
                    key: "tray-position".to_owned(),
                    reason: format!("expected none/left/center/right/module, got '{other}'"),
                })
            }
        };
        out.tray.client_size = cfg.get_int(bar, "tray-size", i64::from(out.tray.client_size))?
            .max(1) as u16;
        out.tray.spacing =
            cfg.get_int(bar, "tray-spacing", i64::from(out.tray.spacing))?.max(0) as u16;
        out.tray.background = cfg.get_color(bar, "tray-background", out.background)?;
        out.tray.foreground = cfg.get_color(bar, "tray-foreground", out.foreground)?;

        out.modules[Alignment::Left.index()] = cfg.get_names(bar, "modules-left")?;
        out.modules[Alignment::Center.index()] = cfg.get_names(bar, "modules-center")?;
        out.modules[Alignment::Right.index()] = cfg.get_names(bar, "modules-right")?;

        out.throttle_output = cfg
            .get_int("settings", "throttle-output", out.throttle_output as i64)?
            .max(1) as usize;
        out.throttle_output_for = cfg
            .get_int(
                "settings",
                "throttle-output-for",
                out.throttle_output_for as i64,
            )?
            .max(0) as u64;
        out.throttle_input_for = cfg
            .get_int(
                "settings",
                "throttle-input-for",
                out.throttle_input_for as i64,
            )?
            .max(0) as u64;
        out.enable_ipc = cfg.get_bool(bar, "enable-ipc", out.enable_ipc)?;

        Ok(out)
    }

    /// The WM_NAME the bar window gets, `pgbar-<bar>_<monitor>` by default.
    #[must_use]
    pub fn window_name(&self, monitor: &str) -> String {
        self.wm_name
            .clone()
            .unwrap_or_else(|| format!("pgbar-{}_{}", self.name, monitor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
[colors]
bg = #cc000000

[bar/test]
monitor = DP-1
bottom = true
width = 90%
height = 28
background = ${colors.bg}
border-size = 2
border-top-size = 3
underline-size = 2
padding-left = 1
separator = |
font-0 = /tmp/font.ttf;14;-1
modules-left = date
modules-right = tray clock
click-right = notify-send hi
tray-position = right
tray-size = 20

[settings]
throttle-output = 8
throttle-output-for = 25
";

    #[test]
    fn loads_the_full_settings_block() {
        let cfg = Config::from_str(SAMPLE, "test").unwrap();
        let s = BarSettings::load(&cfg, "test").unwrap();
        assert_eq!(s.monitor.as_deref(), Some("DP-1"));
        assert_eq!(s.position, Position::Bottom);
        assert_eq!(s.width, Extent::Percentage(90.0));
        assert_eq!(s.height, Extent::Pixels(28));
        assert_eq!(s.background, Color::parse("#cc000000").unwrap());
        assert_eq!(s.borders.left.size, 2);
        assert_eq!(s.borders.top.size, 3);
        assert_eq!(s.underline.size, 2);
        assert_eq!(s.padding.left, 1);
        assert_eq!(s.separator, "|");
        assert_eq!(
            s.fonts,
            vec![FontCfg {
                path: "/tmp/font.ttf".into(),
                size: "14".into(),
                offset: -1
            }]
        );
        assert_eq!(s.modules[0], vec!["date"]);
        assert_eq!(s.modules[2], vec!["tray", "clock"]);
        assert_eq!(
            s.fallback_click[MouseButton::Right.code() as usize].as_deref(),
            Some("notify-send hi")
        );
        assert_eq!(s.tray.position, TrayPosition::Right);
        assert_eq!(s.tray.client_size, 20);
        assert_eq!(s.throttle_output, 8);
        assert_eq!(s.throttle_output_for, 25);
    }

    #[test]
    fn window_name_defaults_to_bar_and_monitor() {
        let s = BarSettings::default();
        assert_eq!(s.window_name("DP-1"), "pgbar-main_DP-1");
    }
}
