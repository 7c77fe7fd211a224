use std::path::{Path, PathBuf};

use crate::color::Color;
use crate::error::{Error, Result};
use crate::geometry::Extent;

mod ini;
mod settings;

pub use ini::Ini;
pub use settings::{
    Border, Borders, BarSettings, FontCfg, LineStyle, Position, SideValues, TrayPosition,
    TraySettings,
};

/// The name the daemon broadcasts itself as. Also decides where the
/// configuration is read from and how runtime paths are stamped.
pub const APP_NAME: &str = "pgbar";

/// Throttling defaults, see the `settings` section.
pub const DEFAULT_THROTTLE_OUTPUT: usize = 5;
pub const DEFAULT_THROTTLE_OUTPUT_FOR_MS: u64 = 50;
pub const DEFAULT_THROTTLE_INPUT_FOR_MS: u64 = 30;

/// Default double click interval in milliseconds.
pub const DEFAULT_DOUBLE_CLICK_INTERVAL_MS: u64 = 400;

/// A loaded configuration document plus the bar it was opened for.
///
/// All lookups expand `${section.key}` references; typed accessors attach
/// section and key to every failure.
#[derive(Debug)]
pub struct Config {
    ini: Ini,
    bar_section: String,
    path: PathBuf,
}

impl Config {
    pub fn load(path: &Path, bar_name: &str) -> Result<Self> {
        let ini = Ini::load(path)?;
        let bar_section = format!("bar/{bar_name}");
        if !ini.has_section(&bar_section) {
            return Err(Error::ConfigSection(bar_section));
        }
        Ok(Self {
            ini,
            bar_section,
            path: path.to_owned(),
        })
    }

    pub fn from_str(text: &str, bar_name: &str) -> Result<Self> {
        let ini = Ini::parse(text)?;
        let bar_section = format!("bar/{bar_name}");
        if !ini.has_section(&bar_section) {
            return Err(Error::ConfigSection(bar_section));
        }
        Ok(Self {
            ini,
            bar_section,
            path: PathBuf::new(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn bar_section(&self) -> &str {
        &self.bar_section
    }

    pub fn opt(&self, section: &str, key: &str) -> Result<Option<String>> {
        self.ini.get(&self.bar_section, section, key)
    }

    pub fn get(&self, section: &str, key: &str) -> Result<String> {
        self.opt(section, key)?.ok_or_else(|| Error::ConfigKey {
            section: section.to_owned(),
            key: key.to_owned(),
        })
    }

    pub fn get_or(&self, section: &str, key: &str, fallback: &str) -> Result<String> {
        Ok(self.opt(section, key)?.unwrap_or_else(|| fallback.to_owned()))
    }

    pub fn get_bool(&self, section: &str, key: &str, fallback: bool) -> Result<bool> {
        match self.opt(section, key)? {
            None => Ok(fallback),
            Some(v) => match v.as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                other => Err(self.bad_value(section, key, format!("expected bool, got '{other}'"))),
            },
        }
    }

    pub fn get_int(&self, section: &str, key: &str, fallback: i64) -> Result<i64> {
        match self.opt(section, key)? {
            None => Ok(fallback),
            Some(v) => v
                .parse()
                .map_err(|_| self.bad_value(section, key, format!("expected integer, got '{v}'"))),
        }
    }

    pub fn get_extent(&self, section: &str, key: &str, fallback: Extent) -> Result<Extent> {
        match self.opt(section, key)? {
            None => Ok(fallback),
            Some(v) => Extent::parse(&v).ok_or_else(|| {
                self.bad_value(section, key, format!("expected pixels or percentage, got '{v}'"))
            }),
        }
    }

    pub fn get_color(&self, section: &str, key: &str, fallback: Color) -> Result<Color> {
        match self.opt(section, key)? {
            None => Ok(fallback),
            Some(v) => {
                Color::parse(&v).map_err(|e| self.bad_value(section, key, e.to_string()))
            }
        }
    }

    /// `key-0`, `key-1`, ... until the first gap.
    pub fn get_list(&self, section: &str, key: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        loop {
            let indexed = format!("{}-{}", key, out.len());
            match self.opt(section, &indexed)? {
                Some(v) => out.push(v),
                None => return Ok(out),
            }
        }
    }

    /// Whitespace separated names, e.g. `modules-left = date cpu`.
    pub fn get_names(&self, section: &str, key: &str) -> Result<Vec<String>> {
        Ok(self
            .opt(section, key)?
            .map(|v| v.split_whitespace().map(str::to_owned).collect())
            .unwrap_or_default())
    }

    /// Shorthand for a key in the bar's own section.
    pub fn bar(&self, key: &str) -> Result<Option<String>> {
        self.ini.get(&self.bar_section, &self.bar_section, key)
    }

    fn bad_value(&self, section: &str, key: &str, reason: String) -> Error {
        Error::ConfigValue {
            section: section.to_owned(),
            key: key.to_owned(),
            reason,
        }
    }
}

/// Locate the configuration file: an explicit path wins, otherwise
/// `$XDG_CONFIG_HOME/pgbar/config` then `$HOME/.config/pgbar/config`.
pub fn find_config_file(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return if path.is_file() {
            Ok(path.to_owned())
        } else {
            Err(Error::ConfigFileFind)
        };
    }
    let mut candidates = Vec::new();
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        candidates.push(PathBuf::from(xdg).join(APP_NAME).join("config"));
    }
    if let Ok(home) = std::env::var("HOME") {
        candidates.push(
            PathBuf::from(home)
                .join(".config")
                .join(APP_NAME)
                .join("config"),
        );
    }
    candidates
        .into_iter()
        .find(|p| p.is_file())
        .ok_or(Error::ConfigFileFind)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
[bar/test]
height = 24
bottom = true
background = #222
modules-left = date  cpu
font-0 = a.ttf;12;0
font-1 = b.ttf;10;2
";

    #[test]
    fn typed_accessors() {
        let cfg = Config::from_str(SAMPLE, "test").unwrap();
        assert_eq!(cfg.get_int("bar/test", "height", 0).unwrap(), 24);
        assert!(cfg.get_bool("bar/test", "bottom", false).unwrap());
        assert_eq!(
            cfg.get_color("bar/test", "background", Color::TRANSPARENT)
                .unwrap(),
            Color::parse("#222").unwrap()
        );
        assert_eq!(cfg.get_int("bar/test", "missing", 7).unwrap(), 7);
    }

    #[test]
    fn lists_and_names() {
        let cfg = Config::from_str(SAMPLE, "test").unwrap();
        assert_eq!(
            cfg.get_list("bar/test", "font").unwrap(),
            vec!["a.ttf;12;0", "b.ttf;10;2"]
        );
        assert_eq!(
            cfg.get_names("bar/test", "modules-left").unwrap(),
            vec!["date", "cpu"]
        );
    }

    #[test]
    fn missing_bar_section_fails() {
        assert!(matches!(
            Config::from_str(SAMPLE, "other"),
            Err(Error::ConfigSection(_))
        ));
    }

    #[test]
    fn value_errors_name_the_key() {
        let cfg = Config::from_str(SAMPLE, "test").unwrap();
        let err = cfg.get_int("bar/test", "bottom", 0).unwrap_err();
        assert!(matches!(err, Error::ConfigValue { ref key, .. } if key == "bottom"));
    }
}
