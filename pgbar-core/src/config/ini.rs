use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

/// Maximum `${...}` indirection depth before a reference chain is treated
/// as unresolvable.
const MAX_REFERENCE_DEPTH: usize = 8;

/// An INI document: sections of `key = value` pairs.
///
/// Values may reference other keys with `${section.key}`; `${BAR.key}` is a
/// shortcut for the section the document was opened for. Comment lines start
/// with `;` or `#`. Values may be wrapped in single or double quotes to keep
/// leading or trailing whitespace.
#[derive(Debug, Default)]
pub struct Ini {
    sections: HashMap<String, HashMap<String, String>>,
}

impl Ini {
    pub fn load(path: &Path) -> Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut current: Option<String> = None;
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[') {
                let name = name.strip_suffix(']').ok_or(Error::ConfigSyntax {
                    line: idx + 1,
                    reason: "unterminated section header",
                })?;
                sections.entry(name.trim().to_owned()).or_default();
                current = Some(name.trim().to_owned());
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::ConfigSyntax {
                    line: idx + 1,
                    reason: "expected `key = value`",
                });
            };
            let Some(section) = &current else {
                return Err(Error::ConfigSyntax {
                    line: idx + 1,
                    reason: "key outside of any section",
                });
            };
            sections
                .get_mut(section)
                .expect("current section exists")
                .insert(key.trim().to_owned(), unquote(value.trim()).to_owned());
        }
        Ok(Self { sections })
    }

    #[must_use]
    pub fn has_section(&self, section: &str) -> bool {
        self.sections.contains_key(section)
    }

    #[must_use]
    pub fn get_raw(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }

    /// Look a value up and expand its `${...}` references, with `bar_section`
    /// substituted for the `BAR` shortcut.
    pub fn get(&self, bar_section: &str, section: &str, key: &str) -> Result<Option<String>> {
        match self.get_raw(section, key) {
            Some(value) => self.expand(bar_section, value, 0).map(Some),
            None => Ok(None),
        }
    }

    fn expand(&self, bar_section: &str, value: &str, depth: usize) -> Result<String> {
        if !value.contains("${") {
            return Ok(value.to_owned());
        }
        if depth >= MAX_REFERENCE_DEPTH {
            return Err(Error::ConfigReference(value.to_owned()));
        }
        let mut out = String::with_capacity(value.len());
        let mut rest = value;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                return Err(Error::ConfigReference(after.to_owned()));
            };
            let reference = &after[..end];
            let Some((ref_section, ref_key)) = reference.rsplit_once('.') else {
                return Err(Error::ConfigReference(reference.to_owned()));
            };
            let ref_section = if ref_section == "BAR" {
                bar_section
            } else {
                ref_section
            };
            let resolved = self.get_raw(ref_section, ref_key).ok_or_else(|| {
                Error::ConfigReference(reference.to_owned())
            })?;
            out.push_str(&self.expand(bar_section, resolved, depth + 1)?);
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && (bytes[0] == b'"' || bytes[0] == b'\'')
        && bytes[bytes.len() - 1] == bytes[0]
    {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"
; a comment
[colors]
background = #222222
primary = ${colors.background}

[bar/main]
width = 100%
separator = " | "
background = ${colors.background}
label = ${BAR.width}
font-0 = /usr/share/fonts/a.ttf;12;0
font-1 = /usr/share/fonts/b.ttf;10;-1
"##;

    #[test]
    fn parses_sections_and_keys() {
        let ini = Ini::parse(SAMPLE).unwrap();
        assert!(ini.has_section("bar/main"));
        assert_eq!(ini.get_raw("colors", "background"), Some("#222222"));
        assert_eq!(ini.get_raw("bar/main", "width"), Some("100%"));
    }

    #[test]
    fn quoted_values_keep_whitespace() {
        let ini = Ini::parse(SAMPLE).unwrap();
        assert_eq!(ini.get_raw("bar/main", "separator"), Some(" | "));
    }

    #[test]
    fn references_expand_recursively() {
        let ini = Ini::parse(SAMPLE).unwrap();
        assert_eq!(
            ini.get("bar/main", "bar/main", "background").unwrap(),
            Some("#222222".to_owned())
        );
        assert_eq!(
            ini.get("bar/main", "colors", "primary").unwrap(),
            Some("#222222".to_owned())
        );
    }

    #[test]
    fn bar_shortcut_points_at_the_current_bar() {
        let ini = Ini::parse(SAMPLE).unwrap();
        assert_eq!(
            ini.get("bar/main", "bar/main", "label").unwrap(),
            Some("100%".to_owned())
        );
    }

    #[test]
    fn dangling_reference_is_an_error() {
        let ini = Ini::parse("[a]\nx = ${missing.key}\n").unwrap();
        assert!(ini.get("a", "a", "x").is_err());
    }

    #[test]
    fn self_reference_terminates() {
        let ini = Ini::parse("[a]\nx = ${a.x}\n").unwrap();
        assert!(ini.get("a", "a", "x").is_err());
    }

    #[test]
    fn syntax_errors_carry_line_numbers() {
        let err = Ini::parse("[a]\nnot a pair\n").unwrap_err();
        assert!(matches!(err, Error::ConfigSyntax { line: 2, .. }));
    }
}
