use std::collections::HashMap;

use pgbar_core::config::Config;
use pgbar_core::error::Error as CoreError;
use pgbar_core::format::builder::Builder;

use crate::error::Result;
use crate::modules::Producer;

pub(crate) const FORMAT_DEFAULT: &str = "format";

/// One named output template plus its decoration.
#[derive(Debug, Clone)]
pub(crate) struct Format {
    pub value: String,
    pub fg: Option<String>,
    pub bg: Option<String>,
    pub ul: Option<String>,
    pub ol: Option<String>,
    pub padding: usize,
    pub margin: usize,
    pub spacing: usize,
    pub offset: i32,
    pub font: usize,
}

/// A module's declared formats: template strings with `<token>` references
/// substituted by calling back into the module. Tokens outside the declared
/// set abort startup, naming the module and the token.
#[derive(Debug, Default)]
pub(crate) struct Formatter {
    module: String,
    formats: HashMap<String, Format>,
}

impl Formatter {
    pub(crate) fn new(module: &str) -> Self {
        Self {
            module: module.to_owned(),
            formats: HashMap::new(),
        }
    }

    pub(crate) fn add(
        &mut self,
        cfg: &Config,
        section: &str,
        name: &str,
        fallback: &str,
        tags: &[&str],
    ) -> Result<()> {
        let value = cfg.get_or(section, name, fallback)?;
        for token in value.split_whitespace() {
            if token.starts_with('<') && token.ends_with('>') && !tags.contains(&token) {
                return Err(CoreError::UndefinedFormatTag {
                    module: self.module.clone(),
                    format: name.to_owned(),
                    token: token.to_owned(),
                }
                .into());
            }
        }
        let format = Format {
            value,
            fg: cfg.opt(section, &format!("{name}-foreground"))?,
            bg: cfg.opt(section, &format!("{name}-background"))?,
            ul: cfg.opt(section, &format!("{name}-underline"))?,
            ol: cfg.opt(section, &format!("{name}-overline"))?,
            padding: cfg.get_int(section, &format!("{name}-padding"), 0)?.max(0) as usize,
            margin: cfg.get_int(section, &format!("{name}-margin"), 0)?.max(0) as usize,
            spacing: cfg.get_int(section, &format!("{name}-spacing"), 1)?.max(0) as usize,
            offset: cfg.get_int(section, &format!("{name}-offset"), 0)? as i32,
            font: cfg.get_int(section, &format!("{name}-font"), 0)?.max(0) as usize,
        };
        self.formats.insert(name.to_owned(), format);
        Ok(())
    }

    /// Expand the producer's current format into markup.
    pub(crate) fn expand(&self, producer: &dyn Producer) -> String {
        let name = producer.format();
        let Some(format) = self.formats.get(name) else {
            log::error!(
                target: "module",
                "[module/{}] Format '{name}' has not been declared",
                self.module
            );
            return String::new();
        };
        let mut builder = Builder::new();
        builder.offset(format.offset);
        builder.space(format.margin);
        if let Some(bg) = &format.bg {
            builder.background(bg);
        }
        if let Some(fg) = &format.fg {
            builder.foreground(fg);
        }
        if let Some(ul) = &format.ul {
            builder.underline(ul);
        }
        if let Some(ol) = &format.ol {
            builder.overline(ol);
        }
        builder.font(format.font);
        builder.space(format.padding);
        let mut first = true;
        for token in format.value.split(' ') {
            if token.is_empty() {
                continue;
            }
            if !first {
                builder.space(format.spacing);
            }
            if token.starts_with('<') && token.ends_with('>') {
                producer.build(&mut builder, token);
            } else {
                builder.node(token);
            }
            first = false;
        }
        builder.space(format.padding);
        builder.space(format.margin);
        builder.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgbar_core::format::builder::Builder;

    struct Fixed;

    impl Producer for Fixed {
        fn update(&mut self) -> bool {
            true
        }

        fn build(&self, builder: &mut Builder, token: &str) -> bool {
            if token == "<output>" {
                builder.append("hello");
                true
            } else {
                false
            }
        }
    }

    fn config(extra: &str) -> Config {
        Config::from_str(
            &format!("[bar/b]\nheight = 1\n[module/m]\ntype = custom/text\n{extra}"),
            "b",
        )
        .unwrap()
    }

    #[test]
    fn unknown_token_aborts() {
        let cfg = config("format = <bogus>\n");
        let mut formatter = Formatter::new("m");
        let err = formatter
            .add(&cfg, "module/m", "format", "<output>", &["<output>"])
            .unwrap_err();
        assert!(err.to_string().contains("<bogus>"));
        assert!(err.to_string().contains("module/m"));
    }

    #[test]
    fn expands_tokens_and_literals() {
        let cfg = config("format = pre <output>\n");
        let mut formatter = Formatter::new("m");
        formatter
            .add(&cfg, "module/m", "format", "<output>", &["<output>"])
            .unwrap();
        assert_eq!(formatter.expand(&Fixed), "pre hello");
    }

    #[test]
    fn decoration_wraps_the_output() {
        let cfg = config("format-foreground = #ff0000\nformat-padding = 1\n");
        let mut formatter = Formatter::new("m");
        formatter
            .add(&cfg, "module/m", "format", "<output>", &["<output>"])
            .unwrap();
        assert_eq!(formatter.expand(&Fixed), "%{F#ff0000} hello %{F-}");
    }
}
