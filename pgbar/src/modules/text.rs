use pgbar_core::config::Config;
use pgbar_core::format::builder::Builder;
use pgbar_core::format::MouseButton;

use crate::error::Result;
use crate::modules::formatter::Formatter;
use crate::modules::{Discipline, ModuleParts, Producer};

/// Mouse commands shared by the click-wrapping modules: each configured
/// command wraps the output in an action block for its button.
#[derive(Debug, Default, Clone)]
pub(crate) struct ClickCommands {
    commands: Vec<(MouseButton, String)>,
}

impl ClickCommands {
    pub(crate) fn load(cfg: &Config, section: &str) -> Result<Self> {
        let mut commands = Vec::new();
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
            if let Some(cmd) = cfg.opt(section, key)? {
                commands.push((button, cmd));
            }
        }
        Ok(Self { commands })
    }

    pub(crate) fn wrap(&self, builder: &mut Builder, output: &str) {
        for (button, cmd) in &self.commands {
            builder.action(*button, cmd);
        }
        builder.append(output);
        for _ in &self.commands {
            builder.action_close();
        }
    }
}

/// `custom/text`: a fixed string, rendered once.
struct TextProducer {
    content: String,
    click: ClickCommands,
}

impl Producer for TextProducer {
    fn update(&mut self) -> bool {
        true
    }

    fn build(&self, builder: &mut Builder, token: &str) -> bool {
        if token == "<output>" {
            self.click.wrap(builder, &self.content);
            true
        } else {
            false
        }
    }
}

pub(crate) fn create(cfg: &Config, section: &str, name: &str) -> Result<ModuleParts> {
    let content = cfg.get(section, "content")?;
    let click = ClickCommands::load(cfg, section)?;
    let mut formatter = Formatter::new(name);
    formatter.add(cfg, section, "format", "<output>", &["<output>"])?;
    Ok(ModuleParts {
        producer: Box::new(TextProducer { content, click }),
        formatter,
        discipline: Discipline::Static,
        hooks: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn click_commands_nest_around_the_output() {
        let cfg = Config::from_str(
            "[bar/b]\nheight = 1\n[module/t]\ntype = custom/text\ncontent = X\nclick-left = do-a\nscroll-up = do-b\n",
            "b",
        )
        .unwrap();
        let parts = create(&cfg, "module/t", "t");
        let parts = parts.unwrap();
        let mut builder = Builder::new();
        assert!(parts.producer.build(&mut builder, "<output>"));
        assert_eq!(builder.flush(), "%{A1:do-a:}%{A4:do-b:}X%{A}%{A}");
    }
}
