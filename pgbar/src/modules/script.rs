use std::process::Command;
use std::time::Duration;

use pgbar_core::config::Config;
use pgbar_core::format::builder::Builder;

use crate::error::Result;
use crate::modules::formatter::Formatter;
use crate::modules::text::ClickCommands;
use crate::modules::{Discipline, ModuleParts, Producer};

/// Run a shell command and capture the first line of stdout.
pub(crate) fn exec_line(command: &str) -> Option<String> {
    match Command::new("sh").arg("-c").arg(command).output() {
        Ok(output) => {
            if !output.status.success() {
                log::warn!(
                    target: "module",
                    "Command '{command}' exited with {}",
                    output.status
                );
            }
            String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .map(str::to_owned)
        }
        Err(e) => {
            log::error!(target: "module", "Failed to run '{command}': {e}");
            None
        }
    }
}

/// `custom/script`: re-run `exec` on an interval, expose the first output
/// line.
struct ScriptProducer {
    exec: String,
    click: ClickCommands,
    output: String,
}

impl Producer for ScriptProducer {
    fn update(&mut self) -> bool {
        let output = exec_line(&self.exec).unwrap_or_default();
        if output == self.output {
            false
        } else {
            self.output = output;
            true
        }
    }

    fn build(&self, builder: &mut Builder, token: &str) -> bool {
        if token == "<output>" && !self.output.is_empty() {
            self.click.wrap(builder, &self.output);
            true
        } else {
            false
        }
    }
}

pub(crate) fn create(cfg: &Config, section: &str, name: &str) -> Result<ModuleParts> {
    let exec = cfg.get(section, "exec")?;
    let interval = cfg.get_int(section, "interval", 5)?.max(1) as u64;
    let click = ClickCommands::load(cfg, section)?;
    let mut formatter = Formatter::new(name);
    formatter.add(cfg, section, "format", "<output>", &["<output>"])?;
    Ok(ModuleParts {
        producer: Box::new(ScriptProducer {
            exec,
            click,
            output: String::new(),
        }),
        formatter,
        discipline: Discipline::Timer {
            interval: Duration::from_secs(interval),
        },
        hooks: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_the_first_line() {
        assert_eq!(exec_line("printf 'a\\nb\\n'").as_deref(), Some("a"));
        assert_eq!(exec_line("true"), None);
    }

    #[test]
    fn update_reports_changes_only() {
        let mut producer = ScriptProducer {
            exec: "echo same".to_owned(),
            click: ClickCommands::default(),
            output: String::new(),
        };
        assert!(producer.update());
        assert!(!producer.update());
    }
}
