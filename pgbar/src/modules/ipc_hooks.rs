use pgbar_core::config::Config;
use pgbar_core::format::builder::Builder;

use crate::error::Result;
use crate::modules::formatter::Formatter;
use crate::modules::script::exec_line;
use crate::modules::{Discipline, ModuleHost, ModuleParts, Producer};

/// `custom/ipc`: numbered hook commands fired by `hook:<module>:<index>`
/// messages; the selected hook's output becomes the module content.
struct IpcProducer {
    hooks: Vec<String>,
    initial: Option<usize>,
    output: String,
}

impl Producer for IpcProducer {
    fn warmup(&mut self) {
        if let Some(index) = self.initial.take() {
            self.hook(index);
        }
    }

    fn update(&mut self) -> bool {
        !self.output.is_empty()
    }

    fn build(&self, builder: &mut Builder, token: &str) -> bool {
        if token == "<output>" && !self.output.is_empty() {
            builder.append(&self.output);
            true
        } else {
            false
        }
    }

    fn hook(&mut self, index: usize) -> bool {
        let Some(command) = self.hooks.get(index) else {
            log::warn!(target: "module", "No hook with index {index}");
            return false;
        };
        self.output = exec_line(command).unwrap_or_default();
        true
    }
}

pub(crate) fn create(cfg: &Config, section: &str, name: &str) -> Result<ModuleParts> {
    let hooks = cfg.get_list(section, "hook")?;
    // `initial` is 1-based, 0 means no startup hook
    let initial = match cfg.get_int(section, "initial", 0)? {
        0 => None,
        n if n > 0 && (n as usize) <= hooks.len() => Some(n as usize - 1),
        n => {
            log::warn!(target: "module", "[{section}] initial hook {n} out of range");
            None
        }
    };
    let (hook_tx, hook_rx) = ModuleHost::hook_channel();
    let mut formatter = Formatter::new(name);
    formatter.add(cfg, section, "format", "<output>", &["<output>"])?;
    Ok(ModuleParts {
        producer: Box::new(IpcProducer {
            hooks,
            initial,
            output: String::new(),
        }),
        formatter,
        discipline: Discipline::Event { signals: hook_rx },
        hooks: Some(hook_tx),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hooks_select_and_run() {
        let mut producer = IpcProducer {
            hooks: vec!["echo one".into(), "echo two".into()],
            initial: None,
            output: String::new(),
        };
        assert!(producer.hook(1));
        assert_eq!(producer.output, "two");
        assert!(!producer.hook(7));
    }

    #[test]
    fn warmup_runs_the_initial_hook() {
        let mut producer = IpcProducer {
            hooks: vec!["echo start".into()],
            initial: Some(0),
            output: String::new(),
        };
        producer.warmup();
        assert_eq!(producer.output, "start");
        assert!(producer.update());
    }
}
