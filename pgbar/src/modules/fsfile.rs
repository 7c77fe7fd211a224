use std::path::PathBuf;

use pgbar_core::config::Config;
use pgbar_core::format::builder::Builder;

use crate::error::Result;
use crate::modules::formatter::Formatter;
use crate::modules::{Discipline, ModuleParts, Producer};

/// `internal/fs`: expose the first line of a file, re-read whenever the
/// inotify watch on it fires.
struct FileProducer {
    path: PathBuf,
    output: String,
}

impl FileProducer {
    fn read(&self) -> String {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => text.lines().next().unwrap_or("").to_owned(),
            Err(e) => {
                log::warn!(
                    target: "module",
                    "Failed to read {}: {e}",
                    self.path.display()
                );
                String::new()
            }
        }
    }
}

impl Producer for FileProducer {
    fn update(&mut self) -> bool {
        let output = self.read();
        if output == self.output {
            false
        } else {
            self.output = output;
            true
        }
    }

    fn build(&self, builder: &mut Builder, token: &str) -> bool {
        if token == "<output>" && !self.output.is_empty() {
            builder.append(&self.output);
            true
        } else {
            false
        }
    }
}

pub(crate) fn create(cfg: &Config, section: &str, name: &str) -> Result<ModuleParts> {
    let path = PathBuf::from(cfg.get(section, "path")?);
    let mut formatter = Formatter::new(name);
    formatter.add(cfg, section, "format", "<output>", &["<output>"])?;
    Ok(ModuleParts {
        producer: Box::new(FileProducer {
            path: path.clone(),
            output: String::new(),
        }),
        formatter,
        discipline: Discipline::Inotify { paths: vec![path] },
        hooks: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_the_first_line() {
        let path = std::env::temp_dir().join(format!("pgbar-fs-test-{}", std::process::id()));
        std::fs::write(&path, "50%\nrest\n").unwrap();
        let mut producer = FileProducer {
            path: path.clone(),
            output: String::new(),
        };
        assert!(producer.update());
        assert_eq!(producer.output, "50%");
        assert!(!producer.update());
        std::fs::remove_file(path).unwrap();
    }
}
