use pgbar_core::config::Config;
use pgbar_core::format::builder::Builder;

use crate::error::Result;
use crate::modules::formatter::Formatter;
use crate::modules::{Discipline, ModuleParts, Producer};

/// `internal/tray`: renders the tray slot marker; the renderer pads it by
/// the tray's current width and the controller anchors the container there.
struct TraySlotProducer;

impl Producer for TraySlotProducer {
    fn update(&mut self) -> bool {
        true
    }

    fn build(&self, builder: &mut Builder, token: &str) -> bool {
        if token == "<tray>" {
            builder.tray_slot();
            true
        } else {
            false
        }
    }
}

pub(crate) fn create(cfg: &Config, section: &str, name: &str) -> Result<ModuleParts> {
    let mut formatter = Formatter::new(name);
    formatter.add(cfg, section, "format", "<tray>", &["<tray>"])?;
    Ok(ModuleParts {
        producer: Box::new(TraySlotProducer),
        formatter,
        discipline: Discipline::Static,
        hooks: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_the_slot_marker() {
        let mut builder = Builder::new();
        assert!(TraySlotProducer.build(&mut builder, "<tray>"));
        assert_eq!(builder.flush(), "%{P:t}");
    }
}
