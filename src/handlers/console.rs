use async_trait::async_trait;

use crate::bus::Handler;
use crate::model::{AnomalyEvent, Severity};

/// Renders a one-line colored status per event. Never fails loudly: any
/// formatting hiccup is swallowed rather than propagated, since this handler
/// is purely cosmetic.
pub struct ConsoleDisplay;

impl ConsoleDisplay {
    pub fn new() -> Self {
        ConsoleDisplay
    }

    /// §9 Open Questions: ERROR has no dedicated color in the source and is
    /// treated identically to WARNING here.
    fn color_code(severity: Severity) -> &'static str {
        match severity {
            Severity::Info => "36",               // cyan
            Severity::Warning | Severity::Error => "33", // yellow
            Severity::Critical => "31",            // red
        }
    }
}

impl Default for ConsoleDisplay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for ConsoleDisplay {
    fn name(&self) -> &str {
        "console_display"
    }

    async fn on_event(&self, _topic: &str, event: &AnomalyEvent) {
        let color = Self::color_code(event.severity);
        println!(
            "\x1b[{}m[{}] {}\x1b[0m - {}",
            color,
            event.severity.as_str().to_uppercase(),
            event.event_type,
            event.message
        );
    }
}
