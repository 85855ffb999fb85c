//! Terminal rendering of scheduler progress events, via `indicatif`.
//!
//! Two bars are stacked vertically:
//! - Module bar — tracks how many modules have reached a terminal phase
//! - Status bar — spinner with the module currently being generated
//!
//! All output is coordinated through `indicatif`'s `MultiProgress` so log
//! lines do not tear the bars.

use crate::schedule::{ModuleKind, ProgressEvent, ProgressPhase};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

pub struct GenerationUI {
    multi: MultiProgress,
    module_bar: ProgressBar,
    status_bar: ProgressBar,
    verbose: bool,
}

impl GenerationUI {
    /// Create the UI. `total` sizes the module bar and should match the
    /// `total` field of the incoming events.
    pub fn new(total: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let module_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let module_bar = multi.add(ProgressBar::new(total));
        module_bar.set_style(module_style);
        module_bar.set_prefix("Modules");

        let status_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let status_bar = multi.add(ProgressBar::new_spinner());
        status_bar.set_style(status_style);
        status_bar.set_prefix(" Status");
        status_bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            multi,
            module_bar,
            status_bar,
            verbose,
        }
    }

    /// Render one scheduler event.
    pub fn handle(&self, event: &ProgressEvent) {
        let kind = match event.kind {
            ModuleKind::Leaf => "module",
            ModuleKind::Parent => "parent",
            ModuleKind::Overview => "overview",
        };

        match event.phase {
            ProgressPhase::Start => {
                self.status_bar.set_message(format!(
                    "Generating {} {} ({}/{})",
                    kind,
                    style(&event.module_name).yellow(),
                    event.index,
                    event.total
                ));
            }
            ProgressPhase::Done => {
                self.module_bar.inc(1);
                if self.verbose {
                    self.print_line(format!(
                        "{} {} ({:.1}s)",
                        style("✓").green(),
                        event.module_name,
                        event.elapsed_ms as f64 / 1000.0
                    ));
                }
            }
            ProgressPhase::Skip => {
                self.module_bar.inc(1);
                if self.verbose {
                    self.print_line(format!(
                        "{} {} (already documented)",
                        style("↷").dim(),
                        event.module_name
                    ));
                }
            }
            ProgressPhase::Error => {
                self.module_bar.inc(1);
                self.print_line(format!(
                    "{} {} failed",
                    style("✗").red(),
                    event.module_name
                ));
            }
        }
    }

    /// Stop the spinner and clear the status line.
    pub fn finish(&self, message: &str) {
        self.status_bar.finish_and_clear();
        self.module_bar.finish_with_message(message.to_string());
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the
    /// rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(phase: ProgressPhase, kind: ModuleKind) -> ProgressEvent {
        ProgressEvent {
            index: 1,
            total: 3,
            phase,
            module_name: "parser".to_string(),
            elapsed_ms: 1500,
            kind,
        }
    }

    #[test]
    fn handles_every_phase_without_panicking() {
        let ui = GenerationUI::new(3, true);
        ui.handle(&event(ProgressPhase::Start, ModuleKind::Leaf));
        ui.handle(&event(ProgressPhase::Done, ModuleKind::Leaf));
        ui.handle(&event(ProgressPhase::Skip, ModuleKind::Parent));
        ui.handle(&event(ProgressPhase::Error, ModuleKind::Overview));
        ui.finish("done");
    }

    #[test]
    fn progress_event_serializes_snake_case() {
        let json =
            serde_json::to_string(&event(ProgressPhase::Start, ModuleKind::Overview)).unwrap();
        assert!(json.contains("\"start\""));
        assert!(json.contains("\"overview\""));
    }
}
