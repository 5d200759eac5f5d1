//! Terminal UI for the phase runner, rendered via an `indicatif` spinner.

use crate::phase::PhaseType;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub struct RunnerUi {
    spinner: ProgressBar,
    verbose: bool,
}

impl RunnerUi {
    pub fn new(verbose: bool) -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{prefix:.bold.dim} {spinner} {msg}")
                .expect("progress bar template is a valid static string"),
        );
        spinner.set_prefix("Phase");
        Self { spinner, verbose }
    }

    pub fn start_phase(&self, phase: PhaseType, index: usize, total: usize) {
        self.spinner.set_message(format!(
            "{}/{} {}",
            index,
            total,
            style(phase.as_str()).yellow()
        ));
        self.spinner.enable_steady_tick(Duration::from_millis(100));
    }

    pub fn phase_complete(&self, phase: PhaseType, duration: Duration) {
        self.spinner.disable_steady_tick();
        self.print_line(format!(
            "  {} {} ({:.1}s)",
            style("✓").green(),
            phase,
            duration.as_secs_f64()
        ));
    }

    pub fn phase_failed(&self, phase: PhaseType, message: &str) {
        self.spinner.disable_steady_tick();
        self.print_line(format!("  {} {}: {}", style("✗").red(), phase, message));
    }

    pub fn log_step(&self, message: &str) {
        if self.verbose {
            self.print_line(format!("  {}", style(message).dim()));
        }
    }

    pub fn finish(&self, message: &str) {
        self.spinner.finish_and_clear();
        println!("{message}");
    }

    /// Print above the spinner without clobbering it.
    fn print_line(&self, msg: String) {
        self.spinner.println(&msg);
    }
}
