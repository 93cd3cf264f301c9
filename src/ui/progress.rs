//! Progress indicators with CI fallback

use super::context::UiContext;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress for a batch of concurrent builds.
///
/// Shows an indicatif bar in interactive mode, plain lines in CI.
pub struct BuildProgress {
    bar: Option<ProgressBar>,
}

impl BuildProgress {
    pub fn new(ctx: &UiContext, total: u64) -> Self {
        let bar = if ctx.use_fancy_output() {
            let bar = ProgressBar::new(total);
            if let Ok(template) = ProgressStyle::default_bar().template(
                "  {spinner:.cyan} Bundling {pos}/{len}  {bar:20.cyan/dim} {msg:.dim}  {elapsed:.dim}",
            ) {
                bar.set_style(template.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ").progress_chars("━╸─"));
            }
            bar.enable_steady_tick(Duration::from_millis(120));
            Some(bar)
        } else {
            eprintln!("Bundling {} package(s)...", total);
            None
        };
        Self { bar }
    }

    /// A build started
    pub fn started(&self, label: &str) {
        if let Some(ref bar) = self.bar {
            bar.set_message(label.to_string());
        }
    }

    /// A build finished; `detail` is a size or a failure reason
    pub fn finished(&self, label: &str, ok: bool, detail: &str) {
        match self.bar {
            Some(ref bar) => {
                let mark = if ok {
                    style("✓").green()
                } else {
                    style("✗").red()
                };
                bar.println(format!("  {} {} ({})", mark, label, style(detail).dim()));
                bar.inc(1);
            }
            None if ok => eprintln!("  [OK] {} ({})", label, detail),
            None => eprintln!("  [FAIL] {}: {}", label, detail),
        }
    }

    /// Finish and clear the progress bar
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}
