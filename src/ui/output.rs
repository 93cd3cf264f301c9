//! Output functions for consistent CLI formatting

use super::context::UiContext;
use console::style;

/// Display a section header
pub fn section(ctx: &UiContext, title: &str) {
    if ctx.use_fancy_output() {
        eprintln!("{}", style(title).cyan().bold());
    } else {
        eprintln!("{}", title);
    }
}

/// Display a success step
pub fn step_ok(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        eprintln!("  {} {}", style("✓").green(), message);
    } else {
        eprintln!("  [OK] {}", message);
    }
}

/// Display a success step with detail
pub fn step_ok_detail(ctx: &UiContext, message: &str, detail: &str) {
    if ctx.use_fancy_output() {
        eprintln!("  {} {} ({})", style("✓").green(), message, style(detail).dim());
    } else {
        eprintln!("  [OK] {} ({})", message, detail);
    }
}

/// Display a warning step with hint
pub fn step_warn_hint(ctx: &UiContext, message: &str, hint: &str) {
    if ctx.use_fancy_output() {
        eprintln!("  {} {} - {}", style("!").yellow(), message, style(hint).dim());
    } else {
        eprintln!("  [WARN] {} - {}", message, hint);
    }
}

/// Print styled key-value pair
pub fn key_value(ctx: &UiContext, key: &str, value: &str) {
    if ctx.use_fancy_output() {
        println!("  {}: {}", style(key).dim(), value);
    } else {
        println!("  {}: {}", key, value);
    }
}
