use std::sync::atomic::{AtomicUsize, Ordering};

use colored::Colorize;

static WARNING_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Print a positioned warning and bump the process-wide counter. Warnings
/// never abort translation.
pub fn warn(message: &str, line: usize, col: usize) {
    WARNING_COUNT.fetch_add(1, Ordering::Relaxed);
    println!(
        "{} {}:{}{}  {}\n",
        "--- Warning".yellow(),
        line,
        col,
        ":".yellow(),
        message
    );
}

pub fn warning_count() -> usize {
    WARNING_COUNT.load(Ordering::Relaxed)
}
