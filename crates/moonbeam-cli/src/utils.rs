//! Utility functions for Moonbeam CLI

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Create a spinner progress bar
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠁", "⠂", "⠄", "⡀", "⢀", "⠠", "⠐", "⠈"]),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Binary-prefixed size with two decimals, e.g. `1.50 KB`
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = UNITS[0];
    for &next in &UNITS[1..] {
        if size < 1024.0 {
            break;
        }
        size /= 1024.0;
        unit = next;
    }
    format!("{:.2} {}", size, unit)
}

/// Elapsed time at a precision suited to its magnitude
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match (secs / 3600, secs % 3600 / 60, secs % 60) {
        (0, 0, 0) => format!("{}ms", duration.as_millis()),
        (0, 0, s) => format!("{}.{:03}s", s, duration.subsec_millis()),
        (0, m, s) => format!("{}m {}s", m, s),
        (h, m, s) => format!("{}h {}m {}s", h, m, s),
    }
}

/// Print formatted output (JSON or human-readable)
pub fn print_output(data: &Value, json_output: bool) -> Result<()> {
    if json_output {
        println!("{}", serde_json::to_string_pretty(data)?);
    } else {
        print_human_readable(data);
    }
    Ok(())
}

/// Print a JSON value as indented `key: value` lines
fn print_human_readable(data: &Value) {
    match data {
        Value::Object(map) => {
            for (key, value) in map {
                print_entry(key, value, 0);
            }
        }
        other => println!("{}", format_value(other)),
    }
}

fn print_entry(key: &str, value: &Value, depth: usize) {
    let indent = "  ".repeat(depth);
    match value {
        Value::Object(map) if !map.is_empty() => {
            println!("{}{}:", indent, style(key).bold());
            for (child_key, child) in map {
                print_entry(child_key, child, depth + 1);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            println!("{}{}:", indent, style(key).bold());
            for item in items {
                println!("{}  - {}", indent, format_value(item));
            }
        }
        // Unset optional fields are skipped
        Value::Null => {}
        _ => println!("{}{}: {}", indent, style(key).bold(), format_value(value)),
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

/// Print error with styling
pub fn print_error(message: &str) {
    eprintln!("{} {}", style("Error:").red().bold(), message);
}

/// Print warning with styling
pub fn print_warning(message: &str) {
    eprintln!("{} {}", style("Warning:").yellow().bold(), message);
}

/// Print success message with styling
pub fn print_success(message: &str) {
    println!("{} {}", style("Success:").green().bold(), message);
}

/// Expand `~` and environment variables in a user-supplied path
pub fn expand_path(path: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(path).with_context(|| format!("Failed to expand path: {}", path))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

/// Copy a generated file to a user-chosen destination
///
/// The destination always ends in `.mid`; missing parent directories are
/// created.
pub fn save_copy(src: &Path, dest: &Path) -> Result<PathBuf> {
    let dest = match dest.extension() {
        Some(ext) if ext.eq_ignore_ascii_case("mid") => dest.to_path_buf(),
        _ => dest.with_extension("mid"),
    };
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    std::fs::copy(src, &dest)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dest.display()))?;
    Ok(dest)
}
