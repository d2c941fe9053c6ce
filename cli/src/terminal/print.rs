use std::fmt::Display;

use colored::*;
use tracing::info;

pub const TOTAL_WIDTH: usize = 64;

/// Log target for plain output. The formatter prints it without a level symbol.
pub const PRINT_TARGET: &str = "spyglass::print";

pub fn initialize() {
    if std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }
}

pub fn print(msg: &str) {
    info!(target: PRINT_TARGET, "{msg}");
}

pub fn header(msg: &str) {
    let formatted: String = format!("⟦ {} ⟧", msg);
    let msg_len: usize = formatted.chars().count();

    let dash_count: usize = TOTAL_WIDTH.saturating_sub(msg_len);
    let left: usize = dash_count / 2;
    let right: usize = dash_count - left;

    let line: ColoredString = format!(
        "{}{}{}",
        "─".repeat(left),
        formatted.to_uppercase().bright_green(),
        "─".repeat(right)
    )
    .bright_black();

    print(&format!("{}", line));
}

pub fn fat_separator() {
    let sep: ColoredString = "═".repeat(TOTAL_WIDTH).bright_black();
    print(&format!("{}", sep));
}

/// `key.....: value`, keys padded to `width`.
pub fn aligned_line<V: Display>(key: &str, value: V, width: usize) {
    let dots: String = ".".repeat((width + 1).saturating_sub(key.len()));
    print(&format!(
        "{} {}{}{} {}",
        ">".bright_black(),
        key.cyan(),
        dots.bright_black(),
        ":".bright_black(),
        value
    ));
}

pub fn tree_head(idx: usize, name: &str) {
    let idx_str: String = format!("[{}]", idx.to_string().yellow());
    print(&format!("{} {}", idx_str.bright_black(), name.cyan().bold()));
}

/// One level of `├─ key...: value` lines under a [`tree_head`].
pub fn as_tree_one_level(pairs: &[(String, String)]) {
    let width = pairs.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    for (i, (key, value)) in pairs.iter().enumerate() {
        let branch: ColoredString = if i + 1 == pairs.len() {
            "└─".bright_black()
        } else {
            "├─".bright_black()
        };
        print(&format!(
            " {} {}{}{} {}",
            branch,
            key,
            ".".repeat(width - key.len()).bright_black(),
            ":".bright_black(),
            value
        ));
    }
}

pub fn no_results(what: &str) {
    print(&format!("{}", format!("No {what} found").red().bold()));
}
