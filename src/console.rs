//! Colored console output for the `sniff` command.

use crate::types::{Extraction, NOT_FOUND_MESSAGE};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Console output handler with colors and formatting.
pub struct ConsoleOutput {
    json_mode: bool,
}

impl ConsoleOutput {
    pub fn new(json_mode: bool) -> Self {
        Self { json_mode }
    }

    /// Print extraction start message.
    pub fn print_start(&self, target: &str) {
        if self.json_mode {
            return;
        }

        eprintln!("{} Loading: {}", "[*]".bright_blue(), target.bright_white());
    }

    /// Spinner shown while the browser works; hidden in JSON mode.
    pub fn spinner(&self, message: &str) -> Option<ProgressBar> {
        if self.json_mode {
            return None;
        }

        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} [{elapsed}] {msg}") {
            pb.set_style(style);
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(120));
        Some(pb)
    }

    /// Print the outcome. Stream URLs go to stdout, one per line, so they can be piped.
    pub fn print_extraction(&self, extraction: &Extraction, elapsed: Duration) {
        if self.json_mode {
            return;
        }

        match extraction {
            Extraction::Found(streams) => {
                for url in streams {
                    println!("{}", url);
                }
                eprintln!(
                    "{} {} manifest(s) found in {:.2}s",
                    "[+]".green().bold(),
                    streams.len(),
                    elapsed.as_secs_f64()
                );
            }
            Extraction::NotFound => {
                eprintln!("{} {}", "[-]".yellow(), NOT_FOUND_MESSAGE.yellow());
            }
            Extraction::Failed(e) => {
                eprintln!("{} {}", "[!]".red().bold(), e.to_string().red());
            }
        }
    }

    pub fn print_info(&self, message: &str) {
        if self.json_mode {
            return;
        }

        eprintln!("{} {}", "[*]".bright_blue(), message);
    }
}

impl Default for ConsoleOutput {
    fn default() -> Self {
        Self::new(false)
    }
}
