//! Colored output helpers for CLI
//!
//! Provides consistent, colored terminal output for the Meridian CLI.

use crate::agents::aggregator::{PlainFormatter, ResponseFormatter};
use crate::types::AggregatedResponse;
use owo_colors::OwoColorize;
use std::io::{self, Write};

/// Output style configuration
pub struct Output {
    /// Whether to use colored output
    pub colored: bool,
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

impl Output {
    /// Create a new output helper with colors enabled
    pub fn new() -> Self {
        Self { colored: true }
    }

    /// Create a new output helper with colors disabled
    pub fn no_color() -> Self {
        Self { colored: false }
    }

    pub fn banner(&self) {
        if self.colored {
            println!(
                "\n   {} {}",
                "Meridian".bright_cyan().bold(),
                format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
            );
            println!("   {}\n", "Type a question, 'clear' to reset history, Ctrl-C or Ctrl-D to quit.".dimmed());
        } else {
            println!("\n   Meridian v{}", env!("CARGO_PKG_VERSION"));
            println!("   Type a question, 'clear' to reset history, Ctrl-C or Ctrl-D to quit.\n");
        }
    }

    /// Print an info message
    pub fn info(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "•".blue(), message);
        } else {
            println!("  [INFO] {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.colored {
            println!("  {} {}", "⚠".yellow().bold(), message.yellow());
        } else {
            println!("  [WARN] {}", message);
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.colored {
            eprintln!("  {} {}", "✗".red().bold(), message.red());
        } else {
            eprintln!("  [ERROR] {}", message);
        }
    }

    /// Print the interactive prompt without a trailing newline
    pub fn prompt(&self) {
        if self.colored {
            print!("{} ", "meridian>".bright_cyan().bold());
        } else {
            print!("meridian> ");
        }
        io::stdout().flush().ok();
    }

    /// Print a rendered response
    pub fn response(&self, response: &AggregatedResponse) {
        println!("\n{}\n", self.formatter().format(response));
    }

    pub fn formatter(&self) -> TerminalFormatter {
        TerminalFormatter {
            colored: self.colored,
        }
    }
}

/// Terminal rendering of a response. Without colors it matches
/// [`PlainFormatter`] exactly.
#[derive(Debug, Clone, Copy)]
pub struct TerminalFormatter {
    pub colored: bool,
}

impl ResponseFormatter for TerminalFormatter {
    fn format(&self, response: &AggregatedResponse) -> String {
        if !self.colored {
            return PlainFormatter.format(response);
        }

        if response.is_failure() {
            return PlainFormatter::failure_message(response)
                .red()
                .bold()
                .to_string();
        }

        let delimiter = PlainFormatter::delimiter().dimmed().to_string();
        let mut blocks: Vec<String> = response
            .sections
            .iter()
            .map(|s| format!("{}\n{}", s.title.bright_cyan().bold(), s.text))
            .collect();

        if !response.insights.is_empty() {
            let lines: Vec<String> = response
                .insights
                .iter()
                .map(|i| format!("{} {}", "-".yellow(), i))
                .collect();
            blocks.push(format!(
                "{}\n{}",
                "CROSS-HANDLER INSIGHTS".yellow().bold(),
                lines.join("\n")
            ));
        }

        let mut out = blocks.join(&format!("\n\n{}\n\n", delimiter));
        if !response.failures.is_empty() {
            out.push_str(&format!(
                "\n\n{}",
                PlainFormatter::failure_note(&response.failures).yellow()
            ));
        }
        out.push_str(&format!("\n\n{}", PlainFormatter::summary(response).dimmed()));
        out
    }
}
