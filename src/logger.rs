//! Log sinks.
//!
//! A `Logger` is handed to the fleet when it is built and shared by every host
//! task of that run. Implementations must not panic or block for long.

use std::io::Write;

use chrono::Local;
use colored::*;

pub trait Logger: Send + Sync {
    fn info(&self, message: &str);
    fn warning(&self, message: &str);
    fn error(&self, message: &str);
    /// A line of command output, printed only when output display is on.
    fn output(&self, line: &str);
}

/// Prints `[LEVEL] HH:MM:SS message` lines to the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleLogger;

impl ConsoleLogger {
    pub fn new() -> Self {
        Self
    }

    fn emit(&self, level: ColoredString, message: &str) {
        // Hold the lock so lines from concurrent hosts never get mixed.
        let stdout = std::io::stdout();
        let mut guard = stdout.lock();
        let _ = writeln!(
            guard,
            "[{}] {} {}",
            level,
            Local::now().format("%H:%M:%S").to_string().bright_black(),
            message
        );
    }
}

impl Logger for ConsoleLogger {
    fn info(&self, message: &str) {
        self.emit("INFO".blue(), message);
    }

    fn warning(&self, message: &str) {
        self.emit("WARN".yellow(), message);
    }

    fn error(&self, message: &str) {
        self.emit("ERROR".red(), message);
    }

    fn output(&self, line: &str) {
        let stdout = std::io::stdout();
        let mut guard = stdout.lock();
        let _ = writeln!(guard, "{}", line);
    }
}
