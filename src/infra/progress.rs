//! Progress reporting for batch signing runs.
//!
//! Reporters are shared by every concurrent job, so all state sits behind
//! mutexes and every method takes `&self`.

use std::io::{self, IsTerminal, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Progress indicator types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStyle {
    /// Simple percentage display
    Percentage,
    /// Progress bar with percentage
    ProgressBar,
    /// Silent mode (no visual indicator)
    Silent,
}

impl std::str::FromStr for ProgressStyle {
    type Err = crate::infra::error::SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "percentage" | "percent" => Ok(Self::Percentage),
            "bar" | "progressbar" | "auto" => Ok(Self::ProgressBar),
            "silent" | "none" => Ok(Self::Silent),
            other => Err(crate::infra::error::SigningError::ConfigurationError(
                format!("Unknown progress style: {other}"),
            )),
        }
    }
}

/// Progress reporter trait
pub trait ProgressReporter: Send + Sync {
    /// Update progress with current position and total
    fn update(&self, current: u64, total: u64);

    /// Set the current status message
    fn set_message(&self, message: &str);

    /// Mark the operation as completed
    fn finish(&self);

    /// Mark the operation as failed with error message
    fn finish_with_error(&self, error: &str);
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Terminal-based progress indicator
pub struct TerminalProgress {
    style: ProgressStyle,
    start_time: Instant,
    last_update: Mutex<Option<Instant>>,
    current_message: Mutex<String>,
    is_finished: Mutex<bool>,
    bar_width: usize,
}

impl TerminalProgress {
    #[must_use]
    pub fn new(style: ProgressStyle) -> Self {
        Self {
            style,
            start_time: Instant::now(),
            last_update: Mutex::new(None),
            current_message: Mutex::new(String::new()),
            is_finished: Mutex::new(false),
            bar_width: 40,
        }
    }

    #[must_use]
    pub fn with_bar_width(style: ProgressStyle, width: usize) -> Self {
        let mut progress = Self::new(style);
        progress.bar_width = width;
        progress
    }

    fn render(&self, current: u64, total: u64, message: &str) {
        if *lock(&self.is_finished) {
            return;
        }

        // Throttle redraws, but never drop the final one.
        {
            let mut last_update = lock(&self.last_update);
            let now = Instant::now();
            if current < total
                && last_update.is_some_and(|t| now.duration_since(t) < Duration::from_millis(100))
            {
                return;
            }
            *last_update = Some(now);
        }

        let line = match self.style {
            ProgressStyle::Percentage => self.percentage_line(current, total, message),
            ProgressStyle::ProgressBar => self.bar_line(current, total, message),
            ProgressStyle::Silent => return,
        };
        let mut out = io::stderr().lock();
        let _ = write!(out, "\r{line}");
        let _ = out.flush();
    }

    fn percentage_line(&self, current: u64, total: u64, message: &str) -> String {
        let percentage = fraction(current, total) * 100.0;
        format!(
            "{} - {:.0}% ({}/{}) - {:.1}s",
            message,
            percentage,
            current,
            total,
            self.start_time.elapsed().as_secs_f64()
        )
    }

    fn bar_line(&self, current: u64, total: u64, message: &str) -> String {
        let fraction = fraction(current, total);
        let filled = ((self.bar_width as f64 * fraction) as usize).min(self.bar_width);
        let bar = format!(
            "{}{}",
            "#".repeat(filled),
            "-".repeat(self.bar_width - filled)
        );
        format!("{message} [{bar}] {current}/{total}")
    }

    fn clear_line(&self) {
        let mut out = io::stderr().lock();
        let _ = write!(out, "\r{}\r", " ".repeat(self.bar_width + 40));
        let _ = out.flush();
    }
}

fn fraction(current: u64, total: u64) -> f64 {
    if total > 0 {
        current as f64 / total as f64
    } else {
        0.0
    }
}

impl ProgressReporter for TerminalProgress {
    fn update(&self, current: u64, total: u64) {
        let message = lock(&self.current_message).clone();
        self.render(current, total, &message);
    }

    fn set_message(&self, message: &str) {
        *lock(&self.current_message) = message.to_string();
    }

    fn finish(&self) {
        *lock(&self.is_finished) = true;
        if self.style == ProgressStyle::Silent {
            return;
        }
        self.clear_line();
        eprintln!(
            "[+] {} - Completed in {:.1}s",
            lock(&self.current_message),
            self.start_time.elapsed().as_secs_f64()
        );
    }

    fn finish_with_error(&self, error: &str) {
        *lock(&self.is_finished) = true;
        if self.style == ProgressStyle::Silent {
            return;
        }
        self.clear_line();
        eprintln!(
            "[!] {} - Failed after {:.1}s: {}",
            lock(&self.current_message),
            self.start_time.elapsed().as_secs_f64(),
            error
        );
    }
}

/// Reporter that discards everything.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn update(&self, _current: u64, _total: u64) {}
    fn set_message(&self, _message: &str) {}
    fn finish(&self) {}
    fn finish_with_error(&self, _error: &str) {}
}

/// Pick a terminal reporter when stderr is a terminal, otherwise stay silent.
#[must_use]
pub fn create_reporter(style: ProgressStyle) -> std::sync::Arc<dyn ProgressReporter> {
    if style != ProgressStyle::Silent && io::stderr().is_terminal() {
        std::sync::Arc::new(TerminalProgress::new(style))
    } else {
        std::sync::Arc::new(SilentProgress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_progress_creation() {
        let progress = TerminalProgress::new(ProgressStyle::ProgressBar);
        assert_eq!(progress.bar_width, 40);

        let progress_custom = TerminalProgress::with_bar_width(ProgressStyle::ProgressBar, 60);
        assert_eq!(progress_custom.bar_width, 60);
    }

    #[test]
    fn test_bar_rendering() {
        let progress = TerminalProgress::with_bar_width(ProgressStyle::ProgressBar, 10);
        assert_eq!(progress.bar_line(5, 10, "Signing"), "Signing [#####-----] 5/10");
        assert_eq!(progress.bar_line(0, 0, "x"), "x [----------] 0/0");
        assert!(progress
            .percentage_line(1, 4, "Signing")
            .starts_with("Signing - 25% (1/4)"));
    }

    #[test]
    fn test_style_parsing() {
        assert_eq!("auto".parse::<ProgressStyle>().unwrap(), ProgressStyle::ProgressBar);
        assert_eq!("none".parse::<ProgressStyle>().unwrap(), ProgressStyle::Silent);
        assert!("spinner3d".parse::<ProgressStyle>().is_err());
    }
}
