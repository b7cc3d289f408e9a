//! Terminal status output for the `signcap` binary: an `indicatif` spinner
//! line on a TTY, plain lines otherwise.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty)
    }

    pub fn is_pretty(&self) -> bool {
        match self.mode {
            UiMode::Pretty => true,
            UiMode::Auto => self.is_tty,
            UiMode::Plain => false,
        }
    }

    pub fn status_line(&self) -> StatusLine {
        if !self.is_pretty() {
            return StatusLine {
                spinner: None,
                last: String::new(),
            };
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_draw_target(ProgressDrawTarget::stderr());
        spinner.enable_steady_tick(Duration::from_millis(120));
        let style = ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        StatusLine {
            spinner: Some(spinner),
            last: String::new(),
        }
    }
}

/// The one line that tracks the capture status. Results are printed above it.
pub struct StatusLine {
    spinner: Option<ProgressBar>,
    last: String,
}

impl StatusLine {
    /// Replace the status text. Plain mode prints only changes.
    pub fn set(&mut self, message: &str) {
        if self.last == message {
            return;
        }
        self.last = message.to_string();
        match &self.spinner {
            Some(spinner) => spinner.set_message(message.to_string()),
            None => eprintln!("[status] {}", message),
        }
    }

    /// Print a result line that stays on screen.
    pub fn result(&self, message: &str) {
        match &self.spinner {
            Some(spinner) => spinner.println(message),
            None => println!("{}", message),
        }
    }

    pub fn finish(self, message: &str) {
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message.to_string()),
            None => eprintln!("[status] {}", message),
        }
    }
}

pub fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
