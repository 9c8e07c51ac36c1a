use std::{
    fmt::Display,
    io::{self, IsTerminal, Write},
    sync::{Arc, Mutex},
};

use colored::{Color, Colorize};
use crossterm::terminal;

use crate::result::Outcome;

pub trait ColorTheme {
    fn color(&self) -> Color;
}

impl ColorTheme for log::Level {
    fn color(&self) -> Color {
        use log::Level::*;
        match self {
            Error => Color::BrightRed,
            Warn => Color::BrightYellow,
            Info => Color::Cyan,
            Debug => Color::Magenta,
            Trace => Color::Blue,
        }
    }
}

impl ColorTheme for Outcome {
    fn color(&self) -> Color {
        use Outcome::*;
        match self {
            Success => Color::Green,
            Failure => Color::Yellow,
            Error => Color::Red,
            Skipped => Color::BrightBlack,
        }
    }
}

#[derive(Clone)]
enum Sink {
    Stdout,
    Buffer(Arc<Mutex<Vec<u8>>>),
}

/// Where user-facing output goes. Clones share the same sink.
#[derive(Clone)]
pub struct Console {
    sink: Sink,
    color: bool,
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sink = match self.sink {
            Sink::Stdout => "stdout",
            Sink::Buffer(_) => "buffer",
        };
        f.debug_struct("Console")
            .field("sink", &sink)
            .field("color", &self.color)
            .finish()
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::stdout()
    }
}

impl Console {
    /// Standard output, coloured only on a terminal and when `ANSI_COLORS_DISABLED` is unset.
    pub fn stdout() -> Self {
        let color =
            io::stdout().is_terminal() && std::env::var_os("ANSI_COLORS_DISABLED").is_none();
        Self {
            sink: Sink::Stdout,
            color,
        }
    }

    /// In-memory sink without colours; read it back with [`Console::contents`].
    pub fn buffer() -> Self {
        Self {
            sink: Sink::Buffer(Arc::default()),
            color: false,
        }
    }

    pub fn is_color(&self) -> bool {
        self.color
    }

    pub fn print(&self, s: impl Display) {
        let s = s.to_string();
        match &self.sink {
            Sink::Stdout => {
                let mut out = io::stdout().lock();
                // a closed stdout is not worth failing a run over
                let _ = out.write_all(s.as_bytes()).and_then(|_| out.flush());
            }
            Sink::Buffer(buf) => match buf.lock() {
                Ok(mut buf) => buf.extend_from_slice(s.as_bytes()),
                Err(poisoned) => poisoned.into_inner().extend_from_slice(s.as_bytes()),
            },
        }
    }

    pub fn println(&self, s: impl Display) {
        self.print(format!("{}\n", s));
    }

    /// Everything written so far to a buffer console; empty for stdout.
    pub fn contents(&self) -> String {
        match &self.sink {
            Sink::Stdout => String::new(),
            Sink::Buffer(buf) => {
                let bytes = match buf.lock() {
                    Ok(buf) => buf.clone(),
                    Err(poisoned) => poisoned.into_inner().clone(),
                };
                String::from_utf8_lossy(&bytes).into_owned()
            }
        }
    }

    pub fn paint(&self, s: &str, color: Color) -> String {
        if self.color {
            s.color(color).to_string()
        } else {
            s.to_owned()
        }
    }

    pub fn bold(&self, s: &str) -> String {
        if self.color {
            s.bold().to_string()
        } else {
            s.to_owned()
        }
    }

    pub fn dimmed(&self, s: &str) -> String {
        if self.color {
            s.dimmed().to_string()
        } else {
            s.to_owned()
        }
    }

    /// Short report label for an outcome, e.g. `OK` or `FAIL`.
    pub fn outcome_label(&self, outcome: Outcome) -> String {
        let label = match outcome {
            Outcome::Success => "OK",
            Outcome::Failure => "FAIL",
            Outcome::Error => "ERROR",
            Outcome::Skipped => "SKIP",
        };
        if self.color {
            label.color(outcome.color()).bold().to_string()
        } else {
            label.to_owned()
        }
    }

    /// A horizontal rule as wide as the terminal.
    pub fn rule(&self) -> String {
        const THIN_LINE: &str = "─";
        const FALLBACK_WIDTH: usize = 70;
        let cols = match self.sink {
            Sink::Stdout => terminal::size()
                .map(|(cols, _)| cols as usize)
                .unwrap_or(FALLBACK_WIDTH),
            Sink::Buffer(_) => FALLBACK_WIDTH,
        };
        self.paint(&THIN_LINE.repeat(cols), Color::BrightBlack)
    }
}

/// Quoted, escaped form of `s`, cut off after 80 characters.
pub fn safe_repr(s: &str) -> String {
    const MAX_LENGTH: usize = 80;
    let repr = format!("{:?}", s);
    if repr.chars().count() <= MAX_LENGTH {
        repr
    } else {
        let head: String = repr.chars().take(MAX_LENGTH).collect();
        format!("{} [truncated]...", head)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn safe_repr_escapes_and_truncates() {
        assert_eq!(safe_repr("hi\n"), r#""hi\n""#);
        let long = "x".repeat(100);
        let repr = safe_repr(&long);
        assert!(repr.ends_with(" [truncated]..."));
        assert_eq!(repr.chars().count(), 80 + " [truncated]...".len());
    }

    #[test]
    fn buffer_console_collects_plain_text() {
        let console = Console::buffer();
        let clone = console.clone();
        console.print("Running ");
        clone.println("tests");
        console.println(console.outcome_label(Outcome::Failure));
        assert_eq!(console.paint("x", Color::Red), "x");
        assert_eq!(console.contents(), "Running tests\nFAIL\n");
    }

    #[test]
    fn rule_has_fixed_width_off_terminal() {
        let console = Console::buffer();
        assert_eq!(console.rule().chars().count(), 70);
    }
}
