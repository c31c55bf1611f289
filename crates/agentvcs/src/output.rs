use std::io::{self, Write};

use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Sink for agent and workspace reports.
///
/// `--quiet` swaps in [`Quiet`] so scripts only see the exit code.
pub trait Output: Send + Sync {
    /// Neutral notes such as an empty agent list or operation log.
    fn message(&self, msg: &str) -> io::Result<()>;
    /// A reference was created, moved, archived or restored.
    fn success(&self, msg: &str) -> io::Result<()>;
    /// The command finished but found a missing agent or uncommitted changes.
    fn warn(&self, msg: &str) -> io::Result<()>;
    /// The VCS error that ends the command.
    fn fail(&self, msg: &str) -> io::Result<()>;
    /// One field of an agent or workspace, printed as `label: value`.
    fn item(&self, label: &str, value: &str) -> io::Result<()>;
}

/// Output for `--quiet`.
pub struct Quiet;

impl Output for Quiet {
    fn message(&self, _msg: &str) -> io::Result<()> {
        Ok(())
    }

    fn success(&self, _msg: &str) -> io::Result<()> {
        Ok(())
    }

    fn warn(&self, _msg: &str) -> io::Result<()> {
        Ok(())
    }

    fn fail(&self, _msg: &str) -> io::Result<()> {
        Ok(())
    }

    fn item(&self, _label: &str, _value: &str) -> io::Result<()> {
        Ok(())
    }
}

/// Agent reports on stdout.
pub struct Terminal {
    color_choice: ColorChoice,
}

impl Terminal {
    /// `color` is false under `--no-color` or when stdout is not a terminal.
    pub fn new(color: bool) -> Self {
        let color_choice = if color {
            ColorChoice::Always
        } else {
            ColorChoice::Never
        };
        Self { color_choice }
    }

    fn write_colored(&self, msg: &str, color: Color) -> io::Result<()> {
        let mut stdout = StandardStream::stdout(self.color_choice);
        stdout.set_color(ColorSpec::new().set_fg(Some(color)))?;
        writeln!(stdout, "{msg}")?;
        stdout.reset()?;
        stdout.flush()
    }
}

impl Output for Terminal {
    fn message(&self, msg: &str) -> io::Result<()> {
        self.write_colored(msg, Color::Cyan)
    }

    fn success(&self, msg: &str) -> io::Result<()> {
        self.write_colored(msg, Color::Green)
    }

    fn warn(&self, msg: &str) -> io::Result<()> {
        self.write_colored(msg, Color::Rgb(255, 165, 0)) // Orange
    }

    fn fail(&self, msg: &str) -> io::Result<()> {
        self.write_colored(msg, Color::Red)
    }

    fn item(&self, label: &str, value: &str) -> io::Result<()> {
        let mut stdout = StandardStream::stdout(self.color_choice);
        stdout.set_color(ColorSpec::new().set_bold(true))?;
        write!(stdout, "{label}:")?;
        stdout.reset()?;
        writeln!(stdout, " {value}")?;
        stdout.flush()
    }
}
