use clap::builder::styling::{AnsiColor, Effects, Style, Styles};
use std::fmt::Write;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

#[cfg(not(test))]
/// Whether diagnostics go to an ANSI-capable terminal.
static IS_ANSI_TERMINAL: std::sync::LazyLock<bool> =
    std::sync::LazyLock::new(is_ansi_stderr_terminal);

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the styles used for help output and diagnostics.
pub fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default())
        .error(AnsiColor::Red.on_default() | Effects::BOLD)
        .valid(AnsiColor::Green.on_default() | Effects::BOLD)
        .invalid(AnsiColor::Red.on_default() | Effects::BOLD)
}

/// Returns true when stderr is a terminal and `TERM` does not ask for plain output.
pub fn is_ansi_stderr_terminal() -> bool {
    let is_tty = unsafe { libc::isatty(libc::STDERR_FILENO) == 1 };
    is_tty && std::env::var("TERM").map(|term| term != "dumb").unwrap_or(false)
}

fn apply_style(text: String, style: &Style) -> String {
    #[cfg(not(test))]
    if !*IS_ANSI_TERMINAL {
        return text;
    }

    #[cfg(test)]
    {
        if std::env::var("TERM").unwrap_or_default() == "dumb" {
            return text;
        }
    }

    let mut styled = String::with_capacity(text.len() + 20);
    let _ = write!(styled, "{}", style);
    styled.push_str(&text);
    let _ = write!(styled, "{}", style.render_reset());
    styled
}

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Applies the [`styles`] palette to diagnostic text.
pub trait AnsiStyles {
    /// Apply literal style to text
    fn literal(&self) -> String;

    /// Apply placeholder style to text
    fn placeholder(&self) -> String;

    /// Apply error style to text
    fn error(&self) -> String;
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl AnsiStyles for String {
    fn literal(&self) -> String {
        apply_style(self.clone(), styles().get_literal())
    }

    fn placeholder(&self) -> String {
        apply_style(self.clone(), styles().get_placeholder())
    }

    fn error(&self) -> String {
        apply_style(self.clone(), styles().get_error())
    }
}

impl AnsiStyles for &str {
    fn literal(&self) -> String {
        self.to_string().literal()
    }

    fn placeholder(&self) -> String {
        self.to_string().placeholder()
    }

    fn error(&self) -> String {
        self.to_string().error()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
