//! ANSI terminal color styling for diagnostic output.
//!
//! Plain wrappers around ANSI escape codes. All colors reset at the end of
//! the wrapped string so callers can freely nest them in `format!` calls.

/// ANSI escape code styling utilities.
pub struct Style;

impl Style {
    pub const RESET: &'static str = "\x1b[0m";
    pub const BOLD: &'static str = "\x1b[1m";
    pub const RED: &'static str = "\x1b[31m";
    pub const GREEN: &'static str = "\x1b[32m";
    pub const YELLOW: &'static str = "\x1b[33m";
    pub const BLUE: &'static str = "\x1b[34m";
    pub const CYAN: &'static str = "\x1b[36m";

    pub fn red(s: &str) -> String {
        format!("{}{}{}", Self::RED, s, Self::RESET)
    }

    pub fn blue(s: &str) -> String {
        format!("{}{}{}", Self::BLUE, s, Self::RESET)
    }

    pub fn cyan(s: &str) -> String {
        format!("{}{}{}", Self::CYAN, s, Self::RESET)
    }

    pub fn yellow(s: &str) -> String {
        format!("{}{}{}", Self::YELLOW, s, Self::RESET)
    }

    pub fn green(s: &str) -> String {
        format!("{}{}{}", Self::GREEN, s, Self::RESET)
    }

    pub fn bold(s: &str) -> String {
        format!("{}{}{}", Self::BOLD, s, Self::RESET)
    }

    pub fn bold_red(s: &str) -> String {
        format!("{}{}{}{}", Self::BOLD, Self::RED, s, Self::RESET)
    }
}
