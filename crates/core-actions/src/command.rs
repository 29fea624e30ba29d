//! Toolbar / palette commands.
//!
//! Every formatting and structural request from the UI is one `Command`
//! variant; the editor matches on it exhaustively so adding a variant is a
//! compile error until it is handled. Parsing is pure: the textual form is
//! what the CLI and scripted sessions use (`h2`, `bold`, `link <url>`, ...),
//! with an optional leading ':'.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Heading1,
    Heading2,
    Heading3,
    Paragraph,
    BulletList,
    OrderedList,
    Bold,
    Italic,
    Underline,
    Link(String),
    Unlink,
    InsertTable,
    Undo,
    Redo,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseCommandError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("command `{0}` needs an argument")]
    MissingArgument(&'static str),
}

impl Command {
    /// Stable name, used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Heading1 => "h1",
            Command::Heading2 => "h2",
            Command::Heading3 => "h3",
            Command::Paragraph => "p",
            Command::BulletList => "ul",
            Command::OrderedList => "ol",
            Command::Bold => "bold",
            Command::Italic => "italic",
            Command::Underline => "underline",
            Command::Link(_) => "link",
            Command::Unlink => "unlink",
            Command::InsertTable => "table",
            Command::Undo => "undo",
            Command::Redo => "redo",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Link(url) => write!(f, "link {url}"),
            other => f.write_str(other.as_str()),
        }
    }
}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let s = raw.trim();
        let body = s.strip_prefix(':').unwrap_or(s);
        let (name, rest) = match body.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (body, ""),
        };
        let cmd = match name {
            "h1" | "heading1" => Command::Heading1,
            "h2" | "heading2" => Command::Heading2,
            "h3" | "heading3" => Command::Heading3,
            "p" | "paragraph" => Command::Paragraph,
            "ul" | "bullet" => Command::BulletList,
            "ol" | "ordered" => Command::OrderedList,
            "b" | "bold" => Command::Bold,
            "i" | "italic" => Command::Italic,
            "u" | "underline" => Command::Underline,
            "link" => {
                if rest.is_empty() {
                    return Err(ParseCommandError::MissingArgument("link"));
                }
                return Ok(Command::Link(rest.to_string()));
            }
            "unlink" => Command::Unlink,
            "table" => Command::InsertTable,
            "undo" => Command::Undo,
            "redo" => Command::Redo,
            _ => return Err(ParseCommandError::Unknown(body.to_string())),
        };
        if !rest.is_empty() {
            return Err(ParseCommandError::Unknown(body.to_string()));
        }
        Ok(cmd)
    }
}
