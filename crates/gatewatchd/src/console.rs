//! Line-oriented operator console on stdin.
//!
//! ```text
//! enroll <name>   start enrolling a new user
//! cancel          abort the running enrollment
//! list            print enrolled users
//! quit            shut the daemon down
//! ```

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Enroll(String),
    Cancel,
    List,
    Quit,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("usage: enroll <name>")]
    MissingName,
    #[error("unknown command '{0}' (enroll, cancel, list, quit)")]
    Unknown(String),
}

/// Parse one console line. Names may contain spaces.
pub fn parse(line: &str) -> Result<Command, ParseError> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    match word.to_ascii_lowercase().as_str() {
        "" => Err(ParseError::Empty),
        "enroll" | "add" if rest.is_empty() => Err(ParseError::MissingName),
        "enroll" | "add" => Ok(Command::Enroll(rest.to_string())),
        "cancel" => Ok(Command::Cancel),
        "list" | "ls" => Ok(Command::List),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(ParseError::Unknown(other.to_string())),
    }
}

/// Read commands from stdin until EOF. The channel closes when stdin does.
pub fn spawn_reader() -> mpsc::Receiver<Command> {
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "console read failed");
                    break;
                }
            };
            match parse(&line) {
                Ok(cmd) => {
                    if tx.send(cmd).await.is_err() {
                        break;
                    }
                }
                Err(ParseError::Empty) => {}
                Err(e) => eprintln!("{e}"),
            }
        }
        tracing::debug!("console closed");
    });
    rx
}
