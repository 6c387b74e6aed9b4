//! Interactive shell over a [`ClientSession`].

use anyhow::{Context, Result, anyhow};
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::session::ClientSession;

const HELP: &str =
    "commands: PUT/p <key> <value>, GET/g <key>, SCAN/sc <key>, STATUS/s, HELP/h, EXIT/e";

/// A line typed at the shell prompt.
#[derive(Debug, PartialEq)]
pub enum ConsoleCommand {
    Put { key: i64, value: String },
    Get { key: i64 },
    Scan { key: i64 },
    Status,
    Help,
    Exit,
}

impl ConsoleCommand {
    /// Parses one line. Command words are case-insensitive; a `PUT` value
    /// runs to the end of the line.
    pub fn parse(line: &str) -> Result<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("empty command"));
        }

        let (word, rest) = split_word(trimmed);
        let word = match word.to_uppercase().as_str() {
            "P" | "PUT" => "PUT",
            "G" | "GET" => "GET",
            "SC" | "SCAN" => "SCAN",
            "S" | "STATUS" => "STATUS",
            "H" | "HELP" => "HELP",
            "E" | "EXIT" => "EXIT",
            _ => return Err(anyhow!("invalid command. Try: {HELP}")),
        };

        match word {
            "STATUS" => return Ok(ConsoleCommand::Status),
            "HELP" => return Ok(ConsoleCommand::Help),
            "EXIT" => return Ok(ConsoleCommand::Exit),
            _ => {}
        }

        let (key, value) = split_word(rest);
        if key.is_empty() {
            return Err(anyhow!("{word} requires a key"));
        }
        let key: i64 = key
            .parse()
            .with_context(|| format!("key '{key}' is not a 64-bit integer"))?;

        match (word, value.is_empty()) {
            ("PUT", false) => Ok(ConsoleCommand::Put {
                key,
                value: value.to_string(),
            }),
            ("PUT", true) => Err(anyhow!("PUT requires a value: PUT <key> <value>")),
            ("GET", true) => Ok(ConsoleCommand::Get { key }),
            ("SCAN", true) => Ok(ConsoleCommand::Scan { key }),
            _ => Err(anyhow!("{word} takes exactly one argument: {word} <key>")),
        }
    }
}

fn split_word(input: &str) -> (&str, &str) {
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (input, ""),
    }
}

/// Renders a value for the terminal; the empty value prints as `(nil)`.
pub fn format_value(value: &[u8]) -> String {
    if value.is_empty() {
        "(nil)".to_string()
    } else {
        String::from_utf8_lossy(value).into_owned()
    }
}

/// Runs the shell until EOF or `EXIT`.
///
/// Parse errors are reported and skipped; session errors end the shell.
pub async fn run(session: &ClientSession) -> Result<()> {
    let mut stdin = BufReader::new(io::stdin());
    let mut line = String::new();

    write_stdout(HELP).await?;
    loop {
        line.clear();
        if stdin.read_line(&mut line).await? == 0 {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        let command = match ConsoleCommand::parse(&line) {
            Ok(command) => command,
            Err(err) => {
                write_stderr(&format!("error: {err:#}")).await?;
                continue;
            }
        };
        if !handle_command(session, command).await? {
            break;
        }
    }
    Ok(())
}

async fn handle_command(session: &ClientSession, command: ConsoleCommand) -> Result<bool> {
    match command {
        ConsoleCommand::Put { key, value } => {
            session.write(key, value.into_bytes()).await?;
            write_stdout("OK").await?;
        }
        ConsoleCommand::Get { key } => {
            let value = session.read(key).await?;
            write_stdout(&format_value(&value)).await?;
        }
        ConsoleCommand::Scan { key } => {
            let value = session.scan(key).await?;
            write_stdout(&format_value(&value)).await?;
        }
        ConsoleCommand::Status => {
            let status = session.status().await;
            let leader = status
                .leader
                .map_or_else(|| "none".to_string(), |leader| leader.to_string());
            write_stdout(&format!(
                "health={} closest={} leader={} last_command_id={}",
                status.health, status.closest, leader, status.last_command_id
            ))
            .await?;
            for replica in status.replicas {
                let state = if replica.connected { "up" } else { "down" };
                write_stdout(&format!("  [{}] {} {state}", replica.id, replica.addr)).await?;
            }
        }
        ConsoleCommand::Help => write_stdout(HELP).await?,
        ConsoleCommand::Exit => return Ok(false),
    }
    Ok(true)
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
