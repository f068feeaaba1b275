//! Operator command vocabulary.

use crate::error::{KettleError, Result};
use crate::ipc::Request;

/// One parsed operator command. Everything the supervisor cannot answer
/// locally becomes exactly one worker request.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Empty,
    Exit,
    Reload,
    Help,
    /// `.cmd` runs `cmd` through the shell.
    Shell(String),
    Remote(Request),
}

pub const HELP: &str = "\
Commands:
  <file set>                run every test file in a configured file set
                            (words after the set name are ignored)
  <path or glob> [pattern]  run matching files, optionally filtered
  <pattern>...              run the `all` set filtered by id (1-2), Suite#method,
                            /regex/ or a suite/method name
  !failed                   rerun the tests that failed last time
  !timings [n]              show the n slowest tests of the last run
  set fast on|off           stop at the first failure
  info                      show worker and environment details
  .<command>                run a shell command
  reload                    restart the worker with a fresh environment
  help                      show this message
  exit                      quit";

pub fn parse(line: &str, file_sets: &[String]) -> Result<Command> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::Empty);
    }
    if let Some(shell) = shell_escape(line) {
        return Ok(Command::Shell(shell.to_string()));
    }

    let args = shell_words::split(line).map_err(|e| KettleError::InvalidCommand {
        reason: e.to_string(),
    })?;
    let Some((first, rest)) = args.split_first() else {
        return Ok(Command::Empty);
    };

    let command = match first.as_str() {
        "exit" | "quit" => Command::Exit,
        "reload" => Command::Reload,
        "help" => Command::Help,
        "info" => Command::Remote(Request::RunInfo),
        "!failed" => Command::Remote(Request::RunFailed),
        "!timings" => Command::Remote(Request::ShowPerformance {
            limit: parse_limit(rest.first())?,
        }),
        "set" => {
            let name = rest.first().ok_or_else(|| KettleError::InvalidCommand {
                reason: "usage: set <variable> [value]".into(),
            })?;
            Command::Remote(Request::Set {
                name: name.clone(),
                value: rest.get(1).cloned(),
            })
        }
        // A file-set name wins whatever follows it.
        name if file_sets.iter().any(|s| s == name) => {
            if !rest.is_empty() {
                tracing::debug!(set = name, ignored = ?rest, "extra words after a file set");
            }
            Command::Remote(Request::RunFileSet {
                name: name.to_string(),
            })
        }
        _ => Command::Remote(Request::RunAllTests { words: args }),
    };
    Ok(command)
}

/// `.ls -la` is a shell escape; `./test/x.yml` and `../x` are paths.
fn shell_escape(line: &str) -> Option<&str> {
    let rest = line.strip_prefix('.')?;
    if rest.starts_with('/') || rest.starts_with('.') {
        return None;
    }
    let rest = rest.trim();
    (!rest.is_empty()).then_some(rest)
}

fn parse_limit(word: Option<&String>) -> Result<Option<usize>> {
    word.map(|w| {
        w.parse().map_err(|_| KettleError::InvalidCommand {
            reason: format!("`{}` is not a number", w),
        })
    })
    .transpose()
}

/// Commands and file-set names offered by tab completion.
pub fn command_words(file_sets: &[String]) -> Vec<String> {
    let mut words: Vec<String> = ["exit", "reload", "help", "info", "!failed", "!timings", "set"]
        .iter()
        .map(|w| w.to_string())
        .collect();
    words.extend(file_sets.iter().cloned());
    words
}
