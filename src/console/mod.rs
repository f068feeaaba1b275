//! Operator input.

use std::io::{self, BufRead};
use std::path::PathBuf;

use rustyline::completion::Completer;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{CompletionType, Context, Editor, Helper};

use crate::config::Config;
use crate::error::{KettleError, Result};
use crate::ipc::{Request, Response};
use crate::supervisor::commands::command_words;
use crate::supervisor::SharedWorker;

pub const PROMPT: &str = "kettle> ";

/// Source of operator command lines.
pub trait Prompt {
    /// Read one line. `Ok(None)` means input ended.
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>>;

    fn add_history(&mut self, _line: &str) {}

    fn save_history(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Line-by-line input for scripted sessions.
pub struct PlainPrompt<R> {
    input: R,
}

impl PlainPrompt<io::StdinLock<'static>> {
    pub fn stdin() -> Self {
        Self::new(io::stdin().lock())
    }
}

impl<R: BufRead> PlainPrompt<R> {
    pub fn new(input: R) -> Self {
        Self { input }
    }
}

impl<R: BufRead> Prompt for PlainPrompt<R> {
    fn read_line(&mut self, _prompt: &str) -> Result<Option<String>> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
    }
}

/// Scripted input for tests and `--once` runs.
impl Prompt for std::vec::IntoIter<String> {
    fn read_line(&mut self, _prompt: &str) -> Result<Option<String>> {
        Ok(self.next())
    }
}

/// Interactive prompt with history and tab completion.
pub struct LinePrompt {
    editor: Editor<ConsoleHelper, DefaultHistory>,
    history_path: Option<PathBuf>,
}

impl LinePrompt {
    pub fn new(config: &Config, worker: SharedWorker) -> Result<Self> {
        let settings = rustyline::Config::builder()
            .max_history_size(config.history_size)
            .and_then(|b| b.history_ignore_dups(true))
            .map_err(console_error)?
            .auto_add_history(false)
            .completion_type(CompletionType::List)
            .build();

        let mut editor = Editor::<ConsoleHelper, DefaultHistory>::with_config(settings)
            .map_err(console_error)?;
        editor.set_helper(Some(ConsoleHelper {
            words: command_words(&config.file_set_names()),
            worker,
        }));

        let history_path = config.history_path();
        if let Some(path) = &history_path {
            if let Err(e) = editor.load_history(path) {
                tracing::debug!(path = %path.display(), "no history loaded: {}", e);
            }
        }

        Ok(Self {
            editor,
            history_path,
        })
    }
}

impl Prompt for LinePrompt {
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        loop {
            match self.editor.readline(prompt) {
                Ok(line) => return Ok(Some(line)),
                // Ctrl-C clears the line.
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => return Ok(None),
                Err(e) => return Err(console_error(e)),
            }
        }
    }

    fn add_history(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() || line == "exit" {
            return;
        }
        if let Err(e) = self.editor.add_history_entry(line) {
            tracing::debug!("history entry dropped: {}", e);
        }
    }

    fn save_history(&mut self) -> Result<()> {
        match &self.history_path {
            Some(path) => self.editor.save_history(path).map_err(console_error),
            None => Ok(()),
        }
    }
}

fn console_error(e: ReadlineError) -> KettleError {
    match e {
        ReadlineError::Io(e) => KettleError::Io(e),
        other => KettleError::Console {
            reason: other.to_string(),
        },
    }
}

pub struct ConsoleHelper {
    words: Vec<String>,
    worker: SharedWorker,
}

impl ConsoleHelper {
    fn candidates(&self, prefix: &str) -> Vec<String> {
        let mut found: Vec<String> = self
            .words
            .iter()
            .filter(|w| w.starts_with(prefix))
            .cloned()
            .collect();

        // Busy only if a call is already in flight; skip remote names then.
        if let Ok(mut slot) = self.worker.try_borrow_mut() {
            if let Some(worker) = slot.as_mut() {
                let request = Request::Autocomplete {
                    prefix: prefix.to_string(),
                };
                match worker.call(&request) {
                    Ok(Response::Completions(names)) => found.extend(names),
                    Ok(other) => tracing::debug!("unexpected completion reply: {:?}", other),
                    Err(e) => tracing::debug!("completion unavailable: {}", e),
                }
            }
        }

        found.sort();
        found.dedup();
        found
    }
}

impl Completer for ConsoleHelper {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        let start = line[..pos]
            .rfind(char::is_whitespace)
            .map(|i| i + 1)
            .unwrap_or(0);
        Ok((start, self.candidates(&line[start..pos])))
    }
}

impl Hinter for ConsoleHelper {
    type Hint = String;
}

impl Highlighter for ConsoleHelper {}

impl Validator for ConsoleHelper {}

impl Helper for ConsoleHelper {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn plain_prompt_strips_newlines_and_ends_on_eof() {
        let mut prompt = PlainPrompt::new("all\r\n!timings 3\n".as_bytes());
        assert_eq!(prompt.read_line(PROMPT).unwrap().as_deref(), Some("all"));
        assert_eq!(prompt.read_line(PROMPT).unwrap().as_deref(), Some("!timings 3"));
        assert_eq!(prompt.read_line(PROMPT).unwrap(), None);
    }

    #[test]
    fn completion_offers_local_words_without_a_worker() {
        let helper = ConsoleHelper {
            words: command_words(&["all".into(), "unit".into()]),
            worker: Rc::new(RefCell::new(None)),
        };
        assert_eq!(helper.candidates("!"), vec!["!failed", "!timings"]);
        assert_eq!(helper.candidates("un"), vec!["unit"]);
    }
}
