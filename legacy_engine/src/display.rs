//! Output sinks.
//!
//! The engine never prints directly; it writes through a [`Display`]. The
//! terminal implementation wraps and colors text, while [`BufferDisplay`]
//! keeps everything in memory for tests and GUI shells.

use std::collections::VecDeque;
use std::io::{self, BufRead, IsTerminal, Write};

use colored::Colorize;
use log::{info, warn};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use textwrap::{fill, termwidth};

/// How a line should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Normal,
    /// Console output captured from a script module.
    Script,
    Warning,
}

pub trait Display {
    fn write(&mut self, line: &str);

    /// Next line of user input, or `None` at end of input.
    fn read_input(&mut self) -> Option<String>;

    fn write_toned(&mut self, line: &str, tone: Tone) {
        let _ = tone;
        self.write(line);
    }
}

/// Wrapped, colored terminal output on stdout.
///
/// Input goes through `rustyline` when stdin is a terminal, and falls back to
/// plain line reads otherwise (pipes, CI).
pub struct TerminalDisplay {
    width: usize,
    prompt: String,
    editor: Option<DefaultEditor>,
}

impl std::fmt::Debug for TerminalDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalDisplay")
            .field("width", &self.width)
            .field("prompt", &self.prompt)
            .field("line_editor", &self.editor.is_some())
            .finish()
    }
}

impl Default for TerminalDisplay {
    fn default() -> Self {
        let editor = if io::stdin().is_terminal() {
            match DefaultEditor::new() {
                Ok(editor) => Some(editor),
                Err(e) => {
                    warn!("failed to initialize rustyline ({e}), falling back to basic stdin");
                    None
                },
            }
        } else {
            info!("stdin is not a TTY; using basic input mode");
            None
        };
        Self {
            width: termwidth().min(100),
            prompt: "> ".to_string(),
            editor,
        }
    }
}

impl TerminalDisplay {
    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    fn read_plain(&self) -> Option<String> {
        print!("{}", self.prompt.bold());
        let _ = io::stdout().flush();
        let mut input = String::new();
        match io::stdin().lock().read_line(&mut input) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(input.trim_end_matches(['\r', '\n']).to_string()),
        }
    }
}

impl Display for TerminalDisplay {
    fn write(&mut self, line: &str) {
        println!("{}", fill(line, self.width));
    }

    fn read_input(&mut self) -> Option<String> {
        let Some(editor) = self.editor.as_mut() else {
            return self.read_plain();
        };
        match editor.readline(&self.prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = editor.add_history_entry(line.as_str());
                }
                Some(line)
            },
            // Ctrl-C cancels the line, not the session.
            Err(ReadlineError::Interrupted) => Some(String::new()),
            Err(ReadlineError::Eof) => None,
            Err(e) => {
                warn!("rustyline input failed: {e} -- switching to basic stdin");
                self.editor = None;
                self.read_plain()
            },
        }
    }

    fn write_toned(&mut self, line: &str, tone: Tone) {
        let wrapped = fill(line, self.width);
        match tone {
            Tone::Normal => println!("{wrapped}"),
            Tone::Script => println!("{}", wrapped.italic().truecolor(75, 180, 255)),
            Tone::Warning => println!("{}", wrapped.yellow()),
        }
    }
}

/// In-memory display: records written lines, replays queued input.
#[derive(Debug, Clone, Default)]
pub struct BufferDisplay {
    lines: Vec<String>,
    input: VecDeque<String>,
}

impl BufferDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue lines to be returned by [`Display::read_input`].
    pub fn with_input<I, S>(input: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: Vec::new(),
            input: input.into_iter().map(Into::into).collect(),
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn take_lines(&mut self) -> Vec<String> {
        std::mem::take(&mut self.lines)
    }
}

impl Display for BufferDisplay {
    fn write(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }

    fn read_input(&mut self) -> Option<String> {
        self.input.pop_front()
    }
}
