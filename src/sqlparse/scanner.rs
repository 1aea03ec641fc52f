//! Line-oriented statement splitter shared by the schema and data parsers.
//!
//! Handles `--`/`#` line comments, `/* */` block comments spanning lines,
//! quoted strings and identifiers (`'`, `"`, `` ` ``) with backslash escapes,
//! and the `DELIMITER <token>` directive.

use crate::error::{MigrateError, Result};

pub const DEFAULT_DELIMITER: &str = ";";

/// One complete statement, comments removed and delimiter stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStatement {
    pub text: String,
    /// 1-based line on which the statement starts
    pub line: usize,
}

#[derive(Debug, Default, Clone)]
struct ScanState {
    /// Line on which the open block comment started
    block_comment_from: Option<usize>,
    quote: Option<char>,
}

impl ScanState {
    fn in_block_comment(&self) -> bool {
        self.block_comment_from.is_some()
    }

    fn in_quote(&self) -> bool {
        self.quote.is_some()
    }
}

#[derive(Debug)]
pub struct StatementSplitter {
    delimiter: String,
    state: ScanState,
    buffer: String,
    start_line: Option<usize>,
    last_line: usize,
}

impl Default for StatementSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementSplitter {
    pub fn new() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER.to_string(),
            state: ScanState::default(),
            buffer: String::new(),
            start_line: None,
            last_line: 0,
        }
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    /// Feed one line (without its newline) and collect the statements it completes.
    pub fn push_line(&mut self, line_no: usize, line: &str) -> Vec<RawStatement> {
        self.last_line = line_no;

        if !self.state.in_block_comment()
            && !self.state.in_quote()
            && let Some(delimiter) = parse_delimiter_directive(line)
        {
            self.delimiter = delimiter;
            return Vec::new();
        }

        if !self.buffer.is_empty() {
            self.buffer.push('\n');
        }

        let chars: Vec<char> = line.chars().collect();
        let delimiter: Vec<char> = self.delimiter.chars().collect();
        let mut completed = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            let next = chars.get(i + 1).copied();

            if self.state.in_block_comment() {
                if c == '*' && next == Some('/') {
                    self.state.block_comment_from = None;
                    i += 2;
                } else {
                    i += 1;
                }
                continue;
            }

            if let Some(quote) = self.state.quote {
                self.push_char(line_no, c);
                if c == '\\' && quote != '`' {
                    if let Some(escaped) = next {
                        self.push_char(line_no, escaped);
                        i += 2;
                        continue;
                    }
                } else if c == quote {
                    self.state.quote = None;
                }
                i += 1;
                continue;
            }

            match c {
                '\'' | '"' | '`' => {
                    self.state.quote = Some(c);
                    self.push_char(line_no, c);
                }
                '-' if next == Some('-')
                    && chars.get(i + 2).is_none_or(|ch| ch.is_whitespace()) =>
                {
                    break;
                }
                '#' => break,
                '/' if next == Some('*') => {
                    self.state.block_comment_from = Some(line_no);
                    // keeps `a/*x*/b` two tokens
                    self.push_char(line_no, ' ');
                    i += 2;
                    continue;
                }
                _ if chars[i..].starts_with(&delimiter) => {
                    if let Some(statement) = self.take_statement(line_no) {
                        completed.push(statement);
                    }
                    i += delimiter.len();
                    continue;
                }
                _ => self.push_char(line_no, c),
            }
            i += 1;
        }

        completed
    }

    /// Finish the input; anything still open is an error.
    pub fn finish(self) -> Result<()> {
        if let Some(quote) = self.state.quote {
            return Err(MigrateError::parse(
                self.start_line.unwrap_or(self.last_line),
                format!("unterminated quoted text (missing closing {})", quote),
            ));
        }
        if let Some(from) = self.state.block_comment_from {
            return Err(MigrateError::parse(from, "unterminated block comment"));
        }
        let rest = self.buffer.trim();
        if !rest.is_empty() {
            return Err(MigrateError::parse(
                self.start_line.unwrap_or(self.last_line),
                format!(
                    "unterminated statement (missing '{}'): {}",
                    self.delimiter,
                    preview(rest)
                ),
            ));
        }
        Ok(())
    }

    fn push_char(&mut self, line_no: usize, c: char) {
        if self.start_line.is_none() && !c.is_whitespace() {
            self.start_line = Some(line_no);
        }
        self.buffer.push(c);
    }

    fn take_statement(&mut self, line_no: usize) -> Option<RawStatement> {
        let text = self.buffer.trim().to_string();
        let line = self.start_line.take().unwrap_or(line_no);
        self.buffer.clear();
        if text.is_empty() {
            None
        } else {
            Some(RawStatement { text, line })
        }
    }
}

/// `DELIMITER $$` style directive on a line of its own.
fn parse_delimiter_directive(line: &str) -> Option<String> {
    let mut words = line.split_whitespace();
    let keyword = words.next()?;
    if !keyword.eq_ignore_ascii_case("DELIMITER") {
        return None;
    }
    words.next().map(str::to_string)
}

/// Split a whole script into statements.
pub fn split_statements(script: &str) -> Result<Vec<RawStatement>> {
    let mut splitter = StatementSplitter::new();
    let mut statements = Vec::new();
    for (idx, line) in script.lines().enumerate() {
        statements.extend(splitter.push_line(idx + 1, line));
    }
    splitter.finish()?;
    Ok(statements)
}

/// First line of a statement, shortened for error messages.
pub fn preview(text: &str) -> String {
    let first = text.lines().next().unwrap_or_default().trim();
    if first.chars().count() > 80 {
        format!("{}...", first.chars().take(77).collect::<String>())
    } else {
        first.to_string()
    }
}
