//! Builds pipelines from token sequences.

use crate::lexer::{self, LexError, Token};
use log::trace;
use std::fmt;

/// Maximum number of commands a single pipeline may contain.
pub const MAX_PIPELINE_COMMANDS: usize = 64;

/// A single program invocation within a pipeline.
///
/// `argv` is non-empty in any command produced by the builder; the first
/// element is the program name. Absent redirection fields mean "inherit
/// from pipe or terminal".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    pub argv: Vec<String>,
    pub input_file: Option<String>,
    pub output_file: Option<String>,
    /// Selects append vs. truncate; meaningful only with `output_file`.
    pub append_output: bool,
    /// Honored only on the last command of a pipeline.
    pub background: bool,
}

/// An ordered sequence of commands connected by anonymous pipes.
///
/// A pipeline owns all of its strings; dropping it releases everything at
/// once. An empty pipeline (blank or comment input) is valid and executes
/// as a no-op.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Pipeline {
    pub commands: Vec<Command>,
}

impl Pipeline {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }
}

/// Errors that can occur while building a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The scanner rejected the line.
    Lex(LexError),
    /// A redirection operator was not followed by a word.
    MissingRedirectTarget(&'static str),
    /// The pipeline would exceed [`MAX_PIPELINE_COMMANDS`].
    TooManyCommands(usize),
    /// A command between pipes ended up with no words at all.
    EmptyCommand,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(err) => write!(f, "{err}"),
            ParseError::MissingRedirectTarget(op) => {
                write!(f, "syntax error: `{op}` requires a file name")
            }
            ParseError::TooManyCommands(n) => {
                write!(
                    f,
                    "pipeline has {n} commands, limit is {MAX_PIPELINE_COMMANDS}"
                )
            }
            ParseError::EmptyCommand => write!(f, "syntax error: empty command in pipeline"),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        ParseError::Lex(err)
    }
}

struct PipelineBuilder {
    tokens: std::vec::IntoIter<Token>,
}

impl PipelineBuilder {
    fn from(tokens: Vec<Token>) -> Self {
        PipelineBuilder {
            tokens: tokens.into_iter(),
        }
    }

    fn build(mut self, command_count: usize) -> Result<Pipeline, ParseError> {
        let mut commands = Vec::with_capacity(command_count);

        for index in 0..command_count {
            let last = index == command_count - 1;
            let mut command = Command::default();
            let mut stop = false;

            while let Some(token) = self.tokens.next() {
                match token {
                    Token::Word(word) => command.argv.push(word),
                    Token::PipeOp => break,
                    Token::RedirectLeft => {
                        command.input_file = Some(self.redirect_target("<")?);
                    }
                    Token::RedirectRight => {
                        command.output_file = Some(self.redirect_target(">")?);
                        command.append_output = false;
                    }
                    Token::RedirectAppend => {
                        command.output_file = Some(self.redirect_target(">>")?);
                        command.append_output = true;
                    }
                    Token::Ampersand => {
                        // Only honored at the final index; elsewhere the
                        // marker has no effect.
                        if last {
                            command.background = true;
                            stop = true;
                            break;
                        }
                    }
                }
            }

            if command.argv.is_empty() {
                return Err(ParseError::EmptyCommand);
            }
            commands.push(command);
            if stop {
                break;
            }
        }

        Ok(Pipeline { commands })
    }

    fn redirect_target(&mut self, op: &'static str) -> Result<String, ParseError> {
        match self.tokens.next() {
            Some(Token::Word(target)) => Ok(target),
            _ => Err(ParseError::MissingRedirectTarget(op)),
        }
    }
}

/// Build a [`Pipeline`] from a scanned token sequence.
///
/// An empty sequence is not an error: it yields a pipeline with zero
/// commands, which the executor skips.
pub fn build_pipeline(tokens: Vec<Token>) -> Result<Pipeline, ParseError> {
    if tokens.is_empty() {
        return Ok(Pipeline::default());
    }

    let count = 1 + tokens
        .iter()
        .filter(|token| matches!(token, Token::PipeOp))
        .count();
    if count > MAX_PIPELINE_COMMANDS {
        return Err(ParseError::TooManyCommands(count));
    }

    PipelineBuilder::from(tokens).build(count)
}

/// Parse one command line: scan it and build the pipeline.
pub fn parse_line(line: &str) -> Result<Pipeline, ParseError> {
    let tokens = lexer::split_into_tokens(line)?;
    trace!("tokens = {tokens:?}");
    build_pipeline(tokens)
}
