//! A small interactive POSIX-style command shell.
//!
//! This crate provides the building blocks of a pipeline-oriented shell:
//! a tokenizer and pipeline builder for a fixed little syntax (`|`, `<`,
//! `>`, `>>`, `&`, quoted words), and an execution engine that turns a
//! parsed pipeline into a tree of child processes wired together by
//! anonymous pipes, with I/O redirection, process-group handling and
//! interrupt forwarding.
//!
//! The main entry points are [`parse_line`], which turns one command line
//! into a [`Pipeline`], and [`run_pipeline`], which executes it and
//! reports the exit status of its last command. The [`repl`] module ties
//! both together into the interactive loop the `pipeshell` binary runs.

pub mod executor;
pub mod external;
pub mod lexer;
pub mod parser;
pub mod repl;
pub mod signal;

pub use executor::{run_pipeline, ExitCode};
pub use parser::{parse_line, Command, Pipeline};
