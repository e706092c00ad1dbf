//! CLI module for capagent - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
