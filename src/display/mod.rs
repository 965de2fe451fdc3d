// src/display/mod.rs
//! Display modules for the command line tool

pub mod terminal;

pub use terminal::TerminalDisplay;
