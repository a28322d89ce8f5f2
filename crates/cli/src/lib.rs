//! Funnel CLI
//!
//! Records test outcome events into a run snapshot and renders, serves or
//! summarizes it.

pub mod commands;
pub mod output;
