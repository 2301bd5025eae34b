#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod exec;
pub mod logging;
pub mod ops;
pub mod paths;
pub mod prefs;
pub mod progress;
pub mod registry;
pub mod remote;
pub mod tui;
pub mod util;
pub mod vm;
