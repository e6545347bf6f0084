#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod catalog;
pub mod config;
pub mod data;
pub mod pages;
pub mod reader;
pub mod ui;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
