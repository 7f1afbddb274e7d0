pub mod cli;
pub mod commands;
pub mod import;
pub mod output;
