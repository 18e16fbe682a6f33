#![forbid(unsafe_code)]

pub mod analyze;
pub mod block;
pub mod cli;
pub mod commands;
pub mod config;
pub mod content;
pub mod extract;
pub mod fetch;
pub mod formats;
pub mod llm;
pub mod logging;
pub mod observe;
pub mod openai;
pub mod prompt;
pub mod retry;
pub mod score;
pub mod select;
pub mod store;
pub mod strategy;
pub mod summarize;
