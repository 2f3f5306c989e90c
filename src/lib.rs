//! Polls GitHub issue search for fresh, unassigned issues and announces them
//! in Telegram forum topics.

pub mod config;
pub mod filter;
pub mod github;
pub mod http;
pub mod model;
pub mod pipeline;
pub mod query;
pub mod telegram;
