use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

pub const USER_AGENT: &str = "gh-issue-watch/0.1";

/// HTTP client shared by the GitHub and Telegram collaborators. Every request is bounded by `timeout`.
pub fn client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .context("failed to build HTTP client")
}
