use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use std::fmt;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::html;
use tracing::{error, info, instrument};

use crate::config::{Config, Rule};
use crate::model::IssueCandidate;

pub const CONNECTION_TEST_TEXT: &str = "✅ <b>gh-issue-watch</b> connectivity test";

/// Delivery of one pre-formatted HTML message into a forum topic.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, topic_id: i32, text: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
    chat_id: ChatId,
}

impl fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("chat_id", &self.chat_id)
            .finish_non_exhaustive()
    }
}

impl TelegramNotifier {
    pub fn new(bot: Bot, chat_id: i64) -> Self {
        Self {
            bot,
            chat_id: ChatId(chat_id),
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let http = crate::http::client(cfg.http_timeout())?;
        let mut bot = Bot::with_client(cfg.telegram.bot_token.clone(), http);
        if let Some(api_url) = cfg.telegram.api_url.as_deref() {
            let url = Url::parse(api_url)
                .with_context(|| format!("invalid telegram.api_url: {}", api_url))?;
            bot = bot.set_api_url(url);
        }
        Ok(Self::new(bot, cfg.telegram.chat_id))
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, topic_id: i32, text: &str) -> Result<()> {
        self.bot
            .send_message(self.chat_id, text)
            .parse_mode(ParseMode::Html)
            .message_thread_id(topic_id)
            .disable_web_page_preview(true)
            .await
            .context("telegram sendMessage failed")?;
        Ok(())
    }
}

/// Logs messages instead of sending them. Used by `--dry-run`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, topic_id: i32, text: &str) -> Result<()> {
        info!(topic_id, "dry run, not sending:\n{}", text);
        Ok(())
    }
}

/// Escaping for values inside a double-quoted attribute.
fn escape_attr(s: &str) -> String {
    html::escape(s).replace('"', "&quot;")
}

pub fn format_message(issue: &IssueCandidate, rule: &Rule, is_privileged: bool) -> String {
    let labels = if issue.labels.is_empty() {
        "none".to_string()
    } else {
        html::escape(&issue.labels.join(", "))
    };
    let mut msg = format!(
        "{} <b>New Issue</b>\n\
         📂 <b>Org:</b> {}\n\
         📝 <b>Title:</b> {}\n\
         🏷️ <b>Labels:</b> {}\n\
         🔗 <a href=\"{}\">Open Issue</a>",
        html::escape(&rule.label),
        html::escape(&issue.organization),
        html::escape(&issue.title),
        labels,
        escape_attr(&issue.html_url),
    );
    if is_privileged {
        msg.push_str("\n👑 <b>Opened by a maintainer</b>");
    }
    msg
}

/// Format and deliver one issue. Failures are logged and reported as `false`.
#[instrument(skip_all, fields(rule = %rule.name))]
pub async fn notify(
    notifier: &dyn Notifier,
    issue: &IssueCandidate,
    rule: &Rule,
    is_privileged: bool,
) -> bool {
    let text = format_message(issue, rule, is_privileged);
    match notifier.send(rule.topic_id, &text).await {
        Ok(()) => {
            info!(title = %issue.title, topic_id = rule.topic_id, "sent to telegram");
            true
        }
        Err(err) => {
            error!(?err, title = %issue.title, url = %issue.html_url, "failed to send telegram message");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AuthorAssociation;

    fn rule() -> Rule {
        Rule {
            name: "passive_orgs".into(),
            organizations: vec!["opencv".into()],
            filters: String::new(),
            topic_id: 3,
            label: "🌱 EASY".into(),
            require_membership_check: false,
        }
    }

    fn issue() -> IssueCandidate {
        IssueCandidate {
            title: "Vec<T> & friends crash".into(),
            html_url: "https://github.com/opencv/opencv/issues/42".into(),
            labels: vec!["good first issue".into(), "help wanted".into()],
            assignee: None,
            assignees: vec![],
            author: "alice".into(),
            author_association: AuthorAssociation::None,
            organization: "opencv".into(),
        }
    }

    #[test]
    fn message_contains_all_fields() {
        let msg = format_message(&issue(), &rule(), false);
        assert!(msg.starts_with("🌱 EASY <b>New Issue</b>"));
        assert!(msg.contains("<b>Org:</b> opencv"));
        assert!(msg.contains("Vec&lt;T&gt; &amp; friends crash"));
        assert!(msg.contains("good first issue, help wanted"));
        assert!(msg.contains("<a href=\"https://github.com/opencv/opencv/issues/42\">Open Issue</a>"));
        assert!(!msg.contains("maintainer"));
    }

    #[test]
    fn privileged_message_is_annotated() {
        let msg = format_message(&issue(), &rule(), true);
        assert!(msg.ends_with("👑 <b>Opened by a maintainer</b>"));
    }

    #[test]
    fn link_attribute_cannot_be_broken_out_of() {
        let mut i = issue();
        i.html_url = "https://github.com/o/r/issues/1\" onclick=\"x".into();
        let msg = format_message(&i, &rule(), false);
        assert!(msg.contains("<a href=\"https://github.com/o/r/issues/1&quot; onclick=&quot;x\">Open Issue</a>"));
    }

    #[test]
    fn empty_labels_render_placeholder() {
        let mut i = issue();
        i.labels.clear();
        assert!(format_message(&i, &rule(), false).contains("<b>Labels:</b> none"));
    }

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        assert!(notify(&LogNotifier, &issue(), &rule(), false).await);
    }
}
