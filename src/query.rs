//! Search query construction.
//!
//! GitHub's search grammar caps the number of boolean predicates per query, so
//! organization lists are split into fixed-size batches and every batch gets
//! its own query. Org predicates are space-joined: the search API ORs repeated
//! `org:` qualifiers without needing parentheses.

use crate::config::{App, Rule};
use crate::model::SearchWindow;

/// Contiguous, order-preserving chunks of at most `batch_size` organizations.
pub fn org_batches(orgs: &[String], batch_size: usize) -> Vec<&[String]> {
    orgs.chunks(batch_size.max(1)).collect()
}

/// One query per organization batch of `rule`.
pub fn build_queries(rule: &Rule, window: &SearchWindow, app: &App) -> Vec<String> {
    org_batches(&rule.organizations, app.batch_size)
        .into_iter()
        .map(|batch| build_query(batch, &rule.filters, window, &app.excluded_label))
        .collect()
}

pub fn build_query(
    orgs: &[String],
    filters: &str,
    window: &SearchWindow,
    excluded_label: &str,
) -> String {
    let mut parts: Vec<String> = vec![
        "is:issue".into(),
        "is:open".into(),
        "no:assignee".into(),
        "-linked:pr".into(),
    ];
    if let Some(label) = non_blank(excluded_label) {
        parts.push(format!("-label:{}", quote_label(label)));
    }
    parts.push(format!("created:>{}", window.since_predicate()));
    parts.extend(orgs.iter().map(|org| format!("org:{}", org.trim())));
    if let Some(filters) = non_blank(filters) {
        parts.push(filters.to_string());
    }
    parts.join(" ")
}

/// Query for the single most recent open issue of `org`, ignoring every filter.
pub fn latest_issue_query(org: &str) -> String {
    format!("is:issue is:open org:{}", org.trim())
}

fn non_blank(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

fn quote_label(label: &str) -> String {
    if label.contains(char::is_whitespace) {
        format!("\"{}\"", label)
    } else {
        label.to_string()
    }
}
