//! One scheduled run: rules, then organization batches, then issues, all sequential.
//!
//! Failures are absorbed by the smallest unit of work. A failed search ends its
//! batch, a failed membership lookup or notification affects one issue only.

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{Config, Rule};
use crate::filter::should_forward;
use crate::github::{IssueSearch, MembershipLookup};
use crate::query::{build_queries, latest_issue_query, org_batches};
use crate::telegram::{notify, Notifier, CONNECTION_TEST_TEXT};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub batches: usize,
    pub failed_batches: usize,
    pub candidates: usize,
    pub forwarded: usize,
    pub skipped: usize,
    pub failed_notifications: usize,
}

/// Run every rule once against the window ending at `now`.
#[instrument(skip_all)]
pub async fn run_rules(
    cfg: &Config,
    now: DateTime<Utc>,
    search: &dyn IssueSearch,
    membership: &dyn MembershipLookup,
    notifier: &dyn Notifier,
) -> RunSummary {
    let window = cfg.search_window(now);
    info!(since = %window.since_predicate(), rules = cfg.rules.len(), "starting run");

    let mut summary = RunSummary::default();
    for rule in &cfg.rules {
        info!(rule = %rule.name, gated = rule.require_membership_check, "checking rule");
        let batches = org_batches(&rule.organizations, cfg.app.batch_size);
        let queries = build_queries(rule, &window, &cfg.app);
        for (batch, query) in batches.into_iter().zip(queries) {
            summary.batches += 1;
            if let Err(err) =
                run_batch(rule, &query, search, membership, notifier, &mut summary).await
            {
                summary.failed_batches += 1;
                error!(rule = %rule.name, orgs = ?batch, ?err, "search failed; abandoning batch");
            }
        }
    }

    info!(?summary, "run complete");
    summary
}

async fn run_batch(
    rule: &Rule,
    query: &str,
    search: &dyn IssueSearch,
    membership: &dyn MembershipLookup,
    notifier: &dyn Notifier,
    summary: &mut RunSummary,
) -> Result<()> {
    info!(rule = %rule.name, query, "searching");
    let mut issues = search.search_issues(query);
    while let Some(issue) = issues.try_next().await? {
        summary.candidates += 1;
        debug!(title = %issue.title, org = %issue.organization, "found issue");

        let decision = should_forward(&issue, rule, membership).await;
        if !decision.forward {
            summary.skipped += 1;
            continue;
        }
        if notify(notifier, &issue, rule, decision.is_privileged).await {
            summary.forwarded += 1;
        } else {
            summary.failed_notifications += 1;
        }
    }
    Ok(())
}

/// Send the fixed connectivity message. Returns whether delivery succeeded.
#[instrument(skip_all)]
pub async fn run_connection_test(cfg: &Config, notifier: &dyn Notifier) -> bool {
    let topic_id = match cfg.telegram.test_topic_id {
        Some(id) => id,
        None => {
            let fallback = cfg.rules.first().map(|r| r.topic_id).unwrap_or(1);
            warn!(topic_id = fallback, "telegram.test_topic_id not set; using first rule's topic");
            fallback
        }
    };
    match notifier.send(topic_id, CONNECTION_TEST_TEXT).await {
        Ok(()) => {
            info!(topic_id, "connectivity test message sent");
            true
        }
        Err(err) => {
            error!(?err, topic_id, "connectivity test failed");
            false
        }
    }
}

/// Forward the newest open issue of every configured organization, ignoring all filters.
///
/// Each organization is reported under the first rule that lists it. In the
/// summary, `batches` counts organizations checked and `failed_batches` the
/// lookups that errored.
#[instrument(skip_all)]
pub async fn run_org_coverage(
    cfg: &Config,
    search: &dyn IssueSearch,
    notifier: &dyn Notifier,
) -> RunSummary {
    let mut summary = RunSummary::default();
    for (org, rule) in cfg.organizations() {
        summary.batches += 1;
        match search.latest_issue(&latest_issue_query(org)).await {
            Ok(Some(issue)) => {
                summary.candidates += 1;
                let privileged = issue.author_association.is_privileged();
                if notify(notifier, &issue, rule, privileged).await {
                    summary.forwarded += 1;
                } else {
                    summary.failed_notifications += 1;
                }
            }
            Ok(None) => {
                warn!(org, "no open issues found");
            }
            Err(err) => {
                summary.failed_batches += 1;
                error!(org, ?err, "failed to fetch latest issue");
            }
        }
    }
    info!(?summary, "organization coverage test complete");
    summary
}
