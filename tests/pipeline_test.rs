use anyhow::{anyhow, Result};
use chrono::{TimeZone, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use gh_issue_watch::config::{App, Config, Github, Rule, Telegram};
use gh_issue_watch::github::{IssueSearch, MembershipLookup};
use gh_issue_watch::model::{AuthorAssociation, IssueCandidate};
use gh_issue_watch::pipeline::{run_connection_test, run_org_coverage, run_rules, RunSummary};
use gh_issue_watch::telegram::{Notifier, CONNECTION_TEST_TEXT};

/// One scripted search call: either a search error or a list of results.
type SearchScript = Result<Vec<Result<IssueCandidate>>>;

#[derive(Clone, Default)]
struct RecordingSearch {
    scripts: Arc<std::sync::Mutex<VecDeque<SearchScript>>>,
    latest: Arc<std::sync::Mutex<HashMap<String, Result<Option<IssueCandidate>>>>>,
    queries: Arc<std::sync::Mutex<Vec<String>>>,
}

impl RecordingSearch {
    fn with_scripts(scripts: Vec<SearchScript>) -> Self {
        Self {
            scripts: Arc::new(std::sync::Mutex::new(VecDeque::from(scripts))),
            ..Default::default()
        }
    }

    fn with_latest(latest: Vec<(&str, Result<Option<IssueCandidate>>)>) -> Self {
        Self {
            latest: Arc::new(std::sync::Mutex::new(
                latest.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            )),
            ..Default::default()
        }
    }

    fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl IssueSearch for RecordingSearch {
    fn search_issues<'a>(&'a self, query: &'a str) -> BoxStream<'a, Result<IssueCandidate>> {
        self.queries.lock().unwrap().push(query.to_string());
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or(Ok(vec![]));
        match script {
            Ok(items) => stream::iter(items).boxed(),
            Err(err) => stream::iter(vec![Err(err)]).boxed(),
        }
    }

    async fn latest_issue(&self, query: &str) -> Result<Option<IssueCandidate>> {
        self.queries.lock().unwrap().push(query.to_string());
        let org = query.rsplit("org:").next().unwrap_or_default().to_string();
        self.latest.lock().unwrap().remove(&org).unwrap_or(Ok(None))
    }
}

#[derive(Clone, Default)]
struct RecordingMembership {
    orgs: HashMap<String, Vec<String>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingMembership {
    fn with(entries: &[(&str, &[&str])]) -> Self {
        Self {
            orgs: entries
                .iter()
                .map(|(user, orgs)| (user.to_string(), orgs.iter().map(|s| s.to_string()).collect()))
                .collect(),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl MembershipLookup for RecordingMembership {
    async fn user_organizations(&self, login: &str) -> Result<Vec<String>> {
        self.calls.lock().await.push(login.to_string());
        self.orgs
            .get(login)
            .cloned()
            .ok_or_else(|| anyhow!("lookup failed for {}", login))
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    responses: Arc<Mutex<VecDeque<Result<()>>>>,
    sent: Arc<Mutex<Vec<(i32, String)>>>,
}

impl RecordingNotifier {
    fn with_responses(responses: Vec<Result<()>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    async fn sent(&self) -> Vec<(i32, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, topic_id: i32, text: &str) -> Result<()> {
        self.sent.lock().await.push((topic_id, text.to_string()));
        self.responses.lock().await.pop_front().unwrap_or(Ok(()))
    }
}

fn rule(name: &str, orgs: &[&str], topic_id: i32, gated: bool) -> Rule {
    Rule {
        name: name.into(),
        organizations: orgs.iter().map(|s| s.to_string()).collect(),
        filters: String::new(),
        topic_id,
        label: format!("[{}]", name),
        require_membership_check: gated,
    }
}

fn config(batch_size: usize, rules: Vec<Rule>) -> Config {
    Config {
        app: App {
            batch_size,
            ..App::default()
        },
        github: Github::default(),
        telegram: Telegram {
            chat_id: -100123,
            test_topic_id: Some(9),
            ..Telegram::default()
        },
        rules,
    }
}

fn issue(org: &str, title: &str, author: &str, association: AuthorAssociation) -> IssueCandidate {
    IssueCandidate {
        title: title.into(),
        html_url: format!("https://github.com/{}/repo/issues/1", org),
        labels: vec!["bug".into()],
        assignee: None,
        assignees: vec![],
        author: author.into(),
        author_association: association,
        organization: org.into(),
    }
}

fn now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap()
}

#[tokio::test]
async fn broadcast_rule_batches_and_annotates() {
    let cfg = config(2, vec![rule("active", &["A", "B", "C"], 2, false)]);
    let search = RecordingSearch::with_scripts(vec![
        Ok(vec![Ok(issue("A", "member issue", "m", AuthorAssociation::Member))]),
        Ok(vec![Ok(issue("C", "outsider issue", "o", AuthorAssociation::None))]),
    ]);
    let membership = RecordingMembership::default();
    let notifier = RecordingNotifier::default();

    let summary = run_rules(&cfg, now(), &search, &membership, &notifier).await;

    let queries = search.queries();
    assert_eq!(queries.len(), 2);
    assert!(queries[0].contains("org:A org:B"));
    assert!(queries[0].contains("created:>2024-05-01T10:13:00Z"));
    assert!(queries[1].contains("org:C") && !queries[1].contains("org:A"));

    let sent = notifier.sent().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].0, 2);
    assert!(sent[0].1.contains("member issue"));
    assert!(sent[0].1.contains("Opened by a maintainer"));
    assert!(sent[1].1.contains("outsider issue"));
    assert!(!sent[1].1.contains("Opened by a maintainer"));

    assert!(membership.calls.lock().await.is_empty());
    assert_eq!(
        summary,
        RunSummary {
            batches: 2,
            failed_batches: 0,
            candidates: 2,
            forwarded: 2,
            skipped: 0,
            failed_notifications: 0,
        }
    );
}

#[tokio::test]
async fn gated_rule_uses_membership() {
    let cfg = config(5, vec![rule("maintainers", &["X", "Y"], 4, true)]);
    let search = RecordingSearch::with_scripts(vec![Ok(vec![
        Ok(issue("X", "from member", "insider", AuthorAssociation::None)),
        Ok(issue("Y", "from stranger", "outsider", AuthorAssociation::None)),
        Ok(issue("Y", "lookup breaks", "unknown", AuthorAssociation::Contributor)),
        Ok(issue("X", "from owner", "boss", AuthorAssociation::Owner)),
    ])]);
    let membership = RecordingMembership::with(&[("insider", &["X"]), ("outsider", &["Z"])]);
    let notifier = RecordingNotifier::default();

    let summary = run_rules(&cfg, now(), &search, &membership, &notifier).await;

    let sent = notifier.sent().await;
    let titles: Vec<bool> = ["from member", "from stranger", "lookup breaks", "from owner"]
        .iter()
        .map(|t| sent.iter().any(|(_, text)| text.contains(t)))
        .collect();
    assert_eq!(titles, vec![true, false, false, true]);
    assert!(sent.iter().all(|(topic, text)| *topic == 4 && text.contains("Opened by a maintainer")));
    assert_eq!(
        *membership.calls.lock().await,
        vec!["insider".to_string(), "outsider".into(), "unknown".into()]
    );
    assert_eq!(summary.forwarded, 2);
    assert_eq!(summary.skipped, 2);
}

#[tokio::test]
async fn assigned_issue_is_skipped() {
    let cfg = config(5, vec![rule("active", &["A"], 2, false)]);
    let mut assigned = issue("A", "claimed", "a", AuthorAssociation::Owner);
    assigned.assignee = Some("someone".into());
    let search = RecordingSearch::with_scripts(vec![Ok(vec![Ok(assigned)])]);
    let notifier = RecordingNotifier::default();

    let summary = run_rules(&cfg, now(), &search, &RecordingMembership::default(), &notifier).await;

    assert!(notifier.sent().await.is_empty());
    assert_eq!(summary.skipped, 1);
}

#[tokio::test]
async fn failed_notification_does_not_stop_batch() {
    let cfg = config(5, vec![rule("active", &["A"], 2, false)]);
    let search = RecordingSearch::with_scripts(vec![Ok(vec![
        Ok(issue("A", "first", "a", AuthorAssociation::None)),
        Ok(issue("A", "second", "b", AuthorAssociation::None)),
    ])]);
    let notifier = RecordingNotifier::with_responses(vec![Err(anyhow!("telegram 400")), Ok(())]);

    let summary = run_rules(&cfg, now(), &search, &RecordingMembership::default(), &notifier).await;

    let sent = notifier.sent().await;
    assert_eq!(sent.len(), 2);
    assert!(sent[1].1.contains("second"));
    assert_eq!(summary.failed_notifications, 1);
    assert_eq!(summary.forwarded, 1);
}

#[tokio::test]
async fn search_failure_is_contained_to_its_batch() {
    let cfg = config(
        1,
        vec![
            rule("active", &["A", "B"], 2, false),
            rule("passive", &["C"], 3, false),
        ],
    );
    let search = RecordingSearch::with_scripts(vec![
        Err(anyhow!("422 validation failed")),
        Ok(vec![
            Ok(issue("B", "before error", "b", AuthorAssociation::None)),
            Err(anyhow!("connection reset")),
            Ok(issue("B", "after error", "b", AuthorAssociation::None)),
        ]),
        Ok(vec![Ok(issue("C", "next rule", "c", AuthorAssociation::None))]),
    ]);
    let notifier = RecordingNotifier::default();

    let summary = run_rules(&cfg, now(), &search, &RecordingMembership::default(), &notifier).await;

    assert_eq!(search.queries().len(), 3);
    let sent = notifier.sent().await;
    assert_eq!(sent.len(), 2);
    assert_eq!((sent[0].0, sent[1].0), (2, 3));
    assert!(sent[0].1.contains("before error"));
    assert!(sent[1].1.contains("next rule"));
    assert_eq!(summary.batches, 3);
    assert_eq!(summary.failed_batches, 2);
}

#[tokio::test]
async fn connection_test_sends_fixed_message() {
    let cfg = config(5, vec![rule("active", &["A"], 2, false)]);
    let notifier = RecordingNotifier::default();
    assert!(run_connection_test(&cfg, &notifier).await);
    assert_eq!(notifier.sent().await, vec![(9, CONNECTION_TEST_TEXT.to_string())]);

    let mut cfg = cfg;
    cfg.telegram.test_topic_id = None;
    let notifier = RecordingNotifier::with_responses(vec![Err(anyhow!("chat not found"))]);
    assert!(!run_connection_test(&cfg, &notifier).await);
    assert_eq!(notifier.sent().await[0].0, 2);
}

#[tokio::test]
async fn org_coverage_forwards_latest_issue_per_org() {
    let cfg = config(
        5,
        vec![
            rule("active", &["A", "B"], 2, true),
            rule("passive", &["B", "C", "D"], 3, false),
        ],
    );
    let mut assigned = issue("A", "latest A", "x", AuthorAssociation::Member);
    assigned.assignee = Some("taken".into());
    let search = RecordingSearch::with_latest(vec![
        ("A", Ok(Some(assigned))),
        ("B", Err(anyhow!("rate limited"))),
        ("C", Ok(Some(issue("C", "latest C", "y", AuthorAssociation::None)))),
    ]);
    let notifier = RecordingNotifier::default();

    let summary = run_org_coverage(&cfg, &search, &notifier).await;

    assert_eq!(
        search.queries(),
        vec![
            "is:issue is:open org:A",
            "is:issue is:open org:B",
            "is:issue is:open org:C",
            "is:issue is:open org:D",
        ]
    );
    let sent = notifier.sent().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].0, 2);
    assert!(sent[0].1.contains("latest A") && sent[0].1.contains("Opened by a maintainer"));
    assert_eq!(sent[1].0, 3);
    assert!(sent[1].1.contains("latest C"));
    assert_eq!(summary.batches, 4);
    assert_eq!(summary.failed_batches, 1);
    assert_eq!(summary.forwarded, 2);
}
