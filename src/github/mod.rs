use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::github::model::{OrgItem, SearchItem, SearchResponse};
use crate::model::IssueCandidate;

pub mod model;

/// Largest page the search endpoint serves.
pub const SEARCH_PAGE_SIZE: u32 = 100;
/// The search endpoint never returns more than this many results for one query.
pub const SEARCH_RESULT_CAP: u64 = 1000;

static REPO_OWNER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/repos/(?P<owner>[^/]+)/[^/]+/?$").expect("valid repository url pattern")
});

#[derive(Debug, Error)]
pub enum GithubError {
    #[error("GitHub rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("GitHub API error {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("unrecognised repository url: {0}")]
    RepositoryUrl(String),
}

/// Issue search as a lazily paged stream. A fresh call restarts from the first page.
#[async_trait]
pub trait IssueSearch: Send + Sync {
    fn search_issues<'a>(&'a self, query: &'a str) -> BoxStream<'a, Result<IssueCandidate>>;

    /// Newest issue matching `query`, if any.
    async fn latest_issue(&self, query: &str) -> Result<Option<IssueCandidate>>;
}

#[async_trait]
pub trait MembershipLookup: Send + Sync {
    /// Logins of the organizations `login` belongs to.
    async fn user_organizations(&self, login: &str) -> Result<Vec<String>>;
}

#[derive(Clone)]
pub struct GithubClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GithubClient {
    pub fn new(http: Client, token: String, api_base: &str) -> Result<Self> {
        let base = if api_base.ends_with('/') {
            api_base.to_string()
        } else {
            format!("{}/", api_base)
        };
        let base_url = Url::parse(&base).with_context(|| format!("invalid GitHub API base: {}", api_base))?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let http = crate::http::client(cfg.http_timeout())?;
        Self::new(http, cfg.github.token.clone(), &cfg.github.api_base)
    }

    fn get(&self, path: &str) -> Result<reqwest::RequestBuilder> {
        let url = self
            .base_url
            .join(path)
            .with_context(|| format!("invalid GitHub path: {}", path))?;
        let mut req = self
            .http
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if !self.token.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.token));
        }
        Ok(req)
    }

    pub fn build_search_request(&self, query: &str, page: u32, per_page: u32) -> Result<reqwest::Request> {
        let page = page.to_string();
        let per_page = per_page.to_string();
        self.get("search/issues")?
            .query(&[
                ("q", query),
                ("sort", "created"),
                ("order", "desc"),
                ("per_page", per_page.as_str()),
                ("page", page.as_str()),
            ])
            .build()
            .context("failed to build GitHub search request")
    }

    async fn execute<T: DeserializeOwned>(&self, request: reqwest::Request) -> Result<T> {
        debug!(url = %request.url(), "github request");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach GitHub")?;

        let status = res.status();
        let exhausted = res
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "0")
            .unwrap_or(false);
        if status == StatusCode::TOO_MANY_REQUESTS || (status == StatusCode::FORBIDDEN && exhausted) {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, "rate limited by GitHub");
            return Err(GithubError::RateLimited(body).into());
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(GithubError::Api { status, body }.into());
        }

        res.json::<T>()
            .await
            .context("invalid GitHub response JSON")
    }

    async fn search_page(&self, query: &str, page: u32, per_page: u32) -> Result<SearchResponse> {
        let request = self.build_search_request(query, page, per_page)?;
        let resp: SearchResponse = self.execute(request).await?;
        if resp.incomplete_results {
            warn!(query, page, "GitHub search returned incomplete results");
        }
        Ok(resp)
    }
}

/// Next page to fetch after `page` returned `returned` items, or None when paging is done.
fn next_page(page: u32, returned: usize, per_page: u32, total_count: u64) -> Option<u32> {
    let fetched = u64::from(page) * u64::from(per_page);
    if returned < per_page as usize || fetched >= total_count.min(SEARCH_RESULT_CAP) {
        None
    } else {
        Some(page + 1)
    }
}

pub fn repository_owner(repository_url: &str) -> Option<&str> {
    REPO_OWNER
        .captures(repository_url)
        .and_then(|caps| caps.name("owner"))
        .map(|m| m.as_str())
}

impl TryFrom<SearchItem> for IssueCandidate {
    type Error = GithubError;

    fn try_from(item: SearchItem) -> Result<Self, Self::Error> {
        let organization = repository_owner(&item.repository_url)
            .ok_or_else(|| GithubError::RepositoryUrl(item.repository_url.clone()))?
            .to_string();
        Ok(IssueCandidate {
            title: item.title,
            html_url: item.html_url,
            labels: item.labels.into_iter().map(|l| l.name).collect(),
            assignee: item.assignee.map(|u| u.login),
            assignees: item.assignees.into_iter().map(|u| u.login).collect(),
            author: item.user.map(|u| u.login).unwrap_or_else(|| "ghost".into()),
            author_association: item.author_association,
            organization,
        })
    }
}

/// Convert one search item; an unusable item is logged and dropped so the rest of the page survives.
fn candidate_or_skip(item: SearchItem) -> Option<IssueCandidate> {
    let url = item.html_url.clone();
    match IssueCandidate::try_from(item) {
        Ok(issue) => Some(issue),
        Err(err) => {
            warn!(%err, url = %url, "skipping unusable search item");
            None
        }
    }
}

#[async_trait]
impl IssueSearch for GithubClient {
    fn search_issues<'a>(&'a self, query: &'a str) -> BoxStream<'a, Result<IssueCandidate>> {
        stream::try_unfold(Some(1u32), move |page| async move {
            let Some(page) = page else {
                return Ok(None);
            };
            let resp = self.search_page(query, page, SEARCH_PAGE_SIZE).await?;
            let next = next_page(page, resp.items.len(), SEARCH_PAGE_SIZE, resp.total_count);
            Ok::<_, anyhow::Error>(Some((resp.items, next)))
        })
        .map_ok(|items| {
            stream::iter(
                items
                    .into_iter()
                    .filter_map(candidate_or_skip)
                    .map(Ok::<_, anyhow::Error>),
            )
        })
        .try_flatten()
        .boxed()
    }

    async fn latest_issue(&self, query: &str) -> Result<Option<IssueCandidate>> {
        let resp = self.search_page(query, 1, 1).await?;
        resp.items
            .into_iter()
            .next()
            .map(|item| IssueCandidate::try_from(item).map_err(anyhow::Error::from))
            .transpose()
    }
}

#[async_trait]
impl MembershipLookup for GithubClient {
    async fn user_organizations(&self, login: &str) -> Result<Vec<String>> {
        let request = self
            .get(&format!("users/{}/orgs", login))?
            .query(&[("per_page", "100")])
            .build()
            .context("failed to build GitHub membership request")?;
        let orgs: Vec<OrgItem> = self.execute(request).await?;
        Ok(orgs.into_iter().map(|o| o.login).collect())
    }
}
