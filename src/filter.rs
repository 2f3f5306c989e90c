//! Forward/skip decisions for search results.
//!
//! Rules without `require_membership_check` are broadcast rules: every
//! unassigned issue is forwarded and privilege only decorates the message.
//! Gated rules forward only issues whose author is an owner, member or
//! collaborator of the repository, or a member of one of the rule's
//! organizations.

use tracing::{debug, instrument, warn};

use crate::config::Rule;
use crate::github::MembershipLookup;
use crate::model::{FilterDecision, IssueCandidate};

#[instrument(skip_all, fields(rule = %rule.name, org = %issue.organization, author = %issue.author))]
pub async fn should_forward(
    issue: &IssueCandidate,
    rule: &Rule,
    membership: &dyn MembershipLookup,
) -> FilterDecision {
    // The search index lags; the no:assignee predicate alone is not trusted.
    if issue.is_assigned() {
        debug!("issue already assigned; skipping");
        return FilterDecision::skip(false);
    }

    let mut is_privileged = issue.author_association.is_privileged();

    if rule.require_membership_check && !is_privileged {
        match membership.user_organizations(&issue.author).await {
            Ok(orgs) => {
                is_privileged = orgs
                    .iter()
                    .any(|org| rule.organizations.iter().any(|o| o.eq_ignore_ascii_case(org)));
            }
            Err(err) => {
                warn!(?err, user = %issue.author, "membership lookup failed; treating author as unprivileged");
            }
        }
        if !is_privileged {
            debug!(association = issue.author_association.as_str(), "author not a member; skipping");
            return FilterDecision::skip(false);
        }
    }

    FilterDecision::forward(is_privileged)
}
