use serde::Deserialize;

use crate::model::AuthorAssociation;

#[derive(Deserialize, Debug)]
pub struct SearchResponse {
    pub total_count: u64,
    #[serde(default)]
    pub incomplete_results: bool,
    pub items: Vec<SearchItem>,
}

#[derive(Deserialize, Debug)]
pub struct SearchItem {
    pub title: String,
    pub html_url: String,
    pub repository_url: String,
    #[serde(default)]
    pub labels: Vec<LabelItem>,
    pub assignee: Option<UserItem>,
    #[serde(default)]
    pub assignees: Vec<UserItem>,
    pub user: Option<UserItem>,
    pub author_association: AuthorAssociation,
}

#[derive(Deserialize, Debug)]
pub struct UserItem {
    pub login: String,
}

#[derive(Deserialize, Debug)]
pub struct LabelItem {
    pub name: String,
}

#[derive(Deserialize, Debug)]
pub struct OrgItem {
    pub login: String,
}
