//! LeetCode judge client: recent-acceptance checks, catalog fetch, and
//! problem descriptions.

use std::time::Duration;

use async_trait::async_trait;
use dcc_core::{CatalogProblem, Difficulty};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

pub const CRATE_NAME: &str = "dcc-judge";

const GRAPHQL_URL: &str = "https://leetcode.com/graphql";
const CATALOG_URL: &str = "https://leetcode.com/api/problems/all/";

const RECENT_SUBMISSIONS_QUERY: &str = r#"query getRecentSubmissionList($username: String!, $limit: Int) {
  recentSubmissionList(username: $username, limit: $limit) {
    title
    titleSlug
    timestamp
    statusDisplay
    lang
    __typename
  }
}
"#;

const PROBLEM_DESCRIPTION_QUERY: &str = r#"query questionData($titleSlug: String!) {
  question(titleSlug: $titleSlug) {
    title
    titleSlug
    content
  }
}
"#;

pub fn problem_url(slug: &str) -> String {
    format!("https://leetcode.com/problems/{slug}/")
}

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("judge responded with http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("judge response missing {0}")]
    MissingData(&'static str),
}

/// The external source of truth for problem metadata and completion.
#[async_trait]
pub trait JudgeClient: Send + Sync {
    /// True iff the user's recent submission list contains an accepted
    /// submission for the slug.
    async fn recently_accepted(&self, username: &str, slug: &str) -> Result<bool, JudgeError>;

    async fn fetch_catalog(&self) -> Result<Vec<CatalogProblem>, JudgeError>;

    /// Used only for outbound formatting, never for scheduling.
    async fn fetch_description(&self, slug: &str) -> Result<ProblemDescription, JudgeError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProblemDescription {
    pub title: String,
    #[serde(rename = "titleSlug")]
    pub slug: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct JudgeConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

// Wire shapes for the GraphQL and catalog endpoints.

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: GraphQlData,
}

#[derive(Debug, Default, Deserialize)]
struct GraphQlData {
    #[serde(rename = "recentSubmissionList", default)]
    recent_submissions: Vec<SubmissionEntry>,
    question: Option<ProblemDescription>,
}

#[derive(Debug, Clone, Deserialize)]
struct SubmissionEntry {
    #[serde(rename = "statusDisplay")]
    status: String,
    #[serde(rename = "titleSlug")]
    slug: String,
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(rename = "stat_status_pairs")]
    problems: Vec<RawCatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct RawCatalogEntry {
    stat: RawStat,
    difficulty: RawDifficulty,
    paid_only: bool,
}

#[derive(Debug, Deserialize)]
struct RawStat {
    #[serde(rename = "question__title")]
    title: String,
    #[serde(rename = "question__title_slug")]
    slug: String,
    #[serde(rename = "total_acs", default)]
    total_accepted: i64,
    #[serde(rename = "total_submitted", default)]
    total_submitted: i64,
}

#[derive(Debug, Deserialize)]
struct RawDifficulty {
    level: i16,
}

fn has_recent_acceptance(entries: &[SubmissionEntry], slug: &str) -> bool {
    entries
        .iter()
        .any(|entry| entry.slug == slug && entry.status == "Accepted")
}

fn catalog_from_response(response: CatalogResponse) -> Vec<CatalogProblem> {
    let mut out = Vec::with_capacity(response.problems.len());
    for entry in response.problems {
        let Some(difficulty) = Difficulty::from_level(entry.difficulty.level) else {
            warn!(
                slug = entry.stat.slug,
                level = entry.difficulty.level,
                "skipping catalog entry with unknown difficulty level"
            );
            continue;
        };
        out.push(CatalogProblem {
            slug: entry.stat.slug,
            title: entry.stat.title,
            difficulty,
            total_accepted: entry.stat.total_accepted,
            total_submitted: entry.stat.total_submitted,
            paid_only: entry.paid_only,
        });
    }
    out
}

#[derive(Debug)]
pub struct LeetCodeClient {
    client: reqwest::Client,
    graphql_url: String,
    catalog_url: String,
    backoff: BackoffPolicy,
}

impl LeetCodeClient {
    pub fn new(config: JudgeConfig) -> Result<Self, JudgeError> {
        let mut builder = reqwest::Client::builder().gzip(true).timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        Ok(Self {
            client: builder.build()?,
            graphql_url: GRAPHQL_URL.to_string(),
            catalog_url: CATALOG_URL.to_string(),
            backoff: config.backoff,
        })
    }

    /// Point the client at a different judge deployment (or a test
    /// server).
    pub fn with_base_urls(mut self, graphql_url: String, catalog_url: String) -> Self {
        self.graphql_url = graphql_url;
        self.catalog_url = catalog_url;
        self
    }

    async fn send_retrying<F>(&self, make_request: F) -> Result<reqwest::Response, JudgeError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            match make_request().send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    let url = resp.url().to_string();
                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(JudgeError::HttpStatus {
                        status: status.as_u16(),
                        url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(JudgeError::Request(err));
                }
            }
        }

        Err(JudgeError::Request(
            last_request_error.expect("retry loop should capture a request error"),
        ))
    }

    async fn post_graphql(
        &self,
        operation: &str,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<GraphQlData, JudgeError> {
        let body = json!({
            "operationName": operation,
            "query": query,
            "variables": variables,
        });
        let resp = self
            .send_retrying(|| self.client.post(&self.graphql_url).json(&body))
            .await?;
        let decoded: GraphQlResponse = resp.json().await?;
        Ok(decoded.data)
    }
}

#[async_trait]
impl JudgeClient for LeetCodeClient {
    async fn recently_accepted(&self, username: &str, slug: &str) -> Result<bool, JudgeError> {
        let data = self
            .post_graphql(
                "getRecentSubmissionList",
                RECENT_SUBMISSIONS_QUERY,
                json!({ "username": username }),
            )
            .await?;
        debug!(
            username,
            slug,
            submissions = data.recent_submissions.len(),
            "checked recent submission list"
        );
        Ok(has_recent_acceptance(&data.recent_submissions, slug))
    }

    async fn fetch_catalog(&self) -> Result<Vec<CatalogProblem>, JudgeError> {
        let resp = self
            .send_retrying(|| self.client.get(&self.catalog_url))
            .await?;
        let decoded: CatalogResponse = resp.json().await?;
        Ok(catalog_from_response(decoded))
    }

    async fn fetch_description(&self, slug: &str) -> Result<ProblemDescription, JudgeError> {
        let data = self
            .post_graphql(
                "questionData",
                PROBLEM_DESCRIPTION_QUERY,
                json!({ "titleSlug": slug }),
            )
            .await?;
        data.question.ok_or(JudgeError::MissingData("question data"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acceptance_requires_matching_slug_and_status() {
        let entries: Vec<SubmissionEntry> = serde_json::from_value(json!([
            { "statusDisplay": "Wrong Answer", "titleSlug": "two-sum" },
            { "statusDisplay": "Accepted", "titleSlug": "add-two-numbers" },
        ]))
        .unwrap();

        assert!(!has_recent_acceptance(&entries, "two-sum"));
        assert!(has_recent_acceptance(&entries, "add-two-numbers"));
        assert!(!has_recent_acceptance(&entries, "three-sum"));
    }

    #[test]
    fn catalog_parsing_maps_difficulty_and_keeps_paid_flag() {
        let response: CatalogResponse = serde_json::from_value(json!({
            "stat_status_pairs": [
                {
                    "stat": {
                        "question__title": "Two Sum",
                        "question__title_slug": "two-sum",
                        "total_acs": 100,
                        "total_submitted": 250
                    },
                    "difficulty": { "level": 1 },
                    "paid_only": false
                },
                {
                    "stat": {
                        "question__title": "Fancy Paid Problem",
                        "question__title_slug": "fancy-paid-problem",
                        "total_acs": 5,
                        "total_submitted": 9
                    },
                    "difficulty": { "level": 3 },
                    "paid_only": true
                }
            ]
        }))
        .unwrap();

        let catalog = catalog_from_response(response);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[0].slug, "two-sum");
        assert_eq!(catalog[0].difficulty, Difficulty::Easy);
        assert!(!catalog[0].paid_only);
        assert_eq!(catalog[1].difficulty, Difficulty::Hard);
        assert!(catalog[1].paid_only);
    }

    #[test]
    fn catalog_parsing_skips_unknown_difficulty_levels() {
        let response: CatalogResponse = serde_json::from_value(json!({
            "stat_status_pairs": [
                {
                    "stat": {
                        "question__title": "Mystery",
                        "question__title_slug": "mystery",
                        "total_acs": 0,
                        "total_submitted": 0
                    },
                    "difficulty": { "level": 9 },
                    "paid_only": false
                }
            ]
        }))
        .unwrap();

        assert!(catalog_from_response(response).is_empty());
    }

    #[test]
    fn description_response_shape_parses() {
        let data: GraphQlData = serde_json::from_value(json!({
            "question": {
                "title": "Two Sum",
                "titleSlug": "two-sum",
                "content": "<p>Given an array...</p>"
            }
        }))
        .unwrap();
        let question = data.question.unwrap();
        assert_eq!(question.slug, "two-sum");
        assert!(question.content.starts_with("<p>"));
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn retryable_statuses_are_server_errors_and_throttles() {
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            RetryDisposition::NonRetryable
        );
    }

    #[test]
    fn problem_urls_embed_the_slug() {
        assert_eq!(
            problem_url("two-sum"),
            "https://leetcode.com/problems/two-sum/"
        );
    }
}
