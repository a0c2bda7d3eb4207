use std::env;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::render::markdown_to_storage_xhtml;

const STORAGE_REPRESENTATION: &str = "storage";

/// Connection and target space for publishing converted pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfluenceSettings {
    pub url: String,
    pub space: String,
    pub user: String,
    pub api_token: String,
    pub parent_id: Option<String>,
}

impl ConfluenceSettings {
    /// Builds settings from optional pieces.
    ///
    /// Returns `Ok(None)` when none of url, space, user or token is given and
    /// an error naming the missing pieces when only some of them are.
    pub fn from_parts(
        url: Option<String>,
        space: Option<String>,
        user: Option<String>,
        api_token: Option<String>,
        parent_id: Option<String>,
    ) -> Result<Option<Self>> {
        let url = url.filter(|value| !value.trim().is_empty());
        let space = space.filter(|value| !value.trim().is_empty());
        let user = user.filter(|value| !value.trim().is_empty());
        let api_token = api_token.filter(|value| !value.trim().is_empty());
        let parent_id = parent_id.filter(|value| !value.trim().is_empty());

        if url.is_none() && space.is_none() && user.is_none() && api_token.is_none() {
            return Ok(None);
        }

        let missing = [
            ("url", url.is_none()),
            ("space", space.is_none()),
            ("user", user.is_none()),
            ("api token", api_token.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect::<Vec<_>>();

        match (url, space, user, api_token) {
            (Some(url), Some(space), Some(user), Some(api_token)) => Ok(Some(Self {
                url: url.trim().trim_end_matches('/').to_string(),
                space: space.trim().to_string(),
                user: user.trim().to_string(),
                api_token: api_token.trim().to_string(),
                parent_id: parent_id.map(|value| value.trim().to_string()),
            })),
            _ => bail!(
                "confluence publishing is incomplete: missing {}",
                missing.join(", ")
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDraft {
    pub title: String,
    pub body_markdown: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedPage {
    pub id: String,
    pub url: String,
    pub created: bool,
}

/// Destination for converted pages.
pub trait PagePublisher {
    fn publish(&self, page: &PageDraft) -> Result<PublishedPage>;
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl HttpConfig {
    pub fn from_env() -> Self {
        Self {
            timeout_ms: env_value_u64("WIKIDMARK_HTTP_TIMEOUT_MS", 30_000),
            max_retries: env_value_usize("WIKIDMARK_HTTP_RETRIES", 2),
            retry_delay_ms: env_value_u64("WIKIDMARK_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingPage {
    pub id: String,
    pub title: String,
    pub version: u64,
}

pub struct ConfluenceClient {
    client: Client,
    settings: ConfluenceSettings,
    http: HttpConfig,
}

impl ConfluenceClient {
    pub fn new(settings: ConfluenceSettings) -> Result<Self> {
        Self::with_http_config(settings, HttpConfig::from_env())
    }

    pub fn with_http_config(settings: ConfluenceSettings, http: HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(http.timeout_ms))
            .build()
            .context("failed to build confluence HTTP client")?;
        info!(url = %settings.url, space = %settings.space, "confluence publishing enabled");
        Ok(Self {
            client,
            settings,
            http,
        })
    }

    pub fn find_page(&self, title: &str) -> Result<Option<ExistingPage>> {
        let url = content_api_url(&self.settings.url);
        let query = lookup_query(&self.settings.space, title);
        let payload = self.send_json(|| {
            self.authorized(self.client.get(url.as_str()))
                .query(&query)
        })?;
        Ok(parse_existing_page(&payload))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.settings.user, Some(&self.settings.api_token))
    }

    fn send_json<F>(&self, build: F) -> Result<Value>
    where
        F: Fn() -> RequestBuilder,
    {
        for attempt in 0..=self.http.max_retries {
            match build().send() {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.http.max_retries && is_retryable_status(status) {
                            debug!(%status, attempt, "retrying confluence request");
                            wait_retry_delay(self.http.retry_delay_ms, attempt);
                            continue;
                        }
                        let detail = response.text().unwrap_or_default();
                        bail!(
                            "confluence request failed with HTTP {status}: {}",
                            detail.trim()
                        );
                    }
                    return response
                        .json()
                        .context("failed to decode confluence JSON response");
                }
                Err(error) => {
                    if attempt < self.http.max_retries && is_retryable_error(&error) {
                        debug!(%error, attempt, "retrying confluence request");
                        wait_retry_delay(self.http.retry_delay_ms, attempt);
                        continue;
                    }
                    return Err(error).context("failed to call confluence API");
                }
            }
        }

        bail!("confluence request exhausted retry budget")
    }
}

impl PagePublisher for ConfluenceClient {
    fn publish(&self, page: &PageDraft) -> Result<PublishedPage> {
        let body = markdown_to_storage_xhtml(&page.body_markdown);
        let existing = self
            .find_page(&page.title)
            .with_context(|| format!("failed to look up confluence page '{}'", page.title))?;

        let (payload, created) = match existing {
            Some(existing) => {
                debug!(id = %existing.id, version = existing.version, "updating confluence page");
                let url = page_api_url(&self.settings.url, &existing.id);
                let request = update_payload(&existing, &body);
                let payload = self.send_json(|| {
                    self.authorized(self.client.put(url.as_str()))
                        .json(&request)
                })?;
                (payload, false)
            }
            None => {
                debug!(title = %page.title, "creating confluence page");
                let url = content_api_url(&self.settings.url);
                let request = create_payload(
                    &self.settings.space,
                    &page.title,
                    self.settings.parent_id.as_deref(),
                    &body,
                );
                let payload = self.send_json(|| {
                    self.authorized(self.client.post(url.as_str()))
                        .json(&request)
                })?;
                (payload, true)
            }
        };

        let id = payload
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(PublishedPage {
            id,
            url: page_url(&payload)?,
            created,
        })
    }
}

pub fn content_api_url(base_url: &str) -> String {
    format!("{}/rest/api/content", base_url.trim_end_matches('/'))
}

pub fn page_api_url(base_url: &str, page_id: &str) -> String {
    format!("{}/{page_id}", content_api_url(base_url))
}

pub fn lookup_query(space: &str, title: &str) -> Vec<(&'static str, String)> {
    vec![
        ("spaceKey", space.to_string()),
        ("title", title.to_string()),
        ("expand", "version".to_string()),
    ]
}

/// First result of a title lookup, if any.
pub fn parse_existing_page(payload: &Value) -> Option<ExistingPage> {
    let first = payload.get("results")?.as_array()?.first()?;
    Some(ExistingPage {
        id: first.get("id")?.as_str()?.to_string(),
        title: first
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        version: first
            .get("version")
            .and_then(|version| version.get("number"))
            .and_then(Value::as_u64)
            .unwrap_or(1),
    })
}

pub fn create_payload(space: &str, title: &str, parent_id: Option<&str>, body: &str) -> Value {
    let mut payload = json!({
        "type": "page",
        "title": title,
        "space": { "key": space },
        "body": {
            "storage": { "value": body, "representation": STORAGE_REPRESENTATION }
        }
    });
    if let Some(parent_id) = parent_id {
        payload["ancestors"] = json!([{ "id": parent_id }]);
    }
    payload
}

/// Update keeps the existing title and bumps the version.
pub fn update_payload(existing: &ExistingPage, body: &str) -> Value {
    json!({
        "id": existing.id,
        "type": "page",
        "title": existing.title,
        "version": { "number": existing.version + 1 },
        "body": {
            "storage": { "value": body, "representation": STORAGE_REPRESENTATION }
        }
    })
}

/// Browser URL of a page response: `_links.base` + `_links.webui`.
pub fn page_url(payload: &Value) -> Result<String> {
    let links = payload
        .get("_links")
        .context("confluence response has no _links")?;
    let base = links.get("base").and_then(Value::as_str).unwrap_or_default();
    let Some(webui) = links.get("webui").and_then(Value::as_str) else {
        bail!("confluence response has no _links.webui");
    };
    Ok(format!("{base}{webui}"))
}

fn wait_retry_delay(retry_delay_ms: u64, attempt: usize) {
    let step = u64::try_from(attempt).unwrap_or(0).saturating_add(1);
    sleep(Duration::from_millis(retry_delay_ms.saturating_mul(step)));
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}
