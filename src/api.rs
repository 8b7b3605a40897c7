use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::RuntimeConfig;
use crate::model::{Component, Environment, Event, Organization, Page, Pipeline, Project};

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ListFilter {
    pub organization: Option<String>,
    pub project: Option<String>,
    pub environment: Option<String>,
    pub page: u32,
}

impl ListFilter {
    pub fn page(page: u32) -> Self {
        Self {
            page,
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait ResourceApi: Send + Sync {
    async fn organizations(&self, filter: &ListFilter) -> Result<Page<Organization>>;
    async fn projects(&self, filter: &ListFilter) -> Result<Page<Project>>;
    async fn environments(&self, filter: &ListFilter) -> Result<Page<Environment>>;
    async fn components(&self, filter: &ListFilter) -> Result<Page<Component>>;
    async fn component(&self, id: &str) -> Result<Component>;
    async fn event(&self, id: &str) -> Result<Event>;
    /// `None` when the pipeline no longer exists.
    async fn pipeline(&self, id: &str) -> Result<Option<Pipeline>>;
}

#[derive(Clone)]
pub struct HttpApi {
    client: Client,
    base_url: String,
}

impl HttpApi {
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/hal+json"));
        if let Some(token) = &config.token {
            headers.insert(
                "X-Auth-Token",
                HeaderValue::from_str(token).context("invalid api token header")?,
            );
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.base_url)
    }

    async fn get_json<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let url = self.endpoint(path);
        debug!(%url, ?query, "api request");
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("request to {url} was rejected"))?;

        response
            .json::<T>()
            .await
            .with_context(|| format!("failed to decode response from {url}"))
    }
}

fn list_query(filter: &ListFilter) -> Vec<(&'static str, String)> {
    let mut query = vec![("page", filter.page.max(1).to_string())];
    if let Some(organization) = filter.organization.as_deref().filter(|v| !v.is_empty()) {
        query.push(("organization", organization.to_string()));
    }
    if let Some(project) = filter.project.as_deref().filter(|v| !v.is_empty()) {
        query.push(("project", project.to_string()));
    }
    if let Some(environment) = filter.environment.as_deref().filter(|v| !v.is_empty()) {
        query.push(("environment", environment.to_string()));
    }
    query
}

#[async_trait]
impl ResourceApi for HttpApi {
    async fn organizations(&self, filter: &ListFilter) -> Result<Page<Organization>> {
        self.get_json("organizations", &list_query(filter)).await
    }

    async fn projects(&self, filter: &ListFilter) -> Result<Page<Project>> {
        self.get_json("projects", &list_query(filter)).await
    }

    async fn environments(&self, filter: &ListFilter) -> Result<Page<Environment>> {
        self.get_json("environments", &list_query(filter)).await
    }

    async fn components(&self, filter: &ListFilter) -> Result<Page<Component>> {
        let mut query = list_query(filter);
        query.push(("operationStatus", "running".to_string()));
        self.get_json("components", &query).await
    }

    async fn component(&self, id: &str) -> Result<Component> {
        self.get_json(&format!("components/{id}"), &[]).await
    }

    async fn event(&self, id: &str) -> Result<Event> {
        self.get_json(&format!("events/{id}"), &[]).await
    }

    async fn pipeline(&self, id: &str) -> Result<Option<Pipeline>> {
        let url = self.endpoint(&format!("pipelines/{id}"));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let pipeline = response
            .error_for_status()
            .with_context(|| format!("request to {url} was rejected"))?
            .json::<Pipeline>()
            .await
            .with_context(|| format!("failed to decode response from {url}"))?;
        Ok(Some(pipeline))
    }
}

#[cfg(test)]
mod tests {
    use super::{ListFilter, list_query};

    #[test]
    fn list_query_skips_unset_filters() {
        let query = list_query(&ListFilter {
            organization: Some("org".to_string()),
            project: Some(String::new()),
            environment: None,
            page: 0,
        });
        assert_eq!(
            query,
            vec![
                ("page", "1".to_string()),
                ("organization", "org".to_string())
            ]
        );
    }
}
