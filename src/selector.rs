use anyhow::{Context, Result};
use async_trait::async_trait;
use std::future::Future;
use std::path::PathBuf;
use tracing::debug;

use crate::api::{ListFilter, ResourceApi};
use crate::error::BurrowError;
use crate::model::{Choice, Page, SessionContext};
use crate::prompt::{Prompter, Selection, choose_or_navigate};

#[derive(Debug, Clone, Default)]
pub struct Preselected {
    pub organization: Option<String>,
    pub project: Option<String>,
    pub environment: Option<String>,
    pub component: Option<String>,
    pub container: Option<String>,
    pub sync_folder: Option<PathBuf>,
}

#[async_trait]
pub trait ContainerSource: Send + Sync {
    async fn containers(&self, component_name: &str) -> Result<Vec<String>>;
}

pub struct ResourceSelector<'a, A: ?Sized, P: ?Sized> {
    api: &'a A,
    prompter: &'a mut P,
}

impl<'a, A, P> ResourceSelector<'a, A, P>
where
    A: ResourceApi + ?Sized,
    P: Prompter + ?Sized,
{
    pub fn new(api: &'a A, prompter: &'a mut P) -> Self {
        Self { api, prompter }
    }

    pub async fn resolve_component(
        &mut self,
        preselected: &Preselected,
        session: &mut SessionContext,
    ) -> Result<()> {
        if let Some(component_id) = non_empty(&preselected.component) {
            let component = self
                .api
                .component(component_id)
                .await
                .with_context(|| format!("failed to load component {component_id}"))?;
            debug!(component = %component.id, environment = %component.environment, "component preselected");
            session.with_component(&component);
            return Ok(());
        }

        if let Some(environment_id) = non_empty(&preselected.environment) {
            if let Some(organization_id) = non_empty(&preselected.organization) {
                session.set_organization_id(organization_id);
            }
            if let Some(project_id) = non_empty(&preselected.project) {
                session.set_project_id(project_id);
            }
            session.set_environment_id(environment_id);
        } else {
            self.select_organization(non_empty(&preselected.organization), session)
                .await?;
            self.select_project(non_empty(&preselected.project), session)
                .await?;
            self.select_environment(session).await?;
        }

        self.select_component(session).await
    }

    pub async fn select_organization(
        &mut self,
        default: Option<&str>,
        session: &mut SessionContext,
    ) -> Result<()> {
        if let Some(id) = default {
            session.set_organization_id(id);
            return Ok(());
        }

        let api = self.api;
        let organization = select_paged(
            &mut *self.prompter,
            "organizations",
            "Select organization",
            |page| async move { api.organizations(&ListFilter::page(page)).await },
        )
        .await?;
        session.set_organization_id(organization.id);
        Ok(())
    }

    pub async fn select_project(
        &mut self,
        default: Option<&str>,
        session: &mut SessionContext,
    ) -> Result<()> {
        if let Some(id) = default {
            session.set_project_id(id);
            return Ok(());
        }

        let api = self.api;
        let base = ListFilter {
            organization: session.organization_id().map(str::to_string),
            ..ListFilter::default()
        };
        let project = select_paged(&mut *self.prompter, "projects", "Select project", |page| {
            let filter = ListFilter {
                page,
                ..base.clone()
            };
            async move { api.projects(&filter).await }
        })
        .await?;
        session.set_project_id(project.id);
        Ok(())
    }

    pub async fn select_environment(&mut self, session: &mut SessionContext) -> Result<()> {
        let api = self.api;
        let base = ListFilter {
            organization: session.organization_id().map(str::to_string),
            project: session.project_id().map(str::to_string),
            ..ListFilter::default()
        };
        let environment = select_paged(
            &mut *self.prompter,
            "environments",
            "Select environment",
            |page| {
                let filter = ListFilter {
                    page,
                    ..base.clone()
                };
                async move { api.environments(&filter).await }
            },
        )
        .await?;
        session.set_environment_id(environment.id);
        Ok(())
    }

    pub async fn select_component(&mut self, session: &mut SessionContext) -> Result<()> {
        let api = self.api;
        let base = ListFilter {
            environment: session.environment_id().map(str::to_string),
            ..ListFilter::default()
        };
        let component = select_paged(
            &mut *self.prompter,
            "components",
            "Select component",
            |page| {
                let filter = ListFilter {
                    page,
                    ..base.clone()
                };
                async move { api.components(&filter).await }
            },
        )
        .await?;
        session.with_component(&component);
        Ok(())
    }

    pub async fn select_container<C>(
        &mut self,
        source: &C,
        default: Option<&str>,
        session: &mut SessionContext,
    ) -> Result<()>
    where
        C: ContainerSource + ?Sized,
    {
        if let Some(name) = default.filter(|value| !value.is_empty()) {
            session.set_container_name(name);
            return Ok(());
        }

        let component_name = session
            .component_name()
            .context("a component must be resolved before its container")?
            .to_string();
        let mut containers = source.containers(&component_name).await?;
        match containers.len() {
            0 => Err(BurrowError::empty("containers").into()),
            1 => {
                let name = containers.remove(0);
                debug!(container = %name, "single container auto-selected");
                session.set_container_name(name);
                Ok(())
            }
            _ => {
                let index = self.prompter.select("Select container", &containers)?;
                let name = containers
                    .get(index)
                    .cloned()
                    .with_context(|| format!("selection {index} is out of range"))?;
                session.set_container_name(name);
                Ok(())
            }
        }
    }

    pub fn select_sync_folder(
        &mut self,
        default: Option<PathBuf>,
        session: &mut SessionContext,
    ) -> Result<()> {
        if let Some(path) = default.filter(|path| !path.as_os_str().is_empty()) {
            session.set_local_sync_path(path);
            return Ok(());
        }

        let cwd = std::env::current_dir().context("failed to resolve working directory")?;
        let answer = self
            .prompter
            .input_with_default("Sync folder", &cwd.display().to_string())?;
        let path = if answer.trim().is_empty() {
            cwd
        } else {
            PathBuf::from(answer.trim())
        };
        session.set_local_sync_path(path);
        Ok(())
    }
}

async fn select_paged<T, P, F, Fut>(
    prompter: &mut P,
    kind: &'static str,
    prompt: &str,
    mut fetch: F,
) -> Result<T>
where
    T: Choice,
    P: Prompter + ?Sized,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut page = 1;
    loop {
        let listing = fetch(page)
            .await
            .with_context(|| format!("failed to list {kind}"))?;
        let current_page = listing.page.max(1);
        let total_pages = listing.total_pages();
        debug!(kind, current_page, total_pages, "fetched selection page");

        let Some(mut items) = listing.into_items().filter(|items| !items.is_empty()) else {
            return Err(BurrowError::empty(kind).into());
        };

        let labels = items.iter().map(Choice::label).collect::<Vec<_>>();
        match choose_or_navigate(prompter, prompt, &labels, current_page, total_pages)? {
            Selection::Item(index) => return Ok(items.swap_remove(index)),
            Selection::Page(next) => page = next,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.trim().is_empty())
}
