use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub organization: Option<String>,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Environment {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub project: Option<String>,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Component {
    pub id: String,
    pub name: String,
    pub environment: String,
    #[serde(default, rename = "operationStatus")]
    pub operation_status: Option<String>,
}

pub trait Choice {
    fn id(&self) -> &str;
    fn name(&self) -> &str;

    fn label(&self) -> String {
        format!("{} ({})", self.name(), self.id())
    }
}

macro_rules! impl_choice {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Choice for $ty {
                fn id(&self) -> &str {
                    &self.id
                }

                fn name(&self) -> &str {
                    &self.name
                }
            }
        )*
    };
}

impl_choice!(Organization, Project, Environment, Component);

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Embedded<T> {
    #[serde(default)]
    pub item: Vec<T>,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Page<T> {
    #[serde(rename = "_embedded", default)]
    pub embedded: Option<Embedded<T>>,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(rename = "itemsPerPage", default)]
    pub items_per_page: u32,
    #[serde(rename = "totalItems", default)]
    pub total_items: u32,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u32 {
        if self.items_per_page == 0 {
            return 1;
        }
        self.total_items.div_ceil(self.items_per_page).max(1)
    }

    pub fn into_items(self) -> Option<Vec<T>> {
        self.embedded.map(|embedded| embedded.item)
    }
}

fn first_page() -> u32 {
    1
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Event {
    pub id: String,
    pub status: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
}

impl Event {
    pub fn is_final(&self) -> bool {
        matches!(self.status.as_str(), "success" | "error")
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    #[serde(other)]
    Unknown,
}

impl StageStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl Display for StageStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Stage {
    pub id: String,
    pub name: String,
    pub status: StageStatus,
    #[serde(rename = "jobsCount", default)]
    pub jobs_count: u32,
    #[serde(rename = "completedJobsCount", default)]
    pub completed_jobs_count: u32,
    #[serde(rename = "duration", default)]
    pub duration_seconds: u64,
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize)]
pub struct Pipeline {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub stages: Vec<Stage>,
}

/// Resolved identifiers for one remote-development session. Every field is
/// written at most once.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct SessionContext {
    organization_id: Option<String>,
    project_id: Option<String>,
    environment_id: Option<String>,
    component_id: Option<String>,
    component_name: Option<String>,
    container_name: Option<String>,
    local_sync_path: Option<PathBuf>,
    ssh_private_key_path: Option<PathBuf>,
    ssh_public_key_path: Option<PathBuf>,
}

macro_rules! session_field {
    ($get:ident, $set:ident, $field:ident, $ty:ty, $borrowed:ty) => {
        pub fn $get(&self) -> Option<&$borrowed> {
            self.$field.as_deref()
        }

        pub fn $set(&mut self, value: impl Into<$ty>) {
            if self.$field.is_none() {
                self.$field = Some(value.into());
            }
        }
    };
}

impl SessionContext {
    session_field!(organization_id, set_organization_id, organization_id, String, str);
    session_field!(project_id, set_project_id, project_id, String, str);
    session_field!(environment_id, set_environment_id, environment_id, String, str);
    session_field!(component_id, set_component_id, component_id, String, str);
    session_field!(component_name, set_component_name, component_name, String, str);
    session_field!(container_name, set_container_name, container_name, String, str);
    session_field!(local_sync_path, set_local_sync_path, local_sync_path, PathBuf, std::path::Path);
    session_field!(
        ssh_private_key_path,
        set_ssh_private_key_path,
        ssh_private_key_path,
        PathBuf,
        std::path::Path
    );
    session_field!(
        ssh_public_key_path,
        set_ssh_public_key_path,
        ssh_public_key_path,
        PathBuf,
        std::path::Path
    );

    pub fn with_component(&mut self, component: &Component) {
        self.set_component_id(component.id.clone());
        self.set_component_name(component.name.clone());
        self.set_environment_id(component.environment.clone());
    }
}
