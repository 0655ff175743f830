use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Deployment identity ──────────────────────────────────────────────

/// Opaque deployment ID of the form `{repo_name}-{unix_timestamp}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentId(String);

impl DeploymentId {
    pub fn new(repo_name: &str, created_at: DateTime<Utc>) -> Self {
        Self(format!("{}-{}", repo_name, created_at.timestamp()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The stable serving key for this deployment.
    pub fn clean_name(&self) -> String {
        clean_name(&self.0)
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeploymentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Strip a single trailing `-{digits}` suffix. Underscores are preserved.
pub fn clean_name(deployment_id: &str) -> String {
    match deployment_id.rsplit_once('-') {
        Some((head, tail))
            if !head.is_empty() && !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) =>
        {
            head.to_string()
        }
        _ => deployment_id.to_string(),
    }
}

/// Human-facing project name: clean name with underscores shown as spaces.
pub fn display_name(serving_key: &str) -> String {
    clean_name(serving_key).replace('_', " ")
}

/// Whether `name` is usable as a single path segment under the serving root.
pub fn is_valid_project_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && name != ".."
}

// ── Project type ─────────────────────────────────────────────────────

/// Kind of buildable project, derived from marker files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Node,
    Go,
    Python,
    Static,
    Unknown,
}

impl ProjectType {
    /// Types checked by the classifier, in priority order, with their marker file.
    pub const MARKERS: [(ProjectType, &'static str); 4] = [
        (ProjectType::Node, "package.json"),
        (ProjectType::Go, "go.mod"),
        (ProjectType::Python, "requirements.txt"),
        (ProjectType::Static, "index.html"),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::Node => "node",
            ProjectType::Go => "go",
            ProjectType::Python => "python",
            ProjectType::Static => "static",
            ProjectType::Unknown => "unknown",
        }
    }

    /// Whether the output of this type is published into the serving root
    /// (as opposed to being launched as a long-lived process).
    pub fn is_published(&self) -> bool {
        matches!(
            self,
            ProjectType::Node | ProjectType::Static | ProjectType::Unknown
        )
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "node" => Ok(ProjectType::Node),
            "go" => Ok(ProjectType::Go),
            "python" => Ok(ProjectType::Python),
            "static" => Ok(ProjectType::Static),
            "unknown" => Ok(ProjectType::Unknown),
            _ => Err(format!(
                "Invalid project type '{}'. Valid values: node, go, python, static, unknown",
                s
            )),
        }
    }
}

// ── Lifecycle ────────────────────────────────────────────────────────

/// Pipeline stage of a deployment. `Live` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStage {
    Cloning,
    Classifying,
    Building,
    Publishing,
    Live,
    Failed,
}

impl DeploymentStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStage::Live | DeploymentStage::Failed)
    }

    /// Forward transitions only; `Failed` is reachable from any non-terminal stage.
    pub fn can_transition_to(&self, next: DeploymentStage) -> bool {
        use DeploymentStage::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Cloning, Classifying)
            | (Classifying, Building)
            | (Building, Publishing)
            | (Building, Live)
            | (Publishing, Live) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DeploymentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentStage::Cloning => "cloning",
            DeploymentStage::Classifying => "classifying",
            DeploymentStage::Building => "building",
            DeploymentStage::Publishing => "publishing",
            DeploymentStage::Live => "live",
            DeploymentStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Lifecycle record for one clone-build-publish attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub repo_name: String,
    pub owner: String,
    pub stage: DeploymentStage,
    pub project_type: Option<ProjectType>,
    pub deploy_url: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    pub fn new(id: DeploymentId, owner: &str, repo_name: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            repo_name: repo_name.to_string(),
            owner: owner.to_string(),
            stage: DeploymentStage::Cloning,
            project_type: None,
            deploy_url: None,
            error: None,
            created_at,
            updated_at: created_at,
        }
    }
}
