// mistbackup - configuration backups for Mist cloud organizations
// Copyright (C) 2026 The mistbackup contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! In-memory tree produced by one backup run.

use crate::assets::AssetOutcome;
use crate::collector::TransportError;
use crate::steps::Shape;
use indexmap::IndexMap;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub message: String,
    pub page: Option<u32>,
}

impl From<TransportError> for ErrorInfo {
    fn from(err: TransportError) -> Self {
        Self {
            message: err.to_string(),
            page: Some(err.page),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Success(Vec<Value>),
    Failure(ErrorInfo),
}

/// Outcome of one step execution. A failure never carries items.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    name: String,
    shape: Shape,
    outcome: Outcome,
}

impl StepResult {
    pub fn success(name: impl Into<String>, shape: Shape, items: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            shape,
            outcome: Outcome::Success(items),
        }
    }

    pub fn failure(name: impl Into<String>, shape: Shape, error: impl Into<ErrorInfo>) -> Self {
        Self {
            name: name.into(),
            shape,
            outcome: Outcome::Failure(error.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn status(&self) -> StepStatus {
        match self.outcome {
            Outcome::Success(_) => StepStatus::Success,
            Outcome::Failure(_) => StepStatus::Failure,
        }
    }

    pub fn items(&self) -> Option<&[Value]> {
        match &self.outcome {
            Outcome::Success(items) => Some(items),
            Outcome::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        match &self.outcome {
            Outcome::Success(_) => None,
            Outcome::Failure(err) => Some(err),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SiteSnapshot {
    pub site_id: String,
    pub site_name: String,
    /// Directory name under the org directory.
    pub dir_name: String,
    pub steps: IndexMap<String, StepResult>,
    pub assets: Vec<AssetOutcome>,
}

#[derive(Debug, Clone)]
pub struct OrgSnapshot {
    pub org_id: String,
    pub org_name: String,
    /// Directory name under the backup folder.
    pub dir_name: String,
    pub steps: IndexMap<String, StepResult>,
    pub sites: Vec<SiteSnapshot>,
    pub assets: Vec<AssetOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedStep {
    pub scope: String,
    pub step: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAsset {
    pub scope: String,
    pub step: String,
    pub object_id: String,
    pub message: String,
}

/// What an operator needs to decide on a selective re-run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub total_steps: usize,
    pub total_assets: usize,
    pub failed_steps: Vec<FailedStep>,
    pub failed_assets: Vec<FailedAsset>,
}

impl Summary {
    pub fn is_clean(&self) -> bool {
        self.failed_steps.is_empty() && self.failed_assets.is_empty()
    }

    fn add(&mut self, scope: &str, steps: &IndexMap<String, StepResult>, assets: &[AssetOutcome]) {
        self.total_steps += steps.len();
        self.total_assets += assets.len();
        for result in steps.values() {
            if let Some(err) = result.error() {
                self.failed_steps.push(FailedStep {
                    scope: scope.to_string(),
                    step: result.name().to_string(),
                    message: err.message.clone(),
                });
            }
        }
        for outcome in assets {
            if let Some(err) = &outcome.error {
                self.failed_assets.push(FailedAsset {
                    scope: scope.to_string(),
                    step: outcome.step.clone(),
                    object_id: outcome.asset.owner_object_id.clone(),
                    message: err.to_string(),
                });
            }
        }
    }
}

impl OrgSnapshot {
    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        summary.add(&format!("org {}", self.org_name), &self.steps, &self.assets);
        for site in &self.sites {
            summary.add(&format!("site {}", site.site_name), &site.steps, &site.assets);
        }
        summary
    }
}
