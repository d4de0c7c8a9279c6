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

//! Organization → sites traversal.
//!
//! Org steps run first, in registration order. The site list comes from the
//! org-level sites step; if that step failed the run stops before touching
//! the disk. Each site then runs the site-level steps. A failing step is
//! recorded as a failure and the traversal moves on.

use crate::assets::{self, AssetOutcome};
use crate::client::ApiClient;
use crate::collector::Collector;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::snapshot::{OrgSnapshot, SiteSnapshot, StepResult, StepStatus};
use crate::steps::{Level, RegistryError, StepRegistry};
use crate::writer::{self, Layout, WriteError, sanitize_component};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("cannot enumerate sites: step `{step}` {reason}")]
    Enumeration { step: String, reason: String },
    #[error(transparent)]
    Write(#[from] WriteError),
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Directory name to use instead of the name reported by the org info step.
    pub org_name: Option<String>,
    /// Only traverse sites whose id or name is listed. Empty means all.
    pub sites: Vec<String>,
}

#[derive(Debug)]
pub struct BackupReport {
    pub snapshot: OrgSnapshot,
    pub org_dir: PathBuf,
    pub files: Vec<PathBuf>,
}

struct SiteEntry {
    id: String,
    name: String,
}

pub struct Controller<'a> {
    client: &'a ApiClient,
    registry: &'a StepRegistry,
    reporter: &'a mut dyn ProgressReporter,
    collector: Collector<'a>,
    layout: Layout,
}

impl<'a> Controller<'a> {
    pub fn new(
        client: &'a ApiClient,
        registry: &'a StepRegistry,
        reporter: &'a mut dyn ProgressReporter,
        base_path: &Path,
        page_limit: u32,
    ) -> Self {
        Self {
            client,
            registry,
            reporter,
            collector: Collector::new(client, page_limit),
            layout: Layout::new(base_path),
        }
    }

    /// Traverse the org and write the snapshot once at the end.
    pub fn run(&mut self, org_id: &str, options: &RunOptions) -> Result<BackupReport, BackupError> {
        let snapshot = self.traverse(org_id, options)?;
        let files = writer::write(&snapshot, self.layout.base())?;
        let org_dir = self.layout.org_dir(&snapshot.dir_name);
        Ok(BackupReport {
            snapshot,
            org_dir,
            files,
        })
    }

    /// Build the in-memory snapshot. Asset files are written as they are
    /// downloaded; step JSON is left to the writer.
    pub fn traverse(&mut self, org_id: &str, options: &RunOptions) -> Result<OrgSnapshot, BackupError> {
        self.registry.validate()?;

        let org_scope = format!("org {}", options.org_name.as_deref().unwrap_or(org_id));
        self.reporter.report(&ProgressEvent::ScopeStarted {
            scope: org_scope.clone(),
        });
        let steps = self.run_steps(Level::Org, org_id, &org_scope);

        let sites = self.enumerate_sites(&steps)?;

        let org_name = options
            .org_name
            .clone()
            .or_else(|| org_name_from(&steps))
            .unwrap_or_else(|| org_id.to_string());
        let dir_name = sanitize_component(&org_name, org_id);
        let org_dir = self.layout.org_dir(&dir_name);
        let org_assets = self.download_assets(Level::Org, &steps, &org_dir, &org_scope);

        let selected: Vec<SiteEntry> = sites
            .into_iter()
            .filter(|site| {
                options.sites.is_empty()
                    || options.sites.iter().any(|s| *s == site.id || *s == site.name)
            })
            .collect();
        for wanted in &options.sites {
            if !selected.iter().any(|site| site.id == *wanted || site.name == *wanted) {
                warn!(site = %wanted, "site filter matched no site of the org");
            }
        }
        info!(org = %org_name, sites = selected.len(), "enumerated sites");

        let mut used_dirs = HashSet::new();
        let mut site_snapshots = Vec::with_capacity(selected.len());
        for site in selected {
            let site_dir_name = unique_dir_name(&mut used_dirs, &site);

            let scope = format!("site {}", site.name);
            self.reporter.report(&ProgressEvent::ScopeStarted {
                scope: scope.clone(),
            });
            let site_steps = self.run_steps(Level::Site, &site.id, &scope);
            let site_dir = self.layout.site_dir(&dir_name, &site_dir_name);
            let site_assets = self.download_assets(Level::Site, &site_steps, &site_dir, &scope);

            site_snapshots.push(SiteSnapshot {
                site_id: site.id,
                site_name: site.name,
                dir_name: site_dir_name,
                steps: site_steps,
                assets: site_assets,
            });
        }

        Ok(OrgSnapshot {
            org_id: org_id.to_string(),
            org_name,
            dir_name,
            steps,
            sites: site_snapshots,
            assets: org_assets,
        })
    }

    fn run_steps(&mut self, level: Level, scope_id: &str, scope: &str) -> IndexMap<String, StepResult> {
        let registry = self.registry;
        let mut results = IndexMap::new();
        for step in registry.all_steps(level) {
            self.reporter.report(&ProgressEvent::StepStarted {
                scope: scope.to_string(),
                step: step.name.clone(),
            });

            let shape = step.capability.shape();
            let result = match self.collector.collect(&step.capability, scope_id, &step.params) {
                Ok(items) => StepResult::success(step.name.clone(), shape, items),
                Err(err) => {
                    warn!(%level, scope_id, step = %step.name, error = %err, "step failed");
                    StepResult::failure(step.name.clone(), shape, err)
                }
            };

            self.reporter.report(&ProgressEvent::StepFinished {
                scope: scope.to_string(),
                step: step.name.clone(),
                status: result.status(),
                items: result.items().map_or(0, <[Value]>::len),
            });
            results.insert(step.name.clone(), result);
        }
        results
    }

    fn enumerate_sites(&self, steps: &IndexMap<String, StepResult>) -> Result<Vec<SiteEntry>, BackupError> {
        let source = self.registry.site_source();
        let Some(result) = steps.get(source) else {
            return Err(BackupError::Enumeration {
                step: source.to_string(),
                reason: "did not run".into(),
            });
        };
        let Some(items) = result.items() else {
            let reason = result
                .error()
                .map(|e| format!("failed: {}", e.message))
                .unwrap_or_else(|| "failed".into());
            return Err(BackupError::Enumeration {
                step: source.to_string(),
                reason,
            });
        };

        let mut sites = Vec::with_capacity(items.len());
        for item in items {
            let Some(id) = item.get("id").and_then(Value::as_str) else {
                warn!(?item, "skipping site without an id");
                continue;
            };
            let name = item
                .get("name")
                .and_then(Value::as_str)
                .filter(|n| !n.trim().is_empty())
                .unwrap_or(id);
            sites.push(SiteEntry {
                id: id.to_string(),
                name: name.to_string(),
            });
        }
        Ok(sites)
    }

    /// Download the assets referenced by every successful step of a scope.
    /// Outcomes are recorded and never change the step status.
    fn download_assets(
        &mut self,
        level: Level,
        steps: &IndexMap<String, StepResult>,
        dir: &Path,
        scope: &str,
    ) -> Vec<AssetOutcome> {
        let registry = self.registry;
        let mut outcomes = Vec::new();
        for step in registry.all_steps(level) {
            if step.assets.is_empty() {
                continue;
            }
            let Some(items) = steps.get(&step.name).and_then(StepResult::items) else {
                continue;
            };
            for asset in assets::discover(step, items, dir) {
                let error = assets::download(self.client, &asset).err();
                if let Some(err) = &error {
                    warn!(scope, step = %step.name, object_id = %asset.owner_object_id, error = %err, "asset download failed");
                }
                self.reporter.report(&ProgressEvent::AssetFinished {
                    scope: scope.to_string(),
                    step: step.name.clone(),
                    object_id: asset.owner_object_id.clone(),
                    kind: asset.kind,
                    ok: error.is_none(),
                });
                outcomes.push(AssetOutcome {
                    step: step.name.clone(),
                    asset,
                    error,
                });
            }
        }
        outcomes
    }
}

/// The sanitized site name, or `<name>_<id>` (then `<name>_<id>_<n>`) when
/// an earlier site already claimed it.
fn unique_dir_name(used: &mut HashSet<String>, site: &SiteEntry) -> String {
    let base = sanitize_component(&site.name, &site.id);
    if used.insert(base.clone()) {
        return base;
    }
    let with_id = format!("{base}_{}", sanitize_component(&site.id, "site"));
    let mut candidate = with_id.clone();
    let mut n = 2;
    while !used.insert(candidate.clone()) {
        candidate = format!("{with_id}_{n}");
        n += 1;
    }
    candidate
}

fn org_name_from(steps: &IndexMap<String, StepResult>) -> Option<String> {
    let data = steps.get("data")?;
    if data.status() != StepStatus::Success {
        return None;
    }
    data.items()?
        .first()?
        .get("name")?
        .as_str()
        .filter(|n| !n.trim().is_empty())
        .map(str::to_string)
}
