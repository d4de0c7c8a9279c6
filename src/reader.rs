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

//! Loads a snapshot directory back, using the same file names the writer
//! produces.

use crate::steps::{Level, StepRegistry};
use crate::writer::step_file;
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct LoadedStep {
    pub name: String,
    /// `None` when the step file is absent (the step failed during backup).
    pub document: Option<Value>,
}

impl LoadedStep {
    pub fn item_count(&self) -> Option<usize> {
        match &self.document {
            Some(Value::Array(items)) => Some(items.len()),
            Some(_) => Some(1),
            None => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedSite {
    pub dir_name: String,
    pub steps: Vec<LoadedStep>,
}

impl LoadedSite {
    /// Site id as recorded by the `info` step, when present.
    pub fn site_id(&self) -> Option<&str> {
        self.steps
            .iter()
            .find(|s| s.name == "info")?
            .document
            .as_ref()?
            .get("id")?
            .as_str()
    }
}

#[derive(Debug, Clone)]
pub struct LoadedSnapshot {
    pub org_dir: PathBuf,
    pub steps: Vec<LoadedStep>,
    pub sites: Vec<LoadedSite>,
}

pub fn load(org_dir: &Path, registry: &StepRegistry) -> Result<LoadedSnapshot> {
    if !org_dir.is_dir() {
        anyhow::bail!("{} is not a snapshot directory", org_dir.display());
    }

    let steps = load_steps(org_dir, registry, Level::Org)?;

    let mut site_dirs = Vec::new();
    for entry in fs::read_dir(org_dir).with_context(|| format!("reading {:?}", org_dir))? {
        let entry = entry.with_context(|| format!("reading {:?}", org_dir))?;
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            site_dirs.push(entry.path());
        }
    }
    site_dirs.sort();

    let mut sites = Vec::with_capacity(site_dirs.len());
    for dir in site_dirs {
        sites.push(LoadedSite {
            dir_name: dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            steps: load_steps(&dir, registry, Level::Site)?,
        });
    }

    Ok(LoadedSnapshot {
        org_dir: org_dir.to_path_buf(),
        steps,
        sites,
    })
}

fn load_steps(dir: &Path, registry: &StepRegistry, level: Level) -> Result<Vec<LoadedStep>> {
    registry
        .all_steps(level)
        .iter()
        .map(|step| {
            let path = step_file(dir, &step.name);
            let document = if path.exists() {
                let contents =
                    fs::read_to_string(&path).with_context(|| format!("reading {:?}", path))?;
                let value = serde_json::from_str(&contents)
                    .with_context(|| format!("parsing {:?}", path))?;
                Some(value)
            } else {
                None
            };
            Ok(LoadedStep {
                name: step.name.clone(),
                document,
            })
        })
        .collect()
}
