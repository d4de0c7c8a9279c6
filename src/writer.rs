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

//! On-disk snapshot layout:
//!
//! ```text
//! <base>/<org>/<step>.json
//! <base>/<org>/<step>_<object_id>.<ext>
//! <base>/<org>/<site>/<step>.json
//! <base>/<org>/<site>/<step>_<object_id>.<ext>
//! ```
//!
//! Restore tooling locates files by exactly these names.

use crate::snapshot::{OrgSnapshot, StepResult};
use crate::steps::Shape;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
#[error("writing {}: {source}", .path.display())]
pub struct WriteError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl WriteError {
    fn at(path: &Path, source: io::Error) -> Self {
        Self {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Replace characters that cannot appear in a single path component.
/// Empty results fall back to `fallback` (usually the object id).
pub fn sanitize_component(name: &str, fallback: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        fallback.to_string()
    } else {
        cleaned
    }
}

pub fn step_file(dir: &Path, step: &str) -> PathBuf {
    dir.join(format!("{step}.json"))
}

pub fn asset_file(dir: &Path, step: &str, object_id: &str, extension: &str) -> PathBuf {
    let id = sanitize_component(object_id, "unknown");
    dir.join(format!("{step}_{id}.{extension}"))
}

/// Write through a temporary sibling and rename, so a reader never observes
/// a partially written file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}

#[derive(Debug, Clone)]
pub struct Layout {
    base: PathBuf,
}

impl Layout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn org_dir(&self, org_dir_name: &str) -> PathBuf {
        self.base.join(org_dir_name)
    }

    pub fn site_dir(&self, org_dir_name: &str, site_dir_name: &str) -> PathBuf {
        self.org_dir(org_dir_name).join(site_dir_name)
    }
}

/// Persist every step of the snapshot. Returns the JSON files written.
pub fn write(snapshot: &OrgSnapshot, base_path: &Path) -> Result<Vec<PathBuf>, WriteError> {
    let layout = Layout::new(base_path);
    let org_dir = layout.org_dir(&snapshot.dir_name);
    fs::create_dir_all(&org_dir).map_err(|err| WriteError::at(&org_dir, err))?;

    let mut written = Vec::new();
    for result in snapshot.steps.values() {
        written.extend(write_step(&org_dir, result)?);
    }

    for site in &snapshot.sites {
        let site_dir = layout.site_dir(&snapshot.dir_name, &site.dir_name);
        fs::create_dir_all(&site_dir).map_err(|err| WriteError::at(&site_dir, err))?;
        for result in site.steps.values() {
            written.extend(write_step(&site_dir, result)?);
        }
    }

    info!(
        org = %snapshot.org_name,
        files = written.len(),
        dir = %org_dir.display(),
        "snapshot written"
    );
    Ok(written)
}

fn write_step(dir: &Path, result: &StepResult) -> Result<Option<PathBuf>, WriteError> {
    let path = step_file(dir, result.name());
    let Some(items) = result.items() else {
        // A failed step must not leave an earlier run's file behind.
        return match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed stale step file");
                Ok(None)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(WriteError::at(&path, err)),
        };
    };

    let encoded = match (result.shape(), items) {
        (Shape::Document, [document]) => serde_json::to_vec_pretty(document),
        _ => serde_json::to_vec_pretty(items),
    }
    .map_err(|err| WriteError::at(&path, io::Error::other(err)))?;

    let mut bytes = encoded;
    bytes.push(b'\n');
    write_atomic(&path, &bytes).map_err(|err| WriteError::at(&path, err))?;
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{ErrorInfo, SiteSnapshot};
    use indexmap::IndexMap;
    use serde_json::{Value, json};
    use tempfile::tempdir;

    fn steps(results: Vec<StepResult>) -> IndexMap<String, StepResult> {
        results
            .into_iter()
            .map(|r| (r.name().to_string(), r))
            .collect()
    }

    fn snapshot(sites: Vec<SiteSnapshot>) -> OrgSnapshot {
        OrgSnapshot {
            org_id: "o1".into(),
            org_name: "OrgX".into(),
            dir_name: "OrgX".into(),
            steps: steps(vec![
                StepResult::success("data", Shape::Document, vec![json!({"id": "o1", "name": "OrgX"})]),
                StepResult::success("sites", Shape::List, vec![json!({"id": "s1", "name": "SiteA"})]),
            ]),
            sites,
            assets: Vec::new(),
        }
    }

    fn site(name: &str, results: Vec<StepResult>) -> SiteSnapshot {
        SiteSnapshot {
            site_id: format!("id-{name}"),
            site_name: name.into(),
            dir_name: name.into(),
            steps: steps(results),
            assets: Vec::new(),
        }
    }

    #[test]
    fn writes_documents_and_lists_in_layout() {
        let dir = tempdir().unwrap();
        let org = snapshot(vec![site(
            "SiteA",
            vec![StepResult::success(
                "wlans",
                Shape::List,
                vec![json!({"id": "w1", "ssid": "guest"})],
            )],
        )]);

        let written = write(&org, dir.path()).unwrap();

        assert_eq!(written.len(), 3);
        let data: Value =
            serde_json::from_slice(&fs::read(dir.path().join("OrgX/data.json")).unwrap()).unwrap();
        assert_eq!(data["name"], "OrgX");
        let wlans: Value = serde_json::from_slice(
            &fs::read(dir.path().join("OrgX/SiteA/wlans.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(wlans, json!([{"id": "w1", "ssid": "guest"}]));
    }

    #[test]
    fn preserves_key_order_as_received() {
        let dir = tempdir().unwrap();
        let item: Value = serde_json::from_str(r#"{"zeta": 1, "alpha": 2, "mid": 3}"#).unwrap();
        let org = snapshot(vec![site(
            "SiteA",
            vec![StepResult::success("zones", Shape::List, vec![item])],
        )]);

        write(&org, dir.path()).unwrap();

        let text = fs::read_to_string(dir.path().join("OrgX/SiteA/zones.json")).unwrap();
        let zeta = text.find("zeta").unwrap();
        let alpha = text.find("alpha").unwrap();
        let mid = text.find("mid").unwrap();
        assert!(zeta < alpha && alpha < mid);
    }

    #[test]
    fn failed_step_leaves_no_file_and_clears_stale_one() {
        let dir = tempdir().unwrap();
        let stale = dir.path().join("OrgX/SiteB/wlans.json");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, "[]").unwrap();

        let org = snapshot(vec![site(
            "SiteB",
            vec![StepResult::failure(
                "wlans",
                Shape::List,
                ErrorInfo {
                    message: "page 1: 500".into(),
                    page: Some(1),
                },
            )],
        )]);
        write(&org, dir.path()).unwrap();

        assert!(!stale.exists());
        assert!(dir.path().join("OrgX/SiteB").is_dir());
    }

    #[test]
    fn rewriting_is_byte_identical() {
        let dir = tempdir().unwrap();
        let org = snapshot(Vec::new());

        write(&org, dir.path()).unwrap();
        let first = fs::read(dir.path().join("OrgX/sites.json")).unwrap();
        write(&org, dir.path()).unwrap();
        let second = fs::read(dir.path().join("OrgX/sites.json")).unwrap();

        assert_eq!(first, second);
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("OrgX"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn sanitizes_path_components() {
        assert_eq!(sanitize_component("HQ / Lab", "s1"), "HQ _ Lab");
        assert_eq!(sanitize_component("  ", "s1"), "s1");
        assert_eq!(sanitize_component("..", "s1"), "s1");
        assert_eq!(
            asset_file(Path::new("/b"), "maps", "a/b", "png"),
            PathBuf::from("/b/maps_a_b.png")
        );
    }
}
