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

use crate::client::ApiClient;
use crate::steps::StepDescriptor;
use crate::writer::{asset_file, write_atomic};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::{fmt, fs, io};
use thiserror::Error;
use tracing::{debug, warn};

/// Binary files referenced by URL from inside backed-up objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    PortalTemplate,
    PortalImage,
    MapImage,
}

impl AssetKind {
    /// JSON field carrying the URL.
    pub fn field(self) -> &'static str {
        match self {
            AssetKind::PortalTemplate => "portal_template_url",
            AssetKind::PortalImage => "portal_image",
            AssetKind::MapImage => "url",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            AssetKind::PortalTemplate => "json",
            AssetKind::PortalImage | AssetKind::MapImage => "png",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetKind::PortalTemplate => f.write_str("portal template"),
            AssetKind::PortalImage => f.write_str("portal image"),
            AssetKind::MapImage => f.write_str("map image"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    pub owner_object_id: String,
    pub url: String,
    pub kind: AssetKind,
    pub local_path: PathBuf,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("downloading {url}: {cause}")]
pub struct AssetError {
    pub url: String,
    pub cause: String,
}

#[derive(Debug, Clone)]
pub struct AssetOutcome {
    pub step: String,
    pub asset: AssetRef,
    pub error: Option<AssetError>,
}

impl AssetOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Asset references carried by `items`, to be stored in `dir` next to the
/// step's JSON. Items without an `id` or with an empty URL are skipped.
pub fn discover(step: &StepDescriptor, items: &[Value], dir: &Path) -> Vec<AssetRef> {
    let mut found = Vec::new();
    for item in items {
        let Some(id) = item.get("id").and_then(Value::as_str) else {
            continue;
        };
        for kind in &step.assets {
            let url = match item.get(kind.field()).and_then(Value::as_str) {
                Some(url) if !url.trim().is_empty() => url,
                _ => continue,
            };
            found.push(AssetRef {
                owner_object_id: id.to_string(),
                url: url.to_string(),
                kind: *kind,
                local_path: asset_file(dir, &step.name, id, kind.extension()),
            });
        }
    }
    found
}

/// Fetch the asset and write it verbatim to its local path. On failure the
/// file from an earlier run is removed.
pub fn download(client: &ApiClient, asset: &AssetRef) -> Result<PathBuf, AssetError> {
    let result = fetch_and_write(client, asset);
    if result.is_err() {
        discard_stale(&asset.local_path);
    }
    result
}

fn fetch_and_write(client: &ApiClient, asset: &AssetRef) -> Result<PathBuf, AssetError> {
    let bytes = client.download(&asset.url).map_err(|err| AssetError {
        url: asset.url.clone(),
        cause: format!("{:#}", err),
    })?;
    write_atomic(&asset.local_path, &bytes).map_err(|err| AssetError {
        url: asset.url.clone(),
        cause: format!("writing {}: {}", asset.local_path.display(), err),
    })?;
    Ok(asset.local_path.clone())
}

fn discard_stale(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed stale asset file"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "could not remove stale asset file"),
    }
}
