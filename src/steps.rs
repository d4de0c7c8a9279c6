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

//! Declarative table of the resources fetched during a backup.
//!
//! Steps run in registration order within a level. The only cross-level
//! dependency is explicit: site-level steps need the org step named by
//! [`StepRegistry::site_source`], which yields the site list.

use crate::assets::AssetKind;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub const SITES_STEP: &str = "sites";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Org,
    Site,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Org => f.write_str("org"),
            Level::Site => f.write_str("site"),
        }
    }
}

/// What an endpoint returns: a (paged) list of objects, or a single object
/// such as org info or settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    List,
    Document,
}

/// "Fetch resource X for scope Y". The path is relative to the API base URL
/// and contains a `{scope}` placeholder for the org or site id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    path: String,
    shape: Shape,
}

impl Capability {
    pub fn list(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            shape: Shape::List,
        }
    }

    pub fn document(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            shape: Shape::Document,
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn path_for(&self, scope_id: &str) -> String {
        self.path.replace("{scope}", scope_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDescriptor {
    pub name: String,
    pub capability: Capability,
    pub params: BTreeMap<String, String>,
    /// Asset fields the items of this step may reference.
    pub assets: Vec<AssetKind>,
}

impl StepDescriptor {
    pub fn new(name: impl Into<String>, capability: Capability) -> Self {
        Self {
            name: name.into(),
            capability,
            params: BTreeMap::new(),
            assets: Vec::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_assets(mut self, kinds: &[AssetKind]) -> Self {
        self.assets.extend_from_slice(kinds);
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("step `{name}` is already registered at the {level} level")]
    Duplicate { level: Level, name: String },
    #[error("site-level steps need the org-level `{0}` step, which is not registered")]
    MissingSiteSource(String),
}

#[derive(Debug, Clone)]
pub struct StepRegistry {
    org: Vec<StepDescriptor>,
    site: Vec<StepDescriptor>,
    site_source: String,
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StepRegistry {
    pub fn new() -> Self {
        Self {
            org: Vec::new(),
            site: Vec::new(),
            site_source: SITES_STEP.to_string(),
        }
    }

    pub fn register(&mut self, level: Level, step: StepDescriptor) -> Result<(), RegistryError> {
        let steps = match level {
            Level::Org => &mut self.org,
            Level::Site => &mut self.site,
        };
        if steps.iter().any(|s| s.name == step.name) {
            return Err(RegistryError::Duplicate {
                level,
                name: step.name,
            });
        }
        steps.push(step);
        Ok(())
    }

    pub fn all_steps(&self, level: Level) -> &[StepDescriptor] {
        match level {
            Level::Org => &self.org,
            Level::Site => &self.site,
        }
    }

    /// Org-level step whose items enumerate the sites.
    pub fn site_source(&self) -> &str {
        &self.site_source
    }

    pub fn validate(&self) -> Result<(), RegistryError> {
        if !self.site.is_empty() && !self.org.iter().any(|s| s.name == self.site_source) {
            return Err(RegistryError::MissingSiteSource(self.site_source.clone()));
        }
        Ok(())
    }

    /// The full organization backup table.
    pub fn standard() -> Self {
        let org_list = |name: &str, resource: &str| {
            StepDescriptor::new(
                name,
                Capability::list(format!("api/v1/orgs/{{scope}}/{resource}")),
            )
        };
        let site_list = |name: &str, resource: &str| {
            StepDescriptor::new(
                name,
                Capability::list(format!("api/v1/sites/{{scope}}/{resource}")),
            )
        };
        let portal = [AssetKind::PortalTemplate, AssetKind::PortalImage];

        let org = vec![
            StepDescriptor::new("data", Capability::document("api/v1/orgs/{scope}")),
            org_list(SITES_STEP, "sites"),
            StepDescriptor::new("settings", Capability::document("api/v1/orgs/{scope}/setting")),
            org_list("webhooks", "webhooks"),
            org_list("assetfilters", "assetfilters"),
            org_list("alarmtemplates", "alarmtemplates"),
            org_list("deviceprofiles", "deviceprofiles"),
            org_list("hubprofiles", "deviceprofiles").param("type", "gateway"),
            org_list("mxclusters", "mxclusters"),
            org_list("mxtunnels", "mxtunnels"),
            org_list("psks", "psks"),
            org_list("pskportals", "pskportals"),
            org_list("rftemplates", "rftemplates"),
            org_list("networktemplates", "networktemplates"),
            org_list("evpn_topologies", "evpn_topologies"),
            org_list("services", "services"),
            org_list("networks", "networks"),
            org_list("gatewaytemplates", "gatewaytemplates"),
            org_list("vpns", "vpns"),
            org_list("secpolicies", "secpolicies"),
            org_list("sitegroups", "sitegroups"),
            org_list("ssos", "ssos"),
            org_list("ssoroles", "ssoroles"),
            org_list("templates", "templates"),
            org_list("wxrules", "wxrules"),
            org_list("wxtags", "wxtags"),
            org_list("wxtunnels", "wxtunnels"),
            org_list("nactags", "nactags"),
            org_list("nacrules", "nacrules"),
            org_list("wlans", "wlans").with_assets(&portal),
        ];

        let site = vec![
            StepDescriptor::new("info", Capability::document("api/v1/sites/{scope}")),
            StepDescriptor::new("settings", Capability::document("api/v1/sites/{scope}/setting")),
            site_list("assets", "assets"),
            site_list("assetfilters", "assetfilters"),
            site_list("beacons", "beacons"),
            site_list("maps", "maps").with_assets(&[AssetKind::MapImage]),
            site_list("psks", "psks"),
            site_list("rssizones", "rssizones"),
            site_list("vbeacons", "vbeacons"),
            site_list("webhooks", "webhooks"),
            site_list("wlans", "wlans").with_assets(&portal),
            site_list("wxrules", "wxrules"),
            site_list("wxtags", "wxtags"),
            site_list("wxtunnels", "wxtunnels"),
            site_list("zones", "zones"),
        ];

        Self {
            org,
            site,
            site_source: SITES_STEP.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn standard_table_is_valid_and_unique() {
        let registry = StepRegistry::standard();
        registry.validate().unwrap();

        for level in [Level::Org, Level::Site] {
            let names: HashSet<_> = registry.all_steps(level).iter().map(|s| &s.name).collect();
            assert_eq!(names.len(), registry.all_steps(level).len());
        }

        let org = registry.all_steps(Level::Org);
        let sites_pos = org.iter().position(|s| s.name == SITES_STEP).unwrap();
        let data_pos = org.iter().position(|s| s.name == "data").unwrap();
        assert!(data_pos < sites_pos);
    }

    #[test]
    fn hubprofiles_filter_by_gateway_type() {
        let registry = StepRegistry::standard();
        let hub = registry
            .all_steps(Level::Org)
            .iter()
            .find(|s| s.name == "hubprofiles")
            .unwrap();
        assert_eq!(hub.params.get("type").map(String::as_str), Some("gateway"));
        assert_eq!(
            hub.capability.path_for("o1"),
            "api/v1/orgs/o1/deviceprofiles"
        );
    }

    #[test]
    fn registration_order_is_execution_order() {
        let mut registry = StepRegistry::new();
        for name in ["sites", "wlans", "psks"] {
            registry
                .register(
                    Level::Org,
                    StepDescriptor::new(name, Capability::list(format!("api/v1/orgs/{{scope}}/{name}"))),
                )
                .unwrap();
        }
        let order: Vec<_> = registry
            .all_steps(Level::Org)
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(order, ["sites", "wlans", "psks"]);
    }

    #[test]
    fn rejects_duplicate_names_per_level() {
        let mut registry = StepRegistry::new();
        let step = StepDescriptor::new("wlans", Capability::list("api/v1/orgs/{scope}/wlans"));
        registry.register(Level::Org, step.clone()).unwrap();
        registry.register(Level::Site, step.clone()).unwrap();

        let err = registry.register(Level::Org, step).unwrap_err();
        assert_eq!(
            err,
            RegistryError::Duplicate {
                level: Level::Org,
                name: "wlans".into()
            }
        );
    }

    #[test]
    fn site_steps_require_the_sites_step() {
        let mut registry = StepRegistry::new();
        registry
            .register(
                Level::Site,
                StepDescriptor::new("maps", Capability::list("api/v1/sites/{scope}/maps")),
            )
            .unwrap();
        assert_eq!(
            registry.validate().unwrap_err(),
            RegistryError::MissingSiteSource("sites".into())
        );

        registry
            .register(
                Level::Org,
                StepDescriptor::new("sites", Capability::list("api/v1/orgs/{scope}/sites")),
            )
            .unwrap();
        registry.validate().unwrap();
    }
}
