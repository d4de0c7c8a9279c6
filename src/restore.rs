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

//! Replays a snapshot directory into a destination organization.
//!
//! Org documents are updated first, then org objects are created in
//! dependency order. Sites are created at their position in that order and
//! each site's objects follow immediately. Every object created gets its new
//! id recorded, and ids inside later objects are rewritten through that
//! map. Objects that still referenced unknown ids when created are updated
//! once more at the end.

use crate::assets::AssetKind;
use crate::client::ApiClient;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::reader::{LoadedSnapshot, LoadedStep};
use crate::snapshot::StepStatus;
use crate::steps::{Level, SITES_STEP, StepRegistry};
use crate::writer::asset_file;
use anyhow::{Context, Result};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Fields the API assigns itself; sending them back is rejected or
/// pointless.
const READ_ONLY_FIELDS: &[&str] = &[
    "id",
    "msp_id",
    "org_id",
    "site_id",
    "site_ids",
    "url",
    "bg_image_url",
    "portal_template_url",
    "portal_sso_url",
    "thumbnail_url",
    "template_url",
    "ui_url",
];

/// UUID-looking values that are not references to other objects.
const NON_REFERENCE_FIELDS: &[&str] = &[
    "issuer",
    "idp_sso_url",
    "custom_logout_url",
    "sso_issuer",
    "sso_idp_sso_url",
    "ibeacon_uuid",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreAction {
    /// PUT the step's single document.
    Update,
    /// POST each item and record the id the API assigned.
    Create,
    /// POST the whole list in one request.
    Import,
}

#[derive(Debug, Clone)]
pub struct RestoreStep {
    pub name: String,
    pub action: RestoreAction,
    path: String,
}

impl RestoreStep {
    pub fn new(name: impl Into<String>, action: RestoreAction, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action,
            path: path.into(),
        }
    }

    pub fn path_for(&self, scope_id: &str) -> String {
        self.path.replace("{scope}", scope_id)
    }
}

/// Objects a restore would send, per scope and step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    pub scope: String,
    pub step: String,
    pub objects: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RestorePlan {
    org: Vec<RestoreStep>,
    site: Vec<RestoreStep>,
}

impl RestorePlan {
    pub fn new(org: Vec<RestoreStep>, site: Vec<RestoreStep>) -> Self {
        Self { org, site }
    }

    pub fn steps(&self, level: Level) -> &[RestoreStep] {
        match level {
            Level::Org => &self.org,
            Level::Site => &self.site,
        }
    }

    /// Restore order for the objects of [`StepRegistry::standard`]. Objects
    /// that others refer to come first.
    pub fn standard() -> Self {
        use RestoreAction::{Create, Import, Update};

        let org_create = |name: &str, resource: &str| {
            RestoreStep::new(name, Create, format!("api/v1/orgs/{{scope}}/{resource}"))
        };
        let site_create = |name: &str| {
            RestoreStep::new(name, Create, format!("api/v1/sites/{{scope}}/{name}"))
        };

        let org = vec![
            RestoreStep::new("data", Update, "api/v1/orgs/{scope}"),
            RestoreStep::new("settings", Update, "api/v1/orgs/{scope}/setting"),
            org_create("assetfilters", "assetfilters"),
            org_create("deviceprofiles", "deviceprofiles"),
            org_create("hubprofiles", "deviceprofiles"),
            org_create("evpn_topologies", "evpn_topologies"),
            org_create("secpolicies", "secpolicies"),
            org_create("networktemplates", "networktemplates"),
            org_create("networks", "networks"),
            org_create("services", "services"),
            org_create("vpns", "vpns"),
            org_create("gatewaytemplates", "gatewaytemplates"),
            org_create("alarmtemplates", "alarmtemplates"),
            org_create("rftemplates", "rftemplates"),
            org_create("webhooks", "webhooks"),
            org_create("mxclusters", "mxclusters"),
            org_create("mxtunnels", "mxtunnels"),
            org_create("wxtunnels", "wxtunnels"),
            org_create("sitegroups", "sitegroups"),
            org_create(SITES_STEP, "sites"),
            org_create("templates", "templates"),
            org_create("wlans", "wlans"),
            org_create("wxtags", "wxtags"),
            org_create("wxrules", "wxrules"),
            org_create("pskportals", "pskportals"),
            RestoreStep::new("psks", Import, "api/v1/orgs/{scope}/psks/import"),
            org_create("nactags", "nactags"),
            org_create("nacrules", "nacrules"),
            org_create("ssos", "ssos"),
            org_create("ssoroles", "ssoroles"),
        ];

        let site = vec![
            RestoreStep::new("settings", Update, "api/v1/sites/{scope}/setting"),
            site_create("maps"),
            site_create("zones"),
            site_create("rssizones"),
            site_create("assets"),
            site_create("assetfilters"),
            site_create("beacons"),
            RestoreStep::new("psks", Import, "api/v1/sites/{scope}/psks/import"),
            site_create("vbeacons"),
            site_create("webhooks"),
            site_create("wxtunnels"),
            site_create("wlans"),
            site_create("wxtags"),
            site_create("wxrules"),
        ];

        Self { org, site }
    }

    /// What [`Restorer::run`] would send for this snapshot, without any
    /// request.
    pub fn preview(&self, snapshot: &LoadedSnapshot) -> Vec<PlannedStep> {
        let mut planned = Vec::new();
        for step in &self.org {
            let Some(document) = find_document(&snapshot.steps, &step.name) else {
                continue;
            };
            planned.push(PlannedStep {
                scope: "org".into(),
                step: step.name.clone(),
                objects: object_count(step.action, document),
            });
            if step.name != SITES_STEP {
                continue;
            }
            for site in document.as_array().into_iter().flatten() {
                let Some(old_id) = site.get("id").and_then(Value::as_str) else {
                    continue;
                };
                let Some(loaded) = snapshot.sites.iter().find(|s| s.site_id() == Some(old_id))
                else {
                    continue;
                };
                for site_step in &self.site {
                    if let Some(document) = find_document(&loaded.steps, &site_step.name) {
                        planned.push(PlannedStep {
                            scope: format!("site {}", object_label(site)),
                            step: site_step.name.clone(),
                            objects: object_count(site_step.action, document),
                        });
                    }
                }
            }
        }
        planned
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingRef {
    pub field: String,
    pub id: String,
}

/// Old object id → id assigned in the destination org.
#[derive(Debug, Clone, Default)]
pub struct IdMap {
    ids: HashMap<String, String>,
}

impl IdMap {
    pub fn insert(&mut self, old: &str, new: &str) {
        debug!(old, new, "id mapped");
        self.ids.insert(old.to_string(), new.to_string());
    }

    pub fn get(&self, old: &str) -> Option<&str> {
        self.ids.get(old).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Copy of `object` ready to send: read-only fields dropped, known ids
    /// rewritten. Returns the references that could not be rewritten.
    pub fn remap(&self, step: &str, object: &Value) -> (Value, Vec<MissingRef>) {
        let mut out = object.clone();
        if let Value::Object(map) = &mut out {
            strip_read_only(step, map);
        }
        let mut missing = Vec::new();
        self.rewrite(None, &mut out, &mut missing);
        (out, missing)
    }

    fn rewrite(&self, key: Option<&str>, value: &mut Value, missing: &mut Vec<MissingRef>) {
        match value {
            Value::String(s) if is_uuid(s) => {
                if let Some(new) = self.ids.get(s.as_str()) {
                    *s = new.clone();
                } else if let Some(field) = key
                    && !NON_REFERENCE_FIELDS.contains(&field)
                {
                    missing.push(MissingRef {
                        field: field.to_string(),
                        id: s.clone(),
                    });
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.rewrite(key, item, missing);
                }
            }
            Value::Object(map) => {
                for (field, item) in map.iter_mut() {
                    self.rewrite(Some(field.as_str()), item, missing);
                }
            }
            _ => {}
        }
    }
}

fn strip_read_only(step: &str, map: &mut Map<String, Value>) {
    for field in READ_ONLY_FIELDS {
        // A webhook's url is its configuration, not a link.
        if step == "webhooks" && *field == "url" {
            continue;
        }
        map.remove(*field);
    }
    if let Some(Value::Array(policies)) = map.get_mut("service_policies") {
        for policy in policies.iter_mut().filter_map(Value::as_object_mut) {
            policy.remove("id");
        }
    }
}

fn is_uuid(value: &str) -> bool {
    value.len() == 36 && Uuid::try_parse(value).is_ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreFailure {
    pub scope: String,
    pub step: String,
    pub object: String,
    pub message: String,
}

/// A reference still pointing at the source org after the final retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedRef {
    pub scope: String,
    pub step: String,
    pub object: String,
    pub field: String,
    pub id: String,
}

#[derive(Debug, Default)]
pub struct RestoreReport {
    pub org_id: String,
    pub created: usize,
    pub updated: usize,
    pub failures: Vec<RestoreFailure>,
    pub unresolved: Vec<UnresolvedRef>,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.unresolved.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// New name for the destination org. Without it the destination keeps
    /// its current name.
    pub org_name: Option<String>,
}

/// An object sent while some of its references were still unknown.
struct Pending {
    scope: String,
    step: String,
    object: String,
    path: String,
    body: Value,
}

/// Create a new, empty organization and return its id.
pub fn create_org(client: &ApiClient, name: &str) -> Result<String> {
    let response = client
        .post_json("api/v1/orgs", &json!({ "name": name }))
        .with_context(|| format!("creating org `{name}`"))?;
    let id = response
        .json
        .as_ref()
        .and_then(|j| j.get("id"))
        .and_then(Value::as_str)
        .with_context(|| format!("no id in the response creating org `{name}`"))?;
    info!(org = name, id, "created org");
    Ok(id.to_string())
}

pub struct Restorer<'a> {
    client: &'a ApiClient,
    registry: &'a StepRegistry,
    plan: &'a RestorePlan,
    reporter: &'a mut dyn ProgressReporter,
    ids: IdMap,
    pending: Vec<Pending>,
    org_name: Option<String>,
    report: RestoreReport,
}

impl<'a> Restorer<'a> {
    pub fn new(
        client: &'a ApiClient,
        registry: &'a StepRegistry,
        plan: &'a RestorePlan,
        reporter: &'a mut dyn ProgressReporter,
    ) -> Self {
        Self {
            client,
            registry,
            plan,
            reporter,
            ids: IdMap::default(),
            pending: Vec::new(),
            org_name: None,
            report: RestoreReport::default(),
        }
    }

    /// Restore `snapshot` into `org_id`. Failures of single objects are
    /// recorded and never stop the run.
    pub fn run(
        mut self,
        org_id: &str,
        snapshot: &LoadedSnapshot,
        options: &RestoreOptions,
    ) -> RestoreReport {
        self.report.org_id = org_id.to_string();
        self.org_name = options.org_name.clone();

        if let Some(old_org_id) = find_document(&snapshot.steps, "data")
            .and_then(|d| d.get("id"))
            .and_then(Value::as_str)
        {
            self.ids.insert(old_org_id, org_id);
        }

        let org_scope = format!("org {org_id}");
        self.reporter.report(&ProgressEvent::Banner {
            title: format!("Restoring {org_scope}"),
        });

        let plan = self.plan;
        for step in plan.steps(Level::Org) {
            let Some(document) = find_document(&snapshot.steps, &step.name) else {
                continue;
            };
            if step.name == SITES_STEP {
                self.restore_sites(org_id, snapshot, step, document);
                self.reporter.report(&ProgressEvent::Banner {
                    title: format!("Restoring remaining objects of {org_scope}"),
                });
            } else {
                self.restore_step(Level::Org, &org_scope, org_id, &snapshot.org_dir, step, document);
            }
        }

        self.retry_pending();
        info!(
            org = org_id,
            created = self.report.created,
            updated = self.report.updated,
            failures = self.report.failures.len(),
            "restore finished"
        );
        self.report
    }

    fn restore_sites(
        &mut self,
        org_id: &str,
        snapshot: &LoadedSnapshot,
        step: &RestoreStep,
        document: &Value,
    ) {
        let plan = self.plan;
        for site in document.as_array().into_iter().flatten() {
            let scope = format!("site {}", object_label(site));
            self.reporter.report(&ProgressEvent::Banner {
                title: format!("Restoring {scope}"),
            });
            self.reporter.report(&ProgressEvent::StepStarted {
                scope: scope.clone(),
                step: step.name.clone(),
            });
            let failures = self.report.failures.len();
            let new_id = self.create_object(Level::Org, &scope, org_id, &snapshot.org_dir, step, site);
            self.finish_step(&scope, &step.name, failures, 1);

            let Some(new_id) = new_id else {
                continue;
            };
            let Some(old_id) = site.get("id").and_then(Value::as_str) else {
                continue;
            };
            let Some(loaded) = snapshot.sites.iter().find(|s| s.site_id() == Some(old_id)) else {
                warn!(site = %scope, "no site directory in the snapshot, only the site was created");
                continue;
            };
            let site_dir = snapshot.org_dir.join(&loaded.dir_name);
            for site_step in plan.steps(Level::Site) {
                if let Some(document) = find_document(&loaded.steps, &site_step.name) {
                    self.restore_step(Level::Site, &scope, &new_id, &site_dir, site_step, document);
                }
            }
        }
    }

    fn restore_step(
        &mut self,
        level: Level,
        scope: &str,
        scope_id: &str,
        dir: &Path,
        step: &RestoreStep,
        document: &Value,
    ) {
        self.reporter.report(&ProgressEvent::StepStarted {
            scope: scope.to_string(),
            step: step.name.clone(),
        });
        let failures = self.report.failures.len();
        let count = object_count(step.action, document);

        match step.action {
            RestoreAction::Update => self.update_document(scope, scope_id, step, document),
            RestoreAction::Import => self.import_list(scope, scope_id, step, document),
            RestoreAction::Create => {
                for item in document.as_array().into_iter().flatten() {
                    self.create_object(level, scope, scope_id, dir, step, item);
                }
            }
        }

        self.finish_step(scope, &step.name, failures, count);
    }

    fn finish_step(&mut self, scope: &str, step: &str, failures_before: usize, items: usize) {
        let status = if self.report.failures.len() == failures_before {
            StepStatus::Success
        } else {
            StepStatus::Failure
        };
        self.reporter.report(&ProgressEvent::StepFinished {
            scope: scope.to_string(),
            step: step.to_string(),
            status,
            items,
        });
    }

    fn update_document(&mut self, scope: &str, scope_id: &str, step: &RestoreStep, document: &Value) {
        let prepared = self.prepare(&step.name, document);
        let (body, missing) = self.ids.remap(&step.name, &prepared);
        let path = step.path_for(scope_id);
        match self.client.put_json(&path, &body) {
            Ok(_) => {
                self.report.updated += 1;
                if !missing.is_empty() {
                    self.pending.push(Pending {
                        scope: scope.to_string(),
                        step: step.name.clone(),
                        object: step.name.clone(),
                        path,
                        body: prepared,
                    });
                }
            }
            Err(err) => self.fail(scope, &step.name, &step.name, format!("{:#}", err)),
        }
    }

    fn import_list(&mut self, scope: &str, scope_id: &str, step: &RestoreStep, document: &Value) {
        let items: Vec<Value> = document
            .as_array()
            .into_iter()
            .flatten()
            .map(|item| self.ids.remap(&step.name, item).0)
            .collect();
        if items.is_empty() {
            return;
        }
        match self.client.post_json(&step.path_for(scope_id), &items) {
            Ok(_) => self.report.created += items.len(),
            Err(err) => self.fail(scope, &step.name, &step.name, format!("{:#}", err)),
        }
    }

    fn create_object(
        &mut self,
        level: Level,
        scope: &str,
        scope_id: &str,
        dir: &Path,
        step: &RestoreStep,
        item: &Value,
    ) -> Option<String> {
        let label = object_label(item);
        let old_id = item.get("id").and_then(Value::as_str);
        let prepared = self.prepare(&step.name, item);
        let (body, missing) = self.ids.remap(&step.name, &prepared);
        let path = step.path_for(scope_id);

        let response = match self.client.post_json(&path, &body) {
            Ok(response) => response,
            Err(err) => {
                self.fail(scope, &step.name, &label, format!("{:#}", err));
                return None;
            }
        };
        let Some(new_id) = response
            .json
            .as_ref()
            .and_then(|j| j.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            self.fail(scope, &step.name, &label, "response carried no id".into());
            return None;
        };

        self.report.created += 1;
        if let Some(old_id) = old_id {
            self.ids.insert(old_id, &new_id);
            self.upload_assets(level, scope, dir, step, &path, old_id, &new_id, &label);
        }
        if !missing.is_empty() {
            debug!(scope, step = %step.name, object = %label, missing = missing.len(), "deferring unresolved references");
            self.pending.push(Pending {
                scope: scope.to_string(),
                step: step.name.clone(),
                object: label,
                path: format!("{path}/{new_id}"),
                body: prepared,
            });
        }
        Some(new_id)
    }

    /// Push the portal templates and images saved next to the object's step
    /// file to the newly created object.
    #[allow(clippy::too_many_arguments)]
    fn upload_assets(
        &mut self,
        level: Level,
        scope: &str,
        dir: &Path,
        step: &RestoreStep,
        collection_path: &str,
        old_id: &str,
        new_id: &str,
        label: &str,
    ) {
        let registry = self.registry;
        let Some(descriptor) = registry
            .all_steps(level)
            .iter()
            .find(|d| d.name == step.name)
        else {
            return;
        };
        for kind in &descriptor.assets {
            let file = asset_file(dir, &step.name, old_id, kind.extension());
            if !file.exists() {
                continue;
            }
            let target = format!("{collection_path}/{new_id}/{}", upload_suffix(*kind));
            let result = self.upload_asset(*kind, &file, &target);
            self.reporter.report(&ProgressEvent::AssetFinished {
                scope: scope.to_string(),
                step: step.name.clone(),
                object_id: new_id.to_string(),
                kind: *kind,
                ok: result.is_ok(),
            });
            if let Err(err) = result {
                self.fail(scope, &step.name, &format!("{kind} of {label}"), format!("{:#}", err));
            }
        }
    }

    fn upload_asset(&self, kind: AssetKind, file: &Path, target: &str) -> Result<()> {
        match kind {
            AssetKind::PortalTemplate => {
                let text = fs::read_to_string(file).with_context(|| format!("reading {:?}", file))?;
                let template: Value =
                    serde_json::from_str(&text).with_context(|| format!("parsing {:?}", file))?;
                self.client.put_json(target, &template)?;
            }
            AssetKind::PortalImage | AssetKind::MapImage => {
                let bytes = fs::read(file).with_context(|| format!("reading {:?}", file))?;
                let name = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                self.client.upload(target, &name, bytes)?;
            }
        }
        Ok(())
    }

    /// Object-specific adjustments before ids are rewritten.
    fn prepare(&self, step: &str, object: &Value) -> Value {
        let mut object = object.clone();
        let Some(map) = object.as_object_mut() else {
            return object;
        };
        match step {
            "data" => match &self.org_name {
                Some(name) => {
                    map.insert("name".into(), Value::String(name.clone()));
                }
                None => {
                    map.remove("name");
                }
            },
            "maps" => {
                map.remove("sitesurvey_path");
                if let Some(Value::Array(areas)) = map.get_mut("intended_coverage_areas") {
                    for area in areas.iter_mut().filter_map(Value::as_object_mut) {
                        area.remove("id");
                        area.remove("map_id");
                    }
                }
            }
            "evpn_topologies" => {
                map.insert("overwrite".into(), Value::Bool(true));
            }
            _ => {}
        }
        object
    }

    fn retry_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return;
        }
        self.reporter.report(&ProgressEvent::Banner {
            title: "Retrying unresolved references".into(),
        });
        for entry in pending {
            self.reporter.report(&ProgressEvent::StepStarted {
                scope: entry.scope.clone(),
                step: entry.step.clone(),
            });
            let failures = self.report.failures.len();
            let (body, missing) = self.ids.remap(&entry.step, &entry.body);
            match self.client.put_json(&entry.path, &body) {
                Ok(_) => self.report.updated += 1,
                Err(err) => self.fail(&entry.scope, &entry.step, &entry.object, format!("{:#}", err)),
            }
            for reference in missing {
                warn!(scope = %entry.scope, step = %entry.step, object = %entry.object, field = %reference.field, id = %reference.id, "reference left unresolved");
                self.report.unresolved.push(UnresolvedRef {
                    scope: entry.scope.clone(),
                    step: entry.step.clone(),
                    object: entry.object.clone(),
                    field: reference.field,
                    id: reference.id,
                });
            }
            self.finish_step(&entry.scope, &entry.step, failures, 1);
        }
    }

    fn fail(&mut self, scope: &str, step: &str, object: &str, message: String) {
        warn!(scope, step, object, error = %message, "restore failed");
        self.report.failures.push(RestoreFailure {
            scope: scope.to_string(),
            step: step.to_string(),
            object: object.to_string(),
            message,
        });
    }
}

fn upload_suffix(kind: AssetKind) -> &'static str {
    match kind {
        AssetKind::PortalTemplate => "portal_template",
        AssetKind::PortalImage => "portal_image",
        AssetKind::MapImage => "image",
    }
}

fn find_document<'s>(steps: &'s [LoadedStep], name: &str) -> Option<&'s Value> {
    steps.iter().find(|s| s.name == name)?.document.as_ref()
}

fn object_count(action: RestoreAction, document: &Value) -> usize {
    match action {
        RestoreAction::Update => 1,
        RestoreAction::Create | RestoreAction::Import => {
            document.as_array().map_or(0, Vec::len)
        }
    }
}

fn object_label(item: &Value) -> String {
    ["name", "ssid", "id"]
        .iter()
        .find_map(|field| item.get(*field).and_then(Value::as_str))
        .unwrap_or("<unnamed>")
        .to_string()
}
