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

//! Hierarchical configuration backups for Mist organizations.
//!
//! A [`traversal::Controller`] runs the org-level steps of a
//! [`steps::StepRegistry`], enumerates the sites, runs the site-level steps
//! for each, downloads referenced assets and hands the resulting
//! [`snapshot::OrgSnapshot`] to [`writer::write`].

pub mod assets;
pub mod client;
pub mod collector;
pub mod config;
pub mod progress;
pub mod reader;
pub mod restore;
pub mod snapshot;
pub mod steps;
pub mod traversal;
pub mod writer;
