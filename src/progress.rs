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

use crate::assets::AssetKind;
use crate::snapshot::StepStatus;
use std::io::{self, Write};

const LINE_WIDTH: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    ScopeStarted {
        scope: String,
    },
    /// Free-form section title (restore phases).
    Banner {
        title: String,
    },
    StepStarted {
        scope: String,
        step: String,
    },
    StepFinished {
        scope: String,
        step: String,
        status: StepStatus,
        items: usize,
    },
    AssetFinished {
        scope: String,
        step: String,
        object_id: String,
        kind: AssetKind,
        ok: bool,
    },
}

/// Receives traversal events; the traversal itself never prints.
pub trait ProgressReporter {
    fn report(&mut self, event: &ProgressEvent);
}

pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn report(&mut self, _event: &ProgressEvent) {}
}

/// Dotted status lines ending in ✔ or ✖, one per step and asset.
pub struct ConsoleReporter<W: Write> {
    out: W,
}

impl ConsoleReporter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn mark(ok: bool) -> &'static str {
        if ok { "\u{2714}" } else { "\u{2716}" }
    }
}

impl<W: Write> ProgressReporter for ConsoleReporter<W> {
    fn report(&mut self, event: &ProgressEvent) {
        // Console output is best effort.
        let _ = match event {
            ProgressEvent::ScopeStarted { scope } => {
                let title = format!(" Backing up {scope} ");
                writeln!(self.out, "\n{:_^width$}", title, width = LINE_WIDTH)
            }
            ProgressEvent::Banner { title } => {
                let title = format!(" {title} ");
                writeln!(self.out, "\n{:_^width$}", title, width = LINE_WIDTH)
            }
            ProgressEvent::StepStarted { scope, step } => {
                let message = format!("{scope} {step} ");
                write!(self.out, "{:.<width$}", message, width = LINE_WIDTH - 1)
                    .and_then(|_| self.out.flush())
            }
            ProgressEvent::StepFinished { status, .. } => {
                writeln!(self.out, "{}", Self::mark(*status == StepStatus::Success))
            }
            ProgressEvent::AssetFinished {
                step,
                object_id,
                kind,
                ok,
                ..
            } => {
                let message = format!("{kind} for {step} {object_id} ");
                writeln!(
                    self.out,
                    "{:.<width$}{}",
                    message,
                    Self::mark(*ok),
                    width = LINE_WIDTH - 1
                )
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_dotted_status_lines() {
        let mut reporter = ConsoleReporter::new(Vec::new());
        reporter.report(&ProgressEvent::StepStarted {
            scope: "site SiteA".into(),
            step: "wlans".into(),
        });
        reporter.report(&ProgressEvent::StepFinished {
            scope: "site SiteA".into(),
            step: "wlans".into(),
            status: StepStatus::Failure,
            items: 0,
        });
        reporter.report(&ProgressEvent::AssetFinished {
            scope: "site SiteA".into(),
            step: "maps".into(),
            object_id: "m1".into(),
            kind: AssetKind::MapImage,
            ok: true,
        });

        let text = String::from_utf8(reporter.into_inner()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("site SiteA wlans ...."));
        assert!(lines[0].ends_with('\u{2716}'));
        assert_eq!(lines[0].chars().count(), LINE_WIDTH);
        assert!(lines[1].starts_with("map image for maps m1 ."));
        assert!(lines[1].ends_with('\u{2714}'));
    }

    #[test]
    fn renders_scope_banner() {
        let mut reporter = ConsoleReporter::new(Vec::new());
        reporter.report(&ProgressEvent::ScopeStarted {
            scope: "org OrgX".into(),
        });
        let text = String::from_utf8(reporter.into_inner()).unwrap();
        let banner = text.trim_start_matches('\n').trim_end();
        assert_eq!(banner.chars().count(), LINE_WIDTH);
        assert!(banner.contains(" Backing up org OrgX "));
        assert!(banner.starts_with('_'));
    }

    #[test]
    fn renders_free_form_banner() {
        let mut reporter = ConsoleReporter::new(Vec::new());
        reporter.report(&ProgressEvent::Banner {
            title: "Retrying unresolved references".into(),
        });
        let text = String::from_utf8(reporter.into_inner()).unwrap();
        let banner = text.trim();
        assert_eq!(banner.chars().count(), LINE_WIDTH);
        assert!(banner.contains(" Retrying unresolved references "));
    }
}
