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

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use mistbackup::client::ApiClient;
use mistbackup::config::{self, Config, Scope, resolve, save};
use mistbackup::progress::{ConsoleReporter, NullReporter, ProgressReporter};
use mistbackup::reader::{self, LoadedStep};
use mistbackup::restore::{self, RestoreOptions, RestorePlan, RestoreReport, Restorer};
use mistbackup::steps::StepRegistry;
use mistbackup::traversal::{BackupReport, Controller, RunOptions};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "mistbackup",
    version,
    about = "Back up a Mist organization and its sites to a restorable directory tree"
)]
struct Cli {
    #[arg(
        long,
        global = true,
        help = "API token override for this invocation (otherwise read from env or config)"
    )]
    api_token: Option<String>,

    #[arg(
        long,
        global = true,
        value_name = "URL",
        help = "Base URL for the API (defaults to https://api.mist.com)"
    )]
    base_url: Option<String>,

    #[arg(
        long,
        short = 'e',
        global = true,
        value_name = "FILE",
        help = "Env file providing MIST_APITOKEN / MIST_HOST"
    )]
    env_file: Option<PathBuf>,

    #[arg(
        long,
        short = 'l',
        global = true,
        value_name = "FILE",
        help = "Append logs to FILE instead of stderr"
    )]
    log_file: Option<PathBuf>,

    #[arg(long, short = 'v', global = true, help = "Debug logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Persist an API token to the chosen scope
    Configure {
        #[arg(long)]
        token: String,
        #[arg(
            long,
            value_enum,
            default_value_t = ScopeArg::User,
            help = "Where to write the config (local project dir or user config dir)"
        )]
        scope: ScopeArg,
        #[arg(
            long,
            value_name = "URL",
            help = "Optional base URL to store alongside the token"
        )]
        base_url: Option<String>,
        #[arg(long, value_name = "DIR", help = "Default backup folder")]
        backup_folder: Option<PathBuf>,
    },
    /// Back up an organization and all of its sites
    Backup {
        #[arg(long, short = 'o', value_name = "ORG_ID")]
        org_id: String,
        #[arg(
            long,
            short = 'b',
            value_name = "DIR",
            help = "Folder receiving the backup; a subfolder is created per org (default ./org_backup)"
        )]
        backup_folder: Option<PathBuf>,
        #[arg(long, help = "Org folder name (defaults to the org name reported by the API)")]
        org_name: Option<String>,
        #[arg(
            long = "site",
            value_name = "SITE",
            help = "Only back up this site (id or name); repeatable"
        )]
        sites: Vec<String>,
        #[arg(long, value_name = "N", help = "Items requested per page")]
        page_limit: Option<u32>,
        #[arg(long, short = 'q', help = "Only print the final summary")]
        quiet: bool,
    },
    /// Summarize a snapshot directory written by `backup`
    Inspect {
        #[arg(value_name = "ORG_DIR")]
        path: PathBuf,
        #[arg(long, short = 'o', value_enum, default_value_t = OutputFormat::Pretty)]
        output: OutputFormat,
        #[arg(
            long,
            value_name = "TEXT",
            help = "Filter rows containing TEXT (case-insensitive)"
        )]
        filter: Option<String>,
    },
    /// Recreate a snapshot's org objects, sites and site objects in an org
    Restore {
        #[arg(value_name = "ORG_DIR")]
        path: PathBuf,
        #[arg(
            long,
            short = 'o',
            value_name = "ORG_ID",
            required_unless_present = "create_org",
            conflicts_with = "create_org",
            help = "Destination org (usually a new, empty one)"
        )]
        org_id: Option<String>,
        #[arg(long, value_name = "NAME", help = "Create a new org named NAME and restore into it")]
        create_org: Option<String>,
        #[arg(long, help = "Rename the destination org (default: keep its current name)")]
        org_name: Option<String>,
        #[arg(long, short = 'y', help = "Send the changes; without it only the plan is printed")]
        yes: bool,
        #[arg(long, short = 'q', help = "Only print the final summary")]
        quiet: bool,
    },
    /// Validate stored credentials against the API
    Validate,
    /// Show current configuration (secrets masked)
    ConfigShow,
    /// Generate shell completion scripts
    Completion {
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
enum OutputFormat {
    Pretty,
    Json,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScopeArg {
    Local,
    User,
}

impl From<ScopeArg> for Scope {
    fn from(value: ScopeArg) -> Self {
        match value {
            ScopeArg::Local => Scope::Local,
            ScopeArg::User => Scope::User,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_file.as_deref())?;
    let cwd = std::env::current_dir().context("reading current directory")?;

    if let Some(path) = &cli.env_file {
        dotenvy::from_path(path).with_context(|| format!("loading env file {}", path.display()))?;
    }

    let overrides = Config {
        api_token: cli.api_token.clone(),
        base_url: cli.base_url.clone(),
        ..Config::default()
    };

    match cli.command {
        Commands::Configure {
            token,
            scope,
            base_url,
            backup_folder,
        } => {
            let mut existing = config::load_scope(scope.into(), &cwd)?;
            existing.api_token = Some(token);
            if let Some(url) = base_url {
                existing.base_url = Some(url);
            }
            if let Some(folder) = backup_folder {
                existing.backup_folder = Some(folder);
            }

            let path = save(scope.into(), &existing, &cwd)?;
            println!("Saved API token to {}", path.display());
        }
        Commands::Backup {
            org_id,
            backup_folder,
            org_name,
            sites,
            page_limit,
            quiet,
        } => {
            let effective = resolve(
                &cwd,
                Config {
                    backup_folder,
                    page_limit,
                    ..overrides
                },
            )?;
            let client = ApiClient::new(&effective.base_url, &effective.api_token)?;
            let registry = StepRegistry::standard();

            let mut console = ConsoleReporter::stdout();
            let mut silent = NullReporter;
            let reporter: &mut dyn ProgressReporter = if quiet {
                &mut silent
            } else {
                &mut console
            };

            let report = Controller::new(
                &client,
                &registry,
                reporter,
                &effective.backup_folder,
                effective.page_limit,
            )
            .run(&org_id, &RunOptions { org_name, sites })
            .with_context(|| format!("backing up org {org_id}"))?;

            print_summary(&report);
        }
        Commands::Inspect {
            path,
            output,
            filter,
        } => {
            let loaded = reader::load(&path, &StepRegistry::standard())?;
            let mut rows = Vec::new();
            push_rows(&mut rows, "org", &loaded.steps);
            for site in &loaded.sites {
                push_rows(&mut rows, &format!("site {}", site.dir_name), &site.steps);
            }
            if let Some(needle) = filter.map(|f| f.to_ascii_lowercase()) {
                rows.retain(|row| row_matches(row, &needle));
            }
            let rows = serde_json::Value::Array(rows);
            match output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
                OutputFormat::Pretty => {
                    if !print_table(&rows, &["scope", "step", "status", "items"]) {
                        println!("{}", serde_json::to_string_pretty(&rows)?);
                    }
                }
            }
        }
        Commands::Restore {
            path,
            org_id,
            create_org,
            org_name,
            yes,
            quiet,
        } => {
            let registry = StepRegistry::standard();
            let plan = RestorePlan::standard();
            let loaded = reader::load(&path, &registry)?;

            if !yes {
                let rows: Vec<serde_json::Value> = plan
                    .preview(&loaded)
                    .into_iter()
                    .map(|p| json!({"scope": p.scope, "step": p.step, "objects": p.objects}))
                    .collect();
                print_table(&serde_json::Value::Array(rows), &["scope", "step", "objects"]);
                println!("\nNothing was changed; re-run with --yes to restore {}.", path.display());
                return Ok(());
            }

            let effective = resolve(&cwd, overrides)?;
            let client = ApiClient::new(&effective.base_url, &effective.api_token)?;
            let dest = match (org_id, create_org) {
                (Some(id), _) => id,
                (None, Some(name)) => restore::create_org(&client, &name)?,
                (None, None) => anyhow::bail!("either --org-id or --create-org is required"),
            };

            let mut console = ConsoleReporter::stdout();
            let mut silent = NullReporter;
            let reporter: &mut dyn ProgressReporter = if quiet {
                &mut silent
            } else {
                &mut console
            };

            let report = Restorer::new(&client, &registry, &plan, reporter).run(
                &dest,
                &loaded,
                &RestoreOptions { org_name },
            );
            print_restore_summary(&report);
        }
        Commands::Validate => {
            let effective = resolve(&cwd, overrides)?;
            let client = ApiClient::new(&effective.base_url, &effective.api_token)?;
            println!("Validating API token against {}...", effective.base_url);
            match client.get("/api/v1/self", &[]) {
                Ok(resp) => {
                    let who = resp
                        .json
                        .as_ref()
                        .and_then(|j| j.get("email").or_else(|| j.get("name")))
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown");
                    println!("API: ok ({})", who);
                }
                Err(e) => println!("API: FAILED ({:#})", e),
            }
        }
        Commands::ConfigShow => {
            let merged = config::load(&cwd)?;
            let mut masked = merged.clone();
            if masked.api_token.is_some() {
                masked.api_token = Some("*****".into());
            }
            println!("{}", serde_json::to_string_pretty(&masked)?);
        }
        Commands::Completion { shell } => {
            use clap_complete::{generate, shells};
            let mut cmd = Cli::command();
            let bin = cmd.get_name().to_string();
            match shell {
                CompletionShell::Bash => {
                    generate(shells::Bash, &mut cmd, bin, &mut std::io::stdout())
                }
                CompletionShell::Zsh => {
                    generate(shells::Zsh, &mut cmd, bin, &mut std::io::stdout())
                }
                CompletionShell::Fish => {
                    generate(shells::Fish, &mut cmd, bin, &mut std::io::stdout())
                }
                CompletionShell::PowerShell => {
                    generate(shells::PowerShell, &mut cmd, bin, &mut std::io::stdout())
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let default = match (verbose, log_file.is_some()) {
        (true, _) => "mistbackup=debug",
        (false, true) => "mistbackup=info",
        (false, false) => "mistbackup=warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    match log_file {
        Some(path) => {
            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn print_summary(report: &BackupReport) {
    let summary = report.snapshot.summary();
    let ok_steps = summary.total_steps - summary.failed_steps.len();
    let ok_assets = summary.total_assets - summary.failed_assets.len();

    println!("\n{:_^80}", " Backup done ");
    println!("Snapshot written to {}", report.org_dir.display());
    println!(
        "{} of {} steps succeeded, {} of {} assets downloaded ({} sites)",
        ok_steps,
        summary.total_steps,
        ok_assets,
        summary.total_assets,
        report.snapshot.sites.len()
    );

    if !summary.failed_steps.is_empty() {
        println!("\nFailed steps:");
        for failed in &summary.failed_steps {
            println!("  \u{2716} {} {}: {}", failed.scope, failed.step, failed.message);
        }
    }
    if !summary.failed_assets.is_empty() {
        println!("\nFailed assets:");
        for failed in &summary.failed_assets {
            println!(
                "  \u{2716} {} {} {}: {}",
                failed.scope, failed.step, failed.object_id, failed.message
            );
        }
    }
}

fn print_restore_summary(report: &RestoreReport) {
    println!("\n{:_^80}", " Restore done ");
    println!(
        "Org {}: {} objects created, {} updated",
        report.org_id, report.created, report.updated
    );

    if !report.failures.is_empty() {
        println!("\nFailed objects:");
        for failed in &report.failures {
            println!(
                "  \u{2716} {} {} {}: {}",
                failed.scope, failed.step, failed.object, failed.message
            );
        }
    }
    if !report.unresolved.is_empty() {
        println!("\nUnresolved references (left pointing at the source org):");
        for missing in &report.unresolved {
            println!(
                "  \u{2716} {} {} {}: {} = {}",
                missing.scope, missing.step, missing.object, missing.field, missing.id
            );
        }
    }
}

fn push_rows(rows: &mut Vec<serde_json::Value>, scope: &str, steps: &[LoadedStep]) {
    for step in steps {
        let (status, items) = match step.item_count() {
            Some(count) => ("present", json!(count)),
            None => ("missing", serde_json::Value::Null),
        };
        rows.push(json!({
            "scope": scope,
            "step": step.name,
            "status": status,
            "items": items,
        }));
    }
}

fn row_matches(row: &serde_json::Value, needle: &str) -> bool {
    match row {
        serde_json::Value::Object(map) => map
            .values()
            .any(|v| value_to_str(v).to_ascii_lowercase().contains(needle)),
        _ => false,
    }
}

fn print_table(json: &serde_json::Value, columns: &[&str]) -> bool {
    let rows = match json {
        serde_json::Value::Array(arr) => arr,
        _ => return false,
    };

    if rows.is_empty() {
        println!("No steps found.");
        return true;
    }

    let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
    let mut table: Vec<Vec<String>> = Vec::new();
    for row in rows {
        if let serde_json::Value::Object(map) = row {
            let out_row: Vec<String> = columns
                .iter()
                .map(|col| value_to_str(map.get(*col).unwrap_or(&serde_json::Value::Null)))
                .collect();
            for (idx, cell) in out_row.iter().enumerate() {
                widths[idx] = widths[idx].max(cell.chars().count());
            }
            table.push(out_row);
        }
    }

    for (i, col) in columns.iter().enumerate() {
        if i > 0 {
            print!("  ");
        }
        print!("{:width$}", col, width = widths[i]);
    }
    println!();
    // Separator
    for (i, width) in widths.iter().enumerate() {
        if i > 0 {
            print!("  ");
        }
        print!("{:-<width$}", "", width = *width);
    }
    println!();
    for row in table {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                print!("  ");
            }
            print!("{:width$}", cell, width = widths[i]);
        }
        println!();
    }

    true
}

fn value_to_str(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "".into(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
