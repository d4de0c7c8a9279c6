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

use crate::collector::DEFAULT_PAGE_LIMIT;
use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api.mist.com";
pub const DEFAULT_BACKUP_FOLDER: &str = "./org_backup";

/// Environment variables understood by the Mist tooling env files.
pub const ENV_API_TOKEN: &str = "MIST_APITOKEN";
pub const ENV_HOST: &str = "MIST_HOST";

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    pub api_token: Option<String>,
    pub base_url: Option<String>,
    pub backup_folder: Option<PathBuf>,
    pub page_limit: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Local,
    User,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not locate a writable config directory for the current user")]
    MissingConfigDir,
    #[error(
        "API token is required; set it with `mistbackup configure --token <token>` or MIST_APITOKEN"
    )]
    MissingApiToken,
    #[error("page limit must be at least 1")]
    InvalidPageLimit,
}

#[derive(Debug)]
pub struct EffectiveConfig {
    pub api_token: String,
    pub base_url: String,
    pub backup_folder: PathBuf,
    pub page_limit: u32,
}

pub fn config_path(scope: Scope, cwd: &Path) -> Result<PathBuf> {
    match scope {
        Scope::Local => Ok(cwd.join(".mistbackup.yaml")),
        Scope::User => {
            if let Ok(custom) = env::var("MISTBACKUP_CONFIG_DIR") {
                return Ok(PathBuf::from(custom).join("config.yaml"));
            }
            let base = config_dir().ok_or(ConfigError::MissingConfigDir)?;
            Ok(base.join("mistbackup").join("config.yaml"))
        }
    }
}

pub fn load(cwd: &Path) -> Result<Config> {
    let user = read_if_exists(&config_path(Scope::User, cwd)?)?.unwrap_or_default();
    let local = read_if_exists(&config_path(Scope::Local, cwd)?)?.unwrap_or_default();
    Ok(merge(user, local))
}

pub fn load_scope(scope: Scope, cwd: &Path) -> Result<Config> {
    Ok(read_if_exists(&config_path(scope, cwd)?)?.unwrap_or_default())
}

pub fn save(scope: Scope, config: &Config, cwd: &Path) -> Result<PathBuf> {
    let path = config_path(scope, cwd)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
    }
    let serialized = serde_yaml::to_string(config).context("serializing config")?;
    fs::write(&path, serialized).with_context(|| format!("writing {:?}", path))?;
    Ok(path)
}

/// Precedence: `overrides` (CLI flags), then the environment, then the local
/// file, then the user file, then defaults.
pub fn resolve(cwd: &Path, overrides: Config) -> Result<EffectiveConfig> {
    let from_env = Config {
        api_token: env::var(ENV_API_TOKEN).ok().filter(|v| !v.trim().is_empty()),
        base_url: env::var(ENV_HOST)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|host| normalize_host(&host)),
        backup_folder: None,
        page_limit: None,
    };
    let merged = merge(merge(load(cwd)?, from_env), overrides);

    let api_token = merged
        .api_token
        .ok_or(ConfigError::MissingApiToken)
        .map(|k| k.trim().to_string())?;

    let base_url = merged
        .base_url
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    let page_limit = merged.page_limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    if page_limit == 0 {
        return Err(ConfigError::InvalidPageLimit.into());
    }

    Ok(EffectiveConfig {
        api_token,
        base_url,
        backup_folder: merged
            .backup_folder
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_FOLDER)),
        page_limit,
    })
}

/// Env files carry a bare host (`api.eu.mist.com`); turn it into a URL.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

fn read_if_exists(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    let config = serde_yaml::from_str(&contents).with_context(|| format!("parsing {:?}", path))?;
    Ok(Some(config))
}

/// Fields set in `over` win.
fn merge(base: Config, over: Config) -> Config {
    Config {
        api_token: over.api_token.or(base.api_token),
        base_url: over.base_url.or(base.base_url),
        backup_folder: over.backup_folder.or(base.backup_folder),
        page_limit: over.page_limit.or(base.page_limit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard, OnceLock};
    use std::{env, fs};
    use tempfile::{TempDir, tempdir};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn isolated_env() -> (MutexGuard<'static, ()>, TempDir) {
        let guard = ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let cwd = tempdir().unwrap();
        unsafe {
            env::set_var("MISTBACKUP_CONFIG_DIR", cwd.path().join("config"));
            env::set_var("XDG_CONFIG_HOME", cwd.path().join("xdg"));
            env::remove_var(ENV_API_TOKEN);
            env::remove_var(ENV_HOST);
        }
        fs::create_dir_all(cwd.path().join("config")).unwrap();
        fs::create_dir_all(cwd.path().join("xdg")).unwrap();
        (guard, cwd)
    }

    #[test]
    fn merges_user_and_local_and_overrides() {
        let (_guard, cwd) = isolated_env();

        let user_cfg = Config {
            api_token: Some("user-token".into()),
            base_url: Some("https://api.eu.mist.com".into()),
            backup_folder: Some(PathBuf::from("/srv/backups")),
            page_limit: Some(500),
        };
        save(Scope::User, &user_cfg, cwd.path()).unwrap();

        let local_cfg = Config {
            api_token: Some("local-token".into()),
            ..Config::default()
        };
        save(Scope::Local, &local_cfg, cwd.path()).unwrap();

        let effective = resolve(cwd.path(), Config::default()).unwrap();
        assert_eq!(effective.api_token, "local-token");
        assert_eq!(effective.base_url, "https://api.eu.mist.com");
        assert_eq!(effective.backup_folder, PathBuf::from("/srv/backups"));
        assert_eq!(effective.page_limit, 500);

        let overridden = resolve(
            cwd.path(),
            Config {
                api_token: Some("flag-token".into()),
                page_limit: Some(10),
                ..Config::default()
            },
        )
        .unwrap();
        assert_eq!(overridden.api_token, "flag-token");
        assert_eq!(overridden.page_limit, 10);
    }

    #[test]
    fn environment_sits_between_files_and_flags() {
        let (_guard, cwd) = isolated_env();
        save(
            Scope::Local,
            &Config {
                api_token: Some("file-token".into()),
                ..Config::default()
            },
            cwd.path(),
        )
        .unwrap();
        unsafe {
            env::set_var(ENV_API_TOKEN, "env-token");
            env::set_var(ENV_HOST, "api.gc1.mist.com");
        }

        let effective = resolve(cwd.path(), Config::default()).unwrap();
        assert_eq!(effective.api_token, "env-token");
        assert_eq!(effective.base_url, "https://api.gc1.mist.com");
        assert_eq!(effective.backup_folder, PathBuf::from(DEFAULT_BACKUP_FOLDER));
        assert_eq!(effective.page_limit, DEFAULT_PAGE_LIMIT);

        unsafe {
            env::remove_var(ENV_API_TOKEN);
            env::remove_var(ENV_HOST);
        }
    }

    #[test]
    fn errors_when_missing_token() {
        let (_guard, cwd) = isolated_env();
        let err = resolve(cwd.path(), Config::default()).unwrap_err();
        assert!(err.to_string().contains("API token is required"));
    }

    #[test]
    fn rejects_zero_page_limit() {
        let (_guard, cwd) = isolated_env();
        let err = resolve(
            cwd.path(),
            Config {
                api_token: Some("t".into()),
                page_limit: Some(0),
                ..Config::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("page limit"));
    }

    #[test]
    fn normalizes_bare_hosts() {
        assert_eq!(normalize_host("api.mist.com"), "https://api.mist.com");
        assert_eq!(normalize_host("http://127.0.0.1:8080/"), "http://127.0.0.1:8080");
    }
}
