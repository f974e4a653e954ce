use serde::Deserialize;
use std::env;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::{Account, AccountKind, CommitIdentity};

pub const SETTINGS_FILE_NAME: &str = "actup.toml";
pub const DEFAULT_FOLDER: &str = "/tmp/actup_repos";

const OWNER_ENV: &str = "GITHUB_ORGNAME";
const TOKEN_ENV: &str = "GITHUB_TOKEN";
const USER_NAME_ENV: &str = "GIT_USERNAME";
const USER_EMAIL_ENV: &str = "GIT_USEREMAIL";

/// Errors that can occur when loading settings
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: set {env} or `{key}` in {}", SETTINGS_FILE_NAME)]
    Missing {
        key: &'static str,
        env: &'static str,
    },

    #[error("failed to read settings file: {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings file: {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },
}

/// Optional TOML settings file, consulted after the environment.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsFile {
    pub owner: Option<String>,
    pub token: Option<String>,
    pub git_user_name: Option<String>,
    pub git_user_email: Option<String>,
}

impl SettingsFile {
    /// Read the settings file. A missing file yields empty settings unless
    /// `required` is set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read and
    /// [`ConfigError::Parse`] if it is not valid TOML.
    pub fn load(path: &Path, required: bool) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound && !required => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source: Box::new(source),
        })
    }
}

/// Mandatory runtime settings: who to act for and as.
#[derive(Clone)]
pub struct Settings {
    /// Organization or user login
    pub owner: String,
    pub token: String,
    pub identity: CommitIdentity,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("owner", &self.owner)
            .field("token", &"<redacted>")
            .field("identity", &self.identity)
            .finish()
    }
}

impl Settings {
    /// Resolve every setting from `lookup` (an environment) first and `file`
    /// second. Blank values count as unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] for the first setting found in neither source.
    pub fn resolve(
        lookup: impl Fn(&str) -> Option<String>,
        file: SettingsFile,
    ) -> Result<Self, ConfigError> {
        let pick = |env: &'static str, key: &'static str, fallback: Option<String>| {
            lookup(env)
                .filter(|value| !value.trim().is_empty())
                .or(fallback.filter(|value| !value.trim().is_empty()))
                .ok_or(ConfigError::Missing { key, env })
        };

        Ok(Self {
            owner: pick(OWNER_ENV, "owner", file.owner)?,
            token: pick(TOKEN_ENV, "token", file.token)?,
            identity: CommitIdentity {
                name: pick(USER_NAME_ENV, "git_user_name", file.git_user_name)?,
                email: pick(USER_EMAIL_ENV, "git_user_email", file.git_user_email)?,
            },
        })
    }

    /// Load settings from the process environment and the settings file.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings file is unreadable or a setting is missing.
    pub fn load(settings_file: &Path, required: bool) -> Result<Self, ConfigError> {
        let file = SettingsFile::load(settings_file, required)?;
        Self::resolve(|key| env::var(key).ok(), file)
    }
}

/// Options selected on the command line for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Reuse the scratch folder as it is instead of cloning
    pub skip_clone: bool,
    /// Log instead of pushing or mutating pull requests
    pub dry_run: bool,
    pub exclude: Vec<String>,
    /// Scratch root holding one folder per repository
    pub folder: PathBuf,
    pub skip_forks: bool,
    pub max_size_kb: Option<u64>,
    /// Requested one pull request per action, which is unsupported
    pub split_prs: bool,
    pub teams: Vec<String>,
    pub account_kind: AccountKind,
    /// Push and create/update pull requests
    pub approve: bool,
    /// Concurrent clones; scales with the machine when unset
    pub parallelism: Option<usize>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            skip_clone: false,
            dry_run: false,
            exclude: Vec::new(),
            folder: PathBuf::from(DEFAULT_FOLDER),
            skip_forks: false,
            max_size_kb: None,
            split_prs: false,
            teams: Vec::new(),
            account_kind: AccountKind::Organization,
            approve: false,
            parallelism: None,
        }
    }
}

/// All application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub settings: Settings,
    pub options: RunOptions,
    /// Folder holding the optional override lists (`repos.txt`, ...)
    pub work_dir: PathBuf,
}

impl Config {
    #[must_use]
    pub fn account(&self) -> Account {
        Account::new(self.options.account_kind, self.settings.owner.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn full_file() -> SettingsFile {
        SettingsFile {
            owner: Some("file-org".to_owned()),
            token: Some("file-token".to_owned()),
            git_user_name: Some("File Bot".to_owned()),
            git_user_email: Some("file@example.com".to_owned()),
        }
    }

    #[test]
    fn environment_wins_over_file() {
        let env = HashMap::from([(OWNER_ENV, "env-org"), (TOKEN_ENV, "env-token")]);

        let settings = Settings::resolve(
            |key| env.get(key).map(|v| (*v).to_owned()),
            full_file(),
        )
        .unwrap();

        assert_eq!(settings.owner, "env-org");
        assert_eq!(settings.token, "env-token");
        assert_eq!(settings.identity.name, "File Bot");
        assert_eq!(settings.identity.email, "file@example.com");
    }

    #[test]
    fn blank_environment_value_falls_back_to_file() {
        let settings = Settings::resolve(
            |key| (key == OWNER_ENV).then(|| "  ".to_owned()),
            full_file(),
        )
        .unwrap();

        assert_eq!(settings.owner, "file-org");
    }

    #[test]
    fn missing_setting_names_key_and_variable() {
        let file = SettingsFile {
            git_user_email: None,
            ..full_file()
        };

        let error = Settings::resolve(|_| None, file).unwrap_err();

        assert!(matches!(
            error,
            ConfigError::Missing {
                key: "git_user_email",
                env: USER_EMAIL_ENV
            }
        ));
    }

    #[test]
    fn debug_output_hides_token() {
        let settings = Settings::resolve(|_| None, full_file()).unwrap();
        let debug = format!("{settings:?}");
        assert!(!debug.contains("file-token"));
    }

    #[test]
    fn settings_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        fs::write(&path, "owner = \"acme\"\ntoken = \"t\"\n").unwrap();

        let file = SettingsFile::load(&path, true).unwrap();

        assert_eq!(file.owner.as_deref(), Some("acme"));
        assert_eq!(file.git_user_name, None);
    }

    #[test]
    fn missing_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);

        assert!(SettingsFile::load(&path, false).unwrap().owner.is_none());
        assert!(matches!(
            SettingsFile::load(&path, true),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn invalid_settings_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        fs::write(&path, "owner = [").unwrap();

        assert!(matches!(
            SettingsFile::load(&path, false),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn default_options() {
        let options = RunOptions::default();
        assert_eq!(options.folder, PathBuf::from(DEFAULT_FOLDER));
        assert!(!options.approve);
        assert_eq!(options.account_kind, AccountKind::Organization);
    }
}
