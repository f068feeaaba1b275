pub mod fileset;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{KettleError, Result};

/// File name looked up in `$HOME` and in the working directory.
pub const CONFIG_FILE_NAME: &str = ".kettle.yml";

/// Runtime configuration, shared by the supervisor and (through fork) the
/// worker and its executors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Raise log output to trace level and show backtraces of internal errors.
    #[serde(default)]
    pub trace: bool,

    /// Root of the test tree. Must exist.
    #[serde(default = "default_test_dir")]
    pub test_dir: PathBuf,

    /// Directories prepended to `PATH` for every command the environment runs.
    #[serde(default = "default_include_paths")]
    pub include_paths: Vec<PathBuf>,

    /// Globs of test files parsed once at environment load.
    #[serde(default)]
    pub preload_paths: Vec<String>,

    /// Stop a run after the first failure or error.
    #[serde(default)]
    pub fail_fast: bool,

    /// Named glob groups. An `all` set is required.
    #[serde(default = "default_file_sets")]
    pub file_sets: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub framework: FrameworkKind,

    #[serde(default)]
    pub hooks: HookConfig,

    /// Extra environment variables for test commands.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Deadline for the initial environment load round trip. None waits forever.
    #[serde(default)]
    pub load_timeout_secs: Option<u64>,

    /// Defaults to `$HOME/.kettle_history`.
    #[serde(default)]
    pub history_file: Option<PathBuf>,

    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Exit after running `run_command`.
    #[serde(skip)]
    pub once: bool,

    /// Command executed as soon as the environment is loaded.
    #[serde(skip)]
    pub run_command: String,
}

fn default_test_dir() -> PathBuf {
    PathBuf::from("./test")
}
fn default_include_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("./test"), PathBuf::from("./lib")]
}
fn default_file_sets() -> BTreeMap<String, Vec<String>> {
    let mut sets = BTreeMap::new();
    sets.insert("all".to_string(), vec!["./test/**/*_test.yml".to_string()]);
    sets
}
fn default_history_size() -> usize {
    50
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trace: false,
            test_dir: default_test_dir(),
            include_paths: default_include_paths(),
            preload_paths: Vec::new(),
            fail_fast: false,
            file_sets: default_file_sets(),
            framework: FrameworkKind::default(),
            hooks: HookConfig::default(),
            env: BTreeMap::new(),
            load_timeout_secs: None,
            history_file: None,
            history_size: default_history_size(),
            once: false,
            run_command: String::new(),
        }
    }
}

/// Which test framework adapter runs the tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameworkKind {
    /// Detect from the files in the `all` set at environment load.
    #[default]
    Auto,
    Manifest,
    Tap,
}

/// Shell commands run at fixed points of the environment lifecycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookConfig {
    pub before_load: Option<String>,
    pub after_load: Option<String>,
    pub before_test_run: Option<String>,
}

impl Config {
    /// Load a single config file. Returns default if the file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::load_layers(&[path.to_path_buf()])
    }

    /// Load `$HOME/.kettle.yml`, then `./.kettle.yml`, then `explicit`.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut layers = Vec::new();
        if let Some(home) = home_dir() {
            layers.push(home.join(CONFIG_FILE_NAME));
        }
        layers.push(PathBuf::from(CONFIG_FILE_NAME));
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(KettleError::InvalidConfig {
                    reason: format!("config file not found: {}", path.display()),
                });
            }
            layers.push(path.to_path_buf());
        }
        Self::load_layers(&layers)
    }

    /// Merge YAML mappings in order; keys in later files replace earlier ones.
    pub fn load_layers(paths: &[PathBuf]) -> Result<Self> {
        let mut merged = serde_yaml::Mapping::new();

        for path in paths {
            if !path.exists() {
                continue;
            }
            let contents = std::fs::read_to_string(path)?;
            let value: serde_yaml::Value =
                serde_yaml::from_str(&contents).map_err(|e| KettleError::ConfigParse {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;

            let layer = match value {
                serde_yaml::Value::Null => continue,
                serde_yaml::Value::Mapping(mapping) => mapping,
                _ => {
                    return Err(KettleError::ConfigParse {
                        path: path.clone(),
                        reason: "top level must be a mapping".into(),
                    })
                }
            };

            // Type-check each layer on its own so errors name the right file.
            serde_yaml::from_value::<Config>(serde_yaml::Value::Mapping(layer.clone())).map_err(
                |e| KettleError::ConfigParse {
                    path: path.clone(),
                    reason: e.to_string(),
                },
            )?;

            tracing::debug!(path = %path.display(), "loaded config layer");
            for (key, value) in layer {
                merged.insert(key, value);
            }
        }

        serde_yaml::from_value(serde_yaml::Value::Mapping(merged)).map_err(|e| {
            KettleError::InvalidConfig {
                reason: e.to_string(),
            }
        })
    }

    /// Problems that prevent a session from starting, most important first.
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !self.test_dir.is_dir() {
            errors.push(format!(
                "Couldn't find test directory `{}`. Exiting.",
                self.test_dir.display()
            ));
        }
        if !self.file_sets.contains_key("all") {
            errors.push("No `all` file set is defined in your configuration. Exiting.".into());
        }
        errors
    }

    pub fn file_set(&self, name: &str) -> Option<&[String]> {
        self.file_sets.get(name).map(Vec::as_slice)
    }

    pub fn file_set_names(&self) -> Vec<String> {
        self.file_sets.keys().cloned().collect()
    }

    pub fn history_path(&self) -> Option<PathBuf> {
        self.history_file
            .clone()
            .or_else(|| home_dir().map(|home| home.join(".kettle_history")))
    }
}

/// The user's home directory from `$HOME`, if set.
pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}
