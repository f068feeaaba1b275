use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::config::{fileset, Config};
use crate::error::{KettleError, Result};
use crate::framework::{Detector, ShellEnv, TestFramework};

/// Environment variable set for every command run under the test environment.
pub const ENV_MARKER: (&str, &str) = ("KETTLE_ENV", "test");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    BeforeLoad,
    AfterLoad,
    BeforeTestRun,
}

impl HookPoint {
    pub fn name(&self) -> &'static str {
        match self {
            HookPoint::BeforeLoad => "before_load",
            HookPoint::AfterLoad => "after_load",
            HookPoint::BeforeTestRun => "before_test_run",
        }
    }

    fn command<'a>(&self, config: &'a Config) -> Option<&'a str> {
        match self {
            HookPoint::BeforeLoad => config.hooks.before_load.as_deref(),
            HookPoint::AfterLoad => config.hooks.after_load.as_deref(),
            HookPoint::BeforeTestRun => config.hooks.before_test_run.as_deref(),
        }
    }
}

/// The loaded test environment held by the worker. Executors inherit it
/// through fork and never load it themselves.
pub struct Environment {
    config: Config,
    shell: ShellEnv,
    framework: Box<dyn TestFramework>,
    preloaded: usize,
    loaded_at: DateTime<Utc>,
    load_secs: f64,
}

impl Environment {
    /// Run the load hooks and build the framework `detect` chooses.
    pub fn load(config: &Config, detect: Detector) -> Result<Self> {
        let started = Instant::now();
        let shell = shell_env(config)?;

        run_hook(&shell, HookPoint::BeforeLoad, config)?;

        let candidates = fileset::resolve(config.file_set("all").unwrap_or_default())?;
        let mut framework = detect(config.framework, &candidates, shell.clone());
        let preload = fileset::resolve(&config.preload_paths)?;
        let preloaded = framework
            .preload(&preload)
            .map_err(|e| KettleError::EnvironmentLoad {
                reason: e.to_string(),
            })?;

        run_hook(&shell, HookPoint::AfterLoad, config)?;

        let load_secs = started.elapsed().as_secs_f64();
        tracing::info!(
            framework = framework.name(),
            preloaded,
            load_secs,
            "environment loaded"
        );

        Ok(Self {
            config: config.clone(),
            shell,
            framework,
            preloaded,
            loaded_at: Utc::now(),
            load_secs,
        })
    }

    pub fn framework(&self) -> &dyn TestFramework {
        self.framework.as_ref()
    }

    pub fn preloaded(&self) -> usize {
        self.preloaded
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn load_secs(&self) -> f64 {
        self.load_secs
    }

    pub fn run_hook(&self, point: HookPoint) -> Result<()> {
        run_hook(&self.shell, point, &self.config)
    }
}

/// `PATH` prefixed with the include paths, the environment marker, then
/// the configured variables (which may override both).
pub fn shell_env(config: &Config) -> Result<ShellEnv> {
    let cwd = std::env::current_dir()?;
    let mut dirs: Vec<PathBuf> = config.include_paths.iter().map(|p| absolute(&cwd, p)).collect();
    if let Some(path) = std::env::var_os("PATH") {
        dirs.extend(std::env::split_paths(&path));
    }
    let path: OsString = std::env::join_paths(dirs).map_err(|e| KettleError::InvalidConfig {
        reason: format!("include_paths: {}", e),
    })?;

    let mut vars = vec![
        ("PATH".to_string(), path.to_string_lossy().into_owned()),
        (ENV_MARKER.0.to_string(), ENV_MARKER.1.to_string()),
    ];
    vars.extend(config.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(ShellEnv::new(vars))
}

fn absolute(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path.strip_prefix("./").unwrap_or(path))
    }
}

fn run_hook(shell: &ShellEnv, point: HookPoint, config: &Config) -> Result<()> {
    let Some(command) = point.command(config) else {
        return Ok(());
    };
    tracing::debug!(hook = point.name(), command, "running hook");

    let status = shell
        .shell(command)
        .status()
        .map_err(|e| KettleError::Hook {
            hook: point.name().to_string(),
            reason: e.to_string(),
        })?;
    if !status.success() {
        return Err(KettleError::Hook {
            hook: point.name().to_string(),
            reason: format!("`{}` failed with {}", command, status),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HookConfig;
    use crate::framework;
    use tempfile::TempDir;

    fn config_in(dir: &Path) -> Config {
        let mut config = Config::default();
        config.test_dir = dir.to_path_buf();
        config.file_sets.insert(
            "all".into(),
            vec![format!("{}/**/*_test.yml", dir.display())],
        );
        config
    }

    #[test]
    fn include_paths_lead_path_and_marker_is_set() {
        let config = Config {
            include_paths: vec![PathBuf::from("/opt/kettle/bin")],
            ..Config::default()
        };
        let shell = shell_env(&config).unwrap();
        let vars = shell.vars();

        let path = &vars.iter().find(|(k, _)| k == "PATH").unwrap().1;
        assert!(path.starts_with("/opt/kettle/bin"));
        assert!(vars.iter().any(|(k, v)| k == "KETTLE_ENV" && v == "test"));
    }

    #[test]
    fn failing_hook_fails_the_load() {
        let tmp = TempDir::new().unwrap();
        let config = Config {
            hooks: HookConfig {
                before_load: Some("exit 4".into()),
                ..HookConfig::default()
            },
            ..config_in(tmp.path())
        };

        let err = Environment::load(&config, framework::detect).err().unwrap();
        assert!(matches!(err, KettleError::Hook { ref hook, .. } if hook == "before_load"));
    }

    #[test]
    fn preload_parses_manifests_up_front() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("math_test.yml"),
            "suite: MathTest\ntests:\n  - name: test_add\n    run: \"true\"\n",
        )
        .unwrap();
        let config = Config {
            preload_paths: vec![format!("{}/*_test.yml", tmp.path().display())],
            ..config_in(tmp.path())
        };

        let environment = Environment::load(&config, framework::detect).unwrap();
        assert_eq!(environment.framework().name(), "manifest");
        assert_eq!(environment.preloaded(), 1);
    }

    #[test]
    fn broken_preload_file_fails_the_load() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("bad_test.yml"), "tests: [oops\n").unwrap();
        let config = Config {
            preload_paths: vec![format!("{}/*_test.yml", tmp.path().display())],
            ..config_in(tmp.path())
        };

        let err = Environment::load(&config, framework::detect).err().unwrap();
        assert!(matches!(err, KettleError::EnvironmentLoad { .. }));
    }
}
