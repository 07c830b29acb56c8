//! Configuration file loader with multi-source merging

use super::file_config::FileConfig;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::path::{Path, PathBuf};

/// Prefix of environment overrides, e.g. `ORCHESTRA_RETRY__MAX_ATTEMPTS=5`
pub const ENV_PREFIX: &str = "ORCHESTRA_";

const PROJECT_FILES: [&str; 2] = ["orchestra.toml", ".orchestra.toml"];

/// One place configuration may come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSource {
    pub label: &'static str,
    pub path: Option<PathBuf>,
    pub found: bool,
}

/// Configuration loader that handles file discovery and merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from all sources with proper priority
    ///
    /// Priority (highest to lowest):
    /// 1. `ORCHESTRA_` environment variables
    /// 2. Explicit config path (if provided)
    /// 3. Project root: `./orchestra.toml` or `./.orchestra.toml`
    /// 4. Global config: `$XDG_CONFIG_HOME/tool-orchestra/config.toml`
    /// 5. Default values
    pub fn load(config_path: Option<&Path>) -> Result<FileConfig, Box<figment::Error>> {
        Self::figment(config_path).extract().map_err(Box::new)
    }

    /// The merged provider stack behind [`Self::load`]
    pub fn figment(config_path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(FileConfig::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            figment = figment.merge(Toml::file(&global_path));
        }

        if let Some(path) = Self::project_config_path() {
            figment = figment.merge(Toml::file(path));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load defaults overlaid with a single file, ignoring every other source
    pub fn load_file(path: &Path) -> Result<FileConfig, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(FileConfig::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(Box::new)
    }

    /// Load only default configuration (for --no-config)
    pub fn load_defaults() -> FileConfig {
        FileConfig::default()
    }

    /// Get the global config file path
    ///
    /// Returns XDG_CONFIG_HOME/tool-orchestra/config.toml if set,
    /// otherwise the platform config directory.
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("tool-orchestra").join("config.toml"))
    }

    /// Get the project-level config file path (if it exists)
    pub fn project_config_path() -> Option<PathBuf> {
        PROJECT_FILES
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    /// Every file source in priority order, lowest first
    pub fn sources(config_path: Option<&Path>) -> Vec<ConfigSource> {
        let global = Self::global_config_path();
        let project = Self::project_config_path();
        let mut sources = vec![
            ConfigSource {
                label: "Global",
                found: global.as_ref().is_some_and(|p| p.exists()),
                path: global,
            },
            ConfigSource {
                label: "Project",
                found: project.is_some(),
                path: project.or_else(|| Some(PathBuf::from(PROJECT_FILES[0]))),
            },
        ];
        if let Some(path) = config_path {
            sources.push(ConfigSource {
                label: "Explicit",
                found: path.exists(),
                path: Some(path.to_path_buf()),
            });
        }
        sources
    }
}
