use std::path::{Path, PathBuf};

use tracing::warn;
use url::Url;

pub(crate) const DEFAULT_BACKEND_PORT: u16 = 8080;
pub(crate) const HEALTH_PATH: &str = "/api/disk/health";
pub(crate) const DEFAULT_DEV_SERVER_URL: &str = "http://localhost:3000";
pub(crate) const BUNDLED_ARTIFACT_NAME: &str = "backend.jar";
pub(crate) const DEV_ARTIFACT_RELATIVE_PATH: &str =
    "../backend/target/disk-cleanup-partition-assistant-1.0.0.jar";

pub(crate) const BACKEND_PORT_ENV: &str = "SMART_DISK_BACKEND_PORT";
pub(crate) const BACKEND_JAR_ENV: &str = "SMART_DISK_BACKEND_JAR";
pub(crate) const DEV_MODE_ENV: &str = "SMART_DISK_DEV";
pub(crate) const DEV_SERVER_URL_ENV: &str = "SMART_DISK_DEV_URL";
pub(crate) const NODE_ENV: &str = "NODE_ENV";
pub(crate) const JAVA_HOME_ENV: &str = "JAVA_HOME";

/// Startup configuration of the shell, read once before the launch sequence begins.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub backend_port: u16,
    pub dev_mode: bool,
    pub dev_server_url: String,
    pub artifact_override: Option<PathBuf>,
    pub runtime_home: Option<PathBuf>,
}

impl ShellConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let backend_port = match non_empty(BACKEND_PORT_ENV) {
            Some(raw) => match raw.parse::<u16>() {
                Ok(port) if port > 0 => port,
                _ => {
                    warn!(value = %raw, "{BACKEND_PORT_ENV} is not a valid port; using {DEFAULT_BACKEND_PORT}");
                    DEFAULT_BACKEND_PORT
                }
            },
            None => DEFAULT_BACKEND_PORT,
        };

        let dev_mode = non_empty(DEV_MODE_ENV)
            .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false)
            || non_empty(NODE_ENV).as_deref() == Some("development");

        let dev_server_url = non_empty(DEV_SERVER_URL_ENV)
            .filter(|raw| match Url::parse(raw) {
                Ok(_) => true,
                Err(error) => {
                    warn!(value = %raw, %error, "{DEV_SERVER_URL_ENV} is not a valid URL");
                    false
                }
            })
            .unwrap_or_else(|| DEFAULT_DEV_SERVER_URL.to_string());

        Self {
            backend_port,
            dev_mode,
            dev_server_url,
            artifact_override: non_empty(BACKEND_JAR_ENV).map(PathBuf::from),
            runtime_home: non_empty(JAVA_HOME_ENV).map(PathBuf::from),
        }
    }

    pub fn health_url(&self) -> String {
        format!("http://127.0.0.1:{}{HEALTH_PATH}", self.backend_port)
    }

    /// Backend JAR location: explicit override, then the dev build output, then the bundle.
    pub fn artifact_path(&self, resource_dir: Option<&Path>, cwd: &Path) -> PathBuf {
        if let Some(path) = &self.artifact_override {
            return path.clone();
        }

        if self.dev_mode {
            return cwd.join(DEV_ARTIFACT_RELATIVE_PATH);
        }

        resource_dir
            .map(|dir| dir.join(BUNDLED_ARTIFACT_NAME))
            .unwrap_or_else(|| cwd.join(BUNDLED_ARTIFACT_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> ShellConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        ShellConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_production_on_port_8080() {
        let config = config_from(&[]);
        assert_eq!(config.backend_port, 8080);
        assert!(!config.dev_mode);
        assert_eq!(config.health_url(), "http://127.0.0.1:8080/api/disk/health");
        assert!(config.runtime_home.is_none());
        assert_eq!(config.dev_server_url, "http://localhost:3000");
    }

    #[test]
    fn rejects_unparseable_dev_server_url() {
        let config = config_from(&[(DEV_SERVER_URL_ENV, "not a url")]);
        assert_eq!(config.dev_server_url, DEFAULT_DEV_SERVER_URL);
    }

    #[test]
    fn falls_back_to_default_port_for_invalid_values() {
        assert_eq!(config_from(&[(BACKEND_PORT_ENV, "0")]).backend_port, 8080);
        assert_eq!(config_from(&[(BACKEND_PORT_ENV, "http")]).backend_port, 8080);
        assert_eq!(config_from(&[(BACKEND_PORT_ENV, " 9090 ")]).backend_port, 9090);
    }

    #[test]
    fn node_env_development_enables_dev_mode() {
        assert!(config_from(&[(NODE_ENV, "development")]).dev_mode);
        assert!(config_from(&[(DEV_MODE_ENV, "TRUE")]).dev_mode);
        assert!(!config_from(&[(NODE_ENV, "production")]).dev_mode);
    }

    #[test]
    fn resolves_artifact_path_by_mode() {
        let cwd = Path::new("/work/desktop");
        let resources = Path::new("/opt/smart-disk/resources");

        let production = config_from(&[]);
        assert_eq!(
            production.artifact_path(Some(resources), cwd),
            resources.join("backend.jar")
        );

        let dev = config_from(&[(NODE_ENV, "development")]);
        assert_eq!(
            dev.artifact_path(Some(resources), cwd),
            cwd.join(DEV_ARTIFACT_RELATIVE_PATH)
        );

        let overridden = config_from(&[(BACKEND_JAR_ENV, "/tmp/custom.jar")]);
        assert_eq!(
            overridden.artifact_path(Some(resources), cwd),
            PathBuf::from("/tmp/custom.jar")
        );
    }

    #[test]
    fn ignores_blank_java_home() {
        assert!(config_from(&[(JAVA_HOME_ENV, "   ")]).runtime_home.is_none());
        assert_eq!(
            config_from(&[(JAVA_HOME_ENV, "/usr/lib/jvm/temurin-17")]).runtime_home,
            Some(PathBuf::from("/usr/lib/jvm/temurin-17"))
        );
    }
}
