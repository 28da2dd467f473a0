//! Process-wide relay configuration.
//!
//! Built once at startup from defaults, an optional TOML file and CLI flags
//! (which also read from the environment), then shared read-only.

use clap::Parser;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RelayError, Result};

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:1337";
pub const DEFAULT_BUILD_COMMAND: &str = "lektor build --output-path {output}";

#[derive(Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    pub bind_address: String,
    /// Root of the published previews, one directory per commit.
    pub webroot: PathBuf,
    /// Root of the scratch checkouts, one directory per commit.
    pub scratch_root: PathBuf,
    pub github_token: String,
    /// Previews are announced as `https://<commit>.<host_domain>`.
    pub host_domain: String,
    pub api_base: String,
    pub clone_base: String,
    /// Build command line; `{output}` is replaced by the host directory.
    pub build_command: String,
    pub fetch_timeout_secs: u64,
    pub build_timeout_secs: u64,
    pub notify_timeout_secs: u64,
    pub keep_scratch: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            webroot: PathBuf::from("/data/www"),
            scratch_root: PathBuf::from("/tmp"),
            github_token: String::new(),
            host_domain: "localhost".to_string(),
            api_base: "https://api.github.com".to_string(),
            clone_base: "https://github.com".to_string(),
            build_command: DEFAULT_BUILD_COMMAND.to_string(),
            fetch_timeout_secs: 300,
            build_timeout_secs: 900,
            notify_timeout_secs: 30,
            keep_scratch: false,
        }
    }
}

// Hand-written so the token never reaches the logs.
impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("bind_address", &self.bind_address)
            .field("webroot", &self.webroot)
            .field("scratch_root", &self.scratch_root)
            .field(
                "github_token",
                &if self.github_token.is_empty() { "<unset>" } else { "<redacted>" },
            )
            .field("host_domain", &self.host_domain)
            .field("api_base", &self.api_base)
            .field("clone_base", &self.clone_base)
            .field("build_command", &self.build_command)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("build_timeout_secs", &self.build_timeout_secs)
            .field("notify_timeout_secs", &self.notify_timeout_secs)
            .field("keep_scratch", &self.keep_scratch)
            .finish()
    }
}

impl RelayConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }

    /// Checks the values that cannot be defaulted into something usable.
    pub fn validate(&self) -> Result<()> {
        if self.host_domain.trim().is_empty() {
            return Err(RelayError::ConfigError("host_domain must not be empty".into()));
        }
        if self.build_command.split_whitespace().next().is_none() {
            return Err(RelayError::ConfigError("build_command must not be empty".into()));
        }
        for (name, secs) in [
            ("fetch_timeout_secs", self.fetch_timeout_secs),
            ("build_timeout_secs", self.build_timeout_secs),
            ("notify_timeout_secs", self.notify_timeout_secs),
        ] {
            if secs == 0 {
                return Err(RelayError::ConfigError(format!("{} must be greater than 0", name)));
            }
        }
        Ok(())
    }

    fn normalize(mut self) -> Self {
        self.github_token = self.github_token.trim().to_string();
        self.host_domain = self.host_domain.trim().trim_end_matches('.').to_string();
        self.api_base = self.api_base.trim_end_matches('/').to_string();
        self.clone_base = self.clone_base.trim_end_matches('/').to_string();
        self
    }
}

/// Load and parse the configuration file
pub fn load_config(path: &Path) -> Result<RelayConfig> {
    let config_str = fs::read_to_string(path).map_err(|e| {
        RelayError::ConfigError(format!("Failed to read config file '{}': {}", path.display(), e))
    })?;

    let config: RelayConfig = toml::from_str(&config_str).map_err(|e| {
        RelayError::ConfigError(format!("Failed to parse config file '{}': {}", path.display(), e))
    })?;

    Ok(config)
}

/// Command line flags. Every flag can also be given through the environment.
#[derive(Debug, Parser)]
#[command(name = "preview_relay", version, about = "Builds pull requests and links the preview back")]
pub struct Cli {
    /// TOML file with base settings; flags override it
    #[arg(long, env = "RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "BIND_ADDRESS")]
    pub bind_address: Option<String>,

    /// Web server root directory
    #[arg(long, env = "RELAY_WEBROOT")]
    pub webroot: Option<PathBuf>,

    #[arg(long, env = "RELAY_SCRATCH_ROOT")]
    pub scratch_root: Option<PathBuf>,

    /// GitHub access token used to post the preview comment
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Web server domain
    #[arg(long = "host", env = "RELAY_HOST_DOMAIN")]
    pub host_domain: Option<String>,

    #[arg(long, env = "RELAY_API_BASE")]
    pub api_base: Option<String>,

    #[arg(long, env = "RELAY_CLONE_BASE")]
    pub clone_base: Option<String>,

    #[arg(long, env = "RELAY_BUILD_COMMAND")]
    pub build_command: Option<String>,

    #[arg(long, env = "RELAY_FETCH_TIMEOUT_SECS")]
    pub fetch_timeout_secs: Option<u64>,

    #[arg(long, env = "RELAY_BUILD_TIMEOUT_SECS")]
    pub build_timeout_secs: Option<u64>,

    #[arg(long, env = "RELAY_NOTIFY_TIMEOUT_SECS")]
    pub notify_timeout_secs: Option<u64>,

    /// Leave the scratch checkout in place after the build
    #[arg(long, env = "RELAY_KEEP_SCRATCH")]
    pub keep_scratch: bool,

    /// Also write daily rotated log files into this directory
    #[arg(long, env = "RELAY_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

impl Cli {
    /// Resolves the final configuration: defaults, then the TOML file, then flags.
    pub fn resolve(&self) -> Result<RelayConfig> {
        let base = match &self.config {
            Some(path) => load_config(path)?,
            None => RelayConfig::default(),
        };
        let config = self.apply(base).normalize();
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, mut config: RelayConfig) -> RelayConfig {
        if let Some(v) = &self.bind_address {
            config.bind_address = v.clone();
        }
        if let Some(v) = &self.webroot {
            config.webroot = v.clone();
        }
        if let Some(v) = &self.scratch_root {
            config.scratch_root = v.clone();
        }
        if let Some(v) = &self.github_token {
            config.github_token = v.clone();
        }
        if let Some(v) = &self.host_domain {
            config.host_domain = v.clone();
        }
        if let Some(v) = &self.api_base {
            config.api_base = v.clone();
        }
        if let Some(v) = &self.clone_base {
            config.clone_base = v.clone();
        }
        if let Some(v) = &self.build_command {
            config.build_command = v.clone();
        }
        if let Some(v) = self.fetch_timeout_secs {
            config.fetch_timeout_secs = v;
        }
        if let Some(v) = self.build_timeout_secs {
            config.build_timeout_secs = v;
        }
        if let Some(v) = self.notify_timeout_secs {
            config.notify_timeout_secs = v;
        }
        if self.keep_scratch {
            config.keep_scratch = true;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["preview_relay"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn flags_override_defaults_and_are_normalized() {
        let cli = parse(&[
            "--webroot",
            "/srv/www/",
            "--github-token",
            "  secret-token \n",
            "--host",
            "preview.example.com",
            "--api-base",
            "https://ghe.example.com/api/v3/",
        ]);
        let config = cli.resolve().unwrap();

        assert_eq!(config.webroot, PathBuf::from("/srv/www/"));
        assert_eq!(config.github_token, "secret-token");
        assert_eq!(config.host_domain, "preview.example.com");
        assert_eq!(config.api_base, "https://ghe.example.com/api/v3");
        assert_eq!(config.clone_base, "https://github.com");
        assert_eq!(config.build_command, DEFAULT_BUILD_COMMAND);
    }

    #[test]
    fn toml_file_is_overridden_by_flags() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
webroot = "/var/www/previews"
host_domain = "from-file.example"
build_timeout_secs = 60
keep_scratch = true
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let cli = parse(&["--config", &path, "--host", "from-flag.example"]);
        let config = cli.resolve().unwrap();

        assert_eq!(config.webroot, PathBuf::from("/var/www/previews"));
        assert_eq!(config.host_domain, "from-flag.example");
        assert_eq!(config.build_timeout_secs, 60);
        assert!(config.keep_scratch);
    }

    #[test]
    fn example_config_file_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("relay_config.example.toml");
        let config = load_config(&path).unwrap();
        assert_eq!(config.host_domain, "preview.example.com");
        assert_eq!(config.build_command, DEFAULT_BUILD_COMMAND);
        config.validate().unwrap();
    }

    #[test]
    fn unknown_keys_in_config_file_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "webrot = \"/typo\"").unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, RelayError::ConfigError(_)));
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let cli = parse(&["--fetch-timeout-secs", "0"]);
        assert!(matches!(cli.resolve(), Err(RelayError::ConfigError(_))));
    }

    #[test]
    fn debug_output_redacts_token() {
        let config = RelayConfig {
            github_token: "ghp_supersecret".into(),
            ..RelayConfig::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("ghp_supersecret"));
        assert!(rendered.contains("<redacted>"));
    }
}
