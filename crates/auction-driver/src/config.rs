// SPDX-License-Identifier: AGPL-3.0-only

//! Harness configuration.
//!
//! Sources, highest priority first:
//! 1. Environment variables (`AUCTION_BACKEND`, `AUCTION_LAYOUT`,
//!    `AUCTION_MAX_POLLS`, `AUCTION_UIO_DEVICE`)
//! 2. An explicit config file, else `./auction-harness.toml` if present
//! 3. Built-in defaults
//!
//! # Config file format
//!
//! ```toml
//! backend = "uio"
//! uio_device = "/dev/uio0"
//! layout = "narrow"
//! start_mode = "pulse"
//! max_polls = 100000000
//! timeout_ms = 30000
//! yield_interval = 1024
//! problem_dirs = ["problems/rewards8bit"]
//! stop_on_failure = true
//! ```

use crate::error::{AuctionError, Result};
use crate::platform::PlatformType;
use crate::poll::PollPolicy;
use crate::protocol::StartMode;
use auction_chip::layout::LayoutMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG: &str = "auction-harness.toml";

/// Harness configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Platform: `software` or `uio`.
    pub backend: String,
    /// UIO device node.
    pub uio_device: PathBuf,
    /// Buffer layout: `narrow` or `wide`.
    pub layout: String,
    /// Start register handling: `pulse` or `level`.
    pub start_mode: String,
    /// Completion poll bound; unset polls until done.
    pub max_polls: Option<u64>,
    /// Completion poll timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Yield the thread every this many polls (0 = never).
    pub yield_interval: u64,
    /// Directories searched for problem files.
    pub problem_dirs: Vec<PathBuf>,
    /// Stop the batch at the first failing instance.
    pub stop_on_failure: bool,
    /// Platform name of the accelerator instance.
    pub accelerator_name: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            backend: "software".to_string(),
            uio_device: PathBuf::from("/dev/uio0"),
            layout: LayoutMode::default().name().to_string(),
            start_mode: "pulse".to_string(),
            max_polls: None,
            timeout_ms: None,
            yield_interval: 1024,
            problem_dirs: vec![PathBuf::from("problems")],
            stop_on_failure: true,
            accelerator_name: auction_chip::ACCELERATOR_NAME.to_string(),
        }
    }
}

impl HarnessConfig {
    /// Load from `explicit`, else [`LOCAL_CONFIG`] if it exists, else
    /// defaults; then apply environment overrides.
    ///
    /// Named choices are not checked here so that later overrides (such as
    /// command-line flags) can still replace them; call
    /// [`validate`](Self::validate) once everything is applied.
    ///
    /// # Errors
    ///
    /// Returns error if a file cannot be read or parsed, or an override is
    /// malformed.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::load_with(explicit, |key| std::env::var(key).ok())
    }

    /// [`load`](Self::load) with overrides looked up through `var`.
    ///
    /// # Errors
    ///
    /// Returns error if a file cannot be read or parsed, or an override is
    /// malformed.
    pub fn load_with<F>(explicit: Option<&Path>, var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None if Path::new(LOCAL_CONFIG).is_file() => Self::from_file(Path::new(LOCAL_CONFIG))?,
            None => Self::default(),
        };
        config.apply_overrides(var)?;
        debug!("Configuration after overrides: {config:?}");
        Ok(config)
    }

    /// Parse a config file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is not valid TOML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AuctionError::config(path, e.to_string()))?;
        let config = Self::from_toml_str(&text, path)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse TOML text; `origin` is used in error messages.
    ///
    /// # Errors
    ///
    /// Returns error if the text is not a valid configuration.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self> {
        toml::from_str(text).map_err(|e| AuctionError::config(origin, e.to_string()))
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| AuctionError::config("<memory>", e.to_string()))
    }

    /// Apply `AUCTION_*` overrides looked up through `var`.
    ///
    /// # Errors
    ///
    /// Returns error if `AUCTION_MAX_POLLS` is not a number.
    pub fn apply_overrides<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = var("AUCTION_BACKEND") {
            info!("Using AUCTION_BACKEND from environment: {backend}");
            self.backend = backend;
        }
        if let Some(layout) = var("AUCTION_LAYOUT") {
            info!("Using AUCTION_LAYOUT from environment: {layout}");
            self.layout = layout;
        }
        if let Some(device) = var("AUCTION_UIO_DEVICE") {
            info!("Using AUCTION_UIO_DEVICE from environment: {device}");
            self.uio_device = PathBuf::from(device);
        }
        if let Some(polls) = var("AUCTION_MAX_POLLS") {
            self.max_polls = match polls.trim() {
                "" | "none" => None,
                n => Some(n.parse().map_err(|_| {
                    AuctionError::config("AUCTION_MAX_POLLS", format!("{n:?} is not a number"))
                })?),
            };
        }
        Ok(())
    }

    /// Check that every named choice is recognised.
    ///
    /// # Errors
    ///
    /// Returns the first unrecognised value.
    pub fn validate(&self) -> Result<()> {
        self.platform_type()?;
        self.layout_mode()?;
        self.start_mode()?;
        Ok(())
    }

    /// Selected platform.
    ///
    /// # Errors
    ///
    /// Returns error if `backend` is not recognised.
    pub fn platform_type(&self) -> Result<PlatformType> {
        PlatformType::from_name(&self.backend)
            .ok_or_else(|| invalid("backend", &self.backend, "software, uio"))
    }

    /// Selected buffer layout.
    ///
    /// # Errors
    ///
    /// Returns error if `layout` is not recognised.
    pub fn layout_mode(&self) -> Result<LayoutMode> {
        LayoutMode::from_name(&self.layout).ok_or_else(|| invalid("layout", &self.layout, "narrow, wide"))
    }

    /// Selected start register handling.
    ///
    /// # Errors
    ///
    /// Returns error if `start_mode` is not recognised.
    pub fn start_mode(&self) -> Result<StartMode> {
        StartMode::from_name(&self.start_mode)
            .ok_or_else(|| invalid("start_mode", &self.start_mode, "pulse, level"))
    }

    /// Completion poll policy from the poll fields.
    pub fn poll_policy(&self) -> PollPolicy {
        let mut policy = PollPolicy::blocking().with_yield_interval(self.yield_interval);
        policy.max_polls = self.max_polls;
        if let Some(ms) = self.timeout_ms {
            policy = policy.with_timeout(Duration::from_millis(ms));
        }
        policy
    }
}

fn invalid(field: &str, value: &str, expected: &str) -> AuctionError {
    AuctionError::config(field, format!("{value:?} is not one of: {expected}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid_and_blocking() {
        let config = HarnessConfig::default();
        config.validate().unwrap();
        assert_eq!(config.platform_type().unwrap(), PlatformType::Software);
        assert_eq!(config.layout_mode().unwrap(), LayoutMode::Wide);
        assert_eq!(config.start_mode().unwrap(), StartMode::Pulse);
        assert!(config.poll_policy().is_blocking());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = HarnessConfig::from_toml_str(
            "backend = \"uio\"\nlayout = \"narrow\"\nmax_polls = 500\n",
            Path::new("t.toml"),
        )
        .unwrap();
        assert_eq!(config.platform_type().unwrap(), PlatformType::Uio);
        assert_eq!(config.layout_mode().unwrap(), LayoutMode::Narrow);
        assert!(config.stop_on_failure);
        assert_eq!(config.poll_policy().max_polls, Some(500));
    }

    #[test]
    fn bad_toml_names_the_file() {
        let err = HarnessConfig::from_toml_str("max_polls = \"many\"", Path::new("bad.toml"))
            .unwrap_err();
        assert!(matches!(err, AuctionError::Config { ref path, .. } if path == Path::new("bad.toml")));
    }

    #[test]
    fn unknown_layout_rejected() {
        let config = HarnessConfig {
            layout: "huge".to_string(),
            ..HarnessConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn environment_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("AUCTION_BACKEND", "uio"),
            ("AUCTION_LAYOUT", "narrow"),
            ("AUCTION_MAX_POLLS", "42"),
            ("AUCTION_UIO_DEVICE", "/dev/uio3"),
        ]
        .into_iter()
        .collect();
        let mut config = HarnessConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.backend, "uio");
        assert_eq!(config.layout, "narrow");
        assert_eq!(config.max_polls, Some(42));
        assert_eq!(config.uio_device, PathBuf::from("/dev/uio3"));
    }

    #[test]
    fn non_numeric_poll_override_rejected() {
        let mut config = HarnessConfig::default();
        let err = config
            .apply_overrides(|k| (k == "AUCTION_MAX_POLLS").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, AuctionError::Config { .. }));
    }

    #[test]
    fn poll_policy_from_fields() {
        let config = HarnessConfig {
            max_polls: Some(10),
            timeout_ms: Some(250),
            yield_interval: 0,
            ..HarnessConfig::default()
        };
        let policy = config.poll_policy();
        assert_eq!(policy.max_polls, Some(10));
        assert_eq!(policy.timeout, Some(Duration::from_millis(250)));
        assert_eq!(policy.yield_interval, None);
    }

    #[test]
    fn later_overrides_replace_a_bad_environment_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auction-harness.toml");
        std::fs::write(&path, "layout = \"narrow\"\n").unwrap();

        let mut config = HarnessConfig::load_with(Some(&path), |k| {
            (k == "AUCTION_BACKEND").then(|| "bogus".to_string())
        })
        .unwrap();
        assert_eq!(config.backend, "bogus");
        assert!(config.validate().is_err());

        config.backend = "software".to_string();
        config.validate().unwrap();
        assert_eq!(config.layout_mode().unwrap(), LayoutMode::Narrow);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auction-harness.toml");
        let config = HarnessConfig {
            problem_dirs: vec![PathBuf::from("a"), PathBuf::from("b")],
            timeout_ms: Some(1000),
            ..HarnessConfig::default()
        };
        std::fs::write(&path, config.to_toml().unwrap()).unwrap();
        assert_eq!(HarnessConfig::from_file(&path).unwrap(), config);
    }
}
