//! Runtime settings for one agent pass.

use std::path::PathBuf;

use crate::mpathconf::{DeviceTemplate, Result, load_templates};

pub const DEFAULT_MULTIPATH_CONF: &str = "/etc/multipath.conf";
pub const DEFAULT_TEMPLATE_DIR: &str = "/opt/mpath-agent/templates";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub multipath_conf: PathBuf,
    /// Directory holding the multipath.conf seed files
    pub template_dir: PathBuf,
    /// Device templates JSON; the bundled set when `None`
    pub recommendations: Option<PathBuf>,
    pub skip_configure: bool,
    /// Aliases to tear down after reconciliation
    pub teardown: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            multipath_conf: PathBuf::from(DEFAULT_MULTIPATH_CONF),
            template_dir: PathBuf::from(DEFAULT_TEMPLATE_DIR),
            recommendations: None,
            skip_configure: false,
            teardown: Vec::new(),
        }
    }
}

impl AgentConfig {
    pub fn templates(&self) -> Result<Vec<DeviceTemplate>> {
        load_templates(self.recommendations.as_deref())
    }
}

/// Split a comma separated alias list, dropping blanks and duplicates.
pub fn parse_alias_list(value: &str) -> Vec<String> {
    let mut aliases: Vec<String> = Vec::new();
    for alias in value.split(',').map(str::trim).filter(|a| !a.is_empty()) {
        if !aliases.iter().any(|a| a == alias) {
            aliases.push(alias.to_string());
        }
    }
    aliases
}
