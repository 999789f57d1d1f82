//! Recommendation templates and seed configuration selection.

use std::fmt::{self, Display};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::{ConfigError, Result};

/// Bundled recommendation templates.
const BUILTIN_TEMPLATES: &str = include_str!("../../templates/recommendations.json");

// ============================================================================
// Severity
// ============================================================================

/// How much a deviating parameter matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

// ============================================================================
// Device templates
// ============================================================================

/// Recommended value for one device-section parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateParam {
    pub name: String,
    pub recommendation: String,
    #[serde(default)]
    pub description: String,
    pub severity: Severity,
}

/// Recommendations for one storage vendor's `device` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTemplate {
    /// Tag reported on recommendations (e.g. "Nimble", "3PAR")
    pub device_type: String,
    /// SCSI vendor string identifying the device section
    pub vendor: String,
    pub parameters: Vec<TemplateParam>,
}

#[derive(Debug, Deserialize)]
struct TemplateFile {
    devices: Vec<DeviceTemplate>,
}

/// Parse templates from JSON.
pub fn parse_templates(json: &str) -> Result<Vec<DeviceTemplate>> {
    let file: TemplateFile =
        serde_json::from_str(json).map_err(|e| ConfigError::Template(e.to_string()))?;
    for template in &file.devices {
        if template.vendor.is_empty() {
            return Err(ConfigError::Template(format!(
                "device type '{}' has no vendor",
                template.device_type
            )));
        }
    }
    Ok(file.devices)
}

/// Templates from `path`, or the bundled set when no path is given.
pub fn load_templates(path: Option<&Path>) -> Result<Vec<DeviceTemplate>> {
    match path {
        Some(path) => parse_templates(&std::fs::read_to_string(path)?),
        None => parse_templates(BUILTIN_TEMPLATES),
    }
}

// ============================================================================
// Seed template selection
// ============================================================================

/// Linux distribution family, as far as template selection cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distro {
    Ubuntu,
    Debian,
    Redhat,
    Centos,
    Suse,
    Other,
}

impl FromStr for Distro {
    type Err = std::convert::Infallible;

    /// Parse an os-release `ID`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().trim_matches('"').to_lowercase().as_str() {
            "ubuntu" => Distro::Ubuntu,
            "debian" => Distro::Debian,
            "rhel" | "redhat" => Distro::Redhat,
            "centos" => Distro::Centos,
            "sles" | "suse" | "opensuse" | "opensuse-leap" => Distro::Suse,
            _ => Distro::Other,
        })
    }
}

/// Host operating system identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsInfo {
    pub distro: Distro,
    pub major_version: u32,
}

/// Which bundled multipath.conf a fresh host is seeded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedTemplate {
    Generic,
    Upstream,
    Legacy,
}

impl SeedTemplate {
    pub fn file_name(self) -> &'static str {
        match self {
            SeedTemplate::Generic => "multipath.conf.generic",
            SeedTemplate::Upstream => "multipath.conf.upstream",
            SeedTemplate::Legacy => "multipath.conf.legacy",
        }
    }

    pub fn path_in(self, template_dir: &Path) -> PathBuf {
        template_dir.join(self.file_name())
    }
}

struct SeedRule {
    distro: Distro,
    min_major: u32,
    max_major: u32,
    template: SeedTemplate,
}

const fn rule(
    distro: Distro,
    min_major: u32,
    max_major: u32,
    template: SeedTemplate,
) -> SeedRule {
    SeedRule {
        distro,
        min_major,
        max_major,
        template,
    }
}

/// First matching row wins; anything unmatched gets the generic template.
const SEED_RULES: &[SeedRule] = &[
    rule(Distro::Ubuntu, 18, u32::MAX, SeedTemplate::Upstream),
    rule(Distro::Redhat, 8, u32::MAX, SeedTemplate::Upstream),
    rule(Distro::Centos, 8, u32::MAX, SeedTemplate::Upstream),
    rule(Distro::Redhat, 0, 6, SeedTemplate::Legacy),
    rule(Distro::Centos, 0, 6, SeedTemplate::Legacy),
    rule(Distro::Suse, 0, 11, SeedTemplate::Legacy),
];

/// Seed template for a host.
pub fn seed_template(os: OsInfo) -> SeedTemplate {
    SEED_RULES
        .iter()
        .find(|rule| {
            rule.distro == os.distro
                && (rule.min_major..=rule.max_major).contains(&os.major_version)
        })
        .map_or(SeedTemplate::Generic, |rule| rule.template)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(distro: Distro, major_version: u32) -> OsInfo {
        OsInfo {
            distro,
            major_version,
        }
    }

    #[test]
    fn test_builtin_templates_parse() {
        let templates = load_templates(None).unwrap();
        let types: Vec<_> = templates.iter().map(|t| t.device_type.as_str()).collect();
        assert_eq!(types, vec!["Nimble", "3PAR"]);
        assert_eq!(templates[0].parameters[0].name, "vendor");
        assert_eq!(templates[1].vendor, "3PARdata");
    }

    #[test]
    fn test_parse_templates_rejects_missing_vendor() {
        let json = r#"{"devices": [{"device_type": "X", "vendor": "", "parameters": []}]}"#;
        assert!(matches!(parse_templates(json), Err(ConfigError::Template(_))));
        assert!(matches!(parse_templates("{"), Err(ConfigError::Template(_))));
    }

    #[test]
    fn test_seed_template_lookup() {
        assert_eq!(seed_template(os(Distro::Ubuntu, 20)), SeedTemplate::Upstream);
        assert_eq!(seed_template(os(Distro::Ubuntu, 16)), SeedTemplate::Generic);
        assert_eq!(seed_template(os(Distro::Redhat, 8)), SeedTemplate::Upstream);
        assert_eq!(seed_template(os(Distro::Centos, 7)), SeedTemplate::Generic);
        assert_eq!(seed_template(os(Distro::Centos, 6)), SeedTemplate::Legacy);
        assert_eq!(seed_template(os(Distro::Suse, 11)), SeedTemplate::Legacy);
        assert_eq!(seed_template(os(Distro::Suse, 15)), SeedTemplate::Generic);
        assert_eq!(seed_template(os(Distro::Other, 1)), SeedTemplate::Generic);
    }

    #[test]
    fn test_distro_from_os_release_id() {
        assert_eq!("\"rhel\"".parse::<Distro>().unwrap(), Distro::Redhat);
        assert_eq!("opensuse-leap".parse::<Distro>().unwrap(), Distro::Suse);
        assert_eq!("arch".parse::<Distro>().unwrap(), Distro::Other);
    }

    #[test]
    fn test_seed_template_path() {
        let path = SeedTemplate::Upstream.path_in(Path::new("/opt/templates"));
        assert_eq!(path, PathBuf::from("/opt/templates/multipath.conf.upstream"));
    }
}
