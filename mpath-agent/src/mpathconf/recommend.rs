//! Compliance verdicts for the vendor `device` block of multipath.conf.
//!
//! A parameter missing from the live block is reported exactly like a wrong
//! value: `NotRecommended` with an empty current value.

use std::fmt::{self, Display};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::section::unquote;
use super::template::{DeviceTemplate, Severity, TemplateParam};

/// Recommendation category for every verdict produced here.
pub const CATEGORY_MULTIPATH: &str = "multipath";
/// Configuration scope the verdicts apply to.
pub const SCOPE_DEVICE: &str = "device";
/// Device selector reported on verdicts.
pub const DEVICE_ALL: &str = "all";

static PARAM_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<name>\S+)\s+(?P<value>.*?)\s*$").expect("Invalid regex pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComplianceStatus {
    Recommended,
    NotRecommended,
}

impl Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComplianceStatus::Recommended => write!(f, "recommended"),
            ComplianceStatus::NotRecommended => write!(f, "not-recommended"),
        }
    }
}

/// Verdict for one parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: String,
    pub category: String,
    pub level: Severity,
    pub description: String,
    pub parameter: String,
    /// Live value, empty when the parameter is absent
    pub value: String,
    pub recommendation: String,
    pub status: ComplianceStatus,
    pub device: String,
}

impl Recommendation {
    pub fn is_compliant(&self) -> bool {
        self.status == ComplianceStatus::Recommended
    }
}

/// Verdicts for one device type, in template order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecommendation {
    pub device_type: String,
    pub recommendations: Vec<Recommendation>,
}

impl DeviceRecommendation {
    pub fn non_compliant(&self) -> impl Iterator<Item = &Recommendation> {
        self.recommendations.iter().filter(|r| !r.is_compliant())
    }
}

/// Stable identifier derived from category, scope and parameter.
pub fn recommendation_id(category: &str, scope: &str, parameter: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(category.as_bytes());
    hasher.update(scope.as_bytes());
    hasher.update(parameter.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// Split a `name value` line. Returns `None` for lines without a value.
pub fn parse_param_line(line: &str) -> Option<(&str, &str)> {
    let captures = PARAM_LINE.captures(line)?;
    let name = captures.name("name")?.as_str();
    let value = captures.name("value")?.as_str();
    Some((name, value))
}

/// Drop a trailing `#` comment that is not inside quotes.
fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '#' if !in_quotes => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Parsed `(name, value)` entries of a device block, in order.
fn block_entries(device_block: &str) -> Vec<(&str, &str)> {
    let mut entries = Vec::new();
    for line in device_block.lines() {
        let line = strip_comment(line);
        if line.trim().is_empty() {
            continue;
        }
        match parse_param_line(line) {
            Some(entry) => entries.push(entry),
            None => warn!(line = %line.trim(), "Invalid multipath device parameter line"),
        }
    }
    entries
}

/// First entry called `name`; later duplicates are ignored.
fn find_param<'b>(entries: &[(&str, &'b str)], name: &str) -> Option<&'b str> {
    entries
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, value)| *value)
}

/// Compare a live value against a template parameter.
pub fn verdict(param: &TemplateParam, current: Option<&str>) -> Recommendation {
    let current = current.map(str::trim).unwrap_or_default();
    let status = if !current.is_empty() && unquote(current) == unquote(&param.recommendation) {
        ComplianceStatus::Recommended
    } else {
        ComplianceStatus::NotRecommended
    };

    Recommendation {
        id: recommendation_id(CATEGORY_MULTIPATH, SCOPE_DEVICE, &param.name),
        category: CATEGORY_MULTIPATH.to_string(),
        level: param.severity,
        description: param.description.clone(),
        parameter: param.name.clone(),
        value: current.to_string(),
        recommendation: param.recommendation.clone(),
        status,
        device: DEVICE_ALL.to_string(),
    }
}

/// Verdicts for every template parameter against `device_block`.
pub fn compute_recommendations(
    device_block: &str,
    templates: &[DeviceTemplate],
) -> Vec<DeviceRecommendation> {
    let entries = block_entries(device_block);

    templates
        .iter()
        .map(|template| {
            let recommendations = template
                .parameters
                .iter()
                .map(|param| verdict(param, find_param(&entries, &param.name)))
                .collect::<Vec<_>>();
            debug!(
                device_type = %template.device_type,
                total = recommendations.len(),
                compliant = recommendations.iter().filter(|r| r.is_compliant()).count(),
                "Computed multipath recommendations"
            );
            DeviceRecommendation {
                device_type: template.device_type.clone(),
                recommendations,
            }
        })
        .collect()
}

/// Body of the `device { ... }` block for `vendor` inside `devices { ... }`.
///
/// The vendor value must match whole: `"Nimble Storage"` is not `Nimble`.
pub fn extract_device_block(content: &str, vendor: &str) -> Option<String> {
    static DEVICES: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"devices\s*\{").expect("Invalid regex pattern"));

    let start = DEVICES.find(content)?.start();
    let pattern = format!(
        concat!(
            r#"(?s)device\s*\{{(?P<device_block>[^{{}}]*?"#,
            r#"\bvendor[ \t]+(?:"{v}"|{v})[ \t]*(?:#[^\n]*)?(?:\r?\n[^{{}}]*)?)\}}"#,
        ),
        v = regex::escape(vendor)
    );
    let re = Regex::new(&pattern).ok()?;
    re.captures(&content[start..])
        .and_then(|c| c.name("device_block"))
        .map(|m| m.as_str().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpathconf::template::load_templates;

    fn nimble() -> DeviceTemplate {
        DeviceTemplate {
            device_type: "Nimble".into(),
            vendor: "Nimble".into(),
            parameters: vec![
                TemplateParam {
                    name: "vendor".into(),
                    recommendation: "Nimble".into(),
                    description: "vendor".into(),
                    severity: Severity::Critical,
                },
                TemplateParam {
                    name: "path_checker".into(),
                    recommendation: "tur".into(),
                    description: "checker".into(),
                    severity: Severity::Warning,
                },
                TemplateParam {
                    name: "hardware_handler".into(),
                    recommendation: "1 alua".into(),
                    description: "handler".into(),
                    severity: Severity::Critical,
                },
                TemplateParam {
                    name: "dev_loss_tmo".into(),
                    recommendation: "infinity".into(),
                    description: "loss".into(),
                    severity: Severity::Critical,
                },
            ],
        }
    }

    #[test]
    fn test_parse_param_line() {
        assert_eq!(
            parse_param_line("    path_checker     tur  "),
            Some(("path_checker", "tur"))
        );
        assert_eq!(
            parse_param_line("features \"1 queue_if_no_path\""),
            Some(("features", "\"1 queue_if_no_path\""))
        );
        assert_eq!(parse_param_line("vendor"), None);
    }

    #[test]
    fn test_compute_recommendations_verdicts() {
        let block = r#"
            vendor "Nimble"
            path_checker directio
            hardware_handler "1 alua"   # required for ALUA
            path_checker tur
        "#;
        let result = compute_recommendations(block, &[nimble()]);
        assert_eq!(result.len(), 1);
        let recs = &result[0].recommendations;

        assert_eq!(recs[0].status, ComplianceStatus::Recommended);
        assert_eq!(recs[0].value, "\"Nimble\"");

        // first occurrence wins
        assert_eq!(recs[1].status, ComplianceStatus::NotRecommended);
        assert_eq!(recs[1].value, "directio");
        assert_eq!(recs[1].recommendation, "tur");

        assert_eq!(recs[2].status, ComplianceStatus::Recommended);

        // absent parameter
        assert_eq!(recs[3].status, ComplianceStatus::NotRecommended);
        assert_eq!(recs[3].value, "");
        assert_eq!(recs[3].level, Severity::Critical);
    }

    #[test]
    fn test_empty_block_reports_everything() {
        let result = compute_recommendations("", &[nimble()]);
        assert!(
            result[0]
                .recommendations
                .iter()
                .all(|r| r.status == ComplianceStatus::NotRecommended && r.value.is_empty())
        );
        assert_eq!(result[0].non_compliant().count(), 4);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let block = "vendor\npath_checker tur\n";
        let result = compute_recommendations(block, &[nimble()]);
        let recs = &result[0].recommendations;
        assert_eq!(recs[0].status, ComplianceStatus::NotRecommended);
        assert_eq!(recs[1].status, ComplianceStatus::Recommended);
    }

    #[test]
    fn test_compute_recommendations_is_idempotent() {
        let templates = load_templates(None).unwrap();
        let block = "vendor \"Nimble\"\nproduct \"Server\"\nno_path_retry 12\n";
        let first = compute_recommendations(block, &templates);
        let second = compute_recommendations(block, &templates);
        assert_eq!(first, second);
    }

    #[test]
    fn test_recommendation_id_is_stable() {
        let a = recommendation_id("multipath", "device", "path_checker");
        let b = recommendation_id("multipath", "device", "path_checker");
        let c = recommendation_id("multipath", "device", "prio");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_extract_device_block() {
        let content = r#"
defaults {
    find_multipaths no
}
blacklist_exceptions {
    device {
        vendor "Nimble"
        product "Server"
    }
}
devices {
    device {
        vendor "3PARdata"
        product "VV"
    }
    device {
        vendor               "Nimble"
        product              "Server"
        path_checker         tur
    }
}
"#;
        let block = extract_device_block(content, "Nimble").unwrap();
        assert!(block.starts_with("vendor"));
        assert!(block.contains("path_checker         tur"));
        assert!(!block.contains("3PARdata"));

        let block = extract_device_block(content, "3PARdata").unwrap();
        assert!(block.contains("\"VV\""));

        assert!(extract_device_block(content, "Nim").is_none());
        assert!(extract_device_block("defaults {\n}\n", "Nimble").is_none());
    }

    #[test]
    fn test_vendor_must_match_whole_value() {
        let content = r#"
devices {
    device {
        vendor "Nimble Storage"
        path_checker directio
    }
    device {
        vendor Nimble # array
        path_checker tur
    }
}
"#;
        let block = extract_device_block(content, "Nimble").unwrap();
        assert!(block.contains("path_checker tur"));
        assert!(!block.contains("directio"));

        let only_prefix = "devices {\n    device {\n        vendor \"Nimble Storage\"\n    }\n}\n";
        assert!(extract_device_block(only_prefix, "Nimble").is_none());
    }
}
