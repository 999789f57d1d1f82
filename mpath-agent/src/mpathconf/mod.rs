//! multipath.conf recommendations and reconciliation
//!
//! - `section`: parse/render of the nested block format
//! - `template`: per-vendor recommended values and seed file selection
//! - `recommend`: per-parameter compliance verdicts
//! - `reconcile`: apply verdicts and reload the daemon

pub mod error;
pub mod host;
pub mod recommend;
pub mod reconcile;
pub mod section;
pub mod template;

pub use error::{ConfigError, Result};
pub use host::{HostInfo, LinuxHost, MULTIPATH_SERVICE, ServiceControl, SystemdServices};
pub use recommend::{
    ComplianceStatus, DeviceRecommendation, Recommendation, compute_recommendations,
    extract_device_block,
};
pub use reconcile::{MultipathConfigurator, apply_to_config};
pub use section::{MultipathConfig, Properties, Section, SectionId};
pub use template::{
    DeviceTemplate, Distro, OsInfo, SeedTemplate, Severity, TemplateParam, load_templates,
    parse_templates, seed_template,
};
