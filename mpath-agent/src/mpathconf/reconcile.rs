//! Reconciliation of the host multipath.conf against the device templates.

use std::fs;
use std::path::{Path, PathBuf};
use std::slice;

use tracing::{debug, info, instrument, warn};

use super::error::{ConfigError, Result};
use super::host::{HostInfo, MULTIPATH_SERVICE, ServiceControl};
use super::recommend::{
    ComplianceStatus, DeviceRecommendation, Recommendation, compute_recommendations,
    extract_device_block,
};
use super::section::{MultipathConfig, unquote};
use super::template::{DeviceTemplate, seed_template};
use crate::metrics::{self, OperationTimer};

/// Drives one host's multipath.conf towards the recommended baseline.
pub struct MultipathConfigurator<'a> {
    host: &'a dyn HostInfo,
    services: &'a dyn ServiceControl,
    conf_path: PathBuf,
    template_dir: PathBuf,
    templates: Vec<DeviceTemplate>,
}

impl<'a> MultipathConfigurator<'a> {
    pub fn new(
        host: &'a dyn HostInfo,
        services: &'a dyn ServiceControl,
        conf_path: impl Into<PathBuf>,
        template_dir: impl Into<PathBuf>,
        templates: Vec<DeviceTemplate>,
    ) -> Self {
        Self {
            host,
            services,
            conf_path: conf_path.into(),
            template_dir: template_dir.into(),
            templates,
        }
    }

    pub fn conf_path(&self) -> &Path {
        &self.conf_path
    }

    /// Backup location used before recommendations are written.
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.conf_path.clone().into_os_string();
        name.push(".bak");
        PathBuf::from(name)
    }

    /// Multipath is unnecessary inside a VM unless the guest runs its own initiator.
    pub fn is_multipath_required(&self) -> Result<bool> {
        if self.host.is_virtual_machine()? && !self.host.guest_iscsi_enabled() {
            return Ok(false);
        }
        Ok(true)
    }

    /// Verdicts for every known device type against the live configuration.
    #[instrument(skip(self), fields(path = %self.conf_path.display()))]
    pub fn get_recommendations(&self) -> Result<Vec<DeviceRecommendation>> {
        if !self.is_multipath_required()? {
            info!("Multipath not required on this host, skipping recommendations");
            return Ok(Vec::new());
        }

        let content = match fs::read_to_string(&self.conf_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No multipath configuration present, recommending from scratch");
                String::new()
            }
            Err(e) => return Err(e.into()),
        };

        let mut result = Vec::with_capacity(self.templates.len());
        for template in &self.templates {
            let block = extract_device_block(&content, &template.vendor).unwrap_or_default();
            if block.is_empty() {
                debug!(vendor = %template.vendor, "No device block for vendor");
            }
            result.extend(compute_recommendations(&block, slice::from_ref(template)));
        }

        for device in &result {
            let compliant = device
                .recommendations
                .iter()
                .filter(|r| r.is_compliant())
                .count();
            metrics::set_recommendations(
                &device.device_type,
                ComplianceStatus::Recommended,
                compliant,
            );
            metrics::set_recommendations(
                &device.device_type,
                ComplianceStatus::NotRecommended,
                device.recommendations.len() - compliant,
            );
        }
        Ok(result)
    }

    /// Write `recommendations` into the device section for `device_type` and save.
    #[instrument(skip(self, recommendations), fields(count = recommendations.len()))]
    pub fn apply_recommendations(
        &self,
        recommendations: &[Recommendation],
        device_type: &str,
    ) -> Result<()> {
        let template = self
            .templates
            .iter()
            .find(|t| t.device_type == device_type)
            .ok_or_else(|| {
                ConfigError::Template(format!("unknown device type '{device_type}'"))
            })?;

        let mut config = match MultipathConfig::load(&self.conf_path) {
            Ok(config) => config,
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                MultipathConfig::default()
            }
            Err(e) => return Err(e),
        };

        apply_to_config(&mut config, &template.vendor, recommendations);
        config.save(&self.conf_path)?;
        info!(device_type = %device_type, "Applied multipath recommendations");
        Ok(())
    }

    /// Seed a missing or empty configuration, otherwise back it up.
    pub fn prepare_config_file(&self) -> Result<()> {
        let is_empty = match fs::metadata(&self.conf_path) {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => return Err(e.into()),
        };

        if is_empty {
            let os = self.host.os_info()?;
            let seed = seed_template(os).path_in(&self.template_dir);
            fs::copy(&seed, &self.conf_path).map_err(|e| {
                ConfigError::Template(format!("failed to seed from {}: {e}", seed.display()))
            })?;
            info!(
                template = %seed.display(),
                distro = ?os.distro,
                major_version = os.major_version,
                "Seeded multipath configuration"
            );
        } else {
            let backup = self.backup_path();
            fs::copy(&self.conf_path, &backup)?;
            debug!(backup = %backup.display(), "Backed up multipath configuration");
        }
        Ok(())
    }

    /// Full reconciliation pass: seed, compute, apply, restart, reconfigure.
    #[instrument(skip(self), fields(path = %self.conf_path.display()))]
    pub fn configure_multipath(&self) -> Result<()> {
        let timer = OperationTimer::new("configure_multipath");
        match self.reconcile() {
            Ok(()) => {
                timer.success();
                Ok(())
            }
            Err(e) => {
                timer.failure("error");
                Err(e)
            }
        }
    }

    fn reconcile(&self) -> Result<()> {
        self.prepare_config_file()?;

        // the VM policy only gates recommendations, the seed is always laid down
        let recommendations = self.get_recommendations()?;
        if recommendations.iter().all(|d| d.recommendations.is_empty()) {
            warn!("No multipath recommendations to apply");
            return Ok(());
        }

        for device in &recommendations {
            let pending = device.non_compliant().count();
            info!(
                device_type = %device.device_type,
                pending,
                "Applying multipath recommendations"
            );
            self.apply_recommendations(&device.recommendations, &device.device_type)?;
        }

        self.services.start(MULTIPATH_SERVICE)?;
        self.services.reconfigure()?;
        Ok(())
    }
}

/// Write verdict values into `devices { device { vendor ... } }` and pin
/// `defaults { find_multipaths no }`.
pub fn apply_to_config(
    config: &mut MultipathConfig,
    vendor: &str,
    recommendations: &[Recommendation],
) {
    let root = config.root();
    let device = match config.device_section(vendor) {
        Some(id) => id,
        None => {
            let devices = config.get_or_add_section("devices", root);
            let id = config.add_section("device", devices);
            config.properties_mut(id).set("vendor", vendor);
            id
        }
    };

    let properties = config.properties_mut(device);
    for rec in recommendations {
        properties.set(&rec.parameter, &rec.recommendation);
    }

    let defaults = config.get_or_add_section("defaults", root);
    let defaults = config.properties_mut(defaults);
    if defaults
        .get("find_multipaths")
        .is_none_or(|v| unquote(v) == "yes")
    {
        defaults.set("find_multipaths", "no");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::mpathconf::template::{Distro, OsInfo, load_templates};
    use tempfile::TempDir;

    struct FakeHost {
        vm: bool,
        guest_iscsi: bool,
    }

    impl HostInfo for FakeHost {
        fn is_virtual_machine(&self) -> Result<bool> {
            Ok(self.vm)
        }
        fn guest_iscsi_enabled(&self) -> bool {
            self.guest_iscsi
        }
        fn os_info(&self) -> Result<OsInfo> {
            Ok(OsInfo {
                distro: Distro::Ubuntu,
                major_version: 22,
            })
        }
    }

    #[derive(Default)]
    struct FakeServices {
        calls: Mutex<Vec<String>>,
    }

    impl ServiceControl for FakeServices {
        fn start(&self, service: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("start {service}"));
            Ok(())
        }
        fn reconfigure(&self) -> Result<()> {
            self.calls.lock().unwrap().push("reconfigure".into());
            Ok(())
        }
    }

    const BARE_METAL: FakeHost = FakeHost {
        vm: false,
        guest_iscsi: false,
    };

    fn template_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("templates")
    }

    fn configurator<'a>(
        host: &'a FakeHost,
        services: &'a FakeServices,
        dir: &TempDir,
    ) -> MultipathConfigurator<'a> {
        MultipathConfigurator::new(
            host,
            services,
            dir.path().join("multipath.conf"),
            template_dir(),
            load_templates(None).unwrap(),
        )
    }

    #[test]
    fn test_policy_gate() {
        let dir = TempDir::new().unwrap();
        let services = FakeServices::default();

        let vm = FakeHost {
            vm: true,
            guest_iscsi: false,
        };
        let c = configurator(&vm, &services, &dir);
        assert!(!c.is_multipath_required().unwrap());
        assert!(c.get_recommendations().unwrap().is_empty());
        c.configure_multipath().unwrap();
        let seed = fs::read_to_string(template_dir().join("multipath.conf.upstream")).unwrap();
        assert_eq!(fs::read_to_string(c.conf_path()).unwrap(), seed);
        assert!(services.calls.lock().unwrap().is_empty());

        let vm_with_iscsi = FakeHost {
            vm: true,
            guest_iscsi: true,
        };
        assert!(
            configurator(&vm_with_iscsi, &services, &dir)
                .is_multipath_required()
                .unwrap()
        );
    }

    #[test]
    fn test_nothing_to_apply_is_success() {
        let dir = TempDir::new().unwrap();
        let services = FakeServices::default();
        let c = MultipathConfigurator::new(
            &BARE_METAL,
            &services,
            dir.path().join("multipath.conf"),
            template_dir(),
            Vec::new(),
        );
        let existing = "defaults {\n    user_friendly_names yes\n}\n";
        fs::write(c.conf_path(), existing).unwrap();

        c.configure_multipath().unwrap();

        assert_eq!(fs::read_to_string(c.conf_path()).unwrap(), existing);
        assert_eq!(fs::read_to_string(c.backup_path()).unwrap(), existing);
        assert!(services.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_missing_file_recommends_everything() {
        let dir = TempDir::new().unwrap();
        let services = FakeServices::default();
        let c = configurator(&BARE_METAL, &services, &dir);

        let recs = c.get_recommendations().unwrap();
        assert_eq!(recs.len(), 2);
        for device in &recs {
            assert!(!device.recommendations.is_empty());
            assert!(
                device
                    .recommendations
                    .iter()
                    .all(|r| r.status == ComplianceStatus::NotRecommended && r.value.is_empty())
            );
        }
    }

    #[test]
    fn test_missing_vendor_block_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let services = FakeServices::default();
        let c = configurator(&BARE_METAL, &services, &dir);
        fs::write(c.conf_path(), "defaults {\n    find_multipaths no\n}\n").unwrap();

        let recs = c.get_recommendations().unwrap();
        assert!(recs.iter().all(|d| d.non_compliant().count() == d.recommendations.len()));
    }

    #[test]
    fn test_apply_to_config_creates_sections_once() {
        let mut config =
            MultipathConfig::parse("defaults {\n    find_multipaths yes\n}\n").unwrap();
        let templates = load_templates(None).unwrap();
        let recs = compute_recommendations("", slice::from_ref(&templates[0]));

        apply_to_config(&mut config, "Nimble", &recs[0].recommendations);
        apply_to_config(&mut config, "Nimble", &recs[0].recommendations);

        let rendered = config.to_string();
        assert_eq!(rendered.matches("devices {").count(), 1);
        assert_eq!(rendered.matches("device {").count(), 1);
        let defaults = config.find_section("defaults", None).unwrap();
        assert_eq!(
            config.section(defaults).properties.get("find_multipaths"),
            Some("no")
        );
    }

    #[test]
    fn test_apply_keeps_explicit_find_multipaths() {
        let mut config =
            MultipathConfig::parse("defaults {\n    find_multipaths greedy\n}\n").unwrap();
        apply_to_config(&mut config, "Nimble", &[]);
        let defaults = config.find_section("defaults", None).unwrap();
        assert_eq!(
            config.section(defaults).properties.get("find_multipaths"),
            Some("greedy")
        );
    }

    #[test]
    fn test_configure_multipath_converges() {
        let dir = TempDir::new().unwrap();
        let services = FakeServices::default();
        let c = configurator(&BARE_METAL, &services, &dir);

        c.configure_multipath().unwrap();
        assert!(c.conf_path().exists());
        assert_eq!(
            *services.calls.lock().unwrap(),
            vec!["start multipathd".to_string(), "reconfigure".to_string()]
        );

        let recs = c.get_recommendations().unwrap();
        for device in &recs {
            let pending: Vec<_> = device.non_compliant().map(|r| &r.parameter).collect();
            assert!(pending.is_empty(), "{}: {pending:?}", device.device_type);
        }

        // second pass backs up the now non-empty file
        c.configure_multipath().unwrap();
        assert!(c.backup_path().exists());
    }

    #[test]
    fn test_apply_rejects_unknown_device_type() {
        let dir = TempDir::new().unwrap();
        let services = FakeServices::default();
        let c = configurator(&BARE_METAL, &services, &dir);
        assert!(matches!(
            c.apply_recommendations(&[], "Unknown"),
            Err(ConfigError::Template(_))
        ));
    }
}
