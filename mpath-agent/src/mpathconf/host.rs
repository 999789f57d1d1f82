//! Host collaborators used by the reconciliation pass.

use std::path::PathBuf;

use tracing::{debug, info};

use super::error::{ConfigError, Result};
use super::template::{Distro, OsInfo};
use crate::exec::CommandRunner;

/// Multipath daemon service name.
pub const MULTIPATH_SERVICE: &str = "multipathd";

/// Facts about the host that drive multipath policy.
pub trait HostInfo: Send + Sync {
    fn is_virtual_machine(&self) -> Result<bool>;
    /// Whether the guest runs its own iSCSI initiator.
    fn guest_iscsi_enabled(&self) -> bool;
    fn os_info(&self) -> Result<OsInfo>;
}

/// Control over the multipath daemon.
pub trait ServiceControl: Send + Sync {
    fn start(&self, service: &str) -> Result<()>;
    /// Ask the running daemon to reload its configuration.
    fn reconfigure(&self) -> Result<()>;
}

/// Parse `/etc/os-release` content.
pub fn parse_os_release(content: &str) -> OsInfo {
    let mut distro = Distro::Other;
    let mut major_version = 0;
    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        match key.trim() {
            "ID" => distro = value.parse().unwrap_or(Distro::Other),
            "VERSION_ID" => {
                major_version = value
                    .split('.')
                    .next()
                    .and_then(|major| major.parse().ok())
                    .unwrap_or(0);
            }
            _ => {}
        }
    }
    OsInfo {
        distro,
        major_version,
    }
}

/// [`HostInfo`] backed by systemd-detect-virt and files under /etc.
pub struct LinuxHost<R> {
    runner: R,
    os_release: PathBuf,
    initiator_name: PathBuf,
}

impl<R: CommandRunner> LinuxHost<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            os_release: PathBuf::from("/etc/os-release"),
            initiator_name: PathBuf::from("/etc/iscsi/initiatorname.iscsi"),
        }
    }

    /// Override the os-release and initiator-name file locations.
    pub fn with_paths(
        runner: R,
        os_release: impl Into<PathBuf>,
        initiator_name: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            os_release: os_release.into(),
            initiator_name: initiator_name.into(),
        }
    }
}

impl<R: CommandRunner> HostInfo for LinuxHost<R> {
    fn is_virtual_machine(&self) -> Result<bool> {
        let output = self
            .runner
            .run("systemd-detect-virt", &["--vm"])
            .map_err(|e| ConfigError::Host(format!("systemd-detect-virt: {e}")))?;

        // exits non-zero and prints "none" on bare metal
        let virt = output.stdout.trim();
        let is_vm = output.success && !virt.is_empty() && virt != "none";
        debug!(virtualization = %virt, is_vm, "Detected virtualization");
        Ok(is_vm)
    }

    fn guest_iscsi_enabled(&self) -> bool {
        self.initiator_name.exists()
    }

    fn os_info(&self) -> Result<OsInfo> {
        let content = std::fs::read_to_string(&self.os_release).map_err(|e| {
            ConfigError::Host(format!("{}: {e}", self.os_release.display()))
        })?;
        Ok(parse_os_release(&content))
    }
}

/// [`ServiceControl`] through systemctl and the multipathd CLI.
pub struct SystemdServices<R> {
    runner: R,
}

impl<R: CommandRunner> SystemdServices<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }
}

impl<R: CommandRunner> ServiceControl for SystemdServices<R> {
    fn start(&self, service: &str) -> Result<()> {
        let output = self.runner.run("systemctl", &["start", service])?;
        if !output.success {
            return Err(ConfigError::CommandFailed(
                output.failure_message(&format!("systemctl start {service}")),
            ));
        }
        info!(service = %service, "Started service");
        Ok(())
    }

    fn reconfigure(&self) -> Result<()> {
        let output = self.runner.run("multipathd", &["reconfigure"])?;
        if !output.success {
            return Err(ConfigError::CommandFailed(
                output.failure_message("multipathd reconfigure"),
            ));
        }
        info!("Reconfigured multipathd");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandOutput;
    use crate::exec::testing::ScriptedRunner;
    use tempfile::TempDir;

    #[test]
    fn test_parse_os_release() {
        let content = "NAME=\"Ubuntu\"\nVERSION_ID=\"22.04\"\nID=ubuntu\nID_LIKE=debian\n";
        let os = parse_os_release(content);
        assert_eq!(os.distro, Distro::Ubuntu);
        assert_eq!(os.major_version, 22);

        let os = parse_os_release("ID=\"rhel\"\nVERSION_ID=\"8.6\"\n");
        assert_eq!(os.distro, Distro::Redhat);
        assert_eq!(os.major_version, 8);

        let os = parse_os_release("garbage\n");
        assert_eq!(os.distro, Distro::Other);
        assert_eq!(os.major_version, 0);
    }

    #[test]
    fn test_virtualization_detection() {
        let dir = TempDir::new().unwrap();
        let vm = LinuxHost::with_paths(
            ScriptedRunner::new().on("systemd-detect-virt --vm", CommandOutput::ok("kvm\n")),
            dir.path().join("os-release"),
            dir.path().join("initiatorname.iscsi"),
        );
        assert!(vm.is_virtual_machine().unwrap());

        let bare = LinuxHost::with_paths(
            ScriptedRunner::new().on(
                "systemd-detect-virt --vm",
                CommandOutput {
                    success: false,
                    code: Some(1),
                    stdout: "none\n".into(),
                    stderr: String::new(),
                },
            ),
            dir.path().join("os-release"),
            dir.path().join("initiatorname.iscsi"),
        );
        assert!(!bare.is_virtual_machine().unwrap());

        let missing = LinuxHost::with_paths(
            ScriptedRunner::new(),
            dir.path().join("os-release"),
            dir.path().join("initiatorname.iscsi"),
        );
        assert!(matches!(
            missing.is_virtual_machine(),
            Err(ConfigError::Host(_))
        ));
    }

    #[test]
    fn test_guest_iscsi_and_os_info() {
        let dir = TempDir::new().unwrap();
        let initiator = dir.path().join("initiatorname.iscsi");
        let os_release = dir.path().join("os-release");
        let host = LinuxHost::with_paths(ScriptedRunner::new(), &os_release, &initiator);

        assert!(!host.guest_iscsi_enabled());
        assert!(matches!(host.os_info(), Err(ConfigError::Host(_))));

        std::fs::write(&initiator, "InitiatorName=iqn.1994-05.com.redhat:host\n").unwrap();
        std::fs::write(&os_release, "ID=centos\nVERSION_ID=\"7\"\n").unwrap();
        assert!(host.guest_iscsi_enabled());
        assert_eq!(
            host.os_info().unwrap(),
            OsInfo {
                distro: Distro::Centos,
                major_version: 7
            }
        );
    }

    #[test]
    fn test_service_control() {
        let services = SystemdServices::new(
            ScriptedRunner::new()
                .on("systemctl start multipathd", CommandOutput::ok(""))
                .on(
                    "multipathd reconfigure",
                    CommandOutput::failed("could not connect"),
                ),
        );
        services.start(MULTIPATH_SERVICE).unwrap();
        let err = services.reconfigure().unwrap_err();
        assert!(err.to_string().contains("could not connect"));
        assert_eq!(
            services.runner.calls(),
            vec!["systemctl start multipathd", "multipathd reconfigure"]
        );
    }
}
