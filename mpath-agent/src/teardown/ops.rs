//! Device operations behind the teardown sequence.

use std::fs;
use std::path::PathBuf;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::debug;

use super::error::{Result, TeardownError};
use crate::exec::{CommandOutput, CommandRunner};

/// Host operations used to tear a multipath device down.
pub trait DeviceOps: Send + Sync {
    /// Raw `mount` listing.
    fn mount_table(&self) -> Result<String>;
    fn unmount(&self, mount_point: &str) -> Result<()>;
    /// Raw `fuser -mv` listing for a mount point or device node.
    fn list_holders(&self, target: &str) -> Result<String>;
    fn kill(&self, pid: i32) -> Result<()>;
    /// Graceful map flush (`multipath -f`).
    fn flush_map(&self, alias: &str) -> Result<()>;
    fn device_info(&self, alias: &str) -> Result<String>;
    /// Forced low-level map removal (`dmsetup remove -f`).
    fn force_remove_map(&self, alias: &str) -> Result<()>;
    /// Ask the SCSI layer to delete a block device.
    fn remove_block_device(&self, device: &str) -> Result<()>;
    /// Raw `multipathd show multipaths json` output.
    fn multipath_status(&self) -> Result<String>;
}

/// [`DeviceOps`] using the standard Linux tools and sysfs.
pub struct LinuxDeviceOps<R> {
    runner: R,
    sysfs_root: PathBuf,
}

impl<R: CommandRunner> LinuxDeviceOps<R> {
    pub fn new(runner: R) -> Self {
        Self::with_root(runner, "/sys")
    }

    pub fn with_root(runner: R, sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            sysfs_root: sysfs_root.into(),
        }
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let output = self.runner.run(program, args)?;
        if !output.success {
            let context = format!("{program} {}", args.join(" "));
            return Err(TeardownError::CommandFailed(output.failure_message(&context)));
        }
        Ok(output)
    }
}

impl<R: CommandRunner> DeviceOps for LinuxDeviceOps<R> {
    fn mount_table(&self) -> Result<String> {
        Ok(self.run("mount", &[])?.stdout)
    }

    fn unmount(&self, mount_point: &str) -> Result<()> {
        self.run("umount", &[mount_point])?;
        debug!(mount_point = %mount_point, "Unmounted");
        Ok(())
    }

    fn list_holders(&self, target: &str) -> Result<String> {
        let output = self.runner.run("fuser", &["-mv", target])?;
        // the verbose table goes to stderr, stdout only repeats the PIDs
        let listing = if output.stderr.trim().is_empty() {
            output.stdout.clone()
        } else {
            output.stderr.clone()
        };
        if !output.success && listing.trim().is_empty() {
            return Err(TeardownError::CommandFailed(
                output.failure_message(&format!("fuser -mv {target}")),
            ));
        }
        Ok(listing)
    }

    fn kill(&self, pid: i32) -> Result<()> {
        signal::kill(Pid::from_raw(pid), Signal::SIGKILL)
            .map_err(|e| TeardownError::CommandFailed(format!("kill -9 {pid}: {e}")))
    }

    fn flush_map(&self, alias: &str) -> Result<()> {
        self.run("multipath", &["-f", alias]).map(|_| ())
    }

    fn device_info(&self, alias: &str) -> Result<String> {
        Ok(self.run("dmsetup", &["info", alias])?.stdout)
    }

    fn force_remove_map(&self, alias: &str) -> Result<()> {
        self.run("dmsetup", &["remove", "-f", alias]).map(|_| ())
    }

    fn remove_block_device(&self, device: &str) -> Result<()> {
        if device.is_empty() || device.contains('/') || device == "." || device == ".." {
            return Err(TeardownError::InvalidDevice(device.to_string()));
        }
        let control = self
            .sysfs_root
            .join("block")
            .join(device)
            .join("device/delete");
        fs::write(&control, "1")?;
        debug!(device = %device, path = %control.display(), "Requested block device removal");
        Ok(())
    }

    fn multipath_status(&self) -> Result<String> {
        Ok(self.run("multipathd", &["show", "multipaths", "json"])?.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::ScriptedRunner;
    use tempfile::TempDir;

    #[test]
    fn test_failed_command_carries_stderr() {
        let ops = LinuxDeviceOps::new(
            ScriptedRunner::new().on("multipath -f mpatha", CommandOutput::failed("map in use")),
        );
        let err = ops.flush_map("mpatha").unwrap_err().to_string();
        assert!(err.contains("multipath -f mpatha"));
        assert!(err.contains("map in use"));
    }

    #[test]
    fn test_list_holders_reads_stderr_table() {
        let ops = LinuxDeviceOps::new(ScriptedRunner::new().on(
            "fuser -mv /data",
            CommandOutput {
                success: true,
                code: Some(0),
                stdout: " 4242".into(),
                stderr: "USER PID ACCESS COMMAND\n/data: root 4242 ..c.. bash\n".into(),
            },
        ));
        let listing = ops.list_holders("/data").unwrap();
        assert!(listing.starts_with("USER PID"));

        let silent = LinuxDeviceOps::new(
            ScriptedRunner::new().on("fuser -mv /srv", CommandOutput::failed("")),
        );
        assert!(silent.list_holders("/srv").is_err());
    }

    #[test]
    fn test_remove_block_device_writes_delete() {
        let dir = TempDir::new().unwrap();
        let device_dir = dir.path().join("block/sdb/device");
        fs::create_dir_all(&device_dir).unwrap();
        fs::write(device_dir.join("delete"), "").unwrap();

        let ops = LinuxDeviceOps::with_root(ScriptedRunner::new(), dir.path());
        ops.remove_block_device("sdb").unwrap();
        assert_eq!(fs::read_to_string(device_dir.join("delete")).unwrap(), "1");

        assert!(matches!(
            ops.remove_block_device("../sdb"),
            Err(TeardownError::InvalidDevice(_))
        ));
        assert!(matches!(
            ops.remove_block_device("sdz"),
            Err(TeardownError::Io(_))
        ));
    }
}
