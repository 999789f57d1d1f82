pub mod cache;
pub mod enumerate;
pub mod error;
pub mod resolver;
pub mod sysfs;
pub mod types;

pub use cache::{PortalCache, ScopeStore, TargetScopeCache};
pub use enumerate::{DeviceEnumerator, DiskSource};
pub use error::{IscsiError, Result};
pub use resolver::{IscsiInitiator, TargetResolver};
pub use sysfs::{LsblkDiskSource, SysfsInitiator};
pub use types::{
    BusType, DeviceRecord, DevicePartition, DiskInfo, Portal, RawPortal, ScsiAddress,
    SessionMapping, TargetRecord,
};
