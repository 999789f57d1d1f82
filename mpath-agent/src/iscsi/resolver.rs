//! iSCSI target resolution for a block device.
//!
//! Resolution only fails outright when the device address cannot be read or
//! no session maps to it. Scope and portal lookups are enrichment: their
//! failures are logged and leave the corresponding field empty.

use std::collections::HashMap;

use tracing::{debug, error, info, instrument, warn};

use super::cache::{PortalCache, ScopeStore, TargetScopeCache};
use super::error::{IscsiError, Result};
use super::types::{Portal, RawPortal, ScsiAddress, SessionMapping, TargetRecord};

/// Live queries against the host's iSCSI initiator.
pub trait IscsiInitiator: Send + Sync {
    /// SCSI address of the device identified by `device_path_id`.
    fn scsi_address(&self, device_path_id: &str) -> Result<ScsiAddress>;

    /// All active session mappings.
    fn session_mappings(&self) -> Result<Vec<SessionMapping>>;

    /// Scope classification reported by the target.
    fn target_scope(&self, target_name: &str) -> Result<String>;

    /// Portals known for an initiator/target pair.
    fn target_portals(&self, initiator_name: &str, target_name: &str) -> Result<Vec<RawPortal>>;
}

/// Return the first mapping serving `address`.
///
/// There is one session per bus address, so the first match is the only one.
pub fn find_session_mapping<'m>(
    mappings: &'m [SessionMapping],
    address: &ScsiAddress,
) -> Option<&'m SessionMapping> {
    mappings.iter().find(|mapping| mapping.matches(address))
}

/// Keep only IPv4 portals, preserving their relative order.
pub fn ipv4_portals(raw: &[RawPortal]) -> Vec<Portal> {
    raw.iter().filter_map(Portal::from_raw).collect()
}

/// Resolves devices to fully described iSCSI targets.
pub struct TargetResolver<'a, S: ScopeStore = HashMap<String, String>> {
    initiator: &'a dyn IscsiInitiator,
    scopes: &'a TargetScopeCache<S>,
}

impl<'a, S: ScopeStore> TargetResolver<'a, S> {
    pub fn new(initiator: &'a dyn IscsiInitiator, scopes: &'a TargetScopeCache<S>) -> Self {
        Self { initiator, scopes }
    }

    /// Resolve the target serving `device_path_id`.
    ///
    /// `mappings` is the session list fetched once by the caller and
    /// `portal_cache` is shared across every device of one enumeration pass.
    #[instrument(skip(self, mappings, portal_cache))]
    pub fn resolve_target(
        &self,
        device_path_id: &str,
        mappings: &[SessionMapping],
        portal_cache: &mut PortalCache,
    ) -> Result<TargetRecord> {
        let address = self.initiator.scsi_address(device_path_id)?;
        debug!(
            port = address.port_number,
            bus = address.path_id,
            target = address.target_id,
            lun = address.lun,
            "Resolved SCSI address"
        );

        let Some(mapping) = find_session_mapping(mappings, &address) else {
            let err = IscsiError::TargetNotFound(device_path_id.to_string());
            error!(error = %err, "No session mapping for device");
            return Err(err);
        };

        let mut target = TargetRecord::new(mapping.target_name.clone());
        target.scope = self.resolve_scope(&mapping.target_name);

        match portal_cache.get(&mapping.target_name) {
            Some(portals) => target.portals = portals.clone(),
            None => match self.target_portals(&mapping.initiator_name, &mapping.target_name) {
                Ok(portals) => {
                    portal_cache.insert(mapping.target_name.clone(), portals.clone());
                    target.portals = portals;
                }
                Err(e) => {
                    warn!(target_name = %mapping.target_name, error = %e, "Portal lookup failed");
                }
            },
        }

        if !target.is_complete() {
            info!(
                target_name = %target.name,
                scope = %target.scope,
                portals = target.portals.len(),
                "Target resolved with partial enrichment"
            );
        }
        Ok(target)
    }

    /// Scope from the cache, falling back to a live query.
    fn resolve_scope(&self, target_name: &str) -> String {
        if let Some(scope) = self.scopes.scope(target_name) {
            return scope;
        }
        match self.initiator.target_scope(target_name) {
            Ok(scope) => {
                self.scopes.set_scope(target_name, &scope);
                scope
            }
            Err(e) => {
                debug!(target_name = %target_name, error = %e, "Target scope unavailable");
                String::new()
            }
        }
    }

    /// IPv4 portals for an initiator/target pair.
    pub fn target_portals(&self, initiator_name: &str, target_name: &str) -> Result<Vec<Portal>> {
        let raw = self.initiator.target_portals(initiator_name, target_name)?;
        let portals = ipv4_portals(&raw);
        if portals.len() != raw.len() {
            debug!(
                target_name = %target_name,
                dropped = raw.len() - portals.len(),
                "Dropped non-IPv4 portals"
            );
        }
        Ok(portals)
    }
}
