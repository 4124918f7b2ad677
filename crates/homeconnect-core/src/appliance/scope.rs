// ── Scope and precondition gates ──
//
// Checked before a request is sent so a write that cannot succeed fails
// with a named reason instead of a vendor rejection.

use serde_json::Value;
use strum::{Display, EnumString, IntoStaticStr};

use homeconnect_api::types::keys;

use super::Appliance;
use crate::error::CoreError;

/// OAuth permission families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum Scope {
    IdentifyAppliance,
    Monitor,
    Settings,
    Control,
}

impl Appliance {
    /// `true` if `scope` is usable for this appliance, either granted
    /// outright or as `<Type>-<Scope>`, after per-type overrides.
    pub fn has_scope(&self, scope: Scope) -> bool {
        let name: &'static str = scope.into();
        let overrides = &self.settings().scope_override;
        if overrides.deny.iter().any(|s| s == name) {
            return false;
        }
        if overrides.allow.iter().any(|s| s == name) {
            return true;
        }

        let auth = self.client().auth();
        let kind = self.kind();
        if kind.is_empty() {
            auth.has_scope(name)
        } else {
            auth.has_scope(&format!("{kind}-{name}"))
        }
    }

    fn require_scope(&self, scope: Scope) -> Result<(), CoreError> {
        if self.has_scope(scope) {
            Ok(())
        } else {
            Err(CoreError::ScopeNotAuthorised {
                ha_id: self.ha_id().to_owned(),
                scope: scope.to_string(),
            })
        }
    }

    pub fn require_monitor(&self) -> Result<(), CoreError> {
        self.require_scope(Scope::Monitor)
    }

    pub fn require_settings(&self) -> Result<(), CoreError> {
        self.require_scope(Scope::Settings)
    }

    pub fn require_control(&self) -> Result<(), CoreError> {
        self.require_scope(Scope::Control)
    }

    pub(crate) fn require_connected(&self) -> Result<(), CoreError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(CoreError::Disconnected {
                ha_id: self.ha_id().to_owned(),
            })
        }
    }

    /// Control scope, connected, not under local control, and remote
    /// control enabled. Unknown status counts as allowed.
    pub fn require_remote_control(&self) -> Result<(), CoreError> {
        self.require_control()?;
        self.require_connected()?;
        if self.status_flag(keys::LOCAL_CONTROL_ACTIVE) == Some(true) {
            return Err(CoreError::LocalControlActive {
                ha_id: self.ha_id().to_owned(),
            });
        }
        if self.status_flag(keys::REMOTE_CONTROL_ACTIVE) == Some(false) {
            return Err(CoreError::RemoteControlDisabled {
                ha_id: self.ha_id().to_owned(),
            });
        }
        Ok(())
    }

    /// Remote control plus remote start enabled.
    pub fn require_remote_start(&self) -> Result<(), CoreError> {
        self.require_remote_control()?;
        if self.status_flag(keys::REMOTE_CONTROL_START_ALLOWED) == Some(false) {
            return Err(CoreError::RemoteStartDisabled {
                ha_id: self.ha_id().to_owned(),
            });
        }
        Ok(())
    }

    fn status_flag(&self, key: &str) -> Option<bool> {
        self.get_item(key).and_then(|item| match item.value {
            Value::Bool(flag) => Some(flag),
            _ => None,
        })
    }
}
