use std::collections::BTreeMap;

use crate::DeviceId;
use crate::error::{Result, SyncError};

/// Device id to username for one experiment session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRegistry {
    users: BTreeMap<DeviceId, String>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Username of `device`, registering `user_<device>` on first sight.
    pub fn assign(&mut self, device: &str) -> &str {
        self.users.entry(device.to_owned()).or_insert_with(|| {
            log::info!("Registering device {device}");
            format!("user_{device}")
        })
    }

    pub fn set(&mut self, device: impl Into<DeviceId>, username: impl Into<String>) {
        self.users.insert(device.into(), username.into());
    }

    /// Registers a `device=username` pair.
    pub fn set_from_pair(&mut self, pair: &str) -> Result<()> {
        let invalid = || SyncError::InvalidConfig {
            reason: format!("expected DEVICE=NAME, got '{pair}'"),
        };
        let (device, username) = pair.split_once('=').ok_or_else(invalid)?;
        let (device, username) = (device.trim(), username.trim());
        if device.is_empty() || username.is_empty() {
            return Err(invalid());
        }
        self.set(device, username);
        Ok(())
    }

    /// `{device: user, ...}`
    pub fn describe(&self) -> String {
        let entries: Vec<String> = self
            .users
            .iter()
            .map(|(device, user)| format!("{device}: {user}"))
            .collect();
        format!("{{{}}}", entries.join(", "))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
