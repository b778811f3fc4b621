//! Trusted device matching for QR approvals.
//!
//! Browsers regenerate their device id when storage is cleared, so a device is
//! also recognized by its human readable description (e.g. "iPhone Safari").
//! Descriptions match case-insensitively when either one contains the other.

use crate::store::User;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum DeviceMatch {
    /// Same device id as the one registered.
    Id,
    /// Different id, recognized by description. The stored id should be refreshed.
    Info,
    None,
}

impl DeviceMatch {
    pub(super) fn is_match(self) -> bool {
        self != Self::None
    }
}

pub(super) fn has_registered_device(user: &User) -> bool {
    non_empty(user.qr_auth_device_id.as_deref()).is_some()
        || non_empty(user.qr_auth_device_info.as_deref()).is_some()
}

pub(super) fn match_device(user: &User, device_id: &str, device_info: Option<&str>) -> DeviceMatch {
    if non_empty(user.qr_auth_device_id.as_deref()).is_some_and(|stored| stored == device_id) {
        return DeviceMatch::Id;
    }
    let (Some(stored), Some(provided)) = (
        non_empty(user.qr_auth_device_info.as_deref()),
        non_empty(device_info),
    ) else {
        return DeviceMatch::None;
    };
    let stored = stored.to_lowercase();
    let provided = provided.to_lowercase();
    if stored.contains(&provided) || provided.contains(&stored) {
        DeviceMatch::Info
    } else {
        DeviceMatch::None
    }
}

/// Short prefix of a device id for log lines.
pub(super) fn redact(device_id: &str) -> String {
    let prefix: String = device_id.chars().take(8).collect();
    format!("{prefix}...")
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
