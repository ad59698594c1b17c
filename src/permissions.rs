//! 读 / 写 / 删除权限开关，与鉴权相互独立。

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::SETTING_PERMISSIONS;
use crate::error::ApiError;
use crate::settings::SettingsStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permission {
    Read,
    Write,
    Delete,
}

impl Permission {
    fn code(self) -> &'static str {
        match self {
            Permission::Read => "PERMISSION_DENIED_READ",
            Permission::Write => "PERMISSION_DENIED_WRITE",
            Permission::Delete => "PERMISSION_DENIED_DELETE",
        }
    }

    fn message(self) -> &'static str {
        match self {
            Permission::Read => "无读取权限",
            Permission::Write => "无写入权限",
            Permission::Delete => "无删除权限",
        }
    }

    /// 带权限错误码的 403。
    pub fn denied(self, message: impl Into<String>) -> ApiError {
        ApiError::Forbidden {
            message: message.into(),
            code: Some(self.code()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PermissionSet {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
}

impl Default for PermissionSet {
    fn default() -> Self {
        Self {
            read: true,
            write: true,
            delete: false,
        }
    }
}

#[derive(Deserialize)]
struct PermissionOverrides {
    read: Option<bool>,
    write: Option<bool>,
    delete: Option<bool>,
}

impl PermissionSet {
    /// 从设置读取权限；缺失或格式错误时使用默认值。
    pub fn load(store: &dyn SettingsStore) -> Self {
        match store.get(SETTING_PERMISSIONS) {
            Ok(Some(value)) => Self::from_value(value),
            Ok(None) => Self::default(),
            Err(err) => {
                debug!(error = %err, "permissions unreadable, using defaults");
                Self::default()
            }
        }
    }

    pub fn from_value(value: Value) -> Self {
        let defaults = Self::default();
        match serde_json::from_value::<PermissionOverrides>(value) {
            Ok(overrides) => Self {
                read: overrides.read.unwrap_or(defaults.read),
                write: overrides.write.unwrap_or(defaults.write),
                delete: overrides.delete.unwrap_or(defaults.delete),
            },
            Err(_) => defaults,
        }
    }

    pub fn allows(&self, permission: Permission) -> bool {
        match permission {
            Permission::Read => self.read,
            Permission::Write => self.write,
            Permission::Delete => self.delete,
        }
    }

    pub fn require(&self, permission: Permission) -> Result<(), ApiError> {
        if self.allows(permission) {
            Ok(())
        } else {
            Err(permission.denied(permission.message()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettings;
    use serde_json::json;

    #[test]
    fn defaults_allow_read_and_write_only() {
        let store = MemorySettings::new();
        let perms = PermissionSet::load(&store);
        assert!(perms.allows(Permission::Read));
        assert!(perms.allows(Permission::Write));
        assert!(!perms.allows(Permission::Delete));
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let perms = PermissionSet::from_value(json!({ "delete": true, "write": false }));
        assert_eq!(
            perms,
            PermissionSet {
                read: true,
                write: false,
                delete: true
            }
        );
    }

    #[test]
    fn malformed_value_falls_back_to_defaults() {
        assert_eq!(
            PermissionSet::from_value(json!("everything")),
            PermissionSet::default()
        );
        assert_eq!(
            PermissionSet::from_value(json!({ "read": "yes" })),
            PermissionSet::default()
        );
    }

    #[test]
    fn denial_carries_class_code() {
        let perms = PermissionSet::from_value(json!({ "read": false }));
        match perms.require(Permission::Read) {
            Err(ApiError::Forbidden { code, .. }) => {
                assert_eq!(code, Some("PERMISSION_DENIED_READ"))
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
