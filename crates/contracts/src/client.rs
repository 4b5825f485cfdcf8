//! Client identity and operating modes

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Who is on the other end of a connection
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClientIdentity {
    /// Package name, used for mode whitelisting
    pub package: String,
    pub uid: u32,
    /// Granted permissions
    #[serde(default)]
    pub permissions: BTreeSet<String>,
}

impl ClientIdentity {
    pub fn new(package: impl Into<String>, uid: u32) -> Self {
        Self {
            package: package.into(),
            uid,
            permissions: BTreeSet::new(),
        }
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    /// Whether this identity satisfies an optional permission requirement
    pub fn can_access(&self, required: Option<&str>) -> bool {
        required.is_none_or(|p| self.permissions.contains(p))
    }
}

/// Kind of connection requested at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// Regular subscriber
    #[default]
    Normal,
    /// May push synthetic events into the pipeline
    DataInjection,
}

/// Global operating mode; exactly one is active
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "package", rename_all = "snake_case")]
pub enum OperatingMode {
    #[default]
    Normal,
    /// Only the whitelisted package may act
    Restricted(String),
    /// Device is fed by the whitelisted package
    DataInjection(String),
}

impl OperatingMode {
    /// Package allowed to act in this mode, if the mode restricts callers
    pub fn whitelisted_package(&self) -> Option<&str> {
        match self {
            Self::Normal => None,
            Self::Restricted(p) | Self::DataInjection(p) => Some(p),
        }
    }

    /// Whether `package` may enable, flush or change rates in this mode
    pub fn permits(&self, package: &str) -> bool {
        self.whitelisted_package().is_none_or(|p| p == package)
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Restricted(p) => write!(f, "restricted({p})"),
            Self::DataInjection(p) => write!(f, "data_injection({p})"),
        }
    }
}
