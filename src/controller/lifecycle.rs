//! Controller lifecycle states

use std::fmt;

/// Where a controller generation is in its lifecycle.
///
/// `Installing -> Installed -> Activating -> Activated`, or `Redundant` once
/// the install failed or a newer generation took over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Installing,
    /// Installed and waiting to take control
    Installed,
    Activating,
    Activated,
    Redundant,
}

impl LifecycleState {
    /// True once the controller serves requests
    pub fn is_active(self) -> bool {
        self == LifecycleState::Activated
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Installing => "installing",
            LifecycleState::Installed => "installed",
            LifecycleState::Activating => "activating",
            LifecycleState::Activated => "activated",
            LifecycleState::Redundant => "redundant",
        };
        f.write_str(s)
    }
}
