//! Integer-coded values crossing the boundary.
//!
//! The guest selects enum variants by index. Each enum converts with
//! `TryFrom<u32>` so an unknown discriminant is reported instead of being
//! indexed into a string table.

use crate::error::HostlinkError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// `boolean_get` result for `false`.
pub const BOOL_FALSE: u32 = 0;
/// `boolean_get` result for `true`.
pub const BOOL_TRUE: u32 = 1;
/// `boolean_get` result when the value is not a boolean.
pub const BOOL_NOT_BOOLEAN: u32 = 2;

/// Encode an optional boolean the way `boolean_get` returns it.
pub fn encode_bool(value: Option<bool>) -> u32 {
    match value {
        Some(false) => BOOL_FALSE,
        Some(true) => BOOL_TRUE,
        None => BOOL_NOT_BOOLEAN,
    }
}

/// Log level passed to the `log` import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum LogLevel {
    /// Most verbose.
    Trace = 0,
    /// Debug.
    Debug = 1,
    /// Info.
    Info = 2,
    /// Warning.
    Warn = 3,
    /// Error.
    Error = 4,
}

impl From<u32> for LogLevel {
    /// Unknown levels clamp to `Error`; logging has no failure path.
    fn from(val: u32) -> Self {
        match val {
            0 => Self::Trace,
            1 => Self::Debug,
            2 => Self::Info,
            3 => Self::Warn,
            _ => Self::Error,
        }
    }
}

/// `ScrollToOptions.behavior`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollBehavior {
    /// Browser default.
    Auto,
    /// Jump.
    Instant,
    /// Animate.
    Smooth,
}

impl ScrollBehavior {
    /// Name as used by the host API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Instant => "instant",
            Self::Smooth => "smooth",
        }
    }
}

impl TryFrom<u32> for ScrollBehavior {
    type Error = HostlinkError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Auto),
            1 => Ok(Self::Instant),
            2 => Ok(Self::Smooth),
            _ => Err(HostlinkError::InvalidDiscriminant {
                kind: "ScrollBehavior",
                value,
            }),
        }
    }
}

impl fmt::Display for ScrollBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `History.scrollRestoration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollRestoration {
    /// Restore the scroll position on navigation.
    Auto,
    /// Leave scrolling to the page.
    Manual,
}

impl ScrollRestoration {
    /// Name as used by the host API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

impl TryFrom<u32> for ScrollRestoration {
    type Error = HostlinkError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Auto),
            1 => Ok(Self::Manual),
            _ => Err(HostlinkError::InvalidDiscriminant {
                kind: "ScrollRestoration",
                value,
            }),
        }
    }
}

impl fmt::Display for ScrollRestoration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scroll_behavior_discriminants() {
        assert_eq!(ScrollBehavior::try_from(2).unwrap(), ScrollBehavior::Smooth);
        assert_eq!(ScrollBehavior::Instant.to_string(), "instant");
        assert!(matches!(
            ScrollBehavior::try_from(3),
            Err(HostlinkError::InvalidDiscriminant {
                kind: "ScrollBehavior",
                value: 3
            })
        ));
    }

    #[test]
    fn scroll_restoration_discriminants() {
        assert_eq!(
            ScrollRestoration::try_from(1).unwrap(),
            ScrollRestoration::Manual
        );
        assert!(ScrollRestoration::try_from(2).is_err());
    }

    #[test]
    fn log_level_clamps() {
        assert_eq!(LogLevel::from(2), LogLevel::Info);
        assert_eq!(LogLevel::from(99), LogLevel::Error);
    }

    #[test]
    fn bool_encoding() {
        assert_eq!(encode_bool(Some(true)), 1);
        assert_eq!(encode_bool(Some(false)), 0);
        assert_eq!(encode_bool(None), 2);
    }
}
