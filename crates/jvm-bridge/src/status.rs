//! Runtime status codes and interface versions.
//!
//! The managed runtime's invocation interface reports failures as small
//! negative integers. This module converts them into Rust enums so callers
//! can match on them and lift them into [`BridgeResult`].

use std::fmt;

use crate::error::{BridgeError, BridgeResult};

/// Status codes returned by the runtime's invocation interface.
///
/// These values correspond to the `JNI_OK` / `JNI_E*` constants.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JniStatus {
    Ok = 0,
    Error = -1,
    Detached = -2,
    Version = -3,
    NoMemory = -4,
    AlreadyExists = -5,
    InvalidArgument = -6,
}

impl JniStatus {
    /// Creates a status from a raw i32 value.
    ///
    /// Unknown codes map to [`JniStatus::Error`].
    pub fn from_raw(status: i32) -> Self {
        match status {
            0 => JniStatus::Ok,
            -2 => JniStatus::Detached,
            -3 => JniStatus::Version,
            -4 => JniStatus::NoMemory,
            -5 => JniStatus::AlreadyExists,
            -6 => JniStatus::InvalidArgument,
            _ => JniStatus::Error,
        }
    }

    /// Returns the raw status value.
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Returns true if the status indicates success.
    pub fn is_success(&self) -> bool {
        *self == JniStatus::Ok
    }

    /// Converts to a Result, returning Ok(()) for success.
    pub fn into_result(self) -> BridgeResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(BridgeError::Status { status: self })
        }
    }
}

impl fmt::Display for JniStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JniStatus::Ok => "JNI_OK",
            JniStatus::Error => "JNI_ERR",
            JniStatus::Detached => "JNI_EDETACHED",
            JniStatus::Version => "JNI_EVERSION",
            JniStatus::NoMemory => "JNI_ENOMEM",
            JniStatus::AlreadyExists => "JNI_EEXIST",
            JniStatus::InvalidArgument => "JNI_EINVAL",
        };
        write!(f, "{}", s)
    }
}

/// Extension trait for converting raw status codes.
pub trait JniStatusExt {
    /// Converts a raw status code to a Result.
    fn to_result(self) -> BridgeResult<()>;
}

impl JniStatusExt for i32 {
    fn to_result(self) -> BridgeResult<()> {
        JniStatus::from_raw(self).into_result()
    }
}

/// Interface versions understood by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum JniVersion {
    #[serde(rename = "1.2")]
    V1_2,
    #[serde(rename = "1.4")]
    V1_4,
    #[default]
    #[serde(rename = "1.6")]
    V1_6,
    #[serde(rename = "1.8")]
    V1_8,
    #[serde(rename = "9")]
    V9,
    #[serde(rename = "10")]
    V10,
    #[serde(rename = "19")]
    V19,
    #[serde(rename = "20")]
    V20,
    #[serde(rename = "21")]
    V21,
}

impl JniVersion {
    /// Returns the raw version constant (`JNI_VERSION_*`).
    pub const fn as_raw(self) -> i32 {
        match self {
            JniVersion::V1_2 => 0x0001_0002,
            JniVersion::V1_4 => 0x0001_0004,
            JniVersion::V1_6 => 0x0001_0006,
            JniVersion::V1_8 => 0x0001_0008,
            JniVersion::V9 => 0x0009_0000,
            JniVersion::V10 => 0x000a_0000,
            JniVersion::V19 => 0x0013_0000,
            JniVersion::V20 => 0x0014_0000,
            JniVersion::V21 => 0x0015_0000,
        }
    }

    /// Creates a version from its raw constant.
    pub fn from_raw(raw: i32) -> Option<Self> {
        [
            JniVersion::V1_2,
            JniVersion::V1_4,
            JniVersion::V1_6,
            JniVersion::V1_8,
            JniVersion::V9,
            JniVersion::V10,
            JniVersion::V19,
            JniVersion::V20,
            JniVersion::V21,
        ]
        .into_iter()
        .find(|v| v.as_raw() == raw)
    }

    /// Parses the dotted form used in configuration files ("1.6", "21").
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "1.2" => Some(JniVersion::V1_2),
            "1.4" => Some(JniVersion::V1_4),
            "1.6" => Some(JniVersion::V1_6),
            "1.8" => Some(JniVersion::V1_8),
            "9" => Some(JniVersion::V9),
            "10" => Some(JniVersion::V10),
            "19" => Some(JniVersion::V19),
            "20" => Some(JniVersion::V20),
            "21" => Some(JniVersion::V21),
            _ => None,
        }
    }
}

impl fmt::Display for JniVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw = self.as_raw();
        let major = raw >> 16;
        let minor = raw & 0xffff;
        if major == 1 {
            write!(f, "1.{}", minor)
        } else {
            write!(f, "{}", major)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_raw() {
        assert_eq!(JniStatus::from_raw(0), JniStatus::Ok);
        assert_eq!(JniStatus::from_raw(-2), JniStatus::Detached);
        assert_eq!(JniStatus::from_raw(-4), JniStatus::NoMemory);
        assert_eq!(JniStatus::from_raw(-99), JniStatus::Error);
    }

    #[test]
    fn test_status_into_result() {
        assert!(JniStatus::Ok.into_result().is_ok());
        let err = JniStatus::Detached.into_result().unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Status {
                status: JniStatus::Detached
            }
        ));
        assert!(0_i32.to_result().is_ok());
        assert!((-6_i32).to_result().is_err());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(JniStatus::NoMemory.to_string(), "JNI_ENOMEM");
    }

    #[test]
    fn test_version_raw_roundtrip_and_display() {
        assert_eq!(JniVersion::V1_6.as_raw(), 0x10006);
        assert_eq!(JniVersion::from_raw(0x10006), Some(JniVersion::V1_6));
        assert_eq!(JniVersion::from_raw(0x12345), None);
        assert_eq!(JniVersion::V1_8.to_string(), "1.8");
        assert_eq!(JniVersion::V21.to_string(), "21");
        assert_eq!(JniVersion::parse("9"), Some(JniVersion::V9));
    }
}
