//! Firmware version policy and the `.xlb` image header
//!
//! Versions are build numbers compared as unsigned integers. The update
//! archive carries the firmware image at [`XLB_PATH`]; its header stores the
//! build number as ASCII digits at a fixed offset.

use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Directory on the device volume holding the extracted archive
pub const PAYLOAD_DIR: &str = "unpacked";

/// Location of the firmware image inside the extracted archive
pub const XLB_PATH: &str = "update/fw5mini.xlb";

/// Byte offset of the build number in the `.xlb` header
pub const XLB_VERSION_OFFSET: u64 = 24;

/// Length of the build number field in the `.xlb` header
pub const XLB_VERSION_LEN: usize = 12;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("Version string is empty")]
    Empty,
    #[error("Version is not an unsigned integer: {0:?}")]
    NotANumber(String),
}

/// A firmware build number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FirmwareVersion(pub u64);

impl FirmwareVersion {
    /// Whether this version should replace `installed`; ties are not newer
    pub fn is_newer_than(&self, installed: &FirmwareVersion) -> bool {
        self > installed
    }
}

impl FromStr for FirmwareVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim_matches(|c: char| c.is_whitespace() || c == '\0');
        if trimmed.is_empty() {
            return Err(VersionError::Empty);
        }
        trimmed
            .parse::<u64>()
            .map(FirmwareVersion)
            .map_err(|_| VersionError::NotANumber(s.to_string()))
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read the raw build number field from an `.xlb` image
pub fn read_xlb_version<R: Read + Seek>(reader: &mut R) -> std::io::Result<String> {
    reader.seek(SeekFrom::Start(XLB_VERSION_OFFSET))?;
    let mut buffer = [0u8; XLB_VERSION_LEN];
    reader.read_exact(&mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).to_string())
}

/// Read the raw build number field from the `.xlb` image under `payload_root`
pub fn read_payload_version(payload_root: &Path) -> std::io::Result<String> {
    let mut file = File::open(payload_root.join(XLB_PATH))?;
    read_xlb_version(&mut file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn xlb_with_version(version: &[u8; XLB_VERSION_LEN]) -> Vec<u8> {
        let mut data = vec![0xAAu8; XLB_VERSION_OFFSET as usize];
        data.extend_from_slice(version);
        data.extend_from_slice(&[0u8; 64]);
        data
    }

    #[test]
    fn test_parse_plain_number() {
        assert_eq!("120".parse::<FirmwareVersion>(), Ok(FirmwareVersion(120)));
    }

    #[test]
    fn test_parse_trims_padding() {
        assert_eq!(
            " 202401150930\0\0".parse::<FirmwareVersion>(),
            Ok(FirmwareVersion(202401150930))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!("abc".parse::<FirmwareVersion>(), Err(VersionError::NotANumber(_))));
        assert!(matches!("12a".parse::<FirmwareVersion>(), Err(VersionError::NotANumber(_))));
        assert!(matches!("-5".parse::<FirmwareVersion>(), Err(VersionError::NotANumber(_))));
        assert_eq!("".parse::<FirmwareVersion>(), Err(VersionError::Empty));
        assert_eq!("\0\0".parse::<FirmwareVersion>(), Err(VersionError::Empty));
    }

    #[test]
    fn test_tie_is_not_newer() {
        let a = FirmwareVersion(120);
        assert!(!a.is_newer_than(&FirmwareVersion(120)));
        assert!(FirmwareVersion(130).is_newer_than(&a));
        assert!(!FirmwareVersion(100).is_newer_than(&a));
    }

    #[test]
    fn test_read_xlb_version() {
        let data = xlb_with_version(b"202401150930");
        let version = read_xlb_version(&mut Cursor::new(data)).unwrap();
        assert_eq!(version, "202401150930");
    }

    #[test]
    fn test_read_xlb_version_truncated() {
        let data = vec![0u8; 30];
        assert!(read_xlb_version(&mut Cursor::new(data)).is_err());
    }
}
