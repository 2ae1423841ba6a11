//! Server version parsing and full-state-transfer capability checks

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Server version `major.minor.patch`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Major version
    pub major: u32,
    /// Minor version
    pub minor: u32,
    /// Patch version
    pub patch: u32,
}

impl Version {
    /// First release with the clone plugin (full state transfer)
    pub const CLONE_MINIMUM: Version = Version::new(8, 0, 17);

    /// First release allowing clone between different patch releases
    pub const CLONE_CROSS_PATCH: Version = Version::new(8, 0, 37);

    /// Create a version
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Version {
            major,
            minor,
            patch,
        }
    }

    /// Parse `8.0.27`, `8.0.27-log`, `8.4.0-commercial`, ...
    pub fn parse(text: &str) -> Result<Self> {
        let core = text
            .trim()
            .split(|c: char| c == '-' || c.is_whitespace())
            .next()
            .unwrap_or_default();
        let mut numbers = core.split('.').map(|p| p.parse::<u32>());
        match (numbers.next(), numbers.next(), numbers.next()) {
            (Some(Ok(major)), Some(Ok(minor)), patch) => {
                let patch = match patch {
                    Some(Ok(p)) => p,
                    None => 0,
                    Some(Err(_)) => return Err(Error::InvalidVersion(text.to_string())),
                };
                Ok(Version::new(major, minor, patch))
            }
            _ => Err(Error::InvalidVersion(text.to_string())),
        }
    }

    /// Whether this server can take part in a full state transfer
    pub fn supports_clone(&self) -> bool {
        *self >= Self::CLONE_MINIMUM
    }

    /// Whether `donor` can clone into `recipient`
    ///
    /// Both must support clone. Below 8.0.37 the versions must match
    /// exactly; from 8.0.37 on, the same major.minor series is enough.
    pub fn clone_compatible(donor: Version, recipient: Version) -> bool {
        if !donor.supports_clone() || !recipient.supports_clone() {
            return false;
        }
        if donor.major != recipient.major || donor.minor != recipient.minor {
            return false;
        }
        if donor >= Self::CLONE_CROSS_PATCH && recipient >= Self::CLONE_CROSS_PATCH {
            return true;
        }
        donor == recipient
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
