//! Registry of the encryption algorithms a stored field can be tagged with.

use std::fmt;

/// Algorithm identifier carried in byte 4 of every encrypted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Algorithm {
    /// Not encrypted, or tagged with an id this build does not know.
    Unknown = 0,
    /// Static-key AES applied block by block, unauthenticated.
    Aes = 1,
    /// AES-256-GCM under a rotating data encryption key.
    AesGcm = 2,
}

impl Algorithm {
    /// Every registered algorithm, indexed by id.
    pub const ALL: [Algorithm; 3] = [Algorithm::Unknown, Algorithm::Aes, Algorithm::AesGcm];

    /// Wire identifier.
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Registered name, also used by record-mapping layers to look up a codec.
    pub const fn name(self) -> &'static str {
        match self {
            Algorithm::Unknown => "unknown",
            Algorithm::Aes => "aes",
            Algorithm::AesGcm => "aes-gcm",
        }
    }

    /// Look up an algorithm by wire id.
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(usize::from(id)).copied()
    }

    /// Look up an algorithm by registered name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
