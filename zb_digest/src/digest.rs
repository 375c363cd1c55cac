use std::array::TryFromSliceError;
use std::fmt;
use std::ops::Deref;

/// The number of bytes in a digest.
pub const DIGEST_LEN: usize = 20;

/// The number of characters in the hex rendering of a digest.
pub const HEX_LEN: usize = DIGEST_LEN * 2;

/// A fixed-width SHA-1 content digest.
///
/// Rendered as 40 lowercase hex characters. The hex form is what cache
/// paths and log lines carry; the raw bytes only exist between the hasher
/// and the renderer.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Digest {
    bytes: [u8; DIGEST_LEN],
}

impl Digest {
    pub fn new(bytes: [u8; DIGEST_LEN]) -> Self {
        Self { bytes }
    }

    pub fn from_bytes(bytes: &[u8; DIGEST_LEN]) -> Self {
        Self { bytes: *bytes }
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<[u8; DIGEST_LEN]> for Digest {
    fn from(bytes: [u8; DIGEST_LEN]) -> Self {
        Digest { bytes }
    }
}

impl TryFrom<&[u8]> for Digest {
    type Error = TryFromSliceError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Ok(Digest {
            bytes: value.try_into()?,
        })
    }
}

impl Deref for Digest {
    type Target = [u8; DIGEST_LEN];

    fn deref(&self) -> &Self::Target {
        &self.bytes
    }
}
