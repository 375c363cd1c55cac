pub mod digest;
pub mod hash;

pub use digest::Digest;
pub use hash::{DigestWriter, Sha1Hash};
