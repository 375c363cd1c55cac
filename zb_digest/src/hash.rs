use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha1::{Digest as _, Sha1};

use crate::digest::Digest;

/// Compute the SHA-1 digest of an object.
///
/// The hash must be platform independent and consistent across runs, so
/// arch-sized integers are widened to u64 and numbers are hashed as their
/// little-endian bytes.
pub trait Sha1Hash {
    fn hash_into(&self, hasher: &mut Sha1);

    fn sha1(&self) -> Digest {
        let mut hasher = Sha1::new();
        self.hash_into(&mut hasher);
        Digest::new(hasher.finalize().into())
    }
}

impl<T: Sha1Hash + ?Sized> Sha1Hash for &T {
    fn hash_into(&self, hasher: &mut Sha1) {
        (**self).hash_into(hasher)
    }
}

impl<T: Sha1Hash + ?Sized> Sha1Hash for Box<T> {
    fn hash_into(&self, hasher: &mut Sha1) {
        (**self).hash_into(hasher)
    }
}

impl<T: Sha1Hash + ?Sized> Sha1Hash for Arc<T> {
    fn hash_into(&self, hasher: &mut Sha1) {
        (**self).hash_into(hasher)
    }
}

impl Sha1Hash for [u8] {
    fn hash_into(&self, hasher: &mut Sha1) {
        hasher.update(self);
    }
}

impl Sha1Hash for Vec<u8> {
    fn hash_into(&self, hasher: &mut Sha1) {
        hasher.update(self.as_slice());
    }
}

impl Sha1Hash for str {
    fn hash_into(&self, hasher: &mut Sha1) {
        hasher.update(self.as_bytes());
    }
}

impl Sha1Hash for String {
    fn hash_into(&self, hasher: &mut Sha1) {
        hasher.update(self.as_bytes());
    }
}

impl Sha1Hash for OsStr {
    fn hash_into(&self, hasher: &mut Sha1) {
        hasher.update(self.as_encoded_bytes());
    }
}

impl Sha1Hash for OsString {
    fn hash_into(&self, hasher: &mut Sha1) {
        self.as_os_str().hash_into(hasher)
    }
}

impl Sha1Hash for Path {
    fn hash_into(&self, hasher: &mut Sha1) {
        self.as_os_str().hash_into(hasher)
    }
}

impl Sha1Hash for PathBuf {
    fn hash_into(&self, hasher: &mut Sha1) {
        self.as_path().hash_into(hasher)
    }
}

impl Sha1Hash for bool {
    fn hash_into(&self, hasher: &mut Sha1) {
        hasher.update(&[*self as u8]);
    }
}

macro_rules! impl_sha1_hash_for_fixed_numbers {
    ($($t:ty),*) => {
        $(
            impl Sha1Hash for $t {
                fn hash_into(&self, hasher: &mut Sha1) {
                    hasher.update(&self.to_le_bytes());
                }
            }
        )*
    }
}

impl_sha1_hash_for_fixed_numbers!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128);

macro_rules! impl_sha1_hash_for_arch_numbers {
    ($($t:ty),*) => {
        $(
            impl Sha1Hash for $t {
                fn hash_into(&self, hasher: &mut Sha1) {
                    (*self as u64).hash_into(hasher)
                }
            }
        )*
    }
}

impl_sha1_hash_for_arch_numbers!(usize, isize);

/// An [io::Write] adapter over a running SHA-1 state, so hash recipes can
/// be written with `write!` the same way they would be streamed to a file.
#[derive(Debug, Default)]
pub struct DigestWriter {
    hasher: Sha1,
}

impl DigestWriter {
    pub fn new() -> Self {
        Self { hasher: Sha1::new() }
    }

    /// Absorb bytes. Unlike the [io::Write] impl this cannot fail, which
    /// keeps hash recipes free of dead error paths.
    pub fn update(&mut self, bytes: impl AsRef<[u8]>) {
        self.hasher.update(bytes.as_ref());
    }

    pub fn finalize(self) -> Digest {
        Digest::new(self.hasher.finalize().into())
    }
}

impl io::Write for DigestWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
