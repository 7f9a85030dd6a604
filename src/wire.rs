//! Common wire header and endian-conversion contract
//!
//! Every replicated message shares `{id, size, error}`, where `id`
//! packs `service_id << 16 | function_id`. Receivers whose host order
//! differs from the sender's run a per-message endian-convert routine
//! on a mutable copy before dispatch (see `dispatch`).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Common header prefixing every replicated wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(C)]
pub struct WireHeader {
    /// `service_id << 16 | function_id`.
    pub id: u32,
    /// Total encoded message size, including this header.
    pub size: u32,
    /// Error code, only meaningful on library-call replies.
    pub error: u32,
}

impl WireHeader {
    /// Build a header for a given service/function pair.
    pub fn new(service_id: u16, function_id: u16, size: u32) -> Self {
        WireHeader {
            id: ((service_id as u32) << 16) | function_id as u32,
            size,
            error: 0,
        }
    }

    /// Extract the service id from `id`.
    pub fn service_id(&self) -> u16 {
        (self.id >> 16) as u16
    }

    /// Extract the function id from `id`.
    pub fn function_id(&self) -> u16 {
        (self.id & 0xFFFF) as u16
    }

    /// Byte-swap every field in place (little<->big endian conversion).
    pub fn endian_convert(&mut self) {
        self.id = self.id.swap_bytes();
        self.size = self.size.swap_bytes();
        self.error = self.error.swap_bytes();
    }
}

/// A wire message that can be byte-swapped in place when it arrives
/// from a peer with different host byte order.
pub trait WireConvert {
    /// Swap every multi-byte field in place.
    fn endian_convert(&mut self);
}

/// The byte order tag a sender stamps its ring messages with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endianness {
    /// Little-endian host.
    Little,
    /// Big-endian host.
    Big,
}

impl Endianness {
    /// This process's native byte order.
    pub fn native() -> Self {
        if cfg!(target_endian = "little") {
            Endianness::Little
        } else {
            Endianness::Big
        }
    }
}

/// Convert `msg` in place if `sender_order` differs from this host's order.
pub fn convert_if_needed<T: WireConvert>(msg: &mut T, sender_order: Endianness) {
    if sender_order != Endianness::native() {
        msg.endian_convert();
    }
}

/// SHA-256 digest of a byte slice, used for wire-message integrity
/// checks in tests and for zero-copy region handles.
pub fn digest(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_packs_and_unpacks_ids() {
        let h = WireHeader::new(3, 7, 64);
        assert_eq!(h.service_id(), 3);
        assert_eq!(h.function_id(), 7);
    }

    #[test]
    fn header_endian_convert_is_involutive() {
        let mut h = WireHeader::new(3, 7, 64);
        let original = h;
        h.endian_convert();
        assert_ne!(h.id, original.id);
        h.endian_convert();
        assert_eq!(h, original);
    }

    #[test]
    fn digest_is_stable() {
        assert_eq!(digest(b"abc"), digest(b"abc"));
        assert_ne!(digest(b"abc"), digest(b"abd"));
    }
}
