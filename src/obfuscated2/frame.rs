//! 64-byte obfuscated2 handshake frame
//!
//! Layout:
//! - `[0..8)` noise
//! - `[8..40)` key material
//! - `[40..56)` IV
//! - `[56..60)` connection tag (encrypted on the wire)
//! - `[60..62)` datacenter id, i16 little endian (encrypted on the wire)
//! - `[62..64)` noise (encrypted on the wire)

use rand::RngCore;
use std::fmt;

pub const FRAME_LEN: usize = 64;

pub(crate) const KEY_OFFSET: usize = 8;
pub(crate) const KEY_LEN: usize = 32;
pub(crate) const IV_OFFSET: usize = KEY_OFFSET + KEY_LEN;
pub(crate) const IV_LEN: usize = 16;
pub(crate) const MAGIC_OFFSET: usize = IV_OFFSET + IV_LEN;
const MAGIC_LEN: usize = 4;
const DC_OFFSET: usize = MAGIC_OFFSET + MAGIC_LEN;

/// First words a generated frame must never start with (little endian):
/// HTTP verbs, a TLS record header and the intermediate/secure tags.
const RESERVED_PREFIXES: [u32; 7] = [
    0x4441_4548, // "HEAD"
    0x5453_4f50, // "POST"
    0x2054_4547, // "GET "
    0x4954_504f, // "OPTI"
    0x0201_0316, // TLS handshake record
    0xdddd_dddd,
    0xeeee_eeee,
];

const ABRIDGED_FIRST_BYTE: u8 = 0xef;

/// MTPROTO transport framing announced in the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    /// 0xefefefef
    Abridged,
    /// 0xeeeeeeee
    Intermediate,
    /// 0xdddddddd, padded intermediate
    Secure,
}

impl ConnectionType {
    pub fn tag(&self) -> [u8; 4] {
        match self {
            ConnectionType::Abridged => [0xef; 4],
            ConnectionType::Intermediate => [0xee; 4],
            ConnectionType::Secure => [0xdd; 4],
        }
    }

    pub fn from_tag(tag: [u8; 4]) -> Option<Self> {
        match tag {
            [0xef, 0xef, 0xef, 0xef] => Some(ConnectionType::Abridged),
            [0xee, 0xee, 0xee, 0xee] => Some(ConnectionType::Intermediate),
            [0xdd, 0xdd, 0xdd, 0xdd] => Some(ConnectionType::Secure),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionType::Abridged => write!(f, "abridged"),
            ConnectionType::Intermediate => write!(f, "intermediate"),
            ConnectionType::Secure => write!(f, "secure"),
        }
    }
}

/// Raw handshake frame
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame([u8; FRAME_LEN]);

impl Frame {
    pub fn from_bytes(bytes: [u8; FRAME_LEN]) -> Self {
        Self(bytes)
    }

    /// Generate random frame material carrying `connection_type` and `dc`
    /// in the clear.
    pub fn generate(connection_type: ConnectionType, dc: i16) -> Self {
        let mut rng = rand::thread_rng();
        let mut bytes = [0u8; FRAME_LEN];
        loop {
            rng.fill_bytes(&mut bytes);
            if !has_reserved_prefix(&bytes) {
                break;
            }
        }

        let mut frame = Self(bytes);
        frame.set_magic(connection_type.tag());
        frame.set_dc(dc);
        frame
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    pub(crate) fn as_mut_bytes(&mut self) -> &mut [u8; FRAME_LEN] {
        &mut self.0
    }

    pub fn key(&self) -> &[u8] {
        &self.0[KEY_OFFSET..IV_OFFSET]
    }

    pub fn iv(&self) -> &[u8] {
        &self.0[IV_OFFSET..MAGIC_OFFSET]
    }

    pub fn magic(&self) -> [u8; 4] {
        let mut tag = [0u8; MAGIC_LEN];
        tag.copy_from_slice(&self.0[MAGIC_OFFSET..DC_OFFSET]);
        tag
    }

    pub fn dc(&self) -> i16 {
        i16::from_le_bytes([self.0[DC_OFFSET], self.0[DC_OFFSET + 1]])
    }

    fn set_magic(&mut self, tag: [u8; 4]) {
        self.0[MAGIC_OFFSET..DC_OFFSET].copy_from_slice(&tag);
    }

    fn set_dc(&mut self, dc: i16) {
        self.0[DC_OFFSET..DC_OFFSET + 2].copy_from_slice(&dc.to_le_bytes());
    }

    /// Copy of the frame with the key+IV region reversed byte-wise.
    /// Keys for the opposite direction are taken from it.
    pub fn invert(&self) -> Self {
        let mut inverted = self.0;
        inverted[KEY_OFFSET..MAGIC_OFFSET].reverse();
        Self(inverted)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({})", hex::encode(self.0))
    }
}

fn has_reserved_prefix(bytes: &[u8; FRAME_LEN]) -> bool {
    if bytes[0] == ABRIDGED_FIRST_BYTE {
        return true;
    }
    let first = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if RESERVED_PREFIXES.contains(&first) {
        return true;
    }
    bytes[4..8].iter().all(|&b| b == 0)
}
