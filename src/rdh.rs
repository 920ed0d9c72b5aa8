//! Raw Data Header (RDH) codec.
//!
//! The RDH is the fixed binary preamble the front-end electronics place at
//! the start of every payload. The staging core itself never interprets it
//! (grouping runs on the staging [`BlockHeader`](crate::block::BlockHeader)),
//! but equipment readers and downstream consumers need a bit-exact reader
//! and writer for it.
//!
//! Three versions exist in the field. The canonical emitted version is v4
//! (64 bytes, 16 little-endian 32-bit words); v3 (same shape, fewer id
//! fields) and v2 (32 bytes, 4 little-endian 64-bit words) are read-only
//! legacy formats reached through [`Rdh::read`]. All versions keep the
//! version number in the byte at offset 0, which is what makes one-pass
//! dispatch possible.

use crate::error::{Result, StageError};
use byteorder::{ByteOrder, LittleEndian};

/// Size in bytes of a v3 or v4 header.
pub const RDH_SIZE: usize = 64;

/// Size in bytes of a v2 header.
pub const RDH_SIZE_V2: usize = 32;

/// Raw Data Header version 4, the canonical wire format.
///
/// 16 little-endian 32-bit words. The word numbering below follows the
/// hardware documentation, where words are labelled within 64-bit pairs and
/// therefore appear byte-swapped relative to their offsets: word 3 occupies
/// bytes 0..4, word 2 bytes 4..8, word 1 bytes 8..12, word 0 bytes 12..16,
/// then word 7 at 16..20 and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RdhV4 {
    /// Header version number (word 3, bits 0-7). Always 4 on emit.
    pub version: u8,
    /// Header size in bytes (word 3, bits 8-15). Always 0x40.
    pub header_size: u8,
    /// Length of the data block (word 3, bits 16-31).
    pub block_length: u16,
    /// Front-end equipment identifier (word 2, bits 0-15).
    pub fee_id: u16,
    /// Priority bit (word 2, bits 16-23).
    pub priority_bit: u8,
    /// Offset to the next packet (word 1, bits 0-15).
    pub offset_next_packet: u16,
    /// Size of the block in memory (word 1, bits 16-31).
    pub memory_size: u16,
    /// Link identifier, the GBT channel number (word 0, bits 0-7).
    pub link_id: u8,
    /// Packet counter, incremented per packet on the link (word 0, bits 8-15).
    pub packet_counter: u8,
    /// CRU identifier (word 0, bits 16-27).
    pub cru_id: u16,
    /// Data path wrapper identifier, one of the two CRU end points
    /// (word 0, bits 28-31).
    pub dpw_id: u8,
    /// Trigger orbit (word 7).
    pub trigger_orbit: u32,
    /// Heartbeat orbit (word 6).
    pub heartbeat_orbit: u32,
    /// Trigger bunch-crossing ID (word 11, bits 0-11).
    pub trigger_bc: u16,
    /// Heartbeat bunch-crossing ID (word 11, bits 16-27).
    pub heartbeat_bc: u16,
    /// Trigger type bit field (word 10).
    pub trigger_type: u32,
    /// Detector-specific field (word 15, bits 0-15).
    pub detector_field: u16,
    /// Detector PAR field (word 15, bits 16-31).
    pub par: u16,
    /// Stop bit, set on the last page of a multi-page block
    /// (word 14, bits 0-7).
    pub stop_bit: u8,
    /// Pages counter, starting from 0 (word 14, bits 8-23).
    pub pages_counter: u16,
}

impl Default for RdhV4 {
    fn default() -> Self {
        // Seed words 0x00004004 / 0x00ffffff / 0xffffffff: version and size
        // fixed, every id field at its all-ones sentinel.
        Self {
            version: 4,
            header_size: RDH_SIZE as u8,
            block_length: 0,
            fee_id: 0xFFFF,
            priority_bit: 0xFF,
            offset_next_packet: 0,
            memory_size: 0,
            link_id: 0xFF,
            packet_counter: 0xFF,
            cru_id: 0xFFF,
            dpw_id: 0xF,
            trigger_orbit: 0xFFFF_FFFF,
            heartbeat_orbit: 0xFFFF_FFFF,
            trigger_bc: 0,
            heartbeat_bc: 0,
            trigger_type: 0,
            detector_field: 0,
            par: 0,
            stop_bit: 0,
            pages_counter: 0,
        }
    }
}

impl RdhV4 {
    /// Read a v4 header from a byte buffer.
    ///
    /// # Errors
    /// [`StageError::HeaderMalformed`] when the buffer is too short,
    /// [`StageError::HeaderVersion`] when the version byte is not 4.
    pub fn read_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < RDH_SIZE {
            return Err(StageError::HeaderMalformed {
                cause: format!("buffer of {} bytes, v4 header needs {}", bytes.len(), RDH_SIZE),
            });
        }
        if bytes[0] != 4 {
            return Err(StageError::HeaderVersion { version: bytes[0] });
        }

        let w3 = LittleEndian::read_u32(&bytes[0..4]);
        let w2 = LittleEndian::read_u32(&bytes[4..8]);
        let w1 = LittleEndian::read_u32(&bytes[8..12]);
        let w0 = LittleEndian::read_u32(&bytes[12..16]);
        let w11 = LittleEndian::read_u32(&bytes[32..36]);
        let w15 = LittleEndian::read_u32(&bytes[48..52]);
        let w14 = LittleEndian::read_u32(&bytes[52..56]);

        Ok(Self {
            version: (w3 & 0xFF) as u8,
            header_size: ((w3 >> 8) & 0xFF) as u8,
            block_length: (w3 >> 16) as u16,
            fee_id: (w2 & 0xFFFF) as u16,
            priority_bit: ((w2 >> 16) & 0xFF) as u8,
            offset_next_packet: (w1 & 0xFFFF) as u16,
            memory_size: (w1 >> 16) as u16,
            link_id: (w0 & 0xFF) as u8,
            packet_counter: ((w0 >> 8) & 0xFF) as u8,
            cru_id: ((w0 >> 16) & 0xFFF) as u16,
            dpw_id: ((w0 >> 28) & 0xF) as u8,
            trigger_orbit: LittleEndian::read_u32(&bytes[16..20]),
            heartbeat_orbit: LittleEndian::read_u32(&bytes[20..24]),
            trigger_bc: (w11 & 0xFFF) as u16,
            heartbeat_bc: ((w11 >> 16) & 0xFFF) as u16,
            trigger_type: LittleEndian::read_u32(&bytes[36..40]),
            detector_field: (w15 & 0xFFFF) as u16,
            par: (w15 >> 16) as u16,
            stop_bit: (w14 & 0xFF) as u8,
            pages_counter: ((w14 >> 8) & 0xFFFF) as u16,
        })
    }

    /// Write this header into a byte buffer. Reserved words are zeroed.
    ///
    /// # Errors
    /// [`StageError::HeaderMalformed`] when the buffer is too short.
    pub fn write_to(&self, bytes: &mut [u8]) -> Result<()> {
        if bytes.len() < RDH_SIZE {
            return Err(StageError::HeaderMalformed {
                cause: format!("buffer of {} bytes, v4 header needs {}", bytes.len(), RDH_SIZE),
            });
        }

        bytes[..RDH_SIZE].fill(0);

        let w3 = u32::from(self.version)
            | (u32::from(self.header_size) << 8)
            | (u32::from(self.block_length) << 16);
        let w2 = u32::from(self.fee_id) | (u32::from(self.priority_bit) << 16);
        let w1 = u32::from(self.offset_next_packet) | (u32::from(self.memory_size) << 16);
        let w0 = u32::from(self.link_id)
            | (u32::from(self.packet_counter) << 8)
            | (u32::from(self.cru_id & 0xFFF) << 16)
            | (u32::from(self.dpw_id & 0xF) << 28);
        let w11 = u32::from(self.trigger_bc & 0xFFF) | (u32::from(self.heartbeat_bc & 0xFFF) << 16);
        let w15 = u32::from(self.detector_field) | (u32::from(self.par) << 16);
        let w14 = u32::from(self.stop_bit) | (u32::from(self.pages_counter) << 8);

        LittleEndian::write_u32(&mut bytes[0..4], w3);
        LittleEndian::write_u32(&mut bytes[4..8], w2);
        LittleEndian::write_u32(&mut bytes[8..12], w1);
        LittleEndian::write_u32(&mut bytes[12..16], w0);
        LittleEndian::write_u32(&mut bytes[16..20], self.trigger_orbit);
        LittleEndian::write_u32(&mut bytes[20..24], self.heartbeat_orbit);
        LittleEndian::write_u32(&mut bytes[32..36], w11);
        LittleEndian::write_u32(&mut bytes[36..40], self.trigger_type);
        LittleEndian::write_u32(&mut bytes[48..52], w15);
        LittleEndian::write_u32(&mut bytes[52..56], w14);
        Ok(())
    }

    /// Serialize into a fixed array.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; RDH_SIZE] {
        let mut buf = [0u8; RDH_SIZE];
        self.write_to(&mut buf).expect("fixed buffer is large enough");
        buf
    }
}

/// Raw Data Header version 3.
///
/// Same 64-byte word layout as v4 but word 0 carries only the link ID; the
/// CRU id, DPW id and packet counter did not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RdhV3 {
    /// Header version number (word 3, bits 0-7).
    pub version: u8,
    /// Header size in bytes (word 3, bits 8-15).
    pub header_size: u8,
    /// Length of the data block (word 3, bits 16-31).
    pub block_length: u16,
    /// Front-end equipment identifier (word 2, bits 0-15).
    pub fee_id: u16,
    /// Priority bit (word 2, bits 16-23).
    pub priority_bit: u8,
    /// Offset to the next packet (word 1, bits 0-15).
    pub offset_next_packet: u16,
    /// Size of the block in memory (word 1, bits 16-31).
    pub memory_size: u16,
    /// Link identifier (word 0, bits 0-7).
    pub link_id: u8,
    /// Trigger orbit (word 7).
    pub trigger_orbit: u32,
    /// Heartbeat orbit (word 6).
    pub heartbeat_orbit: u32,
    /// Trigger bunch-crossing ID (word 11, bits 0-11).
    pub trigger_bc: u16,
    /// Heartbeat bunch-crossing ID (word 11, bits 16-27).
    pub heartbeat_bc: u16,
    /// Trigger type bit field (word 10).
    pub trigger_type: u32,
    /// Detector-specific field (word 15, bits 0-15).
    pub detector_field: u16,
    /// Detector PAR field (word 15, bits 16-31).
    pub par: u16,
    /// Stop bit (word 14, bits 0-7).
    pub stop_bit: u8,
    /// Pages counter (word 14, bits 8-23).
    pub pages_counter: u16,
}

impl Default for RdhV3 {
    fn default() -> Self {
        // Seed words 0x00004003 / 0x00ffffff; the link word defaults to zero
        // in this version.
        Self {
            version: 3,
            header_size: RDH_SIZE as u8,
            block_length: 0,
            fee_id: 0xFFFF,
            priority_bit: 0xFF,
            offset_next_packet: 0,
            memory_size: 0,
            link_id: 0,
            trigger_orbit: 0xFFFF_FFFF,
            heartbeat_orbit: 0xFFFF_FFFF,
            trigger_bc: 0,
            heartbeat_bc: 0,
            trigger_type: 0,
            detector_field: 0,
            par: 0,
            stop_bit: 0,
            pages_counter: 0,
        }
    }
}

impl RdhV3 {
    /// Read a v3 header from a byte buffer.
    ///
    /// # Errors
    /// [`StageError::HeaderMalformed`] when the buffer is too short,
    /// [`StageError::HeaderVersion`] when the version byte is not 3.
    pub fn read_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < RDH_SIZE {
            return Err(StageError::HeaderMalformed {
                cause: format!("buffer of {} bytes, v3 header needs {}", bytes.len(), RDH_SIZE),
            });
        }
        if bytes[0] != 3 {
            return Err(StageError::HeaderVersion { version: bytes[0] });
        }

        let w3 = LittleEndian::read_u32(&bytes[0..4]);
        let w2 = LittleEndian::read_u32(&bytes[4..8]);
        let w1 = LittleEndian::read_u32(&bytes[8..12]);
        let w0 = LittleEndian::read_u32(&bytes[12..16]);
        let w11 = LittleEndian::read_u32(&bytes[32..36]);
        let w15 = LittleEndian::read_u32(&bytes[48..52]);
        let w14 = LittleEndian::read_u32(&bytes[52..56]);

        Ok(Self {
            version: (w3 & 0xFF) as u8,
            header_size: ((w3 >> 8) & 0xFF) as u8,
            block_length: (w3 >> 16) as u16,
            fee_id: (w2 & 0xFFFF) as u16,
            priority_bit: ((w2 >> 16) & 0xFF) as u8,
            offset_next_packet: (w1 & 0xFFFF) as u16,
            memory_size: (w1 >> 16) as u16,
            link_id: (w0 & 0xFF) as u8,
            trigger_orbit: LittleEndian::read_u32(&bytes[16..20]),
            heartbeat_orbit: LittleEndian::read_u32(&bytes[20..24]),
            trigger_bc: (w11 & 0xFFF) as u16,
            heartbeat_bc: ((w11 >> 16) & 0xFFF) as u16,
            trigger_type: LittleEndian::read_u32(&bytes[36..40]),
            detector_field: (w15 & 0xFFFF) as u16,
            par: (w15 >> 16) as u16,
            stop_bit: (w14 & 0xFF) as u8,
            pages_counter: ((w14 >> 8) & 0xFFFF) as u16,
        })
    }
}

/// Raw Data Header version 2, the oldest format: 4 little-endian 64-bit
/// words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RdhV2 {
    /// Header version number (word 0, bits 0-7).
    pub version: u8,
    /// Block length (word 0, bits 8-23).
    pub block_length: u16,
    /// Front-end equipment identifier (word 0, bits 24-39).
    pub fee_id: u16,
    /// Link identifier (word 0, bits 40-47).
    pub link_id: u8,
    /// Header size in 64-bit words (word 0, bits 48-55).
    pub header_size: u8,
    /// Trigger orbit (word 1, bits 0-31).
    pub trigger_orbit: u32,
    /// Heartbeat orbit (word 1, bits 32-63).
    pub heartbeat_orbit: u32,
    /// Trigger bunch-crossing ID (word 2, bits 0-11).
    pub trigger_bc: u16,
    /// Trigger type bit field (word 2, bits 12-43).
    pub trigger_type: u32,
    /// Heartbeat bunch-crossing ID (word 2, bits 44-55).
    pub heartbeat_bc: u16,
    /// Pages counter (word 3, bits 0-15).
    pub pages_counter: u16,
    /// Stop code (word 3, bits 16-23).
    pub stop_bit: u8,
    /// Detector-specific field (word 3, bits 24-39).
    pub detector_field: u16,
    /// Detector PAR field (word 3, bits 40-55).
    pub par: u16,
}

impl Default for RdhV2 {
    fn default() -> Self {
        // Seed word 0x0004ffffff000002: version 2, zero length, all-ones fee
        // and link ids, header size of four 64-bit words.
        Self {
            version: 2,
            block_length: 0,
            fee_id: 0xFFFF,
            link_id: 0xFF,
            header_size: 4,
            trigger_orbit: 0,
            heartbeat_orbit: 0,
            trigger_bc: 0,
            trigger_type: 0,
            heartbeat_bc: 0,
            pages_counter: 0,
            stop_bit: 0,
            detector_field: 0,
            par: 0,
        }
    }
}

impl RdhV2 {
    /// Read a v2 header from a byte buffer.
    ///
    /// # Errors
    /// [`StageError::HeaderMalformed`] when the buffer is too short,
    /// [`StageError::HeaderVersion`] when the version byte is not 2.
    pub fn read_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < RDH_SIZE_V2 {
            return Err(StageError::HeaderMalformed {
                cause: format!(
                    "buffer of {} bytes, v2 header needs {}",
                    bytes.len(),
                    RDH_SIZE_V2
                ),
            });
        }
        if bytes[0] != 2 {
            return Err(StageError::HeaderVersion { version: bytes[0] });
        }

        let w0 = LittleEndian::read_u64(&bytes[0..8]);
        let w2 = LittleEndian::read_u64(&bytes[16..24]);
        let w3 = LittleEndian::read_u64(&bytes[24..32]);

        Ok(Self {
            version: (w0 & 0xFF) as u8,
            block_length: ((w0 >> 8) & 0xFFFF) as u16,
            fee_id: ((w0 >> 24) & 0xFFFF) as u16,
            link_id: ((w0 >> 40) & 0xFF) as u8,
            header_size: ((w0 >> 48) & 0xFF) as u8,
            trigger_orbit: LittleEndian::read_u32(&bytes[8..12]),
            heartbeat_orbit: LittleEndian::read_u32(&bytes[12..16]),
            trigger_bc: (w2 & 0xFFF) as u16,
            trigger_type: ((w2 >> 12) & 0xFFFF_FFFF) as u32,
            heartbeat_bc: ((w2 >> 44) & 0xFFF) as u16,
            pages_counter: (w3 & 0xFFFF) as u16,
            stop_bit: ((w3 >> 16) & 0xFF) as u8,
            detector_field: ((w3 >> 24) & 0xFFFF) as u16,
            par: ((w3 >> 40) & 0xFFFF) as u16,
        })
    }
}

/// A header of any supported version, produced by [`Rdh::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rdh {
    /// Version 2 legacy header.
    V2(RdhV2),
    /// Version 3 legacy header.
    V3(RdhV3),
    /// Version 4 canonical header.
    V4(RdhV4),
}

impl Rdh {
    /// Read a header of whatever version the buffer declares.
    ///
    /// The version byte lives at offset 0 in every supported version.
    ///
    /// # Errors
    /// [`StageError::HeaderMalformed`] on an empty or truncated buffer,
    /// [`StageError::HeaderVersion`] on an unknown version byte.
    pub fn read(bytes: &[u8]) -> Result<Self> {
        let version = *bytes.first().ok_or_else(|| StageError::HeaderMalformed {
            cause: "empty buffer".to_string(),
        })?;

        match version {
            2 => RdhV2::read_from(bytes).map(Self::V2),
            3 => RdhV3::read_from(bytes).map(Self::V3),
            4 => RdhV4::read_from(bytes).map(Self::V4),
            other => Err(StageError::HeaderVersion { version: other }),
        }
    }

    /// The header version number.
    #[must_use]
    pub fn version(&self) -> u8 {
        match self {
            Self::V2(h) => h.version,
            Self::V3(h) => h.version,
            Self::V4(h) => h.version,
        }
    }

    /// The link identifier.
    #[must_use]
    pub fn link_id(&self) -> u8 {
        match self {
            Self::V2(h) => h.link_id,
            Self::V3(h) => h.link_id,
            Self::V4(h) => h.link_id,
        }
    }

    /// The front-end equipment identifier.
    #[must_use]
    pub fn fee_id(&self) -> u16 {
        match self {
            Self::V2(h) => h.fee_id,
            Self::V3(h) => h.fee_id,
            Self::V4(h) => h.fee_id,
        }
    }

    /// The declared header size in bytes.
    #[must_use]
    pub fn header_size(&self) -> usize {
        match self {
            // v2 counts 64-bit words.
            Self::V2(h) => usize::from(h.header_size) * 8,
            Self::V3(h) => usize::from(h.header_size),
            Self::V4(h) => usize::from(h.header_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_round_trip_identity() {
        let header = RdhV4 {
            block_length: 1024,
            fee_id: 0x1234,
            priority_bit: 1,
            offset_next_packet: 0x2000,
            memory_size: 0x1F00,
            link_id: 7,
            packet_counter: 42,
            cru_id: 0xABC,
            dpw_id: 1,
            trigger_orbit: 0xDEAD_BEEF,
            heartbeat_orbit: 0xCAFE_F00D,
            trigger_bc: 0x5A5,
            heartbeat_bc: 0xA5A,
            trigger_type: 0x8000_0001,
            detector_field: 0x00FF,
            par: 0xFF00,
            stop_bit: 1,
            pages_counter: 3,
            ..RdhV4::default()
        };

        let bytes = header.to_bytes();
        let parsed = RdhV4::read_from(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn v4_default_seed_words() {
        let bytes = RdhV4::default().to_bytes();

        assert_eq!(LittleEndian::read_u32(&bytes[0..4]), 0x0000_4004);
        assert_eq!(LittleEndian::read_u32(&bytes[4..8]), 0x00FF_FFFF);
        assert_eq!(LittleEndian::read_u32(&bytes[8..12]), 0);
        assert_eq!(LittleEndian::read_u32(&bytes[12..16]), 0xFFFF_FFFF);
        assert_eq!(LittleEndian::read_u32(&bytes[16..20]), 0xFFFF_FFFF);
        assert_eq!(LittleEndian::read_u32(&bytes[20..24]), 0xFFFF_FFFF);
        // Reserved words stay zero. Words are numbered within 128-bit
        // groups, highest-numbered word of a group at the lowest offset.
        for word in [5usize, 4, 9, 8, 13, 12] {
            let offset = (word / 4) * 16 + (3 - word % 4) * 4;
            assert_eq!(LittleEndian::read_u32(&bytes[offset..offset + 4]), 0, "word {word}");
        }
    }

    #[test]
    fn version_dispatch() {
        let v4 = RdhV4 {
            link_id: 9,
            fee_id: 100,
            ..RdhV4::default()
        };
        let parsed = Rdh::read(&v4.to_bytes()).unwrap();
        assert_eq!(parsed.version(), 4);
        assert_eq!(parsed.link_id(), 9);
        assert_eq!(parsed.fee_id(), 100);
        assert_eq!(parsed.header_size(), RDH_SIZE);
    }

    #[test]
    fn v2_parse_from_seed_word() {
        let mut bytes = [0u8; RDH_SIZE_V2];
        LittleEndian::write_u64(&mut bytes[0..8], 0x0004_FFFF_FF00_0002);

        let parsed = Rdh::read(&bytes).unwrap();
        let Rdh::V2(h) = parsed else {
            panic!("expected v2 dispatch");
        };
        assert_eq!(h.version, 2);
        assert_eq!(h.block_length, 0);
        assert_eq!(h.fee_id, 0xFFFF);
        assert_eq!(h.link_id, 0xFF);
        assert_eq!(h.header_size, 4);
        assert_eq!(parsed.header_size(), RDH_SIZE_V2);
    }

    #[test]
    fn v2_bit_fields() {
        let mut bytes = [0u8; RDH_SIZE_V2];
        LittleEndian::write_u64(&mut bytes[0..8], 0x0004_FFFF_FF00_0002);
        // trigger_bc=0x123, trigger_type=0xABCD0123, heartbeat_bc=0x456
        let w2: u64 = 0x123 | (0xABCD_0123u64 << 12) | (0x456u64 << 44);
        LittleEndian::write_u64(&mut bytes[16..24], w2);
        // pages=7, stop=1, detector_field=0xBEEF, par=0x1221
        let w3: u64 = 7 | (1u64 << 16) | (0xBEEFu64 << 24) | (0x1221u64 << 40);
        LittleEndian::write_u64(&mut bytes[24..32], w3);

        let h = RdhV2::read_from(&bytes).unwrap();
        assert_eq!(h.trigger_bc, 0x123);
        assert_eq!(h.trigger_type, 0xABCD_0123);
        assert_eq!(h.heartbeat_bc, 0x456);
        assert_eq!(h.pages_counter, 7);
        assert_eq!(h.stop_bit, 1);
        assert_eq!(h.detector_field, 0xBEEF);
        assert_eq!(h.par, 0x1221);
    }

    #[test]
    fn v3_defaults_parse() {
        let mut bytes = [0u8; RDH_SIZE];
        LittleEndian::write_u32(&mut bytes[0..4], 0x0000_4003);
        LittleEndian::write_u32(&mut bytes[4..8], 0x00FF_FFFF);
        LittleEndian::write_u32(&mut bytes[12..16], 0x0000_0011);

        let parsed = Rdh::read(&bytes).unwrap();
        let Rdh::V3(h) = parsed else {
            panic!("expected v3 dispatch");
        };
        assert_eq!(h.version, 3);
        assert_eq!(h.header_size, 0x40);
        assert_eq!(h.fee_id, 0xFFFF);
        assert_eq!(h.link_id, 0x11);
    }

    #[test]
    fn unknown_version_rejected() {
        let mut bytes = [0u8; RDH_SIZE];
        bytes[0] = 9;
        let err = Rdh::read(&bytes).unwrap_err();
        assert_eq!(err.code(), "E102");
    }

    #[test]
    fn truncated_buffer_rejected() {
        let bytes = RdhV4::default().to_bytes();
        let err = Rdh::read(&bytes[..32]).unwrap_err();
        assert_eq!(err.code(), "E101");

        assert_eq!(Rdh::read(&[]).unwrap_err().code(), "E101");
    }
}
