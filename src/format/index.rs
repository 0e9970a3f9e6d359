//! The 8192-byte index block stored inside the magic trailer.
//!
//! Layout is fixed little-endian. The block checksums itself: Adler-32 is
//! computed with the `index_checksum` field zeroed, then stored there.

use super::{FORMAT_VERSION, INDEX_BLOCK_SIZE, checksum};
use crate::error::{FlavorError, Result};

const OFF_PERF_HINTS: usize = 640;
const OFF_BUILD_STAMP: usize = 704;
const OFF_CAPABILITIES: usize = 832;
const OFF_RESERVED: usize = 864;

/// Performance-hint sub-block (64 bytes at offset 640).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerformanceHints {
    pub access_mode: u8,
    pub cache_strategy: u8,
    pub encryption_type: u8,
    pub page_size: u32,
    pub max_memory: u64,
    pub min_memory: u64,
    pub cpu_features: u64,
    pub gpu_requirements: u64,
    pub numa_hints: u64,
    pub stream_chunk_size: u32,
}

impl Default for PerformanceHints {
    fn default() -> Self {
        PerformanceHints {
            access_mode: 0,
            cache_strategy: 0,
            encryption_type: 0,
            page_size: 4096,
            max_memory: 0,
            min_memory: 0,
            cpu_features: 0,
            gpu_requirements: 0,
            numa_hints: 0,
            stream_chunk_size: 0,
        }
    }
}

/// Extended-metadata sub-block (128 bytes at offset 704).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStamp {
    pub build_timestamp: u64,
    pub build_machine: [u8; 32],
    pub source_hash: [u8; 32],
    pub dependency_hash: [u8; 32],
    pub license_id: [u8; 16],
    pub provenance_uri: [u8; 8],
}

impl Default for BuildStamp {
    fn default() -> Self {
        BuildStamp {
            build_timestamp: 0,
            build_machine: [0; 32],
            source_hash: [0; 32],
            dependency_hash: [0; 32],
            license_id: [0; 16],
            provenance_uri: [0; 8],
        }
    }
}

/// Capabilities sub-block (32 bytes at offset 832).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub capabilities: u64,
    pub requirements: u64,
    pub extensions: u64,
    pub compatibility: u32,
    pub protocol_version: u32,
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities {
            capabilities: 0,
            requirements: 0,
            extensions: 0,
            compatibility: FORMAT_VERSION,
            protocol_version: 1,
        }
    }
}

/// Package capability bit: digitally signed.
pub const CAPABILITY_SIGNED: u64 = 1 << 7;

/// PSPF/2025 index block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBlock {
    pub format_version: u32,
    pub index_checksum: u32,
    pub package_size: u64,
    pub launcher_size: u64,
    pub metadata_offset: u64,
    pub metadata_size: u64,
    pub slot_table_offset: u64,
    pub slot_table_size: u64,
    pub slot_count: u32,
    pub flags: u32,
    pub public_key: [u8; 32],
    pub metadata_checksum: [u8; 32],
    /// Ed25519 signature over the uncompressed metadata JSON in the first
    /// 64 bytes; the remaining 448 MUST be zero.
    pub integrity_signature: [u8; 512],
    pub hints: PerformanceHints,
    pub stamp: BuildStamp,
    pub caps: Capabilities,
}

impl IndexBlock {
    pub fn new() -> Self {
        IndexBlock {
            format_version: FORMAT_VERSION,
            index_checksum: 0,
            package_size: 0,
            launcher_size: 0,
            metadata_offset: 0,
            metadata_size: 0,
            slot_table_offset: 0,
            slot_table_size: 0,
            slot_count: 0,
            flags: 0,
            public_key: [0; 32],
            metadata_checksum: [0; 32],
            integrity_signature: [0; 512],
            hints: PerformanceHints::default(),
            stamp: BuildStamp::default(),
            caps: Capabilities::default(),
        }
    }

    /// Pack to exactly [`INDEX_BLOCK_SIZE`] bytes, computing and embedding
    /// the Adler-32 self-checksum.
    pub fn pack(&self) -> Vec<u8> {
        let mut b = vec![0u8; INDEX_BLOCK_SIZE];

        b[0..4].copy_from_slice(&self.format_version.to_le_bytes());
        // index_checksum written last
        b[8..16].copy_from_slice(&self.package_size.to_le_bytes());
        b[16..24].copy_from_slice(&self.launcher_size.to_le_bytes());
        b[24..32].copy_from_slice(&self.metadata_offset.to_le_bytes());
        b[32..40].copy_from_slice(&self.metadata_size.to_le_bytes());
        b[40..48].copy_from_slice(&self.slot_table_offset.to_le_bytes());
        b[48..56].copy_from_slice(&self.slot_table_size.to_le_bytes());
        b[56..60].copy_from_slice(&self.slot_count.to_le_bytes());
        b[60..64].copy_from_slice(&self.flags.to_le_bytes());
        b[64..96].copy_from_slice(&self.public_key);
        b[96..128].copy_from_slice(&self.metadata_checksum);
        b[128..640].copy_from_slice(&self.integrity_signature);

        let h = OFF_PERF_HINTS;
        b[h] = self.hints.access_mode;
        b[h + 1] = self.hints.cache_strategy;
        b[h + 2] = self.hints.encryption_type;
        // b[h + 3] reserved
        b[h + 4..h + 8].copy_from_slice(&self.hints.page_size.to_le_bytes());
        b[h + 8..h + 16].copy_from_slice(&self.hints.max_memory.to_le_bytes());
        b[h + 16..h + 24].copy_from_slice(&self.hints.min_memory.to_le_bytes());
        b[h + 24..h + 32].copy_from_slice(&self.hints.cpu_features.to_le_bytes());
        b[h + 32..h + 40].copy_from_slice(&self.hints.gpu_requirements.to_le_bytes());
        b[h + 40..h + 48].copy_from_slice(&self.hints.numa_hints.to_le_bytes());
        b[h + 48..h + 52].copy_from_slice(&self.hints.stream_chunk_size.to_le_bytes());

        let s = OFF_BUILD_STAMP;
        b[s..s + 8].copy_from_slice(&self.stamp.build_timestamp.to_le_bytes());
        b[s + 8..s + 40].copy_from_slice(&self.stamp.build_machine);
        b[s + 40..s + 72].copy_from_slice(&self.stamp.source_hash);
        b[s + 72..s + 104].copy_from_slice(&self.stamp.dependency_hash);
        b[s + 104..s + 120].copy_from_slice(&self.stamp.license_id);
        b[s + 120..s + 128].copy_from_slice(&self.stamp.provenance_uri);

        let c = OFF_CAPABILITIES;
        b[c..c + 8].copy_from_slice(&self.caps.capabilities.to_le_bytes());
        b[c + 8..c + 16].copy_from_slice(&self.caps.requirements.to_le_bytes());
        b[c + 16..c + 24].copy_from_slice(&self.caps.extensions.to_le_bytes());
        b[c + 24..c + 28].copy_from_slice(&self.caps.compatibility.to_le_bytes());
        b[c + 28..c + 32].copy_from_slice(&self.caps.protocol_version.to_le_bytes());

        // OFF_RESERVED.. stays zero

        // Self-checksum: Adler-32 with the checksum field zeroed
        let checksum = checksum::adler32(&b);
        b[4..8].copy_from_slice(&checksum.to_le_bytes());

        b
    }

    /// Unpack from exactly [`INDEX_BLOCK_SIZE`] bytes. Rejects wrong-sized
    /// input; does not verify the checksum (see [`verify_checksum`]).
    ///
    /// [`verify_checksum`]: IndexBlock::verify_checksum
    pub fn unpack(data: &[u8]) -> Result<Self> {
        if data.len() != INDEX_BLOCK_SIZE {
            return Err(FlavorError::InvalidMagic(format!(
                "index block must be {INDEX_BLOCK_SIZE} bytes, got {}",
                data.len()
            )));
        }

        let u32_at = |off: usize| -> u32 {
            let mut v = [0u8; 4];
            v.copy_from_slice(&data[off..off + 4]);
            u32::from_le_bytes(v)
        };
        let u64_at = |off: usize| -> u64 {
            let mut v = [0u8; 8];
            v.copy_from_slice(&data[off..off + 8]);
            u64::from_le_bytes(v)
        };

        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&data[64..96]);
        let mut metadata_checksum = [0u8; 32];
        metadata_checksum.copy_from_slice(&data[96..128]);
        let mut integrity_signature = [0u8; 512];
        integrity_signature.copy_from_slice(&data[128..640]);

        let h = OFF_PERF_HINTS;
        let hints = PerformanceHints {
            access_mode: data[h],
            cache_strategy: data[h + 1],
            encryption_type: data[h + 2],
            page_size: u32_at(h + 4),
            max_memory: u64_at(h + 8),
            min_memory: u64_at(h + 16),
            cpu_features: u64_at(h + 24),
            gpu_requirements: u64_at(h + 32),
            numa_hints: u64_at(h + 40),
            stream_chunk_size: u32_at(h + 48),
        };

        let s = OFF_BUILD_STAMP;
        let mut stamp = BuildStamp {
            build_timestamp: u64_at(s),
            ..BuildStamp::default()
        };
        stamp.build_machine.copy_from_slice(&data[s + 8..s + 40]);
        stamp.source_hash.copy_from_slice(&data[s + 40..s + 72]);
        stamp.dependency_hash.copy_from_slice(&data[s + 72..s + 104]);
        stamp.license_id.copy_from_slice(&data[s + 104..s + 120]);
        stamp.provenance_uri.copy_from_slice(&data[s + 120..s + 128]);

        let c = OFF_CAPABILITIES;
        let caps = Capabilities {
            capabilities: u64_at(c),
            requirements: u64_at(c + 8),
            extensions: u64_at(c + 16),
            compatibility: u32_at(c + 24),
            protocol_version: u32_at(c + 28),
        };

        Ok(IndexBlock {
            format_version: u32_at(0),
            index_checksum: u32_at(4),
            package_size: u64_at(8),
            launcher_size: u64_at(16),
            metadata_offset: u64_at(24),
            metadata_size: u64_at(32),
            slot_table_offset: u64_at(40),
            slot_table_size: u64_at(48),
            slot_count: u32_at(56),
            flags: u32_at(60),
            public_key,
            metadata_checksum,
            integrity_signature,
            hints,
            stamp,
            caps,
        })
    }

    /// Verify the Adler-32 self-checksum against the raw block bytes.
    pub fn verify_checksum(&self, raw: &[u8]) -> bool {
        if raw.len() != INDEX_BLOCK_SIZE {
            return false;
        }
        let mut copy = raw.to_vec();
        copy[4..8].copy_from_slice(&[0, 0, 0, 0]);
        checksum::adler32(&copy) == self.index_checksum
    }
}

impl Default for IndexBlock {
    fn default() -> Self {
        Self::new()
    }
}
