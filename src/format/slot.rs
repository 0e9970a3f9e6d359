//! The 64-byte slot descriptor and its field codes.

use super::SLOT_DESCRIPTOR_SIZE;
use crate::format::checksum::sha256_prefix64;

/// Role of a slot's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Purpose {
    #[default]
    Data = 0,
    Code = 1,
    Config = 2,
    Media = 3,
}

impl Purpose {
    pub fn from_name(name: &str) -> Self {
        match name {
            "code" => Purpose::Code,
            "config" => Purpose::Config,
            "media" => Purpose::Media,
            _ => Purpose::Data,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Purpose::Code,
            2 => Purpose::Config,
            3 => Purpose::Media,
            _ => Purpose::Data,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Purpose::Data => "data",
            Purpose::Code => "code",
            Purpose::Config => "config",
            Purpose::Media => "media",
        }
    }
}

/// Cache-management lifecycle of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Lifecycle {
    /// First run only, removed after initialization
    Init = 0,
    /// Extracted at every startup
    Startup = 1,
    /// Available during application execution (default)
    #[default]
    Runtime = 2,
    /// Executed during cleanup
    Shutdown = 3,
    /// Kept for performance, regenerable
    Cache = 4,
    /// Removed when the session ends
    Temporary = 5,
    /// Extracted on demand
    Lazy = 6,
    /// Extracted immediately on startup
    Eager = 7,
    /// Development builds only
    Dev = 8,
    /// User-modifiable configuration
    Config = 9,
    /// Platform-specific content
    Platform = 10,
}

impl Lifecycle {
    pub fn from_name(name: &str) -> Self {
        match name {
            "init" => Lifecycle::Init,
            "startup" => Lifecycle::Startup,
            "shutdown" => Lifecycle::Shutdown,
            "cache" => Lifecycle::Cache,
            "temporary" | "temp" => Lifecycle::Temporary,
            "lazy" => Lifecycle::Lazy,
            "eager" => Lifecycle::Eager,
            "dev" => Lifecycle::Dev,
            "config" => Lifecycle::Config,
            "platform" => Lifecycle::Platform,
            _ => Lifecycle::Runtime,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Lifecycle::Init,
            1 => Lifecycle::Startup,
            3 => Lifecycle::Shutdown,
            4 => Lifecycle::Cache,
            5 => Lifecycle::Temporary,
            6 => Lifecycle::Lazy,
            7 => Lifecycle::Eager,
            8 => Lifecycle::Dev,
            9 => Lifecycle::Config,
            10 => Lifecycle::Platform,
            _ => Lifecycle::Runtime,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Lifecycle::Init => "init",
            Lifecycle::Startup => "startup",
            Lifecycle::Runtime => "runtime",
            Lifecycle::Shutdown => "shutdown",
            Lifecycle::Cache => "cache",
            Lifecycle::Temporary => "temporary",
            Lifecycle::Lazy => "lazy",
            Lifecycle::Eager => "eager",
            Lifecycle::Dev => "dev",
            Lifecycle::Config => "config",
            Lifecycle::Platform => "platform",
        }
    }
}

/// Platform restriction of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SlotPlatform {
    #[default]
    Any = 0,
    Linux = 1,
    Macos = 2,
    Windows = 3,
}

impl SlotPlatform {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => SlotPlatform::Linux,
            2 => SlotPlatform::Macos,
            3 => SlotPlatform::Windows,
            _ => SlotPlatform::Any,
        }
    }
}

/// Default priority for slots that do not declare one.
pub const DEFAULT_PRIORITY: u8 = 128;

/// Default POSIX mode for extracted files.
pub const DEFAULT_FILE_MODE: u16 = 0o644;

/// A packed 64-byte slot table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotDescriptor {
    /// Slot index, unique within the package
    pub id: u64,
    /// First 8 bytes of SHA-256 of the target path, little-endian
    pub name_hash: u64,
    /// Absolute file offset of the stored bytes; 0 for self-referential slots
    pub offset: u64,
    /// Stored (post-operations) byte count
    pub size: u64,
    /// Pre-operations byte count
    pub original_size: u64,
    /// Packed operation chain
    pub operations: u64,
    /// First 8 bytes of SHA-256 of the stored bytes, little-endian
    pub checksum: u64,
    pub purpose: u8,
    pub lifecycle: u8,
    pub priority: u8,
    pub platform: u8,
    /// 16-bit POSIX mode
    pub permissions: u16,
}

impl SlotDescriptor {
    pub fn new(id: u64) -> Self {
        SlotDescriptor {
            id,
            name_hash: 0,
            offset: 0,
            size: 0,
            original_size: 0,
            operations: 0,
            checksum: 0,
            purpose: Purpose::Data as u8,
            lifecycle: Lifecycle::Runtime as u8,
            priority: DEFAULT_PRIORITY,
            platform: SlotPlatform::Any as u8,
            permissions: DEFAULT_FILE_MODE,
        }
    }

    /// Hash a target path into the descriptor name-hash form.
    pub fn hash_name(name: &str) -> u64 {
        sha256_prefix64(name.as_bytes())
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name_hash = Self::hash_name(name);
        self
    }

    /// True when the descriptor marks a self-referential or empty slot.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn pack(&self) -> [u8; SLOT_DESCRIPTOR_SIZE] {
        let mut b = [0u8; SLOT_DESCRIPTOR_SIZE];

        b[0..8].copy_from_slice(&self.id.to_le_bytes());
        b[8..16].copy_from_slice(&self.name_hash.to_le_bytes());
        b[16..24].copy_from_slice(&self.offset.to_le_bytes());
        b[24..32].copy_from_slice(&self.size.to_le_bytes());
        b[32..40].copy_from_slice(&self.original_size.to_le_bytes());
        b[40..48].copy_from_slice(&self.operations.to_le_bytes());
        b[48..56].copy_from_slice(&self.checksum.to_le_bytes());
        b[56] = self.purpose;
        b[57] = self.lifecycle;
        b[58] = self.priority;
        b[59] = self.platform;
        // b[60..62] reserved, must be zero
        b[62..64].copy_from_slice(&self.permissions.to_le_bytes());

        b
    }

    pub fn unpack(data: &[u8]) -> Option<Self> {
        if data.len() != SLOT_DESCRIPTOR_SIZE {
            return None;
        }

        let u64_at = |off: usize| -> u64 {
            let mut v = [0u8; 8];
            v.copy_from_slice(&data[off..off + 8]);
            u64::from_le_bytes(v)
        };

        Some(SlotDescriptor {
            id: u64_at(0),
            name_hash: u64_at(8),
            offset: u64_at(16),
            size: u64_at(24),
            original_size: u64_at(32),
            operations: u64_at(40),
            checksum: u64_at(48),
            purpose: data[56],
            lifecycle: data[57],
            priority: data[58],
            platform: data[59],
            permissions: u16::from_le_bytes([data[62], data[63]]),
        })
    }
}
