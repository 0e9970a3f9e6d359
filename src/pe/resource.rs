//! PE resource embedding and lookup for Go launchers on Windows.
//!
//! The payload (everything after the launcher image, trailer included) is
//! stored as an `RT_RCDATA` resource named `PSPF`, language 0x0409. At
//! launch the reader tries the resource first and falls back to reading the
//! file tail, so both polyglot layouts share one code path.

use anyhow::{Result, anyhow};
use std::path::Path;

/// Resource type for raw data.
#[cfg(target_os = "windows")]
const RT_RCDATA: u16 = 10;
/// Resource name carrying the package payload.
#[cfg(target_os = "windows")]
const RESOURCE_NAME: &str = "PSPF";
/// en-US, the language the payload is registered under.
#[cfg(target_os = "windows")]
const LANGUAGE_ID: u16 = 0x0409;

/// Embed the payload as an `RT_RCDATA`/`PSPF` resource in the executable,
/// preserving existing resources.
#[cfg(target_os = "windows")]
#[allow(unsafe_code)] // UpdateResourceW FFI
pub fn embed_payload(exe_path: &Path, payload: &[u8]) -> Result<()> {
    use log::{debug, info};
    use windows::Win32::System::LibraryLoader::{
        BeginUpdateResourceW, EndUpdateResourceW, UpdateResourceW,
    };
    use windows::core::PCWSTR;

    info!(
        "embedding {} payload bytes as RT_RCDATA resource '{RESOURCE_NAME}'",
        payload.len()
    );

    let wide_path: Vec<u16> = exe_path
        .to_str()
        .ok_or_else(|| anyhow!("non-UTF8 path"))?
        .encode_utf16()
        .chain(std::iter::once(0))
        .collect();
    let wide_name: Vec<u16> = RESOURCE_NAME
        .encode_utf16()
        .chain(std::iter::once(0))
        .collect();

    unsafe {
        let handle = BeginUpdateResourceW(PCWSTR(wide_path.as_ptr()), false)
            .map_err(|e| anyhow!("BeginUpdateResourceW failed: {e}"))?;

        let updated = UpdateResourceW(
            handle,
            PCWSTR(RT_RCDATA as usize as *const u16),
            PCWSTR(wide_name.as_ptr()),
            LANGUAGE_ID,
            Some(payload.as_ptr() as *const _),
            payload.len() as u32,
        );

        if let Err(e) = updated {
            let _ = EndUpdateResourceW(handle, true);
            return Err(anyhow!("UpdateResourceW failed: {e}"));
        }

        EndUpdateResourceW(handle, false)
            .map_err(|e| anyhow!("EndUpdateResourceW failed: {e}"))?;
    }

    debug!("resource committed");
    Ok(())
}

#[cfg(not(target_os = "windows"))]
pub fn embed_payload(_exe_path: &Path, _payload: &[u8]) -> Result<()> {
    anyhow::bail!("PE resource embedding requires the Windows resource API")
}

/// Look up the payload resource inside the running executable. Returns
/// `None` when the module carries no `PSPF` resource.
#[cfg(target_os = "windows")]
#[allow(unsafe_code)] // FindResourceW/LoadResource FFI
pub fn find_payload_in_self() -> Option<Vec<u8>> {
    use windows::Win32::System::LibraryLoader::{
        FindResourceW, GetModuleHandleW, LoadResource, LockResource, SizeofResource,
    };
    use windows::core::PCWSTR;

    let wide_name: Vec<u16> = RESOURCE_NAME
        .encode_utf16()
        .chain(std::iter::once(0))
        .collect();

    unsafe {
        let module = GetModuleHandleW(PCWSTR::null()).ok()?;
        let resource = FindResourceW(
            Some(module),
            PCWSTR(wide_name.as_ptr()),
            PCWSTR(RT_RCDATA as usize as *const u16),
        );
        if resource.is_invalid() {
            return None;
        }

        let size = SizeofResource(Some(module), resource) as usize;
        if size == 0 {
            return None;
        }

        let loaded = LoadResource(Some(module), resource).ok()?;
        let ptr = LockResource(loaded) as *const u8;
        if ptr.is_null() {
            return None;
        }

        Some(std::slice::from_raw_parts(ptr, size).to_vec())
    }
}

#[cfg(not(target_os = "windows"))]
pub fn find_payload_in_self() -> Option<Vec<u8>> {
    None
}

/// Convert an assembled package from append layout to resource layout:
/// keep the launcher image byte-identical, move the payload into the
/// resource section, and replace the output file atomically.
pub fn convert_to_resource_layout(output_path: &Path, launcher_size: u64) -> Result<()> {
    use std::fs;

    let file_data = fs::read(output_path)?;
    if (file_data.len() as u64) <= launcher_size {
        anyhow::bail!("no payload found after launcher image");
    }

    let (launcher, payload) = file_data.split_at(launcher_size as usize);

    // Stage the launcher in the destination directory so the final rename
    // stays on one filesystem
    let parent = output_path.parent().unwrap_or_else(|| Path::new("."));
    let staged = tempfile::NamedTempFile::new_in(parent)?;
    fs::write(staged.path(), launcher)?;

    embed_payload(staged.path(), payload)?;

    staged
        .persist(output_path)
        .map_err(|e| anyhow!("failed to replace output: {e}"))?;
    Ok(())
}
