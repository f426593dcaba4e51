//! Validation for stream names
//!
//! Stream names are stored in a fixed 63-byte slot of the file table, so
//! they are checked up front by every operation that takes a name.

use crate::error::{Result, VmgsError};

/// Longest name that fits a file table slot
pub const MAX_NAME_LEN: usize = 63;

/// Well-known stream names used by VM firmware and the host
pub mod well_known {
    pub const BIOS_NVRAM: &str = "bios_nvram";
    pub const TPM_PPI: &str = "tpm_ppi";
    pub const TPM_NVRAM: &str = "tpm_nvram";
    pub const RTC_SKEW: &str = "rtc_skew";
    pub const ATTEST: &str = "attest";
    pub const KEY_PROTECTOR: &str = "key_protector";
    pub const VM_UNIQUE_ID: &str = "vm_unique_id";
    pub const GUEST_FIRMWARE: &str = "guest_firmware";
    pub const CUSTOM_UEFI: &str = "custom_uefi";
    pub const GUEST_WATCHDOG: &str = "guest_watchdog";
    pub const HW_KEY_PROTECTOR: &str = "hw_key_protector";
    pub const GUEST_SECRET_KEY: &str = "guest_secret_key";

    /// Every well-known name, in file-id order
    pub const ALL: [&str; 12] = [
        BIOS_NVRAM,
        TPM_PPI,
        TPM_NVRAM,
        RTC_SKEW,
        ATTEST,
        KEY_PROTECTOR,
        VM_UNIQUE_ID,
        GUEST_FIRMWARE,
        CUSTOM_UEFI,
        GUEST_WATCHDOG,
        HW_KEY_PROTECTOR,
        GUEST_SECRET_KEY,
    ];
}

/// Validate a stream name
///
/// # Rules
/// - 1 to 63 bytes of UTF-8
/// - No NUL characters (slots are zero-padded)
///
/// # Examples
///
/// ```
/// use vmgs_rs::core::validation::validate_stream_name;
///
/// assert!(validate_stream_name("tpm_nvram").is_ok());
/// assert!(validate_stream_name("").is_err());
/// assert!(validate_stream_name("bad\0name").is_err());
/// ```
pub fn validate_stream_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(VmgsError::InvalidStreamName(
            "name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_NAME_LEN {
        return Err(VmgsError::InvalidStreamName(format!(
            "name is {} bytes (max {})",
            name.len(),
            MAX_NAME_LEN
        )));
    }

    if name.contains('\0') {
        return Err(VmgsError::InvalidStreamName(format!(
            "name {:?} contains a NUL character",
            name
        )));
    }

    Ok(())
}
