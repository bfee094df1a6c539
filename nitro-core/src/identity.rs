//! Hardware identity gate
//!
//! The daemons write raw EC registers and cpufreq attributes with no kernel
//! abstraction validating them, so they must never run on a machine the
//! register map was not written for. The identity source is the DMI product
//! name, read exactly once at startup and matched against the compiled-in
//! allowlist. A mismatch is fatal and unrecoverable.

use crate::model::{match_model, HardwareModel, SUPPORTED_NAMES};
use nitro_error::{NitroError, Result};
use std::fs;
use std::path::PathBuf;

/// DMI path for hardware identification
pub const DMI_PRODUCT_NAME: &str = "/sys/class/dmi/id/product_name";

/// Read the machine identity string from DMI
pub fn read_product_name() -> Result<String> {
    let raw = fs::read_to_string(DMI_PRODUCT_NAME).map_err(|source| NitroError::FileRead {
        path: PathBuf::from(DMI_PRODUCT_NAME),
        source,
    })?;
    Ok(raw.trim().to_string())
}

/// Read the identity source once and gate on the allowlist
///
/// Returns the matched model descriptor, or [`NitroError::HardwareMismatch`]
/// carrying the detected value for the startup diagnostic.
pub fn verify() -> Result<&'static HardwareModel> {
    let detected = read_product_name()?;
    match_model(&detected).ok_or(NitroError::HardwareMismatch {
        detected,
        supported: SUPPORTED_NAMES,
    })
}
