//! Bluetooth addressing helpers

use crate::error::BleError;

/// Canonical form of a device address: six hex octets, upper case, `:` separated
///
/// Accepts `-` as separator as well.
pub fn normalize_address(address: &str) -> Result<String, BleError> {
    let trimmed = address.trim();
    let octets: Vec<&str> = trimmed.split([':', '-']).collect();
    let well_formed = octets.len() == 6
        && octets
            .iter()
            .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()));
    if !well_formed {
        return Err(BleError::InvalidAddress(trimmed.to_string()));
    }
    Ok(octets.join(":").to_ascii_uppercase())
}
