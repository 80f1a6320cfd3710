use crate::{OrchestratorError, Result};

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Trim and lower-case an account address, rejecting anything that is not a
/// `0x`-prefixed 40-hex-digit value or is the zero address.
///
/// Every cache key, lock and job id is built from the returned form.
pub fn normalize_address(raw: &str) -> Result<String> {
    let address = raw.trim().to_ascii_lowercase();

    let Some(hex) = address.strip_prefix("0x") else {
        return Err(OrchestratorError::InvalidAddress(raw.trim().to_string()));
    };

    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(OrchestratorError::InvalidAddress(raw.trim().to_string()));
    }

    if address == ZERO_ADDRESS {
        return Err(OrchestratorError::InvalidAddress(
            "the zero address cannot be analyzed".to_string(),
        ));
    }

    Ok(address)
}
