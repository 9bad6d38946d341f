// src/models/ioc_utils.rs

use crate::models::IocType;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Normalize an IOC value based on its type
pub fn normalize_ioc(value: &str, ioc_type: IocType) -> String {
    let trimmed = value.trim();

    match ioc_type {
        IocType::Domain => trimmed.trim_end_matches('.').to_lowercase(),
        IocType::Md5 | IocType::Sha256 => trimmed.to_lowercase(),
        // Single-host CIDR notation is the address itself
        IocType::Ipv4 => trimmed.strip_suffix("/32").unwrap_or(trimmed).to_string(),
        IocType::Ipv6 => {
            let host = trimmed.strip_suffix("/128").unwrap_or(trimmed);
            host.parse::<Ipv6Addr>()
                .map(|ip| ip.to_string())
                .unwrap_or_else(|_| host.to_lowercase())
        }
    }
}

/// Check that an already-normalized value has the syntax its type requires
pub fn is_valid_ioc(value: &str, ioc_type: IocType) -> bool {
    if value.is_empty() {
        return false;
    }

    match ioc_type {
        IocType::Ipv4 => value.parse::<Ipv4Addr>().is_ok(),
        IocType::Ipv6 => value.parse::<Ipv6Addr>().is_ok(),
        IocType::Md5 => is_hex_of_len(value, 32),
        IocType::Sha256 => is_hex_of_len(value, 64),
        IocType::Domain => is_domain(value),
    }
}

fn is_hex_of_len(value: &str, len: usize) -> bool {
    value.len() == len && value.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_domain(value: &str) -> bool {
    if value.len() > 253 || !value.contains('.') {
        return false;
    }
    // A bare address is not a domain
    if value.parse::<Ipv4Addr>().is_ok() {
        return false;
    }

    value.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    })
}
