//! MAC address normalization and validation (spec.md §3: "canonical form:
//! six lowercase hex octets, colon-separated"). Grounded 1:1 on
//! `examples/original_source/src/api/routes/boot.py`'s `normalize_mac`/
//! `validate_mac`.

/// Normalize a MAC address to six lowercase hex octets, colon-separated.
/// Accepts hyphen- or colon-separated input (the two separators may even be
/// mixed across positions), case-insensitively. A separator is required
/// between every octet pair, matching the original's
/// `^([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})$` — a bare 12-hex-digit string
/// with no separators is rejected.
///
/// Returns `None` if `raw` cannot be parsed as a MAC address.
#[must_use]
pub fn normalize_mac(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    if bytes.len() != 17 {
        return None;
    }

    let mut octets = Vec::with_capacity(6);
    for i in 0..6 {
        let start = i * 3;
        let hex = &bytes[start..start + 2];
        if !hex.iter().all(u8::is_ascii_hexdigit) {
            return None;
        }
        if i < 5 && !matches!(bytes[start + 2], b':' | b'-') {
            return None;
        }
        octets.push(std::str::from_utf8(hex).ok()?.to_ascii_lowercase());
    }

    Some(octets.join(":"))
}

/// True if `mac` is already in canonical form.
#[must_use]
pub fn validate_mac(mac: &str) -> bool {
    normalize_mac(mac).as_deref() == Some(mac)
}
