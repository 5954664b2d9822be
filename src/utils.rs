use alloy_primitives::U256;

/// Decodes a numeric field as the node reports it.
///
/// Strings containing an `x` are read as hex after the two-character `0x`
/// prefix, everything else as a signed decimal. Absent, empty or malformed
/// input decodes to zero; so do negative decimals and values wider than
/// 256 bits, since on-chain quantities are unsigned.
#[must_use]
pub fn decode_quantity(raw: Option<&str>) -> U256 {
    let Some(raw) = raw.filter(|s| !s.is_empty()) else {
        return U256::ZERO;
    };

    if raw.contains('x') {
        return raw
            .get(2..)
            .filter(|digits| digits.bytes().all(|b| b.is_ascii_hexdigit()))
            .and_then(|digits| U256::from_str_radix(digits, 16).ok())
            .unwrap_or(U256::ZERO);
    }

    let digits = raw.strip_prefix('+').unwrap_or(raw);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return U256::ZERO;
    }
    U256::from_str_radix(digits, 10).unwrap_or(U256::ZERO)
}

/// Decodes a quantity that must fit a signed 64-bit column, saturating at `i64::MAX`.
#[must_use]
pub fn decode_i64(raw: Option<&str>) -> i64 {
    i64::try_from(decode_quantity(raw)).unwrap_or(i64::MAX)
}
