//! Kubernetes resource quantity parsing.
//!
//! Handles decimal SI suffixes (`n`, `u`, `m`, `k`, `M`, `G`, `T`, `P`, `E`),
//! binary suffixes (`Ki` through `Ei`) and decimal exponents (`129e6`, `1E-3`).

/// Parse a quantity into its base unit (cores or bytes).
#[must_use]
pub fn parse_quantity(value: &str) -> Option<f64> {
    let value = value.trim();
    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(value.len());
    let (number, suffix) = value.split_at(split);
    if number.is_empty() {
        return None;
    }
    let number: f64 = number.parse().ok()?;

    let multiplier = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" | "K" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024.0 * 1024.0,
        "Gi" => 1024.0 * 1024.0 * 1024.0,
        "Ti" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "Pi" => 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "Ei" => 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => decimal_exponent(suffix)?,
    };
    Some(number * multiplier)
}

/// `e6`, `E-3`, `e+2`. A bare `E` is the exa suffix and never reaches here.
fn decimal_exponent(suffix: &str) -> Option<f64> {
    let exponent: i32 = suffix.strip_prefix(['e', 'E'])?.parse().ok()?;
    Some(10_f64.powi(exponent))
}

/// CPU quantity in millicores (`"2"` is 2000, `"250m"` is 250).
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn cpu_millis(value: &str) -> Option<u64> {
    parse_quantity(value)
        .filter(|v| *v >= 0.0)
        .map(|cores| (cores * 1000.0).round() as u64)
}

/// Memory quantity in bytes (`"1Gi"` is 1073741824).
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn memory_bytes(value: &str) -> Option<u64> {
    parse_quantity(value)
        .filter(|v| *v >= 0.0)
        .map(|bytes| bytes.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_quantities() {
        assert_eq!(cpu_millis("4"), Some(4000));
        assert_eq!(cpu_millis("4000m"), Some(4000));
        assert_eq!(cpu_millis("0.5"), Some(500));
        assert_eq!(cpu_millis("250000000n"), Some(250));
        assert_eq!(cpu_millis("2000u"), Some(2));
    }

    #[test]
    fn test_memory_quantities() {
        assert_eq!(memory_bytes("8Gi"), Some(8 * 1024 * 1024 * 1024));
        assert_eq!(memory_bytes("512Mi"), Some(512 * 1024 * 1024));
        assert_eq!(memory_bytes("16004276Ki"), Some(16_004_276 * 1024));
        assert_eq!(memory_bytes("1G"), Some(1_000_000_000));
        assert_eq!(memory_bytes("128974848"), Some(128_974_848));
    }

    #[test]
    fn test_exponents_and_exa_suffixes() {
        assert_eq!(memory_bytes("129e6"), Some(129_000_000));
        assert_eq!(memory_bytes("1E3"), Some(1000));
        assert_eq!(memory_bytes("5e+2"), Some(500));
        assert_eq!(cpu_millis("1e-3"), Some(1));
        assert_eq!(memory_bytes("2E"), Some(2_000_000_000_000_000_000));
        assert_eq!(memory_bytes("1Ei"), Some(1 << 60));
        assert_eq!(memory_bytes("1e"), None);
        assert_eq!(memory_bytes("1e3Mi"), None);
    }

    #[test]
    fn test_invalid_quantities() {
        assert_eq!(cpu_millis(""), None);
        assert_eq!(cpu_millis("abc"), None);
        assert_eq!(memory_bytes("12Xi"), None);
        assert_eq!(memory_bytes("-1Gi"), None);
    }
}
