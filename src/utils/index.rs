use std::time::Duration;

/// Strip an optional `0x` prefix from a hex string
pub fn strip_hex_prefix(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

/// Decode a hex string with or without `0x` prefix
pub fn decode_hex(value: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(strip_hex_prefix(value))
}

/// Format a delay as seconds with millisecond precision
pub fn format_delay(delay: Duration) -> String {
    format!("{:.3}s", delay.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_hex_prefix_optional() {
        assert_eq!(decode_hex("0x0a0b").unwrap(), vec![10, 11]);
        assert_eq!(decode_hex("0a0b").unwrap(), vec![10, 11]);
        assert!(decode_hex("0x").unwrap().is_empty());
    }

    #[test]
    fn test_format_delay() {
        assert_eq!(format_delay(Duration::from_millis(1500)), "1.500s");
    }
}
