/// Collapse a raw header or field name into its canonical lookup form:
/// BOM/zero-width markers and surrounding quotes dropped, whitespace and
/// separator runs collapsed to single underscores, lowercased.
pub(crate) fn normalize_key(value: &str) -> String {
    let cleaned = strip_noise(value);
    cleaned
        .split(|c: char| c.is_whitespace() || c == '_' || c == '-' || c == '.')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
        .to_ascii_lowercase()
}

/// Clean a raw cell value without changing its case: encoding artifacts and
/// wrapping quotes go, interior content stays as-entered.
pub(crate) fn clean_value(value: &str) -> String {
    strip_noise(value)
}

fn strip_noise(value: &str) -> String {
    let cleaned = value.replace(['\u{feff}', '\u{200b}'], "");
    let trimmed = cleaned.trim();
    strip_quotes(trimmed).trim().to_string()
}

fn strip_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_key_strips_bom_quotes_and_case() {
        assert_eq!(normalize_key("\u{feff}user_id"), "user_id");
        assert_eq!(normalize_key("  Customer_ID "), "customer_id");
        assert_eq!(normalize_key("\" user id \""), "user_id");
        assert_eq!(normalize_key("Last-Login Days.Ago"), "last_login_days_ago");
    }

    #[test]
    fn clean_value_preserves_interior_case() {
        assert_eq!(clean_value("  \"Enterprise\"  "), "Enterprise");
        assert_eq!(clean_value("\u{feff}free"), "free");
        assert_eq!(clean_value("''"), "");
    }
}
