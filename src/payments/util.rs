//! Conversions between minor units and the decimal strings providers exchange.

/// Format cents as a two-decimal amount, e.g. `10000` -> `"100.00"`.
pub fn format_amount(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Parse a decimal amount string into cents without going through floats.
///
/// Accepts `"100"`, `"100.5"` and `"100.50"`; rejects more than two decimals.
pub fn parse_amount_cents(s: &str) -> Option<i64> {
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (whole, frac) = match digits.split_once('.') {
        Some((w, f)) => (w, f),
        None => (digits, ""),
    };
    if whole.is_empty() || frac.len() > 2 {
        return None;
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let whole: i64 = whole.parse().ok()?;
    let frac: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        _ => frac.parse().ok()?,
    };
    let cents = whole.checked_mul(100)?.checked_add(frac)?;
    Some(if negative { -cents } else { cents })
}

/// Cents from a JSON amount that may be either a number or a decimal string.
pub(crate) fn json_amount_cents(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::String(s) => parse_amount_cents(s),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.checked_mul(100)
            } else {
                n.as_f64().map(|f| (f * 100.0).round() as i64)
            }
        }
        _ => None,
    }
}
