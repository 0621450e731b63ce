// Exact fixed-point decimals carried as scaled i128 values

/// Largest precision a Decimal128 column can hold
pub const MAX_PRECISION: u8 = 38;

const MAX_UNSCALED: u128 = 10_u128.pow(MAX_PRECISION as u32);

/// Render `value / 10^scale` without going through floating point
pub fn format_scaled(value: i128, scale: u8) -> String {
    let sign = if value < 0 { "-" } else { "" };
    let magnitude = value.unsigned_abs();
    if scale == 0 {
        return format!("{}{}", sign, magnitude);
    }

    let divisor = 10_u128.pow(u32::from(scale));
    format!(
        "{}{}.{:0width$}",
        sign,
        magnitude / divisor,
        magnitude % divisor,
        width = scale as usize
    )
}

/// Parse decimal text into an unscaled value at `scale`.
///
/// Returns `None` when the text is not a plain decimal, when it carries
/// significant digits beyond `scale`, or when it exceeds 38 digits.
pub fn parse_scaled(text: &str, scale: u8) -> Option<i128> {
    if scale > MAX_PRECISION {
        return None;
    }
    let trimmed = text.trim();
    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let (integer, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    if integer.is_empty() && fraction.is_empty() {
        return None;
    }
    if !integer.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let scale = scale as usize;
    let (kept, dropped) = fraction.split_at(fraction.len().min(scale));
    if dropped.bytes().any(|b| b != b'0') {
        return None;
    }

    let mut magnitude: u128 = 0;
    let padding = std::iter::repeat(b'0').take(scale - kept.len());
    for digit in integer.bytes().chain(kept.bytes()).chain(padding) {
        magnitude = magnitude
            .checked_mul(10)?
            .checked_add(u128::from(digit - b'0'))?;
    }
    if magnitude >= MAX_UNSCALED {
        return None;
    }

    let value = i128::try_from(magnitude).ok()?;
    Some(if negative { -value } else { value })
}
