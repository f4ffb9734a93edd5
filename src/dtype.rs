/// The kinds of field content recognized by the classifier, ordered as a
/// lattice: `Null < Text < Integer < Float`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DataType {
    Null,
    Text,
    Integer,
    Float,
}

/// A classified field along with its parsed magnitude, when numeric.
///
/// Digits-only input whose magnitude exceeds `i64` comes back as
/// [`Value::Float`], so integer-width retrieval on such a field fails with
/// an overflow instead of silently truncating.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Null,
    Text,
    Integer(i64),
    Float(f64),
}

impl Value {
    #[inline]
    pub fn dtype(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Text => DataType::Text,
            Value::Integer(_) => DataType::Integer,
            Value::Float(_) => DataType::Float,
        }
    }
}

/// Classify a field's bytes without keeping the parsed magnitude.
#[inline]
pub fn classify(cell: &[u8]) -> DataType {
    parse_value(cell).dtype()
}

/// Classify a field's bytes in a single left-to-right pass, parsing the
/// numeric magnitude along the way.
///
/// Rules:
/// - empty input or whitespace only is null;
/// - at most one minus, before any digit or decimal point;
/// - spaces are tolerated as leading padding, between the sign and the
///   first digit, and as trailing padding; a digit after trailing padding
///   makes the whole field text (e.g. `510 456`);
/// - one decimal point makes the value a float, a second makes it text;
/// - any other byte makes it text.
pub fn parse_value(cell: &[u8]) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }

    let mut ws_allowed = true;
    let mut neg_allowed = true;
    let mut dot_allowed = true;
    let mut digit_allowed = true;
    let mut has_digit = false;
    let mut is_float = false;
    let mut negative = false;
    let mut prev_digit = false;

    let mut int_value: i64 = 0;
    let mut int_overflow = false;
    let mut magnitude: f64 = 0.0;
    let mut scale: f64 = 1.0;

    for &byte in cell {
        match byte {
            b' ' => {
                if !ws_allowed {
                    if prev_digit {
                        // Trailing padding: no more digits after this.
                        digit_allowed = false;
                        ws_allowed = true;
                    } else {
                        return Value::Text;
                    }
                }
            }
            b'-' => {
                if has_digit || is_float || !neg_allowed {
                    // Ex: '510-123-4567'
                    return Value::Text;
                }
                neg_allowed = false;
                negative = true;
            }
            b'.' => {
                if !dot_allowed {
                    // Ex: '999.999.9999'
                    return Value::Text;
                }
                dot_allowed = false;
                is_float = true;
            }
            b'0'..=b'9' => {
                if !digit_allowed {
                    // Ex: '510 456'
                    return Value::Text;
                }
                ws_allowed = false;
                has_digit = true;

                let digit = i64::from(byte - b'0');
                if is_float {
                    scale /= 10.0;
                    magnitude += digit as f64 * scale;
                } else {
                    magnitude = magnitude * 10.0 + digit as f64;
                    if !int_overflow {
                        match int_value.checked_mul(10).and_then(|v| v.checked_add(digit)) {
                            Some(v) => int_value = v,
                            None => int_overflow = true,
                        }
                    }
                }
            }
            _ => return Value::Text,
        }

        prev_digit = byte.is_ascii_digit();
    }

    if !has_digit {
        // Whitespace and/or a lone sign.
        return Value::Null;
    }

    if negative {
        magnitude = -magnitude;
    }

    if is_float || int_overflow {
        Value::Float(magnitude)
    } else {
        Value::Integer(if negative { -int_value } else { int_value })
    }
}
