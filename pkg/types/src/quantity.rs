use anyhow::{Result, anyhow, bail};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Add;
use std::str::FromStr;

const DECIMAL_SUFFIXES: &[(&str, i128)] = &[
    ("E", 1_000_000_000_000_000_000),
    ("P", 1_000_000_000_000_000),
    ("T", 1_000_000_000_000),
    ("G", 1_000_000_000),
    ("M", 1_000_000),
    ("k", 1_000),
];

const BINARY_SUFFIXES: &[(&str, i128)] = &[
    ("Ei", 1 << 60),
    ("Pi", 1 << 50),
    ("Ti", 1 << 40),
    ("Gi", 1 << 30),
    ("Mi", 1 << 20),
    ("Ki", 1 << 10),
];

/// Suffix family a quantity was written in. Used to render it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum QuantityFormat {
    #[default]
    DecimalSI,
    BinarySI,
}

/// Kubernetes-style resource quantity (`3`, `500m`, `2k`, `1Gi`).
///
/// Stored exactly in milli-units. Equality and ordering compare the value
/// only, so `1Ki == 1024`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Quantity {
    millis: i128,
    format: QuantityFormat,
}

impl Quantity {
    /// Whole units, e.g. `Quantity::from_units(3)` is `"3"`.
    pub fn from_units(units: i64) -> Self {
        Self {
            millis: units as i128 * 1000,
            format: QuantityFormat::DecimalSI,
        }
    }

    pub fn from_millis(millis: i128) -> Self {
        Self {
            millis,
            format: QuantityFormat::DecimalSI,
        }
    }

    pub fn millis(&self) -> i128 {
        self.millis
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.millis == other.millis
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.millis.cmp(&other.millis)
    }
}

impl Hash for Quantity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.millis.hash(state);
    }
}

impl Add for Quantity {
    type Output = Quantity;

    /// Saturates instead of overflowing; quotas never get near `i128` range.
    fn add(self, rhs: Quantity) -> Quantity {
        Quantity {
            millis: self.millis.saturating_add(rhs.millis),
            format: self.format,
        }
    }
}

impl FromStr for Quantity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let input = s.trim();
        if input.is_empty() {
            bail!("quantity must not be empty");
        }

        let split = input
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
            .unwrap_or(input.len());
        let (number, suffix) = input.split_at(split);

        let (negative, digits) = match number.as_bytes().first() {
            Some(b'-') => (true, &number[1..]),
            Some(b'+') => (false, &number[1..]),
            _ => (false, number),
        };
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            bail!("quantity '{}' has no numeric part", s);
        }
        if !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            bail!("quantity '{}' is not a valid number", s);
        }

        // Scale to milli-units as a ratio, so negative exponents stay exact.
        let (multiplier, divisor, format) = parse_suffix(suffix)
            .ok_or_else(|| anyhow!("quantity '{}' has unknown suffix '{}'", s, suffix))?;

        let overflow = || anyhow!("quantity '{}' is too large", s);
        let mantissa: i128 = format!("{}{}", int_part, frac_part)
            .parse()
            .map_err(|_| overflow())?;
        let scale = 10i128
            .checked_pow(frac_part.len() as u32)
            .and_then(|scale| scale.checked_mul(divisor))
            .ok_or_else(overflow)?;
        let scaled = mantissa.checked_mul(multiplier).ok_or_else(overflow)?;
        // Precision finer than one milli-unit rounds up.
        let mut millis = scaled / scale;
        if scaled % scale != 0 {
            millis += 1;
        }

        Ok(Quantity {
            millis: if negative { -millis } else { millis },
            format,
        })
    }
}

/// Largest decimal exponent accepted in `<n>e<exp>` form.
const MAX_EXPONENT: u32 = 30;

/// `(multiplier, divisor, format)` turning the written number into milli-units.
fn parse_suffix(suffix: &str) -> Option<(i128, i128, QuantityFormat)> {
    match suffix {
        "" => Some((1000, 1, QuantityFormat::DecimalSI)),
        "m" => Some((1, 1, QuantityFormat::DecimalSI)),
        _ => DECIMAL_SUFFIXES
            .iter()
            .find(|(name, _)| *name == suffix)
            .map(|(_, m)| (m * 1000, 1, QuantityFormat::DecimalSI))
            .or_else(|| {
                BINARY_SUFFIXES
                    .iter()
                    .find(|(name, _)| *name == suffix)
                    .map(|(_, m)| (m * 1000, 1, QuantityFormat::BinarySI))
            })
            .or_else(|| parse_exponent(suffix)),
    }
}

/// Decimal exponent suffix such as `e3` or `E-2`. Rendered back in SI form.
fn parse_exponent(suffix: &str) -> Option<(i128, i128, QuantityFormat)> {
    let exp = suffix.strip_prefix(['e', 'E'])?;
    let digits = exp.strip_prefix(['+', '-']).unwrap_or(exp);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let exp: i32 = exp.parse().ok()?;
    if exp.unsigned_abs() > MAX_EXPONENT {
        return None;
    }
    // Milli-units add three to the exponent.
    let shifted = exp + 3;
    let power = 10i128.pow(shifted.unsigned_abs());
    Some(if shifted >= 0 {
        (power, 1, QuantityFormat::DecimalSI)
    } else {
        (1, power, QuantityFormat::DecimalSI)
    })
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.millis % 1000 != 0 {
            return write!(f, "{}m", self.millis);
        }
        let units = self.millis / 1000;
        if units == 0 {
            return write!(f, "0");
        }
        let suffixes = match self.format {
            QuantityFormat::DecimalSI => DECIMAL_SUFFIXES,
            QuantityFormat::BinarySI => BINARY_SUFFIXES,
        };
        for (name, multiplier) in suffixes {
            if units % multiplier == 0 {
                return write!(f, "{}{}", units / multiplier, name);
            }
        }
        write!(f, "{}", units)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct QuantityVisitor;

        impl Visitor<'_> for QuantityVisitor {
            type Value = Quantity;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a resource quantity such as 3, 500m or 1Gi")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Quantity, E> {
                v.parse().map_err(|e: anyhow::Error| E::custom(e))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Quantity, E> {
                Ok(Quantity::from_units(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Quantity, E> {
                Ok(Quantity::from_millis(v as i128 * 1000))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Quantity, E> {
                self.visit_str(&v.to_string())
            }
        }

        deserializer.deserialize_any(QuantityVisitor)
    }
}
