//! Unit and format vocabulary: canonical names, quantity classes, and the
//! conversion factor between two units of the same class.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityClass {
    Money,
    Weight,
    Dimension,
    CountryCode,
    Timestamp,
}

impl std::fmt::Display for QuantityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuantityClass::Money => write!(f, "monetary_values"),
            QuantityClass::Weight => write!(f, "weight"),
            QuantityClass::Dimension => write!(f, "dimensions"),
            QuantityClass::CountryCode => write!(f, "country_codes"),
            QuantityClass::Timestamp => write!(f, "timestamps"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleOp {
    Mul,
    Div,
}

impl std::fmt::Display for ScaleOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScaleOp::Mul => write!(f, "*"),
            ScaleOp::Div => write!(f, "/"),
        }
    }
}

/// How a value in one unit becomes a value in another.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conversion {
    pub op: ScaleOp,
    pub factor: f64,
}

impl std::fmt::Display for Conversion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.op, format_factor(self.factor))
    }
}

pub fn format_factor(factor: f64) -> String {
    if (factor - factor.round()).abs() < 1e-9 {
        format!("{}", factor.round() as i64)
    } else {
        format!("{factor:.4}").trim_end_matches('0').to_string()
    }
}

struct UnitDef {
    canonical: &'static str,
    aliases: &'static [&'static str],
    class: QuantityClass,
    /// Size of one unit expressed in the class's base unit.
    base: f64,
}

const UNITS: &[UnitDef] = &[
    UnitDef { canonical: "cents", aliases: &["cent", "minor", "minor_units"], class: QuantityClass::Money, base: 1.0 },
    UnitDef { canonical: "dollars", aliases: &["dollar", "usd", "euros", "euro", "major", "major_units"], class: QuantityClass::Money, base: 100.0 },
    UnitDef { canonical: "milligrams", aliases: &["milligram", "mg"], class: QuantityClass::Weight, base: 0.001 },
    UnitDef { canonical: "grams", aliases: &["gram", "g"], class: QuantityClass::Weight, base: 1.0 },
    UnitDef { canonical: "kilograms", aliases: &["kilogram", "kg", "kgs"], class: QuantityClass::Weight, base: 1000.0 },
    UnitDef { canonical: "pounds", aliases: &["pound", "lb", "lbs"], class: QuantityClass::Weight, base: 453.592_37 },
    UnitDef { canonical: "ounces", aliases: &["ounce", "oz"], class: QuantityClass::Weight, base: 28.349_523_125 },
    UnitDef { canonical: "millimeters", aliases: &["millimeter", "millimetres", "mm"], class: QuantityClass::Dimension, base: 1.0 },
    UnitDef { canonical: "centimeters", aliases: &["centimeter", "centimetres", "cm"], class: QuantityClass::Dimension, base: 10.0 },
    UnitDef { canonical: "meters", aliases: &["meter", "metres", "m"], class: QuantityClass::Dimension, base: 1000.0 },
    UnitDef { canonical: "inches", aliases: &["inch", "in"], class: QuantityClass::Dimension, base: 25.4 },
    UnitDef { canonical: "feet", aliases: &["foot", "ft"], class: QuantityClass::Dimension, base: 304.8 },
];

/// Suffixes accepted when a unit is read off an identifier (`weightKg`,
/// `amount_cents`). Single-letter aliases are too ambiguous for this.
const IDENTIFIER_SUFFIXES: &[&str] = &[
    "cents", "dollars", "grams", "kg", "kgs", "kilograms", "mg", "milligrams", "lbs", "pounds", "oz",
    "ounces", "mm", "cm", "meters", "inches",
];

fn lookup(raw: &str) -> Option<&'static UnitDef> {
    let key = raw.trim().to_ascii_lowercase();
    UNITS
        .iter()
        .find(|u| u.canonical == key || u.aliases.contains(&key.as_str()))
}

/// Canonical spelling of a unit; unknown units are lower-cased as-is.
pub fn canonical_unit(raw: &str) -> String {
    lookup(raw)
        .map(|u| u.canonical.to_string())
        .unwrap_or_else(|| raw.trim().to_ascii_lowercase())
}

pub fn unit_class(raw: &str) -> Option<QuantityClass> {
    lookup(raw).map(|u| u.class)
}

pub fn is_minor_currency(raw: &str) -> bool {
    canonical_unit(raw) == "cents"
}

/// The operation turning a value in `from` into a value in `to`, when both
/// are known units of the same class.
pub fn conversion(from: &str, to: &str) -> Option<Conversion> {
    let (a, b) = (lookup(from)?, lookup(to)?);
    if a.class != b.class || a.canonical == b.canonical {
        return None;
    }
    if b.base > a.base {
        Some(Conversion {
            op: ScaleOp::Div,
            factor: b.base / a.base,
        })
    } else {
        Some(Conversion {
            op: ScaleOp::Mul,
            factor: a.base / b.base,
        })
    }
}

/// Canonical spelling of a format plus its convention class, if it has one.
pub fn canonical_format(raw: &str) -> (String, Option<QuantityClass>) {
    let key = raw.trim().to_ascii_lowercase().replace('-', "_");
    let (canonical, class) = match key.as_str() {
        "date_time" | "datetime" | "iso8601" | "iso_8601" | "rfc3339" | "timestamp" => {
            ("iso8601", Some(QuantityClass::Timestamp))
        }
        "unix" | "unix_seconds" | "epoch" | "epoch_seconds" => ("unix_seconds", Some(QuantityClass::Timestamp)),
        "unix_ms" | "unix_millis" | "unix_milliseconds" | "epoch_millis" => {
            ("unix_millis", Some(QuantityClass::Timestamp))
        }
        "date" | "iso8601_date" => ("date", Some(QuantityClass::Timestamp)),
        "alpha2" | "iso3166_alpha2" | "iso_3166_1_alpha_2" | "alpha_2" => ("alpha2", Some(QuantityClass::CountryCode)),
        "alpha3" | "iso3166_alpha3" | "iso_3166_1_alpha_3" | "alpha_3" => ("alpha3", Some(QuantityClass::CountryCode)),
        other => return (other.to_string(), None),
    };
    (canonical.to_string(), class)
}

/// Convention class of a field from its unit or format.
pub fn field_class(unit: Option<&str>, format: Option<&str>) -> Option<QuantityClass> {
    unit.and_then(unit_class)
        .or_else(|| format.and_then(|f| canonical_format(f).1))
}

/// Split an identifier into lower-case words (`amountInCents` →
/// `[amount, in, cents]`, `weight_kg` → `[weight, kg]`).
pub fn identifier_words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = name.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if c == '_' || c == '-' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        let boundary = c.is_uppercase()
            && i > 0
            && (chars[i - 1].is_lowercase()
                || chars[i - 1].is_ascii_digit()
                || chars.get(i + 1).is_some_and(|n| n.is_lowercase()) && chars[i - 1].is_uppercase());
        if boundary && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Unit implied by an identifier suffix, e.g. `weightKg` → `kilograms`.
pub fn unit_from_identifier(name: &str) -> Option<String> {
    let words = identifier_words(name);
    if words.len() < 2 {
        return None;
    }
    let last = words.last()?;
    if IDENTIFIER_SUFFIXES.contains(&last.as_str()) {
        Some(canonical_unit(last))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_direction_and_factor() {
        let c = conversion("grams", "kg").unwrap();
        assert_eq!(c.op, ScaleOp::Div);
        assert_eq!(format_factor(c.factor), "1000");

        let c = conversion("dollars", "cents").unwrap();
        assert_eq!(c.op, ScaleOp::Mul);
        assert_eq!(c.to_string(), "*100");

        assert!(conversion("grams", "cents").is_none());
        assert!(conversion("grams", "gram").is_none());
    }

    #[test]
    fn test_unit_from_identifier() {
        assert_eq!(unit_from_identifier("weightKg").as_deref(), Some("kilograms"));
        assert_eq!(unit_from_identifier("amount_cents").as_deref(), Some("cents"));
        assert_eq!(unit_from_identifier("priceInCents").as_deref(), Some("cents"));
        assert_eq!(unit_from_identifier("cents"), None);
        assert_eq!(unit_from_identifier("margin"), None);
    }

    #[test]
    fn test_identifier_words_handles_acronyms() {
        assert_eq!(identifier_words("userID"), vec!["user", "id"]);
        assert_eq!(identifier_words("HTTPStatus"), vec!["http", "status"]);
        assert_eq!(identifier_words("order_id"), vec!["order", "id"]);
    }

    #[test]
    fn test_format_families() {
        assert_eq!(canonical_format("date-time").0, "iso8601");
        assert_eq!(canonical_format("RFC3339").0, "iso8601");
        assert_eq!(canonical_format("unix_millis").1, Some(QuantityClass::Timestamp));
        assert_eq!(canonical_format("uuid"), ("uuid".to_string(), None));
        assert_eq!(field_class(Some("cents"), None), Some(QuantityClass::Money));
    }
}
