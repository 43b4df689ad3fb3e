use std::fmt;

use num_bigint::BigInt;
use rust_decimal::Decimal;

/// Significant-digit bound for decimals accepted by the codec.
pub const MAX_DECIMAL_DIGITS: usize = 28;

/// The eight self-describing value kinds carried on the wire.
///
/// The discriminants are the wire tag bytes and are frozen: reordering or
/// renumbering them changes every persisted state row and payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueKind {
    Int = 1,
    Str = 2,
    Bytes = 3,
    Decimal = 4,
    Map = 5,
    List = 6,
    Tuple = 7,
    Bool = 8,
}

impl ValueKind {
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => Self::Int,
            2 => Self::Str,
            3 => Self::Bytes,
            4 => Self::Decimal,
            5 => Self::Map,
            6 => Self::List,
            7 => Self::Tuple,
            8 => Self::Bool,
            _ => return None,
        })
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Str => "str",
            Self::Bytes => "bytes",
            Self::Decimal => "decimal",
            Self::Map => "map",
            Self::List => "list",
            Self::Tuple => "tuple",
            Self::Bool => "bool",
        }
    }

    /// Parses a declared parameter kind as written in contract source.
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "int" => Self::Int,
            "str" => Self::Str,
            "bytes" => Self::Bytes,
            "decimal" => Self::Decimal,
            "map" => Self::Map,
            "list" => Self::List,
            "tuple" => Self::Tuple,
            "bool" => Self::Bool,
            _ => return None,
        })
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A tagged, recursively composable value: the only data shape contract
/// state, call arguments, and event fields may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(BigInt),
    Str(String),
    Bytes(Vec<u8>),
    Decimal(Decimal),
    Map(ValueMap),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Bool(bool),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Int(_) => ValueKind::Int,
            Self::Str(_) => ValueKind::Str,
            Self::Bytes(_) => ValueKind::Bytes,
            Self::Decimal(_) => ValueKind::Decimal,
            Self::Map(_) => ValueKind::Map,
            Self::List(_) => ValueKind::List,
            Self::Tuple(_) => ValueKind::Tuple,
            Self::Bool(_) => ValueKind::Bool,
        }
    }

    pub fn int(v: i64) -> Self {
        Self::Int(BigInt::from(v))
    }

    pub fn str(v: impl Into<String>) -> Self {
        Self::Str(v.into())
    }

    pub fn empty_map() -> Self {
        Self::Map(ValueMap::new())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<&BigInt> {
        match self {
            Self::Int(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(BigInt::from(v))
    }
}

impl From<BigInt> for Value {
    fn from(v: BigInt) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

/// Mapping from [`Value`] to [`Value`] preserving insertion order.
///
/// Updates to an existing key replace the value in place; iteration always
/// yields entries in first-insertion order, which is the order the codec
/// fixes on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueMap {
    entries: Vec<(Value, Value)>,
}

impl ValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.get(key).is_some()
    }

    pub fn insert(&mut self, key: Value, value: Value) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Value> {
        self.entries.iter_mut().map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &Value) -> Option<&mut Value> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

impl FromIterator<(Value, Value)> for ValueMap {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl IntoIterator for ValueMap {
    type Item = (Value, Value);
    type IntoIter = std::vec::IntoIter<(Value, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Canonical decimal rendering used by the codec: trailing zeroes are
/// stripped, and integral values keep a single zero fractional digit so
/// that `5`, `5.0`, and `5.00` all encode identically.
pub fn canonical_decimal_string(d: &Decimal) -> String {
    let n = d.normalize();
    if n.scale() == 0 {
        format!("{n}.0")
    } else {
        n.to_string()
    }
}

/// Number of significant digits in the normalized mantissa of `d`.
pub fn decimal_significant_digits(d: &Decimal) -> usize {
    let mantissa = d.normalize().mantissa().unsigned_abs();
    if mantissa == 0 {
        1
    } else {
        mantissa.to_string().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn map_preserves_insertion_order() {
        let mut map = ValueMap::new();
        map.insert(Value::str("b"), Value::int(1));
        map.insert(Value::str("a"), Value::int(2));
        map.insert(Value::str("b"), Value::int(3));

        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec![Value::str("b"), Value::str("a")]);
        assert_eq!(map.get(&Value::str("b")), Some(&Value::int(3)));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn canonical_decimal_forms() {
        let cases = [
            ("1.500", "1.5"),
            ("5.00", "5.0"),
            ("5", "5.0"),
            ("0", "0.0"),
            ("-2.250", "-2.25"),
            ("0.001", "0.001"),
        ];
        for (input, expected) in cases {
            let d = Decimal::from_str(input).unwrap();
            assert_eq!(canonical_decimal_string(&d), expected, "input {input}");
        }
    }

    #[test]
    fn significant_digit_count() {
        assert_eq!(
            decimal_significant_digits(&Decimal::from_str("0").unwrap()),
            1
        );
        assert_eq!(
            decimal_significant_digits(&Decimal::from_str("1.200").unwrap()),
            2
        );
        assert_eq!(
            decimal_significant_digits(&Decimal::from_str("123.456").unwrap()),
            6
        );
    }
}
