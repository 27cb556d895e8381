//! S7 address syntax.
//!
//! Data-block form: `DB<n>,<type><offset>[.<bit|len>]`, e.g. `DB1,INT0`,
//! `DB1,X8.0`, `DB1,REAL4`, `DB2,S20.30`.
//! Area form: `<area>[<size>]<offset>[.<bit>]` with area M, I, Q, E or A and
//! size B, W, D, I, DI or R, e.g. `M10.0`, `MW10`, `QB3`, `MR8`.

use std::sync::LazyLock;

use domain::DomainError;
use domain::coercion::WireType;
use regex::Regex;

static DB_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^DB(\d+),(X|BOOL|BYTE|B|CHAR|C|DINT|DI|DWORD|DW|INT|I|WORD|W|REAL|R|STRING|S)(\d+)(?:\.(\d+))?$")
        .expect("static pattern")
});

static AREA_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(M|I|Q|E|A)(DI|B|W|D|I|R|X)?(\d+)(?:\.(\d+))?$").expect("static pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum S7Area {
    DataBlock(u16),
    Merker,
    Input,
    Output,
}

/// Item kind, which also fixes its width on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum S7Kind {
    Bit(u8),
    Byte,
    Char,
    Int,
    Word,
    DInt,
    DWord,
    Real,
    /// Max length in characters
    String(u16),
}

impl S7Kind {
    pub fn wire_type(&self) -> WireType {
        match self {
            Self::Bit(_) => WireType::Boolean,
            Self::Byte => WireType::Byte,
            Self::Char | Self::String(_) => WireType::String,
            Self::Int => WireType::Int16,
            Self::Word => WireType::UInt16,
            Self::DInt => WireType::Int32,
            Self::DWord => WireType::UInt32,
            Self::Real => WireType::Float,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct S7Address {
    pub area: S7Area,
    pub kind: S7Kind,
    /// Byte offset inside the area
    pub offset: u32,
}

impl S7Address {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let normalized = raw.trim().to_ascii_uppercase().replace(' ', "");
        let invalid = || DomainError::InvalidAddressFormat {
            protocol: "S7".to_string(),
            address: raw.to_string(),
        };

        if let Some(caps) = DB_FORM.captures(&normalized) {
            let db: u16 = caps[1].parse().map_err(|_| invalid())?;
            let offset: u32 = caps[3].parse().map_err(|_| invalid())?;
            let suffix = caps.get(4).map(|m| m.as_str());

            let kind = match (&caps[2], suffix) {
                ("X" | "BOOL", Some(bit)) => S7Kind::Bit(parse_bit(bit).ok_or_else(invalid)?),
                ("S" | "STRING", Some(len)) => S7Kind::String(len.parse().map_err(|_| invalid())?),
                ("S" | "STRING", None) => S7Kind::String(254),
                (_, Some(_)) => return Err(invalid()),
                ("BYTE" | "B", None) => S7Kind::Byte,
                ("CHAR" | "C", None) => S7Kind::Char,
                ("INT" | "I", None) => S7Kind::Int,
                ("WORD" | "W", None) => S7Kind::Word,
                ("DINT" | "DI", None) => S7Kind::DInt,
                ("DWORD" | "DW", None) => S7Kind::DWord,
                ("REAL" | "R", None) => S7Kind::Real,
                _ => return Err(invalid()),
            };

            return Ok(Self {
                area: S7Area::DataBlock(db),
                kind,
                offset,
            });
        }

        if let Some(caps) = AREA_FORM.captures(&normalized) {
            let area = match &caps[1] {
                "M" => S7Area::Merker,
                "I" | "E" => S7Area::Input,
                _ => S7Area::Output,
            };
            let offset: u32 = caps[3].parse().map_err(|_| invalid())?;
            let bit = caps.get(4).map(|m| m.as_str());

            let kind = match (caps.get(2).map(|m| m.as_str()), bit) {
                (None | Some("X"), Some(bit)) => S7Kind::Bit(parse_bit(bit).ok_or_else(invalid)?),
                (_, Some(_)) | (None | Some("X"), None) => return Err(invalid()),
                (Some("B"), None) => S7Kind::Byte,
                (Some("W"), None) => S7Kind::Word,
                (Some("I"), None) => S7Kind::Int,
                (Some("D"), None) => S7Kind::DWord,
                (Some("DI"), None) => S7Kind::DInt,
                (Some("R"), None) => S7Kind::Real,
                _ => return Err(invalid()),
            };

            return Ok(Self { area, kind, offset });
        }

        Err(invalid())
    }
}

fn parse_bit(raw: &str) -> Option<u8> {
    raw.parse::<u8>().ok().filter(|b| *b < 8)
}

/// Whether an address obviously belongs to another protocol.
pub fn is_foreign(address: &str) -> bool {
    address.trim_start().starts_with("ns=")
}

/// Datatype inferred from an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferredType {
    Boolean,
    Float,
    Integer(WireType),
    String,
    Unknown,
}

impl InferredType {
    pub fn wire_type(&self) -> Option<WireType> {
        match self {
            Self::Boolean => Some(WireType::Boolean),
            Self::Float => Some(WireType::Float),
            Self::Integer(width) => Some(*width),
            Self::String => Some(WireType::String),
            Self::Unknown => None,
        }
    }
}

static BIT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(,X\d|BOOL|^[MIQEA]\d+\.\d+$)").expect("static pattern"));
static AREA_WIDTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[MIQEA](DI|B|W|D|I|R)\d").expect("static pattern"));

/// Best-effort datatype inference from an address string.
///
/// Well-formed addresses resolve exactly through [`S7Address::parse`]; anything
/// else falls back to a keyword scan (bit marker, then REAL, then the integer
/// family, then STRING/CHAR). Returns `Unknown` when nothing matches.
pub fn infer_type(address: &str) -> InferredType {
    if let Ok(parsed) = S7Address::parse(address) {
        return match parsed.kind.wire_type() {
            WireType::Boolean => InferredType::Boolean,
            WireType::Float => InferredType::Float,
            WireType::String => InferredType::String,
            width => InferredType::Integer(width),
        };
    }

    let upper = address.trim().to_ascii_uppercase();

    if BIT_PATTERN.is_match(&upper) {
        return InferredType::Boolean;
    }
    if upper.contains("REAL") {
        return InferredType::Float;
    }
    if let Some(caps) = AREA_WIDTH.captures(&upper) {
        return match &caps[1] {
            "B" => InferredType::Integer(WireType::Byte),
            "W" => InferredType::Integer(WireType::UInt16),
            "I" => InferredType::Integer(WireType::Int16),
            "D" => InferredType::Integer(WireType::UInt32),
            "DI" => InferredType::Integer(WireType::Int32),
            _ => InferredType::Float,
        };
    }
    // Longest keyword first: DINT contains INT, DWORD contains WORD.
    for (keyword, width) in [
        ("DINT", WireType::Int32),
        ("DWORD", WireType::UInt32),
        ("INT", WireType::Int16),
        ("WORD", WireType::UInt16),
        ("BYTE", WireType::Byte),
    ] {
        if upper.contains(keyword) {
            return InferredType::Integer(width);
        }
    }
    if upper.contains("STRING") || upper.contains("CHAR") {
        return InferredType::String;
    }

    InferredType::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_db_forms() {
        let a = S7Address::parse("DB1,INT0").unwrap();
        assert_eq!(a.area, S7Area::DataBlock(1));
        assert_eq!(a.kind, S7Kind::Int);
        assert_eq!(a.offset, 0);

        assert_eq!(S7Address::parse("DB1,X8.0").unwrap().kind, S7Kind::Bit(0));
        assert_eq!(S7Address::parse("db1,real4").unwrap().kind, S7Kind::Real);
        assert_eq!(S7Address::parse("DB2,S20.30").unwrap().kind, S7Kind::String(30));
        assert_eq!(S7Address::parse("DB3,DWORD12").unwrap().kind, S7Kind::DWord);
        assert_eq!(S7Address::parse("DB3,DI12").unwrap().kind, S7Kind::DInt);
    }

    #[test]
    fn test_parse_area_forms() {
        let m = S7Address::parse("M10.3").unwrap();
        assert_eq!(m.area, S7Area::Merker);
        assert_eq!(m.kind, S7Kind::Bit(3));
        assert_eq!(S7Address::parse("MW10").unwrap().kind, S7Kind::Word);
        assert_eq!(S7Address::parse("E0.1").unwrap().area, S7Area::Input);
        assert_eq!(S7Address::parse("QB3").unwrap().kind, S7Kind::Byte);
        assert_eq!(S7Address::parse("MR8").unwrap().kind, S7Kind::Real);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "ns=2;s=Speed", "DB1,INT", "DB1,X8", "DB1,X8.9", "M10", "DB1,INT0.1", "FOO"] {
            assert!(
                matches!(
                    S7Address::parse(bad),
                    Err(DomainError::InvalidAddressFormat { .. })
                ),
                "{} should not parse",
                bad
            );
        }
    }

    #[test]
    fn test_is_foreign() {
        assert!(is_foreign("ns=2;s=Speed"));
        assert!(!is_foreign("DB1,INT0"));
    }

    #[test]
    fn test_infer_type_on_well_formed_addresses() {
        assert_eq!(infer_type("DB1,X8.0"), InferredType::Boolean);
        assert_eq!(infer_type("M0.1"), InferredType::Boolean);
        assert_eq!(infer_type("DB1,REAL4"), InferredType::Float);
        assert_eq!(infer_type("DB1,INT0"), InferredType::Integer(WireType::Int16));
        assert_eq!(infer_type("DB1,DINT0"), InferredType::Integer(WireType::Int32));
        assert_eq!(infer_type("MW10"), InferredType::Integer(WireType::UInt16));
        assert_eq!(infer_type("DB1,STRING2.20"), InferredType::String);
    }

    #[test]
    fn test_infer_type_keyword_fallback() {
        assert_eq!(infer_type("DB1.DBX0.0 BOOL"), InferredType::Boolean);
        assert_eq!(infer_type("Tank.REAL"), InferredType::Float);
        assert_eq!(infer_type("DB1.DINT10"), InferredType::Integer(WireType::Int32));
        assert_eq!(infer_type("DB1.DWORD10"), InferredType::Integer(WireType::UInt32));
        assert_eq!(infer_type("STRING_AREA"), InferredType::String);
        assert_eq!(infer_type("ns=2;s=Speed"), InferredType::Unknown);
    }
}
