use serde::{Deserialize, Serialize};

use crate::coercion::WireType;

/// Declared datatype of a tag, as shown to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagDataType {
    Boolean,
    Int16,
    UInt16,
    Int32,
    Float,
    String,
    Byte,
}

impl TagDataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "Boolean",
            Self::Int16 => "Int16",
            Self::UInt16 => "UInt16",
            Self::Int32 => "Int32",
            Self::Float => "Float",
            Self::String => "String",
            Self::Byte => "Byte",
        }
    }

    /// Lenient parse of the datatype names dashboards send.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "boolean" | "bool" | "bit" => Some(Self::Boolean),
            "int16" | "int" | "short" => Some(Self::Int16),
            "uint16" | "word" => Some(Self::UInt16),
            "int32" | "dint" => Some(Self::Int32),
            "float" | "real" => Some(Self::Float),
            "string" | "char" => Some(Self::String),
            "byte" => Some(Self::Byte),
            _ => None,
        }
    }

    pub fn wire_type(&self) -> WireType {
        match self {
            Self::Boolean => WireType::Boolean,
            Self::Int16 => WireType::Int16,
            Self::UInt16 => WireType::UInt16,
            Self::Int32 => WireType::Int32,
            Self::Float => WireType::Float,
            Self::String => WireType::String,
            Self::Byte => WireType::Byte,
        }
    }
}

impl std::fmt::Display for TagDataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_plc_aliases() {
        assert_eq!(TagDataType::parse("BOOL"), Some(TagDataType::Boolean));
        assert_eq!(TagDataType::parse("Real"), Some(TagDataType::Float));
        assert_eq!(TagDataType::parse("dint"), Some(TagDataType::Int32));
        assert_eq!(TagDataType::parse("Word"), Some(TagDataType::UInt16));
        assert_eq!(TagDataType::parse("timer"), None);
    }

    #[test]
    fn test_wire_type_mapping() {
        assert_eq!(TagDataType::Byte.wire_type(), WireType::Byte);
        assert_eq!(TagDataType::Float.wire_type(), WireType::Float);
    }
}
