//! Core types and constants shared by the C++ frontend and the schema model

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default root marker every interface class must derive from.
pub const ROOT_INTERFACE: &str = "Core::IUnknown";

/// Default C++ types accepted as the framework's error-code return type.
pub const ERROR_CODE_TYPES: &[&str] = &["Core::hresult", "hresult", "uint32_t"];

/// Maximum nesting of `@stubgen:include` splices.
pub const MAX_INCLUDE_DEPTH: usize = 16;

/// Maximum nesting of `$ref` indirections followed for one value.
pub const MAX_REF_DEPTH: usize = 64;

/// Version reported for `@json` interfaces without an explicit version.
pub const DEFAULT_INTERFACE_VERSION: &str = "1.0.0";

/// Placeholder expanded against the JSON include directories.
pub const INTERFACE_DIR_PLACEHOLDER: &str = "{interfacedir}";

/// Placeholder expanded against the C++ include directories.
pub const CPP_INTERFACE_DIR_PLACEHOLDER: &str = "{cppinterfacedir}";

/// How single parameters and results are shaped on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RpcFormat {
    /// Params and results are always named objects.
    #[default]
    Compliant,
    /// Params stay as declared; single results are unwrapped.
    Extended,
    /// Single params and single results are unwrapped.
    Collapsed,
}

impl RpcFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "compliant" | "default" => Some(Self::Compliant),
            "extended" | "uncompliant-extended" => Some(Self::Extended),
            "collapsed" | "uncompliant-collapsed" => Some(Self::Collapsed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compliant => "compliant",
            Self::Extended => "extended",
            Self::Collapsed => "collapsed",
        }
    }
}

impl fmt::Display for RpcFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference/cv qualifier bitmask carried by every [`crate::ast::Type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct RefQualifiers(u16);

impl RefQualifiers {
    pub const VALUE: Self = Self(0);
    pub const POINTER: Self = Self(1 << 0);
    pub const REFERENCE: Self = Self(1 << 1);
    pub const RVALUE_REFERENCE: Self = Self(1 << 2);
    pub const CONST: Self = Self(1 << 3);
    pub const VOLATILE: Self = Self(1 << 4);
    /// `T* const`
    pub const POINTER_TO_CONST: Self = Self(1 << 5);
    /// `T* volatile`
    pub const POINTER_TO_VOLATILE: Self = Self(1 << 6);
    pub const POINTER_TO_POINTER: Self = Self(1 << 7);

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn is_value(&self) -> bool {
        !self.intersects(Self::POINTER | Self::REFERENCE | Self::RVALUE_REFERENCE)
    }

    pub fn is_pointer(&self) -> bool {
        self.contains(Self::POINTER)
    }

    pub fn is_reference(&self) -> bool {
        self.contains(Self::REFERENCE)
    }

    pub fn is_const(&self) -> bool {
        self.contains(Self::CONST)
    }
}

impl std::ops::BitOr for RefQualifiers {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for RefQualifiers {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Built-in C++ types, including the fixed-width aliases from `<cstdint>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fundamental {
    Void,
    Bool,
    Char,
    SignedChar,
    UnsignedChar,
    Short,
    UnsignedShort,
    Int,
    UnsignedInt,
    Long,
    UnsignedLong,
    LongLong,
    UnsignedLongLong,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    LongDouble,
}

impl Fundamental {
    /// Looks up a single-word type name (`int`, `uint32_t`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.strip_prefix("std::").unwrap_or(name);
        let fundamental = match name {
            "void" => Self::Void,
            "bool" => Self::Bool,
            "char" => Self::Char,
            "short" => Self::Short,
            "int" => Self::Int,
            "long" => Self::Long,
            "float" => Self::Float,
            "double" => Self::Double,
            "int8_t" => Self::Int8,
            "uint8_t" => Self::UInt8,
            "int16_t" => Self::Int16,
            "uint16_t" => Self::UInt16,
            "int32_t" => Self::Int32,
            "uint32_t" => Self::UInt32,
            "int64_t" => Self::Int64,
            "uint64_t" => Self::UInt64,
            "size_t" => Self::UInt64,
            _ => return None,
        };
        Some(fundamental)
    }

    /// Combines `signed`/`unsigned`/`short`/`long` specifiers with a base.
    pub fn from_specifiers(
        unsigned: bool,
        signed: bool,
        shorts: usize,
        longs: usize,
        base: Option<&str>,
    ) -> Option<Self> {
        let fundamental = match (base, shorts, longs) {
            (Some("char"), 0, 0) if unsigned => Self::UnsignedChar,
            (Some("char"), 0, 0) if signed => Self::SignedChar,
            (Some("char"), 0, 0) => Self::Char,
            (Some("double"), 0, 1) => Self::LongDouble,
            (Some("double"), 0, 0) => Self::Double,
            (Some("int") | None, 1, 0) if unsigned => Self::UnsignedShort,
            (Some("int") | None, 1, 0) => Self::Short,
            (Some("int") | None, 0, 1) if unsigned => Self::UnsignedLong,
            (Some("int") | None, 0, 1) => Self::Long,
            (Some("int") | None, 0, 2) if unsigned => Self::UnsignedLongLong,
            (Some("int") | None, 0, 2) => Self::LongLong,
            (Some("int") | None, 0, 0) if unsigned => Self::UnsignedInt,
            (Some("int") | None, 0, 0) if signed => Self::Int,
            (Some("int"), 0, 0) => Self::Int,
            _ => return None,
        };
        Some(fundamental)
    }

    pub fn is_integer(&self) -> bool {
        !matches!(self, Self::Void | Self::Bool | Self::Float | Self::Double | Self::LongDouble)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float | Self::Double | Self::LongDouble)
    }

    pub fn is_char(&self) -> bool {
        matches!(self, Self::Char | Self::SignedChar)
    }

    /// Size in bits, using the LP64 data model.
    pub fn size(&self) -> u32 {
        match self {
            Self::Void => 0,
            Self::Bool
            | Self::Char
            | Self::SignedChar
            | Self::UnsignedChar
            | Self::Int8
            | Self::UInt8 => 8,
            Self::Short | Self::UnsignedShort | Self::Int16 | Self::UInt16 => 16,
            Self::Int | Self::UnsignedInt | Self::Int32 | Self::UInt32 | Self::Float => 32,
            Self::Long
            | Self::UnsignedLong
            | Self::LongLong
            | Self::UnsignedLongLong
            | Self::Int64
            | Self::UInt64
            | Self::Double => 64,
            Self::LongDouble => 128,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            Self::Char
                | Self::SignedChar
                | Self::Short
                | Self::Int
                | Self::Long
                | Self::LongLong
                | Self::Int8
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::Float
                | Self::Double
                | Self::LongDouble
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Bool => "bool",
            Self::Char => "char",
            Self::SignedChar => "signed char",
            Self::UnsignedChar => "unsigned char",
            Self::Short => "short",
            Self::UnsignedShort => "unsigned short",
            Self::Int => "int",
            Self::UnsignedInt => "unsigned int",
            Self::Long => "long",
            Self::UnsignedLong => "unsigned long",
            Self::LongLong => "long long",
            Self::UnsignedLongLong => "unsigned long long",
            Self::Int8 => "int8_t",
            Self::UInt8 => "uint8_t",
            Self::Int16 => "int16_t",
            Self::UInt16 => "uint16_t",
            Self::Int32 => "int32_t",
            Self::UInt32 => "uint32_t",
            Self::Int64 => "int64_t",
            Self::UInt64 => "uint64_t",
            Self::Float => "float",
            Self::Double => "double",
            Self::LongDouble => "long double",
        }
    }
}

/// Splits `A::B::C` into its segments, dropping a leading global `::`.
pub fn split_scoped(name: &str) -> Vec<&str> {
    name.trim_start_matches("::").split("::").filter(|s| !s.is_empty()).collect()
}

/// Last segment of a scoped name.
pub fn short_name(name: &str) -> &str {
    name.rsplit("::").next().unwrap_or(name)
}

/// `SetLevel` -> `setLevel`, `ID_FOO` stays untouched past its first letter.
pub fn camel_case(name: &str) -> String {
    let trimmed = name.trim_matches('_');
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `level` -> `Level`, `max_size` -> `MaxSize`.
pub fn pascal_case(name: &str) -> String {
    name.split(|c: char| c == '_' || c == '-' || c == ' ' || c == '.')
        .filter(|s| !s.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualifier_bits() {
        let mut q = RefQualifiers::CONST | RefQualifiers::REFERENCE;
        assert!(q.is_reference());
        assert!(q.is_const());
        assert!(!q.is_value());
        q.remove(RefQualifiers::REFERENCE);
        assert!(q.is_value());
        assert!(!RefQualifiers::VALUE.contains(RefQualifiers::VALUE));
    }

    #[test]
    fn test_fundamental_specifiers() {
        assert_eq!(
            Fundamental::from_specifiers(true, false, 0, 2, None),
            Some(Fundamental::UnsignedLongLong)
        );
        assert_eq!(
            Fundamental::from_specifiers(true, false, 0, 0, Some("char")),
            Some(Fundamental::UnsignedChar)
        );
        assert_eq!(
            Fundamental::from_specifiers(false, false, 1, 0, Some("int")),
            Some(Fundamental::Short)
        );
        assert_eq!(Fundamental::from_name("uint16_t").map(|f| f.size()), Some(16));
        assert!(!Fundamental::UInt32.is_signed());
    }

    #[test]
    fn test_naming_helpers() {
        assert_eq!(camel_case("SetLevel"), "setLevel");
        assert_eq!(camel_case("_level"), "level");
        assert_eq!(pascal_case("max_size"), "MaxSize");
        assert_eq!(short_name("Exchange::IFoo::Data"), "Data");
        assert_eq!(split_scoped("::A::B"), vec!["A", "B"]);
        assert_eq!(RpcFormat::from_name("Collapsed"), Some(RpcFormat::Collapsed));
    }
}
