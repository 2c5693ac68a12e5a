//! Structural type descriptors for parameters.
//!
//! WDL has atomic types such as `Int`, `Boolean`, and `String`, and
//! parametric types like `Array[String]` and `Map[String,Array[File]]`.
//! Each descriptor is an immutable value; every shape can independently be
//! marked optional (`?`) and arrays can additionally require non-emptiness
//! (`+`).
//!
//! Compatibility between descriptors follows WDL's coercion rules:
//! 1. `Int` flows into `Float`
//! 2. `Boolean`, `Int`, `Float`, and `File` flow into `String`
//! 3. `String` flows into `File`, `Int`, and `Float`
//! 4. `T` flows into `T?` but the reverse is not true
//! 5. `Array[T]+` flows into `Array[T]` but the reverse is not true
//! 6. `Object` is accepted wherever a struct shape is expected
//!
//! The check is structural and deliberately generous: the model does not
//! type-check expression bodies, it only flags connections whose declared
//! shapes cannot line up at all.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Declared type of a parameter slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterType {
    Boolean {
        optional: bool,
    },
    Int {
        optional: bool,
    },
    Float {
        optional: bool,
    },
    String {
        optional: bool,
    },
    File {
        optional: bool,
    },
    Array {
        item: Box<ParameterType>,
        optional: bool,
        non_empty: bool,
    },
    Map {
        key: Box<ParameterType>,
        value: Box<ParameterType>,
        optional: bool,
    },
    Pair {
        left: Box<ParameterType>,
        right: Box<ParameterType>,
        optional: bool,
    },
    /// Reference to a named struct definition; resolved by name at
    /// validation time.
    StructRef {
        name: std::string::String,
        optional: bool,
    },
    /// Untyped record, compatible with any struct shape.
    Object {
        optional: bool,
    },
}

impl ParameterType {
    pub fn boolean(optional: bool) -> Self {
        ParameterType::Boolean { optional }
    }

    pub fn int(optional: bool) -> Self {
        ParameterType::Int { optional }
    }

    pub fn float(optional: bool) -> Self {
        ParameterType::Float { optional }
    }

    pub fn string(optional: bool) -> Self {
        ParameterType::String { optional }
    }

    pub fn file(optional: bool) -> Self {
        ParameterType::File { optional }
    }

    pub fn array(item: ParameterType, optional: bool, non_empty: bool) -> Self {
        ParameterType::Array {
            item: Box::new(item),
            optional,
            non_empty,
        }
    }

    pub fn map(key: ParameterType, value: ParameterType, optional: bool) -> Self {
        ParameterType::Map {
            key: Box::new(key),
            value: Box::new(value),
            optional,
        }
    }

    pub fn pair(left: ParameterType, right: ParameterType, optional: bool) -> Self {
        ParameterType::Pair {
            left: Box::new(left),
            right: Box::new(right),
            optional,
        }
    }

    pub fn struct_ref(name: impl Into<std::string::String>, optional: bool) -> Self {
        ParameterType::StructRef {
            name: name.into(),
            optional,
        }
    }

    pub fn object(optional: bool) -> Self {
        ParameterType::Object { optional }
    }

    /// Whether this type is marked optional (`?`).
    pub fn is_optional(&self) -> bool {
        match self {
            ParameterType::Boolean { optional }
            | ParameterType::Int { optional }
            | ParameterType::Float { optional }
            | ParameterType::String { optional }
            | ParameterType::File { optional }
            | ParameterType::Array { optional, .. }
            | ParameterType::Map { optional, .. }
            | ParameterType::Pair { optional, .. }
            | ParameterType::StructRef { optional, .. }
            | ParameterType::Object { optional } => *optional,
        }
    }

    /// Copy of this type with a different optional marker.
    pub fn with_optional(mut self, value: bool) -> Self {
        match &mut self {
            ParameterType::Boolean { optional }
            | ParameterType::Int { optional }
            | ParameterType::Float { optional }
            | ParameterType::String { optional }
            | ParameterType::File { optional }
            | ParameterType::Array { optional, .. }
            | ParameterType::Map { optional, .. }
            | ParameterType::Pair { optional, .. }
            | ParameterType::StructRef { optional, .. }
            | ParameterType::Object { optional } => *optional = value,
        }
        self
    }

    /// Whether this is a non-empty (`+`) array type.
    pub fn is_non_empty(&self) -> bool {
        matches!(self, ParameterType::Array { non_empty: true, .. })
    }

    /// The struct name referenced by this type, if it is a direct reference.
    pub fn struct_name(&self) -> Option<&str> {
        match self {
            ParameterType::StructRef { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Struct names referenced anywhere inside this type shape.
    pub fn referenced_structs(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_structs(&mut out);
        out
    }

    fn collect_structs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            ParameterType::StructRef { name, .. } => out.push(name),
            ParameterType::Array { item, .. } => item.collect_structs(out),
            ParameterType::Map { key, value, .. } => {
                key.collect_structs(out);
                value.collect_structs(out);
            }
            ParameterType::Pair { left, right, .. } => {
                left.collect_structs(out);
                right.collect_structs(out);
            }
            _ => {}
        }
    }

    /// Structural compatibility: can a value of this type flow into a slot
    /// declared as `target`?
    pub fn is_sub_type_of(&self, target: &ParameterType) -> bool {
        use ParameterType::*;

        // T? does not flow into T.
        if self.is_optional() && !target.is_optional() {
            return false;
        }

        match (self, target) {
            (Boolean { .. }, Boolean { .. })
            | (Int { .. }, Int { .. })
            | (Float { .. }, Float { .. })
            | (String { .. }, String { .. })
            | (File { .. }, File { .. })
            | (Object { .. }, Object { .. }) => true,

            // Numeric widening.
            (Int { .. }, Float { .. }) => true,

            // Primitives stringify.
            (Boolean { .. } | Int { .. } | Float { .. } | File { .. }, String { .. }) => true,

            // Strings parse back into paths and numbers.
            (String { .. }, File { .. } | Int { .. } | Float { .. }) => true,

            (
                Array {
                    item: a,
                    non_empty: a_ne,
                    ..
                },
                Array {
                    item: b,
                    non_empty: b_ne,
                    ..
                },
            ) => {
                // Array[T]+ flows into Array[T]; the reverse does not.
                if *b_ne && !*a_ne {
                    return false;
                }
                a.is_sub_type_of(b)
            }

            (Map { key: ak, value: av, .. }, Map { key: bk, value: bv, .. }) => {
                ak.is_sub_type_of(bk) && av.is_sub_type_of(bv)
            }

            (Pair { left: al, right: ar, .. }, Pair { left: bl, right: br, .. }) => {
                al.is_sub_type_of(bl) && ar.is_sub_type_of(br)
            }

            (StructRef { name: a, .. }, StructRef { name: b, .. }) => a == b,

            // Object literals initialize structs, structs decay to objects,
            // and maps with literal keys initialize both.
            (Object { .. }, StructRef { .. }) | (StructRef { .. }, Object { .. }) => true,
            (Map { .. }, StructRef { .. } | Object { .. }) => true,

            _ => false,
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = match self {
            ParameterType::Boolean { .. } => "Boolean".to_string(),
            ParameterType::Int { .. } => "Int".to_string(),
            ParameterType::Float { .. } => "Float".to_string(),
            ParameterType::String { .. } => "String".to_string(),
            ParameterType::File { .. } => "File".to_string(),
            ParameterType::Array { item, non_empty, .. } => {
                format!("Array[{}]{}", item, if *non_empty { "+" } else { "" })
            }
            ParameterType::Map { key, value, .. } => format!("Map[{},{}]", key, value),
            ParameterType::Pair { left, right, .. } => format!("Pair[{},{}]", left, right),
            ParameterType::StructRef { name, .. } => name.clone(),
            ParameterType::Object { .. } => "Object".to_string(),
        };
        write!(f, "{}{}", base, if self.is_optional() { "?" } else { "" })
    }
}

/// Error produced when WDL type text cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid type `{text}`: {reason}")]
pub struct TypeParseError {
    pub text: std::string::String,
    pub reason: std::string::String,
}

impl FromStr for ParameterType {
    type Err = TypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parser = TypeParser {
            source: s,
            chars: s.char_indices().peekable(),
        };
        let ty = parser.parse_type()?;
        parser.skip_whitespace();
        match parser.chars.next() {
            None => Ok(ty),
            Some((i, c)) => Err(parser.error(format!("unexpected `{}` at offset {}", c, i))),
        }
    }
}

/// Recursive descent over WDL type syntax: a base name, an optional
/// bracketed parameter list for `Array`/`Map`/`Pair`, `+` after array
/// brackets, and a trailing `?` on any shape. Unrecognized base names
/// become struct references.
struct TypeParser<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> TypeParser<'a> {
    fn error(&self, reason: impl Into<std::string::String>) -> TypeParseError {
        TypeParseError {
            text: self.source.to_string(),
            reason: reason.into(),
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn eat(&mut self, expected: char) -> Result<(), TypeParseError> {
        self.skip_whitespace();
        match self.chars.next() {
            Some((_, c)) if c == expected => Ok(()),
            Some((i, c)) => Err(self.error(format!(
                "expected `{}` but found `{}` at offset {}",
                expected, c, i
            ))),
            None => Err(self.error(format!("expected `{}` but input ended", expected))),
        }
    }

    fn ident(&mut self) -> Result<std::string::String, TypeParseError> {
        self.skip_whitespace();
        let mut out = std::string::String::new();
        while let Some((_, c)) = self.chars.peek().copied() {
            if c.is_alphanumeric() || c == '_' {
                out.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        if out.is_empty() {
            return Err(self.error("expected a type name"));
        }
        Ok(out)
    }

    fn parse_type(&mut self) -> Result<ParameterType, TypeParseError> {
        let name = self.ident()?;
        let mut ty = match name.as_str() {
            "Boolean" => ParameterType::boolean(false),
            "Int" => ParameterType::int(false),
            "Float" => ParameterType::float(false),
            "String" => ParameterType::string(false),
            "File" => ParameterType::file(false),
            "Object" => ParameterType::object(false),
            "Array" => {
                self.eat('[')?;
                let item = self.parse_type()?;
                self.eat(']')?;
                let non_empty = self.eat_marker('+');
                ParameterType::array(item, false, non_empty)
            }
            "Map" => {
                self.eat('[')?;
                let key = self.parse_type()?;
                self.eat(',')?;
                let value = self.parse_type()?;
                self.eat(']')?;
                ParameterType::map(key, value, false)
            }
            "Pair" => {
                self.eat('[')?;
                let left = self.parse_type()?;
                self.eat(',')?;
                let right = self.parse_type()?;
                self.eat(']')?;
                ParameterType::pair(left, right, false)
            }
            _ => ParameterType::struct_ref(name, false),
        };
        if self.eat_marker('?') {
            ty = ty.with_optional(true);
        }
        Ok(ty)
    }

    fn eat_marker(&mut self, marker: char) -> bool {
        self.skip_whitespace();
        if matches!(self.chars.peek(), Some((_, c)) if *c == marker) {
            self.chars.next();
            true
        } else {
            false
        }
    }
}
