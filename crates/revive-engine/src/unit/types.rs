//! Type signatures, method signatures, modifiers and annotations

use std::fmt;

use super::encoder::{BytecodeReader, BytecodeWriter, DecodeError};

/// Reserved name of instance constructors
pub const CONSTRUCTOR: &str = "<init>";

/// Reserved name of the static initializer
pub const STATIC_INIT: &str = "<clinit>";

/// Type signature of a field, parameter or return value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeSig {
    /// 64-bit signed integer
    Int,
    /// 64-bit float
    Float,
    /// Boolean
    Bool,
    /// Immutable string
    Str,
    /// No value (return position only)
    Void,
    /// Reference to a named type
    Ref(String),
    /// Array of elements
    Array(Box<TypeSig>),
}

impl TypeSig {
    /// Reference signature for a type name
    pub fn reference(name: impl Into<String>) -> Self {
        TypeSig::Ref(name.into())
    }

    /// Array signature with the given element type
    pub fn array_of(element: TypeSig) -> Self {
        TypeSig::Array(Box::new(element))
    }

    /// Parse the textual form (`i64`, `f64`, `bool`, `str`, `void`, `Name`, `T[]`)
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DecodeError::InvalidSignature(text.to_string()));
        }
        if let Some(element) = text.strip_suffix("[]") {
            return Ok(TypeSig::Array(Box::new(TypeSig::parse(element)?)));
        }
        Ok(match text {
            "i64" => TypeSig::Int,
            "f64" => TypeSig::Float,
            "bool" => TypeSig::Bool,
            "str" => TypeSig::Str,
            "void" => TypeSig::Void,
            name if name.chars().any(|c| matches!(c, '(' | ')' | ',' | ' ')) => {
                return Err(DecodeError::InvalidSignature(name.to_string()));
            }
            name => TypeSig::Ref(name.to_string()),
        })
    }

    /// Whether values of this type are references (null-able)
    pub fn is_reference(&self) -> bool {
        matches!(self, TypeSig::Str | TypeSig::Ref(_) | TypeSig::Array(_))
    }

    /// Name of the referenced type, if any
    pub fn ref_name(&self) -> Option<&str> {
        match self {
            TypeSig::Ref(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSig::Int => write!(f, "i64"),
            TypeSig::Float => write!(f, "f64"),
            TypeSig::Bool => write!(f, "bool"),
            TypeSig::Str => write!(f, "str"),
            TypeSig::Void => write!(f, "void"),
            TypeSig::Ref(name) => write!(f, "{}", name),
            TypeSig::Array(element) => write!(f, "{}[]", element),
        }
    }
}

/// Method signature: parameter types and return type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSig {
    /// Parameter types (receiver excluded)
    pub params: Vec<TypeSig>,
    /// Return type
    pub ret: TypeSig,
}

impl MethodSig {
    /// Create a signature
    pub fn new(params: Vec<TypeSig>, ret: TypeSig) -> Self {
        Self { params, ret }
    }

    /// `()->void`
    pub fn void() -> Self {
        Self::new(Vec::new(), TypeSig::Void)
    }

    /// Parse `(p1,p2)->ret`
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        let invalid = || DecodeError::InvalidSignature(text.to_string());
        let rest = text.trim().strip_prefix('(').ok_or_else(invalid)?;
        let (params, ret) = rest.split_once(")->").ok_or_else(invalid)?;
        let params = if params.trim().is_empty() {
            Vec::new()
        } else {
            params
                .split(',')
                .map(TypeSig::parse)
                .collect::<Result<Vec<_>, _>>()?
        };
        Ok(Self {
            params,
            ret: TypeSig::parse(ret)?,
        })
    }

    /// Number of declared parameters
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Same signature with `receiver` prepended as an explicit first parameter
    pub fn with_receiver(&self, receiver: &str) -> Self {
        let mut params = Vec::with_capacity(self.params.len() + 1);
        params.push(TypeSig::reference(receiver));
        params.extend(self.params.iter().cloned());
        Self {
            params,
            ret: self.ret.clone(),
        }
    }
}

impl fmt::Display for MethodSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ")->{}", self.ret)
    }
}

/// Identity of a method within a type: name plus signature
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberKey {
    /// Method name
    pub name: String,
    /// Method signature
    pub sig: MethodSig,
}

impl MemberKey {
    /// Create a key
    pub fn new(name: impl Into<String>, sig: MethodSig) -> Self {
        Self {
            name: name.into(),
            sig,
        }
    }

    /// Whether this key names a constructor
    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR
    }

    /// Whether this key names the static initializer
    pub fn is_static_init(&self) -> bool {
        self.name == STATIC_INIT
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.sig)
    }
}

/// Member visibility, least to most restrictive
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Visibility {
    /// Reachable from anywhere
    Public,
    /// Reachable from subtypes and the same package
    Protected,
    /// Reachable from the same package
    Package,
    /// Reachable from the declaring type only
    Private,
}

/// Modifier bit set shared by types, fields and methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Modifiers(pub u32);

impl Modifiers {
    /// Public visibility
    pub const PUBLIC: Modifiers = Modifiers(1 << 0);
    /// Private visibility
    pub const PRIVATE: Modifiers = Modifiers(1 << 1);
    /// Protected visibility
    pub const PROTECTED: Modifiers = Modifiers(1 << 2);
    /// Static member
    pub const STATIC: Modifiers = Modifiers(1 << 3);
    /// Final type or member
    pub const FINAL: Modifiers = Modifiers(1 << 4);
    /// Abstract type or method
    pub const ABSTRACT: Modifiers = Modifiers(1 << 5);
    /// Interface type
    pub const INTERFACE: Modifiers = Modifiers(1 << 6);
    /// Fixed-instance-set type
    pub const ENUM: Modifiers = Modifiers(1 << 7);
    /// Field holding one of the named instances of a fixed-instance-set type
    pub const ENUM_CONSTANT: Modifiers = Modifiers(1 << 8);
    /// Compiler- or engine-generated member
    pub const SYNTHETIC: Modifiers = Modifiers(1 << 9);
    /// Generated forwarding member for an inherited overridable method
    pub const CATCHER: Modifiers = Modifiers(1 << 10);
    /// Generated forwarding member for an inherited-implementation call
    pub const SUPER_DISPATCHER: Modifiers = Modifiers(1 << 11);

    const VISIBILITY_MASK: u32 = Self::PUBLIC.0 | Self::PRIVATE.0 | Self::PROTECTED.0;

    /// Empty set (package visibility)
    pub const fn empty() -> Self {
        Modifiers(0)
    }

    /// Raw bits
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether all bits of `other` are set
    pub const fn contains(self, other: Modifiers) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union
    pub const fn with(self, other: Modifiers) -> Self {
        Modifiers(self.0 | other.0)
    }

    /// Difference
    pub const fn without(self, other: Modifiers) -> Self {
        Modifiers(self.0 & !other.0)
    }

    /// Effective visibility
    pub fn visibility(self) -> Visibility {
        if self.contains(Self::PUBLIC) {
            Visibility::Public
        } else if self.contains(Self::PRIVATE) {
            Visibility::Private
        } else if self.contains(Self::PROTECTED) {
            Visibility::Protected
        } else {
            Visibility::Package
        }
    }

    /// Same set with the visibility bits replaced
    pub fn with_visibility(self, visibility: Visibility) -> Self {
        let base = Modifiers(self.0 & !Self::VISIBILITY_MASK);
        match visibility {
            Visibility::Public => base.with(Self::PUBLIC),
            Visibility::Protected => base.with(Self::PROTECTED),
            Visibility::Package => base,
            Visibility::Private => base.with(Self::PRIVATE),
        }
    }

    /// Static member
    pub fn is_static(self) -> bool {
        self.contains(Self::STATIC)
    }

    /// Private member
    pub fn is_private(self) -> bool {
        self.contains(Self::PRIVATE)
    }

    /// Final type or member
    pub fn is_final(self) -> bool {
        self.contains(Self::FINAL)
    }

    /// Abstract type or method
    pub fn is_abstract(self) -> bool {
        self.contains(Self::ABSTRACT)
    }

    /// Interface type
    pub fn is_interface(self) -> bool {
        self.contains(Self::INTERFACE)
    }

    /// Generated member
    pub fn is_synthetic(self) -> bool {
        self.contains(Self::SYNTHETIC)
    }

    /// Modifiers excluding the engine-internal markers
    pub fn source_visible(self) -> Self {
        self.without(Self::CATCHER).without(Self::SUPER_DISPATCHER)
    }
}

impl std::ops::BitOr for Modifiers {
    type Output = Modifiers;

    fn bitor(self, rhs: Modifiers) -> Modifiers {
        self.with(rhs)
    }
}

impl fmt::Display for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut words = Vec::new();
        match self.visibility() {
            Visibility::Public => words.push("public"),
            Visibility::Protected => words.push("protected"),
            Visibility::Private => words.push("private"),
            Visibility::Package => {}
        }
        for (flag, word) in [
            (Self::STATIC, "static"),
            (Self::FINAL, "final"),
            (Self::ABSTRACT, "abstract"),
            (Self::INTERFACE, "interface"),
            (Self::ENUM, "enum"),
            (Self::SYNTHETIC, "synthetic"),
        ] {
            if self.contains(flag) {
                words.push(word);
            }
        }
        write!(f, "{}", words.join(" "))
    }
}

/// Annotation attached to a type or member
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Annotation {
    /// Annotation type name
    pub type_name: String,
    /// Element name/value pairs, in declaration order
    pub elements: Vec<(String, String)>,
}

impl Annotation {
    /// Marker annotation without elements
    pub fn marker(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            elements: Vec::new(),
        }
    }

    /// Add an element
    pub fn element(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.elements.push((name.into(), value.into()));
        self
    }

    /// Look up an element value
    pub fn get(&self, name: &str) -> Option<&str> {
        self.elements
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub(crate) fn encode_list(list: &[Annotation], writer: &mut BytecodeWriter) {
        writer.emit_u32(list.len() as u32);
        for annotation in list {
            writer.emit_string(&annotation.type_name);
            writer.emit_u32(annotation.elements.len() as u32);
            for (name, value) in &annotation.elements {
                writer.emit_string(name);
                writer.emit_string(value);
            }
        }
    }

    pub(crate) fn decode_list(reader: &mut BytecodeReader<'_>) -> Result<Vec<Annotation>, DecodeError> {
        let count = reader.read_u32()? as usize;
        let mut list = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            let type_name = reader.read_string()?;
            let element_count = reader.read_u32()? as usize;
            let mut elements = Vec::with_capacity(element_count.min(256));
            for _ in 0..element_count {
                let name = reader.read_string()?;
                let value = reader.read_string()?;
                elements.push((name, value));
            }
            list.push(Annotation {
                type_name,
                elements,
            });
        }
        Ok(list)
    }
}

/// Package part of a dotted type name (`a.b.C` -> `a.b`)
pub fn package_of(type_name: &str) -> &str {
    type_name.rsplit_once('.').map(|(pkg, _)| pkg).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_sig_parse_display() {
        for text in ["i64", "f64", "bool", "str", "void", "app.Point", "i64[]", "app.Point[][]"] {
            assert_eq!(TypeSig::parse(text).unwrap().to_string(), text);
        }
        assert!(TypeSig::parse("").is_err());
        assert!(TypeSig::parse("a,b").is_err());
    }

    #[test]
    fn test_method_sig_parse() {
        let sig = MethodSig::parse("(i64,app.Point)->bool").unwrap();
        assert_eq!(sig.params, vec![TypeSig::Int, TypeSig::reference("app.Point")]);
        assert_eq!(sig.ret, TypeSig::Bool);
        assert_eq!(MethodSig::parse("()->void").unwrap(), MethodSig::void());
        assert!(MethodSig::parse("i64->void").is_err());
    }

    #[test]
    fn test_with_receiver() {
        let sig = MethodSig::parse("(i64)->i64").unwrap();
        assert_eq!(sig.with_receiver("app.A").to_string(), "(app.A,i64)->i64");
    }

    #[test]
    fn test_visibility_replacement() {
        let mods = Modifiers::PROTECTED | Modifiers::FINAL;
        assert_eq!(mods.visibility(), Visibility::Protected);
        let widened = mods.with_visibility(Visibility::Public);
        assert_eq!(widened.visibility(), Visibility::Public);
        assert!(widened.is_final());
        assert_eq!(Modifiers::empty().visibility(), Visibility::Package);
    }

    #[test]
    fn test_names() {
        assert_eq!(package_of("a.b.C"), "a.b");
        assert_eq!(package_of("C"), "");
    }
}
