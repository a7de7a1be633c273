//! Compiled unit format
//!
//! One compiled unit holds one type definition. Layout:
//! - Header: magic (4 bytes) + version (u32) + flags (u32) + crc32 (u32) + SHA-256 (32 bytes)
//! - Type: name, supertype, interfaces, modifiers, annotations, source file
//! - Field table
//! - Method table (each with its instruction stream)

use sha2::{Digest, Sha256};
use thiserror::Error;

use super::encoder::{BytecodeReader, BytecodeWriter, DecodeError};
use super::opcode::Instr;
use super::types::{Annotation, MemberKey, MethodSig, Modifiers, TypeSig, CONSTRUCTOR, STATIC_INIT};

/// Magic number for compiled units: "RVIV"
pub const MAGIC: [u8; 4] = *b"RVIV";

/// Current unit format version
pub const VERSION: u32 = 1;

const HEADER_LEN: usize = 48;

/// Unit flags
pub mod flags {
    /// Unit was produced by the engine (rewritten or generated)
    pub const ENGINE_REWRITTEN: u32 = 1 << 0;
    /// Unit is a generated executor
    pub const EXECUTOR: u32 = 1 << 1;
    /// Unit is a generated per-version contract
    pub const CONTRACT: u32 = 1 << 2;
}

/// Unit encoding/decoding errors
#[derive(Debug, Error)]
pub enum UnitError {
    /// Decode error
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected RVIV, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported version: {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Stored CRC32
        expected: u32,
        /// Computed CRC32
        actual: u32,
    },

    /// Digest mismatch
    #[error("SHA-256 mismatch: stored {stored}, computed {computed}")]
    DigestMismatch {
        /// Stored digest (hex)
        stored: String,
        /// Computed digest (hex)
        computed: String,
    },

    /// Bytes remain after the last table
    #[error("Trailing data: {0} bytes after end of unit")]
    TrailingData(usize),
}

/// Field definition
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Declared type
    pub sig: TypeSig,
    /// Modifiers
    pub modifiers: Modifiers,
    /// Generic signature, when the declared type is parameterized
    pub generic_signature: Option<String>,
    /// Annotations
    pub annotations: Vec<Annotation>,
}

impl FieldDef {
    /// Create a package-visible instance field
    pub fn new(name: impl Into<String>, sig: TypeSig) -> Self {
        Self {
            name: name.into(),
            sig,
            modifiers: Modifiers::empty(),
            generic_signature: None,
            annotations: Vec::new(),
        }
    }

    /// Set modifiers
    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    /// Set the generic signature
    pub fn with_generic_signature(mut self, signature: impl Into<String>) -> Self {
        self.generic_signature = Some(signature.into());
        self
    }

    /// Add an annotation
    pub fn annotated(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    /// Static field
    pub fn is_static(&self) -> bool {
        self.modifiers.is_static()
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.name);
        writer.emit_string(&self.sig.to_string());
        writer.emit_u32(self.modifiers.bits());
        writer.emit_opt_string(self.generic_signature.as_deref());
        Annotation::encode_list(&self.annotations, writer);
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let name = reader.read_string()?;
        let sig = TypeSig::parse(&reader.read_string()?)?;
        let modifiers = Modifiers(reader.read_u32()?);
        let generic_signature = reader.read_opt_string()?;
        let annotations = Annotation::decode_list(reader)?;
        Ok(Self {
            name,
            sig,
            modifiers,
            generic_signature,
            annotations,
        })
    }
}

/// Method or constructor definition
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    /// Method name (`<init>` for constructors, `<clinit>` for the static initializer)
    pub name: String,
    /// Signature (receiver excluded)
    pub sig: MethodSig,
    /// Modifiers
    pub modifiers: Modifiers,
    /// Annotations
    pub annotations: Vec<Annotation>,
    /// Declared thrown-exception type names
    pub throws: Vec<String>,
    /// Number of local slots (receiver and parameters included)
    pub max_locals: u16,
    /// Instruction stream (empty for abstract methods)
    pub code: Vec<Instr>,
}

impl MethodDef {
    /// Create a method without code
    pub fn new(name: impl Into<String>, sig: MethodSig, modifiers: Modifiers) -> Self {
        let mut def = Self {
            name: name.into(),
            sig,
            modifiers,
            annotations: Vec::new(),
            throws: Vec::new(),
            max_locals: 0,
            code: Vec::new(),
        };
        def.max_locals = def.param_slots() as u16;
        def
    }

    /// Set the instruction stream, growing `max_locals` to cover every local it touches
    pub fn with_code(mut self, code: Vec<Instr>) -> Self {
        let touched = code
            .iter()
            .filter_map(|instr| match instr {
                Instr::Load(i) | Instr::Store(i) => Some(*i + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        self.max_locals = self.max_locals.max(touched);
        self.code = code;
        self
    }

    /// Add an annotation
    pub fn annotated(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    /// Add a declared thrown-exception type
    pub fn throwing(mut self, type_name: impl Into<String>) -> Self {
        self.throws.push(type_name.into());
        self
    }

    /// Name+signature identity
    pub fn key(&self) -> MemberKey {
        MemberKey::new(self.name.clone(), self.sig.clone())
    }

    /// Constructor
    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR
    }

    /// Static initializer
    pub fn is_static_init(&self) -> bool {
        self.name == STATIC_INIT
    }

    /// Static method
    pub fn is_static(&self) -> bool {
        self.modifiers.is_static()
    }

    /// Local slots occupied by the receiver and parameters
    pub fn param_slots(&self) -> usize {
        self.sig.arity() + usize::from(!self.is_static())
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.name);
        writer.emit_string(&self.sig.to_string());
        writer.emit_u32(self.modifiers.bits());
        Annotation::encode_list(&self.annotations, writer);
        writer.emit_strings(&self.throws);
        writer.emit_u16(self.max_locals);
        writer.emit_u32(self.code.len() as u32);
        for instr in &self.code {
            instr.encode(writer);
        }
    }

    fn decode(reader: &mut BytecodeReader<'_>) -> Result<Self, DecodeError> {
        let name = reader.read_string()?;
        let sig = MethodSig::parse(&reader.read_string()?)?;
        let modifiers = Modifiers(reader.read_u32()?);
        let annotations = Annotation::decode_list(reader)?;
        let throws = reader.read_strings()?;
        let max_locals = reader.read_u16()?;
        let count = reader.read_u32()? as usize;
        let mut code = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            code.push(Instr::decode(reader)?);
        }
        Ok(Self {
            name,
            sig,
            modifiers,
            annotations,
            throws,
            max_locals,
            code,
        })
    }

    /// Encoded instruction stream, used for body comparison
    pub fn code_bytes(&self) -> Vec<u8> {
        let mut writer = BytecodeWriter::new();
        for instr in &self.code {
            instr.encode(&mut writer);
        }
        writer.into_bytes()
    }
}

/// One compiled type definition
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledUnit {
    /// Magic number (must be "RVIV")
    pub magic: [u8; 4],
    /// Format version
    pub version: u32,
    /// Unit flags
    pub flags: u32,
    /// Fully qualified type name
    pub name: String,
    /// Supertype name (None for roots and interfaces)
    pub super_name: Option<String>,
    /// Implemented (or extended, for interfaces) interface names
    pub interfaces: Vec<String>,
    /// Type modifiers
    pub modifiers: Modifiers,
    /// Type annotations
    pub annotations: Vec<Annotation>,
    /// Source file path
    pub source_file: Option<String>,
    /// Field definitions in declaration order
    pub fields: Vec<FieldDef>,
    /// Method definitions in declaration order
    pub methods: Vec<MethodDef>,
}

impl CompiledUnit {
    /// Create an empty public class unit
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            flags: 0,
            name: name.into(),
            super_name: None,
            interfaces: Vec::new(),
            modifiers: Modifiers::PUBLIC,
            annotations: Vec::new(),
            source_file: None,
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Interface type
    pub fn is_interface(&self) -> bool {
        self.modifiers.is_interface()
    }

    /// Fixed-instance-set type
    pub fn is_enum(&self) -> bool {
        self.modifiers.contains(Modifiers::ENUM)
    }

    /// Find a field by name
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Find a method by name and signature
    pub fn method(&self, key: &MemberKey) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.name == key.name && m.sig == key.sig)
    }

    /// Static initializer, if any
    pub fn static_initializer(&self) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.is_static_init())
    }

    /// Constructors in declaration order
    pub fn constructors(&self) -> impl Iterator<Item = &MethodDef> {
        self.methods.iter().filter(|m| m.is_constructor())
    }

    /// Validate header fields
    pub fn validate(&self) -> Result<(), String> {
        if self.magic != MAGIC {
            return Err("Invalid magic number".to_string());
        }
        if self.version != VERSION {
            return Err(format!("Unsupported version: {}", self.version));
        }
        if self.name.is_empty() {
            return Err("Empty type name".to_string());
        }
        Ok(())
    }

    /// Encode the unit to binary
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BytecodeWriter::new();

        writer.buffer.extend_from_slice(&self.magic);
        writer.emit_u32(self.version);
        writer.emit_u32(self.flags);
        let crc32_offset = writer.offset();
        writer.emit_u32(0); // Placeholder for CRC32
        let sha256_offset = writer.offset();
        writer.buffer.extend_from_slice(&[0u8; 32]); // Placeholder for SHA-256

        writer.emit_string(&self.name);
        writer.emit_opt_string(self.super_name.as_deref());
        writer.emit_strings(&self.interfaces);
        writer.emit_u32(self.modifiers.bits());
        Annotation::encode_list(&self.annotations, &mut writer);
        writer.emit_opt_string(self.source_file.as_deref());

        writer.emit_u32(self.fields.len() as u32);
        for field in &self.fields {
            field.encode(&mut writer);
        }

        writer.emit_u32(self.methods.len() as u32);
        for method in &self.methods {
            method.encode(&mut writer);
        }

        let payload = &writer.buffer[HEADER_LEN..];
        let crc32 = crc32fast::hash(payload);
        let digest: [u8; 32] = Sha256::digest(payload).into();

        writer.patch_u32(crc32_offset, crc32);
        writer.buffer[sha256_offset..sha256_offset + 32].copy_from_slice(&digest);

        writer.into_bytes()
    }

    /// Decode a unit from binary
    pub fn decode(data: &[u8]) -> Result<Self, UnitError> {
        let mut reader = BytecodeReader::new(data);

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&reader.read_bytes(4)?);
        if magic != MAGIC {
            return Err(UnitError::InvalidMagic(magic));
        }

        let version = reader.read_u32()?;
        if version != VERSION {
            return Err(UnitError::UnsupportedVersion(version));
        }

        let flags = reader.read_u32()?;
        let stored_crc32 = reader.read_u32()?;
        let stored_sha256 = reader.read_bytes(32)?;

        let payload = &data[HEADER_LEN..];
        let calculated_crc32 = crc32fast::hash(payload);
        if stored_crc32 != calculated_crc32 {
            return Err(UnitError::ChecksumMismatch {
                expected: stored_crc32,
                actual: calculated_crc32,
            });
        }
        let calculated_sha256 = Sha256::digest(payload);
        if stored_sha256.as_slice() != calculated_sha256.as_slice() {
            return Err(UnitError::DigestMismatch {
                stored: hex::encode(&stored_sha256),
                computed: hex::encode(calculated_sha256),
            });
        }

        let name = reader.read_string()?;
        let super_name = reader.read_opt_string()?;
        let interfaces = reader.read_strings()?;
        let modifiers = Modifiers(reader.read_u32()?);
        let annotations = Annotation::decode_list(&mut reader)?;
        let source_file = reader.read_opt_string()?;

        let field_count = reader.read_u32()? as usize;
        let mut fields = Vec::with_capacity(field_count.min(1024));
        for _ in 0..field_count {
            fields.push(FieldDef::decode(&mut reader)?);
        }

        let method_count = reader.read_u32()? as usize;
        let mut methods = Vec::with_capacity(method_count.min(1024));
        for _ in 0..method_count {
            methods.push(MethodDef::decode(&mut reader)?);
        }

        if reader.has_more() {
            return Err(UnitError::TrailingData(data.len() - reader.position()));
        }

        Ok(Self {
            magic,
            version,
            flags,
            name,
            super_name,
            interfaces,
            modifiers,
            annotations,
            source_file,
            fields,
            methods,
        })
    }
}

/// SHA-256 of an encoded unit's payload, read from its header
pub fn unit_digest(bytes: &[u8]) -> Option<[u8; 32]> {
    let stored = bytes.get(16..HEADER_LEN)?;
    let mut digest = [0u8; 32];
    digest.copy_from_slice(stored);
    Some(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::opcode::{FieldRef, MethodRef};

    fn sample_unit() -> CompiledUnit {
        let mut unit = CompiledUnit::new("app.Counter");
        unit.super_name = Some("app.Base".to_string());
        unit.interfaces.push("app.Countable".to_string());
        unit.annotations.push(Annotation::marker("app.Managed").element("scope", "request"));
        unit.fields.push(
            FieldDef::new("count", TypeSig::Int)
                .with_modifiers(Modifiers::PRIVATE)
                .with_generic_signature("Box<i64>"),
        );
        let mut method = MethodDef::new(
            "increment",
            MethodSig::parse("(i64)->i64").unwrap(),
            Modifiers::PUBLIC,
        );
        method.throws.push("app.Overflow".to_string());
        method.code = vec![
            Instr::Load(0),
            Instr::Load(0),
            Instr::GetField(FieldRef::new("app.Counter", "count", TypeSig::Int)),
            Instr::Load(1),
            Instr::Add,
            Instr::PutField(FieldRef::new("app.Counter", "count", TypeSig::Int)),
            Instr::Load(0),
            Instr::InvokeVirtual(MethodRef::new("app.Counter", "current", MethodSig::parse("()->i64").unwrap())),
            Instr::ReturnValue,
        ];
        unit.methods.push(method);
        unit
    }

    #[test]
    fn test_unit_roundtrip() {
        let unit = sample_unit();
        let bytes = unit.encode();
        let decoded = CompiledUnit::decode(&bytes).unwrap();
        assert_eq!(decoded, unit);
    }

    #[test]
    fn test_checksum_validation() {
        let mut bytes = sample_unit().encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            CompiledUnit::decode(&bytes),
            Err(UnitError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = sample_unit().encode();
        bytes[0] = b'X';
        assert!(matches!(CompiledUnit::decode(&bytes), Err(UnitError::InvalidMagic(_))));
    }

    #[test]
    fn test_truncated_unit() {
        let bytes = sample_unit().encode();
        assert!(CompiledUnit::decode(&bytes[..20]).is_err());
    }

    #[test]
    fn test_digest_stable_for_identical_units() {
        let a = sample_unit().encode();
        let b = sample_unit().encode();
        assert_eq!(unit_digest(&a), unit_digest(&b));
        let mut changed = sample_unit();
        changed.fields[0].name = "total".to_string();
        assert_ne!(unit_digest(&a), unit_digest(&changed.encode()));
    }

    #[test]
    fn test_lookup_helpers() {
        let unit = sample_unit();
        assert!(unit.field("count").is_some());
        let key = MemberKey::new("increment", MethodSig::parse("(i64)->i64").unwrap());
        assert_eq!(unit.method(&key).unwrap().param_slots(), 2);
        assert!(unit.static_initializer().is_none());
    }
}
