//! Abstract syntax tree for parsed `.proto` schema files.

/// One parsed schema file: package, imports, and top-level type definitions.
#[derive(Debug, Clone)]
pub struct ProtoFile {
    /// File name as supplied by the host, for diagnostics.
    pub file_name: String,
    pub syntax: Syntax,
    pub package: Option<String>,
    pub imports: Vec<Import>,
    pub messages: Vec<Message>,
    pub enums: Vec<Enum>,
    pub extensions: Vec<Extend>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    Proto2,
    Proto3,
}

#[derive(Debug, Clone)]
pub struct Import {
    pub path: String,
    pub public: bool,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub name: String,
    /// Fields in declaration order (display order is preserved downstream).
    pub fields: Vec<Field>,
    /// Oneof group names; `Field::oneof` indexes into this.
    pub oneofs: Vec<String>,
    pub nested_messages: Vec<Message>,
    pub nested_enums: Vec<Enum>,
    pub extension_ranges: Vec<(i32, i32)>,
    /// Synthesized `*Entry` message desugared from a `map<K, V>` field.
    pub is_map_entry: bool,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub number: i32,
    pub label: Label,
    pub kind: FieldKind,
    /// Explicit `[packed = ...]` option; syntax-dependent default applied at registry build.
    pub packed: Option<bool>,
    /// Raw `[default = ...]` text, kept for display only.
    pub default: Option<String>,
    /// Index into the enclosing message's `oneofs`.
    pub oneof: Option<usize>,
    /// Declared with proto2 `group` syntax; encoded with start/end group wire types.
    pub is_group: bool,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Optional,
    Required,
    Repeated,
}

/// Parse-time field type: a scalar, or a name resolved later by the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(ScalarType),
    Named(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Double,
    Float,
    Int32,
    Int64,
    UInt32,
    UInt64,
    SInt32,
    SInt64,
    Fixed32,
    Fixed64,
    SFixed32,
    SFixed64,
    Bool,
    String,
    Bytes,
}

impl ScalarType {
    pub fn from_name(name: &str) -> Option<ScalarType> {
        Some(match name {
            "double" => ScalarType::Double,
            "float" => ScalarType::Float,
            "int32" => ScalarType::Int32,
            "int64" => ScalarType::Int64,
            "uint32" => ScalarType::UInt32,
            "uint64" => ScalarType::UInt64,
            "sint32" => ScalarType::SInt32,
            "sint64" => ScalarType::SInt64,
            "fixed32" => ScalarType::Fixed32,
            "fixed64" => ScalarType::Fixed64,
            "sfixed32" => ScalarType::SFixed32,
            "sfixed64" => ScalarType::SFixed64,
            "bool" => ScalarType::Bool,
            "string" => ScalarType::String,
            "bytes" => ScalarType::Bytes,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScalarType::Double => "double",
            ScalarType::Float => "float",
            ScalarType::Int32 => "int32",
            ScalarType::Int64 => "int64",
            ScalarType::UInt32 => "uint32",
            ScalarType::UInt64 => "uint64",
            ScalarType::SInt32 => "sint32",
            ScalarType::SInt64 => "sint64",
            ScalarType::Fixed32 => "fixed32",
            ScalarType::Fixed64 => "fixed64",
            ScalarType::SFixed32 => "sfixed32",
            ScalarType::SFixed64 => "sfixed64",
            ScalarType::Bool => "bool",
            ScalarType::String => "string",
            ScalarType::Bytes => "bytes",
        }
    }

    /// Whether a repeated field of this type may use the packed encoding.
    pub fn packable(&self) -> bool {
        !matches!(self, ScalarType::String | ScalarType::Bytes)
    }
}

#[derive(Debug, Clone)]
pub struct Enum {
    pub name: String,
    /// Declaration order; duplicate numbers are aliases and are permitted.
    pub values: Vec<(String, i64)>,
}

/// An `extend Foo { ... }` block: extra fields for another message's extension ranges.
#[derive(Debug, Clone)]
pub struct Extend {
    /// Extendee type name as written (resolved by the registry).
    pub extendee: String,
    pub fields: Vec<Field>,
    /// Dotted path of the enclosing message when the block was declared nested,
    /// relative to the file's package. Relative extendee names resolve from here.
    pub scope: Option<String>,
}
