//! Schema registry: merges all loaded `.proto` files into one namespace keyed
//! by fully-qualified type name.
//!
//! Built once at load time, then read-only; dissection only ever borrows it, so
//! it can be shared across threads without locking. Resolution problems are
//! collected as diagnostics rather than aborting the build: a field whose type
//! cannot be resolved is marked unresolved and decoded later as raw/unknown,
//! and a file that fails to parse never blocks loading of the rest.

use crate::ast::{Enum, Field, FieldKind, Label, Message, ProtoFile, ScalarType, Syntax};
use crate::parser::{parse_file, ParseError};
use std::collections::HashMap;
use std::path::Path;

/// Resolved field type: the closed dispatch variant used by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedKind {
    Scalar(ScalarType),
    /// Fully-qualified message name; looked up in the registry when recursing.
    Message(String),
    /// Fully-qualified enum name.
    Enum(String),
    /// Reference that did not resolve; decoded as raw/unknown.
    Unresolved(String),
}

#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub number: i32,
    pub label: Label,
    pub kind: ResolvedKind,
    /// Effective packedness (explicit option, or the syntax default).
    pub packed: bool,
    /// Name of the oneof group this field belongs to.
    pub oneof: Option<String>,
    pub default: Option<String>,
    pub is_group: bool,
    pub is_extension: bool,
}

impl FieldDescriptor {
    /// Declared type as shown to the host.
    pub fn type_display(&self) -> String {
        match &self.kind {
            ResolvedKind::Scalar(s) => s.name().to_string(),
            ResolvedKind::Message(n) | ResolvedKind::Enum(n) => n.clone(),
            ResolvedKind::Unresolved(n) => format!("{} (unresolved)", n),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MessageDescriptor {
    pub full_name: String,
    /// Declaration order, preserved for display.
    pub fields: Vec<FieldDescriptor>,
    by_number: HashMap<i32, usize>,
    pub oneofs: Vec<String>,
    pub extension_ranges: Vec<(i32, i32)>,
    pub is_map_entry: bool,
}

impl MessageDescriptor {
    pub fn field_by_number(&self, number: i32) -> Option<&FieldDescriptor> {
        self.by_number.get(&number).map(|&i| &self.fields[i])
    }

    pub fn in_extension_range(&self, number: i32) -> bool {
        self.extension_ranges
            .iter()
            .any(|&(lo, hi)| number >= lo && number <= hi)
    }
}

#[derive(Debug, Clone)]
pub struct EnumDescriptor {
    pub full_name: String,
    /// Declaration order; aliases permitted, first name wins for display.
    pub values: Vec<(String, i64)>,
}

impl EnumDescriptor {
    pub fn name_of(&self, value: i64) -> Option<&str> {
        self.values
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(n, _)| n.as_str())
    }
}

/// A registry entry: either kind of concrete type definition.
#[derive(Debug, Clone, Copy)]
pub enum TypeEntry<'a> {
    Message(&'a MessageDescriptor),
    Enum(&'a EnumDescriptor),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("{location}: unresolved type {symbol:?}")]
    UnresolvedType { symbol: String, location: String },
    #[error("duplicate type name {0:?}")]
    DuplicateType(String),
    #[error("duplicate field number {number} in {message}")]
    DuplicateFieldNumber { message: String, number: i32 },
}

/// Load-time problem for one schema file; reported once, never per packet.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchemaDiagnostic {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}

/// Schema text plus the name used in diagnostics. File enumeration is the
/// host's job; the core only ever sees resolved sources.
#[derive(Debug, Clone)]
pub struct SchemaSource {
    pub name: String,
    pub text: String,
}

impl SchemaSource {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> SchemaSource {
        SchemaSource {
            name: name.into(),
            text: text.into(),
        }
    }

    /// Read one host-resolved path.
    pub fn read(path: impl AsRef<Path>) -> std::io::Result<SchemaSource> {
        let path = path.as_ref();
        Ok(SchemaSource {
            name: path.display().to_string(),
            text: std::fs::read_to_string(path)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeclKind {
    Message,
    Enum,
}

#[derive(Debug, Default)]
pub struct SchemaRegistry {
    messages: HashMap<String, MessageDescriptor>,
    enums: HashMap<String, EnumDescriptor>,
    /// Extension fields from `extend` blocks, keyed by extendee FQN.
    extensions: HashMap<String, Vec<FieldDescriptor>>,
}

impl SchemaRegistry {
    /// Parse and build in one step. Bad files contribute diagnostics, not
    /// failures; the registry holds everything that did load.
    pub fn load(sources: &[SchemaSource]) -> (SchemaRegistry, Vec<SchemaDiagnostic>) {
        let mut files = Vec::new();
        let mut diagnostics = Vec::new();
        for src in sources {
            match parse_file(&src.name, &src.text) {
                Ok(f) => files.push(f),
                Err(e) => diagnostics.push(SchemaDiagnostic::Parse(e)),
            }
        }
        let (registry, mut build_diags) = SchemaRegistry::build(&files);
        diagnostics.append(&mut build_diags);
        (registry, diagnostics)
    }

    /// Two-pass build over parsed files: collect every declared fully-qualified
    /// name, then resolve every type reference against it.
    pub fn build(files: &[ProtoFile]) -> (SchemaRegistry, Vec<SchemaDiagnostic>) {
        let mut diagnostics = Vec::new();

        // Pass 1: declared names. First declaration wins on duplicates.
        let mut declared: HashMap<String, DeclKind> = HashMap::new();
        for file in files {
            let package = file.package.as_deref().unwrap_or("");
            for msg in &file.messages {
                collect_decls(package, msg, &mut declared, &mut diagnostics);
            }
            for en in &file.enums {
                declare(
                    join(package, &en.name),
                    DeclKind::Enum,
                    &mut declared,
                    &mut diagnostics,
                );
            }
        }

        // Pass 2: resolve references and build descriptors.
        let mut registry = SchemaRegistry::default();
        for file in files {
            let package = file.package.as_deref().unwrap_or("");
            for msg in &file.messages {
                registry.add_message(file, package, msg, &declared, &mut diagnostics);
            }
            for en in &file.enums {
                let full_name = join(package, &en.name);
                if !registry.enums.contains_key(&full_name) {
                    registry.enums.insert(
                        full_name.clone(),
                        EnumDescriptor {
                            full_name,
                            values: en.values.clone(),
                        },
                    );
                }
            }
            for ext in &file.extensions {
                // Blocks hoisted out of a message resolve from their declared scope.
                let scope = match &ext.scope {
                    Some(path) => join(package, path),
                    None => package.to_string(),
                };
                let location = format!("{}: extend {}", file.file_name, ext.extendee);
                let extendee = match resolve(&ext.extendee, &scope, &declared) {
                    Some((fqn, DeclKind::Message)) => fqn,
                    _ => {
                        diagnostics.push(
                            ResolutionError::UnresolvedType {
                                symbol: ext.extendee.clone(),
                                location,
                            }
                            .into(),
                        );
                        continue;
                    }
                };
                let bucket = registry.extensions.entry(extendee).or_default();
                for field in &ext.fields {
                    let mut desc = resolve_field(
                        file, &scope, field, None, file.syntax, &declared, &mut diagnostics,
                    );
                    desc.is_extension = true;
                    if bucket.iter().all(|f| f.number != field.number) {
                        bucket.push(desc);
                    }
                }
            }
        }
        (registry, diagnostics)
    }

    /// Exact lookup by fully-qualified name (leading dot tolerated).
    pub fn lookup(&self, full_name: &str) -> Option<TypeEntry<'_>> {
        let key = full_name.trim_start_matches('.');
        if let Some(m) = self.messages.get(key) {
            return Some(TypeEntry::Message(m));
        }
        self.enums.get(key).map(TypeEntry::Enum)
    }

    pub fn message(&self, full_name: &str) -> Option<&MessageDescriptor> {
        self.messages.get(full_name.trim_start_matches('.'))
    }

    pub fn enum_type(&self, full_name: &str) -> Option<&EnumDescriptor> {
        self.enums.get(full_name.trim_start_matches('.'))
    }

    /// Root-type convenience for hosts: exact name, else a unique suffix match
    /// (`Person` finds `tutorial.Person` when unambiguous).
    pub fn find_message(&self, name: &str) -> Option<&MessageDescriptor> {
        let key = name.trim_start_matches('.');
        if let Some(m) = self.messages.get(key) {
            return Some(m);
        }
        let suffix = format!(".{}", key);
        let mut hits = self.messages.values().filter(|m| m.full_name.ends_with(&suffix));
        match (hits.next(), hits.next()) {
            (Some(m), None) => Some(m),
            _ => None,
        }
    }

    /// Extension field declared for `extendee` with this number, if any.
    pub fn extension(&self, extendee: &str, number: i32) -> Option<&FieldDescriptor> {
        self.extensions
            .get(extendee.trim_start_matches('.'))
            .and_then(|fields| fields.iter().find(|f| f.number == number))
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.enums.is_empty()
    }

    /// Sorted message names, for host-side listings.
    pub fn message_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.messages.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn add_message(
        &mut self,
        file: &ProtoFile,
        scope: &str,
        msg: &Message,
        declared: &HashMap<String, DeclKind>,
        diagnostics: &mut Vec<SchemaDiagnostic>,
    ) {
        let full_name = join(scope, &msg.name);
        let mut fields = Vec::new();
        let mut by_number = HashMap::new();
        for field in &msg.fields {
            if by_number.contains_key(&field.number) {
                diagnostics.push(
                    ResolutionError::DuplicateFieldNumber {
                        message: full_name.clone(),
                        number: field.number,
                    }
                    .into(),
                );
                continue;
            }
            let oneof = field.oneof.and_then(|i| msg.oneofs.get(i)).cloned();
            let desc = resolve_field(
                file, &full_name, field, oneof, file.syntax, declared, diagnostics,
            );
            by_number.insert(field.number, fields.len());
            fields.push(desc);
        }
        for nested in &msg.nested_messages {
            self.add_message(file, &full_name, nested, declared, diagnostics);
        }
        for en in &msg.nested_enums {
            let en_name = join(&full_name, &en.name);
            if !self.enums.contains_key(&en_name) {
                self.enums.insert(
                    en_name.clone(),
                    EnumDescriptor {
                        full_name: en_name,
                        values: en.values.clone(),
                    },
                );
            }
        }
        if !self.messages.contains_key(&full_name) {
            self.messages.insert(
                full_name.clone(),
                MessageDescriptor {
                    full_name,
                    fields,
                    by_number,
                    oneofs: msg.oneofs.clone(),
                    extension_ranges: msg.extension_ranges.clone(),
                    is_map_entry: msg.is_map_entry,
                },
            );
        }
    }
}

fn join(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", scope, name)
    }
}

fn declare(
    full_name: String,
    kind: DeclKind,
    declared: &mut HashMap<String, DeclKind>,
    diagnostics: &mut Vec<SchemaDiagnostic>,
) {
    if declared.contains_key(&full_name) {
        diagnostics.push(ResolutionError::DuplicateType(full_name).into());
    } else {
        declared.insert(full_name, kind);
    }
}

fn collect_decls(
    scope: &str,
    msg: &Message,
    declared: &mut HashMap<String, DeclKind>,
    diagnostics: &mut Vec<SchemaDiagnostic>,
) {
    let full_name = join(scope, &msg.name);
    for nested in &msg.nested_messages {
        collect_decls(&full_name, nested, declared, diagnostics);
    }
    for en in &msg.nested_enums {
        declare(join(&full_name, &en.name), DeclKind::Enum, declared, diagnostics);
    }
    declare(full_name, DeclKind::Message, declared, diagnostics);
}

/// Scope walk, innermost first: the enclosing type path, then the declaring
/// file's package prefixes, then the merged global namespace. A leading dot
/// makes the reference absolute.
fn resolve(
    reference: &str,
    scope: &str,
    declared: &HashMap<String, DeclKind>,
) -> Option<(String, DeclKind)> {
    if let Some(absolute) = reference.strip_prefix('.') {
        return declared.get(absolute).map(|k| (absolute.to_string(), *k));
    }
    let mut scope = scope;
    loop {
        let candidate = join(scope, reference);
        if let Some(kind) = declared.get(&candidate) {
            return Some((candidate, *kind));
        }
        match scope.rfind('.') {
            Some(i) => scope = &scope[..i],
            None if !scope.is_empty() => scope = "",
            None => return None,
        }
    }
}

fn resolve_field(
    file: &ProtoFile,
    scope: &str,
    field: &Field,
    oneof: Option<String>,
    syntax: Syntax,
    declared: &HashMap<String, DeclKind>,
    diagnostics: &mut Vec<SchemaDiagnostic>,
) -> FieldDescriptor {
    let kind = match &field.kind {
        FieldKind::Scalar(s) => ResolvedKind::Scalar(*s),
        FieldKind::Named(name) => match resolve(name, scope, declared) {
            Some((fqn, DeclKind::Message)) => ResolvedKind::Message(fqn),
            Some((fqn, DeclKind::Enum)) => ResolvedKind::Enum(fqn),
            None => {
                diagnostics.push(
                    ResolutionError::UnresolvedType {
                        symbol: name.clone(),
                        location: format!(
                            "{}:{}:{}: {}.{}",
                            file.file_name, field.line, field.column, scope, field.name
                        ),
                    }
                    .into(),
                );
                ResolvedKind::Unresolved(name.clone())
            }
        },
    };
    // proto3 packs repeated packable scalars (and enums) by default.
    let packed = match field.packed {
        Some(explicit) => explicit,
        None if syntax == Syntax::Proto3 && field.label == Label::Repeated => match &kind {
            ResolvedKind::Scalar(s) => s.packable(),
            ResolvedKind::Enum(_) => true,
            _ => false,
        },
        None => false,
    };
    FieldDescriptor {
        name: field.name.clone(),
        number: field.number,
        label: field.label,
        kind,
        packed,
        oneof,
        default: field.default.clone(),
        is_group: field.is_group,
        is_extension: false,
    }
}
