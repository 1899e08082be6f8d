//! # protodissect — Schema-Driven Protobuf Wire Dissector
//!
//! Decodes Protocol Buffers wire-format payloads captured off the network,
//! guided by `.proto` schema files parsed with a PEST grammar. Decoding is
//! tolerant by construction: unknown fields are kept, malformed spans degrade
//! into flagged nodes instead of aborting, and payloads with no schema at all
//! are decoded from wire-type self-description alone.
//!
//! ## Pipeline
//!
//! - **Parse**: `.proto` source → [`ast::ProtoFile`] (syntax errors carry
//!   file/line/column)
//! - **Resolve**: files → [`SchemaRegistry`] mapping fully-qualified names to
//!   message/enum descriptors, with type references resolved across files
//! - **Dissect**: payload bytes + optional root message name →
//!   [`DecodedTree`], every node annotated with its byte span and status
//! - **Dump**: decoded tree → indented text
//!
//! ## Usage
//!
//! ```no_run
//! use protodissect::{Dissector, SchemaRegistry, SchemaSource};
//!
//! let sources = vec![SchemaSource::new("app.proto", "syntax = \"proto3\"; message Ping { uint32 seq = 1; }")];
//! let (registry, diagnostics) = SchemaRegistry::load(&sources);
//! for d in &diagnostics {
//!     eprintln!("{}", d);
//! }
//! let dissector = Dissector::new(&registry);
//! let tree = dissector.dissect(&[0x08, 0x2a], Some("Ping"));
//! println!("{}", protodissect::dump::tree_to_dump(&tree));
//! ```

pub mod ast;
pub mod dissect;
pub mod dump;
pub mod parser;
pub mod registry;
pub mod value;
pub mod wire;

pub use dissect::{Dissector, DEFAULT_MAX_DEPTH};
pub use dump::{field_summary_line, tree_to_dump};
pub use parser::{parse_file, ParseError};
pub use registry::{
    EnumDescriptor, FieldDescriptor, MessageDescriptor, ResolvedKind, SchemaDiagnostic,
    SchemaRegistry, SchemaSource,
};
pub use value::{DecodedField, DecodedTree, DecodedValue, FieldStatus};
pub use wire::{Cursor, WireError, WireType};
