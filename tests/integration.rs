//! End-to-end tests: schema files on disk, registry load, dissection, dump text.

use protodissect::dump::{field_summary_line, tree_to_dump};
use protodissect::registry::{SchemaRegistry, SchemaSource};
use protodissect::value::FieldStatus;
use protodissect::Dissector;
use std::fs;

fn varint(mut v: u64) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

fn varint_field(number: i32, v: u64) -> Vec<u8> {
    let mut out = varint(((number as u64) << 3) | 0);
    out.extend(varint(v));
    out
}

fn len_field(number: i32, payload: &[u8]) -> Vec<u8> {
    let mut out = varint(((number as u64) << 3) | 2);
    out.extend(varint(payload.len() as u64));
    out.extend_from_slice(payload);
    out
}

const COMMON_PROTO: &str = r#"
syntax = "proto3";
package common;
message Timestamp {
  int64 seconds = 1;
  int32 nanos = 2;
}
"#;

const TELEMETRY_PROTO: &str = r#"
syntax = "proto3";
package telemetry;
import "common.proto";

enum Severity {
  INFO = 0;
  WARN = 1;
  ERROR = 2;
}

message Event {
  common.Timestamp at = 1;
  Severity severity = 2;
  string message = 3;
  repeated uint32 tags = 4;
}
"#;

#[test]
fn test_load_schema_directory_and_dissect() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("common.proto"), COMMON_PROTO).expect("write");
    fs::write(dir.path().join("telemetry.proto"), TELEMETRY_PROTO).expect("write");

    let sources = vec![
        SchemaSource::read(dir.path().join("common.proto")).expect("read"),
        SchemaSource::read(dir.path().join("telemetry.proto")).expect("read"),
    ];
    let (registry, diagnostics) = SchemaRegistry::load(&sources);
    assert!(diagnostics.is_empty(), "{:?}", diagnostics);

    let mut at = varint_field(1, 1_700_000_000);
    at.extend(varint_field(2, 500));
    let mut payload = len_field(1, &at);
    payload.extend(varint_field(2, 2));
    payload.extend(len_field(3, b"disk full"));
    payload.extend(len_field(4, &[0x01, 0x02]));

    let tree = Dissector::new(&registry).dissect(&payload, Some("telemetry.Event"));
    assert!(tree.truncated.is_none());

    let at = tree.field(1).expect("at");
    assert_eq!(at.name.as_deref(), Some("at"));
    assert_eq!(at.type_name.as_deref(), Some("common.Timestamp"));
    let at_tree = at.value.as_message().expect("timestamp");
    assert_eq!(at_tree.field(1).expect("seconds").value.as_i64(), Some(1_700_000_000));
    assert_eq!(at_tree.field(2).expect("nanos").value.as_i64(), Some(500));

    let severity = tree.field(2).expect("severity");
    assert_eq!(severity.value.as_i64(), Some(2));

    assert_eq!(tree.field(3).expect("message").value.as_str(), Some("disk full"));
    let tags = tree.field(4).expect("tags").value.as_packed().expect("packed");
    assert_eq!(tags.len(), 2);
}

#[test]
fn test_broken_file_reports_and_rest_loads() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("common.proto"), COMMON_PROTO).expect("write");
    fs::write(dir.path().join("broken.proto"), "message Nope {").expect("write");

    let sources = vec![
        SchemaSource::read(dir.path().join("common.proto")).expect("read"),
        SchemaSource::read(dir.path().join("broken.proto")).expect("read"),
    ];
    let (registry, diagnostics) = SchemaRegistry::load(&sources);
    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics[0].to_string().contains("broken.proto"));
    assert!(registry.message("common.Timestamp").is_some());
}

#[test]
fn test_dump_text_shape() {
    let (registry, diagnostics) = SchemaRegistry::load(&[SchemaSource::new(
        "app.proto",
        r#"
syntax = "proto3";
message Ping {
  uint32 seq = 1;
  string host = 2;
}
"#,
    )]);
    assert!(diagnostics.is_empty());

    let mut payload = varint_field(1, 7);
    payload.extend(len_field(2, b"node-3"));
    payload.extend(varint_field(9, 1)); // not in the schema

    let tree = Dissector::new(&registry).dissect(&payload, Some("Ping"));
    let text = tree_to_dump(&tree);
    assert!(text.contains("seq (#1): uint32 = 7 @0+2"), "{}", text);
    assert!(text.contains("host (#2): string = \"node-3\""), "{}", text);
    assert!(text.contains("#9") && text.contains("<unknown>"), "{}", text);

    let first = field_summary_line(&tree.fields[0]);
    assert_eq!(first, "seq (#1): uint32 = 7 @0+2");
}

#[test]
fn test_dump_marks_malformed_and_truncated() {
    let registry = SchemaRegistry::default();
    // one good field, one with a bad length, then a broken key
    let mut payload = varint_field(1, 3);
    payload.extend([0x12, 0x7f]); // field 2 claims 127 bytes
    let tree = Dissector::new(&registry).dissect(&payload, None);
    let text = tree_to_dump(&tree);
    assert!(text.contains("<malformed:"), "{}", text);

    let tree = Dissector::new(&registry).dissect(&[0x08, 0x01, 0x80], None);
    let text = tree_to_dump(&tree);
    assert!(text.contains("<truncated:"), "{}", text);
}

#[test]
fn test_schema_free_fixed_dumped_both_ways() {
    let registry = SchemaRegistry::default();
    let mut payload = varint(((1u64) << 3) | 5);
    payload.extend(1.5f32.to_bits().to_le_bytes());
    let tree = Dissector::new(&registry).dissect(&payload, None);
    let text = tree_to_dump(&tree);
    assert!(text.contains("1.5"), "{}", text);
    assert!(text.contains(&1.5f32.to_bits().to_string()), "{}", text);
}

#[test]
fn test_summary_classification_survives_nested_faults() {
    let (registry, _) = SchemaRegistry::load(&[SchemaSource::new(
        "app.proto",
        "syntax = \"proto3\"; message Box { Box inner = 1; uint32 x = 2; }",
    )]);
    // nested message whose body ends in a truncated varint
    let inner = [0x10u8, 0x80]; // field 2, value missing
    let payload = len_field(1, &inner);
    let tree = Dissector::new(&registry).dissect(&payload, Some("Box"));
    let outer = tree.field(1).expect("inner");
    assert_eq!(outer.status, FieldStatus::Ok);
    let sub = outer.value.as_message().expect("sub");
    assert!(matches!(sub.fields[0].status, FieldStatus::Malformed(_)));
}
