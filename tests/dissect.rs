//! Engine tests: schema-guided and schema-free decoding, fault containment.

use protodissect::registry::{SchemaRegistry, SchemaSource};
use protodissect::value::{DecodedTree, DecodedValue, FieldStatus};
use protodissect::wire::WireType;
use protodissect::Dissector;

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

fn key(number: i32, wire: u8) -> Vec<u8> {
    varint(((number as u64) << 3) | u64::from(wire))
}

fn varint_field(number: i32, v: u64) -> Vec<u8> {
    let mut out = key(number, 0);
    out.extend(varint(v));
    out
}

fn len_field(number: i32, payload: &[u8]) -> Vec<u8> {
    let mut out = key(number, 2);
    out.extend(varint(payload.len() as u64));
    out.extend_from_slice(payload);
    out
}

fn registry_for(text: &str) -> SchemaRegistry {
    let (registry, diagnostics) =
        SchemaRegistry::load(&[SchemaSource::new("test.proto", text)]);
    assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    registry
}

fn dissect_free(bytes: &[u8]) -> DecodedTree {
    let registry = SchemaRegistry::default();
    Dissector::new(&registry).dissect(bytes, None)
}

#[test]
fn test_single_varint_field_without_schema() {
    let tree = dissect_free(&[0x08, 0x2a]);
    assert_eq!(tree.fields.len(), 1);
    let f = &tree.fields[0];
    assert_eq!(f.number, 1);
    assert_eq!(f.wire_type, WireType::Varint);
    assert_eq!(f.offset, 0);
    assert_eq!(f.len, 2);
    assert_eq!(f.value, DecodedValue::UInt(42));
    assert_eq!(f.status, FieldStatus::UnknownField);
    assert!(tree.truncated.is_none());
}

#[test]
fn test_empty_buffer_is_empty_tree() {
    let tree = dissect_free(&[]);
    assert!(tree.is_empty());
}

#[test]
fn test_truncated_key_sets_tree_truncated() {
    let tree = dissect_free(&[0x80]);
    assert!(tree.fields.is_empty());
    assert!(tree.truncated.is_some());
}

#[test]
fn test_truncated_value_is_contained_to_field() {
    // field 1 decodes, field 2's varint value is missing
    let tree = dissect_free(&[0x08, 0x2a, 0x10]);
    assert_eq!(tree.fields.len(), 2);
    // No schema: the intact field still decodes, flagged unknown.
    assert_eq!(tree.fields[0].status, FieldStatus::UnknownField);
    assert_eq!(tree.fields[0].value, DecodedValue::UInt(42));
    assert_eq!(tree.fields[1].number, 2);
    assert!(matches!(tree.fields[1].status, FieldStatus::Malformed(_)));
    assert!(tree.truncated.is_none());
}

#[test]
fn test_overlong_varint_is_malformed() {
    let mut bytes = vec![0x08];
    bytes.extend(std::iter::repeat(0x80).take(10));
    bytes.push(0x01);
    let tree = dissect_free(&bytes);
    assert!(matches!(tree.fields[0].status, FieldStatus::Malformed(_)));
}

#[test]
fn test_length_exceeding_remaining_is_malformed() {
    let bytes = [0x0a, 0x64, 0x01, 0x02]; // declares 100 bytes, 2 present
    let tree = dissect_free(&bytes);
    assert_eq!(tree.fields.len(), 1);
    let f = &tree.fields[0];
    match &f.status {
        FieldStatus::Malformed(reason) => assert!(reason.contains("exceeds"), "{}", reason),
        other => panic!("expected malformed, got {:?}", other),
    }
    // the raw remainder is kept for inspection
    assert_eq!(f.value, DecodedValue::Bytes(vec![0x01, 0x02]));
}

#[test]
fn test_invalid_wire_type_truncates_level() {
    let tree = dissect_free(&[0x08, 0x2a, 0x0e]); // tag 6 is unassigned
    assert_eq!(tree.fields.len(), 1);
    let reason = tree.truncated.expect("truncated");
    assert!(reason.contains("invalid wire type"), "{}", reason);
}

#[test]
fn test_field_number_zero_truncates_level() {
    let tree = dissect_free(&[0x02]);
    assert!(tree.fields.is_empty());
    let reason = tree.truncated.expect("truncated");
    assert!(reason.contains("invalid field number"), "{}", reason);
}

#[test]
fn test_truncated_fixed_widths() {
    let tree = dissect_free(&[0x09, 0x01, 0x02, 0x03, 0x04]); // fixed64 with 4 bytes
    assert!(matches!(tree.fields[0].status, FieldStatus::Malformed(_)));
    let tree = dissect_free(&[0x0d, 0x01]); // fixed32 with 1 byte
    assert!(matches!(tree.fields[0].status, FieldStatus::Malformed(_)));
}

#[test]
fn test_schema_free_fixed_values_kept_raw() {
    let mut bytes = key(1, 5);
    bytes.extend(1.5f32.to_bits().to_le_bytes());
    bytes.extend(key(2, 1));
    bytes.extend(2.5f64.to_bits().to_le_bytes());
    let tree = dissect_free(&bytes);
    assert_eq!(tree.fields[0].value, DecodedValue::Fixed32(1.5f32.to_bits()));
    assert_eq!(tree.fields[1].value, DecodedValue::Fixed64(2.5f64.to_bits()));
}

#[test]
fn test_scalar_interpretation_with_schema() {
    let registry = registry_for(
        r#"
syntax = "proto3";
message Scalars {
  sint32 a = 1;
  sint64 b = 2;
  bool c = 3;
  int32 d = 4;
  float e = 5;
  double f = 6;
  sfixed32 g = 7;
}
"#,
    );
    let mut bytes = varint_field(1, 1); // zigzag -1
    bytes.extend(varint_field(2, 4)); // zigzag 2
    bytes.extend(varint_field(3, 1));
    bytes.extend(varint_field(4, u64::MAX)); // int32 -1 on the wire
    bytes.extend(key(5, 5));
    bytes.extend(1.5f32.to_bits().to_le_bytes());
    bytes.extend(key(6, 1));
    bytes.extend((-2.5f64).to_bits().to_le_bytes());
    bytes.extend(key(7, 5));
    bytes.extend((-7i32 as u32).to_le_bytes());

    let tree = Dissector::new(&registry).dissect(&bytes, Some("Scalars"));
    assert_eq!(tree.field(1).expect("a").value, DecodedValue::Int(-1));
    assert_eq!(tree.field(2).expect("b").value, DecodedValue::Int(2));
    assert_eq!(tree.field(3).expect("c").value, DecodedValue::Bool(true));
    assert_eq!(tree.field(4).expect("d").value, DecodedValue::Int(-1));
    assert_eq!(tree.field(5).expect("e").value, DecodedValue::Float(1.5));
    assert_eq!(tree.field(6).expect("f").value, DecodedValue::Double(-2.5));
    assert_eq!(tree.field(7).expect("g").value, DecodedValue::Int(-7));
    for f in &tree.fields {
        assert_eq!(f.status, FieldStatus::Ok);
        assert!(f.name.is_some());
    }
}

#[test]
fn test_enum_names_resolved() {
    let registry = registry_for(
        r#"
syntax = "proto3";
enum Color { RED = 0; GREEN = 1; }
message Pixel { Color c = 1; }
"#,
    );
    let dissector = Dissector::new(&registry);
    let tree = dissector.dissect(&varint_field(1, 1), Some("Pixel"));
    assert_eq!(
        tree.field(1).expect("c").value,
        DecodedValue::Enum {
            number: 1,
            name: Some("GREEN".to_string())
        }
    );
    // numbers outside the declared set keep the raw number
    let tree = dissector.dissect(&varint_field(1, 9), Some("Pixel"));
    assert_eq!(
        tree.field(1).expect("c").value,
        DecodedValue::Enum { number: 9, name: None }
    );
}

#[test]
fn test_nested_message_offsets() {
    let registry = registry_for(
        r#"
syntax = "proto3";
message Inner { uint32 x = 1; }
message Outer { Inner i = 1; }
"#,
    );
    let bytes = len_field(1, &varint_field(1, 5));
    let tree = Dissector::new(&registry).dissect(&bytes, Some("Outer"));
    let outer = tree.field(1).expect("i");
    assert_eq!(outer.offset, 0);
    assert_eq!(outer.len, 4);
    assert_eq!(outer.name.as_deref(), Some("i"));
    let inner = outer.value.as_message().expect("inner tree");
    assert_eq!(inner.fields[0].offset, 2);
    assert_eq!(inner.fields[0].len, 2);
    assert_eq!(inner.fields[0].value, DecodedValue::UInt(5));
    assert_eq!(inner.fields[0].name.as_deref(), Some("x"));
}

#[test]
fn test_unknown_field_between_known_fields() {
    let registry = registry_for(
        r#"
syntax = "proto3";
message M { uint32 a = 1; uint32 b = 3; }
"#,
    );
    let mut bytes = varint_field(1, 1);
    bytes.extend(varint_field(2, 2));
    bytes.extend(varint_field(3, 3));
    let tree = Dissector::new(&registry).dissect(&bytes, Some("M"));
    assert_eq!(tree.fields.len(), 3);
    assert_eq!(tree.fields[0].status, FieldStatus::Ok);
    assert_eq!(tree.fields[1].status, FieldStatus::UnknownField);
    assert!(tree.fields[1].name.is_none());
    assert_eq!(tree.fields[2].status, FieldStatus::Ok);
}

#[test]
fn test_packed_varints() {
    let registry = registry_for(
        r#"
syntax = "proto3";
message P { repeated int32 nums = 1; }
"#,
    );
    let bytes = len_field(1, &[0x01, 0x02, 0x03]);
    let tree = Dissector::new(&registry).dissect(&bytes, Some("P"));
    assert_eq!(
        tree.field(1).expect("nums").value,
        DecodedValue::Packed(vec![
            DecodedValue::Int(1),
            DecodedValue::Int(2),
            DecodedValue::Int(3)
        ])
    );
}

#[test]
fn test_packed_fixed32_truncated_mid_element() {
    let registry = registry_for(
        r#"
syntax = "proto3";
message P { repeated fixed32 v = 1; }
"#,
    );
    let bytes = len_field(1, &[0x01, 0x00, 0x00, 0x00, 0x02, 0x00]);
    let tree = Dissector::new(&registry).dissect(&bytes, Some("P"));
    let f = tree.field(1).expect("v");
    assert_eq!(f.value, DecodedValue::Packed(vec![DecodedValue::UInt(1)]));
    assert!(matches!(f.status, FieldStatus::Malformed(_)));
}

#[test]
fn test_oneof_duplicates_both_kept() {
    let registry = registry_for(
        r#"
syntax = "proto3";
message Choice {
  oneof kind {
    uint32 id = 1;
    string name = 2;
  }
}
"#,
    );
    let mut bytes = varint_field(1, 7);
    bytes.extend(len_field(2, b"hi"));
    let tree = Dissector::new(&registry).dissect(&bytes, Some("Choice"));
    assert_eq!(tree.fields.len(), 2);
    assert_eq!(tree.fields[0].oneof.as_deref(), Some("kind"));
    assert_eq!(tree.fields[1].oneof.as_deref(), Some("kind"));
    assert_eq!(tree.fields[1].value, DecodedValue::Str("hi".to_string()));
}

#[test]
fn test_map_entries_with_duplicate_keys_kept() {
    let registry = registry_for(
        r#"
syntax = "proto3";
message M { map<uint32, string> attrs = 1; }
"#,
    );
    let mut entry_a = varint_field(1, 9);
    entry_a.extend(len_field(2, b"a"));
    let mut entry_b = varint_field(1, 9);
    entry_b.extend(len_field(2, b"b"));
    let mut bytes = len_field(1, &entry_a);
    bytes.extend(len_field(1, &entry_b));

    let tree = Dissector::new(&registry).dissect(&bytes, Some("M"));
    let entries: Vec<_> = tree.fields_with_number(1).collect();
    assert_eq!(entries.len(), 2);
    for (entry, text) in entries.iter().zip(["a", "b"]) {
        let sub = entry.value.as_message().expect("entry");
        assert_eq!(sub.field(1).expect("key").value, DecodedValue::UInt(9));
        assert_eq!(sub.field(1).expect("key").name.as_deref(), Some("key"));
        assert_eq!(
            sub.field(2).expect("value").value,
            DecodedValue::Str(text.to_string())
        );
    }
}

#[test]
fn test_depth_bound_flags_without_failing() {
    let registry = registry_for(
        r#"
syntax = "proto3";
message R { R next = 1; }
"#,
    );
    // three levels of nesting against a bound of two
    let bytes = len_field(1, &len_field(1, &len_field(1, &[])));
    let tree = Dissector::with_max_depth(&registry, 2).dissect(&bytes, Some("R"));
    let l1 = tree.field(1).expect("level 1");
    assert_eq!(l1.status, FieldStatus::Ok);
    let l2 = l1.value.as_message().expect("tree").field(1).expect("level 2");
    assert_eq!(l2.status, FieldStatus::Ok);
    let l3 = l2.value.as_message().expect("tree").field(1).expect("level 3");
    assert_eq!(l3.status, FieldStatus::MaxDepthExceeded);
    assert!(matches!(l3.value, DecodedValue::Bytes(_)));
}

#[test]
fn test_groups_decode_and_unterminated_group_flagged() {
    let registry = registry_for(
        r#"
syntax = "proto2";
message Outer {
  optional group Result = 3 {
    optional string url = 1;
  }
}
"#,
    );
    let mut bytes = key(3, 3);
    bytes.extend(len_field(1, b"x"));
    bytes.extend(key(3, 4));
    let dissector = Dissector::new(&registry);
    let tree = dissector.dissect(&bytes, Some("Outer"));
    let group = tree.field(3).expect("result");
    assert_eq!(group.status, FieldStatus::Ok);
    assert_eq!(group.name.as_deref(), Some("result"));
    let body = group.value.as_message().expect("group body");
    assert_eq!(body.field(1).expect("url").value, DecodedValue::Str("x".to_string()));

    // drop the end marker
    let mut bytes = key(3, 3);
    bytes.extend(len_field(1, b"x"));
    let tree = dissector.dissect(&bytes, Some("Outer"));
    assert!(matches!(tree.field(3).expect("result").status, FieldStatus::Malformed(_)));
}

#[test]
fn test_group_end_without_start_flagged() {
    let tree = dissect_free(&[0x0c]); // field 1, end-group
    assert_eq!(tree.fields.len(), 1);
    assert_eq!(tree.fields[0].wire_type, WireType::EndGroup);
    assert!(matches!(tree.fields[0].status, FieldStatus::Malformed(_)));
}

#[test]
fn test_heuristic_decodes_embedded_message() {
    let bytes = len_field(1, &varint_field(1, 5));
    let tree = dissect_free(&bytes);
    let sub = tree.fields[0].value.as_message().expect("heuristic message");
    assert_eq!(sub.fields[0].value, DecodedValue::UInt(5));
}

#[test]
fn test_heuristic_falls_back_to_text_and_bytes() {
    let tree = dissect_free(&len_field(1, b"hello"));
    assert_eq!(tree.fields[0].value, DecodedValue::Str("hello".to_string()));

    let tree = dissect_free(&len_field(1, &[0xff, 0xff]));
    assert_eq!(tree.fields[0].value, DecodedValue::Bytes(vec![0xff, 0xff]));
}

#[test]
fn test_declared_string_decoded_lossily() {
    let registry = registry_for(
        r#"
syntax = "proto3";
message M { string s = 1; }
"#,
    );
    let bytes = len_field(1, &[0xff, 0x61]);
    let tree = Dissector::new(&registry).dissect(&bytes, Some("M"));
    let f = tree.field(1).expect("s");
    assert_eq!(f.status, FieldStatus::Ok);
    assert_eq!(f.value.as_str().expect("str"), "\u{FFFD}a");
}

#[test]
fn test_extension_field_resolved_by_range() {
    let registry = registry_for(
        r#"
syntax = "proto2";
package ext;
message Base {
  optional int32 core = 1;
  extensions 100 to 199;
}
extend Base {
  optional string note = 100;
}
"#,
    );
    let mut bytes = varint_field(1, 3);
    bytes.extend(len_field(100, b"hi"));
    bytes.extend(varint_field(99, 1));
    let tree = Dissector::new(&registry).dissect(&bytes, Some("ext.Base"));
    let note = tree.field(100).expect("note");
    assert_eq!(note.status, FieldStatus::Ok);
    assert_eq!(note.name.as_deref(), Some("note"));
    assert_eq!(note.value, DecodedValue::Str("hi".to_string()));
    assert_eq!(tree.field(99).expect("stray").status, FieldStatus::UnknownField);
}

#[test]
fn test_unresolved_root_type_falls_back_to_schema_free() {
    let registry = SchemaRegistry::default();
    let tree = Dissector::new(&registry).dissect(&[0x08, 0x2a], Some("no.Such"));
    assert_eq!(tree.fields[0].status, FieldStatus::UnknownField);
}

#[test]
fn test_dissection_is_repeatable() {
    let registry = registry_for(
        r#"
syntax = "proto3";
message M { uint32 a = 1; string s = 2; }
"#,
    );
    let mut bytes = varint_field(1, 12);
    bytes.extend(len_field(2, b"abc"));
    bytes.push(0x80); // trailing garbage
    let dissector = Dissector::new(&registry);
    let first = dissector.dissect(&bytes, Some("M"));
    let second = dissector.dissect(&bytes, Some("M"));
    assert_eq!(first, second);
    assert!(first.truncated.is_some());
}
