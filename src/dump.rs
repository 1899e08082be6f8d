//! Format decoded trees for display (dump text, one-line summaries). Uses the
//! field metadata already attached to each node; no registry access needed.

use crate::value::{DecodedField, DecodedTree, DecodedValue, FieldStatus};

fn hex_string(b: &[u8]) -> String {
    b.iter().map(|x| format!("{:02x}", x)).collect::<Vec<_>>().join(" ")
}

/// Abbreviate long byte runs: full hex up to 32 bytes, then a prefix plus a
/// total count.
fn bytes_display(b: &[u8]) -> String {
    if b.len() <= 32 {
        format!("hex({})", hex_string(b))
    } else {
        format!("hex({} ..) {} bytes", hex_string(&b[..32]), b.len())
    }
}

/// Raw scalar string for one decoded value. Fixed-width values with no schema
/// show both integer and reinterpreted float readings, either could be right.
pub fn format_value(v: &DecodedValue) -> String {
    match v {
        DecodedValue::UInt(x) => format!("{}", x),
        DecodedValue::Int(x) => format!("{}", x),
        DecodedValue::Bool(x) => format!("{}", x),
        DecodedValue::Enum { number, name } => match name {
            Some(n) => format!("{} ({})", n, number),
            None => format!("{}", number),
        },
        DecodedValue::Float(x) => format!("{}", x),
        DecodedValue::Double(x) => format!("{}", x),
        DecodedValue::Fixed32(x) => format!("{} / {}", x, f32::from_bits(*x)),
        DecodedValue::Fixed64(x) => format!("{} / {}", x, f64::from_bits(*x)),
        DecodedValue::Str(s) => format!("{:?}", s),
        DecodedValue::Bytes(b) => bytes_display(b),
        DecodedValue::Message(_) => "message".to_string(),
        DecodedValue::Group(_) => "group".to_string(),
        DecodedValue::Packed(items) => {
            let parts: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", parts.join(", "))
        }
        DecodedValue::Marker => String::new(),
    }
}

fn status_suffix(status: &FieldStatus) -> String {
    match status {
        FieldStatus::Ok => String::new(),
        FieldStatus::UnknownField => " <unknown>".to_string(),
        FieldStatus::Malformed(reason) => format!(" <malformed: {}>", reason),
        FieldStatus::MaxDepthExceeded => " <max depth exceeded>".to_string(),
    }
}

fn field_label(f: &DecodedField) -> String {
    let mut label = match &f.name {
        Some(name) => format!("{} (#{})", name, f.number),
        None => format!("#{}", f.number),
    };
    if let Some(oneof) = &f.oneof {
        label.push_str(&format!(" [oneof {}]", oneof));
    }
    match &f.type_name {
        Some(t) => label.push_str(&format!(": {}", t)),
        None => label.push_str(&format!(": {}", f.wire_type.name())),
    }
    label
}

fn field_to_dump(f: &DecodedField, indent: usize, out: &mut Vec<String>) {
    let pad = "  ".repeat(indent);
    let label = field_label(f);
    let suffix = status_suffix(&f.status);
    match &f.value {
        DecodedValue::Message(tree) | DecodedValue::Group(tree) => {
            out.push(format!(
                "{}{} @{}+{}{} {{",
                pad, label, f.offset, f.len, suffix
            ));
            tree_lines(tree, indent + 1, out);
            out.push(format!("{}}}", pad));
        }
        DecodedValue::Marker => {
            out.push(format!("{}{} @{}+{}{}", pad, label, f.offset, f.len, suffix));
        }
        value => {
            out.push(format!(
                "{}{} = {} @{}+{}{}",
                pad,
                label,
                format_value(value),
                f.offset,
                f.len,
                suffix
            ));
        }
    }
}

fn tree_lines(tree: &DecodedTree, indent: usize, out: &mut Vec<String>) {
    let pad = "  ".repeat(indent);
    for f in &tree.fields {
        field_to_dump(f, indent, out);
    }
    if let Some(reason) = &tree.truncated {
        out.push(format!("{}<truncated: {}>", pad, reason));
    }
}

/// Multi-line indented dump of a decoded tree, one field per line, nested
/// messages and groups in braces.
pub fn tree_to_dump(tree: &DecodedTree) -> String {
    let mut out = Vec::new();
    tree_lines(tree, 0, &mut out);
    out.join("\n")
}

/// One-line summary for a single field (tree node label plus value).
pub fn field_summary_line(f: &DecodedField) -> String {
    let mut lines = Vec::new();
    field_to_dump(f, 0, &mut lines);
    lines.into_iter().next().unwrap_or_default()
}
