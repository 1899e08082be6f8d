//! Parse `.proto` source text into the per-file AST using PEST.
//!
//! One call per schema file; a fault anywhere in a file fails that file only
//! (the registry keeps loading the rest). Unknown options are parsed and
//! discarded. `map<K, V>` fields are desugared here into the implicit repeated
//! `*Entry` nested message with `key` = 1 and `value` = 2.

use crate::ast::*;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser as PestParser;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct ProtoParser;

/// Schema syntax fault, fatal for the offending file only.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{file}:{line}:{column}: {message}")]
pub struct ParseError {
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

/// The highest field number the wire format can express (2^29 - 1).
pub const MAX_FIELD_NUMBER: i32 = 536_870_911;

/// Parse one schema file. `file_name` is only used for diagnostics.
pub fn parse_file(file_name: &str, source: &str) -> Result<ProtoFile, ParseError> {
    let mut pairs = ProtoParser::parse(Rule::proto_file, source).map_err(|e| {
        let (line, column) = match e.line_col {
            pest::error::LineColLocation::Pos((l, c)) => (l, c),
            pest::error::LineColLocation::Span((l, c), _) => (l, c),
        };
        ParseError {
            file: file_name.to_string(),
            line,
            column,
            message: format!("{}", e.variant.message()),
        }
    })?;
    let root = pairs.next().ok_or_else(|| ParseError {
        file: file_name.to_string(),
        line: 1,
        column: 1,
        message: "empty parse".to_string(),
    })?;

    let mut file = ProtoFile {
        file_name: file_name.to_string(),
        syntax: Syntax::Proto2,
        package: None,
        imports: Vec::new(),
        messages: Vec::new(),
        enums: Vec::new(),
        extensions: Vec::new(),
    };

    for decl in root.into_inner() {
        match decl.as_rule() {
            Rule::syntax_decl => {
                let text = find_string_lit(&decl).map(unquote).unwrap_or_default();
                file.syntax = match text.as_str() {
                    "proto2" => Syntax::Proto2,
                    "proto3" => Syntax::Proto3,
                    other => {
                        return Err(err_at(
                            file_name,
                            &decl,
                            format!("unsupported syntax {:?}", other),
                        ))
                    }
                };
            }
            // Editions carry proto3 field semantics for our purposes.
            Rule::edition_decl => file.syntax = Syntax::Proto3,
            Rule::package_decl => {
                file.package = decl
                    .into_inner()
                    .find(|p| p.as_rule() == Rule::full_ident)
                    .map(|p| p.as_str().to_string());
            }
            Rule::import_decl => {
                let public = decl
                    .clone()
                    .into_inner()
                    .any(|p| p.as_rule() == Rule::import_modifier && p.as_str() == "public");
                if let Some(path) = find_string_lit(&decl).map(unquote) {
                    file.imports.push(Import { path, public });
                }
            }
            Rule::message_decl => {
                let msg = build_message(file_name, decl, &mut file.extensions)?;
                file.messages.push(msg);
            }
            Rule::enum_decl => file.enums.push(build_enum(file_name, decl)?),
            Rule::extend_decl => {
                let ext = build_extend(file_name, decl)?;
                file.extensions.push(ext);
            }
            // Options and services are accepted but carry nothing we decode with.
            Rule::option_decl | Rule::service_decl | Rule::EOI => {}
            _ => {}
        }
    }
    Ok(file)
}

fn build_message(
    file: &str,
    pair: Pair<Rule>,
    extends: &mut Vec<Extend>,
) -> Result<Message, ParseError> {
    let mut msg = Message {
        name: String::new(),
        fields: Vec::new(),
        oneofs: Vec::new(),
        nested_messages: Vec::new(),
        nested_enums: Vec::new(),
        extension_ranges: Vec::new(),
        is_map_entry: false,
    };
    let mut nested_extends = Vec::new();
    for elem in pair.into_inner() {
        match elem.as_rule() {
            Rule::ident => msg.name = elem.as_str().to_string(),
            Rule::field => msg.fields.push(build_field(file, elem, None)?),
            Rule::group_field => {
                let (field, nested) = build_group(file, elem, None, &mut nested_extends)?;
                msg.fields.push(field);
                msg.nested_messages.push(nested);
            }
            Rule::map_field => {
                let (field, entry) = build_map_field(file, elem)?;
                msg.fields.push(field);
                msg.nested_messages.push(entry);
            }
            Rule::oneof_decl => build_oneof(file, elem, &mut msg, &mut nested_extends)?,
            Rule::message_decl => {
                let nested = build_message(file, elem, &mut nested_extends)?;
                msg.nested_messages.push(nested);
            }
            Rule::enum_decl => msg.nested_enums.push(build_enum(file, elem)?),
            Rule::extend_decl => nested_extends.push(build_extend(file, elem)?),
            Rule::extensions_decl => {
                for range in elem.into_inner().filter(|p| p.as_rule() == Rule::range) {
                    msg.extension_ranges.push(build_range(file, range)?);
                }
            }
            // Reserved statements and options do not affect decoding.
            Rule::reserved_decl | Rule::option_decl => {}
            _ => {}
        }
    }
    hoist_extends(&msg.name, nested_extends, extends);
    Ok(msg)
}

fn build_oneof(
    file: &str,
    pair: Pair<Rule>,
    msg: &mut Message,
    extends: &mut Vec<Extend>,
) -> Result<(), ParseError> {
    let index = msg.oneofs.len();
    let mut named = false;
    for elem in pair.into_inner() {
        match elem.as_rule() {
            Rule::ident if !named => {
                msg.oneofs.push(elem.as_str().to_string());
                named = true;
            }
            Rule::field => msg.fields.push(build_field(file, elem, Some(index))?),
            Rule::group_field => {
                let (field, nested) = build_group(file, elem, Some(index), extends)?;
                msg.fields.push(field);
                msg.nested_messages.push(nested);
            }
            Rule::option_decl => {}
            _ => {}
        }
    }
    if !named {
        msg.oneofs.push(String::new());
    }
    Ok(())
}

fn build_field(file: &str, pair: Pair<Rule>, oneof: Option<usize>) -> Result<Field, ParseError> {
    let span = pair.as_span();
    let (line, column) = span.start_pos().line_col();
    let mut label = Label::Optional;
    let mut kind = None;
    let mut name = String::new();
    let mut number = None;
    let mut packed = None;
    let mut default = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::label => {
                label = match inner.as_str() {
                    "required" => Label::Required,
                    "repeated" => Label::Repeated,
                    _ => Label::Optional,
                }
            }
            Rule::type_ref => {
                let text = inner.as_str();
                kind = Some(match ScalarType::from_name(text) {
                    Some(s) => FieldKind::Scalar(s),
                    None => FieldKind::Named(text.to_string()),
                });
            }
            Rule::ident => name = inner.as_str().to_string(),
            Rule::int_lit => number = Some(field_number(file, &inner)?),
            Rule::field_options => {
                let (p, d) = field_options(inner);
                packed = p;
                default = d;
            }
            _ => {}
        }
    }
    let number = number.ok_or_else(|| ParseError {
        file: file.to_string(),
        line,
        column,
        message: format!("field {:?} is missing a number", name),
    })?;
    let kind = kind.ok_or_else(|| ParseError {
        file: file.to_string(),
        line,
        column,
        message: format!("field {:?} is missing a type", name),
    })?;
    Ok(Field {
        name,
        number,
        label,
        kind,
        packed,
        default,
        oneof,
        is_group: false,
        line,
        column,
    })
}

/// proto2 `group Foo = N { ... }`: a nested message plus a group-typed field
/// whose name is the lowercased group name.
fn build_group(
    file: &str,
    pair: Pair<Rule>,
    oneof: Option<usize>,
    extends: &mut Vec<Extend>,
) -> Result<(Field, Message), ParseError> {
    let span = pair.as_span();
    let (line, column) = span.start_pos().line_col();
    let mut label = Label::Optional;
    let mut group_name = String::new();
    let mut number = None;
    let mut body = Message {
        name: String::new(),
        fields: Vec::new(),
        oneofs: Vec::new(),
        nested_messages: Vec::new(),
        nested_enums: Vec::new(),
        extension_ranges: Vec::new(),
        is_map_entry: false,
    };
    let mut nested_extends = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::label => {
                label = match inner.as_str() {
                    "required" => Label::Required,
                    "repeated" => Label::Repeated,
                    _ => Label::Optional,
                }
            }
            Rule::ident if group_name.is_empty() => group_name = inner.as_str().to_string(),
            Rule::int_lit => number = Some(field_number(file, &inner)?),
            Rule::field => body.fields.push(build_field(file, inner, None)?),
            Rule::group_field => {
                let (f, nested) = build_group(file, inner, None, &mut nested_extends)?;
                body.fields.push(f);
                body.nested_messages.push(nested);
            }
            Rule::map_field => {
                let (f, entry) = build_map_field(file, inner)?;
                body.fields.push(f);
                body.nested_messages.push(entry);
            }
            Rule::oneof_decl => build_oneof(file, inner, &mut body, &mut nested_extends)?,
            Rule::message_decl => body
                .nested_messages
                .push(build_message(file, inner, &mut nested_extends)?),
            Rule::enum_decl => body.nested_enums.push(build_enum(file, inner)?),
            Rule::extend_decl => nested_extends.push(build_extend(file, inner)?),
            _ => {}
        }
    }
    body.name = group_name.clone();
    hoist_extends(&group_name, nested_extends, extends);
    let number = number.ok_or_else(|| ParseError {
        file: file.to_string(),
        line,
        column,
        message: format!("group {:?} is missing a number", group_name),
    })?;
    let field = Field {
        name: group_name.to_lowercase(),
        number,
        label,
        kind: FieldKind::Named(group_name),
        packed: None,
        default: None,
        oneof,
        is_group: true,
        line,
        column,
    };
    Ok((field, body))
}

fn build_map_field(file: &str, pair: Pair<Rule>) -> Result<(Field, Message), ParseError> {
    let span = pair.as_span();
    let (line, column) = span.start_pos().line_col();
    let mut types = Vec::new();
    let mut name = String::new();
    let mut number = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::type_ref => types.push(inner.as_str().to_string()),
            Rule::ident => name = inner.as_str().to_string(),
            Rule::int_lit => number = Some(field_number(file, &inner)?),
            _ => {}
        }
    }
    if types.len() != 2 {
        return Err(ParseError {
            file: file.to_string(),
            line,
            column,
            message: format!("map field {:?} needs a key and a value type", name),
        });
    }
    let number = number.ok_or_else(|| ParseError {
        file: file.to_string(),
        line,
        column,
        message: format!("map field {:?} is missing a number", name),
    })?;
    let entry_name = format!("{}Entry", camel_case(&name));
    let kind_of = |text: &str| match ScalarType::from_name(text) {
        Some(s) => FieldKind::Scalar(s),
        None => FieldKind::Named(text.to_string()),
    };
    let entry = Message {
        name: entry_name.clone(),
        fields: vec![
            Field {
                name: "key".to_string(),
                number: 1,
                label: Label::Optional,
                kind: kind_of(&types[0]),
                packed: None,
                default: None,
                oneof: None,
                is_group: false,
                line,
                column,
            },
            Field {
                name: "value".to_string(),
                number: 2,
                label: Label::Optional,
                kind: kind_of(&types[1]),
                packed: None,
                default: None,
                oneof: None,
                is_group: false,
                line,
                column,
            },
        ],
        oneofs: Vec::new(),
        nested_messages: Vec::new(),
        nested_enums: Vec::new(),
        extension_ranges: Vec::new(),
        is_map_entry: true,
    };
    let field = Field {
        name,
        number,
        label: Label::Repeated,
        kind: FieldKind::Named(entry_name),
        packed: None,
        default: None,
        oneof: None,
        is_group: false,
        line,
        column,
    };
    Ok((field, entry))
}

fn build_enum(file: &str, pair: Pair<Rule>) -> Result<Enum, ParseError> {
    let mut name = String::new();
    let mut values = Vec::new();
    for elem in pair.into_inner() {
        match elem.as_rule() {
            Rule::ident => name = elem.as_str().to_string(),
            Rule::enum_value => {
                let mut value_name = String::new();
                let mut value = None;
                for inner in elem.into_inner() {
                    match inner.as_rule() {
                        Rule::ident => value_name = inner.as_str().to_string(),
                        Rule::int_lit => value = Some(parse_int(file, &inner)?),
                        _ => {}
                    }
                }
                if let Some(v) = value {
                    values.push((value_name, v));
                }
            }
            Rule::option_decl | Rule::reserved_decl => {}
            _ => {}
        }
    }
    Ok(Enum { name, values })
}

fn build_extend(file: &str, pair: Pair<Rule>) -> Result<Extend, ParseError> {
    let mut extendee = String::new();
    let mut fields = Vec::new();
    let mut hoisted = Vec::new();
    for elem in pair.into_inner() {
        match elem.as_rule() {
            Rule::type_ref => extendee = elem.as_str().to_string(),
            Rule::field => fields.push(build_field(file, elem, None)?),
            Rule::group_field => {
                // Groups in extend blocks are matched structurally at decode
                // time; the body types are not addressable, so only keep the field.
                let (f, _nested) = build_group(file, elem, None, &mut hoisted)?;
                fields.push(f);
            }
            _ => {}
        }
    }
    Ok(Extend {
        extendee,
        fields,
        scope: None,
    })
}

/// Hoist extend blocks declared inside `enclosing` up one level, recording the
/// path they were declared at so relative extendee names keep their scope.
fn hoist_extends(enclosing: &str, nested: Vec<Extend>, extends: &mut Vec<Extend>) {
    for mut ext in nested {
        ext.scope = Some(match ext.scope.take() {
            Some(inner) => format!("{}.{}", enclosing, inner),
            None => enclosing.to_string(),
        });
        extends.push(ext);
    }
}

fn build_range(file: &str, pair: Pair<Rule>) -> Result<(i32, i32), ParseError> {
    let mut start = None;
    let mut end = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::int_lit => {
                let v = field_number(file, &inner)?;
                if start.is_none() {
                    start = Some(v);
                } else {
                    end = Some(v);
                }
            }
            Rule::kw_max => end = Some(MAX_FIELD_NUMBER),
            _ => {}
        }
    }
    let start = start.unwrap_or(0);
    Ok((start, end.unwrap_or(start)))
}

/// Keep only the two field options that matter for decoding.
fn field_options(pair: Pair<Rule>) -> (Option<bool>, Option<String>) {
    let mut packed = None;
    let mut default = None;
    for opt in pair.into_inner().filter(|p| p.as_rule() == Rule::field_option) {
        let mut name = String::new();
        let mut value = String::new();
        for inner in opt.into_inner() {
            match inner.as_rule() {
                // The option_name span can include trailing trivia consumed while
// probing for a `.` continuation, so trim before comparing.
Rule::option_name => name = inner.as_str().trim().to_string(),
                Rule::constant => value = inner.as_str().to_string(),
                _ => {}
            }
        }
        match name.as_str() {
            "packed" => packed = Some(value == "true"),
            "default" => default = Some(value),
            _ => {}
        }
    }
    (packed, default)
}

/// A field (or range) number literal, bounded before any narrowing cast.
fn field_number(file: &str, pair: &Pair<Rule>) -> Result<i32, ParseError> {
    let v = parse_int(file, pair)?;
    if v < 1 || v > i64::from(MAX_FIELD_NUMBER) {
        let (line, column) = pair.as_span().start_pos().line_col();
        return Err(ParseError {
            file: file.to_string(),
            line,
            column,
            message: format!("out-of-range field number {}", v),
        });
    }
    Ok(v as i32)
}

fn parse_int(file: &str, pair: &Pair<Rule>) -> Result<i64, ParseError> {
    let text = pair.as_str();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let magnitude = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else if digits.len() > 1 && digits.starts_with('0') {
        i64::from_str_radix(digits, 8)
    } else {
        digits.parse::<i64>()
    };
    match magnitude {
        Ok(v) => Ok(if negative { -v } else { v }),
        Err(_) => {
            let (line, column) = pair.as_span().start_pos().line_col();
            Err(ParseError {
                file: file.to_string(),
                line,
                column,
                message: format!("invalid integer literal {:?}", text),
            })
        }
    }
}

fn err_at(file: &str, pair: &Pair<Rule>, message: String) -> ParseError {
    let (line, column) = pair.as_span().start_pos().line_col();
    ParseError {
        file: file.to_string(),
        line,
        column,
        message,
    }
}

fn find_string_lit(pair: &Pair<Rule>) -> Option<String> {
    pair.clone()
        .into_inner()
        .find(|p| p.as_rule() == Rule::string_lit)
        .map(|p| p.as_str().to_string())
}

/// Strip quotes and decode the common escape sequences of a string literal.
fn unquote(lit: String) -> String {
    let body = if lit.len() >= 2 {
        &lit[1..lit.len() - 1]
    } else {
        lit.as_str()
    };
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some('x') | Some('X') => {
                let hex: String = chars.clone().take(2).collect();
                if let Ok(b) = u8::from_str_radix(&hex, 16) {
                    out.push(b as char);
                    chars.nth(hex.len().saturating_sub(1));
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

/// protoc's map-entry naming: snake_case field name to CamelCase.
fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = true;
    for c in name.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}
