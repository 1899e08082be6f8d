//! Dissector fuzz target: feed arbitrary bytes to the schema-free decoder.
//! Dissection must never panic; every input yields a tree.
//! Build with: cargo fuzz run dissect_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let registry = protodissect::SchemaRegistry::default();
    let tree = protodissect::Dissector::new(&registry).dissect(data, None);
    let _ = protodissect::tree_to_dump(&tree);
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run dissect_fuzz");
}
