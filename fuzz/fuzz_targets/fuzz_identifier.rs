//! Fuzz target for identifier validation.
//!
//! Table and column names from a registry are spliced into SQL, so anything
//! the validator accepts must be a bare identifier.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sharing_engine::registry::{is_valid_identifier, ItemKind, KindSpec, Registry};

fuzz_target!(|data: (&str, &str)| {
    let (table, column) = data;

    if is_valid_identifier(table) {
        assert!(!table.is_empty() && table.len() <= 63);
        assert!(table.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_'));
        assert!(!table.as_bytes()[0].is_ascii_digit());
    }

    // Registration must reject rather than panic on hostile names.
    let spec = KindSpec::new(ItemKind::PO, table).with_payload_column(column);
    let mut registry = Registry::empty();
    if registry.register(spec).is_ok() {
        assert!(is_valid_identifier(table));
        assert!(is_valid_identifier(column));
    }
});
