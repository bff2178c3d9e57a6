//! Fuzz target for stored status parsing.
//!
//! Visibility and status columns are read back from the database; parsing
//! must never panic and must only accept the exact rendered forms.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sharing_engine::{CurriculumStatus, ItemStatus, Visibility};

fuzz_target!(|s: &str| {
    if let Ok(v) = s.parse::<Visibility>() {
        assert_eq!(v.as_str(), s);
    }
    if let Ok(st) = s.parse::<ItemStatus>() {
        assert_eq!(st.as_str(), s);
    }
    if let Ok(st) = s.parse::<CurriculumStatus>() {
        assert_eq!(st.as_str(), s);
    }
});
