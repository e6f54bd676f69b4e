//! Fuzz target for transformation JSON parsing.
//!
//! Anything that parses and passes `check` must display and either invert
//! or fail with an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use spatialdata::transform::{invert, Transformation};

fuzz_target!(|data: &[u8]| {
    if data.len() > 1024 * 1024 {
        return;
    }

    let Ok(t) = serde_json::from_slice::<Transformation>(data) else {
        return;
    };
    if t.check().is_err() {
        return;
    }
    let _ = t.to_string();
    let _ = invert(&t);
});
