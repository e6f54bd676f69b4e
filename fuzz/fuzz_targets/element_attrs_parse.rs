//! Fuzz target for element record parsing.
//!
//! Feeds arbitrary bytes to the element record decoder, including the
//! transformation and pyramid level records it carries.

#![no_main]

use libfuzzer_sys::fuzz_target;
use spatialdata::store::fuzz_parse_element_attrs;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    let _ = fuzz_parse_element_attrs(data);
});
