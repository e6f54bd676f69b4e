//! Fuzz target for opening arrays from untrusted zarr metadata.

#![no_main]

use libfuzzer_sys::fuzz_target;
use spatialdata::store::fuzz_open_array_metadata;

fuzz_target!(|data: &[u8]| {
    let _ = fuzz_open_array_metadata(data);
});
