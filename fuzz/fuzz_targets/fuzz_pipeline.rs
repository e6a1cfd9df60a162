#![no_main]

use libfuzzer_sys::fuzz_target;
use popcanon_opt::{PipelineOptions, canonicalize_graph};

fuzz_target!(|data: &[u8]| {
    let Ok(source) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(mut trace) = popcanon_trace::parse(source) else {
        return;
    };
    // Load + canonicalize should never panic.
    let _ = canonicalize_graph(
        &mut trace.graph,
        &trace.input_tensors,
        &trace.parameter_tensors,
        &PipelineOptions::default(),
    );
});
