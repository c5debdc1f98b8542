#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rgstream::{OutputFormat, StreamParser};

#[derive(Arbitrary, Debug)]
struct Input {
    context_lines: u8,
    chunk: u8,
    data: Vec<u8>,
}

fuzz_target!(|input: Input| {
    // Output must not depend on chunk boundaries
    let context = u32::from(input.context_lines % 8);
    let mut whole = StreamParser::new(OutputFormat::Json, context);
    let mut expected = whole.feed(&input.data);
    expected.extend(whole.finish());

    let mut split = StreamParser::new(OutputFormat::Json, context);
    let mut events = Vec::new();
    for piece in input.data.chunks(usize::from(input.chunk).max(1)) {
        events.extend(split.feed(piece));
    }
    events.extend(split.finish());

    assert_eq!(events, expected);
    assert_eq!(split.skipped(), whole.skipped());
});
