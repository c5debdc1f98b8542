#![no_main]

use libfuzzer_sys::fuzz_target;
use rgstream::parse::ansi::strip_ansi;
use rgstream::search::SpanKind;
use rgstream::{OutputFormat, ParseEvent, StreamParser};

fuzz_target!(|data: &[u8]| {
    let mut parser = StreamParser::new(OutputFormat::Plain, 2);
    let mut events = parser.feed(data);
    events.extend(parser.finish());

    // Spans always index valid content
    for event in &events {
        if let ParseEvent::Match { record, .. } = event {
            for span in &record.spans {
                let end = span.end.unwrap_or(record.content.len());
                assert!(record.content.get(span.start..end).is_some());
            }
        }
    }

    let _ = strip_ansi(&String::from_utf8_lossy(data), SpanKind::Match);
});
