//! Terminal escape stripping
//!
//! Colored tool output marks matches with SGR sequences. Any non-reset SGR
//! opens a span, a reset closes it, and a span still open at the end of the
//! line is closed there. Offsets refer to the stripped text.

use crate::search::types::{HighlightSpan, SpanKind};

const ESC: char = '\x1b';
const BEL: char = '\x07';

/// Text with escape sequences removed, plus the spans they delimited
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Stripped {
    pub text: String,
    pub spans: Vec<HighlightSpan>,
}

pub fn strip_ansi(input: &str, kind: SpanKind) -> Stripped {
    // Fast path: nothing to strip
    if !input.contains(ESC) {
        return Stripped {
            text: input.to_string(),
            spans: Vec::new(),
        };
    }

    let mut text = String::with_capacity(input.len());
    let mut spans = Vec::new();
    let mut open: Option<HighlightSpan> = None;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != ESC {
            text.push(c);
            continue;
        }

        match chars.next() {
            // CSI: parameters then a final byte in 0x40..=0x7e
            Some('[') => {
                let mut params = String::new();
                let mut final_byte = None;
                for c in chars.by_ref() {
                    if ('\x40'..='\x7e').contains(&c) {
                        final_byte = Some(c);
                        break;
                    }
                    params.push(c);
                }
                if final_byte == Some('m') {
                    apply_sgr(&params, text.len(), kind, &mut open, &mut spans);
                }
            }
            // OSC (hyperlinks): terminated by BEL or ESC '\'
            Some(']') => {
                while let Some(c) = chars.next() {
                    if c == BEL {
                        break;
                    }
                    if c == ESC && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            // Two-character escape, or a lone ESC at end of input
            _ => {}
        }
    }

    close_span(&mut open, text.len(), &mut spans);
    Stripped { text, spans }
}

fn apply_sgr(
    params: &str,
    offset: usize,
    kind: SpanKind,
    open: &mut Option<HighlightSpan>,
    spans: &mut Vec<HighlightSpan>,
) {
    if params.is_empty() {
        close_span(open, offset, spans);
        return;
    }

    for code in params.split(';') {
        let is_reset = code.is_empty() || code.bytes().all(|b| b == b'0');
        if is_reset {
            close_span(open, offset, spans);
        } else if open.is_none() {
            *open = Some(HighlightSpan::open(offset, kind));
        }
    }
}

fn close_span(open: &mut Option<HighlightSpan>, offset: usize, spans: &mut Vec<HighlightSpan>) {
    if let Some(mut span) = open.take() {
        span.close(offset);
        if !span.is_empty() {
            spans.push(span);
        }
    }
}
