use super::*;
use serde_json::json;

const FIXTURE: &str = concat!(
    ": OPENROUTER PROCESSING\n",
    "\n",
    "data: {\"id\":\"gen-1\",\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"Hel\"}}]}\n",
    "\n",
    ": OPENROUTER PROCESSING\r\n",
    "\r\n",
    "data: {\"id\":\"gen-1\",\"choices\":[{\"delta\":{\"content\":\"lo ✓\"}}]}\r",
    "\r",
    "data: {not json}\n",
    "\n",
    "data: {\"choices\":[],\"usage\":{\"total_tokens\":9}}\n",
    "\n",
    "data: [DONE]\n",
    "\n",
    "data: {\"after\":\"done\"}\n",
);

fn decode_in_chunks(input: &[u8], chunk_size: usize) -> Vec<FrameSignal> {
    let mut decoder = FrameDecoder::new();
    let mut out = Vec::new();
    for chunk in input.chunks(chunk_size) {
        out.extend(decoder.push(chunk));
    }
    out.extend(decoder.finish());
    out
}

#[test]
fn decodes_fixture_into_ordered_signals() {
    let signals = decode_in_chunks(FIXTURE.as_bytes(), FIXTURE.len());
    assert_eq!(signals.len(), 7);
    assert_eq!(
        signals[0],
        FrameSignal::Comment("OPENROUTER PROCESSING".to_string())
    );
    assert!(matches!(
        &signals[1],
        FrameSignal::Json { payload, terminal_error: false } if payload["choices"][0]["delta"]["content"] == "Hel"
    ));
    assert_eq!(
        signals[2],
        FrameSignal::Comment("OPENROUTER PROCESSING".to_string())
    );
    assert!(matches!(
        &signals[3],
        FrameSignal::Json { payload, .. } if payload["choices"][0]["delta"]["content"] == "lo ✓"
    ));
    assert!(matches!(&signals[4], FrameSignal::Malformed { line, .. } if line == "{not json}"));
    assert!(matches!(
        &signals[5],
        FrameSignal::Json { payload, .. } if payload["usage"]["total_tokens"] == 9
    ));
    assert_eq!(signals[6], FrameSignal::Done);
}

#[test]
fn chunk_boundaries_do_not_change_signals() {
    let whole = decode_in_chunks(FIXTURE.as_bytes(), FIXTURE.len());
    for size in [1, 2, 3, 7, 11, 64] {
        assert_eq!(
            decode_in_chunks(FIXTURE.as_bytes(), size),
            whole,
            "chunk size {size}"
        );
    }
}

#[test]
fn multibyte_utf8_split_across_chunks_is_reassembled() {
    let line = "data: {\"choices\":[{\"delta\":{\"content\":\"日本\"}}]}\n";
    let bytes = line.as_bytes();
    let split = bytes
        .iter()
        .position(|b| *b >= 0x80)
        .expect("multibyte char")
        + 1;

    let mut decoder = FrameDecoder::new();
    assert!(decoder.push(&bytes[..split]).is_empty());
    let signals = decoder.push(&bytes[split..]);
    assert!(matches!(
        &signals[..],
        [FrameSignal::Json { payload, .. }] if payload["choices"][0]["delta"]["content"] == "日本"
    ));
}

#[test]
fn crlf_split_between_chunks_does_not_emit_extra_line() {
    let mut decoder = FrameDecoder::new();
    let mut signals = decoder.push(b"data: {\"a\":1}\r");
    assert_eq!(signals.len(), 1);
    signals.extend(decoder.push(b"\ndata: {\"b\":2}\r\n"));
    assert_eq!(signals.len(), 2);
    assert!(matches!(&signals[1], FrameSignal::Json { payload, .. } if payload == &json!({"b": 2})));
}

#[test]
fn malformed_line_does_not_stop_decoding() {
    let signals = decode_in_chunks(b"data: {\"a\":\ndata: 42\ndata: {\"a\":1}\n", 5);
    assert_eq!(signals.len(), 3);
    assert!(matches!(&signals[0], FrameSignal::Malformed { .. }));
    assert!(
        matches!(&signals[1], FrameSignal::Malformed { error, .. } if error == "payload is not a JSON object")
    );
    assert!(matches!(&signals[2], FrameSignal::Json { .. }));
}

#[test]
fn invalid_utf8_payload_is_malformed() {
    let mut decoder = FrameDecoder::new();
    let signals = decoder.push(b"data: {\"a\":\"\xff\"}\n");
    assert!(matches!(
        &signals[..],
        [FrameSignal::Malformed { error, .. }] if error.starts_with("invalid utf-8")
    ));
}

#[test]
fn error_shapes_are_flagged_terminal() {
    let signals = decode_in_chunks(
        b"data: {\"error\":{\"code\":429,\"message\":\"Rate limited\"}}\n\n",
        4,
    );
    assert!(matches!(
        &signals[..],
        [FrameSignal::Json { terminal_error: true, .. }]
    ));
}

#[test]
fn done_stops_decoding() {
    let mut decoder = FrameDecoder::new();
    let signals = decoder.push(b"data: [DONE]\ndata: {\"a\":1}\n");
    assert_eq!(signals, vec![FrameSignal::Done]);
    assert!(decoder.is_done());
    assert!(decoder.push(b"data: {\"b\":1}\n").is_empty());
    assert!(decoder.finish().is_empty());
}

#[test]
fn sse_field_lines_and_no_space_prefix() {
    let signals = decode_in_chunks(
        b"event: message\nid: 7\nretry: 1000\ndata:{\"a\":1}\n:no-space\n",
        3,
    );
    assert_eq!(signals.len(), 2);
    assert!(matches!(&signals[0], FrameSignal::Json { payload, .. } if payload == &json!({"a": 1})));
    assert_eq!(signals[1], FrameSignal::Comment("no-space".to_string()));
}

#[test]
fn finish_flushes_trailing_line_without_terminator() {
    let mut decoder = FrameDecoder::new();
    assert!(decoder.push(b"data: {\"tail\":true}").is_empty());
    assert_eq!(decoder.pending_len(), "data: {\"tail\":true}".len());
    let signals = decoder.finish();
    assert!(matches!(&signals[..], [FrameSignal::Json { payload, .. }] if payload["tail"] == true));
    assert_eq!(decoder.pending_len(), 0);
}

#[test]
fn oversized_line_is_reported_once_and_skipped() {
    let mut decoder = FrameDecoder::with_max_line_bytes(16);
    let mut signals = decoder.push(b"data: {\"aaaaaaaaaaaaaaaaaaaaaaaa\":1}");
    signals.extend(decoder.push(b"\ndata: {\"b\":2}\n"));
    assert_eq!(signals.len(), 2);
    assert!(
        matches!(&signals[0], FrameSignal::Malformed { error, .. } if error == "line exceeds 16 bytes")
    );
    assert!(matches!(&signals[1], FrameSignal::Json { payload, .. } if payload == &json!({"b": 2})));
}
