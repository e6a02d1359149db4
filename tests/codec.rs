#![allow(clippy::unwrap_used)]

// Property tests for the frame codec: whatever the encoder writes, the
// decoder reads back with the same command, headers and body.

use std::collections::BTreeMap;

use proptest::prelude::*;
use stomp_client::protocol::{encode_frame, read_frame, Frame, Headers, DEFAULT_CONTENT_TYPE};
use tokio::io::{AsyncWriteExt, BufReader};

fn decode_all(bytes: &[u8]) -> Vec<Frame> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    runtime.block_on(async {
        let mut reader = BufReader::new(bytes);
        let mut frames = Vec::new();
        while let Some(frame) = read_frame(&mut reader).await.unwrap() {
            frames.push(frame);
        }
        frames
    })
}

fn command_strategy() -> impl Strategy<Value = String> {
    "[A-Z]{1,12}"
}

/// Keys and values the decoder gives back unchanged: no colon or newline in
/// keys, no newline or surrounding whitespace in values.
fn headers_strategy() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("[a-z][a-z0-9-]{0,12}", "[A-Za-z0-9/._=-]{0,16}", 0..6)
        .prop_filter("synthesized headers", |m| {
            !m.contains_key("content-length") && !m.contains_key("content-type")
        })
}

proptest! {
    /// Property: decode(encode(frame)) preserves command, headers and body.
    #[test]
    fn encoded_frames_decode_unchanged(
        command in command_strategy(),
        headers in headers_strategy(),
        body in prop::collection::vec(any::<u8>(), 0..512),
    ) {
        let block: Headers = headers.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let bytes = encode_frame(&command, &block, &body);

        let frames = decode_all(&bytes);
        prop_assert_eq!(frames.len(), 1);
        let frame = &frames[0];

        prop_assert_eq!(frame.command(), command.as_str());
        prop_assert_eq!(frame.body(), body.as_slice());
        for (key, value) in &headers {
            prop_assert_eq!(frame.get(key), Some(value.as_str()));
        }
        let expected_len = body.len().to_string();
        prop_assert_eq!(frame.get("content-length"), Some(expected_len.as_str()));
        prop_assert_eq!(frame.headers().len(), headers.len() + 2);
    }

    /// Property: back-to-back frames split cleanly, in order.
    #[test]
    fn frame_sequences_split_cleanly(
        bodies in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..8),
    ) {
        let mut bytes = Vec::new();
        for (i, body) in bodies.iter().enumerate() {
            let headers = Headers::new().with("seq", i.to_string());
            bytes.extend_from_slice(&encode_frame("MESSAGE", &headers, body));
            // heart-beat style blank line between frames
            bytes.push(b'\n');
        }

        let frames = decode_all(&bytes);
        prop_assert_eq!(frames.len(), bodies.len());
        for (i, (frame, body)) in frames.iter().zip(&bodies).enumerate() {
            let seq = i.to_string();
            prop_assert_eq!(frame.get("seq"), Some(seq.as_str()));
            prop_assert_eq!(frame.body(), body.as_slice());
        }
    }
}

#[tokio::test]
async fn test_frame_over_duplex_in_small_writes() {
    let headers = Headers::new().with("destination", "/queue/a").with("receipt", "9");
    let bytes = encode_frame("SEND", &headers, b"payload\0with nul");

    let (mut client, server) = tokio::io::duplex(16);
    let writer = tokio::spawn(async move {
        for chunk in bytes.chunks(5) {
            client.write_all(chunk).await.unwrap();
        }
    });

    let mut reader = BufReader::new(server);
    let frame = read_frame(&mut reader).await.unwrap().unwrap();
    writer.await.unwrap();

    assert_eq!(frame.command(), "SEND");
    assert_eq!(frame.destination(), Some("/queue/a"));
    assert_eq!(frame.get("receipt"), Some("9"));
    assert_eq!(frame.get("content-type"), Some(DEFAULT_CONTENT_TYPE));
    assert_eq!(frame.body(), b"payload\0with nul");
}
