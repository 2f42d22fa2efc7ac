//! Codec Tests
//!
//! Tests for header layout, request/response encoding and the streaming
//! parser.

use bytes::BytesMut;
use memkv::protocol::{
    encode_request, encode_request_into, encode_response, next_message, parse_buffer,
    parse_bytes, parse_message, Header, Magic, Opcode, Status, HEADER_SIZE, MAX_BODY_SIZE,
};
use memkv::MemcacheError;

// =============================================================================
// Header Tests
// =============================================================================

#[test]
fn test_header_roundtrip() {
    let header = Header {
        magic: Magic::Response,
        opcode: Opcode::GetK,
        key_length: 5,
        extras_length: 4,
        data_type: 0,
        vbucket_or_status: Status::KeyExists.as_u16(),
        total_body_length: 14,
        opaque: 0xdead_beef,
        cas: 0x0102_0304_0506_0708,
    };

    let bytes = header.to_bytes();
    assert_eq!(bytes.len(), HEADER_SIZE);
    assert_eq!(Header::decode(&bytes).unwrap(), header);
    assert_eq!(header.status(), Status::KeyExists);
    assert_eq!(header.value_length(), 5);
}

#[test]
fn test_header_is_big_endian() {
    let bytes = encode_request(Opcode::Get, b"hello", b"", b"", 7, 0);

    assert_eq!(bytes.len(), HEADER_SIZE + 5);
    assert_eq!(bytes[0], 0x80);
    assert_eq!(bytes[1], 0x00);
    assert_eq!(&bytes[2..4], &[0x00, 0x05]);
    assert_eq!(bytes[4], 0);
    assert_eq!(&bytes[8..12], &[0, 0, 0, 5]);
    assert_eq!(&bytes[12..16], &[0, 0, 0, 7]);
    assert_eq!(&bytes[16..24], &[0u8; 8]);
    assert_eq!(&bytes[24..], b"hello");
}

#[test]
fn test_header_decode_short_buffer() {
    let result = Header::decode(&[0x81; 10]);
    assert!(matches!(result, Err(MemcacheError::Protocol(_))));
}

#[test]
fn test_header_decode_bad_magic() {
    let mut bytes = encode_response(Opcode::Get, Status::Success, b"", b"", b"", 1, 0);
    bytes[0] = 0x42;
    assert!(matches!(Header::decode(&bytes), Err(MemcacheError::Protocol(_))));
}

#[test]
fn test_header_decode_lengths_exceed_body() {
    let mut header = Header::decode(&encode_response(Opcode::Get, Status::Success, b"k", b"", b"", 1, 0)).unwrap();
    header.key_length = 10;
    assert!(Header::decode(&header.to_bytes()).is_err());
}

// =============================================================================
// Encode/Decode Tests
// =============================================================================

#[test]
fn test_request_roundtrip_sections() {
    let bytes = encode_request(Opcode::Set, b"key", &[1, 2, 3, 4, 5, 6, 7, 8], b"value", 99, 1234);
    let (message, consumed) = parse_message(&bytes).unwrap().unwrap();

    assert_eq!(consumed, bytes.len());
    assert_eq!(message.header.magic, Magic::Request);
    assert_eq!(message.opcode(), Opcode::Set);
    assert_eq!(message.opaque(), 99);
    assert_eq!(message.header.cas, 1234);
    assert_eq!(&message.extras[..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(&message.key[..], b"key");
    assert_eq!(&message.value[..], b"value");
    assert_eq!(message.encoded_len(), bytes.len());
}

#[test]
fn test_response_carries_status() {
    let bytes = encode_response(Opcode::Get, Status::KeyNotFound, b"", b"", b"Not found", 3, 0);
    let (message, _) = parse_message(&bytes).unwrap().unwrap();

    assert_eq!(message.header.magic, Magic::Response);
    assert_eq!(message.status(), Status::KeyNotFound);
    assert_eq!(&message.value[..], b"Not found");
}

#[test]
fn test_encode_request_into_appends() {
    let mut out = Vec::new();
    encode_request_into(&mut out, Opcode::GetKQ, b"a", b"", b"", 1, 0);
    encode_request_into(&mut out, Opcode::NoOp, b"", b"", b"", 1, 0);

    let (messages, consumed) = parse_buffer(&out).unwrap();
    assert_eq!(consumed, out.len());
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].opcode(), Opcode::GetKQ);
    assert_eq!(messages[1].opcode(), Opcode::NoOp);
    assert!(messages[1].is_terminator());
}

// =============================================================================
// Streaming Parser Tests
// =============================================================================

#[test]
fn test_parse_incomplete_header() {
    let bytes = encode_response(Opcode::Get, Status::Success, b"", b"", b"v", 1, 0);
    assert!(parse_message(&bytes[..HEADER_SIZE - 1]).unwrap().is_none());
}

#[test]
fn test_parse_incomplete_body() {
    let bytes = encode_response(Opcode::Get, Status::Success, b"", b"", b"value", 1, 0);
    assert!(parse_message(&bytes[..bytes.len() - 1]).unwrap().is_none());

    let (messages, consumed) = parse_buffer(&bytes[..bytes.len() - 1]).unwrap();
    assert!(messages.is_empty());
    assert_eq!(consumed, 0);
}

#[test]
fn test_parse_buffer_reports_consumed_prefix() {
    let first = encode_response(Opcode::Get, Status::Success, b"", b"", b"one", 1, 0);
    let second = encode_response(Opcode::Get, Status::Success, b"", b"", b"two", 2, 0);
    let mut stream = first.clone();
    stream.extend_from_slice(&second[..10]);

    let (messages, consumed) = parse_buffer(&stream).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(consumed, first.len());
    assert_eq!(&messages[0].value[..], b"one");
}

#[test]
fn test_split_buffer_matches_whole_buffer() {
    let mut stream = Vec::new();
    for (opaque, value) in [(1u32, &b"alpha"[..]), (2, b""), (3, b"gamma-gamma")] {
        stream.extend(encode_response(Opcode::Get, Status::Success, b"", b"", value, opaque, 0));
    }
    let (whole, _) = parse_buffer(&stream).unwrap();

    // Feed the same bytes one at a time through an accumulation buffer.
    let mut buffer = BytesMut::new();
    let mut incremental = Vec::new();
    for byte in &stream {
        buffer.extend_from_slice(&[*byte]);
        incremental.extend(parse_bytes(&mut buffer).unwrap());
    }

    assert!(buffer.is_empty());
    assert_eq!(incremental, whole);
    let opaques: Vec<u32> = incremental.iter().map(|m| m.opaque()).collect();
    assert_eq!(opaques, vec![1, 2, 3]);
}

#[test]
fn test_parse_bytes_leaves_partial_tail() {
    let bytes = encode_response(Opcode::Version, Status::Success, b"", b"", b"1.6.21", 5, 0);
    let mut buffer = BytesMut::from(&bytes[..]);
    buffer.extend_from_slice(&bytes[..7]);

    let messages = parse_bytes(&mut buffer).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(buffer.len(), 7);
}

#[test]
fn test_pipeline_terminated_by_noop() {
    let mut stream = Vec::new();
    stream.extend(encode_response(Opcode::GetKQ, Status::Success, b"hello", &[0; 4], b"world", 9, 11));
    stream.extend(encode_response(Opcode::GetKQ, Status::Success, b"hello3", &[0; 4], b"world3", 9, 12));
    stream.extend(encode_response(Opcode::NoOp, Status::Success, b"", b"", b"", 9, 0));

    let (messages, _) = parse_buffer(&stream).unwrap();
    let terminators: Vec<bool> = messages.iter().map(|m| m.is_terminator()).collect();
    assert_eq!(terminators, vec![false, false, true]);
    assert!(messages.iter().all(|m| m.opaque() == 9));
}

#[test]
fn test_parse_rejects_oversized_body() {
    let mut bytes = encode_response(Opcode::Get, Status::Success, b"", b"", b"", 1, 0);
    bytes[8..12].copy_from_slice(&(MAX_BODY_SIZE + 1).to_be_bytes());
    assert!(matches!(parse_message(&bytes), Err(MemcacheError::Protocol(_))));
}

#[test]
fn test_parse_rejects_garbage() {
    let mut buffer = BytesMut::from(&[0u8; 32][..]);
    assert!(parse_bytes(&mut buffer).is_err());
}

#[test]
fn test_next_message_keeps_frames_ahead_of_garbage() {
    let reply = encode_response(Opcode::Increment, Status::Success, b"", b"", &7u64.to_be_bytes(), 3, 1);
    let mut buffer = BytesMut::from(&reply[..]);
    buffer.extend_from_slice(&[0xff; 24]);

    let first = next_message(&mut buffer).unwrap().unwrap();
    assert_eq!(first.opaque(), 3);
    assert_eq!(&first.value[..], &7u64.to_be_bytes());

    assert!(matches!(next_message(&mut buffer), Err(MemcacheError::Protocol(_))));
    assert_eq!(buffer.len(), 24);
}

#[test]
fn test_next_message_waits_for_complete_frame() {
    let reply = encode_response(Opcode::Version, Status::Success, b"", b"", b"1.6.21", 5, 0);
    let mut buffer = BytesMut::from(&reply[..10]);

    assert!(next_message(&mut buffer).unwrap().is_none());
    assert_eq!(buffer.len(), 10);
}

// =============================================================================
// Quiet Stream Tests
// =============================================================================

#[test]
fn test_ends_quiet_stream() {
    let parse = |opcode, status: Status, value: &[u8]| {
        let bytes = encode_response(opcode, status, b"", b"", value, 1, 0);
        parse_message(&bytes).unwrap().unwrap().0
    };

    assert!(parse(Opcode::NoOp, Status::Success, b"").ends_quiet_stream());
    assert!(!parse(Opcode::Stat, Status::Success, b"42").ends_quiet_stream());
    assert!(parse(Opcode::Stat, Status::KeyNotFound, b"Not found").ends_quiet_stream());
    assert!(parse(Opcode::GetKQ, Status::UnknownCommand, b"Unknown command").ends_quiet_stream());
    assert!(!parse(Opcode::GetKQ, Status::KeyNotFound, b"Not found").ends_quiet_stream());
    assert!(!parse(Opcode::GetK, Status::KeyNotFound, b"Not found").ends_quiet_stream());
}
