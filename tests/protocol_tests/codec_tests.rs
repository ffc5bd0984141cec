//! Codec Tests
//!
//! Tests for command encoding and reply decoding.

use std::io::Cursor;

use atlaskv_client::protocol::{
    decode_reply, encode_command, encode_reply, read_reply, write_command, CommandArgs,
    CommandType, Decoded, Reply, ReplyDecoder,
};
use atlaskv_client::ClientError;
use bytes::{Bytes, BytesMut};

// =============================================================================
// Helper Functions
// =============================================================================

fn decode_all(decoder: &mut ReplyDecoder, buf: &mut BytesMut) -> Vec<Reply> {
    let mut replies = Vec::new();
    while let Some(reply) = decoder.decode(buf).unwrap() {
        replies.push(reply);
    }
    replies
}

// =============================================================================
// Command Encoding Tests
// =============================================================================

#[test]
fn test_encode_get() {
    let args = CommandArgs::new(CommandType::Get).arg("key");
    let encoded = encode_command(&args).unwrap();
    assert_eq!(&encoded[..], b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
}

#[test]
fn test_encode_no_arguments() {
    let encoded = encode_command(&CommandArgs::new(CommandType::Ping)).unwrap();
    assert_eq!(&encoded[..], b"*1\r\n$4\r\nPING\r\n");
}

#[test]
fn test_encode_integer_argument() {
    let args = CommandArgs::new(CommandType::IncrBy).arg("n").arg_int(-42);
    let encoded = encode_command(&args).unwrap();
    assert_eq!(&encoded[..], b"*3\r\n$6\r\nINCRBY\r\n$1\r\nn\r\n$3\r\n-42\r\n");
}

#[test]
fn test_encode_binary_and_empty_arguments() {
    let binary: Vec<u8> = vec![0x00, b'\r', b'\n', 0xFF];
    let args = CommandArgs::new(CommandType::Set)
        .arg(Bytes::from(binary.clone()))
        .arg(Bytes::new());
    let encoded = encode_command(&args).unwrap();

    let mut expected = b"*3\r\n$3\r\nSET\r\n$4\r\n".to_vec();
    expected.extend_from_slice(&binary);
    expected.extend_from_slice(b"\r\n$0\r\n\r\n");
    assert_eq!(&encoded[..], &expected[..]);
}

#[test]
fn test_encode_custom_keyword() {
    let args = CommandArgs::new(CommandType::parse("object")).arg("ENCODING");
    let encoded = encode_command(&args).unwrap();
    assert!(encoded.starts_with(b"*2\r\n$6\r\n"));
}

#[test]
fn test_encode_rejects_unframeable_keyword() {
    let empty = CommandArgs::new(CommandType::Custom(String::new()));
    assert!(matches!(encode_command(&empty), Err(ClientError::InvalidCommand(_))));

    let spaced = CommandArgs::new(CommandType::Custom("BAD CMD".to_string()));
    assert!(matches!(encode_command(&spaced), Err(ClientError::InvalidCommand(_))));
}

#[test]
fn test_command_type_parse_is_case_insensitive() {
    assert_eq!(CommandType::parse("get"), CommandType::Get);
    assert_eq!(CommandType::parse("MuLtI"), CommandType::Multi);
    assert!(CommandType::parse("exec").is_transaction_control());
    assert!(CommandType::parse("psubscribe").is_subscription());
    assert!(!CommandType::parse("publish").is_subscription());
}

#[test]
fn test_custom_keyword_resolves_to_known_command() {
    let args = CommandArgs::new(CommandType::Custom("multi".to_string()));
    assert_eq!(args.command_type(), &CommandType::Multi);
    assert_eq!(&encode_command(&args).unwrap()[..], b"*1\r\n$5\r\nMULTI\r\n");

    assert!(CommandType::Custom("Subscribe".to_string()).is_subscription());
    assert!(CommandType::Custom("EXEC".to_string()).is_transaction_control());
    assert!(!CommandType::Custom("OBJECT".to_string()).is_transaction_control());
}

// =============================================================================
// Reply Decoding Tests
// =============================================================================

#[test]
fn test_decode_scalars() {
    let cases: Vec<(&[u8], Reply)> = vec![
        (&b"+OK\r\n"[..], Reply::status("OK")),
        (&b"-ERR bad\r\n"[..], Reply::error("ERR bad")),
        (&b":-17\r\n"[..], Reply::Integer(-17)),
        (&b"$5\r\nhello\r\n"[..], Reply::bulk("hello")),
        (&b"$0\r\n\r\n"[..], Reply::bulk(Bytes::new())),
        (&b"$-1\r\n"[..], Reply::Nil),
        (&b"*-1\r\n"[..], Reply::NilArray),
        (&b"*0\r\n"[..], Reply::Array(vec![])),
    ];
    for (input, expected) in cases {
        match decode_reply(input).unwrap() {
            Decoded::Complete { reply, consumed } => {
                assert_eq!(reply, expected);
                assert_eq!(consumed, input.len());
            }
            Decoded::NeedMoreData => panic!("incomplete: {:?}", input),
        }
    }
}

#[test]
fn test_decode_nested_array() {
    let input = b"*3\r\n:1\r\n*2\r\n$1\r\na\r\n$-1\r\n+x\r\n";
    let expected = Reply::Array(vec![
        Reply::Integer(1),
        Reply::Array(vec![Reply::bulk("a"), Reply::Nil]),
        Reply::status("x"),
    ]);
    match decode_reply(input).unwrap() {
        Decoded::Complete { reply, .. } => assert_eq!(reply, expected),
        Decoded::NeedMoreData => panic!("incomplete"),
    }
}

#[test]
fn test_decode_bulk_containing_crlf() {
    let input = b"$6\r\na\r\nb\r\n\r\n";
    match decode_reply(input).unwrap() {
        Decoded::Complete { reply, consumed } => {
            assert_eq!(reply, Reply::bulk(&b"a\r\nb\r\n"[..]));
            assert_eq!(consumed, input.len());
        }
        Decoded::NeedMoreData => panic!("incomplete"),
    }
}

#[test]
fn test_decode_incomplete_needs_more_data() {
    let inputs: [&[u8]; 5] = [b"+OK", b"$5\r\nhel", b"*2\r\n:1\r\n", b"", b"$5\r\nhello"];
    for input in inputs {
        assert_eq!(decode_reply(input).unwrap(), Decoded::NeedMoreData);
    }
}

#[test]
fn test_decode_reports_consumed_for_first_reply_only() {
    let input = b":1\r\n:2\r\n";
    match decode_reply(input).unwrap() {
        Decoded::Complete { reply, consumed } => {
            assert_eq!(reply, Reply::Integer(1));
            assert_eq!(consumed, 4);
        }
        Decoded::NeedMoreData => panic!("incomplete"),
    }
}

#[test]
fn test_decode_unknown_type_byte_is_protocol_error() {
    assert!(matches!(decode_reply(b"!oops\r\n"), Err(ClientError::Protocol(_))));
    // Detected before the line terminator arrives
    assert!(matches!(decode_reply(b"?"), Err(ClientError::Protocol(_))));
}

#[test]
fn test_decode_malformed_lengths() {
    assert!(matches!(decode_reply(b"$abc\r\n"), Err(ClientError::Protocol(_))));
    assert!(matches!(decode_reply(b"$-2\r\n"), Err(ClientError::Protocol(_))));
    assert!(matches!(decode_reply(b":12x\r\n"), Err(ClientError::Protocol(_))));
    assert!(matches!(decode_reply(b"$3\r\nabcXY"), Err(ClientError::Protocol(_))));
}

#[test]
fn test_decode_enforces_limits() {
    let mut decoder = ReplyDecoder::with_limits(2, 4);

    let mut too_long = BytesMut::from(&b"$5\r\nhello\r\n"[..]);
    assert!(matches!(decoder.decode(&mut too_long), Err(ClientError::Protocol(_))));

    let mut decoder = ReplyDecoder::with_limits(2, 4);
    let mut too_deep = BytesMut::from(&b"*1\r\n*1\r\n*1\r\n:1\r\n"[..]);
    assert!(matches!(decoder.decode(&mut too_deep), Err(ClientError::Protocol(_))));
}

// =============================================================================
// Resumable Decoding Tests
// =============================================================================

#[test]
fn test_decoder_resumes_across_every_split_point() {
    let reply = Reply::Array(vec![
        Reply::bulk("first"),
        Reply::Array(vec![Reply::Integer(42), Reply::Nil, Reply::bulk(&b"x\r\ny"[..])]),
        Reply::status("OK"),
        Reply::NilArray,
    ]);
    let wire = encode_reply(&reply);

    for split in 0..=wire.len() {
        let mut decoder = ReplyDecoder::new();
        let mut buf = BytesMut::from(&wire[..split]);
        let early = decoder.decode(&mut buf).unwrap();
        if split < wire.len() {
            assert!(early.is_none(), "complete before byte {}", split);
            buf.extend_from_slice(&wire[split..]);
            let decoded = decoder.decode(&mut buf).unwrap();
            assert_eq!(decoded, Some(reply.clone()), "split at {}", split);
        } else {
            assert_eq!(early, Some(reply.clone()));
        }
        assert!(buf.is_empty());
        assert!(!decoder.is_mid_frame());
    }
}

#[test]
fn test_decoder_byte_at_a_time() {
    let wire = b"*2\r\n$3\r\nfoo\r\n:7\r\n+PONG\r\n";
    let mut decoder = ReplyDecoder::new();
    let mut buf = BytesMut::new();
    let mut replies = Vec::new();
    for byte in wire.iter() {
        buf.extend_from_slice(&[*byte]);
        replies.extend(decode_all(&mut decoder, &mut buf));
    }
    assert_eq!(
        replies,
        vec![
            Reply::Array(vec![Reply::bulk("foo"), Reply::Integer(7)]),
            Reply::status("PONG"),
        ]
    );
}

#[test]
fn test_decoder_many_replies_in_one_buffer() {
    let mut buf = BytesMut::new();
    for i in 0..100 {
        buf.extend_from_slice(&encode_reply(&Reply::Integer(i)));
    }
    let mut decoder = ReplyDecoder::new();
    let replies = decode_all(&mut decoder, &mut buf);
    assert_eq!(replies.len(), 100);
    assert_eq!(replies[99], Reply::Integer(99));
}

#[test]
fn test_decoder_reset_discards_partial_frame() {
    let mut decoder = ReplyDecoder::new();
    let mut buf = BytesMut::from(&b"*2\r\n:1\r\n"[..]);
    assert!(decoder.decode(&mut buf).unwrap().is_none());
    assert!(decoder.is_mid_frame());

    decoder.reset();
    assert!(!decoder.is_mid_frame());
    let mut fresh = BytesMut::from(&b":5\r\n"[..]);
    assert_eq!(decoder.decode(&mut fresh).unwrap(), Some(Reply::Integer(5)));
}

// =============================================================================
// Stream I/O Tests
// =============================================================================

#[test]
fn test_write_command_to_stream() {
    let mut out = Vec::new();
    write_command(&mut out, &CommandArgs::new(CommandType::Echo).arg("hi")).unwrap();
    assert_eq!(out, b"*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n");
}

#[test]
fn test_read_reply_from_stream_keeps_remainder() {
    let mut cursor = Cursor::new(b"+PONG\r\n:3\r\n".to_vec());
    let mut decoder = ReplyDecoder::new();
    let mut buf = BytesMut::new();

    let first = read_reply(&mut cursor, &mut decoder, &mut buf).unwrap();
    assert_eq!(first, Reply::status("PONG"));
    let second = read_reply(&mut cursor, &mut decoder, &mut buf).unwrap();
    assert_eq!(second, Reply::Integer(3));
}

#[test]
fn test_read_reply_eof_is_connection_error() {
    let mut cursor = Cursor::new(b"$10\r\nshort".to_vec());
    let mut decoder = ReplyDecoder::new();
    let mut buf = BytesMut::new();
    let err = read_reply(&mut cursor, &mut decoder, &mut buf).unwrap_err();
    assert!(err.is_connection_error());
}

// =============================================================================
// Reply Helper Tests
// =============================================================================

#[test]
fn test_reply_helpers() {
    assert!(Reply::status("OK").is_ok());
    assert!(!Reply::status("QUEUED").is_ok());
    assert!(Reply::error("ERR x").is_error());
    assert!(Reply::Nil.is_nil());
    assert!(Reply::NilArray.is_nil());
    assert_eq!(Reply::bulk("v").as_bytes(), Some(&b"v"[..]));
    assert_eq!(Reply::Integer(3).as_integer(), Some(3));
    assert_eq!(Reply::Integer(3).as_bytes(), None);
}
