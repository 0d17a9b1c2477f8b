//! Line framing limits on client streams.

use bytes::BytesMut;
use session_broker::ipc::codec::{LineCodec, MAX_LINE_BYTES};
use session_broker::AppError;
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn decodes_complete_lines_only() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("{\"type\":\"die\"}\n{\"type\"");

    assert_eq!(
        codec.decode(&mut buf).expect("decode"),
        Some("{\"type\":\"die\"}".to_owned())
    );
    assert_eq!(codec.decode(&mut buf).expect("decode"), None);
}

#[test]
fn trailing_line_is_returned_at_eof() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("last");
    assert_eq!(
        codec.decode_eof(&mut buf).expect("decode"),
        Some("last".to_owned())
    );
}

#[test]
fn oversized_line_is_rejected() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from(vec![b'a'; MAX_LINE_BYTES + 1].as_slice());
    let err = codec.decode(&mut buf).unwrap_err();
    assert!(matches!(err, AppError::Ipc(_)));
}

#[test]
fn encoding_appends_newline() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::new();
    codec
        .encode("{\"type\":\"interact\"}".to_owned(), &mut buf)
        .expect("encode");
    assert_eq!(&buf[..], b"{\"type\":\"interact\"}\n");
}
