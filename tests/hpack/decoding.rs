//! Tests for HPACK decoding

use h2_mux::{ErrorCode, H2Header, HeaderDecoder};

/// Decode a block of regular fields (trailer mode needs no pseudo-headers).
fn decode_fields(decoder: &mut HeaderDecoder, block: &[u8]) -> Result<Vec<H2Header>, ErrorCode> {
    decoder.start(false, true);
    decoder.decode(block)?;
    Ok(decoder.end()?.headers)
}

// RFC 7541 C.2.1: literal with incremental indexing, new name
const CUSTOM_KEY: &[u8] = &[
    0x40, 0x0a, b'c', b'u', b's', b't', b'o', b'm', b'-', b'k', b'e', b'y', 0x0d, b'c', b'u',
    b's', b't', b'o', b'm', b'-', b'h', b'e', b'a', b'd', b'e', b'r',
];

#[test]
fn test_incremental_literal_is_indexed() {
    let mut decoder = HeaderDecoder::default();
    let headers = decode_fields(&mut decoder, CUSTOM_KEY).unwrap();
    assert_eq!(headers, vec![H2Header::new("custom-key", "custom-header")]);
    assert_eq!(decoder.table().len(), 1);
    assert_eq!(decoder.table().size(), 55);

    // Index 62 now refers to the new entry.
    let headers = decode_fields(&mut decoder, &[0xbe]).unwrap();
    assert_eq!(headers, vec![H2Header::new("custom-key", "custom-header")]);
}

#[test]
fn test_never_indexed_literal_not_added() {
    // RFC 7541 C.2.3
    let block = [
        0x10, 0x08, b'p', b'a', b's', b's', b'w', b'o', b'r', b'd', 0x06, b's', b'e', b'c', b'r',
        b'e', b't',
    ];
    let mut decoder = HeaderDecoder::default();
    let headers = decode_fields(&mut decoder, &block).unwrap();
    assert_eq!(headers, vec![H2Header::new("password", "secret")]);
    assert!(decoder.table().is_empty());
}

#[test]
fn test_literal_without_indexing_static_name() {
    // name index 32 (cookie) needs a continuation byte in a 4-bit prefix
    let block = [0x0f, 0x11, 0x03, b'a', b'=', b'b'];
    let mut decoder = HeaderDecoder::default();
    let headers = decode_fields(&mut decoder, &block).unwrap();
    assert_eq!(headers, vec![H2Header::new("cookie", "a=b")]);
    assert!(decoder.table().is_empty());
}

#[test]
fn test_stale_index_after_size_update() {
    let mut decoder = HeaderDecoder::default();
    decode_fields(&mut decoder, CUSTOM_KEY).unwrap();

    decoder.start(false, true);
    // size update to 0, then index 62
    assert_eq!(decoder.decode(&[0x20, 0xbe]), Err(ErrorCode::CompressionError));
}

#[test]
fn test_size_update_above_advertised_limit() {
    let mut decoder = HeaderDecoder::new(4096);
    decoder.start(false, true);
    // 8192 = 31 + 8161
    assert_eq!(decoder.decode(&[0x3f, 0xe1, 0x3f]), Err(ErrorCode::CompressionError));
}

#[test]
fn test_huffman_padding_of_a_full_byte() {
    let mut decoder = HeaderDecoder::default();
    decoder.start(false, true);
    // new name, Huffman string of one byte of ones
    assert_eq!(decoder.decode(&[0x40, 0x81, 0xff]), Err(ErrorCode::CompressionError));
}

#[test]
fn test_invalid_utf8_is_compression_error() {
    let mut decoder = HeaderDecoder::default();
    decoder.start(false, true);
    assert_eq!(
        decoder.decode(&[0x00, 0x01, b'x', 0x01, 0xff]),
        Err(ErrorCode::CompressionError)
    );
}

#[test]
fn test_stream_fault_keeps_decoding() {
    let mut decoder = HeaderDecoder::default();
    // "Custom-Key" is uppercase: the block is rejected but still indexed.
    let mut block = CUSTOM_KEY.to_vec();
    block[2] = b'C';
    decoder.start(false, true);
    decoder.decode(&block).unwrap();
    assert_eq!(decoder.end(), Err(ErrorCode::ProtocolError));
    assert_eq!(decoder.table().len(), 1);
}

#[test]
fn test_block_split_inside_string() {
    let mut decoder = HeaderDecoder::default();
    decoder.start(false, true);
    decoder.decode(&CUSTOM_KEY[..5]).unwrap();
    decoder.decode(&CUSTOM_KEY[5..14]).unwrap();
    decoder.decode(&CUSTOM_KEY[14..]).unwrap();
    let head = decoder.end().unwrap();
    assert_eq!(head.header("custom-key"), Some("custom-header"));
}

#[test]
fn test_indexed_expansion_is_bounded() {
    let mut decoder = HeaderDecoder::default();

    // A request that indexes one 4000-byte field as entry 62.
    let mut block = vec![0x82, 0x87, 0x84, 0x40, 0x05];
    block.extend_from_slice(b"x-big");
    block.extend_from_slice(&[0x7f, 0xa1, 0x1e]);
    block.extend_from_slice(&[b'a'; 4000]);
    decoder.start(false, false);
    decoder.decode(&block).unwrap();
    let big = H2Header::new("x-big", "a".repeat(4000));
    assert_eq!(decoder.end().unwrap().headers, vec![big.clone()]);

    // Every 0xbe byte would decode to 4 KB.
    let mut block = vec![0x82, 0x87, 0x84];
    block.extend(std::iter::repeat(0xbe).take(50_000));
    decoder.start(false, false);
    assert_eq!(decoder.decode(&block), Ok(()));
    assert_eq!(decoder.end(), Err(ErrorCode::ProtocolError));
    assert_eq!(decoder.table().len(), 1);

    // The next block starts clean and still sees the entry.
    decoder.start(false, false);
    decoder.decode(&[0x82, 0x87, 0x84, 0xbe]).unwrap();
    assert_eq!(decoder.end().unwrap().headers, vec![big]);
}
