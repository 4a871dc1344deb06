//! Wire-level message body compression.
//!
//! Stored/gossiped message bytes carry a one-byte tag: `0` is raw canonical
//! JSON, `1` and `2` are raw-deflate streams compressed against a fixed
//! preset dictionary built from the JSON tokens that recur in every
//! message. The encoder always writes tag `2`; the decoder accepts all
//! three so old dictionary versions keep decoding.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompressError {
    #[error("unknown compression tag {0}")]
    UnknownTag(u8),
    #[error("empty wire payload")]
    Empty,
    #[error("deflate error: {0}")]
    Deflate(String),
}

const DICT_V1: &[u8] =
    b"{\"previous\":\"author\":\"sequence\":\"timestamp\":\"hash\":sha256\"content\":\"type\":post";
const DICT_V2: &[u8] = b"{\"previous\":null,\"author\":\"sequence\":\"timestamp\":\"hash\":\"sha256\",\
\"content\":{\"type\":\"post\",\"text\":\"contact\":\"about\":\"vote\":\"channel\":\"signature\":.sig.ed25519";

fn dict_for(tag: u8) -> Result<&'static [u8], CompressError> {
    match tag {
        1 => Ok(DICT_V1),
        2 => Ok(DICT_V2),
        _ => Err(CompressError::UnknownTag(tag)),
    }
}

pub fn encode_tagged(tag: u8, body: &[u8]) -> Result<Vec<u8>, CompressError> {
    let mut out = Vec::with_capacity(body.len() + 1);
    match tag {
        0 => {
            out.push(0);
            out.extend_from_slice(body);
        }
        1 | 2 => {
            let dict = dict_for(tag)?;
            let mut compressor = Compress::new(Compression::default(), false);
            compressor
                .set_dictionary(dict)
                .map_err(|e| CompressError::Deflate(e.to_string()))?;
            let mut buf = Vec::with_capacity(body.len());
            compressor
                .compress_vec(body, &mut buf, FlushCompress::Finish)
                .map_err(|e| CompressError::Deflate(e.to_string()))?;
            out.push(tag);
            out.extend_from_slice(&buf);
        }
        t => return Err(CompressError::UnknownTag(t)),
    }
    Ok(out)
}

pub fn decode_tagged(wire: &[u8]) -> Result<Vec<u8>, CompressError> {
    let (&tag, body) = wire.split_first().ok_or(CompressError::Empty)?;
    match tag {
        0 => Ok(body.to_vec()),
        1 | 2 => {
            let dict = dict_for(tag)?;
            let mut decompressor = Decompress::new(false);
            decompressor
                .set_dictionary(dict)
                .map_err(|e| CompressError::Deflate(e.to_string()))?;
            let mut out = Vec::with_capacity(body.len() * 3);
            decompressor
                .decompress_vec(body, &mut out, FlushDecompress::Finish)
                .map_err(|e| CompressError::Deflate(e.to_string()))?;
            Ok(out)
        }
        t => Err(CompressError::UnknownTag(t)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_tag_round_trips() {
        let body = br#"{"content":"type":"post"}"#;
        let wire = encode_tagged(0, body).unwrap();
        assert_eq!(wire[0], 0);
        assert_eq!(decode_tagged(&wire).unwrap(), body);
    }

    #[test]
    fn dict_v2_round_trips() {
        let body = br#"{"previous":null,"author":"@abc.ed25519","content":{"type":"post","text":"hello world"}}"#;
        let wire = encode_tagged(2, body).unwrap();
        assert_eq!(wire[0], 2);
        let back = decode_tagged(&wire).unwrap();
        assert_eq!(back, body);
    }

    #[test]
    fn unknown_tag_rejected() {
        assert!(matches!(
            decode_tagged(&[9, 1, 2, 3]),
            Err(CompressError::UnknownTag(9))
        ));
    }
}
