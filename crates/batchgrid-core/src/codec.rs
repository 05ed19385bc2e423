//! Length-delimited payload codec for job storage files.
//!
//! A storage file is a plain concatenation of frames. Each frame is an
//! 8-byte little-endian length followed by that many bytes of JSON, so a
//! single file can carry any number of values appended one after another.
//! Workers read frames until the file ends.

use std::io::{ErrorKind, Read, Write};

use serde_json::Value;

use crate::error::{CoreError, CoreResult};

const LEN_BYTES: usize = 8;

/// Append one frame per value to `writer`.
pub fn encode_payloads<W: Write>(mut writer: W, values: &[Value]) -> CoreResult<()> {
    for value in values {
        let bytes = serde_json::to_vec(value)?;
        writer.write_all(&(bytes.len() as u64).to_le_bytes())?;
        writer.write_all(&bytes)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read frames until end of input.
///
/// A stream that ends inside a frame is an error.
pub fn decode_payloads<R: Read>(mut reader: R) -> CoreResult<Vec<Value>> {
    let mut values = Vec::new();
    loop {
        let mut len = [0u8; LEN_BYTES];
        let first = loop {
            match reader.read(&mut len[..1]) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        if first == 0 {
            break;
        }
        read_frame_part(&mut reader, &mut len[1..], values.len())?;

        let size = usize::try_from(u64::from_le_bytes(len)).map_err(|_| {
            CoreError::Truncated(format!("frame {} declares an oversized length", values.len()))
        })?;
        let mut body = vec![0u8; size];
        read_frame_part(&mut reader, &mut body, values.len())?;
        values.push(serde_json::from_slice(&body)?);
    }
    Ok(values)
}

fn read_frame_part<R: Read>(reader: &mut R, buf: &mut [u8], frame: usize) -> CoreResult<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            CoreError::Truncated(format!("stream ended inside frame {frame}"))
        } else {
            CoreError::Io(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn several_values_share_one_stream() {
        let values = vec![json!([1, 2, 3]), json!("/data/wd"), json!({"version": "v2"})];
        let mut buf = Vec::new();
        encode_payloads(&mut buf, &values).unwrap();
        assert_eq!(decode_payloads(buf.as_slice()).unwrap(), values);
    }

    #[test]
    fn appended_writes_are_read_back_in_order() {
        let mut buf = Vec::new();
        encode_payloads(&mut buf, &[json!(1)]).unwrap();
        encode_payloads(&mut buf, &[json!(2)]).unwrap();
        assert_eq!(decode_payloads(buf.as_slice()).unwrap(), vec![json!(1), json!(2)]);
    }

    #[test]
    fn empty_stream_has_no_values() {
        assert!(decode_payloads(&b""[..]).unwrap().is_empty());
    }

    #[test]
    fn frame_layout_is_length_prefixed() {
        let mut buf = Vec::new();
        encode_payloads(&mut buf, &[json!("ab")]).unwrap();
        assert_eq!(&buf[..8], &4u64.to_le_bytes());
        assert_eq!(&buf[8..], b"\"ab\"");
    }

    #[test]
    fn truncated_body_is_an_error() {
        let mut buf = Vec::new();
        encode_payloads(&mut buf, &[json!("payload")]).unwrap();
        buf.truncate(buf.len() - 2);
        assert!(matches!(
            decode_payloads(buf.as_slice()),
            Err(CoreError::Truncated(_))
        ));
    }

    #[test]
    fn truncated_length_is_an_error() {
        let buf = [3u8, 0, 0];
        assert!(matches!(
            decode_payloads(&buf[..]),
            Err(CoreError::Truncated(_))
        ));
    }
}
