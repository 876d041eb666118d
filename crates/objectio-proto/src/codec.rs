//! Length-prefixed records carried in keep-alive payloads
//!
//! Each record is a `u32` little-endian length followed by a bincode body.

use bytes::{BufMut, Bytes, BytesMut};
use objectio_common::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Serialize a value without framing
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    bincode::serialize(value)
        .map(Bytes::from)
        .map_err(|e| Error::Serialization(e.to_string()))
}

/// Deserialize a value without framing
pub fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T> {
    bincode::deserialize(buf).map_err(|e| Error::Serialization(e.to_string()))
}

/// Serialize a value as one length-prefixed record
pub fn encode_record<T: Serialize>(value: &T) -> Result<Bytes> {
    let body = encode(value)?;
    let len = u32::try_from(body.len())
        .map_err(|_| Error::Serialization(format!("record of {} bytes too large", body.len())))?;
    let mut buf = BytesMut::with_capacity(4 + body.len());
    buf.put_u32_le(len);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Read the next record, or `None` at a clean end of stream
pub async fn read_record<R, T>(reader: &mut R, max_len: usize) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32_le().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > max_len {
        return Err(Error::Serialization(format!(
            "record of {len} bytes exceeds limit of {max_len}"
        )));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    decode(&buf).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use objectio_common::DeleteVersionsErrsResp;

    #[tokio::test]
    async fn test_records_back_to_back() {
        let first = DeleteVersionsErrsResp {
            errs: vec![None, Some("file not found".into())],
        };
        let second = DeleteVersionsErrsResp { errs: vec![] };

        let mut wire = encode_record(&first).unwrap().to_vec();
        wire.extend_from_slice(&encode_record(&second).unwrap());

        let mut reader = &wire[..];
        let a: DeleteVersionsErrsResp = read_record(&mut reader, 1024).await.unwrap().unwrap();
        let b: DeleteVersionsErrsResp = read_record(&mut reader, 1024).await.unwrap().unwrap();
        assert_eq!(a, first);
        assert_eq!(b, second);
        assert!(
            read_record::<_, DeleteVersionsErrsResp>(&mut reader, 1024)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_record_limit() {
        let wire = encode_record(&vec![0u8; 64]).unwrap();
        let mut reader = &wire[..];
        assert!(read_record::<_, Vec<u8>>(&mut reader, 16).await.is_err());
    }
}
