use std::fmt;

use crate::data::{DataMut, DataReader};
use crate::encoding::DecodeError;

/// Application payload agreed upon by Paxos instances
///
/// Values travel between peers inside Accept and Decide messages, get handed to every
/// proposer thread and are compared when checking agreement, hence the bounds.
pub trait Value: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    fn encode_into(&self, buf: &mut DataMut);

    fn decode_from(buf: &mut DataReader) -> Result<Self, DecodeError>;
}

impl Value for String {
    fn encode_into(&self, buf: &mut DataMut) {
        buf.put_varint_prefixed_slice(self.as_bytes());
    }

    fn decode_from(buf: &mut DataReader) -> Result<String, DecodeError> {
        let bytes = buf.get_varint_prefixed_slice()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::Invalid("string is not utf-8"))
    }
}

impl Value for Vec<u8> {
    fn encode_into(&self, buf: &mut DataMut) {
        buf.put_varint_prefixed_slice(&self[..]);
    }

    fn decode_from(buf: &mut DataReader) -> Result<Vec<u8>, DecodeError> {
        Ok(buf.get_varint_prefixed_slice()?.to_vec())
    }
}

impl Value for u64 {
    fn encode_into(&self, buf: &mut DataMut) {
        buf.put_varint(*self);
    }

    fn decode_from(buf: &mut DataReader) -> Result<u64, DecodeError> {
        buf.get_varint()
    }
}

impl Value for i64 {
    fn encode_into(&self, buf: &mut DataMut) {
        buf.put_signed_varint(*self);
    }

    fn decode_from(buf: &mut DataReader) -> Result<i64, DecodeError> {
        buf.get_signed_varint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_rejects_invalid_utf8() {
        let mut d = DataMut::default();
        d.put_varint_prefixed_slice(&[0xff, 0xfe]);
        let b = d.finalize();
        assert_eq!(String::decode_from(&mut DataReader::new(&b)),
            Err(DecodeError::Invalid("string is not utf-8")));
    }

    #[test]
    fn values_share_a_buffer() {
        let mut d = DataMut::default();
        "hello".to_string().encode_into(&mut d);
        vec![1u8, 2, 3].encode_into(&mut d);
        (-7i64).encode_into(&mut d);
        42u64.encode_into(&mut d);
        let b = d.finalize();

        let mut r = DataReader::new(&b);
        assert_eq!(String::decode_from(&mut r), Ok("hello".to_string()));
        assert_eq!(Vec::<u8>::decode_from(&mut r), Ok(vec![1u8, 2, 3]));
        assert_eq!(i64::decode_from(&mut r), Ok(-7));
        assert_eq!(u64::decode_from(&mut r), Ok(42));
        assert_eq!(r.remaining(), 0);
    }
}
