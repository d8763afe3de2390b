//! Key and value serializers
//!
//! A serializer turns an application value into the bytes that go on the
//! wire. It is called at most once per field per record and must not have
//! side effects; a failure ends the record with [`Error::Serialization`].

use crate::{Error, Result};
use bytes::Bytes;
use serde::Serialize;
use std::marker::PhantomData;

/// Converts values of type `T` into bytes
pub trait Serializer<T: ?Sized>: Send + Sync {
    fn serialize(&self, topic: &str, data: &T) -> Result<Bytes>;
}

impl<T: ?Sized, F> Serializer<T> for F
where
    F: Fn(&str, &T) -> Result<Bytes> + Send + Sync,
{
    fn serialize(&self, topic: &str, data: &T) -> Result<Bytes> {
        self(topic, data)
    }
}

/// Pass-through for values that already are bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSerializer;

impl<T> Serializer<T> for BytesSerializer
where
    T: AsRef<[u8]> + ?Sized,
{
    fn serialize(&self, _topic: &str, data: &T) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(data.as_ref()))
    }
}

/// UTF-8 encoding of strings
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerializer;

impl<T> Serializer<T> for StringSerializer
where
    T: AsRef<str> + ?Sized,
{
    fn serialize(&self, _topic: &str, data: &T) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(data.as_ref().as_bytes()))
    }
}

/// JSON encoding through serde
pub struct JsonSerializer<T> {
    _marker: PhantomData<fn(&T)>,
}

impl<T> JsonSerializer<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize> Serializer<T> for JsonSerializer<T> {
    fn serialize(&self, topic: &str, data: &T) -> Result<Bytes> {
        serde_json::to_vec(data).map(Bytes::from).map_err(|e| {
            Error::Serialization(format!("cannot encode value for topic '{topic}' as JSON: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_bytes_serializer() {
        let out = BytesSerializer.serialize("t", &vec![1u8, 2, 3]).unwrap();
        assert_eq!(&out[..], &[1, 2, 3]);

        let out = BytesSerializer.serialize("t", &Bytes::from_static(b"raw")).unwrap();
        assert_eq!(&out[..], b"raw");
    }

    #[test]
    fn test_string_serializer() {
        let out = StringSerializer.serialize("t", "héllo").unwrap();
        assert_eq!(&out[..], "héllo".as_bytes());

        let owned = String::from("abc");
        assert_eq!(&StringSerializer.serialize("t", &owned).unwrap()[..], b"abc");
    }

    #[test]
    fn test_json_serializer() {
        let mut order = HashMap::new();
        order.insert("id", 42);
        let out = JsonSerializer::new().serialize("orders", &order).unwrap();
        assert_eq!(&out[..], br#"{"id":42}"#);
    }

    struct Unencodable;

    impl serde::Serialize for Unencodable {
        fn serialize<S: serde::Serializer>(&self, _s: S) -> std::result::Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("unsupported type"))
        }
    }

    #[test]
    fn test_json_serializer_failure() {
        let err = JsonSerializer::new().serialize("orders", &Unencodable).unwrap_err();
        match err {
            Error::Serialization(msg) => {
                assert!(msg.contains("orders"));
                assert!(msg.contains("unsupported type"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_closure_serializer() {
        let upper = |_: &str, s: &String| -> Result<Bytes> { Ok(Bytes::from(s.to_uppercase())) };
        assert_eq!(&upper.serialize("t", &"abc".to_string()).unwrap()[..], b"ABC");
    }
}
