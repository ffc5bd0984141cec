//! Value codecs
//!
//! The client never interprets keys or values; an injected [`ValueCodec`]
//! turns application types into argument bytes and reply bytes back into
//! application types. One codec serves a whole connection.

use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ClientError, Result};

/// Encode/decode application keys and values
pub trait ValueCodec: Clone + Send + Sync + 'static {
    type Key: Send + Sync + 'static;
    type Value: Send + Sync + 'static;

    fn encode_key(&self, key: &Self::Key) -> Result<Bytes>;
    fn encode_value(&self, value: &Self::Value) -> Result<Bytes>;
    fn decode_key(&self, bytes: &[u8]) -> Result<Self::Key>;
    fn decode_value(&self, bytes: &[u8]) -> Result<Self::Value>;
}

/// UTF-8 strings for keys and values
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Codec;

impl ValueCodec for Utf8Codec {
    type Key = String;
    type Value = String;

    fn encode_key(&self, key: &String) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(key.as_bytes()))
    }

    fn encode_value(&self, value: &String) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(value.as_bytes()))
    }

    fn decode_key(&self, bytes: &[u8]) -> Result<String> {
        decode_utf8(bytes)
    }

    fn decode_value(&self, bytes: &[u8]) -> Result<String> {
        decode_utf8(bytes)
    }
}

fn decode_utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| ClientError::Decode(format!("invalid UTF-8: {}", e)))
}

/// Raw bytes, passed through untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteArrayCodec;

impl ValueCodec for ByteArrayCodec {
    type Key = Bytes;
    type Value = Bytes;

    fn encode_key(&self, key: &Bytes) -> Result<Bytes> {
        Ok(key.clone())
    }

    fn encode_value(&self, value: &Bytes) -> Result<Bytes> {
        Ok(value.clone())
    }

    fn decode_key(&self, bytes: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(bytes))
    }

    fn decode_value(&self, bytes: &[u8]) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(bytes))
    }
}

/// Any serde types, in bincode's compact binary form
pub struct BincodeCodec<K, V> {
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> BincodeCodec<K, V> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<K, V> Default for BincodeCodec<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for BincodeCodec<K, V> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<K, V> ValueCodec for BincodeCodec<K, V>
where
    K: Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Key = K;
    type Value = V;

    fn encode_key(&self, key: &K) -> Result<Bytes> {
        bincode::serialize(key)
            .map(Bytes::from)
            .map_err(|e| ClientError::Encode(format!("key: {}", e)))
    }

    fn encode_value(&self, value: &V) -> Result<Bytes> {
        bincode::serialize(value)
            .map(Bytes::from)
            .map_err(|e| ClientError::Encode(format!("value: {}", e)))
    }

    fn decode_key(&self, bytes: &[u8]) -> Result<K> {
        bincode::deserialize(bytes).map_err(|e| ClientError::Decode(format!("key: {}", e)))
    }

    fn decode_value(&self, bytes: &[u8]) -> Result<V> {
        bincode::deserialize(bytes).map_err(|e| ClientError::Decode(format!("value: {}", e)))
    }
}
