//! User-plugged encoding between typed elements and opaque payload bytes,
//! plus the reduce-function seam for reduction operators.

use crate::errors::{GroupCommError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::marker::PhantomData;

/// Bridges typed values and the byte-string payloads carried on the wire.
///
/// One codec instance is attached to each operator; the engine never
/// inspects encoded bytes.
pub trait Codec<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<T>;
}

/// CBOR codec for any serde-serializable element type.
pub struct CborCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> CborCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for CborCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CborCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for CborCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CborCodec")
    }
}

impl<T> Codec<T> for CborCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| GroupCommError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        ciborium::from_reader(bytes).map_err(|e| GroupCommError::Serialization(e.to_string()))
    }
}

/// Combiner applied by reduction operators over the received elements.
///
/// The function must be associative for a tree-shaped reduction to be
/// well-defined; the engine does not enforce this. Elements are passed in
/// arrival order.
pub trait ReduceFunction<T>: Send + Sync {
    fn reduce(&self, elements: Vec<T>) -> Result<T>;
}

impl<T, F> ReduceFunction<T> for F
where
    F: Fn(Vec<T>) -> T + Send + Sync,
{
    fn reduce(&self, elements: Vec<T>) -> Result<T> {
        Ok(self(elements))
    }
}
