//! Value serializers
//!
//! Stores deal in bytes; a `Serializer` turns typed values into those bytes
//! and back.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StoreError};

/// Converts values of type `T` to and from record bytes
pub trait Serializer<T>: Send + Sync {
    fn serialize(&self, value: &T) -> Result<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> Result<T>;
}

/// Raw bytes, stored as-is
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSerializer;

impl Serializer<Vec<u8>> for BytesSerializer {
    fn serialize(&self, value: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(value.clone())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// UTF-8 strings
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerializer;

impl Serializer<String> for StringSerializer {
    fn serialize(&self, value: &String) -> Result<Vec<u8>> {
        Ok(value.as_bytes().to_vec())
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

/// Any serde type, encoded with bincode
pub struct BincodeSerializer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeSerializer<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for BincodeSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for BincodeSerializer<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T: Serialize + DeserializeOwned> Serializer<T> for BincodeSerializer<T> {
    fn serialize(&self, value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}
