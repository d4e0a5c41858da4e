//! Object store trait definition
//!
//! Defines the async interface that every object storage client implements.

use async_trait::async_trait;
use bytes::Bytes;
use harness_core::Result;

/// Separator used by object keys, whatever the local platform uses
pub const KEY_SEPARATOR: char = '/';

/// Async trait for object storage clients
///
/// Keys are flat strings inside a bucket; `/` only has meaning to callers
/// that choose to treat keys as paths (see [`crate::mirror`]).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read the object stored under `key`
    ///
    /// # Errors
    /// Returns `StoragePathNotFound` if the object doesn't exist
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes>;

    /// Store `data` under `key`, replacing any existing object
    ///
    /// # Returns
    /// Number of bytes written
    async fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> Result<u64>;

    /// Delete the object stored under `key`
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// Check if an object exists
    async fn exists(&self, bucket: &str, key: &str) -> Result<bool>;

    /// List all keys starting with `prefix`, sorted
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;
}
