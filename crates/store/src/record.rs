use serde::{Serialize, de::DeserializeOwned};

/// A value persisted in one bucket under a unique key.
pub trait Record: Serialize + DeserializeOwned + Send + Sync + Unpin {
    /// Bucket name; records of different types never share one.
    const BUCKET: &'static str;

    /// Unique key within the bucket.
    fn key(&self) -> String;

    /// Optional secondary index value, queried by [`crate::Store::find_by_index`].
    fn index(&self) -> Option<String> {
        None
    }
}
