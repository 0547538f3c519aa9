//! Blob store configuration.

/// Payloads shorter than this are treated as corrupt or placeholder content.
pub const DEFAULT_MIN_SIZE: u64 = 16;

/// Default read buffer for streaming stores.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default staging directory for in-progress writes, relative to the root.
pub const DEFAULT_TEMP_DIR: &str = ".tmp";

/// Configuration for a [`crate::ContentBlobStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobStoreConfig {
    /// Minimum accepted payload size in bytes.
    pub min_size: u64,
    /// Buffer size used by `store_reader`.
    pub chunk_size: usize,
    /// Whether to fsync files and shard directories after writes.
    pub sync_writes: bool,
    /// Name of the staging directory under the store root.
    pub temp_dir_name: String,
}

impl BlobStoreConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            min_size: DEFAULT_MIN_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            sync_writes: true,
            temp_dir_name: DEFAULT_TEMP_DIR.to_string(),
        }
    }

    /// Sets the minimum accepted payload size.
    pub fn with_min_size(mut self, min_size: u64) -> Self {
        self.min_size = min_size;
        self
    }

    /// Sets the streaming chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Sets the staging directory name.
    ///
    /// Names that are empty or contain a path separator keep the current value.
    pub fn with_temp_dir_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.is_empty() && !name.contains(['/', '\\']) && name != "." && name != ".." {
            self.temp_dir_name = name;
        }
        self
    }

    /// Enables or disables fsync after writes.
    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self::new()
    }
}
