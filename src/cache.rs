//! 静态文件内容缓存。
//!
//! 以 LRU 策略保存最近访问的静态文件内容，条目以文件修改时间校验，
//! 磁盘上的文件被改写后下一次访问会重新读取。

use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::SystemTime;

use bytes::Bytes;
use log::debug;
use lru::LruCache;

/// 超过该大小的文件每次直接从磁盘读取，不进入缓存
pub const MAX_CACHED_FILE_SIZE: u64 = 4 * 1024 * 1024;

#[derive(Clone)]
struct CacheEntry {
    content: Bytes,
    modified_time: SystemTime,
}

pub struct FileCache {
    cache: LruCache<String, CacheEntry>,
}

impl FileCache {
    // 容量为 0 时按 1 处理
    pub fn from_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
        }
    }

    pub fn push(&mut self, filename: &str, bytes: Bytes, modified_time: SystemTime) {
        let entry = CacheEntry {
            content: bytes,
            modified_time,
        };
        self.cache.put(filename.to_string(), entry);
    }

    pub fn should_cache(file_size: u64) -> bool {
        file_size <= MAX_CACHED_FILE_SIZE
    }

    // 修改时间不一致的条目视为失效
    pub fn find(&mut self, filename: &str, current_modified_time: SystemTime) -> Option<Bytes> {
        match self.cache.get(filename) {
            Some(entry) if entry.modified_time == current_modified_time => {
                Some(entry.content.clone())
            }
            _ => None,
        }
    }

    /// 读取文件内容：缓存有效时直接返回，否则读取磁盘并视大小决定是否写入缓存。
    pub fn load(&mut self, path: &Path) -> io::Result<Bytes> {
        let metadata = fs::metadata(path)?;
        let modified_time = metadata.modified()?;
        let key = path.to_string_lossy().to_string();

        if let Some(bytes) = self.find(&key, modified_time) {
            debug!("缓存命中：{}，{} bytes", key, bytes.len());
            return Ok(bytes);
        }

        debug!("缓存未命中或文件已修改：{}", key);
        let bytes = Bytes::from(fs::read(path)?);
        if Self::should_cache(metadata.len()) {
            self.push(&key, bytes.clone(), modified_time);
        } else {
            debug!("文件过大({} bytes)，跳过缓存", metadata.len());
        }
        Ok(bytes)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }
}
