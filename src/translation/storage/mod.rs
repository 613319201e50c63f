//! 存储模块
//!
//! 提供翻译缓存、本地持久化和远程缓存预热。

pub mod cache;
pub mod persist;
pub mod remote;

pub use cache::{CacheConfig, CacheEntry, CacheStats, TranslationCache};
pub use persist::{open_local_store, FileStore, LocalStore, MemoryStore, RedbStore};
#[cfg(feature = "http")]
pub use remote::HttpRemoteStore;
pub use remote::{RemoteCacheLoader, RemoteStore, RemoteTranslation, WarmOutcome};
