//! 本地持久化存储
//!
//! 缓存以单个序列化 blob 保存，键就是缓存格式版本字符串。写入是同步的。

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use redb::{Database, TableDefinition};

use crate::translation::error::{TranslationError, TranslationResult};

const CACHE_TABLE: TableDefinition<&str, &str> = TableDefinition::new("translation_cache");

/// 本地键值存储
pub trait LocalStore {
    fn load(&self, key: &str) -> TranslationResult<Option<String>>;
    fn save(&self, key: &str, blob: &str) -> TranslationResult<()>;
    fn remove(&self, key: &str) -> TranslationResult<()>;
}

/// 内存存储，进程退出即丢失
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: RefCell<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs.borrow().contains_key(key)
    }
}

impl LocalStore for MemoryStore {
    fn load(&self, key: &str) -> TranslationResult<Option<String>> {
        Ok(self.blobs.borrow().get(key).cloned())
    }

    fn save(&self, key: &str, blob: &str) -> TranslationResult<()> {
        self.blobs
            .borrow_mut()
            .insert(key.to_string(), blob.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> TranslationResult<()> {
        self.blobs.borrow_mut().remove(key);
        Ok(())
    }
}

/// 文件存储：每个键一个 JSON 文件
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl AsRef<Path>) -> TranslationResult<Self> {
        let dir = PathBuf::from(shellexpand::tilde(&dir.as_ref().to_string_lossy()).as_ref());
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file_name}.json"))
    }
}

impl LocalStore for FileStore {
    fn load(&self, key: &str) -> TranslationResult<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, key: &str, blob: &str) -> TranslationResult<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        // 先写临时文件再重命名，避免留下半个文件
        fs::write(&tmp, blob)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> TranslationResult<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// 基于 redb 的嵌入式存储
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    pub fn open(path: impl AsRef<Path>) -> TranslationResult<Self> {
        let path = PathBuf::from(shellexpand::tilde(&path.as_ref().to_string_lossy()).as_ref());
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let db = Database::create(&path)?;
        tracing::debug!("打开本地缓存数据库: {}", path.display());
        Ok(Self { db })
    }
}

impl LocalStore for RedbStore {
    fn load(&self, key: &str) -> TranslationResult<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = match txn.open_table(CACHE_TABLE) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let blob = table.get(key)?.map(|guard| guard.value().to_string());
        Ok(blob)
    }

    fn save(&self, key: &str, blob: &str) -> TranslationResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(CACHE_TABLE)?;
            table.insert(key, blob)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> TranslationResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(CACHE_TABLE)?;
            table.remove(key)?;
        }
        txn.commit()?;
        Ok(())
    }
}

/// 根据配置选择本地存储：有路径时用 redb，否则用内存
pub fn open_local_store(path: Option<&str>) -> TranslationResult<std::rc::Rc<dyn LocalStore>> {
    match path {
        Some(path) => {
            let store = RedbStore::open(path)
                .map_err(|e| TranslationError::StorageError(format!("{} ({})", e, path)))?;
            Ok(std::rc::Rc::new(store))
        }
        None => Ok(std::rc::Rc::new(MemoryStore::new())),
    }
}
