//! High-level database interface that ties tables to one shared pool.

use crate::config::DEFAULT_BUFFERPOOL_SIZE;
use crate::storage::{Bufferpool, DataColumn};
use crate::table::Table;
use anyhow::{bail, Context, Result};
use log::info;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct Database {
    dir: PathBuf,
    bufferpool: Bufferpool,
    tables: Mutex<HashMap<String, Arc<Table>>>,
}

impl Database {
    /// Open a database directory, creating it if needed. Tables are
    /// opened lazily on first access.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_pool_size(path, DEFAULT_BUFFERPOOL_SIZE)
    }

    pub fn open_with_pool_size(path: &Path, pool_size: usize) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("creating database directory {:?}", path))?;
        info!("opened database at {:?} (pool: {} frames)", path, pool_size);
        Ok(Self {
            dir: path.to_path_buf(),
            bufferpool: Bufferpool::new(pool_size),
            tables: Mutex::new(HashMap::new()),
        })
    }

    pub fn pool(&self) -> &Bufferpool {
        &self.bufferpool
    }

    /// Create a table with `num_columns` data columns, keyed on
    /// `key_index`.
    pub fn create_table(
        &self,
        name: &str,
        num_columns: usize,
        key_index: DataColumn,
    ) -> Result<Arc<Table>> {
        let mut tables = self.tables.lock();
        if tables.contains_key(name) || self.dir.join(name).exists() {
            bail!("table {:?} already exists", name);
        }
        let table = Arc::new(Table::create(
            &self.dir,
            name,
            num_columns,
            key_index,
            self.bufferpool.clone(),
        )?);
        tables.insert(name.to_string(), Arc::clone(&table));
        Ok(table)
    }

    /// Fetch a table, opening it from disk on first access.
    pub fn get_table(&self, name: &str) -> Result<Arc<Table>> {
        let mut tables = self.tables.lock();
        if let Some(table) = tables.get(name) {
            return Ok(Arc::clone(table));
        }
        if !self.dir.join(name).exists() {
            bail!("table {:?} does not exist", name);
        }
        let table = Arc::new(Table::open(&self.dir, name, self.bufferpool.clone())?);
        tables.insert(name.to_string(), Arc::clone(&table));
        Ok(table)
    }

    /// Drop a table and delete its files. The table must not be in use.
    pub fn drop_table(&self, name: &str) -> Result<()> {
        let mut tables = self.tables.lock();
        if let Some(table) = tables.get(name) {
            if Arc::strong_count(table) > 1 {
                bail!("table {:?} is still in use", name);
            }
        }
        if let Some(table) = tables.remove(name) {
            self.bufferpool.flush_table(table.dir())?;
        }
        let path = self.dir.join(name);
        if !path.exists() {
            bail!("table {:?} does not exist", name);
        }
        std::fs::remove_dir_all(&path)
            .with_context(|| format!("removing table directory {:?}", path))?;
        info!("dropped table {:?}", name);
        Ok(())
    }

    /// Flush every open table and all dirty frames. Must be called
    /// before drop; there is no write-ahead log to replay.
    pub fn close(&self) -> Result<()> {
        let tables = self.tables.lock();
        for table in tables.values() {
            table.close()?;
        }
        self.bufferpool.flush()?;
        Ok(())
    }
}
