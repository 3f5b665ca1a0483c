// SPDX-License-Identifier: AGPL-3.0-only
#![forbid(unsafe_code)]
use anyhow::{anyhow, Result};
use sp_codec::{Decodable, Encodable};
use sp_types::{LauncherId, Singleton};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Persistenz-Backend für Singletons. Load/Save sind pro Singleton atomar
/// (alles-oder-nichts); das Dateiformat ist für den Core opak.
pub trait SingletonStore: Send + Sync {
    fn put(&self, s: &Singleton) -> Result<()>;
    fn get(&self, launcher_id: &LauncherId) -> Result<Option<Singleton>>;
    fn has(&self, launcher_id: &LauncherId) -> bool;
    fn remove(&self, launcher_id: &LauncherId) -> Result<bool>;
    fn load_all(&self) -> Result<Vec<Singleton>>;
}

pub struct FileStore {
    singletons_dir: PathBuf,
    fsync: bool,
}

impl FileStore {
    pub fn open<P: AsRef<Path>>(root: P, fsync: bool) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let singletons_dir = root.join("singletons");
        fs::create_dir_all(&singletons_dir)?;
        // dir fsync für Crash-Sicherheit (best effort)
        if fsync {
            Self::fsync_dir(&root)?;
            Self::fsync_dir(&singletons_dir)?;
        }
        Ok(Self {
            singletons_dir,
            fsync,
        })
    }

    fn fsync_dir(dir: &Path) -> Result<()> {
        let f = OpenOptions::new().read(true).open(dir)?;
        f.sync_all()?;
        Ok(())
    }

    fn write_atomic(dir: &Path, file_name: &str, data: &[u8], fsync: bool) -> Result<()> {
        let target = dir.join(file_name);
        let parent = dir;
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(data)?;
        if fsync {
            tmp.as_file().sync_all()?;
        }
        tmp.persist(&target)
            .map_err(|e| anyhow!("persist failed: {}", e))?;
        if fsync {
            let f = OpenOptions::new().read(true).open(&target)?;
            f.sync_all()?;
            Self::fsync_dir(parent)?;
        }
        Ok(())
    }

    fn read_all(path: &Path) -> Result<Vec<u8>> {
        let mut f = File::open(path)?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn file_name(launcher_id: &LauncherId) -> String {
        format!("{}.bin", hex::encode(launcher_id.0))
    }
}

impl SingletonStore for FileStore {
    fn put(&self, s: &Singleton) -> Result<()> {
        let fname = Self::file_name(&s.launcher_id);
        let mut buf = Vec::with_capacity(s.encoded_len());
        s.encode(&mut buf)?;
        Self::write_atomic(&self.singletons_dir, &fname, &buf, self.fsync)
    }

    fn get(&self, launcher_id: &LauncherId) -> Result<Option<Singleton>> {
        let path = self.singletons_dir.join(Self::file_name(launcher_id));
        if !path.exists() {
            return Ok(None);
        }
        let mut slice = &Self::read_all(&path)?[..];
        let s = Singleton::decode(&mut slice)?;
        Ok(Some(s))
    }

    fn has(&self, launcher_id: &LauncherId) -> bool {
        self.singletons_dir
            .join(Self::file_name(launcher_id))
            .exists()
    }

    fn remove(&self, launcher_id: &LauncherId) -> Result<bool> {
        let path = self.singletons_dir.join(Self::file_name(launcher_id));
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }

    /// Lädt alle persistierten Singletons (Registry-Warmstart). Nicht lesbare
    /// Dateien werden übersprungen statt den Start zu blockieren.
    fn load_all(&self) -> Result<Vec<Singleton>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.singletons_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                continue;
            }
            let Ok(buf) = Self::read_all(&path) else { continue };
            let mut slice = &buf[..];
            if let Ok(s) = Singleton::decode(&mut slice) {
                out.push(s);
            }
        }
        out.sort_by(|a, b| a.launcher_id.cmp(&b.launcher_id));
        Ok(out)
    }
}

#[cfg(feature = "rocksdb")]
pub struct RocksDbStore {
    db: rocksdb::DB,
}

#[cfg(feature = "rocksdb")]
impl RocksDbStore {
    pub fn open(path: &str) -> Result<Self> {
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        let db = rocksdb::DB::open(&opts, path)?;
        Ok(Self { db })
    }
}

#[cfg(feature = "rocksdb")]
impl SingletonStore for RocksDbStore {
    fn put(&self, s: &Singleton) -> Result<()> {
        let mut buf = Vec::with_capacity(s.encoded_len());
        s.encode(&mut buf)?;
        self.db.put(s.launcher_id.0, buf)?;
        Ok(())
    }

    fn get(&self, launcher_id: &LauncherId) -> Result<Option<Singleton>> {
        match self.db.get(launcher_id.0)? {
            Some(v) => {
                let mut slice = &v[..];
                Ok(Some(Singleton::decode(&mut slice)?))
            }
            None => Ok(None),
        }
    }

    fn has(&self, launcher_id: &LauncherId) -> bool {
        matches!(self.db.get(launcher_id.0), Ok(Some(_)))
    }

    fn remove(&self, launcher_id: &LauncherId) -> Result<bool> {
        let present = self.has(launcher_id);
        self.db.delete(launcher_id.0)?;
        Ok(present)
    }

    fn load_all(&self) -> Result<Vec<Singleton>> {
        let mut out = Vec::new();
        for kv in self.db.iterator(rocksdb::IteratorMode::Start) {
            let (_k, v) = kv?;
            let mut slice = &v[..];
            if let Ok(s) = Singleton::decode(&mut slice) {
                out.push(s);
            }
        }
        out.sort_by(|a, b| a.launcher_id.cmp(&b.launcher_id));
        Ok(out)
    }
}
