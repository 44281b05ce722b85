// Embedded persistent key-value store used to checkpoint per-read state
// across index parts.
//
// Layout: a single append-only log file. Records are
// [key u64][len u32][value bytes]; the newest record for a key wins. An
// in-memory offset table is rebuilt by scanning the log on open. Point
// puts and gets are thread-safe behind one lock, which is sufficient: the
// writer threads are the only writers and readers only re-hydrate between
// part iterations.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read as _, Seek, SeekFrom, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rustc_hash::FxHashMap;
use thiserror::Error;

const KV_MAGIC: &[u8; 4] = b"RSKV";
const KV_VERSION: u32 = 1;
const HEADER_LEN: u64 = 8;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a ribosift store (bad magic)")]
    InvalidMagic,

    #[error("unsupported store version {0}")]
    UnsupportedVersion(u32),

    #[error("store corrupt: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

struct Inner {
    file: File,
    offsets: FxHashMap<u64, (u64, u32)>,
    write_pos: u64,
}

pub struct KeyValueStore {
    inner: Mutex<Inner>,
    path: PathBuf,
}

impl KeyValueStore {
    /// Create a fresh store under `dir`, truncating any previous one.
    pub fn create(dir: &Path) -> StoreResult<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join("reads.kv");
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(KV_MAGIC)?;
        file.write_u32::<LittleEndian>(KV_VERSION)?;
        file.flush()?;
        Ok(KeyValueStore {
            inner: Mutex::new(Inner {
                file,
                offsets: FxHashMap::default(),
                write_pos: HEADER_LEN,
            }),
            path,
        })
    }

    /// Open an existing store, rebuilding the offset table from the log.
    pub fn open(dir: &Path) -> StoreResult<Self> {
        let path = dir.join("reads.kv");
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let file_len = file.metadata()?.len();

        let mut reader = BufReader::new(&file);
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != KV_MAGIC {
            return Err(StoreError::InvalidMagic);
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != KV_VERSION {
            return Err(StoreError::UnsupportedVersion(version));
        }

        let mut offsets = FxHashMap::default();
        let mut pos = HEADER_LEN;
        while pos < file_len {
            let key = reader.read_u64::<LittleEndian>()?;
            let len = reader.read_u32::<LittleEndian>()?;
            let value_pos = pos + 12;
            if value_pos + len as u64 > file_len {
                return Err(StoreError::Corrupt(format!(
                    "truncated record for key {key} at offset {pos}"
                )));
            }
            reader.seek(SeekFrom::Current(len as i64))?;
            offsets.insert(key, (value_pos, len));
            pos = value_pos + len as u64;
        }
        drop(reader);

        Ok(KeyValueStore {
            inner: Mutex::new(Inner {
                file,
                offsets,
                write_pos: file_len,
            }),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn put(&self, key: u64, value: &[u8]) -> StoreResult<()> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let pos = inner.write_pos;
        inner.file.seek(SeekFrom::Start(pos))?;
        inner.file.write_u64::<LittleEndian>(key)?;
        inner.file.write_u32::<LittleEndian>(value.len() as u32)?;
        inner.file.write_all(value)?;
        inner.offsets.insert(key, (pos + 12, value.len() as u32));
        inner.write_pos = pos + 12 + value.len() as u64;
        Ok(())
    }

    pub fn get(&self, key: u64) -> StoreResult<Option<Vec<u8>>> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let (pos, len) = match inner.offsets.get(&key) {
            Some(&entry) => entry,
            None => return Ok(None),
        };
        inner.file.seek(SeekFrom::Start(pos))?;
        let mut buf = vec![0u8; len as usize];
        inner.file.read_exact(&mut buf)?;
        Ok(Some(buf))
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("store lock poisoned").offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn flush(&self) -> StoreResult<()> {
        self.inner
            .lock()
            .expect("store lock poisoned")
            .file
            .flush()?;
        Ok(())
    }
}
