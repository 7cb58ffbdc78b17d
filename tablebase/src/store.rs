use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use fnv::FnvHashMap;
use thiserror::Error;

use engine::Descriptor;

/// One tablebase in memory: canonical position bytes mapped to 3-byte move
/// records.
pub type TablebaseMap = FnvHashMap<Vec<u8>, [u8; 3]>;

const MAGIC: &[u8; 4] = b"ETB1";
const VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a tablebase file (bad magic)")]
    BadMagic,
    #[error("unsupported tablebase format version {0}")]
    UnsupportedVersion(u8),
    #[error("tablebase file truncated")]
    Truncated,
}

pub fn tablebase_path(dir: &Path, descriptor: &Descriptor) -> PathBuf {
    dir.join(format!("{}.tb", descriptor))
}

/// Descriptors with a tablebase file present in `dir`, sorted. A missing
/// directory simply has no tablebases yet.
pub fn available_descriptors(dir: &Path) -> Vec<Descriptor> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut descriptors: Vec<Descriptor> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("tb") {
                return None;
            }
            path.file_stem()
                .and_then(|stem| stem.to_str())
                .map(Descriptor::new)
        })
        .collect();
    descriptors.sort();
    descriptors
}

pub fn write_tablebase(path: &Path, entries: &TablebaseMap) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(MAGIC)?;
    writer.write_all(&[VERSION])?;
    writer.write_all(&(entries.len() as u64).to_le_bytes())?;

    for (key, record) in entries {
        writer.write_all(&(key.len() as u16).to_le_bytes())?;
        writer.write_all(key)?;
        writer.write_all(record)?;
    }

    writer.flush()?;
    Ok(())
}

pub fn read_tablebase(path: &Path) -> Result<TablebaseMap, StoreError> {
    let mut reader = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 4];
    read_exact(&mut reader, &mut magic)?;
    if &magic != MAGIC {
        return Err(StoreError::BadMagic);
    }

    let mut version = [0u8; 1];
    read_exact(&mut reader, &mut version)?;
    if version[0] != VERSION {
        return Err(StoreError::UnsupportedVersion(version[0]));
    }

    let mut count_bytes = [0u8; 8];
    read_exact(&mut reader, &mut count_bytes)?;
    let count = u64::from_le_bytes(count_bytes) as usize;

    let mut entries = TablebaseMap::with_capacity_and_hasher(count, Default::default());
    for _ in 0..count {
        let mut key_len = [0u8; 2];
        read_exact(&mut reader, &mut key_len)?;
        let mut key = vec![0u8; u16::from_le_bytes(key_len) as usize];
        read_exact(&mut reader, &mut key)?;
        let mut record = [0u8; 3];
        read_exact(&mut reader, &mut record)?;
        entries.insert(key, record);
    }

    Ok(entries)
}

fn read_exact(reader: &mut impl Read, buf: &mut [u8]) -> Result<(), StoreError> {
    reader.read_exact(buf).map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            StoreError::Truncated
        } else {
            StoreError::Io(err)
        }
    })
}

/// Rough in-memory footprint of a loaded tablebase, used for the manager's
/// cache budget.
pub fn approximate_size(entries: &TablebaseMap) -> usize {
    entries
        .keys()
        .map(|key| key.len() + 3 + std::mem::size_of::<usize>() * 2)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "tablebase-store-{}-{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn sample_map() -> TablebaseMap {
        let mut entries = TablebaseMap::default();
        entries.insert(vec![1, 2, 3], [10, 20, 30]);
        entries.insert(vec![4, 5], [1, 2, 3]);
        entries.insert(vec![6], [0, 0, 255]);
        entries
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = temp_dir("round-trip");
        let path = tablebase_path(&dir, &Descriptor::new("KQk"));
        let entries = sample_map();
        write_tablebase(&path, &entries).unwrap();
        assert_eq!(read_tablebase(&path).unwrap(), entries);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_available_descriptors_lists_tb_files() {
        let dir = temp_dir("available");
        write_tablebase(&tablebase_path(&dir, &Descriptor::new("KRk")), &sample_map()).unwrap();
        write_tablebase(&tablebase_path(&dir, &Descriptor::new("KQk")), &sample_map()).unwrap();
        fs::write(dir.join("notes.txt"), b"ignored").unwrap();

        assert_eq!(
            available_descriptors(&dir),
            vec![Descriptor::new("KQk"), Descriptor::new("KRk")]
        );
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_available_descriptors_missing_dir_is_empty() {
        assert!(available_descriptors(Path::new("/nonexistent/tablebases")).is_empty());
    }

    #[test]
    fn test_read_rejects_bad_magic() {
        let dir = temp_dir("bad-magic");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("KQk.tb");
        fs::write(&path, b"NO").unwrap();
        assert!(matches!(read_tablebase(&path), Err(StoreError::Truncated)));

        fs::write(&path, b"NOPE\x01\x00\x00\x00\x00\x00\x00\x00\x00").unwrap();
        assert!(matches!(read_tablebase(&path), Err(StoreError::BadMagic)));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_read_rejects_truncated_entries() {
        let dir = temp_dir("truncated");
        let path = tablebase_path(&dir, &Descriptor::new("KQk"));
        write_tablebase(&path, &sample_map()).unwrap();

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();
        assert!(matches!(read_tablebase(&path), Err(StoreError::Truncated)));
        let _ = fs::remove_dir_all(&dir);
    }
}
