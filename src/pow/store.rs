//! Memory-mapped cache and dataset dumps
//!
//! A dump is `[magic0, magic1, word...]` in host byte order. New dumps are
//! written to a randomly named sibling, then renamed into place, so a reader
//! opening the canonical path never sees a half-written file.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut};
use tracing::{debug, warn};

use crate::errors::StoreError;

/// Header words sanity checking a dump.
pub const DUMP_MAGIC: [u32; 2] = [0xbadd_cafe, 0xfee1_dead];

const HEADER_BYTES: usize = DUMP_MAGIC.len() * 4;

/// A read-only, memory-mapped dump. Owns both the mapping and the file
/// handle; dropping it unmaps first and closes second.
pub struct MappedDump {
    map: Mmap,
    _file: File,
    path: PathBuf,
}

impl MappedDump {
    /// Payload words following the magic header.
    pub fn words(&self) -> &[u32] {
        let payload = &self.map[HEADER_BYTES..];
        // SAFETY: mappings are page aligned and the header is two words, so
        // the payload is u32 aligned; `open_dump` checked the length is a
        // multiple of four. The map is read-only and lives as long as `self`.
        unsafe { std::slice::from_raw_parts(payload.as_ptr() as *const u32, payload.len() / 4) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for MappedDump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedDump")
            .field("path", &self.path)
            .field("bytes", &self.map.len())
            .finish()
    }
}

/// Open an existing dump read-only and validate its header.
///
/// `expected_words` additionally rejects dumps whose payload length differs
/// (truncated or from a different sizing). With `lock`, the mapped pages are
/// pinned in RAM.
pub fn open_dump(
    path: &Path,
    expected_words: Option<usize>,
    lock: bool,
) -> Result<MappedDump, StoreError> {
    let file = File::open(path)?;
    // SAFETY: dumps are only ever published by rename after being fully
    // written, and never modified in place afterwards.
    let map = unsafe { Mmap::map(&file)? };

    let corrupt = || StoreError::CorruptFile {
        path: path.to_path_buf(),
    };
    if map.len() < HEADER_BYTES || map.len() % 4 != 0 {
        return Err(corrupt());
    }
    for (i, magic) in DUMP_MAGIC.iter().enumerate() {
        let word = u32::from_ne_bytes([map[i * 4], map[i * 4 + 1], map[i * 4 + 2], map[i * 4 + 3]]);
        if word != *magic {
            return Err(corrupt());
        }
    }
    if let Some(words) = expected_words {
        if (map.len() - HEADER_BYTES) / 4 != words {
            return Err(corrupt());
        }
    }
    if lock {
        lock_pages(&map)?;
    }
    Ok(MappedDump {
        map,
        _file: file,
        path: path.to_path_buf(),
    })
}

/// Create a dump of `size` payload bytes at `path`, filled by `fill`, and
/// return it mapped read-only.
///
/// The temporary file is removed if any step before the rename fails.
pub fn create_dump<F>(path: &Path, size: u64, lock: bool, fill: F) -> Result<MappedDump, StoreError>
where
    F: FnOnce(&mut [u32]),
{
    if size % 4 != 0 {
        return Err(StoreError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("dump size {} is not word aligned", size),
        )));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp = temp_path(path);
    if let Err(err) = write_temp(&temp, size, fill).and_then(|()| fs::rename(&temp, path)) {
        if let Err(rm) = fs::remove_file(&temp) {
            if rm.kind() != io::ErrorKind::NotFound {
                warn!(path = %temp.display(), error = %rm, "[ETHASH] Failed to remove partial dump");
            }
        }
        return Err(err.into());
    }
    debug!(path = %path.display(), bytes = size, "[ETHASH] Published dump");
    open_dump(path, Some((size / 4) as usize), lock)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}", rand::random::<u32>()));
    PathBuf::from(name)
}

fn write_temp<F>(temp: &Path, size: u64, fill: F) -> io::Result<()>
where
    F: FnOnce(&mut [u32]),
{
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(temp)?;
    ensure_size(&file, HEADER_BYTES as u64 + size)?;

    // SAFETY: the file was just created under a random name and nobody else
    // maps it.
    let mut map = unsafe { MmapMut::map_mut(&file)? };
    // SAFETY: page aligned mapping of a word-multiple length.
    let words = unsafe {
        std::slice::from_raw_parts_mut(map.as_mut_ptr() as *mut u32, map.len() / 4)
    };
    let (header, payload) = words.split_at_mut(DUMP_MAGIC.len());
    header.copy_from_slice(&DUMP_MAGIC);
    fill(payload);

    drop(map);
    drop(file);
    Ok(())
}

/// Preallocate the whole file so a full disk fails here rather than with a
/// SIGBUS halfway through the fill.
#[cfg(target_os = "linux")]
fn ensure_size(file: &File, size: u64) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: plain syscall on an fd we own.
    let rc = unsafe { libc::posix_fallocate(file.as_raw_fd(), 0, size as libc::off_t) };
    match rc {
        0 => Ok(()),
        libc::EOPNOTSUPP | libc::EINVAL => file.set_len(size),
        code => Err(io::Error::from_raw_os_error(code)),
    }
}

#[cfg(not(target_os = "linux"))]
fn ensure_size(file: &File, size: u64) -> io::Result<()> {
    file.set_len(size)
}

#[cfg(unix)]
fn lock_pages(map: &Mmap) -> io::Result<()> {
    // SAFETY: the range is exactly the live mapping; munmap drops the lock.
    let rc = unsafe { libc::mlock(map.as_ptr() as *const libc::c_void, map.len()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn lock_pages(_map: &Mmap) -> io::Result<()> {
    warn!("[ETHASH] Memory locking of dumps is not supported on this platform");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fill_counting(buf: &mut [u32]) {
        for (i, w) in buf.iter_mut().enumerate() {
            *w = i as u32 * 3;
        }
    }

    #[test]
    fn test_create_then_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cache-test");

        let dump = create_dump(&path, 64, false, fill_counting).unwrap();
        assert_eq!(dump.words().len(), 16);
        assert_eq!(dump.words()[5], 15);
        assert_eq!(fs::metadata(&path).unwrap().len(), 72);
        drop(dump);

        let reopened = open_dump(&path, Some(16), false).unwrap();
        let expected: Vec<u32> = (0..16).map(|i| i * 3).collect();
        assert_eq!(reopened.words(), &expected[..]);
        assert_eq!(reopened.path(), path.as_path());

        // Only the published file remains, no temp leftovers.
        let entries = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_bad_magic_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad");
        fs::write(&path, vec![0u8; 72]).unwrap();

        match open_dump(&path, None, false) {
            Err(StoreError::CorruptFile { path: p }) => assert_eq!(p, path),
            other => panic!("expected corrupt file, got {:?}", other),
        }
    }

    #[test]
    fn test_size_mismatch_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short");
        create_dump(&path, 64, false, fill_counting).unwrap();

        assert!(open_dump(&path, Some(16), false).is_ok());
        assert!(matches!(
            open_dump(&path, Some(32), false),
            Err(StoreError::CorruptFile { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_io() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            open_dump(&dir.path().join("nope"), None, false),
            Err(StoreError::Io(_))
        ));
    }

    #[test]
    fn test_failed_create_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        // A regular file where the parent directory should be.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();

        let result = create_dump(&blocker.join("cache"), 64, false, fill_counting);
        assert!(matches!(result, Err(StoreError::Io(_))));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_unaligned_size_rejected() {
        let dir = TempDir::new().unwrap();
        let result = create_dump(&dir.path().join("odd"), 63, false, fill_counting);
        assert!(matches!(result, Err(StoreError::Io(_))));
    }
}
