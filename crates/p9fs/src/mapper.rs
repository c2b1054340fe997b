//! FS Mapper (C3): path normalization, QID synthesis, and FAT32 <-> 9P2000.u
//! stat translation.
//!
//! Grounded on the `unpfs` example's `get_qid`/`qid_from_attr`/`get_dirent`
//! helpers (`crates/unpfs/src/utils.rs`), generalized from
//! `std::fs::Metadata`/inode QIDs to `fatfs` directory entries.

use std::io::{Read, Seek, SeekFrom, Write};

use fatfs::{Dir, StdIoWrapper};

use crate::error::{Error, Result};
use crate::fcall::{QId, QIdType, Stat, dm};

type Volume = std::fs::File;
pub type FsDir<'a> = Dir<'a, StdIoWrapper<Volume>>;

/// Longest single path component this server accepts, mirroring FAT's own
/// long-file-name ceiling.
pub const MAX_NAME_LEN: usize = 255;

/// Reject path components that have no meaning as a single path element, and
/// resolve `.`/`..` against `base`. Mirrors spec.md 4.3's normalization
/// rules: `..` pops a component but never past the root.
pub fn normalize(base: &[String], wnames: &[String]) -> Result<Vec<String>> {
    let mut out = base.to_vec();
    for name in wnames {
        if name.is_empty() || name == "." {
            continue;
        }
        if name.len() > MAX_NAME_LEN {
            return Err(Error::NameTooLong);
        }
        if name.contains('/') {
            return Err(Error::InvalidArgument);
        }
        if name == ".." {
            out.pop();
            continue;
        }
        out.push(name.clone());
    }
    Ok(out)
}

/// FNV-1a over the canonical path string. `fatfs`'s public API does not
/// expose the raw starting-cluster/directory-entry-offset pair spec.md 4.3
/// names as the literal QID path encoding, so this server substitutes a
/// stable hash of the canonical path as the 64-bit QID path instead. Like
/// the cluster/offset pair, it changes when an entry is renamed (the spec
/// explicitly accepts this: "rename may produce new QID (acceptable)") and
/// is otherwise stable for the life of the entry.
fn path_hash(path: &[String]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01B3;
    let mut hash = OFFSET;
    for component in path {
        for b in component.as_bytes() {
            hash ^= *b as u64;
            hash = hash.wrapping_mul(PRIME);
        }
        hash ^= b'/' as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Pack a FAT date/time into the 32-bit QID version field, matching
/// spec.md's "version derived from mtime" rule.
fn version_from_datetime(dt: fatfs::DateTime) -> u32 {
    ((dt.date.year as u32) << 16)
        ^ ((dt.date.month as u32) << 11)
        ^ ((dt.date.day as u32) << 6)
        ^ (dt.time.hour as u32)
        ^ ((dt.time.min as u32) << 16)
        ^ ((dt.time.sec as u32) << 24)
}

/// QID for the exported root directory.
pub fn root_qid() -> QId {
    QId {
        typ: QIdType::DIR,
        version: 0,
        path: 0,
    }
}

/// Build a QID from a resolved path plus the directory entry it names.
pub fn qid_for(path: &[String], entry: &fatfs::DirEntry<'_, StdIoWrapper<Volume>>) -> QId {
    let typ = if entry.is_dir() {
        QIdType::DIR
    } else {
        QIdType::FILE
    };
    QId {
        typ,
        version: version_from_datetime(entry.modified()),
        path: path_hash(path),
    }
}

/// Translate a FAT directory entry into a 9P2000.u stat record.
///
/// `parent_path` is the normalized path to the entry's parent (used to
/// synthesize a stable QID); `name` is the entry's own final component
/// (`""` for the root, matching spec.md 4.3).
pub fn stat_from_entry(
    parent_path: &[String],
    name: &str,
    entry: &fatfs::DirEntry<'_, StdIoWrapper<Volume>>,
) -> Stat {
    let mut full_path = parent_path.to_vec();
    if !name.is_empty() {
        full_path.push(name.to_owned());
    }
    let qid = qid_for(&full_path, entry);

    let mut mode = if entry.is_dir() {
        dm::DIR | dm::READ | dm::EXEC
    } else {
        dm::READ
    };
    if !entry.attributes().contains(fatfs::FileAttributes::READ_ONLY) {
        mode |= dm::WRITE;
    }

    let mtime = fat_epoch_seconds(entry.modified());
    let atime = entry
        .accessed()
        .map(fat_epoch_seconds)
        .unwrap_or(mtime);

    Stat {
        typ: 0,
        dev: 0,
        qid,
        mode,
        atime,
        mtime,
        length: if entry.is_dir() { 0 } else { entry.len() },
        name: name.to_owned(),
        uid: "none".to_owned(),
        gid: "none".to_owned(),
        muid: "none".to_owned(),
        extension: String::new(),
        n_uid: 0xFFFF_FFFF,
        n_gid: 0xFFFF_FFFF,
        n_muid: 0xFFFF_FFFF,
    }
}

/// Stat record for the exported root, which has no directory entry of its
/// own (it is the FAT32 volume's root directory).
pub fn stat_for_root() -> Stat {
    Stat {
        typ: 0,
        dev: 0,
        qid: root_qid(),
        mode: dm::DIR | dm::READ | dm::WRITE | dm::EXEC,
        atime: 0,
        mtime: 0,
        length: 0,
        name: String::new(),
        uid: "none".to_owned(),
        gid: "none".to_owned(),
        muid: "none".to_owned(),
        extension: String::new(),
        n_uid: 0xFFFF_FFFF,
        n_gid: 0xFFFF_FFFF,
        n_muid: 0xFFFF_FFFF,
    }
}

fn fat_epoch_seconds(dt: fatfs::DateTime) -> u32 {
    // FAT has no timezone and a 1980 epoch; approximate Unix seconds well
    // enough for a client-visible timestamp (not used for any server-side
    // ordering decision).
    const DAYS_PER_YEAR: u64 = 365;
    const SECS_PER_DAY: u64 = 86_400;
    let years_since_1980 = dt.date.year.saturating_sub(1980) as u64;
    let days = years_since_1980 * DAYS_PER_YEAR
        + (dt.date.month.saturating_sub(1) as u64) * 30
        + (dt.date.day.saturating_sub(1) as u64);
    let unix_1980 = 315_532_800u64; // 1980-01-01T00:00:00Z
    let secs = unix_1980
        + days * SECS_PER_DAY
        + (dt.time.hour as u64) * 3600
        + (dt.time.min as u64) * 60
        + (dt.time.sec as u64);
    secs as u32
}

/// Find the directory entry named by the final component of `path` inside
/// `dir`, along with that parent directory. `path` must be non-empty: the
/// root itself has no entry to look up.
fn find_entry<'a>(
    dir: &FsDir<'a>,
    name: &str,
) -> Result<fatfs::DirEntry<'a, StdIoWrapper<Volume>>> {
    for entry in dir.iter() {
        let entry = entry?;
        if entry.file_name() == name {
            return Ok(entry);
        }
    }
    Err(Error::NotFound)
}

/// Open the directory at `path` (empty path = root), erroring `not a
/// directory` if an intermediate or final component is a plain file.
pub fn open_dir<'a>(root: FsDir<'a>, path: &[String]) -> Result<FsDir<'a>> {
    let mut cur = root;
    for name in path {
        let entry = find_entry(&cur, name)?;
        if !entry.is_dir() {
            return Err(Error::NotADirectory);
        }
        cur = entry.to_dir();
    }
    Ok(cur)
}

/// Split `path` into its parent directory and final component. Errors if
/// `path` is empty (the root has no parent within the export).
pub fn split_parent(path: &[String]) -> Result<(&[String], &str)> {
    match path.split_last() {
        Some((last, parent)) => Ok((parent, last.as_str())),
        None => Err(Error::InvalidArgument),
    }
}

/// Look up the stat record for an arbitrary (possibly root) path.
pub fn stat_path<'a>(root: FsDir<'a>, path: &[String]) -> Result<Stat> {
    if path.is_empty() {
        return Ok(stat_for_root());
    }
    let (parent, name) = split_parent(path)?;
    let parent_dir = open_dir(root, parent)?;
    let entry = find_entry(&parent_dir, name)?;
    Ok(stat_from_entry(parent, name, &entry))
}

/// List the entries of the directory at `path` (after the synthetic `.`/
/// `..` pair), each paired with its own stat record, in iteration order.
pub fn list_dir<'a>(root: FsDir<'a>, path: &[String]) -> Result<Vec<Stat>> {
    let dir = open_dir(root, path)?;
    let mut out = Vec::new();
    for entry in dir.iter() {
        let entry = entry?;
        let name = entry.file_name();
        if name == "." || name == ".." {
            continue;
        }
        out.push(stat_from_entry(path, &name, &entry));
    }
    Ok(out)
}

/// Read up to `count` bytes from the regular file at `path`, starting at
/// `offset`. Short reads at EOF are legal and return fewer bytes, including
/// zero.
pub fn read_file<'a>(root: FsDir<'a>, path: &[String], offset: u64, count: u32) -> Result<Vec<u8>> {
    let (parent, name) = split_parent(path)?;
    let parent_dir = open_dir(root, parent)?;
    let mut file = parent_dir.open_file(name)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; count as usize];
    let n = read_up_to(&mut file, &mut buf)?;
    buf.truncate(n);
    Ok(buf)
}

fn read_up_to<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match r.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(total)
}

/// Write `data` at `offset` into the regular file at `path`, creating no
/// new entry (the fid must already be opened for writing). Returns the
/// number of bytes written, which this implementation always makes equal
/// to `data.len()` unless the device itself fails partway through.
pub fn write_file<'a>(root: FsDir<'a>, path: &[String], offset: u64, data: &[u8]) -> Result<u32> {
    let (parent, name) = split_parent(path)?;
    let parent_dir = open_dir(root, parent)?;
    let mut file = parent_dir.open_file(name)?;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)?;
    file.flush()?;
    Ok(data.len() as u32)
}

/// Create a new entry (file or, when `is_dir`, directory) under `path`'s
/// parent.
pub fn create_entry<'a>(root: FsDir<'a>, path: &[String], is_dir: bool) -> Result<()> {
    let (parent, name) = split_parent(path)?;
    let parent_dir = open_dir(root, parent)?;
    if is_dir {
        parent_dir.create_dir(name)?;
    } else {
        parent_dir.create_file(name)?;
    }
    Ok(())
}

/// Remove the entry at `path`.
pub fn remove_entry<'a>(root: FsDir<'a>, path: &[String]) -> Result<()> {
    let (parent, name) = split_parent(path)?;
    let parent_dir = open_dir(root, parent)?;
    parent_dir.remove(name)?;
    Ok(())
}

/// Truncate the regular file at `path` to `length` bytes.
pub fn truncate_file<'a>(root: FsDir<'a>, path: &[String], length: u64) -> Result<()> {
    let (parent, name) = split_parent(path)?;
    let parent_dir = open_dir(root, parent)?;
    let mut file = parent_dir.open_file(name)?;
    file.seek(SeekFrom::Start(length))?;
    file.truncate()?;
    Ok(())
}

/// Rename the entry at `path` to `new_name` within the same parent
/// directory, per spec.md 4.6.12's Wstat rule (name-only rename, no
/// cross-directory move).
pub fn rename_entry<'a>(root: FsDir<'a>, path: &[String], new_name: &str) -> Result<()> {
    let (parent, old_name) = split_parent(path)?;
    let parent_dir = open_dir(root, parent)?;
    parent_dir.rename(old_name, &parent_dir, new_name)?;
    Ok(())
}

/// Set or clear the FAT read-only attribute to reflect a Wstat mode change.
pub fn set_readonly<'a>(root: FsDir<'a>, path: &[String], readonly: bool) -> Result<()> {
    let (parent, name) = split_parent(path)?;
    let parent_dir = open_dir(root, parent)?;
    let mut file = parent_dir.open_file(name)?;
    let mut attrs = file.attributes();
    attrs.set(fatfs::FileAttributes::READ_ONLY, readonly);
    file.set_attributes(attrs);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_handles_dotdot_without_popping_root() {
        let base: Vec<String> = vec![];
        let out = normalize(&base, &["..".to_owned(), "..".to_owned()]).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn normalize_descends_and_backtracks() {
        let base: Vec<String> = vec!["a".to_owned()];
        let out = normalize(
            &base,
            &["b".to_owned(), "..".to_owned(), "c".to_owned()],
        )
        .unwrap();
        assert_eq!(out, vec!["a".to_owned(), "c".to_owned()]);
    }

    #[test]
    fn normalize_rejects_embedded_slash() {
        let base: Vec<String> = vec![];
        let err = normalize(&base, &["a/b".to_owned()]).unwrap_err();
        assert_eq!(err.ename(), "invalid argument");
    }

    #[test]
    fn normalize_rejects_overlong_component() {
        let base: Vec<String> = vec![];
        let long = "x".repeat(MAX_NAME_LEN + 1);
        let err = normalize(&base, &[long]).unwrap_err();
        assert_eq!(err.ename(), "name too long");
    }

    #[test]
    fn path_hash_is_deterministic_and_path_sensitive() {
        let a = path_hash(&["foo".to_owned(), "bar".to_owned()]);
        let b = path_hash(&["foo".to_owned(), "bar".to_owned()]);
        let c = path_hash(&["foo".to_owned(), "baz".to_owned()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
