use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs::{self, File, ReadDir},
    io::{BufReader, Read},
    path::{Path, PathBuf},
};

pub mod error {
    use std::{io, path::PathBuf};

    pub type Result<T> = std::result::Result<T, self::Error>;

    type Msg = &'static str;

    #[derive(Debug, thiserror::Error)]
    pub enum Error {
        #[error("{0} ({1}): {2}")]
        SingleIO(Msg, PathBuf, #[source] io::Error),

        #[error("Cannot create symlink (orig='{0}', link={1}): {2}")]
        Symlink(PathBuf, PathBuf, #[source] io::Error),

        #[error("Cannot serialize to JSON (dest='{0}'): {1}")]
        SerializeToJson(PathBuf, #[source] serde_json::Error),

        #[error("Cannot deserialize from JSON (src='{0}'): {1}")]
        DeserializeFromJson(PathBuf, #[source] serde_json::Error),
    }
}
pub use error::{Error, Result};

/// Chunk size used when comparing files.
pub const BUFFER_SIZE: usize = 8 * 1024;

#[must_use]
pub fn mkdir_all(path: impl AsRef<Path>) -> Result<()> {
    let dir = path.as_ref();
    fs::create_dir_all(dir).map_err(|e| Error::SingleIO("Cannot create dir", dir.to_owned(), e))
}

/// Creates a single directory, failing if it already exists.
#[must_use]
pub fn mkdir(path: impl AsRef<Path>) -> Result<()> {
    let dir = path.as_ref();
    fs::create_dir(dir).map_err(|e| Error::SingleIO("Cannot create dir", dir.to_owned(), e))
}

#[must_use]
pub fn write<P, C>(filepath: P, contents: C) -> Result<()>
where
    P: AsRef<Path>,
    C: AsRef<[u8]>,
{
    fs::write(&filepath, contents)
        .map_err(|e| Error::SingleIO("Cannot write file", filepath.as_ref().to_owned(), e))
}

#[must_use]
pub fn write_with_mkdir<P, C>(filepath: P, contents: C) -> Result<()>
where
    P: AsRef<Path>,
    C: AsRef<[u8]>,
{
    if let Some(dir) = filepath.as_ref().parent() {
        if !dir.as_os_str().is_empty() {
            self::mkdir_all(dir)?;
        }
    }
    self::write(filepath, contents)
}

#[must_use]
pub fn read(filepath: impl AsRef<Path>) -> Result<Vec<u8>> {
    fs::read(&filepath)
        .map_err(|e| Error::SingleIO("Cannot read file", filepath.as_ref().to_owned(), e))
}

#[must_use]
pub fn read_to_string(filepath: impl AsRef<Path>) -> Result<String> {
    fs::read_to_string(&filepath)
        .map_err(|e| Error::SingleIO("Cannot read file", filepath.as_ref().to_owned(), e))
}

#[must_use]
pub fn remove_file(filepath: impl AsRef<Path>) -> Result<()> {
    fs::remove_file(&filepath)
        .map_err(|e| Error::SingleIO("Cannot remove file", filepath.as_ref().to_owned(), e))
}

/// Removes a directory tree. A directory that is already gone is not an error.
#[must_use]
pub fn remove_dir_all(dir: impl AsRef<Path>) -> Result<()> {
    match fs::remove_dir_all(&dir) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(Error::SingleIO(
            "Cannot remove dir",
            dir.as_ref().to_owned(),
            e,
        )),
        _ => Ok(()),
    }
}

#[must_use]
pub fn write_json_with_mkdir<P, T>(filepath: P, data: &T) -> Result<()>
where
    P: AsRef<Path>,
    T: Serialize,
{
    let s = serde_json::to_string(data)
        .map_err(|e| Error::SerializeToJson(filepath.as_ref().to_owned(), e))?;
    write_with_mkdir(filepath, &s)
}

#[must_use]
pub fn write_json_pretty_with_mkdir<P, T>(filepath: P, data: &T) -> Result<()>
where
    P: AsRef<Path>,
    T: Serialize,
{
    let s = serde_json::to_string_pretty(data)
        .map_err(|e| Error::SerializeToJson(filepath.as_ref().to_owned(), e))?;
    write_with_mkdir(filepath, &s)
}

#[must_use]
pub fn read_json_with_deserialize<P, T>(filepath: P) -> Result<T>
where
    P: AsRef<Path>,
    T: DeserializeOwned,
{
    let filepath = filepath.as_ref();
    let f = File::open(&filepath)
        .map_err(|e| Error::SingleIO("Cannot read file", filepath.to_owned(), e))?;
    serde_json::from_reader(BufReader::new(f))
        .map_err(|e| Error::DeserializeFromJson(filepath.to_owned(), e))
}

#[must_use]
pub fn read_dir(dir: impl AsRef<Path>) -> Result<ReadDir> {
    fs::read_dir(&dir).map_err(|e| Error::SingleIO("Cannot read dir", dir.as_ref().to_owned(), e))
}

/// Names of the directories directly inside `dir`, sorted.
pub fn list_subdirs(dir: impl AsRef<Path>) -> Result<Vec<String>> {
    let mut res = Vec::new();
    for entry in self::read_dir(&dir)?.filter_map(std::result::Result::ok) {
        // follows symlinks, so linked submissions are included
        if entry.path().is_dir() {
            res.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    res.sort();
    Ok(res)
}

/// Byte-for-byte comparison of two files, read in `BUFFER_SIZE` chunks.
pub fn same_contents(file1: impl AsRef<Path>, file2: impl AsRef<Path>) -> Result<bool> {
    let open = |p: &Path| {
        File::open(p)
            .map(BufReader::new)
            .map_err(|e| Error::SingleIO("Cannot read file", p.to_owned(), e))
    };
    let (p1, p2) = (file1.as_ref(), file2.as_ref());
    let (mut f1, mut f2) = (open(p1)?, open(p2)?);
    let mut b1 = vec![0u8; BUFFER_SIZE];
    let mut b2 = vec![0u8; BUFFER_SIZE];
    loop {
        let n1 = read_full(&mut f1, &mut b1)
            .map_err(|e| Error::SingleIO("Cannot read file", p1.to_owned(), e))?;
        let n2 = read_full(&mut f2, &mut b2)
            .map_err(|e| Error::SingleIO("Cannot read file", p2.to_owned(), e))?;
        if b1[..n1] != b2[..n2] {
            return Ok(false);
        }
        if n1 == 0 {
            return Ok(true);
        }
    }
}

fn read_full(r: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[must_use]
#[cfg(unix)]
pub fn symlink(orig: impl AsRef<Path>, link: impl AsRef<Path>) -> Result<()> {
    let link = link.as_ref();
    if link.is_symlink() {
        fs::remove_file(&link).map_err(|e| {
            Error::SingleIO(
                "Cannot create symlink: failed to remove existing symlink",
                link.to_owned(),
                e,
            )
        })?;
    }
    use std::os::unix;
    unix::fs::symlink(&orig, &link)
        .map_err(|e| Error::Symlink(orig.as_ref().to_owned(), link.to_owned(), e))
}

/// Find `filename` in `dir` or its ancestors.
pub fn find_in_ancestors(dir: impl AsRef<Path>, filename: &str) -> Option<PathBuf> {
    dir.as_ref()
        .ancestors()
        .map(|d| d.join(filename))
        .find(|path| path.is_file())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn same_contents_detects_difference_past_first_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let mut data = vec![b'x'; BUFFER_SIZE * 2 + 17];
        write(&a, &data).unwrap();
        write(&b, &data).unwrap();
        assert!(same_contents(&a, &b).unwrap());

        *data.last_mut().unwrap() = b'y';
        write(&b, &data).unwrap();
        assert!(!same_contents(&a, &b).unwrap());

        data.pop();
        write(&b, &data).unwrap();
        assert!(!same_contents(&a, &b).unwrap());
    }

    #[test]
    fn same_contents_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        write(&a, "hi").unwrap();
        let err = same_contents(&a, dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, Error::SingleIO(..)));
    }

    #[test]
    fn list_subdirs_is_sorted_and_skips_files() {
        let dir = tempfile::tempdir().unwrap();
        for d in ["s3", "s1", "s2"] {
            mkdir_all(dir.path().join(d)).unwrap();
        }
        write(dir.path().join("notes.txt"), "x").unwrap();
        assert_eq!(list_subdirs(dir.path()).unwrap(), vec!["s1", "s2", "s3"]);
    }

    #[test]
    fn remove_dir_all_tolerates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        remove_dir_all(dir.path().join("gone")).unwrap();
    }

    #[test]
    fn find_in_ancestors_walks_upwards() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        mkdir_all(&nested).unwrap();
        write(dir.path().join("a/marks.toml"), "").unwrap();
        assert_eq!(
            find_in_ancestors(&nested, "marks.toml"),
            Some(dir.path().join("a/marks.toml"))
        );
        assert_eq!(find_in_ancestors(&nested, "other.toml"), None);
    }
}
