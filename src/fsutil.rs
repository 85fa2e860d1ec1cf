use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
#[error("cannot open `{path}`: {source}")]
pub struct FileOpenError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, thiserror::Error)]
#[error("cannot read `{path}`: {source}")]
pub struct ReadError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Opens `path` for buffered reading.
///
/// # Errors
///
/// Returns a [`FileOpenError`] carrying the path if the file cannot be opened.
///
/// # Example
/// ```no_run
/// # use creo_usage::fsutil;
/// let config = fsutil::open_file_reader("/etc/creo-usage.json")?;
/// # Ok::<(), fsutil::FileOpenError>(())
/// ```
pub fn open_file_reader(path: impl AsRef<Path>) -> Result<BufReader<File>, FileOpenError> {
    let path = path.as_ref();
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| FileOpenError {
            path: path.to_owned(),
            source,
        })
}

/// Reads all of `path`, or `None` if it does not exist (yet). Tracers create their
/// output file only after attaching.
///
/// # Errors
///
/// Returns a [`ReadError`] for every failure except a missing file.
pub fn read_bytes_if_exists(path: impl AsRef<Path>) -> Result<Option<Vec<u8>>, ReadError> {
    let path = path.as_ref();
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ReadError {
            path: path.to_owned(),
            source,
        }),
    }
}
