use super::ParseError;
use crate::reconcile::FileRecord;

/// Parses one line of `stat -c '%s %n'` output.
///
/// The path is everything after the first space, so paths containing spaces survive.
///
/// # Errors
///
/// Returns a [`ParseError`] if the size is missing or not a number, or the path is
/// not absolute.
pub fn parse_stat_line(line: &str) -> Result<FileRecord, ParseError> {
    let (size, path) = line.split_once(' ').ok_or(ParseError::MissingSize)?;
    let size_bytes = size.parse::<u64>().map_err(|source| ParseError::InvalidSize {
        value: size.to_owned(),
        source,
    })?;
    if !path.starts_with('/') {
        return Err(ParseError::RelativePath(path.to_owned()));
    }
    Ok(FileRecord::new(path, size_bytes))
}

/// Quotes `s` for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
