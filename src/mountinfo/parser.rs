//! Line grammar of `/proc/<pid>/mountinfo`, see `proc_pid_mountinfo(5)`:
//!
//! ```text
//! 36 35 98:0 /mnt1 /mnt2 rw,noatime master:1 - ext3 /dev/root rw,errors=continue
//! (1)(2)(3)   (4)   (5)      (6)      (7)   (8) (9)     (10)       (11)
//! ```
//!
//! Only the mount point (5), filesystem type (9) and source (10) are kept.

use std::borrow::Cow;

/// Index of the mount point among the fields before the ` - ` separator.
const MOUNT_POINT_FIELD: usize = 4;

/// The parts of one mountinfo line the enumerator cares about.
#[derive(Debug, PartialEq, Eq)]
pub struct MountEntry<'a> {
    /// Where the filesystem is mounted, with the kernel's octal escapes decoded.
    pub mount_point: Cow<'a, str>,
    pub fs_type: &'a str,
    pub source: &'a str,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("no ` - ` separator in `{0}`")]
    MissingSeparator(String),

    #[error("no {field} in `{line}`")]
    MissingField { field: &'static str, line: String },
}

/// Parses one mountinfo line. Borrows from `line` unless the mount point is escaped.
///
/// # Errors
///
/// Returns a [`ParseError`] if the separator or a kept field is missing.
pub fn parse_mount_line(line: &str) -> Result<MountEntry<'_>, ParseError> {
    let missing = |field| ParseError::MissingField {
        field,
        line: line.to_owned(),
    };

    let (mount, fs) = line
        .split_once(" - ")
        .ok_or_else(|| ParseError::MissingSeparator(line.to_owned()))?;
    let mount_point = mount
        .split_ascii_whitespace()
        .nth(MOUNT_POINT_FIELD)
        .ok_or_else(|| missing("mount point"))?;

    let mut fs = fs.split_ascii_whitespace();
    let fs_type = fs.next().ok_or_else(|| missing("filesystem type"))?;
    let source = fs.next().ok_or_else(|| missing("mount source"))?;

    Ok(MountEntry {
        mount_point: decode_escapes(mount_point),
        fs_type,
        source,
    })
}

/// Undoes the kernel's `\NNN` octal escaping of blanks and backslashes. Sequences
/// that are not three octal digits are left alone.
fn decode_escapes(field: &str) -> Cow<'_, str> {
    if !field.contains('\\') {
        return Cow::Borrowed(field);
    }

    let mut decoded = Vec::with_capacity(field.len());
    let mut rest = field.as_bytes();
    while let Some((&byte, tail)) = rest.split_first() {
        let escaped = match tail {
            [a, b, c, ..] if byte == b'\\' => octal_byte(*a, *b, *c),
            _ => None,
        };
        match escaped {
            Some(value) => {
                decoded.push(value);
                rest = &tail[3..];
            }
            None => {
                decoded.push(byte);
                rest = tail;
            }
        }
    }
    Cow::Owned(String::from_utf8_lossy(&decoded).into_owned())
}

fn octal_byte(a: u8, b: u8, c: u8) -> Option<u8> {
    let digit = |d: u8| (b'0'..=b'7').contains(&d).then(|| u32::from(d - b'0'));
    let value = digit(a)? * 64 + digit(b)? * 8 + digit(c)?;
    u8::try_from(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_root() {
        let entry = parse_mount_line(
            "598 540 0:55 / / rw,relatime master:254 - overlay overlay rw,lowerdir=/l",
        )
        .unwrap();
        assert_eq!(
            entry,
            MountEntry {
                mount_point: Cow::Borrowed("/"),
                fs_type: "overlay",
                source: "overlay",
            }
        );
    }

    #[test]
    fn test_bind_mounted_file() {
        let entry = parse_mount_line(
            "616 598 8:1 /var/lib/docker/containers/abc/hosts /etc/hosts rw,relatime - ext4 /dev/sda1 rw",
        )
        .unwrap();
        assert_eq!(entry.mount_point, "/etc/hosts");
        assert_eq!(entry.fs_type, "ext4");
        assert_eq!(entry.source, "/dev/sda1");
    }

    #[test]
    fn test_escaped_mount_point() {
        let entry =
            parse_mount_line("70 56 0:45 / /srv/a\\040b\\134c rw shared:20 - tmpfs tmpfs rw").unwrap();
        assert_eq!(entry.mount_point, "/srv/a b\\c");
        assert!(matches!(entry.mount_point, Cow::Owned(_)));
    }

    #[test]
    fn test_malformed_escapes_are_kept() {
        assert_eq!(decode_escapes("/x\\8zz"), "/x\\8zz");
        assert_eq!(decode_escapes("/end\\04"), "/end\\04");
        assert_eq!(decode_escapes("/big\\777"), "/big\\777");
    }

    #[test]
    fn test_missing_parts() {
        assert!(matches!(
            parse_mount_line("42 35 0:22 / /mnt rw ext4 /dev/sda1 rw"),
            Err(ParseError::MissingSeparator(_))
        ));
        assert!(matches!(
            parse_mount_line("42 35 0:22 / - ext4 /dev/sda1 rw"),
            Err(ParseError::MissingField { field: "mount point", .. })
        ));
        assert!(matches!(
            parse_mount_line("42 35 0:22 / /mnt rw - ext4"),
            Err(ParseError::MissingField { field: "mount source", .. })
        ));
        assert!(matches!(
            parse_mount_line(""),
            Err(ParseError::MissingSeparator(_))
        ));
    }
}
