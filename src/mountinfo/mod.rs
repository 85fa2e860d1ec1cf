//! Parsing of `/proc/<pid>/mountinfo` as seen from inside the execution target.
//!
//! The enumerator uses it to find pseudo filesystems (procfs, sysfs, cgroupfs, ...)
//! that must not be walked when listing the files of an image.
mod error;
mod parser;
mod pseudo;

pub use error::{Error, Result};
pub use parser::{MountEntry, ParseError, parse_mount_line};
pub use pseudo::{PSEUDO_FS_TYPES, pseudo_mount_points};
