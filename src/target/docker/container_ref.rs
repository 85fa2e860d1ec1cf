use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::Error;

/// The maximum allowed length for a [`ContainerRef`].
const CONTAINER_REF_MAX_LEN: usize = 255;

/// A validated container id or name, safe to embed in an Engine API path.
///
/// # Examples
///
/// ```
/// # use creo_usage::target::docker::ContainerRef;
/// let by_name = ContainerRef::new("web-frontend_1").unwrap();
/// assert_eq!(by_name.as_ref(), "web-frontend_1");
/// assert!(ContainerRef::new("../images").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerRef(Arc<str>);

impl ContainerRef {
    /// Creates a new `ContainerRef` from a container id or name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContainerRef`] if the input is empty, longer than
    /// [`CONTAINER_REF_MAX_LEN`], or contains characters outside `[A-Za-z0-9_.-]`.
    pub fn new(src: impl AsRef<str>) -> Result<Self, Error> {
        let src = src.as_ref();
        if src.is_empty()
            || src.len() > CONTAINER_REF_MAX_LEN
            || src.starts_with('.')
            || !src
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
        {
            return Err(Error::InvalidContainerRef(src.to_owned()));
        }

        Ok(Self(src.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ContainerRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for ContainerRef {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ContainerRef {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
