use std::path::{Path, PathBuf};

/// Path prefixes left out of usage accounting.
///
/// Matching is component-wise: `/proc` covers `/proc` and `/proc/1/maps` but not
/// `/procfs`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    prefixes: Vec<PathBuf>,
}

impl ExclusionSet {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut prefixes: Vec<PathBuf> = prefixes
            .into_iter()
            .map(|p| PathBuf::from(p.as_ref()))
            .collect();
        prefixes.sort();
        prefixes.dedup();
        Self { prefixes }
    }

    pub fn is_excluded(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        self.prefixes.iter().any(|prefix| path.starts_with(prefix))
    }
}
