use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::legacy::LegacyBackend;
use crate::backend::{Backend, BackendError};
use crate::cstring_array::CStringArray;

/// Path of a `proj_api.h` library to load instead of the linked one.
pub const LIBRARY_VAR: &str = "PROJ_BRIDGE_LIBRARY";
/// Resource search paths, in the platform's path-list syntax.
pub const SEARCH_PATHS_VAR: &str = "PROJ_BRIDGE_SEARCH_PATHS";

/// Selects and builds a [`Backend`].
///
/// # Examples
///
/// ```
/// use proj_bridge::Config;
///
/// let config = Config::new().search_paths(["/usr/share/proj"]);
/// let backend = config.backend().unwrap();
/// assert_eq!(backend.name(), "linked");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    library: Option<PathBuf>,
    search_paths: Vec<PathBuf>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read [`LIBRARY_VAR`] and [`SEARCH_PATHS_VAR`]. Unset or empty variables are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var_os(key))
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> Self {
        let mut config = Config::new();
        if let Some(library) = lookup(LIBRARY_VAR).filter(|v| !v.is_empty()) {
            config = config.library(library);
        }
        if let Some(paths) = lookup(SEARCH_PATHS_VAR) {
            config = config.search_paths(env::split_paths(&paths).filter(|p| !p.as_os_str().is_empty()));
        }
        config
    }

    /// Load the legacy backend from `path` rather than using the linked library.
    pub fn library(mut self, path: impl Into<PathBuf>) -> Self {
        self.library = Some(path.into());
        self
    }

    /// Directories searched for resource files (`proj.db`, init files, grids). Replaces
    /// any paths set before.
    pub fn search_paths<P: Into<PathBuf>>(mut self, paths: impl IntoIterator<Item = P>) -> Self {
        self.search_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn library_path(&self) -> Option<&Path> {
        self.library.as_deref()
    }

    pub fn search_path_list(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Build the configured backend.
    pub fn backend(&self) -> Result<Arc<dyn Backend>, BackendError> {
        let search_paths = CStringArray::from_paths(&self.search_paths)?;
        match &self.library {
            Some(path) => {
                // the configured library is trusted to be a PROJ build
                let backend = unsafe { LegacyBackend::open(path, &search_paths) }.inspect_err(|e| {
                    tracing::warn!(path = %path.display(), error = %e, "unable to load legacy PROJ library");
                })?;
                Ok(Arc::new(backend))
            }
            None => Self::linked(search_paths),
        }
    }

    #[cfg(feature = "linked")]
    fn linked(search_paths: CStringArray) -> Result<Arc<dyn Backend>, BackendError> {
        use crate::backend::linked::LinkedBackend;
        Ok(Arc::new(LinkedBackend::with_search_paths(search_paths)))
    }

    #[cfg(not(feature = "linked"))]
    fn linked(_search_paths: CStringArray) -> Result<Arc<dyn Backend>, BackendError> {
        Err(BackendError::Unavailable(
            "built without the `linked` feature and no library path configured",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynlib::DynamicLibraryError;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
        let vars: HashMap<String, OsString> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_builder() {
        let config = Config::new()
            .library("/opt/proj4/lib/libproj.so.12")
            .search_paths(["/a", "/b"])
            .search_paths(["/c"]);
        assert_eq!(
            config.library_path(),
            Some(Path::new("/opt/proj4/lib/libproj.so.12"))
        );
        assert_eq!(config.search_path_list(), &[PathBuf::from("/c")]);
    }

    #[test]
    fn test_from_lookup() {
        let joined = env::join_paths(["/usr/share/proj", "/opt/grids"]).unwrap();
        let config = Config::from_lookup(lookup(&[
            (LIBRARY_VAR, "/usr/lib/libproj.so.15"),
            (SEARCH_PATHS_VAR, joined.to_str().unwrap()),
        ]));
        assert_eq!(config.library_path(), Some(Path::new("/usr/lib/libproj.so.15")));
        assert_eq!(
            config.search_path_list(),
            &[PathBuf::from("/usr/share/proj"), PathBuf::from("/opt/grids")]
        );
    }

    #[test]
    fn test_from_lookup_ignores_empty() {
        let config = Config::from_lookup(lookup(&[(LIBRARY_VAR, ""), (SEARCH_PATHS_VAR, "")]));
        assert_eq!(config, Config::new());
    }

    #[test]
    fn test_missing_library() {
        let result = Config::new()
            .library("/nonexistent/libproj-missing.so")
            .backend();
        assert!(matches!(
            result,
            Err(BackendError::Library(DynamicLibraryError::Open { .. }))
        ));
    }

    #[test]
    fn test_search_path_with_nul() {
        let result = Config::new().search_paths(["/usr/share\0proj"]).backend();
        assert!(matches!(result, Err(BackendError::SearchPathNulError(_))));
    }

    #[cfg(feature = "linked")]
    #[test]
    fn test_linked_by_default() {
        let backend = Config::new().backend().unwrap();
        assert_eq!(backend.name(), "linked");
    }
}
