//! Open a shared library, look up symbols, close it.
//!
//! `libloading` covers `dlopen`/`dlsym`/`dlclose` on Unix and
//! `LoadLibraryW`/`GetProcAddress`/`FreeLibrary` on Windows, so nothing here is
//! platform-specific.

use libloading::Library;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DynamicLibraryError {
    #[error("Failed to load library from {path}: {source}")]
    Open {
        path: PathBuf,
        source: libloading::Error,
    },
    #[error("Failed to resolve symbol {symbol} in {path}: {source}")]
    Symbol {
        path: PathBuf,
        symbol: String,
        source: libloading::Error,
    },
    #[error("Failed to close library {path}: {source}")]
    Close {
        path: PathBuf,
        source: libloading::Error,
    },
}

/// A loaded shared library. Dropping it closes the library.
#[derive(Debug)]
pub struct DynamicLibrary {
    library: Library,
    path: PathBuf,
}

impl DynamicLibrary {
    /// File name of the PROJ shared library on this platform, e.g. `libproj.so`.
    pub fn default_name() -> OsString {
        libloading::library_filename("proj")
    }

    /// Load the library at `path`. A bare file name is searched for the way the platform loader
    /// normally does.
    ///
    /// # Safety
    ///
    /// Loading a library runs its initialisation routines, which may do anything.
    pub unsafe fn open(path: impl AsRef<Path>) -> Result<Self, DynamicLibraryError> {
        let path = path.as_ref().to_path_buf();
        match unsafe { Library::new(path.as_os_str()) } {
            Ok(library) => Ok(DynamicLibrary { library, path }),
            Err(source) => Err(DynamicLibraryError::Open { path, source }),
        }
    }

    /// Resolve `name` and copy the symbol out as a `T`, normally an `unsafe extern "C" fn`.
    ///
    /// # Safety
    ///
    /// `T` must match the symbol's real type, and the returned value must not be used after
    /// this library has been closed.
    pub unsafe fn resolve<T: Copy>(&self, name: &str) -> Result<T, DynamicLibraryError> {
        let symbol = unsafe { self.library.get::<T>(name.as_bytes()) };
        symbol
            .map(|symbol| *symbol)
            .map_err(|source| DynamicLibraryError::Symbol {
                path: self.path.clone(),
                symbol: name.to_string(),
                source,
            })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the library, reporting failure instead of ignoring it as `Drop` does.
    pub fn close(self) -> Result<(), DynamicLibraryError> {
        let DynamicLibrary { library, path } = self;
        library
            .close()
            .map_err(|source| DynamicLibraryError::Close { path, source })
    }
}
