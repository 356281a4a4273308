//! De-duplication of wrappers by definition.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use crate::backend::Backend;
use crate::pj::{Pj, PjCreateError};

/// Hands out shared wrappers, one per distinct definition.
///
/// Entries are weak: a CRS is freed as soon as the last `Rc` to it is dropped, and the pool
/// then allocates a fresh one on the next request. Definitions are matched both as given and
/// in the canonical form the library writes back, so two spellings of one definition share a
/// wrapper.
pub struct PjPool {
    backend: Arc<dyn Backend>,
    entries: RefCell<HashMap<String, Weak<Pj>>>,
}

impl PjPool {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        PjPool {
            backend,
            entries: RefCell::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// A live wrapper for `definition`, allocated if needed.
    pub fn get(&self, definition: &str) -> Result<Rc<Pj>, PjCreateError> {
        let key = definition.trim();
        if let Some(pj) = self.lookup(key) {
            return Ok(pj);
        }
        let pj = Pj::new(self.backend.clone(), key)?;
        let canonical = pj.definition();
        if let Some(existing) = canonical.as_deref().and_then(|c| self.lookup(c)) {
            // `pj` is a duplicate and is freed here
            tracing::debug!(definition = key, "reusing pooled CRS");
            self.insert(key, &existing);
            return Ok(existing);
        }
        let pj = Rc::new(pj);
        self.insert(key, &pj);
        if let Some(canonical) = canonical {
            self.insert(&canonical, &pj);
        }
        Ok(pj)
    }

    /// The geographic CRS `pj` is based on, shared with any equal one already pooled.
    pub fn geographic(&self, pj: &Rc<Pj>) -> Result<Rc<Pj>, PjCreateError> {
        let geographic = pj.geographic()?;
        let Some(canonical) = geographic.definition() else {
            return Ok(Rc::new(geographic));
        };
        if let Some(existing) = self.lookup(&canonical) {
            return Ok(existing);
        }
        let geographic = Rc::new(geographic);
        self.insert(&canonical, &geographic);
        Ok(geographic)
    }

    /// Forget entries whose wrapper has been dropped. Returns how many were removed.
    pub fn purge(&self) -> usize {
        let mut entries = self.entries.borrow_mut();
        let before = entries.len();
        entries.retain(|_, weak| weak.strong_count() > 0);
        before - entries.len()
    }

    /// Number of entries that still point to a live wrapper.
    pub fn len(&self) -> usize {
        self.entries
            .borrow()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, definition: &str) -> Option<Rc<Pj>> {
        self.entries
            .borrow()
            .get(definition)
            .and_then(Weak::upgrade)
            .filter(|pj| !pj.is_released())
    }

    /// Record `pj` under `definition`, dropping entries whose wrapper is gone.
    fn insert(&self, definition: &str, pj: &Rc<Pj>) {
        let mut entries = self.entries.borrow_mut();
        entries.retain(|_, weak| weak.strong_count() > 0);
        entries.insert(definition.to_string(), Rc::downgrade(pj));
    }
}

impl fmt::Debug for PjPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PjPool")
            .field("backend", &self.backend.name())
            .field("entries", &self.entries.borrow().len())
            .finish()
    }
}
