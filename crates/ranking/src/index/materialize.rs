use std::fmt;
use std::sync::{Arc, Weak};

use super::manager::IndexCore;
use crate::registry::MatchFactory;

/// Path handed to the display function when an entry vanished between scan
/// and materialization.
pub const ROOT_PATH: &str = "/";

/// Payload of a path candidate: where the entry lived when it was scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathRef {
    pub shard: u16,
    pub offset: u32,
    /// [`fingerprint_path`](super::fingerprint_path) of the absolute path.
    pub fingerprint: u64,
}

impl PathRef {
    /// The 32-bit hash the entry is stored under.
    #[inline]
    pub fn hash(&self) -> u32 {
        self.fingerprint as u32
    }
}

/// Shared factory turning [`PathRef`] payloads into display objects.
///
/// Build one per index and display function and reuse it for every scan, so
/// all path candidates share a single registry slot.
pub struct PathMaterializer<M> {
    factory: MatchFactory<M>,
}

impl<M> Clone for PathMaterializer<M> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
        }
    }
}

impl<M> fmt::Debug for PathMaterializer<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathMaterializer").finish_non_exhaustive()
    }
}

impl<M> PathMaterializer<M> {
    pub(super) fn new<F>(core: Weak<IndexCore>, display: F) -> Self
    where
        F: Fn(&str) -> M + Send + Sync + 'static,
    {
        let factory: MatchFactory<M> = Arc::new(move |payload| {
            let resolved = payload
                .downcast_ref::<PathRef>()
                .and_then(|path_ref| core.upgrade()?.resolve(*path_ref));
            if resolved.is_none() {
                log::debug!("path candidate vanished before materialization");
            }
            display(resolved.as_deref().unwrap_or(ROOT_PATH))
        });
        Self { factory }
    }

    /// The factory to pass to [`ResultContainer::insert`].
    ///
    /// [`ResultContainer::insert`]: crate::container::ResultContainer::insert
    pub fn factory(&self) -> &MatchFactory<M> {
        &self.factory
    }
}
