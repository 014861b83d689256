//! Query rounds: one needle, one container, many producers.
//!
//! The dispatcher hands out a [`QueryRound`] per keystroke. Submitting a new
//! query bumps the generation, which cancels every older round: their
//! producers stop inserting and gathering them yields nothing.

use std::fmt;
use std::sync::Arc;

use rayon::prelude::*;

use crate::cancel::GenerationTracker;
use crate::config::{ContainerLimits, RankingConfig};
use crate::container::ResultContainer;
use crate::error::Result;
use crate::index::{PathIndex, PathMaterializer, ScanOutcome};
use crate::needle::Needle;
use crate::registry::CallbackRegistry;
use crate::score::Scorer;

/// A source of candidates for a query round.
pub trait Producer<M>: Send + Sync {
    fn name(&self) -> &str;

    /// Inserts candidates into `round.container()`. Implementations should
    /// return early once `round.is_cancelled()`.
    fn produce(&self, round: &QueryRound<M>);
}

/// Adapts a closure into a [`Producer`].
pub struct FnProducer<F> {
    name: String,
    run: F,
}

impl<F> FnProducer<F> {
    pub fn new(name: impl Into<String>, run: F) -> Self {
        Self {
            name: name.into(),
            run,
        }
    }
}

impl<M, F> Producer<M> for FnProducer<F>
where
    F: Fn(&QueryRound<M>) + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&self, round: &QueryRound<M>) {
        (self.run)(round)
    }
}

/// The path index together with the materializer for its candidates.
struct PathSource<M> {
    index: Arc<PathIndex>,
    materializer: PathMaterializer<M>,
}

impl<M> Clone for PathSource<M> {
    fn clone(&self) -> Self {
        Self {
            index: self.index.clone(),
            materializer: self.materializer.clone(),
        }
    }
}

/// One submitted query.
pub struct QueryRound<M> {
    needle: Needle,
    container: ResultContainer<M>,
    scorer: Scorer,
    paths: Option<PathSource<M>>,
}

impl<M> fmt::Debug for QueryRound<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryRound")
            .field("query", &self.needle.query())
            .field("container", &self.container)
            .finish()
    }
}

impl<M> QueryRound<M> {
    pub fn needle(&self) -> &Needle {
        &self.needle
    }

    pub fn query(&self) -> &str {
        self.needle.query()
    }

    pub fn container(&self) -> &ResultContainer<M> {
        &self.container
    }

    /// Scorer configured on the dispatcher, for producers scoring their own
    /// candidates.
    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    pub fn generation(&self) -> u64 {
        self.container.generation()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.container.is_cancelled()
    }

    /// Runs the path index shards and every producer on the rayon pool and
    /// returns once all of them are done. Returns the per-shard outcomes.
    pub fn scan(&self, producers: &[Arc<dyn Producer<M>>]) -> Vec<ScanOutcome> {
        if self.is_cancelled() {
            return Vec::new();
        }
        let (outcomes, ()) = rayon::join(
            || match &self.paths {
                Some(paths) => {
                    paths
                        .index
                        .scan_all(&self.needle, &self.container, &paths.materializer)
                }
                None => Vec::new(),
            },
            || {
                producers.par_iter().for_each(|producer| {
                    if self.is_cancelled() {
                        log::debug!(
                            "producer skipped name={} generation={}",
                            producer.name(),
                            self.generation()
                        );
                        return;
                    }
                    producer.produce(self);
                })
            },
        );
        log::debug!(
            "query round scanned generation={} candidates={} cancelled={}",
            self.generation(),
            self.container.len(),
            self.is_cancelled()
        );
        outcomes
    }

    /// Materializes the `k` best candidates. A superseded round yields
    /// nothing.
    pub fn gather(&self, k: usize) -> Vec<M> {
        if self.is_cancelled() {
            return Vec::new();
        }
        self.container.materialize(k)
    }
}

/// Creates query rounds and owns everything shared between them.
pub struct QueryDispatcher<M> {
    registry: Arc<CallbackRegistry<M>>,
    tracker: GenerationTracker,
    limits: ContainerLimits,
    scorer: Scorer,
    paths: Option<PathSource<M>>,
}

impl<M> fmt::Debug for QueryDispatcher<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryDispatcher")
            .field("generation", &self.tracker.current())
            .field("registry", &self.registry)
            .field("limits", &self.limits)
            .field("paths", &self.paths.as_ref().map(|paths| &paths.index))
            .finish()
    }
}

impl<M> QueryDispatcher<M> {
    pub fn new(scorer: Scorer, limits: ContainerLimits) -> Self {
        Self {
            registry: Arc::new(CallbackRegistry::new()),
            tracker: GenerationTracker::new(),
            limits,
            scorer,
            paths: None,
        }
    }

    /// Builds a dispatcher from validated configuration.
    pub fn from_config(config: &RankingConfig) -> Result<Self> {
        config.container.validate()?;
        Ok(Self::new(Scorer::new(config.scoring)?, config.container))
    }

    /// Includes `index` in every round; `display` turns its paths into
    /// results.
    pub fn with_path_index<F>(mut self, index: Arc<PathIndex>, display: F) -> Self
    where
        F: Fn(&str) -> M + Send + Sync + 'static,
    {
        let materializer = index.materializer(display);
        self.paths = Some(PathSource {
            index,
            materializer,
        });
        self
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry<M>> {
        &self.registry
    }

    pub fn path_index(&self) -> Option<&Arc<PathIndex>> {
        self.paths.as_ref().map(|paths| &paths.index)
    }

    pub fn current_generation(&self) -> u64 {
        self.tracker.current()
    }

    /// Starts a round for `query`, superseding every earlier round.
    pub fn submit(&self, query: &str) -> QueryRound<M> {
        let generation = self.tracker.next_generation();
        let needle = Needle::prepare(query);
        log::debug!(
            "query submitted generation={} chars={} truncated={}",
            generation,
            needle.len(),
            needle.was_truncated()
        );
        QueryRound {
            container: ResultContainer::new(
                self.tracker.token(generation),
                self.registry.clone(),
                self.limits,
            ),
            needle,
            scorer: self.scorer,
            paths: self.paths.clone(),
        }
    }
}
