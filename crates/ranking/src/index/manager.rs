//! PathIndex - routes paths to shards and scans them for a query.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use rayon::prelude::*;

use super::arena::{EntryFlags, EntryView};
use super::materialize::{PathMaterializer, PathRef};
use super::shard::ShardStore;
use super::{fingerprint_path, hash_path, ScanOutcome, ScanStats};
use crate::cancel::CancellationToken;
use crate::config::IndexConfig;
use crate::container::ResultContainer;
use crate::error::{allocation_error, RankingError, Result};
use crate::needle::Needle;
use crate::score::{Score, ScoreScratch, Scorer};

/// Prefix most indexed paths share; entries under it store only the rest.
#[derive(Debug)]
struct CommonPrefix {
    text: String,
    /// Length of `text` in codepoints, the scoring offset of relative entries.
    chars: usize,
}

impl CommonPrefix {
    fn new(raw: &str) -> Option<Self> {
        let text = raw.trim_end_matches('/');
        if text.is_empty() {
            return None;
        }
        Some(Self {
            text: text.to_string(),
            chars: text.chars().count(),
        })
    }

    /// The part of `path` after the prefix, starting with `/`.
    fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        path.strip_prefix(self.text.as_str())
            .filter(|rest| rest.starts_with('/'))
    }
}

/// State shared between the index handle and its materializers.
pub(crate) struct IndexCore {
    shards: Box<[Mutex<ShardStore>]>,
    prefix: Option<CommonPrefix>,
    shutdown: AtomicBool,
}

impl IndexCore {
    fn shard(&self, shard: usize) -> Result<&Mutex<ShardStore>> {
        self.shards.get(shard).ok_or(RankingError::InvalidShard {
            shard,
            shard_count: self.shards.len(),
        })
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Locks a shard, refusing once the index has been shut down.
    fn lock_running(&self, shard: usize) -> Result<MutexGuard<'_, ShardStore>> {
        let store = self.shard(shard)?.lock();
        if self.is_shutdown() {
            return Err(RankingError::IndexShutdown);
        }
        Ok(store)
    }

    /// Storage form of `path`: relative to the common prefix when under it.
    fn stored_form<'a>(&self, path: &'a str) -> (EntryFlags, &'a str) {
        match self.prefix.as_ref().and_then(|prefix| prefix.strip(path)) {
            Some(rest) => (EntryFlags::empty(), rest),
            None => (EntryFlags::ABSOLUTE, path),
        }
    }

    /// Writes the absolute path of `entry` into `out` and returns the
    /// codepoint offset where the stored part begins.
    fn absolute_into(&self, entry: &EntryView<'_>, out: &mut String) -> Option<usize> {
        out.clear();
        let stored = std::str::from_utf8(entry.path).ok()?;
        if entry.is_absolute() {
            out.push_str(stored);
            return Some(0);
        }
        let prefix = self.prefix.as_ref()?;
        out.push_str(&prefix.text);
        out.push_str(stored);
        Some(prefix.chars)
    }

    /// Whether the absolute path of `entry` starts with `pattern`, without
    /// rebuilding it.
    fn absolute_starts_with(&self, entry: &EntryView<'_>, pattern: &[u8]) -> bool {
        if entry.is_absolute() {
            return entry.path.starts_with(pattern);
        }
        let Some(prefix) = self.prefix.as_ref() else {
            return false;
        };
        let prefix = prefix.text.as_bytes();
        if pattern.len() <= prefix.len() {
            prefix.starts_with(pattern)
        } else {
            pattern.starts_with(prefix) && entry.path.starts_with(&pattern[prefix.len()..])
        }
    }

    /// Absolute path of a scanned entry, if that exact path is still indexed.
    pub(super) fn resolve(&self, path_ref: PathRef) -> Option<String> {
        let store = self.shards.get(usize::from(path_ref.shard))?.lock();
        let mut path = String::new();
        store.resolve(path_ref.hash(), path_ref.offset, |entry| {
            self.absolute_into(entry, &mut path).is_some()
                && fingerprint_path(&path) == path_ref.fingerprint
        })?;
        Some(path)
    }
}

/// Sharded in-memory index of filesystem paths.
///
/// Single-path mutations lock only the owning shard. Shard assignment is
/// `hash_path(path) % shard_count` and never changes.
pub struct PathIndex {
    core: Arc<IndexCore>,
    scorer: Scorer,
    min_relevancy: Score,
}

impl fmt::Debug for PathIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathIndex")
            .field("shards", &self.shard_count())
            .field("prefix", &self.common_prefix())
            .field("size", &self.size())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl PathIndex {
    /// Creates an index scoring with the default weights.
    pub fn new(config: IndexConfig) -> Result<Self> {
        Self::with_scorer(config, Scorer::default())
    }

    pub fn with_scorer(config: IndexConfig, scorer: Scorer) -> Result<Self> {
        config.validate()?;

        let mut shards = Vec::new();
        shards
            .try_reserve_exact(config.shard_count)
            .map_err(|e| allocation_error("path index shards", e))?;
        for _ in 0..config.shard_count {
            shards.push(Mutex::new(ShardStore::new(
                config.initial_arena_bytes,
                config.initial_slots,
            )?));
        }
        let prefix = config.common_prefix.as_deref().and_then(CommonPrefix::new);

        log::info!(
            "path index initialized shards={} prefix={}",
            config.shard_count,
            prefix.as_ref().map_or("<none>", |prefix| prefix.text.as_str())
        );

        Ok(Self {
            core: Arc::new(IndexCore {
                shards: shards.into_boxed_slice(),
                prefix,
                shutdown: AtomicBool::new(false),
            }),
            scorer,
            min_relevancy: Score::new(config.min_relevancy),
        })
    }

    pub fn shard_count(&self) -> usize {
        self.core.shards.len()
    }

    /// Shard that owns `path`.
    pub fn shard_for(&self, path: &str) -> usize {
        hash_path(path) as usize % self.shard_count()
    }

    pub fn common_prefix(&self) -> Option<&str> {
        self.core.prefix.as_ref().map(|prefix| prefix.text.as_str())
    }

    pub fn is_shutdown(&self) -> bool {
        self.core.is_shutdown()
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shutdown() {
            return Err(RankingError::IndexShutdown);
        }
        Ok(())
    }

    fn check_path(path: &str) -> Result<()> {
        if path.is_empty() {
            return Err(RankingError::InvalidPath("empty path".to_string()));
        }
        if path.len() > usize::from(u16::MAX) {
            return Err(RankingError::InvalidPath(format!(
                "{} bytes exceeds {}",
                path.len(),
                u16::MAX
            )));
        }
        Ok(())
    }

    /// Adds `path`. Returns `Ok(false)` if it was already indexed.
    pub fn try_add_file(&self, path: &str) -> Result<bool> {
        self.ensure_running()?;
        Self::check_path(path)?;
        let hash = hash_path(path);
        let (flags, stored) = self.core.stored_form(path);
        let mut store = self.core.lock_running(self.shard_for(path))?;
        store.insert(hash, flags, stored.as_bytes())
    }

    /// Adds `path`; `true` when it is indexed afterwards.
    pub fn add_file(&self, path: &str) -> bool {
        match self.try_add_file(path) {
            Ok(_) => true,
            Err(e) => {
                log::debug!("path index add failed path={} error={}", path, e);
                false
            }
        }
    }

    /// Removes `path`. Returns `Ok(false)` if it was not indexed.
    pub fn try_remove_file(&self, path: &str) -> Result<bool> {
        self.ensure_running()?;
        Self::check_path(path)?;
        let hash = hash_path(path);
        let (flags, stored) = self.core.stored_form(path);
        let mut store = self.core.lock_running(self.shard_for(path))?;
        Ok(store.remove(hash, flags, stored.as_bytes()))
    }

    /// Removes `path`; `true` when an entry was removed.
    pub fn remove_file(&self, path: &str) -> bool {
        match self.try_remove_file(path) {
            Ok(removed) => removed,
            Err(e) => {
                log::debug!("path index remove failed path={} error={}", path, e);
                false
            }
        }
    }

    /// Removes every entry of `shard` below the directory `prefix`.
    pub fn try_remove_by_prefix(&self, shard: usize, prefix: &str) -> Result<usize> {
        self.ensure_running()?;
        let pattern = format!("{}/", prefix.trim_end_matches('/'));
        let mut store = self.core.lock_running(shard)?;
        let core = &self.core;
        Ok(store.remove_where(|entry| core.absolute_starts_with(entry, pattern.as_bytes())))
    }

    pub fn remove_by_prefix(&self, shard: usize, prefix: &str) -> usize {
        match self.try_remove_by_prefix(shard, prefix) {
            Ok(removed) => removed,
            Err(e) => {
                log::debug!(
                    "path index prefix removal failed shard={} prefix={} error={}",
                    shard,
                    prefix,
                    e
                );
                0
            }
        }
    }

    /// Removes everything below the directory `prefix` from every shard.
    pub fn remove_prefix_all(&self, prefix: &str) -> usize {
        let removed = (0..self.shard_count())
            .map(|shard| self.remove_by_prefix(shard, prefix))
            .sum();
        log::debug!("path index prefix removed prefix={} removed={}", prefix, removed);
        removed
    }

    /// Builds the materializer that turns this index's scan results into
    /// display objects via `display`.
    pub fn materializer<M, F>(&self, display: F) -> PathMaterializer<M>
    where
        F: Fn(&str) -> M + Send + Sync + 'static,
    {
        PathMaterializer::new(Arc::downgrade(&self.core), display)
    }

    fn score_entry(
        &self,
        scratch: &mut ScoreScratch,
        needle: &Needle,
        haystack: &str,
        offset: usize,
    ) -> Score {
        let score = self
            .scorer
            .score_chars_in(scratch, needle.primary(), haystack, offset);
        if score.is_match() {
            return score;
        }
        match needle.spaceless() {
            Some(spaceless) => self.scorer.score_chars_in(scratch, spaceless, haystack, offset),
            None => score,
        }
    }

    /// Scores every entry of `shard` against `needle` and inserts the ones
    /// above the relevancy threshold into `container`.
    ///
    /// Entries are scored under the shard lock; the inserts, which may run
    /// release callbacks of displaced candidates, happen after it is dropped.
    pub fn try_scan<M>(
        &self,
        shard: usize,
        needle: &Needle,
        container: &ResultContainer<M>,
        materializer: &PathMaterializer<M>,
    ) -> Result<ScanOutcome> {
        self.ensure_running()?;
        let shard_id = u16::try_from(shard).map_err(|_| RankingError::InvalidShard {
            shard,
            shard_count: self.shard_count(),
        })?;
        let token = container.token();
        let mut stats = ScanStats::default();
        if token.is_cancelled() {
            return Ok(ScanOutcome::Cancelled(stats));
        }

        let Some(hits) = self.collect_hits(shard_id, needle, token, &mut stats)? else {
            return Ok(ScanOutcome::Cancelled(stats));
        };

        for (inserted, (relevancy, path_ref)) in hits.into_iter().enumerate() {
            if inserted > 0 && token.is_cancelled_sparse(inserted) {
                log::debug!(
                    "path scan cancelled while inserting shard={} generation={} inserted={}",
                    shard,
                    token.generation(),
                    inserted
                );
                return Ok(ScanOutcome::Cancelled(stats));
            }
            let identity = path_ref.hash();
            if !container.insert(identity, relevancy, materializer.factory(), Box::new(path_ref), None) {
                log::debug!(
                    "path scan stopped on saturated container shard={} scanned={}",
                    shard,
                    stats.scanned
                );
                return Ok(ScanOutcome::Saturated(stats));
            }
            stats.inserted += 1;
        }
        Ok(ScanOutcome::Completed(stats))
    }

    /// Scores the live entries of `shard` while holding its lock. `None` once
    /// the generation went stale.
    fn collect_hits(
        &self,
        shard: u16,
        needle: &Needle,
        token: &CancellationToken,
        stats: &mut ScanStats,
    ) -> Result<Option<Vec<(Score, PathRef)>>> {
        let store = self.core.lock_running(usize::from(shard))?;
        let mut scratch = ScoreScratch::new();
        let mut haystack = String::new();
        let mut hits = Vec::new();
        for (offset, entry) in store.entries() {
            if stats.scanned > 0 && token.is_cancelled_sparse(stats.scanned) {
                log::debug!(
                    "path scan cancelled shard={} generation={} scanned={}",
                    shard,
                    token.generation(),
                    stats.scanned
                );
                return Ok(None);
            }
            stats.scanned += 1;

            let Some(start) = self.core.absolute_into(&entry, &mut haystack) else {
                continue;
            };
            let relevancy = self.score_entry(&mut scratch, needle, &haystack, start);
            if relevancy <= self.min_relevancy {
                continue;
            }
            hits.push((
                relevancy,
                PathRef {
                    shard,
                    offset,
                    fingerprint: fingerprint_path(&haystack),
                },
            ));
        }
        Ok(Some(hits))
    }

    /// Like [`try_scan`](Self::try_scan); a shut down index or an unknown
    /// shard scans nothing.
    pub fn scan<M>(
        &self,
        shard: usize,
        needle: &Needle,
        container: &ResultContainer<M>,
        materializer: &PathMaterializer<M>,
    ) -> ScanOutcome {
        self.try_scan(shard, needle, container, materializer)
            .unwrap_or_else(|e| {
                log::debug!("path scan skipped shard={} error={}", shard, e);
                ScanOutcome::Completed(ScanStats::default())
            })
    }

    /// Scans every shard in parallel, one rayon task per shard.
    pub fn scan_all<M>(
        &self,
        needle: &Needle,
        container: &ResultContainer<M>,
        materializer: &PathMaterializer<M>,
    ) -> Vec<ScanOutcome> {
        (0..self.shard_count())
            .into_par_iter()
            .map(|shard| self.scan(shard, needle, container, materializer))
            .collect()
    }

    /// Number of indexed paths.
    pub fn size(&self) -> usize {
        self.core.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    /// Number of paths in `shard` (0 for an unknown shard).
    pub fn shard_len(&self, shard: usize) -> usize {
        self.core.shard(shard).map_or(0, |store| store.lock().len())
    }

    pub fn contains(&self, path: &str) -> bool {
        if path.is_empty() || self.is_shutdown() {
            return false;
        }
        let hash = hash_path(path);
        let (flags, stored) = self.core.stored_form(path);
        self.core
            .shard(self.shard_for(path))
            .is_ok_and(|store| store.lock().find(hash, flags, stored.as_bytes()).is_some())
    }

    /// Clears every shard. Later mutations fail and scans find nothing.
    pub fn shutdown(&self) {
        if self.core.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut dropped = 0;
        for shard in self.core.shards.iter() {
            let mut store = shard.lock();
            dropped += store.len();
            store.clear();
        }
        log::info!("path index shut down shards={} dropped={}", self.shard_count(), dropped);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::cancel::GenerationTracker;
    use crate::config::ContainerLimits;
    use crate::registry::{CallbackRegistry, MatchFactory, PayloadRelease};

    fn index(shards: usize, prefix: Option<&str>) -> PathIndex {
        PathIndex::new(IndexConfig::new(shards, prefix)).expect("index")
    }

    fn container() -> ResultContainer<String> {
        ResultContainer::new(
            CancellationToken::never(),
            Arc::new(CallbackRegistry::new()),
            ContainerLimits::default(),
        )
    }

    fn search(index: &PathIndex, query: &str) -> Vec<String> {
        let container = container();
        let materializer = index.materializer(str::to_string);
        index.scan_all(&Needle::prepare(query), &container, &materializer);
        container.materialize(usize::MAX)
    }

    #[test]
    fn add_then_remove_restores_count() {
        let index = index(4, None);
        index.add_file("/x/y");
        let before = index.shard_len(index.shard_for("/a/b/c"));

        assert!(index.add_file("/a/b/c"));
        assert!(index.add_file("/a/b/c"));
        assert_eq!(index.size(), 2);
        assert!(index.contains("/a/b/c"));

        assert!(index.remove_file("/a/b/c"));
        assert!(!index.remove_file("/a/b/c"));
        assert_eq!(index.shard_len(index.shard_for("/a/b/c")), before);
        assert!(search(&index, "abc").is_empty());
    }

    #[test]
    fn invalid_paths_are_rejected() {
        let index = index(2, None);
        assert!(!index.add_file(""));
        let long = format!("/{}", "a".repeat(usize::from(u16::MAX)));
        assert!(matches!(index.try_add_file(&long), Err(RankingError::InvalidPath(_))));
        assert_eq!(index.size(), 0);
    }

    #[test]
    fn prefixed_paths_are_reconstructed() {
        let index = index(2, Some("/home/me/"));
        assert_eq!(index.common_prefix(), Some("/home/me"));
        index.add_file("/home/me/docs/report.txt");
        index.add_file("/etc/report.conf");

        let mut found = search(&index, "report");
        found.sort();
        assert_eq!(found, vec!["/etc/report.conf", "/home/me/docs/report.txt"]);
        assert!(index.contains("/home/me/docs/report.txt"));
    }

    #[test]
    fn prefix_itself_is_not_scored() {
        let index = index(1, Some("/home/me"));
        index.add_file("/home/me/docs");
        assert!(search(&index, "home").is_empty());
        assert_eq!(search(&index, "docs"), vec!["/home/me/docs"]);
    }

    #[test]
    fn remove_by_prefix_respects_segment_boundary() {
        let index = index(1, None);
        for path in ["/a/b/one", "/a/b/deep/two", "/a/bc", "/a/b"] {
            index.add_file(path);
        }
        assert_eq!(index.remove_by_prefix(0, "/a/b/"), 2);
        assert!(index.contains("/a/bc"));
        assert!(index.contains("/a/b"));
        assert!(!index.contains("/a/b/one"));
    }

    #[test]
    fn remove_prefix_all_spans_shards_and_common_prefix() {
        let index = index(8, Some("/home/me"));
        for i in 0..50 {
            index.add_file(&format!("/home/me/src/file{i}.rs"));
        }
        index.add_file("/home/me/srcs/keep.rs");
        index.add_file("/opt/src/keep.rs");

        assert_eq!(index.remove_prefix_all("/home/me/src"), 50);
        assert_eq!(index.size(), 2);
    }

    #[test]
    fn unknown_shard_is_reported() {
        let index = index(2, None);
        assert!(matches!(
            index.try_remove_by_prefix(5, "/a"),
            Err(RankingError::InvalidShard { shard: 5, shard_count: 2 })
        ));
        assert_eq!(index.shard_len(5), 0);
    }

    #[test]
    fn stale_generation_stops_scan() {
        let index = index(1, None);
        index.add_file("/tmp/notes.txt");
        let tracker = GenerationTracker::new();
        let container = ResultContainer::new(
            tracker.token(tracker.next_generation()),
            Arc::new(CallbackRegistry::new()),
            ContainerLimits::default(),
        );
        tracker.next_generation();

        let materializer = index.materializer(str::to_string);
        let outcome = index.scan(0, &Needle::prepare("notes"), &container, &materializer);
        assert!(outcome.is_cancelled());
        assert!(container.is_empty());
    }

    #[test]
    fn saturation_stops_scan() {
        let index = index(1, None);
        for i in 0..600 {
            index.add_file(&format!("/data/item{i}"));
        }
        let container = ResultContainer::new(
            CancellationToken::never(),
            Arc::new(CallbackRegistry::new()),
            ContainerLimits { max_sheets: 1 },
        );
        let materializer = index.materializer(str::to_string);
        let outcome = index.scan(0, &Needle::prepare("item"), &container, &materializer);
        assert!(outcome.is_saturated());
        assert_eq!(outcome.stats().inserted, crate::container::SHEET_CAPACITY);
    }

    #[test]
    fn empty_needle_yields_nothing() {
        let index = index(2, None);
        index.add_file("/a");
        assert!(search(&index, "").is_empty());
    }

    #[test]
    fn spaceless_variant_is_the_fallback() {
        let index = index(1, None);
        index.add_file("/x/report");
        assert_eq!(search(&index, "re port"), vec!["/x/report"]);
    }

    #[test]
    fn vanished_entry_materializes_as_root() {
        let index = index(1, None);
        index.add_file("/tmp/gone.txt");
        let container = container();
        let materializer = index.materializer(str::to_string);
        index.scan(0, &Needle::prepare("gone"), &container, &materializer);

        index.remove_file("/tmp/gone.txt");
        assert_eq!(container.materialize(1), vec![crate::index::ROOT_PATH]);
    }

    #[test]
    fn results_survive_compaction() {
        let index = index(1, None);
        for i in 0..40 {
            index.add_file(&format!("/junk/{i}"));
        }
        index.add_file("/keep/target.md");
        let container = container();
        let materializer = index.materializer(str::to_string);
        index.scan(0, &Needle::prepare("target"), &container, &materializer);

        assert_eq!(index.remove_by_prefix(0, "/junk"), 40);
        assert_eq!(container.materialize(1), vec!["/keep/target.md"]);
    }

    #[test]
    fn displaced_release_runs_outside_the_shard_lock() {
        let index = Arc::new(index(1, None));
        index.add_file("/tmp/notes.txt");
        let container = container();

        let sizes = Arc::new(AtomicUsize::new(0));
        let release: PayloadRelease = {
            let index = index.clone();
            let sizes = sizes.clone();
            Arc::new(move |_payload| {
                // Locks every shard; must not run while the scan holds one.
                sizes.store(index.size(), Ordering::SeqCst);
            })
        };
        let factory: MatchFactory<String> = Arc::new(|_payload| "other".to_string());
        container.insert(
            hash_path("/tmp/notes.txt"),
            Score::new(-100),
            &factory,
            Box::new(()),
            Some(&release),
        );

        let materializer = index.materializer(str::to_string);
        let outcome = index.scan(0, &Needle::prepare("notes"), &container, &materializer);
        assert!(outcome.is_completed());
        assert_eq!(sizes.load(Ordering::SeqCst), 1);
        assert_eq!(container.materialize(5), vec!["/tmp/notes.txt"]);
    }

    #[test]
    fn removed_path_is_not_replaced_by_another() {
        let index = index(1, None);
        index.add_file("/tmp/first.txt");
        let container = container();
        let materializer = index.materializer(str::to_string);
        index.scan(0, &Needle::prepare("first"), &container, &materializer);

        index.remove_file("/tmp/first.txt");
        index.add_file("/tmp/second.txt");
        assert_eq!(container.materialize(1), vec![crate::index::ROOT_PATH]);
    }

    #[test]
    fn shards_mutate_while_scanning() {
        let index = index(4, Some("/home/me"));
        for i in 0..50 {
            index.add_file(&format!("/home/me/stable/report-{i}.txt"));
        }

        thread::scope(|scope| {
            for writer in 0..4 {
                let index = &index;
                scope.spawn(move || {
                    for round in 0..200 {
                        let path = format!("/home/me/churn/w{writer}/report-{round}.txt");
                        assert!(index.add_file(&path));
                        if round % 2 == 0 {
                            assert!(index.remove_file(&path));
                        }
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..20 {
                    let found = search(&index, "report");
                    let stable = found.iter().filter(|path| path.contains("/stable/")).count();
                    assert_eq!(stable, 50);
                }
            });
        });

        assert_eq!(index.size(), 50 + 4 * 100);
    }

    #[test]
    fn shutdown_refuses_further_work() {
        let index = index(2, None);
        index.add_file("/a/b");
        index.shutdown();

        assert_eq!(index.size(), 0);
        assert!(!index.add_file("/c/d"));
        assert!(!index.remove_file("/a/b"));
        assert!(matches!(index.try_add_file("/c/d"), Err(RankingError::IndexShutdown)));
        assert!(search(&index, "b").is_empty());
        // Idempotent.
        index.shutdown();
    }
}
