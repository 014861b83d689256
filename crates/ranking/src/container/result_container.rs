use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fnv::FnvHashMap;
use parking_lot::{Mutex, RwLock};

use super::record::{Location, MatchCandidate};
use super::sheet::ResultSheet;
use super::SHEET_CAPACITY;
use crate::cancel::CancellationToken;
use crate::config::ContainerLimits;
use crate::error::{RankingError, Result};
use crate::registry::{Callback, CallbackRegistry, MatchFactory, Payload, PayloadRelease, SlotId};
use crate::score::Score;

/// A payload that lost its place and must be released once the lock drops.
struct Evicted {
    release: Option<SlotId>,
    payload: Payload,
}

impl Evicted {
    fn of(candidate: MatchCandidate, payload: Payload) -> Self {
        Self {
            release: candidate.release,
            payload,
        }
    }
}

/// Everything guarded by the container lock.
#[derive(Default)]
struct ContainerState {
    sheets: Vec<ResultSheet>,
    /// Identity → slot of its best candidate. Entries outlive consumption so
    /// a materialized identity cannot come back in a later batch.
    dedup: FnvHashMap<u32, Location>,
    live: usize,
    next_unique: u32,
}

impl ContainerState {
    fn admit(
        &mut self,
        candidate: MatchCandidate,
        payload: Payload,
        deduplicate: bool,
        max_sheets: usize,
    ) -> (bool, Option<Evicted>) {
        if deduplicate {
            if let Some(location) = self.dedup.get(&candidate.identity).copied() {
                return (true, Some(self.contend(location, candidate, payload)));
            }
        }
        match self.append(candidate, payload, max_sheets) {
            Ok(location) => {
                if deduplicate {
                    self.dedup.insert(candidate.identity, location);
                }
                (true, None)
            }
            Err(payload) => (false, Some(Evicted::of(candidate, payload))),
        }
    }

    /// Strictly greater relevancy takes over the slot; otherwise the newcomer
    /// loses.
    fn contend(&mut self, location: Location, mut candidate: MatchCandidate, payload: Payload) -> Evicted {
        let Some(sheet) = self.sheets.get_mut(usize::from(location.sheet)) else {
            return Evicted::of(candidate, payload);
        };
        match sheet.get(location.item) {
            Some(current) if candidate.relevancy > current.relevancy => {
                candidate.location = location;
                match sheet.replace(location.item, candidate, payload) {
                    Ok((previous, previous_payload)) => Evicted::of(previous, previous_payload),
                    Err(payload) => Evicted::of(candidate, payload),
                }
            }
            _ => Evicted::of(candidate, payload),
        }
    }

    fn append(
        &mut self,
        mut candidate: MatchCandidate,
        payload: Payload,
        max_sheets: usize,
    ) -> std::result::Result<Location, Payload> {
        if self.sheets.last().map_or(true, ResultSheet::is_full) {
            if self.sheets.len() >= max_sheets {
                return Err(payload);
            }
            let sheet = match ResultSheet::try_new() {
                Ok(sheet) => sheet,
                Err(e) => {
                    log::debug!("result sheet allocation failed sheets={} error={}", self.sheets.len(), e);
                    return Err(payload);
                }
            };
            if self.sheets.try_reserve(1).is_err() {
                return Err(payload);
            }
            self.sheets.push(sheet);
        }

        let sheet_index = self.sheets.len() - 1;
        let Some(sheet) = self.sheets.last_mut() else {
            return Err(payload);
        };
        // max_sheets and SHEET_CAPACITY both fit in u16.
        candidate.location = Location {
            sheet: sheet_index as u16,
            item: sheet.len() as u16,
        };
        sheet.push(candidate, payload)?;
        self.live += 1;
        Ok(candidate.location)
    }

    fn take_top(&mut self, k: usize) -> Vec<(MatchCandidate, Payload)> {
        let mut ranked: Vec<MatchCandidate> =
            self.sheets.iter().flat_map(ResultSheet::live).copied().collect();
        if ranked.len() > k {
            ranked.select_nth_unstable_by(k - 1, MatchCandidate::rank_cmp);
            ranked.truncate(k);
        }
        ranked.sort_unstable_by(MatchCandidate::rank_cmp);

        let mut taken = Vec::with_capacity(ranked.len());
        for candidate in ranked {
            let location = candidate.location;
            if let Some(entry) = self
                .sheets
                .get_mut(usize::from(location.sheet))
                .and_then(|sheet| sheet.take(location.item))
            {
                self.live -= 1;
                taken.push(entry);
            }
        }
        taken
    }

    fn drain(&mut self) -> Vec<(MatchCandidate, Payload)> {
        let drained: Vec<_> = self.sheets.iter_mut().flat_map(ResultSheet::drain).collect();
        self.sheets.clear();
        self.dedup.clear();
        self.live = 0;
        self.next_unique = 0;
        drained
    }

    fn is_saturated(&self, max_sheets: usize) -> bool {
        self.sheets.len() >= max_sheets && self.sheets.last().map_or(true, ResultSheet::is_full)
    }
}

/// Aggregates the candidates every producer of one query round inserts.
///
/// Inserts are cheap: no display object is built until [`materialize`]
/// picks the winners. The container holds a payload per candidate and makes
/// sure each one is either handed to its factory or released exactly once,
/// including when the container is dropped.
///
/// [`materialize`]: ResultContainer::materialize
pub struct ResultContainer<M> {
    token: CancellationToken,
    registry: Arc<CallbackRegistry<M>>,
    max_sheets: usize,
    state: Mutex<ContainerState>,
    /// Strong references to every callback this container's candidates use,
    /// indexed by slot. The registry itself only holds them weakly.
    pinned: RwLock<Vec<Option<Callback<M>>>>,
    registry_warned: AtomicBool,
}

impl<M> fmt::Debug for ResultContainer<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultContainer")
            .field("generation", &self.generation())
            .field("len", &self.len())
            .field("sheets", &self.sheet_count())
            .field("max_sheets", &self.max_sheets)
            .finish()
    }
}

impl<M> ResultContainer<M> {
    /// Creates an empty container for the generation of `token`.
    pub fn new(
        token: CancellationToken,
        registry: Arc<CallbackRegistry<M>>,
        limits: ContainerLimits,
    ) -> Self {
        Self {
            token,
            registry,
            max_sheets: limits.max_sheets.clamp(1, usize::from(u16::MAX)),
            state: Mutex::new(ContainerState::default()),
            pinned: RwLock::new(Vec::new()),
            registry_warned: AtomicBool::new(false),
        }
    }

    /// Records a candidate.
    ///
    /// An existing candidate with the same `identity` is replaced only by a
    /// strictly more relevant one; the loser's payload is released. Returns
    /// `false` once the container is saturated, in which case nothing is
    /// stored and `payload` is released. A full callback registry only skips
    /// this candidate and still returns `true`.
    pub fn insert(
        &self,
        identity: u32,
        relevancy: Score,
        factory: &MatchFactory<M>,
        payload: Payload,
        release: Option<&PayloadRelease>,
    ) -> bool {
        match self.try_insert(identity, relevancy, factory, payload, release) {
            Ok(()) | Err(RankingError::RegistryFull(_)) => true,
            Err(_) => false,
        }
    }

    /// Like [`insert`](Self::insert), but reports why a candidate was not
    /// stored. The payload has been released whenever an error is returned.
    pub fn try_insert(
        &self,
        identity: u32,
        relevancy: Score,
        factory: &MatchFactory<M>,
        payload: Payload,
        release: Option<&PayloadRelease>,
    ) -> Result<()> {
        let Some((factory_slot, release_slot)) = self.register(factory, release) else {
            self.skip_unregistered(payload, release);
            return Err(RankingError::RegistryFull(self.registry.capacity()));
        };
        let candidate = MatchCandidate {
            relevancy,
            identity,
            location: Location::default(),
            factory: factory_slot,
            release: release_slot,
        };

        let (accepted, evicted) = self
            .state
            .lock()
            .admit(candidate, payload, true, self.max_sheets);
        if let Some(evicted) = evicted {
            self.release_payload(evicted.release, evicted.payload);
        }
        if !accepted {
            log::debug!(
                "result container saturated generation={} capacity={}",
                self.generation(),
                self.capacity()
            );
            return Err(RankingError::ContainerSaturated(self.capacity()));
        }
        Ok(())
    }

    /// Records a candidate that never takes part in deduplication.
    pub fn insert_unique(
        &self,
        relevancy: Score,
        factory: &MatchFactory<M>,
        payload: Payload,
        release: Option<&PayloadRelease>,
    ) -> bool {
        let Some((factory_slot, release_slot)) = self.register(factory, release) else {
            self.skip_unregistered(payload, release);
            return true;
        };

        let (accepted, evicted) = {
            let mut state = self.state.lock();
            let candidate = MatchCandidate {
                relevancy,
                identity: state.next_unique,
                location: Location::default(),
                factory: factory_slot,
                release: release_slot,
            };
            let outcome = state.admit(candidate, payload, false, self.max_sheets);
            if outcome.0 {
                state.next_unique = state.next_unique.wrapping_add(1);
            }
            outcome
        };
        if let Some(evicted) = evicted {
            self.release_payload(evicted.release, evicted.payload);
        }
        accepted
    }

    /// Builds display objects for the `k` best remaining candidates, best
    /// first. Materialized candidates are consumed.
    pub fn materialize(&self, k: usize) -> Vec<M> {
        if k == 0 {
            return Vec::new();
        }
        let picked = self.state.lock().take_top(k);

        let mut results = Vec::with_capacity(picked.len());
        for (candidate, payload) in picked {
            match self.pinned_factory(candidate.factory) {
                Some(factory) => results.push(factory(payload.as_ref())),
                None => log::debug!(
                    "result factory missing slot={} identity={}",
                    candidate.factory.get(),
                    candidate.identity
                ),
            }
            self.release_payload(candidate.release, payload);
        }
        results
    }

    /// Drops the container, releasing every payload it still holds.
    pub fn release(self) {
        drop(self);
    }

    /// Empties the container for reuse by a new generation.
    pub fn reset(&mut self, token: CancellationToken) {
        self.release_all();
        self.pinned.get_mut().clear();
        self.token = token;
        self.registry_warned.store(false, Ordering::Relaxed);
    }

    pub fn generation(&self) -> u64 {
        self.token.generation()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether a newer generation has superseded this container.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry<M>> {
        &self.registry
    }

    /// Live (not yet materialized) candidates.
    pub fn len(&self) -> usize {
        self.state.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sheet_count(&self) -> usize {
        self.state.lock().sheets.len()
    }

    /// Maximum number of slots this container can ever hold.
    pub fn capacity(&self) -> usize {
        self.max_sheets * SHEET_CAPACITY
    }

    /// Whether the next insert of a new identity would be rejected.
    pub fn is_saturated(&self) -> bool {
        self.state.lock().is_saturated(self.max_sheets)
    }

    fn register(
        &self,
        factory: &MatchFactory<M>,
        release: Option<&PayloadRelease>,
    ) -> Option<(SlotId, Option<SlotId>)> {
        let factory_slot = self.registry.register_factory(factory)?;
        self.pin(factory_slot, Callback::Factory(factory.clone()));
        let release_slot = match release {
            Some(release) => {
                let slot = self.registry.register_release(release)?;
                self.pin(slot, Callback::Release(release.clone()));
                Some(slot)
            }
            None => None,
        };
        Some((factory_slot, release_slot))
    }

    /// Keeps `callback` alive for as long as this container may use `slot`.
    fn pin(&self, slot: SlotId, callback: Callback<M>) {
        let index = slot.get();
        let held = self
            .pinned
            .read()
            .get(index)
            .and_then(Option::as_ref)
            .is_some_and(|held| held.same_as(&callback));
        if held {
            return;
        }
        let mut pinned = self.pinned.write();
        if pinned.len() <= index {
            pinned.resize_with(index + 1, || None);
        }
        if let Some(entry) = pinned.get_mut(index) {
            *entry = Some(callback);
        }
    }

    fn pinned_factory(&self, slot: SlotId) -> Option<MatchFactory<M>> {
        match self.pinned.read().get(slot.get()) {
            Some(Some(Callback::Factory(factory))) => Some(factory.clone()),
            _ => None,
        }
    }

    fn pinned_release(&self, slot: SlotId) -> Option<PayloadRelease> {
        match self.pinned.read().get(slot.get()) {
            Some(Some(Callback::Release(release))) => Some(release.clone()),
            _ => None,
        }
    }

    fn skip_unregistered(&self, payload: Payload, release: Option<&PayloadRelease>) {
        if !self.registry_warned.swap(true, Ordering::Relaxed) {
            log::warn!(
                "callback registry full, skipping candidates generation={} slots={}",
                self.generation(),
                self.registry.capacity()
            );
        }
        match release {
            Some(release) => release(payload),
            None => drop(payload),
        }
    }

    fn release_payload(&self, slot: Option<SlotId>, payload: Payload) {
        match slot.and_then(|slot| self.pinned_release(slot)) {
            Some(release) => release(payload),
            None => drop(payload),
        }
    }

    fn release_all(&mut self) {
        let drained = self.state.get_mut().drain();
        if !drained.is_empty() {
            log::debug!(
                "released unmaterialized payloads generation={} count={}",
                self.generation(),
                drained.len()
            );
        }
        for (candidate, payload) in drained {
            self.release_payload(candidate.release, payload);
        }
    }
}

impl<M> Drop for ResultContainer<M> {
    fn drop(&mut self) {
        self.release_all();
    }
}
