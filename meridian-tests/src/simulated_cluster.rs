//! In-memory cluster implementing every client collaborator.
//!
//! `SimulatedCluster` plays the placement service, the storage nodes and
//! the lock resolver at once, over one authoritative region table. Faults
//! are injected through [`ClusterFaults`]; everything the client asked for
//! is recorded so tests can assert on it.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use meridian_client::{
    LockResolver, Operator, OperatorStatus, PlacementClient, Request, RequestSender, Response,
    ResponseBody, ScanLockRequest, ScanLockResponse, SplitRegionResponse, SCATTER_OPERATOR_DESC,
};
use meridian_core::{
    Error, Key, KeyRange, Lock, Region, RegionEpoch, RegionId, RegionVerId, Result, Timestamp,
};
use meridian_flow::{BackoffKind, Backoffer};
use meridian_routing::{RegionMap, RegionProvider};
use tokio::sync::Barrier;
use tracing::debug;

// -----------------------------------------------------------------------------
// Fault configuration
// -----------------------------------------------------------------------------

/// Outcome of one scatter request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScatterOutcome {
    /// The scatter is accepted.
    Ok,
    /// The placement service reports a retryable error.
    Error,
    /// The placement service times out.
    Timeout,
}

/// A topology change applied by the cluster on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyChange {
    /// Split the region owning `at` so that `at` starts a region.
    Split {
        /// The new boundary.
        at: Key,
    },
    /// Merge the region owning `key` with its right neighbour.
    Merge {
        /// Any key of the left region.
        key: Key,
    },
}

/// Fault injection knobs.
///
/// Counters are consumed one per matching call.
#[derive(Debug, Default)]
pub struct ClusterFaults {
    /// Topology changes applied right after the n-th served scan-lock.
    pub topology_changes: Vec<(usize, TopologyChange)>,
    /// Region errors returned for requests addressed to a region id.
    pub region_errors: HashMap<RegionId, usize>,
    /// Regions whose split requests fail outright.
    pub fail_split_regions: HashSet<RegionId>,
    /// Regions whose split requests panic inside the sender.
    pub panic_split_regions: HashSet<RegionId>,
    /// Responses delivered without a body.
    pub missing_bodies: usize,
    /// Transport failures the sender retries internally.
    pub rpc_errors: usize,
    /// Placement failures on region lookups.
    pub provider_errors: usize,
    /// Resolve calls that report partial resolution without resolving.
    pub partial_resolves: usize,
    /// Scripted outcomes for scatter calls, consumed in order. Empty means ok.
    pub scatter_script: VecDeque<ScatterOutcome>,
    /// Polls a new scatter operator reports running before succeeding.
    pub scatter_running_polls: usize,
    /// Header errors attached to operators of a region.
    pub operator_header_errors: HashMap<RegionId, String>,
    /// Failed operator polls.
    pub operator_poll_errors: usize,
    /// Split requests wait here before being served, so a test can require
    /// several to be in flight at once.
    pub split_barrier: Option<Arc<Barrier>>,
}

impl ClusterFaults {
    /// Creates a fault config with no faults.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    fn take(counter: &mut usize) -> bool {
        if *counter > 0 {
            *counter -= 1;
            true
        } else {
            false
        }
    }

    fn take_region_error(&mut self, region_id: RegionId) -> bool {
        self.region_errors
            .get_mut(&region_id)
            .is_some_and(Self::take)
    }
}

// -----------------------------------------------------------------------------
// Observations
// -----------------------------------------------------------------------------

/// A split request as served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitRecord {
    /// Region the request was addressed to.
    pub region: RegionVerId,
    /// Range the region owned when the request arrived.
    pub range: KeyRange,
    /// Requested split keys.
    pub keys: Vec<Key>,
}

#[derive(Debug, Default)]
struct ClusterLog {
    scanned: Vec<KeyRange>,
    resolved: Vec<Lock>,
    splits: Vec<SplitRecord>,
    scatter_calls: Vec<(RegionId, Option<String>)>,
    operator_polls: usize,
    region_errors_served: usize,
}

#[derive(Debug, Clone)]
struct SimOperator {
    desc: String,
    running_polls: usize,
    header_error: Option<String>,
}

// -----------------------------------------------------------------------------
// SimulatedCluster
// -----------------------------------------------------------------------------

#[derive(Debug)]
struct ClusterState {
    regions: RegionMap,
    next_region_id: u64,
    locks: BTreeMap<Key, Lock>,
    safe_point: Timestamp,
    operators: HashMap<RegionId, SimOperator>,
    scans_served: usize,
    log: ClusterLog,
}

impl ClusterState {
    fn current(&self, ver: RegionVerId) -> Option<Region> {
        self.regions.iter().find(|r| r.ver_id() == ver).cloned()
    }

    fn allocate_id(&mut self) -> RegionId {
        let id = RegionId::new(self.next_region_id);
        self.next_region_id += 1;
        id
    }

    /// Splits `region` at every valid point of `keys`. The right-most child
    /// keeps the parent's id. Returns the children in key order.
    fn split(&mut self, region: &Region, keys: &[Key]) -> Vec<Region> {
        let mut points: Vec<Key> = keys
            .iter()
            .filter(|k| region.contains(k.as_bytes()) && **k != region.start_key)
            .cloned()
            .collect();
        points.sort();
        points.dedup();
        if points.is_empty() {
            return vec![region.clone()];
        }

        let epoch = RegionEpoch::new(region.epoch.conf_ver, region.epoch.version + 1);
        let mut starts = vec![region.start_key.clone()];
        starts.extend(points.iter().cloned());
        let mut ends = points;
        ends.push(region.end_key.clone());

        let last = starts.len() - 1;
        let children: Vec<Region> = starts
            .into_iter()
            .zip(ends)
            .enumerate()
            .map(|(i, (start, end))| {
                let id = if i == last { region.id } else { self.allocate_id() };
                Region::new(id, epoch, start, end)
            })
            .collect();
        for child in &children {
            self.regions.insert(child.clone());
        }
        children
    }

    fn apply(&mut self, change: &TopologyChange) {
        match change {
            TopologyChange::Split { at } => {
                if let Some(region) = self.regions.lookup(at.as_bytes()).cloned() {
                    let children = self.split(&region, std::slice::from_ref(at));
                    debug!(region = %region.ver_id(), children = children.len(), "simulated split");
                }
            }
            TopologyChange::Merge { key } => {
                let Some(left) = self.regions.lookup(key.as_bytes()).cloned() else {
                    return;
                };
                if left.end_key.is_empty() {
                    return;
                }
                let Some(right) = self.regions.lookup(left.end_key.as_bytes()).cloned() else {
                    return;
                };
                let version = left.epoch.version.max(right.epoch.version) + 1;
                let merged = Region::new(
                    left.id,
                    RegionEpoch::new(left.epoch.conf_ver, version),
                    left.start_key.clone(),
                    right.end_key,
                );
                debug!(region = %merged.ver_id(), "simulated merge");
                self.regions.insert(merged);
            }
        }
    }
}

/// An in-memory cluster with fault injection.
#[derive(Debug)]
pub struct SimulatedCluster {
    state: Mutex<ClusterState>,
    faults: Mutex<ClusterFaults>,
}

impl Default for SimulatedCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCluster {
    /// Creates a cluster with one region covering the whole keyspace.
    #[must_use]
    pub fn new() -> Self {
        Self::with_boundaries(&[])
    }

    /// Creates a cluster with regions split at `boundaries`.
    ///
    /// Region ids start at 1 in key order.
    #[must_use]
    pub fn with_boundaries(boundaries: &[&str]) -> Self {
        let mut regions = RegionMap::new();
        let mut start = Key::EMPTY;
        let mut next_id = 1;
        for end in boundaries.iter().copied().chain(std::iter::once("")) {
            let end = Key::from(end);
            regions.insert(Region::new(
                RegionId::new(next_id),
                RegionEpoch::new(1, 1),
                start,
                end.clone(),
            ));
            start = end;
            next_id += 1;
        }

        Self {
            state: Mutex::new(ClusterState {
                regions,
                next_region_id: next_id,
                locks: BTreeMap::new(),
                safe_point: Timestamp::new(0),
                operators: HashMap::new(),
                scans_served: 0,
                log: ClusterLog::default(),
            }),
            faults: Mutex::new(ClusterFaults::none()),
        }
    }

    /// Returns the fault configuration for modification.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn faults(&self) -> MutexGuard<'_, ClusterFaults> {
        self.faults.lock().expect("faults lock poisoned")
    }

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().expect("cluster state lock poisoned")
    }

    /// Writes a lock.
    pub fn put_lock(&self, lock: Lock) {
        self.state().locks.insert(lock.key.clone(), lock);
    }

    /// Starts an operator on a region that reports running for
    /// `running_polls` polls.
    pub fn start_operator(&self, region_id: RegionId, desc: &str, running_polls: usize) {
        self.state().operators.insert(
            region_id,
            SimOperator {
                desc: desc.to_string(),
                running_polls,
                header_error: None,
            },
        );
    }

    /// Applies a topology change immediately.
    pub fn change_topology(&self, change: &TopologyChange) {
        self.state().apply(change);
    }

    /// Returns the current regions in key order.
    #[must_use]
    pub fn regions(&self) -> Vec<Region> {
        self.state().regions.iter().cloned().collect()
    }

    /// Returns the region currently owning `key`.
    #[must_use]
    pub fn region_for(&self, key: impl AsRef<[u8]>) -> Option<Region> {
        self.state().regions.lookup(key.as_ref()).cloned()
    }

    /// Returns the locks still outstanding.
    #[must_use]
    pub fn remaining_locks(&self) -> Vec<Lock> {
        self.state().locks.values().cloned().collect()
    }

    /// Returns every lock resolved so far, in resolution order.
    #[must_use]
    pub fn resolved_locks(&self) -> Vec<Lock> {
        self.state().log.resolved.clone()
    }

    /// Returns the ranges of every served scan-lock request.
    #[must_use]
    pub fn scanned_ranges(&self) -> Vec<KeyRange> {
        self.state().log.scanned.clone()
    }

    /// Returns every served split request.
    #[must_use]
    pub fn split_requests(&self) -> Vec<SplitRecord> {
        self.state().log.splits.clone()
    }

    /// Returns every scatter call with its group tag.
    #[must_use]
    pub fn scatter_calls(&self) -> Vec<(RegionId, Option<String>)> {
        self.state().log.scatter_calls.clone()
    }

    /// Returns the number of operator polls.
    #[must_use]
    pub fn operator_polls(&self) -> usize {
        self.state().log.operator_polls
    }

    /// Returns the number of region errors handed out.
    #[must_use]
    pub fn region_errors_served(&self) -> usize {
        self.state().log.region_errors_served
    }

    /// Returns the recorded GC safe point.
    #[must_use]
    pub fn safe_point(&self) -> Timestamp {
        self.state().safe_point
    }

    fn serve_scan(&self, region: &Region, req: &ScanLockRequest) -> Response {
        let mut state = self.state();
        let upper = if req.end_key.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(req.end_key.as_bytes())
        };
        let limit = usize::try_from(req.limit).unwrap_or(usize::MAX);
        let locks: Vec<Lock> = state
            .locks
            .range::<[u8], _>((Bound::Included(req.start_key.as_bytes()), upper))
            .map(|(_, lock)| lock)
            .filter(|lock| region.contains(lock.key.as_bytes()))
            .filter(|lock| lock.is_at_or_below(req.max_version))
            .take(limit)
            .cloned()
            .collect();

        state
            .log
            .scanned
            .push(KeyRange::new(req.start_key.clone(), req.end_key.clone()));
        state.scans_served += 1;
        let served = state.scans_served;
        drop(state);

        let changes: Vec<TopologyChange> = self
            .faults()
            .topology_changes
            .iter()
            .filter(|(after, _)| *after == served)
            .map(|(_, change)| change.clone())
            .collect();
        if !changes.is_empty() {
            let mut state = self.state();
            for change in &changes {
                state.apply(change);
            }
        }

        Response::ok(ResponseBody::ScanLock(ScanLockResponse { locks, error: None }))
    }

    fn serve_split(&self, region: &Region, keys: Vec<Key>) -> Result<Response> {
        let (fail, panic) = {
            let faults = self.faults();
            (
                faults.fail_split_regions.contains(&region.id),
                faults.panic_split_regions.contains(&region.id),
            )
        };
        assert!(!panic, "simulated panic splitting {}", region.id);
        if fail {
            return Err(Error::Rpc {
                operation: "split_region",
                message: format!("simulated split failure on {}", region.id),
            });
        }

        let mut state = self.state();
        state.log.splits.push(SplitRecord {
            region: region.ver_id(),
            range: region.range(),
            keys: keys.clone(),
        });
        let regions = state.split(region, &keys);
        Ok(Response::ok(ResponseBody::SplitRegion(SplitRegionResponse {
            regions,
        })))
    }
}

// -----------------------------------------------------------------------------
// Collaborator implementations
// -----------------------------------------------------------------------------

#[async_trait]
impl RegionProvider for SimulatedCluster {
    async fn get_region_by_key(&self, key: &[u8]) -> Result<Region> {
        if ClusterFaults::take(&mut self.faults().provider_errors) {
            return Err(Error::Placement {
                message: "simulated lookup failure".to_string(),
            });
        }
        self.state()
            .regions
            .lookup(key)
            .cloned()
            .ok_or_else(|| Error::RegionNotFound {
                key: Key::from(key),
            })
    }
}

#[async_trait]
impl RequestSender for SimulatedCluster {
    async fn send(
        &self,
        bo: &mut Backoffer,
        request: Request,
        region: RegionVerId,
        _timeout: Duration,
    ) -> Result<Response> {
        loop {
            let transport_failed = ClusterFaults::take(&mut self.faults().rpc_errors);
            if !transport_failed {
                break;
            }
            bo.backoff(
                BackoffKind::Rpc,
                Error::Rpc {
                    operation: request.name(),
                    message: "simulated transport failure".to_string(),
                },
            )
            .await?;
        }

        let (forced_region_error, missing_body) = {
            let mut faults = self.faults();
            let forced = faults.take_region_error(region.id);
            (forced, !forced && ClusterFaults::take(&mut faults.missing_bodies))
        };
        let current = self.state().current(region);
        let Some(current) = current.filter(|_| !forced_region_error) else {
            self.state().log.region_errors_served += 1;
            return Ok(Response::region_error(format!("epoch not match for {region}")));
        };
        if missing_body {
            return Ok(Response::default());
        }

        match request {
            Request::ScanLock(req) => Ok(self.serve_scan(&current, &req)),
            Request::SplitRegion(req) => {
                let barrier = self.faults().split_barrier.clone();
                if let Some(barrier) = barrier {
                    barrier.wait().await;
                }
                self.serve_split(&current, req.split_keys)
            }
        }
    }
}

#[async_trait]
impl LockResolver for SimulatedCluster {
    async fn batch_resolve_locks(
        &self,
        _bo: &mut Backoffer,
        locks: &[Lock],
        region: RegionVerId,
    ) -> Result<bool> {
        if ClusterFaults::take(&mut self.faults().partial_resolves) {
            return Ok(false);
        }

        let mut state = self.state();
        let Some(current) = state.current(region) else {
            return Ok(false);
        };
        let mut all_resolved = true;
        for lock in locks {
            if !current.contains(lock.key.as_bytes()) {
                all_resolved = false;
                continue;
            }
            if let Some(resolved) = state.locks.remove(&lock.key) {
                state.log.resolved.push(resolved);
            }
        }
        Ok(all_resolved)
    }
}

#[async_trait]
impl PlacementClient for SimulatedCluster {
    async fn update_gc_safe_point(&self, safe_point: Timestamp) -> Result<Timestamp> {
        let mut state = self.state();
        state.safe_point = state.safe_point.max(safe_point);
        Ok(state.safe_point)
    }

    async fn scatter_regions(&self, region_ids: &[RegionId], group: Option<&str>) -> Result<()> {
        let (outcome, running_polls, header_errors) = {
            let mut faults = self.faults();
            let outcome = faults
                .scatter_script
                .pop_front()
                .unwrap_or(ScatterOutcome::Ok);
            let header_errors: Vec<Option<String>> = region_ids
                .iter()
                .map(|id| faults.operator_header_errors.get(id).cloned())
                .collect();
            (outcome, faults.scatter_running_polls, header_errors)
        };

        let mut state = self.state();
        for id in region_ids {
            state
                .log
                .scatter_calls
                .push((*id, group.map(str::to_string)));
        }
        match outcome {
            ScatterOutcome::Error => Err(Error::Placement {
                message: "simulated scatter failure".to_string(),
            }),
            ScatterOutcome::Timeout => Err(Error::PlacementTimeout {
                message: "simulated scatter timeout".to_string(),
            }),
            ScatterOutcome::Ok => {
                for (id, header_error) in region_ids.iter().zip(header_errors) {
                    state.operators.insert(
                        *id,
                        SimOperator {
                            desc: SCATTER_OPERATOR_DESC.to_string(),
                            running_polls,
                            header_error,
                        },
                    );
                }
                Ok(())
            }
        }
    }

    async fn get_operator(&self, region_id: RegionId) -> Result<Option<Operator>> {
        let poll_failed = ClusterFaults::take(&mut self.faults().operator_poll_errors);
        let mut state = self.state();
        state.log.operator_polls += 1;
        if poll_failed {
            return Err(Error::Placement {
                message: "simulated operator poll failure".to_string(),
            });
        }

        let Some(op) = state.operators.get_mut(&region_id) else {
            return Ok(None);
        };
        let status = if op.running_polls > 0 {
            op.running_polls -= 1;
            OperatorStatus::Running
        } else {
            OperatorStatus::Success
        };
        Ok(Some(Operator {
            region_id,
            desc: op.desc.clone(),
            status,
            header_error: op.header_error.clone(),
        }))
    }
}
