/*
 * Copyright (c) 2025. The curator-connect authors
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Correlation state for outstanding requests.
//!
//! Two tables, both keyed by request id and safe for unsynchronized concurrent
//! access from consumer and application tasks:
//!
//! *   **pending acknowledgements**: request id to future core; removed by the
//!     first acknowledgement, a cancellation, or abort-all.
//! *   **active requests**: request id to result handler; outlives the
//!     acknowledgement because one accepted request may receive a stream of
//!     results. Removed by a failure acknowledgement, either cancellation
//!     path, or abort-all.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::error;
use uuid::Uuid;

use crate::common::enrichment::ResultHandler;
use crate::common::future::FutureCore;

/// The registered handler side of a correlation entry.
pub(crate) struct ActiveRequest {
    /// Receives each result of the accepted request.
    pub handler: ResultHandler,
    /// Resource the request targeted; diagnostic only.
    pub target_resource: String,
}

/// The two correlation tables, owned by the connector and shared with every
/// future it hands out.
#[derive(Default)]
pub(crate) struct CorrelationSet {
    pending: DashMap<Uuid, Arc<FutureCore>>,
    active: DashMap<Uuid, ActiveRequest>,
}

impl CorrelationSet {
    /// Registers both entries for a new request.
    ///
    /// Must happen before the request is published; an acknowledgement can
    /// arrive the moment the payload hits the broker.
    pub fn register(&self, request_id: Uuid, core: Arc<FutureCore>, active: ActiveRequest) {
        if self.pending.insert(request_id, core).is_some()
            || self.active.insert(request_id, active).is_some()
        {
            // One entry per id is an engine invariant; ids are v4 UUIDs.
            error!(request_id = %request_id, "correlation entry replaced an existing one");
        }
    }

    /// Removes and returns the pending-acknowledgement entry.
    pub fn take_pending(&self, request_id: &Uuid) -> Option<Arc<FutureCore>> {
        self.pending.remove(request_id).map(|(_, core)| core)
    }

    /// Removes the active-request entry, reporting whether one existed.
    pub fn remove_active(&self, request_id: &Uuid) -> bool {
        self.active.remove(request_id).is_some()
    }

    /// A clone of the result handler for an active request.
    ///
    /// Cloned out rather than borrowed so the table shard is not held while
    /// the handler runs.
    pub fn result_handler(&self, request_id: &Uuid) -> Option<ResultHandler> {
        self.active
            .get(request_id)
            .map(|entry| Arc::clone(&entry.handler))
    }

    /// The recorded target resource of an active request; diagnostic only.
    pub fn target_resource(&self, request_id: &Uuid) -> Option<String> {
        self.active
            .get(request_id)
            .map(|entry| entry.target_resource.clone())
    }

    /// Removes both entries for a request. Idempotent.
    pub fn drop_request(&self, request_id: &Uuid) {
        self.pending.remove(request_id);
        self.active.remove(request_id);
    }

    /// Empties both tables, returning every future core that was still
    /// pending so the caller can abort them.
    pub fn abort_all(&self) -> Vec<Arc<FutureCore>> {
        let cores: Vec<Arc<FutureCore>> = self
            .pending
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.pending.clear();
        self.active.clear();
        cores
    }

    /// Whether any entry exists for the request id.
    pub fn contains(&self, request_id: &Uuid) -> bool {
        self.pending.contains_key(request_id) || self.active.contains_key(request_id)
    }

    /// Number of requests awaiting an acknowledgement.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of requests with a registered result handler.
    pub fn active_len(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_handler() -> ResultHandler {
        Arc::new(|_| {})
    }

    fn entry(set: &Arc<CorrelationSet>) -> Uuid {
        let request_id = Uuid::new_v4();
        let core = FutureCore::new(request_id, Arc::clone(set));
        set.register(
            request_id,
            core,
            ActiveRequest {
                handler: noop_handler(),
                target_resource: "resource:1".to_string(),
            },
        );
        request_id
    }

    #[test]
    fn test_register_and_take() {
        let set = Arc::new(CorrelationSet::default());
        let request_id = entry(&set);

        assert!(set.contains(&request_id));
        assert_eq!(set.pending_len(), 1);
        assert_eq!(set.active_len(), 1);

        let core = set.take_pending(&request_id).expect("pending entry");
        assert_eq!(core.request_id(), request_id);
        assert!(set.take_pending(&request_id).is_none());

        // The active entry survives the acknowledgement.
        assert!(set.result_handler(&request_id).is_some());
        assert_eq!(set.target_resource(&request_id).as_deref(), Some("resource:1"));
    }

    #[test]
    fn test_drop_request_is_idempotent() {
        let set = Arc::new(CorrelationSet::default());
        let request_id = entry(&set);

        set.drop_request(&request_id);
        assert!(!set.contains(&request_id));
        set.drop_request(&request_id);
        assert!(!set.contains(&request_id));
    }

    #[test]
    fn test_abort_all_empties_both_tables() {
        let set = Arc::new(CorrelationSet::default());
        let first = entry(&set);
        let second = entry(&set);

        let cores = set.abort_all();
        assert_eq!(cores.len(), 2);
        assert_eq!(set.pending_len(), 0);
        assert_eq!(set.active_len(), 0);
        assert!(!set.contains(&first));
        assert!(!set.contains(&second));
    }
}
