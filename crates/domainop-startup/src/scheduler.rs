//! Managed-server-up scheduler.
//!
//! Items are partitioned by cluster. Every group runs as one forked child;
//! inside a group, `lanes()` lanes share a FIFO queue. A lane takes the next
//! item, forks its start chain, and only after that chain has ended (ready,
//! failed or timed out) takes another one. The join of all groups runs the
//! completion chain exactly once.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use domainop_fiber::{BoxStep, FORK_RESULTS, FiberOutcome, Fork, NextAction, Packet, Step, Terminal};
use tracing::{debug, info, warn};

use crate::error::{StartupError, StartupResult};
use crate::gauge::AdmissionGauge;
use crate::item::{ClusterStartupGroup, StartupLimits, StartupWorkItem};

/// Plans and starts a set of managed servers.
#[derive(Debug)]
pub struct ManagedServerUp {
    groups: Vec<ClusterStartupGroup>,
}

impl ManagedServerUp {
    /// Partition `items` by cluster.
    ///
    /// Every cluster named in `limits` gets a group, even without items.
    /// Unclustered items share one unlimited group.
    pub fn new(items: Vec<StartupWorkItem>, limits: &StartupLimits) -> StartupResult<Self> {
        let mut clustered: BTreeMap<String, ClusterStartupGroup> = limits
            .clusters()
            .map(|name| {
                let limit = limits.limit_for(Some(name));
                let group = ClusterStartupGroup::new(Some(name.to_string()), limit);
                (name.to_string(), group)
            })
            .collect();
        let mut unclustered = ClusterStartupGroup::new(None, 0);
        let mut seen = HashSet::new();

        for item in items {
            if item.server_name.is_empty() {
                return Err(StartupError::EmptyServerName);
            }
            if !seen.insert(item.server_name.clone()) {
                return Err(StartupError::DuplicateServer(item.server_name));
            }
            match item.cluster_name.clone() {
                Some(name) => clustered
                    .entry(name.clone())
                    .or_insert_with(|| {
                        ClusterStartupGroup::new(Some(name.clone()), limits.limit_for(Some(&name)))
                    })
                    .push(item),
                None => unclustered.push(item),
            }
        }

        let mut groups: Vec<ClusterStartupGroup> = clustered.into_values().collect();
        if !unclustered.is_empty() {
            groups.push(unclustered);
        }
        Ok(Self { groups })
    }

    pub fn groups(&self) -> &[ClusterStartupGroup] {
        &self.groups
    }

    pub fn group(&self, cluster_name: Option<&str>) -> Option<&ClusterStartupGroup> {
        self.groups.iter().find(|g| g.cluster_name() == cluster_name)
    }

    /// Chain that starts every group and then runs `on_complete`.
    pub fn into_step(self, on_complete: BoxStep) -> BoxStep {
        Box::new(StartServers {
            groups: self.groups,
            on_complete,
        })
    }
}

/// Plan and return the startup chain in one go.
pub fn start_servers(
    items: Vec<StartupWorkItem>,
    limits: &StartupLimits,
    on_complete: BoxStep,
) -> StartupResult<BoxStep> {
    Ok(ManagedServerUp::new(items, limits)?.into_step(on_complete))
}

struct StartServers {
    groups: Vec<ClusterStartupGroup>,
    on_complete: BoxStep,
}

impl Step for StartServers {
    fn apply(self: Box<Self>, _packet: &mut Packet) -> NextAction {
        let StartServers {
            groups,
            on_complete,
        } = *self;
        let servers: usize = groups.iter().map(ClusterStartupGroup::len).sum();
        info!(groups = groups.len(), servers, "starting managed servers");

        let children = groups
            .into_iter()
            .map(|group| {
                let label = group.label().to_string();
                let (cluster_name, items, lanes, gauge) = group.into_parts();
                let queue = Arc::new(LaneQueue {
                    label: label.clone(),
                    cluster_name,
                    items: Mutex::new(items.into()),
                    gauge,
                });
                Fork::new(label, Box::new(StartGroup { queue, lanes }))
            })
            .collect();
        NextAction::fork_join(children, on_complete)
    }
}

struct LaneQueue {
    label: String,
    cluster_name: Option<String>,
    items: Mutex<VecDeque<StartupWorkItem>>,
    gauge: AdmissionGauge,
}

impl LaneQueue {
    fn pop(&self) -> Option<StartupWorkItem> {
        match self.items.lock() {
            Ok(mut items) => items.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        }
    }
}

struct StartGroup {
    queue: Arc<LaneQueue>,
    lanes: usize,
}

impl Step for StartGroup {
    fn apply(self: Box<Self>, _packet: &mut Packet) -> NextAction {
        if self.lanes == 0 {
            debug!(cluster = %self.queue.label, "no servers to start");
            return NextAction::Terminate;
        }
        debug!(
            cluster = %self.queue.label,
            lanes = self.lanes,
            "starting cluster group"
        );
        let children = (0..self.lanes)
            .map(|i| {
                let lane = Lane {
                    queue: self.queue.clone(),
                    current: None,
                };
                Fork::new(format!("lane-{i}"), Box::new(lane))
            })
            .collect();
        NextAction::fork_join(children, Terminal::boxed())
    }
}

/// Runs queued items one after another.
struct Lane {
    queue: Arc<LaneQueue>,
    current: Option<String>,
}

impl Lane {
    fn finish(&self, server: &str, packet: &Packet) {
        self.queue.gauge.complete();
        let outcome = packet
            .get(FORK_RESULTS)
            .and_then(|results| results.first())
            .map(|r| &r.outcome);
        match outcome {
            Some(FiberOutcome::Completed(item)) if !item.has_failures() => {
                info!(cluster = %self.queue.label, %server, "server started");
            }
            Some(FiberOutcome::Completed(item)) => {
                let failures = item.failures().len();
                warn!(
                    cluster = %self.queue.label,
                    %server,
                    failures,
                    "server start finished with failures"
                );
            }
            Some(FiberOutcome::Failed { error, .. }) => {
                warn!(cluster = %self.queue.label, %server, %error, "server start failed");
            }
            Some(FiberOutcome::Cancelled(_)) | None => {
                debug!(cluster = %self.queue.label, %server, "server start did not finish");
            }
        }
    }
}

// A lane dropped while an item is admitted was cancelled mid-start.
impl Drop for Lane {
    fn drop(&mut self) {
        if let Some(server) = self.current.take() {
            self.queue.gauge.abandon();
            debug!(cluster = %self.queue.label, %server, "server start abandoned");
        }
    }
}

impl Step for Lane {
    fn apply(mut self: Box<Self>, packet: &mut Packet) -> NextAction {
        if let Some(server) = self.current.take() {
            self.finish(&server, packet);
        }
        let Some(item) = self.queue.pop() else {
            return NextAction::Terminate;
        };

        self.queue.gauge.admit();
        debug!(
            cluster = ?self.queue.cluster_name,
            server = %item.server_name,
            in_flight = self.queue.gauge.in_flight(),
            "admitting server"
        );
        self.current = Some(item.server_name.clone());
        NextAction::fork_join(vec![Fork::new(item.server_name, item.chain)], self)
    }
}
