//! Host group worker
//!
//! Runs every sub-test of one group `iterations` times over its own socket.
//! A send or receive failure ends the whole run; a missing reply only ends
//! the iteration.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use super::catalog::{GroupPlan, MAX_GROUP_LEN};
use super::classify::{classify, Outcome, TestResult};
use crate::errors::{CatalogError, LoopcheckError, TransportError};
use crate::observability::telemetry::{record_iteration, sanitize_for_log};
use crate::protocol::{BoardId, CatalogEntry, TestReply, TestRequest, DATA_LEN};
use crate::transport::{self, DatagramChannel, MAX_DATAGRAM};

#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub board_id: BoardId,
    pub iterations: u32,
    pub recv_timeout: Duration,
    pub tolerance: u8,
    pub seed: Option<u64>,
}

/// Wall-clock span a group worker was active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionWindow {
    pub started: Instant,
    pub finished: Instant,
}

impl ExecutionWindow {
    pub fn overlaps(&self, other: &ExecutionWindow) -> bool {
        self.started < other.finished && other.started < self.finished
    }

    pub fn duration(&self) -> Duration {
        self.finished.saturating_duration_since(self.started)
    }
}

#[derive(Debug, Clone)]
pub struct GroupRun {
    pub plan: GroupPlan,
    /// One vector per entry in group order, one result per iteration
    pub results: Vec<Vec<TestResult>>,
    pub window: ExecutionWindow,
}

fn unspecified_for(target: &SocketAddr) -> SocketAddr {
    let ip = match target.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}

/// Bind an ephemeral socket and run the group against `target`.
pub async fn run_group(
    plan: GroupPlan,
    entries: Vec<CatalogEntry>,
    target: SocketAddr,
    settings: WorkerSettings,
) -> Result<GroupRun, LoopcheckError> {
    let socket = transport::bind(unspecified_for(&target)).await?;
    run_group_on(&socket, plan, &entries, target, settings).await
}

pub async fn run_group_on<C>(
    channel: &C,
    plan: GroupPlan,
    entries: &[CatalogEntry],
    target: SocketAddr,
    settings: WorkerSettings,
) -> Result<GroupRun, LoopcheckError>
where
    C: DatagramChannel + ?Sized,
{
    let too_large = CatalogError::GroupTooLarge {
        len: entries.len(),
        max: MAX_GROUP_LEN,
    };
    if entries.len() > MAX_GROUP_LEN {
        return Err(too_large.into());
    }
    let local = channel.local_addr().map_err(|source| TransportError::Socket {
        addr: unspecified_for(&target),
        source,
    })?;
    let mut rng = match settings.seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(plan.index as u64)),
        None => StdRng::from_os_rng(),
    };

    info!(entries = entries.len(), %target, "Group started");
    let started = Instant::now();
    let mut results = Vec::with_capacity(entries.len());

    for (sub_test, entry) in entries.iter().enumerate() {
        let selector = u8::try_from(sub_test).map_err(|_| too_large.clone())?;
        let mut entry_results = Vec::with_capacity(settings.iterations as usize);

        for iteration in 0..settings.iterations {
            let mut sent = [0u8; DATA_LEN];
            rng.fill_bytes(&mut sent);
            let request = TestRequest::new(settings.board_id, selector, sent);

            drain(channel, local)?;
            channel
                .send_to(&request.encode(), target)
                .await
                .map_err(|source| TransportError::Send {
                    peer: target,
                    source,
                })?;
            let begin = Instant::now();
            let reply = await_reply(channel, local, target, &settings, selector).await?;
            let elapsed = begin.elapsed();

            let outcome = match reply {
                Some(reply) => classify(entry.criterion, settings.tolerance, &sent, &reply),
                None => Outcome::Timeout,
            };
            record_iteration(sub_test, iteration, outcome.as_str(), elapsed);
            entry_results.push(TestResult { outcome, elapsed });
        }

        debug!(
            entry = %sanitize_for_log(entry.display_name()),
            matches = entry_results.iter().filter(|r| r.outcome == Outcome::Match).count(),
            "Entry finished"
        );
        results.push(entry_results);
    }

    let window = ExecutionWindow {
        started,
        finished: Instant::now(),
    };
    info!(elapsed_ms = window.duration().as_millis() as u64, "Group finished");
    Ok(GroupRun {
        plan,
        results,
        window,
    })
}

/// Discard anything already queued so a late reply cannot be taken for the
/// next iteration's.
fn drain<C: DatagramChannel + ?Sized>(channel: &C, local: SocketAddr) -> Result<(), TransportError> {
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        match channel.try_recv_from(&mut buf) {
            Ok((len, from)) => debug!(len, %from, "Drained late datagram"),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(source) => return Err(TransportError::Receive { local, source }),
        }
    }
}

/// Wait for the target's reply to the outstanding request; `None` on deadline.
async fn await_reply<C: DatagramChannel + ?Sized>(
    channel: &C,
    local: SocketAddr,
    target: SocketAddr,
    settings: &WorkerSettings,
    sub_test: u8,
) -> Result<Option<TestReply>, TransportError> {
    let deadline = Instant::now() + settings.recv_timeout;
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let (len, from) = match tokio::time::timeout_at(deadline, channel.recv_from(&mut buf)).await {
            Err(_) => return Ok(None),
            Ok(received) => received.map_err(|source| TransportError::Receive { local, source })?,
        };
        if from != target {
            debug!(%from, %target, "Discarding datagram from unexpected peer");
            continue;
        }
        match TestReply::decode(&buf[..len]) {
            Ok(reply) if reply.board_id == settings.board_id && reply.sub_test == sub_test => {
                return Ok(Some(reply));
            }
            Ok(reply) => debug!(%from, sub_test = reply.sub_test, "Discarding reply for another request"),
            Err(e) => debug!(%from, error = %e, "Discarding undecodable datagram"),
        }
    }
}
