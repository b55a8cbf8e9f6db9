//! Host driver
//!
//! Discovery and catalog fetch go through one client socket on the init
//! port. Test execution spawns one worker per group: sequential groups are
//! started and joined one at a time, then every concurrent group is started
//! before any of them is joined.

use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, Instrument};

use super::catalog::{count_groups, partition_groups, GroupPlan};
use super::worker::{run_group, GroupRun, WorkerSettings};
use crate::config::{HostConfig, PortConfig};
use crate::errors::{CatalogError, LoopcheckError, TransportError, WorkerError};
use crate::observability::telemetry::{group_span, sanitize_for_log};
use crate::protocol::{
    decode_catalog_size, BoardId, CatalogEntry, IdentityRecord, InitCommand, Schedule,
    CATALOG_SIZE_LEN,
};
use crate::transport::{self, DatagramChannel, MAX_DATAGRAM};

/// Everything learned from the device before testing starts.
#[derive(Debug, Clone)]
pub struct Session {
    pub identity: IdentityRecord,
    pub catalog: Vec<CatalogEntry>,
    pub groups: Vec<GroupPlan>,
}

impl Session {
    pub fn board_id(&self) -> BoardId {
        self.identity.board_id
    }
}

pub struct HostDriver {
    host: HostConfig,
    ports: PortConfig,
}

impl HostDriver {
    pub fn new(host: HostConfig, ports: PortConfig) -> Self {
        Self { host, ports }
    }

    fn init_target(&self) -> SocketAddr {
        SocketAddr::new(self.host.device_addr, self.ports.init_port)
    }

    fn group_target(&self, group: usize, groups: usize) -> Result<SocketAddr, CatalogError> {
        self.ports
            .group_port(group)
            .map(|port| SocketAddr::new(self.host.device_addr, port))
            .ok_or(CatalogError::TooManyGroups { groups })
    }

    /// Discover the board, fetch and partition its catalog.
    pub async fn connect(&self) -> Result<Session, LoopcheckError> {
        let target = self.init_target();
        let local = match target {
            SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
            SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
        };
        let socket = transport::bind(local).await?;

        let identity = self.discover(&socket).await?;
        let catalog = self.fetch_catalog(&socket, identity.board_id).await?;
        let groups = partition_groups(&catalog)?;
        if let Some(last) = groups.last() {
            self.group_target(last.index, groups.len())?;
        }
        info!(
            groups = groups.len(),
            entries = catalog.len(),
            "Catalog partitioned"
        );
        Ok(Session {
            identity,
            catalog,
            groups,
        })
    }

    pub async fn discover<C>(&self, channel: &C) -> Result<IdentityRecord, LoopcheckError>
    where
        C: DatagramChannel + ?Sized,
    {
        let bytes = self
            .exchange(channel, &InitCommand::identity(), IdentityRecord::ENCODED_LEN)
            .await?;
        let identity = IdentityRecord::decode(&bytes)?;
        info!(
            board = %sanitize_for_log(identity.board_name()),
            id = %identity.board_id,
            "Device discovered"
        );
        Ok(identity)
    }

    pub async fn fetch_catalog<C>(
        &self,
        channel: &C,
        board_id: BoardId,
    ) -> Result<Vec<CatalogEntry>, LoopcheckError>
    where
        C: DatagramChannel + ?Sized,
    {
        let bytes = self
            .exchange(channel, &InitCommand::catalog_size(board_id), CATALOG_SIZE_LEN)
            .await?;
        let size = decode_catalog_size(&bytes)?;

        let mut catalog = Vec::with_capacity(size as usize);
        for index in 0..size {
            let bytes = self
                .exchange(
                    channel,
                    &InitCommand::catalog_entry(board_id, index),
                    CatalogEntry::ENCODED_LEN,
                )
                .await?;
            let entry = CatalogEntry::decode(&bytes)?;
            debug!(
                index,
                name = %sanitize_for_log(entry.name()),
                criterion = %entry.criterion,
                schedule = %entry.schedule,
                "Catalog entry"
            );
            catalog.push(entry);
        }
        debug!(size, groups = count_groups(&catalog), "Catalog fetched");
        Ok(catalog)
    }

    /// Send one init command and wait for an answer of the expected size
    /// from the init port. Blocks unless a discovery timeout is configured.
    async fn exchange<C>(
        &self,
        channel: &C,
        command: &InitCommand,
        expected_len: usize,
    ) -> Result<Vec<u8>, TransportError>
    where
        C: DatagramChannel + ?Sized,
    {
        let target = self.init_target();
        let local = channel.local_addr().map_err(|source| TransportError::Socket {
            addr: target,
            source,
        })?;
        channel
            .send_to(&command.encode(), target)
            .await
            .map_err(|source| TransportError::Send {
                peer: target,
                source,
            })?;

        let deadline = self.host.discovery_timeout().map(|limit| Instant::now() + limit);
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let received = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, channel.recv_from(&mut buf)).await {
                        Ok(received) => received,
                        Err(_) => {
                            return Err(TransportError::NoAnswer {
                                peer: target,
                                millis: self.host.discovery_timeout_ms.unwrap_or_default(),
                            })
                        }
                    }
                }
                None => channel.recv_from(&mut buf).await,
            };
            let (len, from) =
                received.map_err(|source| TransportError::Receive { local, source })?;
            if from.port() == target.port() && len == expected_len {
                return Ok(buf[..len].to_vec());
            }
            debug!(%from, len, expected_len, "Ignoring unexpected init answer");
        }
    }

    fn settings(&self, board_id: BoardId) -> WorkerSettings {
        WorkerSettings {
            board_id,
            iterations: self.host.iterations,
            recv_timeout: self.host.recv_timeout(),
            tolerance: self.host.tolerance,
            seed: self.host.seed,
        }
    }

    fn spawn_group(
        &self,
        session: &Session,
        plan: &GroupPlan,
    ) -> Result<JoinHandle<Result<GroupRun, LoopcheckError>>, LoopcheckError> {
        let target = self.group_target(plan.index, session.groups.len())?;
        let span = group_span("host", plan.index, target.port());
        let entries = plan.entries(&session.catalog).to_vec();
        let settings = self.settings(session.board_id());
        Ok(tokio::spawn(
            run_group(*plan, entries, target, settings).instrument(span),
        ))
    }

    /// Run every group and return their runs in group order.
    pub async fn run_all(&self, session: &Session) -> Result<Vec<GroupRun>, LoopcheckError> {
        let mut runs = Vec::with_capacity(session.groups.len());

        for plan in session
            .groups
            .iter()
            .filter(|g| g.schedule == Schedule::Sequential)
        {
            let handle = self.spawn_group(session, plan)?;
            runs.push(joined(plan.index, handle.await)?);
        }

        let mut pending = Vec::new();
        for plan in session
            .groups
            .iter()
            .filter(|g| g.schedule == Schedule::Concurrent)
        {
            pending.push((plan.index, self.spawn_group(session, plan)?));
        }
        let finished =
            futures::future::join_all(pending.into_iter().map(|(index, handle)| async move {
                (index, handle.await)
            }))
            .await;
        for (index, result) in finished {
            runs.push(joined(index, result)?);
        }

        runs.sort_by_key(|run| run.plan.index);
        Ok(runs)
    }
}

fn joined(
    group: usize,
    result: Result<Result<GroupRun, LoopcheckError>, tokio::task::JoinError>,
) -> Result<GroupRun, LoopcheckError> {
    match result {
        Ok(run) => Ok(run?),
        Err(e) if e.is_panic() => Err(WorkerError::Panicked {
            group,
            message: e.to_string(),
        }
        .into()),
        Err(_) => Err(WorkerError::Cancelled { group }.into()),
    }
}
