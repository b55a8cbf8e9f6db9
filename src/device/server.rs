//! Device service loop
//!
//! One task for the init port, and per group one receive task (stages
//! requests, never blocks) plus one worker task (runs the routine, replies).
//! The first task to stop ends the service.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, Instrument};

use super::board::Board;
use super::dispatcher::Dispatcher;
use super::identity::IdentityService;
use crate::config::{DeviceConfig, PortConfig};
use crate::errors::{CatalogError, LoopcheckError, TransportError, WorkerError};
use crate::observability::telemetry::{group_span, sanitize_for_log};
use crate::protocol::IdentityRecord;
use crate::transport::{self, DatagramChannel, LossyChannel, MAX_DATAGRAM};

type GroupChannel = LossyChannel<UdpSocket>;

pub struct DeviceServer {
    identity: IdentityRecord,
    service: Arc<IdentityService>,
    dispatcher: Arc<Dispatcher>,
    init: (SocketAddr, Arc<UdpSocket>),
    groups: Vec<(SocketAddr, Arc<GroupChannel>)>,
}

fn bound_addr(socket: &UdpSocket, requested: SocketAddr) -> Result<SocketAddr, TransportError> {
    socket
        .local_addr()
        .map_err(|source| TransportError::Socket {
            addr: requested,
            source,
        })
}

impl DeviceServer {
    /// Open the init socket and one socket per group.
    pub async fn bind(
        board: Board,
        ports: PortConfig,
        config: &DeviceConfig,
    ) -> Result<Self, LoopcheckError> {
        let (identity, catalog, routines) = board.into_parts();
        let group_count = routines.len();

        let init_addr = SocketAddr::new(config.bind_addr, ports.init_port);
        let init_socket = transport::bind(init_addr).await?;
        let init = (bound_addr(&init_socket, init_addr)?, Arc::new(init_socket));

        let mut groups = Vec::with_capacity(group_count);
        for index in 0..group_count {
            let port = ports.group_port(index).ok_or(CatalogError::TooManyGroups {
                groups: group_count,
            })?;
            let requested = SocketAddr::new(config.bind_addr, port);
            let socket = transport::bind(requested).await?;
            let local = bound_addr(&socket, requested)?;
            groups.push((
                local,
                Arc::new(LossyChannel::new(socket, config.faults.drop_reply_every)),
            ));
        }

        let dispatcher = Dispatcher::new(identity.board_id, ports.group_port_base, routines);
        Ok(Self {
            service: Arc::new(IdentityService::new(identity.clone(), catalog)),
            identity,
            dispatcher: Arc::new(dispatcher),
            init,
            groups,
        })
    }

    pub fn init_addr(&self) -> SocketAddr {
        self.init.0
    }

    pub fn group_addrs(&self) -> Vec<SocketAddr> {
        self.groups.iter().map(|(addr, _)| *addr).collect()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Serve until a task fails. Only a transport failure or a crashed
    /// task ends the service.
    pub async fn run(self) -> Result<(), LoopcheckError> {
        info!(
            board = %sanitize_for_log(self.identity.board_name()),
            id = %self.identity.board_id,
            groups = self.groups.len(),
            init = %self.init.0,
            "Device serving"
        );

        let mut tasks: Vec<JoinHandle<Result<(), TransportError>>> = Vec::new();
        // Group served by each task; `None` for the identity service.
        let mut owners: Vec<Option<usize>> = Vec::new();
        let (init_addr, init_socket) = self.init;
        tasks.push(tokio::spawn(serve_init(self.service, init_socket, init_addr)));
        owners.push(None);

        for (index, (local, channel)) in self.groups.into_iter().enumerate() {
            let Some(slot) = self.dispatcher.slot(index).cloned() else {
                continue;
            };
            let span = group_span("device", index, local.port());

            let worker_channel = channel.clone();
            tasks.push(tokio::spawn(
                async move { slot.run(worker_channel.as_ref()).await }.instrument(span.clone()),
            ));
            tasks.push(tokio::spawn(
                receive_loop(self.dispatcher.clone(), channel, local).instrument(span),
            ));
            owners.extend([Some(index), Some(index)]);
        }

        let (finished, position, rest) = futures::future::select_all(tasks).await;
        for task in rest {
            task.abort();
        }
        match finished {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!(error = %e, "Device stopped");
                Err(e.into())
            }
            Err(e) => Err(task_failure(owners.get(position).copied().flatten(), e).into()),
        }
    }
}

fn task_failure(owner: Option<usize>, e: JoinError) -> WorkerError {
    match owner {
        None => WorkerError::IdentityTask {
            message: e.to_string(),
        },
        Some(group) if e.is_panic() => WorkerError::Panicked {
            group,
            message: e.to_string(),
        },
        Some(group) => WorkerError::Cancelled { group },
    }
}

async fn serve_init(
    service: Arc<IdentityService>,
    socket: Arc<UdpSocket>,
    local: SocketAddr,
) -> Result<(), TransportError> {
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let (len, sender) = DatagramChannel::recv_from(socket.as_ref(), &mut buf)
            .await
            .map_err(|source| TransportError::Receive { local, source })?;
        if let Some(reply) = service.on_inbound(&buf[..len]) {
            DatagramChannel::send_to(socket.as_ref(), &reply, sender)
                .await
                .map_err(|source| TransportError::Send {
                    peer: sender,
                    source,
                })?;
        }
    }
}

async fn receive_loop(
    dispatcher: Arc<Dispatcher>,
    channel: Arc<GroupChannel>,
    local: SocketAddr,
) -> Result<(), TransportError> {
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let (len, sender) = channel
            .recv_from(&mut buf)
            .await
            .map_err(|source| TransportError::Receive { local, source })?;
        dispatcher.on_inbound(local.port(), &buf[..len], sender);
    }
}
