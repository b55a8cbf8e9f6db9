//! Per-group dispatch
//!
//! One [`GroupSlot`] per peripheral group. The inbound path only stages a
//! request and releases the slot's signal; the group worker runs the bound
//! routine, replies, and is the only place a slot is released again.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

use super::routine::TestRoutine;
use super::signal::CompletionSignal;
use crate::errors::TransportError;
use crate::observability::telemetry::record_drop;
use crate::protocol::{BoardId, TestReply, TestRequest, TEST_PACKET_LEN};
use crate::transport::DatagramChannel;

/// Why an inbound test packet got no reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    BoardIdMismatch,
    BadSize,
    Malformed,
    UnknownGroup,
    Busy,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::BoardIdMismatch => "board id mismatch",
            DropReason::BadSize => "bad size",
            DropReason::Malformed => "malformed",
            DropReason::UnknownGroup => "unknown group",
            DropReason::Busy => "busy",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Dropped(DropReason),
}

#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub sender: SocketAddr,
    pub request: TestRequest,
}

pub struct GroupSlot {
    index: usize,
    routine: Arc<dyn TestRoutine>,
    busy: AtomicBool,
    pending: Mutex<Option<PendingRequest>>,
    signal: CompletionSignal,
}

impl GroupSlot {
    fn new(index: usize, routine: Arc<dyn TestRoutine>) -> Self {
        Self {
            index,
            routine,
            busy: AtomicBool::new(false),
            pending: Mutex::new(None),
            signal: CompletionSignal::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn routine_name(&self) -> &str {
        self.routine.name()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn admit(&self, pending: PendingRequest) -> bool {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        *self.pending.lock() = Some(pending);
        self.signal.release();
        true
    }

    /// Serve this group until a reply cannot be sent.
    pub async fn run<C>(&self, channel: &C) -> Result<(), TransportError>
    where
        C: DatagramChannel + ?Sized,
    {
        loop {
            self.signal.wait().await;
            // Tolerate wakes with nothing staged.
            let Some(PendingRequest { sender, request }) = self.pending.lock().take() else {
                continue;
            };

            let mut data = request.data;
            let status = self.routine.run(request.sub_test, &mut data).await;
            debug!(sub_test = request.sub_test, ?status, "Routine finished");

            let reply = TestReply {
                board_id: request.board_id,
                sub_test: request.sub_test,
                data,
                status,
            };
            let sent = channel.send_to(&reply.encode(), sender).await;
            self.busy.store(false, Ordering::SeqCst);

            if let Err(source) = sent {
                error!(peer = %sender, error = %source, "Reply send failed");
                return Err(TransportError::Send {
                    peer: sender,
                    source,
                });
            }
        }
    }
}

/// Routes test packets to group slots by destination port.
pub struct Dispatcher {
    board_id: BoardId,
    group_port_base: u16,
    slots: Vec<Arc<GroupSlot>>,
}

impl Dispatcher {
    pub fn new(
        board_id: BoardId,
        group_port_base: u16,
        routines: Vec<Arc<dyn TestRoutine>>,
    ) -> Self {
        let slots = routines
            .into_iter()
            .enumerate()
            .map(|(index, routine)| Arc::new(GroupSlot::new(index, routine)))
            .collect();
        Self {
            board_id,
            group_port_base,
            slots,
        }
    }

    pub fn board_id(&self) -> BoardId {
        self.board_id
    }

    pub fn group_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, group: usize) -> Option<&Arc<GroupSlot>> {
        self.slots.get(group)
    }

    fn group_for_port(&self, port: u16) -> Option<usize> {
        let offset = port.checked_sub(self.group_port_base)? as usize;
        (offset < self.slots.len()).then_some(offset)
    }

    /// Stage a packet that arrived on `local_port`. Never blocks.
    pub fn on_inbound(&self, local_port: u16, bytes: &[u8], sender: SocketAddr) -> Admission {
        let admission = self.admit(local_port, bytes, sender);
        if let Admission::Dropped(reason) = admission {
            record_drop(sender, reason.as_str());
        }
        admission
    }

    fn admit(&self, local_port: u16, bytes: &[u8], sender: SocketAddr) -> Admission {
        match BoardId::peek(bytes) {
            Some(id) if id == self.board_id => {}
            Some(_) => return Admission::Dropped(DropReason::BoardIdMismatch),
            None => return Admission::Dropped(DropReason::BadSize),
        }
        if bytes.len() != TEST_PACKET_LEN {
            return Admission::Dropped(DropReason::BadSize);
        }
        let Some(slot) = self.group_for_port(local_port).and_then(|g| self.slots.get(g)) else {
            return Admission::Dropped(DropReason::UnknownGroup);
        };
        let Ok(request) = TestRequest::decode(bytes) else {
            return Admission::Dropped(DropReason::Malformed);
        };

        if slot.admit(PendingRequest { sender, request }) {
            Admission::Accepted
        } else {
            Admission::Dropped(DropReason::Busy)
        }
    }
}
