use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use log::{debug, trace};

use crate::common::*;
use crate::delayed_q::{Context, Scheduler};
use crate::error::SimError;
use crate::handshake::{Admission, FollowUp, Handshake, Readiness, Receiver};
use crate::pool::{PoolHandle, TxId};
use crate::socket::{DirectAccess, ForwardTransport, TargetSocket};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetEvent {
    RequestReceived,
    Accepted,
    Deferred,
    Executed,
    ResponseStarted,
    ResponseEnded,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JournalEntry {
    pub at: Duration,
    pub tx: TxId,
    pub event: TargetEvent,
}

/// One read or write as carried out on the storage, with the local address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Access {
    pub command: Command,
    pub address: u64,
    pub data: Vec<u8>,
    pub status: ResponseStatus,
}

/// Byte-addressable target. Accepts one request at a time, withholds END_REQ
/// from the others and answers after an accept delay plus a latency.
pub struct Memory {
    pub name: String,
    pub socket: TargetSocket,
    handshake: Handshake<Receiver>,
    pool: PoolHandle,
    ctx: Context<Self>,
    delays: DelaySource,
    storage: Vec<u8>,
    journal: Vec<JournalEntry>,
    accesses: Vec<Access>,
}

impl Memory {
    pub fn new(
        name: impl Into<String>,
        size: usize,
        accept_depth: usize,
        delays: DelaySource,
        pool: PoolHandle,
        scheduler: Scheduler,
    ) -> Rc<RefCell<Self>> {
        let name = name.into();
        Rc::new_cyclic(|me| RefCell::new(Memory {
            socket: TargetSocket::new(name.clone()),
            handshake: Handshake::<Receiver>::new(name.clone(), accept_depth),
            name,
            pool,
            ctx: Context::new(me.clone(), scheduler),
            delays,
            storage: vec![0; size],
            journal: Vec::new(),
            accesses: Vec::new(),
        }))
    }

    pub fn size(&self) -> usize {
        self.storage.len()
    }
    /// `len` bytes of storage at `address`, `None` past the end
    pub fn peek(&self, address: usize, len: usize) -> Option<&[u8]> {
        self.storage.get(address..address.checked_add(len)?)
    }
    pub fn journal(&self) -> &[JournalEntry] {
        &self.journal
    }
    pub fn accesses(&self) -> &[Access] {
        &self.accesses
    }
    pub fn is_idle(&self) -> bool {
        self.handshake.is_idle()
    }

    fn record(&mut self, tx: TxId, event: TargetEvent) {
        trace!("{} @{:?}: {} {:?}", self.name, self.ctx.elapsed(), tx, event);
        self.journal.push(JournalEntry { at: self.ctx.elapsed(), tx, event });
    }

    // payload event queue callback
    fn on_phase(&mut self, (tx, phase): (TxId, Phase)) -> Result<(), SimError> {
        self.handshake.admit(phase)?;
        if phase == Phase::BeginReq {
            self.pool.borrow_mut().acquire(tx)?;
            self.record(tx, TargetEvent::RequestReceived);
            match self.handshake.on_request_begin(tx)? {
                Admission::Accept => self.send_end_request(tx),
                Admission::Defer => {
                    // back-pressure: END_REQ is withheld
                    debug!("{} @{:?}: deferring {}", self.name, self.ctx.elapsed(), tx);
                    self.record(tx, TargetEvent::Deferred);
                    Ok(())
                }
            }
        } else {
            let follow = self.handshake.on_response_end(tx)?;
            self.end_response(tx, follow)
        }
    }

    fn send_end_request(&mut self, tx: TxId) -> Result<(), SimError> {
        self.record(tx, TargetEvent::Accepted);
        let accept = self.delays.draw();
        // the initiator cannot terminate the transaction at this point
        self.socket.nb_transport_bw(tx, Phase::EndReq, accept)?;
        let latency = accept + self.delays.draw();
        self.ctx.schedule_event(latency, Self::on_target_done, tx);
        Ok(())
    }

    fn on_target_done(&mut self, tx: TxId) -> Result<(), SimError> {
        self.execute(tx)?;
        self.record(tx, TargetEvent::Executed);
        match self.handshake.on_target_done(tx)? {
            Readiness::SendNow => self.send_response(tx),
            Readiness::Queued => {
                debug!("{} @{:?}: response for {} queued", self.name, self.ctx.elapsed(), tx);
                Ok(())
            }
        }
    }

    fn send_response(&mut self, tx: TxId) -> Result<(), SimError> {
        self.record(tx, TargetEvent::ResponseStarted);
        match self.socket.nb_transport_bw(tx, Phase::BeginResp, Duration::ZERO)? {
            TransportStatus::Accepted => Ok(()),
            TransportStatus::Updated { phase, delay } => {
                self.ctx.schedule_event(delay, Self::on_phase, (tx, phase));
                Ok(())
            }
            TransportStatus::Completed => {
                let follow = self.handshake.response_completed();
                self.end_response(tx, follow)
            }
        }
    }

    fn end_response(&mut self, tx: TxId, follow: FollowUp) -> Result<(), SimError> {
        self.record(tx, TargetEvent::ResponseEnded);
        self.pool.borrow_mut().release(tx)?;
        if let Some(next) = follow.respond {
            self.send_response(next)?;
        }
        if let Some(deferred) = follow.accept {
            self.send_end_request(deferred)?;
        }
        Ok(())
    }

    // common to b_transport and nb_transport
    fn execute(&mut self, tx: TxId) -> Result<(), SimError> {
        let mut pool = self.pool.borrow_mut();
        let payload = pool.get_mut(tx)?;
        let len = payload.data.len() as u64;
        let in_range = payload.address
            .checked_add(len)
            .is_some_and(|end| end <= self.storage.len() as u64);
        if in_range {
            let range = payload.address as usize..(payload.address + len) as usize;
            match payload.command {
                Command::Write => self.storage[range].copy_from_slice(&payload.data),
                Command::Read => payload.data.copy_from_slice(&self.storage[range]),
            }
            payload.status = ResponseStatus::Ok;
        } else {
            payload.status = ResponseStatus::AddressError;
        }
        self.accesses.push(Access {
            command: payload.command,
            address: payload.address,
            data: payload.data.clone(),
            status: payload.status,
        });
        Ok(())
    }
}

impl ForwardTransport for Memory {
    fn nb_transport_fw(
        &mut self,
        _port: usize,
        tx: TxId,
        phase: Phase,
        delay: Duration,
    ) -> Result<TransportStatus, SimError> {
        self.ctx.schedule_event(delay, Self::on_phase, (tx, phase));
        Ok(TransportStatus::Accepted)
    }

    fn b_transport(&mut self, _port: usize, tx: TxId, _delay: Duration) -> Result<(), SimError> {
        self.execute(tx)
    }
}

impl DirectAccess for Memory {}
