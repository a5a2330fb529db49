// Transport interfaces and the sockets that bind components to each other.
//
// A forward binding owns its peer, a backward binding only refers to it, so
// a wired platform contains no reference cycles.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::common::{Phase, TransportStatus};
use crate::error::{ProtocolViolation, SimError};
use crate::pool::TxId;

/// Request direction: implemented by components that receive requests.
/// `port` is the index of the socket the call came in on.
pub trait ForwardTransport {
    fn nb_transport_fw(
        &mut self,
        port: usize,
        tx: TxId,
        phase: Phase,
        delay: Duration,
    ) -> Result<TransportStatus, SimError>;

    /// Phase-less call-through, executed before returning.
    fn b_transport(&mut self, port: usize, tx: TxId, delay: Duration) -> Result<(), SimError>;
}

/// Response direction: implemented by components that issue requests.
pub trait BackwardTransport {
    fn nb_transport_bw(
        &mut self,
        port: usize,
        tx: TxId,
        phase: Phase,
        delay: Duration,
    ) -> Result<TransportStatus, SimError>;
}

/// Direct memory access and debug transport. Every method defaults to
/// "unsupported".
pub trait DirectAccess {
    fn get_direct_mem_ptr(&mut self, _tx: TxId) -> bool {
        false
    }
    fn transport_dbg(&mut self, _tx: TxId) -> usize {
        0
    }
    fn invalidate_direct_mem_ptr(&mut self, _start: u64, _end: u64) {}
}

pub struct InitiatorSocket {
    owner: String,
    peer: Option<(Rc<RefCell<dyn ForwardTransport>>, usize)>,
}

impl InitiatorSocket {
    pub fn new(owner: impl Into<String>) -> Self {
        InitiatorSocket { owner: owner.into(), peer: None }
    }
    pub fn bind<T: ForwardTransport + 'static>(&mut self, peer: &Rc<RefCell<T>>, port: usize) {
        let peer: Rc<RefCell<dyn ForwardTransport>> = peer.clone();
        self.peer = Some((peer, port));
    }
    pub fn is_bound(&self) -> bool {
        self.peer.is_some()
    }

    pub fn nb_transport_fw(&self, tx: TxId, phase: Phase, delay: Duration) -> Result<TransportStatus, SimError> {
        let (peer, port) = self.peer()?;
        peer.borrow_mut().nb_transport_fw(*port, tx, phase, delay)
    }
    pub fn b_transport(&self, tx: TxId, delay: Duration) -> Result<(), SimError> {
        let (peer, port) = self.peer()?;
        peer.borrow_mut().b_transport(*port, tx, delay)
    }

    fn peer(&self) -> Result<&(Rc<RefCell<dyn ForwardTransport>>, usize), ProtocolViolation> {
        self.peer.as_ref().ok_or_else(|| ProtocolViolation::Unbound { endpoint: self.owner.clone() })
    }
}

pub struct TargetSocket {
    owner: String,
    peer: Option<(Weak<RefCell<dyn BackwardTransport>>, usize)>,
}

impl TargetSocket {
    pub fn new(owner: impl Into<String>) -> Self {
        TargetSocket { owner: owner.into(), peer: None }
    }
    pub fn bind<T: BackwardTransport + 'static>(&mut self, peer: &Rc<RefCell<T>>, port: usize) {
        let peer: Rc<RefCell<dyn BackwardTransport>> = peer.clone();
        self.peer = Some((Rc::downgrade(&peer), port));
    }
    pub fn is_bound(&self) -> bool {
        self.peer.is_some()
    }

    pub fn nb_transport_bw(&self, tx: TxId, phase: Phase, delay: Duration) -> Result<TransportStatus, SimError> {
        let unbound = || ProtocolViolation::Unbound { endpoint: self.owner.clone() };
        let (peer, port) = self.peer.as_ref().ok_or_else(unbound)?;
        let peer = peer.upgrade().ok_or_else(unbound)?;
        let status = peer.borrow_mut().nb_transport_bw(*port, tx, phase, delay);
        status
    }
}
