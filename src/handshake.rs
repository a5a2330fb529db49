//! Four-phase handshake bookkeeping shared by every endpoint.
//!
//! A [`Handshake`] is parameterized by the [`Role`] the endpoint plays:
//!
//! - an [`Issuer`] sends BEGIN_REQ and END_RESP and receives END_REQ and
//!   BEGIN_RESP. It keeps at most one request waiting for END_REQ.
//! - a [`Receiver`] receives BEGIN_REQ and END_RESP and sends END_REQ and
//!   BEGIN_RESP. It processes one request at a time, defers further requests
//!   by withholding END_REQ and keeps at most one response queued behind the
//!   one in progress.
//!
//! The handshake only tracks state and decides. Sending phases, scheduling and
//! reference counting stay with the endpoint that owns it.

use std::collections::VecDeque;
use std::marker::PhantomData;

use crate::common::Phase;
use crate::error::ProtocolViolation;
use crate::pool::TxId;

pub trait Role {
    type Slots: Default;
    /// phases this role may receive
    fn admits(phase: Phase) -> bool;
}

pub enum Issuer {}
pub enum Receiver {}

#[derive(Debug, Default)]
pub struct IssuerSlots {
    outstanding: Option<TxId>,
}

#[derive(Debug, Default)]
pub struct ReceiverSlots {
    in_progress: Option<TxId>,
    responding: bool,
    next_response: Option<TxId>,
    deferred: VecDeque<TxId>,
    accept_depth: usize,
}

impl Role for Issuer {
    type Slots = IssuerSlots;
    fn admits(phase: Phase) -> bool {
        matches!(phase, Phase::EndReq | Phase::BeginResp)
    }
}

impl Role for Receiver {
    type Slots = ReceiverSlots;
    fn admits(phase: Phase) -> bool {
        matches!(phase, Phase::BeginReq | Phase::EndResp)
    }
}

pub struct Handshake<R: Role> {
    endpoint: String,
    slots: R::Slots,
    _role: PhantomData<R>,
}

impl<R: Role> Handshake<R> {
    fn with_slots(endpoint: impl Into<String>, slots: R::Slots) -> Self {
        Handshake { endpoint: endpoint.into(), slots, _role: PhantomData }
    }
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Rejects phases that never travel towards this role.
    pub fn admit(&self, phase: Phase) -> Result<(), ProtocolViolation> {
        if R::admits(phase) {
            Ok(())
        } else {
            Err(ProtocolViolation::IllegalPhase { endpoint: self.endpoint.clone(), phase })
        }
    }

    fn unexpected(&self, tx: TxId, phase: Phase) -> ProtocolViolation {
        ProtocolViolation::UnexpectedTransaction { endpoint: self.endpoint.clone(), tx, phase }
    }
}

// issuing side

impl Handshake<Issuer> {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_slots(endpoint, IssuerSlots::default())
    }

    /// the request currently waiting for END_REQ
    pub fn outstanding(&self) -> Option<TxId> {
        self.slots.outstanding
    }

    /// Marks `tx` as the request in the accept window. Callers wait for
    /// [`Handshake::end_request`] before issuing the next one.
    pub fn begin_request(&mut self, tx: TxId) -> Result<(), ProtocolViolation> {
        if let Some(outstanding) = self.slots.outstanding {
            return Err(ProtocolViolation::ExclusionViolated {
                endpoint: self.endpoint.clone(),
                tx,
                outstanding,
            });
        }
        self.slots.outstanding = Some(tx);
        Ok(())
    }

    /// Handles an incoming END_REQ or BEGIN_RESP. Returns `true` if it closed
    /// the accept window, i.e. the next request may be issued.
    pub fn end_request(&mut self, tx: TxId, phase: Phase) -> Result<bool, ProtocolViolation> {
        self.admit(phase)?;
        let owns_window = self.slots.outstanding == Some(tx);
        match phase {
            Phase::EndReq if !owns_window => Err(self.unexpected(tx, phase)),
            _ if owns_window => {
                self.slots.outstanding = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// The exchange of `tx` was completed by the callee's return value.
    pub fn completed(&mut self, tx: TxId) {
        if self.slots.outstanding == Some(tx) {
            self.slots.outstanding = None;
        }
    }
}

// receiving side

#[derive(Debug, PartialEq, Eq)]
pub enum Admission {
    /// send END_REQ now
    Accept,
    /// END_REQ is withheld until the request in progress has finished
    Defer,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Readiness {
    /// send BEGIN_RESP now
    SendNow,
    /// queued behind the response in progress
    Queued,
}

/// Work that became possible once a response finished.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FollowUp {
    /// send BEGIN_RESP for this queued response
    pub respond: Option<TxId>,
    /// send END_REQ for this deferred request
    pub accept: Option<TxId>,
}

impl Handshake<Receiver> {
    /// `accept_depth` bounds the number of requests that may wait for END_REQ.
    pub fn new(endpoint: impl Into<String>, accept_depth: usize) -> Self {
        Self::with_slots(endpoint, ReceiverSlots { accept_depth, ..Default::default() })
    }

    pub fn in_progress(&self) -> Option<TxId> {
        self.slots.in_progress
    }
    pub fn responding(&self) -> bool {
        self.slots.responding
    }
    pub fn next_response(&self) -> Option<TxId> {
        self.slots.next_response
    }
    pub fn deferred(&self) -> usize {
        self.slots.deferred.len()
    }
    pub fn is_idle(&self) -> bool {
        self.slots.in_progress.is_none()
            && !self.slots.responding
            && self.slots.next_response.is_none()
            && self.slots.deferred.is_empty()
    }

    pub fn on_request_begin(&mut self, tx: TxId) -> Result<Admission, ProtocolViolation> {
        if self.slots.in_progress.is_none() {
            self.slots.in_progress = Some(tx);
            return Ok(Admission::Accept);
        }
        if self.slots.deferred.len() >= self.slots.accept_depth {
            return Err(ProtocolViolation::AcceptOverflow {
                endpoint: self.endpoint.clone(),
                tx,
                depth: self.slots.accept_depth,
            });
        }
        self.slots.deferred.push_back(tx);
        Ok(Admission::Defer)
    }

    /// The read or write of `tx` has been carried out and its response is due.
    pub fn on_target_done(&mut self, tx: TxId) -> Result<Readiness, ProtocolViolation> {
        if !self.slots.responding {
            self.slots.responding = true;
            return Ok(Readiness::SendNow);
        }
        if self.slots.next_response.is_some() {
            return Err(ProtocolViolation::ResponseOverflow { endpoint: self.endpoint.clone(), tx });
        }
        self.slots.next_response = Some(tx);
        Ok(Readiness::Queued)
    }

    pub fn on_response_end(&mut self, tx: TxId) -> Result<FollowUp, ProtocolViolation> {
        if !self.slots.responding {
            return Err(ProtocolViolation::NoResponseInProgress { endpoint: self.endpoint.clone(), tx });
        }
        if self.slots.in_progress != Some(tx) {
            return Err(self.unexpected(tx, Phase::EndResp));
        }
        Ok(self.finish_response())
    }

    /// BEGIN_RESP returned `Completed`: the response is over without END_RESP.
    pub fn response_completed(&mut self) -> FollowUp {
        self.finish_response()
    }

    fn finish_response(&mut self) -> FollowUp {
        let slots = &mut self.slots;
        slots.in_progress = None;
        slots.responding = false;
        let mut follow = FollowUp::default();
        if let Some(next) = slots.next_response.take() {
            slots.in_progress = Some(next);
            slots.responding = true;
            follow.respond = Some(next);
        } else if let Some(tx) = slots.deferred.pop_front() {
            slots.in_progress = Some(tx);
            follow.accept = Some(tx);
        }
        follow
    }
}
