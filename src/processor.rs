use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use log::{debug, info, trace, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::common::*;
use crate::delayed_q::{Context, Scheduler};
use crate::error::{ProtocolViolation, SimError};
use crate::handshake::{Handshake, Issuer};
use crate::pool::{PoolHandle, TxId};
use crate::socket::{BackwardTransport, InitiatorSocket};

/// What a processor saw when one of its exchanges finished.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    pub request: Request,
    pub status: ResponseStatus,
    pub data: Vec<u8>,
    pub at: Duration,
}

/// Initiator running a script of requests through its socket.
pub struct Processor {
    pub name: String,
    pub socket: InitiatorSocket,
    handshake: Handshake<Issuer>,
    pool: PoolHandle,
    ctx: Context<Self>,
    delays: DelaySource,
    script: VecDeque<Request>,
    in_flight: HashMap<TxId, Request>,
    completions: Vec<Completion>,
    suspended: bool,
    verify: bool,
    verified: usize,
}

impl Processor {
    pub fn new(
        name: impl Into<String>,
        script: Script,
        delays: DelaySource,
        pool: PoolHandle,
        scheduler: Scheduler,
        verify: bool,
    ) -> Rc<RefCell<Self>> {
        let name = name.into();
        Rc::new_cyclic(|me| RefCell::new(Processor {
            socket: InitiatorSocket::new(name.clone()),
            handshake: Handshake::<Issuer>::new(name.clone()),
            name,
            pool,
            ctx: Context::new(me.clone(), scheduler),
            delays,
            script: script.into(),
            in_flight: HashMap::new(),
            completions: Vec::new(),
            suspended: false,
            verify,
            verified: 0,
        }))
    }

    /// `count` writes of `data_len` random letters to random addresses below
    /// `address_space`.
    pub fn random_script(seed: u64, count: usize, address_space: u64, data_len: usize) -> Script {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count).map(|_| {
            let address = rng.gen_range(0..address_space.max(1));
            let data = (0..data_len).map(|_| rng.gen_range(b'A'..=b'Z')).collect::<Vec<_>>();
            Request::write(address, data)
        }).collect()
    }

    pub fn start(&self) {
        self.ctx.schedule_event(Duration::ZERO, Self::issue, ());
    }

    pub fn completions(&self) -> &[Completion] {
        &self.completions
    }
    pub fn verified(&self) -> usize {
        self.verified
    }
    pub fn is_done(&self) -> bool {
        self.script.is_empty() && self.in_flight.is_empty()
    }

    // process

    fn issue(&mut self, _: ()) -> Result<(), SimError> {
        if self.script.is_empty() {
            return Ok(());
        }
        // BEGIN_REQ/END_REQ exclusion rule
        if self.handshake.outstanding().is_some() {
            debug!("{} @{:?}: waiting for END_REQ", self.name, self.ctx.elapsed());
            self.suspended = true;
            return Ok(());
        }
        let Some(request) = self.script.pop_front() else { return Ok(()) };

        let tx = {
            let mut pool = self.pool.borrow_mut();
            let tx = pool.allocate();
            pool.acquire(tx)?;
            let payload = pool.get_mut(tx)?;
            payload.command = request.command;
            payload.address = request.address;
            payload.data = request.data.clone();
            payload.status = ResponseStatus::Incomplete;
            tx
        };
        info!("{} @{:?}: {:?} addr {:#06x} data {:02x?} ({})",
            self.name, self.ctx.elapsed(), request.command, request.address, request.data, tx);
        self.in_flight.insert(tx, request);
        self.handshake.begin_request(tx)?;

        let delay = self.delays.draw();
        match self.socket.nb_transport_fw(tx, Phase::BeginReq, delay)? {
            TransportStatus::Accepted => {}
            TransportStatus::Updated { phase, delay } => {
                // the timing annotation must be honored
                self.ctx.schedule_event(delay, Self::on_phase, (tx, phase));
            }
            TransportStatus::Completed => {
                self.handshake.completed(tx);
                self.finish(tx, Phase::BeginReq)?;
            }
        }

        if !self.script.is_empty() {
            let pause = self.delays.draw();
            self.ctx.schedule_event(pause, Self::issue, ());
        }
        Ok(())
    }

    fn on_phase(&mut self, (tx, phase): (TxId, Phase)) -> Result<(), SimError> {
        trace!("{} @{:?}: {} {}", self.name, self.ctx.elapsed(), phase, tx);
        if self.handshake.end_request(tx, phase)? && self.suspended {
            // wake up the suspended process once this callback is over
            self.suspended = false;
            self.ctx.schedule_event(Duration::ZERO, Self::issue, ());
        }
        if phase == Phase::BeginResp {
            let delay = self.delays.draw();
            self.socket.nb_transport_fw(tx, Phase::EndResp, delay)?;
            self.finish(tx, phase)?;
        }
        Ok(())
    }

    // the exchange of `tx` ended with `phase`; record it and drop our reference
    fn finish(&mut self, tx: TxId, phase: Phase) -> Result<(), SimError> {
        let (status, data) = {
            let pool = self.pool.borrow();
            let payload = pool.get(tx)?;
            (payload.status, payload.data.clone())
        };
        let request = self.in_flight.remove(&tx).ok_or_else(|| ProtocolViolation::UnexpectedTransaction {
            endpoint: self.name.clone(),
            tx,
            phase,
        })?;
        match status {
            ResponseStatus::Ok => info!("{} @{:?}: {} done, data {:02x?}", self.name, self.ctx.elapsed(), tx, data),
            _ => warn!("{} @{:?}: {} to {:#06x} finished with {:?}", self.name, self.ctx.elapsed(), tx, request.address, status),
        }
        if self.verify && request.command == Command::Write && status == ResponseStatus::Ok {
            self.read_back(&request)?;
        }
        self.completions.push(Completion { request, status, data, at: self.ctx.elapsed() });
        self.pool.borrow_mut().release(tx)?;
        Ok(())
    }

    /// reads a written location back through the blocking path and compares
    fn read_back(&mut self, written: &Request) -> Result<(), SimError> {
        let tx = {
            let mut pool = self.pool.borrow_mut();
            let tx = pool.allocate();
            pool.acquire(tx)?;
            let payload = pool.get_mut(tx)?;
            payload.command = Command::Read;
            payload.address = written.address;
            payload.data = vec![0; written.data.len()];
            tx
        };
        self.socket.b_transport(tx, Duration::ZERO)?;
        let (status, actual) = {
            let mut pool = self.pool.borrow_mut();
            let payload = pool.get_mut(tx)?;
            let out = (payload.status, std::mem::take(&mut payload.data));
            pool.release(tx)?;
            out
        };
        if status != ResponseStatus::Ok || actual != written.data {
            return Err(SimError::Readback {
                endpoint: self.name.clone(),
                address: written.address,
                expected: written.data.clone(),
                actual,
            });
        }
        debug!("{} @{:?}: read back {:#06x} ok", self.name, self.ctx.elapsed(), written.address);
        self.verified += 1;
        Ok(())
    }
}

impl BackwardTransport for Processor {
    fn nb_transport_bw(
        &mut self,
        _port: usize,
        tx: TxId,
        phase: Phase,
        delay: Duration,
    ) -> Result<TransportStatus, SimError> {
        // queue the phase until the annotated time has elapsed
        self.ctx.schedule_event(delay, Self::on_phase, (tx, phase));
        Ok(TransportStatus::Accepted)
    }
}
