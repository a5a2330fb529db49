// scripted endpoints for driving processors, the bus and memories in isolation
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use atsim::socket::{BackwardTransport, ForwardTransport, InitiatorSocket, TargetSocket};
use atsim::*;

#[derive(Clone, Copy, Debug)]
pub enum Answer {
    /// return Accepted, send END_REQ backward after the delay
    Later(Duration),
    /// return Updated(END_REQ, delay)
    Updated(Duration),
    /// finish the whole exchange in the return value
    Completed,
}

pub struct StubTarget {
    pub socket: TargetSocket,
    ctx: Context<Self>,
    pool: PoolHandle,
    answers: VecDeque<Answer>,
    /// request that has not been given END_REQ yet
    open: Option<TxId>,
    pub begin_reqs: usize,
    pub overlaps: usize,
    pub end_resps: usize,
}

impl StubTarget {
    pub fn new(answers: Vec<Answer>, pool: PoolHandle, scheduler: Scheduler) -> Rc<RefCell<Self>> {
        Rc::new_cyclic(|me| RefCell::new(StubTarget {
            socket: TargetSocket::new("stub"),
            ctx: Context::new(me.clone(), scheduler),
            pool,
            answers: answers.into(),
            open: None,
            begin_reqs: 0,
            overlaps: 0,
            end_resps: 0,
        }))
    }

    fn end_request(&mut self, tx: TxId) -> Result<(), SimError> {
        self.open = None;
        self.socket.nb_transport_bw(tx, Phase::EndReq, Duration::ZERO)?;
        self.ctx.schedule_event(Duration::from_nanos(1), Self::respond, tx);
        Ok(())
    }

    fn respond(&mut self, tx: TxId) -> Result<(), SimError> {
        self.pool.borrow_mut().get_mut(tx)?.status = ResponseStatus::Ok;
        self.socket.nb_transport_bw(tx, Phase::BeginResp, Duration::ZERO)?;
        Ok(())
    }
}

impl ForwardTransport for StubTarget {
    fn nb_transport_fw(
        &mut self,
        _port: usize,
        tx: TxId,
        phase: Phase,
        _delay: Duration,
    ) -> Result<TransportStatus, SimError> {
        if phase == Phase::EndResp {
            self.end_resps += 1;
            return Ok(TransportStatus::Completed);
        }
        self.begin_reqs += 1;
        if self.open.is_some() {
            self.overlaps += 1;
        }
        match self.answers.pop_front().unwrap_or(Answer::Completed) {
            Answer::Later(delay) => {
                self.open = Some(tx);
                self.ctx.schedule_event(delay, Self::end_request, tx);
                Ok(TransportStatus::Accepted)
            }
            Answer::Updated(delay) => {
                self.ctx.schedule_event(delay + Duration::from_nanos(1), Self::respond, tx);
                Ok(TransportStatus::Updated { phase: Phase::EndReq, delay })
            }
            Answer::Completed => {
                self.pool.borrow_mut().get_mut(tx)?.status = ResponseStatus::Ok;
                Ok(TransportStatus::Completed)
            }
        }
    }

    fn b_transport(&mut self, _port: usize, tx: TxId, _delay: Duration) -> Result<(), SimError> {
        // reads come back as zeros
        self.pool.borrow_mut().get_mut(tx)?.status = ResponseStatus::Ok;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Reply {
    /// return Accepted, send END_RESP forward after the delay
    Later(Duration),
    /// return Updated(END_RESP, delay)
    Updated(Duration),
    /// return Completed
    Completed,
}

/// Initiator that sends whatever it is told, without any exclusion rule, and
/// answers BEGIN_RESP with the scripted replies.
pub struct StubInitiator {
    pub socket: InitiatorSocket,
    ctx: Context<Self>,
    pool: PoolHandle,
    replies: VecDeque<Reply>,
    pub end_reqs: usize,
    pub finished: usize,
}

impl StubInitiator {
    pub fn new(replies: Vec<Reply>, pool: PoolHandle, scheduler: Scheduler) -> Rc<RefCell<Self>> {
        Rc::new_cyclic(|me| RefCell::new(StubInitiator {
            socket: InitiatorSocket::new("ini"),
            ctx: Context::new(me.clone(), scheduler),
            pool,
            replies: replies.into(),
            end_reqs: 0,
            finished: 0,
        }))
    }

    /// Sends BEGIN_REQ for a write of `data` to `address`.
    pub fn send(&mut self, address: u64, data: &[u8]) -> Result<TransportStatus, SimError> {
        let tx = {
            let mut pool = self.pool.borrow_mut();
            let tx = pool.allocate();
            pool.acquire(tx)?;
            let payload = pool.get_mut(tx)?;
            payload.command = Command::Write;
            payload.address = address;
            payload.data = data.to_vec();
            tx
        };
        let status = self.socket.nb_transport_fw(tx, Phase::BeginReq, Duration::ZERO)?;
        if status == TransportStatus::Completed {
            self.finish(tx)?;
        }
        Ok(status)
    }

    fn finish(&mut self, tx: TxId) -> Result<(), SimError> {
        self.pool.borrow_mut().release(tx)?;
        self.finished += 1;
        Ok(())
    }

    fn end_response(&mut self, tx: TxId) -> Result<(), SimError> {
        self.socket.nb_transport_fw(tx, Phase::EndResp, Duration::ZERO)?;
        self.finish(tx)
    }
}

impl BackwardTransport for StubInitiator {
    fn nb_transport_bw(
        &mut self,
        _port: usize,
        tx: TxId,
        phase: Phase,
        _delay: Duration,
    ) -> Result<TransportStatus, SimError> {
        if phase == Phase::EndReq {
            self.end_reqs += 1;
            return Ok(TransportStatus::Accepted);
        }
        match self.replies.pop_front().unwrap_or(Reply::Completed) {
            Reply::Later(delay) => {
                self.ctx.schedule_event(delay, Self::end_response, tx);
                Ok(TransportStatus::Accepted)
            }
            Reply::Updated(delay) => {
                self.finish(tx)?;
                Ok(TransportStatus::Updated { phase: Phase::EndResp, delay })
            }
            Reply::Completed => {
                self.finish(tx)?;
                Ok(TransportStatus::Completed)
            }
        }
    }
}

/// A stub initiator and `target` on either side of a one-region bus.
pub fn through_bus<T: ForwardTransport + 'static>(
    replies: Vec<Reply>,
    pool: &PoolHandle,
    scheduler: &Scheduler,
    target: &Rc<RefCell<T>>,
) -> (Rc<RefCell<StubInitiator>>, Rc<RefCell<Bus>>) {
    let ini = StubInitiator::new(replies, pool.clone(), scheduler.clone());
    let bus = Bus::new("bus", AddressMap::new(512, 1), 1, pool.clone());
    ini.borrow_mut().socket.bind(&bus, 0);
    bus.borrow_mut().initiator_ports[0].bind(&ini, 0);
    bus.borrow_mut().target_ports[0].bind(target, 0);
    (ini, bus)
}

/// A processor bound straight to a stub target answering with `answers`.
pub fn stub_system(
    script: Script,
    answers: Vec<Answer>,
    verify: bool,
) -> (Scheduler, PoolHandle, Rc<RefCell<Processor>>, Rc<RefCell<StubTarget>>) {
    let scheduler = Scheduler::new();
    let pool = TransactionPool::shared();
    let cpu = Processor::new(
        "cpu0",
        script,
        DelaySource::Fixed(Duration::from_nanos(10)),
        pool.clone(),
        scheduler.clone(),
        verify,
    );
    let stub = StubTarget::new(answers, pool.clone(), scheduler.clone());
    cpu.borrow_mut().socket.bind(&stub, 0);
    stub.borrow_mut().socket.bind(&cpu, 0);
    cpu.borrow().start();
    (scheduler, pool, cpu, stub)
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
