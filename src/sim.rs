// wiring of the default platform: N processors, one bus, M memories

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use asynchronix::time::MonotonicTime;
use log::info;

use crate::bus::{AddressMap, Bus};
use crate::common::*;
use crate::delayed_q::Scheduler;
use crate::error::SimError;
use crate::memory::Memory;
use crate::pool::{PoolHandle, TransactionPool};
use crate::processor::{Completion, Processor};

// delay stream offsets, see SystemSpec::delays_for
const MEMORY_STREAMS: u64 = 1000;
const SCRIPT_STREAMS: u64 = 2000;

pub struct Platform {
    spec: SystemSpec,
    scheduler: Scheduler,
    pool: PoolHandle,
    processors: Vec<Rc<RefCell<Processor>>>,
    bus: Rc<RefCell<Bus>>,
    memories: Vec<Rc<RefCell<Memory>>>,
    started: bool,
}

/// Outcome of a finished (or interrupted) run.
#[derive(Clone, Debug)]
pub struct Report {
    pub elapsed: Duration,
    pub completions: Vec<Vec<Completion>>,
    pub allocated: u64,
    pub recycled: u64,
    pub live: usize,
    pub routes: usize,
    pub events: u64,
    pub verified: usize,
}

impl Platform {
    /// Platform whose processors run seeded random write traffic.
    pub fn new(spec: SystemSpec) -> Self {
        let scripts = (0..spec.processors)
            .map(|i| Processor::random_script(
                spec.stream_seed(SCRIPT_STREAMS + i as u64),
                spec.requests,
                spec.address_space(),
                spec.data_len,
            ))
            .collect();
        Self::with_scripts(spec, scripts)
    }

    /// One script per processor; `spec.processors` is taken from `scripts`.
    pub fn with_scripts(mut spec: SystemSpec, scripts: Vec<Script>) -> Self {
        spec.processors = scripts.len();
        let scheduler = Scheduler::new();
        let pool = TransactionPool::shared();

        let map = AddressMap::new(spec.region_size, spec.memories);
        let bus = Bus::new("bus", map, spec.processors, pool.clone());

        let processors = scripts.into_iter().enumerate()
            .map(|(i, script)| Processor::new(
                format!("cpu{i}"),
                script,
                spec.delays_for(i as u64),
                pool.clone(),
                scheduler.clone(),
                spec.verify,
            ))
            .collect::<Vec<_>>();
        let memories = (0..spec.memories)
            .map(|j| Memory::new(
                format!("mem{j}"),
                spec.region_size as usize,
                spec.processors.max(1),
                spec.delays_for(MEMORY_STREAMS + j as u64),
                pool.clone(),
                scheduler.clone(),
            ))
            .collect::<Vec<_>>();

        // connect models
        for (i, p) in processors.iter().enumerate() {
            p.borrow_mut().socket.bind(&bus, i);
            bus.borrow_mut().initiator_ports[i].bind(p, 0);
        }
        for (j, m) in memories.iter().enumerate() {
            bus.borrow_mut().target_ports[j].bind(m, 0);
            m.borrow_mut().socket.bind(&bus, j);
        }

        Platform { spec, scheduler, pool, processors, bus, memories, started: false }
    }

    fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        info!("starting {} processor(s), {} memory(s) of {} bytes",
            self.processors.len(), self.memories.len(), self.spec.region_size);
        for p in &self.processors {
            p.borrow().start();
        }
    }

    /// Runs until no event is left. The first protocol or pool error ends
    /// the run and is returned.
    pub fn run(&mut self) -> Result<Report, SimError> {
        self.start();
        self.scheduler.run()?;
        Ok(self.report())
    }

    pub fn run_until(&mut self, deadline: MonotonicTime) -> Result<Report, SimError> {
        self.start();
        self.scheduler.run_until(deadline)?;
        Ok(self.report())
    }

    pub fn report(&self) -> Report {
        let pool = self.pool.borrow();
        Report {
            elapsed: self.scheduler.elapsed(),
            completions: self.processors.iter().map(|p| p.borrow().completions().to_vec()).collect(),
            allocated: pool.allocated(),
            recycled: pool.recycled(),
            live: pool.live(),
            routes: self.bus.borrow().routes(),
            events: self.scheduler.dispatched(),
            verified: self.processors.iter().map(|p| p.borrow().verified()).sum(),
        }
    }

    pub fn spec(&self) -> &SystemSpec {
        &self.spec
    }
    pub fn processor(&self, i: usize) -> &Rc<RefCell<Processor>> {
        &self.processors[i]
    }
    pub fn memory(&self, j: usize) -> &Rc<RefCell<Memory>> {
        &self.memories[j]
    }
    pub fn bus(&self) -> &Rc<RefCell<Bus>> {
        &self.bus
    }
    pub fn pool(&self) -> &PoolHandle {
        &self.pool
    }
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl Report {
    pub fn requests(&self) -> usize {
        self.completions.iter().map(Vec::len).sum()
    }
    pub fn address_errors(&self) -> usize {
        self.completions.iter().flatten()
            .filter(|c| c.status == ResponseStatus::AddressError)
            .count()
    }
}
