use std::fmt;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Clone, Debug)]
pub struct SystemSpec {                 // unit         reasonable defaults
    pub processors: usize,              // count        2
    pub memories: usize,                // count        2
    pub region_size: u64,               // bytes        512
    pub requests: usize,                // per proc     10
    pub data_len: usize,                // bytes        4
    pub max_delay_ns: u64,              // ns           1000
    pub fixed_delay_ns: Option<u64>,    // ns           none (random delays)
    pub seed: u64,                      //              0
    pub verify: bool,                   //              true
}

impl Default for SystemSpec {
    fn default() -> Self {
        SystemSpec {
            processors: 2,
            memories: 2,
            region_size: 512,
            requests: 10,
            data_len: 4,
            max_delay_ns: 1000,
            fixed_delay_ns: None,
            seed: 0,
            verify: true,
        }
    }
}

impl SystemSpec {
    /// total number of bytes reachable through the bus
    pub fn address_space(&self) -> u64 {
        self.region_size * self.memories as u64
    }
    /// independent, reproducible delay stream for the component identified by `stream`
    pub fn delays_for(&self, stream: u64) -> DelaySource {
        match self.fixed_delay_ns {
            Some(ns) => DelaySource::Fixed(Duration::from_nanos(ns)),
            None => DelaySource::uniform(
                self.stream_seed(stream),
                Duration::from_nanos(self.max_delay_ns)),
        }
    }
    pub fn stream_seed(&self, stream: u64) -> u64 {
        self.seed
            .wrapping_mul(0x9e37_79b9_7f4a_7c15)
            .wrapping_add(stream)
    }
}

// timing

/// Source of the simulated delays annotated on phase transitions.
pub enum DelaySource {
    Fixed(Duration),
    Uniform { rng: StdRng, max: Duration },
}

impl DelaySource {
    pub fn uniform(seed: u64, max: Duration) -> Self {
        DelaySource::Uniform { rng: StdRng::seed_from_u64(seed), max }
    }
    pub fn draw(&mut self) -> Duration {
        match self {
            DelaySource::Fixed(d) => *d,
            DelaySource::Uniform { rng, max } => {
                let max_ns = max.as_nanos() as u64;
                if max_ns == 0 { return Duration::ZERO; }
                Duration::from_nanos(rng.gen_range(0..max_ns))
            }
        }
    }
}

// transactions

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Command {
    #[default]
    Read,
    Write,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResponseStatus {
    Ok,
    AddressError,
    #[default]
    Incomplete,
}

/// The attributes of one request/response exchange. The length of `data`
/// is the data length of the transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Payload {
    pub command: Command,
    pub address: u64,
    pub data: Vec<u8>,
    pub status: ResponseStatus,
}

// protocol

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    BeginReq,
    EndReq,
    BeginResp,
    EndResp,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::BeginReq => "BEGIN_REQ",
            Phase::EndReq => "END_REQ",
            Phase::BeginResp => "BEGIN_RESP",
            Phase::EndResp => "END_RESP",
        })
    }
}

/// Return value of a non-blocking transport call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportStatus {
    /// the callee will answer later through a transport call of its own
    Accepted,
    /// the callee moved the transaction to `phase`; the caller delivers it to
    /// itself after `delay`
    Updated { phase: Phase, delay: Duration },
    /// the exchange is over, no further phases follow
    Completed,
}

// requests as issued by processors

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub address: u64,
    pub data: Vec<u8>,
}

impl Request {
    pub fn write(address: u64, data: impl Into<Vec<u8>>) -> Self {
        Request { command: Command::Write, address, data: data.into() }
    }
    pub fn read(address: u64, len: usize) -> Self {
        Request { command: Command::Read, address, data: vec![0; len] }
    }
}

pub type Script = Vec<Request>;
