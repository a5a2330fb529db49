use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use log::{debug, warn};

use crate::common::*;
use crate::error::{ProtocolViolation, SimError};
use crate::pool::{PoolHandle, TxId};
use crate::socket::{BackwardTransport, DirectAccess, ForwardTransport, InitiatorSocket, TargetSocket};

/// Contiguous, equally sized regions; region `i` lives behind outbound port `i`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressMap {
    region_size: u64,
    regions: usize,
}

impl AddressMap {
    pub fn new(region_size: u64, regions: usize) -> Self {
        AddressMap { region_size, regions }
    }

    /// outbound port and local address for a global address
    pub fn decode(&self, address: u64) -> Option<(usize, u64)> {
        if self.region_size == 0 {
            return None;
        }
        let port = address / self.region_size;
        if port >= self.regions as u64 {
            return None;
        }
        Some((port as usize, address % self.region_size))
    }

    /// number of decodable bytes
    pub fn size(&self) -> u64 {
        self.region_size * self.regions as u64
    }
}

/// Where a transaction entered the bus and where it was sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteEntry {
    pub inbound: usize,
    pub outbound: usize,
}

/// N×M routing fabric. Processors bind to `initiator_ports`, memories to
/// `target_ports`. Responses retrace the path their request took.
pub struct Bus {
    pub name: String,
    map: AddressMap,
    pub initiator_ports: Vec<TargetSocket>,
    pub target_ports: Vec<InitiatorSocket>,
    routes: HashMap<TxId, RouteEntry>,
    pool: PoolHandle,
}

impl Bus {
    pub fn new(name: impl Into<String>, map: AddressMap, initiators: usize, pool: PoolHandle) -> Rc<RefCell<Self>> {
        let name = name.into();
        let initiator_ports = (0..initiators)
            .map(|i| TargetSocket::new(format!("{name}.in{i}")))
            .collect();
        let target_ports = (0..map.regions)
            .map(|i| InitiatorSocket::new(format!("{name}.out{i}")))
            .collect();
        Rc::new(RefCell::new(Bus {
            name,
            map,
            initiator_ports,
            target_ports,
            routes: HashMap::new(),
            pool,
        }))
    }

    pub fn map(&self) -> AddressMap {
        self.map
    }
    /// number of transactions currently routed through the bus
    pub fn routes(&self) -> usize {
        self.routes.len()
    }

    /// Decodes the address of `tx` and rewrites it to the local address.
    /// A failed decode marks the payload with AddressError.
    fn decode(&self, tx: TxId) -> Result<Option<usize>, SimError> {
        let mut pool = self.pool.borrow_mut();
        let payload = pool.get_mut(tx)?;
        match self.map.decode(payload.address) {
            Some((port, local)) => {
                debug!("{}: {} {:#06x} -> port {} at {:#06x}", self.name, tx, payload.address, port, local);
                payload.address = local;
                Ok(Some(port))
            }
            None => {
                warn!("{}: {} address {:#06x} does not decode", self.name, tx, payload.address);
                payload.status = ResponseStatus::AddressError;
                Ok(None)
            }
        }
    }

    fn route(&self, tx: TxId, phase: Phase) -> Result<RouteEntry, ProtocolViolation> {
        self.routes.get(&tx).copied().ok_or_else(|| ProtocolViolation::UnknownRoute {
            endpoint: self.name.clone(),
            tx,
            phase,
        })
    }

    fn tear_down(&mut self, tx: TxId) -> Result<(), SimError> {
        if self.routes.remove(&tx).is_some() {
            debug!("{}: route of {} torn down", self.name, tx);
            self.pool.borrow_mut().release(tx)?;
        }
        Ok(())
    }

    fn begin_request(&mut self, inbound: usize, tx: TxId, delay: Duration) -> Result<TransportStatus, SimError> {
        let Some(outbound) = self.decode(tx)? else {
            return Ok(TransportStatus::Completed);
        };
        if self.routes.contains_key(&tx) {
            return Err(ProtocolViolation::UnexpectedTransaction {
                endpoint: self.name.clone(),
                tx,
                phase: Phase::BeginReq,
            }.into());
        }
        self.pool.borrow_mut().acquire(tx)?;
        self.routes.insert(tx, RouteEntry { inbound, outbound });

        let status = self.target_ports[outbound].nb_transport_fw(tx, Phase::BeginReq, delay)?;
        if ends_exchange(status) {
            self.tear_down(tx)?;
        }
        Ok(status)
    }

    fn end_response(&mut self, tx: TxId, delay: Duration) -> Result<TransportStatus, SimError> {
        let route = self.route(tx, Phase::EndResp)?;
        let status = self.target_ports[route.outbound].nb_transport_fw(tx, Phase::EndResp, delay)?;
        self.tear_down(tx)?;
        Ok(status)
    }
}

/// the status leaves nothing for the bus to relay for this transaction
fn ends_exchange(status: TransportStatus) -> bool {
    matches!(status, TransportStatus::Completed | TransportStatus::Updated { phase: Phase::EndResp, .. })
}

impl ForwardTransport for Bus {
    fn nb_transport_fw(
        &mut self,
        port: usize,
        tx: TxId,
        phase: Phase,
        delay: Duration,
    ) -> Result<TransportStatus, SimError> {
        match phase {
            Phase::BeginReq => self.begin_request(port, tx, delay),
            Phase::EndResp => self.end_response(tx, delay),
            _ => Err(ProtocolViolation::IllegalPhase { endpoint: self.name.clone(), phase }.into()),
        }
    }

    fn b_transport(&mut self, _port: usize, tx: TxId, delay: Duration) -> Result<(), SimError> {
        match self.decode(tx)? {
            Some(outbound) => self.target_ports[outbound].b_transport(tx, delay),
            None => Ok(()),
        }
    }
}

impl BackwardTransport for Bus {
    fn nb_transport_bw(
        &mut self,
        port: usize,
        tx: TxId,
        phase: Phase,
        delay: Duration,
    ) -> Result<TransportStatus, SimError> {
        let route = self.route(tx, phase)?;
        if route.outbound != port {
            return Err(ProtocolViolation::UnexpectedTransaction {
                endpoint: self.name.clone(),
                tx,
                phase,
            }.into());
        }
        let status = self.initiator_ports[route.inbound].nb_transport_bw(tx, phase, delay)?;
        // END_RESP returned in place of being sent never crosses the bus
        if ends_exchange(status) {
            self.tear_down(tx)?;
        }
        Ok(status)
    }
}

impl DirectAccess for Bus {}
