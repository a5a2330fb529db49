// Transaction memory manager: pooled payloads with explicit reference counts.
//
// Handles carry the generation of the slot they were allocated from. Once a
// slot is recycled, every older handle to it is stale and gets rejected.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::common::Payload;
use crate::error::PoolError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TxId {
    index: u32,
    generation: u32,
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx{}.{}", self.index, self.generation)
    }
}

struct Slot {
    payload: Payload,
    refs: u32,
    generation: u32,
    live: bool,
}

#[derive(Default)]
pub struct TransactionPool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    allocated: u64,
    recycled: u64,
}

pub type PoolHandle = Rc<RefCell<TransactionPool>>;

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn shared() -> PoolHandle {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Hands out a reset payload with a reference count of zero. The caller
    /// is expected to `acquire` it before passing it on.
    pub fn allocate(&mut self) -> TxId {
        self.allocated += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.payload = Payload::default();
            slot.refs = 0;
            slot.live = true;
            return TxId { index, generation: slot.generation };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            payload: Payload::default(),
            refs: 0,
            generation: 0,
            live: true,
        });
        TxId { index, generation: 0 }
    }

    pub fn acquire(&mut self, tx: TxId) -> Result<u32, PoolError> {
        let slot = self.slot_mut(tx)?;
        slot.refs += 1;
        Ok(slot.refs)
    }

    /// Drops one reference. Returns `true` if this was the last one and the
    /// payload went back to the free list.
    pub fn release(&mut self, tx: TxId) -> Result<bool, PoolError> {
        let slot = self.slot_mut(tx)?;
        if slot.refs == 0 {
            return Err(PoolError::Underflow(tx));
        }
        slot.refs -= 1;
        if slot.refs > 0 {
            return Ok(false);
        }
        slot.live = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(tx.index);
        self.recycled += 1;
        Ok(true)
    }

    pub fn get(&self, tx: TxId) -> Result<&Payload, PoolError> {
        self.slot(tx).map(|s| &s.payload)
    }
    pub fn get_mut(&mut self, tx: TxId) -> Result<&mut Payload, PoolError> {
        self.slot_mut(tx).map(|s| &mut s.payload)
    }
    pub fn refs(&self, tx: TxId) -> Result<u32, PoolError> {
        self.slot(tx).map(|s| s.refs)
    }

    /// number of payloads currently handed out
    pub fn live(&self) -> usize {
        self.slots.iter().filter(|s| s.live).count()
    }
    pub fn allocated(&self) -> u64 {
        self.allocated
    }
    pub fn recycled(&self) -> u64 {
        self.recycled
    }
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, tx: TxId) -> Result<&Slot, PoolError> {
        match self.slots.get(tx.index as usize) {
            Some(s) if s.live && s.generation == tx.generation => Ok(s),
            _ => Err(PoolError::Stale(tx)),
        }
    }
    fn slot_mut(&mut self, tx: TxId) -> Result<&mut Slot, PoolError> {
        match self.slots.get_mut(tx.index as usize) {
            Some(s) if s.live && s.generation == tx.generation => Ok(s),
            _ => Err(PoolError::Stale(tx)),
        }
    }
}
