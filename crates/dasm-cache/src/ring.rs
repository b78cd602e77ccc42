use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use dasm_services::{ContentHash, DbgiKey};

use crate::types::{Arch, Params, StyleFlags, Syntax};

/// A bounded byte ring with monotonic read/write counters.
///
/// Counters only ever advance; the physical index is the counter modulo
/// the capacity, so `write_pos - read_pos` is always the number of
/// unconsumed bytes regardless of wrap-around.
struct ByteRing {
    buf: Box<[u8]>,
    read_pos: u64,
    write_pos: u64,
}

impl ByteRing {
    fn new(size: usize) -> Self {
        ByteRing {
            buf: vec![0; size].into_boxed_slice(),
            read_pos: 0,
            write_pos: 0,
        }
    }

    fn capacity(&self) -> u64 {
        self.buf.len() as u64
    }

    fn unconsumed(&self) -> u64 {
        self.write_pos - self.read_pos
    }

    fn available(&self) -> u64 {
        self.capacity() - self.unconsumed()
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        let cap = self.buf.len();
        let phys = (self.write_pos % cap as u64) as usize;
        let first = bytes.len().min(cap - phys);
        self.buf[phys..phys + first].copy_from_slice(&bytes[..first]);
        self.buf[..bytes.len() - first].copy_from_slice(&bytes[first..]);
        self.write_pos += bytes.len() as u64;
    }

    fn read_bytes(&mut self, out: &mut [u8]) {
        let cap = self.buf.len();
        let phys = (self.read_pos % cap as u64) as usize;
        let out_len = out.len();
        let first = out_len.min(cap - phys);
        out[..first].copy_from_slice(&self.buf[phys..phys + first]);
        out[first..].copy_from_slice(&self.buf[..out_len - first]);
        self.read_pos += out.len() as u64;
    }

    fn write_u32(&mut self, value: u32) {
        self.write_bytes(&value.to_le_bytes());
    }

    fn write_u64(&mut self, value: u64) {
        self.write_bytes(&value.to_le_bytes());
    }

    fn read_u32(&mut self) -> u32 {
        let mut bytes = [0; 4];
        self.read_bytes(&mut bytes);
        u32::from_le_bytes(bytes)
    }

    fn read_u64(&mut self) -> u64 {
        let mut bytes = [0; 8];
        self.read_bytes(&mut bytes);
        u64::from_le_bytes(bytes)
    }

    fn align_write(&mut self) {
        self.write_pos = align8(self.write_pos);
    }

    fn align_read(&mut self) {
        self.read_pos = align8(self.read_pos);
    }
}

fn align8(pos: u64) -> u64 {
    (pos + 7) & !7
}

/// Serialized size of a work order minus the variable path bytes: hash,
/// vaddr, arch, style flags, syntax, base vaddr, path length, timestamp.
const ORDER_FIXED_SIZE: u64 = 16 + 8 + 4 + 4 + 4 + 8 + 8 + 8;

fn order_size(params: &Params) -> u64 {
    align8(ORDER_FIXED_SIZE + params.dbgi_key.path.len() as u64)
}

/// The smallest ring that can carry any single work order with a maximal
/// OS path.
pub(crate) const MIN_RING_SIZE: usize = 64 * 1024;

/// A dequeued decode request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WorkOrder {
    pub hash: ContentHash,
    pub params: Params,
}

/// The requester-to-worker queue: one process-wide byte ring carrying
/// variable-length work orders, serialized under a mutex with a condition
/// variable signalling capacity.
pub(crate) struct WorkQueue {
    ring: Mutex<ByteRing>,
    cond: Condvar,
}

impl WorkQueue {
    pub fn new(size: usize) -> Self {
        WorkQueue {
            ring: Mutex::new(ByteRing::new(size)),
            cond: Condvar::new(),
        }
    }

    /// Enqueues a work order, waiting for ring capacity until `deadline`
    /// (`None` waits unboundedly). Returns whether the order was written.
    pub fn enqueue(&self, hash: ContentHash, params: &Params, deadline: Option<Instant>) -> bool {
        let needed = order_size(params);
        let mut ring = self.ring.lock();
        loop {
            if ring.available() >= needed {
                ring.write_bytes(&hash.0);
                ring.write_u64(params.vaddr);
                ring.write_u32(params.arch.to_u32());
                ring.write_u32(params.style_flags.bits());
                ring.write_u32(params.syntax.to_u32());
                ring.write_u64(params.base_vaddr);
                ring.write_u64(params.dbgi_key.path.len() as u64);
                ring.write_bytes(params.dbgi_key.path.as_bytes());
                ring.write_u64(params.dbgi_key.min_timestamp);
                ring.align_write();
                break;
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return false;
                    }
                    self.cond.wait_until(&mut ring, deadline);
                }
                None => {
                    self.cond.wait_for(&mut ring, Duration::from_millis(10));
                }
            }
        }
        drop(ring);
        self.cond.notify_all();
        true
    }

    /// Dequeues the next work order, blocking until one is available.
    pub fn dequeue(&self) -> WorkOrder {
        let mut ring = self.ring.lock();
        while ring.unconsumed() < ORDER_FIXED_SIZE {
            self.cond.wait_for(&mut ring, Duration::from_millis(10));
        }

        let mut hash = ContentHash::ZERO;
        ring.read_bytes(&mut hash.0);
        let vaddr = ring.read_u64();
        let arch = Arch::from_u32(ring.read_u32()).expect("work order carries a valid arch tag");
        let style_flags = StyleFlags::from_bits_truncate(ring.read_u32());
        let syntax =
            Syntax::from_u32(ring.read_u32()).expect("work order carries a valid syntax tag");
        let base_vaddr = ring.read_u64();
        let path_len = ring.read_u64() as usize;
        let mut path_bytes = vec![0; path_len];
        ring.read_bytes(&mut path_bytes);
        let path = String::from_utf8_lossy(&path_bytes).into_owned();
        let min_timestamp = ring.read_u64();
        ring.align_read();

        WorkOrder {
            hash,
            params: Params {
                vaddr,
                arch,
                style_flags,
                syntax,
                base_vaddr,
                dbgi_key: DbgiKey {
                    path,
                    min_timestamp,
                },
            },
        }
    }
}
