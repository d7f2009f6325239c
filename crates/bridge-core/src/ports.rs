//! UDP port allocation for engine-B legs
//!
//! Ports are handed out above a cursor that only moves forward for the
//! lifetime of the process. A port is never issued twice, even after the
//! session that held it is gone, so a late packet to a closed session can
//! never reach a new one.

use std::net::{IpAddr, UdpSocket};
use std::sync::Arc;

use castbridge_sdp_core::PortBlock;
use parking_lot::Mutex;

use crate::config::PortConfig;
use crate::errors::{BridgeError, Result};

/// Checks whether a port can currently be bound
pub trait PortCheck: Send + Sync {
    fn is_free(&self, ip: IpAddr, port: u16) -> bool;
}

/// Checks by binding a UDP socket and dropping it again
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpBindCheck;

impl PortCheck for UdpBindCheck {
    fn is_free(&self, ip: IpAddr, port: u16) -> bool {
        UdpSocket::bind((ip, port)).is_ok()
    }
}

#[derive(Debug)]
struct AllocatorState {
    /// Next port to consider; one past `max_port` once exhausted
    cursor: u32,
    blocks_allocated: u64,
    ports_allocated: u64,
}

/// Snapshot of allocator progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
    pub cursor: u32,
    pub blocks_allocated: u64,
    pub ports_allocated: u64,
}

/// Monotonic port allocator
///
/// Cheap to clone; clones share the cursor.
#[derive(Clone)]
pub struct PortAllocator {
    inner: Arc<AllocatorInner>,
}

struct AllocatorInner {
    min_port: u16,
    max_port: u16,
    bind_ip: IpAddr,
    check: Arc<dyn PortCheck>,
    state: Mutex<AllocatorState>,
}

impl PortAllocator {
    pub fn new(config: &PortConfig) -> Self {
        Self::with_check(config, Arc::new(UdpBindCheck))
    }

    pub fn with_check(config: &PortConfig, check: Arc<dyn PortCheck>) -> Self {
        Self {
            inner: Arc::new(AllocatorInner {
                min_port: config.min_port,
                max_port: config.max_port,
                bind_ip: config.bind_ip,
                check,
                state: Mutex::new(AllocatorState {
                    cursor: u32::from(config.min_port),
                    blocks_allocated: 0,
                    ports_allocated: 0,
                }),
            }),
        }
    }

    /// As [`allocate`](Self::allocate), run on the blocking pool. Checking
    /// may bind a socket per port of the whole range.
    pub async fn reserve(&self, count: usize) -> Result<PortBlock> {
        let allocator = self.clone();
        tokio::task::spawn_blocking(move || allocator.allocate(count))
            .await
            .map_err(|e| BridgeError::Io(std::io::Error::other(format!("port allocation task failed: {}", e))))?
    }

    /// Reserve `count` free ports at or above the cursor, in ascending
    /// order. The cursor moves past the highest returned port; on failure it
    /// stays where it was. Blocks while each candidate port is bound and dropped.
    pub fn allocate(&self, count: usize) -> Result<PortBlock> {
        let inner = &self.inner;
        let exhausted = || BridgeError::PortExhaustion {
            requested: count,
            min: inner.min_port,
            max: inner.max_port,
        };
        if count == 0 {
            return Err(exhausted());
        }

        // Held across the checks so concurrent callers never see the same range
        let mut state = inner.state.lock();
        let mut ports = Vec::with_capacity(count);
        let mut candidate = state.cursor;

        while ports.len() < count && candidate <= u32::from(inner.max_port) {
            let port = candidate as u16;
            if inner.check.is_free(inner.bind_ip, port) {
                ports.push(port);
            } else {
                tracing::trace!("Port {} on {} is busy", port, inner.bind_ip);
            }
            candidate += 1;
        }

        if ports.len() < count {
            tracing::warn!(
                "Port range exhausted: needed {} ports from {} up to {}, found {}",
                count,
                state.cursor,
                inner.max_port,
                ports.len()
            );
            return Err(exhausted());
        }

        let block = PortBlock::new(ports);
        if let Some(highest) = block.highest() {
            state.cursor = u32::from(highest) + 1;
        }
        state.blocks_allocated += 1;
        state.ports_allocated += count as u64;

        tracing::debug!("Allocated ports {} (next search from {})", block, state.cursor);
        Ok(block)
    }

    /// Ports go back to the OS when their sockets close; the cursor is not
    /// rewound
    pub fn release(&self, block: &PortBlock) {
        tracing::debug!("Released port block {} (not reused in this process)", block);
    }

    pub fn stats(&self) -> AllocatorStats {
        let state = self.inner.state.lock();
        AllocatorStats {
            cursor: state.cursor,
            blocks_allocated: state.blocks_allocated,
            ports_allocated: state.ports_allocated,
        }
    }
}

impl std::fmt::Debug for PortAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortAllocator")
            .field("min_port", &self.inner.min_port)
            .field("max_port", &self.inner.max_port)
            .field("bind_ip", &self.inner.bind_ip)
            .field("stats", &self.stats())
            .finish()
    }
}
