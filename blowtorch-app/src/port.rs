use blowtorch_common::MacAddress;

// Handle only: the bytes live inside the owning port
#[derive(Debug, PartialEq, Eq)]
pub struct TxBuffer {
    addr: u64,
    capacity: usize,
    len: usize,
}

impl TxBuffer {
    pub fn new(addr: u64, capacity: usize) -> Self {
        TxBuffer {
            addr,
            capacity,
            len: 0,
        }
    }

    pub fn addr(&self) -> u64 {
        self.addr
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.capacity);
        self.len = len;
    }
}

/// A single transmit queue of a user-space network interface.
pub trait TxPort {
    fn mac_address(&self) -> MacAddress;

    // None when the pool is exhausted
    fn alloc_tx_buffer(&mut self) -> Option<TxBuffer>;

    fn buffer_mut(&mut self, buf: &TxBuffer) -> &mut [u8];

    /// Queues buffers for transmission and returns how many were accepted.
    ///
    /// Accepted buffers always form a prefix of `bufs` and now belong to the
    /// port. The caller still owns the rest.
    fn send_burst(&mut self, bufs: &[TxBuffer]) -> usize;

    fn release_buffer(&mut self, buf: TxBuffer);
}
