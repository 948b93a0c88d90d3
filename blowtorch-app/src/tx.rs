use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use blowtorch_common::{FrameError, FrameTemplate, TxReport};

use crate::port::TxPort;

#[derive(Debug, Default)]
pub struct TxCounters {
    sent: AtomicU64,
    rejected: AtomicU64,
    pool_empty: AtomicU64,
}

impl TxCounters {
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn pool_empty(&self) -> u64 {
        self.pool_empty.load(Ordering::Relaxed)
    }
}

/// State shared between the transmit loop and whoever stops it.
#[derive(Debug, Default)]
pub struct TxContext {
    counters: TxCounters,
    stop: AtomicBool,
}

impl TxContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self) -> &TxCounters {
        &self.counters
    }

    // the loop finishes its current iteration first
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxSummary {
    pub sent: u64,
    pub rejected: u64,
    pub pool_empty: u64,
    pub elapsed: Duration,
}

impl TxSummary {
    pub fn report(&self, frame_len: usize) -> TxReport {
        TxReport::new(self.sent, self.elapsed.as_secs(), frame_len)
    }
}

/// Builds one frame and offers it to the port. Returns how many frames the
/// port accepted, 0 or 1.
pub fn transmit_once<P: TxPort>(
    port: &mut P,
    template: &FrameTemplate,
    ctx: &TxContext,
) -> Result<usize, FrameError> {
    let Some(mut buf) = port.alloc_tx_buffer() else {
        ctx.counters.pool_empty.fetch_add(1, Ordering::Relaxed);
        std::hint::spin_loop();
        return Ok(0);
    };

    let len = match template.assemble(port.buffer_mut(&buf)) {
        Ok(len) => len,
        Err(e) => {
            port.release_buffer(buf);
            return Err(e);
        }
    };
    buf.set_len(len);

    let burst = [buf];
    let accepted = port.send_burst(&burst);
    for unsent in burst.into_iter().skip(accepted) {
        port.release_buffer(unsent);
    }

    if accepted == 0 {
        ctx.counters.rejected.fetch_add(1, Ordering::Relaxed);
    } else {
        ctx.counters
            .sent
            .fetch_add(accepted as u64, Ordering::Relaxed);
    }

    Ok(accepted)
}

/// Sends frames until `ctx` is stopped.
pub fn run<P: TxPort>(
    port: &mut P,
    template: &FrameTemplate,
    ctx: &TxContext,
) -> Result<TxSummary, FrameError> {
    let started = Instant::now();

    while !ctx.is_stopped() {
        transmit_once(port, template, ctx)?;
    }

    Ok(TxSummary {
        sent: ctx.counters.sent(),
        rejected: ctx.counters.rejected(),
        pool_empty: ctx.counters.pool_empty(),
        elapsed: started.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::TxBuffer;
    use blowtorch_common::{MacAddress, TX_FRAME_LEN};
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    const SRC_MAC: MacAddress = MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);

    // Vec-backed port: a fixed pool of buffers and a script of accept results.
    struct MemPort {
        memory: Vec<Vec<u8>>,
        free: Vec<u64>,
        accepts: VecDeque<bool>,
        sent: u64,
        last_frame: Vec<u8>,
        stop_after: Option<(u64, Arc<TxContext>)>,
    }

    impl MemPort {
        fn new(buffers: usize, capacity: usize) -> Self {
            MemPort {
                memory: vec![vec![0u8; capacity]; buffers],
                free: (0..buffers as u64).collect(),
                accepts: VecDeque::new(),
                sent: 0,
                last_frame: Vec::new(),
                stop_after: None,
            }
        }
    }

    impl TxPort for MemPort {
        fn mac_address(&self) -> MacAddress {
            SRC_MAC
        }

        fn alloc_tx_buffer(&mut self) -> Option<TxBuffer> {
            let idx = self.free.pop()?;
            Some(TxBuffer::new(idx, self.memory[idx as usize].len()))
        }

        fn buffer_mut(&mut self, buf: &TxBuffer) -> &mut [u8] {
            &mut self.memory[buf.addr() as usize]
        }

        fn send_burst(&mut self, bufs: &[TxBuffer]) -> usize {
            let mut accepted = 0;
            for buf in bufs {
                if !self.accepts.pop_front().unwrap_or(true) {
                    break;
                }
                // completes immediately
                let idx = buf.addr() as usize;
                self.last_frame = self.memory[idx][..buf.len()].to_vec();
                self.free.push(buf.addr());
                self.sent += 1;
                accepted += 1;
            }
            if let Some((limit, ctx)) = &self.stop_after {
                if self.sent >= *limit {
                    ctx.stop();
                }
            }
            accepted
        }

        fn release_buffer(&mut self, buf: TxBuffer) {
            self.free.push(buf.addr());
        }
    }

    fn template(src_mac: MacAddress) -> FrameTemplate {
        FrameTemplate::new(
            TX_FRAME_LEN,
            "0a:38:ca:f6:f3:20".parse().unwrap(),
            src_mac,
            Ipv4Addr::new(172, 30, 0, 73),
            Ipv4Addr::new(172, 30, 0, 225),
        )
        .unwrap()
    }

    #[test]
    fn counts_accepted_sends() {
        let mut port = MemPort::new(4, 2048);
        let template = template(port.mac_address());
        let ctx = TxContext::new();

        for _ in 0..100 {
            assert_eq!(transmit_once(&mut port, &template, &ctx).unwrap(), 1);
        }
        assert_eq!(ctx.counters().sent(), 100);
        assert_eq!(port.sent, 100);
        assert_eq!(port.free.len(), 4);
    }

    #[test]
    fn rejected_send_leaves_counter_and_returns_buffer() {
        let mut port = MemPort::new(2, 2048);
        port.accepts.extend([true, false, false, true]);
        let template = template(port.mac_address());
        let ctx = TxContext::new();

        let accepted: Vec<usize> = (0..4)
            .map(|_| transmit_once(&mut port, &template, &ctx).unwrap())
            .collect();

        assert_eq!(accepted, [1, 0, 0, 1]);
        assert_eq!(ctx.counters().sent(), 2);
        assert_eq!(ctx.counters().rejected(), 2);
        assert_eq!(port.free.len(), 2);
    }

    #[test]
    fn empty_pool_sends_nothing() {
        let mut port = MemPort::new(0, 2048);
        let template = template(port.mac_address());
        let ctx = TxContext::new();

        assert_eq!(transmit_once(&mut port, &template, &ctx).unwrap(), 0);
        assert_eq!(ctx.counters().sent(), 0);
        assert_eq!(ctx.counters().pool_empty(), 1);
    }

    #[test]
    fn sends_assembled_frame() {
        let mut port = MemPort::new(1, 2048);
        let template = template(port.mac_address());
        let ctx = TxContext::new();

        transmit_once(&mut port, &template, &ctx).unwrap();

        assert_eq!(port.last_frame.len(), TX_FRAME_LEN);
        assert_eq!(
            &port.last_frame[..14],
            &[0x0a, 0x38, 0xca, 0xf6, 0xf3, 0x20, 0x02, 0x00, 0x00, 0x00, 0x00, 0x01, 0x08, 0x00]
        );
        assert_eq!(&port.last_frame[23..24], &[17]);
    }

    #[test]
    fn run_stops_on_flag() {
        let ctx = Arc::new(TxContext::new());
        let mut port = MemPort::new(8, 2048);
        port.stop_after = Some((1000, ctx.clone()));
        let template = template(port.mac_address());

        let summary = run(&mut port, &template, &ctx).unwrap();

        assert_eq!(summary.sent, 1000);
        assert_eq!(summary.rejected, 0);
        assert_eq!(summary.report(TX_FRAME_LEN).packets, 1000);
    }

    #[test]
    fn run_returns_immediately_when_already_stopped() {
        let ctx = TxContext::new();
        ctx.stop();
        let mut port = MemPort::new(1, 2048);
        let template = template(port.mac_address());

        let summary = run(&mut port, &template, &ctx).unwrap();
        assert_eq!(summary.sent, 0);
        assert_eq!(port.sent, 0);
    }

    #[test]
    fn run_fails_on_short_buffers() {
        let ctx = TxContext::new();
        let mut port = MemPort::new(1, 512);
        let template = template(port.mac_address());

        let err = run(&mut port, &template, &ctx).unwrap_err();
        assert_eq!(
            err,
            FrameError::BufferTooSmall {
                capacity: 512,
                needed: TX_FRAME_LEN
            }
        );
        assert_eq!(port.free.len(), 1);
    }

    #[test]
    fn counters_visible_across_threads() {
        let ctx = Arc::new(TxContext::new());
        let tx_ctx = ctx.clone();

        let handle = std::thread::spawn(move || {
            let mut port = MemPort::new(8, 2048);
            let template = template(port.mac_address());
            run(&mut port, &template, &tx_ctx)
        });

        while ctx.counters().sent() < 10 {
            std::thread::yield_now();
        }
        ctx.stop();

        let summary = handle.join().unwrap().unwrap();
        assert!(summary.sent >= 10);
        assert_eq!(summary.sent, ctx.counters().sent());
    }
}
