use std::fmt;

/// Throughput figures for one sending run.
///
/// Rates use whole elapsed seconds. A run shorter than one second has no
/// defined rate and reports `N/A`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReport {
    pub packets: u64,
    pub elapsed_secs: u64,
    pub frame_len: usize,
}

impl TxReport {
    pub fn new(packets: u64, elapsed_secs: u64, frame_len: usize) -> Self {
        TxReport {
            packets,
            elapsed_secs,
            frame_len,
        }
    }

    pub fn packets_per_sec(&self) -> Option<u64> {
        self.packets.checked_div(self.elapsed_secs)
    }

    pub fn bits_per_sec(&self) -> Option<u64> {
        if self.elapsed_secs == 0 {
            return None;
        }
        let bits = self.packets as u128 * self.frame_len as u128 * 8;
        Some((bits / self.elapsed_secs as u128).min(u64::MAX as u128) as u64)
    }

    pub fn gbits_per_sec(&self) -> Option<u64> {
        self.bits_per_sec().map(|bps| bps / 1_000_000_000)
    }
}

struct Rate(Option<u64>);

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{}", v),
            None => f.write_str("N/A"),
        }
    }
}

impl fmt::Display for TxReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Elapsed:      {} s", self.elapsed_secs)?;
        writeln!(f, "Packets sent: {}", self.packets)?;
        writeln!(f, "Packets/sec:  {}", Rate(self.packets_per_sec()))?;
        writeln!(f, "Bits/sec:     {}", Rate(self.bits_per_sec()))?;
        write!(f, "Gbits/sec:    {}", Rate(self.gbits_per_sec()))
    }
}
