use anyhow::{anyhow, bail, Context, Result};
use blowtorch_common::{AddressError, MacAddress};
use log::{debug, info};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ffi::CString;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::port::{TxBuffer, TxPort};

// Kernel Constants
const SOL_XDP: i32 = 283;
// Options for setsockopt
const XDP_MMAP_OFFSETS: i32 = 1;
const XDP_TX_RING: i32 = 3;
const XDP_UMEM_REG: i32 = 4;
const XDP_UMEM_FILL_RING: i32 = 5;
const XDP_UMEM_COMPLETION_RING: i32 = 6;

const XDP_PGOFF_TX_RING: libc::off_t = 0x80000000;
const XDP_UMEM_PGOFF_COMPLETION_RING: libc::off_t = 0x180000000;
// flag for forcing copy mode
const XDP_COPY: u16 = 1 << 1;

/// Buffers in the transmit pool.
pub const NUM_FRAMES: usize = 8191;
/// Bytes per pooled buffer (one UMEM chunk).
pub const FRAME_SIZE: usize = 2048;
const PAGE_SIZE: usize = 4096;

// Ring sizes must be powers of two
const TX_RING_SIZE: u32 = 1024;
const COMP_RING_SIZE: u32 = 2048;
// Never produced into, but bind() refuses a UMEM without one
const FILL_RING_SIZE: u32 = 64;

/// Completed buffers pulled back into the pool per reclaim.
const RECLAIM_BATCH: u32 = 250;

#[repr(C)]
struct XdpUmemReg {
    addr: u64,
    len: u64,
    chunk_size: u32,
    headroom: u32,
    flags: u32,
    tx_metadata_len: u32,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct XdpMmapOffsets {
    rx: RingOffsets,
    tx: RingOffsets,
    fr: RingOffsets,
    cr: RingOffsets,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct RingOffsets {
    producer: u64,
    consumer: u64,
    desc: u64,
    flags: u64,
}

/// TX ring descriptor.
#[repr(C)]
struct XdpDesc {
    addr: u64,
    len: u32,
    options: u32,
}

struct Umem {
    ptr: *mut u8,
    layout: Layout,
}

impl Umem {
    fn new(size: usize) -> Result<Self> {
        // page aligned, zeroed so payload bytes start out as filler
        let layout =
            Layout::from_size_align(size, PAGE_SIZE).context("Failed to create memory layout")?;
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            bail!("Failed to allocate aligned memory");
        }
        Ok(Umem { ptr, layout })
    }
}

impl Drop for Umem {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr, self.layout) }
    }
}

struct XdpRing {
    producer: *mut AtomicU32,
    consumer: *mut AtomicU32,
    desc: *mut u8,
    size: u32,
    ptr: *mut libc::c_void,
    len: usize,
    cached_prod: u32,
    cached_cons: u32,
}

impl XdpRing {
    /// Maps one of the socket's rings into our address space.
    unsafe fn map(
        fd: RawFd,
        off: &RingOffsets,
        size: u32,
        desc_size: usize,
        pgoff: libc::off_t,
    ) -> Result<Self> {
        let len = off.desc as usize + size as usize * desc_size;
        let map = libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_POPULATE,
            fd,
            pgoff,
        );
        if map == libc::MAP_FAILED {
            return Err(anyhow!("mmap failed: {}", io::Error::last_os_error()));
        }

        let base = map as *mut u8;
        let producer = base.add(off.producer as usize) as *mut AtomicU32;
        let consumer = base.add(off.consumer as usize) as *mut AtomicU32;

        Ok(XdpRing {
            producer,
            consumer,
            desc: base.add(off.desc as usize),
            size,
            ptr: map,
            len,
            cached_prod: (*producer).load(Ordering::Relaxed),
            cached_cons: (*consumer).load(Ordering::Acquire),
        })
    }

    fn mask(&self) -> u32 {
        self.size - 1
    }
}

impl Drop for XdpRing {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr, self.len);
        }
    }
}

/// Transmit-only AF_XDP socket bound to one queue of an interface.
///
/// The UMEM is carved into `NUM_FRAMES` buffers of `FRAME_SIZE` bytes that
/// cycle through the free list, the TX ring and the completion ring.
pub struct XdpSocket {
    // field order is drop order: unmap rings, close the socket, then free UMEM
    tx_ring: XdpRing,
    comp_ring: XdpRing,
    fd: OwnedFd,
    umem: Umem,
    free_frames: Vec<u64>,
    mac: MacAddress,
}

unsafe impl Send for XdpSocket {}

impl XdpSocket {
    pub fn new(iface: &str, queue_id: u32) -> Result<Self> {
        let mac = read_hw_address(iface)?;

        let if_name = CString::new(iface)?;
        let if_index = unsafe { libc::if_nametoindex(if_name.as_ptr()) };
        if if_index == 0 {
            bail!("Unknown interface {}", iface);
        }

        let umem = Umem::new(NUM_FRAMES * FRAME_SIZE)?;

        unsafe {
            // Creates the Raw AF_XDP Socket
            let raw = libc::socket(libc::AF_XDP, libc::SOCK_RAW, 0);
            if raw < 0 {
                return Err(anyhow!(
                    "Failed to create AF_XDP socket: {}",
                    io::Error::last_os_error()
                ));
            }
            let fd = OwnedFd::from_raw_fd(raw);

            // Registers UMEM with the Kernel
            let mr = XdpUmemReg {
                addr: umem.ptr as u64,
                len: umem.layout.size() as u64,
                chunk_size: FRAME_SIZE as u32,
                headroom: 0,
                flags: 0,
                tx_metadata_len: 0,
            };
            set_xdp_opt(raw, XDP_UMEM_REG, &mr).context("Failed to register UMEM")?;

            set_xdp_opt(raw, XDP_UMEM_FILL_RING, &FILL_RING_SIZE)
                .context("Failed to size fill ring")?;
            set_xdp_opt(raw, XDP_UMEM_COMPLETION_RING, &COMP_RING_SIZE)
                .context("Failed to size completion ring")?;
            set_xdp_opt(raw, XDP_TX_RING, &TX_RING_SIZE).context("Failed to size TX ring")?;

            // Get Offsets (Where exactly are the rings in the file descriptor)
            let mut off = XdpMmapOffsets::default();
            let mut optlen = mem::size_of::<XdpMmapOffsets>() as libc::socklen_t;
            if libc::getsockopt(
                raw,
                SOL_XDP,
                XDP_MMAP_OFFSETS,
                &mut off as *mut _ as *mut libc::c_void,
                &mut optlen,
            ) != 0
            {
                return Err(anyhow!(
                    "Failed to get ring offsets: {}",
                    io::Error::last_os_error()
                ));
            }

            let tx_ring = XdpRing::map(
                raw,
                &off.tx,
                TX_RING_SIZE,
                mem::size_of::<XdpDesc>(),
                XDP_PGOFF_TX_RING,
            )
            .context("Failed to map TX ring")?;
            let comp_ring = XdpRing::map(
                raw,
                &off.cr,
                COMP_RING_SIZE,
                mem::size_of::<u64>(),
                XDP_UMEM_PGOFF_COMPLETION_RING,
            )
            .context("Failed to map completion ring")?;

            // Binds the Socket
            let mut sa: libc::sockaddr_xdp = mem::zeroed();
            sa.sxdp_family = libc::AF_XDP as libc::sa_family_t;
            sa.sxdp_ifindex = if_index;
            sa.sxdp_queue_id = queue_id;

            // Try Zero-Copy (Flags=0), fallback to Copy Mode
            sa.sxdp_flags = 0;
            if let Err(e) = bind_xdp(raw, &sa) {
                debug!("Zero-copy bind failed ({}), retrying in copy mode", e);
                sa.sxdp_flags = XDP_COPY;
                bind_xdp(raw, &sa)
                    .with_context(|| format!("Failed to bind {} queue {}", iface, queue_id))?;
                info!("Bound {} queue {} in copy mode", iface, queue_id);
            } else {
                info!("Bound {} queue {} in driver mode", iface, queue_id);
            }

            // Every chunk starts in the free list, lowest offsets handed out first
            let free_frames = (0..NUM_FRAMES as u64)
                .rev()
                .map(|i| i * FRAME_SIZE as u64)
                .collect();

            Ok(XdpSocket {
                tx_ring,
                comp_ring,
                fd,
                umem,
                free_frames,
                mac,
            })
        }
    }

    /// Moves buffers the kernel has finished sending back into the free list.
    fn reclaim_completed(&mut self) -> u32 {
        let ring = &self.comp_ring;
        unsafe {
            let prod = (*ring.producer).load(Ordering::Acquire);
            let cons = (*ring.consumer).load(Ordering::Relaxed);
            let n = prod.wrapping_sub(cons).min(RECLAIM_BATCH);

            let descs = ring.desc as *const u64;
            for i in 0..n {
                let idx = cons.wrapping_add(i) & ring.mask();
                self.free_frames.push(ptr::read(descs.add(idx as usize)));
            }

            (*ring.consumer).store(cons.wrapping_add(n), Ordering::Release);
            n
        }
    }

    // Copy mode only drains the TX ring from inside sendto. EAGAIN, EBUSY
    // and ENOBUFS just mean the kernel is behind, so the result is ignored.
    fn kick(&self) {
        unsafe {
            libc::sendto(
                self.fd.as_raw_fd(),
                ptr::null(),
                0,
                libc::MSG_DONTWAIT,
                ptr::null(),
                0,
            );
        }
    }
}

impl TxPort for XdpSocket {
    fn mac_address(&self) -> MacAddress {
        self.mac
    }

    fn alloc_tx_buffer(&mut self) -> Option<TxBuffer> {
        if self.free_frames.is_empty() && self.reclaim_completed() == 0 {
            self.kick();
        }
        self.free_frames
            .pop()
            .map(|addr| TxBuffer::new(addr, FRAME_SIZE))
    }

    fn buffer_mut(&mut self, buf: &TxBuffer) -> &mut [u8] {
        let offset = buf.addr() as usize;
        debug_assert!(offset + buf.capacity() <= self.umem.layout.size());
        unsafe { std::slice::from_raw_parts_mut(self.umem.ptr.add(offset), buf.capacity()) }
    }

    fn send_burst(&mut self, bufs: &[TxBuffer]) -> usize {
        let ring = &mut self.tx_ring;

        let mut free = ring.size - ring.cached_prod.wrapping_sub(ring.cached_cons);
        if (free as usize) < bufs.len() {
            ring.cached_cons = unsafe { (*ring.consumer).load(Ordering::Acquire) };
            free = ring.size - ring.cached_prod.wrapping_sub(ring.cached_cons);
        }

        let n = bufs.len().min(free as usize);
        if n == 0 {
            return 0;
        }

        let descs = ring.desc as *mut XdpDesc;
        for (i, buf) in bufs[..n].iter().enumerate() {
            let idx = ring.cached_prod.wrapping_add(i as u32) & ring.mask();
            unsafe {
                ptr::write(
                    descs.add(idx as usize),
                    XdpDesc {
                        addr: buf.addr(),
                        len: buf.len() as u32,
                        options: 0,
                    },
                );
            }
        }

        ring.cached_prod = ring.cached_prod.wrapping_add(n as u32);
        unsafe { (*ring.producer).store(ring.cached_prod, Ordering::Release) };

        self.kick();
        n
    }

    fn release_buffer(&mut self, buf: TxBuffer) {
        self.free_frames.push(buf.addr());
    }
}

unsafe fn set_xdp_opt<T>(fd: RawFd, name: i32, value: &T) -> io::Result<()> {
    let ret = libc::setsockopt(
        fd,
        SOL_XDP,
        name,
        value as *const T as *const libc::c_void,
        mem::size_of::<T>() as libc::socklen_t,
    );
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

unsafe fn bind_xdp(fd: RawFd, sa: &libc::sockaddr_xdp) -> io::Result<()> {
    let ret = libc::bind(
        fd,
        sa as *const libc::sockaddr_xdp as *const libc::sockaddr,
        mem::size_of::<libc::sockaddr_xdp>() as libc::socklen_t,
    );
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Reads the interface's hardware address from sysfs.
fn read_hw_address(iface: &str) -> Result<MacAddress> {
    let path = format!("/sys/class/net/{}/address", iface);
    let text =
        std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path))?;
    parse_hw_address(&text).with_context(|| format!("Unexpected hardware address in {}", path))
}

// sysfs prints the address followed by a newline
fn parse_hw_address(text: &str) -> Result<MacAddress, AddressError> {
    text.trim().parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abi_sizes() {
        assert_eq!(mem::size_of::<XdpDesc>(), 16);
        assert_eq!(mem::size_of::<XdpUmemReg>(), 32);
        assert_eq!(mem::size_of::<XdpMmapOffsets>(), 128);
    }

    #[test]
    fn ring_sizes_are_powers_of_two() {
        for size in [TX_RING_SIZE, COMP_RING_SIZE, FILL_RING_SIZE] {
            assert!(size.is_power_of_two());
        }
        assert!(FRAME_SIZE.is_power_of_two());
        assert!(RECLAIM_BATCH < COMP_RING_SIZE);
    }

    #[test]
    fn pool_buffers_hold_a_frame() {
        assert!(blowtorch_common::TX_FRAME_LEN <= FRAME_SIZE);
    }

    #[test]
    fn parses_sysfs_address() {
        assert_eq!(
            parse_hw_address("00:00:00:00:00:00\n").unwrap(),
            MacAddress::default()
        );
        assert_eq!(
            parse_hw_address("0a:38:ca:f6:f3:20\n").unwrap().to_u64(),
            0x0a38caf6f320
        );
        assert!(parse_hw_address("\n").is_err());
    }

    #[test]
    fn missing_interface_is_an_error() {
        let err = read_hw_address("no-such-iface0").unwrap_err();
        assert!(err.to_string().contains("no-such-iface0"));
    }
}
