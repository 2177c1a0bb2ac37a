//! Mock collaborators for testing.
//!
//! [`MockHost`] stands in for the DSI host, [`MockClock`] for time and
//! [`ManualScheduler`] for the deferred-work facility, so panel logic can be
//! exercised without hardware and without waiting.

use crate::clock::Clock;
use crate::transport::{CtrlFlags, DsiHost, DsiMsg, MsgFlags, TransportError};
use crate::work::{Scheduler, Task};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// A message the host transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// DSI data type.
    pub dtype: u8,
    /// Transmitted bytes.
    pub payload: Vec<u8>,
    /// Message flags.
    pub flags: MsgFlags,
}

/// A controller-level read the host served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRecord {
    /// Opcode of the read command.
    pub opcode: Option<u8>,
    /// Message flags.
    pub flags: MsgFlags,
    /// Controller flags.
    pub ctrl_flags: CtrlFlags,
    /// Size of the receive buffer.
    pub rx_len: usize,
}

#[derive(Debug)]
struct FlashImage {
    pre_opcode: u8,
    fb_opcode: u8,
    passes: Vec<Vec<u8>>,
    pass: usize,
    address: usize,
    started: bool,
}

impl FlashImage {
    fn select(&mut self, payload: &[u8]) {
        let Some(addr) = payload.get(2..4) else {
            return;
        };
        self.address = usize::from(u16::from_be_bytes([addr[0], addr[1]]));
        if self.address == 0 {
            if self.started && self.pass + 1 < self.passes.len() {
                self.pass += 1;
            }
            self.started = true;
        }
    }

    fn byte(&self) -> u8 {
        self.passes
            .get(self.pass)
            .and_then(|image| image.get(self.address))
            .copied()
            .unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct HostState {
    sent: Vec<SentMessage>,
    reads: Vec<ReadRecord>,
    queued: HashMap<u8, VecDeque<Vec<u8>>>,
    registers: HashMap<u8, Vec<u8>>,
    flash: Option<FlashImage>,
    failing_transfers: u32,
    failing_reads: u32,
    fail_link: bool,
    clocks_on: bool,
    engine_on: bool,
    link_enables: u32,
}

/// A scripted DSI host.
///
/// Clones share state, so a test keeps one handle while the panel owns
/// another.
///
/// # Example
///
/// ```
/// use mipanel_core::{DsiHost, DsiMsg, MockHost, MsgFlags};
///
/// let mut host = MockHost::new();
/// let msg = DsiMsg { channel: 0, dtype: 0x39, tx: &[0x53, 0x28], flags: MsgFlags::empty() };
/// host.transfer(&msg).unwrap();
/// assert_eq!(host.sent_payloads(), vec![vec![0x53, 0x28]]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockHost {
    state: Arc<Mutex<HostState>>,
}

impl MockHost {
    /// A host with no registers and no failures.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer every read of `opcode` with `data`.
    pub fn set_register(&self, opcode: u8, data: Vec<u8>) {
        self.lock().registers.insert(opcode, data);
    }

    /// Answer the next read of `opcode` with `data`, ahead of any value set
    /// by [`set_register`](Self::set_register).
    pub fn queue_read(&self, opcode: u8, data: Vec<u8>) {
        self.lock().queued.entry(opcode).or_default().push_back(data);
    }

    /// Emulate the gamma flash window.
    ///
    /// A write whose opcode is `pre_opcode` selects the flash address from
    /// payload bytes 2..4 (big-endian); a read of `fb_opcode` then returns
    /// `[0, image[address]]`. Each time address 0 is selected again the next
    /// image in `passes` is used (the last one repeats).
    pub fn with_flash(&self, pre_opcode: u8, fb_opcode: u8, passes: Vec<Vec<u8>>) {
        self.lock().flash = Some(FlashImage {
            pre_opcode,
            fb_opcode,
            passes,
            pass: 0,
            address: 0,
            started: false,
        });
    }

    /// Fail the next `count` transfers.
    pub fn fail_transfers(&self, count: u32) {
        self.lock().failing_transfers = count;
    }

    /// Fail the next `count` controller reads.
    pub fn fail_reads(&self, count: u32) {
        self.lock().failing_reads = count;
    }

    /// Make link enable requests fail.
    pub fn fail_link(&self, fail: bool) {
        self.lock().fail_link = fail;
    }

    /// Every transmitted message, oldest first.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }

    /// Payloads of every transmitted message.
    pub fn sent_payloads(&self) -> Vec<Vec<u8>> {
        self.lock().sent.iter().map(|m| m.payload.clone()).collect()
    }

    /// Every served read, oldest first.
    pub fn reads(&self) -> Vec<ReadRecord> {
        self.lock().reads.clone()
    }

    /// Forget recorded traffic.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.sent.clear();
        state.reads.clear();
    }

    /// Whether both clocks and the command engine are on.
    pub fn link_on(&self) -> bool {
        let state = self.lock();
        state.clocks_on && state.engine_on
    }

    /// How many times the clocks were switched on.
    pub fn link_enables(&self) -> u32 {
        self.lock().link_enables
    }
}

impl DsiHost for MockHost {
    fn transfer(&mut self, msg: &DsiMsg<'_>) -> Result<usize, TransportError> {
        let mut state = self.lock();
        if state.failing_transfers > 0 {
            state.failing_transfers -= 1;
            return Err(TransportError::Transfer(-5));
        }
        if let Some(flash) = state.flash.as_mut() {
            if msg.tx.first() == Some(&flash.pre_opcode) {
                flash.select(msg.tx);
            }
        }
        state.sent.push(SentMessage {
            dtype: msg.dtype,
            payload: msg.tx.to_vec(),
            flags: msg.flags,
        });
        Ok(msg.tx.len())
    }

    fn ctrl_transfer(
        &mut self,
        msg: &DsiMsg<'_>,
        flags: CtrlFlags,
        rx: &mut [u8],
    ) -> Result<usize, TransportError> {
        let mut state = self.lock();
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(TransportError::Transfer(-5));
        }
        let opcode = msg.tx.first().copied();
        state.reads.push(ReadRecord {
            opcode,
            flags: msg.flags,
            ctrl_flags: flags,
            rx_len: rx.len(),
        });
        let Some(opcode) = opcode else {
            return Err(TransportError::NoResponse);
        };

        if let Some(flash) = state.flash.as_ref().filter(|f| f.fb_opcode == opcode) {
            let response = [0, flash.byte()];
            let n = response.len().min(rx.len());
            rx[..n].copy_from_slice(&response[..n]);
            return Ok(n);
        }

        let queued = state.queued.get_mut(&opcode).and_then(VecDeque::pop_front);
        let data = match queued {
            Some(data) => data,
            None => state
                .registers
                .get(&opcode)
                .cloned()
                .ok_or(TransportError::NoResponse)?,
        };
        let n = data.len().min(rx.len());
        rx[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn set_clocks(&mut self, on: bool) -> Result<(), TransportError> {
        let mut state = self.lock();
        if on && state.fail_link {
            return Err(TransportError::Link("clock enable refused".into()));
        }
        if on {
            state.link_enables += 1;
        }
        state.clocks_on = on;
        Ok(())
    }

    fn set_cmd_engine(&mut self, on: bool) -> Result<(), TransportError> {
        self.lock().engine_on = on;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ClockState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

/// Virtual time; [`sleep`](Clock::sleep) returns immediately and advances it.
#[derive(Debug)]
pub struct MockClock {
    base: Instant,
    state: Mutex<ClockState>,
}

impl MockClock {
    /// A clock frozen at the moment of creation.
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            state: Mutex::new(ClockState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move time forward without recording a sleep.
    pub fn advance(&self, by: Duration) {
        self.lock().elapsed += by;
    }

    /// Every requested sleep, oldest first.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.base + self.lock().elapsed
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.lock();
        state.elapsed += duration;
        state.sleeps.push(duration);
    }
}

/// Holds scheduled tasks until the test runs them.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<Vec<(Duration, Task)>>,
}

impl ManualScheduler {
    /// An empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(Duration, Task)>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of tasks waiting.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Requested delays of the waiting tasks.
    pub fn delays(&self) -> Vec<Duration> {
        self.lock().iter().map(|(delay, _)| *delay).collect()
    }

    /// Run every waiting task, oldest first. Returns how many ran.
    ///
    /// Tasks scheduled while running are kept for the next call.
    pub fn run_all(&self) -> usize {
        let tasks = std::mem::take(&mut *self.lock());
        let count = tasks.len();
        for (_, task) in tasks {
            task();
        }
        count
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) {
        self.lock().push((delay, task));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn msg(tx: &[u8]) -> DsiMsg<'_> {
        DsiMsg {
            channel: 0,
            dtype: 0x39,
            tx,
            flags: MsgFlags::empty(),
        }
    }

    #[test]
    fn test_register_reads() {
        let mut host = MockHost::new();
        host.set_register(0xA1, vec![1, 2, 3]);
        host.queue_read(0xA1, vec![9]);

        let mut rx = [0u8; 2];
        assert_eq!(host.ctrl_transfer(&msg(&[0xA1]), CtrlFlags::READ, &mut rx).unwrap(), 1);
        assert_eq!(rx, [9, 0]);
        assert_eq!(host.ctrl_transfer(&msg(&[0xA1]), CtrlFlags::READ, &mut rx).unwrap(), 2);
        assert_eq!(rx, [1, 2]);
        assert!(host.ctrl_transfer(&msg(&[0xA2]), CtrlFlags::READ, &mut rx).is_err());
        assert_eq!(host.reads().len(), 3);
    }

    #[test]
    fn test_flash_window_advances_passes() {
        let mut host = MockHost::new();
        host.with_flash(0xC1, 0xFB, vec![vec![10, 11], vec![20, 21]]);
        let mut rx = [0u8; 2];

        host.transfer(&msg(&[0xC1, 0x00, 0x00, 0x01])).unwrap();
        host.ctrl_transfer(&msg(&[0xFB]), CtrlFlags::READ, &mut rx).unwrap();
        assert_eq!(rx, [0, 11]);

        host.transfer(&msg(&[0xC1, 0x00, 0x00, 0x00])).unwrap();
        host.ctrl_transfer(&msg(&[0xFB]), CtrlFlags::READ, &mut rx).unwrap();
        assert_eq!(rx, [0, 10]);

        host.transfer(&msg(&[0xC1, 0x00, 0x00, 0x00])).unwrap();
        host.ctrl_transfer(&msg(&[0xFB]), CtrlFlags::READ, &mut rx).unwrap();
        assert_eq!(rx, [0, 20]);
    }

    #[test]
    fn test_clock_records_sleeps() {
        let clock = MockClock::new();
        let start = clock.now();
        clock.sleep(Duration::from_millis(80));
        clock.advance(Duration::from_millis(20));
        assert_eq!(clock.now() - start, Duration::from_millis(100));
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(80)]);
    }

    #[test]
    fn test_manual_scheduler() {
        let sched = ManualScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        sched.schedule(
            Duration::from_millis(100),
            Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(sched.delays(), vec![Duration::from_millis(100)]);
        assert_eq!(sched.run_all(), 1);
        assert_eq!(sched.run_all(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
