//! Transport adapter between command sets and the DSI host.
//!
//! The raw transfer primitive is the [`DsiHost`] trait; everything above it
//! (per-packet flag assembly, post-command delays, read gating, clock and
//! command-engine scoping) lives in [`Transport`].

use crate::clock::Clock;
use crate::command::{CmdSetState, Command, CommandSet};
use crate::error::PanelError;
use log::{debug, error, trace};
use std::ops::{BitOr, BitOrAssign, Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

/// Capacity of a [`ReadRequest`] response buffer.
pub const READ_BUF_CAPACITY: usize = 256;

// =============================================================================
// Flags
// =============================================================================

macro_rules! flag_set {
    ($(#[$meta:meta])* $name:ident { $($(#[$fmeta:meta])* $flag:ident = $bit:expr,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
        pub struct $name(u32);

        impl $name {
            $($(#[$fmeta])* pub const $flag: Self = Self($bit);)*

            /// No flags set.
            pub const fn empty() -> Self {
                Self(0)
            }

            /// Raw bit value.
            pub const fn bits(self) -> u32 {
                self.0
            }

            /// Whether every bit of `other` is set.
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }
    };
}

flag_set! {
    /// Per-message flags understood by the DSI host.
    MsgFlags {
        /// Send in low-power mode.
        USE_LPM = 1 << 0,
        /// Flush the batch after this message.
        LAST_COMMAND = 1 << 1,
    }
}

flag_set! {
    /// Flags for a controller-level transfer (used by reads).
    CtrlFlags {
        /// Flush after this command.
        LAST_COMMAND = 1 << 0,
        /// Fetch the command from memory (DMA).
        FETCH_MEMORY = 1 << 1,
        /// Expect a response.
        READ = 1 << 2,
        /// Use the custom DMA scheduling slot.
        CUSTOM_DMA_SCHED = 1 << 3,
    }
}

// =============================================================================
// Host primitive
// =============================================================================

/// Errors reported by the DSI host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The host rejected or failed the transfer.
    #[error("transfer failed (code {0})")]
    Transfer(i32),

    /// The peripheral did not answer a read.
    #[error("no response to read")]
    NoResponse,

    /// Clocks or the command engine could not be switched.
    #[error("link control failed: {0}")]
    Link(String),
}

/// One message handed to the host.
#[derive(Debug, Clone, Copy)]
pub struct DsiMsg<'a> {
    /// Virtual channel.
    pub channel: u8,
    /// DSI data type.
    pub dtype: u8,
    /// Bytes to transmit.
    pub tx: &'a [u8],
    /// Message flags.
    pub flags: MsgFlags,
}

/// The raw DSI transfer primitive provided by the platform.
pub trait DsiHost: Send {
    /// Transmit one message through the host's generic path.
    fn transfer(&mut self, msg: &DsiMsg<'_>) -> Result<usize, TransportError>;

    /// Issue one message directly on the controller, filling `rx` with the
    /// response when [`CtrlFlags::READ`] is set. Returns the number of bytes
    /// received.
    fn ctrl_transfer(
        &mut self,
        msg: &DsiMsg<'_>,
        flags: CtrlFlags,
        rx: &mut [u8],
    ) -> Result<usize, TransportError>;

    /// Switch the link clocks.
    fn set_clocks(&mut self, on: bool) -> Result<(), TransportError>;

    /// Switch the command engine.
    fn set_cmd_engine(&mut self, on: bool) -> Result<(), TransportError>;
}

// =============================================================================
// Read request
// =============================================================================

/// A command set to read with, the expected response length and a
/// fixed-capacity response buffer.
#[derive(Debug, Clone)]
pub struct ReadRequest {
    /// The command set; only its first command is issued.
    pub cmd: CommandSet,
    /// Expected response length.
    pub rlen: usize,
    /// Read intent; reads without it are refused.
    pub is_read: bool,
    rbuf: [u8; READ_BUF_CAPACITY],
    received: usize,
}

impl ReadRequest {
    /// A read of `rlen` bytes using `cmd`.
    pub fn new(cmd: CommandSet, rlen: usize) -> Self {
        Self {
            cmd,
            rlen,
            is_read: true,
            rbuf: [0; READ_BUF_CAPACITY],
            received: 0,
        }
    }

    /// The bytes received by the last read, at most `rlen`.
    pub fn data(&self) -> &[u8] {
        let end = self.received.min(self.rlen).min(READ_BUF_CAPACITY);
        &self.rbuf[..end]
    }

    /// Response bytes up to `rlen`, zero-filled past what was received.
    pub fn buffer(&self) -> &[u8] {
        &self.rbuf[..self.rlen.min(READ_BUF_CAPACITY)]
    }
}

impl Default for ReadRequest {
    fn default() -> Self {
        Self {
            cmd: CommandSet::default(),
            rlen: 0,
            is_read: false,
            rbuf: [0; READ_BUF_CAPACITY],
            received: 0,
        }
    }
}

// =============================================================================
// Transport adapter
// =============================================================================

/// Sends and reads command sets over a [`DsiHost`].
pub struct Transport<H> {
    host: H,
    clock: Arc<dyn Clock>,
    link_users: u32,
}

impl<H: DsiHost> Transport<H> {
    /// Wrap a host. `clock` provides inter-command delays.
    pub fn new(host: H, clock: Arc<dyn Clock>) -> Self {
        Self {
            host,
            clock,
            link_users: 0,
        }
    }

    /// The wrapped host.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// The wrapped host, mutably.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Whether a [`LinkGuard`] is currently alive.
    pub fn link_active(&self) -> bool {
        self.link_users > 0
    }

    fn msg_flags(set: &CommandSet, cmd: &Command, is_final: bool) -> MsgFlags {
        let mut flags = MsgFlags::empty();
        if set.state == CmdSetState::Lp {
            flags |= MsgFlags::USE_LPM;
        }
        if cmd.last_command || is_final {
            flags |= MsgFlags::LAST_COMMAND;
        }
        flags
    }

    /// Send every command of `set`, honouring per-command delays.
    ///
    /// Never retried here; the caller decides.
    ///
    /// # Errors
    /// The first [`TransportError`] reported by the host.
    pub fn send(&mut self, set: &CommandSet) -> Result<(), TransportError> {
        let last = set.cmds.len().saturating_sub(1);
        for (i, cmd) in set.cmds.iter().enumerate() {
            let msg = DsiMsg {
                channel: cmd.channel,
                dtype: cmd.dtype,
                tx: &cmd.payload,
                flags: Self::msg_flags(set, cmd, i == last),
            };
            if let Err(e) = self.host.transfer(&msg) {
                error!("failed to send cmd {} of {}: {}", i, set.cmds.len(), e);
                return Err(e);
            }
            if cmd.post_wait_ms > 0 {
                self.clock
                    .sleep(Duration::from_millis(u64::from(cmd.post_wait_ms)));
            }
        }
        Ok(())
    }

    /// Enable clocks and the command engine for the lifetime of the guard.
    ///
    /// Guards nest; the link is switched off when the outermost one drops.
    ///
    /// # Errors
    /// The host error if either switch fails; nothing is left enabled.
    pub fn link(&mut self) -> Result<LinkGuard<'_, H>, TransportError> {
        if self.link_users == 0 {
            self.host.set_clocks(true)?;
            if let Err(e) = self.host.set_cmd_engine(true) {
                error!("cmd engine enable failed: {}", e);
                if let Err(off) = self.host.set_clocks(false) {
                    error!("failed to disable clocks: {}", off);
                }
                return Err(e);
            }
        }
        self.link_users += 1;
        Ok(LinkGuard { transport: self })
    }

    fn release_link(&mut self) {
        self.link_users = self.link_users.saturating_sub(1);
        if self.link_users > 0 {
            return;
        }
        if let Err(e) = self.host.set_cmd_engine(false) {
            error!("failed to disable cmd engine: {}", e);
        }
        if let Err(e) = self.host.set_clocks(false) {
            error!("failed to disable clocks: {}", e);
        }
    }

    /// Issue the first command of `set` on the controller and read the
    /// response into `rx`, without touching clocks or the engine.
    ///
    /// # Errors
    /// [`PanelError::InvalidInput`] for an empty set, or the host error.
    pub fn ctrl_read(&mut self, set: &CommandSet, rx: &mut [u8]) -> Result<usize, PanelError> {
        let cmd = set
            .cmds
            .first()
            .ok_or_else(|| PanelError::InvalidInput("no commands to read with".into()))?;

        let mut ctrl = CtrlFlags::FETCH_MEMORY | CtrlFlags::READ | CtrlFlags::CUSTOM_DMA_SCHED;
        let mut flags = MsgFlags::empty();
        if set.state == CmdSetState::Lp {
            flags |= MsgFlags::USE_LPM;
        }
        if cmd.last_command {
            flags |= MsgFlags::LAST_COMMAND;
            ctrl |= CtrlFlags::LAST_COMMAND;
        }
        let msg = DsiMsg {
            channel: cmd.channel,
            dtype: cmd.dtype,
            tx: &cmd.payload,
            flags,
        };

        rx.fill(0);
        let received = self.host.ctrl_transfer(&msg, ctrl, rx)?;
        if received == 0 {
            return Err(TransportError::NoResponse.into());
        }
        Ok(received.min(rx.len()))
    }

    /// Read `req.rlen` bytes with the first command of `req.cmd`.
    ///
    /// The link is enabled for the duration of the read.
    ///
    /// # Errors
    /// - [`PanelError::NotReady`] if `initialized` is false
    /// - [`PanelError::PermissionDenied`] if `req.is_read` is false
    /// - [`PanelError::InvalidInput`] if `req.rlen` exceeds [`READ_BUF_CAPACITY`]
    /// - [`PanelError::Transport`] if the transfer fails
    pub fn read(&mut self, req: &mut ReadRequest, initialized: bool) -> Result<usize, PanelError> {
        if !initialized {
            debug!("read refused: panel not initialized");
            return Err(PanelError::NotReady);
        }
        if !req.is_read {
            debug!("read operation was not permitted");
            return Err(PanelError::PermissionDenied);
        }
        if req.rlen > READ_BUF_CAPACITY {
            return Err(PanelError::InvalidInput(format!(
                "read size {} exceeds the limit {}",
                req.rlen, READ_BUF_CAPACITY
            )));
        }

        let mut link = self.link()?;
        req.received = 0;
        let rlen = req.rlen;
        let received = link.ctrl_read(&req.cmd, &mut req.rbuf[..rlen])?;
        req.received = received;

        for (i, b) in req.data().iter().enumerate() {
            trace!("[{}] = 0x{:02X}", i, b);
        }
        Ok(received)
    }
}

/// Keeps the link clocks and command engine on while alive.
pub struct LinkGuard<'a, H: DsiHost> {
    transport: &'a mut Transport<H>,
}

impl<H: DsiHost> Deref for LinkGuard<'_, H> {
    type Target = Transport<H>;

    fn deref(&self) -> &Transport<H> {
        self.transport
    }
}

impl<H: DsiHost> DerefMut for LinkGuard<'_, H> {
    fn deref_mut(&mut self) -> &mut Transport<H> {
        self.transport
    }
}

impl<H: DsiHost> Drop for LinkGuard<'_, H> {
    fn drop(&mut self) {
        self.transport.release_link();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockClock, MockHost};

    fn transport() -> (Transport<MockHost>, MockHost, Arc<MockClock>) {
        let host = MockHost::new();
        let clock = Arc::new(MockClock::new());
        (Transport::new(host.clone(), clock.clone()), host, clock)
    }

    fn two_cmd_set(state: CmdSetState) -> CommandSet {
        let mut first = Command::dcs_write(vec![0xF0, 0x5A]);
        first.last_command = false;
        first.post_wait_ms = 5;
        CommandSet::new(state, vec![first, Command::dcs_write(vec![0x53, 0x28])])
    }

    #[test]
    fn test_send_applies_flags_and_delays() {
        let (mut t, host, clock) = transport();
        t.send(&two_cmd_set(CmdSetState::Lp)).unwrap();

        let sent = host.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].flags.contains(MsgFlags::USE_LPM));
        assert!(!sent[0].flags.contains(MsgFlags::LAST_COMMAND));
        assert!(sent[1].flags.contains(MsgFlags::LAST_COMMAND));
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(5)]);

        t.send(&two_cmd_set(CmdSetState::Hs)).unwrap();
        assert!(!host.sent()[2].flags.contains(MsgFlags::USE_LPM));
    }

    #[test]
    fn test_send_stops_on_first_failure() {
        let (mut t, host, _clock) = transport();
        host.fail_transfers(1);
        assert!(t.send(&two_cmd_set(CmdSetState::Lp)).is_err());
        assert!(host.sent().is_empty());
    }

    #[test]
    fn test_read_gating() {
        let (mut t, host, _clock) = transport();
        host.set_register(0xDA, vec![0x11, 0x22]);
        let set = CommandSet::new(
            CmdSetState::Lp,
            vec![Command::dcs_write(vec![0xDA])],
        );

        let mut req = ReadRequest::new(set, 2);
        assert!(matches!(t.read(&mut req, false), Err(PanelError::NotReady)));

        req.is_read = false;
        assert!(matches!(t.read(&mut req, true), Err(PanelError::PermissionDenied)));

        req.is_read = true;
        assert_eq!(t.read(&mut req, true).unwrap(), 2);
        assert_eq!(req.data(), &[0x11, 0x22]);

        let reads = host.reads();
        assert_eq!(reads.len(), 1);
        assert!(reads[0].ctrl_flags.contains(
            CtrlFlags::READ | CtrlFlags::FETCH_MEMORY | CtrlFlags::CUSTOM_DMA_SCHED
        ));
        assert!(!host.link_on());
        assert_eq!(host.link_enables(), 1);
    }

    #[test]
    fn test_link_released_when_read_fails() {
        let (mut t, host, _clock) = transport();
        let set = CommandSet::new(CmdSetState::Lp, vec![Command::dcs_write(vec![0xDB])]);
        let mut req = ReadRequest::new(set, 4);

        assert!(matches!(
            t.read(&mut req, true),
            Err(PanelError::Transport(TransportError::NoResponse))
        ));
        assert!(!host.link_on());
        assert!(!t.link_active());
    }

    #[test]
    fn test_link_guards_nest() {
        let (mut t, host, _clock) = transport();
        {
            let mut outer = t.link().unwrap();
            {
                let _inner = outer.link().unwrap();
                assert!(host.link_on());
            }
            assert!(host.link_on());
        }
        assert!(!host.link_on());
        assert_eq!(host.link_enables(), 1);
    }
}
