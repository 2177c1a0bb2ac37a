//! Control core for MIPI DSI command-mode display panels.
//!
//! This crate drives the vendor feature set of OLED panels behind a DSI host:
//! high brightness and fingerprint (FOD) modes, always-on display (AOD)
//! brightness, DC dimming, and per-unit gamma calibration read from OTP and
//! flash.
//!
//! Every panel is described by a [`PanelConfig`] (loaded from JSON) holding
//! the command sets of each display mode. A [`MiPanel`] owns the command
//! catalog, the calibration tables and the control state behind one lock,
//! and talks to hardware through the [`DsiHost`] trait.
//!
//! # Example
//!
//! ```no_run
//! use mipanel_core::{MiPanel, PanelConfig, PowerMode};
//! # use mipanel_core::MockHost as MyDsiHost;
//!
//! fn bring_up(host: MyDsiHost) -> Result<(), mipanel_core::PanelError> {
//!     let cfg = PanelConfig::load("panels/j11.json")?;
//!     let panel = MiPanel::new(cfg, host)?;
//!
//!     panel.on_panel_enabled();
//!     panel.acquire_gamma()?;
//!     panel.update_gamma_param()?;
//!
//!     // Fingerprint HBM on, then off.
//!     panel.set_disp_param(0x000A_0000)?;
//!     panel.set_disp_param(0x000B_0000)?;
//!
//!     panel.set_power_mode(PowerMode::Lp1);
//!     Ok(())
//! }
//! ```
//!
//! # Testing
//!
//! Use [`MockHost`], [`MockClock`] and [`ManualScheduler`] to exercise panel
//! logic without hardware:
//!
//! ```
//! use std::sync::Arc;
//! use mipanel_core::{ManualScheduler, MiPanel, MockClock, MockHost, PanelConfig};
//!
//! let cfg = PanelConfig::from_json(r#"{ "modes": [{ "refresh_rate": 60, "command_sets": {
//!     "acl_off": { "commands": "39 01 00 00 00 00 02 55 00" } } }] }"#).unwrap();
//! let host = MockHost::new();
//! let panel = MiPanel::with_runtime(
//!     cfg,
//!     host.clone(),
//!     Arc::new(MockClock::new()),
//!     Arc::new(ManualScheduler::new()),
//! ).unwrap();
//!
//! panel.set_initialized(true);
//! assert!(panel.set_disp_param(0xF000).unwrap().is_ok());
//! assert_eq!(host.sent_payloads(), vec![vec![0x55, 0x00]]);
//! ```

#![warn(missing_docs)]

mod acquisition;
mod calibration;
mod catalog;
mod clock;
mod command;
mod config;
mod diag;
mod dispatch;
mod error;
mod mock;
mod panel;
mod param;
mod patch;
mod state;
mod transport;
mod work;

// Re-export public API
pub use acquisition::{DC_READ_ATTEMPTS, FLASH_READ_ATTEMPTS, FLASH_RETRY_DELAY};
pub use calibration::{
    CalibrationTable, DcCalibration, GammaCalibration, byte_sum, derive_enter_lut,
};
pub use catalog::{CommandCatalog, ModeCatalog, PatchSite};
pub use clock::{Clock, SystemClock};
pub use command::{
    CmdSetId, CmdSetState, Command, CommandSet, DTYPE_DCS_LWRITE, DTYPE_DCS_READ,
    parse_hex_bytes,
};
pub use config::{
    CommandSetConfig, DC_LUT_BLOCK, DcConfig, ElvssDimmingConfig, FodDimlayerConfig, GammaConfig,
    GreenishGammaConfig, Hbm51Config, MAX_GREENISH_PARAMS, ModeConfig, PanelConfig,
    WhitePointConfig,
};
pub use dispatch::{DispParamReport, FieldResult};
pub use error::PanelError;
pub use mock::{ManualScheduler, MockClock, MockHost, ReadRecord, SentMessage};
pub use panel::{AOD_BACKLIGHT_HBM, AOD_BACKLIGHT_LBM, MiPanel};
pub use param::{
    AclParam, CabcParam, CeParam, ColorParam, CrcParam, DispAction, DispParam,
    FOD_BACKLIGHT_MASK, FOD_BACKLIGHT_RESTORE, FlagParam, HbmParam,
};
pub use patch::{
    OPCODE_BRIGHTNESS, OPCODE_PULSE, brightness_bytes, check_site, patch_from_calibration,
    subtract_offset,
};
pub use state::{DozeBrightness, PanelMiState, PanelMode, PanelSnapshot, PowerMode, SkipDimming};
pub use transport::{
    CtrlFlags, DsiHost, DsiMsg, LinkGuard, MsgFlags, READ_BUF_CAPACITY, ReadRequest, Transport,
    TransportError,
};
pub use work::{DelayedSlot, Scheduler, Task, ThreadScheduler};
