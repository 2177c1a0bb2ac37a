//! The panel object.
//!
//! [`MiPanel`] owns every piece of mutable panel state behind one lock, so at
//! most one command sequence is in flight per panel. Deferred work (AOD
//! entry, panel-on dimming) is handed to a [`Scheduler`] and re-enters
//! through the same lock.

use crate::calibration::{DcCalibration, GammaCalibration};
use crate::catalog::CommandCatalog;
use crate::clock::{Clock, SystemClock};
use crate::command::{CmdSetId, CmdSetState, Command, CommandSet};
use crate::config::PanelConfig;
use crate::dispatch::DispParamReport;
use crate::error::PanelError;
use crate::param::CabcParam;
use crate::patch::OPCODE_BRIGHTNESS;
use crate::state::{DozeBrightness, PanelMiState, PanelSnapshot, PowerMode, SkipDimming};
use crate::transport::{DsiHost, ReadRequest, Transport};
use crate::work::{DelayedSlot, Scheduler, ThreadScheduler};
use log::{debug, error, info};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

/// Backlight reported while dozing at high brightness.
pub const AOD_BACKLIGHT_HBM: u32 = 170;
/// Backlight reported while dozing at low brightness.
pub const AOD_BACKLIGHT_LBM: u32 = 10;

// =============================================================================
// Deferred work
// =============================================================================

/// Work an operation asks to run later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Deferred {
    /// Enter AOD unless the ticket was cancelled by FOD-HBM on.
    AodEntry { ticket: u64, delay: Duration },
    /// Send dimming-on after the panel came up.
    PanelOnDimming { ticket: u64, delay: Duration },
}

impl Deferred {
    fn delay(self) -> Duration {
        match self {
            Deferred::AodEntry { delay, .. } | Deferred::PanelOnDimming { delay, .. } => delay,
        }
    }
}

// =============================================================================
// Locked state
// =============================================================================

/// Everything guarded by the panel lock.
pub(crate) struct PanelInner<H> {
    pub(crate) cfg: PanelConfig,
    pub(crate) catalog: CommandCatalog,
    pub(crate) transport: Transport<H>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) mi: PanelMiState,
    pub(crate) initialized: bool,
    pub(crate) power_mode: PowerMode,
    pub(crate) gamma: Option<GammaCalibration>,
    pub(crate) gamma_switch_60hz: Option<CommandSet>,
    pub(crate) gamma_switch_90hz: Option<CommandSet>,
    pub(crate) dc: Option<DcCalibration>,
    pub(crate) greenish_done: bool,
    pub(crate) scratch: ReadRequest,
    pub(crate) aod_entry: DelayedSlot,
    pub(crate) panel_on_dimming: DelayedSlot,
    pub(crate) alpha_lut: Vec<(u32, u32)>,
    pub(crate) followups: Vec<Deferred>,
}

impl<H: DsiHost> PanelInner<H> {
    fn new(cfg: PanelConfig, host: H, clock: Arc<dyn Clock>) -> Result<Self, PanelError> {
        let catalog = cfg.build_catalog()?;
        let alpha_lut = match &cfg.fod_dimlayer {
            Some(dim) => dim.pairs()?,
            None => Vec::new(),
        };
        Ok(Self {
            gamma: cfg.gamma.as_ref().map(GammaCalibration::new),
            dc: cfg.dc.as_ref().map(DcCalibration::new),
            transport: Transport::new(host, clock.clone()),
            catalog,
            clock,
            mi: PanelMiState::default(),
            initialized: false,
            power_mode: PowerMode::Off,
            gamma_switch_60hz: None,
            gamma_switch_90hz: None,
            greenish_done: false,
            scratch: ReadRequest::default(),
            aod_entry: DelayedSlot::default(),
            panel_on_dimming: DelayedSlot::default(),
            alpha_lut,
            followups: Vec::new(),
            cfg,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.cfg.name
    }

    /// Send a configured set from the active mode.
    pub(crate) fn send(&mut self, id: CmdSetId) -> Result<(), PanelError> {
        let set = self.catalog.get_command_set(id)?;
        if let Err(e) = self.transport.send(set) {
            error!("[{}] failed to send {}: {}", self.cfg.name, id, e);
            return Err(e.into());
        }
        debug!("[{}] sent {}", self.cfg.name, id);
        Ok(())
    }

    /// Read `rlen` bytes with a configured set from the active mode.
    pub(crate) fn read_set(&mut self, id: CmdSetId, rlen: usize) -> Result<ReadRequest, PanelError> {
        let mut req = ReadRequest::new(self.catalog.get_command_set(id)?.clone(), rlen);
        if let Err(e) = self.transport.read(&mut req, self.initialized) {
            error!("[{}] failed to read {}: {}", self.cfg.name, id, e);
            return Err(e);
        }
        debug!("[{}] {} -> {:02X?}", self.cfg.name, id, req.data());
        Ok(req)
    }

    /// Write a backlight level with a DCS brightness command.
    pub(crate) fn update_backlight(&mut self, level: u32) -> Result<(), PanelError> {
        let level = level.min(self.cfg.bl_max_level).min(u32::from(u16::MAX));
        let [hi, lo] = (level as u16).to_be_bytes();
        let payload = if self.cfg.bl_big_endian {
            vec![OPCODE_BRIGHTNESS, hi, lo]
        } else {
            vec![OPCODE_BRIGHTNESS, lo, hi]
        };
        let set = CommandSet::new(CmdSetState::Lp, vec![Command::dcs_write(payload)]);
        self.transport.send(&set).map_err(|e| {
            error!("[{}] failed to update backlight {}: {}", self.cfg.name, level, e);
            PanelError::from(e)
        })?;
        debug!("[{}] backlight {}", self.cfg.name, level);
        Ok(())
    }

    pub(crate) fn set_backlight(&mut self, level: u32) -> Result<(), PanelError> {
        if !self.initialized {
            return Err(PanelError::NotReady);
        }
        self.mi.last_bl_level = level;
        if self.mi.fod_hbm_enabled {
            debug!("[{}] fod hbm active, backlight {} deferred", self.cfg.name, level);
            return Ok(());
        }
        self.update_backlight(level)
    }

    pub(crate) fn set_doze_brightness(&mut self, doze: DozeBrightness) -> Result<(), PanelError> {
        if !self.initialized {
            self.mi.unset_doze_brightness = doze;
            info!("[{}] panel not initialized, save unset doze brightness {}", self.cfg.name, doze);
            return Ok(());
        }

        if self.mi.fod_hbm_enabled {
            self.mi.unset_doze_brightness = doze;
            if doze == DozeBrightness::ToNormal {
                self.mi.doze_brightness_state = DozeBrightness::ToNormal;
                self.mi.skip_dimming = SkipDimming::Block;
            }
            info!("[{}] fod hbm active, save unset doze brightness {}", self.cfg.name, doze);
            return Ok(());
        }

        if !self.mi.in_aod {
            self.mi.unset_doze_brightness = doze;
            if doze != DozeBrightness::ToNormal {
                info!("[{}] not in doze, save unset doze brightness {}", self.cfg.name, doze);
            }
            return Ok(());
        }

        if self.mi.doze_brightness_state == doze
            && self.mi.unset_doze_brightness == DozeBrightness::ToNormal
        {
            info!("[{}] {} already set, skip", self.cfg.name, doze);
            return Ok(());
        }

        let unset = self.mi.unset_doze_brightness;
        let mut result = Ok(());
        if self.mi.sysfs_fod_unlock_success && doze != DozeBrightness::ToNormal {
            info!("[{}] fingerprint unlocked, skip doze brightness", self.cfg.name);
        } else if doze == DozeBrightness::Hbm || unset == DozeBrightness::Hbm {
            result = self.send(CmdSetId::DozeHbm);
            self.mi.aod_backlight = AOD_BACKLIGHT_HBM;
        } else if doze == DozeBrightness::Lbm || unset == DozeBrightness::Lbm {
            result = self.send(CmdSetId::DozeLbm);
            self.mi.aod_backlight = AOD_BACKLIGHT_LBM;
        }

        self.mi.skip_dimming = SkipDimming::Block;
        self.mi.unset_doze_brightness = DozeBrightness::ToNormal;
        self.mi.doze_brightness_state = doze;
        info!("[{}] doze brightness set to {}", self.cfg.name, doze);
        result
    }

    /// Body of the deferred AOD entry.
    pub(crate) fn enter_aod(&mut self) -> Result<(), PanelError> {
        if !self.initialized || !self.power_mode.is_doze() {
            return Ok(());
        }
        if self.mi.fod_unlocked() {
            info!(
                "[{}] fingerprint unlocked ({}, {}), skip aod entry",
                self.cfg.name, self.mi.layer_fod_unlock_success, self.mi.sysfs_fod_unlock_success
            );
            return Ok(());
        }
        if self.mi.unset_doze_brightness == DozeBrightness::ToNormal {
            self.mi.unset_doze_brightness = self.mi.doze_brightness_state;
        }
        info!("[{}] deferred aod entry, set doze brightness", self.cfg.name);
        let target = self.mi.unset_doze_brightness;
        self.set_doze_brightness(target)
    }

    pub(crate) fn schedule_aod_entry(&mut self) {
        let ticket = self.aod_entry.arm();
        let delay = Duration::from_millis(self.cfg.aod_enter_delay_ms);
        info!("[{}] aod entry scheduled in {:?}", self.cfg.name, delay);
        self.followups.push(Deferred::AodEntry { ticket, delay });
    }

    pub(crate) fn set_power_mode(&mut self, mode: PowerMode) {
        info!("[{}] power mode {:?} -> {:?}", self.cfg.name, self.power_mode, mode);
        self.power_mode = mode;
        self.mi.in_aod = mode.is_doze();
    }

    fn reinitialize(&mut self) {
        if let Some(gamma) = self.gamma.as_mut() {
            gamma.reset();
        }
        if let Some(dc) = self.dc.as_mut() {
            dc.reset();
        }
        self.gamma_switch_60hz = None;
        self.gamma_switch_90hz = None;
        self.greenish_done = false;
        self.aod_entry.cancel();
        self.panel_on_dimming.cancel();
        self.mi = PanelMiState::default();
        self.scratch = ReadRequest::default();
        info!("[{}] calibration and control state reset", self.cfg.name);
    }

    fn fod_dimlayer_alpha(&self, brightness: u32) -> Option<u32> {
        let lut = &self.alpha_lut;
        let first = lut.first()?;
        let Some(pos) = lut.iter().position(|&(b, _)| b >= brightness) else {
            return lut.last().map(|&(_, a)| a);
        };
        if pos == 0 {
            return Some(first.1);
        }
        let (b0, a0) = lut[pos - 1];
        let (b1, a1) = lut[pos];
        let span = i64::from(b1) - i64::from(b0);
        let alpha = i64::from(a0)
            + (i64::from(a1) - i64::from(a0)) * (i64::from(brightness) - i64::from(b0)) / span;
        u32::try_from(alpha).ok()
    }

    fn snapshot(&self) -> PanelSnapshot {
        PanelSnapshot {
            name: self.cfg.name.clone(),
            initialized: self.initialized,
            power_mode: self.power_mode,
            refresh_rate: self.catalog.current().map_or(0, |m| m.refresh_rate),
            mi: self.mi.clone(),
            aod_entry_pending: self.aod_entry.is_pending(),
        }
    }
}

fn lock<H>(inner: &Mutex<PanelInner<H>>) -> MutexGuard<'_, PanelInner<H>> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn schedule_all<H: DsiHost + 'static>(
    inner: &Arc<Mutex<PanelInner<H>>>,
    scheduler: &Arc<dyn Scheduler>,
    jobs: Vec<Deferred>,
) {
    for job in jobs {
        let weak: Weak<Mutex<PanelInner<H>>> = Arc::downgrade(inner);
        let sched = scheduler.clone();
        scheduler.schedule(
            job.delay(),
            Box::new(move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let more = {
                    let mut guard = lock(&inner);
                    run_deferred(&mut guard, job);
                    std::mem::take(&mut guard.followups)
                };
                schedule_all(&inner, &sched, more);
            }),
        );
    }
}

fn run_deferred<H: DsiHost>(inner: &mut PanelInner<H>, job: Deferred) {
    match job {
        Deferred::AodEntry { ticket, .. } => {
            if !inner.aod_entry.claim(ticket) {
                debug!("[{}] aod entry cancelled", inner.name());
                return;
            }
            if let Err(e) = inner.enter_aod() {
                error!("[{}] deferred aod entry failed: {}", inner.name(), e);
            }
        }
        Deferred::PanelOnDimming { ticket, .. } => {
            if !inner.panel_on_dimming.claim(ticket) {
                return;
            }
            match inner.set_disp_param(CabcParam::DimmingOn.word()) {
                Ok(report) if !report.is_ok() => {
                    error!("[{}] panel-on dimming failed: {}", inner.name(), report);
                }
                Ok(_) => {}
                Err(e) => error!("[{}] panel-on dimming failed: {}", inner.name(), e),
            }
        }
    }
}

// =============================================================================
// Public panel handle
// =============================================================================

/// A display panel driven over a [`DsiHost`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use mipanel_core::{ManualScheduler, MiPanel, MockClock, MockHost, PanelConfig};
///
/// let cfg = PanelConfig::from_json(r#"{ "modes": [{ "refresh_rate": 60, "command_sets": {
///     "hbm_on": { "commands": "39 01 00 00 00 00 02 53 E0" } } }] }"#).unwrap();
/// let host = MockHost::new();
/// let panel = MiPanel::with_runtime(
///     cfg,
///     host.clone(),
///     Arc::new(MockClock::new()),
///     Arc::new(ManualScheduler::new()),
/// ).unwrap();
///
/// panel.set_initialized(true);
/// panel.set_disp_param(0x10000).unwrap();
/// assert_eq!(host.sent_payloads(), vec![vec![0x53, 0xE0]]);
/// assert!(panel.state().mi.hbm_enabled);
/// ```
pub struct MiPanel<H: DsiHost + 'static> {
    inner: Arc<Mutex<PanelInner<H>>>,
    scheduler: Arc<dyn Scheduler>,
}

impl<H: DsiHost + 'static> MiPanel<H> {
    /// A panel using the system clock and one thread per deferred task.
    ///
    /// # Errors
    /// [`PanelError::Config`] if the command sets cannot be decoded.
    pub fn new(cfg: PanelConfig, host: H) -> Result<Self, PanelError> {
        Self::with_runtime(cfg, host, Arc::new(SystemClock), Arc::new(ThreadScheduler))
    }

    /// A panel with an explicit clock and scheduler.
    ///
    /// # Errors
    /// [`PanelError::Config`] if the configuration fails
    /// [`PanelConfig::validate`] or the command sets cannot be decoded.
    pub fn with_runtime(
        mut cfg: PanelConfig,
        host: H,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, PanelError> {
        cfg.validate()?;
        let inner = PanelInner::new(cfg, host, clock)?;
        info!(
            "[{}] panel created with {} display modes",
            inner.cfg.name,
            inner.catalog.modes().len()
        );
        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
            scheduler,
        })
    }

    /// Run `f` with the panel lock held, then hand any deferred work to the
    /// scheduler.
    fn with_inner<R>(&self, f: impl FnOnce(&mut PanelInner<H>) -> R) -> R {
        let (result, jobs) = {
            let mut inner = lock(&self.inner);
            let result = f(&mut inner);
            (result, std::mem::take(&mut inner.followups))
        };
        schedule_all(&self.inner, &self.scheduler, jobs);
        result
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Mark the panel as (not) initialized.
    ///
    /// Clearing it drops any pending deferred work.
    pub fn set_initialized(&self, initialized: bool) {
        self.with_inner(|inner| {
            inner.initialized = initialized;
            if !initialized {
                inner.aod_entry.cancel();
                inner.panel_on_dimming.cancel();
            }
        });
    }

    /// The panel finished its power-on sequence.
    ///
    /// Marks it initialized and powered on, and schedules the panel-on
    /// dimming when `panel_on_dimming_delay_ms` is set.
    pub fn on_panel_enabled(&self) {
        self.with_inner(|inner| {
            inner.initialized = true;
            inner.set_power_mode(PowerMode::On);
            let delay_ms = inner.cfg.panel_on_dimming_delay_ms;
            if delay_ms > 0 {
                let ticket = inner.panel_on_dimming.arm();
                inner.followups.push(Deferred::PanelOnDimming {
                    ticket,
                    delay: Duration::from_millis(delay_ms),
                });
            }
        });
    }

    /// Record a power mode change; the doze modes mark the panel as in AOD.
    pub fn set_power_mode(&self, mode: PowerMode) {
        self.with_inner(|inner| inner.set_power_mode(mode));
    }

    /// Forget calibration data and reset the control state.
    pub fn reinitialize(&self) {
        self.with_inner(PanelInner::reinitialize);
    }

    /// Make the mode running at `refresh_rate` the active one.
    ///
    /// # Errors
    /// [`PanelError::InvalidInput`] if no mode runs at that rate.
    pub fn select_refresh_rate(&self, refresh_rate: u32) -> Result<(), PanelError> {
        self.with_inner(|inner| {
            if inner.catalog.select_refresh_rate(refresh_rate) {
                info!("[{}] active mode {}Hz", inner.cfg.name, refresh_rate);
                Ok(())
            } else {
                Err(PanelError::InvalidInput(format!("no {refresh_rate}Hz mode")))
            }
        })
    }

    // -------------------------------------------------------------------------
    // Parameters and brightness
    // -------------------------------------------------------------------------

    /// Apply a display parameter word.
    ///
    /// Each recognized field is dispatched independently; the report holds
    /// one result per field.
    ///
    /// # Errors
    /// - [`PanelError::FeatureDisabled`] if parameter dispatch is disabled
    /// - [`PanelError::NotReady`] if the panel is not initialized and the word
    ///   is not one of the exempt fingerprint words
    pub fn set_disp_param(&self, word: u32) -> Result<DispParamReport, PanelError> {
        self.with_inner(|inner| inner.set_disp_param(word))
    }

    /// Set the backlight level.
    ///
    /// The level is always recorded; it is written unless FOD-HBM is active.
    ///
    /// # Errors
    /// [`PanelError::NotReady`] before initialization, or a transport error.
    pub fn set_backlight(&self, level: u32) -> Result<(), PanelError> {
        self.with_inner(|inner| inner.set_backlight(level))
    }

    /// Request a doze brightness; applied now when dozing, otherwise remembered.
    ///
    /// # Errors
    /// A transport error if the doze command fails.
    pub fn set_doze_brightness(&self, doze: DozeBrightness) -> Result<(), PanelError> {
        self.with_inner(|inner| inner.set_doze_brightness(doze))
    }

    /// The doze brightness currently applied.
    pub fn doze_brightness(&self) -> DozeBrightness {
        lock(&self.inner).mi.doze_brightness_state
    }

    /// Record a fingerprint unlock reported by the display layer.
    pub fn set_layer_fod_unlock(&self, success: bool) {
        self.with_inner(|inner| inner.mi.layer_fod_unlock_success = success);
    }

    /// Dim-layer alpha for `brightness`, interpolated from the configured
    /// table. `None` when the dim layer is not configured.
    pub fn fod_dimlayer_alpha(&self, brightness: u32) -> Option<u32> {
        lock(&self.inner).fod_dimlayer_alpha(brightness)
    }

    // -------------------------------------------------------------------------
    // Calibration
    // -------------------------------------------------------------------------

    /// Read the OTP and flash gamma tables.
    ///
    /// # Errors
    /// See [`PanelError`]; [`PanelError::ChecksumMismatch`] once the flash
    /// retries are exhausted.
    pub fn acquire_gamma(&self) -> Result<(), PanelError> {
        self.with_inner(|inner| inner.acquire_gamma())
    }

    /// Patch the gamma tables into the 60 Hz and 90 Hz timing-switch sets.
    ///
    /// # Errors
    /// [`PanelError::TableNotReady`] before [`acquire_gamma`](Self::acquire_gamma),
    /// otherwise the first patch error (other modes are still updated).
    pub fn update_gamma_param(&self) -> Result<(), PanelError> {
        self.with_inner(|inner| inner.update_gamma_param())
    }

    /// Send the gamma-switch set for `refresh_rate` (60 or 90).
    ///
    /// Returns `false` without sending until both rates were updated.
    ///
    /// # Errors
    /// [`PanelError::InvalidInput`] for other rates, or a transport error.
    pub fn switch_gamma(&self, refresh_rate: u32) -> Result<bool, PanelError> {
        self.with_inner(|inner| inner.switch_gamma(refresh_rate))
    }

    /// Dump the gamma tables.
    ///
    /// # Errors
    /// [`PanelError::FeatureDisabled`] or [`PanelError::TableNotReady`].
    pub fn gamma_report(&self) -> Result<String, PanelError> {
        lock(&self.inner).gamma_report()
    }

    /// Read the DC dimming lookup tables.
    ///
    /// # Errors
    /// See [`PanelError`]; [`PanelError::ChecksumMismatch`] once the retries
    /// are exhausted.
    pub fn acquire_dc_lut(&self) -> Result<(), PanelError> {
        self.with_inner(|inner| inner.acquire_dc_lut())
    }

    /// Patch the DC tables into `dc_on` / `dc_off` of every mode.
    ///
    /// # Errors
    /// [`PanelError::TableNotReady`] before [`acquire_dc_lut`](Self::acquire_dc_lut),
    /// otherwise the first patch error.
    pub fn update_dc_param(&self) -> Result<(), PanelError> {
        self.with_inner(|inner| inner.update_dc_param())
    }

    /// Read the ELVSS dimming offset and patch it into the FOD-HBM sets.
    ///
    /// # Errors
    /// See [`PanelError`].
    pub fn update_elvss_dimming(&self) -> Result<(), PanelError> {
        self.with_inner(|inner| inner.update_elvss_dimming())
    }

    /// Read the greenish gamma parameters and patch them into `gamma_b7`.
    ///
    /// # Errors
    /// See [`PanelError`].
    pub fn read_greenish_gamma(&self) -> Result<(), PanelError> {
        self.with_inner(|inner| inner.read_greenish_gamma())
    }

    /// Send the patched `gamma_b7` set.
    ///
    /// # Errors
    /// [`PanelError::TableNotReady`] before [`read_greenish_gamma`](Self::read_greenish_gamma).
    pub fn update_greenish_gamma(&self) -> Result<(), PanelError> {
        self.with_inner(|inner| inner.update_greenish_gamma())
    }

    /// Read the white point as lowercase hex.
    ///
    /// # Errors
    /// See [`PanelError`].
    pub fn read_white_point(&self) -> Result<String, PanelError> {
        self.with_inner(|inner| inner.read_white_point())
    }

    // -------------------------------------------------------------------------
    // Diagnostics
    // -------------------------------------------------------------------------

    /// Inject raw commands: `is_read rlen hex-bytes...` (first two decimal).
    ///
    /// # Errors
    /// [`PanelError::InvalidInput`] on malformed text, plus the read/send errors.
    pub fn write_mipi_reg(&self, text: &str) -> Result<(), PanelError> {
        self.with_inner(|inner| inner.write_mipi_reg(text))
    }

    /// The response of the last diagnostic read, as `0xNN,` items.
    pub fn read_mipi_reg(&self) -> String {
        lock(&self.inner).read_mipi_reg()
    }

    /// A copy of command set `id` in the active mode, including any patches.
    ///
    /// # Errors
    /// [`PanelError::NotFound`] if the set is not configured for the active mode.
    pub fn command_set(&self, id: CmdSetId) -> Result<CommandSet, PanelError> {
        lock(&self.inner).catalog.get_command_set(id).cloned()
    }

    /// A copy of the panel state.
    pub fn state(&self) -> PanelSnapshot {
        lock(&self.inner).snapshot()
    }
}
