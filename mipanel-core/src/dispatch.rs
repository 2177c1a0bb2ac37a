//! Display parameter dispatch.
//!
//! A parameter word is decoded into fields ([`DispParam`]) and each field is
//! applied on its own. A failing field never stops the others; its error is
//! kept in the [`DispParamReport`].

use crate::catalog::PatchSite;
use crate::command::CmdSetId;
use crate::config::Hbm51Config;
use crate::error::PanelError;
use crate::panel::PanelInner;
use crate::param::{
    AclParam, CabcParam, CeParam, CrcParam, DispAction, DispParam, FOD_BACKLIGHT_RESTORE,
    FlagParam, HbmParam,
};
use crate::patch::{OPCODE_BRIGHTNESS, OPCODE_PULSE, brightness_bytes};
use crate::state::{DozeBrightness, SkipDimming};
use crate::transport::DsiHost;
use log::{debug, error, info, warn};
use std::fmt;
use std::time::Duration;

/// Pulse setting written into `hbm_fod_on` while DC dimming is on.
const PULSE_DC_ON: u8 = 0x00;
/// Pulse setting written into `hbm_fod_on` while DC dimming is off.
const PULSE_DC_OFF: u8 = 0x20;

/// Outcome of one field.
#[derive(Debug)]
pub struct FieldResult {
    /// The field that was applied.
    pub action: DispAction,
    /// Its outcome; a patch error is reported even if the command was sent.
    pub result: Result<(), PanelError>,
}

/// Per-field outcome of [`MiPanel::set_disp_param`](crate::MiPanel::set_disp_param).
#[derive(Debug)]
pub struct DispParamReport {
    /// The decoded word.
    pub param: DispParam,
    /// One entry per recognized field, lowest bits first.
    pub fields: Vec<FieldResult>,
}

impl DispParamReport {
    /// Whether every field succeeded.
    pub fn is_ok(&self) -> bool {
        self.fields.iter().all(|f| f.result.is_ok())
    }

    /// The failed fields.
    pub fn errors(&self) -> impl Iterator<Item = (DispAction, &PanelError)> {
        self.fields
            .iter()
            .filter_map(|f| f.result.as_ref().err().map(|e| (f.action, e)))
    }

    /// Outcome of `action`, if the word carried it.
    pub fn result_of(&self, action: DispAction) -> Option<&Result<(), PanelError>> {
        self.fields
            .iter()
            .find(|f| f.action == action)
            .map(|f| &f.result)
    }
}

impl fmt::Display for DispParamReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}:", self.param.raw)?;
        if self.fields.is_empty() {
            return f.write_str(" no recognized fields");
        }
        for (i, field) in self.fields.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            match &field.result {
                Ok(()) => write!(f, "{sep}{} ok", field.action)?,
                Err(e) => write!(f, "{sep}{} failed ({e})", field.action)?,
            }
        }
        Ok(())
    }
}

impl<H: DsiHost> PanelInner<H> {
    pub(crate) fn set_disp_param(&mut self, word: u32) -> Result<DispParamReport, PanelError> {
        if !self.cfg.mi_feature_enabled {
            error!("[{}] mi feature not enabled, param 0x{:08X} dropped", self.name(), word);
            return Err(PanelError::FeatureDisabled("mi_feature"));
        }

        let param = DispParam::decode(word);
        if !self.initialized && !param.allowed_uninitialized() {
            error!("[{}] panel not initialized, param 0x{:08X} dropped", self.name(), word);
            return Err(PanelError::NotReady);
        }

        info!("[{}] param 0x{:08X}", self.name(), word);
        let fields = param
            .actions()
            .into_iter()
            .map(|action| {
                let result = self.apply(action);
                if let Err(e) = &result {
                    error!("[{}] {} failed: {}", self.name(), action, e);
                }
                FieldResult { action, result }
            })
            .collect();

        Ok(DispParamReport { param, fields })
    }

    fn apply(&mut self, action: DispAction) -> Result<(), PanelError> {
        match action {
            DispAction::Color(p) => {
                debug!("[{}] {} not supported", self.name(), p.label());
                Ok(())
            }
            DispAction::Ce(p) => self.send(match p {
                CeParam::On => CmdSetId::CeOn,
                CeParam::Off => CmdSetId::CeOff,
            }),
            DispAction::Cabc(p) => self.apply_cabc(p),
            DispAction::Acl(p) => self.send(match p {
                AclParam::L1 => CmdSetId::AclL1,
                AclParam::L2 => CmdSetId::AclL2,
                AclParam::L3 => CmdSetId::AclL3,
                AclParam::Off => CmdSetId::AclOff,
            }),
            DispAction::Hbm(p) => self.apply_hbm(p),
            DispAction::Crc(p) => self.apply_crc(p),
            DispAction::FodBacklight(level) => self.apply_fod_backlight(level),
            DispAction::Flag(p) => self.apply_flag(p),
        }
    }

    fn apply_cabc(&mut self, p: CabcParam) -> Result<(), PanelError> {
        let id = match p {
            CabcParam::UiOn => CmdSetId::CabcUiOn,
            CabcParam::StillOn => CmdSetId::CabcStillOn,
            CabcParam::MovieOn => CmdSetId::CabcMovieOn,
            CabcParam::Off => CmdSetId::CabcOff,
            CabcParam::SkinCeUiOn => CmdSetId::SkinCeCabcUiOn,
            CabcParam::SkinCeStillOn => CmdSetId::SkinCeCabcStillOn,
            CabcParam::SkinCeMovieOn => CmdSetId::SkinCeCabcMovieOn,
            CabcParam::SkinCeOff => CmdSetId::SkinCeCabcOff,
            CabcParam::DimmingOff => CmdSetId::DimmingOff,
            CabcParam::DimmingOn => {
                let now = self.clock.now();
                if !self.mi.dimming_allowed(now) {
                    info!(
                        "[{}] dimming on skipped ({:?})",
                        self.name(),
                        self.mi.skip_dimming
                    );
                    return Ok(());
                }
                CmdSetId::DimmingOn
            }
        };
        self.send(id)
    }

    fn apply_hbm(&mut self, p: HbmParam) -> Result<(), PanelError> {
        match p {
            HbmParam::HbmOn => {
                self.mi.hbm_enabled = true;
                let result = if self.mi.fod_hbm_enabled {
                    info!("[{}] fod hbm active, hbm on deferred", self.name());
                    Ok(())
                } else {
                    self.send(CmdSetId::HbmOn)
                };
                self.mi.skip_dimming = SkipDimming::Block;
                result
            }
            HbmParam::HbmOff => {
                let result = match self.cfg.hbm_51_ctrl.clone() {
                    Some(h51) => self
                        .patch_51(CmdSetId::HbmOff, h51.hbm_off_51_index, self.mi.last_bl_level)
                        .and(self.send_vi_setting(&h51)),
                    None => Ok(()),
                };
                let result = result.and(self.send(CmdSetId::HbmOff));
                self.mi.skip_dimming = SkipDimming::Restore;
                self.mi.hbm_enabled = false;
                result
            }
            HbmParam::HdrOn => {
                let result = self.send(CmdSetId::HbmHdrOn);
                self.mi.skip_dimming = SkipDimming::Block;
                self.mi.hbm_enabled = true;
                result
            }
            HbmParam::HdrOff => {
                let result = match &self.cfg.hbm_51_ctrl {
                    Some(h51) => {
                        let index = h51.hbm_off_51_index;
                        self.patch_51(CmdSetId::HbmHdrOff, index, self.mi.last_bl_level)
                    }
                    None => Ok(()),
                };
                let result = result.and(self.send(CmdSetId::HbmHdrOff));
                self.mi.skip_dimming = SkipDimming::Restore;
                self.mi.hbm_enabled = false;
                result
            }
            HbmParam::FodOn => self.fod_hbm_on(),
            HbmParam::FodOff => self.fod_hbm_off(),
            HbmParam::Fod2Norm => self.send(CmdSetId::HbmFod2Norm),
            HbmParam::DcOn => self.set_dc(true),
            HbmParam::DcOff => self.set_dc(false),
            HbmParam::UnlockSuccess | HbmParam::UnlockFail => {
                self.mi.sysfs_fod_unlock_success = p == HbmParam::UnlockSuccess;
                info!(
                    "[{}] fod unlock {}",
                    self.name(),
                    if self.mi.sysfs_fod_unlock_success { "success" } else { "fail" }
                );
                Ok(())
            }
        }
    }

    fn fod_hbm_on(&mut self) -> Result<(), PanelError> {
        if self.aod_entry.cancel() {
            info!("[{}] pending aod entry cancelled", self.name());
        }

        let mut result = Ok(());
        let b2_index = self.cfg.fod_on_b2_index;
        if self.cfg.dc_type == 0 && b2_index != 0 {
            let pulse = if self.mi.dc_enable { PULSE_DC_ON } else { PULSE_DC_OFF };
            result = self.catalog.patch_bytes(
                PatchSite::new(CmdSetId::HbmFodOn, b2_index),
                1,
                &[pulse],
                Some(OPCODE_PULSE),
            );
        }

        result = result.and(self.send(CmdSetId::HbmFodOn));
        if self.cfg.dc_type != 0 {
            result = result.and(self.send(CmdSetId::CrcOff));
        }
        self.mi.skip_dimming = SkipDimming::Block;
        self.mi.fod_hbm_enabled = true;
        result
    }

    fn fod_hbm_off(&mut self) -> Result<(), PanelError> {
        let mut result = Ok(());
        if self.mi.hbm_enabled {
            info!("[{}] hbm still requested, back to hbm on", self.name());
            result = self.send(CmdSetId::HbmOn);
        } else {
            if let Some(h51) = self.cfg.hbm_51_ctrl.clone() {
                let level = if self.mi.dc_enable && self.cfg.dc_type == 1 {
                    self.cfg.dc_threshold
                } else {
                    self.mi.last_bl_level
                };
                result = self
                    .patch_51(CmdSetId::HbmFodOff, h51.fod_off_51_index, level)
                    .and(self.send_vi_setting(&h51));
            }
            result = result.and(self.send(CmdSetId::HbmFodOff));
            self.mi.skip_dimming = SkipDimming::Restore;
        }

        if self.cfg.dc_type == 0 && self.mi.dc_enable {
            result = result.and(self.send(CmdSetId::AodToDcOn));
        }

        self.mi.fod_hbm_enabled = false;
        let delay = Duration::from_millis(self.cfg.fod_off_dimming_delay_ms);
        self.mi.fod_hbm_off_time = Some(self.clock.now() + delay);

        if self.power_mode.is_doze() {
            if self.mi.fod_unlocked() {
                info!("[{}] fingerprint unlocked, no aod entry", self.name());
            } else {
                self.schedule_aod_entry();
            }
        }
        result
    }

    fn set_dc(&mut self, on: bool) -> Result<(), PanelError> {
        let mut result = Ok(());
        if self.cfg.dc_type == 0 {
            let level = self.mi.last_bl_level;
            result = self
                .send(if on { CmdSetId::DcOn } else { CmdSetId::DcOff })
                .and_then(|()| self.update_backlight(level));
        }
        self.mi.dc_enable = on;
        info!("[{}] dc {}", self.name(), if on { "on" } else { "off" });
        result
    }

    fn apply_crc(&mut self, p: CrcParam) -> Result<(), PanelError> {
        match p {
            CrcParam::Normal1 => self.send(CmdSetId::Normal1),
            CrcParam::DciP3 => self.send(CmdSetId::CrcDciP3),
            CrcParam::Srgb => self.send(CmdSetId::Srgb),
            CrcParam::CrcOff => self.send(CmdSetId::CrcOff),
            CrcParam::DozeHbm | CrcParam::DozeLbm => {
                if !self.cfg.factory_build && !self.mi.in_aod {
                    info!("[{}] {} ignored outside aod", self.name(), p.label());
                    return Ok(());
                }
                let (id, doze) = if p == CrcParam::DozeHbm {
                    (CmdSetId::DozeHbm, DozeBrightness::Hbm)
                } else {
                    (CmdSetId::DozeLbm, DozeBrightness::Lbm)
                };
                let result = self.send(id);
                self.mi.doze_brightness_state = doze;
                self.mi.skip_dimming = SkipDimming::Block;
                result
            }
            CrcParam::DozeOff => {
                let result = self.send(CmdSetId::Nolp);
                self.mi.doze_brightness_state = DozeBrightness::ToNormal;
                result
            }
            CrcParam::BacklightResend => {
                self.mi.backlight_delta = self.mi.backlight_delta.wrapping_add(1);
                let step = if self.mi.backlight_delta % 2 == 0 { 1 } else { 2 };
                let last = self.mi.last_bl_level;
                let level = if last >= self.cfg.bl_max_level.saturating_sub(1) {
                    last.saturating_sub(step)
                } else {
                    last + step
                };
                debug!("[{}] backlight resend {} -> {}", self.name(), last, level);
                self.update_backlight(level)
            }
            // Only reachable without a level; the decoder turns 0xD into FodBacklight.
            CrcParam::FodBacklight => Ok(()),
        }
    }

    fn apply_fod_backlight(&mut self, level: u32) -> Result<(), PanelError> {
        let dimming = self.send(CmdSetId::DimmingOff);
        if level == FOD_BACKLIGHT_RESTORE {
            let target = if self.mi.dc_enable && self.cfg.dc_type != 0 {
                self.cfg.dc_threshold
            } else {
                self.mi.last_bl_level
            };
            let delay = Duration::from_millis(self.cfg.fod_off_dimming_delay_ms);
            self.mi.fod_backlight_off_time = Some(self.clock.now() + delay);
            self.mi.skip_dimming = SkipDimming::Restore;
            info!("[{}] fod backlight restore to {}", self.name(), target);
            return dimming.and(self.update_backlight(target));
        }

        self.mi.fod_target_backlight = level;
        self.mi.skip_dimming = SkipDimming::None;
        info!("[{}] fod backlight {}", self.name(), level);
        dimming.and(self.update_backlight(level))
    }

    fn apply_flag(&mut self, p: FlagParam) -> Result<(), PanelError> {
        match p {
            FlagParam::FodBacklightOn | FlagParam::FodBacklightOff => {
                self.mi.fod_backlight_flag = p == FlagParam::FodBacklightOn;
                Ok(())
            }
            FlagParam::ElvssDimmingOn => self.send(CmdSetId::ElvssDimmingOn),
            FlagParam::ElvssDimmingOff => self.send(CmdSetId::ElvssDimmingOff),
            FlagParam::FlatModeOn => self.send(CmdSetId::FlatModeOn),
            FlagParam::FlatModeOff => self.send(CmdSetId::FlatModeOff),
        }
    }

    /// Write `level` into the 0x51 command at `index` of `set`.
    fn patch_51(&mut self, set: CmdSetId, index: usize, level: u32) -> Result<(), PanelError> {
        self.catalog.patch_bytes(
            PatchSite::new(set, index),
            1,
            &brightness_bytes(level),
            Some(OPCODE_BRIGHTNESS),
        )
    }

    fn send_vi_setting(&mut self, h51: &Hbm51Config) -> Result<(), PanelError> {
        let Some(threshold) = h51.vi_switch_threshold else {
            return Ok(());
        };
        if self.mi.last_bl_level >= threshold {
            self.send(CmdSetId::ViSettingHigh)
        } else {
            if !self.catalog.current()?.contains(CmdSetId::ViSettingLow) {
                warn!("[{}] vi_setting_low not configured", self.name());
            }
            self.send(CmdSetId::ViSettingLow)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::clock::Clock;
    use crate::mock::{ManualScheduler, MockClock, MockHost};
    use crate::{MiPanel, PanelConfig, PanelError, PowerMode, SkipDimming};
    use std::sync::Arc;
    use std::time::Duration;

    const CONFIG: &str = r#"{
        "dc_type": 0,
        "fod_on_b2_index": 1,
        "hbm_51_ctrl": { "fod_off_51_index": 1, "hbm_off_51_index": 0 },
        "modes": [{ "refresh_rate": 60, "command_sets": {
            "hbm_fod_on": { "commands": "39 01 00 00 00 00 02 53 E0 39 01 00 00 00 00 02 B2 FF" },
            "hbm_fod_off": { "commands": "39 01 00 00 00 00 02 53 28 39 01 00 00 00 00 03 51 00 00" },
            "hbm_off": { "commands": "39 01 00 00 00 00 03 51 00 00" },
            "dimming_on": { "commands": "39 01 00 00 00 00 02 53 28" },
            "dimming_off": { "commands": "39 01 00 00 00 00 02 53 20" },
            "acl_l1": { "commands": "39 01 00 00 00 00 02 55 01" },
            "dc_on": { "commands": "39 01 00 00 00 00 02 B9 01" },
            "aod_to_dc_on": { "commands": "39 01 00 00 00 00 02 B9 02" }
        } }]
    }"#;

    fn panel() -> (MiPanel<MockHost>, MockHost, Arc<MockClock>, Arc<ManualScheduler>) {
        let host = MockHost::new();
        let clock = Arc::new(MockClock::new());
        let sched = Arc::new(ManualScheduler::new());
        let panel = MiPanel::with_runtime(
            PanelConfig::from_json(CONFIG).unwrap(),
            host.clone(),
            clock.clone(),
            sched.clone(),
        )
        .unwrap();
        panel.set_initialized(true);
        (panel, host, clock, sched)
    }

    #[test]
    fn test_gating() {
        let (p, host, _, _) = panel();
        p.set_initialized(false);
        assert!(matches!(p.set_disp_param(0x1000), Err(PanelError::NotReady)));
        let report = p.set_disp_param(0x60000).unwrap();
        assert!(report.is_ok());
        assert!(p.state().mi.sysfs_fod_unlock_success);
        assert!(host.sent().is_empty());

        let cfg = CONFIG.replacen('{', r#"{ "mi_feature_enabled": false, "#, 1);
        let p = MiPanel::with_runtime(
            PanelConfig::from_json(&cfg).unwrap(),
            MockHost::new(),
            Arc::new(MockClock::new()),
            Arc::new(ManualScheduler::new()),
        )
        .unwrap();
        assert!(matches!(
            p.set_disp_param(0x1000),
            Err(PanelError::FeatureDisabled(_))
        ));
    }

    #[test]
    fn test_fod_on_patches_pulse_by_dc_state() {
        let (p, host, _, _) = panel();
        p.set_disp_param(0xA0000).unwrap();
        assert_eq!(host.sent_payloads()[1], vec![0xB2, 0x20]);

        host.clear();
        p.set_disp_param(0x40000).unwrap();
        p.set_disp_param(0xA0000).unwrap();
        assert!(host.sent_payloads().contains(&vec![0xB2, 0x00]));
        assert!(p.state().mi.dc_enable);
    }

    #[test]
    fn test_fod_off_patches_backlight_and_restores() {
        let (p, host, clock, _) = panel();
        p.set_backlight(0x234).unwrap();
        p.set_disp_param(0xA0000).unwrap();
        host.clear();

        p.set_disp_param(0xB0000).unwrap();
        assert_eq!(
            host.sent_payloads(),
            vec![vec![0x53, 0x28], vec![0x51, 0x02, 0x34]]
        );
        let st = p.state();
        assert!(!st.mi.fod_hbm_enabled);
        assert_eq!(st.mi.skip_dimming, SkipDimming::Restore);

        host.clear();
        p.set_disp_param(0xF00).unwrap();
        assert!(host.sent().is_empty());
        clock.advance(Duration::from_millis(170));
        p.set_disp_param(0xF00).unwrap();
        assert_eq!(host.sent_payloads(), vec![vec![0x53, 0x28]]);
    }

    #[test]
    fn test_fod_off_with_hbm_requested_goes_back_to_hbm() {
        let (p, host, _, _) = panel();
        p.set_disp_param(0xA0000).unwrap();
        let report = p.set_disp_param(0x10000).unwrap();
        assert!(report.is_ok());
        host.clear();

        let report = p.set_disp_param(0xB0000).unwrap();
        assert!(matches!(
            report.fields[0].result,
            Err(PanelError::NotFound(crate::CmdSetId::HbmOn))
        ));
        assert!(host.sent().is_empty());
        assert_eq!(p.state().mi.skip_dimming, SkipDimming::Block);
    }

    #[test]
    fn test_fod_off_in_doze_schedules_aod_entry() {
        let (p, _, _, sched) = panel();
        p.set_power_mode(PowerMode::Lp1);
        p.set_disp_param(0xA0000).unwrap();
        p.set_disp_param(0xB0000).unwrap();
        assert!(p.state().aod_entry_pending);
        assert_eq!(sched.delays(), vec![Duration::from_millis(100)]);

        p.set_disp_param(0x60000).unwrap();
        p.set_disp_param(0xA0000).unwrap();
        p.set_disp_param(0xB0000).unwrap();
        assert_eq!(sched.pending(), 1);
    }

    #[test]
    fn test_dc_on_resends_backlight() {
        let (p, host, _, _) = panel();
        p.set_backlight(300).unwrap();
        host.clear();
        p.set_disp_param(0x40000).unwrap();
        assert_eq!(
            host.sent_payloads(),
            vec![vec![0xB9, 0x01], vec![0x51, 0x2C, 0x01]]
        );
    }

    #[test]
    fn test_dc_failure_skips_backlight() {
        let (p, host, _, _) = panel();
        p.set_backlight(100).unwrap();
        host.clear();

        // dc_off is not configured.
        let report = p.set_disp_param(0x50000).unwrap();
        assert!(matches!(
            report.fields[0].result,
            Err(PanelError::NotFound(crate::CmdSetId::DcOff))
        ));
        assert!(host.sent().is_empty());
        assert!(!p.state().mi.dc_enable);

        p.set_disp_param(0x40000).unwrap();
        host.fail_transfers(1);
        host.clear();
        let report = p.set_disp_param(0x40000).unwrap();
        assert!(matches!(report.fields[0].result, Err(PanelError::Transport(_))));
        assert!(host.sent().is_empty());
        assert!(p.state().mi.dc_enable);
    }

    #[test]
    fn test_hbm_and_hdr_off_restore_last_backlight() {
        let json = r#"{
            "hbm_51_ctrl": { "hbm_off_51_index": 1, "vi_switch_threshold": 1600 },
            "modes": [{ "refresh_rate": 60, "command_sets": {
                "hbm_on": { "commands": "39 01 00 00 00 00 02 53 E8" },
                "hbm_off": { "commands": "39 01 00 00 00 00 02 53 28 39 01 00 00 00 00 03 51 00 00" },
                "hbm_hdr_on": { "commands": "39 01 00 00 00 00 02 53 E0" },
                "hbm_hdr_off": { "commands": "39 01 00 00 00 00 02 53 20 39 01 00 00 00 00 03 51 00 00" },
                "vi_setting_high": { "commands": "39 01 00 00 00 00 02 BB 01" },
                "vi_setting_low": { "commands": "39 01 00 00 00 00 02 BB 00" }
            } }]
        }"#;
        let host = MockHost::new();
        let p = MiPanel::with_runtime(
            PanelConfig::from_json(json).unwrap(),
            host.clone(),
            Arc::new(MockClock::new()),
            Arc::new(ManualScheduler::new()),
        )
        .unwrap();
        p.set_initialized(true);

        p.set_backlight(300).unwrap();
        p.set_disp_param(0x10000).unwrap();
        assert!(p.state().mi.hbm_enabled);
        host.clear();

        p.set_disp_param(0xF0000).unwrap();
        assert_eq!(
            host.sent_payloads(),
            vec![vec![0xBB, 0x00], vec![0x53, 0x28], vec![0x51, 0x01, 0x2C]]
        );
        let st = p.state();
        assert!(!st.mi.hbm_enabled);
        assert_eq!(st.mi.skip_dimming, SkipDimming::Restore);

        p.set_backlight(1800).unwrap();
        p.set_disp_param(0x10000).unwrap();
        host.clear();
        p.set_disp_param(0xF0000).unwrap();
        assert_eq!(host.sent_payloads()[0], vec![0xBB, 0x01]);

        // HDR off patches the same way but leaves the VI setting alone.
        p.set_disp_param(0x20000).unwrap();
        assert_eq!(p.state().mi.skip_dimming, SkipDimming::Block);
        host.clear();
        p.set_disp_param(0x90000).unwrap();
        assert_eq!(
            host.sent_payloads(),
            vec![vec![0x53, 0x20], vec![0x51, 0x07, 0x08]]
        );
        let st = p.state();
        assert!(!st.mi.hbm_enabled);
        assert_eq!(st.mi.skip_dimming, SkipDimming::Restore);
    }

    #[test]
    fn test_doze_brightness_words_need_aod() {
        let json = r#"{ "modes": [{ "refresh_rate": 60, "command_sets": {
            "doze_hbm": { "commands": "39 01 00 00 00 00 03 51 00 F5" },
            "doze_lbm": { "commands": "39 01 00 00 00 00 03 51 00 14" }
        } }] }"#;
        let host = MockHost::new();
        let p = MiPanel::with_runtime(
            PanelConfig::from_json(json).unwrap(),
            host.clone(),
            Arc::new(MockClock::new()),
            Arc::new(ManualScheduler::new()),
        )
        .unwrap();
        p.set_initialized(true);

        let report = p.set_disp_param(0x600000).unwrap();
        assert!(report.is_ok());
        assert!(host.sent().is_empty());
        let st = p.state();
        assert_eq!(st.mi.doze_brightness_state, crate::DozeBrightness::ToNormal);
        assert_eq!(st.mi.skip_dimming, SkipDimming::None);

        p.set_power_mode(PowerMode::Lp1);
        p.set_disp_param(0x600000).unwrap();
        assert_eq!(host.sent_payloads(), vec![vec![0x51, 0x00, 0xF5]]);
        host.clear();
        p.set_disp_param(0x700000).unwrap();
        assert_eq!(host.sent_payloads(), vec![vec![0x51, 0x00, 0x14]]);
        let st = p.state();
        assert_eq!(st.mi.doze_brightness_state, crate::DozeBrightness::Lbm);
        assert_eq!(st.mi.skip_dimming, SkipDimming::Block);

        // Factory builds apply the doze words outside AOD too.
        let json = json.replacen('{', r#"{ "factory_build": true, "#, 1);
        let host = MockHost::new();
        let p = MiPanel::with_runtime(
            PanelConfig::from_json(&json).unwrap(),
            host.clone(),
            Arc::new(MockClock::new()),
            Arc::new(ManualScheduler::new()),
        )
        .unwrap();
        p.set_initialized(true);
        p.set_disp_param(0x700000).unwrap();
        assert_eq!(host.sent_payloads(), vec![vec![0x51, 0x00, 0x14]]);
        assert_eq!(p.state().mi.skip_dimming, SkipDimming::Block);
    }

    #[test]
    fn test_backlight_resend_alternates() {
        let (p, host, _, _) = panel();
        p.set_backlight(100).unwrap();
        host.clear();
        p.set_disp_param(0xA00000).unwrap();
        p.set_disp_param(0xA00000).unwrap();
        assert_eq!(
            host.sent_payloads(),
            vec![vec![0x51, 102, 0], vec![0x51, 101, 0]]
        );

        p.set_backlight(2047).unwrap();
        host.clear();
        p.set_disp_param(0xA00000).unwrap();
        assert_eq!(host.sent_payloads(), vec![vec![0x51, 0xFD, 0x07]]);
    }

    #[test]
    fn test_fod_backlight_set_and_restore() {
        let (p, host, clock, _) = panel();
        p.set_backlight(500).unwrap();
        host.clear();

        p.set_disp_param(0x00D0_0400).unwrap();
        assert_eq!(
            host.sent_payloads(),
            vec![vec![0x53, 0x20], vec![0x51, 0x00, 0x04]]
        );
        let st = p.state();
        assert_eq!(st.mi.fod_target_backlight, 0x400);
        assert_eq!(st.mi.skip_dimming, SkipDimming::None);

        host.clear();
        p.set_disp_param(0x00D0_1000).unwrap();
        assert_eq!(
            host.sent_payloads(),
            vec![vec![0x53, 0x20], vec![0x51, 0xF4, 0x01]]
        );
        let st = p.state();
        assert_eq!(st.mi.skip_dimming, SkipDimming::Restore);
        assert!(!st.mi.dimming_allowed(clock.now()));
    }

    #[test]
    fn test_report_lists_every_field() {
        let (p, _, _, _) = panel();
        let report = p.set_disp_param(0x0000_1010).unwrap();
        assert_eq!(report.fields.len(), 2);
        assert!(!report.is_ok());
        let errors: Vec<_> = report.errors().collect();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0].1, PanelError::NotFound(crate::CmdSetId::CeOn)));
        assert!(report.to_string().contains("acl level 1 ok"));
    }
}
