//! Calibration acquisition and catalog updates.
//!
//! Everything here reads per-unit calibration from the panel and copies it
//! into the command catalog. Multi-command read sequences run inside a
//! [`LinkGuard`](crate::transport::LinkGuard) so the link is switched off on
//! every exit path.

use crate::calibration::{GammaCalibration, byte_sum};
use crate::catalog::{CommandCatalog, PatchSite};
use crate::clock::Clock;
use crate::command::CmdSetId;
use crate::config::GammaConfig;
use crate::error::PanelError;
use crate::panel::PanelInner;
use crate::patch::{check_site, patch_from_calibration, subtract_offset};
use crate::transport::{DsiHost, ReadRequest, Transport, TransportError};
use log::{debug, error, info, warn};
use std::fmt::Write as _;
use std::time::Duration;

/// Full passes over the gamma flash window before giving up.
pub const FLASH_READ_ATTEMPTS: u32 = 5;
/// Pause between two flash passes.
pub const FLASH_RETRY_DELAY: Duration = Duration::from_millis(80);
/// Double reads of the DC LUT before giving up.
pub const DC_READ_ATTEMPTS: u32 = 5;

/// Read commands of the greenish gamma parameters, in parameter order.
const GREENISH_PRE: [CmdSetId; 6] = [
    CmdSetId::GammaRead1stPre,
    CmdSetId::GammaRead2ndPre,
    CmdSetId::GammaRead3rdPre,
    CmdSetId::GammaRead4thPre,
    CmdSetId::GammaRead5thPre,
    CmdSetId::GammaRead6thPre,
];

/// Bytes preceding the 0xB3 table in its OTP response.
const OTP_B3_SKIP: usize = 2;

fn send_set<H: DsiHost>(
    link: &mut Transport<H>,
    catalog: &CommandCatalog,
    id: CmdSetId,
) -> Result<(), PanelError> {
    link.send(catalog.get_command_set(id)?)?;
    Ok(())
}

fn read_otp<H: DsiHost>(
    link: &mut Transport<H>,
    catalog: &CommandCatalog,
    gamma: &mut GammaCalibration,
) -> Result<(), PanelError> {
    let mut buf = vec![0u8; gamma.otp_c8.len()];
    link.ctrl_read(catalog.get_command_set(CmdSetId::GammaOtpReadC8)?, &mut buf)?;
    gamma.otp_c8.fill(&buf);

    let mut buf = vec![0u8; gamma.otp_c9.len()];
    link.ctrl_read(catalog.get_command_set(CmdSetId::GammaOtpReadC9)?, &mut buf)?;
    gamma.otp_c9.fill(&buf);

    let mut buf = vec![0u8; gamma.otp_b3.len() + OTP_B3_SKIP];
    link.ctrl_read(catalog.get_command_set(CmdSetId::GammaOtpReadB3)?, &mut buf)?;
    gamma.otp_b3.fill(&buf[OTP_B3_SKIP..]);
    Ok(())
}

/// One pass over the flash window; returns whether the checksum matched.
fn read_flash_pass<H: DsiHost>(
    link: &mut Transport<H>,
    catalog: &mut CommandCatalog,
    gamma: &mut GammaCalibration,
    cfg: &GammaConfig,
) -> Result<bool, PanelError> {
    let site = PatchSite::new(CmdSetId::GammaFlashReadPre, cfg.flash_read_c1_index);
    gamma.begin_flash_pass();
    for i in 0..cfg.flash_read_total_param {
        let address = u16::try_from(i).map_err(|_| {
            PanelError::InvalidInput(format!("flash address {i} does not fit 16 bits"))
        })?;
        catalog.patch_bytes(site, 2, &address.to_be_bytes(), None)?;
        send_set(link, catalog, CmdSetId::GammaFlashReadPre)?;

        let mut fb = [0u8; 2];
        link.ctrl_read(catalog.get_command_set(CmdSetId::GammaFlashReadFb)?, &mut fb)?;
        send_set(link, catalog, CmdSetId::Level2KeyDisable)?;
        gamma.store_flash_byte(i, fb[1]);
    }
    Ok(gamma.checksum_ok())
}

fn read_gamma<H: DsiHost>(
    link: &mut Transport<H>,
    catalog: &mut CommandCatalog,
    gamma: &mut GammaCalibration,
    cfg: &GammaConfig,
    clock: &dyn Clock,
) -> Result<(), PanelError> {
    send_set(link, catalog, CmdSetId::Level2KeyEnable)?;
    let otp = read_otp(link, catalog, gamma);
    let locked = send_set(link, catalog, CmdSetId::Level2KeyDisable);
    otp.and(locked)?;
    debug!("otp gamma read");

    for attempt in 1..=FLASH_READ_ATTEMPTS {
        if attempt > 1 {
            clock.sleep(FLASH_RETRY_DELAY);
        }
        if read_flash_pass(link, catalog, gamma, cfg)? {
            gamma.mark_read();
            info!(
                "flash gamma read on attempt {} (checksum {})",
                attempt,
                gamma.reported_checksum()
            );
            return Ok(());
        }
        warn!(
            "flash gamma checksum mismatch on attempt {}: sum {} != {}",
            attempt,
            gamma.running_sum,
            gamma.reported_checksum()
        );
    }
    Err(PanelError::ChecksumMismatch {
        attempts: FLASH_READ_ATTEMPTS,
    })
}

impl<H: DsiHost> PanelInner<H> {
    pub(crate) fn acquire_gamma(&mut self) -> Result<(), PanelError> {
        let Some(cfg) = self.cfg.gamma.clone() else {
            return Err(PanelError::FeatureDisabled("gamma"));
        };
        if !self.initialized {
            return Err(PanelError::NotReady);
        }
        let Some(gamma) = self.gamma.as_mut() else {
            return Err(PanelError::FeatureDisabled("gamma"));
        };
        if gamma.is_read_done() {
            debug!("[{}] gamma already read", self.cfg.name);
            return Ok(());
        }

        let mut link = self.transport.link()?;
        let result = read_gamma(&mut link, &mut self.catalog, gamma, &cfg, &*self.clock);
        if let Err(e) = &result {
            error!("[{}] gamma acquisition failed: {}", self.cfg.name, e);
        }
        result
    }

    pub(crate) fn gamma_report(&self) -> Result<String, PanelError> {
        let gamma = self
            .gamma
            .as_ref()
            .ok_or(PanelError::FeatureDisabled("gamma"))?;
        if !gamma.is_read_done() {
            return Err(PanelError::TableNotReady("gamma"));
        }
        Ok(gamma.report())
    }

    pub(crate) fn update_gamma_param(&mut self) -> Result<(), PanelError> {
        let Some(cfg) = self.cfg.gamma.clone() else {
            return Err(PanelError::FeatureDisabled("gamma"));
        };
        let Some(gamma) = self.gamma.as_mut() else {
            return Err(PanelError::FeatureDisabled("gamma"));
        };
        if !gamma.is_read_done() {
            return Err(PanelError::TableNotReady("gamma"));
        }

        let sites = [
            PatchSite::new(CmdSetId::TimingSwitch, cfg.update_c8_index),
            PatchSite::new(CmdSetId::TimingSwitch, cfg.update_c9_index),
            PatchSite::new(CmdSetId::TimingSwitch, cfg.update_b3_index),
        ];
        let mut result = Ok(());
        for mode in self.catalog.modes_mut() {
            let (tables, done, snapshot) = match mode.refresh_rate {
                60 => (
                    [&gamma.otp_c8, &gamma.otp_c9, &gamma.otp_b3],
                    gamma.update_done_60hz,
                    &mut self.gamma_switch_60hz,
                ),
                90 => (
                    [&gamma.flash_c8, &gamma.flash_c9, &gamma.flash_b3],
                    gamma.update_done_90hz,
                    &mut self.gamma_switch_90hz,
                ),
                _ => continue,
            };
            if done {
                continue;
            }

            // All three sites are checked up front so a bad index leaves the set untouched.
            if let Err(e) = sites.iter().try_for_each(|&site| check_site(mode, site)) {
                error!("[{}] {}Hz gamma update skipped: {}", self.cfg.name, mode.refresh_rate, e);
                result = result.and(Err(e));
                continue;
            }
            for (table, site) in tables.into_iter().zip(sites) {
                patch_from_calibration(mode, table, site)?;
            }
            *snapshot = Some(mode.get(CmdSetId::TimingSwitch)?.clone());

            info!("[{}] {}Hz gamma updated", self.cfg.name, mode.refresh_rate);
            if mode.refresh_rate == 60 {
                gamma.update_done_60hz = true;
            } else {
                gamma.update_done_90hz = true;
            }
        }
        result
    }

    pub(crate) fn switch_gamma(&mut self, refresh_rate: u32) -> Result<bool, PanelError> {
        let set = match refresh_rate {
            60 => self.gamma_switch_60hz.as_ref(),
            90 => self.gamma_switch_90hz.as_ref(),
            _ => {
                return Err(PanelError::InvalidInput(format!(
                    "no gamma switch for {refresh_rate}Hz"
                )));
            }
        };
        if self.gamma_switch_60hz.is_none() || self.gamma_switch_90hz.is_none() {
            debug!("[{}] gamma not updated for both rates yet", self.cfg.name);
            return Ok(false);
        }
        let Some(set) = set else {
            return Ok(false);
        };
        self.transport.send(set)?;
        info!("[{}] gamma switched to {}Hz", self.cfg.name, refresh_rate);
        Ok(true)
    }

    pub(crate) fn acquire_dc_lut(&mut self) -> Result<(), PanelError> {
        let Some(cfg) = self.cfg.dc.clone() else {
            return Err(PanelError::FeatureDisabled("dc"));
        };
        if !self.initialized {
            return Err(PanelError::NotReady);
        }
        let Some(dc) = self.dc.as_mut() else {
            return Err(PanelError::FeatureDisabled("dc"));
        };
        if dc.is_read_done() {
            debug!("[{}] dc lut already read", self.cfg.name);
            return Ok(());
        }

        let mut link = self.transport.link()?;
        for attempt in 1..=DC_READ_ATTEMPTS {
            send_set(&mut link, &self.catalog, CmdSetId::SwitchPage4)?;
            let cmd = self.catalog.get_command_set(CmdSetId::DcRead)?;
            let mut first = ReadRequest::new(cmd.clone(), cfg.lut_len);
            let mut second = ReadRequest::new(cmd.clone(), cfg.lut_len);
            link.read(&mut first, true)?;
            link.read(&mut second, true)?;

            let (a, b) = (byte_sum(first.buffer()), byte_sum(second.buffer()));
            if a == b {
                dc.store(first.buffer());
                info!("[{}] dc lut read on attempt {}", self.cfg.name, attempt);
                return Ok(());
            }
            warn!(
                "[{}] dc lut checksum mismatch on attempt {}: {} != {}",
                self.cfg.name, attempt, a, b
            );
        }
        error!("[{}] dc lut read failed", self.cfg.name);
        Err(PanelError::ChecksumMismatch {
            attempts: DC_READ_ATTEMPTS,
        })
    }

    pub(crate) fn update_dc_param(&mut self) -> Result<(), PanelError> {
        let Some(cfg) = self.cfg.dc.clone() else {
            return Err(PanelError::FeatureDisabled("dc"));
        };
        let Some(dc) = self.dc.as_mut() else {
            return Err(PanelError::FeatureDisabled("dc"));
        };
        if !dc.is_read_done() {
            return Err(PanelError::TableNotReady(dc.exit_lut.name()));
        }

        let mut result = Ok(());
        for mode in self.catalog.modes_mut() {
            for (table, set) in [(&dc.exit_lut, CmdSetId::DcOff), (&dc.enter_lut, CmdSetId::DcOn)] {
                let site = PatchSite::new(set, cfg.update_d2_index);
                if let Err(e) = patch_from_calibration(mode, table, site) {
                    error!("[{}] {}Hz {} not updated: {}", self.cfg.name, mode.refresh_rate, set, e);
                    result = result.and(Err(e));
                }
            }
        }
        if result.is_ok() {
            dc.exit_lut.mark_updated();
            dc.enter_lut.mark_updated();
            info!("[{}] dc lut updated", self.cfg.name);
        }
        result
    }

    pub(crate) fn update_elvss_dimming(&mut self) -> Result<(), PanelError> {
        let Some(cfg) = self.cfg.elvss_dimming.clone() else {
            return Err(PanelError::FeatureDisabled("elvss_dimming"));
        };
        if !self.initialized {
            return Err(PanelError::NotReady);
        }

        self.send(CmdSetId::ElvssDimmingOffset)?;
        let req = self.read_set(CmdSetId::ElvssDimmingRead, cfg.read_len)?;
        let value = req
            .data()
            .first()
            .copied()
            .ok_or(TransportError::NoResponse)?
            & 0x7F;

        let on = self.catalog.patch_bytes(
            PatchSite::new(CmdSetId::HbmFodOn, cfg.update_hbm_fod_on_index),
            1,
            &[value],
            None,
        );
        let off = self.catalog.patch_bytes(
            PatchSite::new(CmdSetId::HbmFodOff, cfg.update_hbm_fod_off_index),
            1,
            &[value],
            None,
        );
        info!("[{}] elvss dimming offset 0x{:02X}", self.cfg.name, value);
        on.and(off)
    }

    pub(crate) fn read_greenish_gamma(&mut self) -> Result<(), PanelError> {
        let Some(cfg) = self.cfg.greenish_gamma.clone() else {
            return Err(PanelError::FeatureDisabled("greenish_gamma"));
        };
        if !self.initialized {
            return Err(PanelError::NotReady);
        }

        self.send(CmdSetId::Level2KeyEnable)?;
        let read = self.read_greenish_params(&cfg.param_indices, cfg.read_len, cfg.offset);
        let locked = self.send(CmdSetId::Level2KeyDisable);
        let patched = read?;
        locked?;

        self.greenish_done = true;
        info!(
            "[{}] greenish gamma read ({} parameters)",
            self.cfg.name,
            cfg.param_indices.len()
        );
        patched
    }

    /// Reads every parameter. The outer error aborts; the inner one is the
    /// first patch failure.
    fn read_greenish_params(
        &mut self,
        indices: &[usize],
        read_len: usize,
        offset: u8,
    ) -> Result<Result<(), PanelError>, PanelError> {
        self.send(CmdSetId::GammaPreRead)?;
        let mut patched = Ok(());
        for (&index, pre) in indices.iter().zip(GREENISH_PRE) {
            self.send(pre)?;
            let req = self.read_set(CmdSetId::GammaReadB7, read_len)?;
            let Some(&[hi, lo]) = req.buffer().get(..2) else {
                return Err(PanelError::InvalidInput(format!(
                    "{} returned fewer than 2 bytes",
                    CmdSetId::GammaReadB7
                )));
            };
            let value = subtract_offset([hi, lo], offset);
            debug!("[{}] {} -> {:02X?}", self.cfg.name, pre, value);
            let site = PatchSite::new(CmdSetId::GammaB7, index);
            if let Err(e) = self.catalog.patch_bytes(site, 1, &value, None) {
                error!("[{}] gamma_b7[{}] not updated: {}", self.cfg.name, index, e);
                patched = patched.and(Err(e));
            }
        }
        Ok(patched)
    }

    pub(crate) fn update_greenish_gamma(&mut self) -> Result<(), PanelError> {
        if self.cfg.greenish_gamma.is_none() {
            return Err(PanelError::FeatureDisabled("greenish_gamma"));
        }
        if !self.greenish_done {
            return Err(PanelError::TableNotReady("greenish_gamma"));
        }
        self.send(CmdSetId::GammaB7)
    }

    pub(crate) fn read_white_point(&mut self) -> Result<String, PanelError> {
        let Some(cfg) = self.cfg.white_point.clone() else {
            return Err(PanelError::FeatureDisabled("white_point"));
        };
        let req = self.read_set(CmdSetId::WhitePointRead, cfg.reg_read_len)?;
        let info = req
            .buffer()
            .get(cfg.info_index..cfg.info_index + cfg.info_len)
            .ok_or_else(|| PanelError::InvalidInput("white point outside the response".into()))?;

        let mut out = String::with_capacity(info.len() * 2 + 1);
        for b in info {
            let _ = write!(out, "{b:02x}");
        }
        out.push('\n');
        Ok(out)
    }
}
