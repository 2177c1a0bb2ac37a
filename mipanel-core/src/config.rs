//! Panel configuration.
//!
//! A [`PanelConfig`] is loaded from JSON. Optional feature sections are
//! enabled by being present; numeric fields fall back to the values the
//! panels ship with.
//!
//! ```
//! use mipanel_core::PanelConfig;
//!
//! let cfg = PanelConfig::from_json(r#"{
//!     "name": "demo",
//!     "modes": [{
//!         "refresh_rate": 60,
//!         "command_sets": {
//!             "hbm_on": { "state": "hs", "commands": "39 01 00 00 00 00 02 53 E0" }
//!         }
//!     }]
//! }"#).unwrap();
//! assert_eq!(cfg.fod_off_dimming_delay_ms, 170);
//! assert_eq!(cfg.build_catalog().unwrap().modes().len(), 1);
//! ```

use crate::catalog::{CommandCatalog, ModeCatalog};
use crate::command::{CmdSetId, CmdSetState, CommandSet, parse_hex_bytes};
use crate::error::PanelError;
use crate::transport::READ_BUF_CAPACITY;
use log::{debug, error};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Bytes per block in the DC lookup tables.
pub const DC_LUT_BLOCK: usize = 5;
/// Most greenish-gamma parameters a panel can carry.
pub const MAX_GREENISH_PARAMS: usize = 6;

/// Per-panel configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    /// Panel name used in logs.
    pub name: String,
    /// Master switch for parameter dispatch.
    pub mi_feature_enabled: bool,
    /// Send the backlight level high byte first.
    pub bl_big_endian: bool,
    /// Highest backlight level.
    pub bl_max_level: u32,
    /// Patch the 0x51 level into HBM-off style sequences.
    pub hbm_51_ctrl: Option<Hbm51Config>,
    /// Fingerprint dim layer.
    pub fod_dimlayer: Option<FodDimlayerConfig>,
    /// Delay before the dimming-on sent after panel enable; 0 disables it.
    pub panel_on_dimming_delay_ms: u64,
    /// Dimming-on is suppressed this long after FOD-HBM off.
    pub fod_off_dimming_delay_ms: u64,
    /// Delay of the deferred AOD entry after FOD-HBM off.
    pub aod_enter_delay_ms: u64,
    /// OTP and flash gamma calibration.
    pub gamma: Option<GammaConfig>,
    /// Greenish gamma correction.
    pub greenish_gamma: Option<GreenishGammaConfig>,
    /// DC dimming lookup table calibration.
    pub dc: Option<DcConfig>,
    /// White point readout.
    pub white_point: Option<WhitePointConfig>,
    /// ELVSS dimming calibration.
    pub elvss_dimming: Option<ElvssDimmingConfig>,
    /// Backlight used in place of low levels while DC dimming is on.
    pub dc_threshold: u32,
    /// DC dimming implementation (0: command driven).
    pub dc_type: u32,
    /// Index of the 0xB2 command in `hbm_fod_on`; 0 disables the patch.
    pub fod_on_b2_index: usize,
    /// Factory builds accept doze brightness outside AOD.
    pub factory_build: bool,
    /// Display modes with their command sets.
    pub modes: Vec<ModeConfig>,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            name: "panel".into(),
            mi_feature_enabled: true,
            bl_big_endian: false,
            bl_max_level: 2047,
            hbm_51_ctrl: None,
            fod_dimlayer: None,
            panel_on_dimming_delay_ms: 0,
            fod_off_dimming_delay_ms: 170,
            aod_enter_delay_ms: 100,
            gamma: None,
            greenish_gamma: None,
            dc: None,
            white_point: None,
            elvss_dimming: None,
            dc_threshold: 440,
            dc_type: 1,
            fod_on_b2_index: 0,
            factory_build: false,
            modes: Vec::new(),
        }
    }
}

/// Where the backlight level is patched into 0x51 commands.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Hbm51Config {
    /// 0x51 command index in `hbm_fod_off`.
    pub fod_off_51_index: usize,
    /// 0x51 command index in `hbm_off` and `hbm_hdr_off`.
    pub hbm_off_51_index: usize,
    /// Backlight level at which `vi_setting_high` replaces `vi_setting_low`.
    pub vi_switch_threshold: Option<u32>,
}

/// Brightness to dim-layer alpha lookup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FodDimlayerConfig {
    /// Number of (brightness, alpha) pairs.
    pub item_count: usize,
    /// Flattened pairs: `[brightness0, alpha0, brightness1, alpha1, ...]`.
    pub brightness_alpha_lut: Vec<u32>,
}

impl FodDimlayerConfig {
    /// The pairs, if the table is well formed.
    ///
    /// # Errors
    /// [`PanelError::Config`] on odd length, a length that disagrees with
    /// `item_count`, or brightness values that do not increase.
    pub fn pairs(&self) -> Result<Vec<(u32, u32)>, PanelError> {
        let lut = &self.brightness_alpha_lut;
        if self.item_count == 0 || lut.len() % 2 != 0 || lut.len() != self.item_count * 2 {
            return Err(PanelError::Config(format!(
                "brightness alpha lut has {} values for {} items",
                lut.len(),
                self.item_count
            )));
        }
        let pairs: Vec<(u32, u32)> = lut.chunks_exact(2).map(|p| (p[0], p[1])).collect();
        if pairs.windows(2).any(|w| w[1].0 <= w[0].0) {
            return Err(PanelError::Config(
                "brightness alpha lut is not increasing".into(),
            ));
        }
        Ok(pairs)
    }
}

/// Gamma calibration layout.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GammaConfig {
    /// Bytes read through the flash window, including the 2-byte checksum.
    pub flash_read_total_param: usize,
    /// Index of the address-carrying command in `gamma_flash_read_pre`.
    pub flash_read_c1_index: usize,
    /// 0xC8 command index in `timing_switch`.
    pub update_c8_index: usize,
    /// 0xC9 command index in `timing_switch`.
    pub update_c9_index: usize,
    /// 0xB3 command index in `timing_switch`.
    pub update_b3_index: usize,
    /// Length of the 0xC8 tables.
    pub c8_len: usize,
    /// Length of the 0xC9 tables.
    pub c9_len: usize,
    /// Length of the 0xB3 tables.
    pub b3_len: usize,
}

impl Default for GammaConfig {
    fn default() -> Self {
        Self {
            flash_read_total_param: 135 + 180 + 45 + 2,
            flash_read_c1_index: 0,
            update_c8_index: 0,
            update_c9_index: 0,
            update_b3_index: 0,
            c8_len: 135,
            c9_len: 180,
            b3_len: 45,
        }
    }
}

/// Greenish gamma correction layout.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GreenishGammaConfig {
    /// Response length of `gamma_read_b7`.
    pub read_len: usize,
    /// Value subtracted from each 16-bit parameter.
    pub offset: u8,
    /// Command indices in `gamma_b7`, one per parameter, at most six.
    pub param_indices: Vec<usize>,
}

impl Default for GreenishGammaConfig {
    fn default() -> Self {
        Self {
            read_len: 2,
            offset: 0,
            param_indices: Vec::new(),
        }
    }
}

/// DC lookup table layout.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DcConfig {
    /// Length of each LUT; a multiple of 5.
    pub lut_len: usize,
    /// 0xD2 command index in `dc_on` and `dc_off`.
    pub update_d2_index: usize,
}

impl Default for DcConfig {
    fn default() -> Self {
        Self {
            lut_len: 75,
            update_d2_index: 0,
        }
    }
}

/// White point readout layout.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WhitePointConfig {
    /// Response length of `white_point_read`.
    pub reg_read_len: usize,
    /// First byte of the white point in the response.
    pub info_index: usize,
    /// White point length.
    pub info_len: usize,
}

/// ELVSS dimming calibration layout.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ElvssDimmingConfig {
    /// Response length of `elvss_dimming_read`.
    pub read_len: usize,
    /// Command index patched in `hbm_fod_on`.
    pub update_hbm_fod_on_index: usize,
    /// Command index patched in `hbm_fod_off`.
    pub update_hbm_fod_off_index: usize,
}

impl Default for ElvssDimmingConfig {
    fn default() -> Self {
        Self {
            read_len: 1,
            update_hbm_fod_on_index: 0,
            update_hbm_fod_off_index: 0,
        }
    }
}

/// One display mode.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModeConfig {
    /// Refresh rate in Hz.
    pub refresh_rate: u32,
    /// Command sets keyed by their configuration names (see [`CmdSetId`]).
    pub command_sets: BTreeMap<String, CommandSetConfig>,
}

/// A command set as written in the configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandSetConfig {
    /// Link state.
    #[serde(default)]
    pub state: CmdSetState,
    /// Hex packet stream, see [`CommandSet::from_packets`].
    pub commands: String,
}

impl PanelConfig {
    /// Parse and validate a JSON configuration.
    ///
    /// # Errors
    /// [`PanelError::Json`] on malformed JSON, [`PanelError::Config`] on
    /// inconsistent values.
    pub fn from_json(json: &str) -> Result<Self, PanelError> {
        let mut cfg: PanelConfig = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a JSON configuration file.
    ///
    /// # Errors
    /// [`PanelError::Io`] if the file cannot be read, otherwise as
    /// [`from_json`](Self::from_json).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PanelError> {
        let path = path.as_ref();
        debug!("loading panel config from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Check cross-field constraints.
    ///
    /// A malformed dim-layer table disables the dim layer instead of failing.
    ///
    /// # Errors
    /// [`PanelError::Config`] describing the first violation.
    pub fn validate(&mut self) -> Result<(), PanelError> {
        if self.modes.is_empty() {
            return Err(PanelError::Config("no display modes".into()));
        }

        if let Some(gamma) = &self.gamma {
            if gamma.c8_len == 0 || gamma.c9_len == 0 || gamma.b3_len == 0 {
                return Err(PanelError::Config("gamma table length is zero".into()));
            }
            if gamma.flash_read_total_param < 2 {
                return Err(PanelError::Config(
                    "flash_read_total_param must cover the checksum".into(),
                ));
            }
        }

        if let Some(dc) = &self.dc {
            if dc.lut_len == 0 || dc.lut_len % DC_LUT_BLOCK != 0 {
                return Err(PanelError::Config(format!(
                    "dc lut_len {} is not a positive multiple of {}",
                    dc.lut_len, DC_LUT_BLOCK
                )));
            }
        }

        if let Some(greenish) = &self.greenish_gamma {
            if greenish.param_indices.len() > MAX_GREENISH_PARAMS {
                return Err(PanelError::Config(format!(
                    "{} greenish gamma parameters, at most {} supported",
                    greenish.param_indices.len(),
                    MAX_GREENISH_PARAMS
                )));
            }
            if greenish.read_len < 2 {
                return Err(PanelError::Config("greenish gamma read_len below 2".into()));
            }
        }

        if let Some(wp) = &self.white_point {
            if wp.info_index + wp.info_len > wp.reg_read_len {
                return Err(PanelError::Config(
                    "white point info exceeds the read length".into(),
                ));
            }
        }

        let reads = [
            ("dc lut_len", self.dc.as_ref().map(|c| c.lut_len)),
            ("white_point reg_read_len", self.white_point.as_ref().map(|c| c.reg_read_len)),
            ("elvss_dimming read_len", self.elvss_dimming.as_ref().map(|c| c.read_len)),
            ("greenish_gamma read_len", self.greenish_gamma.as_ref().map(|c| c.read_len)),
        ];
        for (what, len) in reads {
            if let Some(len) = len.filter(|&n| n > READ_BUF_CAPACITY) {
                return Err(PanelError::Config(format!(
                    "{what} {len} exceeds the {READ_BUF_CAPACITY}-byte read buffer"
                )));
            }
        }

        if let Some(dim) = &self.fod_dimlayer {
            if let Err(e) = dim.pairs() {
                error!("[{}] fod dim layer disabled: {}", self.name, e);
                self.fod_dimlayer = None;
            }
        }

        Ok(())
    }

    /// Decode every configured command set into a catalog.
    ///
    /// # Errors
    /// [`PanelError::Config`] on an unknown set name or a malformed packet
    /// stream.
    pub fn build_catalog(&self) -> Result<CommandCatalog, PanelError> {
        let mut modes = Vec::with_capacity(self.modes.len());
        for mode in &self.modes {
            let mut catalog = ModeCatalog::new(mode.refresh_rate);
            for (name, set) in &mode.command_sets {
                let id: CmdSetId = name.parse()?;
                let decoded = parse_hex_bytes(&set.commands)
                    .and_then(|b| CommandSet::from_packets(set.state, &b))
                    .map_err(|e| {
                        PanelError::Config(format!("{}Hz {}: {}", mode.refresh_rate, name, e))
                    })?;
                catalog.insert(id, decoded);
            }
            debug!(
                "[{}] {}Hz mode: {} command sets",
                self.name,
                mode.refresh_rate,
                mode.command_sets.len()
            );
            modes.push(catalog);
        }
        if modes.is_empty() {
            return Err(PanelError::Config("no display modes".into()));
        }
        Ok(CommandCatalog::new(modes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODE: &str = r#"{ "refresh_rate": 60, "command_sets": {} }"#;

    #[test]
    fn test_defaults() {
        let cfg = PanelConfig::from_json(&format!(r#"{{ "modes": [{MODE}] }}"#)).unwrap();
        assert!(cfg.mi_feature_enabled);
        assert_eq!(cfg.dc_threshold, 440);
        assert_eq!(cfg.dc_type, 1);
        assert_eq!(cfg.aod_enter_delay_ms, 100);
        assert!(cfg.gamma.is_none());

        let gamma: GammaConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(gamma.flash_read_total_param, 362);
    }

    #[test]
    fn test_dc_lut_len_must_be_block_multiple() {
        let json = format!(r#"{{ "dc": {{ "lut_len": 12 }}, "modes": [{MODE}] }}"#);
        assert!(matches!(
            PanelConfig::from_json(&json),
            Err(PanelError::Config(_))
        ));
    }

    #[test]
    fn test_read_lengths_bounded_by_read_buffer() {
        for section in [
            r#""dc": { "lut_len": 260 }"#,
            r#""white_point": { "reg_read_len": 300, "info_index": 0, "info_len": 4 }"#,
            r#""elvss_dimming": { "read_len": 257 }"#,
            r#""greenish_gamma": { "read_len": 512 }"#,
        ] {
            let json = format!(r#"{{ {section}, "modes": [{MODE}] }}"#);
            let err = PanelConfig::from_json(&json).unwrap_err();
            assert!(err.to_string().contains("read buffer"), "{section}: {err}");
        }

        let json = format!(r#"{{ "dc": {{ "lut_len": 255 }}, "modes": [{MODE}] }}"#);
        assert!(PanelConfig::from_json(&json).is_ok());
    }

    #[test]
    fn test_bad_alpha_lut_disables_dimlayer() {
        let json = format!(
            r#"{{ "fod_dimlayer": {{ "item_count": 2, "brightness_alpha_lut": [0, 255, 10] }},
                 "modes": [{MODE}] }}"#
        );
        let cfg = PanelConfig::from_json(&json).unwrap();
        assert!(cfg.fod_dimlayer.is_none());

        let json = format!(
            r#"{{ "fod_dimlayer": {{ "item_count": 2, "brightness_alpha_lut": [0, 255, 100, 0] }},
                 "modes": [{MODE}] }}"#
        );
        let cfg = PanelConfig::from_json(&json).unwrap();
        assert_eq!(cfg.fod_dimlayer.unwrap().pairs().unwrap(), vec![(0, 255), (100, 0)]);
    }

    #[test]
    fn test_build_catalog_rejects_unknown_set() {
        let json = r#"{ "modes": [{ "refresh_rate": 60, "command_sets": {
            "bogus": { "commands": "39 01 00 00 00 00 01 29" } } }] }"#;
        let cfg = PanelConfig::from_json(json).unwrap();
        assert!(matches!(cfg.build_catalog(), Err(PanelError::Config(_))));
    }

    #[test]
    fn test_build_catalog_reports_bad_stream() {
        let json = r#"{ "modes": [{ "refresh_rate": 90, "command_sets": {
            "hbm_on": { "commands": "39 01 00 00 00 00 05 53" } } }] }"#;
        let cfg = PanelConfig::from_json(json).unwrap();
        let err = cfg.build_catalog().unwrap_err().to_string();
        assert!(err.contains("90Hz hbm_on"), "{err}");
    }

    #[test]
    fn test_empty_modes_rejected() {
        assert!(PanelConfig::from_json("{}").is_err());
    }
}
