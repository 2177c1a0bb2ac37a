//! Panel control state.

use std::fmt;
use std::time::Instant;

/// Dimming-on suppression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SkipDimming {
    /// Dimming-on requests are honoured.
    #[default]
    None,
    /// Dimming-on requests are dropped (HBM, FOD-HBM or doze active).
    Block,
    /// The blocking state ended; dimming may be restored.
    Restore,
}

/// Brightness requested for the always-on display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DozeBrightness {
    /// Leave doze brightness.
    #[default]
    ToNormal,
    /// High doze brightness.
    Hbm,
    /// Low doze brightness.
    Lbm,
}

impl DozeBrightness {
    /// Decode the numeric form used by user space (0, 1, 2).
    pub fn from_index(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::ToNormal),
            1 => Some(Self::Hbm),
            2 => Some(Self::Lbm),
            _ => None,
        }
    }

    /// The numeric form.
    pub fn index(self) -> u32 {
        match self {
            Self::ToNormal => 0,
            Self::Hbm => 1,
            Self::Lbm => 2,
        }
    }
}

impl fmt::Display for DozeBrightness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ToNormal => "DOZE_TO_NORMAL",
            Self::Hbm => "DOZE_BRIGHTNESS_HBM",
            Self::Lbm => "DOZE_BRIGHTNESS_LBM",
        })
    }
}

/// Display power mode, as reported by the display pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PowerMode {
    /// Fully on.
    On,
    /// Low-power doze.
    Lp1,
    /// Low-power doze-suspend.
    Lp2,
    /// Off.
    #[default]
    Off,
}

impl PowerMode {
    /// Whether the mode is one of the doze modes.
    pub fn is_doze(self) -> bool {
        matches!(self, Self::Lp1 | Self::Lp2)
    }
}

/// Advisory brightness state derived from [`PanelMiState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelMode {
    /// No elevated or doze brightness.
    Normal,
    /// High brightness mode.
    HbmOn,
    /// Fingerprint high brightness.
    FodHbmOn,
    /// Doze at high brightness.
    DozeHbm,
    /// Doze at low brightness.
    DozeLbm,
}

/// The mutable control state of a panel.
///
/// Owned by [`MiPanel`](crate::MiPanel) and only touched with the panel lock
/// held; [`MiPanel::state`](crate::MiPanel::state) returns a copy.
#[derive(Debug, Clone, Default)]
pub struct PanelMiState {
    /// HBM (or HDR) requested.
    pub hbm_enabled: bool,
    /// Fingerprint HBM active.
    pub fod_hbm_enabled: bool,
    /// DC dimming enabled.
    pub dc_enable: bool,
    /// Doze brightness currently applied.
    pub doze_brightness_state: DozeBrightness,
    /// Doze brightness requested but not yet applied.
    pub unset_doze_brightness: DozeBrightness,
    /// Dimming-on suppression.
    pub skip_dimming: SkipDimming,
    /// Last backlight level requested by the display pipeline.
    pub last_bl_level: u32,
    /// Last explicit fingerprint backlight.
    pub fod_target_backlight: u32,
    /// Dimming-on is suppressed until this time (FOD-HBM off).
    pub fod_hbm_off_time: Option<Instant>,
    /// Dimming-on is suppressed until this time (FOD backlight restore).
    pub fod_backlight_off_time: Option<Instant>,
    /// The panel is in a doze power mode.
    pub in_aod: bool,
    /// Fingerprint unlock reported by the display layer.
    pub layer_fod_unlock_success: bool,
    /// Fingerprint unlock reported by user space.
    pub sysfs_fod_unlock_success: bool,
    /// Fingerprint backlight requested.
    pub fod_backlight_flag: bool,
    /// Backlight used while dozing.
    pub aod_backlight: u32,
    /// Counter behind the alternating backlight resend offset.
    pub backlight_delta: u8,
}

impl PanelMiState {
    /// The advisory mode implied by the flags.
    pub fn mode(&self) -> PanelMode {
        if self.fod_hbm_enabled {
            PanelMode::FodHbmOn
        } else if self.in_aod && self.doze_brightness_state == DozeBrightness::Hbm {
            PanelMode::DozeHbm
        } else if self.in_aod && self.doze_brightness_state == DozeBrightness::Lbm {
            PanelMode::DozeLbm
        } else if self.hbm_enabled {
            PanelMode::HbmOn
        } else {
            PanelMode::Normal
        }
    }

    /// Whether a dimming-on request at `now` may be sent.
    pub fn dimming_allowed(&self, now: Instant) -> bool {
        self.skip_dimming != SkipDimming::Block
            && self.fod_hbm_off_time.is_none_or(|t| now >= t)
            && self.fod_backlight_off_time.is_none_or(|t| now >= t)
    }

    /// Either source reported a fingerprint unlock.
    pub fn fod_unlocked(&self) -> bool {
        self.layer_fod_unlock_success || self.sysfs_fod_unlock_success
    }
}

/// A snapshot of a panel.
#[derive(Debug, Clone)]
pub struct PanelSnapshot {
    /// Panel name from the configuration.
    pub name: String,
    /// Whether the panel finished its power-on sequence.
    pub initialized: bool,
    /// Current power mode.
    pub power_mode: PowerMode,
    /// Refresh rate of the active display mode.
    pub refresh_rate: u32,
    /// Control state.
    pub mi: PanelMiState,
    /// Whether a deferred AOD entry is waiting to fire.
    pub aod_entry_pending: bool,
}

impl PanelSnapshot {
    /// Shorthand for `self.mi.mode()`.
    pub fn mode(&self) -> PanelMode {
        self.mi.mode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_mode_precedence() {
        let mut st = PanelMiState::default();
        assert_eq!(st.mode(), PanelMode::Normal);

        st.hbm_enabled = true;
        assert_eq!(st.mode(), PanelMode::HbmOn);

        st.in_aod = true;
        st.doze_brightness_state = DozeBrightness::Lbm;
        assert_eq!(st.mode(), PanelMode::DozeLbm);

        st.fod_hbm_enabled = true;
        assert_eq!(st.mode(), PanelMode::FodHbmOn);
    }

    #[test]
    fn test_dimming_window() {
        let now = Instant::now();
        let mut st = PanelMiState::default();
        assert!(st.dimming_allowed(now));

        st.fod_hbm_off_time = Some(now + Duration::from_millis(170));
        assert!(!st.dimming_allowed(now));
        assert!(st.dimming_allowed(now + Duration::from_millis(170)));

        st.skip_dimming = SkipDimming::Block;
        assert!(!st.dimming_allowed(now + Duration::from_secs(1)));
    }

    #[test]
    fn test_doze_brightness_index() {
        for v in 0..3 {
            assert_eq!(DozeBrightness::from_index(v).unwrap().index(), v);
        }
        assert!(DozeBrightness::from_index(3).is_none());
    }
}
