//! DSI command packets and command sets.
//!
//! A [`CommandSet`] is an ordered list of [`Command`] packets sent as one
//! unit. Sets are addressed by [`CmdSetId`], a closed enumeration whose
//! string names double as configuration keys.

use crate::error::PanelError;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// MIPI DSI data type for a DCS long write.
pub const DTYPE_DCS_LWRITE: u8 = 0x39;
/// MIPI DSI data type for a DCS read without parameters.
pub const DTYPE_DCS_READ: u8 = 0x06;

/// Size of a packet header in a packet stream.
const PACKET_HEADER_LEN: usize = 7;

macro_rules! cmd_set_ids {
    ($($(#[$meta:meta])* $variant:ident => $name:literal,)*) => {
        /// Symbolic identifier of a configured command set.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum CmdSetId {
            $($(#[$meta])* $variant,)*
        }

        impl CmdSetId {
            /// Every identifier, in declaration order.
            pub const ALL: &'static [CmdSetId] = &[$(CmdSetId::$variant,)*];

            /// Configuration key for this command set.
            pub fn name(self) -> &'static str {
                match self {
                    $(CmdSetId::$variant => $name,)*
                }
            }
        }

        impl FromStr for CmdSetId {
            type Err = PanelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(CmdSetId::$variant),)*
                    other => Err(PanelError::Config(format!("unknown command set '{other}'"))),
                }
            }
        }
    };
}

cmd_set_ids! {
    /// Leave low-power (doze) mode.
    Nolp => "nolp",
    /// Mode switch sequence; carries the per-rate gamma registers.
    TimingSwitch => "timing_switch",
    CeOn => "ce_on",
    CeOff => "ce_off",
    CabcUiOn => "cabc_ui_on",
    CabcStillOn => "cabc_still_on",
    CabcMovieOn => "cabc_movie_on",
    CabcOff => "cabc_off",
    SkinCeCabcUiOn => "skin_ce_cabc_ui_on",
    SkinCeCabcStillOn => "skin_ce_cabc_still_on",
    SkinCeCabcMovieOn => "skin_ce_cabc_movie_on",
    SkinCeCabcOff => "skin_ce_cabc_off",
    DimmingOn => "dimming_on",
    DimmingOff => "dimming_off",
    AclL1 => "acl_l1",
    AclL2 => "acl_l2",
    AclL3 => "acl_l3",
    AclOff => "acl_off",
    HbmOn => "hbm_on",
    HbmOff => "hbm_off",
    HbmFodOn => "hbm_fod_on",
    HbmFodOff => "hbm_fod_off",
    HbmFod2Norm => "hbm_fod2norm",
    HbmHdrOn => "hbm_hdr_on",
    HbmHdrOff => "hbm_hdr_off",
    DcOn => "dc_on",
    DcOff => "dc_off",
    AodToDcOn => "aod_to_dc_on",
    Normal1 => "normal1",
    CrcDciP3 => "crc_dcip3",
    Srgb => "srgb",
    DozeHbm => "doze_hbm",
    DozeLbm => "doze_lbm",
    CrcOff => "crc_off",
    ElvssDimmingOn => "elvss_dimming_on",
    ElvssDimmingOff => "elvss_dimming_off",
    ElvssDimmingOffset => "elvss_dimming_offset",
    ElvssDimmingRead => "elvss_dimming_read",
    FlatModeOn => "flat_mode_on",
    FlatModeOff => "flat_mode_off",
    ViSettingHigh => "vi_setting_high",
    ViSettingLow => "vi_setting_low",
    /// Unlock level-2 (manufacturer) registers.
    Level2KeyEnable => "level2_key_enable",
    Level2KeyDisable => "level2_key_disable",
    GammaOtpReadC8 => "gamma_otp_read_c8",
    GammaOtpReadC9 => "gamma_otp_read_c9",
    GammaOtpReadB3 => "gamma_otp_read_b3",
    /// Selects the flash address for the next `GammaFlashReadFb`.
    GammaFlashReadPre => "gamma_flash_read_pre",
    GammaFlashReadFb => "gamma_flash_read_fb",
    SwitchPage4 => "switch_page4",
    DcRead => "dc_read",
    WhitePointRead => "white_point_read",
    GammaPreRead => "gamma_pre_read",
    GammaRead1stPre => "gamma_read_1st_pre",
    GammaRead2ndPre => "gamma_read_2nd_pre",
    GammaRead3rdPre => "gamma_read_3rd_pre",
    GammaRead4thPre => "gamma_read_4th_pre",
    GammaRead5thPre => "gamma_read_5th_pre",
    GammaRead6thPre => "gamma_read_6th_pre",
    GammaReadB7 => "gamma_read_b7",
    GammaB7 => "gamma_b7",
}

impl fmt::Display for CmdSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Link state a command set is sent in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CmdSetState {
    /// Low-power mode.
    #[default]
    Lp,
    /// High-speed mode.
    Hs,
}

/// A single DSI packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// DSI data type.
    pub dtype: u8,
    /// Virtual channel.
    pub channel: u8,
    /// Whether the host should flush the batch after this packet.
    pub last_command: bool,
    /// Whether the peripheral must acknowledge.
    pub ack: bool,
    /// Delay after the packet, in milliseconds.
    pub post_wait_ms: u32,
    /// Payload; `payload[0]` is the DCS opcode when present.
    pub payload: Vec<u8>,
}

impl Command {
    /// A DCS long write that ends a batch.
    pub fn dcs_write(payload: Vec<u8>) -> Self {
        Self {
            dtype: DTYPE_DCS_LWRITE,
            channel: 0,
            last_command: true,
            ack: false,
            post_wait_ms: 0,
            payload,
        }
    }

    /// The DCS opcode, if the payload is not empty.
    pub fn opcode(&self) -> Option<u8> {
        self.payload.first().copied()
    }
}

/// An ordered sequence of commands sent as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandSet {
    /// Link state for the whole set.
    pub state: CmdSetState,
    /// The packets, in send order.
    pub cmds: Vec<Command>,
}

impl CommandSet {
    /// Create a set from already-built commands.
    pub fn new(state: CmdSetState, cmds: Vec<Command>) -> Self {
        Self { state, cmds }
    }

    /// Number of packets in the set.
    pub fn count(&self) -> usize {
        self.cmds.len()
    }

    /// Whether the set has no packets.
    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }

    /// Decode a packet stream.
    ///
    /// Each packet is `dtype last vc ack wait dlen_hi dlen_lo` followed by
    /// `dlen` payload bytes.
    ///
    /// # Errors
    /// Returns [`PanelError::InvalidInput`] if the stream is empty or a
    /// packet is truncated.
    pub fn from_packets(state: CmdSetState, bytes: &[u8]) -> Result<Self, PanelError> {
        let mut cmds = Vec::new();
        let mut rest = bytes;

        while !rest.is_empty() {
            let Some((header, tail)) = rest.split_first_chunk::<PACKET_HEADER_LEN>() else {
                return Err(PanelError::InvalidInput(format!(
                    "truncated packet header ({} bytes left)",
                    rest.len()
                )));
            };
            let dlen = usize::from(u16::from_be_bytes([header[5], header[6]]));
            if tail.len() < dlen {
                return Err(PanelError::InvalidInput(format!(
                    "packet payload needs {dlen} bytes, {} available",
                    tail.len()
                )));
            }
            let (payload, next) = tail.split_at(dlen);
            cmds.push(Command {
                dtype: header[0],
                last_command: header[1] != 0,
                channel: header[2],
                ack: header[3] != 0,
                post_wait_ms: u32::from(header[4]),
                payload: payload.to_vec(),
            });
            rest = next;
        }

        if cmds.is_empty() {
            return Err(PanelError::InvalidInput("no packets".into()));
        }
        Ok(Self { state, cmds })
    }
}

/// Parse whitespace-separated hex bytes (`"39 01 00 ..."`, `0x` prefix optional).
///
/// # Errors
/// Returns [`PanelError::InvalidInput`] on a token that is not a hex byte.
pub fn parse_hex_bytes(text: &str) -> Result<Vec<u8>, PanelError> {
    text.split_whitespace()
        .map(|token| {
            let digits = token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token);
            u32::from_str_radix(digits, 16)
                .map(|v| (v & 0xFF) as u8)
                .map_err(|_| PanelError::InvalidInput(format!("bad hex byte '{token}'")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_stream_decoding() {
        let bytes = parse_hex_bytes("15 00 00 00 0A 00 02 53 20 39 01 00 00 00 00 03 51 0F FF")
            .unwrap();
        let set = CommandSet::from_packets(CmdSetState::Hs, &bytes).unwrap();

        assert_eq!(set.count(), 2);
        assert_eq!(set.cmds[0].dtype, 0x15);
        assert_eq!(set.cmds[0].post_wait_ms, 10);
        assert!(!set.cmds[0].last_command);
        assert_eq!(set.cmds[0].payload, vec![0x53, 0x20]);
        assert!(set.cmds[1].last_command);
        assert_eq!(set.cmds[1].opcode(), Some(0x51));
        assert_eq!(set.cmds[1].payload, vec![0x51, 0x0F, 0xFF]);
    }

    #[test]
    fn test_truncated_packet_rejected() {
        let bytes = parse_hex_bytes("39 01 00 00 00 00 04 51 0F").unwrap();
        assert!(matches!(
            CommandSet::from_packets(CmdSetState::Lp, &bytes),
            Err(PanelError::InvalidInput(_))
        ));

        let header_only = parse_hex_bytes("39 01 00").unwrap();
        assert!(CommandSet::from_packets(CmdSetState::Lp, &header_only).is_err());
    }

    #[test]
    fn test_hex_parsing() {
        assert_eq!(parse_hex_bytes("0x51 ff 7").unwrap(), vec![0x51, 0xFF, 0x07]);
        assert!(parse_hex_bytes("51 zz").is_err());
        assert!(parse_hex_bytes("").unwrap().is_empty());
    }

    #[test]
    fn test_cmd_set_names_round_trip() {
        for id in CmdSetId::ALL {
            assert_eq!(id.name().parse::<CmdSetId>().unwrap(), *id);
        }
        assert!("no_such_set".parse::<CmdSetId>().is_err());
    }
}
