//! Display parameter word decoding.
//!
//! A parameter word packs up to seven independent fields, one per nibble
//! group. [`DispParam::decode`] splits a word into typed fields and
//! [`DispParam::actions`] lists them in dispatch order.

use std::fmt;

macro_rules! param_field {
    (
        $(#[$meta:meta])*
        $name:ident, mask = $mask:literal {
            $($(#[$vmeta:meta])* $variant:ident = $value:literal => $label:literal,)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)*
        }

        impl $name {
            /// Bits of the parameter word holding this field.
            pub const MASK: u32 = $mask;

            /// Extract the field from a parameter word.
            pub fn decode(word: u32) -> Option<Self> {
                match word & $mask {
                    $($value => Some(Self::$variant),)*
                    _ => None,
                }
            }

            /// The parameter word selecting this value.
            pub const fn word(self) -> u32 {
                match self {
                    $(Self::$variant => $value,)*
                }
            }

            /// Short name used in logs.
            pub const fn label(self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)*
                }
            }
        }
    };
}

param_field! {
    /// Color temperature and paper modes; accepted but not acted on.
    ColorParam, mask = 0x0000000F {
        Warm = 0x1 => "warm",
        Default = 0x2 => "default",
        Cold = 0x3 => "cold",
        PaperMode8 = 0x5 => "papermode8",
        PaperMode1 = 0x6 => "papermode1",
        PaperMode2 = 0x7 => "papermode2",
        PaperMode3 = 0x8 => "papermode3",
        PaperMode4 = 0x9 => "papermode4",
        PaperMode5 = 0xA => "papermode5",
        PaperMode6 = 0xB => "papermode6",
        PaperMode7 = 0xC => "papermode7",
    }
}

param_field! {
    /// Contrast enhancement.
    CeParam, mask = 0x000000F0 {
        On = 0x10 => "ce on",
        Off = 0xF0 => "ce off",
    }
}

param_field! {
    /// Content adaptive backlight and dimming.
    CabcParam, mask = 0x00000F00 {
        UiOn = 0x100 => "cabc ui on",
        StillOn = 0x200 => "cabc still on",
        MovieOn = 0x300 => "cabc movie on",
        Off = 0x400 => "cabc off",
        SkinCeUiOn = 0x500 => "skin ce cabc ui on",
        SkinCeStillOn = 0x600 => "skin ce cabc still on",
        SkinCeMovieOn = 0x700 => "skin ce cabc movie on",
        SkinCeOff = 0x800 => "skin ce cabc off",
        DimmingOff = 0xE00 => "dimming off",
        DimmingOn = 0xF00 => "dimming on",
    }
}

param_field! {
    /// Automatic current limiting.
    AclParam, mask = 0x0000F000 {
        L1 = 0x1000 => "acl level 1",
        L2 = 0x2000 => "acl level 2",
        L3 = 0x3000 => "acl level 3",
        Off = 0xF000 => "acl off",
    }
}

param_field! {
    /// High brightness, fingerprint, HDR and DC transitions.
    HbmParam, mask = 0x000F0000 {
        HbmOn = 0x10000 => "hbm on",
        HdrOn = 0x20000 => "hbm hdr on",
        Fod2Norm = 0x30000 => "hbm fod to normal",
        DcOn = 0x40000 => "dc on",
        DcOff = 0x50000 => "dc off",
        UnlockSuccess = 0x60000 => "fod unlock success",
        UnlockFail = 0x70000 => "fod unlock fail",
        HdrOff = 0x90000 => "hbm hdr off",
        FodOn = 0xA0000 => "hbm fod on",
        FodOff = 0xB0000 => "hbm fod off",
        HbmOff = 0xF0000 => "hbm off",
    }
}

param_field! {
    /// Color space, doze brightness, backlight resend and CRC.
    CrcParam, mask = 0x00F00000 {
        Normal1 = 0x100000 => "normal mode1",
        DciP3 = 0x200000 => "dci p3",
        Srgb = 0x300000 => "srgb",
        DozeHbm = 0x600000 => "doze hbm",
        DozeLbm = 0x700000 => "doze lbm",
        DozeOff = 0x800000 => "doze off",
        BacklightResend = 0xA00000 => "backlight resend",
        FodBacklight = 0xD00000 => "fod backlight",
        CrcOff = 0xF00000 => "crc off",
    }
}

param_field! {
    /// Fingerprint backlight flag, ELVSS dimming and flat mode.
    FlagParam, mask = 0x0F000000 {
        FodBacklightOn = 0x1000000 => "fod backlight flag on",
        FodBacklightOff = 0x2000000 => "fod backlight flag off",
        ElvssDimmingOn = 0x3000000 => "elvss dimming on",
        ElvssDimmingOff = 0x4000000 => "elvss dimming off",
        FlatModeOn = 0x5000000 => "flat mode on",
        FlatModeOff = 0x6000000 => "flat mode off",
    }
}

/// Bits carrying an explicit FOD backlight level.
pub const FOD_BACKLIGHT_MASK: u32 = 0x1FFF;
/// FOD backlight level meaning "restore the regular backlight".
pub const FOD_BACKLIGHT_RESTORE: u32 = 0x1000;

/// One decoded field, in dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispAction {
    /// Bits 0..4.
    Color(ColorParam),
    /// Bits 4..8.
    Ce(CeParam),
    /// Bits 8..12.
    Cabc(CabcParam),
    /// Bits 12..16.
    Acl(AclParam),
    /// Bits 16..20.
    Hbm(HbmParam),
    /// Bits 20..24, except the FOD backlight form.
    Crc(CrcParam),
    /// Bits 20..24 = 0xD with an explicit level in bits 0..13.
    FodBacklight(u32),
    /// Bits 24..28.
    Flag(FlagParam),
}

impl fmt::Display for DispAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Color(p) => f.write_str(p.label()),
            Self::Ce(p) => f.write_str(p.label()),
            Self::Cabc(p) => f.write_str(p.label()),
            Self::Acl(p) => f.write_str(p.label()),
            Self::Hbm(p) => f.write_str(p.label()),
            Self::Crc(p) => f.write_str(p.label()),
            Self::FodBacklight(FOD_BACKLIGHT_RESTORE) => f.write_str("fod backlight restore"),
            Self::FodBacklight(level) => write!(f, "fod backlight {level}"),
            Self::Flag(p) => f.write_str(p.label()),
        }
    }
}

/// A decoded parameter word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispParam {
    /// The word as received.
    pub raw: u32,
    /// Color field.
    pub color: Option<ColorParam>,
    /// CE field.
    pub ce: Option<CeParam>,
    /// CABC / dimming field.
    pub cabc: Option<CabcParam>,
    /// ACL field.
    pub acl: Option<AclParam>,
    /// HBM field.
    pub hbm: Option<HbmParam>,
    /// Color space / doze field.
    pub crc: Option<CrcParam>,
    /// Explicit FOD backlight level, present when `crc` is the FOD backlight form.
    pub fod_backlight: Option<u32>,
    /// Flag field.
    pub flag: Option<FlagParam>,
}

impl DispParam {
    /// Split `raw` into its fields.
    ///
    /// When bits 20..24 hold 0xD the word carries an explicit FOD backlight
    /// in bits 0..13; those bits and every field below bit 20 are then
    /// ignored.
    pub fn decode(raw: u32) -> Self {
        let mut word = raw;
        let mut fod_backlight = None;
        if word & CrcParam::MASK == CrcParam::FodBacklight.word() {
            fod_backlight = Some(word & FOD_BACKLIGHT_MASK);
            word &= CrcParam::MASK | FlagParam::MASK;
        }
        Self {
            raw,
            color: ColorParam::decode(word),
            ce: CeParam::decode(word),
            cabc: CabcParam::decode(word),
            acl: AclParam::decode(word),
            hbm: HbmParam::decode(word),
            crc: CrcParam::decode(word),
            fod_backlight,
            flag: FlagParam::decode(word),
        }
    }

    /// The recognized fields, lowest bits first.
    pub fn actions(&self) -> Vec<DispAction> {
        let crc = match (self.crc, self.fod_backlight) {
            (Some(CrcParam::FodBacklight), Some(level)) => Some(DispAction::FodBacklight(level)),
            (other, _) => other.map(DispAction::Crc),
        };
        [
            self.color.map(DispAction::Color),
            self.ce.map(DispAction::Ce),
            self.cabc.map(DispAction::Cabc),
            self.acl.map(DispAction::Acl),
            self.hbm.map(DispAction::Hbm),
            crc,
            self.flag.map(DispAction::Flag),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Whether the word may be applied before the panel is initialized.
    pub fn allowed_uninitialized(&self) -> bool {
        matches!(
            FlagParam::decode(self.raw),
            Some(FlagParam::FodBacklightOn | FlagParam::FodBacklightOff)
        ) || self.raw == HbmParam::UnlockSuccess.word()
            || self.raw == HbmParam::UnlockFail.word()
    }

    /// The word requesting FOD backlight `level` (or
    /// [`FOD_BACKLIGHT_RESTORE`]).
    pub const fn fod_backlight_word(level: u32) -> u32 {
        CrcParam::FodBacklight.word() | (level & FOD_BACKLIGHT_MASK)
    }
}
