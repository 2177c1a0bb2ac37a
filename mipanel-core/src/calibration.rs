//! Calibration tables read from the panel.
//!
//! Tables start empty, are filled once per power-on by the acquisition
//! routines and are consumed by the patch engine any number of times. A
//! table refuses to be used for patching until it has been read.

use crate::config::{DC_LUT_BLOCK, DcConfig, GammaConfig};
use std::fmt::Write as _;

/// A fixed-size byte table read from panel hardware.
#[derive(Debug, Clone)]
pub struct CalibrationTable {
    name: &'static str,
    bytes: Vec<u8>,
    read_done: bool,
    update_done: bool,
}

impl CalibrationTable {
    /// An empty (zeroed, unread) table of `len` bytes.
    pub fn new(name: &'static str, len: usize) -> Self {
        Self {
            name,
            bytes: vec![0; len],
            read_done: false,
            update_done: false,
        }
    }

    /// Name used in logs and errors.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The table contents.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Table length.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the table has zero length.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the contents came from the panel.
    pub fn is_read_done(&self) -> bool {
        self.read_done
    }

    /// Whether the contents were patched into the catalog.
    pub fn is_update_done(&self) -> bool {
        self.update_done
    }

    /// Overwrite the start of the table with `data`, leaving `read_done` as is.
    pub fn fill(&mut self, data: &[u8]) {
        let n = data.len().min(self.bytes.len());
        self.bytes[..n].copy_from_slice(&data[..n]);
    }

    /// Set one byte; out-of-range writes are ignored.
    pub fn set(&mut self, index: usize, value: u8) {
        if let Some(b) = self.bytes.get_mut(index) {
            *b = value;
        }
    }

    /// Mark the contents as read.
    pub fn mark_read(&mut self) {
        self.read_done = true;
    }

    /// Mark the contents as applied.
    pub fn mark_updated(&mut self) {
        self.update_done = true;
    }

    /// Zero the table and clear both flags.
    pub fn reset(&mut self) {
        self.bytes.fill(0);
        self.read_done = false;
        self.update_done = false;
    }
}

/// Sum of all bytes.
pub fn byte_sum(bytes: &[u8]) -> u32 {
    bytes.iter().map(|&b| u32::from(b)).sum()
}

/// Derive the DC "enter" LUT: each 5-byte block is filled with its last byte.
///
/// A trailing partial block is copied unchanged.
pub fn derive_enter_lut(exit: &[u8]) -> Vec<u8> {
    let mut enter = exit.to_vec();
    for block in enter.chunks_exact_mut(DC_LUT_BLOCK) {
        let last = block[DC_LUT_BLOCK - 1];
        block.fill(last);
    }
    enter
}

/// The six gamma tables plus flash checksum bookkeeping.
///
/// The OTP tables carry the 60 Hz gamma, the flash tables the 90 Hz gamma.
#[derive(Debug, Clone)]
pub struct GammaCalibration {
    /// 0xC8 from OTP.
    pub otp_c8: CalibrationTable,
    /// 0xC9 from OTP.
    pub otp_c9: CalibrationTable,
    /// 0xB3 from OTP.
    pub otp_b3: CalibrationTable,
    /// 0xC8 from flash.
    pub flash_c8: CalibrationTable,
    /// 0xC9 from flash.
    pub flash_c9: CalibrationTable,
    /// 0xB3 from flash.
    pub flash_b3: CalibrationTable,
    /// Checksum bytes reported by the panel, big-endian.
    pub flash_checksum: [u8; 2],
    /// Sum of the flash bytes preceding the checksum.
    pub running_sum: u16,
    /// 60 Hz timing-switch set patched.
    pub update_done_60hz: bool,
    /// 90 Hz timing-switch set patched.
    pub update_done_90hz: bool,
    total: usize,
}

impl GammaCalibration {
    /// Empty tables sized from `cfg`.
    pub fn new(cfg: &GammaConfig) -> Self {
        Self {
            otp_c8: CalibrationTable::new("otp_c8", cfg.c8_len),
            otp_c9: CalibrationTable::new("otp_c9", cfg.c9_len),
            otp_b3: CalibrationTable::new("otp_b3", cfg.b3_len),
            flash_c8: CalibrationTable::new("flash_c8", cfg.c8_len),
            flash_c9: CalibrationTable::new("flash_c9", cfg.c9_len),
            flash_b3: CalibrationTable::new("flash_b3", cfg.b3_len),
            flash_checksum: [0; 2],
            running_sum: 0,
            update_done_60hz: false,
            update_done_90hz: false,
            total: cfg.flash_read_total_param,
        }
    }

    /// Whether every table was read.
    pub fn is_read_done(&self) -> bool {
        self.tables().iter().all(|t| t.is_read_done())
    }

    /// Mark every table as read.
    pub fn mark_read(&mut self) {
        for t in self.tables_mut() {
            t.mark_read();
        }
    }

    /// The checksum the panel reported.
    pub fn reported_checksum(&self) -> u16 {
        u16::from_be_bytes(self.flash_checksum)
    }

    /// Start a flash pass.
    pub fn begin_flash_pass(&mut self) {
        self.running_sum = 0;
    }

    /// Store flash byte `i` of the current pass.
    ///
    /// Bytes land in the C8, C9 then B3 tables by position; the last two are
    /// the checksum, everything before them is summed.
    pub fn store_flash_byte(&mut self, i: usize, value: u8) {
        let c8 = self.flash_c8.len();
        let c9 = self.flash_c9.len();
        let b3 = self.flash_b3.len();
        if i < c8 {
            self.flash_c8.set(i, value);
        } else if i < c8 + c9 {
            self.flash_c9.set(i - c8, value);
        } else if i < c8 + c9 + b3 {
            self.flash_b3.set(i - c8 - c9, value);
        }

        let body = self.total.saturating_sub(2);
        if i < body {
            self.running_sum = self.running_sum.wrapping_add(u16::from(value));
        } else if i == body {
            self.flash_checksum[0] = value;
        } else if i == body + 1 {
            self.flash_checksum[1] = value;
        }
    }

    /// Whether the last pass matched its checksum.
    pub fn checksum_ok(&self) -> bool {
        self.running_sum == self.reported_checksum()
    }

    /// Zero everything.
    pub fn reset(&mut self) {
        for t in self.tables_mut() {
            t.reset();
        }
        self.flash_checksum = [0; 2];
        self.running_sum = 0;
        self.update_done_60hz = false;
        self.update_done_90hz = false;
    }

    fn tables(&self) -> [&CalibrationTable; 6] {
        [
            &self.otp_c8,
            &self.otp_c9,
            &self.otp_b3,
            &self.flash_c8,
            &self.flash_c9,
            &self.flash_b3,
        ]
    }

    fn tables_mut(&mut self) -> [&mut CalibrationTable; 6] {
        [
            &mut self.otp_c8,
            &mut self.otp_c9,
            &mut self.otp_b3,
            &mut self.flash_c8,
            &mut self.flash_c9,
            &mut self.flash_b3,
        ]
    }

    /// Human-readable dump: every table at 8 bytes per line, then the
    /// reported checksum and the computed sum.
    pub fn report(&self) -> String {
        let sections = [
            ("Gamma 0xC8 OTP", "60Hz", &self.otp_c8),
            ("Gamma 0xC9 OTP", "60Hz", &self.otp_c9),
            ("Gamma 0xB3 OTP", "60Hz", &self.otp_b3),
            ("Gamma Flash 0xC8", "90Hz", &self.flash_c8),
            ("Gamma Flash 0xC9", "90Hz", &self.flash_c9),
            ("Gamma Flash 0xB3", "90Hz", &self.flash_b3),
        ];
        let mut out = String::new();
        for (title, rate, table) in sections {
            let _ = writeln!(out, "{} Read {} Parameter ({})", title, table.len(), rate);
            for line in table.bytes().chunks(8) {
                let row: Vec<String> = line.iter().map(|b| format!("0x{b:02X}")).collect();
                let _ = writeln!(out, "{}", row.join(","));
            }
        }
        let _ = writeln!(
            out,
            "Gamma Flash Read Checksum Decimal({}) (90Hz)",
            self.reported_checksum()
        );
        let _ = writeln!(
            out,
            "Gamma Flash Read {} Parameter SUM({}) (90Hz)",
            self.total.saturating_sub(2),
            self.running_sum
        );
        out
    }
}

/// DC dimming lookup tables.
#[derive(Debug, Clone)]
pub struct DcCalibration {
    /// Table written when DC dimming is switched off.
    pub exit_lut: CalibrationTable,
    /// Table written when DC dimming is switched on.
    pub enter_lut: CalibrationTable,
}

impl DcCalibration {
    /// Empty tables sized from `cfg`.
    pub fn new(cfg: &DcConfig) -> Self {
        Self {
            exit_lut: CalibrationTable::new("exit_dc_lut", cfg.lut_len),
            enter_lut: CalibrationTable::new("enter_dc_lut", cfg.lut_len),
        }
    }

    /// Store a verified exit LUT and derive the enter LUT from it.
    pub fn store(&mut self, exit: &[u8]) {
        self.exit_lut.fill(exit);
        let enter = derive_enter_lut(self.exit_lut.bytes());
        self.enter_lut.fill(&enter);
        self.exit_lut.mark_read();
        self.enter_lut.mark_read();
    }

    /// Whether both tables were read.
    pub fn is_read_done(&self) -> bool {
        self.exit_lut.is_read_done() && self.enter_lut.is_read_done()
    }

    /// Zero both tables.
    pub fn reset(&mut self) {
        self.exit_lut.reset();
        self.enter_lut.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_gamma() -> GammaCalibration {
        GammaCalibration::new(&GammaConfig {
            flash_read_total_param: 8,
            c8_len: 2,
            c9_len: 3,
            b3_len: 1,
            ..GammaConfig::default()
        })
    }

    #[test]
    fn test_enter_lut_repeats_block_tail() {
        let exit: Vec<u8> = (1..=10).collect();
        assert_eq!(derive_enter_lut(&exit), vec![5, 5, 5, 5, 5, 10, 10, 10, 10, 10]);
        assert_eq!(derive_enter_lut(&[1, 2, 3]), vec![1, 2, 3]);
    }

    #[test]
    fn test_flash_bytes_routed_and_summed() {
        let mut g = small_gamma();
        g.begin_flash_pass();
        let stream = [1u8, 2, 3, 4, 5, 6, 0x00, 21];
        for (i, b) in stream.iter().enumerate() {
            g.store_flash_byte(i, *b);
        }
        assert_eq!(g.flash_c8.bytes(), &[1, 2]);
        assert_eq!(g.flash_c9.bytes(), &[3, 4, 5]);
        assert_eq!(g.flash_b3.bytes(), &[6]);
        assert_eq!(g.running_sum, 21);
        assert_eq!(g.reported_checksum(), 21);
        assert!(g.checksum_ok());
    }

    #[test]
    fn test_read_done_and_reset() {
        let mut g = small_gamma();
        assert!(!g.is_read_done());
        g.mark_read();
        assert!(g.is_read_done());
        g.reset();
        assert!(!g.is_read_done());

        let mut dc = DcCalibration::new(&DcConfig { lut_len: 5, update_d2_index: 0 });
        dc.store(&[9, 8, 7, 6, 5]);
        assert!(dc.is_read_done());
        assert_eq!(dc.enter_lut.bytes(), &[5, 5, 5, 5, 5]);
    }

    #[test]
    fn test_report_layout() {
        let mut g = small_gamma();
        g.otp_c9.fill(&[0xAB, 0x01, 0xFF]);
        let report = g.report();
        assert!(report.starts_with("Gamma 0xC8 OTP Read 2 Parameter (60Hz)\n0x00,0x00\n"));
        assert!(report.contains("Gamma 0xC9 OTP Read 3 Parameter (60Hz)\n0xAB,0x01,0xFF\n"));
        assert!(report.ends_with("Gamma Flash Read 6 Parameter SUM(0) (90Hz)\n"));
    }
}
