//! Read-modify engine: copies calibration data into command payloads.

use crate::calibration::CalibrationTable;
use crate::catalog::{ModeCatalog, PatchSite};
use crate::error::PanelError;
use log::debug;

/// Opcode of the brightness command.
pub const OPCODE_BRIGHTNESS: u8 = 0x51;
/// Opcode of the emission pulse command patched on FOD-HBM on.
pub const OPCODE_PULSE: u8 = 0xB2;

/// Check that `site` addresses an existing command in `mode`.
///
/// # Errors
/// [`PanelError::NotFound`] or [`PanelError::IndexOutOfRange`].
pub fn check_site(mode: &ModeCatalog, site: PatchSite) -> Result<(), PanelError> {
    if !mode.contains(site.set) {
        return Err(PanelError::NotFound(site.set));
    }
    let count = mode.count(site.set);
    if site.index >= count {
        return Err(PanelError::IndexOutOfRange {
            set: site.set,
            index: site.index,
            limit: count,
        });
    }
    Ok(())
}

/// Copy `table` into the command at `site`, starting at payload offset 1.
///
/// Copies `min(table.len(), payload.len() - 1)` bytes; the opcode byte is
/// never touched. Returns the number of bytes copied.
///
/// # Errors
/// - [`PanelError::TableNotReady`] if the table has not been read; nothing is written
/// - [`PanelError::NotFound`] / [`PanelError::IndexOutOfRange`] from [`check_site`]
pub fn patch_from_calibration(
    mode: &mut ModeCatalog,
    table: &CalibrationTable,
    site: PatchSite,
) -> Result<usize, PanelError> {
    if !table.is_read_done() {
        return Err(PanelError::TableNotReady(table.name()));
    }
    check_site(mode, site)?;

    let payload = mode.payload_mut(site)?;
    let n = table.len().min(payload.len().saturating_sub(1));
    payload[1..1 + n].copy_from_slice(&table.bytes()[..n]);
    debug!(
        "{}Hz {}[{}] <- {} ({} bytes)",
        mode.refresh_rate,
        site.set,
        site.index,
        table.name(),
        n
    );
    Ok(n)
}

/// The two parameter bytes of a 0x51 write carrying an 11-bit level.
pub fn brightness_bytes(level: u32) -> [u8; 2] {
    [((level >> 8) & 0x07) as u8, (level & 0xFF) as u8]
}

/// Subtract `offset` from a big-endian 16-bit register value, wrapping.
pub fn subtract_offset(value: [u8; 2], offset: u8) -> [u8; 2] {
    u16::from_be_bytes(value)
        .wrapping_sub(u16::from(offset))
        .to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CmdSetId, CmdSetState, Command, CommandSet};

    fn mode() -> ModeCatalog {
        let mut mode = ModeCatalog::new(60);
        mode.insert(
            CmdSetId::TimingSwitch,
            CommandSet::new(
                CmdSetState::Lp,
                vec![
                    Command::dcs_write(vec![0xF0, 0x5A, 0x5A]),
                    Command::dcs_write(vec![0xC8, 0, 0, 0, 0]),
                ],
            ),
        );
        mode
    }

    fn table(bytes: &[u8]) -> CalibrationTable {
        let mut t = CalibrationTable::new("otp_c8", bytes.len());
        t.fill(bytes);
        t
    }

    #[test]
    fn test_unread_table_refused() {
        let mut m = mode();
        let t = table(&[1, 2]);
        let site = PatchSite::new(CmdSetId::TimingSwitch, 1);
        assert!(matches!(
            patch_from_calibration(&mut m, &t, site),
            Err(PanelError::TableNotReady("otp_c8"))
        ));
        assert_eq!(
            m.get(CmdSetId::TimingSwitch).unwrap().cmds[1].payload,
            vec![0xC8, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_copy_is_clamped_to_payload() {
        let mut m = mode();
        let site = PatchSite::new(CmdSetId::TimingSwitch, 1);

        let mut short = table(&[7, 8]);
        short.mark_read();
        assert_eq!(patch_from_calibration(&mut m, &short, site).unwrap(), 2);
        assert_eq!(
            m.get(CmdSetId::TimingSwitch).unwrap().cmds[1].payload,
            vec![0xC8, 7, 8, 0, 0]
        );

        let mut long = table(&[1, 2, 3, 4, 5, 6]);
        long.mark_read();
        assert_eq!(patch_from_calibration(&mut m, &long, site).unwrap(), 4);
        assert_eq!(
            m.get(CmdSetId::TimingSwitch).unwrap().cmds[1].payload,
            vec![0xC8, 1, 2, 3, 4]
        );
    }

    #[test]
    fn test_index_must_be_below_count() {
        let mut m = mode();
        let mut t = table(&[1]);
        t.mark_read();
        assert!(matches!(
            patch_from_calibration(&mut m, &t, PatchSite::new(CmdSetId::TimingSwitch, 2)),
            Err(PanelError::IndexOutOfRange { index: 2, limit: 2, .. })
        ));
        assert!(matches!(
            patch_from_calibration(&mut m, &t, PatchSite::new(CmdSetId::DcOn, 0)),
            Err(PanelError::NotFound(CmdSetId::DcOn))
        ));
    }

    #[test]
    fn test_byte_helpers() {
        assert_eq!(brightness_bytes(0x7FF), [0x07, 0xFF]);
        assert_eq!(brightness_bytes(0x1B8), [0x01, 0xB8]);
        assert_eq!(subtract_offset([0x01, 0x10], 0x20), [0x00, 0xF0]);
        assert_eq!(subtract_offset([0x01, 0x30], 0x20), [0x01, 0x10]);
    }
}
