//! Per-mode catalog of configured command sets.

use crate::command::{CmdSetId, CommandSet};
use crate::error::PanelError;
use log::debug;
use std::collections::HashMap;

/// Addresses one command inside a command set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchSite {
    /// The command set.
    pub set: CmdSetId,
    /// Index of the command inside the set.
    pub index: usize,
}

impl PatchSite {
    /// Shorthand constructor.
    pub const fn new(set: CmdSetId, index: usize) -> Self {
        Self { set, index }
    }
}

/// Command sets of one display mode.
#[derive(Debug, Clone, Default)]
pub struct ModeCatalog {
    /// Refresh rate of the mode, in Hz.
    pub refresh_rate: u32,
    sets: HashMap<CmdSetId, CommandSet>,
}

impl ModeCatalog {
    /// An empty catalog for a mode running at `refresh_rate`.
    pub fn new(refresh_rate: u32) -> Self {
        Self {
            refresh_rate,
            sets: HashMap::new(),
        }
    }

    /// Add or replace a set.
    pub fn insert(&mut self, id: CmdSetId, set: CommandSet) {
        self.sets.insert(id, set);
    }

    /// Look up a set.
    ///
    /// # Errors
    /// [`PanelError::NotFound`] if the set was never configured.
    pub fn get(&self, id: CmdSetId) -> Result<&CommandSet, PanelError> {
        self.sets.get(&id).ok_or(PanelError::NotFound(id))
    }

    /// Whether `id` is configured for this mode.
    pub fn contains(&self, id: CmdSetId) -> bool {
        self.sets.contains_key(&id)
    }

    /// Number of commands in `id`, or 0 when it is not configured.
    pub fn count(&self, id: CmdSetId) -> usize {
        self.sets.get(&id).map_or(0, CommandSet::count)
    }

    /// Mutable payload of the command at `site`.
    ///
    /// # Errors
    /// [`PanelError::NotFound`] or [`PanelError::IndexOutOfRange`].
    pub fn payload_mut(&mut self, site: PatchSite) -> Result<&mut Vec<u8>, PanelError> {
        let set = self.sets.get_mut(&site.set).ok_or(PanelError::NotFound(site.set))?;
        let count = set.cmds.len();
        set.cmds
            .get_mut(site.index)
            .map(|cmd| &mut cmd.payload)
            .ok_or(PanelError::IndexOutOfRange {
                set: site.set,
                index: site.index,
                limit: count,
            })
    }

    /// Overwrite `bytes.len()` payload bytes at `offset` of the command at `site`.
    ///
    /// When `opcode` is given, `payload[0]` must match it before anything is
    /// written.
    ///
    /// # Errors
    /// - [`PanelError::NotFound`] if the set is not configured
    /// - [`PanelError::IndexOutOfRange`] if `site.index` or `offset + len` is out of range
    /// - [`PanelError::InvalidOpcode`] if the sanity opcode does not match
    pub fn patch_bytes(
        &mut self,
        site: PatchSite,
        offset: usize,
        bytes: &[u8],
        opcode: Option<u8>,
    ) -> Result<(), PanelError> {
        let payload = self.payload_mut(site)?;

        if let Some(expected) = opcode {
            let found = payload.first().copied().unwrap_or_default();
            if found != expected || payload.is_empty() {
                return Err(PanelError::InvalidOpcode {
                    set: site.set,
                    expected,
                    found,
                });
            }
        }

        let end = offset + bytes.len();
        let len = payload.len();
        let target = payload
            .get_mut(offset..end)
            .ok_or(PanelError::IndexOutOfRange {
                set: site.set,
                index: end,
                limit: len,
            })?;
        target.copy_from_slice(bytes);
        debug!(
            "patched {}[{}] at {}: {:02X?}",
            site.set, site.index, offset, bytes
        );
        Ok(())
    }
}

/// Command sets for every display mode, plus the active mode.
#[derive(Debug, Clone, Default)]
pub struct CommandCatalog {
    modes: Vec<ModeCatalog>,
    current: usize,
}

impl CommandCatalog {
    /// Build a catalog; the first mode becomes the current one.
    pub fn new(modes: Vec<ModeCatalog>) -> Self {
        Self { modes, current: 0 }
    }

    /// All modes.
    pub fn modes(&self) -> &[ModeCatalog] {
        &self.modes
    }

    /// All modes, mutably.
    pub fn modes_mut(&mut self) -> &mut [ModeCatalog] {
        &mut self.modes
    }

    /// Index of the active mode.
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Make the mode running at `refresh_rate` the active one.
    ///
    /// Returns `false` (and keeps the current mode) if no mode matches.
    pub fn select_refresh_rate(&mut self, refresh_rate: u32) -> bool {
        match self.modes.iter().position(|m| m.refresh_rate == refresh_rate) {
            Some(idx) => {
                self.current = idx;
                true
            }
            None => false,
        }
    }

    /// The active mode.
    ///
    /// # Errors
    /// [`PanelError::Config`] if no mode is configured.
    pub fn current(&self) -> Result<&ModeCatalog, PanelError> {
        self.modes
            .get(self.current)
            .ok_or_else(|| PanelError::Config("no display mode configured".into()))
    }

    /// The active mode, mutably.
    ///
    /// # Errors
    /// [`PanelError::Config`] if no mode is configured.
    pub fn current_mut(&mut self) -> Result<&mut ModeCatalog, PanelError> {
        self.modes
            .get_mut(self.current)
            .ok_or_else(|| PanelError::Config("no display mode configured".into()))
    }

    /// Look up a set in the active mode.
    ///
    /// # Errors
    /// [`PanelError::NotFound`] if the set is not configured for the active mode.
    pub fn get_command_set(&self, id: CmdSetId) -> Result<&CommandSet, PanelError> {
        self.current()?.get(id)
    }

    /// Patch a command in the active mode; see [`ModeCatalog::patch_bytes`].
    ///
    /// # Errors
    /// Same as [`ModeCatalog::patch_bytes`].
    pub fn patch_bytes(
        &mut self,
        site: PatchSite,
        offset: usize,
        bytes: &[u8],
        opcode: Option<u8>,
    ) -> Result<(), PanelError> {
        self.current_mut()?.patch_bytes(site, offset, bytes, opcode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CmdSetState, Command};

    fn catalog() -> CommandCatalog {
        let mut mode = ModeCatalog::new(60);
        mode.insert(
            CmdSetId::HbmFodOff,
            CommandSet::new(
                CmdSetState::Lp,
                vec![
                    Command::dcs_write(vec![0xF0, 0x5A, 0x5A]),
                    Command::dcs_write(vec![0x51, 0x00, 0x00]),
                ],
            ),
        );
        let mut fast = ModeCatalog::new(90);
        fast.insert(CmdSetId::TimingSwitch, CommandSet::default());
        CommandCatalog::new(vec![mode, fast])
    }

    #[test]
    fn test_get_missing_set() {
        let cat = catalog();
        assert!(matches!(
            cat.get_command_set(CmdSetId::DozeHbm),
            Err(PanelError::NotFound(CmdSetId::DozeHbm))
        ));
        assert_eq!(cat.get_command_set(CmdSetId::HbmFodOff).unwrap().count(), 2);
    }

    #[test]
    fn test_patch_bytes_checks_opcode_and_bounds() {
        let mut cat = catalog();
        let site = PatchSite::new(CmdSetId::HbmFodOff, 1);

        cat.patch_bytes(site, 1, &[0x07, 0xFF], Some(0x51)).unwrap();
        let set = cat.get_command_set(CmdSetId::HbmFodOff).unwrap();
        assert_eq!(set.cmds[1].payload, vec![0x51, 0x07, 0xFF]);
        assert_eq!(set.cmds[0].payload, vec![0xF0, 0x5A, 0x5A]);

        let wrong = PatchSite::new(CmdSetId::HbmFodOff, 0);
        assert!(matches!(
            cat.patch_bytes(wrong, 1, &[0x01], Some(0x51)),
            Err(PanelError::InvalidOpcode { expected: 0x51, found: 0xF0, .. })
        ));

        assert!(matches!(
            cat.patch_bytes(site, 2, &[0x01, 0x02], None),
            Err(PanelError::IndexOutOfRange { index: 4, limit: 3, .. })
        ));

        let past_end = PatchSite::new(CmdSetId::HbmFodOff, 2);
        assert!(matches!(
            cat.patch_bytes(past_end, 1, &[0x01], None),
            Err(PanelError::IndexOutOfRange { index: 2, limit: 2, .. })
        ));
        assert_eq!(
            cat.get_command_set(CmdSetId::HbmFodOff).unwrap().cmds[1].payload,
            vec![0x51, 0x07, 0xFF]
        );
    }

    #[test]
    fn test_select_refresh_rate() {
        let mut cat = catalog();
        assert!(cat.select_refresh_rate(90));
        assert_eq!(cat.current_index(), 1);
        assert!(cat.get_command_set(CmdSetId::HbmFodOff).is_err());
        assert!(!cat.select_refresh_rate(120));
        assert_eq!(cat.current_index(), 1);
    }
}
