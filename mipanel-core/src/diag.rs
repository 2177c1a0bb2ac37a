//! Raw command injection for bring-up and debugging.

use crate::command::{CmdSetState, CommandSet, parse_hex_bytes};
use crate::error::PanelError;
use crate::panel::PanelInner;
use crate::transport::{DsiHost, READ_BUF_CAPACITY, ReadRequest};
use log::info;
use std::fmt::Write as _;

fn parse_decimal(token: Option<&str>, what: &str) -> Result<usize, PanelError> {
    let token = token.ok_or_else(|| PanelError::InvalidInput(format!("missing {what}")))?;
    token
        .parse()
        .map_err(|_| PanelError::InvalidInput(format!("bad {what} '{token}'")))
}

impl<H: DsiHost> PanelInner<H> {
    /// `is_read rlen packet-bytes...`; the first two tokens are decimal.
    pub(crate) fn write_mipi_reg(&mut self, text: &str) -> Result<(), PanelError> {
        if !self.initialized {
            return Err(PanelError::NotReady);
        }

        let mut tokens = text.split_whitespace();
        let is_read = parse_decimal(tokens.next(), "read flag")? != 0;
        let rlen = parse_decimal(tokens.next(), "read length")?;
        if rlen > READ_BUF_CAPACITY {
            return Err(PanelError::InvalidInput(format!(
                "read length {rlen} exceeds {READ_BUF_CAPACITY}"
            )));
        }
        let bytes = parse_hex_bytes(&tokens.collect::<Vec<_>>().join(" "))?;
        let set = CommandSet::from_packets(CmdSetState::Lp, &bytes)?;

        self.scratch = ReadRequest::new(set, rlen);
        self.scratch.is_read = is_read;
        if is_read {
            let n = self.transport.read(&mut self.scratch, self.initialized)?;
            info!("[{}] mipi_reg read {} bytes", self.name(), n);
        } else {
            self.transport.send(&self.scratch.cmd)?;
            info!("[{}] mipi_reg sent {} commands", self.name(), self.scratch.cmd.count());
        }
        Ok(())
    }

    pub(crate) fn read_mipi_reg(&self) -> String {
        if !self.scratch.is_read {
            return String::new();
        }
        let data = self.scratch.data();
        if data.is_empty() {
            return String::new();
        }
        let mut out = String::with_capacity(data.len() * 5 + 1);
        for (i, b) in data.iter().enumerate() {
            let sep = if i + 1 == data.len() { '\n' } else { ',' };
            let _ = write!(out, "0x{b:02X}{sep}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use crate::mock::{ManualScheduler, MockClock, MockHost};
    use crate::{MiPanel, MsgFlags, PanelConfig, PanelError};
    use std::sync::Arc;

    fn panel() -> (MiPanel<MockHost>, MockHost) {
        let host = MockHost::new();
        let panel = MiPanel::with_runtime(
            PanelConfig::from_json(r#"{ "modes": [{ "refresh_rate": 60 }] }"#).unwrap(),
            host.clone(),
            Arc::new(MockClock::new()),
            Arc::new(ManualScheduler::new()),
        )
        .unwrap();
        (panel, host)
    }

    #[test]
    fn test_write_then_read_back() {
        let (p, host) = panel();
        assert!(matches!(
            p.write_mipi_reg("0 0 39 01 00 00 00 00 01 29"),
            Err(PanelError::NotReady)
        ));
        p.set_initialized(true);

        p.write_mipi_reg("0 0 39 01 00 00 00 00 03 F0 5A 5A").unwrap();
        let sent = host.sent();
        assert_eq!(sent[0].payload, vec![0xF0, 0x5A, 0x5A]);
        assert!(sent[0].flags.contains(MsgFlags::USE_LPM));
        assert_eq!(p.read_mipi_reg(), "");

        host.set_register(0x0A, vec![0x9C, 0x01, 0xFF]);
        p.write_mipi_reg("1 2 06 01 00 00 00 00 01 0A").unwrap();
        assert_eq!(p.read_mipi_reg(), "0x9C,0x01\n");

        p.write_mipi_reg("1 1 06 01 00 00 00 00 01 0A").unwrap();
        assert_eq!(p.read_mipi_reg(), "0x9C\n");

        assert!(matches!(
            p.write_mipi_reg("1 0 06 01 00 00 00 00 01 0A"),
            Err(PanelError::Transport(_))
        ));
        assert_eq!(p.read_mipi_reg(), "");
    }

    #[test]
    fn test_malformed_input() {
        let (p, _) = panel();
        p.set_initialized(true);
        for text in ["", "x 1 06", "1 257 06 01 00 00 00 00 01 0A", "0 0 39 01 00 00 00 00 05 29"] {
            assert!(matches!(p.write_mipi_reg(text), Err(PanelError::InvalidInput(_))), "{text}");
        }
    }
}
