//! Interactive console for a simulated panel.
//!
//! Loads a panel configuration, wires it to a [`MockHost`] seeded with
//! plausible calibration registers, and executes one command per line from
//! stdin.

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use log::{debug, info};
use mipanel_core::{DozeBrightness, MiPanel, MockHost, PanelConfig, PowerMode};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "mipanel",
    about = "Drive a simulated DSI panel from the command line",
    version
)]
struct Cli {
    /// Panel configuration (JSON)
    #[arg(short, long, default_value = "mipanel/panels/sample_panel.json")]
    config: PathBuf,

    /// Read commands from this file instead of stdin
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Leave the simulated panel powered off at startup
    #[arg(long)]
    no_enable: bool,
}

// ============================================================================
// Console commands
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Cmd {
    DispParam(u32),
    Doze(DozeBrightness),
    Power(PowerMode),
    Backlight(u32),
    Rate(u32),
    MipiRegWrite(String),
    MipiRegRead,
    Gamma,
    GammaReport,
    SwitchGamma(u32),
    Dc,
    Elvss,
    Greenish,
    WhitePoint,
    Alpha(u32),
    Unlock(bool),
    Enable,
    Reset,
    State,
    Help,
    Quit,
}

const HELP: &str = "\
commands:
  disp_param <hex>        apply a display parameter word
  doze <0|1|2>            request doze brightness (normal, hbm, lbm)
  power <on|lp1|lp2|off>  report a power mode change
  backlight <n>           set the backlight level
  rate <hz>               select the display mode
  mipi_reg <text>         raw write/read: <is_read> <rlen> <packet bytes..>
  mipi_reg?               show the last raw read
  gamma                   read gamma calibration and patch the mode sets
  gamma?                  show the gamma calibration report
  switch_gamma <60|90>    send the calibrated timing switch
  dc                      read the DC LUT and patch the DC sets
  elvss                   read the ELVSS dimming register and patch
  greenish                read and apply the greenish gamma fix
  white_point?            show the white point coordinates
  alpha <brightness>      show the FOD dim-layer alpha
  unlock <0|1>            report a fingerprint unlock
  enable                  run the panel-on sequence
  reset                   forget calibration and state
  state?                  show the control state
  quit";

fn parse_num(token: Option<&str>, what: &str) -> Result<u32> {
    let token = token.ok_or_else(|| anyhow!("missing {what}"))?;
    token
        .parse()
        .with_context(|| format!("bad {what} '{token}'"))
}

fn parse_hex(token: Option<&str>) -> Result<u32> {
    let token = token.ok_or_else(|| anyhow!("missing parameter word"))?;
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u32::from_str_radix(digits, 16).with_context(|| format!("bad hex word '{token}'"))
}

fn parse_power(token: Option<&str>) -> Result<PowerMode> {
    match token {
        Some("on") => Ok(PowerMode::On),
        Some("lp1") => Ok(PowerMode::Lp1),
        Some("lp2") => Ok(PowerMode::Lp2),
        Some("off") => Ok(PowerMode::Off),
        Some(other) => bail!("unknown power mode '{other}'"),
        None => bail!("missing power mode"),
    }
}

/// Parse one console line. Blank lines and `#` comments yield `None`.
fn parse_line(line: &str) -> Result<Option<Cmd>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let mut args = rest.split_whitespace();

    let cmd = match word {
        "disp_param" => Cmd::DispParam(parse_hex(args.next())?),
        "doze" => {
            let n = parse_num(args.next(), "doze brightness")?;
            Cmd::Doze(
                DozeBrightness::from_index(n)
                    .ok_or_else(|| anyhow!("doze brightness {n} out of range"))?,
            )
        }
        "power" => Cmd::Power(parse_power(args.next())?),
        "backlight" => Cmd::Backlight(parse_num(args.next(), "backlight level")?),
        "rate" => Cmd::Rate(parse_num(args.next(), "refresh rate")?),
        "mipi_reg" if rest.is_empty() => bail!("missing register text"),
        "mipi_reg" => Cmd::MipiRegWrite(rest.to_string()),
        "mipi_reg?" => Cmd::MipiRegRead,
        "gamma" => Cmd::Gamma,
        "gamma?" => Cmd::GammaReport,
        "switch_gamma" => Cmd::SwitchGamma(parse_num(args.next(), "refresh rate")?),
        "dc" => Cmd::Dc,
        "elvss" => Cmd::Elvss,
        "greenish" => Cmd::Greenish,
        "white_point?" => Cmd::WhitePoint,
        "alpha" => Cmd::Alpha(parse_num(args.next(), "brightness")?),
        "unlock" => Cmd::Unlock(parse_num(args.next(), "unlock flag")? != 0),
        "enable" => Cmd::Enable,
        "reset" => Cmd::Reset,
        "state?" => Cmd::State,
        "help" | "?" => Cmd::Help,
        "quit" | "exit" => Cmd::Quit,
        other => bail!("unknown command '{other}' (try 'help')"),
    };
    Ok(Some(cmd))
}

// ============================================================================
// Simulation
// ============================================================================

/// A host whose registers answer the calibration reads the configuration
/// asks for.
fn simulated_host(cfg: &PanelConfig) -> MockHost {
    let host = MockHost::new();

    if let Some(gamma) = &cfg.gamma {
        host.set_register(0xC8, ramp(0x10, gamma.c8_len));
        host.set_register(0xC9, ramp(0x30, gamma.c9_len));
        // The first two B3 bytes are skipped by the reader.
        let mut b3 = vec![0xFF, 0xFF];
        b3.extend(ramp(0x50, gamma.b3_len));
        host.set_register(0xB3, b3);

        let mut image = ramp(0x80, gamma.flash_read_total_param.saturating_sub(2));
        let sum = image.iter().map(|&b| u32::from(b)).sum::<u32>();
        image.extend([(sum >> 8) as u8, sum as u8]);
        host.with_flash(0xC1, 0xFB, vec![image]);
    }
    if let Some(dc) = &cfg.dc {
        host.set_register(0xD2, ramp(0x01, dc.lut_len));
    }
    if let Some(wp) = &cfg.white_point {
        host.set_register(0xA1, ramp(0x40, wp.reg_read_len));
    }
    if let Some(greenish) = &cfg.greenish_gamma {
        host.set_register(0xB7, ramp(0x20, greenish.read_len));
    }
    host.set_register(0xB5, vec![0x9C]);
    host
}

fn ramp(start: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| start.wrapping_add(i as u8)).collect()
}

// ============================================================================
// Execution
// ============================================================================

fn execute(panel: &MiPanel<MockHost>, host: &MockHost, cmd: Cmd) -> Result<Option<String>> {
    let out = match cmd {
        Cmd::DispParam(word) => {
            let report = panel.set_disp_param(word)?;
            Some(report.to_string())
        }
        Cmd::Doze(doze) => {
            panel.set_doze_brightness(doze)?;
            Some(format!("doze brightness: {}", panel.doze_brightness()))
        }
        Cmd::Power(mode) => {
            panel.set_power_mode(mode);
            None
        }
        Cmd::Backlight(level) => {
            panel.set_backlight(level)?;
            None
        }
        Cmd::Rate(hz) => {
            panel.select_refresh_rate(hz)?;
            None
        }
        Cmd::MipiRegWrite(text) => {
            panel.write_mipi_reg(&text)?;
            None
        }
        Cmd::MipiRegRead => Some(panel.read_mipi_reg()),
        Cmd::Gamma => {
            panel.acquire_gamma()?;
            panel.update_gamma_param()?;
            None
        }
        Cmd::GammaReport => Some(panel.gamma_report()?),
        Cmd::SwitchGamma(hz) => Some(format!("switched: {}", panel.switch_gamma(hz)?)),
        Cmd::Dc => {
            panel.acquire_dc_lut()?;
            panel.update_dc_param()?;
            None
        }
        Cmd::Elvss => {
            panel.update_elvss_dimming()?;
            None
        }
        Cmd::Greenish => {
            panel.read_greenish_gamma()?;
            panel.update_greenish_gamma()?;
            None
        }
        Cmd::WhitePoint => Some(panel.read_white_point()?),
        Cmd::Alpha(brightness) => Some(match panel.fod_dimlayer_alpha(brightness) {
            Some(alpha) => format!("alpha: {alpha}"),
            None => "fod dim layer not configured".to_string(),
        }),
        Cmd::Unlock(success) => {
            panel.set_layer_fod_unlock(success);
            None
        }
        Cmd::Enable => {
            panel.on_panel_enabled();
            None
        }
        Cmd::Reset => {
            panel.reinitialize();
            None
        }
        Cmd::State => {
            let st = panel.state();
            Some(format!(
                "{} {}Hz initialized={} power={:?} mode={:?} aod_pending={}\n{:#?}",
                st.name,
                st.refresh_rate,
                st.initialized,
                st.power_mode,
                st.mode(),
                st.aod_entry_pending,
                st.mi
            ))
        }
        Cmd::Help => Some(HELP.to_string()),
        Cmd::Quit => None,
    };

    for msg in host.sent() {
        debug!("tx {:02X?}", msg.payload);
    }
    host.clear();
    Ok(out)
}

fn run(panel: &MiPanel<MockHost>, host: &MockHost, input: impl BufRead) -> Result<()> {
    let stdout = io::stdout();
    for line in input.lines() {
        let line = line.context("failed to read input")?;
        let cmd = match parse_line(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("error: {e:#}");
                continue;
            }
        };
        if cmd == Cmd::Quit {
            break;
        }
        match execute(panel, host, cmd) {
            Ok(Some(text)) => {
                let mut out = stdout.lock();
                writeln!(out, "{}", text.trim_end())?;
            }
            Ok(None) => {}
            Err(e) => eprintln!("error: {e:#}"),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let cfg = PanelConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let host = simulated_host(&cfg);
    let panel = MiPanel::new(cfg, host.clone())?;

    if !cli.no_enable {
        panel.on_panel_enabled();
    }
    info!("ready, type 'help' for commands");

    match &cli.script {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            run(&panel, &host, io::BufReader::new(file))
        }
        None => run(&panel, &host, io::stdin().lock()),
    }
}
