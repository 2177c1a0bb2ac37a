//! Example: one fingerprint unlock on a dozing panel.
//!
//! Run with: `RUST_LOG=debug cargo run --example fod_cycle`

use mipanel_core::{DozeBrightness, MiPanel, MockHost, PanelConfig, PanelError, PowerMode};
use std::thread;
use std::time::Duration;

const PANEL: &str = r#"{
    "name": "demo",
    "aod_enter_delay_ms": 100,
    "modes": [{ "refresh_rate": 60, "command_sets": {
        "hbm_fod_on": { "state": "hs", "commands": "39 01 00 00 00 00 02 53 E0" },
        "hbm_fod_off": { "state": "hs", "commands": "39 01 00 00 00 00 02 53 28" },
        "crc_off": { "commands": "39 01 00 00 00 00 02 81 00" },
        "dimming_on": { "commands": "39 01 00 00 00 00 02 53 28" },
        "doze_hbm": { "commands": "39 01 00 00 00 00 03 51 00 F5" },
        "doze_lbm": { "commands": "39 01 00 00 00 00 03 51 00 14" }
    } }]
}"#;

fn main() -> Result<(), PanelError> {
    // Initialize logging (optional)
    env_logger::init();

    let host = MockHost::new();
    let panel = MiPanel::new(PanelConfig::from_json(PANEL)?, host.clone())?;
    panel.set_initialized(true);
    panel.set_power_mode(PowerMode::Lp1);

    // The finger lands while the screen is dozing.
    println!("{}", panel.set_disp_param(0x000A_0000)?);
    panel.set_doze_brightness(DozeBrightness::Lbm)?;
    println!("doze brightness while FOD is active: {}", panel.doze_brightness());

    // The finger lifts without an unlock; AOD is re-entered after a delay.
    println!("{}", panel.set_disp_param(0x000B_0000)?);
    thread::sleep(Duration::from_millis(200));

    let state = panel.state();
    println!(
        "mode={:?} doze={} aod_backlight={}",
        state.mode(),
        state.mi.doze_brightness_state,
        state.mi.aod_backlight
    );
    for msg in host.sent() {
        println!("tx {:02X?}", msg.payload);
    }

    Ok(())
}
