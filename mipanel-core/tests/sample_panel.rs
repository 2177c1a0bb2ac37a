//! End-to-end checks against the shipped sample panel configuration.

use mipanel_core::{
    CmdSetId, DozeBrightness, ManualScheduler, MiPanel, MockClock, MockHost, PanelConfig,
    PanelError, PanelMode, PowerMode, SkipDimming,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

fn sample_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../mipanel/panels/sample_panel.json")
}

struct Rig {
    panel: MiPanel<MockHost>,
    host: MockHost,
    clock: Arc<MockClock>,
    sched: Arc<ManualScheduler>,
}

fn rig() -> Rig {
    let _ = env_logger::builder().is_test(true).try_init();

    let cfg = PanelConfig::load(sample_path()).unwrap();
    let host = MockHost::new();
    let clock = Arc::new(MockClock::new());
    let sched = Arc::new(ManualScheduler::new());
    let panel =
        MiPanel::with_runtime(cfg, host.clone(), clock.clone(), sched.clone()).unwrap();
    panel.on_panel_enabled();
    Rig {
        panel,
        host,
        clock,
        sched,
    }
}

#[test]
fn test_sample_loads() {
    let r = rig();
    let st = r.panel.state();
    assert_eq!(st.name, "sample_fhd_amoled");
    assert_eq!(st.refresh_rate, 60);
    assert_eq!(st.power_mode, PowerMode::On);

    assert_eq!(r.panel.command_set(CmdSetId::HbmFodOff).unwrap().count(), 3);
    assert!(matches!(
        r.panel.command_set(CmdSetId::AodToDcOn),
        Err(PanelError::NotFound(CmdSetId::AodToDcOn))
    ));
    assert_eq!(r.panel.fod_dimlayer_alpha(100), Some(200));
    assert_eq!(r.panel.fod_dimlayer_alpha(5000), Some(0));
}

#[test]
fn test_panel_on_dimming() {
    let r = rig();
    assert_eq!(r.sched.delays(), vec![Duration::from_millis(60)]);
    r.sched.run_all();
    assert_eq!(r.host.sent_payloads(), vec![vec![0x53, 0x28]]);
}

#[test]
fn test_unlock_attempt_while_dozing() {
    let r = rig();
    r.sched.run_all();
    r.panel.set_backlight(300).unwrap();
    r.panel.set_power_mode(PowerMode::Lp1);
    r.host.clear();

    // Finger down: FOD sets go out, CRC is switched off.
    r.panel.set_disp_param(0x000A_0000).unwrap();
    assert_eq!(
        r.host.sent_payloads(),
        vec![vec![0x53, 0xE0], vec![0xB5, 0x00], vec![0x81, 0x00]]
    );
    assert_eq!(r.panel.state().mode(), PanelMode::FodHbmOn);

    // Doze brightness requested mid-press is remembered, not applied.
    r.panel.set_doze_brightness(DozeBrightness::Lbm).unwrap();
    assert_eq!(r.panel.doze_brightness(), DozeBrightness::ToNormal);

    // Finger up: the restore set carries the last backlight.
    r.host.clear();
    r.panel.set_disp_param(0x000B_0000).unwrap();
    let sent = r.host.sent_payloads();
    assert!(sent.contains(&vec![0x51, 0x01, 0x2C]), "{sent:02X?}");
    assert!(sent.contains(&vec![0xBB, 0x00]), "{sent:02X?}");
    let st = r.panel.state();
    assert_eq!(st.mi.skip_dimming, SkipDimming::Restore);
    assert!(st.aod_entry_pending);

    // Dimming stays off for the configured window.
    r.host.clear();
    r.panel.set_disp_param(0x0000_0F00).unwrap();
    assert!(r.host.sent().is_empty());

    // AOD re-entry applies the low doze brightness.
    assert_eq!(r.sched.delays(), vec![Duration::from_millis(100)]);
    r.sched.run_all();
    assert_eq!(r.host.sent_payloads(), vec![vec![0x51, 0x00, 0x14]]);
    assert_eq!(r.panel.state().mode(), PanelMode::DozeLbm);

    // Dozing keeps dimming blocked after the window closes.
    r.clock.advance(Duration::from_millis(170));
    r.host.clear();
    r.panel.set_disp_param(0x0000_0F00).unwrap();
    assert!(r.host.sent().is_empty());
    assert_eq!(r.panel.state().mi.skip_dimming, SkipDimming::Block);
}

#[test]
fn test_dc_lut_patches_every_mode() {
    let r = rig();
    r.host.set_register(0xD2, (1..=10).collect());
    r.panel.acquire_dc_lut().unwrap();
    r.panel.update_dc_param().unwrap();

    for hz in [60, 90] {
        r.panel.select_refresh_rate(hz).unwrap();
        let off = r.panel.command_set(CmdSetId::DcOff).unwrap();
        let on = r.panel.command_set(CmdSetId::DcOn).unwrap();
        assert_eq!(off.cmds[0].payload[1..], [1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(on.cmds[0].payload[1..], [5, 5, 5, 5, 5, 10, 10, 10, 10, 10]);
    }
}

#[test]
fn test_config_errors() {
    assert!(matches!(
        PanelConfig::load(sample_path().with_file_name("missing.json")),
        Err(PanelError::Io(_))
    ));
    assert!(matches!(
        PanelConfig::from_json("{ \"modes\": [ "),
        Err(PanelError::Json(_))
    ));
    assert!(matches!(
        PanelConfig::from_json(r#"{ "dc": { "lut_len": 7 }, "modes": [{ "refresh_rate": 60 }] }"#),
        Err(PanelError::Config(_))
    ));
}
