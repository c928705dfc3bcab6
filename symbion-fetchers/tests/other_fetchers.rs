use parking_lot::Mutex;
use std::fs::File;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use symbion_devkit::{StubFileCache, TestHarness};
use symbion_fetchers::fetchers::ipmi::{FirmwareEntry, IpmiConnector, IpmiFetcher, IpmiParams, IpmiSession, SensorReading};
use symbion_fetchers::fetchers::piggyback::{PiggybackFetcher, PiggybackParams, PiggybackTimeSetting};
use symbion_fetchers::fetchers::program::{ProgramFetcher, ProgramParams};
use symbion_fetchers::{get_raw_data, FetchFailure, HostName, Mode, RawData};

fn agent_text(raw: RawData) -> String {
    String::from_utf8(raw.as_agent().expect("agent data").to_vec()).unwrap()
}

// ---- IPMI ----

struct FakeBmc {
    logouts: Arc<Mutex<usize>>,
    firmware: Result<Vec<FirmwareEntry>, String>,
}

impl IpmiSession for FakeBmc {
    fn sensor_readings(&mut self) -> Result<Vec<SensorReading>, FetchFailure> {
        Ok(vec![
            SensorReading {
                name: "CPU Temp".into(),
                sensor_type: "Temperature".into(),
                value: Some(35.0),
                unit: "°C".into(),
                states: vec![],
                health: 0,
                unavailable: false,
            },
            SensorReading {
                name: "PS1 Status".into(),
                sensor_type: "Power Supply".into(),
                value: None,
                unit: String::new(),
                states: vec!["Presence detected".into()],
                health: 0,
                unavailable: false,
            },
        ])
    }

    fn firmware(&mut self) -> Result<Vec<FirmwareEntry>, FetchFailure> {
        self.firmware.clone().map_err(FetchFailure::transport)
    }

    fn logout(&mut self) -> Result<(), FetchFailure> {
        *self.logouts.lock() += 1;
        Ok(())
    }
}

struct FakeBmcConnector {
    logouts: Arc<Mutex<usize>>,
    firmware: Result<Vec<FirmwareEntry>, String>,
}

impl IpmiConnector for FakeBmcConnector {
    fn login(&self, params: &IpmiParams) -> Result<Box<dyn IpmiSession>, FetchFailure> {
        if params.password.as_deref() != Some("calvin") {
            return Err(FetchFailure::transport("Unable to establish IPMI v2 / RMCP+ session"));
        }
        Ok(Box::new(FakeBmc { logouts: Arc::clone(&self.logouts), firmware: self.firmware.clone() }))
    }
}

fn ipmi(password: &str, firmware: Result<Vec<FirmwareEntry>, String>) -> (IpmiFetcher, Arc<Mutex<usize>>) {
    let logouts = Arc::new(Mutex::new(0));
    let params = IpmiParams {
        address: "10.0.0.9".into(),
        username: Some("root".into()),
        password: Some(password.into()),
    };
    let connector = FakeBmcConnector { logouts: Arc::clone(&logouts), firmware };
    (IpmiFetcher::new(params).with_connector(Arc::new(connector)), logouts)
}

#[test]
fn ipmi_renders_sensor_and_firmware_sections() {
    let firmware = vec![FirmwareEntry { name: "BMC Version".into(), version: "2.61".into() }];
    let (mut fetcher, logouts) = ipmi("calvin", Ok(firmware));
    let raw = get_raw_data(&StubFileCache::new(), &mut fetcher, Mode::Checking).unwrap();
    assert_eq!(
        agent_text(raw),
        "<<<ipmi_sensors:sep(124)>>>\n\
         0|CPU_Temp|Temperature|35.00|C|OK\n\
         1|PS1_Status|Power Supply|N/A||Presence detected\n\
         <<<ipmi_firmware:sep(124)>>>\n\
         BMC Version|2.61\n"
    );
    assert_eq!(*logouts.lock(), 1);
}

#[test]
fn ipmi_firmware_failure_keeps_sensors() {
    let (mut fetcher, _) = ipmi("calvin", Err("mc info failed".into()));
    let text = agent_text(get_raw_data(&StubFileCache::new(), &mut fetcher, Mode::Checking).unwrap());
    assert!(text.starts_with("<<<ipmi_sensors:sep(124)>>>\n"));
    assert!(!text.contains("ipmi_firmware"));
}

#[test]
fn ipmi_login_failure_is_a_fetcher_error() {
    let (mut fetcher, logouts) = ipmi("wrong", Ok(vec![]));
    let err = get_raw_data(&StubFileCache::new(), &mut fetcher, Mode::Checking).unwrap_err();
    assert!(!err.is_timeout());
    assert!(err.message().contains("RMCP+"), "{err}");
    assert_eq!(*logouts.lock(), 0);
}

// ---- Program ----

fn program(cmdline: &str, stdin: Option<&str>, timeout: Option<Duration>) -> ProgramFetcher {
    ProgramFetcher::new(ProgramParams {
        cmdline: cmdline.into(),
        stdin: stdin.map(str::to_string),
        is_cmc: false,
        timeout,
    })
}

#[cfg(unix)]
#[test]
fn program_stdout_is_the_agent_output() {
    let mut fetcher = program("printf '<<<check_mk>>>\\nVersion: ds\\n'", None, None);
    let raw = get_raw_data(&StubFileCache::new(), &mut fetcher, Mode::Checking).unwrap();
    assert_eq!(agent_text(raw), "<<<check_mk>>>\nVersion: ds\n");
}

#[cfg(unix)]
#[test]
fn program_receives_stdin() {
    let mut fetcher = program("cat", Some("<<<from_stdin>>>\nline\n"), Some(Duration::from_secs(10)));
    let raw = get_raw_data(&StubFileCache::new(), &mut fetcher, Mode::Checking).unwrap();
    assert_eq!(agent_text(raw), "<<<from_stdin>>>\nline\n");
}

#[cfg(unix)]
#[test]
fn program_exit_codes_become_fetcher_errors() {
    let err = get_raw_data(&StubFileCache::new(), &mut program("no-such-datasource-program", None, None), Mode::Checking)
        .unwrap_err();
    assert_eq!(err.message(), "Program 'no-such-datasource-program' not found (exit code 127)");

    let err = get_raw_data(&StubFileCache::new(), &mut program("echo broken >&2; exit 3", None, None), Mode::Checking)
        .unwrap_err();
    assert_eq!(err.message(), "Agent exited with code 3: broken");
    assert!(!err.is_timeout());
}

#[cfg(unix)]
#[test]
fn program_time_limit_is_a_timeout() {
    let mut fetcher = program("sleep 5", None, Some(Duration::from_millis(200)));
    let err = get_raw_data(&StubFileCache::new(), &mut fetcher, Mode::Checking).unwrap_err();
    assert!(err.is_timeout(), "{err}");
}

// ---- Piggyback ----

fn piggyback(harness: &TestHarness, time_settings: Vec<PiggybackTimeSetting>) -> PiggybackFetcher {
    PiggybackFetcher::new(PiggybackParams {
        hostname: HostName::new("vm01"),
        address: Some("10.0.0.5".into()),
        time_settings,
        piggyback_dir: harness.path().join("piggyback"),
        source_status_dir: harness.path().join("piggyback_sources"),
    })
}

fn age_file(path: &std::path::Path, age: Duration) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
}

#[test]
fn piggyback_collects_payloads_and_labels_sources() {
    let harness = TestHarness::new();
    harness.write_file("piggyback/vm01/esx01", b"<<<uptime>>>\n1234\n");
    harness.write_file("piggyback/10.0.0.5/esx02", b"<<<esx_vsphere_vm>>>\nname vm01");
    harness.write_file("piggyback/vm01/.esx03.new", b"<<<partial>>>\n");

    let raw = get_raw_data(&StubFileCache::new(), &mut piggyback(&harness, vec![]), Mode::Checking).unwrap();
    assert_eq!(
        agent_text(raw),
        "<<<uptime>>>\n1234\n\
         <<<esx_vsphere_vm>>>\nname vm01\n\
         <<<labels:sep(0)>>>\n\
         {\"cmk/piggyback_source_esx01\":\"yes\",\"cmk/piggyback_source_esx02\":\"yes\"}\n"
    );
}

#[test]
fn piggyback_skips_old_and_outdated_files() {
    let harness = TestHarness::new();
    let old = harness.write_file("piggyback/vm01/esx01", b"<<<uptime>>>\n1\n");
    age_file(&old, Duration::from_secs(7200));
    let outdated = harness.write_file("piggyback/vm01/esx02", b"<<<uptime>>>\n2\n");
    age_file(&outdated, Duration::from_secs(60));
    harness.write_file("piggyback_sources/esx02", b"");
    let kept = harness.write_file("piggyback/vm01/esx03", b"<<<uptime>>>\n3\n");
    age_file(&kept, Duration::from_secs(60));

    let raw = get_raw_data(&StubFileCache::new(), &mut piggyback(&harness, vec![]), Mode::Checking).unwrap();
    let text = agent_text(raw);
    assert!(text.starts_with("<<<uptime>>>\n3\n"), "{text}");
    assert!(!text.contains("esx01") && !text.contains("esx02"), "{text}");
}

#[test]
fn piggyback_max_age_can_be_set_per_source() {
    let harness = TestHarness::new();
    let file = harness.write_file("piggyback/vm01/esx01", b"<<<uptime>>>\n1\n");
    age_file(&file, Duration::from_secs(7200));
    let settings = vec![
        PiggybackTimeSetting { source: None, max_cache_age: Duration::from_secs(60) },
        PiggybackTimeSetting { source: Some(HostName::new("esx01")), max_cache_age: Duration::from_secs(86400) },
    ];
    let raw = get_raw_data(&StubFileCache::new(), &mut piggyback(&harness, settings), Mode::Checking).unwrap();
    assert!(agent_text(raw).starts_with("<<<uptime>>>\n1\n"));
}

#[test]
fn piggyback_without_files_is_empty() {
    let harness = TestHarness::new();
    let raw = get_raw_data(&StubFileCache::new(), &mut piggyback(&harness, vec![]), Mode::Checking).unwrap();
    assert_eq!(raw, RawData::Agent(Vec::new()));
}
