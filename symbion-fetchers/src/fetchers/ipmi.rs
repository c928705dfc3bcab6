//! IPMI fetcher
//!
//! Reads sensors and firmware information from a BMC and renders them as
//! agent sections (`ipmi_sensors`, `ipmi_firmware`). The session itself is
//! behind [`IpmiConnector`]; the default drives `ipmitool` over lanplus.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::RawFetcher;
use crate::error::FetchFailure;
use crate::mode::Mode;
use crate::process;
use crate::types::RawData;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpmiParams {
    pub address: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// One sensor as reported by the BMC.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub name: String,
    pub sensor_type: String,
    pub value: Option<f64>,
    pub unit: String,
    /// Textual states; take precedence over `health`.
    pub states: Vec<String>,
    /// 0 ok, 1 warning, 2 critical, 4 failed.
    pub health: u8,
    pub unavailable: bool,
}

/// Formatted sensor line of the `ipmi_sensors` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpmiSensor {
    pub id: String,
    pub name: String,
    pub sensor_type: String,
    pub value: String,
    pub unit: String,
    pub health: String,
}

impl IpmiSensor {
    pub fn from_reading(number: usize, reading: &SensorReading) -> Self {
        let value = match reading.value {
            Some(value) if !reading.unavailable => format!("{value:.2}"),
            _ => "N/A".to_string(),
        };
        let unit = if reading.unit == "°C" { "C".to_string() } else { reading.unit.clone() };
        let health = if !reading.states.is_empty() {
            reading.states.join(",")
        } else {
            match reading.health {
                0 => "OK",
                1 => "WARNING",
                2 => "CRITICAL",
                4 => "FAILED",
                _ => "UNKNOWN",
            }
            .to_string()
        };
        Self {
            id: number.to_string(),
            name: reading.name.replace(' ', "_"),
            sensor_type: reading.sensor_type.clone(),
            value,
            unit,
            health,
        }
    }

    fn line(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.id, self.name, self.sensor_type, self.value, self.unit, self.health
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareEntry {
    pub name: String,
    pub version: String,
}

pub trait IpmiSession: Send {
    fn sensor_readings(&mut self) -> Result<Vec<SensorReading>, FetchFailure>;
    fn firmware(&mut self) -> Result<Vec<FirmwareEntry>, FetchFailure>;
    fn logout(&mut self) -> Result<(), FetchFailure>;
}

pub trait IpmiConnector: Send + Sync {
    fn login(&self, params: &IpmiParams) -> Result<Box<dyn IpmiSession>, FetchFailure>;
}

/// `ipmitool -I lanplus` sessions.
#[derive(Debug, Clone)]
pub struct IpmiToolConnector {
    pub time_limit: Duration,
}

impl Default for IpmiToolConnector {
    fn default() -> Self {
        Self { time_limit: Duration::from_secs(60) }
    }
}

impl IpmiConnector for IpmiToolConnector {
    fn login(&self, params: &IpmiParams) -> Result<Box<dyn IpmiSession>, FetchFailure> {
        let mut base_args = vec!["-I".to_string(), "lanplus".into(), "-H".into(), params.address.clone()];
        if let Some(user) = &params.username {
            base_args.extend(["-U".to_string(), user.clone()]);
        }
        if let Some(password) = &params.password {
            base_args.extend(["-P".to_string(), password.clone()]);
        }
        let mut session = IpmiToolSession {
            base_args,
            time_limit: self.time_limit,
            mc_info: None,
        };
        // the BMC info doubles as a login check
        session.mc_info = Some(session.run(&["mc", "info"])?);
        Ok(Box::new(session))
    }
}

struct IpmiToolSession {
    base_args: Vec<String>,
    time_limit: Duration,
    mc_info: Option<String>,
}

impl IpmiToolSession {
    fn run(&self, args: &[&str]) -> Result<String, FetchFailure> {
        let mut command = Command::new("ipmitool");
        command.args(&self.base_args).args(args);
        let output = process::run(command, "ipmitool", None, Some(self.time_limit))?;
        if !output.success() {
            return Err(FetchFailure::transport(format!(
                "ipmitool {} failed: {}",
                args.join(" "),
                output.stderr_lossy()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl IpmiSession for IpmiToolSession {
    fn sensor_readings(&mut self) -> Result<Vec<SensorReading>, FetchFailure> {
        Ok(parse_ipmitool_sensors(&self.run(&["sensor"])?))
    }

    fn firmware(&mut self) -> Result<Vec<FirmwareEntry>, FetchFailure> {
        let info = match self.mc_info.take() {
            Some(info) => info,
            None => self.run(&["mc", "info"])?,
        };
        Ok(parse_mc_info(&info))
    }

    fn logout(&mut self) -> Result<(), FetchFailure> {
        Ok(())
    }
}

/// `ipmitool sensor`: `name | value | unit | status | thresholds...`
pub fn parse_ipmitool_sensors(output: &str) -> Vec<SensorReading> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('|').map(str::trim).collect();
            if fields.len() < 4 {
                return None;
            }
            let unit = match fields[2] {
                "degrees C" => "C",
                "discrete" => "",
                other => other,
            };
            let (health, unavailable) = match fields[3] {
                "ok" => (0, false),
                "nc" => (1, false),
                "cr" => (2, false),
                "nr" => (4, false),
                _ => (0, true),
            };
            Some(SensorReading {
                name: fields[0].to_string(),
                sensor_type: sensor_type_for_unit(fields[2]).to_string(),
                value: fields[1].parse().ok(),
                unit: unit.to_string(),
                states: Vec::new(),
                health,
                unavailable,
            })
        })
        .collect()
}

fn sensor_type_for_unit(unit: &str) -> &'static str {
    match unit {
        "degrees C" | "degrees F" => "Temperature",
        "RPM" => "Fan",
        "Volts" => "Voltage",
        "Watts" => "Power_Supply",
        "Amps" => "Current",
        _ => "Other",
    }
}

/// `ipmitool mc info`: `Key : Value` lines.
pub fn parse_mc_info(output: &str) -> Vec<FirmwareEntry> {
    output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .filter_map(|(key, value)| {
            let name = match key.trim() {
                "Firmware Revision" => "BMC Version",
                "IPMI Version" => "IPMI-Version",
                _ => return None,
            };
            Some(FirmwareEntry {
                name: name.to_string(),
                version: value.trim().to_string(),
            })
        })
        .collect()
}

pub struct IpmiFetcher {
    params: IpmiParams,
    connector: Arc<dyn IpmiConnector>,
    session: Option<Box<dyn IpmiSession>>,
}

impl IpmiFetcher {
    pub fn new(params: IpmiParams) -> Self {
        Self {
            params,
            connector: Arc::new(IpmiToolConnector::default()),
            session: None,
        }
    }

    pub fn with_connector(mut self, connector: Arc<dyn IpmiConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn params(&self) -> &IpmiParams {
        &self.params
    }
}

impl RawFetcher for IpmiFetcher {
    fn open(&mut self) -> Result<(), FetchFailure> {
        debug!("Connecting to BMC {}", self.params.address);
        self.session = Some(self.connector.login(&self.params)?);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.logout() {
                warn!("Logout from BMC {} failed: {}", self.params.address, e);
            }
        }
    }

    fn fetch_raw(&mut self, _mode: Mode) -> Result<RawData, FetchFailure> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| FetchFailure::transport("IPMI session is not open"))?;

        let mut output = String::from("<<<ipmi_sensors:sep(124)>>>\n");
        for (number, reading) in session.sensor_readings()?.iter().enumerate() {
            output.push_str(&IpmiSensor::from_reading(number, reading).line());
            output.push('\n');
        }

        match session.firmware() {
            Ok(entries) if !entries.is_empty() => {
                output.push_str("<<<ipmi_firmware:sep(124)>>>\n");
                for entry in entries {
                    output.push_str(&format!("{}|{}\n", entry.name, entry.version));
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Cannot read firmware of BMC {}: {}", self.params.address, e),
        }
        Ok(RawData::Agent(output.into_bytes()))
    }
}

impl fmt::Display for IpmiFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IpmiFetcher({})", self.params.address)
    }
}
