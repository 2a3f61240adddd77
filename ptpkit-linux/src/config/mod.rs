use std::fs::read_to_string;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::warn;
use serde::{Deserialize, Deserializer};

use ptpkit::config::{ConfigError, OutlierAction, OutlierFilterOptions};
use ptpkit::{
    ClockIdentity, ClockQuality, DelayMechanism, DriftHandling, DtMethod, InstanceConfig,
    Interval, PortSettings, ServoOptions,
};

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    #[serde(
        default = "default_loglevel",
        deserialize_with = "deserialize_loglevel"
    )]
    pub loglevel: log::LevelFilter,
    pub interface: String,
    #[serde(default, deserialize_with = "deserialize_clock_identity")]
    pub identity: Option<ClockIdentity>,
    #[serde(default = "default_domain")]
    pub domain: u8,
    #[serde(default = "default_priority1")]
    pub priority1: u8,
    #[serde(default = "default_priority2")]
    pub priority2: u8,
    #[serde(default)]
    pub slave_only: bool,
    #[serde(default = "default_clock_class")]
    pub clock_class: u8,
    #[serde(default)]
    pub port: PortSection,
    #[serde(default)]
    pub clock: ClockSection,
    #[serde(default)]
    pub servo: ServoSection,
    #[serde(default)]
    pub filters: FiltersSection,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PortSection {
    #[serde(default = "default_announce_interval")]
    pub announce_interval: i8,
    #[serde(default = "default_sync_interval")]
    pub sync_interval: i8,
    #[serde(default = "default_announce_receipt_timeout")]
    pub announce_receipt_timeout: u8,
    #[serde(default)]
    pub announce_timeout_grace_period: u8,
    #[serde(default)]
    pub delay_mechanism: DelayMechanismConfig,
    #[serde(default = "default_delay_req_interval")]
    pub delay_req_interval_initial: i8,
    /// When set, overrides the interval the master advertises in its delay
    /// responses.
    #[serde(default)]
    pub delay_req_interval: Option<i8>,
    #[serde(default = "default_foreign_record_capacity")]
    pub foreign_record_capacity: usize,
    #[serde(default)]
    pub calibration_delay: u32,
    #[serde(default = "default_delay_miss_limit")]
    pub delay_miss_limit: u32,
    #[serde(default = "default_stats_interval")]
    pub stats_interval: u32,
    #[serde(default)]
    pub prefer_utc_valid: bool,
    #[serde(default)]
    pub require_utc_valid: bool,
}

impl Default for PortSection {
    fn default() -> Self {
        Self {
            announce_interval: default_announce_interval(),
            sync_interval: default_sync_interval(),
            announce_receipt_timeout: default_announce_receipt_timeout(),
            announce_timeout_grace_period: 0,
            delay_mechanism: DelayMechanismConfig::default(),
            delay_req_interval_initial: default_delay_req_interval(),
            delay_req_interval: None,
            foreign_record_capacity: default_foreign_record_capacity(),
            calibration_delay: 0,
            delay_miss_limit: default_delay_miss_limit(),
            stats_interval: default_stats_interval(),
            prefer_utc_valid: false,
            require_utc_valid: false,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DelayMechanismConfig {
    #[default]
    E2e,
    P2p,
    Disabled,
}

impl From<DelayMechanismConfig> for DelayMechanism {
    fn from(value: DelayMechanismConfig) -> Self {
        match value {
            DelayMechanismConfig::E2e => DelayMechanism::E2E,
            DelayMechanismConfig::P2p => DelayMechanism::P2P,
            DelayMechanismConfig::Disabled => DelayMechanism::Disabled,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ClockSection {
    #[serde(default)]
    pub no_adjust: bool,
    #[serde(default)]
    pub no_reset: bool,
    #[serde(default)]
    pub drift_handling: DriftHandlingConfig,
    #[serde(default = "default_drift_file")]
    pub drift_file: PathBuf,
    #[serde(default = "default_max_offset_ppm")]
    pub max_offset_ppm: u32,
}

impl Default for ClockSection {
    fn default() -> Self {
        Self {
            no_adjust: false,
            no_reset: false,
            drift_handling: DriftHandlingConfig::default(),
            drift_file: default_drift_file(),
            max_offset_ppm: default_max_offset_ppm(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DriftHandlingConfig {
    Reset,
    #[default]
    Preserve,
    File,
}

impl From<DriftHandlingConfig> for DriftHandling {
    fn from(value: DriftHandlingConfig) -> Self {
        match value {
            DriftHandlingConfig::Reset => DriftHandling::Reset,
            DriftHandlingConfig::Preserve => DriftHandling::Preserve,
            DriftHandlingConfig::File => DriftHandling::File,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ServoSection {
    #[serde(default = "default_kp")]
    pub kp: f64,
    #[serde(default = "default_ki")]
    pub ki: f64,
    #[serde(default)]
    pub dt_method: DtMethodConfig,
    #[serde(default = "default_delayfilter_stiffness")]
    pub delayfilter_stiffness: u32,
    #[serde(default)]
    pub max_delay: i64,
    #[serde(default)]
    pub panic_mode: bool,
    #[serde(default = "default_panic_mode_duration")]
    pub panic_mode_duration: u32,
    #[serde(default)]
    pub panic_mode_exit_threshold: i64,
    #[serde(default)]
    pub stability_detection: bool,
    #[serde(default = "default_stability_threshold")]
    pub stability_threshold: f64,
    #[serde(default = "default_stability_period")]
    pub stability_period: u32,
    #[serde(default = "default_stability_timeout")]
    pub stability_timeout: u32,
}

impl Default for ServoSection {
    fn default() -> Self {
        Self {
            kp: default_kp(),
            ki: default_ki(),
            dt_method: DtMethodConfig::default(),
            delayfilter_stiffness: default_delayfilter_stiffness(),
            max_delay: 0,
            panic_mode: false,
            panic_mode_duration: default_panic_mode_duration(),
            panic_mode_exit_threshold: 0,
            stability_detection: false,
            stability_threshold: default_stability_threshold(),
            stability_period: default_stability_period(),
            stability_timeout: default_stability_timeout(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DtMethodConfig {
    None,
    #[default]
    Constant,
    Measured,
}

impl From<DtMethodConfig> for DtMethod {
    fn from(value: DtMethodConfig) -> Self {
        match value {
            DtMethodConfig::None => DtMethod::None,
            DtMethodConfig::Constant => DtMethod::Constant,
            DtMethodConfig::Measured => DtMethod::Measured,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FiltersSection {
    #[serde(default)]
    pub delay: FilterSection,
    #[serde(default)]
    pub sync: FilterSection,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FilterSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub action: OutlierActionConfig,
    #[serde(default = "default_filter_capacity")]
    pub capacity: usize,
    #[serde(default = "default_filter_threshold")]
    pub threshold: f64,
    #[serde(default = "default_filter_weight")]
    pub weight: f64,
}

impl Default for FilterSection {
    fn default() -> Self {
        Self {
            enabled: true,
            action: OutlierActionConfig::default(),
            capacity: default_filter_capacity(),
            threshold: default_filter_threshold(),
            weight: default_filter_weight(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutlierActionConfig {
    Discard,
    #[default]
    Filter,
}

impl From<OutlierActionConfig> for OutlierAction {
    fn from(value: OutlierActionConfig) -> Self {
        match value {
            OutlierActionConfig::Discard => OutlierAction::Discard,
            OutlierActionConfig::Filter => OutlierAction::Filter,
        }
    }
}

fn default_loglevel() -> log::LevelFilter {
    log::LevelFilter::Info
}

fn default_domain() -> u8 {
    0
}

fn default_priority1() -> u8 {
    128
}

fn default_priority2() -> u8 {
    128
}

fn default_clock_class() -> u8 {
    248
}

fn default_announce_interval() -> i8 {
    1
}

fn default_sync_interval() -> i8 {
    0
}

fn default_announce_receipt_timeout() -> u8 {
    6
}

fn default_delay_req_interval() -> i8 {
    0
}

fn default_foreign_record_capacity() -> usize {
    5
}

fn default_delay_miss_limit() -> u32 {
    8
}

fn default_stats_interval() -> u32 {
    5
}

fn default_drift_file() -> PathBuf {
    PathBuf::from("/var/lib/ptpkit/drift")
}

fn default_max_offset_ppm() -> u32 {
    500
}

fn default_kp() -> f64 {
    0.1
}

fn default_ki() -> f64 {
    0.001
}

fn default_delayfilter_stiffness() -> u32 {
    6
}

fn default_panic_mode_duration() -> u32 {
    30
}

fn default_stability_threshold() -> f64 {
    10.0
}

fn default_stability_period() -> u32 {
    1
}

fn default_stability_timeout() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_filter_capacity() -> usize {
    20
}

fn default_filter_threshold() -> f64 {
    1.0
}

fn default_filter_weight() -> f64 {
    1.0
}

fn deserialize_loglevel<'de, D>(deserializer: D) -> Result<log::LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    let raw: String = Deserialize::deserialize(deserializer)?;
    log::LevelFilter::from_str(&raw).map_err(|e| D::Error::custom(format!("invalid loglevel: {e}")))
}

fn deserialize_clock_identity<'de, D>(deserializer: D) -> Result<Option<ClockIdentity>, D::Error>
where
    D: Deserializer<'de>,
{
    use hex::FromHex;
    use serde::de::Error;
    let raw: String = Deserialize::deserialize(deserializer)?;
    Ok(Some(ClockIdentity(<[u8; 8]>::from_hex(raw).map_err(
        |e| D::Error::custom(format!("invalid clock identity: {e}")),
    )?)))
}

#[derive(Debug)]
pub enum ConfigLoadError {
    Io(std::io::Error),
    Toml(toml::de::Error),
    Invalid(ConfigError),
}

impl std::fmt::Display for ConfigLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigLoadError::Io(e) => write!(f, "could not read config file: {e}"),
            ConfigLoadError::Toml(e) => write!(f, "config file syntax error: {e}"),
            ConfigLoadError::Invalid(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ConfigLoadError {}

impl Config {
    /// Parse and validate a config file.
    pub fn from_file(file: &Path) -> Result<Config, ConfigLoadError> {
        if let Ok(meta) = std::fs::metadata(file) {
            let perm = meta.permissions();
            if perm.mode() as libc::mode_t & libc::S_IWOTH != 0 {
                warn!("unrestricted config file permissions: others can write");
            }
        }

        let contents = read_to_string(file).map_err(ConfigLoadError::Io)?;
        Config::parse_toml(&contents)
    }

    pub fn parse_toml(contents: &str) -> Result<Config, ConfigLoadError> {
        let config: Config = toml::de::from_str(contents).map_err(ConfigLoadError::Toml)?;
        config.validate().map_err(ConfigLoadError::Invalid)?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.instance_config(ClockIdentity::default()).validate()?;
        self.port_settings().validate()?;
        self.delay_filter_options().validate("filters.delay")?;
        self.sync_filter_options().validate("filters.sync")?;
        self.servo_options().validate()?;
        Ok(())
    }

    pub fn instance_config(&self, fallback_identity: ClockIdentity) -> InstanceConfig {
        InstanceConfig {
            clock_identity: self.identity.unwrap_or(fallback_identity),
            priority_1: self.priority1,
            priority_2: self.priority2,
            domain_number: self.domain,
            slave_only: self.slave_only,
            clock_quality: ClockQuality {
                clock_class: self.clock_class,
                ..Default::default()
            },
        }
    }

    pub fn port_settings(&self) -> PortSettings {
        // An explicitly configured delay request interval implies ignoring
        // the master-advertised one, like the original daemon's
        // ignore_delayreq_interval_master trigger.
        PortSettings {
            announce_interval: Interval::from_log_2(self.port.announce_interval),
            sync_interval: Interval::from_log_2(self.port.sync_interval),
            announce_receipt_timeout: self.port.announce_receipt_timeout,
            announce_timeout_grace_period: self.port.announce_timeout_grace_period,
            delay_mechanism: self.port.delay_mechanism.into(),
            initial_delay_req_interval: Interval::from_log_2(self.port.delay_req_interval_initial),
            delay_req_interval: self.port.delay_req_interval.map(Interval::from_log_2),
            foreign_record_capacity: self.port.foreign_record_capacity,
            calibration_delay: self.port.calibration_delay,
            delay_miss_limit: self.port.delay_miss_limit,
            stats_interval_secs: self.port.stats_interval,
            prefer_utc_valid: self.port.prefer_utc_valid,
            require_utc_valid: self.port.require_utc_valid,
        }
    }

    pub fn delay_filter_options(&self) -> OutlierFilterOptions {
        filter_options(&self.filters.delay)
    }

    pub fn sync_filter_options(&self) -> OutlierFilterOptions {
        filter_options(&self.filters.sync)
    }

    pub fn servo_options(&self) -> ServoOptions {
        ServoOptions {
            kp: self.servo.kp,
            ki: self.servo.ki,
            dt_method: self.servo.dt_method.into(),
            delayfilter_stiffness: self.servo.delayfilter_stiffness,
            max_offset_ppm: self.clock.max_offset_ppm,
            max_delay_ns: self.servo.max_delay,
            panic_mode: self.servo.panic_mode,
            panic_mode_duration_mins: self.servo.panic_mode_duration,
            panic_mode_exit_threshold_ns: self.servo.panic_mode_exit_threshold,
            no_adjust: self.clock.no_adjust,
            no_reset: self.clock.no_reset,
            drift_handling: self.clock.drift_handling.into(),
            stability_detection: self.servo.stability_detection,
            stability_threshold_ppb: self.servo.stability_threshold,
            stability_period: self.servo.stability_period,
            stability_timeout_mins: self.servo.stability_timeout,
        }
    }

    /// Parameters that require a full protocol reset when they change on
    /// reload (they change the shape of filter or table state).
    pub fn requires_restart(&self, other: &Config) -> bool {
        self.interface != other.interface
            || self.identity != other.identity
            || self.domain != other.domain
            || self.priority1 != other.priority1
            || self.priority2 != other.priority2
            || self.slave_only != other.slave_only
            || self.clock_class != other.clock_class
            || self.port != other.port
            || self.filters != other.filters
    }
}

fn filter_options(section: &FilterSection) -> OutlierFilterOptions {
    OutlierFilterOptions {
        enabled: section.enabled,
        action: section.action.into(),
        capacity: section.capacity,
        threshold: section.threshold,
        weight: section.weight,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config = Config::parse_toml("interface = \"eth0\"").unwrap();
        assert_eq!(config.loglevel, log::LevelFilter::Info);
        assert_eq!(config.port.announce_interval, 1);
        assert_eq!(config.port.announce_receipt_timeout, 6);
        assert_eq!(config.clock.max_offset_ppm, 500);
        assert!(!config.slave_only);

        let settings = config.port_settings();
        assert_eq!(settings.foreign_record_capacity, 5);
        assert_eq!(settings.delay_req_interval, None);
    }

    #[test]
    fn full_config_round_trips_into_core_options() {
        let config = Config::parse_toml(
            r#"
            interface = "eth1"
            identity = "0123456789abcdef"
            domain = 3
            slave-only = true
            loglevel = "debug"

            [port]
            announce-interval = 0
            sync-interval = -1
            announce-receipt-timeout = 3
            announce-timeout-grace-period = 2
            delay-mechanism = "p2p"
            delay-req-interval = 1
            foreign-record-capacity = 10
            calibration-delay = 4

            [clock]
            no-adjust = false
            drift-handling = "file"
            drift-file = "/tmp/drift"
            max-offset-ppm = 512

            [servo]
            kp = 0.5
            ki = 0.01
            dt-method = "measured"
            panic-mode = true
            stability-detection = true

            [filters.delay]
            action = "discard"
            capacity = 10
            threshold = 2.0

            [filters.sync]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(
            config.identity,
            Some(ClockIdentity([0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef]))
        );

        let settings = config.port_settings();
        assert_eq!(settings.delay_mechanism, DelayMechanism::P2P);
        assert_eq!(settings.delay_req_interval, Some(Interval::from_log_2(1)));
        assert_eq!(settings.announce_timeout_grace_period, 2);

        let servo = config.servo_options();
        assert_eq!(servo.dt_method, DtMethod::Measured);
        assert_eq!(servo.drift_handling, DriftHandling::File);
        assert_eq!(servo.max_offset_ppm, 512);
        assert!(servo.panic_mode);

        let delay_filter = config.delay_filter_options();
        assert_eq!(delay_filter.action, OutlierAction::Discard);
        assert_eq!(delay_filter.capacity, 10);
        assert!(!config.sync_filter_options().enabled);

        let instance = config.instance_config(ClockIdentity::default());
        assert!(instance.slave_only);
        assert_eq!(instance.domain_number, 3);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let result = Config::parse_toml(
            r#"
            interface = "eth0"
            [port]
            foreign-record-capacity = 64
            "#,
        );
        assert!(matches!(result, Err(ConfigLoadError::Invalid(_))));

        let result = Config::parse_toml(
            r#"
            interface = "eth0"
            [filters.sync]
            weight = 50.0
            "#,
        );
        assert!(matches!(result, Err(ConfigLoadError::Invalid(_))));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = Config::parse_toml(
            r#"
            interface = "eth0"
            no-such-option = true
            "#,
        );
        assert!(matches!(result, Err(ConfigLoadError::Toml(_))));
    }

    #[test]
    fn restart_detection() {
        let a = Config::parse_toml("interface = \"eth0\"").unwrap();
        let mut b = a.clone();
        b.servo.kp = 0.7;
        // A servo gain change applies in place.
        assert!(!a.requires_restart(&b));

        let mut c = a.clone();
        c.filters.delay.capacity = 30;
        // A filter capacity change reshapes filter state.
        assert!(a.requires_restart(&c));
    }
}
