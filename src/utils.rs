use config::{Config, ConfigError, Environment, File};
use log::LevelFilter;
use serde_derive::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Snmp {
    pub host: String,
    pub port: u16,
    pub fallback_port: u16,
    pub community: String,
}

#[derive(Debug, Deserialize)]
pub struct Log {
    pub level: String,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub log: Log,
    pub syslog: Listener,
    pub netflow: Listener,
    pub netconsole: Listener,
    pub snmp: Snmp,
}

impl Settings {
    pub fn init(config_file: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut s = Config::new();

        s.set_default("log.level", "info".to_string())?;
        s.set_default("syslog.host", "0.0.0.0".to_string())?;
        s.set_default("syslog.port", 514)?;
        s.set_default("netflow.host", "0.0.0.0".to_string())?;
        s.set_default("netflow.port", 2055)?;
        s.set_default("netconsole.host", "0.0.0.0".to_string())?;
        s.set_default("netconsole.port", 6666)?;
        s.set_default("snmp.host", "0.0.0.0".to_string())?;
        s.set_default("snmp.port", 162)?;
        s.set_default("snmp.fallback_port", 1162)?;
        s.set_default("snmp.community", "string".to_string())?;

        // surcharge the default config with the user config
        if config_file == None {
            println!("No config provided, launching the app with the default configuration");
        } else {
            s.merge(File::from(config_file.unwrap()))?;
        }

        // environment wins over both, e.g. TELECAP_SYSLOG_PORT=5514
        s.merge(Environment::with_prefix("TELECAP").separator("_"))?;

        // freeze the configuration
        s.try_into()
    }
}

pub fn init_logger(level: &str) {
    let mut logger = env_logger::Builder::new();
    logger.format_timestamp_millis();
    logger.filter(None, LevelFilter::from_str(level).unwrap_or(LevelFilter::Info));
    logger.init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_cover_every_listener() {
        let settings = Settings::init(None).unwrap();

        assert_eq!(settings.syslog.port, 514);
        assert_eq!(settings.netflow.port, 2055);
        assert_eq!(settings.netconsole.port, 6666);
        assert_eq!(settings.snmp.port, 162);
        assert_eq!(settings.snmp.fallback_port, 1162);
        assert_eq!(settings.snmp.community, "string");
        assert_eq!(settings.log.level, "info");
    }
}
