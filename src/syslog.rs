use chrono::Utc;
use regex::Regex;

use crate::record::SyslogRecord;

/// Application name tagged onto lines matching the priority-prefixed format.
pub const FIREWALL_APP_NAME: &str = "Firewall";

/// Application name tagged onto lines matching the Ubiquiti format.
pub const UBIQUITI_APP_NAME: &str = "UniFi OS";

/// Ordered chain of format matchers. The first structural match wins; a line
/// no matcher accepts is unparseable and must not be persisted or broadcast.
pub struct SyslogParser {
    firewall: Regex,
    ubiquiti: Regex,
}

impl SyslogParser {
    pub fn new() -> Self {
        SyslogParser {
            // <priority>, BSD timestamp, hostname, free text
            firewall: Regex::new(
                r"^<(\d+)>([A-Za-z]{3}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2})\s+([\w.-]+)\s+(.*)$",
            )
            .unwrap(),
            // no priority tag; BSD timestamp, hostname token, free text
            ubiquiti: Regex::new(
                r"^([A-Za-z]{3}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2})\s+([\w\s.-]+?)\s+(.*)$",
            )
            .unwrap(),
        }
    }

    pub fn parse(&self, line: &str) -> Option<SyslogRecord> {
        self.match_firewall(line).or_else(|| self.match_ubiquiti(line))
    }

    fn match_firewall(&self, line: &str) -> Option<SyslogRecord> {
        let caps = self.firewall.captures(line)?;

        Some(SyslogRecord {
            priority: caps[1].parse().ok(),
            hostname: caps[3].trim().to_string(),
            app_name: FIREWALL_APP_NAME.to_string(),
            message: caps[4].trim().to_string(),
            raw_message: line.to_string(),
            timestamp: Utc::now(),
        })
    }

    fn match_ubiquiti(&self, line: &str) -> Option<SyslogRecord> {
        let caps = self.ubiquiti.captures(line)?;

        Some(SyslogRecord {
            priority: Some(0),
            hostname: caps[2].trim().to_string(),
            app_name: UBIQUITI_APP_NAME.to_string(),
            message: caps[3].trim().to_string(),
            raw_message: line.to_string(),
            timestamp: Utc::now(),
        })
    }
}

impl Default for SyslogParser {
    fn default() -> Self {
        SyslogParser::new()
    }
}
