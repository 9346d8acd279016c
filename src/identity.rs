//! Camera identity: which folder on the remote store belongs to this device.
//!
//! The folder is named `<camera-name>_<cpu-serial>`, so two cameras given the
//! same name by accident still never write into each other's ledger.

use std::{fs, io};

/// Serial used when `/proc/cpuinfo` has none.
pub const UNKNOWN_SERIAL: &str = "0000000000000000";

const CPUINFO: &str = "/proc/cpuinfo";

/// Read the CPU serial number of this device.
pub fn cpu_serial() -> io::Result<String> {
    let cpuinfo = fs::read_to_string(CPUINFO)?;
    parse_cpu_serial(&cpuinfo).ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("no Serial line in {CPUINFO}"))
    })
}

/// Extract the value of the `Serial` line from cpuinfo text.
///
/// Example: `Serial\t\t: 10000000abcdef01` → `10000000abcdef01`.
pub fn parse_cpu_serial(cpuinfo: &str) -> Option<String> {
    cpuinfo
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim() == "Serial")
        .map(|(_, value)| value.trim().to_string())
        .filter(|serial| !serial.is_empty())
}

/// Remote folder name for a camera.
pub fn folder_name(camera_name: &str, serial: &str) -> String {
    format!("{camera_name}_{serial}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PI_CPUINFO: &str = "processor\t: 0\nBogoMIPS\t: 108.00\n\
        Hardware\t: BCM2835\nRevision\t: c03111\nSerial\t\t: 10000000abcdef01\n\
        Model\t\t: Raspberry Pi 4 Model B Rev 1.1\n";

    #[test]
    fn parses_serial_line() {
        assert_eq!(
            parse_cpu_serial(PI_CPUINFO).as_deref(),
            Some("10000000abcdef01")
        );
    }

    #[test]
    fn missing_serial_is_none() {
        assert_eq!(parse_cpu_serial("processor\t: 0\n"), None);
        assert_eq!(parse_cpu_serial("Serial\t\t: \n"), None);
    }

    #[test]
    fn folder_combines_name_and_serial() {
        assert_eq!(
            folder_name("aletsch", "10000000abcdef01"),
            "aletsch_10000000abcdef01"
        );
    }
}
