use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Windows,
    MacOS,
    Linux,
}

pub fn detect() -> Os {
    match std::env::consts::OS {
        "windows" => Os::Windows,
        "macos" | "freebsd" | "openbsd" | "netbsd" => Os::MacOS,
        _ => Os::Linux,
    }
}

/// Arguments for a single echo request to `host` waiting at most `timeout`.
///
/// Each platform's `ping` spells the count and wait flags differently and
/// takes the wait in different units.
pub fn ping_args(os: Os, host: &str, timeout: Duration) -> Vec<String> {
    let secs = timeout.as_secs().max(1).to_string();
    let mut args: Vec<String> = match os {
        Os::Windows => vec![
            "-n".into(),
            "1".into(),
            "-w".into(),
            timeout.as_millis().max(1).to_string(),
        ],
        Os::MacOS => vec!["-c".into(), "1".into(), "-t".into(), secs],
        Os::Linux => vec!["-c".into(), "1".into(), "-W".into(), secs],
    };
    args.push(host.to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_waits_in_milliseconds() {
        let args = ping_args(Os::Windows, "10.0.0.5", Duration::from_millis(800));
        assert_eq!(args, ["-n", "1", "-w", "800", "10.0.0.5"]);
    }

    #[test]
    fn unix_waits_in_whole_seconds() {
        let args = ping_args(Os::Linux, "host.lan", Duration::from_millis(1000));
        assert_eq!(args, ["-c", "1", "-W", "1", "host.lan"]);
        let args = ping_args(Os::MacOS, "host.lan", Duration::from_millis(200));
        assert_eq!(args, ["-c", "1", "-t", "1", "host.lan"]);
    }
}
