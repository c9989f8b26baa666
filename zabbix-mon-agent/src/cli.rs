//! Command-line flags
//!
//! Every setting can also come from its environment variable; a flag wins
//! over the variable, and both win over the config file.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::LogFormat;

#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the TOML config file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print the effective configuration (password redacted) and exit
    #[arg(long)]
    pub print_config: bool,

    /// Zabbix JSON-RPC endpoint
    #[arg(long, env = "ZABBIX_URL", value_name = "URL")]
    pub zabbix_url: Option<String>,

    #[arg(long, env = "ZABBIX_USER")]
    pub zabbix_user: Option<String>,

    #[arg(long, env = "ZABBIX_PASSWORD", hide_env_values = true)]
    pub zabbix_password: Option<String>,

    /// Host name as registered in Zabbix
    #[arg(long, env = "ZABBIX_HOST")]
    pub zabbix_host: Option<String>,

    /// Zabbix trapper port
    #[arg(long, env = "ZABBIX_TRAPPER_PORT")]
    pub trapper_port: Option<u16>,

    /// Collection interval ("10", "30s", "1m")
    #[arg(long, env = "INTERVAL", value_parser = parse_seconds)]
    pub interval: Option<Duration>,

    /// Maximum values per sender frame
    #[arg(long, env = "BATCH_SIZE")]
    pub batch_size: Option<usize>,

    #[arg(long, env = "LOG_LEVEL", value_name = "LEVEL")]
    pub log_level: Option<String>,

    #[arg(long, env = "LOG_FORMAT", value_enum)]
    pub log_format: Option<LogFormat>,

    /// Send attempts per cycle
    #[arg(long, env = "MAX_RETRIES")]
    pub max_retries: Option<u32>,

    /// Wait before the first retry, doubled on each further retry
    #[arg(long, env = "RETRY_BACKOFF", value_parser = parse_duration)]
    pub retry_backoff: Option<Duration>,

    #[arg(long, env = "HTTP_TIMEOUT", value_parser = parse_seconds)]
    pub http_timeout: Option<Duration>,

    #[arg(long, env = "SENDER_TIMEOUT", value_parser = parse_seconds)]
    pub sender_timeout: Option<Duration>,

    /// Deadline for one whole collect/send cycle
    #[arg(long, env = "CYCLE_TIMEOUT", value_parser = parse_seconds)]
    pub cycle_timeout: Option<Duration>,
}

/// Bare numbers are seconds; anything else goes through humantime
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw).map_err(|e| format!("invalid duration {raw:?}: {e}"))
}

/// Like [`parse_duration`], for settings stored in whole seconds
pub fn parse_seconds(raw: &str) -> Result<Duration, String> {
    let duration = parse_duration(raw)?;
    if duration.subsec_nanos() != 0 {
        return Err(format!("{:?} is not a whole number of seconds", raw.trim()));
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("1500ms").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "zabbix-mon-agent",
            "--zabbix-url",
            "http://zabbix.lan/api_jsonrpc.php",
            "--interval",
            "30s",
            "--batch-size",
            "10",
            "--log-format",
            "json",
            "--print-config",
        ])
        .unwrap();

        assert_eq!(cli.zabbix_url.as_deref(), Some("http://zabbix.lan/api_jsonrpc.php"));
        assert_eq!(cli.interval, Some(Duration::from_secs(30)));
        assert_eq!(cli.batch_size, Some(10));
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        assert!(cli.print_config);
    }

    #[test]
    fn test_bad_duration_flag_is_rejected() {
        assert!(Cli::try_parse_from(["zabbix-mon-agent", "--retry-backoff", "often"]).is_err());
    }

    #[test]
    fn test_sub_second_values_need_millisecond_settings() {
        assert_eq!(parse_seconds("2m").unwrap(), Duration::from_secs(120));
        assert!(parse_seconds("500ms").is_err());
        assert!(parse_seconds("1500ms").is_err());

        for flag in ["--interval", "--cycle-timeout", "--http-timeout", "--sender-timeout"] {
            assert!(Cli::try_parse_from(["zabbix-mon-agent", flag, "500ms"]).is_err(), "{flag}");
        }
        let cli = Cli::try_parse_from(["zabbix-mon-agent", "--retry-backoff", "500ms"]).unwrap();
        assert_eq!(cli.retry_backoff, Some(Duration::from_millis(500)));
    }
}
