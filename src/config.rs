use crate::server::CorsPolicy;
use crate::tracker::ReaderPolicy;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};

/// NFC tag writer service - writes profile URLs to tags on a PC/SC reader
#[derive(Debug, Clone, Parser)]
#[command(name = "ndef-writer")]
#[command(version)]
pub struct Config {
    /// Address to bind the HTTP server to
    #[arg(long, env = "WRITER_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port of the HTTP server
    #[arg(short, long, env = "PORT", default_value_t = 8787)]
    pub port: u16,

    /// Reader name markers that win over other readers (case-insensitive)
    #[arg(
        long = "preferred-reader",
        env = "PREFERRED_READERS",
        value_delimiter = ',',
        default_value = "ACR,ACS,NFC"
    )]
    pub preferred_readers: Vec<String>,

    /// Reader name markers that are never used (case-insensitive)
    #[arg(
        long = "blocked-reader",
        env = "BLOCKED_READERS",
        value_delimiter = ',',
        default_value = "Windows Hello"
    )]
    pub blocked_readers: Vec<String>,

    /// Extra browser origins allowed besides local and private network hosts
    #[arg(
        long = "allowed-origin",
        env = "ALLOWED_ORIGINS",
        value_delimiter = ',',
        default_value = "https://dbc.imritma.com"
    )]
    pub allowed_origins: Vec<String>,

    /// Type 2 pages read back after a write (0 disables)
    #[arg(long, env = "VERIFY_BLOCKS", default_value_t = 4)]
    pub verify_blocks: u8,

    /// Capacity of the hardware event channel
    #[arg(long, default_value_t = 64)]
    pub event_capacity: usize,
}

impl Config {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn reader_policy(&self) -> ReaderPolicy {
        ReaderPolicy::new(&self.preferred_readers, &self.blocked_readers)
    }

    pub fn cors_policy(&self) -> CorsPolicy {
        CorsPolicy::new(self.allowed_origins.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["ndef-writer"]).unwrap();
        assert_eq!(config.preferred_readers, vec!["ACR", "ACS", "NFC"]);
        assert_eq!(config.verify_blocks, 4);

        let policy = config.reader_policy();
        assert!(policy.is_preferred("ACS ACR122U PICC Interface"));
        assert!(policy.is_blocked("Windows Hello Face Software Device"));
    }

    #[test]
    fn test_lists_split_on_commas() {
        let config = Config::try_parse_from([
            "ndef-writer",
            "--preferred-reader",
            "Identiv,uTrust",
            "--allowed-origin",
            "https://a.example,https://b.example",
            "--port",
            "9000",
        ])
        .unwrap();
        assert_eq!(config.preferred_readers, vec!["Identiv", "uTrust"]);
        assert!(config.cors_policy().allows("https://b.example"));
        assert_eq!(config.bind_addr().port(), 9000);
    }
}
