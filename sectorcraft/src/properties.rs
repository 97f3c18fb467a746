use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sectorcraft_core::DEFAULT_PORT;
use sectorcraft_core::server::ServerConfig;

#[derive(Debug, PartialEq)]
pub struct ServerProperties {
    pub server_ip: Option<IpAddr>,
    pub server_port: u16,
    pub level_name: String,
    pub level_seed: Option<String>,
    pub max_players: usize,
    pub unique_usernames: bool,
    /// Seconds, 0 disables the timeout
    pub read_timeout: u64,
    pub spawn_x: i32,
    pub spawn_z: i32
}

impl Default for ServerProperties {
    fn default() -> Self {
        ServerProperties {
            server_ip: None,
            server_port: DEFAULT_PORT,
            level_name: "world".to_owned(),
            level_seed: None,
            max_players: 20,
            unique_usernames: true,
            read_timeout: 0,
            spawn_x: 0,
            spawn_z: 0
        }
    }
}

impl ServerProperties {
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.server_ip.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)), self.server_port)
    }

    /// Numeric seeds are used as is, anything else is hashed with FNV-1a.
    pub fn seed(&self) -> u64 {
        match &self.level_seed {
            Some(seed) => seed.parse().unwrap_or_else(|_| {
                seed.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, b| (hash ^ b as u64).wrapping_mul(0x0100_0000_01b3))
            }),
            None => 0
        }
    }
}

impl FromStr for ServerProperties {
    type Err = core::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        macro_rules! parse {
            ($value:ident, $dest:expr) => {
                if let Ok(v) = $value.parse() {
                    $dest = v;
                }
            }
        }

        macro_rules! parse_optional {
            ($value:ident, $dest:expr) => {
                if let Ok(v) = $value.parse() {
                    $dest = Some(v);
                }
            }
        }

        macro_rules! parse_optional_str {
            ($value:ident, $dest:expr) => {
                if !$value.is_empty() {
                    $dest = Some($value.to_owned());
                }
            }
        }

        let mut properties = ServerProperties::default();
        for (key, value) in s.lines()
                                .filter(|l| !l.starts_with('#'))
                                .map(|l| l.split_once('=').unwrap_or((l, ""))) {
            match key {
                "server-ip" => parse_optional!(value, properties.server_ip),
                "server-port" => parse!(value, properties.server_port),
                "level-name" => properties.level_name = value.to_owned(),
                "level-seed" => parse_optional_str!(value, properties.level_seed),
                "max-players" => parse!(value, properties.max_players),
                "unique-usernames" => parse!(value, properties.unique_usernames),
                "read-timeout" => parse!(value, properties.read_timeout),
                "spawn-x" => parse!(value, properties.spawn_x),
                "spawn-z" => parse!(value, properties.spawn_z),
                _ => {}
            }
        }

        Ok(properties)
    }
}

impl From<ServerProperties> for ServerConfig {
    fn from(properties: ServerProperties) -> ServerConfig {
        let read_timeout = match properties.read_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs))
        };

        ServerConfig {
            max_players: properties.max_players,
            unique_usernames: properties.unique_usernames,
            read_timeout,
            seed: properties.seed(),
            level_dir: Some(PathBuf::from(properties.level_name)),
            spawn_column: (properties.spawn_x, properties.spawn_z)
        }
    }
}
