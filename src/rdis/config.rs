use clap::Parser;
use std::fmt;

use super::types::{ErrorT, ResultT};

/// Mirrors `network.CreateNewServer`'s role validation from the original
/// source: a server is either the top of the replication chain or a
/// follower of one. The replication handshake itself is out of scope
/// (spec.md §1) — `Role` exists so startup can validate the flag combo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Slave => write!(f, "slave"),
        }
    }
}

/// CLI flags for the server binary (spec.md §6's `ServerConfig`). Parsed
/// once at startup with `clap`, then handed to `run()` as a plain struct —
/// the core never re-reads argv.
#[derive(Parser, Debug, Clone)]
#[command(name = "rdis", about = "A Redis-compatible in-memory data server")]
pub struct Cli {
    /// TCP port to listen on.
    #[arg(long, default_value = "6379")]
    pub port: String,

    /// `master` (default) or `slave`.
    #[arg(long, default_value = "master")]
    pub role: String,

    /// `host:port` of the master, required when `--role slave`.
    #[arg(long)]
    pub replicaof: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: String,
    pub role: Role,
    pub replicaof: Option<String>,
}

impl ServerConfig {
    pub fn from_cli(cli: Cli) -> ResultT<ServerConfig> {
        let role = match cli.role.as_str() {
            "master" => Role::Master,
            "slave" => Role::Slave,
            other => {
                let msg: ErrorT = format!(
                    "invalid role option, expected \"master\" or \"slave\" got: {}",
                    other
                )
                .into();
                return Err(msg);
            }
        };
        if role == Role::Slave && cli.replicaof.is_none() {
            let msg: ErrorT = "--replicaof is required when --role slave".into();
            return Err(msg);
        }
        Ok(ServerConfig {
            port: cli.port,
            role,
            replicaof: cli.replicaof,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(role: &str, replicaof: Option<&str>) -> Cli {
        Cli {
            port: "6379".into(),
            role: role.into(),
            replicaof: replicaof.map(String::from),
        }
    }

    #[test]
    fn master_needs_no_replicaof() {
        let cfg = ServerConfig::from_cli(cli("master", None)).unwrap();
        assert_eq!(cfg.role, Role::Master);
    }

    #[test]
    fn slave_without_replicaof_is_rejected() {
        assert!(ServerConfig::from_cli(cli("slave", None)).is_err());
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!(ServerConfig::from_cli(cli("bogus", None)).is_err());
    }

    #[test]
    fn bind_addr_uses_all_interfaces() {
        let cfg = ServerConfig::from_cli(cli("master", None)).unwrap();
        assert_eq!(cfg.bind_addr(), "0.0.0.0:6379");
    }
}
