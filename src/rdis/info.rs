//! `INFO` report formatter (spec.md §1, out of scope as a command but
//! named as an external collaborator). Mirrors
//! `redis.InfoController.GetFormattedInfo` from
//! `examples/original_source/redis/info_controller.go`: a flat
//! `field:value\r\n` block, each field emitted only when non-empty. Not
//! wired to any command handler — spec.md §4.3/§4.4 never lists `INFO`
//! among the recognized command names.

use std::fmt::Write as _;

use super::config::{Role, ServerConfig};

#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    pub role: Option<Role>,
    pub port: Option<String>,
    pub connected_slaves: Option<String>,
    pub master_replid: Option<String>,
    pub master_repl_offset: i64,
}

impl ServerInfo {
    pub fn from_config(config: &ServerConfig) -> ServerInfo {
        ServerInfo {
            role: Some(config.role),
            port: Some(config.port.clone()),
            ..ServerInfo::default()
        }
    }

    pub fn format(&self) -> String {
        let mut out = String::new();
        if let Some(role) = self.role {
            let _ = writeln!(out, "role:{}\r", role);
        }
        if let Some(port) = &self.port {
            let _ = writeln!(out, "port:{}\r", port);
        }
        if let Some(slaves) = &self.connected_slaves {
            let _ = writeln!(out, "connected_slaves:{}\r", slaves);
        }
        if let Some(replid) = &self.master_replid {
            let _ = writeln!(out, "master_replid:{}\r", replid);
        }
        let _ = writeln!(out, "master_repl_offset:{}\r", self.master_repl_offset);
        out
    }
}
