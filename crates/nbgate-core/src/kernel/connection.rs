//! Kernel connection files.
//!
//! The kernel reads the ports and signing key it must use from a JSON file
//! passed on its command line (`{connection_file}` in the kernelspec argv).

use std::fs;
use std::net::{Ipv4Addr, TcpListener};
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

use super::protocol::Session;

/// Contents of a Jupyter connection file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub transport: String,
    pub ip: String,
    pub shell_port: u16,
    pub iopub_port: u16,
    pub stdin_port: u16,
    pub control_port: u16,
    pub hb_port: u16,
    pub key: String,
    pub signature_scheme: String,
    #[serde(default)]
    pub kernel_name: String,
}

impl ConnectionInfo {
    /// Pick five free loopback ports and a fresh signing key.
    ///
    /// All listeners are held until every port is chosen so the five ports
    /// are distinct.
    pub fn allocate(kernel_name: &str) -> Result<Self> {
        let listeners = (0..5)
            .map(|_| TcpListener::bind((Ipv4Addr::LOCALHOST, 0)))
            .collect::<std::io::Result<Vec<_>>>()?;
        let ports = listeners
            .iter()
            .map(|listener| listener.local_addr().map(|addr| addr.port()))
            .collect::<std::io::Result<Vec<_>>>()?;
        drop(listeners);

        Ok(Self {
            transport: "tcp".to_string(),
            ip: Ipv4Addr::LOCALHOST.to_string(),
            shell_port: ports[0],
            iopub_port: ports[1],
            stdin_port: ports[2],
            control_port: ports[3],
            hb_port: ports[4],
            key: Uuid::new_v4().to_string(),
            signature_scheme: "hmac-sha256".to_string(),
            kernel_name: kernel_name.to_string(),
        })
    }

    /// ZeroMQ endpoint for one of the ports.
    pub fn endpoint(&self, port: u16) -> String {
        format!("{}://{}:{}", self.transport, self.ip, port)
    }

    /// Client session signing with this connection's key.
    pub fn session(&self) -> Session {
        Session::new(&self.key)
    }

    /// Write the connection file.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_distinct_ports() {
        let info = ConnectionInfo::allocate("python3").unwrap();
        let mut ports = vec![
            info.shell_port,
            info.iopub_port,
            info.stdin_port,
            info.control_port,
            info.hb_port,
        ];
        ports.sort_unstable();
        ports.dedup();
        assert_eq!(ports.len(), 5);
        assert!(!info.key.is_empty());
        assert_eq!(info.endpoint(info.shell_port), format!("tcp://127.0.0.1:{}", info.shell_port));
    }

    #[test]
    fn test_connection_file_roundtrip() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("kernel-test.json");
        let info = ConnectionInfo::allocate("python3").unwrap();
        info.write_to(&path).unwrap();

        let read: ConnectionInfo = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(read, info);
        assert_eq!(read.signature_scheme, "hmac-sha256");
    }
}
