//! Slave process supervision: spawn, stop, inventory, zombie cleanup.
//!
//! The supervisor is the only component with authority to terminate slave
//! processes; the master only ever closes sockets. Stopping a slave always
//! tears down both sides in one operation: the process is signalled and the
//! master-side transport is severed, so no half-state survives.
//!
//! Zombie cleanup scans `/proc` for processes whose command line matches a
//! spawned slave (the `slave` subcommand with a `--listen-port` inside the
//! reserved range) but which this supervisor does not track. Signalling
//! goes through the system `kill`: the workspace forbids `unsafe`, which
//! rules out raw signal calls, and tracked children are handled by tokio's
//! own process API anyway.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ReplicationConfig;
use crate::replication::master::ReplicationMaster;

/// Inventory row for one supervised slave process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveProcessInfo {
    /// Assigned slave id.
    pub id: String,
    /// Assigned listen port.
    pub port: u16,
    /// OS process id, while the child is alive.
    pub pid: Option<u32>,
}

struct SlaveProcess {
    port: u16,
    child: Child,
}

/// Spawns and tracks slave processes of the `kvgrid slave` subcommand.
pub struct SlaveSupervisor {
    master: Arc<ReplicationMaster>,
    config: ReplicationConfig,
    program: PathBuf,
    master_addr: String,
    processes: DashMap<String, SlaveProcess>,
    next_port: AtomicU16,
}

impl SlaveSupervisor {
    /// Creates a supervisor spawning this binary's `slave` subcommand.
    ///
    /// # Errors
    ///
    /// Fails when the current executable path cannot be resolved or the
    /// configured port range is invalid.
    pub fn new(
        master: Arc<ReplicationMaster>,
        config: ReplicationConfig,
        master_addr: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let program = std::env::current_exe()?;
        Self::with_program(master, config, master_addr, program)
    }

    /// Creates a supervisor spawning an explicit program (tests use a stub).
    ///
    /// # Errors
    ///
    /// Fails when the configured port range is invalid.
    pub fn with_program(
        master: Arc<ReplicationMaster>,
        config: ReplicationConfig,
        master_addr: impl Into<String>,
        program: PathBuf,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let next_port = AtomicU16::new(config.slave_port_base);
        Ok(Self {
            master,
            config,
            program,
            master_addr: master_addr.into(),
            processes: DashMap::new(),
            next_port,
        })
    }

    /// Spawns `count` slave processes, each with a fresh id and port.
    /// Returns the assigned ids.
    ///
    /// # Errors
    ///
    /// Fails when the reserved port range is exhausted or a spawn fails;
    /// slaves spawned before the failure keep running.
    pub fn add_slaves(&self, count: usize) -> anyhow::Result<Vec<String>> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let port = self.next_port.fetch_add(1, Ordering::Relaxed);
            if !self.config.in_slave_range(port) {
                anyhow::bail!(
                    "slave port range exhausted at {port} (base {}, span {})",
                    self.config.slave_port_base,
                    self.config.slave_port_span
                );
            }
            let id = fresh_slave_id();
            let child = Command::new(&self.program)
                .arg("slave")
                .args(["--slave-id", &id])
                .args(["--master-addr", &self.master_addr])
                .args(["--listen-port", &port.to_string()])
                .kill_on_drop(true)
                .spawn()?;
            info!(slave = %id, port, pid = child.id(), "slave process spawned");
            self.processes.insert(id.clone(), SlaveProcess { port, child });
            ids.push(id);
        }
        Ok(ids)
    }

    /// Inventory of tracked slave processes.
    #[must_use]
    pub fn list(&self) -> Vec<SlaveProcessInfo> {
        self.processes
            .iter()
            .map(|entry| SlaveProcessInfo {
                id: entry.key().clone(),
                port: entry.value().port,
                pid: entry.value().child.id(),
            })
            .collect()
    }

    /// Number of tracked slave processes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// Whether no slave processes are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Gracefully stops one slave: severs the master-side transport, sends
    /// SIGTERM, waits bounded, then force-kills. Returns whether the id was
    /// tracked.
    pub async fn stop_slave(&self, id: &str) -> bool {
        let Some((_, mut process)) = self.processes.remove(id) else {
            return false;
        };
        self.master.disconnect_slave(id);
        if let Some(pid) = process.child.id() {
            let _ = Command::new("kill").arg(pid.to_string()).status().await;
            match tokio::time::timeout(Duration::from_secs(5), process.child.wait()).await {
                Ok(_) => {
                    info!(slave = %id, "slave stopped");
                    return true;
                }
                Err(_) => warn!(slave = %id, "slave ignored SIGTERM; force-killing"),
            }
        }
        let _ = process.child.kill().await;
        info!(slave = %id, "slave stopped (forced)");
        true
    }

    /// Forcefully terminates one slave and severs its transport. Returns
    /// whether the id was tracked.
    pub async fn remove_slave(&self, id: &str) -> bool {
        let Some((_, mut process)) = self.processes.remove(id) else {
            return false;
        };
        self.master.disconnect_slave(id);
        let _ = process.child.kill().await;
        info!(slave = %id, "slave removed");
        true
    }

    /// Stops every tracked slave; returns how many were stopped.
    pub async fn stop_all_slaves(&self) -> usize {
        let ids: Vec<String> = self.processes.iter().map(|e| e.key().clone()).collect();
        let mut stopped = 0;
        for id in ids {
            if self.stop_slave(&id).await {
                stopped += 1;
            }
        }
        stopped
    }

    /// Scans for orphaned slave processes (command-line match over the
    /// reserved port range, not tracked here) and terminates them. Returns
    /// how many were killed.
    ///
    /// # Errors
    ///
    /// Fails only when `/proc` itself cannot be read.
    pub async fn cleanup_zombies(&self) -> anyhow::Result<usize> {
        let tracked: HashSet<u32> = self
            .processes
            .iter()
            .filter_map(|entry| entry.value().child.id())
            .collect();
        let own_pid = std::process::id();
        let mut killed = 0;

        for dir_entry in std::fs::read_dir("/proc")? {
            let Ok(dir_entry) = dir_entry else { continue };
            let Some(pid) = dir_entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
            else {
                continue;
            };
            if pid == own_pid || tracked.contains(&pid) {
                continue;
            }
            let Ok(cmdline) = std::fs::read(dir_entry.path().join("cmdline")) else {
                continue;
            };
            let args: Vec<String> = cmdline
                .split(|byte| *byte == 0)
                .filter(|part| !part.is_empty())
                .map(|part| String::from_utf8_lossy(part).into_owned())
                .collect();
            if !is_orphaned_slave_cmdline(&args, &self.config) {
                continue;
            }
            warn!(pid, "terminating zombie slave process");
            let _ = Command::new("kill")
                .args(["-9", &pid.to_string()])
                .status()
                .await;
            killed += 1;
        }
        if killed > 0 {
            info!(killed, "zombie slaves cleaned up");
        } else {
            debug!("no zombie slaves found");
        }
        Ok(killed)
    }
}

/// Whether a process command line looks like a slave of this deployment:
/// the `slave` subcommand, a `--slave-id`, and a `--listen-port` inside the
/// reserved range.
fn is_orphaned_slave_cmdline(args: &[String], config: &ReplicationConfig) -> bool {
    let is_slave =
        args.iter().any(|a| a == "slave") && args.iter().any(|a| a == "--slave-id");
    if !is_slave {
        return false;
    }
    let Some(flag_pos) = args.iter().position(|a| a == "--listen-port") else {
        return false;
    };
    args.get(flag_pos + 1)
        .and_then(|port| port.parse::<u16>().ok())
        .is_some_and(|port| config.in_slave_range(port))
}

fn fresh_slave_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("slave-{}", &uuid[..8])
}

#[cfg(test)]
mod tests {
    use crate::storage::Store;

    use super::*;

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(ToString::to_string).collect()
    }

    fn test_supervisor(span: u16) -> SlaveSupervisor {
        let config = ReplicationConfig {
            master_port: 0,
            slave_port_base: 7001,
            slave_port_span: span,
            ..ReplicationConfig::default()
        };
        let master = Arc::new(ReplicationMaster::new(
            Arc::new(Store::new("master", 100)),
            config.clone(),
        ));
        // `sleep` never parses the slave args, which is exactly what the
        // registry tests need: a live child that does nothing.
        SlaveSupervisor::with_program(master, config, "127.0.0.1:0", PathBuf::from("sleep"))
            .unwrap()
    }

    // ---- command-line matching ----

    #[test]
    fn matches_a_spawned_slave_cmdline() {
        let config = ReplicationConfig::default();
        let cmdline = args(&[
            "/usr/local/bin/kvgrid",
            "slave",
            "--slave-id",
            "slave-ab12cd34",
            "--master-addr",
            "127.0.0.1:7000",
            "--listen-port",
            "7003",
        ]);
        assert!(is_orphaned_slave_cmdline(&cmdline, &config));
    }

    #[test]
    fn ignores_ports_outside_the_reserved_range() {
        let config = ReplicationConfig::default();
        let cmdline = args(&[
            "kvgrid",
            "slave",
            "--slave-id",
            "x",
            "--listen-port",
            "9000",
        ]);
        assert!(!is_orphaned_slave_cmdline(&cmdline, &config));
    }

    #[test]
    fn ignores_unrelated_processes() {
        let config = ReplicationConfig::default();
        assert!(!is_orphaned_slave_cmdline(&args(&["bash"]), &config));
        assert!(!is_orphaned_slave_cmdline(
            &args(&["kvgrid", "cluster", "--listen-port", "7002"]),
            &config
        ));
        assert!(!is_orphaned_slave_cmdline(
            &args(&["kvgrid", "slave", "--slave-id", "x"]),
            &config
        ));
    }

    #[test]
    fn fresh_ids_are_prefixed_and_unique() {
        let a = fresh_slave_id();
        let b = fresh_slave_id();
        assert!(a.starts_with("slave-"));
        assert_eq!(a.len(), "slave-".len() + 8);
        assert_ne!(a, b);
    }

    // ---- process registry ----

    #[tokio::test]
    async fn add_slaves_assigns_unique_ids_and_sequential_ports() {
        let supervisor = test_supervisor(64);
        let ids = supervisor.add_slaves(3).unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(supervisor.len(), 3);

        let mut inventory = supervisor.list();
        inventory.sort_by_key(|info| info.port);
        let ports: Vec<u16> = inventory.iter().map(|info| info.port).collect();
        assert_eq!(ports, vec![7001, 7002, 7003]);

        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), 3);

        supervisor.stop_all_slaves().await;
    }

    #[tokio::test]
    async fn port_range_exhaustion_is_an_error() {
        let supervisor = test_supervisor(2);
        supervisor.add_slaves(2).unwrap();
        assert!(supervisor.add_slaves(1).is_err());
        supervisor.stop_all_slaves().await;
    }

    #[tokio::test]
    async fn stop_slave_removes_it_from_the_inventory() {
        let supervisor = test_supervisor(64);
        let ids = supervisor.add_slaves(2).unwrap();

        assert!(supervisor.stop_slave(&ids[0]).await);
        assert!(!supervisor.stop_slave(&ids[0]).await, "already stopped");
        assert_eq!(supervisor.len(), 1);

        assert!(supervisor.remove_slave(&ids[1]).await);
        assert!(supervisor.is_empty());
    }

    #[tokio::test]
    async fn stop_all_slaves_empties_the_registry() {
        let supervisor = test_supervisor(64);
        supervisor.add_slaves(3).unwrap();
        assert_eq!(supervisor.stop_all_slaves().await, 3);
        assert!(supervisor.is_empty());
    }
}
