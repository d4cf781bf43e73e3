#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use assert_cmd::Command;
use tempfile::TempDir;

/// One isolated CLI environment per test: its own state file, mock
/// backend, and a small port pool.
pub struct TestContext {
    dir: TempDir,
}

impl TestContext {
    pub fn state_file(&self) -> PathBuf {
        self.dir.path().join("state.json")
    }

    pub fn cmd(&self) -> Command {
        let mut cmd = self.cmd_without_backend();
        cmd.arg("--backend").arg("mock");
        cmd
    }

    /// Like `cmd`, but without the `--backend mock` flag, for tests that
    /// pass their own `--backend`.
    pub fn cmd_without_backend(&self) -> Command {
        let bin_path = env!("CARGO_BIN_EXE_vpslite");
        let mut cmd = Command::new(bin_path);
        cmd.timeout(Duration::from_secs(30));
        cmd.env_remove("BACKEND");
        cmd.env_remove("HOST_IP");
        cmd.env_remove("SSH_BASE_PORT");
        cmd.env_remove("SSH_PORT_POOL");
        cmd.env_remove("VPSLITE_STATE");
        cmd.arg("--state").arg(self.state_file());
        cmd
    }

    /// Create an instance and return its id from the table-less output.
    pub fn create(&self, owner: &str, image: &str) -> String {
        let output = self
            .cmd()
            .args(["create", owner, image])
            .output()
            .expect("failed to run create");
        assert!(output.status.success(), "create failed: {:?}", output);
        let stdout = String::from_utf8(output.stdout).unwrap();
        parse_field(&stdout, "id:")
    }
}

pub fn vpslite() -> TestContext {
    TestContext {
        dir: tempfile::tempdir().expect("failed to create temp dir"),
    }
}

pub fn parse_field(stdout: &str, key: &str) -> String {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix(key))
        .unwrap_or_else(|| panic!("no '{}' line in output:\n{}", key, stdout))
        .trim()
        .to_string()
}

pub fn read_state(path: &Path) -> serde_json::Value {
    let raw = std::fs::read_to_string(path).expect("state file missing");
    serde_json::from_str(&raw).expect("state file is not valid json")
}
