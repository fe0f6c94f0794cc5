//! End-to-end tests against the real `circlink` binary with an isolated HOME.
//!
//! Watchers spawned here are real background processes; `Session` stops and
//! force-clears everything on drop so no watcher outlives its test.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread::sleep;
use std::time::{Duration, Instant};

use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn circlink_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_circlink"))
}

struct Session {
    home: TempDir,
    src: TempDir,
    dst: TempDir,
}

impl Session {
    fn new() -> Self {
        Self {
            home: TempDir::new().expect("home"),
            src: TempDir::new().expect("src"),
            dst: TempDir::new().expect("dst"),
        }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::new(circlink_bin());
        cmd.env("HOME", self.home.path())
            .env("USERPROFILE", self.home.path())
            .env("NO_COLOR", "1")
            .current_dir(self.src.path());
        cmd
    }

    fn start(&self, pattern: &str) {
        self.cmd()
            .args(["start", pattern])
            .arg(self.dst.path())
            .arg("--path")
            .assert()
            .success()
            .stdout(contains("Started link #"));
    }

    fn write_src(&self, name: &str, content: &str) {
        let path = self.src.path().join(name);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, content).expect("write");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.cmd().args(["stop", "all"]).output();
        let _ = self.cmd().args(["clear", "all", "--force"]).output();
    }
}

fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(50));
    }
}

fn read(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok()
}

// ---------------------------------------------------------------------------
// No watcher needed
// ---------------------------------------------------------------------------

#[test]
fn list_on_empty_registry_prints_nothing_found() {
    let session = Session::new();
    session
        .cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(contains("No links found."));
    session
        .cmd()
        .args(["view", "last", "--json"])
        .assert()
        .success()
        .stdout(contains("[]"));
}

#[test]
fn unknown_id_fails_with_not_found() {
    let session = Session::new();
    session
        .cmd()
        .args(["clear", "7"])
        .assert()
        .failure()
        .stderr(contains("no link matches '7'"));
    session
        .cmd()
        .args(["stop", "last"])
        .assert()
        .failure()
        .stderr(contains("no link matches 'last'"));
}

#[test]
fn invalid_token_is_a_usage_error() {
    let session = Session::new();
    session
        .cmd()
        .args(["stop", "first"])
        .assert()
        .failure()
        .stderr(contains("invalid link token"));
}

#[test]
fn pattern_outside_cwd_is_rejected() {
    let session = Session::new();
    session
        .cmd()
        .args(["start", "../*.py"])
        .arg(session.dst.path())
        .arg("--path")
        .assert()
        .failure()
        .stderr(contains("invalid pattern"));
}

#[test]
fn config_round_trip() {
    let session = Session::new();
    session
        .cmd()
        .args(["config", "view", "watcher.poll_interval_ms"])
        .assert()
        .success()
        .stdout(contains("100"));
    session
        .cmd()
        .args(["config", "edit", "display.process_id", "false"])
        .assert()
        .success()
        .stdout(contains("false"));
    session
        .cmd()
        .args(["config", "edit", "display.process_id", "maybe"])
        .assert()
        .failure()
        .stderr(contains("expected true or false"));
    session
        .cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(contains("settings.yaml"));
    session.cmd().args(["config", "reset"]).assert().success();
    session
        .cmd()
        .args(["config", "view", "display.process_id"])
        .assert()
        .success()
        .stdout(contains("true"));
}

#[test]
fn detect_reads_boot_out_from_override() {
    let session = Session::new();
    let board = TempDir::new().unwrap();
    fs::write(
        board.path().join("boot_out.txt"),
        "Adafruit CircuitPython 8.2.6 on 2023-09-12; Adafruit QT Py M0 with samd21e18\nBoard ID:qtpy_m0\n",
    )
    .unwrap();
    session
        .cmd()
        .args(["config", "edit", "device.root_override"])
        .arg(board.path())
        .assert()
        .success();
    session
        .cmd()
        .arg("detect")
        .assert()
        .success()
        .stdout(contains("CircuitPython device detected").and(contains("8.2.6")).and(contains("qtpy_m0")));
}

// ---------------------------------------------------------------------------
// Real watchers
// ---------------------------------------------------------------------------

#[test]
fn start_presaves_then_mirrors_changes() {
    let session = Session::new();
    session.write_src("a.txt", "alpha");
    session.write_src("b.txt", "beta");
    session.start("*.txt");

    // Presave has completed by the time `start` returns.
    assert_eq!(read(&session.dst.path().join("a.txt")).as_deref(), Some("alpha"));
    assert_eq!(read(&session.dst.path().join("b.txt")).as_deref(), Some("beta"));

    session
        .cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(contains("running").and(contains("*.txt")));

    session.write_src("c.txt", "gamma");
    let c_dest = session.dst.path().join("c.txt");
    wait_for("c.txt to be mirrored", || read(&c_dest).as_deref() == Some("gamma"));

    fs::remove_file(session.src.path().join("a.txt")).unwrap();
    let a_dest = session.dst.path().join("a.txt");
    wait_for("a.txt to be removed", || !a_dest.exists());
    assert_eq!(read(&session.dst.path().join("b.txt")).as_deref(), Some("beta"));
}

#[test]
fn stop_then_clear_lifecycle() {
    let session = Session::new();
    session.write_src("code.py", "print('hi')");
    session.start("code.py");

    session
        .cmd()
        .args(["clear", "last"])
        .assert()
        .failure()
        .stderr(contains("stop it first"));

    session
        .cmd()
        .args(["stop", "last"])
        .assert()
        .success()
        .stdout(contains("Stopped link #1"));
    session
        .cmd()
        .args(["list", "1"])
        .assert()
        .success()
        .stdout(contains("stopped"));

    session
        .cmd()
        .args(["clear", "1"])
        .assert()
        .success()
        .stdout(contains("Cleared link #1"));
    session
        .cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(contains("No links found."));
}

#[test]
fn restart_gives_a_new_id() {
    let session = Session::new();
    session.write_src("code.py", "v1");
    session.start("code.py");
    session.cmd().args(["stop", "1"]).assert().success();

    session
        .cmd()
        .args(["restart", "1"])
        .assert()
        .success()
        .stdout(contains("Restarted link #1 as #2"));
    session
        .cmd()
        .args(["list", "1"])
        .assert()
        .failure()
        .stderr(contains("no link matches '1'"));

    wait_for("watcher log line", || {
        let out = session.cmd().args(["logs", "2"]).output().expect("logs");
        out.status.success() && String::from_utf8_lossy(&out.stdout).contains("watching")
    });
}

#[test]
fn stop_with_clear_removes_entries() {
    let session = Session::new();
    session.write_src("code.py", "x");
    session.start("code.py");
    session
        .cmd()
        .args(["stop", "all", "--clear"])
        .assert()
        .success()
        .stdout(contains("Cleared link #1"));
    session
        .cmd()
        .args(["list", "--json"])
        .assert()
        .success()
        .stdout(contains("[]"));
}
