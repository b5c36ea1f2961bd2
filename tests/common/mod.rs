//! Shared test infrastructure for fsledger integration tests.
//!
//! Provides:
//! - `CmdResult` + `run_cli_case()` — integration test CLI runner
//! - `build_tree()` — declarative fixture tree builder

// Not every test binary uses every item; suppress dead-code warnings for the
// shared module.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

impl CmdResult {
    pub fn stdout_lines(&self) -> Vec<&str> {
        self.stdout.lines().collect()
    }
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_fsl") {
        let p = PathBuf::from(path);
        if p.exists() {
            return p;
        }
    }

    let exe_name = if cfg!(windows) { "fsl.exe" } else { "fsl" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!(
            "unable to resolve fsl binary path for integration test (checked CARGO_BIN_EXE_fsl and debug sibling path)"
        ),
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    run_cli_case_env(case_name, args, &[])
}

pub fn run_cli_case_env(case_name: &str, args: &[&str], envs: &[(&str, &str)]) -> CmdResult {
    let root = std::env::temp_dir().join("fsl-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let mut command = Command::new(&bin_path);
    command
        .args(args)
        .env_remove("FSLEDGER_REPO")
        .env_remove("FSLEDGER_CONFIG")
        .env("RUST_BACKTRACE", "1");
    for (key, value) in envs {
        command.env(key, value);
    }
    let output = command.output().expect("execute fsl command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// Build a fixture tree under `root`. Entries ending in `/` become
/// directories, the rest become small files (parents created as needed).
pub fn build_tree(root: &Path, entries: &[&str]) {
    for entry in entries {
        let path = root.join(entry.trim_end_matches('/'));
        if entry.ends_with('/') {
            fs::create_dir_all(&path).expect("create fixture dir");
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).expect("create fixture parent");
            }
            fs::write(&path, b"fixture").expect("create fixture file");
        }
    }
}

/// Recursive std-library scan of a tree: relative paths in depth-first
/// pre-order with byte-sorted siblings. Symlinks are reported, not followed.
/// This is the independent oracle the walker and index are checked against.
pub fn scan_tree(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    scan_into(root, PathBuf::new(), &mut out);
    out
}

fn scan_into(dir: &Path, rel: PathBuf, out: &mut Vec<PathBuf>) {
    let mut children: Vec<(Vec<u8>, PathBuf, bool)> = fs::read_dir(dir)
        .expect("read fixture dir")
        .map(|entry| {
            let entry = entry.expect("read fixture entry");
            let name = entry.file_name();
            let meta = fs::symlink_metadata(entry.path()).expect("stat fixture entry");
            let bytes = {
                use std::os::unix::ffi::OsStrExt;
                name.as_bytes().to_vec()
            };
            (bytes, PathBuf::from(name), meta.is_dir())
        })
        .collect();
    children.sort_by(|a, b| a.0.cmp(&b.0));

    for (_, name, is_dir) in children {
        let child_rel = rel.join(&name);
        out.push(child_rel.clone());
        if is_dir {
            scan_into(&dir.join(&name), child_rel, out);
        }
    }
}
