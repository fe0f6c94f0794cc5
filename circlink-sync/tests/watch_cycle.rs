use std::fs;
use std::path::{Path, PathBuf};

use circlink_core::types::SourcePattern;
use circlink_sync::{diff, mirror, remove_mirrored, resolve, snapshot, Snapshot};
use filetime::{set_file_mtime, FileTime};
use tempfile::TempDir;

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn glob_source(base: &Path, pattern: &str, recursive: bool) -> SourcePattern {
    SourcePattern {
        pattern: base.join(pattern),
        recursive,
        base_dir: base.to_path_buf(),
    }
}

fn write_at(path: &Path, content: &str, mtime: i64) {
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, content).expect("write");
    set_file_mtime(path, FileTime::from_unix_time(mtime, 0)).expect("mtime");
}

fn mirror_all(files: &[PathBuf], base: &Path, dest: &Path) {
    for file in files {
        mirror(file, base, dest).expect("mirror");
    }
}

#[test]
fn presave_then_deletion_only_removes_its_counterpart() {
    init_logs();
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    write_at(&src.path().join("a.txt"), "alpha", 1_000);
    write_at(&src.path().join("b.txt"), "beta", 1_000);

    let source = glob_source(src.path(), "*.txt", false);
    let files = resolve(&source).expect("resolve");
    mirror_all(&files, src.path(), dst.path());
    assert_eq!(fs::read_to_string(dst.path().join("a.txt")).unwrap(), "alpha");
    assert_eq!(fs::read_to_string(dst.path().join("b.txt")).unwrap(), "beta");

    let known = snapshot(&files, &Snapshot::new());
    let b_mtime_before = fs::metadata(dst.path().join("b.txt")).unwrap().modified().unwrap();

    fs::remove_file(src.path().join("a.txt")).unwrap();
    let current = snapshot(&resolve(&source).expect("resolve"), &known);
    let changes = diff(&known, &current);
    assert_eq!(changes.removed, vec![src.path().join("a.txt")]);
    assert!(changes.added.is_empty() && changes.changed.is_empty());

    for gone in &changes.removed {
        remove_mirrored(gone, src.path(), dst.path()).expect("remove");
    }
    assert!(!dst.path().join("a.txt").exists());
    let b_mtime_after = fs::metadata(dst.path().join("b.txt")).unwrap().modified().unwrap();
    assert_eq!(b_mtime_before, b_mtime_after, "b.txt must not be rewritten");
}

#[test]
fn recursive_cycle_picks_up_new_and_modified_files() {
    init_logs();
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    write_at(&src.path().join("code.py"), "v1", 1_000);

    let source = glob_source(src.path(), "*.py", true);
    let files = resolve(&source).expect("resolve");
    mirror_all(&files, src.path(), dst.path());
    let known = snapshot(&files, &Snapshot::new());

    write_at(&src.path().join("code.py"), "v2", 2_000);
    write_at(&src.path().join("lib").join("util.py"), "util", 2_000);

    let current = snapshot(&resolve(&source).expect("resolve"), &known);
    let changes = diff(&known, &current);
    assert_eq!(changes.added, vec![src.path().join("lib").join("util.py")]);
    assert_eq!(changes.changed, vec![src.path().join("code.py")]);

    for file in changes.to_copy() {
        mirror(file, src.path(), dst.path()).expect("mirror");
    }
    assert_eq!(fs::read_to_string(dst.path().join("code.py")).unwrap(), "v2");
    assert_eq!(
        fs::read_to_string(dst.path().join("lib").join("util.py")).unwrap(),
        "util"
    );
}
