//! End-to-end tests of the `mediasort` binary.
//!
//! exiftool is replaced by a small shell script that prints canned JSON, so
//! these run without any external tool installed.
//!
//! Run with: `cargo test --test cli`

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn mediasort(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_mediasort"))
        .arg("--root")
        .arg(root)
        .arg("--no-geolocation")
        .args(args)
        .output()
        .expect("failed to run mediasort")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn write(path: &Path, content: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn gen_config_prints_documented_defaults() {
    let root = TempDir::new().unwrap();
    let out = mediasort(root.path(), &["gen-config"]);
    assert!(out.status.success());
    let text = stdout(&out);
    assert!(text.contains("[path]"));
    assert!(text.contains("dirs_path"));
    assert!(!root.path().join(".mediasort").exists());
}

#[test]
fn unknown_config_key_fails() {
    let root = TempDir::new().unwrap();
    write(&root.path().join(".mediasort/config.toml"), b"[path]\nbogus = 1\n");
    let out = mediasort(root.path(), &["check"]);
    assert!(!out.status.success());
}

#[test]
fn invalid_template_fails_before_touching_files() {
    let (src, root) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let photo = src.path().join("a.jpg");
    write(&photo, b"a");
    let out = mediasort(
        root.path(),
        &["--dirs-path", "<%Y", "import", src.path().to_str().unwrap()],
    );
    assert!(!out.status.success());
    assert!(photo.exists());
}

#[test]
fn clean_without_flags_deletes_excluded_files_and_empty_dirs() {
    let root = TempDir::new().unwrap();
    write(&root.path().join("keep/a.jpg"), b"a");
    write(&root.path().join("keep/Thumbs.db"), b"thumbs");
    fs::create_dir_all(root.path().join("empty/nested")).unwrap();

    let out = mediasort(root.path(), &["--exclude", "**/Thumbs.db", "clean"]);

    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(root.path().join("keep/a.jpg").exists());
    assert!(!root.path().join("keep/Thumbs.db").exists());
    assert!(!root.path().join("empty").exists());
}

#[test]
fn clone_into_occupied_directory_fails() {
    let (root, dest) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    write(&root.path().join("a.jpg"), b"a");
    write(&dest.path().join("occupied.txt"), b"x");

    let out = mediasort(root.path(), &["clone", dest.path().to_str().unwrap()]);

    assert!(!out.status.success());
    assert!(!dest.path().join("a.jpg").exists());
}

#[cfg(unix)]
mod with_fake_exiftool {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// Script answering every file with the same date tag.
    fn fake_exiftool(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("exiftool");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn dated_exiftool(dir: &Path) -> PathBuf {
        fake_exiftool(
            dir,
            r#"echo '[{"SourceFile":"x","EXIF:DateTimeOriginal":"2015:06:29 16:34:14"}]'"#,
        )
    }

    fn run(root: &Path, tool: &Path, args: &[&str]) -> Output {
        let mut full = vec!["--exiftool", tool.to_str().unwrap()];
        full.extend_from_slice(args);
        mediasort(root, &full)
    }

    #[test]
    fn import_sort_check() {
        let (tools, src, root) = (
            TempDir::new().unwrap(),
            TempDir::new().unwrap(),
            TempDir::new().unwrap(),
        );
        let tool = dated_exiftool(tools.path());
        write(&src.path().join("trip/img_3900.jpg"), b"img 3900");

        let out = run(root.path(), &tool, &["import", src.path().to_str().unwrap()]);
        assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
        assert!(stdout(&out).contains("1 succeeded"));
        let placed = root.path().join("2015/06-Jun/20150629-163414-img_3900.jpg");
        assert!(placed.exists());

        let out = run(root.path(), &tool, &["sort"]);
        assert!(out.status.success());
        assert!(stdout(&out).contains("0 succeeded, 1 skipped"));

        assert!(run(root.path(), &tool, &["check"]).status.success());
        fs::write(&placed, b"damaged").unwrap();
        let out = run(root.path(), &tool, &["check"]);
        assert!(!out.status.success());
        assert!(stdout(&out).contains("1 corrupted"));
    }

    #[test]
    fn dry_run_changes_nothing() {
        let (tools, src, root) = (
            TempDir::new().unwrap(),
            TempDir::new().unwrap(),
            TempDir::new().unwrap(),
        );
        let tool = dated_exiftool(tools.path());
        let photo = src.path().join("img_1.jpg");
        write(&photo, b"one");

        let out = run(
            root.path(),
            &tool,
            &["--dry-run", "import", src.path().to_str().unwrap()],
        );
        assert!(out.status.success());
        assert!(stdout(&out).contains("20150629-163414-img_1.jpg"));
        assert!(photo.exists());
        assert!(!root.path().join("2015").exists());
    }

    #[test]
    fn every_file_failing_exits_nonzero() {
        let (tools, src, root) = (
            TempDir::new().unwrap(),
            TempDir::new().unwrap(),
            TempDir::new().unwrap(),
        );
        let tool = fake_exiftool(tools.path(), "echo 'File format error' >&2; exit 1");
        write(&src.path().join("a.jpg"), b"a");

        let out = run(root.path(), &tool, &["import", src.path().to_str().unwrap()]);
        assert!(!out.status.success());
        assert!(src.path().join("a.jpg").exists());
    }

    #[test]
    fn edit_and_remove() {
        let (tools, src, root) = (
            TempDir::new().unwrap(),
            TempDir::new().unwrap(),
            TempDir::new().unwrap(),
        );
        let tool = dated_exiftool(tools.path());
        write(&src.path().join("img_1.jpg"), b"one");
        let templates = ["--dirs-path", "<%Y>", "--name", "<title|basename>"];

        let mut args = templates.to_vec();
        args.extend(["import", src.path().to_str().unwrap()]);
        assert!(run(root.path(), &tool, &args).status.success());
        assert!(root.path().join("2015/img_1.jpg").exists());

        let mut args = templates.to_vec();
        args.extend(["edit", "2015/img_1.jpg", "--set", "title=Harbour"]);
        let out = run(root.path(), &tool, &args);
        assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
        assert!(root.path().join("2015/Harbour.jpg").exists());

        let out = run(root.path(), &tool, &["remove", "--delete", "2015/Harbour.jpg"]);
        assert!(out.status.success());
        assert!(!root.path().join("2015").exists());
    }

    #[test]
    fn update_follows_a_file_moved_by_hand() {
        let (tools, src, root) = (
            TempDir::new().unwrap(),
            TempDir::new().unwrap(),
            TempDir::new().unwrap(),
        );
        let tool = dated_exiftool(tools.path());
        write(&src.path().join("img_1.jpg"), b"one");
        let import = ["--name", "<basename>", "import", src.path().to_str().unwrap()];
        assert!(run(root.path(), &tool, &import).status.success());

        let placed = root.path().join("2015/06-Jun/img_1.jpg");
        let moved = root.path().join("favourites/img_1.jpg");
        fs::create_dir_all(moved.parent().unwrap()).unwrap();
        fs::rename(&placed, &moved).unwrap();

        let out = run(root.path(), &tool, &["update"]);
        assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
        assert!(stdout(&out).contains("relocated"));
        assert!(run(root.path(), &tool, &["check"]).status.success());
    }
}
