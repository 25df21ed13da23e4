use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use repo_digest::config::{CloneConfig, Config, LimitsConfig, TempConfig};
use repo_digest::janitor::Janitor;
use repo_digest::materialize::materialize;
use repo_digest::models::{CloneRequest, FileContent, GitRef, Truncation};
use repo_digest::query::{parse, ParseContext};
use repo_digest::walk::walk;
use repo_digest::{ingest, CloneErrorKind, ErrorKind, IngestOptions};
use tempfile::TempDir;

fn sample_dir(root: &Path) -> PathBuf {
    let dir = root.join("project");
    fs::create_dir_all(dir.join("sub")).unwrap();
    fs::write(dir.join("a.txt"), "hello").unwrap();
    fs::write(dir.join("sub").join("b.txt"), "world").unwrap();
    dir
}

fn test_config(root: &Path) -> Config {
    Config {
        temp: TempConfig {
            root: root.join("tmp"),
            ..TempConfig::default()
        },
        ..Config::default()
    }
}

#[tokio::test]
async fn local_directory_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let dir = sample_dir(tmp.path());
    let config = test_config(tmp.path());
    let janitor = Janitor::from_config(&config.temp);
    let output = tmp.path().join("digest.txt");

    let options = IngestOptions {
        output: Some(output.clone()),
        ..IngestOptions::default()
    };
    let ingestion = ingest(dir.to_str().unwrap(), &options, &config, &janitor)
        .await
        .unwrap();

    assert!(!ingestion.query.is_remote);
    assert_eq!(ingestion.stats.file_count, 2);
    assert_eq!(ingestion.stats.total_bytes, 10);
    assert!(!ingestion.stats.truncated);
    assert!(ingestion.write_error.is_none());
    assert!(ingestion.digest.content.contains("hello"));
    assert!(ingestion.digest.content.contains("world"));
    assert_eq!(
        fs::read_to_string(&output).unwrap(),
        ingestion.digest.file_body()
    );
    // local sources never touch the temp root
    assert!(!config.temp.root.exists() || fs::read_dir(&config.temp.root).unwrap().count() == 0);
}

#[tokio::test]
async fn tree_text_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let dir = sample_dir(tmp.path());
    let config = test_config(tmp.path());
    let janitor = Janitor::from_config(&config.temp);
    let options = IngestOptions::default();

    let first = ingest(dir.to_str().unwrap(), &options, &config, &janitor)
        .await
        .unwrap();
    let second = ingest(dir.to_str().unwrap(), &options, &config, &janitor)
        .await
        .unwrap();
    assert_eq!(first.digest.tree, second.digest.tree);
    assert_eq!(first.digest, second.digest);
}

#[tokio::test]
async fn write_failure_keeps_digest() {
    let tmp = TempDir::new().unwrap();
    let dir = sample_dir(tmp.path());
    let config = test_config(tmp.path());
    let janitor = Janitor::from_config(&config.temp);
    let options = IngestOptions {
        output: Some(tmp.path().join("no-such-dir").join("out.txt")),
        ..IngestOptions::default()
    };

    let ingestion = ingest(dir.to_str().unwrap(), &options, &config, &janitor)
        .await
        .unwrap();
    assert_eq!(
        ingestion.write_error.as_ref().map(|e| e.kind()),
        Some(ErrorKind::Write)
    );
    assert!(ingestion.digest.tree.contains("a.txt"));
}

#[tokio::test]
async fn web_sources_cannot_escape() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let janitor = Janitor::from_config(&config.temp);
    let options = IngestOptions {
        from_web: true,
        ..IngestOptions::default()
    };

    let err = ingest("../../etc", &options, &config, &janitor)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidSource);
}

#[tokio::test]
async fn option_like_ref_never_reaches_git() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let janitor = Janitor::from_config(&config.temp);

    let err = ingest(
        "owner/repo/tree/--depth=1000",
        &IngestOptions::default(),
        &config,
        &janitor,
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidSource);

    let options = IngestOptions {
        branch: Some("--upload-pack=touch".to_string()),
        ..IngestOptions::default()
    };
    let err = ingest("owner/repo", &options, &config, &janitor)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidSource);
    assert!(!config.temp.root.exists() || fs::read_dir(&config.temp.root).unwrap().count() == 0);
}

#[test]
fn limits_scenarios_on_shared_tree() {
    let tmp = TempDir::new().unwrap();
    let dir = sample_dir(tmp.path());
    let filters = Default::default();

    let small_files = LimitsConfig {
        max_file_size: 4,
        ..LimitsConfig::default()
    };
    let result = walk(&dir, &small_files, &filters, None).unwrap();
    assert_eq!(result.stats.total_bytes, 10);
    assert!(result
        .included_files
        .iter()
        .all(|f| f.content == FileContent::Marker(Truncation::TooLarge)));

    let one_file = LimitsConfig {
        max_files: 1,
        ..LimitsConfig::default()
    };
    let result = walk(&dir, &one_file, &filters, None).unwrap();
    assert!(result.stats.truncated);
    assert_eq!(
        result
            .included_files
            .iter()
            .filter(|f| f.content.is_text())
            .count(),
        1
    );
}

#[cfg(unix)]
mod fake_git {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-git");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn config_with_git(root: &Path, git: PathBuf, timeout_secs: u64) -> Config {
        Config {
            clone: CloneConfig { git, timeout_secs },
            ..test_config(root)
        }
    }

    fn expected_destination(config: &Config, source: &str) -> PathBuf {
        let ctx = ParseContext::local(config.temp.root.clone());
        parse(source, &ctx).unwrap().local_path
    }

    #[tokio::test]
    async fn clone_timeout_leaves_no_directory() {
        let tmp = TempDir::new().unwrap();
        let git = script(tmp.path(), "exec sleep 10");
        let config = config_with_git(tmp.path(), git, 1);
        let janitor = Janitor::from_config(&config.temp);
        let source = "github.com/owner/repo/tree/main/src";
        let dest = expected_destination(&config, source);

        let err = ingest(source, &IngestOptions::default(), &config, &janitor)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Clone(CloneErrorKind::Network));
        assert!(err.is_retryable());
        assert!(!dest.exists());
        assert!(janitor.active_entries().is_empty());
    }

    #[tokio::test]
    async fn clone_failure_leaves_no_directory() {
        let tmp = TempDir::new().unwrap();
        let git = script(
            tmp.path(),
            r#"if [ "$3" = fetch ]; then
  echo "fatal: couldn't find remote ref nope" >&2
  exit 128
fi
exit 0"#,
        );
        let config = config_with_git(tmp.path(), git, 10);
        let janitor = Janitor::from_config(&config.temp);
        let dest = expected_destination(&config, "owner/repo/tree/nope");

        let err = ingest("owner/repo/tree/nope", &IngestOptions::default(), &config, &janitor)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Clone(CloneErrorKind::UnknownRef));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn successful_remote_ingest_cleans_up() {
        let tmp = TempDir::new().unwrap();
        // "checkout" is the fifth argument: -C <dir> -c <setting> checkout
        let git = script(
            tmp.path(),
            r#"if [ "$5" = checkout ]; then
  printf 'remote readme' > "$2/README.md"
fi
exit 0"#,
        );
        let config = config_with_git(tmp.path(), git, 10);
        let janitor = Janitor::from_config(&config.temp);
        let dest = expected_destination(&config, "owner/repo");

        let ingestion = ingest("owner/repo", &IngestOptions::default(), &config, &janitor)
            .await
            .unwrap();
        assert!(ingestion.query.is_remote);
        assert!(ingestion.digest.summary.starts_with("Repository: owner/repo"));
        assert!(ingestion.digest.content.contains("FILE: README.md"));
        assert!(ingestion.digest.content.contains("remote readme"));
        assert_eq!(ingestion.stats.file_count, 1);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn cancelled_ingest_still_removes_checkout() {
        let tmp = TempDir::new().unwrap();
        let git = script(
            tmp.path(),
            r#"if [ "$5" = checkout ]; then
  i=0
  while [ $i -lt 500 ]; do
    printf 'line %s' $i > "$2/f$i.txt"
    i=$((i+1))
  done
  printf done > "$2/zz-done"
fi
exit 0"#,
        );
        let config = config_with_git(tmp.path(), git, 10);
        let janitor = Janitor::from_config(&config.temp);
        let dest = expected_destination(&config, "owner/repo");

        let task_config = config.clone();
        let task_janitor = janitor.clone();
        let handle = tokio::spawn(async move {
            ingest("owner/repo", &IngestOptions::default(), &task_config, &task_janitor).await
        });

        for _ in 0..500 {
            if dest.join("zz-done").exists() || handle.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.abort();
        let _ = handle.await;

        for _ in 0..500 {
            if !dest.exists() && janitor.active_entries().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!dest.exists());
        assert!(janitor.active_entries().is_empty());
    }

    #[tokio::test]
    async fn branch_override_changes_destination() {
        let tmp = TempDir::new().unwrap();
        let git = script(tmp.path(), "exit 0");
        let config = config_with_git(tmp.path(), git, 10);
        let janitor = Janitor::from_config(&config.temp);
        let options = IngestOptions {
            branch: Some("release".to_string()),
            ..IngestOptions::default()
        };

        let ingestion = ingest("owner/repo/tree/main", &options, &config, &janitor)
            .await
            .unwrap();
        assert_eq!(ingestion.query.branch.as_deref(), Some("release"));
        assert_ne!(
            ingestion.query.local_path,
            expected_destination(&config, "owner/repo/tree/main")
        );
    }

    #[tokio::test]
    async fn colliding_destination_is_not_deleted() {
        let tmp = TempDir::new().unwrap();
        let git = script(tmp.path(), "exit 0");
        let config = config_with_git(tmp.path(), git, 10);
        let janitor = Janitor::from_config(&config.temp);
        let dest = expected_destination(&config, "owner/repo");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("other.txt"), "in use").unwrap();

        let err = ingest("owner/repo", &IngestOptions::default(), &config, &janitor)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestinationExists);
        assert_eq!(fs::read_to_string(dest.join("other.txt")).unwrap(), "in use");
        assert!(janitor.active_entries().is_empty());
    }
}

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["-c", "user.name=Test", "-c", "user.email=test@example.com"])
        .args(args)
        .status()
        .unwrap();
    assert!(status.success(), "git {:?} failed", args);
}

#[tokio::test]
async fn shallow_fetch_from_local_remote() {
    if !git_available() {
        eprintln!("skipping: git not installed");
        return;
    }

    let tmp = TempDir::new().unwrap();
    let origin = tmp.path().join("origin");
    fs::create_dir_all(origin.join("docs")).unwrap();
    git(&origin, &["init", "--quiet"]);
    git(&origin, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    fs::write(origin.join("README.md"), "first").unwrap();
    fs::write(origin.join("docs").join("guide.md"), "guide").unwrap();
    git(&origin, &["add", "."]);
    git(&origin, &["commit", "--quiet", "-m", "first"]);
    fs::write(origin.join("README.md"), "second").unwrap();
    git(&origin, &["commit", "--quiet", "-am", "second"]);

    let dest = tmp.path().join("checkout");
    let request = CloneRequest {
        url: format!("file://{}", origin.display()),
        destination: dest.clone(),
        reference: GitRef::Branch("main".to_string()),
        subpath: None,
    };
    materialize(&request, Path::new("git"), Duration::from_secs(30))
        .await
        .unwrap();

    assert_eq!(fs::read_to_string(dest.join("README.md")).unwrap(), "second");
    let count = Command::new("git")
        .arg("-C")
        .arg(&dest)
        .args(["rev-list", "--count", "HEAD"])
        .output()
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&count.stdout).trim(), "1");

    let result = walk(&dest, &LimitsConfig::default(), &Default::default(), None).unwrap();
    let paths: Vec<&str> = result.included_files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(paths, vec!["README.md", "docs/guide.md"]);

    let missing = CloneRequest {
        destination: tmp.path().join("missing-ref"),
        reference: GitRef::Branch("does-not-exist".to_string()),
        ..request
    };
    let err = materialize(&missing, Path::new("git"), Duration::from_secs(30))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Clone(CloneErrorKind::UnknownRef));
    assert!(!missing.destination.exists());
}
