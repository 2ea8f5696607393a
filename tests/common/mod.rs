//! Shared fixture for the cross-module scenario tests: a throwaway bare
//! `origin.git` plus a working clone, wired up exactly the way the engine's
//! own micro-worktree transactor expects a caller's checkout to look.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use lumenflow::clock::FixedClock;
use lumenflow::config::{LayoutConfig, LumenConfig};
use lumenflow::model::types::{Lane, WuId, WuStatus, WuType};
use lumenflow::model::wu::{Tests, Wu};
use lumenflow::paths::Paths;
use lumenflow_git::GitRepo;
use tempfile::TempDir;

pub fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git").args(args).current_dir(dir).status().expect("spawn git");
    assert!(status.success(), "git {args:?} failed in {}", dir.display());
}

/// A self-contained repo: bare `origin.git` + a pushed working clone.
pub struct TestRepo {
    _root: TempDir,
    pub bare: PathBuf,
    pub work: PathBuf,
    pub paths: Paths,
    pub config: LumenConfig,
    pub clock: FixedClock,
}

impl TestRepo {
    #[must_use]
    pub fn new() -> Self {
        let root = TempDir::new().expect("tempdir");
        let bare = root.path().join("origin.git");
        fs::create_dir_all(&bare).expect("mkdir bare");
        git(&bare, &["init", "--bare", "-q"]);

        let work = root.path().join("work");
        fs::create_dir_all(&work).expect("mkdir work");
        git(&work, &["init", "-q", "-b", "main"]);
        git(&work, &["config", "user.email", "t@example.com"]);
        git(&work, &["config", "user.name", "t"]);
        git(&work, &["config", "commit.gpgsign", "false"]);
        fs::write(work.join("README.md"), "hello\n").expect("write readme");
        git(&work, &["add", "."]);
        git(&work, &["commit", "-q", "-m", "init"]);
        git(&work, &["remote", "add", "origin", bare.to_str().expect("utf8 path")]);
        git(&work, &["push", "-q", "-u", "origin", "main"]);

        let paths = Paths::new(work.clone(), LayoutConfig::default());
        Self {
            _root: root,
            bare,
            work,
            paths,
            config: LumenConfig::default(),
            clock: FixedClock(1_700_000_000),
        }
    }

    #[must_use]
    pub fn repo(&self) -> GitRepo {
        GitRepo::new(self.work.clone())
    }

    /// Write a `status=ready` WU spec and push it to `origin/main`, the way
    /// an operator committing a new backlog entry would.
    pub fn write_ready_wu(&self, n: u64, lane: &str, code_paths: &[&str]) -> WuId {
        let id = WuId::from_number(n).expect("valid wu number");
        let wu = Wu {
            id: id.clone(),
            title: format!("WU {n}"),
            lane: Lane::new(lane).expect("valid lane"),
            kind: WuType::Feature,
            status: WuStatus::Ready,
            code_paths: code_paths.iter().map(|s| (*s).to_owned()).collect(),
            acceptance: vec!["it works".to_owned()],
            description: None,
            tests: Some(Tests {
                manual: vec!["run it".to_owned()],
            }),
            claim: None,
            completion: None,
        };
        lumenflow::codec::write_wu(&self.paths.wu_path(&id), &wu).expect("write wu");
        git(&self.work, &["add", "."]);
        git(&self.work, &["commit", "-q", "-m", format!("add WU-{n}")]);
        git(&self.work, &["push", "-q", "origin", "main"]);
        id
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}
