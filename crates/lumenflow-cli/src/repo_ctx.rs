//! Repo-rooted context shared by every subcommand: locate the repository
//! root, load config, and build an [`Engine`] over it.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{bail, Context as _, Result};
use lumenflow::clock::SystemClock;
use lumenflow::config::LumenConfig;
use lumenflow::paths::Paths;
use lumenflow_git::GitRepo;

/// Resolve the enclosing git repository's root, the same way the engine's
/// teacher-derived tooling discovers its working directory.
pub fn repo_root() -> Result<PathBuf> {
    let output = Command::new("git")
        .args(["rev-parse", "--path-format=absolute", "--show-toplevel"])
        .output()
        .context("failed to run git rev-parse --show-toplevel")?;
    if !output.status.success() {
        bail!("not in a git repository: {}", String::from_utf8_lossy(&output.stderr).trim());
    }
    Ok(PathBuf::from(String::from_utf8_lossy(&output.stdout).trim()))
}

/// Everything a subcommand needs to build an [`lumenflow::engine::Engine`]:
/// the path resolver, config, and a git handle, all owned so the caller can
/// borrow an `Engine` from them for the duration of one invocation.
pub struct Context {
    pub paths: Paths,
    pub config: LumenConfig,
    pub clock: SystemClock,
    pub repo: GitRepo,
}

impl Context {
    /// Discover the repo root, load `.lumenflow/config.toml`, and build a
    /// ready-to-use context.
    pub fn discover() -> Result<Self> {
        let root = repo_root()?;
        let config = LumenConfig::load(&root.join(".lumenflow/config.toml"))
            .with_context(|| format!("loading config under {}", root.display()))?;
        let paths = Paths::new(root.clone(), config.layout.clone());
        let repo = GitRepo::new(root);
        Ok(Self {
            paths,
            config,
            clock: SystemClock,
            repo,
        })
    }

    #[must_use]
    pub fn engine(&self) -> lumenflow::engine::Engine<'_> {
        lumenflow::engine::Engine::new(&self.paths, &self.config, &self.clock, &self.repo)
    }
}
