//! Code-path overlap detector (spec.md §4.5).
//!
//! A WU's `code_paths` are glob patterns (or bare prefixes) over the
//! repository tree. Two WUs overlap if any pattern from one can match a
//! path the other's pattern can also match. Exact detection (actually
//! enumerating the working tree and re-matching both patterns against it)
//! is the only sound approach for arbitrary glob pairs, so that's what
//! this module does rather than attempting pattern-vs-pattern algebra.

use std::collections::BTreeSet;
use std::path::Path;

use glob::Pattern;

/// One declared path entry, either an exact prefix (`src/api/`) or a glob
/// (`src/api/**/*.go`).
#[derive(Clone, Debug)]
struct Declared<'a> {
    raw: &'a str,
    pattern: Option<Pattern>,
}

impl<'a> Declared<'a> {
    fn new(raw: &'a str) -> Self {
        let pattern = if raw.contains(['*', '?', '[']) {
            Pattern::new(raw).ok()
        } else {
            None
        };
        Self { raw, pattern }
    }

    /// `true` if `path` is covered by this declaration: a glob match, or
    /// (for a plain prefix) `path` starts with `raw` component-wise.
    fn covers(&self, path: &str) -> bool {
        match &self.pattern {
            Some(p) => p.matches(path),
            None => {
                let prefix = self.raw.trim_end_matches('/');
                path == prefix || path.starts_with(&format!("{prefix}/"))
            }
        }
    }
}

/// Enumerate every path under `root` this declaration set could cover, by
/// walking the working tree and testing each file against every pattern.
/// Directories that don't exist yet (a WU may declare paths for code that
/// doesn't exist until it's written) contribute no candidate paths, which
/// is conservative: a not-yet-created file can't overlap anything either.
fn candidate_paths(root: &Path) -> Vec<String> {
    let mut out = Vec::new();
    walk(root, root, &mut out);
    out
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.components().any(|c| c.as_os_str() == ".git" || c.as_os_str() == ".lumenflow") {
            continue;
        }
        if path.is_dir() {
            walk(root, &path, out);
        } else if let Ok(rel) = path.strip_prefix(root) {
            if let Some(s) = rel.to_str() {
                out.push(s.replace('\\', "/"));
            }
        }
    }
}

/// Return the subset of `a`'s declared paths that overlap with `b`'s, by
/// testing both against every file currently in the working tree rooted
/// at `repo_root`.
///
/// A glob-vs-glob pair that matches no existing file is *not* reported as
/// overlapping: overlap is about actual contention over real files, not
/// pattern intersection in the abstract (spec.md §4.5: "two WUs overlap
/// if their declared code paths can touch the same file").
#[must_use]
pub fn overlapping_paths(repo_root: &Path, a: &[String], b: &[String]) -> Vec<String> {
    let files = candidate_paths(repo_root);
    let declared_a: Vec<Declared<'_>> = a.iter().map(|s| Declared::new(s)).collect();
    let declared_b: Vec<Declared<'_>> = b.iter().map(|s| Declared::new(s)).collect();

    let mut hit: BTreeSet<String> = BTreeSet::new();
    for file in &files {
        let a_hit = declared_a.iter().find(|d| d.covers(file));
        let b_hit = declared_b.iter().find(|d| d.covers(file));
        if let (Some(da), Some(_)) = (a_hit, b_hit) {
            hit.insert(da.raw.to_owned());
        }
    }

    // A path never observed in the working tree (new files a WU intends
    // to create) still overlaps if the two declarations are textually
    // identical or one is a literal prefix of the other — this is the one
    // case we can decide without the filesystem.
    for da in &declared_a {
        if da.pattern.is_none() {
            for db in &declared_b {
                if db.pattern.is_none() {
                    let pa = da.raw.trim_end_matches('/');
                    let pb = db.raw.trim_end_matches('/');
                    if pa == pb || pa.starts_with(&format!("{pb}/")) || pb.starts_with(&format!("{pa}/")) {
                        hit.insert(da.raw.to_owned());
                    }
                }
            }
        }
    }

    hit.into_iter().collect()
}

/// `true` if any path in `a` overlaps any path in `b`.
#[must_use]
pub fn overlaps(repo_root: &Path, a: &[String], b: &[String]) -> bool {
    !overlapping_paths(repo_root, a, b).is_empty()
}

/// `true` if `path` is covered by the single declaration `declared`
/// (a glob or a literal prefix), with no filesystem involved. Used by the
/// coverage-check validator pass, which matches declared `code_paths`
/// against an already-known set of changed files rather than a directory
/// walk.
#[must_use]
pub fn declared_matches(declared: &str, path: &str) -> bool {
    Declared::new(declared).covers(path)
}
