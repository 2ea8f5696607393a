//! One function per caller-visible operation (spec.md §6), each parsing
//! its `clap` arguments, calling the engine, and rendering a result or an
//! agent-friendly error. Every function returns the process exit code.

use anyhow::Result;
use clap::{Args, Subcommand, ValueEnum};
use lumenflow::engine::{ClaimOptions, DoneOptions, Engine, NoGates};
use lumenflow::memory::{CheckpointOptions, ContextOptions};
use lumenflow::model::types::{ClaimMode, Lane, WuId};
use lumenflow::recovery::{RecoverOptions, RecoveryAction};

use crate::exit::code_for;
use crate::repo_ctx::Context;

/// Subcommands mirroring spec.md §6's caller-visible operation table, plus
/// the `scan`/`repair-duplicate-ids` recovery extras and the read-only
/// `backlog`/`doctor` diagnostics.
#[derive(Subcommand)]
pub enum Commands {
    /// Claim a WU into a lane.
    Claim(ClaimArgs),
    /// Mark a WU done: runs gates, checks code-path coverage, locks it.
    Done(DoneArgs),
    /// Block a WU on something external.
    Block(BlockArgs),
    /// Unblock a previously-blocked WU back to in_progress.
    Unblock(WuIdArgs),
    /// Show a WU's current spec + effective status + last checkpoint.
    Status(WuIdArgs),
    /// Record a durable handoff point.
    Checkpoint(CheckpointArgs),
    /// Render a size-bounded markdown context block for a WU.
    Context(ContextArgs),
    /// Render a compact post-compaction recovery block for a WU.
    RecoverContext(RecoverContextArgs),
    /// Scan every WU for zombie/duplicate-id anomalies without repairing.
    Scan,
    /// Apply a manual recovery action to a WU.
    Recover(RecoverArgs),
    /// Reassign ids for WUs whose spec files declare a colliding id.
    RepairDuplicateIds,
    /// Regenerate and print the backlog dashboard (read-only).
    Backlog,
    /// Check that the coordinator's on-disk state looks sane (read-only).
    Doctor,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ClaimModeArg {
    Worktree,
    BranchOnly,
    BranchPr,
}

impl From<ClaimModeArg> for ClaimMode {
    fn from(m: ClaimModeArg) -> Self {
        match m {
            ClaimModeArg::Worktree => Self::Worktree,
            ClaimModeArg::BranchOnly => Self::BranchOnly,
            ClaimModeArg::BranchPr => Self::BranchPr,
        }
    }
}

#[derive(Args)]
pub struct WuIdArgs {
    /// The WU id, e.g. `WU-42`.
    id: WuId,
}

#[derive(Args)]
pub struct ClaimArgs {
    /// The WU id, e.g. `WU-42`.
    id: WuId,
    /// The lane to claim into, e.g. `Core` or `"Backend: Auth"`.
    lane: Lane,
    /// Bypass a lane-busy refusal.
    #[arg(long)]
    force: bool,
    /// Bypass a code-path overlap refusal. Requires `--reason`.
    #[arg(long)]
    force_overlap: bool,
    /// Justification for `--force`/`--force-overlap`/`--wip-justification`.
    #[arg(long)]
    reason: Option<String>,
    /// Auto-apply fixable schema issues instead of failing on them.
    #[arg(long)]
    fix: bool,
    /// Bypass the spec-completeness check.
    #[arg(long)]
    allow_incomplete: bool,
    /// How the claim is materialized on disk.
    #[arg(long, value_enum, default_value = "worktree")]
    mode: ClaimModeArg,
    /// The claiming agent session, e.g. a terminal multiplexer pane id.
    #[arg(long, env = "LUMEN_SESSION_ID", default_value = "unknown")]
    session_id: String,
    /// Justification note for claiming into a lane already at WIP > 1.
    #[arg(long)]
    wip_justification: Option<String>,
}

#[derive(Args)]
pub struct DoneArgs {
    /// The WU id, e.g. `WU-42`.
    id: WuId,
    /// Skip gate execution. Requires `--reason`.
    #[arg(long)]
    skip_gates: bool,
    /// Justification for `--skip-gates`.
    #[arg(long)]
    reason: Option<String>,
}

#[derive(Args)]
pub struct BlockArgs {
    /// The WU id, e.g. `WU-42`.
    id: WuId,
    /// Why the WU is blocked.
    #[arg(long)]
    reason: Option<String>,
}

#[derive(Args)]
pub struct CheckpointArgs {
    /// Free-text note.
    note: String,
    /// The WU this checkpoint is linked to, if any.
    #[arg(long)]
    wu_id: Option<WuId>,
    /// The recording agent session.
    #[arg(long, env = "LUMEN_SESSION_ID")]
    session_id: Option<String>,
    /// What's been done so far.
    #[arg(long)]
    progress: Option<String>,
    /// What to do next.
    #[arg(long)]
    next_steps: Option<String>,
    /// What triggered this checkpoint, e.g. `pre-compaction`.
    #[arg(long)]
    trigger: Option<String>,
    /// A `git diff --stat`-style summary.
    #[arg(long)]
    git_diff_stat: Option<String>,
}

#[derive(Args)]
pub struct ContextArgs {
    /// The WU id, e.g. `WU-42`.
    id: WuId,
    /// Hard size cap, in bytes, on the rendered markdown.
    #[arg(long, default_value_t = 8192)]
    max_size: usize,
    /// Restrict the Project Profile section to this lane.
    #[arg(long)]
    lane: Option<Lane>,
    /// Sort by half-life-weighted recency instead of plain recency.
    #[arg(long)]
    sort_by_decay: bool,
}

#[derive(Args)]
pub struct RecoverContextArgs {
    /// The WU id, e.g. `WU-42`.
    id: WuId,
    /// Hard size cap, in bytes, on the rendered markdown.
    #[arg(long, default_value_t = 4096)]
    max_size: usize,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RecoveryActionArg {
    Resume,
    Reset,
    Nuke,
    Cleanup,
}

impl From<RecoveryActionArg> for RecoveryAction {
    fn from(a: RecoveryActionArg) -> Self {
        match a {
            RecoveryActionArg::Resume => Self::Resume,
            RecoveryActionArg::Reset => Self::Reset,
            RecoveryActionArg::Nuke => Self::Nuke,
            RecoveryActionArg::Cleanup => Self::Cleanup,
        }
    }
}

#[derive(Args)]
pub struct RecoverArgs {
    /// The WU id, e.g. `WU-42`.
    id: WuId,
    /// Which recovery action to apply.
    #[arg(value_enum)]
    action: RecoveryActionArg,
    /// Required for `reset`/`nuke`.
    #[arg(long)]
    force: bool,
    /// Allows `reset`/`nuke` to proceed over an unclean worktree.
    #[arg(long)]
    discard_changes: bool,
}

fn run_engine_op(f: impl FnOnce(&Engine<'_>) -> Result<(), lumenflow::error::LumenError>) -> i32 {
    let ctx = match Context::discover() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e:#}");
            return 1;
        }
    };
    match f(&ctx.engine()) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            code_for(&e)
        }
    }
}

pub fn claim(args: ClaimArgs) -> i32 {
    run_engine_op(|engine| {
        let opts = ClaimOptions {
            force: args.force,
            force_overlap: args.force_overlap,
            reason: args.reason,
            fix: args.fix,
            allow_incomplete: args.allow_incomplete,
            mode: args.mode.into(),
            session_id: args.session_id,
            wip_justification: args.wip_justification,
        };
        engine.claim(&args.id, &args.lane, &opts)?;
        println!("{}: claimed into {}", args.id, args.lane);
        Ok(())
    })
}

pub fn done(args: DoneArgs) -> i32 {
    run_engine_op(|engine| {
        let opts = DoneOptions {
            skip_gates: args.skip_gates,
            reason: args.reason,
        };
        engine.done(&args.id, &opts, &NoGates)?;
        println!("{}: done", args.id);
        Ok(())
    })
}

pub fn block(args: BlockArgs) -> i32 {
    run_engine_op(|engine| {
        engine.block(&args.id, args.reason)?;
        println!("{}: blocked", args.id);
        Ok(())
    })
}

pub fn unblock(args: WuIdArgs) -> i32 {
    run_engine_op(|engine| {
        engine.unblock(&args.id)?;
        println!("{}: unblocked", args.id);
        Ok(())
    })
}

pub fn status(args: WuIdArgs) -> i32 {
    let ctx = match Context::discover() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e:#}");
            return 1;
        }
    };
    match ctx.engine().status(&args.id) {
        Ok(projection) => {
            let status = projection.effective_status.map_or_else(|| "unknown".to_owned(), |s| s.to_string());
            println!("{}: {} ({})", projection.wu.id, projection.wu.title, status);
            println!("  lane: {}", projection.wu.lane);
            println!("  type: {}", projection.wu.kind);
            if let Some(cp) = projection.last_checkpoint {
                println!("  last checkpoint ({}): {}", cp.ts, cp.content.as_deref().unwrap_or(""));
            }
            0
        }
        Err(e) => {
            eprintln!("error: {e}");
            code_for(&e)
        }
    }
}

pub fn checkpoint(args: CheckpointArgs) -> i32 {
    let ctx = match Context::discover() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e:#}");
            return 1;
        }
    };
    let opts = CheckpointOptions {
        wu_id: args.wu_id,
        session_id: args.session_id,
        progress: args.progress,
        next_steps: args.next_steps,
        trigger: args.trigger,
        git_diff_stat: args.git_diff_stat,
    };
    match ctx.engine().checkpoint(&args.note, &opts) {
        Ok(node) => {
            println!("{}", node.id);
            0
        }
        Err(e) => {
            eprintln!("error: {e}");
            code_for(&e)
        }
    }
}

pub fn context(args: ContextArgs) -> i32 {
    let ctx = match Context::discover() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e:#}");
            return 1;
        }
    };
    let opts = ContextOptions {
        max_size: args.max_size,
        lane: args.lane,
        sort_by_decay: args.sort_by_decay,
        now_secs: lumenflow::clock::parse_rfc3339_secs(&ctx.clock.now_rfc3339()).unwrap_or(0),
    };
    match ctx.engine().context(&args.id, &opts) {
        Ok(out) => {
            print!("{}", out.markdown);
            0
        }
        Err(e) => {
            eprintln!("error: {e}");
            code_for(&e)
        }
    }
}

pub fn recover_context(args: RecoverContextArgs) -> i32 {
    let ctx = match Context::discover() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e:#}");
            return 1;
        }
    };
    match ctx.engine().recover_context(&args.id, args.max_size) {
        Ok(out) => {
            print!("{}", out.markdown);
            0
        }
        Err(e) => {
            eprintln!("error: {e}");
            code_for(&e)
        }
    }
}

pub fn scan() -> i32 {
    let ctx = match Context::discover() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e:#}");
            return 1;
        }
    };
    match ctx.engine().scan() {
        Ok(anomalies) => {
            if anomalies.zombies.is_empty() && anomalies.duplicates.is_empty() {
                println!("no anomalies found");
                return 0;
            }
            for z in &anomalies.zombies {
                println!("zombie: {} ({:?})", z.wu_id, z.kind);
            }
            for d in &anomalies.duplicates {
                println!("duplicate id: {} in {} file(s)", d.wu_id, d.paths.len());
            }
            0
        }
        Err(e) => {
            eprintln!("error: {e}");
            code_for(&e)
        }
    }
}

pub fn recover(args: RecoverArgs) -> i32 {
    run_engine_op(|engine| {
        let opts = RecoverOptions {
            force: args.force,
            discard_changes: args.discard_changes,
        };
        engine.recover(&args.id, args.action.into(), &opts)?;
        println!("{}: recovery action applied", args.id);
        Ok(())
    })
}

pub fn repair_duplicate_ids() -> i32 {
    let ctx = match Context::discover() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e:#}");
            return 1;
        }
    };
    match ctx.engine().repair_duplicate_ids() {
        Ok(reassigned) => {
            if reassigned.is_empty() {
                println!("no duplicate ids found");
            } else {
                for id in reassigned {
                    println!("reassigned: {id}");
                }
            }
            0
        }
        Err(e) => {
            eprintln!("error: {e}");
            code_for(&e)
        }
    }
}

/// `lumen backlog` (SUPPLEMENT) — print the backlog dashboard without
/// pushing anything; a read-only render of the same content `done`/`claim`
/// write through the micro-worktree transactor.
pub fn backlog() -> i32 {
    let ctx = match Context::discover() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e:#}");
            return 1;
        }
    };
    let entries = match ctx.engine().list_wu_entries() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("error: {e}");
            return code_for(&e);
        }
    };
    let mut wus = Vec::with_capacity(entries.len());
    for (id, path) in entries {
        match lumenflow::codec::read_wu(&path, &id) {
            Ok(wu) => wus.push(wu),
            Err(e) => {
                eprintln!("error: {e}");
                return code_for(&e);
            }
        }
    }
    let summaries: Vec<_> = wus
        .iter()
        .map(|w| lumenflow::docs::WuSummary {
            id: w.id.clone(),
            title: w.title.clone(),
            lane: w.lane.clone(),
            status: w.status,
        })
        .collect();
    print!("{}", lumenflow::docs::render_backlog_doc(&summaries));
    0
}

/// `lumen doctor` (SUPPLEMENT) — sanity-check the coordinator's on-disk
/// state without mutating it: config parses, WU dir is readable, and
/// `scan` reports no anomalies.
#[allow(clippy::unnecessary_wraps)]
pub fn doctor() -> i32 {
    println!("lumen doctor");
    println!("============");
    println!();

    let mut all_ok = true;

    let ctx = match Context::discover() {
        Ok(c) => {
            println!("[ok] repository root: {}", c.paths.root().display());
            c
        }
        Err(e) => {
            println!("[fail] not in a git repository: {e:#}");
            println!();
            println!("Some checks failed. See above for details.");
            return 1;
        }
    };

    match ctx.engine().list_wu_entries() {
        Ok(entries) => println!("[ok] WU directory readable: {} WU(s)", entries.len()),
        Err(e) => {
            println!("[fail] WU directory unreadable: {e}");
            all_ok = false;
        }
    }

    match ctx.engine().scan() {
        Ok(anomalies) if anomalies.zombies.is_empty() && anomalies.duplicates.is_empty() => {
            println!("[ok] no zombie/duplicate-id anomalies");
        }
        Ok(anomalies) => {
            println!(
                "[warn] {} zombie(s), {} duplicate id(s) — run `lumen scan` for detail",
                anomalies.zombies.len(),
                anomalies.duplicates.len()
            );
        }
        Err(e) => {
            println!("[fail] scan failed: {e}");
            all_ok = false;
        }
    }

    println!();
    if all_ok {
        println!("All required checks passed!");
        0
    } else {
        println!("Some required checks failed. See above for details.");
        1
    }
}
