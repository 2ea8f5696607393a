//! Memory layer: an append-only node/relationship store plus a pure
//! query surface the engine calls at lifecycle boundaries (spec.md §4.9).
//!
//! Relationships are stored out-of-line in their own log rather than as
//! owning links on nodes, since relationships can form cycles (`related`)
//! and a node must never own a back-reference (spec.md §9 design note
//! "Cyclic references"). `MemoryNode` is a struct tagged by `node_type`
//! rather than a loose map, continuing the "promote dynamic records to
//! tagged types" approach used for `Event` and `Wu`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::codec::{append_jsonl, read_all_jsonl};
use crate::error::LumenError;
use crate::event_log::EventLog;
use crate::model::event::Event;
use crate::model::types::{Lane, MemNodeId, WuId};
use crate::model::wu::Wu;
use crate::state_store::CheckpointInfo;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A memory node's category (spec.md §3 "Memory node").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemNodeType {
    /// A durable handoff point for an agent session.
    Session,
    /// Something learned while working, not anticipated by the WU spec.
    Discovery,
    /// A checkpoint, possibly linked to a WU (spec.md §4.9 `checkpoint`).
    Checkpoint,
    /// A free-form annotation.
    Note,
    /// An aggregate produced by [`MemoryStore::summarize`].
    Summary,
}

/// How long a node's relevance is expected to last.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Relevant only for the current agent invocation.
    Ephemeral,
    /// Relevant for the lifetime of one agent session.
    Session,
    /// Relevant for the lifetime of one WU.
    Wu,
    /// Relevant for the whole project; survives individual WUs.
    Project,
}

/// An append-only memory record (spec.md §3 "Memory node").
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryNode {
    /// Deterministic content-addressed id.
    pub id: MemNodeId,
    /// What kind of record this is.
    #[serde(rename = "type")]
    pub node_type: MemNodeType,
    /// How long this node is expected to stay relevant.
    pub lifecycle: Lifecycle,
    /// The node's free-text body.
    pub content: String,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// RFC 3339 timestamp of the most recent rewrite (soft-delete,
    /// summarization marker), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// The WU this node pertains to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wu_id: Option<WuId>,
    /// The agent session that created this node, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Free-form labels.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Open-ended annotations: soft-delete (`status=deleted`),
    /// summarization provenance (`summarized_into`, `source_ids`), and
    /// checkpoint sidecar fields (`progress`, `next_steps`, `trigger`,
    /// `git_diff_stat`). A `BTreeMap` keeps key order stable on rewrite.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl MemoryNode {
    fn is_deleted(&self) -> bool {
        self.metadata.get("status").is_some_and(|s| s == "deleted")
    }

    fn is_summarized(&self) -> bool {
        self.metadata.contains_key("summarized_into")
    }
}

/// A relationship between two memory nodes (spec.md §3 "Memory
/// relationship"). Stored in a sibling log, never as an owning link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRelationship {
    /// The source node.
    pub from_id: MemNodeId,
    /// The target node.
    pub to_id: MemNodeId,
    /// The relationship's kind.
    #[serde(rename = "type")]
    pub rel_type: RelationshipType,
    /// RFC 3339 timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Open-ended annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// The kind of a [`MemoryRelationship`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    /// `from_id` blocks `to_id`.
    Blocks,
    /// `from_id` is the parent of `to_id`.
    ParentChild,
    /// A generic, possibly cyclic, association.
    Related,
    /// `to_id` was discovered while working on `from_id` — the
    /// scope-creep forensics primitive.
    DiscoveredFrom,
}

/// The result of [`MemoryStore::load`].
#[derive(Clone, Debug, Default)]
pub struct MemoryIndex {
    /// Every live node, last-write-wins by id, in file order of first
    /// appearance.
    pub nodes: Vec<MemoryNode>,
    /// Lookup by id.
    pub by_id: HashMap<MemNodeId, MemoryNode>,
    /// Lookup by linked WU.
    pub by_wu: HashMap<WuId, Vec<MemNodeId>>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Filesystem-backed memory node/relationship store.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    log_path: PathBuf,
    relationships_path: PathBuf,
}

impl MemoryStore {
    /// Open (without reading) the memory log at `log_path` and its
    /// sibling relationship log at `relationships_path`.
    #[must_use]
    pub fn new(log_path: PathBuf, relationships_path: PathBuf) -> Self {
        Self {
            log_path,
            relationships_path,
        }
    }

    /// `create(node)`: validate nothing beyond what the type system
    /// already enforces, and append. `discovered_from`, when set, also
    /// appends a `discovered_from` relationship line pointing from the
    /// new node back to its origin.
    ///
    /// # Errors
    /// Returns [`LumenError::Io`] on any filesystem failure.
    pub fn create(&self, node: &MemoryNode, discovered_from: Option<&MemNodeId>) -> Result<(), LumenError> {
        append_jsonl(&self.log_path, node)?;
        if let Some(origin) = discovered_from {
            let rel = MemoryRelationship {
                from_id: origin.clone(),
                to_id: node.id.clone(),
                rel_type: RelationshipType::DiscoveredFrom,
                created_at: Some(node.created_at.clone()),
                metadata: BTreeMap::new(),
            };
            append_jsonl(&self.relationships_path, &rel)?;
        }
        Ok(())
    }

    /// `load({include_archived})`: replay, dedup by id (last-write-wins),
    /// filter soft-deleted nodes unless `include_archived`.
    ///
    /// # Errors
    /// Returns [`LumenError::Parse`]/[`LumenError::Io`] on a malformed or
    /// unreadable log.
    pub fn load(&self, include_archived: bool) -> Result<MemoryIndex, LumenError> {
        let raw: Vec<MemoryNode> = read_all_jsonl(&self.log_path)?;
        let mut by_id: HashMap<MemNodeId, MemoryNode> = HashMap::new();
        let mut order: Vec<MemNodeId> = Vec::new();
        for node in raw {
            if !by_id.contains_key(&node.id) {
                order.push(node.id.clone());
            }
            by_id.insert(node.id.clone(), node);
        }
        let mut nodes = Vec::new();
        let mut by_wu: HashMap<WuId, Vec<MemNodeId>> = HashMap::new();
        for id in order {
            let node = by_id.get(&id).expect("id was just inserted into by_id");
            if node.is_deleted() && !include_archived {
                continue;
            }
            if let Some(wu_id) = &node.wu_id {
                by_wu.entry(wu_id.clone()).or_default().push(id.clone());
            }
            nodes.push(node.clone());
        }
        if !include_archived {
            by_id.retain(|_, n| !n.is_deleted());
        }
        Ok(MemoryIndex { nodes, by_id, by_wu })
    }

    /// `delete({ids?, tag?, older_than?, dry_run?})`: soft-delete matched,
    /// not-already-deleted nodes. Matching is the union of `ids`/`tag`; if
    /// `older_than` is combined with `tag`, their intersection is used
    /// instead (spec.md §4.9). Implemented as an append of an updated
    /// copy of each matched node (last-write-wins on load), rather than
    /// an in-place file rewrite, to keep the log append-only (spec.md §3
    /// "Memory nodes are append-only").
    ///
    /// # Errors
    /// Returns [`LumenError::Io`]/[`LumenError::Parse`] from the
    /// underlying load/append.
    pub fn delete(&self, criteria: &DeleteCriteria, clock: &dyn Clock) -> Result<DeleteReport, LumenError> {
        let index = self.load(false)?;
        let mut matched = Vec::new();
        for node in &index.nodes {
            if node.is_deleted() {
                continue;
            }
            let id_match = criteria.ids.as_ref().is_some_and(|ids| ids.contains(&node.id));
            let tag_match = criteria
                .tag
                .as_ref()
                .is_some_and(|tag| node.tags.iter().any(|t| t == tag));
            let age_match = criteria
                .older_than
                .is_some_and(|cutoff| crate::clock::parse_rfc3339_secs(&node.created_at).is_some_and(|t| t < cutoff));

            let is_match = match (&criteria.tag, criteria.older_than) {
                (Some(_), Some(_)) => tag_match && age_match,
                _ => id_match || tag_match || age_match,
            };
            if is_match {
                matched.push(node.clone());
            }
        }

        if !criteria.dry_run {
            let now = clock.now_rfc3339();
            for node in &matched {
                let mut updated = node.clone();
                updated.metadata.insert("status".to_owned(), "deleted".to_owned());
                updated.updated_at = Some(now.clone());
                append_jsonl(&self.log_path, &updated)?;
            }
        }

        Ok(DeleteReport {
            matched_ids: matched.into_iter().map(|n| n.id).collect(),
            dry_run: criteria.dry_run,
        })
    }

    /// `checkpoint(note, {wu_id?, progress?, next_steps?, trigger?})`:
    /// create a `checkpoint` node (`lifecycle=session`) and, when
    /// `wu_id` is set, also append a `checkpoint` event to `event_log` so
    /// cross-agent readers see progress without reading the memory log.
    ///
    /// # Errors
    /// Returns [`LumenError::Io`] on any filesystem failure.
    pub fn checkpoint(
        &self,
        note: &str,
        opts: &CheckpointOptions,
        event_log: Option<&EventLog>,
        clock: &dyn Clock,
    ) -> Result<MemoryNode, LumenError> {
        let now = clock.now_rfc3339();
        let mut metadata = BTreeMap::new();
        if let Some(progress) = &opts.progress {
            metadata.insert("progress".to_owned(), progress.clone());
        }
        if let Some(next_steps) = &opts.next_steps {
            metadata.insert("next_steps".to_owned(), next_steps.clone());
        }
        if let Some(trigger) = &opts.trigger {
            metadata.insert("trigger".to_owned(), trigger.clone());
        }
        if let Some(stat) = &opts.git_diff_stat {
            metadata.insert("git_diff_stat".to_owned(), stat.clone());
        }
        let node = MemoryNode {
            id: MemNodeId::from_content(format!("{}{note}", now).as_bytes()),
            node_type: MemNodeType::Checkpoint,
            lifecycle: Lifecycle::Session,
            content: note.to_owned(),
            created_at: now.clone(),
            updated_at: None,
            wu_id: opts.wu_id.clone(),
            session_id: opts.session_id.clone(),
            tags: Vec::new(),
            metadata,
        };
        self.create(&node, None)?;
        if let (Some(wu_id), Some(log)) = (&opts.wu_id, event_log) {
            log.append(&Event::Checkpoint {
                wu_id: wu_id.clone(),
                note: Some(note.to_owned()),
                progress: opts.progress.clone(),
                next_steps: opts.next_steps.clone(),
                git_diff_stat: opts.git_diff_stat.clone(),
                ts: now,
            })?;
        }
        Ok(node)
    }

    /// `summarize(wu_id, {dry_run?})`: aggregate non-ephemeral,
    /// not-already-summarized nodes for `wu_id` into one `summary` node
    /// (`lifecycle=project`), recording provenance, and mark non-project
    /// sources `summarized_into=<id>` (project-lifecycle sources are
    /// protected and left untouched).
    ///
    /// # Errors
    /// Returns [`LumenError::Io`]/[`LumenError::Parse`] from the
    /// underlying load/append.
    pub fn summarize(&self, wu_id: &WuId, dry_run: bool, clock: &dyn Clock) -> Result<Option<MemoryNode>, LumenError> {
        let index = self.load(false)?;
        let sources: Vec<MemoryNode> = index
            .by_wu
            .get(wu_id)
            .into_iter()
            .flatten()
            .filter_map(|id| index.by_id.get(id))
            .filter(|n| n.lifecycle != Lifecycle::Ephemeral && !n.is_summarized() && n.node_type != MemNodeType::Summary)
            .cloned()
            .collect();
        if sources.is_empty() {
            return Ok(None);
        }

        let mut by_type: BTreeMap<&'static str, Vec<&str>> = BTreeMap::new();
        for source in &sources {
            by_type.entry(type_label(source.node_type)).or_default().push(&source.content);
        }
        let mut content = String::new();
        for (label, entries) in &by_type {
            content.push_str(&format!("## {label}\n"));
            for entry in entries {
                content.push_str(&format!("- {entry}\n"));
            }
        }

        let now = clock.now_rfc3339();
        let mut metadata = BTreeMap::new();
        let source_ids: Vec<String> = sources.iter().map(|s| s.id.as_str().to_owned()).collect();
        metadata.insert("source_ids".to_owned(), source_ids.join(","));

        let summary = MemoryNode {
            id: MemNodeId::from_content(format!("summary{wu_id}{now}").as_bytes()),
            node_type: MemNodeType::Summary,
            lifecycle: Lifecycle::Project,
            content,
            created_at: now.clone(),
            updated_at: None,
            wu_id: Some(wu_id.clone()),
            session_id: None,
            tags: Vec::new(),
            metadata,
        };

        if !dry_run {
            self.create(&summary, None)?;
            for source in &sources {
                if source.lifecycle == Lifecycle::Project {
                    continue;
                }
                let mut updated = source.clone();
                updated.metadata.insert("summarized_into".to_owned(), summary.id.as_str().to_owned());
                updated.updated_at = Some(now.clone());
                append_jsonl(&self.log_path, &updated)?;
            }
        }

        Ok(Some(summary))
    }

    /// `context(wu_id, {max_size, lane?, sort_by_decay?})`: a
    /// size-bounded markdown block, sections always in this order: WU
    /// Context, Summaries, Discoveries, Project Profile. WU-specific
    /// content is never truncated before project content (truncation
    /// proceeds from the end of the document backward).
    ///
    /// # Errors
    /// Returns [`LumenError::Io`]/[`LumenError::Parse`] from the
    /// underlying load.
    pub fn context(&self, wu: &Wu, opts: &ContextOptions) -> Result<ContextOutput, LumenError> {
        let index = self.load(false)?;
        let empty = Vec::new();
        let wu_nodes: &Vec<MemNodeId> = index.by_wu.get(&wu.id).unwrap_or(&empty);
        let mut linked: Vec<&MemoryNode> = wu_nodes.iter().filter_map(|id| index.by_id.get(id)).collect();
        sort_nodes(&mut linked, opts.sort_by_decay, opts.now_secs);

        let summaries: Vec<&MemoryNode> = linked.iter().filter(|n| n.node_type == MemNodeType::Summary).copied().collect();
        let discoveries: Vec<&MemoryNode> = linked.iter().filter(|n| n.node_type == MemNodeType::Discovery).copied().collect();
        let wu_specific: Vec<&MemoryNode> = linked
            .iter()
            .filter(|n| !matches!(n.node_type, MemNodeType::Summary | MemNodeType::Discovery))
            .copied()
            .collect();

        let mut project_nodes: Vec<&MemoryNode> = index
            .nodes
            .iter()
            .filter(|n| n.lifecycle == Lifecycle::Project && n.wu_id.is_none())
            .collect();
        if let Some(lane) = &opts.lane {
            project_nodes.retain(|n| n.tags.iter().any(|t| t == lane.as_str()));
        }
        sort_nodes(&mut project_nodes, opts.sort_by_decay, opts.now_secs);

        let mut sections = Vec::new();
        sections.push(("WU Context".to_owned(), render_nodes(&wu_specific)));
        sections.push(("Summaries".to_owned(), render_nodes(&summaries)));
        sections.push(("Discoveries".to_owned(), render_nodes(&discoveries)));
        sections.push(("Project Profile".to_owned(), render_nodes(&project_nodes)));

        let (markdown, truncated) = render_sections(&sections, opts.max_size);
        Ok(ContextOutput {
            markdown,
            truncated,
        })
    }

    /// `recover(wu_id, {max_size})`: a compact post-compaction recovery
    /// block: header, last checkpoint, WU metadata (acceptance +
    /// code_paths, each capped), last git diff stat, compact constraints,
    /// essential CLI reference.
    ///
    /// # Errors
    /// Returns [`LumenError::Io`]/[`LumenError::Parse`] from the
    /// underlying load.
    pub fn recover(&self, wu: &Wu, last_checkpoint: Option<&CheckpointInfo>, max_size: usize) -> Result<ContextOutput, LumenError> {
        const MAX_LISTED: usize = 8;

        let mut block = String::new();
        block.push_str(&format!("# Recovery context for {}\n\n", wu.id));

        block.push_str("## Last checkpoint\n");
        if let Some(cp) = last_checkpoint {
            if let Some(content) = &cp.content {
                block.push_str(&format!("- note: {content}\n"));
            }
            if let Some(progress) = &cp.progress {
                block.push_str(&format!("- progress: {progress}\n"));
            }
            if let Some(next_steps) = &cp.next_steps {
                block.push_str(&format!("- next_steps: {next_steps}\n"));
            }
            block.push_str(&format!("- ts: {}\n", cp.ts));
        } else {
            block.push_str("- (none recorded)\n");
        }
        block.push('\n');

        block.push_str("## WU metadata\n");
        block.push_str(&format!("- title: {}\n- lane: {}\n- status: {}\n", wu.title, wu.lane, wu.status));
        block.push_str("- acceptance:\n");
        for item in wu.acceptance.iter().take(MAX_LISTED) {
            block.push_str(&format!("  - {item}\n"));
        }
        block.push_str("- code_paths:\n");
        for item in wu.code_paths.iter().take(MAX_LISTED) {
            block.push_str(&format!("  - {item}\n"));
        }
        block.push('\n');

        if let Some(claim) = &wu.claim {
            block.push_str(&format!("## Baseline\n- baseline_main_sha: {}\n\n", claim.baseline_main_sha));
        }

        if let Some(stat) = last_checkpoint.and_then(|cp| cp.git_diff_stat.as_deref()) {
            block.push_str(&format!("## Diff stat\n{stat}\n\n"));
        }

        block.push_str("## Compact constraints\n- stay within declared code_paths\n- do not modify status fields directly; use the lifecycle commands\n\n");
        block.push_str("## CLI reference\n- `lumen status <id>`\n- `lumen checkpoint <id> <note>`\n- `lumen done <id>`\n- `lumen block <id> <reason>`\n");

        let truncated = block.len() > max_size;
        if truncated {
            block.truncate(max_size.saturating_sub(20));
            block.push_str("\n<!-- truncated -->");
        }
        Ok(ContextOutput {
            markdown: block,
            truncated,
        })
    }
}

fn type_label(t: MemNodeType) -> &'static str {
    match t {
        MemNodeType::Session => "Session",
        MemNodeType::Discovery => "Discovery",
        MemNodeType::Checkpoint => "Checkpoint",
        MemNodeType::Note => "Note",
        MemNodeType::Summary => "Summary",
    }
}

fn sort_nodes(nodes: &mut [&MemoryNode], sort_by_decay: bool, now_secs: u64) {
    if sort_by_decay {
        const HALF_LIFE_SECS: f64 = 7.0 * 86400.0;
        nodes.sort_by(|a, b| {
            let score_a = decay_score(a, now_secs, HALF_LIFE_SECS);
            let score_b = decay_score(b, now_secs, HALF_LIFE_SECS);
            score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal)
        });
    } else {
        nodes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }
}

fn decay_score(node: &MemoryNode, now_secs: u64, half_life_secs: f64) -> f64 {
    let created = crate::clock::parse_rfc3339_secs(&node.created_at).unwrap_or(now_secs);
    let age = now_secs.saturating_sub(created) as f64;
    0.5f64.powf(age / half_life_secs)
}

fn render_nodes(nodes: &[&MemoryNode]) -> String {
    let mut out = String::new();
    for node in nodes {
        out.push_str(&format!("- {}\n", node.content));
    }
    out
}

fn render_sections(sections: &[(String, String)], max_size: usize) -> (String, bool) {
    let mut full = String::new();
    for (title, body) in sections {
        full.push_str(&format!("## {title}\n{body}\n"));
    }
    if full.len() <= max_size {
        (full, false)
    } else {
        let cut = max_size.saturating_sub(20);
        let mut truncated: String = full.chars().take(cut).collect();
        truncated.push_str("\n<!-- truncated -->");
        (truncated, true)
    }
}

// ---------------------------------------------------------------------------
// Operation parameter/result types
// ---------------------------------------------------------------------------

/// Criteria for [`MemoryStore::delete`].
#[derive(Clone, Debug, Default)]
pub struct DeleteCriteria {
    /// Delete nodes with one of these ids.
    pub ids: Option<HashSet<MemNodeId>>,
    /// Delete nodes carrying this tag.
    pub tag: Option<String>,
    /// Delete nodes created before this Unix timestamp.
    pub older_than: Option<u64>,
    /// Compute the match set without writing anything.
    pub dry_run: bool,
}

/// Outcome of [`MemoryStore::delete`].
#[derive(Clone, Debug)]
pub struct DeleteReport {
    /// Ids that matched the criteria.
    pub matched_ids: Vec<MemNodeId>,
    /// `true` if nothing was actually written.
    pub dry_run: bool,
}

/// Parameters for [`MemoryStore::checkpoint`].
#[derive(Clone, Debug, Default)]
pub struct CheckpointOptions {
    /// The WU this checkpoint is linked to, if any.
    pub wu_id: Option<WuId>,
    /// The agent session recording this checkpoint.
    pub session_id: Option<String>,
    /// What's been done so far.
    pub progress: Option<String>,
    /// What to do next.
    pub next_steps: Option<String>,
    /// What triggered this checkpoint (e.g. `"pre-compaction"`).
    pub trigger: Option<String>,
    /// A `git diff --stat`-style summary, for [`MemoryStore::recover`].
    pub git_diff_stat: Option<String>,
}

/// Parameters for [`MemoryStore::context`].
#[derive(Clone, Debug)]
pub struct ContextOptions {
    /// Hard size cap, in bytes, on the rendered markdown.
    pub max_size: usize,
    /// Restrict the Project Profile section to nodes tagged with this
    /// lane.
    pub lane: Option<Lane>,
    /// Sort by half-life-weighted recency instead of plain recency.
    pub sort_by_decay: bool,
    /// The current time, for decay scoring.
    pub now_secs: u64,
}

/// Output of [`MemoryStore::context`] and [`MemoryStore::recover`].
#[derive(Clone, Debug)]
pub struct ContextOutput {
    /// The rendered markdown block.
    pub markdown: String,
    /// `true` if the block was cut short of its full content.
    pub truncated: bool,
}
