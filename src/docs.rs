//! Status & backlog dashboard rendering (spec.md §4.8 step 6, §8 property 8).
//!
//! Both docs are fully regenerated from the current WU set rather than
//! patched in place. A patched update has to parse its own prior output
//! to stay idempotent and duplicate-free (spec.md §8 property 8: "no WU
//! id appears in both done and another section"); regenerating from
//! scratch gets both properties for free, since the same input always
//! produces the same bytes.

use crate::model::types::{Lane, WuId, WuStatus};

/// One row of the rendered dashboards.
#[derive(Clone, Debug)]
pub struct WuSummary {
    /// The WU's id.
    pub id: WuId,
    /// Its title.
    pub title: String,
    /// Its lane.
    pub lane: Lane,
    /// Its current status.
    pub status: WuStatus,
}

/// Render the status dashboard: an in-progress list and a completed
/// list, each sorted by id for deterministic output.
#[must_use]
pub fn render_status_doc(wus: &[WuSummary]) -> String {
    let mut in_progress: Vec<&WuSummary> = wus.iter().filter(|w| matches!(w.status, WuStatus::InProgress | WuStatus::Blocked)).collect();
    let mut done: Vec<&WuSummary> = wus.iter().filter(|w| w.status == WuStatus::Done).collect();
    in_progress.sort_by(|a, b| a.id.cmp(&b.id));
    done.sort_by(|a, b| a.id.cmp(&b.id));

    let mut out = String::new();
    out.push_str("# Status\n\n");
    out.push_str("## In Progress\n\n");
    if in_progress.is_empty() {
        out.push_str("_none_\n");
    } else {
        for w in &in_progress {
            out.push_str(&format!("- {} — {} ({}, {})\n", w.id, w.title, w.lane, w.status));
        }
    }
    out.push_str("\n## Completed\n\n");
    if done.is_empty() {
        out.push_str("_none_\n");
    } else {
        for w in &done {
            out.push_str(&format!("- {} — {}\n", w.id, w.title));
        }
    }
    out
}

/// Render the backlog dashboard: ready, in_progress, and done sections,
/// each a bulleted list of exactly one entry per WU, sorted by id.
#[must_use]
pub fn render_backlog_doc(wus: &[WuSummary]) -> String {
    let mut ready: Vec<&WuSummary> = wus.iter().filter(|w| w.status == WuStatus::Ready).collect();
    let mut in_progress: Vec<&WuSummary> = wus.iter().filter(|w| matches!(w.status, WuStatus::InProgress | WuStatus::Blocked)).collect();
    let mut done: Vec<&WuSummary> = wus.iter().filter(|w| w.status == WuStatus::Done).collect();
    ready.sort_by(|a, b| a.id.cmp(&b.id));
    in_progress.sort_by(|a, b| a.id.cmp(&b.id));
    done.sort_by(|a, b| a.id.cmp(&b.id));

    let mut out = String::new();
    out.push_str("# Backlog\n\n");
    for (title, section) in [("Ready", &ready), ("In Progress", &in_progress), ("Done", &done)] {
        out.push_str(&format!("## {title}\n\n"));
        if section.is_empty() {
            out.push_str("_none_\n\n");
            continue;
        }
        for w in section.iter() {
            out.push_str(&format!("- {} — {} ({})\n", w.id, w.title, w.lane));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(n: u64, status: WuStatus) -> WuSummary {
        WuSummary {
            id: WuId::from_number(n).unwrap(),
            title: format!("Title {n}"),
            lane: Lane::new("Core").unwrap(),
            status,
        }
    }

    #[test]
    fn status_doc_separates_in_progress_and_done() {
        let wus = vec![summary(1, WuStatus::InProgress), summary(2, WuStatus::Done)];
        let doc = render_status_doc(&wus);
        let in_progress_idx = doc.find("## In Progress").unwrap();
        let completed_idx = doc.find("## Completed").unwrap();
        let wu1_idx = doc.find("WU-1").unwrap();
        let wu2_idx = doc.find("WU-2").unwrap();
        assert!(in_progress_idx < wu1_idx && wu1_idx < completed_idx);
        assert!(completed_idx < wu2_idx);
    }

    #[test]
    fn done_wu_never_appears_in_in_progress_section() {
        let wus = vec![summary(1, WuStatus::Done)];
        let doc = render_status_doc(&wus);
        let in_progress_section = &doc[..doc.find("## Completed").unwrap()];
        assert!(!in_progress_section.contains("WU-1"));
    }

    #[test]
    fn backlog_lists_each_wu_in_exactly_one_section() {
        let wus = vec![summary(1, WuStatus::Ready), summary(2, WuStatus::InProgress), summary(3, WuStatus::Done)];
        let doc = render_backlog_doc(&wus);
        assert_eq!(doc.matches("WU-1").count(), 1);
        assert_eq!(doc.matches("WU-2").count(), 1);
        assert_eq!(doc.matches("WU-3").count(), 1);
    }

    #[test]
    fn rendering_twice_from_the_same_input_is_identical() {
        let wus = vec![summary(1, WuStatus::Ready)];
        assert_eq!(render_backlog_doc(&wus), render_backlog_doc(&wus));
        assert_eq!(render_status_doc(&wus), render_status_doc(&wus));
    }
}
