//! Table of file layers and their renderers.
//!
//! Text renderings use `Label: value` lines so the source analyzer can read
//! them back with the extraction patterns in [`crate::evidence`].

use std::fmt::Write as _;

use super::{LayerError, LayerTier, WriteDiscipline};
use crate::evidence::SourceKind;
use crate::snapshot::{StateSnapshot, TaskStatus};

/// Renders one snapshot into the content of one layer.
pub type RenderFn = fn(&StateSnapshot) -> Result<String, LayerError>;

#[derive(Debug, Clone, Copy)]
pub struct LayerTemplate {
    pub id: &'static str,
    pub file_name: &'static str,
    pub tier: LayerTier,
    pub discipline: WriteDiscipline,
    pub kind: SourceKind,
    pub render: RenderFn,
}

pub const LAYER_TEMPLATES: &[LayerTemplate] = &[
    LayerTemplate {
        id: "current_status",
        file_name: "current-status.json",
        tier: LayerTier::Primary,
        discipline: WriteDiscipline::Overwrite,
        kind: SourceKind::PrimaryStatus,
        render: render_status_json,
    },
    LayerTemplate {
        id: "session_brief",
        file_name: "SESSION_BRIEF.md",
        tier: LayerTier::Secondary,
        discipline: WriteDiscipline::Overwrite,
        kind: SourceKind::SessionBrief,
        render: render_brief,
    },
    LayerTemplate {
        id: "scratch_pad",
        file_name: ".scratch.md",
        tier: LayerTier::Secondary,
        discipline: WriteDiscipline::Overwrite,
        kind: SourceKind::ScratchPad,
        render: render_scratch,
    },
    LayerTemplate {
        id: "conversation_log",
        file_name: "CONVERSATION_LOG.md",
        tier: LayerTier::Tertiary,
        discipline: WriteDiscipline::Append,
        kind: SourceKind::ConversationLog,
        render: render_log_entry,
    },
    LayerTemplate {
        id: "project_history",
        file_name: "PROJECT_HISTORY.md",
        tier: LayerTier::Quaternary,
        discipline: WriteDiscipline::Append,
        kind: SourceKind::ArchivalDoc,
        render: render_history_entry,
    },
];

/// Separator written after each appended entry.
pub const ENTRY_SEPARATOR: &str = "\n---\n\n";

fn timestamp(snapshot: &StateSnapshot) -> String {
    snapshot.captured_at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn render_status_json(snapshot: &StateSnapshot) -> Result<String, LayerError> {
    Ok(serde_json::to_string_pretty(snapshot)?)
}

/// Free text on a single line, so it can never start a labelled line.
fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn render_brief(snapshot: &StateSnapshot) -> Result<String, LayerError> {
    let mut out = String::from("# Session Continuity Brief\n\n");
    writeln!(out, "- **Session**: {}", snapshot.id())?;
    writeln!(out, "- **Phase**: {}", one_line(&snapshot.phase))?;
    writeln!(out, "- **Progress**: {}%", snapshot.progress)?;
    writeln!(out, "- **Build**: {}", snapshot.environment.build.label())?;
    writeln!(out, "- **Updated**: {}", timestamp(snapshot))?;
    if let Some(action) = snapshot.top_next_action() {
        writeln!(out, "- **Next**: {}", one_line(&action.description))?;
    }

    if !snapshot.next_actions.is_empty() {
        out.push_str("\n## Next Actions\n\n");
        for action in &snapshot.next_actions {
            writeln!(out, "- [{:?}] {}", action.priority, one_line(&action.description))?;
        }
    }

    if !snapshot.tasks.is_empty() {
        out.push_str("\n## Tasks\n\n");
        for task in &snapshot.tasks {
            let mark = if task.status == TaskStatus::Completed {
                "x"
            } else {
                " "
            };
            writeln!(out, "- [{mark}] {} {}", task.id, one_line(&task.description))?;
        }
    }

    let open: Vec<_> = snapshot.known_issues.iter().filter(|i| i.is_open()).collect();
    if !open.is_empty() {
        out.push_str("\n## Open Issues\n\n");
        for issue in open {
            writeln!(out, "- [{:?}] {}", issue.severity, one_line(&issue.title))?;
        }
    }
    Ok(out)
}

fn render_scratch(snapshot: &StateSnapshot) -> Result<String, LayerError> {
    Ok(format!(
        "Session: {}\nCaptured: {}\nPhase: {}\nProgress: {}%\n",
        snapshot.id(),
        timestamp(snapshot),
        one_line(&snapshot.phase),
        snapshot.progress
    ))
}

fn render_log_entry(snapshot: &StateSnapshot) -> Result<String, LayerError> {
    let mut out = String::new();
    writeln!(out, "## Entry {}\n", timestamp(snapshot))?;
    writeln!(out, "Session: {}", snapshot.id())?;
    writeln!(out, "Captured: {}", timestamp(snapshot))?;
    writeln!(out, "Phase: {}", one_line(&snapshot.phase))?;
    writeln!(out, "Progress: {}%", snapshot.progress)?;
    writeln!(out, "Build: {}", snapshot.environment.build.label())?;
    if let Some(action) = snapshot.top_next_action() {
        writeln!(out, "Next: {}", one_line(&action.description))?;
    }
    writeln!(out, "Files touched: {}", snapshot.files_touched.len())?;
    out.push_str(ENTRY_SEPARATOR);
    Ok(out)
}

fn render_history_entry(snapshot: &StateSnapshot) -> Result<String, LayerError> {
    let mut out = String::new();
    writeln!(
        out,
        "### {} {}\n",
        snapshot.captured_at.format("%Y-%m-%d"),
        snapshot.id()
    )?;
    writeln!(out, "Session: {}", snapshot.id())?;
    writeln!(out, "Captured: {}", timestamp(snapshot))?;
    writeln!(out, "Phase: {}", one_line(&snapshot.phase))?;
    writeln!(out, "Progress: {}%", snapshot.progress)?;
    writeln!(out, "Build: {}", snapshot.environment.build.label())?;
    writeln!(
        out,
        "Completed tasks: {}/{}",
        snapshot.completed_tasks(),
        snapshot.tasks.len()
    )?;
    out.push_str(ENTRY_SEPARATOR);
    Ok(out)
}
