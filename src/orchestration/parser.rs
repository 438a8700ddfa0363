//! Checklist parser.
//!
//! Turns a markdown task list into [`ParsedTask`]s. Headings build a section
//! path; `- [ ]` / `- [x]` lines become tasks. Inline markers on a task line
//! set its attributes and are stripped from the name:
//!
//! ```text
//! ## Backend
//! - [ ] Add login endpoint [P1] [2h] @coder depends:setup #api #auth
//! - [x] Setup database [P] [45m]
//! ```

use crate::core::task::{
    GraphNode, Priority, TaskOptions, TaskStatus, DEFAULT_DURATION_MINUTES, META_AGENT_TYPE,
    META_LINE, META_SECTION,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Minutes per `h` and per `d` in duration markers. A day is one 8h work day.
const MINUTES_PER_HOUR: u32 = 60;
const MINUTES_PER_DAY: u32 = 480;

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+?)(?:\s+#+)?\s*$").unwrap());

static TASK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-*]\s+\[([ xX])\]\s+(.*)$").unwrap());

static PRIORITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[Pp]([123])\]").unwrap());

static PARALLEL_SHORT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[P\]").unwrap());

static PARALLEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[parallel\]").unwrap());

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[(\d+)\s*([mhd])\]").unwrap());

static AGENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)@([A-Za-z][\w-]*)").unwrap());

static DEPENDS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|\s)depends:\s*([^\s,\[\]#@]+(?:\s*,\s*[^\s,\[\]#@]+)*)").unwrap()
});

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:^|\s)#([\w-]+)").unwrap());

/// One task line from a checklist, plus its lifecycle record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTask {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub priority: Priority,
    pub estimated_duration: u32,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub parallelizable: bool,
    /// Raw dependency references, resolved when the graph is built.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    /// Heading path, outermost first.
    #[serde(default)]
    pub section: Vec<String>,
    pub status: TaskStatus,
    /// 1-based source line, 0 if the task was not parsed from text.
    #[serde(default)]
    pub line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ParsedTask {
    /// A pending task with default attributes.
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: None,
            priority: Priority::default(),
            estimated_duration: DEFAULT_DURATION_MINUTES,
            tags: BTreeSet::new(),
            parallelizable: false,
            dependencies: Vec::new(),
            agent_type: None,
            section: Vec::new(),
            status: TaskStatus::Pending,
            line: 0,
            assigned_agent: None,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.estimated_duration = minutes;
        self
    }

    pub fn with_dependencies(mut self, refs: &[&str]) -> Self {
        self.dependencies = refs.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn with_agent_type(mut self, agent_type: &str) -> Self {
        self.agent_type = Some(agent_type.to_string());
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.insert(tag.to_string());
        self
    }

    pub fn completed(mut self) -> Self {
        self.status = TaskStatus::Completed;
        self
    }

    /// Heading path joined for display, e.g. `Backend > Auth`.
    pub fn section_path(&self) -> String {
        self.section.join(" > ")
    }

    /// Graph vertex for this task, with section, worker hint and line in metadata.
    pub fn to_node(&self) -> GraphNode {
        let mut opts = TaskOptions::new()
            .priority(self.priority)
            .duration(self.estimated_duration)
            .parallelizable(self.parallelizable);
        opts.description = self.description.clone();
        opts.tags = self.tags.clone();

        if !self.section.is_empty() {
            opts = opts.meta(META_SECTION, serde_json::Value::from(self.section_path()));
        }
        if let Some(agent_type) = &self.agent_type {
            opts = opts.meta(META_AGENT_TYPE, serde_json::Value::from(agent_type.clone()));
        }
        if self.line > 0 {
            opts = opts.meta(META_LINE, serde_json::Value::from(self.line));
        }
        GraphNode::new(&self.id, &self.name, opts)
    }
}

/// Lower-case, hyphen-separated form of `s`. Never empty.
pub fn slugify(s: &str) -> String {
    let mut slug = String::with_capacity(s.len());
    let mut pending_dash = false;
    for c in s.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        slug.push_str("task");
    }
    slug
}

/// Parse a checklist document.
///
/// Lines that are neither headings nor task items are ignored, except
/// indented prose directly under a task, which becomes its description.
pub fn parse_checklist(text: &str) -> Vec<ParsedTask> {
    let mut tasks: Vec<ParsedTask> = Vec::new();
    let mut sections: Vec<(usize, String)> = Vec::new();
    let mut in_task_body = false;

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;

        if let Some(caps) = HEADING_RE.captures(raw) {
            let depth = caps[1].len();
            while sections.last().is_some_and(|(d, _)| *d >= depth) {
                sections.pop();
            }
            sections.push((depth, caps[2].trim().to_string()));
            in_task_body = false;
            continue;
        }

        if let Some(caps) = TASK_RE.captures(raw) {
            let checked = caps[1].eq_ignore_ascii_case("x");
            let ordinal = tasks.len() + 1;
            let mut task = parse_task_text(&caps[2], ordinal);
            task.section = sections.iter().map(|(_, title)| title.clone()).collect();
            task.line = line_no;
            if checked {
                task.status = TaskStatus::Completed;
            }
            tasks.push(task);
            in_task_body = true;
            continue;
        }

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            in_task_body = false;
            continue;
        }

        let indented = raw.starts_with("  ") || raw.starts_with('\t');
        if in_task_body && indented && !trimmed.starts_with(['-', '*']) {
            if let Some(task) = tasks.last_mut() {
                let description = task.description.get_or_insert_with(String::new);
                if !description.is_empty() {
                    description.push(' ');
                }
                description.push_str(trimmed);
            }
        } else {
            in_task_body = false;
        }
    }

    tasks
}

/// Extract markers from one task's text and build the task.
fn parse_task_text(text: &str, ordinal: usize) -> ParsedTask {
    let mut rest = text.to_string();
    let mut task = ParsedTask::new("", "");

    let mut priority_found = false;
    if let Some(caps) = PRIORITY_RE.captures(&rest) {
        task.priority = Priority::parse(&caps[1]).unwrap_or_default();
        priority_found = true;
    }
    rest = PRIORITY_RE.replace_all(&rest, " ").into_owned();

    if !priority_found && PARALLEL_SHORT_RE.is_match(&rest) {
        task.parallelizable = true;
        rest = PARALLEL_SHORT_RE.replace_all(&rest, " ").into_owned();
    }
    if PARALLEL_RE.is_match(&rest) {
        task.parallelizable = true;
        rest = PARALLEL_RE.replace_all(&rest, " ").into_owned();
    }

    if let Some(caps) = DURATION_RE.captures(&rest) {
        if let Ok(amount) = caps[1].parse::<u32>() {
            let unit = match caps[2].to_ascii_lowercase().as_str() {
                "h" => MINUTES_PER_HOUR,
                "d" => MINUTES_PER_DAY,
                _ => 1,
            };
            task.estimated_duration = amount.saturating_mul(unit);
        }
    }
    rest = DURATION_RE.replace_all(&rest, " ").into_owned();

    if let Some(caps) = AGENT_RE.captures(&rest) {
        task.agent_type = Some(caps[1].to_lowercase());
    }
    rest = AGENT_RE.replace_all(&rest, " ").into_owned();

    for caps in DEPENDS_RE.captures_iter(&rest) {
        task.dependencies.extend(
            caps[1]
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
        );
    }
    rest = DEPENDS_RE.replace_all(&rest, " ").into_owned();

    for caps in TAG_RE.captures_iter(&rest) {
        task.tags.insert(caps[1].to_lowercase());
    }
    rest = TAG_RE.replace_all(&rest, " ").into_owned();

    let name = rest.split_whitespace().collect::<Vec<_>>().join(" ");
    task.name = if name.is_empty() {
        format!("Task {ordinal}")
    } else {
        name
    };
    task.id = format!("{}-{}", slugify(&task.name), ordinal);
    task
}
