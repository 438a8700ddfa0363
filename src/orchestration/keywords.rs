//! Keyword vocabulary for matching task text to worker types.

use std::collections::BTreeSet;

/// Worker types with built-in vocabularies.
pub const AGENT_TYPES: &[&str] = &[
    "coder",
    "tester",
    "reviewer",
    "researcher",
    "architect",
    "documenter",
    "devops",
    "designer",
    "analyst",
];

const CODER: &[&str] = &[
    "implement", "code", "build", "create", "refactor", "feature", "function", "api", "endpoint",
    "module", "fix", "bug", "add",
];
const TESTER: &[&str] = &[
    "test", "testing", "verify", "validate", "coverage", "qa", "assert", "e2e", "integration",
    "unit", "regression",
];
const REVIEWER: &[&str] = &[
    "review", "audit", "inspect", "check", "approve", "lint", "quality", "feedback",
];
const RESEARCHER: &[&str] = &[
    "research", "investigate", "explore", "evaluate", "compare", "study", "survey", "prototype",
    "spike",
];
const ARCHITECT: &[&str] = &[
    "design", "architecture", "schema", "structure", "plan", "model", "interface", "system",
    "diagram",
];
const DOCUMENTER: &[&str] = &[
    "document", "docs", "documentation", "readme", "guide", "tutorial", "comment", "changelog",
];
const DEVOPS: &[&str] = &[
    "deploy", "ci", "cd", "pipeline", "docker", "kubernetes", "infrastructure", "release",
    "monitor", "setup", "migrate", "provision",
];
const DESIGNER: &[&str] = &[
    "ui", "ux", "layout", "style", "css", "mockup", "wireframe", "visual", "theme",
];
const ANALYST: &[&str] = &[
    "analyze", "analysis", "metrics", "report", "data", "requirements", "estimate", "benchmark",
    "performance",
];

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "into", "onto", "that", "this", "these", "those", "then",
    "than", "all", "any", "are", "was", "were", "been", "has", "have", "not", "but", "our",
    "your", "its", "via", "per", "new", "use", "using", "make",
];

/// Vocabulary for a worker type; empty for unknown types.
pub fn keywords_for(agent_type: &str) -> &'static [&'static str] {
    match agent_type.to_ascii_lowercase().as_str() {
        "coder" => CODER,
        "tester" => TESTER,
        "reviewer" => REVIEWER,
        "researcher" => RESEARCHER,
        "architect" => ARCHITECT,
        "documenter" => DOCUMENTER,
        "devops" => DEVOPS,
        "designer" => DESIGNER,
        "analyst" => ANALYST,
        _ => &[],
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Short keywords must match exactly; longer ones also match as a prefix
/// (`implement` matches `implementing`).
fn token_matches(token: &str, keyword: &str) -> bool {
    token == keyword || (keyword.len() >= 4 && token.starts_with(keyword))
}

/// How well a task fits a worker type: 2 per vocabulary word found in the
/// name, 1 per vocabulary word found among the tags.
pub fn suitability(agent_type: &str, name: &str, tags: &BTreeSet<String>) -> u32 {
    let vocabulary = keywords_for(agent_type);
    if vocabulary.is_empty() {
        return 0;
    }

    let name_tokens: Vec<String> = tokens(name).collect();
    let tag_tokens: Vec<String> = tags.iter().map(|t| t.to_lowercase()).collect();

    vocabulary
        .iter()
        .map(|kw| {
            let mut score = 0;
            if name_tokens.iter().any(|t| token_matches(t, kw)) {
                score += 2;
            }
            if tag_tokens.iter().any(|t| token_matches(t, kw)) {
                score += 1;
            }
            score
        })
        .sum()
}

/// Distinct significant words of `text`, in order of first appearance.
///
/// Drops stopwords, pure numbers and words shorter than three characters.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    tokens(text)
        .filter(|t| t.chars().count() >= 3)
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}
