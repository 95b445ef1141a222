use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

/// Per-pattern size cap (characters); oversized files are truncated.
const MAX_PATTERN_CHARS: usize = 20_000;

/// Placeholder a pattern may use to position the tool catalog itself.
const TOOLS_PLACEHOLDER: &str = "{{TOOLS}}";

const META_INSTRUCTION: &str = "The sections below are ordered by DESCENDING priority. \
When instructions conflict, earlier sections override later ones.";

/// Reasoning patterns discovered at startup: every `*.txt` file under
/// `<prompts_dir>/patterns`, keyed by file stem.
pub struct PatternLibrary {
    patterns: HashMap<String, String>,
}

impl PatternLibrary {
    /// Enumerate the patterns directory. A missing directory yields an
    /// empty library; sessions then fail with an unknown-pattern error
    /// rather than at startup.
    pub fn load(prompts_dir: &Path) -> Self {
        let dir = prompts_dir.join("patterns");
        let mut patterns = HashMap::new();

        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => {
                warn!(dir = %dir.display(), "patterns directory missing, no patterns loaded");
                return Self { patterns };
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match std::fs::read_to_string(&path) {
                Ok(mut content) => {
                    if content.len() > MAX_PATTERN_CHARS {
                        warn!(pattern = stem, "pattern truncated to size cap");
                        content.truncate(MAX_PATTERN_CHARS);
                    }
                    patterns.insert(stem.to_string(), content);
                }
                Err(e) => warn!(pattern = stem, error = %e, "failed to read pattern file"),
            }
        }

        info!(count = patterns.len(), "reasoning patterns loaded");
        Self { patterns }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.patterns.get(name).map(String::as_str)
    }

    /// Sorted pattern names for the admin surface.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.patterns.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Everything feeding into one session's system prompt besides the
/// pattern itself.
#[derive(Debug, Default)]
pub struct PromptSources {
    pub client_system_instruction: Option<String>,
    pub client_manifests: Vec<String>,
    pub server_system_instruction: Option<String>,
    pub server_manifests: Vec<String>,
}

/// Render the pattern into its framework block: the tool catalog replaces
/// `{{TOOLS}}` when the pattern positions it, and is appended otherwise.
fn render_pattern(pattern_prompt: &str, tools_json: &str) -> String {
    if pattern_prompt.contains(TOOLS_PLACEHOLDER) {
        pattern_prompt.replace(TOOLS_PLACEHOLDER, tools_json)
    } else if tools_json.is_empty() {
        pattern_prompt.to_string()
    } else {
        format!("{pattern_prompt}\n\nAvailable tools:\n{tools_json}")
    }
}

fn join_section(instruction: &Option<String>, manifests: &[String]) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if let Some(instr) = instruction {
        if !instr.trim().is_empty() {
            parts.push(instr);
        }
    }
    for manifest in manifests {
        if !manifest.trim().is_empty() {
            parts.push(manifest);
        }
    }
    parts.join("\n\n")
}

/// Deterministic system-prompt assembly: meta-instruction, client section
/// (highest priority), the reasoning framework, then the server section
/// (lowest priority). Empty sections are omitted entirely.
pub fn build_system_prompt(
    pattern_prompt: &str,
    tools_json: &str,
    sources: &PromptSources,
) -> String {
    let mut out = String::from(META_INSTRUCTION);

    let client = join_section(
        &sources.client_system_instruction,
        &sources.client_manifests,
    );
    if !client.is_empty() {
        out.push_str("\n\n### CLIENT INSTRUCTIONS (HIGHEST PRIORITY)\n\n");
        out.push_str(&client);
    }

    out.push_str("\n\n### CORE REASONING FRAMEWORK\n\n");
    out.push_str(&render_pattern(pattern_prompt, tools_json));

    let server = join_section(
        &sources.server_system_instruction,
        &sources.server_manifests,
    );
    if !server.is_empty() {
        out.push_str("\n\n### GLOBAL SERVER INSTRUCTIONS (LOWEST PRIORITY)\n\n");
        out.push_str(&server);
    }

    out
}
