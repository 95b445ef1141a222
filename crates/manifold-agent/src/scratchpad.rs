use serde::{Deserialize, Serialize};

/// A tool call the model requested inside an `<ACTION>` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolAction {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// One completed reasoning step.
#[derive(Debug, Clone, Serialize)]
pub struct ScratchpadEntry {
    pub step_index: u32,
    pub thought: String,
    pub action: Option<ToolAction>,
    pub observation: Option<serde_json::Value>,
}

/// Append-only record of a session's steps, rendered back into each
/// subsequent prompt.
#[derive(Debug, Default)]
pub struct Scratchpad {
    entries: Vec<ScratchpadEntry>,
}

impl Scratchpad {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        thought: String,
        action: Option<ToolAction>,
        observation: Option<serde_json::Value>,
    ) {
        let step_index = self.entries.len() as u32;
        self.entries.push(ScratchpadEntry {
            step_index,
            thought,
            action,
            observation,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Render prior steps for the next prompt. Empty string when no steps
    /// have completed yet.
    pub fn render(&self) -> String {
        if self.entries.is_empty() {
            return String::new();
        }

        let mut out = String::from("Previous steps:\n");
        for entry in &self.entries {
            out.push_str(&format!("Thought: {}\n", entry.thought.trim()));
            match &entry.action {
                Some(action) => {
                    out.push_str(&format!(
                        "Action: {}\n",
                        serde_json::json!({
                            "tool_name": action.tool_name,
                            "arguments": action.arguments,
                        })
                    ));
                }
                None => out.push_str("Action: (paused to reflect)\n"),
            }
            if let Some(obs) = &entry.observation {
                out.push_str(&format!("Observation: {obs}\n"));
            }
            out.push('\n');
        }
        out
    }
}

/// Parse an `<ACTION>` body as `{tool_name, arguments}`.
pub fn parse_action(body: &str) -> Result<ToolAction, String> {
    let action: ToolAction =
        serde_json::from_str(body).map_err(|e| format!("action is not valid JSON: {e}"))?;
    if action.tool_name.trim().is_empty() {
        return Err("action has an empty tool_name".to_string());
    }
    Ok(action)
}
