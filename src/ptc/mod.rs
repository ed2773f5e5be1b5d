//! Two-phase programmatic-tool-call (PTC) generator: a Plan call picks
//! skills, an Implement call emits the program that uses them. Each phase's
//! model output is pulled out with a cascade of extraction strategies
//! (tagged block, balanced-brace scan, fenced code) since models don't
//! reliably stick to one output shape.

use std::sync::Arc;

use lazy_regex::regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;

use crate::error::CoreError;
use crate::llm::{ChatCompleter, ChatOptions, Message};
use crate::session::ConversationTurn;
use crate::skills::SkillSnapshot;

/// Output of the two-phase protocol: a validated program plus the
/// diagnostic trail that produced it.
#[derive(Debug, Clone)]
pub struct PtcResult {
    pub selected_skills: Vec<String>,
    pub reasoning: String,
    pub program: String,
}

#[derive(Debug, Deserialize)]
struct PlanPayload {
    selected_skills: Vec<String>,
    #[serde(default)]
    reasoning: String,
}

pub struct PtcGenerator {
    completer: Arc<dyn ChatCompleter>,
    history_window: usize,
}

impl PtcGenerator {
    #[must_use]
    pub fn new(completer: Arc<dyn ChatCompleter>, history_window: usize) -> Self {
        Self {
            completer,
            history_window,
        }
    }

    fn context_block(&self, history: &[ConversationTurn], variables: &serde_json::Map<String, Value>) -> String {
        let mut block = String::new();

        let window = crate::session::recent_turns(history, self.history_window);
        if !window.is_empty() {
            block.push_str("<conversation_history>\n");
            for turn in window {
                let role = match turn.role {
                    crate::session::Role::User => "user",
                    crate::session::Role::Assistant => "assistant",
                };
                block.push_str(&format!("{role}: {}\n", turn.content));
            }
            block.push_str("</conversation_history>\n");
        }

        if !variables.is_empty() {
            block.push_str("<variables>\n");
            for (name, value) in variables {
                block.push_str(&format!("{name}: {value}\n"));
            }
            block.push_str("</variables>\n");
        }

        block
    }

    /// Runs the plan phase then the implement phase, returning a validated
    /// program. Fails with [`CoreError::Parse`] if either phase's output
    /// can't be extracted, and [`CoreError::SkillNotFound`] if the plan
    /// names a skill absent from `skills` at generation time.
    ///
    /// `history` must be the turns that occurred *before* `task` -- callers
    /// must not have pushed the current task's own user turn onto it yet,
    /// otherwise the context block's window would end with the just-asked
    /// task instead of the prior turn it's meant to give the model context
    /// against.
    #[instrument(skip(self, history, variables, skills))]
    pub async fn generate(
        &self,
        task: &str,
        history: &[ConversationTurn],
        variables: &serde_json::Map<String, Value>,
        skills: &SkillSnapshot,
    ) -> Result<PtcResult, CoreError> {
        let context = self.context_block(history, variables);

        let plan = self.plan_phase(task, &context, skills).await?;

        for name in &plan.selected_skills {
            if !skills.contains(name) {
                return Err(CoreError::SkillNotFound(name.clone()));
            }
        }

        let program = self.implement_phase(task, &context, skills, &plan).await?;

        Ok(PtcResult {
            selected_skills: plan.selected_skills,
            reasoning: plan.reasoning,
            program,
        })
    }

    async fn plan_phase(
        &self,
        task: &str,
        context: &str,
        skills: &SkillSnapshot,
    ) -> Result<PlanPayload, CoreError> {
        let skill_list: String = skills
            .all()
            .map(|s| format!("- {}: {}\n", s.name, s.description))
            .collect();

        let prompt = format!(
            "{context}\nAvailable skills:\n{skill_list}\nTask: {task}\n\n\
             Respond with a <plan> block containing a JSON object with keys \
             `selected_skills` (an ordered list of skill names to use) and \
             `reasoning` (why you chose them)."
        );

        let response = self
            .completer
            .complete(&[Message::user(prompt)], &ChatOptions::default())
            .await?;

        let raw = extract_plan_json(&response.content)
            .ok_or_else(|| CoreError::Parse("could not locate a plan payload in model output".to_string()))?;

        serde_json::from_str(&raw)
            .map_err(|e| CoreError::Parse(format!("plan payload was not valid JSON: {e}")))
    }

    async fn implement_phase(
        &self,
        task: &str,
        context: &str,
        skills: &SkillSnapshot,
        plan: &PlanPayload,
    ) -> Result<String, CoreError> {
        let expanded: String = plan
            .selected_skills
            .iter()
            .filter_map(|name| skills.get(name))
            .map(|m| format!("- {}: {}\n", m.name, m.description))
            .collect();

        let prompt = format!(
            "{context}\nTask: {task}\n\nSelected skills:\n{expanded}\n\n\
             Write the program body only. It will be wrapped in an async \
             entry point automatically -- do not declare a main function, \
             a module-main guard, or import/run asyncio yourself. Call \
             skills via `executor.execute('name', {{...}})`."
        );

        let response = self
            .completer
            .complete(&[Message::user(prompt)], &ChatOptions::default())
            .await?;

        let raw = extract_code_block(&response.content)
            .ok_or_else(|| CoreError::Parse("could not locate a code block in model output".to_string()))?;

        let cleaned = strip_known_boilerplate(&raw);
        if cleaned.trim().len() < 5 {
            return Err(CoreError::Parse(
                "extracted program is too short to be valid".to_string(),
            ));
        }

        Ok(cleaned)
    }
}

/// Tries, in order: a `<plan>...</plan>` block, any JSON object containing
/// `"selected_skills"`, then a fenced code block holding JSON.
fn extract_plan_json(text: &str) -> Option<String> {
    let tagged = regex!(r"(?s)<plan>\s*(.*?)\s*</plan>");
    if let Some(caps) = tagged.captures(text) {
        return Some(caps[1].trim().to_string());
    }

    if let Some(obj) = find_balanced_json_object(text, "selected_skills") {
        return Some(obj);
    }

    let fenced = regex!(r"(?s)```(?:json)?\s*(.*?)\s*```");
    if let Some(caps) = fenced.captures(text) {
        if caps[1].contains("selected_skills") {
            return Some(caps[1].trim().to_string());
        }
    }

    None
}

/// Scans `text` for the first balanced `{...}` object that contains
/// `marker`, without assuming regex can match nested braces.
fn find_balanced_json_object(text: &str, marker: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut starts = Vec::new();

    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'{' => starts.push(i),
            b'}' => {
                if let Some(start) = starts.pop() {
                    if starts.is_empty() {
                        let candidate = &text[start..=i];
                        if candidate.contains(marker) {
                            return Some(candidate.to_string());
                        }
                    }
                }
            }
            _ => {}
        }
    }
    None
}

/// Tries, in order: a language-tagged fenced block, a generic fenced block,
/// an angle-tagged `<code>` block, or content after a `PROGRAM:` marker.
fn extract_code_block(text: &str) -> Option<String> {
    let tagged_fence = regex!(r"(?s)```(?:python|py)\s*\n(.*?)```");
    if let Some(caps) = tagged_fence.captures(text) {
        return Some(caps[1].to_string());
    }

    let generic_fence = regex!(r"(?s)```\s*\n?(.*?)```");
    if let Some(caps) = generic_fence.captures(text) {
        return Some(caps[1].to_string());
    }

    let angle = regex!(r"(?s)<code>\s*(.*?)\s*</code>");
    if let Some(caps) = angle.captures(text) {
        return Some(caps[1].to_string());
    }

    if let Some(idx) = text.find("PROGRAM:") {
        let rest = &text[idx + "PROGRAM:".len()..];
        if !rest.trim().is_empty() {
            return Some(rest.to_string());
        }
    }

    None
}

/// Strips boilerplate the model sometimes includes despite being told not
/// to: a `main` function declaration, a module-main guard, and stray
/// `asyncio` driving code.
fn strip_known_boilerplate(code: &str) -> String {
    let patterns = [
        regex!(r"(?m)^\s*async def main\(.*?\):\s*$"),
        regex!(r#"(?m)^\s*if __name__ == ['"]__main__['"]:\s*$"#),
        regex!(r"(?m)^\s*asyncio\.run\(.*\)\s*$"),
        regex!(r"(?m)^\s*import asyncio\s*$"),
    ];

    let mut cleaned = code.to_string();
    for pattern in patterns {
        cleaned = pattern.replace_all(&cleaned, "").to_string();
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_plan_from_tagged_block() {
        let text = "<plan>\n{\"selected_skills\": [\"a\"], \"reasoning\": \"because\"}\n</plan>";
        let raw = extract_plan_json(text).unwrap();
        let parsed: PlanPayload = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.selected_skills, vec!["a"]);
    }

    #[test]
    fn extracts_plan_from_bare_json_object() {
        let text = "sure, here you go: {\"selected_skills\": [\"b\"], \"reasoning\": \"x\"}";
        let raw = extract_plan_json(text).unwrap();
        assert!(raw.contains("selected_skills"));
    }

    #[test]
    fn extract_plan_returns_none_when_absent() {
        assert!(extract_plan_json("sorry, I don't know").is_none());
    }

    #[test]
    fn extracts_code_from_python_fence() {
        let text = "Here:\n```python\nx = 1\nexecutor.execute('a', {})\n```";
        let code = extract_code_block(text).unwrap();
        assert!(code.contains("executor.execute"));
    }

    #[test]
    fn strips_main_guard_boilerplate() {
        let code = "x = 1\nif __name__ == \"__main__\":\nimport asyncio\nasyncio.run(main())\n";
        let cleaned = strip_known_boilerplate(code);
        assert!(!cleaned.contains("__main__"));
        assert!(!cleaned.contains("import asyncio"));
    }
}
