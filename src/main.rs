//! Binary entry point: wires the core's collaborators together and drives
//! the event pipeline from stdin, one task per line. The HTTP transport a
//! production deployment would front this with is an external concern;
//! this binary is the smallest harness that exercises the whole core.

use std::io::{self, BufRead, Write as _};
use std::sync::Arc;

use relay_agent::agent::{Agent, AgentDeps};
use relay_agent::config::{ProviderKind, Settings};
use relay_agent::llm::providers::{AnthropicLikeCompleter, OpenAiCompatibleCompleter};
use relay_agent::llm::ChatCompleter;
use relay_agent::pipeline::{EventPipeline, InMemoryHistoryStore, TaskSubmission};
use relay_agent::ptc::PtcGenerator;
use relay_agent::sandbox::{discover_site_packages, ProcessSandboxAdapter};
use relay_agent::session::SessionManager;
use relay_agent::skills::SkillRegistry;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn build_completer(settings: &Settings) -> Arc<dyn ChatCompleter> {
    let base_url = settings.llm_base_url.as_deref();
    match settings.default_llm_provider {
        ProviderKind::AnthropicLike => {
            let api_key = settings.anthropic_api_key.as_deref().unwrap_or_default();
            Arc::new(AnthropicLikeCompleter::new(
                api_key,
                base_url,
                settings.default_llm_model.clone(),
            ))
        }
        ProviderKind::OpenAiCompatible => {
            let api_key = settings.openai_api_key.as_deref().unwrap_or_default();
            Arc::new(OpenAiCompatibleCompleter::new(
                api_key,
                base_url,
                settings.default_llm_model.clone(),
            ))
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let settings = match Settings::load() {
        Ok(s) => s,
        Err(err) => {
            error!(error = %err, "failed to load settings, falling back to defaults");
            Settings::defaults()
        }
    };

    let skills = match SkillRegistry::discover(&settings.skills_dir) {
        Ok(registry) => Arc::new(registry),
        Err(err) => {
            error!(error = %err, dir = %settings.skills_dir, "skill discovery failed, starting with an empty registry");
            Arc::new(SkillRegistry::in_memory(Vec::new()))
        }
    };
    info!(count = skills.snapshot().len(), "skill registry ready");

    let completer = build_completer(&settings);
    let ptc = Arc::new(PtcGenerator::new(completer, settings.history_window));
    let sandbox = Arc::new(ProcessSandboxAdapter::new(
        settings.python_path.clone(),
        settings.sandbox_workspace.clone(),
        settings.skills_dir.clone(),
        settings.max_sessions,
    ));

    // Every generated program's prelude inserts these onto sys.path so it
    // can import skill implementation modules: the skill root itself, and
    // any bundled site-packages trees discovered under it.
    let skill_root = std::path::PathBuf::from(&settings.skills_dir);
    let mut extra_module_paths = vec![settings.skills_dir.clone()];
    extra_module_paths.extend(discover_site_packages(&skill_root));

    let deps = AgentDeps {
        ptc,
        sandbox,
        skills,
        task_timeout_ms: settings.task_timeout_ms,
        extra_module_paths,
    };

    let factory: relay_agent::session::manager::AgentFactory =
        Arc::new(move |id: String| Agent::new(id, deps.clone()));

    let sessions = SessionManager::new(settings.max_sessions, settings.session_timeout_ms, factory);
    let pipeline = EventPipeline::new(
        sessions.clone(),
        Arc::new(InMemoryHistoryStore::default()),
        settings.dev_mode,
    );

    info!("relay-agent ready; reading tasks from stdin (one per line, Ctrl-D to quit)");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let task = line.trim();
        if task.is_empty() {
            continue;
        }

        let submission = TaskSubmission {
            task_id: None,
            task: task.to_string(),
            session_id: Some("cli".to_string()),
        };

        match pipeline.handle_task_execute(submission).await {
            Ok(result) => match serde_json::to_string_pretty(&result) {
                Ok(json) => println!("{json}"),
                Err(err) => warn!(error = %err, "failed to serialize task result"),
            },
            Err(err) => error!(error = %err, "task submission rejected"),
        }

        let _ = io::stdout().flush();
    }

    sessions.shutdown().await;
}
