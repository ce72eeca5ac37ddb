//! Wiring shared by `run` and `chat`: config, provider chain, tools, approver.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use forgeloop_agent::{AgentLoop, AgentResult, RegistryFactory, TaskTool};
use forgeloop_config::AppConfig;
use forgeloop_core::provider::Provider;
use forgeloop_core::tool::{Approver, AutoApprove};
use forgeloop_tools::{TodoList, default_registry, read_only_registry};

use crate::approver::TerminalApprover;

pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    for entry in config.providers_missing_keys() {
        let hint = entry.kind.api_key_env().unwrap_or("the config file");
        eprintln!("  warning: no API key for {} (set {hint}); it will be skipped", entry.model);
    }
    Ok(config)
}

pub fn build_agent(
    config: &AppConfig,
    auto_approve: bool,
) -> Result<AgentLoop, Box<dyn std::error::Error>> {
    let chain = forgeloop_providers::router::build_from_config(config)?;
    let provider: Arc<dyn Provider> = Arc::new(chain);

    let working_dir = config
        .tools
        .working_dir
        .clone()
        .or_else(|| std::env::current_dir().ok());
    let shell_timeout = Duration::from_secs(config.tools.shell_timeout_secs);

    let mut registry = default_registry(working_dir.as_deref(), shell_timeout, TodoList::new());
    let child_dir = working_dir.clone();
    let factory: RegistryFactory =
        Arc::new(move || read_only_registry(child_dir.as_deref(), shell_timeout));
    let mut task = TaskTool::new(provider.clone(), factory);
    if let Some(dir) = &working_dir {
        task = task.with_working_dir(dir.display().to_string());
    }
    registry.register(Box::new(task));

    let approver: Arc<dyn Approver> = if auto_approve || config.agent.auto_approve {
        Arc::new(AutoApprove)
    } else {
        Arc::new(TerminalApprover)
    };

    let mut agent = AgentLoop::from_config(provider, Arc::new(registry), approver, config);
    if let Some(dir) = working_dir {
        agent = agent.with_working_dir(dir.display().to_string());
    }
    Ok(agent)
}

/// Ctrl-C sets the interrupt flag; a second Ctrl-C before the loop sees it exits.
pub fn install_interrupt_handler(flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if flag.swap(true, Ordering::SeqCst) {
                std::process::exit(130);
            }
            eprintln!("\n  Interrupt requested; stopping after the current step...");
        }
    });
}

pub fn print_result(result: &AgentResult) {
    println!();
    for line in result.message.lines() {
        println!("  {line}");
    }
    println!();
    println!(
        "  [{}] {} iteration(s), {} file change(s)",
        result.stop_reason,
        result.iterations_used,
        result.modifications.len()
    );
    for m in &result.modifications {
        println!("    {} ({})", m.file_path, m.tool_name);
    }
}
