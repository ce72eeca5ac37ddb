//! `forgeloop run`: execute a single task.

use super::setup;

pub async fn run(
    task: String,
    clear: bool,
    max_iterations: Option<usize>,
    yes: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = setup::load_config()?;
    let mut agent = setup::build_agent(&config, yes)?;
    if let Some(max) = max_iterations {
        agent = agent.with_max_iterations(max);
    }
    setup::install_interrupt_handler(agent.interrupt_handle());

    let result = agent.run(&task, clear).await;
    setup::print_result(&result);

    if result.success {
        Ok(())
    } else {
        Err(format!("agent stopped: {}", result.stop_reason).into())
    }
}
