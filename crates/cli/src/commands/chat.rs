//! `forgeloop chat`: interactive session; context carries across tasks.

use std::io::{BufRead, Write};

use super::setup;

pub async fn run(yes: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = setup::load_config()?;
    let mut agent = setup::build_agent(&config, yes)?;
    setup::install_interrupt_handler(agent.interrupt_handle());

    println!();
    println!("  forgeloop interactive mode");
    println!("  Model:  {}", config.llm.providers.first().map_or("-", |p| p.model.as_str()));
    println!("  Limit:  {} iterations per task", agent.max_iterations());
    println!("  Type a task and press Enter. /clear resets the context, /exit quits.");
    println!();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let line = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|n| (n, line))
        })
        .await??;

        let (read, line) = line;
        if read == 0 {
            break;
        }
        let input = line.trim();
        match input {
            "" => continue,
            "/exit" | "/quit" => break,
            "/clear" => {
                agent.context_mut().clear();
                println!("  Context cleared.");
                continue;
            }
            _ => {}
        }

        let result = agent.run(input, false).await;
        setup::print_result(&result);
        tracing::debug!(context = %agent.context().summary(), "Context after task");
        println!();
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}
