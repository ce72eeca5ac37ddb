//! Interactive y/N approval on the terminal.

use std::io::{BufRead, Write};

use async_trait::async_trait;
use forgeloop_core::tool::{Approval, Approver, Preview};

pub struct TerminalApprover;

fn read_line(prompt: &str) -> Option<String> {
    print!("{prompt}");
    std::io::stdout().flush().ok()?;
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}

/// Blocking prompt: `y`/`yes` approves; anything else rejects with optional feedback.
fn ask() -> Approval {
    let answer = read_line("  Apply this change? [y/N] ").unwrap_or_default();
    if matches!(answer.to_lowercase().as_str(), "y" | "yes") {
        return Approval::Approved;
    }
    let feedback = read_line("  Feedback for the agent (optional): ").filter(|f| !f.is_empty());
    Approval::Rejected { feedback }
}

#[async_trait]
impl Approver for TerminalApprover {
    fn show(&self, tool_name: &str, preview: &Preview) {
        println!();
        println!("  [{tool_name}] {}", preview.summary);
        match preview.data.get("diff").and_then(|d| d.as_str()) {
            Some(diff) => {
                for line in diff.lines() {
                    println!("  {line}");
                }
            }
            None => {
                if let Some(new) = &preview.new_content {
                    println!("{new}");
                }
            }
        }
        println!();
    }

    async fn approve(&self, _tool_name: &str, _preview: &Preview) -> Approval {
        tokio::task::spawn_blocking(ask)
            .await
            .unwrap_or(Approval::Rejected { feedback: None })
    }
}
