//! Task list the model maintains for itself during long runs.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use forgeloop_core::error::ToolError;
use forgeloop_core::tool::{Tool, ToolResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    #[serde(rename = "activeForm")]
    pub active_form: String,
    pub status: TodoStatus,
}

/// Shared handle to the current list. Cloning shares the list.
#[derive(Debug, Clone, Default)]
pub struct TodoList {
    items: Arc<Mutex<Vec<TodoItem>>>,
}

impl TodoList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<TodoItem> {
        match self.items.lock() {
            Ok(items) => items.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace(&self, new_items: Vec<TodoItem>) {
        match self.items.lock() {
            Ok(mut items) => *items = new_items,
            Err(poisoned) => *poisoned.into_inner() = new_items,
        }
    }
}

pub struct TodoWriteTool {
    list: TodoList,
}

impl TodoWriteTool {
    pub fn new(list: TodoList) -> Self {
        Self { list }
    }
}

fn render(items: &[TodoItem]) -> String {
    let done = items.iter().filter(|t| t.status == TodoStatus::Completed).count();
    let pending = items.iter().filter(|t| t.status == TodoStatus::Pending).count();
    let mut out = format!(
        "Todo list updated: {} total, {done} completed, {pending} pending",
        items.len()
    );
    if let Some(current) = items.iter().find(|t| t.status == TodoStatus::InProgress) {
        out.push_str(&format!("\nCurrently: {}", current.active_form));
    }
    for item in items {
        let mark = match item.status {
            TodoStatus::Completed => "[x]",
            TodoStatus::InProgress => "[>]",
            TodoStatus::Pending => "[ ]",
        };
        out.push_str(&format!("\n{mark} {}", item.content));
    }
    out
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "todo_write"
    }

    fn description(&self) -> &str {
        "Replace the task list for this session. Use it for multi-step work: mark exactly one \
         item in_progress while working on it and mark items completed as soon as they are done."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "content": { "type": "string", "description": "Imperative form, e.g. 'Run tests'" },
                            "activeForm": { "type": "string", "description": "Present continuous, e.g. 'Running tests'" },
                            "status": { "type": "string", "enum": ["pending", "in_progress", "completed"] }
                        },
                        "required": ["content", "activeForm", "status"]
                    }
                }
            },
            "required": ["todos"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let todos = arguments
            .get("todos")
            .cloned()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'todos' argument".into()))?;
        let items: Vec<TodoItem> = serde_json::from_value(todos)
            .map_err(|e| ToolError::InvalidArguments(format!("Invalid todos: {e}")))?;

        let in_progress = items.iter().filter(|t| t.status == TodoStatus::InProgress).count();
        if in_progress > 1 {
            return Ok(ToolResult::fail(format!(
                "{in_progress} items are in_progress; only one may be in progress at a time"
            ))
            .with_suggestion("Mark one item in_progress and the rest pending or completed"));
        }

        let output = render(&items);
        let count = items.len();
        self.list.replace(items);
        Ok(ToolResult::ok(output).with_metadata("count", serde_json::json!(count)))
    }
}
