//! Local clock lookups

use async_trait::async_trait;

use super::Tool;
use crate::Result;

fn no_parameters() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
    })
}

/// Reports the local date and time
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &'static str {
        "current_time"
    }

    fn description(&self) -> &'static str {
        "Get the current local date and time."
    }

    fn parameters(&self) -> serde_json::Value {
        no_parameters()
    }

    async fn execute(&self, _arguments: &str) -> Result<String> {
        let now = chrono::Local::now();
        Ok(serde_json::json!({
            "iso": now.to_rfc3339(),
            "spoken": now.format("%A, %B %-d %Y, %-I:%M %p").to_string(),
        })
        .to_string())
    }
}

/// Reports today's local date
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentDateTool;

#[async_trait]
impl Tool for CurrentDateTool {
    fn name(&self) -> &'static str {
        "current_date"
    }

    fn description(&self) -> &'static str {
        "Get the current local date."
    }

    fn parameters(&self) -> serde_json::Value {
        no_parameters()
    }

    async fn execute(&self, _arguments: &str) -> Result<String> {
        let today = chrono::Local::now().date_naive();
        Ok(serde_json::json!({
            "date": today.format("%Y-%m-%d").to_string(),
            "spoken": today.format("%A, %B %-d %Y").to_string(),
        })
        .to_string())
    }
}
