//! Output formatting for CLI commands

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::WorkItem;
use crate::storage;

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl From<storage::OutputFormat> for OutputFormat {
    fn from(format: storage::OutputFormat) -> Self {
        match format {
            storage::OutputFormat::Text => OutputFormat::Text,
            storage::OutputFormat::Json => OutputFormat::Json,
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Prints a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Text => println!("{}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "success": true,
                        "message": message
                    })
                );
            }
        }
    }

    /// Prints a warning to stderr
    pub fn warn(&self, message: &str) {
        match self.format {
            OutputFormat::Text => eprintln!("Warning: {}", message),
            OutputFormat::Json => {
                eprintln!("{}", serde_json::json!({ "warning": message }));
            }
        }
    }

    /// Prints structured data as JSON
    pub fn data<T: Serialize>(&self, data: &T) {
        let rendered = match self.format {
            OutputFormat::Text => serde_json::to_string_pretty(data),
            OutputFormat::Json => serde_json::to_string(data),
        };
        if let Ok(json) = rendered {
            println!("{}", json);
        }
    }

    /// Items as a table in text mode, as a JSON array otherwise
    pub fn items(&self, items: &[WorkItem], now: DateTime<Utc>, empty: &str) {
        if self.is_json() {
            self.data(&items);
            return;
        }
        if items.is_empty() {
            println!("{}", empty);
            return;
        }
        println!("{:<10} {:<10} {:>4} TITLE", "ID", "STATE", "PRI");
        println!("{}", "-".repeat(60));
        for item in items {
            println!(
                "{:<10} {:<10} {:>4} {}",
                item.id,
                item.scheduling_state(now).label(),
                item.effective_priority(),
                item.title()
            );
        }
    }

    /// Returns true if using JSON format
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }
}
