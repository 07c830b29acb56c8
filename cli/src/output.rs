//! Console output formatting

use colored::Colorize;
use orchestra_domain::{CircuitState, OrchestrationOutput, ToolMetadata};
use orchestra_infrastructure::ConfigSource;

/// Formats orchestration results for console display
pub struct ConsoleFormatter;

impl ConsoleFormatter {
    /// Format the full result: status, metadata, bundle digest, errors and content
    pub fn format(output: &OrchestrationOutput) -> String {
        let mut out = String::new();

        out.push_str(&Self::header("Orchestration Result"));
        out.push('\n');

        let status = if output.is_completed() {
            output.status.as_str().to_uppercase().green().bold()
        } else {
            output.status.as_str().to_uppercase().red().bold()
        };
        out.push_str(&format!("{} {}\n", "Status:".bold(), status));

        let meta = &output.metadata;
        if let Some(tool) = &meta.tool {
            let version = meta.tool_version.as_deref().unwrap_or("?");
            out.push_str(&format!("{} {} ({})\n", "Tool:".bold(), tool.cyan(), version));
        }
        if let Some(rule) = &meta.rule {
            out.push_str(&format!("{} {}\n", "Rule:".bold(), rule));
        }
        out.push_str(&format!(
            "{} {}  {} {}\n",
            "Trace:".bold(),
            output.trace_id.dimmed(),
            "Request:".bold(),
            output.request_id.dimmed()
        ));
        out.push_str(&format!(
            "{} {} tokens, ${:.4}, {} ms (run {} ms)\n",
            "Usage:".bold(),
            output.usage.tokens,
            output.usage.cost_usd,
            output.usage.time_ms,
            output.elapsed_ms
        ));
        if meta.retry_count > 0 {
            out.push_str(&format!("{} {}\n", "Retries:".bold(), meta.retry_count));
        }
        if !meta.fallbacks_tried.is_empty() {
            out.push_str(&format!(
                "{} {}\n",
                "Fallbacks tried:".bold(),
                meta.fallbacks_tried.join(", ")
            ));
        }
        if meta.idempotent_replay {
            out.push_str(&format!("{}\n", "Replayed from idempotency store".yellow()));
        }

        if !meta.circuit_states.is_empty() {
            out.push_str(&Self::section_header("Circuit Breakers"));
            for (key, state) in &meta.circuit_states {
                out.push_str(&format!("  {} {}\n", key, Self::circuit(*state)));
            }
        }

        if let Some(digest) = &meta.bundle {
            out.push_str(&Self::section_header("Evidence Bundle"));
            out.push_str(&format!(
                "  task {}: {}/{} launched, {} completed, {} valid{}\n",
                digest.task_id,
                digest.launched,
                digest.k,
                digest.completed,
                digest.valid,
                if digest.early_stopped {
                    " (early stop)".yellow().to_string()
                } else {
                    String::new()
                }
            ));
            let confidence = format!("{:.2}", digest.confidence);
            let confidence = if digest.insufficient_evidence {
                format!("{} (insufficient evidence)", confidence).red().to_string()
            } else {
                confidence.green().to_string()
            };
            out.push_str(&format!("  confidence {}\n", confidence));

            if let Some(bundle) = output.evidence() {
                for d in &bundle.summary.disagreements {
                    let values: Vec<String> = d.values.iter().map(|v| v.to_string()).collect();
                    out.push_str(&format!(
                        "  {} {}: {}\n",
                        "disagree".yellow(),
                        d.field,
                        values.join(" | ")
                    ));
                }
            }
        }

        if !meta.warnings.is_empty() {
            out.push_str(&Self::section_header("Warnings"));
            for warning in &meta.warnings {
                out.push_str(&format!("  {} {}\n", "!".yellow().bold(), warning));
            }
        }

        if !output.errors.is_empty() {
            out.push_str(&Self::section_header("Errors"));
            for (tool, report) in &output.errors {
                out.push_str(&format!(
                    "  {} [{}] {}{}\n",
                    tool.red().bold(),
                    report.code,
                    report.message,
                    if report.is_retryable { " (retryable)" } else { "" }
                ));
            }
        }

        out.push_str(&Self::section_header("Content"));
        out.push_str(&Self::format_content(output));
        out.push_str(&Self::footer());

        out
    }

    /// Only the produced content, pretty-printed
    pub fn format_content(output: &OrchestrationOutput) -> String {
        let mut out = serde_json::to_string_pretty(&output.content)
            .unwrap_or_else(|_| output.content.to_string());
        out.push('\n');
        out
    }

    pub fn format_json(output: &OrchestrationOutput) -> String {
        serde_json::to_string_pretty(output).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
    }

    /// Registered tools as a table
    pub fn format_tools(tools: &[ToolMetadata]) -> String {
        let mut out = Self::section_header("Registered Tools");
        if tools.is_empty() {
            out.push_str("  (none)\n");
            return out;
        }
        for tool in tools {
            let mut tags = Vec::new();
            if tool.supports_bundle {
                tags.push("bundle".to_string());
            }
            if let Some(provider) = &tool.provider {
                tags.push(format!("provider={}", provider));
            }
            let tags = if tags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", tags.join(", "))
            };
            out.push_str(&format!(
                "  {} {}{}\n      {}\n",
                tool.name.cyan().bold(),
                tool.version.dimmed(),
                tags,
                tool.description
            ));
        }
        out
    }

    /// Configuration sources in priority order (lowest first)
    pub fn format_sources(sources: &[ConfigSource]) -> String {
        let mut out = Self::section_header("Configuration Sources");
        for source in sources {
            let location = source
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string());
            let marker = if source.found {
                "found".green().to_string()
            } else {
                "missing".dimmed().to_string()
            };
            out.push_str(&format!("  {:<10} {} ({})\n", source.label, location, marker));
        }
        out
    }

    fn circuit(state: CircuitState) -> String {
        match state {
            CircuitState::Closed => state.as_str().green().to_string(),
            CircuitState::Open => state.as_str().red().bold().to_string(),
            CircuitState::HalfOpen => state.as_str().yellow().to_string(),
        }
    }

    fn header(title: &str) -> String {
        let line = "=".repeat(60);
        format!("{}\n{:^60}\n{}", line.cyan(), title.bold(), line.cyan())
    }

    fn section_header(title: &str) -> String {
        format!("\n{}\n{}\n", title.cyan().bold(), "-".repeat(40))
    }

    fn footer() -> String {
        format!("\n{}\n", "=".repeat(60).cyan())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_domain::{
        ErrorCode, OutputMetadata, RunStatus, ToolError, ToolErrorReport, Usage,
    };
    use serde_json::json;
    use std::collections::BTreeMap;

    fn output(status: RunStatus) -> OrchestrationOutput {
        OrchestrationOutput {
            content: json!({"answer": 42}),
            usage: Usage::new(12, 0.0, 5),
            metadata: OutputMetadata {
                tool: Some("echo".to_string()),
                tool_version: Some("1.0.0".to_string()),
                ..Default::default()
            },
            trace_id: "trace-1".to_string(),
            request_id: "req-1".to_string(),
            elapsed_ms: 7,
            status,
            errors: BTreeMap::new(),
        }
    }

    #[test]
    fn test_format_completed() {
        let text = ConsoleFormatter::format(&output(RunStatus::Completed));
        assert!(text.contains("COMPLETED"));
        assert!(text.contains("echo"));
        assert!(text.contains("\"answer\": 42"));
        assert!(!text.contains("Errors"));
    }

    #[test]
    fn test_format_failed_lists_errors() {
        let mut failed = output(RunStatus::Failed);
        failed.errors.insert(
            "echo".to_string(),
            ToolErrorReport::from_tool_error(&ToolError::timeout("generate"), true),
        );
        let text = ConsoleFormatter::format(&failed);
        assert!(text.contains("FAILED"));
        assert!(text.contains(ErrorCode::Timeout.as_str()));
        assert!(text.contains("(retryable)"));
    }

    #[test]
    fn test_format_json_round_trips() {
        let original = output(RunStatus::Completed);
        let text = ConsoleFormatter::format_json(&original);
        let parsed: OrchestrationOutput = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_format_tools() {
        let tools = vec![
            ToolMetadata::new("echo_bundle", "1.0.0", "replicated echo").with_bundle_support(true),
        ];
        let text = ConsoleFormatter::format_tools(&tools);
        assert!(text.contains("echo_bundle"));
        assert!(text.contains("[bundle]"));
        assert!(ConsoleFormatter::format_tools(&[]).contains("(none)"));
    }
}
