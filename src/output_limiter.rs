//! Type-aware intelligent output truncation (spec.md 4.4, C4).

use crate::settings::OutputLimiterConfig;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Hint describing the shape of a tool's result `data`, used to pick a
/// truncation policy (spec.md 4.4, 4.8 "determine OutputType from tool id
/// & category").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputType {
    Text,
    FileList,
    FileContent,
    DirectoryTree,
    StructuredData,
    Logs,
}

/// Per-call overrides layered on top of [`OutputLimiterConfig`] defaults.
#[derive(Debug, Clone, Default)]
pub struct OutputLimitContext {
    pub max_characters: Option<usize>,
    pub max_bytes: Option<usize>,
    pub max_items: Option<usize>,
    pub max_lines: Option<usize>,
    pub include_summary: bool,
    pub provide_suggestions: bool,
    pub tool_context: Option<String>,
}

/// Structural digest attached to a truncated list-shaped result (spec.md
/// "Summary" glossary entry).
#[derive(Debug, Clone, Default)]
pub struct OutputStatistics {
    pub file_count: usize,
    pub directory_count: usize,
    pub unique_extensions: usize,
    pub top_extensions: Vec<(String, usize)>,
}

#[derive(Debug, Clone)]
pub struct OutputGroup {
    pub directory: String,
    pub count: usize,
    pub sample_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OutputSummary {
    pub total_count: usize,
    pub shown_count: usize,
    pub statistics: OutputStatistics,
    pub groups: Vec<OutputGroup>,
}

#[derive(Debug, Clone)]
pub struct LimitedOutput {
    pub content: Value,
    pub was_truncated: bool,
    pub original_size: usize,
    pub truncated_size: usize,
    pub truncation_reason: Option<String>,
    pub summary: Option<OutputSummary>,
    pub suggestions: Vec<String>,
}

impl LimitedOutput {
    fn unchanged(content: Value) -> Self {
        let size = estimate_size(&content);
        Self {
            content,
            was_truncated: false,
            original_size: size,
            truncated_size: size,
            truncation_reason: None,
            summary: None,
            suggestions: Vec::new(),
        }
    }
}

/// Sums UTF-8 byte lengths. For sequences over 1000 items, samples the
/// first 1000 and extrapolates (spec.md 4.4 "A size estimator").
fn estimate_size(value: &Value) -> usize {
    match value {
        Value::String(s) => s.len(),
        Value::Array(items) => {
            if items.len() > 1000 {
                let sample: usize = items.iter().take(1000).map(estimate_size).sum();
                ((sample as f64 / 1000.0) * items.len() as f64).round() as usize
            } else {
                items.iter().map(estimate_size).sum()
            }
        }
        Value::Object(map) => map.values().map(estimate_size).sum::<usize>()
            + map.keys().map(|k| k.len()).sum::<usize>(),
        Value::Number(n) => n.to_string().len(),
        Value::Bool(_) => 5,
        Value::Null => 4,
    }
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn extension_of(name: &str) -> Option<String> {
    std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn parent_dir_of(path: &str) -> String {
    match std::path::Path::new(path).parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_string_lossy().to_string(),
        _ => ".".to_string(),
    }
}

/// Extracts a flat list of file-list-like entries as `(display_name, raw)`
/// pairs, unwrapping either a bare sequence or a `{"items": [...]}`
/// mapping (spec.md 4.4 FileList: "accepts either a sequence or a mapping
/// containing an `items` sequence").
fn entries_of(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(map) => map.get("items").and_then(Value::as_array),
        _ => None,
    }
}

fn entry_name(entry: &Value) -> String {
    match entry {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("path")
            .or_else(|| map.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        other => other.to_string(),
    }
}

fn entry_is_directory(entry: &Value) -> bool {
    matches!(entry, Value::Object(map) if map.get("is_directory").and_then(Value::as_bool).unwrap_or(false))
}

pub struct OutputLimiter {
    config: OutputLimiterConfig,
}

impl OutputLimiter {
    pub fn new(config: OutputLimiterConfig) -> Self {
        Self { config }
    }

    fn max_characters(&self, ctx: &OutputLimitContext, default: usize) -> usize {
        ctx.max_characters.unwrap_or(default)
    }

    fn max_items(&self, ctx: &OutputLimitContext) -> usize {
        ctx.max_items.unwrap_or(self.config.max_file_list_entries)
    }

    fn max_lines(&self, ctx: &OutputLimitContext) -> usize {
        ctx.max_lines.unwrap_or(self.config.max_lines_per_file)
    }

    /// Truncation round-trip property (spec.md 8): if this is `false`,
    /// `limit_output` must return the input unchanged with `was_truncated
    /// == false`.
    pub fn needs_limiting(&self, value: &Value, output_type: OutputType, ctx: &OutputLimitContext) -> bool {
        let size = estimate_size(value);
        match output_type {
            OutputType::FileList | OutputType::DirectoryTree => {
                let count = entries_of(value).map(Vec::len).unwrap_or(0);
                count > self.max_items(ctx)
                    || size > self.max_characters(ctx, self.config.max_file_list_characters)
            }
            OutputType::FileContent => {
                let lines = value.as_str().map(|s| s.lines().count()).unwrap_or(0);
                lines > self.max_lines(ctx)
                    || size > self.max_characters(ctx, self.config.max_file_content_characters)
            }
            OutputType::StructuredData => size > self.max_characters(ctx, self.config.max_output_characters),
            OutputType::Logs => {
                let lines = value.as_str().map(|s| s.lines().count()).unwrap_or(0);
                lines > self.max_lines(ctx)
            }
            OutputType::Text => {
                value.as_str().map(|s| s.chars().count()).unwrap_or(size)
                    > self.max_characters(ctx, self.config.max_output_characters)
            }
        }
    }

    pub fn limit_output(&self, value: Value, output_type: OutputType, ctx: &OutputLimitContext) -> LimitedOutput {
        if !self.needs_limiting(&value, output_type, ctx) {
            return LimitedOutput::unchanged(value);
        }

        match output_type {
            OutputType::FileList | OutputType::DirectoryTree => self.limit_file_list(value, ctx),
            OutputType::FileContent => self.limit_file_content(value, ctx),
            OutputType::StructuredData => self.limit_structured_data(value, ctx),
            OutputType::Logs => self.limit_logs(value, ctx),
            OutputType::Text => self.limit_text(value, ctx),
        }
    }

    fn limit_file_list(&self, value: Value, ctx: &OutputLimitContext) -> LimitedOutput {
        let original_size = estimate_size(&value);
        let is_mapping = value.is_object();
        let Some(entries) = entries_of(&value) else {
            return LimitedOutput::unchanged(value);
        };
        let total_count = entries.len();
        let max_items = self.max_items(ctx);
        let max_chars = self.max_characters(ctx, self.config.max_file_list_characters);

        let mut shown = Vec::new();
        let mut running_chars = 0usize;
        for entry in entries.iter() {
            if shown.len() >= max_items {
                break;
            }
            let size = estimate_size(entry);
            if running_chars + size > max_chars && !shown.is_empty() {
                break;
            }
            running_chars += size;
            shown.push(entry.clone());
        }
        let shown_count = shown.len();

        let content = if is_mapping {
            let mut map = Map::new();
            map.insert("items".to_string(), Value::Array(shown));
            map.insert("count".to_string(), Value::from(shown_count));
            map.insert("total_count".to_string(), Value::from(total_count));
            if let Value::Object(original) = &value {
                for (k, v) in original {
                    if k != "items" && k != "count" && k != "total_count" {
                        map.insert(k.clone(), v.clone());
                    }
                }
            }
            Value::Object(map)
        } else {
            Value::Array(shown)
        };

        let summary = self.summarize(entries, shown_count);
        let suggestions = if ctx.provide_suggestions || self.config.enable_smart_summaries {
            vec![
                "Use a pattern parameter to filter results to a subset you care about".to_string(),
                "Target a specific subdirectory instead of the whole tree".to_string(),
                "Pass non_recursive to avoid descending into subdirectories".to_string(),
                "Set a depth cap to bound how deep the listing goes".to_string(),
            ]
        } else {
            Vec::new()
        };

        let truncated_size = estimate_size(&content);
        LimitedOutput {
            content,
            was_truncated: true,
            original_size,
            truncated_size,
            truncation_reason: Some(format!(
                "Showing {shown_count} of {total_count} entries (limit {max_items} items / {max_chars} chars)"
            )),
            summary: if ctx.include_summary || self.config.enable_smart_summaries {
                Some(summary)
            } else {
                None
            },
            suggestions,
        }
    }

    fn summarize(&self, entries: &[Value], shown_count: usize) -> OutputSummary {
        let mut file_count = 0usize;
        let mut directory_count = 0usize;
        let mut extension_counts: HashMap<String, usize> = HashMap::new();
        let mut groups: HashMap<String, Vec<String>> = HashMap::new();

        for entry in entries {
            let name = entry_name(entry);
            if entry_is_directory(entry) {
                directory_count += 1;
            } else {
                file_count += 1;
                if let Some(ext) = extension_of(&name) {
                    *extension_counts.entry(ext).or_insert(0) += 1;
                }
            }
            let parent = parent_dir_of(&name);
            let samples = groups.entry(parent).or_default();
            if samples.len() < 3 {
                samples.push(name);
            }
        }

        let mut top_extensions: Vec<(String, usize)> = extension_counts.into_iter().collect();
        top_extensions.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let unique_extensions = top_extensions.len();
        top_extensions.truncate(5);

        let mut group_list: Vec<OutputGroup> = groups
            .into_iter()
            .map(|(directory, sample_names)| OutputGroup {
                count: sample_names.len(),
                directory,
                sample_names,
            })
            .collect();
        group_list.sort_by(|a, b| a.directory.cmp(&b.directory));
        group_list.truncate(10);

        OutputSummary {
            total_count: entries.len(),
            shown_count,
            statistics: OutputStatistics {
                file_count,
                directory_count,
                unique_extensions,
                top_extensions,
            },
            groups: group_list,
        }
    }

    fn limit_file_content(&self, value: Value, ctx: &OutputLimitContext) -> LimitedOutput {
        let original_size = estimate_size(&value);
        let Some(text) = value.as_str() else {
            return LimitedOutput::unchanged(value);
        };
        let max_lines = self.max_lines(ctx);
        let lines: Vec<&str> = text.lines().collect();
        let total = lines.len();
        let kept: Vec<&str> = lines.into_iter().take(max_lines).collect();
        let more = total.saturating_sub(kept.len());
        let mut content = kept.join("\n");
        if more > 0 {
            content.push_str(&format!("\n... ({more} more lines)"));
        }

        let content = Value::String(content);
        let truncated_size = estimate_size(&content);
        LimitedOutput {
            content,
            was_truncated: true,
            original_size,
            truncated_size,
            truncation_reason: Some(format!("Kept first {} of {total} lines", max_lines.min(total))),
            summary: None,
            suggestions: Vec::new(),
        }
    }

    fn limit_structured_data(&self, value: Value, ctx: &OutputLimitContext) -> LimitedOutput {
        let original_size = estimate_size(&value);
        let max_chars = self.max_characters(ctx, self.config.max_output_characters);
        let pretty = serde_json::to_string_pretty(&value).unwrap_or_default();
        if pretty.len() <= max_chars {
            return LimitedOutput::unchanged(value);
        }

        let truncated_top_level = match value {
            Value::Array(items) => {
                let mut kept = Vec::new();
                let mut chars_used = 0usize;
                for item in items {
                    let rendered = serde_json::to_string(&item).unwrap_or_default();
                    if chars_used + rendered.len() > max_chars && !kept.is_empty() {
                        break;
                    }
                    chars_used += rendered.len();
                    kept.push(item);
                }
                Value::Array(kept)
            }
            Value::Object(map) => {
                let mut kept = Map::new();
                let mut chars_used = 0usize;
                for (k, v) in map {
                    let rendered = serde_json::to_string(&v).unwrap_or_default();
                    if chars_used + rendered.len() + k.len() > max_chars && !kept.is_empty() {
                        break;
                    }
                    chars_used += rendered.len() + k.len();
                    kept.insert(k, v);
                }
                Value::Object(kept)
            }
            other => other,
        };

        let mut rendered = serde_json::to_string_pretty(&truncated_top_level).unwrap_or_default();
        rendered.push_str("\n... (truncated)");
        let content = Value::String(rendered);
        let truncated_size = estimate_size(&content);
        LimitedOutput {
            content,
            was_truncated: true,
            original_size,
            truncated_size,
            truncation_reason: Some("Truncated at the last complete top-level element".to_string()),
            summary: None,
            suggestions: Vec::new(),
        }
    }

    fn limit_logs(&self, value: Value, ctx: &OutputLimitContext) -> LimitedOutput {
        let original_size = estimate_size(&value);
        let Some(text) = value.as_str() else {
            return LimitedOutput::unchanged(value);
        };
        let max_lines = self.max_lines(ctx);
        let lines: Vec<&str> = text.lines().collect();
        let total = lines.len();
        let head_count = max_lines / 2;
        let tail_count = max_lines - head_count;
        let omitted = total.saturating_sub(head_count + tail_count);

        let head = &lines[..head_count.min(total)];
        let tail_start = total.saturating_sub(tail_count);
        let tail = &lines[tail_start.max(head_count.min(total))..];

        let mut content = head.join("\n");
        if omitted > 0 {
            content.push_str(&format!("\n... ({omitted} lines omitted) ...\n"));
        }
        content.push_str(&tail.join("\n"));

        let content = Value::String(content);
        let truncated_size = estimate_size(&content);
        LimitedOutput {
            content,
            was_truncated: true,
            original_size,
            truncated_size,
            truncation_reason: Some(format!("Kept {head_count} head / {tail_count} tail lines of {total}")),
            summary: None,
            suggestions: Vec::new(),
        }
    }

    fn limit_text(&self, value: Value, ctx: &OutputLimitContext) -> LimitedOutput {
        let original_size = estimate_size(&value);
        let Some(text) = value.as_str() else {
            return LimitedOutput::unchanged(value);
        };
        let max_chars = self.max_characters(ctx, self.config.max_output_characters);
        let budget = max_chars.saturating_sub(20);
        let cut = floor_char_boundary(text, budget);
        let mut content = text[..cut].to_string();
        content.push_str("... (truncated)");

        let content = Value::String(content);
        let truncated_size = estimate_size(&content);
        LimitedOutput {
            content,
            was_truncated: true,
            original_size,
            truncated_size,
            truncation_reason: Some(format!("Truncated to {budget} of {original_size} characters")),
            summary: None,
            suggestions: Vec::new(),
        }
    }
}
