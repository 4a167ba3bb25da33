use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::format_project_datetime;
use crate::task::{Task, TaskId};
use crate::view::{DueStatus, Stats, classify};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    #[tracing::instrument(skip(self, tasks, now, threshold))]
    pub fn print_task_table(
        &mut self,
        tasks: &[Task],
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let headers = vec![
            "ID".to_string(),
            "Due".to_string(),
            "Pri".to_string(),
            "Title".to_string(),
            "Status".to_string(),
        ];

        let mut rows = Vec::with_capacity(tasks.len());

        for task in tasks {
            let id = short_id(&task.id);
            let due = task
                .due
                .map(format_project_datetime)
                .unwrap_or_default();

            let status = if task.completed {
                "done"
            } else {
                classify(task, now, threshold).label()
            };

            let due = match classify(task, now, threshold) {
                DueStatus::Overdue => self.paint(&due, "31"),
                DueStatus::DueSoon => self.paint(&due, "33"),
                DueStatus::Scheduled | DueStatus::Undated => due,
            };

            let id = self.paint(&id, "36");
            let title = if task.completed {
                self.paint(&task.title, "2")
            } else {
                task.title.clone()
            };

            rows.push(vec![
                id,
                due,
                task.priority.label().to_string(),
                title,
                status.to_string(),
            ]);
        }

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, stats))]
    pub fn print_stats(&mut self, stats: Stats) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "{} pending, {} done.", stats.pending, stats.done)?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

pub fn short_id(id: &TaskId) -> String {
    id.as_str().chars().take(8).collect()
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
