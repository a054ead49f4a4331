use std::collections::HashMap;
use std::fmt::Write;
use std::time::Duration;

use crate::blueprint::Website;
use crate::executor::TaskExecution;

/// Timings of the tasks that ran during a single invocation.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub execution_times: HashMap<String, TaskExecution>,
}

impl Diagnostics {
    /// Whether the task ran to completion.
    pub fn ran(&self, name: &str) -> bool {
        self.execution_times.contains_key(name)
    }

    /// Wall time from the first task starting to the last one finishing.
    pub fn elapsed(&self) -> Duration {
        let start = self.execution_times.values().map(|t| t.start).min();
        let end = self
            .execution_times
            .values()
            .map(|t| t.start + t.duration)
            .max();

        match (start, end) {
            (Some(start), Some(end)) => end.duration_since(start),
            _ => Duration::ZERO,
        }
    }

    /// One line per task, ordered by start time.
    pub fn summary(&self) -> String {
        let mut ran: Vec<_> = self.execution_times.iter().collect();
        ran.sort_by_key(|(_, t)| t.start);

        let width = ran.iter().map(|(name, _)| name.len()).max().unwrap_or(0);

        let mut out = String::new();
        for (name, exec) in ran {
            let _ = writeln!(out, "  {name:<width$}  {:>10.2?}", exec.duration);
        }
        out
    }

    /// The task graph as a mermaid flowchart, colored by how long each task
    /// took. Tasks that did not run are left grey.
    pub fn render_mermaid(&self, site: &Website) -> String {
        let mut f = String::from("graph LR\n");

        let secs = || self.execution_times.values().map(|t| t.duration.as_secs_f64());
        let min = secs().fold(f64::MAX, f64::min);
        let max = secs().fold(f64::MIN, f64::max);
        let span = if max > min { max - min } else { 1.0 };

        for index in site.graph.node_indices() {
            let name = &site.graph[index].name;
            let escaped = name.replace('"', "\\\"");

            let (label, color) = match self.execution_times.get(name) {
                Some(exec) => {
                    // Green through yellow to red.
                    let t = (exec.duration.as_secs_f64() - min) / span;
                    let (r, g) = if t < 0.5 {
                        ((255.0 * t * 2.0) as u8, 255)
                    } else {
                        (255, (255.0 * (1.0 - (t - 0.5) * 2.0)) as u8)
                    };
                    (format!("{:.2?}", exec.duration), format!("#{r:02X}{g:02X}00"))
                }
                None => ("skipped".to_string(), "#D3D3D3".to_string()),
            };

            let _ = writeln!(f, "    {}[\"{}\\n{}\"]", index.index(), escaped, label);
            let _ = writeln!(f, "    style {} fill:{}", index.index(), color);
        }

        for edge in site.graph.raw_edges() {
            let _ = writeln!(f, "    {} --> {}", edge.source().index(), edge.target().index());
        }

        f
    }
}
