//! Merging of relabeled lines from many endpoints into one document

use std::collections::HashMap;
use std::fmt;

use super::{comment_line, CommentKind, Line};

/// Final output: metric groups in first-seen order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatedDocument {
    lines: Vec<String>,
}

impl AggregatedDocument {
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Response body: one line per entry and a trailing blank line
    pub fn render(&self) -> String {
        let capacity = self.lines.iter().map(|l| l.len() + 1).sum::<usize>() + 1;
        let mut body = String::with_capacity(capacity);
        for line in &self.lines {
            body.push_str(line);
            body.push('\n');
        }
        body.push('\n');
        body
    }
}

impl fmt::Display for AggregatedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[derive(Default)]
struct MetricGroup {
    help: Option<String>,
    kind: Option<String>,
    samples: Vec<String>,
}

/// Merge lines from every endpoint of a job.
///
/// Groups keep the order in which their metric name was first seen. The first
/// HELP and first TYPE per name win. Samples are sorted as text and a sample
/// equal to the one emitted just before it is dropped, so only byte-identical
/// lines collapse.
pub fn merge<I>(lines: I) -> AggregatedDocument
where
    I: IntoIterator<Item = Line>,
{
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, MetricGroup> = HashMap::new();

    for line in lines {
        let name = line.metric_name();
        if !groups.contains_key(name) {
            order.push(name.to_string());
            groups.insert(name.to_string(), MetricGroup::default());
        }
        let Some(group) = groups.get_mut(name) else {
            continue;
        };

        match &line {
            Line::Comment { kind, text, .. } => {
                let slot = match kind {
                    CommentKind::Help => &mut group.help,
                    CommentKind::Type => &mut group.kind,
                };
                if slot.is_none() {
                    *slot = Some(text.clone());
                }
            }
            Line::Sample(sample) => group.samples.push(sample.to_string()),
        }
    }

    let mut output = Vec::new();
    for name in order {
        let Some(mut group) = groups.remove(&name) else {
            continue;
        };

        if let Some(help) = &group.help {
            output.push(comment_line(CommentKind::Help, &name, help));
        }
        if let Some(kind) = &group.kind {
            output.push(comment_line(CommentKind::Type, &name, kind));
        }

        group.samples.sort();

        let mut prev: Option<&str> = None;
        for sample in &group.samples {
            if prev == Some(sample.as_str()) {
                tracing::warn!(metric = %sample, "Ignoring duplicate metric");
                continue;
            }
            prev = Some(sample.as_str());
            output.push(sample.clone());
        }
    }

    AggregatedDocument { lines: output }
}
