//! Text exposition format parsing and relabeling
//!
//! Only the line-oriented subset is understood: `# HELP`, `# TYPE` and
//! `name{labels} value`. Values are carried through verbatim.

use serde::Deserialize;
use std::fmt;

use crate::types::EndpointDescriptor;
use crate::{Error, Result};

pub mod merge;

pub use merge::{merge, AggregatedDocument};

/// Quote character used when a line carries no labels
pub const DEFAULT_QUOTE: char = '"';

/// Name of the synthetic liveness metric
pub const UP_METRIC: &str = "up";

/// What to do with a data line that cannot be parsed
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MalformedLinePolicy {
    /// Fail the whole query
    #[default]
    Reject,
    /// Drop the line with a warning and keep going
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommentKind {
    Help,
    Type,
}

impl CommentKind {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "HELP" => Some(CommentKind::Help),
            "TYPE" => Some(CommentKind::Type),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommentKind::Help => "HELP",
            CommentKind::Type => "TYPE",
        }
    }
}

/// A data line: `name{k=v,...} value`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub name: String,
    /// Label pairs in source order; values keep their surrounding quotes
    pub labels: Vec<(String, String)>,
    /// Quote character found on the first label value
    pub quote: char,
    pub value: String,
}

impl Sample {
    /// Set a label to `value` wrapped in this sample's quote character.
    /// An existing label keeps its position.
    pub fn set_quoted_label(&mut self, key: &str, value: &str) {
        let quoted = format!("{q}{value}{q}", q = self.quote);
        match self.labels.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = quoted,
            None => self.labels.push((key.to_string(), quoted)),
        }
    }

    /// Append the endpoint identity labels
    pub fn add_identity(&mut self, endpoint: &EndpointDescriptor) {
        self.set_quoted_label("instance", &endpoint.name);
        self.set_quoted_label("job", endpoint.job_name());
        self.set_quoted_label("pod_namespace", &endpoint.namespace);
        self.set_quoted_label("pod_ip", &endpoint.address);
    }

    /// Liveness sample for an endpoint
    pub fn up(endpoint: &EndpointDescriptor, quote: char, alive: bool) -> Self {
        let mut sample = Sample {
            name: UP_METRIC.to_string(),
            labels: Vec::with_capacity(4),
            quote,
            value: if alive { "1" } else { "0" }.to_string(),
        };
        sample.add_identity(endpoint);
        sample
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.labels.is_empty() {
            f.write_str("{")?;
            for (i, (key, value)) in self.labels.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{}={}", key, value)?;
            }
            f.write_str("}")?;
        }
        write!(f, " {}", self.value)
    }
}

/// One parsed exposition line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Comment {
        kind: CommentKind,
        metric: String,
        text: String,
    },
    Sample(Sample),
}

impl Line {
    /// Tokenize a raw line.
    ///
    /// Blank lines and comments other than HELP/TYPE yield `Ok(None)`. A data
    /// line is split on its last space into series and value, so a data line
    /// without any space is an error.
    pub fn parse(raw: &str) -> Result<Option<Line>> {
        let raw = raw.trim_end();
        if raw.trim_start().is_empty() {
            return Ok(None);
        }

        if raw.starts_with('#') {
            return Ok(parse_comment(raw));
        }

        parse_sample(raw).map(|sample| Some(Line::Sample(sample)))
    }

    pub fn metric_name(&self) -> &str {
        match self {
            Line::Comment { metric, .. } => metric,
            Line::Sample(sample) => &sample.name,
        }
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Line::Comment { kind, metric, text } => {
                f.write_str(&comment_line(*kind, metric, text))
            }
            Line::Sample(sample) => fmt::Display::fmt(sample, f),
        }
    }
}

pub(crate) fn comment_line(kind: CommentKind, metric: &str, text: &str) -> String {
    if text.is_empty() {
        format!("# {} {}", kind.as_str(), metric)
    } else {
        format!("# {} {} {}", kind.as_str(), metric, text)
    }
}

fn parse_comment(raw: &str) -> Option<Line> {
    let mut tokens = raw.splitn(4, ' ');
    let _marker = tokens.next()?;
    let kind = CommentKind::from_token(tokens.next()?)?;
    let metric = tokens.next().filter(|m| !m.is_empty())?;
    let text = tokens.next().unwrap_or_default();

    Some(Line::Comment {
        kind,
        metric: metric.to_string(),
        text: text.to_string(),
    })
}

fn parse_sample(raw: &str) -> Result<Sample> {
    let (series, value) = raw
        .rsplit_once(' ')
        .ok_or_else(|| Error::malformed(raw, "no space before value"))?;

    let Some((name, blob)) = series.split_once('{') else {
        return Ok(Sample {
            name: series.to_string(),
            labels: Vec::new(),
            quote: DEFAULT_QUOTE,
            value: value.to_string(),
        });
    };

    let blob = blob
        .strip_suffix('}')
        .ok_or_else(|| Error::malformed(raw, "label set not closed"))?;

    let mut labels = Vec::new();
    for pair in split_label_pairs(blob) {
        let (key, val) = pair
            .split_once('=')
            .ok_or_else(|| Error::malformed(raw, format!("label '{}' has no value", pair)))?;
        labels.push((key.to_string(), val.to_string()));
    }

    // Values are assumed symmetrically quoted: the first value's opening
    // character is taken as the quote for the whole line.
    let quote = labels
        .first()
        .and_then(|(_, v)| v.chars().next())
        .unwrap_or(DEFAULT_QUOTE);

    Ok(Sample {
        name: name.to_string(),
        labels,
        quote,
        value: value.to_string(),
    })
}

/// Split a label blob on commas that are not inside a quoted value
fn split_label_pairs(blob: &str) -> Vec<&str> {
    let mut pairs = Vec::new();
    let mut open_quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in blob.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (open_quote, c) {
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => open_quote = None,
            (None, '"' | '\'') => open_quote = Some(c),
            (None, ',') => {
                pairs.push(&blob[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    pairs.push(&blob[start..]);

    pairs.retain(|p| !p.is_empty());
    pairs
}

/// Parse a whole payload, applying `policy` to malformed data lines
pub fn parse_lines<'a, I>(raw_lines: I, policy: MalformedLinePolicy) -> Result<Vec<Line>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut lines = Vec::new();
    for raw in raw_lines {
        match Line::parse(raw) {
            Ok(Some(line)) => lines.push(line),
            Ok(None) => {}
            Err(e) if policy == MalformedLinePolicy::Skip => {
                tracing::warn!(error = %e, "Skipping malformed metric line");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(lines)
}

/// Relabel a successfully fetched payload.
///
/// Every data line gains the endpoint identity labels and a trailing `up 1`
/// sample is appended, quoted like the payload's last data line.
pub fn relabel<'a, I>(
    raw_lines: I,
    endpoint: &EndpointDescriptor,
    policy: MalformedLinePolicy,
) -> Result<Vec<Line>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut lines = parse_lines(raw_lines, policy).map_err(|e| {
        tracing::error!(
            pod = %endpoint.name,
            namespace = %endpoint.namespace,
            error = %e,
            "Failed parsing metrics"
        );
        e
    })?;

    let mut quote = DEFAULT_QUOTE;
    for line in lines.iter_mut() {
        if let Line::Sample(sample) = line {
            sample.add_identity(endpoint);
            quote = sample.quote;
        }
    }

    lines.push(Line::Sample(Sample::up(endpoint, quote, true)));
    Ok(lines)
}

/// The single `up 0` line emitted for an endpoint that could not be scraped
pub fn failure_sample(endpoint: &EndpointDescriptor) -> Line {
    Line::Sample(Sample::up(endpoint, DEFAULT_QUOTE, false))
}
