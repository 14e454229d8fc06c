use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::domain::{SessionRef, SubjectRef};

static HEAD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?P<marker>[A-Za-z0-9]+):)?(?P<modality>[a-z]+)(?:-(?P<label>[A-Za-z0-9]+))?(?P<rest>(?:_[A-Za-z0-9\-]*)*)$",
    )
    .expect("scan label grammar is a valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SuffixKey {
    Task,
    Acq,
    Ce,
    Rec,
    Dir,
    Run,
    Echo,
}

impl SuffixKey {
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "task" => Some(SuffixKey::Task),
            "acq" => Some(SuffixKey::Acq),
            "ce" => Some(SuffixKey::Ce),
            "rec" => Some(SuffixKey::Rec),
            "dir" => Some(SuffixKey::Dir),
            "run" => Some(SuffixKey::Run),
            "echo" => Some(SuffixKey::Echo),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SuffixKey::Task => "task",
            SuffixKey::Acq => "acq",
            SuffixKey::Ce => "ce",
            SuffixKey::Rec => "rec",
            SuffixKey::Dir => "dir",
            SuffixKey::Run => "run",
            SuffixKey::Echo => "echo",
        }
    }
}

// `Marker` is the `rec-<marker>` entity synthesized from a prefix such as `PU:`.
pub const CANONICAL_ORDER: [Entity; 8] = [
    Entity::Suffix(SuffixKey::Task),
    Entity::Suffix(SuffixKey::Acq),
    Entity::Suffix(SuffixKey::Ce),
    Entity::Suffix(SuffixKey::Rec),
    Entity::Suffix(SuffixKey::Dir),
    Entity::Suffix(SuffixKey::Run),
    Entity::Suffix(SuffixKey::Echo),
    Entity::Marker,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Suffix(SuffixKey),
    Marker,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanNameSpec {
    pub modality: String,
    pub label: Option<String>,
    pub task: Option<String>,
    pub acquisition: Option<String>,
    pub contrast: Option<String>,
    pub reconstruction: Option<String>,
    pub marker: Option<String>,
    pub direction: Option<String>,
    pub run: Option<String>,
    pub echo: Option<String>,
}

impl ScanNameSpec {
    fn slot_mut(&mut self, key: SuffixKey) -> &mut Option<String> {
        match key {
            SuffixKey::Task => &mut self.task,
            SuffixKey::Acq => &mut self.acquisition,
            SuffixKey::Ce => &mut self.contrast,
            SuffixKey::Rec => &mut self.reconstruction,
            SuffixKey::Dir => &mut self.direction,
            SuffixKey::Run => &mut self.run,
            SuffixKey::Echo => &mut self.echo,
        }
    }

    pub fn component(&self, key: SuffixKey) -> Option<&str> {
        let value = match key {
            SuffixKey::Task => &self.task,
            SuffixKey::Acq => &self.acquisition,
            SuffixKey::Ce => &self.contrast,
            SuffixKey::Rec => &self.reconstruction,
            SuffixKey::Dir => &self.direction,
            SuffixKey::Run => &self.run,
            SuffixKey::Echo => &self.echo,
        };
        value.as_deref()
    }

    pub fn entities(&self) -> Vec<String> {
        CANONICAL_ORDER
            .iter()
            .filter_map(|entity| match entity {
                Entity::Suffix(key) => self
                    .component(*key)
                    .map(|value| format!("{}-{value}", key.as_str())),
                Entity::Marker => self.marker.as_ref().map(|marker| format!("rec-{marker}")),
            })
            .collect()
    }

    pub fn suffix_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.modality)
    }

    pub fn file_stem(&self, subject: &SubjectRef, session: &SessionRef) -> String {
        let mut parts = vec![format!("sub-{}", subject.canonical_label)];
        if let Some(label) = &session.canonical_label {
            parts.push(format!("ses-{label}"));
        }
        parts.extend(self.entities());
        parts.push(self.suffix_label().to_string());
        parts.join("_")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum NoMatchReason {
    MissingModality,
    UnknownComponent(String),
    DuplicateComponent(String),
    ConflictingLabel(String),
}

impl fmt::Display for NoMatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoMatchReason::MissingModality => write!(f, "no modality token"),
            NoMatchReason::UnknownComponent(component) => {
                write!(f, "unrecognized component `{component}`")
            }
            NoMatchReason::DuplicateComponent(key) => write!(f, "component `{key}` repeated"),
            NoMatchReason::ConflictingLabel(label) => {
                write!(f, "second free label `{label}`")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decomposition {
    Valid(ScanNameSpec),
    NoMatch(NoMatchReason),
}

impl Decomposition {
    pub fn valid(self) -> Option<ScanNameSpec> {
        match self {
            Decomposition::Valid(spec) => Some(spec),
            Decomposition::NoMatch(_) => None,
        }
    }
}

pub fn decompose(label: &str) -> Decomposition {
    let Some(caps) = HEAD_RE.captures(label.trim()) else {
        return Decomposition::NoMatch(NoMatchReason::MissingModality);
    };

    let mut spec = ScanNameSpec {
        modality: caps["modality"].to_string(),
        label: caps.name("label").map(|m| m.as_str().to_string()),
        marker: caps.name("marker").map(|m| m.as_str().to_ascii_lowercase()),
        ..ScanNameSpec::default()
    };

    let rest = caps.name("rest").map(|m| m.as_str()).unwrap_or_default();
    let tokens: Vec<&str> = rest.split('_').filter(|token| !token.is_empty()).collect();
    for (index, token) in tokens.iter().enumerate() {
        match token.split_once('-') {
            Some((key, value)) => {
                let Some(suffix) = SuffixKey::parse(key) else {
                    return Decomposition::NoMatch(NoMatchReason::UnknownComponent(
                        token.to_string(),
                    ));
                };
                if value.is_empty() || !value.chars().all(|ch| ch.is_ascii_alphanumeric()) {
                    return Decomposition::NoMatch(NoMatchReason::UnknownComponent(
                        token.to_string(),
                    ));
                }
                let slot = spec.slot_mut(suffix);
                if slot.is_some() {
                    return Decomposition::NoMatch(NoMatchReason::DuplicateComponent(
                        suffix.as_str().to_string(),
                    ));
                }
                *slot = Some(value.to_string());
            }
            None => {
                // bare trailing token, e.g. `func_task-rest_bold`
                let is_last = index + 1 == tokens.len();
                if !is_last {
                    return Decomposition::NoMatch(NoMatchReason::UnknownComponent(
                        token.to_string(),
                    ));
                }
                if spec.label.is_some() {
                    return Decomposition::NoMatch(NoMatchReason::ConflictingLabel(
                        token.to_string(),
                    ));
                }
                spec.label = Some(token.to_string());
            }
        }
    }

    Decomposition::Valid(spec)
}
