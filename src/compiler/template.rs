//! Fixed WGSL templates and literal placeholder injection.

use std::borrow::Cow;
use std::str::FromStr;

use anyhow::{Result, anyhow, bail};
use serde::{Deserialize, Serialize};

const RAYMARCH_WGSL: &str = include_str!("../../assets/templates/raymarch.wgsl");
const COMPUTE_EVAL_WGSL: &str = include_str!("../../assets/templates/compute_eval.wgsl");

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Placeholder {
    Globals,
    FloatParams,
    Resources,
    Definitions,
    FieldCall,
}

impl Placeholder {
    pub const ALL: [Placeholder; 5] = [
        Placeholder::Globals,
        Placeholder::FloatParams,
        Placeholder::Resources,
        Placeholder::Definitions,
        Placeholder::FieldCall,
    ];

    pub fn marker(self) -> &'static str {
        match self {
            Placeholder::Globals => "/*{GLOBALS}*/",
            Placeholder::FloatParams => "/*{FLOAT_PARAMS}*/",
            Placeholder::Resources => "/*{RESOURCES}*/",
            Placeholder::Definitions => "/*{DEFINITIONS}*/",
            Placeholder::FieldCall => "/*{FIELD_CALL}*/",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    #[default]
    Raymarch,
    Compute,
}

impl TemplateKind {
    pub fn name(self) -> &'static str {
        match self {
            TemplateKind::Raymarch => "raymarch",
            TemplateKind::Compute => "compute",
        }
    }
}

impl FromStr for TemplateKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "raymarch" => Ok(TemplateKind::Raymarch),
            "compute" => Ok(TemplateKind::Compute),
            other => Err(anyhow!("unknown template: {other} (expected raymarch|compute)")),
        }
    }
}

/// Text injected for each placeholder.
#[derive(Clone, Copy, Debug, Default)]
pub struct InjectedParts<'a> {
    pub globals: &'a str,
    pub float_params: &'a str,
    pub resources: &'a str,
    pub definitions: &'a str,
    pub field_call: &'a str,
}

impl<'a> InjectedParts<'a> {
    fn get(&self, p: Placeholder) -> &'a str {
        match p {
            Placeholder::Globals => self.globals,
            Placeholder::FloatParams => self.float_params,
            Placeholder::Resources => self.resources,
            Placeholder::Definitions => self.definitions,
            Placeholder::FieldCall => self.field_call,
        }
    }
}

/// Where one placeholder's text landed in the output (1-based lines).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Section {
    pub placeholder: Placeholder,
    pub start_line: u32,
    pub line_count: u32,
}

#[derive(Clone, Debug, Default)]
pub struct InjectedSource {
    pub source: String,
    pub sections: Vec<Section>,
}

impl InjectedSource {
    pub fn section(&self, placeholder: Placeholder) -> Option<&Section> {
        self.sections.iter().find(|s| s.placeholder == placeholder)
    }
}

#[derive(Clone, Debug)]
pub struct ShaderTemplate {
    name: String,
    text: Cow<'static, str>,
}

impl ShaderTemplate {
    /// Fullscreen raymarcher: `vs_main` + `fs_main`, frame uniform at binding 0.
    pub fn raymarch() -> Self {
        Self {
            name: "raymarch".to_string(),
            text: Cow::Borrowed(RAYMARCH_WGSL),
        }
    }

    /// Batch evaluation: `cs_main` reads points from group 1 binding 0 and
    /// writes `(albedo, distance)` to group 1 binding 1.
    pub fn compute_eval() -> Self {
        Self {
            name: "compute".to_string(),
            text: Cow::Borrowed(COMPUTE_EVAL_WGSL),
        }
    }

    pub fn for_kind(kind: TemplateKind) -> Self {
        match kind {
            TemplateKind::Raymarch => Self::raymarch(),
            TemplateKind::Compute => Self::compute_eval(),
        }
    }

    /// A host-supplied template. Every placeholder must be present.
    pub fn custom(name: &str, text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        let missing: Vec<&str> = Placeholder::ALL
            .iter()
            .map(|p| p.marker())
            .filter(|m| !text.contains(m))
            .collect();
        if !missing.is_empty() {
            bail!("template '{name}' is missing placeholders: {}", missing.join(", "));
        }
        Ok(Self {
            name: name.to_string(),
            text: Cow::Owned(text),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replaces every placeholder verbatim and records where each landed.
    pub fn inject(&self, parts: &InjectedParts) -> InjectedSource {
        let mut source = String::with_capacity(self.text.len() + parts.field_call.len() * 2);
        let mut sections = Vec::new();
        let mut rest: &str = &self.text;
        let mut line = 1_u32;

        loop {
            let next = Placeholder::ALL
                .iter()
                .filter_map(|p| rest.find(p.marker()).map(|pos| (pos, *p)))
                .min_by_key(|(pos, _)| *pos);
            let Some((pos, placeholder)) = next else {
                source.push_str(rest);
                break;
            };

            let before = &rest[..pos];
            source.push_str(before);
            line += count_newlines(before);

            let text = parts.get(placeholder).trim_end_matches('\n');
            sections.push(Section {
                placeholder,
                start_line: line,
                line_count: if text.is_empty() {
                    0
                } else {
                    count_newlines(text) + 1
                },
            });
            source.push_str(text);
            line += count_newlines(text);

            rest = &rest[pos + placeholder.marker().len()..];
        }

        InjectedSource { source, sections }
    }
}

fn count_newlines(s: &str) -> u32 {
    s.bytes().filter(|b| *b == b'\n').count() as u32
}
