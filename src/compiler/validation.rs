//! Shader backend seam and WGSL validation using the naga library.

use anyhow::{Context, Result, anyhow};

use super::error::Diagnostic;

/// External "compile shading-language source" collaborator.
///
/// Returns the diagnostic list on rejection. Implementations may hand the
/// source to a GPU driver; the bundled [`NagaBackend`] only validates.
pub trait ShaderBackend: Send {
    fn compile(&mut self, source: &str) -> Result<(), Vec<Diagnostic>>;
}

/// Parses and validates WGSL with naga.
#[derive(Debug, Default)]
pub struct NagaBackend;

impl ShaderBackend for NagaBackend {
    fn compile(&mut self, source: &str) -> Result<(), Vec<Diagnostic>> {
        wgsl_diagnostics(source).map(|_| ())
    }
}

/// Parse and validate WGSL, returning located diagnostics on failure.
pub fn wgsl_diagnostics(source: &str) -> Result<naga::Module, Vec<Diagnostic>> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| {
        let mut d = Diagnostic::new(e.message().to_string());
        if let Some(loc) = e.location(source) {
            d.line = Some(loc.line_number);
            d.column = Some(loc.line_position);
        }
        vec![d]
    })?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| {
        let mut message = e.as_inner().to_string();
        let mut cause = std::error::Error::source(e.as_inner());
        while let Some(c) = cause {
            message.push_str(": ");
            message.push_str(&c.to_string());
            cause = std::error::Error::source(c);
        }
        let mut d = Diagnostic::new(message);
        if let Some(loc) = e.location(source) {
            d.line = Some(loc.line_number);
            d.column = Some(loc.line_position);
        }
        vec![d]
    })?;

    Ok(module)
}

/// Validate WGSL source code using naga.
///
/// # Returns
/// The parsed naga Module on success, or an error listing the diagnostics
/// and the numbered source on failure.
pub fn validate_wgsl(source: &str) -> Result<naga::Module> {
    wgsl_diagnostics(source)
        .map_err(|diags| anyhow!("WGSL validation failed:\n{}", format_diagnostics(source, &diags)))
}

/// Validate WGSL and provide context about what generated it.
pub fn validate_wgsl_with_context(source: &str, context: &str) -> Result<naga::Module> {
    validate_wgsl(source).with_context(|| format!("{context} generated invalid WGSL"))
}

/// Format diagnostics followed by the line-numbered source.
pub fn format_diagnostics(source: &str, diags: &[Diagnostic]) -> String {
    let mut output = String::new();
    for d in diags {
        output.push_str(&format!("  {d}\n"));
    }

    output.push_str("\nGenerated WGSL:\n");
    output.push_str("---\n");
    for (line_num, line) in source.lines().enumerate() {
        output.push_str(&format!("{:4} | {}\n", line_num + 1, line));
    }
    output.push_str("---\n");

    output
}

/// Maps lines of generated source back to the node that emitted them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceMap {
    ranges: Vec<OwnedLines>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct OwnedLines {
    start_line: u32,
    owners: Vec<Option<String>>,
}

impl SourceMap {
    /// Records that lines `start_line..` were emitted by `owners`, one entry per line.
    pub fn add_section(&mut self, start_line: u32, owners: Vec<Option<String>>) {
        if !owners.is_empty() {
            self.ranges.push(OwnedLines { start_line, owners });
        }
    }

    /// Node that emitted 1-based `line`, if the line came from a node fragment.
    pub fn node_for_line(&self, line: u32) -> Option<&str> {
        self.ranges.iter().find_map(|r| {
            let idx = line.checked_sub(r.start_line)? as usize;
            r.owners.get(idx)?.as_deref()
        })
    }

    /// Fills in `node_id` for located diagnostics that lack one.
    pub fn attribute(&self, diags: &mut [Diagnostic]) {
        for d in diags.iter_mut().filter(|d| d.node_id.is_none()) {
            if let Some(line) = d.line {
                d.node_id = self.node_for_line(line).map(str::to_string);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_wgsl() {
        let source = r#"
@vertex
fn vs_main(@location(0) position: vec3f) -> @builtin(position) vec4f {
    return vec4f(position, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4f {
    return vec4f(1.0, 0.0, 0.0, 1.0);
}
"#;
        assert!(validate_wgsl(source).is_ok());
        assert!(NagaBackend.compile(source).is_ok());
    }

    #[test]
    fn test_invalid_wgsl_syntax_has_a_line() {
        let source = "\n\nfn invalid() -> { return vec4f(1.0); }";
        let diags = wgsl_diagnostics(source).unwrap_err();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].line, Some(3));
    }

    #[test]
    fn test_invalid_wgsl_type_error() {
        let source = r#"
@fragment
fn fs_main() -> @location(0) vec4f {
    let x: vec4f = 1.0;
    return x;
}
"#;
        assert!(validate_wgsl(source).is_err());
    }

    #[test]
    fn test_validate_with_context() {
        let result = validate_wgsl_with_context("invalid wgsl", "field graph");
        let err_msg = format!("{:#}", result.unwrap_err());
        assert!(err_msg.contains("field graph"));
        assert!(err_msg.contains("   1 | invalid wgsl"));
    }

    #[test]
    fn source_map_attributes_lines() {
        let mut map = SourceMap::default();
        map.add_section(10, vec![Some("a".into()), None, Some("b".into())]);
        map.add_section(20, vec![]);
        assert_eq!(map.node_for_line(10), Some("a"));
        assert_eq!(map.node_for_line(11), None);
        assert_eq!(map.node_for_line(12), Some("b"));
        assert_eq!(map.node_for_line(9), None);
        assert_eq!(map.node_for_line(13), None);

        let mut diags = vec![
            Diagnostic {
                line: Some(12),
                ..Diagnostic::new("bad")
            },
            Diagnostic::new("unlocated"),
        ];
        map.attribute(&mut diags);
        assert_eq!(diags[0].node_id.as_deref(), Some("b"));
        assert_eq!(diags[1].node_id, None);
    }
}
