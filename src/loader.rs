// src/loader.rs
//
// Resource loading: the graph description document and the versioned
// runtime library it asks for.
//
// Fetching and script injection are browser operations (see `wasm.rs`).
// This module holds the parts that decide *what* to load.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{DeckError, DeckResult};

// ═══════════════════════════════════════════════════════════════════════════
// Graph description
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct PatchExport {
    desc: PatchDesc,
}

#[derive(Debug, Deserialize)]
struct PatchDesc {
    meta: PatchMeta,
    #[serde(default)]
    parameters: Vec<ParameterDesc>,
    #[serde(default)]
    inports: Vec<PortDesc>,
    #[serde(default)]
    outports: Vec<PortDesc>,
}

#[derive(Debug, Deserialize)]
struct PatchMeta {
    rnboversion: String,
}

#[derive(Debug, Deserialize)]
struct ParameterDesc {
    #[serde(rename = "paramId")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct PortDesc {
    tag: String,
}

/// The fetched graph description.
///
/// The full document is kept as-is because the runtime consumes it whole;
/// only the fields the front-end needs are pulled out.
#[derive(Debug, Clone)]
pub struct GraphDescription {
    raw: Value,
    runtime_version: String,
    parameter_ids: Vec<String>,
    inport_tags: Vec<String>,
    outport_tags: Vec<String>,
}

impl GraphDescription {
    /// Parse a description document fetched from `url`.
    pub fn from_json(url: &str, text: &str) -> DeckResult<Self> {
        let raw: Value = serde_json::from_str(text).map_err(|e| DeckError::Fetch {
            url: url.to_string(),
            reason: format!("malformed JSON: {e}"),
        })?;
        Self::from_value(url, raw)
    }

    pub fn from_value(url: &str, raw: Value) -> DeckResult<Self> {
        let export = PatchExport::deserialize(&raw).map_err(|e| DeckError::Fetch {
            url: url.to_string(),
            reason: format!("not a graph description: {e}"),
        })?;

        let desc = export.desc;
        Ok(Self {
            runtime_version: desc.meta.rnboversion,
            parameter_ids: desc.parameters.into_iter().map(|p| p.id).collect(),
            inport_tags: desc.inports.into_iter().map(|p| p.tag).collect(),
            outport_tags: desc.outports.into_iter().map(|p| p.tag).collect(),
            raw,
        })
    }

    /// Runtime library version this graph was exported for.
    pub fn runtime_version(&self) -> &str {
        &self.runtime_version
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn parameter_ids(&self) -> &[String] {
        &self.parameter_ids
    }

    pub fn inport_tags(&self) -> &[String] {
        &self.inport_tags
    }

    pub fn outport_tags(&self) -> &[String] {
        &self.outport_tags
    }

    /// Whether the document declares this parameter.
    ///
    /// Documents without a parameter list are treated as declaring
    /// everything, since older exports omit it.
    pub fn declares_parameter(&self, name: &str) -> bool {
        self.parameter_ids.is_empty() || self.parameter_ids.iter().any(|p| p == name)
    }

    pub fn declares_inport(&self, tag: &str) -> bool {
        self.inport_tags.is_empty() || self.inport_tags.iter().any(|t| t == tag)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Runtime library
// ═══════════════════════════════════════════════════════════════════════════

/// Build `<cdn-base>/<url-encoded-version>/<library-filename>`.
pub fn runtime_url(cdn_base: &str, version: &str, file: &str) -> String {
    format!(
        "{}/{}/{}",
        cdn_base.trim_end_matches('/'),
        encode_uri_component(version),
        file.trim_start_matches('/')
    )
}

/// Percent-encode everything except the characters `encodeURIComponent`
/// leaves alone.
pub fn encode_uri_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// What has to happen for a runtime version to be usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeLoad {
    /// The runtime is already in the page (or on its way).
    AlreadyPresent,
    /// Inject a script element with this source.
    Inject { url: String },
}

/// Tracks which runtime versions have been injected into the page.
#[derive(Debug, Clone)]
pub struct RuntimeRegistry {
    cdn_base: String,
    file: String,
    injected: HashSet<String>,
}

impl RuntimeRegistry {
    pub fn new(cdn_base: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            cdn_base: cdn_base.into(),
            file: file.into(),
            injected: HashSet::new(),
        }
    }

    /// Decide how to make `version` available.
    ///
    /// Idempotent: a version is only ever planned for injection once unless
    /// [`mark_failed`](Self::mark_failed) forgets it.
    pub fn plan(&mut self, version: &str, runtime_present: bool) -> RuntimeLoad {
        if runtime_present {
            log::debug!("runtime already present, skipping load of {version}");
            return RuntimeLoad::AlreadyPresent;
        }
        if !self.injected.insert(version.to_string()) {
            return RuntimeLoad::AlreadyPresent;
        }
        let url = runtime_url(&self.cdn_base, version, &self.file);
        log::info!("loading runtime {version} from {url}");
        RuntimeLoad::Inject { url }
    }

    pub fn mark_failed(&mut self, version: &str) {
        self.injected.remove(version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://example.test/export/patch.export.json";

    #[test]
    fn test_parse_description() {
        let text = r#"{
            "desc": {
                "meta": { "rnboversion": "1.3.4" },
                "parameters": [ { "paramId": "play" }, { "paramId": "rotary1" } ],
                "inports": [ { "tag": "seq1" } ],
                "outports": [ { "tag": "step" } ]
            },
            "src": []
        }"#;
        let desc = GraphDescription::from_json(URL, text).unwrap();
        assert_eq!(desc.runtime_version(), "1.3.4");
        assert!(desc.declares_parameter("rotary1"));
        assert!(!desc.declares_parameter("rotary9"));
        assert!(desc.declares_inport("seq1"));
        assert_eq!(desc.outport_tags(), ["step".to_string()]);
        assert!(desc.raw().get("src").is_some());
    }

    #[test]
    fn test_missing_version_is_fetch_error() {
        let result = GraphDescription::from_json(URL, r#"{ "desc": { "meta": {} } }"#);
        assert!(matches!(result, Err(DeckError::Fetch { .. })));

        let result = GraphDescription::from_json(URL, "<html>404</html>");
        assert!(matches!(result, Err(DeckError::Fetch { .. })));
    }

    #[test]
    fn test_runtime_url_encodes_version() {
        assert_eq!(
            runtime_url("https://cdn.test/rnbo/", "1.3.4-beta 2", "rnbo.min.js"),
            "https://cdn.test/rnbo/1.3.4-beta%202/rnbo.min.js"
        );
        assert_eq!(encode_uri_component("a/b?c=d"), "a%2Fb%3Fc%3Dd");
    }

    #[test]
    fn test_runtime_injected_once_per_version() {
        let mut registry = RuntimeRegistry::new("https://cdn.test/rnbo", "rnbo.min.js");

        assert!(matches!(registry.plan("1.3.4", false), RuntimeLoad::Inject { .. }));
        assert_eq!(registry.plan("1.3.4", false), RuntimeLoad::AlreadyPresent);
        assert_eq!(registry.plan("1.2.0", true), RuntimeLoad::AlreadyPresent);

        registry.mark_failed("1.3.4");
        assert_eq!(
            registry.plan("1.3.4", false),
            RuntimeLoad::Inject {
                url: "https://cdn.test/rnbo/1.3.4/rnbo.min.js".to_string()
            }
        );
    }
}
