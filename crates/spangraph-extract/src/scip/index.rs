//! JSON form of a SCIP-like index emitted by the sidecar indexer

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScipIndex {
    #[serde(default)]
    pub documents: Vec<ScipDocument>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScipDocument {
    #[serde(alias = "relativePath")]
    pub relative_path: PathBuf,
    #[serde(default)]
    pub symbols: Vec<SymbolInformation>,
    #[serde(default)]
    pub occurrences: Vec<Occurrence>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolInformation {
    /// Global symbol string, e.g. ``scip-python python app 0.1 `app.services`/UserService#``.
    #[serde(alias = "name")]
    pub symbol: String,
    #[serde(default, alias = "displayName")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub kind: Option<serde_json::Value>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl SymbolInformation {
    pub fn name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| display_name(&self.symbol))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Relationship {
    pub symbol: String,
    #[serde(default, alias = "isReference")]
    pub is_reference: bool,
    #[serde(default, alias = "isImplementation")]
    pub is_implementation: bool,
    #[serde(default, alias = "isTypeDefinition")]
    pub is_type_definition: bool,
    #[serde(default, alias = "isDefinition")]
    pub is_definition: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Occurrence {
    /// `[line, start_char, end_char]` or `[start_line, start_char, end_line, end_char]`.
    pub range: Vec<u32>,
    pub symbol: String,
    #[serde(default, alias = "symbolRoles")]
    pub symbol_roles: SymbolRoles,
}

impl Occurrence {
    pub fn start(&self) -> Option<(u32, u32)> {
        match self.range.as_slice() {
            [line, character, ..] => Some((*line, *character)),
            _ => None,
        }
    }

    pub fn is_local(&self) -> bool {
        self.symbol.starts_with("local ")
    }
}

/// Occurrence roles, given either as role names or as the SCIP bitmask.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum SymbolRoles {
    Mask(u32),
    Names(Vec<String>),
}

impl Default for SymbolRoles {
    fn default() -> Self {
        SymbolRoles::Mask(0)
    }
}

impl SymbolRoles {
    const DEFINITION: u32 = 0x1;
    const IMPORT: u32 = 0x2;
    const TEST: u32 = 0x20;

    fn has(&self, bit: u32, name: &str) -> bool {
        match self {
            SymbolRoles::Mask(mask) => mask & bit != 0,
            SymbolRoles::Names(names) => names.iter().any(|n| n.eq_ignore_ascii_case(name)),
        }
    }

    pub fn is_definition(&self) -> bool {
        self.has(Self::DEFINITION, "definition")
    }

    pub fn is_import(&self) -> bool {
        self.has(Self::IMPORT, "import")
    }

    pub fn is_test(&self) -> bool {
        self.has(Self::TEST, "test")
    }
}

/// Last descriptor of a symbol string, without suffix punctuation:
/// ``... `app.services`/UserService#login().`` -> `login`.
pub fn display_name(symbol: &str) -> &str {
    let mut name = symbol.trim_end_matches(['.', '#', '/', ':', '!']);
    if name.ends_with(')') {
        if let Some(open) = name.rfind('(') {
            name = &name[..open];
        }
    }
    if let Some(inner) = name.strip_suffix('`') {
        return inner.rfind('`').map_or(inner, |i| &inner[i + 1..]);
    }
    let start = name
        .rfind(['/', '#', '.', ' ', '(', '[', ':', '`'])
        .map_or(0, |i| i + 1);
    &name[start..]
}
