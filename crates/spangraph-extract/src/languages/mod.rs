//! Language detection and import statement patterns

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Rust,
    Go,
    Java,
    Kotlin,
    CSharp,
    C,
    Cpp,
    Dart,
    Ruby,
    Unknown,
}

impl Language {
    /// Detect the language of a file from its extension.
    pub fn from_path(path: &Path) -> Self {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return Language::Unknown;
        };
        match ext {
            "py" | "pyi" => Language::Python,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" | "tsx" | "mts" | "cts" => Language::TypeScript,
            "rs" => Language::Rust,
            "go" => Language::Go,
            "java" => Language::Java,
            "kt" | "kts" => Language::Kotlin,
            "cs" => Language::CSharp,
            "c" | "h" => Language::C,
            "cpp" | "cc" | "cxx" | "c++" | "hpp" | "hh" | "hxx" => Language::Cpp,
            "dart" => Language::Dart,
            "rb" => Language::Ruby,
            _ => Language::Unknown,
        }
    }

    /// LSP `languageId` for `textDocument/didOpen`.
    pub fn language_id(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Rust => "rust",
            Language::Go => "go",
            Language::Java => "java",
            Language::Kotlin => "kotlin",
            Language::CSharp => "csharp",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Dart => "dart",
            Language::Ruby => "ruby",
            Language::Unknown => "plaintext",
        }
    }
}

/// One import statement found in a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSite {
    /// Byte offset of the statement.
    pub offset: usize,
    /// Module names the statement may refer to, most specific first.
    pub modules: Vec<String>,
    /// Individually imported item names.
    pub names: Vec<String>,
}

static PY_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*from[ \t]+(\.*[\w.]*)[ \t]+import[ \t]+\(?([^)\n#]*)").unwrap()
});
static PY_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*import[ \t]+([\w.]+(?:[ \t]+as[ \t]+\w+)?(?:[ \t]*,[ \t]*[\w.]+(?:[ \t]+as[ \t]+\w+)?)*)").unwrap());
static JS_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*(?:import|export)[ \t]+(?:type[ \t]+)?(?:([\w*{}\s,$]+?)[ \t]+from[ \t]+)?['"]([^'"]+)['"]"#).unwrap()
});
static JS_REQUIRE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\brequire\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap());
static RUST_USE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:pub(?:\([^)]*\))?[ \t]+)?use[ \t]+([\w:]+?)(?:::\{([^}]*)\})?[ \t]*;").unwrap()
});
static RUST_MOD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*(?:pub(?:\([^)]*\))?[ \t]+)?mod[ \t]+(\w+)[ \t]*;").unwrap());
static GO_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^[ \t]*import[ \t]+(?:[\w.]+[ \t]+)?"([^"]+)""#).unwrap());
static GO_IMPORT_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\bimport[ \t]*\((.*?)\)").unwrap());
static QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]+)""#).unwrap());
static JVM_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*import[ \t]+(?:static[ \t]+)?([\w.]+?)(\.\*)?[ \t]*;?[ \t]*$").unwrap()
});
static CSHARP_USING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*using[ \t]+(?:static[ \t]+)?([\w.]+)[ \t]*;").unwrap());
static C_INCLUDE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^[ \t]*#[ \t]*include[ \t]*[<"]([^>"]+)[>"]"#).unwrap());
static DART_DIRECTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*(?:import|export|part)[ \t]+['"]([^'"]+)['"]"#).unwrap()
});
static RUBY_REQUIRE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^[ \t]*require(?:_relative)?[ \t(]+['"]([^'"]+)['"]"#).unwrap()
});

/// Find import-like statements in `text` using the patterns of `language`.
pub fn find_imports(language: Language, text: &str) -> Vec<ImportSite> {
    let mut sites = Vec::new();
    match language {
        Language::Python => {
            for caps in PY_FROM.captures_iter(text) {
                let names = split_names(group(&caps, 2));
                push_site(&mut sites, &caps, module_names(group(&caps, 1), &['.']), names);
            }
            for caps in PY_IMPORT.captures_iter(text) {
                for item in group(&caps, 1).split(',') {
                    let module = item.split_whitespace().next().unwrap_or_default();
                    push_site(&mut sites, &caps, module_names(module, &['.']), Vec::new());
                }
            }
        }
        Language::JavaScript | Language::TypeScript => {
            for caps in JS_IMPORT.captures_iter(text) {
                let names = split_names(&group(&caps, 1).replace(['{', '}'], ","));
                push_site(&mut sites, &caps, module_names(group(&caps, 2), &['/']), names);
            }
            for caps in JS_REQUIRE.captures_iter(text) {
                push_site(&mut sites, &caps, module_names(group(&caps, 1), &['/']), Vec::new());
            }
        }
        Language::Rust => {
            for caps in RUST_USE.captures_iter(text) {
                let path = group(&caps, 1);
                let mut modules = module_names(path, &[':']);
                let names = match caps.get(2) {
                    Some(braced) => split_names(braced.as_str())
                        .into_iter()
                        .filter_map(|n| n.rsplit("::").next().map(str::to_string))
                        .filter(|n| n != "self")
                        .collect(),
                    None => {
                        // `use a::b::item;` names an item of module `b`.
                        let segments: Vec<&str> =
                            path.split("::").filter(|s| !s.is_empty()).collect();
                        if let [.., parent, _] = segments.as_slice() {
                            if !is_rust_path_keyword(parent) {
                                modules.push(parent.to_string());
                            }
                        }
                        segments.last().map(|s| vec![s.to_string()]).unwrap_or_default()
                    }
                };
                modules.retain(|m| !is_rust_path_keyword(m));
                push_site(&mut sites, &caps, modules, names);
            }
            for caps in RUST_MOD.captures_iter(text) {
                push_site(&mut sites, &caps, vec![group(&caps, 1).to_string()], Vec::new());
            }
        }
        Language::Go => {
            for caps in GO_IMPORT.captures_iter(text) {
                push_site(&mut sites, &caps, module_names(group(&caps, 1), &['/']), Vec::new());
            }
            for block in GO_IMPORT_BLOCK.captures_iter(text) {
                let Some(body) = block.get(1) else { continue };
                for caps in QUOTED.captures_iter(body.as_str()) {
                    let offset = body.start() + caps.get(0).map_or(0, |m| m.start());
                    sites.push(ImportSite {
                        offset,
                        modules: module_names(group(&caps, 1), &['/']),
                        names: Vec::new(),
                    });
                }
            }
        }
        Language::Java | Language::Kotlin => {
            for caps in JVM_IMPORT.captures_iter(text) {
                let path = group(&caps, 1);
                if caps.get(2).is_some() {
                    push_site(&mut sites, &caps, module_names(path, &['.']), Vec::new());
                } else {
                    // `import a.b.Item;` names a class of package `b`.
                    let (package, item) = path.rsplit_once('.').unwrap_or(("", path));
                    let names = vec![item.to_string()];
                    push_site(&mut sites, &caps, module_names(package, &['.']), names);
                }
            }
        }
        Language::CSharp => {
            for caps in CSHARP_USING.captures_iter(text) {
                push_site(&mut sites, &caps, module_names(group(&caps, 1), &['.']), Vec::new());
            }
        }
        Language::C | Language::Cpp => {
            for caps in C_INCLUDE.captures_iter(text) {
                push_site(&mut sites, &caps, module_names(group(&caps, 1), &['/']), Vec::new());
            }
        }
        Language::Dart => {
            for caps in DART_DIRECTIVE.captures_iter(text) {
                let uri = group(&caps, 1);
                let uri = uri.strip_prefix("package:").unwrap_or(uri);
                push_site(&mut sites, &caps, module_names(uri, &['/']), Vec::new());
            }
        }
        Language::Ruby => {
            for caps in RUBY_REQUIRE.captures_iter(text) {
                push_site(&mut sites, &caps, module_names(group(&caps, 1), &['/']), Vec::new());
            }
        }
        Language::Unknown => {}
    }
    sites.sort_by_key(|s| s.offset);
    sites
}

fn group<'t>(caps: &Captures<'t>, i: usize) -> &'t str {
    caps.get(i).map_or("", |m| m.as_str())
}

fn push_site(sites: &mut Vec<ImportSite>, caps: &Captures<'_>, modules: Vec<String>, names: Vec<String>) {
    if modules.is_empty() && names.is_empty() {
        return;
    }
    sites.push(ImportSite {
        offset: caps.get(0).map_or(0, |m| m.start()),
        modules,
        names,
    });
}

fn is_rust_path_keyword(segment: &str) -> bool {
    matches!(segment, "crate" | "self" | "super" | "std" | "core" | "alloc")
}

/// The module a specifier refers to: its last segment, without a file
/// extension (`./services/user.js` -> `user`, `app.models` -> `models`).
fn module_names(spec: &str, separators: &[char]) -> Vec<String> {
    let last = spec
        .rsplit(|c| separators.contains(&c) || c == '/')
        .find(|s| !s.is_empty() && *s != "." && *s != "..")
        .unwrap_or_default();
    let stem = if separators.contains(&'.') {
        last
    } else {
        last.split('.').next().unwrap_or_default()
    };
    if stem.is_empty() || stem == "index" && spec.contains('/') {
        // `./services/index` stands for its directory.
        return spec
            .rsplit('/')
            .nth(1)
            .filter(|s| !s.is_empty() && *s != "." && *s != "..")
            .map(|s| vec![s.to_string()])
            .unwrap_or_default();
    }
    vec![stem.to_string()]
}

/// Split an import list such as `a, b as c, *` into bound item names.
fn split_names(list: &str) -> Vec<String> {
    list.split(',')
        .filter_map(|item| {
            let item = item.trim().trim_start_matches("type ");
            let name = item.split_whitespace().next()?;
            let name = name.trim_matches(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'));
            (!name.is_empty() && name != "*").then(|| name.to_string())
        })
        .collect()
}
