//! Regex pattern families for the heuristic extractor.
//!
//! Each finder returns `(offset, name)` pairs: where the match sits in the
//! file, and the identifier it should resolve to.

use once_cell::sync::Lazy;
use regex::Regex;

static CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\b(def|fn|function|func|class|struct|interface|new)\s+)?\b([A-Za-z_$][\w$]*)\s*\(").unwrap()
});

static CONFIG_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:config|settings|conf|cfg|CONFIG|SETTINGS|Config|Settings)\.([A-Za-z_]\w*)").unwrap()
});
static CONFIG_INDEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\b(?:config|settings|conf|cfg|CONFIG|SETTINGS)\[\s*['"]([\w.\-]+)['"]\s*\]"#).unwrap()
});
static ENV_VAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?x)
        os\.environ\[\s*['"](\w+)['"]\s*\]
        | os\.environ\.get\(\s*['"](\w+)['"]
        | os\.getenv\(\s*['"](\w+)['"]
        | process\.env\.(\w+)
        | process\.env\[\s*['"](\w+)['"]\s*\]
        | env::var(?:_os)?\(\s*"(\w+)"
        | os\.Getenv\(\s*"(\w+)"
        | System\.getenv\(\s*"(\w+)"
        | ENV\[\s*['"](\w+)['"]\s*\]
        "#,
    )
    .unwrap()
});

static ROUTE_DECORATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*@\w+\.(?:route|get|post|put|delete|patch|api_route)\(\s*['"][^'"]*['"][^\n]*\n(?:[ \t]*@[^\n]*\n)*[ \t]*(?:async[ \t]+)?def[ \t]+(\w+)"#,
    )
    .unwrap()
});
static ROUTE_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"\b\w+\.(?:get|post|put|delete|patch|all|use|route)\(\s*['"][^'"]*['"]\s*,\s*(?:[\w.$]+\s*,\s*)*([A-Za-z_$][\w.$]*)\s*\)"#,
    )
    .unwrap()
});
static ROUTE_AXUM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\.route\(\s*"[^"]*"\s*,\s*(?:get|post|put|delete|patch|any)\(\s*([\w:]+)\s*\)"#).unwrap()
});
static ROUTE_DJANGO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\b(?:re_)?path\(\s*r?['"][^'"]*['"]\s*,\s*([\w.]+)"#).unwrap()
});
static ROUTE_SPRING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"@(?:Get|Post|Put|Delete|Patch|Request)Mapping\b[^\n]*\n(?:[ \t]*@[^\n]*\n)*[ \t]*(?:public|private|protected)?[ \t]*(?:static[ \t]+)?[\w<>\[\],. ]+?[ \t]+(\w+)[ \t]*\(",
    )
    .unwrap()
});

const NOT_CALLS: &[&str] = &[
    "if", "for", "while", "switch", "return", "match", "catch", "elif", "except", "with", "assert",
    "not", "and", "or", "in", "await", "yield", "typeof", "sizeof", "lambda", "print", "super",
];

/// Call sites: `name(` not preceded by a definition keyword.
pub fn calls(text: &str) -> Vec<(usize, &str)> {
    CALL.captures_iter(text)
        .filter_map(|caps| {
            if let Some(keyword) = caps.get(1) {
                if keyword.as_str() != "new" {
                    return None;
                }
            }
            let name = caps.get(2)?;
            (!NOT_CALLS.contains(&name.as_str())).then(|| (name.start(), name.as_str()))
        })
        .collect()
}

/// Configuration key reads: attribute and index access on config objects,
/// and environment variable lookups.
pub fn config_keys(text: &str) -> Vec<(usize, &str)> {
    let mut found: Vec<(usize, &str)> = Vec::new();
    for re in [&*CONFIG_ATTR, &*CONFIG_INDEX] {
        found.extend(re.captures_iter(text).filter_map(|c| {
            let m = c.get(1)?;
            Some((c.get(0)?.start(), m.as_str()))
        }));
    }
    found.extend(ENV_VAR.captures_iter(text).filter_map(|c| {
        let m = c.iter().skip(1).flatten().next()?;
        Some((c.get(0)?.start(), m.as_str()))
    }));
    found.sort_by_key(|&(offset, _)| offset);
    found
}

/// Route registrations: `(offset of the registration, handler name)`.
pub fn routes(text: &str) -> Vec<(usize, &str)> {
    let mut found: Vec<(usize, &str)> = Vec::new();
    for re in [&*ROUTE_DECORATOR, &*ROUTE_CALL, &*ROUTE_AXUM, &*ROUTE_DJANGO, &*ROUTE_SPRING] {
        found.extend(re.captures_iter(text).filter_map(|c| {
            let handler = last_segment(c.get(1)?.as_str());
            (!handler.is_empty()).then(|| (c.get(0).map_or(0, |m| m.start()), handler))
        }));
    }
    found.sort_by_key(|&(offset, _)| offset);
    found
}

/// `views.user_list` -> `user_list`, `handlers::health` -> `health`.
fn last_segment(path: &str) -> &str {
    path.rsplit(['.', ':']).next().unwrap_or(path)
}
