//! Rust source analyzer.
//!
//! Line-based, regex-driven extraction of the public surface of a crate:
//! - `pub struct|enum|trait Name` → `NamedType`
//! - `pub fn name` inside `impl Name { .. }` → `Method`
//! - `pub name: Type` inside `pub struct Name { .. }` → `Property`
//! - preceding `///` lines → the symbol's content
//!
//! Types are qualified with the crate name from the nearest `Cargo.toml`
//! (`mylib.Foo`, `mylib.Foo.bar`). Output documents carry only symbol
//! metadata; revision keys are restored by the pipeline.

use indexmap::IndexMap;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};
use versioned_docs::{keys, AnalysisRequest, Analyzer, Content, Document, Result};

static RE_DOC_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^///\s?(.*)").unwrap());

static RE_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^pub\s+(struct|enum|trait)\s+(\w+)").unwrap());

static RE_IMPL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^impl(?:<[^>]*>)?\s+(?:[\w:]+(?:<[^>]*>)?\s+for\s+)?(\w+)").unwrap()
});

static RE_PUB_FN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^pub\s+(?:(?:const|async|unsafe)\s+)*fn\s+(\w+)").unwrap()
});

static RE_PUB_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^pub\s+(\w+)\s*:").unwrap());

static RE_PACKAGE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^name\s*=\s*"([^"]+)""#).unwrap());

const FALLBACK_CRATE: &str = "crate";

#[derive(Debug, Default)]
pub struct RustAnalyzer;

#[derive(Debug, Clone, PartialEq)]
struct Member {
    name: String,
    kind: &'static str,
    docs: String,
}

#[derive(Debug, Clone, PartialEq)]
struct TypeItem {
    name: String,
    specific_kind: &'static str,
    docs: String,
    members: Vec<Member>,
}

/// Block currently open at depth 1.
enum Scope {
    Struct,
    Impl(String),
    Other,
}

impl Analyzer for RustAnalyzer {
    fn analyze(&self, request: AnalysisRequest) -> Result<Vec<Document>> {
        // crate name → type name → item, in first-seen order
        let mut crates: IndexMap<String, IndexMap<String, TypeItem>> = IndexMap::new();
        let mut pending: Vec<(String, String, Member)> = Vec::new();

        for input in request.inputs.iter().filter(|d| !d.is_revision_marker()) {
            let Some(source) = input.source() else { continue };
            if source.extension().and_then(|e| e.to_str()) != Some("rs") {
                continue;
            }
            let text = input.content().read_string()?;
            let root = input.get_path(keys::REPOSITORY_ROOT);
            let crate_name = crate_name(source, root);
            let (types, impl_members) = parse(&text);
            debug!(source = %source.display(), types = types.len(), "analyzer: parsed");

            let known = crates.entry(crate_name.clone()).or_default();
            for item in types {
                match known.get_mut(&item.name) {
                    Some(existing) => existing.members.extend(item.members),
                    None => {
                        known.insert(item.name.clone(), item);
                    }
                }
            }
            pending.extend(
                impl_members
                    .into_iter()
                    .map(|(owner, member)| (crate_name.clone(), owner, member)),
            );
        }

        // Impl blocks may live in a different file than their type.
        for (crate_name, owner, member) in pending {
            match crates.get_mut(&crate_name).and_then(|t| t.get_mut(&owner)) {
                Some(item) => item.members.push(member),
                None => debug!(owner = %owner, member = %member.name, "analyzer: impl for non-public type skipped"),
            }
        }

        let mut out = Vec::new();
        for (crate_name, types) in &crates {
            for item in types.values() {
                out.extend(symbol_documents(&request.destination_prefix, crate_name, item));
            }
        }
        Ok(out)
    }
}

/// The type document followed by one document per member.
fn symbol_documents(prefix: &Path, crate_name: &str, item: &TypeItem) -> Vec<Document> {
    let qualified = format!("{}.{}", crate_name, item.name);
    let type_dir = prefix.join(&qualified);
    let type_doc = Document::new()
        .with_destination(type_dir.join("index.html"))
        .with_meta(keys::TITLE, item.name.as_str())
        .with_meta(keys::KIND, keys::KIND_NAMED_TYPE)
        .with_meta(keys::SPECIFIC_KIND, item.specific_kind)
        .with_meta(keys::DISPLAY_NAME, item.name.as_str())
        .with_meta(keys::QUALIFIED_NAME, qualified.as_str())
        .with_content(Content::from_text(item.docs.clone()));

    let members: Vec<Document> = item
        .members
        .iter()
        .map(|member| {
            Document::new()
                .with_destination(type_dir.join(&member.name).join("index.html"))
                .with_meta(keys::TITLE, format!("{}.{}", item.name, member.name))
                .with_meta(keys::KIND, member.kind)
                .with_meta(keys::SPECIFIC_KIND, member.kind)
                .with_meta(keys::DISPLAY_NAME, member.name.as_str())
                .with_meta(keys::QUALIFIED_NAME, format!("{}.{}", qualified, member.name))
                .with_meta(keys::CONTAINING_TYPE, type_doc.clone())
                .with_content(Content::from_text(member.docs.clone()))
        })
        .collect();

    let mut out = Vec::with_capacity(members.len() + 1);
    out.push(type_doc.with_children(members.clone()));
    out.extend(members);
    out
}

/// Parse one file. Returns the public types it declares (with their fields)
/// and the public methods of every inherent or trait impl block, keyed by
/// the implementing type's name.
fn parse(input: &str) -> (Vec<TypeItem>, Vec<(String, Member)>) {
    let mut types: Vec<TypeItem> = Vec::new();
    let mut methods: Vec<(String, Member)> = Vec::new();
    let mut docs: Vec<String> = Vec::new();
    let mut depth: usize = 0;
    let mut scope = Scope::Other;

    for raw in input.lines() {
        let line = raw.trim();

        if let Some(caps) = RE_DOC_COMMENT.captures(line) {
            docs.push(caps[1].to_string());
            continue;
        }
        if line.is_empty() || line.starts_with("#[") || line.starts_with("//") {
            continue;
        }

        let text = docs.join("\n").trim().to_string();
        docs.clear();

        match depth {
            0 => {
                if let Some(caps) = RE_TYPE.captures(line) {
                    let name = caps[2].to_string();
                    let specific_kind = match &caps[1] {
                        "struct" => "Struct",
                        "enum" => "Enum",
                        _ => "Trait",
                    };
                    types.push(TypeItem {
                        name,
                        specific_kind,
                        docs: text,
                        members: Vec::new(),
                    });
                    scope = if specific_kind == "Struct" {
                        Scope::Struct
                    } else {
                        Scope::Other
                    };
                } else if let Some(caps) = RE_IMPL.captures(line) {
                    scope = Scope::Impl(caps[1].to_string());
                } else {
                    scope = Scope::Other;
                }
            }
            1 => match &scope {
                Scope::Impl(owner) => {
                    if let Some(caps) = RE_PUB_FN.captures(line) {
                        methods.push((
                            owner.clone(),
                            Member {
                                name: caps[1].to_string(),
                                kind: keys::KIND_METHOD,
                                docs: text,
                            },
                        ));
                    }
                }
                Scope::Struct => {
                    if let (Some(caps), Some(item)) = (RE_PUB_FIELD.captures(line), types.last_mut()) {
                        item.members.push(Member {
                            name: caps[1].to_string(),
                            kind: keys::KIND_PROPERTY,
                            docs: text,
                        });
                    }
                }
                Scope::Other => {}
            },
            _ => {}
        }

        depth = next_depth(depth, line);
    }

    (types, methods)
}

fn next_depth(depth: usize, line: &str) -> usize {
    let code = line.split("//").next().unwrap_or(line);
    let opened = code.matches('{').count();
    let closed = code.matches('}').count();
    (depth + opened).saturating_sub(closed)
}

/// Package name from the nearest `Cargo.toml` between the source file and
/// the repository root.
fn crate_name(source: &Path, root: Option<&Path>) -> String {
    let mut dir: Option<PathBuf> = source.parent().map(Path::to_path_buf);
    while let Some(current) = dir {
        let manifest = current.join("Cargo.toml");
        if manifest.is_file() {
            match fs::read_to_string(&manifest) {
                Ok(text) => {
                    if let Some(caps) = RE_PACKAGE_NAME.captures(&text) {
                        return caps[1].to_string();
                    }
                }
                Err(e) => warn!(manifest = %manifest.display(), error = %e, "analyzer: unreadable manifest"),
            }
        }
        if Some(current.as_path()) == root {
            break;
        }
        dir = current.parent().map(Path::to_path_buf);
    }
    FALLBACK_CRATE.to_string()
}
