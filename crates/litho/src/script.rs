//! Script compilation: section splitting, header parsing, contextual
//! inheritance, imports with layer remapping, and library assembly.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use indexmap::IndexMap;
use regex::Regex;
use tracing::debug;

use crate::{
    cache,
    error::{CompileResult, Error},
    eval::Evaluator,
    geom::{GeomBackend, Shape, TextSize},
    hash::short_hash,
    library::{Cell, Library},
    tree::CallTree,
    value::Value,
};

/// Compile configuration.
///
/// `timestamp` pins the `__DATE__`/`__TIME__` magic bindings (and the emit
/// timestamps) so identical inputs produce identical outputs; `None` reads
/// the wall clock.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub force_rerender: bool,
    pub timestamp: Option<chrono::NaiveDateTime>,
}

/// Recursive dependency record: every imported path maps to the imports it
/// made itself. Drives cache freshness checks.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub(crate) struct DependencyMap(pub BTreeMap<PathBuf, DependencyMap>);

/// A named parametric shape: declared argument names plus the pristine,
/// never-evaluated body tree.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ShapeDef {
    pub args: Vec<String>,
    pub(crate) tree: CallTree,
}

/// One section's contribution to a parametric symbol (one entry per layer).
///
/// `route` is the namespace path from the script holding this entry down to
/// the script that defined it; `make` evaluates the body in the defining
/// script's context and registers the produced cell in every library along
/// the route.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub(crate) struct ParamSymbolEntry {
    pub name_pattern: String,
    pub args: Vec<String>,
    pub tree: CallTree,
    pub layer: Option<u16>,
    pub route: Vec<String>,
}

/// A parsed script section: its header, body, inherited context and the
/// pristine body tree.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub(crate) struct Section {
    pub head: String,
    pub body: String,
    pub symbol: Option<String>,
    pub layer: Option<u16>,
    pub args: Option<Vec<String>>,
    pub is_parametric: Option<bool>,
    pub clean_name: Option<String>,
    pub name_pattern: Option<String>,
    pub tree: CallTree,
}

/// A compiled script: the result of parsing one `.pls` file (or source
/// string) and everything it imported.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Script {
    pub path: PathBuf,
    /// Five-digit fingerprint over the script text and its imports.
    pub hash: String,
    pub(crate) sections: Vec<Section>,
    pub(crate) shape_dict: IndexMap<String, ShapeDef>,
    pub(crate) param_sym_dict: IndexMap<String, Vec<ParamSymbolEntry>>,
    pub(crate) import_dict: IndexMap<String, Script>,
    /// Layer number to optional layer name; a bijection on the named part.
    pub layer_dict: BTreeMap<u16, Option<String>>,
    /// Top-level assignments, folded into scopes with `resolve_globals`.
    pub globals: IndexMap<String, Value>,
    pub library: Library,
    pub(crate) dependencies: DependencyMap,
    /// Whether this instance was restored from the result cache.
    #[serde(skip)]
    pub loaded_from_cache: bool,
}

fn header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(SHAPE|SYMBOL|LAYER|IMPORT)\b.*$").expect("static regex"))
}

/// Drops every line whose first non-whitespace character is `#`.
fn strip_comments(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Identifiers match `[A-Za-z_][A-Za-z0-9_]*`.
fn check_valid_name(name: &str) -> CompileResult<()> {
    let mut chars = name.chars();
    let head_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if head_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(Error::parse(format!(
            "names must contain only alphanumeric characters and underscores: {name:?}"
        )))
    }
}

impl Script {
    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            hash: "00000".to_owned(),
            ..Self::default()
        }
    }

    /// The file name up to its first dot; the `__FILENAME__` magic binding.
    pub(crate) fn file_stem(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy())
            .and_then(|n| n.split('.').next().map(str::to_owned))
            .unwrap_or_default()
    }

    /// Compiles a `.pls` file, loading the result cache when it is fresh and
    /// persisting it after a successful compile.
    pub fn compile_file(path: &Path, geom: &dyn GeomBackend, opts: &CompileOptions) -> CompileResult<Self> {
        let path = std::path::absolute(path)
            .map_err(|e| Error::parse(format!("cannot resolve {}: {e}", path.display())))?;
        if let Some(mut script) = cache::try_load(&path, opts) {
            debug!(path = %path.display(), "loaded from cache");
            script.loaded_from_cache = true;
            return Ok(script);
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| Error::parse(format!("cannot read {}: {e}", path.display())))?;
        debug!(path = %path.display(), "rendering");
        let script = Self::render(&strip_comments(&text), path, geom, opts)?;
        cache::store(&script);
        Ok(script)
    }

    /// Compiles script source directly; no cache involvement. Imports are
    /// resolved relative to the current directory.
    pub fn compile_source(source: &str, geom: &dyn GeomBackend, opts: &CompileOptions) -> CompileResult<Self> {
        Self::render(&strip_comments(source), PathBuf::new(), geom, opts)
    }

    fn render(text: &str, path: PathBuf, geom: &dyn GeomBackend, opts: &CompileOptions) -> CompileResult<Self> {
        let mut script = Self::empty(path);

        let headers: Vec<(usize, usize, String)> = header_regex()
            .find_iter(text)
            .map(|m| (m.start(), m.end(), m.as_str().to_owned()))
            .collect();
        for (index, (_, end, head)) in headers.iter().enumerate() {
            let body_end = headers.get(index + 1).map_or(text.len(), |next| next.0);
            let body = &text[*end..body_end];
            script.update_hash(text);
            let section = Section::build(&mut script, head, body, geom, opts)?;
            script.sections.push(section);
        }
        // final fingerprint covers every import
        script.update_hash(text);
        script.build_legend(geom)?;
        Ok(script)
    }

    fn update_hash(&mut self, text: &str) {
        let import_hashes: Vec<String> = self.import_dict.values().map(|s| s.hash.clone()).collect();
        self.hash = short_hash(text, &import_hashes);
    }

    /// Returns the number bound to `name`, else binds it: to `default` when
    /// given and free, else to the lowest unused number below 1000.
    pub(crate) fn lookup_layer_num(&mut self, name: &str, default: Option<u16>) -> CompileResult<u16> {
        for (num, bound) in &self.layer_dict {
            if bound.as_deref() == Some(name) {
                return Ok(*num);
            }
        }
        let num = match default {
            Some(d) => {
                if let Some(Some(existing)) = self.layer_dict.get(&d) {
                    return Err(Error::layer_conflict(format!(
                        "layer number {d} is already bound to {existing:?}, cannot bind {name:?}"
                    )));
                }
                d
            }
            None => (0..1000u16)
                .find(|i| !self.layer_dict.contains_key(i))
                .ok_or_else(|| Error::domain("no free layer number below 1000"))?,
        };
        self.layer_dict.insert(num, Some(name.to_owned()));
        Ok(num)
    }

    /// Navigates an import route (`[]` is the script itself).
    pub(crate) fn script_at_mut(&mut self, route: &[String]) -> CompileResult<&mut Self> {
        let mut current = self;
        for ns in route {
            current = current
                .import_dict
                .get_mut(ns)
                .ok_or_else(|| Error::parse(format!("internal: import namespace {ns:?} vanished")))?;
        }
        Ok(current)
    }

    /// Rebuilds the `legend` cell: one `num: name` text line per named
    /// layer, ascending, stacked upwards, everything on layer 255.
    fn build_legend(&mut self, geom: &dyn GeomBackend) -> CompileResult<()> {
        let named: Vec<(u16, String)> = self
            .layer_dict
            .iter()
            .filter_map(|(num, name)| name.as_ref().map(|n| (*num, n.clone())))
            .collect();
        if named.is_empty() {
            return Ok(());
        }
        self.library.cells.shift_remove("legend");
        let mut acc = Shape::default();
        for (num, name) in named {
            let line = geom.text(&format!("{num}: {name}"), TextSize::Height(8.0))?;
            // west-anchor the line at the origin
            let line = match line.bounding_box() {
                Some(bb) => geom.translate(&line, -bb.min.x, -0.5 * (bb.min.y + bb.max.y)),
                None => line,
            };
            acc = geom.translate(&acc, 0.0, 10.0);
            acc = if acc.is_empty() { line } else { geom.union(&acc, &line)? };
        }
        let mut cell = Cell::default();
        cell.add_shape(&acc, 255);
        self.library.insert("legend".to_owned(), cell);
        Ok(())
    }
}

/// Inheritable context snapshot taken from the preceding section.
#[derive(Default, Clone)]
struct Inherited {
    symbol: Option<String>,
    layer: Option<u16>,
    args: Option<Vec<String>>,
    is_parametric: Option<bool>,
    clean_name: Option<String>,
    name_pattern: Option<String>,
}

impl Section {
    fn build(
        script: &mut Script,
        head: &str,
        body: &str,
        geom: &dyn GeomBackend,
        opts: &CompileOptions,
    ) -> CompileResult<Self> {
        let inherited = script.sections.last().map_or_else(Inherited::default, |prev| Inherited {
            symbol: prev.symbol.clone(),
            layer: prev.layer,
            args: prev.args.clone(),
            is_parametric: prev.is_parametric,
            clean_name: prev.clean_name.clone(),
            name_pattern: prev.name_pattern.clone(),
        });

        let mut section = Self {
            head: head.trim().to_owned(),
            body: body.trim().to_owned(),
            symbol: None,
            layer: None,
            args: None,
            is_parametric: None,
            clean_name: None,
            name_pattern: None,
            tree: CallTree::default(),
        };

        let words: Vec<String> = section.head.split_whitespace().map(str::to_owned).collect();
        let keyword = words[0].as_str();
        let mut shape_name = None;

        match keyword {
            "IMPORT" => import_section(script, &words, geom, opts)?,
            "SHAPE" => {
                let (name, args) = parse_call_header(&words[1..].join(" "))
                    .ok_or_else(|| Error::parse(format!("invalid SHAPE statement: {:?}", section.head)))?;
                check_valid_name(&name)?;
                for arg in &args {
                    check_valid_name(arg)?;
                }
                shape_name = Some(name);
                section.args = Some(args);
            }
            "SYMBOL" => parse_symbol_header(&mut section, &words[1..].join(" "))?,
            "LAYER" => parse_layer_header(script, &mut section, &words)?,
            _ => return Err(Error::parse(format!("invalid section keyword {keyword:?}"))),
        }

        // contextual inheritance: unset attributes come from the nearest
        // preceding section that set them
        if section.is_parametric.is_none() {
            section.is_parametric = inherited.is_parametric;
        }
        if section.clean_name.is_none() {
            section.clean_name = inherited.clean_name;
        }
        if section.name_pattern.is_none() {
            section.name_pattern = inherited.name_pattern;
        }
        if section.args.is_none() {
            section.args = inherited.args;
        }
        if section.symbol.is_none() {
            section.symbol = inherited.symbol;
        }
        if section.layer.is_none() {
            section.layer = inherited.layer;
        }

        // build the pristine body tree and evaluate a clone of it
        section.tree = CallTree::parse(&section.body)?;
        let mut work = section.tree.clone();
        let outcome = Evaluator::new(script, geom, opts).evaluate(&mut work, true);

        let is_shape = keyword == "SHAPE";
        let is_parametric = section.is_parametric == Some(true);
        match outcome {
            Ok(()) => {}
            Err(err) => {
                // SHAPE bodies and parametric symbol entries contain free
                // parameters; their evaluation failures are expected and the
                // section is stored un-evaluated
                if is_shape || is_parametric {
                    debug!(head = %section.head, %err, "section stored un-evaluated");
                } else {
                    return Err(err);
                }
            }
        }

        if let Some(name) = shape_name {
            script.shape_dict.insert(
                name,
                ShapeDef {
                    args: section.args.clone().unwrap_or_default(),
                    tree: section.tree.clone(),
                },
            );
        } else if is_parametric {
            let clean = section.clean_name.clone().expect("parametric sections carry a clean name");
            script.param_sym_dict.entry(clean).or_default().push(ParamSymbolEntry {
                name_pattern: section
                    .name_pattern
                    .clone()
                    .expect("parametric sections carry a pattern"),
                args: section.args.clone().unwrap_or_default(),
                tree: section.tree.clone(),
                layer: section.layer,
                route: Vec::new(),
            });
        } else if let Some(refs) = work.ref_results() {
            let symbol = section
                .symbol
                .as_deref()
                .ok_or_else(|| Error::parse("cell references found without a symbol context"))?;
            let cell = script.library.get_or_create(symbol);
            for reference in refs {
                cell.add_reference(reference);
            }
        } else if let Some(shape) = work.shape_result() {
            let symbol = section
                .symbol
                .as_deref()
                .ok_or_else(|| Error::parse("shapes found without a symbol context"))?;
            let layer = section
                .layer
                .ok_or_else(|| Error::parse("shapes found without a layer context"))?;
            script.library.get_or_create(symbol).add_shape(shape, layer);
        } else if let Some(assignments) = work.assignment_results() {
            for (name, value) in assignments {
                script.globals.insert(name, value);
            }
        }

        Ok(section)
    }
}

/// Parses `name(arg1, arg2, ...)` headers.
fn parse_call_header(text: &str) -> Option<(String, Vec<String>)> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^([^()]+)\(([^()]*)\)$").expect("static regex"));
    let caps = re.captures(text.trim())?;
    let name = caps[1].trim().to_owned();
    let args: Vec<String> = caps[2]
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_owned)
        .collect();
    Some((name, args))
}

fn parse_symbol_header(section: &mut Section, name: &str) -> CompileResult<()> {
    let name = name.trim();
    if !name.contains('(') && !name.contains(')') {
        check_valid_name(name)?;
        section.is_parametric = Some(false);
        section.symbol = Some(name.to_owned());
        return Ok(());
    }

    let Some((pattern, args)) = parse_call_header(name) else {
        return Err(Error::parse(format!("invalid SYMBOL statement: {name:?}")));
    };
    for arg in &args {
        check_valid_name(arg)?;
    }

    let mut clean = String::new();
    let mut skip = false;
    for c in pattern.chars() {
        if c == '{' {
            skip = true;
        }
        if !skip {
            clean.push(c);
        }
        if c == '}' {
            skip = false;
        }
    }
    check_valid_name(&clean)?;

    if !pattern.contains('{') {
        // zero-placeholder patterns are ordinary cells named verbatim
        section.is_parametric = Some(false);
        section.symbol = Some(pattern);
    } else if args.is_empty() {
        return Err(Error::parse(format!(
            "parametric symbol pattern {pattern:?} declares no parameters"
        )));
    } else {
        section.is_parametric = Some(true);
        section.symbol = None;
        section.clean_name = Some(clean);
        section.name_pattern = Some(pattern);
        section.args = Some(args);
    }
    Ok(())
}

fn parse_layer_header(script: &mut Script, section: &mut Section, words: &[String]) -> CompileResult<()> {
    let (num, name): (Option<i64>, Option<&str>) = match words {
        [_, arg] => match arg.parse::<i64>() {
            Ok(n) => (Some(n), None),
            Err(_) => (None, Some(arg.as_str())),
        },
        [_, num, name] => {
            let n = num
                .parse::<i64>()
                .map_err(|_| Error::parse(format!("invalid LAYER statement: {:?}", section.head)))?;
            (Some(n), Some(name.as_str()))
        }
        _ => return Err(Error::parse(format!("invalid LAYER statement: {:?}", section.head))),
    };

    if let Some(n) = num
        && !(0..=255).contains(&n)
    {
        return Err(Error::domain(format!("layer number {n} exceeds the 0..255 range")));
    }
    let num = num.map(|n| n as u16);

    let layer = match name {
        Some(name) => {
            check_valid_name(name)?;
            let looked_up = script.lookup_layer_num(name, num)?;
            if let Some(wanted) = num
                && wanted != looked_up
            {
                return Err(Error::layer_conflict(format!(
                    "wanted to assign layer {name:?} to number {wanted}, but it is bound to {looked_up}"
                )));
            }
            looked_up
        }
        None => {
            let n = num.expect("number-less headers carry a name");
            script.layer_dict.entry(n).or_insert(None);
            n
        }
    };
    if layer > 255 {
        return Err(Error::domain(format!("layer number {layer} exceeds the 0..255 range")));
    }
    section.layer = Some(layer);
    Ok(())
}

fn import_section(
    script: &mut Script,
    words: &[String],
    geom: &dyn GeomBackend,
    opts: &CompileOptions,
) -> CompileResult<()> {
    if !(words.len() == 2 || (words.len() == 4 && words[2] == "AS")) {
        return Err(Error::parse(format!("invalid IMPORT statement: {:?}", words.join(" "))));
    }
    let import_file = &words[1];
    let namespace = if words.len() == 4 {
        words[3].clone()
    } else {
        // default namespace: file name without its final extension,
        // remaining dots become underscores
        let base = import_file.rsplit('/').next().unwrap_or(import_file);
        let parts: Vec<&str> = base.split('.').collect();
        parts[..parts.len().saturating_sub(1)].join("_")
    };
    check_valid_name(&namespace)?;

    let import_path = script
        .path
        .parent()
        .map_or_else(|| PathBuf::from(import_file), |dir| dir.join(import_file));
    match import_path.extension().and_then(|e| e.to_str()) {
        Some("pls") => {}
        other => {
            return Err(Error::parse(format!(
                "unsupported import file format {:?}",
                other.unwrap_or("")
            )));
        }
    }

    debug!(path = %import_path.display(), ns = %namespace, "importing");
    let child = Script::compile_file(&import_path, geom, opts)?;
    let import_path = std::path::absolute(&import_path)
        .map_err(|e| Error::parse(format!("cannot resolve {}: {e}", import_path.display())))?;
    script
        .dependencies
        .0
        .insert(import_path.clone(), child.dependencies.clone());

    // remap layers by name: where the importer already binds the name to a
    // different number, imported polygons move to the importer's number
    let mut layer_map: Vec<(u16, u16)> = Vec::new();
    for (num, name) in child.layer_dict.clone() {
        if let Some(name) = name {
            let to = script.lookup_layer_num(&name, Some(num))?;
            if to != num {
                layer_map.push((num, to));
            }
        }
    }

    for (name, cell) in &child.library.cells {
        if script.library.contains(name) {
            continue;
        }
        let mut cell = cell.clone();
        for poly in &mut cell.polygons {
            if let Some((_, to)) = layer_map.iter().find(|(from, _)| *from == poly.layer) {
                poly.layer = *to;
            }
        }
        script.library.insert(name.clone(), cell);
    }

    for (clean, entries) in &child.param_sym_dict {
        if script.param_sym_dict.contains_key(clean) {
            return Err(Error::duplicate_symbol(clean));
        }
        let mut merged = entries.clone();
        for entry in &mut merged {
            entry.route.insert(0, namespace.clone());
        }
        script.param_sym_dict.insert(clean.clone(), merged);
    }

    script.import_dict.insert(namespace, child);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_lines_are_stripped() {
        let text = "LAYER 1\n  # a comment\nSYMBOL x\n#another\nrect(dx=1, dy=1)";
        let stripped = strip_comments(text);
        assert!(!stripped.contains("comment"));
        assert!(stripped.contains("SYMBOL x"));
    }

    #[test]
    fn call_headers_parse() {
        let (name, args) = parse_call_header("pad(x, y)").unwrap();
        assert_eq!(name, "pad");
        assert_eq!(args, vec!["x".to_owned(), "y".to_owned()]);
        let (_, empty) = parse_call_header("pad()").unwrap();
        assert!(empty.is_empty());
        assert!(parse_call_header("pad(x").is_none());
    }

    #[test]
    fn valid_names() {
        assert!(check_valid_name("abc_1").is_ok());
        assert!(check_valid_name("1abc").is_err());
        assert!(check_valid_name("a-b").is_err());
        assert!(check_valid_name("").is_err());
    }
}
