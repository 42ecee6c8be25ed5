//! Tree evaluation: reducing nodes and dispatching function applications.
//!
//! The evaluator threads the mutable script, the geometry backend and the
//! compile options through every operation. Trees are always evaluated as
//! owned clones; the pristine bodies stored in the shape and symbol
//! dictionaries are never mutated, which is what makes repeated
//! instantiation (and the cache) sound.

use indexmap::IndexMap;

use crate::{
    error::{CompileResult, Error},
    geom::{Anchor, GeomBackend, Point, Shape, TextSize, rect_polygon},
    library::{Cell, CellRef, Reference},
    reduce::reduce,
    resolve::{Scope, resolve_tokens, resolve_tree, resolve_value},
    script::{CompileOptions, Script, ShapeDef},
    token::{DeferredCall, Op, Token},
    transform::{Caller, Transform, TranslateArgs},
    tree::{CallTree, Child},
    value::{ImportCall, Value},
};

/// Evaluation context: the script being compiled, the geometry backend and
/// the compile options. Everything the original reached through the tree's
/// root back-reference is threaded through here instead.
pub(crate) struct Evaluator<'a> {
    pub script: &'a mut Script,
    pub geom: &'a dyn GeomBackend,
    pub opts: &'a CompileOptions,
}

impl<'a> Evaluator<'a> {
    pub fn new(script: &'a mut Script, geom: &'a dyn GeomBackend, opts: &'a CompileOptions) -> Self {
        Self { script, geom, opts }
    }

    pub fn geom(&self) -> &dyn GeomBackend {
        self.geom
    }

    pub fn script(&self) -> &Script {
        self.script
    }

    pub fn union(&self, a: &Shape, b: &Shape) -> CompileResult<Shape> {
        if a.is_empty() {
            return Ok(b.clone());
        }
        if b.is_empty() {
            return Ok(a.clone());
        }
        self.geom.union(a, b)
    }

    /// Evaluates a node: children first, then the merged token list is
    /// resolved, reduced and (for named nodes) dispatched.
    pub fn evaluate(&mut self, tree: &mut CallTree, resolve_globals: bool) -> CompileResult<()> {
        self.evaluate_node(tree, resolve_globals)
    }

    fn evaluate_node(&mut self, tree: &mut CallTree, resolve_globals: bool) -> CompileResult<()> {
        // evaluate nested calls, then merge every child's tokens into one
        // flat list
        let mut tokens: Vec<Token> = Vec::new();
        for child in std::mem::take(&mut tree.children) {
            match child {
                Child::Node(mut node) => {
                    if node.literals.is_empty() {
                        self.evaluate_node(&mut node, resolve_globals)?;
                    }
                    tokens.extend(node.literals);
                }
                Child::Tokens(list) => tokens.extend(list),
                Child::Text(_) => {
                    return Err(Error::parse("internal: unlexed text reached evaluation"));
                }
            }
        }

        let scope = Scope::build(self.script, self.opts, IndexMap::new(), resolve_globals);
        resolve_tokens(&mut tokens, &scope, self)?;
        reduce(&mut tokens, self)?;

        // post-reduction validation
        let all_refs = tokens
            .iter()
            .all(|t| matches!(t, Token::Lit(Value::ShapeRef(_))));
        let any_param = tokens
            .iter()
            .any(|t| matches!(t, Token::Lit(Value::ParamShapeRef(_))));
        if tokens.len() > 1 && !all_refs && !any_param {
            return Err(Error::type_error(format!(
                "expression reduced to multiple values ({}); is a '+', '-' or '*' shape combinator missing?",
                crate::token::render_tokens(&tokens)
            )));
        }

        if tree.func.is_empty() {
            tree.literals = tokens;
            return Ok(());
        }

        let (largs, dargs, unresolved) = collect_args(&tree.func, tokens)?;
        tree.literals = self.dispatch(&tree.func, largs, dargs, unresolved)?;
        Ok(())
    }

    /// Dispatches a function application to builtins, user shapes, imports
    /// or the reference constructors.
    fn dispatch(
        &mut self,
        func: &str,
        largs: Vec<Value>,
        dargs: IndexMap<String, Value>,
        unresolved: Vec<String>,
    ) -> CompileResult<Vec<Token>> {
        let args = CallArgs {
            func,
            largs,
            dargs,
            unresolved,
        };
        match func {
            "rect" => {
                args.require_resolved()?;
                Ok(lit(Value::Shape(build_rect(&args)?)))
            }
            "polygon" => {
                args.require_resolved()?;
                args.no_named()?;
                let mut points = crate::geom::Polygon::new();
                for v in &args.largs {
                    match v {
                        Value::Point(p) => points.push(*p),
                        other => {
                            return Err(Error::type_error(format!(
                                "polygon expects points, found '{}'",
                                other.tag()
                            )));
                        }
                    }
                }
                if points.len() < 3 {
                    return Err(Error::domain("polygon needs at least three points"));
                }
                Ok(lit(Value::Shape(Shape::new(vec![points]))))
            }
            "text" => {
                args.require_resolved()?;
                Ok(lit(Value::Shape(build_text(&args, self.geom)?)))
            }
            "qrcode" => {
                args.require_resolved()?;
                let data = args
                    .largs
                    .first()
                    .ok_or_else(|| Error::arg_count("qrcode", 1, 0))?
                    .coerce_string();
                let pixel = match args.dargs.get("pixel") {
                    Some(v) => v
                        .as_number()
                        .ok_or_else(|| Error::type_error("qrcode pixel size must be numeric"))?,
                    None => 1.0,
                };
                Ok(lit(Value::Shape(self.geom.qr_polygons(&data, pixel)?)))
            }
            "translate" => {
                args.require_resolved()?;
                Ok(lit(Value::Func(build_translate(&args)?)))
            }
            "rotate" => {
                args.require_resolved()?;
                Ok(lit(Value::Func(build_rotate(&args)?)))
            }
            "mirror" => {
                args.require_resolved()?;
                Ok(lit(Value::Func(build_mirror(&args)?)))
            }
            "grow" => {
                args.require_resolved()?;
                args.no_named()?;
                let d = args.one_num()?;
                Ok(lit(Value::Func(Transform::Grow { d })))
            }
            "round" => {
                args.require_resolved()?;
                args.no_named()?;
                let r = args.one_num()?;
                Ok(lit(Value::Func(Transform::Round { r })))
            }
            "scale" => {
                args.require_resolved()?;
                args.no_named()?;
                let nums = args.nums()?;
                let (sx, sy) = match nums.as_slice() {
                    [s] => (*s, *s),
                    [sx, sy] => (*sx, *sy),
                    _ => return Err(Error::arg_count("scale", 1, nums.len())),
                };
                if sx == 0.0 || sy == 0.0 {
                    return Err(Error::domain("scale factor must be non-zero"));
                }
                Ok(lit(Value::Func(Transform::Scale { sx, sy })))
            }
            "array" => {
                args.require_resolved()?;
                Ok(lit(Value::Func(build_array(&args)?)))
            }
            "call" => {
                args.require_resolved()?;
                if !args.largs.is_empty() {
                    return Err(Error::arity("call() takes named arguments only"));
                }
                Ok(lit(Value::Func(Transform::Caller(Caller::build(&args.dargs)?))))
            }
            "int" => {
                args.require_resolved()?;
                args.no_named()?;
                Ok(lit(Value::Int(args.one_num()? as i64)))
            }
            "abs" => {
                args.require_resolved()?;
                args.no_named()?;
                Ok(lit(Value::Float(args.one_num()?.abs())))
            }
            "char" => {
                args.require_resolved()?;
                args.no_named()?;
                let n = args.one_num()?;
                let i = n as i64;
                if !(0..26).contains(&i) {
                    return Err(Error::domain(format!("char() argument {n} is outside 0..26")));
                }
                Ok(lit(Value::Str(((b'a' + i as u8) as char).to_string())))
            }
            "sqrt" => {
                args.require_resolved()?;
                args.no_named()?;
                let n = args.one_num()?;
                if n < 0.0 {
                    return Err(Error::domain("sqrt() of a negative number"));
                }
                Ok(lit(Value::Float(n.sqrt())))
            }
            "min" | "max" | "mean" => {
                args.require_resolved()?;
                args.no_named()?;
                let nums = args.nums()?;
                if nums.is_empty() {
                    return Err(Error::arity(format!("{func}() needs at least one argument")));
                }
                let result = match func {
                    "min" => nums.iter().copied().fold(f64::INFINITY, f64::min),
                    "max" => nums.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    _ => nums.iter().sum::<f64>() / nums.len() as f64,
                };
                Ok(lit(Value::Float(result)))
            }
            "cos" | "sin" | "tan" | "asin" | "acos" | "atan" => {
                args.require_resolved()?;
                Ok(lit(Value::Float(trig(func, &args)?)))
            }
            "atan2" => {
                args.require_resolved()?;
                args.no_named()?;
                let nums = args.nums()?;
                let [y, x] = nums.as_slice() else {
                    return Err(Error::arg_count("atan2", 2, nums.len()));
                };
                Ok(lit(Value::Float(y.atan2(*x).to_degrees())))
            }
            "height" | "width" => {
                args.require_resolved()?;
                let shape = args.one_shape()?;
                let v = if func == "height" { shape.height() } else { shape.width() };
                Ok(lit(Value::Float(v)))
            }
            "bb" => {
                args.require_resolved()?;
                let shape = args.one_shape()?;
                let bb = shape
                    .bounding_box()
                    .ok_or_else(|| Error::domain("bb() of an empty shape"))?;
                Ok(lit(Value::Shape(Shape::new(vec![rect_polygon(bb.min, bb.max)]))))
            }
            "center" => {
                args.require_resolved()?;
                let shape = args.one_shape()?;
                Ok(lit(Value::Point(shape.center())))
            }
            "ref" => self.dispatch_ref(&args),
            _ if self.script.shape_dict.contains_key(func) => self.dispatch_user_shape(func, args),
            _ if self
                .script
                .import_dict
                .values()
                .any(|lib| lib.shape_dict.contains_key(func)) =>
            {
                Ok(lit(Value::Import(ImportCall {
                    shape: func.to_owned(),
                    largs: args.largs,
                    dargs: args.dargs,
                })))
            }
            _ => Err(Error::invalid_function(func)),
        }
    }

    /// `ref("cell")` is a plain reference; `ref("sym", a, b, ...)` emits the
    /// three-token sequence the `make` pass instantiates.
    fn dispatch_ref(&mut self, args: &CallArgs<'_>) -> CompileResult<Vec<Token>> {
        if args.largs.is_empty() {
            return Err(Error::arg_count("ref", 1, 0));
        }
        let Value::Str(target) = &args.largs[0] else {
            return Err(Error::type_error("ref() expects a cell or symbol name string"));
        };
        if args.largs.len() == 1 && args.dargs.is_empty() {
            if !self.script.library.contains(target) {
                return Err(Error::unresolved(vec![target.clone()], "ref() cell lookup"));
            }
            return Ok(lit(Value::ShapeRef(Reference::Single(CellRef {
                cell: target.clone(),
                origin: Point::default(),
                rotation: 0.0,
            }))));
        }

        let wanted = normalize_symbol_name(target);
        // exact normalized match first, then a unique prefix match: a clean
        // name like `pad_x_y` is addressed as ref("pad", ...)
        let clean = self
            .script
            .param_sym_dict
            .keys()
            .find(|key| normalize_symbol_name(key) == wanted)
            .or_else(|| {
                let mut candidates = self
                    .script
                    .param_sym_dict
                    .keys()
                    .filter(|key| normalize_symbol_name(key).starts_with(&wanted));
                match (candidates.next(), candidates.next()) {
                    (Some(one), None) => Some(one),
                    _ => None,
                }
            })
            .cloned()
            .ok_or_else(|| {
                Error::new(
                    crate::ErrorKind::Name,
                    format!(
                        "parametric symbol {target:?} was not defined (symbols may only be used after their definition)"
                    ),
                )
            })?;
        let mut params: Vec<Value> = args.largs[1..].to_vec();
        for (name, value) in &args.dargs {
            params.push(Value::Assignment(name.clone(), Box::new(value.clone())));
        }
        Ok(vec![
            Token::Lit(Value::ParamShapeRef(clean)),
            Token::Op(Op::Make),
            Token::Lit(Value::ArgumentList(params)),
        ])
    }

    /// Calls a user-defined shape. Arguments that are still unresolved names
    /// defer the call as a `Tree` token instead of failing, so stored bodies
    /// and `call(...)` sweeps can bind them later.
    fn dispatch_user_shape(&mut self, func: &str, args: CallArgs<'_>) -> CompileResult<Vec<Token>> {
        let def = self
            .script
            .shape_dict
            .get(func)
            .cloned()
            .expect("caller checked shape_dict membership");
        let argdict = bind_args(func, &def.args, args.largs, args.dargs)?;
        let mut concrete = IndexMap::new();
        let mut wanted = Vec::new();
        for (param, value) in argdict {
            match value {
                Value::Name(outer) => wanted.push((outer, param)),
                value => {
                    concrete.insert(param, value);
                }
            }
        }
        if wanted.is_empty() {
            let shape = self.instantiate_def(&def, concrete, func)?;
            return Ok(lit(Value::Shape(shape)));
        }
        let mut tree = def.tree.clone();
        let scope = Scope::build(self.script, self.opts, concrete, false);
        resolve_tree(&mut tree, &scope, self)?;
        Ok(vec![Token::Tree(DeferredCall {
            tree: Box::new(tree),
            wanted,
        })])
    }

    /// Instantiates a shape definition: clone, bind, resolve, evaluate.
    pub fn instantiate_def(
        &mut self,
        def: &ShapeDef,
        argdict: IndexMap<String, Value>,
        name: &str,
    ) -> CompileResult<Shape> {
        let mut tree = def.tree.clone();
        let scope = Scope::build(self.script, self.opts, argdict, true);
        let unresolved = resolve_tree(&mut tree, &scope, self)?;
        if !unresolved.is_empty() {
            return Err(Error::unresolved(unresolved, &format!("shape call {name:?}")));
        }
        self.evaluate(&mut tree, true)?;
        tree.shape_result()
            .cloned()
            .ok_or_else(|| Error::type_error(format!("shape call {name:?} did not produce a shape")))
    }

    /// Instantiates an already-cloned deferred tree with the given bindings.
    pub fn instantiate_tree(&mut self, mut tree: CallTree, argdict: IndexMap<String, Value>) -> CompileResult<Shape> {
        let scope = Scope::build(self.script, self.opts, argdict, true);
        let unresolved = resolve_tree(&mut tree, &scope, self)?;
        if !unresolved.is_empty() {
            return Err(Error::unresolved(unresolved, "parametric function call"));
        }
        self.evaluate(&mut tree, true)?;
        tree.shape_result()
            .cloned()
            .ok_or_else(|| Error::type_error("parametric function call did not produce a shape"))
    }

    /// Completes a deferred `ns.Shape(...)` call in the imported script's
    /// scope.
    pub fn instantiate_import(&mut self, ns: &str, call: ImportCall) -> CompileResult<Shape> {
        let geom = self.geom;
        let opts = self.opts;
        let child = self
            .script
            .import_dict
            .get_mut(ns)
            .ok_or_else(|| Error::unresolved(vec![ns.to_owned()], "import namespace lookup"))?;
        let def = child
            .shape_dict
            .get(&call.shape)
            .cloned()
            .ok_or_else(|| Error::unresolved(vec![call.shape.clone()], format!("namespace {ns:?}").as_str()))?;
        let argdict = bind_args(&call.shape, &def.args, call.largs, call.dargs)?;
        let mut sub = Evaluator::new(child, geom, opts);
        sub.instantiate_def(&def, argdict, &call.shape)
    }

    /// Instantiates a parametric symbol (the `make` operator, §steps: bind,
    /// resolve, name, build once, propagate, reference).
    pub fn make_instance(&mut self, clean: &str, params: Vec<Value>) -> CompileResult<Reference> {
        let entries = self
            .script
            .param_sym_dict
            .get(clean)
            .cloned()
            .ok_or_else(|| Error::new(crate::ErrorKind::Name, format!("unknown parametric symbol {clean:?}")))?;
        let first = entries.first().expect("parametric symbols always have sections");

        // split positional and named parameters, then bind
        let mut largs = Vec::new();
        let mut dargs = IndexMap::new();
        for value in params {
            match value {
                Value::Assignment(name, payload) => {
                    dargs.insert(name, *payload);
                }
                other => largs.push(other),
            }
        }
        let mut argdict = bind_args(clean, &first.args, largs, dargs)?;

        // resolve leftover names against globals
        let scope = Scope::build(self.script, self.opts, IndexMap::new(), true);
        let mut unresolved = Vec::new();
        for value in argdict.values_mut() {
            resolve_value(value, &scope, &mut unresolved);
        }
        if !unresolved.is_empty() {
            return Err(Error::unresolved(unresolved, "parametric symbol instantiation"));
        }

        let ordered: Vec<Value> = first.args.iter().map(|a| argdict[a].clone()).collect();
        let substituted = format_pattern(&first.name_pattern, &ordered)?;
        if substituted == first.name_pattern {
            return Err(Error::parse(format!(
                "parametric symbol pattern {:?} contains no placeholders",
                first.name_pattern
            )));
        }
        let cell_name = sanitize_cell_name(&substituted);

        if !self.script.library.contains(&cell_name) {
            let route = first.route.clone();
            let mut cell = Cell::default();
            for entry in &entries {
                let mut tree = entry.tree.clone();
                let entry_args: IndexMap<String, Value> =
                    entry.args.iter().cloned().zip(ordered.iter().cloned()).collect();
                let owner = self.script.script_at_mut(&entry.route)?;
                let mut sub = Evaluator::new(owner, self.geom, self.opts);
                let scope = Scope::build(sub.script, sub.opts, entry_args, true);
                let unresolved = resolve_tree(&mut tree, &scope, &mut sub)?;
                if !unresolved.is_empty() {
                    return Err(Error::unresolved(unresolved, "parametric symbol layer shapes"));
                }
                sub.evaluate(&mut tree, true)?;
                if let Some(shape) = tree.shape_result() {
                    let layer = entry
                        .layer
                        .ok_or_else(|| Error::domain("parametric symbol section has no layer context"))?;
                    cell.add_shape(shape, layer);
                } else if let Some(refs) = tree.ref_results() {
                    for r in refs {
                        cell.add_reference(r);
                    }
                } else if !tree.literals.is_empty()
                    && !matches!(tree.literals.as_slice(), [Token::Lit(Value::None)])
                {
                    return Err(Error::type_error(
                        "parametric symbol section produced neither a shape nor references",
                    ));
                }
            }

            // register the cell in the defining script and every script along
            // the import route so the top-level library sees it; nested
            // instantiations inside the body may have created further cells
            // in the owner, so any cell missing upstream is carried along
            let owner = self.script.script_at_mut(&route)?;
            owner.library.insert(cell_name.clone(), cell);
            for depth in 0..route.len() {
                let created: Vec<(String, Cell)> = {
                    let owner = self.script.script_at_mut(&route)?;
                    owner
                        .library
                        .cells
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect()
                };
                let ancestor = self.script.script_at_mut(&route[..depth])?;
                for (name, cell) in created {
                    if !ancestor.library.contains(&name) {
                        ancestor.library.insert(name, cell);
                    }
                }
            }
        }

        Ok(Reference::Single(CellRef {
            cell: cell_name,
            origin: Point::default(),
            rotation: 0.0,
        }))
    }
}

fn lit(value: Value) -> Vec<Token> {
    vec![Token::Lit(value)]
}

/// Case-insensitive symbol lookup key: `- _ { }` stripped, lowercased.
fn normalize_symbol_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '-' | '_' | '{' | '}'))
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Replaces every `{...}` placeholder run with the next positional value.
fn format_pattern(pattern: &str, values: &[Value]) -> CompileResult<String> {
    let mut out = String::new();
    let mut chars = pattern.chars();
    let mut next = 0usize;
    while let Some(c) = chars.next() {
        if c == '{' {
            for inner in chars.by_ref() {
                if inner == '}' {
                    break;
                }
            }
            let value = values.get(next).ok_or_else(|| {
                Error::arity(format!(
                    "symbol pattern {pattern:?} has more placeholders than parameters"
                ))
            })?;
            out.push_str(&value.coerce_string());
            next += 1;
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

/// Replaces runs of characters outside `[A-Za-z0-9._]` with one underscore.
fn sanitize_cell_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out
}

/// Positional/named argument bundle extracted from a reduced node.
struct CallArgs<'a> {
    func: &'a str,
    largs: Vec<Value>,
    dargs: IndexMap<String, Value>,
    unresolved: Vec<String>,
}

impl CallArgs<'_> {
    fn require_resolved(&self) -> CompileResult<()> {
        if self.unresolved.is_empty() {
            Ok(())
        } else {
            Err(Error::unresolved(
                self.unresolved.clone(),
                &format!("argument list of {:?}", self.func),
            ))
        }
    }

    fn no_named(&self) -> CompileResult<()> {
        match self.dargs.keys().next() {
            None => Ok(()),
            Some(key) => Err(Error::unknown_named(self.func, key)),
        }
    }

    fn nums(&self) -> CompileResult<Vec<f64>> {
        self.largs
            .iter()
            .map(|v| {
                v.as_number()
                    .ok_or_else(|| Error::type_error(format!("{}() supports only numeric inputs", self.func)))
            })
            .collect()
    }

    fn one_num(&self) -> CompileResult<f64> {
        let nums = self.nums()?;
        match nums.as_slice() {
            [n] => Ok(*n),
            _ => Err(Error::arg_count(self.func, 1, nums.len())),
        }
    }

    fn one_shape(&self) -> CompileResult<&Shape> {
        match self.largs.as_slice() {
            [Value::Shape(shape)] if self.dargs.is_empty() => Ok(shape),
            _ => Err(Error::type_error(format!("{}() expects a single shape argument", self.func))),
        }
    }

    fn named_num(&self, key: &str) -> CompileResult<Option<f64>> {
        match self.dargs.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_number()
                .map(Some)
                .ok_or_else(|| Error::type_error(format!("{}({key}=...) must be numeric", self.func))),
        }
    }

    /// The single anchor named argument, if any. Multiple anchors conflict.
    fn anchor(&self) -> CompileResult<Option<(Anchor, Point)>> {
        let mut found = None;
        for anchor in Anchor::ALL {
            let key = anchor.to_string();
            if let Some(value) = self.dargs.get(&key) {
                if found.is_some() {
                    return Err(Error::domain(format!("multiple anchors in {} definition", self.func)));
                }
                let Value::Point(p) = value else {
                    return Err(Error::type_error(format!("anchor {key} expects a point value")));
                };
                found = Some((anchor, *p));
            }
        }
        Ok(found)
    }

    fn is_anchor_key(key: &str) -> bool {
        Anchor::ALL.iter().any(|a| a.to_string() == key)
    }
}

/// Collects the positional and named arguments (plus unresolved names) from
/// a node's reduced token list.
fn collect_args(func: &str, tokens: Vec<Token>) -> CompileResult<(Vec<Value>, IndexMap<String, Value>, Vec<String>)> {
    let mut largs = Vec::new();
    let mut dargs = IndexMap::new();
    let mut unresolved = Vec::new();

    let mut add = |value: Value| {
        match value {
            Value::Assignment(name, payload) => {
                if let Value::Name(n) = payload.as_ref() {
                    unresolved.push(n.clone());
                }
                dargs.insert(name, *payload);
            }
            Value::Name(n) => {
                unresolved.push(n.clone());
                largs.push(Value::Name(n));
            }
            Value::None => {}
            other => largs.push(other),
        }
    };

    match tokens.len() {
        0 => {}
        1 => match tokens.into_iter().next().expect("length checked") {
            Token::Lit(Value::ArgumentList(items)) => {
                for item in items {
                    add(item);
                }
            }
            Token::Lit(value) => add(value),
            other => {
                return Err(Error::type_error(format!(
                    "malformed argument list for {func:?}: {}",
                    crate::token::describe(Some(&other))
                )));
            }
        },
        _ => {
            return Err(Error::type_error(format!("malformed argument list for {func:?}")));
        }
    }
    Ok((largs, dargs, unresolved))
}

/// Zips positional arguments onto declared parameters, applies named
/// arguments, and enforces exactly-once binding. The
/// `__ignore_extra_args__` sentinel downgrades unknown and duplicate named
/// arguments to no-ops.
pub(crate) fn bind_args(
    func: &str,
    arg_names: &[String],
    largs: Vec<Value>,
    mut dargs: IndexMap<String, Value>,
) -> CompileResult<IndexMap<String, Value>> {
    let ignore_extra = dargs.shift_remove("__ignore_extra_args__").is_some();
    if largs.len() > arg_names.len() {
        return Err(Error::arity(format!(
            "too many positional arguments in call to {func:?}"
        )));
    }
    let mut bound: IndexMap<String, Option<Value>> = arg_names.iter().map(|a| (a.clone(), None)).collect();
    for (name, value) in arg_names.iter().zip(largs) {
        bound[name] = Some(value);
    }
    for (key, value) in dargs {
        match bound.get_mut(&key) {
            None => {
                if !ignore_extra {
                    return Err(Error::unknown_named(func, &key));
                }
            }
            Some(slot @ None) => *slot = Some(value),
            Some(_) => {
                if !ignore_extra {
                    return Err(Error::arity(format!(
                        "argument {key:?} specified both positionally and by name in call to {func:?}"
                    )));
                }
            }
        }
    }
    let mut out = IndexMap::with_capacity(bound.len());
    for (name, value) in bound {
        match value {
            Some(v) => {
                out.insert(name, v);
            }
            None => {
                return Err(Error::arity(format!("missing argument {name:?} in call to {func:?}")));
            }
        }
    }
    Ok(out)
}

fn build_rect(args: &CallArgs<'_>) -> CompileResult<Shape> {
    for key in args.dargs.keys() {
        if !CallArgs::is_anchor_key(key) && key != "dx" && key != "dy" {
            return Err(Error::unknown_named("rect", key));
        }
    }
    // two corner points
    if let [Value::Point(p1), Value::Point(p2)] = args.largs.as_slice() {
        if args.anchor()?.is_some() {
            return Err(Error::domain("corner style rectangle definition does not take an anchor"));
        }
        return Ok(Shape::new(vec![rect_polygon(*p1, *p2)]));
    }

    let (width, height) = match (args.named_num("dx")?, args.named_num("dy")?) {
        (Some(dx), Some(dy)) => (dx, dy),
        (None, None) => {
            let nums = args.nums()?;
            match nums.as_slice() {
                [w] => (w.abs(), w.abs()),
                [w, h] => (w.abs(), h.abs()),
                _ => {
                    return Err(Error::domain(
                        "anchor style rectangle definition must specify 'dx' and 'dy'",
                    ));
                }
            }
        }
        _ => {
            return Err(Error::domain(
                "anchor style rectangle definition must specify 'dx' and 'dy'",
            ));
        }
    };
    let (anchor, at) = args.anchor()?.unwrap_or((Anchor::C, Point::default()));
    // the anchor names the point of the rectangle placed at `at`
    let (ax, ay) = match anchor {
        Anchor::C => (0.5, 0.5),
        Anchor::N => (0.5, 1.0),
        Anchor::Ne => (1.0, 1.0),
        Anchor::E => (1.0, 0.5),
        Anchor::Se => (1.0, 0.0),
        Anchor::S => (0.5, 0.0),
        Anchor::Sw => (0.0, 0.0),
        Anchor::W => (0.0, 0.5),
        Anchor::Nw => (0.0, 1.0),
    };
    let min = Point::new(at.x - width * ax, at.y - height * ay);
    let max = Point::new(min.x + width, min.y + height);
    Ok(Shape::new(vec![rect_polygon(min, max)]))
}

fn build_text(args: &CallArgs<'_>, geom: &dyn GeomBackend) -> CompileResult<Shape> {
    for key in args.dargs.keys() {
        if !CallArgs::is_anchor_key(key) && key != "dx" && key != "dy" {
            return Err(Error::unknown_named("text", key));
        }
    }
    let Some(first) = args.largs.first() else {
        return Err(Error::arg_count("text", 1, 0));
    };
    let content = first.coerce_string();
    let dy = match (args.largs.get(1), args.named_num("dy")?) {
        (Some(v), None) => Some(
            v.as_number()
                .ok_or_else(|| Error::type_error("text height (dy) must be numeric"))?,
        ),
        (None, named) => named,
        (Some(_), Some(_)) => return Err(Error::arity("text height given twice")),
    };
    let dx = args.named_num("dx")?;
    let size = match (dy, dx) {
        (Some(_), Some(_)) => {
            return Err(Error::domain("can only specify text height (dy) or text width (dx)"));
        }
        (None, None) => {
            return Err(Error::domain("must specify text height (dy) or text width (dx)"));
        }
        (Some(dy), None) => TextSize::Height(dy),
        (None, Some(dx)) => TextSize::Width(dx),
    };

    let shape = geom.text(&content, size)?;
    let Some(bbox) = shape.bounding_box() else {
        return Ok(shape);
    };
    // dy-style anchoring is relative to the nominal line box, dx-style to
    // the rendered extent
    let (top, bot) = match size {
        TextSize::Height(dy) => (dy, 0.0),
        TextSize::Width(_) => (bbox.max.y, bbox.min.y),
    };
    let (anchor, at) = args.anchor()?.unwrap_or((Anchor::C, Point::default()));
    let cx = 0.5 * (bbox.min.x + bbox.max.x);
    let cy = 0.5 * (bbox.min.y + bbox.max.y);
    let (ox, oy) = match anchor {
        Anchor::Ne => (bbox.max.x, top),
        Anchor::Se => (bbox.max.x, bot),
        Anchor::Sw => (bbox.min.x, bot),
        Anchor::Nw => (bbox.min.x, top),
        Anchor::N => (cx, top),
        Anchor::E => (bbox.max.x, cy),
        Anchor::S => (cx, bot),
        Anchor::W => (bbox.min.x, cy),
        Anchor::C => (cx, cy),
    };
    Ok(geom.translate(&shape, at.x - ox, at.y - oy))
}

fn build_translate(args: &CallArgs<'_>) -> CompileResult<Transform> {
    let copy = truthy(args.dargs.get("copy"));
    let anchor = args.anchor()?;
    let translate_args = if let Some((anchor, at)) = anchor {
        if !args.largs.is_empty() || args.named_num("dx")?.is_some() || args.named_num("dy")?.is_some() {
            return Err(Error::domain("no anchor definition allowed in [dx, dy] style translation"));
        }
        TranslateArgs::Anchor {
            anchor: anchor.to_string(),
            at,
        }
    } else if let [Value::Point(p)] = args.largs.as_slice() {
        TranslateArgs::Vector { dx: p.x, dy: p.y }
    } else if let (Some(dx), Some(dy)) = (args.named_num("dx")?, args.named_num("dy")?) {
        TranslateArgs::Vector { dx, dy }
    } else {
        let nums = args.nums()?;
        let [dx, dy] = nums.as_slice() else {
            return Err(Error::arity("invalid translate() arguments: expected dx and dy"));
        };
        TranslateArgs::Vector { dx: *dx, dy: *dy }
    };
    for key in args.dargs.keys() {
        if !CallArgs::is_anchor_key(key) && !matches!(key.as_str(), "dx" | "dy" | "copy") {
            return Err(Error::unknown_named("translate", key));
        }
    }
    Ok(Transform::Translate {
        args: translate_args,
        copy,
    })
}

fn build_rotate(args: &CallArgs<'_>) -> CompileResult<Transform> {
    for key in args.dargs.keys() {
        if !matches!(key.as_str(), "center" | "unit" | "copy") {
            return Err(Error::unknown_named("rotate", key));
        }
    }
    let Some(angle) = args.largs.first().and_then(Value::as_number) else {
        return Err(Error::arity("rotate() needs a numeric angle"));
    };
    let center = match (args.largs.get(1), args.dargs.get("center")) {
        (Some(Value::Point(p)), None) | (None, Some(Value::Point(p))) => Some(*p),
        (None, None) => None,
        _ => return Err(Error::type_error("rotate() center must be a point")),
    };
    let angle_rad = match unit_arg(args)? {
        AngleUnit::Deg => angle.to_radians(),
        AngleUnit::Rad => angle,
    };
    Ok(Transform::Rotate {
        angle_rad,
        center,
        copy: truthy(args.dargs.get("copy")),
    })
}

fn build_mirror(args: &CallArgs<'_>) -> CompileResult<Transform> {
    for key in args.dargs.keys() {
        if !matches!(key.as_str(), "x" | "y" | "copy") {
            return Err(Error::unknown_named("mirror", key));
        }
    }
    let copy = truthy(args.dargs.get("copy"));
    let points: Vec<Point> = args
        .largs
        .iter()
        .filter_map(|v| match v {
            Value::Point(p) => Some(*p),
            _ => None,
        })
        .collect();
    if points.len() != args.largs.len() {
        return Err(Error::type_error("mirror() positional arguments must be points"));
    }
    let x = args.named_num("x")?;
    let y = args.named_num("y")?;
    let (p1, p2) = match (points.as_slice(), x, y) {
        ([p1, p2], None, None) => (*p1, Some(*p2)),
        ([p1], None, None) => (*p1, None),
        ([], Some(x), None) => (Point::new(x, 1.0), Some(Point::new(x, -1.0))),
        ([], None, Some(y)) => (Point::new(1.0, y), Some(Point::new(-1.0, y))),
        ([], Some(x), Some(y)) => (Point::new(x, y), None),
        _ => {
            return Err(Error::domain(
                "incomplete parameters to mirror: specify one point, two points, x, y, or x and y",
            ));
        }
    };
    Ok(Transform::Mirror { p1, p2, copy })
}

fn build_array(args: &CallArgs<'_>) -> CompileResult<Transform> {
    for key in args.dargs.keys() {
        if !matches!(key.as_str(), "lx" | "ly" | "dx" | "dy") {
            return Err(Error::unknown_named("array", key));
        }
    }
    let nums = args.nums()?;
    let mut it = nums.iter().copied();
    // positional order: lx, ly, dx, dy
    let lx = it.next().or(args.named_num("lx")?);
    let ly = it.next().or(args.named_num("ly")?);
    let dx = it.next().or(args.named_num("dx")?).unwrap_or(0.0);
    let dy = it.next().or(args.named_num("dy")?).unwrap_or(0.0);
    let (Some(lx), Some(ly)) = (lx, ly) else {
        return Err(Error::arity("array() needs lx and ly"));
    };
    if lx < 1.0 || ly < 1.0 {
        return Err(Error::domain("zero or negative sized array is not possible"));
    }
    Ok(Transform::Array {
        lx: lx as u32,
        ly: ly as u32,
        dx,
        dy,
    })
}

enum AngleUnit {
    Deg,
    Rad,
}

fn unit_arg(args: &CallArgs<'_>) -> CompileResult<AngleUnit> {
    match args.dargs.get("unit") {
        None => Ok(AngleUnit::Deg),
        Some(Value::Str(s)) if s == "deg" => Ok(AngleUnit::Deg),
        Some(Value::Str(s)) if s == "rad" => Ok(AngleUnit::Rad),
        Some(other) => Err(Error::domain(format!(
            "invalid value for 'unit' argument: {:?} (use 'deg' or 'rad')",
            other.coerce_string()
        ))),
    }
}

fn truthy(value: Option<&Value>) -> bool {
    value.and_then(Value::as_number).is_some_and(|n| n != 0.0)
}

fn trig(func: &str, args: &CallArgs<'_>) -> CompileResult<f64> {
    for key in args.dargs.keys() {
        if key != "unit" {
            return Err(Error::unknown_named(func, key));
        }
    }
    let nums = args.nums()?;
    let [x] = nums.as_slice() else {
        return Err(Error::arg_count(func, 1, nums.len()));
    };
    let unit = unit_arg(args)?;
    match func {
        // forward functions take their argument in the given unit
        "cos" | "sin" | "tan" => {
            let rad = match unit {
                AngleUnit::Deg => x.to_radians(),
                AngleUnit::Rad => *x,
            };
            Ok(match func {
                "cos" => rad.cos(),
                "sin" => rad.sin(),
                _ => rad.tan(),
            })
        }
        // inverse functions take a ratio and answer in the given unit
        _ => {
            if matches!(func, "asin" | "acos") && !(-1.0..=1.0).contains(x) {
                return Err(Error::domain(format!("{func}() argument {x} is outside [-1, 1]")));
            }
            let rad = match func {
                "asin" => x.asin(),
                "acos" => x.acos(),
                _ => x.atan(),
            };
            Ok(match unit {
                AngleUnit::Deg => rad.to_degrees(),
                AngleUnit::Rad => rad,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_formatting_uses_positional_values() {
        let values = vec![Value::Int(14), Value::Int(3)];
        assert_eq!(format_pattern("pad_x{x}_y{y}", &values).unwrap(), "pad_x14_y3");
        assert_eq!(format_pattern("p{}{}", &values).unwrap(), "p143");
    }

    #[test]
    fn sanitize_collapses_runs() {
        assert_eq!(sanitize_cell_name("a b##c"), "a_b_c");
        assert_eq!(sanitize_cell_name("pad_x14_y3"), "pad_x14_y3");
    }

    #[test]
    fn normalized_symbol_lookup_ignores_case_and_decorations() {
        assert_eq!(normalize_symbol_name("Pad_X{}_Y{}"), normalize_symbol_name("padxy"));
    }

    #[test]
    fn bind_args_enforces_exactly_once() {
        let names = vec!["a".to_owned(), "b".to_owned()];
        let ok = bind_args("f", &names, vec![Value::Int(1)], {
            let mut d = IndexMap::new();
            d.insert("b".to_owned(), Value::Int(2));
            d
        })
        .unwrap();
        assert_eq!(ok["a"], Value::Int(1));
        assert_eq!(ok["b"], Value::Int(2));

        let dup = bind_args("f", &names, vec![Value::Int(1), Value::Int(2)], {
            let mut d = IndexMap::new();
            d.insert("a".to_owned(), Value::Int(3));
            d
        });
        assert!(dup.is_err());

        let missing = bind_args("f", &names, vec![Value::Int(1)], IndexMap::new());
        assert!(missing.is_err());
    }

    #[test]
    fn ignore_extra_args_sentinel_downgrades_errors() {
        let names = vec!["a".to_owned()];
        let mut dargs = IndexMap::new();
        dargs.insert("a".to_owned(), Value::Int(1));
        dargs.insert("zzz".to_owned(), Value::Int(9));
        dargs.insert("__ignore_extra_args__".to_owned(), Value::None);
        let ok = bind_args("f", &names, vec![], dargs).unwrap();
        assert_eq!(ok["a"], Value::Int(1));
    }
}
