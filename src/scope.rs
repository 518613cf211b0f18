//! Scope tree, binding table, and the macro & scope pass (spec §4.1).
//!
//! Grounded on the teacher's `scope.rs` (`BindingCollector`, a `Visit`-based
//! free-identifier collector) and `jsx_lowerer.rs`'s `ScriptRenamer`
//! (`scope_stack: Vec<HashSet<String>>`, shadowing via a stack search) —
//! generalized from "is this a state name" into a full binding classifier
//! with a proper parent-indexed scope tree instead of a flat stack, per the
//! arena/index design note.

use crate::diagnostics::{error_code, CompileError};
use crate::loc::{LineIndex, SourceLocation};
use oxc_ast::ast::*;
use oxc_ast_visit::Visit;
use oxc_span::{GetSpan, Span};
use std::collections::{BTreeSet, HashMap};

/// The module macro intrinsics are imported from. Not spelled out by name in
/// the spec; picked to match the `__fict*` runtime call prefix used in the
/// spec's own worked examples (§8).
pub const MACRO_MODULE: &str = "fict";

pub type ScopeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Module,
    Function,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    State,
    /// Not yet resolved to memo or getter; the policy pass (§4.4) settles
    /// this into `DerivedMemo` or `DerivedGetter`.
    Derived,
    DerivedMemo,
    DerivedGetter,
    Alias,
    DestructuredStateAlias,
    Prop,
    PropRest,
    Store,
    Plain,
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub name: String,
    pub kind: BindingKind,
    pub owner_scope: ScopeId,
    pub declared_at: SourceLocation,
    /// Direct reactive names referenced by a derived/alias initializer.
    /// The dependency pass (graph.rs) expands this into the full
    /// transitive closure.
    pub deps: BTreeSet<String>,
    /// Assigned in textual order within the owning component/hook; `None`
    /// until the component-lowering pass assigns slots.
    pub slot: Option<u32>,
}

impl Binding {
    fn new(name: &str, kind: BindingKind, owner_scope: ScopeId, declared_at: SourceLocation) -> Self {
        Self {
            name: name.to_string(),
            kind,
            owner_scope,
            declared_at,
            deps: BTreeSet::new(),
            slot: None,
        }
    }
}

pub struct Scope {
    pub parent: Option<ScopeId>,
    pub kind: ScopeKind,
    pub bindings: HashMap<String, Binding>,
}

/// Arena of scopes addressed by index, per the "parent index, not a parent
/// pointer" design note (spec §9).
pub struct ScopeTree {
    scopes: Vec<Scope>,
}

impl ScopeTree {
    pub fn new() -> (Self, ScopeId) {
        let tree = Self {
            scopes: vec![Scope {
                parent: None,
                kind: ScopeKind::Module,
                bindings: HashMap::new(),
            }],
        };
        (tree, 0)
    }

    pub fn push_child(&mut self, parent: ScopeId, kind: ScopeKind) -> ScopeId {
        self.scopes.push(Scope {
            parent: Some(parent),
            kind,
            bindings: HashMap::new(),
        });
        self.scopes.len() - 1
    }

    pub fn declare(&mut self, scope: ScopeId, binding: Binding) {
        self.scopes[scope].bindings.insert(binding.name.clone(), binding);
    }

    pub fn get(&self, scope: ScopeId) -> &Scope {
        &self.scopes[scope]
    }

    pub fn get_mut(&mut self, scope: ScopeId) -> &mut Scope {
        &mut self.scopes[scope]
    }

    /// Walks outward from `scope`, returning the first binding named `name`.
    /// This is the single place shadowing is implemented: an inner scope's
    /// entry always wins over an outer one.
    pub fn resolve(&self, scope: ScopeId, name: &str) -> Option<&Binding> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            let s = &self.scopes[id];
            if let Some(b) = s.bindings.get(name) {
                return Some(b);
            }
            cur = s.parent;
        }
        None
    }

    pub fn resolve_owner(&self, scope: ScopeId, name: &str) -> Option<ScopeId> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            if self.scopes[id].bindings.contains_key(name) {
                return Some(id);
            }
            cur = self.scopes[id].parent;
        }
        None
    }

    pub fn resolve_mut(&mut self, scope: ScopeId, name: &str) -> Option<&mut Binding> {
        let owner = self.resolve_owner(scope, name)?;
        self.scopes[owner].bindings.get_mut(name)
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }
}

#[derive(Debug, Default, Clone)]
struct MacroImports {
    state: Option<String>,
    effect: Option<String>,
    memo: Option<String>,
    store: Option<String>,
}

impl MacroImports {
    fn matches(&self, field: &Option<String>, name: &str) -> bool {
        field.as_deref() == Some(name)
    }
    fn is_state(&self, name: &str) -> bool {
        self.matches(&self.state, name)
    }
    fn is_effect(&self, name: &str) -> bool {
        self.matches(&self.effect, name)
    }
    fn is_memo(&self, name: &str) -> bool {
        self.matches(&self.memo, name)
    }
    fn is_store(&self, name: &str) -> bool {
        self.matches(&self.store, name)
    }
    fn any(&self) -> bool {
        self.state.is_some() || self.effect.is_some() || self.memo.is_some() || self.store.is_some()
    }
}

fn unwrap_parens<'a, 'b>(expr: &'b Expression<'a>) -> &'b Expression<'a> {
    match expr {
        Expression::ParenthesizedExpression(inner) => unwrap_parens(&inner.expression),
        other => other,
    }
}

fn collect_macro_imports(program: &Program) -> MacroImports {
    let mut imports = MacroImports::default();
    for stmt in &program.body {
        if let Statement::ImportDeclaration(decl) = stmt {
            if decl.source.value.as_str() != MACRO_MODULE {
                continue;
            }
            if let Some(specifiers) = &decl.specifiers {
                for spec in specifiers {
                    if let ImportDeclarationSpecifier::ImportSpecifier(s) = spec {
                        let imported = s.imported.name().to_string();
                        let local = s.local.name.to_string();
                        match imported.as_str() {
                            "state" => imports.state = Some(local),
                            "effect" => imports.effect = Some(local),
                            "memo" => imports.memo = Some(local),
                            "store" => imports.store = Some(local),
                            _ => {}
                        }
                    }
                }
            }
        }
    }
    imports
}

/// Output of the macro & scope pass: the populated scope tree plus the
/// per-function state slot counts (needed by component lowering).
pub struct AnalysisResult {
    pub tree: ScopeTree,
    pub module_scope: ScopeId,
    /// Maps the byte offset of the AST node that *owns* a scope (a block's
    /// span, a function body's span, ...) back to the `ScopeId` assigned to
    /// it here. Later passes that mutate the same parsed `Program` (the
    /// lowering visitors) use this to resolve identifiers against the
    /// binding table already built here, instead of re-deriving scope
    /// structure from scratch on a second walk.
    pub scope_by_span: HashMap<u32, ScopeId>,
}

impl AnalysisResult {
    /// Looks up the scope owned by an AST node whose span start was recorded
    /// during the analysis pass, falling back to `module_scope` for nodes
    /// that never opened their own scope (e.g. a bare expression span).
    pub fn scope_for_span(&self, span: Span) -> ScopeId {
        self.scope_by_span
            .get(&span.start)
            .copied()
            .unwrap_or(self.module_scope)
    }
}

/// A `@fictReturn` field's accessor kind (spec §4.8 item 6): `signal` reads
/// rewrite like a `state()` binding (callable getter + setter), `memo` reads
/// rewrite like an explicit `memo()` binding (callable getter only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FictReturnTag {
    Signal,
    Memo,
}

impl FictReturnTag {
    fn binding_kind(self) -> BindingKind {
        match self {
            FictReturnTag::Signal => BindingKind::State,
            FictReturnTag::Memo => BindingKind::DerivedMemo,
        }
    }

    fn parse(word: &str) -> Option<Self> {
        match word.trim() {
            "signal" => Some(FictReturnTag::Signal),
            "memo" => Some(FictReturnTag::Memo),
            _ => None,
        }
    }
}

/// The three shapes spec §4.8 item 6 names for a hook's `@fictReturn`
/// annotation.
#[derive(Debug, Clone)]
enum FictReturnShape {
    /// `@fictReturn { count: signal, double: memo }` — the hook returns an
    /// object; each named field is tagged independently.
    Object(HashMap<String, FictReturnTag>),
    /// `@fictReturn [signal, memo]` — the hook returns a tuple/array; each
    /// position is tagged independently.
    Array(Vec<FictReturnTag>),
    /// `@fictReturn signal` — the hook's return value itself (no
    /// destructuring) is the tagged accessor.
    Single(FictReturnTag),
}

/// Parses a `@fictReturn <rest>` payload into one of the three shapes.
/// Hand-rolled rather than `regex`-based (see DESIGN.md's note on why
/// `regex` was dropped): the grammar is small enough that splitting on `,`/
/// `:` is unambiguous, and nothing here needs backtracking.
fn parse_fict_return_payload(rest: &str) -> Option<FictReturnShape> {
    let rest = rest.trim();
    if let Some(body) = rest.strip_prefix('{') {
        let body = body.split('}').next()?.trim();
        let mut fields = HashMap::new();
        for entry in body.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (name, tag) = entry.split_once(':')?;
            fields.insert(name.trim().to_string(), FictReturnTag::parse(tag)?);
        }
        return Some(FictReturnShape::Object(fields));
    }
    if let Some(body) = rest.strip_prefix('[') {
        let body = body.split(']').next()?.trim();
        let mut tags = Vec::new();
        for entry in body.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            tags.push(FictReturnTag::parse(entry)?);
        }
        return Some(FictReturnShape::Array(tags));
    }
    let word: String = rest.chars().take_while(|c| !c.is_whitespace() && *c != '*' && *c != '\n').collect();
    FictReturnTag::parse(&word).map(FictReturnShape::Single)
}

/// Scans every top-level hook declaration's leading comment for a
/// `@fictReturn` annotation, returning a map from hook name to parsed shape.
/// A hook's leading comment is the closest comment (by span end) that ends
/// before the function declaration starts — the usual doc-comment-sits-
/// directly-above-its-declaration convention.
fn collect_fict_returns(program: &Program, source: &str) -> HashMap<String, FictReturnShape> {
    let mut out = HashMap::new();
    for stmt in &program.body {
        let Statement::FunctionDeclaration(func) = stmt else { continue };
        let Some(id) = &func.id else { continue };
        let name = id.name.as_str();
        if !(name.starts_with("use") && name.len() > 3 && name.as_bytes()[3].is_ascii_uppercase()) {
            continue;
        }
        let leading = program
            .comments
            .iter()
            .filter(|c| c.span.end <= func.span.start)
            .max_by_key(|c| c.span.end);
        let Some(comment) = leading else { continue };
        let text = &source[comment.span.start as usize..comment.span.end as usize];
        let Some(marker) = text.find("@fictReturn") else { continue };
        let rest = &text[marker + "@fictReturn".len()..];
        if let Some(shape) = parse_fict_return_payload(rest) {
            out.insert(name.to_string(), shape);
        }
    }
    out
}

struct Analyzer<'a> {
    tree: ScopeTree,
    macros: MacroImports,
    lines: &'a LineIndex,
    file: String,
    /// `Some(depth)` while inside some component/hook's body; `depth == 1`
    /// at the host's own top level, incrementing for each nested function.
    /// `None` means "not inside any host function" (could still be inside a
    /// plain nested function, or at module scope).
    host_depth: Vec<Option<u32>>,
    control_depth: u32,
    slot_counters: Vec<u32>,
    scope_by_span: HashMap<u32, ScopeId>,
    hook_returns: HashMap<String, FictReturnShape>,
}

impl<'a> Analyzer<'a> {
    fn loc(&self, span: oxc_span::Span) -> SourceLocation {
        self.lines.locate_span(span)
    }

    fn enter_scope(&mut self, parent: ScopeId, kind: ScopeKind, key: Span) -> ScopeId {
        let id = self.tree.push_child(parent, kind);
        self.scope_by_span.insert(key.start, id);
        id
    }

    fn err(&self, code: &str, message: impl Into<String>, span: oxc_span::Span) -> CompileError {
        let loc = self.loc(span);
        CompileError::new(code, message, &self.file, loc.line, loc.column)
    }

    fn current_host_depth(&self) -> Option<u32> {
        self.host_depth.last().copied().flatten()
    }

    fn check_macro_placement(&self, span: oxc_span::Span, what: &str) -> Result<(), CompileError> {
        if self.control_depth > 0 {
            return Err(self.err(
                error_code::MACRO_MISPLACED,
                format!("{} cannot be declared inside loops or conditionals", what),
                span,
            ));
        }
        match self.current_host_depth() {
            None => {
                if self.host_depth.is_empty() {
                    Err(self.err(
                        error_code::STATE_AT_MODULE_SCOPE,
                        format!("{} cannot appear at module scope", what),
                        span,
                    ))
                } else {
                    Err(self.err(
                        error_code::HOOK_OUTSIDE_COMPONENT,
                        format!(
                            "{} must be inside a component or hook (a function named `use...` \
                             or whose body returns JSX)",
                            what
                        ),
                        span,
                    ))
                }
            }
            Some(1) => Ok(()),
            Some(_) => Err(self.err(
                error_code::MACRO_MISPLACED,
                format!(
                    "{} must be at the top level of its component/hook body, not inside a nested function",
                    what
                ),
                span,
            )),
        }
    }

    /// Binds a function's parameters. A component/hook's single destructured
    /// props object is special: every name it extracts reads from the props
    /// object, not a plain local, so it is bound `Prop`/`PropRest` instead of
    /// going through the generic `Plain` path (spec §4.8, §8 worked example).
    fn bind_params(&mut self, scope: ScopeId, params: &FormalParameters, is_host: bool) {
        if is_host && params.items.len() == 1 {
            if let BindingPattern::ObjectPattern(_) = &params.items[0].pattern {
                self.bind_pattern_props(scope, &params.items[0].pattern);
                return;
            }
        }
        for param in &params.items {
            self.bind_pattern_plain(scope, &param.pattern);
        }
    }

    /// Binds the names extracted by a props destructuring pattern as `Prop`
    /// (rest elements as `PropRest`), recursing into nested object/array
    /// patterns and threading through `AssignmentPattern` defaults so a
    /// defaulted prop like `{ name = 'x' }` still resolves to `Prop`.
    fn bind_pattern_props(&mut self, scope: ScopeId, pattern: &BindingPattern) {
        match pattern {
            BindingPattern::BindingIdentifier(id) => {
                let loc = self.loc(id.span);
                self.tree
                    .declare(scope, Binding::new(&id.name, BindingKind::Prop, scope, loc));
            }
            BindingPattern::AssignmentPattern(ap) => {
                self.bind_pattern_props(scope, &ap.left);
            }
            BindingPattern::ObjectPattern(obj) => {
                for prop in &obj.properties {
                    self.bind_pattern_props(scope, &prop.value);
                }
                if let Some(rest) = &obj.rest {
                    self.bind_pattern_prop_rest(scope, &rest.argument);
                }
            }
            BindingPattern::ArrayPattern(arr) => {
                for elem in arr.elements.iter().flatten() {
                    self.bind_pattern_props(scope, elem);
                }
                if let Some(rest) = &arr.rest {
                    self.bind_pattern_prop_rest(scope, &rest.argument);
                }
            }
        }
    }

    fn bind_pattern_prop_rest(&mut self, scope: ScopeId, pattern: &BindingPattern) {
        match pattern {
            BindingPattern::BindingIdentifier(id) => {
                let loc = self.loc(id.span);
                self.tree
                    .declare(scope, Binding::new(&id.name, BindingKind::PropRest, scope, loc));
            }
            _ => self.bind_pattern_plain(scope, pattern),
        }
    }

    fn bind_pattern_plain(&mut self, scope: ScopeId, pattern: &BindingPattern) {
        match pattern {
            BindingPattern::BindingIdentifier(id) => {
                let loc = self.loc(id.span);
                self.tree
                    .declare(scope, Binding::new(&id.name, BindingKind::Plain, scope, loc));
            }
            BindingPattern::ObjectPattern(obj) => {
                for prop in &obj.properties {
                    self.bind_pattern_plain(scope, &prop.value);
                }
                if let Some(rest) = &obj.rest {
                    self.bind_pattern_plain(scope, &rest.argument);
                }
            }
            BindingPattern::ArrayPattern(arr) => {
                for elem in arr.elements.iter().flatten() {
                    self.bind_pattern_plain(scope, elem);
                }
                if let Some(rest) = &arr.rest {
                    self.bind_pattern_plain(scope, &rest.argument);
                }
            }
            BindingPattern::AssignmentPattern(ap) => {
                self.bind_pattern_plain(scope, &ap.left);
            }
        }
    }

    fn free_reactive_deps(&self, scope: ScopeId, expr: &Expression) -> BTreeSet<String> {
        free_reactive_deps(&self.tree, scope, expr)
    }

    fn is_component_or_hook(&self, name: Option<&str>, body: &FunctionBody) -> bool {
        if let Some(n) = name {
            if n.starts_with("use") && n.len() > 3 && n.as_bytes()[3].is_ascii_uppercase() {
                return true;
            }
        }
        body_returns_jsx(body)
    }

    fn visit_statements(&mut self, scope: ScopeId, stmts: &oxc_allocator::Vec<Statement>) -> Result<(), CompileError> {
        for stmt in stmts {
            self.visit_statement(scope, stmt)?;
        }
        Ok(())
    }

    fn visit_statement(&mut self, scope: ScopeId, stmt: &Statement) -> Result<(), CompileError> {
        match stmt {
            Statement::ImportDeclaration(_) => {}
            Statement::VariableDeclaration(decl) => self.visit_variable_declaration(scope, decl)?,
            Statement::ExpressionStatement(expr_stmt) => {
                self.check_effect_call(scope, &expr_stmt.expression)?;
                self.visit_expression_for_nested_functions(scope, &expr_stmt.expression)?;
            }
            Statement::BlockStatement(block) => {
                let child = self.enter_scope(scope, ScopeKind::Block, block.span);
                self.visit_statements(child, &block.body)?;
            }
            Statement::IfStatement(if_stmt) => {
                self.control_depth += 1;
                let then_scope = self.enter_scope(scope, ScopeKind::Block, if_stmt.consequent.span());
                self.visit_statement(then_scope, &if_stmt.consequent)?;
                if let Some(alt) = &if_stmt.alternate {
                    let alt_scope = self.enter_scope(scope, ScopeKind::Block, alt.span());
                    self.visit_statement(alt_scope, alt)?;
                }
                self.control_depth -= 1;
            }
            Statement::SwitchStatement(switch) => {
                self.control_depth += 1;
                for case in &switch.cases {
                    let case_scope = self.enter_scope(scope, ScopeKind::Block, case.span);
                    self.visit_statements(case_scope, &case.consequent)?;
                }
                self.control_depth -= 1;
            }
            Statement::ForStatement(f) => {
                self.control_depth += 1;
                let body_scope = self.enter_scope(scope, ScopeKind::Block, f.body.span());
                if let Some(ForStatementInit::VariableDeclaration(vd)) = &f.init {
                    self.visit_variable_declaration(body_scope, vd)?;
                }
                self.visit_statement(body_scope, &f.body)?;
                self.control_depth -= 1;
            }
            Statement::ForInStatement(f) => {
                self.control_depth += 1;
                let body_scope = self.enter_scope(scope, ScopeKind::Block, f.body.span());
                if let ForStatementLeft::VariableDeclaration(vd) = &f.left {
                    self.visit_variable_declaration(body_scope, vd)?;
                }
                self.visit_statement(body_scope, &f.body)?;
                self.control_depth -= 1;
            }
            Statement::ForOfStatement(f) => {
                self.control_depth += 1;
                let body_scope = self.enter_scope(scope, ScopeKind::Block, f.body.span());
                if let ForStatementLeft::VariableDeclaration(vd) = &f.left {
                    self.visit_variable_declaration(body_scope, vd)?;
                }
                self.visit_statement(body_scope, &f.body)?;
                self.control_depth -= 1;
            }
            Statement::WhileStatement(w) => {
                self.control_depth += 1;
                let body_scope = self.enter_scope(scope, ScopeKind::Block, w.body.span());
                self.visit_statement(body_scope, &w.body)?;
                self.control_depth -= 1;
            }
            Statement::DoWhileStatement(w) => {
                self.control_depth += 1;
                let body_scope = self.enter_scope(scope, ScopeKind::Block, w.body.span());
                self.visit_statement(body_scope, &w.body)?;
                self.control_depth -= 1;
            }
            Statement::TryStatement(t) => {
                let try_scope = self.enter_scope(scope, ScopeKind::Block, t.block.span);
                self.visit_statements(try_scope, &t.block.body)?;
                if let Some(handler) = &t.handler {
                    let catch_scope = self.enter_scope(scope, ScopeKind::Block, handler.body.span);
                    if let Some(param) = &handler.param {
                        self.bind_pattern_plain(catch_scope, &param.pattern);
                    }
                    self.visit_statements(catch_scope, &handler.body.body)?;
                }
                if let Some(finalizer) = &t.finalizer {
                    let fin_scope = self.enter_scope(scope, ScopeKind::Block, finalizer.span);
                    self.visit_statements(fin_scope, &finalizer.body)?;
                }
            }
            Statement::FunctionDeclaration(func) => {
                self.visit_function(scope, func.id.as_ref().map(|i| i.name.as_str()), func)?;
            }
            Statement::ReturnStatement(ret) => {
                if let Some(arg) = &ret.argument {
                    self.visit_expression_for_nested_functions(scope, arg)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn visit_variable_declaration(
        &mut self,
        scope: ScopeId,
        decl: &VariableDeclaration,
    ) -> Result<(), CompileError> {
        for declarator in &decl.declarations {
            self.visit_declarator(scope, decl.kind, declarator)?;
        }
        Ok(())
    }

    fn visit_declarator(
        &mut self,
        scope: ScopeId,
        kind: VariableDeclarationKind,
        declarator: &VariableDeclarator,
    ) -> Result<(), CompileError> {
        let Some(init) = &declarator.init else {
            self.bind_pattern_plain(scope, &declarator.id);
            return Ok(());
        };

        if let Expression::CallExpression(call) = unwrap_parens(init) {
            if let Expression::Identifier(callee) = &call.callee {
                let callee_name = callee.name.as_str();
                if self.macros.is_state(callee_name) {
                    return self.bind_state(scope, declarator, call);
                }
                if self.macros.is_memo(callee_name) {
                    return self.bind_explicit_memo(scope, declarator, call);
                }
                if self.macros.is_store(callee_name) {
                    return self.bind_store(scope, declarator);
                }
                if let Some(shape) = self.hook_returns.get(callee_name).cloned() {
                    self.bind_hook_return(scope, &declarator.id, &shape);
                    for arg in &call.arguments {
                        if let Some(expr) = arg.as_expression() {
                            self.visit_expression_for_nested_functions(scope, expr)?;
                        }
                    }
                    return Ok(());
                }
            }
        }

        if kind == VariableDeclarationKind::Const {
            if let BindingPattern::BindingIdentifier(id) = &declarator.id {
                let deps = self.free_reactive_deps(scope, init);
                if !deps.is_empty() {
                    let is_pure_alias = matches!(unwrap_parens(init), Expression::Identifier(_))
                        && deps.len() == 1;
                    let loc = self.loc(id.span);
                    let kind = if is_pure_alias {
                        BindingKind::Alias
                    } else {
                        BindingKind::Derived
                    };
                    let mut binding = Binding::new(&id.name, kind, scope, loc);
                    binding.deps = deps;
                    self.tree.declare(scope, binding);
                    self.visit_expression_for_nested_functions(scope, init)?;
                    return Ok(());
                }
            } else if let BindingPattern::ObjectPattern(_) | BindingPattern::ArrayPattern(_) =
                &declarator.id
            {
                if self.is_reactive_container(scope, init) {
                    self.bind_destructured_alias(scope, &declarator.id);
                    self.visit_expression_for_nested_functions(scope, init)?;
                    return Ok(());
                }
            }
        }

        self.bind_pattern_plain(scope, &declarator.id);
        self.visit_expression_for_nested_functions(scope, init)
    }

    fn is_reactive_container(&self, scope: ScopeId, expr: &Expression) -> bool {
        if let Expression::Identifier(id) = unwrap_parens(expr) {
            matches!(
                self.tree.resolve(scope, id.name.as_str()).map(|b| b.kind),
                Some(BindingKind::State | BindingKind::Store)
            )
        } else {
            false
        }
    }

    fn bind_destructured_alias(&mut self, scope: ScopeId, pattern: &BindingPattern) {
        match pattern {
            BindingPattern::BindingIdentifier(id) => {
                let loc = self.loc(id.span);
                self.tree.declare(
                    scope,
                    Binding::new(&id.name, BindingKind::DestructuredStateAlias, scope, loc),
                );
            }
            BindingPattern::ObjectPattern(obj) => {
                for prop in &obj.properties {
                    self.bind_destructured_alias(scope, &prop.value);
                }
                if let Some(rest) = &obj.rest {
                    self.bind_pattern_plain(scope, &rest.argument);
                }
            }
            BindingPattern::ArrayPattern(arr) => {
                for elem in arr.elements.iter().flatten() {
                    self.bind_destructured_alias(scope, elem);
                }
            }
            BindingPattern::AssignmentPattern(ap) => self.bind_destructured_alias(scope, &ap.left),
        }
    }

    fn bind_state(
        &mut self,
        scope: ScopeId,
        declarator: &VariableDeclarator,
        call: &CallExpression,
    ) -> Result<(), CompileError> {
        self.check_macro_placement(call.span, "state()")?;
        let BindingPattern::BindingIdentifier(id) = &declarator.id else {
            return Err(self.err(
                error_code::STATE_DESTRUCTURED,
                "state() target must be a plain identifier, not a destructuring pattern",
                declarator.id.span(),
            ));
        };
        let loc = self.loc(id.span);
        let mut binding = Binding::new(&id.name, BindingKind::State, scope, loc);
        let counter = self.slot_counters.last_mut().expect("inside a host function");
        binding.slot = Some(*counter);
        *counter += 1;
        self.tree.declare(scope, binding);
        for arg in &call.arguments {
            if let Some(expr) = arg.as_expression() {
                self.visit_expression_for_nested_functions(scope, expr)?;
            }
        }
        Ok(())
    }

    fn bind_explicit_memo(
        &mut self,
        scope: ScopeId,
        declarator: &VariableDeclarator,
        call: &CallExpression,
    ) -> Result<(), CompileError> {
        if let BindingPattern::BindingIdentifier(id) = &declarator.id {
            let loc = self.loc(id.span);
            self.tree
                .declare(scope, Binding::new(&id.name, BindingKind::DerivedMemo, scope, loc));
        }
        for arg in &call.arguments {
            if let Some(expr) = arg.as_expression() {
                self.visit_expression_for_nested_functions(scope, expr)?;
            }
        }
        Ok(())
    }

    fn bind_store(&mut self, scope: ScopeId, declarator: &VariableDeclarator) -> Result<(), CompileError> {
        if let BindingPattern::BindingIdentifier(id) = &declarator.id {
            let loc = self.loc(id.span);
            self.tree
                .declare(scope, Binding::new(&id.name, BindingKind::Store, scope, loc));
        }
        Ok(())
    }

    /// Binds a hook call's destructured result per its `@fictReturn`
    /// annotation (spec §4.8 item 6): each tagged field/position becomes a
    /// `State`/`DerivedMemo` binding instead of the generic `Plain` a bare
    /// call's destructuring would otherwise get, so `lowering::rewrite_read`/
    /// `rewrite_write` treat it exactly like a directly-declared signal or
    /// memo. A name this annotation doesn't cover (an extra destructured
    /// field, a single-tag hook whose caller destructures anyway) falls back
    /// to `bind_pattern_plain`.
    fn bind_hook_return(&mut self, scope: ScopeId, pattern: &BindingPattern, shape: &FictReturnShape) {
        match (shape, pattern) {
            (FictReturnShape::Single(tag), BindingPattern::BindingIdentifier(id)) => {
                let loc = self.loc(id.span);
                self.tree.declare(scope, Binding::new(&id.name, tag.binding_kind(), scope, loc));
            }
            (FictReturnShape::Object(fields), BindingPattern::ObjectPattern(obj)) => {
                for prop in &obj.properties {
                    let key_name = match &prop.key {
                        PropertyKey::StaticIdentifier(id) => Some(id.name.as_str()),
                        PropertyKey::StringLiteral(s) => Some(s.value.as_str()),
                        _ => None,
                    };
                    match key_name.and_then(|k| fields.get(k)) {
                        Some(tag) => {
                            if let BindingPattern::BindingIdentifier(id) = &prop.value {
                                let loc = self.loc(id.span);
                                self.tree.declare(scope, Binding::new(&id.name, tag.binding_kind(), scope, loc));
                                continue;
                            }
                            self.bind_pattern_plain(scope, &prop.value);
                        }
                        None => self.bind_pattern_plain(scope, &prop.value),
                    }
                }
                if let Some(rest) = &obj.rest {
                    self.bind_pattern_plain(scope, &rest.argument);
                }
            }
            (FictReturnShape::Array(tags), BindingPattern::ArrayPattern(arr)) => {
                for (index, elem) in arr.elements.iter().enumerate() {
                    let Some(elem) = elem else { continue };
                    match tags.get(index) {
                        Some(tag) => {
                            if let BindingPattern::BindingIdentifier(id) = elem {
                                let loc = self.loc(id.span);
                                self.tree.declare(scope, Binding::new(&id.name, tag.binding_kind(), scope, loc));
                                continue;
                            }
                            self.bind_pattern_plain(scope, elem);
                        }
                        None => self.bind_pattern_plain(scope, elem),
                    }
                }
                if let Some(rest) = &arr.rest {
                    self.bind_pattern_plain(scope, &rest.argument);
                }
            }
            _ => self.bind_pattern_plain(scope, pattern),
        }
    }

    fn check_effect_call(&mut self, scope: ScopeId, expr: &Expression) -> Result<(), CompileError> {
        if let Expression::CallExpression(call) = unwrap_parens(expr) {
            if let Expression::Identifier(callee) = &call.callee {
                if self.macros.is_effect(callee.name.as_str()) {
                    self.check_macro_placement(call.span, "effect()")?;
                    let _ = scope;
                }
            }
        }
        Ok(())
    }

    /// Walks into arrow/function expressions reachable from `expr` so nested
    /// macro calls (illegal ones) are still discovered, and descends into
    /// their bodies with the host-depth/control-depth bookkeeping updated.
    fn visit_expression_for_nested_functions(
        &mut self,
        scope: ScopeId,
        expr: &Expression,
    ) -> Result<(), CompileError> {
        struct Finder<'x, 'a> {
            analyzer: &'x mut Analyzer<'a>,
            scope: ScopeId,
            error: Option<CompileError>,
        }
        impl<'x, 'a> Visit<'_> for Finder<'x, 'a> {
            fn visit_arrow_function_expression(&mut self, it: &ArrowFunctionExpression<'_>) {
                if self.error.is_some() {
                    return;
                }
                if let Err(e) = self.analyzer.visit_function_like(self.scope, None, &it.params, &it.body, false) {
                    self.error = Some(e);
                }
            }
            fn visit_function(&mut self, it: &Function<'_>, _flags: oxc_syntax::scope::ScopeFlags) {
                if self.error.is_some() {
                    return;
                }
                if let Some(body) = &it.body {
                    let name = it.id.as_ref().map(|i| i.name.to_string());
                    if let Err(e) =
                        self.analyzer
                            .visit_function_like(self.scope, name.as_deref(), &it.params, body, true)
                    {
                        self.error = Some(e);
                    }
                }
            }
        }
        let mut finder = Finder {
            analyzer: self,
            scope,
            error: None,
        };
        finder.visit_expression(expr);
        if let Some(e) = finder.error {
            return Err(e);
        }
        Ok(())
    }

    fn visit_function(&mut self, scope: ScopeId, name: Option<&str>, func: &Function) -> Result<(), CompileError> {
        if let Some(body) = &func.body {
            self.visit_function_like(scope, name, &func.params, body, true)?;
        }
        Ok(())
    }

    fn visit_function_like(
        &mut self,
        scope: ScopeId,
        name: Option<&str>,
        params: &FormalParameters,
        body: &FunctionBody,
        statement_style: bool,
    ) -> Result<(), CompileError> {
        let is_host = self.is_component_or_hook(name, body);
        let new_depth = if is_host {
            Some(1)
        } else {
            self.current_host_depth().map(|d| d + 1)
        };
        self.host_depth.push(new_depth);
        if is_host {
            self.slot_counters.push(0);
        }
        let saved_control_depth = self.control_depth;
        self.control_depth = 0;

        let fn_scope = self.enter_scope(scope, ScopeKind::Function, body.span);
        self.bind_params(fn_scope, params, is_host);
        let result = self.visit_statements(fn_scope, &body.statements);

        self.control_depth = saved_control_depth;
        if is_host {
            self.slot_counters.pop();
        }
        self.host_depth.pop();
        let _ = statement_style;
        result
    }
}

fn body_returns_jsx(body: &FunctionBody) -> bool {
    struct ReturnFinder {
        found: bool,
    }
    impl<'a> Visit<'a> for ReturnFinder {
        fn visit_return_statement(&mut self, stmt: &ReturnStatement<'a>) {
            if let Some(arg) = &stmt.argument {
                match unwrap_parens(arg) {
                    Expression::JSXElement(_) | Expression::JSXFragment(_) => self.found = true,
                    Expression::CallExpression(call) => {
                        if let Expression::Identifier(id) = &call.callee {
                            if id.name.chars().next().is_some_and(|c| c.is_uppercase()) {
                                self.found = true;
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        // Do not descend into nested functions: only this function's own
        // top-level returns count (spec §4.8: "any return statement").
        fn visit_function(&mut self, _it: &Function<'a>, _flags: oxc_syntax::scope::ScopeFlags) {}
        fn visit_arrow_function_expression(&mut self, _it: &ArrowFunctionExpression<'a>) {}
    }
    let mut finder = ReturnFinder { found: false };
    for stmt in &body.statements {
        finder.visit_statement(stmt);
        if finder.found {
            return true;
        }
    }
    false
}

/// Free identifiers in `expr` that resolve, via `scope`'s chain, to a
/// reactive binding — shared with `region.rs`, which needs the same check
/// to decide whether a branch-local reassignment depends on state.
pub fn free_reactive_deps(tree: &ScopeTree, scope: ScopeId, expr: &Expression) -> BTreeSet<String> {
    let mut collector = FreeVarCollector::default();
    collector.visit_expression(expr);
    collector
        .refs
        .into_iter()
        .filter(|name| !collector.locals.contains(name))
        .filter(|name| {
            matches!(
                tree.resolve(scope, name).map(|b| b.kind),
                Some(
                    BindingKind::State
                        | BindingKind::Derived
                        | BindingKind::DerivedMemo
                        | BindingKind::DerivedGetter
                        | BindingKind::Alias
                        | BindingKind::Prop
                        | BindingKind::Store
                )
            )
        })
        .collect()
}

#[derive(Default)]
struct FreeVarCollector {
    refs: BTreeSet<String>,
    locals: BTreeSet<String>,
}

impl<'a> Visit<'a> for FreeVarCollector {
    fn visit_identifier_reference(&mut self, ident: &IdentifierReference<'a>) {
        self.refs.insert(ident.name.to_string());
    }

    fn visit_binding_identifier(&mut self, ident: &BindingIdentifier<'a>) {
        self.locals.insert(ident.name.to_string());
    }

    fn visit_object_property(&mut self, prop: &ObjectProperty<'a>) {
        if !prop.computed {
            self.visit_expression(&prop.value);
            return;
        }
        oxc_ast_visit::walk::walk_object_property(self, prop);
    }

    fn visit_member_expression(&mut self, expr: &MemberExpression<'a>) {
        match expr {
            MemberExpression::StaticMemberExpression(s) => self.visit_expression(&s.object),
            MemberExpression::PrivateFieldExpression(p) => self.visit_expression(&p.object),
            MemberExpression::ComputedMemberExpression(c) => {
                self.visit_expression(&c.object);
                self.visit_expression(&c.expression);
            }
        }
    }
}

/// Runs the macro & scope pass (spec §4.1 / §2 step 2) over a full program.
/// `source` is the original text the program was parsed from — needed only
/// to slice a hook's leading comment for `@fictReturn` parsing (spec §4.8
/// item 6); every other pass works from the parsed AST alone.
pub fn analyze(program: &Program, file: &str, lines: &LineIndex, source: &str) -> Result<AnalysisResult, CompileError> {
    let macros = collect_macro_imports(program);
    let hook_returns = collect_fict_returns(program, source);
    let (tree, module_scope) = ScopeTree::new();
    let mut analyzer = Analyzer {
        tree,
        macros,
        lines,
        file: file.to_string(),
        host_depth: Vec::new(),
        control_depth: 0,
        slot_counters: Vec::new(),
        scope_by_span: HashMap::new(),
        hook_returns,
    };

    // Cheap pre-check: if any call to a bare `state`/`effect` identifier
    // appears anywhere and no import bound it, that is a missing-import
    // hard error (spec §4.1 "Imports").
    if !analyzer.macros.any() && program_mentions_macro_names(program) {
        return Err(CompileError::new(
            error_code::MISSING_MACRO_IMPORT,
            format!("macro intrinsics must be imported from \"{}\"", MACRO_MODULE),
            file,
            1,
            1,
        ));
    }

    analyzer.visit_statements(module_scope, &program.body)?;
    Ok(AnalysisResult {
        tree: analyzer.tree,
        module_scope,
        scope_by_span: analyzer.scope_by_span,
    })
}

fn program_mentions_macro_names(program: &Program) -> bool {
    struct Finder {
        found: bool,
    }
    impl<'a> Visit<'a> for Finder {
        fn visit_identifier_reference(&mut self, ident: &IdentifierReference<'a>) {
            if matches!(ident.name.as_str(), "state" | "effect") {
                self.found = true;
            }
        }
    }
    let mut finder = Finder { found: false };
    finder.visit_program(program);
    finder.found
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxc_allocator::Allocator;
    use oxc_parser::Parser;
    use oxc_span::SourceType;

    fn analyze_src(src: &str) -> Result<AnalysisResult, CompileError> {
        let allocator = Allocator::default();
        let source_type = SourceType::default().with_typescript(true).with_jsx(true).with_module(true);
        let ret = Parser::new(&allocator, src, source_type).parse();
        let lines = LineIndex::new(src);
        analyze(&ret.program, "test.tsx", &lines, src)
    }

    #[test]
    fn state_inside_component_gets_a_slot() {
        let src = r#"
            import { state } from "fict";
            function Counter() {
                const count = state(0);
                return <div>{count}</div>;
            }
        "#;
        let result = analyze_src(src).expect("should analyze cleanly");
        let binding = (0..result.tree.len())
            .find_map(|id| result.tree.get(id).bindings.get("count").cloned())
            .expect("count binding exists");
        assert_eq!(binding.kind, BindingKind::State);
        assert_eq!(binding.slot, Some(0));
    }

    #[test]
    fn state_at_module_scope_is_a_hard_error() {
        let src = r#"
            import { state } from "fict";
            const count = state(0);
        "#;
        let err = analyze_src(src).unwrap_err();
        assert_eq!(err.code, error_code::STATE_AT_MODULE_SCOPE);
    }

    #[test]
    fn state_destructured_is_rejected() {
        let src = r#"
            import { state } from "fict";
            function Counter() {
                const [a, b] = state(0);
                return <div>{a}</div>;
            }
        "#;
        let err = analyze_src(src).unwrap_err();
        assert_eq!(err.code, error_code::STATE_DESTRUCTURED);
    }

    #[test]
    fn single_identifier_initializer_is_an_alias_not_a_derivation() {
        let src = r#"
            import { state } from "fict";
            function Counter() {
                const count = state(0);
                const alias = count;
                return <div>{alias}</div>;
            }
        "#;
        let result = analyze_src(src).expect("should analyze cleanly");
        let binding = (0..result.tree.len())
            .find_map(|id| result.tree.get(id).bindings.get("alias").cloned())
            .expect("alias binding exists");
        assert_eq!(binding.kind, BindingKind::Alias);
    }

    #[test]
    fn missing_macro_import_is_a_hard_error() {
        let src = r#"
            function Counter() {
                const count = state(0);
                return <div>{count}</div>;
            }
        "#;
        let err = analyze_src(src).unwrap_err();
        assert_eq!(err.code, error_code::MISSING_MACRO_IMPORT);
    }

    #[test]
    fn block_scope_is_discoverable_by_span() {
        let src = r#"
            import { state } from "fict";
            function Counter() {
                const count = state(0);
                if (count > 0) {
                    const doubled = count * 2;
                }
                return <div>{count}</div>;
            }
        "#;
        let result = analyze_src(src).expect("should analyze cleanly");
        assert!(result.tree.len() > 2);
    }

    #[test]
    fn fict_return_object_shape_tags_each_destructured_field() {
        let src = r#"
            /**
             * @fictReturn { count: signal, double: memo }
             */
            function useCounter() {
                return { count: 0, double: 0 };
            }
            function Counter() {
                const { count, double } = useCounter();
                return <div>{count}{double}</div>;
            }
        "#;
        let result = analyze_src(src).expect("should analyze cleanly");
        let count = (0..result.tree.len())
            .find_map(|id| result.tree.get(id).bindings.get("count").cloned())
            .expect("count binding exists");
        let double = (0..result.tree.len())
            .find_map(|id| result.tree.get(id).bindings.get("double").cloned())
            .expect("double binding exists");
        assert_eq!(count.kind, BindingKind::State);
        assert_eq!(double.kind, BindingKind::DerivedMemo);
    }

    #[test]
    fn fict_return_array_shape_tags_each_destructured_position() {
        let src = r#"
            /**
             * @fictReturn [signal, memo]
             */
            function useToggle() {
                return [false, false];
            }
            function Widget() {
                const [value, derivedFlag] = useToggle();
                return <div>{value}{derivedFlag}</div>;
            }
        "#;
        let result = analyze_src(src).expect("should analyze cleanly");
        let value = (0..result.tree.len())
            .find_map(|id| result.tree.get(id).bindings.get("value").cloned())
            .expect("value binding exists");
        let derived_flag = (0..result.tree.len())
            .find_map(|id| result.tree.get(id).bindings.get("derivedFlag").cloned())
            .expect("derivedFlag binding exists");
        assert_eq!(value.kind, BindingKind::State);
        assert_eq!(derived_flag.kind, BindingKind::DerivedMemo);
    }

    #[test]
    fn fict_return_single_shape_tags_a_non_destructured_binding() {
        let src = r#"
            /**
             * @fictReturn signal
             */
            function useShared() {
                return 0;
            }
            function Widget() {
                const shared = useShared();
                return <div>{shared}</div>;
            }
        "#;
        let result = analyze_src(src).expect("should analyze cleanly");
        let shared = (0..result.tree.len())
            .find_map(|id| result.tree.get(id).bindings.get("shared").cloned())
            .expect("shared binding exists");
        assert_eq!(shared.kind, BindingKind::State);
    }

    #[test]
    fn hook_without_fict_return_annotation_destructures_as_plain() {
        let src = r#"
            function useUnannotated() {
                return { value: 0 };
            }
            function Widget() {
                const { value } = useUnannotated();
                return <div>{value}</div>;
            }
        "#;
        let result = analyze_src(src).expect("should analyze cleanly");
        let value = (0..result.tree.len())
            .find_map(|id| result.tree.get(id).bindings.get("value").cloned())
            .expect("value binding exists");
        assert_eq!(value.kind, BindingKind::Plain);
    }
}
