//! Component-function lowering (spec §4.8): per component/hook body,
//! allocate a context, turn state/derivation/store declarations into slot
//! acquisitions, and turn destructured props into tracked getters.
//!
//! Grounded on the teacher's per-function bookkeeping in `jsx_lowerer.rs`'s
//! `ScriptRenamer` (one visitor walking every function body once, deciding
//! per declaration what it rewrites to) and `scope.rs`'s own host-function
//! detection (`is_component_or_hook`, `body_returns_jsx`), reimplemented
//! here in a small standalone form since this pass mutates the tree that
//! module only ever reads.

use crate::lowering::{block_thunk, call0, const_decl, invoke0, region_accessor_name, thunk, LoweringContext};
use crate::policy::DerivationPolicy;
use crate::region::Region;
use crate::scope::{BindingKind, ScopeId, MACRO_MODULE};
use crate::symbols::SymbolGen;
use oxc_allocator::{Allocator, CloneIn};
use oxc_ast::ast::*;
use oxc_ast::AstBuilder;
use oxc_ast_visit::walk_mut::{walk_program, walk_statement};
use oxc_ast_visit::{Visit, VisitMut};
use oxc_span::SPAN;
use oxc_syntax::operator::LogicalOperator;
use std::collections::{HashMap, HashSet};

/// Local name every component/hook body's context is bound to.
const CONTEXT_LOCAL: &str = "__fictCtx";
/// Local name a destructured props parameter is replaced with.
const PROPS_LOCAL: &str = "__props";

#[derive(Default)]
struct MacroLocals {
    state: Option<String>,
    effect: Option<String>,
    memo: Option<String>,
    store: Option<String>,
}

/// Re-derives which local names the macro intrinsics were imported as —
/// duplicated from `scope.rs`'s private `collect_macro_imports` rather than
/// exposed from there, the same way `policy.rs` keeps its own `SinkCollector`
/// instead of reusing the analyzer's.
fn local_macro_names(program: &Program) -> MacroLocals {
    let mut locals = MacroLocals::default();
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
                            "state" => locals.state = Some(local),
                            "effect" => locals.effect = Some(local),
                            "memo" => locals.memo = Some(local),
                            "store" => locals.store = Some(local),
                            _ => {}
                        }
                    }
                }
            }
        }
    }
    locals
}

/// Which region (if any) a top-level statement belongs to — a `const`/`let`
/// declaring one of the region's outputs, or the `if` statement a
/// conditional region replaces.
fn stmt_region_membership(stmt: &Statement, member_names: &HashMap<String, usize>, condition_spans: &HashMap<u32, usize>) -> Option<usize> {
    match stmt {
        Statement::VariableDeclaration(decl) => decl.declarations.iter().find_map(|d| {
            let BindingPattern::BindingIdentifier(id) = &d.id else { return None };
            member_names.get(id.name.as_str()).copied()
        }),
        Statement::IfStatement(if_stmt) => condition_spans.get(&if_stmt.span.start).copied(),
        _ => None,
    }
}

/// Direct (non-nested) `name = expr;` assignments inside one `if`/`else`
/// arm, restricted to `names` and cloned into the arena so the caller can
/// keep them after the original `if` statement is discarded — the owned
/// counterpart of `region::direct_assigns`, which only needs to borrow.
fn direct_assigns_cloned<'a>(arm: &Statement<'a>, names: &[String], allocator: &'a Allocator) -> HashMap<String, Expression<'a>> {
    let mut out = HashMap::new();
    let stmts: &[Statement<'a>] = match arm {
        Statement::BlockStatement(b) => &b.body,
        other => std::slice::from_ref(other),
    };
    for stmt in stmts {
        let Statement::ExpressionStatement(es) = stmt else { continue };
        let Expression::AssignmentExpression(assign) = &es.expression else { continue };
        if assign.operator != oxc_syntax::operator::AssignmentOperator::Assign {
            continue;
        }
        let AssignmentTarget::AssignmentTargetIdentifier(id) = &assign.left else { continue };
        let name = id.name.to_string();
        if names.iter().any(|c| c == &name) {
            out.insert(name, assign.right.clone_in(allocator));
        }
    }
    out
}

fn looks_like_component_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_uppercase())
}

/// Shallow: only this function's own top-level returns count (spec §4.8).
fn body_returns_jsx(body: &FunctionBody) -> bool {
    struct Finder {
        found: bool,
    }
    impl<'a> oxc_ast_visit::Visit<'a> for Finder {
        fn visit_return_statement(&mut self, stmt: &ReturnStatement<'a>) {
            if let Some(arg) = &stmt.argument {
                match arg {
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
        fn visit_function(&mut self, _it: &Function<'a>, _flags: oxc_syntax::scope::ScopeFlags) {}
        fn visit_arrow_function_expression(&mut self, _it: &ArrowFunctionExpression<'a>) {}
    }
    let mut finder = Finder { found: false };
    for stmt in &body.statements {
        finder.visit_statement(stmt);
    }
    finder.found
}

fn is_component_or_hook(name: Option<&str>, body: &FunctionBody) -> bool {
    if let Some(n) = name {
        if n.starts_with("use") && n.len() > 3 && n.as_bytes()[3].is_ascii_uppercase() {
            return true;
        }
        if looks_like_component_name(n) {
            return true;
        }
    }
    body_returns_jsx(body)
}

/// Where a destructured prop name's value reads from: directly off the
/// props object (`Key`), off a field of an already-bound getter (`Field`),
/// or off a numeric index of one (`Index`) — the latter two back recursion
/// into a nested pattern.
enum PropSource {
    Key(String),
    Field(String, String),
    Index(String, usize),
}

pub struct ComponentLowerer<'a, 'r> {
    ast: AstBuilder<'a>,
    ctx: &'r LoweringContext<'r>,
    macros: MacroLocals,
    symbols: SymbolGen,
}

impl<'a, 'r> ComponentLowerer<'a, 'r> {
    pub fn new(allocator: &'a Allocator, ctx: &'r LoweringContext<'r>, program: &Program<'a>) -> Self {
        Self {
            ast: AstBuilder::new(allocator),
            ctx,
            macros: local_macro_names(program),
            symbols: SymbolGen::new(),
        }
    }

    fn ctx_identifier(&self) -> Expression<'a> {
        self.ast.expression_identifier(SPAN, CONTEXT_LOCAL)
    }

    fn ctx_member_call(&self, method: &str, args: oxc_allocator::Vec<'a, Argument<'a>>) -> Expression<'a> {
        let callee = Expression::from(self.ast.member_expression_static(
            SPAN,
            self.ctx_identifier(),
            self.ast.identifier_name(SPAN, self.ast.allocator.alloc_str(method)),
            false,
        ));
        self.ast.expression_call(SPAN, callee, None::<oxc_allocator::Box<TSTypeParameterInstantiation>>, args, false)
    }

    fn free_call(&self, name: &str, args: oxc_allocator::Vec<'a, Argument<'a>>) -> Expression<'a> {
        let callee = self.ast.expression_identifier(SPAN, self.ast.allocator.alloc_str(name));
        self.ast.expression_call(SPAN, callee, None::<oxc_allocator::Box<TSTypeParameterInstantiation>>, args, false)
    }

    fn lower_function(&mut self, name: Option<&str>, params: &mut oxc_allocator::Box<'a, FormalParameters<'a>>, body: &mut FunctionBody<'a>) {
        if !is_component_or_hook(name, body) {
            return;
        }
        let scope = self.ctx.scope_for_span(body.span);

        let mut prelude = Vec::new();
        prelude.push(const_decl(&self.ast, CONTEXT_LOCAL, self.free_call("pushComponentContext", self.ast.vec())));
        self.lower_props_param(params, &mut prelude);

        let old_statements = std::mem::replace(&mut body.statements, self.ast.vec());
        for stmt in prelude {
            body.statements.push(stmt);
        }
        for stmt in old_statements {
            body.statements.push(stmt);
        }

        self.materialize_regions(scope, &mut body.statements);
        self.rewrite_top_level(scope, &mut body.statements);
    }

    /// Replaces every region's member declarations with one materialized
    /// `const __regionN = ctx.useMemo(...)` (spec §4.3). Must run before
    /// `rewrite_top_level`, which would otherwise try to rewrite a region
    /// member's own `const`/`let` declarator as a plain binding — by the
    /// time it runs, those declarators are already gone.
    fn materialize_regions(&mut self, scope: ScopeId, stmts: &mut oxc_allocator::Vec<'a, Statement<'a>>) {
        let ctx = self.ctx;
        let region_ids: Vec<usize> = ctx.regions.regions.iter().filter(|r| r.block_scope == scope).map(|r| r.id).collect();
        if region_ids.is_empty() {
            return;
        }

        let mut replacements: HashMap<usize, Statement<'a>> = HashMap::new();
        let mut member_names: HashMap<String, usize> = HashMap::new();
        let mut condition_spans: HashMap<u32, usize> = HashMap::new();
        for &rid in &region_ids {
            let region = &ctx.regions.regions[rid];
            let replacement = match region.condition_span {
                None => self.build_const_region(region, stmts),
                Some(span) => {
                    condition_spans.insert(span, rid);
                    self.build_conditional_region(region, stmts)
                }
            };
            replacements.insert(rid, replacement);
            for name in &region.outputs {
                member_names.insert(name.clone(), rid);
            }
        }

        let old = std::mem::replace(stmts, self.ast.vec());
        let mut inserted: HashSet<usize> = HashSet::new();
        for stmt in old {
            match stmt_region_membership(&stmt, &member_names, &condition_spans) {
                Some(rid) => {
                    if inserted.insert(rid) {
                        stmts.push(replacements.remove(&rid).expect("a replacement was built for every region id"));
                    }
                }
                None => stmts.push(stmt),
            }
        }
    }

    /// Builds `const __regionN = ctx.useMemo(() => ({ a: ..., b: ... }));`
    /// for a plain sibling-derivation region, immediately invoking each
    /// member's original `derived(() => expr)` arrow to recover `expr` as
    /// the object property's value.
    fn build_const_region(&mut self, region: &Region, stmts: &oxc_allocator::Vec<'a, Statement<'a>>) -> Statement<'a> {
        let mut props = self.ast.vec();
        for name in &region.outputs {
            let init = stmts.iter().find_map(|stmt| {
                let Statement::VariableDeclaration(decl) = stmt else { return None };
                decl.declarations.iter().find_map(|d| {
                    let BindingPattern::BindingIdentifier(id) = &d.id else { return None };
                    if id.name.as_str() != name.as_str() {
                        return None;
                    }
                    d.init.as_ref().map(|e| e.clone_in(self.ast.allocator))
                })
            });
            let value = match init {
                Some(expr) => self.unwrap_derivation_value(expr),
                None => self.ast.expression_identifier(SPAN, "undefined"),
            };
            props.push(self.object_prop(name, value));
        }
        let obj = self.ast.expression_object(SPAN, props);
        let mut args = self.ast.vec();
        args.push(Argument::from(thunk(&self.ast, obj)));
        let memo_call = self.ctx_member_call("useMemo", args);
        const_decl(&self.ast, &region_accessor_name(region.id), memo_call)
    }

    /// Builds `const __regionN = ctx.useMemo(() => { if (cond) { return {
    /// ... }; } else { return { ... }; } });` for a conditionally-reassigned-
    /// `let` region, rebuilding the `if`'s arms from the original
    /// assignments found in `stmts` — this is the "condition hoisting" spec
    /// §4.3 asks for: the branch only re-evaluates when `useMemo`'s own
    /// dependencies change, never once per read of `a`/`b`.
    fn build_conditional_region(&mut self, region: &Region, stmts: &oxc_allocator::Vec<'a, Statement<'a>>) -> Statement<'a> {
        let target_span = region.condition_span.expect("a conditional region always carries a span");
        let if_stmt = stmts
            .iter()
            .find_map(|stmt| match stmt {
                Statement::IfStatement(if_stmt) if if_stmt.span.start == target_span => Some(if_stmt),
                _ => None,
            })
            .expect("the if statement a conditional region names must still be in its own block");

        let test = if_stmt.test.clone_in(self.ast.allocator);
        let consequent_obj = self.build_arm_object(&if_stmt.consequent, &region.outputs);
        let alternate = if_stmt.alternate.as_ref().expect("a conditional region always has an else arm");
        let alternate_obj = self.build_arm_object(alternate, &region.outputs);

        let mut cons_stmts = self.ast.vec();
        cons_stmts.push(self.ast.statement_return(SPAN, Some(consequent_obj)));
        let cons_block = self.ast.statement_block(SPAN, cons_stmts);

        let mut alt_stmts = self.ast.vec();
        alt_stmts.push(self.ast.statement_return(SPAN, Some(alternate_obj)));
        let alt_block = self.ast.statement_block(SPAN, alt_stmts);

        let new_if = self.ast.statement_if(SPAN, test, cons_block, Some(alt_block));
        let mut body_stmts = self.ast.vec();
        body_stmts.push(new_if);
        let memo_body = block_thunk(&self.ast, body_stmts);

        let mut args = self.ast.vec();
        args.push(Argument::from(memo_body));
        let memo_call = self.ctx_member_call("useMemo", args);
        const_decl(&self.ast, &region_accessor_name(region.id), memo_call)
    }

    fn build_arm_object(&mut self, arm: &Statement<'a>, names: &[String]) -> Expression<'a> {
        let assigns = direct_assigns_cloned(arm, names, self.ast.allocator);
        let mut props = self.ast.vec();
        for name in names {
            let value = match assigns.get(name) {
                Some(expr) => expr.clone_in(self.ast.allocator),
                None => self.ast.expression_identifier(SPAN, "undefined"),
            };
            props.push(self.object_prop(name, value));
        }
        self.ast.expression_object(SPAN, props)
    }

    fn object_prop(&self, name: &str, value: Expression<'a>) -> ObjectPropertyKind<'a> {
        let key = PropertyKey::StaticIdentifier(self.ast.alloc(self.ast.identifier_name(SPAN, self.ast.allocator.alloc_str(name))));
        self.ast.object_property_kind_object_property(SPAN, PropertyKind::Init, key, value, false, false, false)
    }

    /// A region member's original initializer is `derived(() => expr)`
    /// (or, for an explicit `memo(() => expr)`, the same call shape) — this
    /// recovers `expr` by invoking the arrow immediately rather than
    /// threading it through another accessor layer, since the whole group
    /// is already behind the region's own `useMemo`.
    fn unwrap_derivation_value(&self, expr: Expression<'a>) -> Expression<'a> {
        if let Expression::CallExpression(mut call) = expr {
            if call.arguments.len() == 1 && matches!(call.arguments[0], Argument::ArrowFunctionExpression(_)) {
                let args = std::mem::replace(&mut call.arguments, self.ast.vec());
                if let Some(Argument::ArrowFunctionExpression(arrow)) = args.into_iter().next() {
                    return invoke0(&self.ast, Expression::ArrowFunctionExpression(arrow));
                }
            }
            return Expression::CallExpression(call);
        }
        expr
    }

    /// Replaces a single destructured-object props parameter with a bare
    /// `__props` identifier and a tracked getter per extracted name (spec
    /// §4.8 step 4). Any other parameter shape (no params, a plain
    /// identifier, an array pattern) is left untouched — this pass only
    /// handles the common `function Foo({ a, b, ...rest }) {}` shape.
    ///
    /// Defaults (`{ a = 1 }`, an `AssignmentPattern`) are threaded through as
    /// a third `useProp` argument; a nested pattern value (`{ a: { b } }`)
    /// recurses by binding the outer key to a generated intermediate getter
    /// and reading further destructured names off a call to it (spec §4.8
    /// item 4, "with defaults preserved and nested patterns recursed").
    fn lower_props_param(&mut self, params: &mut FormalParameters<'a>, prelude: &mut Vec<Statement<'a>>) {
        if params.items.len() != 1 {
            return;
        }
        let BindingPattern::ObjectPattern(obj) = &params.items[0].pattern else {
            return;
        };

        for prop in &obj.properties {
            let PropertyKey::StaticIdentifier(key) = &prop.key else { continue };
            let prop_name = key.name.to_string();
            self.bind_prop_value(&prop.value, &PropSource::Key(prop_name), prelude);
        }
        if let Some(rest) = &obj.rest {
            if let BindingPattern::BindingIdentifier(id) = &rest.argument {
                let rest_name = id.name.to_string();
                let props_ref = self.ast.expression_identifier(SPAN, PROPS_LOCAL);
                let mut args = self.ast.vec();
                args.push(Argument::from(props_ref));
                let rest_call = self.free_call("propsRest", args);
                prelude.push(const_decl(&self.ast, &rest_name, rest_call));
            }
        }

        let props_ident = self.ast.binding_identifier(SPAN, PROPS_LOCAL);
        let props_pattern = BindingPattern::BindingIdentifier(self.ast.alloc(props_ident));
        params.items[0] = self.ast.formal_parameter(
            SPAN,
            self.ast.vec(),
            props_pattern,
            None::<oxc_allocator::Box<TSTypeAnnotation>>,
            None::<oxc_allocator::Box<Expression>>,
            false,
            None,
            false,
            false,
        );
    }

    /// Binds the names a props destructuring `value` pattern extracts,
    /// reading through `source` (either the top-level prop key or a field of
    /// an already-bound intermediate getter).
    fn bind_prop_value(&mut self, value: &BindingPattern<'a>, source: &PropSource, prelude: &mut Vec<Statement<'a>>) {
        match value {
            BindingPattern::BindingIdentifier(id) => {
                let getter = self.prop_source_getter(source, None);
                prelude.push(const_decl(&self.ast, &id.name.to_string(), getter));
            }
            BindingPattern::AssignmentPattern(ap) => {
                let default = ap.right.clone_in(self.ast.allocator);
                match &ap.left {
                    BindingPattern::BindingIdentifier(id) => {
                        let getter = self.prop_source_getter(source, Some(default));
                        prelude.push(const_decl(&self.ast, &id.name.to_string(), getter));
                    }
                    BindingPattern::ObjectPattern(_) | BindingPattern::ArrayPattern(_) => {
                        let getter = self.prop_source_getter(source, Some(default));
                        let local = self.bind_intermediate(getter, prelude);
                        self.bind_nested_pattern(&ap.left, &local, prelude);
                    }
                    BindingPattern::AssignmentPattern(_) => {}
                }
            }
            BindingPattern::ObjectPattern(_) | BindingPattern::ArrayPattern(_) => {
                let getter = self.prop_source_getter(source, None);
                let local = self.bind_intermediate(getter, prelude);
                self.bind_nested_pattern(value, &local, prelude);
            }
        }
    }

    /// Recurses into a nested `ObjectPattern`/`ArrayPattern` whose value
    /// comes from calling the already-bound getter named `parent_local`.
    fn bind_nested_pattern(&mut self, pattern: &BindingPattern<'a>, parent_local: &str, prelude: &mut Vec<Statement<'a>>) {
        match pattern {
            BindingPattern::ObjectPattern(obj) => {
                for prop in &obj.properties {
                    let PropertyKey::StaticIdentifier(key) = &prop.key else { continue };
                    let field = key.name.to_string();
                    self.bind_prop_value(&prop.value, &PropSource::Field(parent_local.to_string(), field), prelude);
                }
                if let Some(rest) = &obj.rest {
                    if let BindingPattern::BindingIdentifier(id) = &rest.argument {
                        let rest_call = self.free_call("propsRest", {
                            let mut args = self.ast.vec();
                            args.push(Argument::from(call0(&self.ast, parent_local)));
                            args
                        });
                        prelude.push(const_decl(&self.ast, &id.name.to_string(), rest_call));
                    }
                }
            }
            BindingPattern::ArrayPattern(arr) => {
                for (index, elem) in arr.elements.iter().enumerate() {
                    let Some(elem) = elem else { continue };
                    self.bind_prop_value(elem, &PropSource::Index(parent_local.to_string(), index), prelude);
                }
            }
            // Never reached: both call sites only pass a nested
            // ObjectPattern/ArrayPattern through here.
            BindingPattern::BindingIdentifier(_) | BindingPattern::AssignmentPattern(_) => {}
        }
    }

    /// Declares a generated `const __propPathN = <getter>;` and returns its
    /// name, used as the read source for a nested destructuring level.
    fn bind_intermediate(&mut self, getter: Expression<'a>, prelude: &mut Vec<Statement<'a>>) -> String {
        let local = self.symbols.next("propPath");
        prelude.push(const_decl(&self.ast, &local, getter));
        local
    }

    /// Builds the getter expression for a `PropSource`: a direct
    /// `useProp(__props, "name", default?)` call for a top-level key, or a
    /// thunk reading `parent().field` (optionally `?? default`) for a
    /// nested one.
    fn prop_source_getter(&mut self, source: &PropSource, default: Option<Expression<'a>>) -> Expression<'a> {
        match source {
            PropSource::Key(name) => {
                let props_ref = self.ast.expression_identifier(SPAN, PROPS_LOCAL);
                let mut args = self.ast.vec();
                args.push(Argument::from(props_ref));
                args.push(Argument::from(self.ast.expression_string_literal(SPAN, self.ast.allocator.alloc_str(name), None)));
                if let Some(default) = default {
                    args.push(Argument::from(default));
                }
                self.ctx_member_call("useProp", args)
            }
            PropSource::Field(parent, field) => {
                let call = call0(&self.ast, parent);
                let member = self.ast.member_expression_static(
                    SPAN,
                    call,
                    self.ast.identifier_name(SPAN, self.ast.allocator.alloc_str(field)),
                    false,
                );
                let value = Expression::from(member);
                let value = match default {
                    Some(default) => Expression::from(self.ast.expression_logical(SPAN, value, LogicalOperator::Coalesce, default)),
                    None => value,
                };
                thunk(&self.ast, value)
            }
            PropSource::Index(parent, index) => {
                let call = call0(&self.ast, parent);
                let index_expr = self.ast.expression_numeric_literal(SPAN, *index as f64, None, NumberBase::Decimal);
                let member = self.ast.member_expression_computed(SPAN, call, index_expr, false);
                let value = Expression::from(member);
                let value = match default {
                    Some(default) => Expression::from(self.ast.expression_logical(SPAN, value, LogicalOperator::Coalesce, default)),
                    None => value,
                };
                thunk(&self.ast, value)
            }
        }
    }

    fn rewrite_top_level(&mut self, scope: ScopeId, stmts: &mut oxc_allocator::Vec<'a, Statement<'a>>) {
        for stmt in stmts.iter_mut() {
            match stmt {
                Statement::VariableDeclaration(decl) => {
                    for declarator in decl.declarations.iter_mut() {
                        self.rewrite_declarator(scope, declarator);
                    }
                }
                Statement::ExpressionStatement(es) => {
                    self.rewrite_effect_call(&mut es.expression);
                }
                _ => {}
            }
        }
    }

    fn rewrite_declarator(&mut self, scope: ScopeId, declarator: &mut VariableDeclarator<'a>) {
        let BindingPattern::BindingIdentifier(id) = &declarator.id else { return };
        let name = id.name.to_string();
        let Some(binding) = self.ctx.tree.resolve(scope, &name) else { return };
        let Some(init) = declarator.init.take() else { return };

        let new_init = match binding.kind {
            BindingKind::State => {
                let slot = binding.slot.unwrap_or(0);
                let mut args = self.ast.vec();
                args.push(Argument::from(self.ast.expression_numeric_literal(SPAN, slot as f64, None, NumberBase::Decimal)));
                args.push(Argument::from(init));
                self.ctx_member_call("useSignal", args)
            }
            BindingKind::DerivedMemo => {
                // Explicit `memo(fn)`: `init` is the call itself; rebind its
                // callee onto the context instead of the macro's local name.
                if let Expression::CallExpression(mut call) = init {
                    let args = std::mem::replace(&mut call.arguments, self.ast.vec());
                    self.ctx_member_call("useMemo", args)
                } else {
                    init
                }
            }
            BindingKind::Derived => match self.ctx.policy.policy_of(&name) {
                DerivationPolicy::Memo => {
                    let mut args = self.ast.vec();
                    args.push(Argument::from(thunk(&self.ast, init)));
                    self.ctx_member_call("useMemo", args)
                }
                DerivationPolicy::Getter => thunk(&self.ast, init),
            },
            BindingKind::Alias => thunk(&self.ast, init),
            BindingKind::Store => {
                let mut args = self.ast.vec();
                args.push(Argument::from(init));
                self.ctx_member_call("useStore", args)
            }
            _ => init,
        };
        declarator.init = Some(new_init);
    }

    fn rewrite_effect_call(&mut self, expr: &mut Expression<'a>) {
        let Expression::CallExpression(call) = expr else { return };
        let Expression::Identifier(callee) = &call.callee else { return };
        if Some(callee.name.as_str()) != self.macros.effect.as_deref() {
            return;
        }
        let args = std::mem::replace(&mut call.arguments, self.ast.vec());
        *expr = self.ctx_member_call("useEffect", args);
    }
}

impl<'a, 'r> VisitMut<'a> for ComponentLowerer<'a, 'r> {
    fn visit_program(&mut self, program: &mut Program<'a>) {
        walk_program(self, program);
    }

    fn visit_statement(&mut self, stmt: &mut Statement<'a>) {
        if let Statement::FunctionDeclaration(func) = stmt {
            let func = func.as_mut();
            let name = func.id.as_ref().map(|i| i.name.to_string());
            if let Some(body) = &mut func.body {
                self.lower_function(name.as_deref(), &mut func.params, body);
                for s in &mut body.statements {
                    self.visit_statement(s);
                }
                return;
            }
        }
        walk_statement(self, stmt);
    }
}

/// Runs component-function lowering (spec §4.8) over the whole program.
/// Must run before `lowering::expr::lower_expressions`, which sweeps up
/// reads left unrewritten inside the thunks this pass introduces (aliases,
/// getters) the same way it sweeps up JSX-hole thunks.
pub fn lower_components<'a, 'r>(allocator: &'a Allocator, program: &mut Program<'a>, ctx: &'r LoweringContext<'r>) {
    let mut lowerer = ComponentLowerer::new(allocator, ctx, program);
    lowerer.visit_program(program);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loc::LineIndex;
    use crate::policy;
    use crate::region;
    use crate::scope;
    use oxc_codegen::Codegen;
    use oxc_parser::Parser;
    use oxc_span::SourceType;

    fn lower(src: &str) -> String {
        let allocator = Allocator::default();
        let source_type = SourceType::default().with_typescript(true).with_jsx(true).with_module(true);
        let mut program = Parser::new(&allocator, src, source_type).parse().program;
        let lines = LineIndex::new(src);
        let analysis = scope::analyze(&program, "test.tsx", &lines, src).unwrap();
        let regions = region::group_regions(&analysis.tree, &analysis.scope_by_span, analysis.module_scope, &program, false);
        let policy = policy::compute_policy(&analysis.tree, &program, analysis.module_scope, None);
        let ctx = LoweringContext {
            tree: &analysis.tree,
            policy: &policy,
            regions: &regions,
            scope_by_span: &analysis.scope_by_span,
            module_scope: analysis.module_scope,
            file: "test.tsx",
        };
        lower_components(&allocator, &mut program, &ctx);
        Codegen::new().build(&program).code
    }

    #[test]
    fn destructured_prop_with_default_is_bound_through_use_prop() {
        let src = "function Widget({ label = 'x' }) { return <span>{label}</span>; }";
        let code = lower(src);
        assert!(code.contains("useProp"), "{code}");
        assert!(code.contains("\"label\""), "{code}");
    }

    #[test]
    fn nested_destructured_prop_recurses_through_an_intermediate_getter() {
        let src = "function Widget({ user: { name } }) { return <span>{name}</span>; }";
        let code = lower(src);
        assert!(code.contains("__propPath0"), "{code}");
        assert!(code.contains(".name"), "{code}");
    }

    #[test]
    fn rest_props_are_bound_through_props_rest() {
        let src = "function Widget({ id, ...rest }) { return <span>{id}</span>; }";
        let code = lower(src);
        assert!(code.contains("propsRest"), "{code}");
    }

    #[test]
    fn co_read_sibling_derivations_materialize_as_one_region_memo() {
        let src = "import { state, derived } from 'fict';\n\
             function App() {\n\
               const s = state(1);\n\
               const a = derived(() => s() + 1);\n\
               const b = derived(() => s() + 2);\n\
               return <p>{a()}{b()}</p>;\n\
             }\n";
        let code = lower(src);
        assert!(code.contains("__region0"), "{code}");
        assert!(code.contains("useMemo"), "{code}");
        // only one materialized region const, not two separate declarations
        assert_eq!(code.matches("__region0 =").count(), 1, "{code}");
    }
}
