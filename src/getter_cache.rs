//! `getterCache` option (spec §6, SPEC_FULL.md §B item 3): caching repeated
//! getter reads within one synchronous callback body via a generated
//! `__cached_name` local, instead of invoking the getter afresh on every
//! read.
//!
//! Runs after `lowering::expr` so the getter reads it's caching are already
//! the `name()` calls that pass lowers them into; grounded on the same
//! "stop at a function/arrow boundary" shape `component::body_returns_jsx`
//! uses to keep a scan from crossing into a nested closure's own body.

use crate::lowering::const_decl;
use oxc_allocator::Allocator;
use oxc_ast::ast::*;
use oxc_ast::AstBuilder;
use oxc_ast_visit::walk_mut::{walk_expression, walk_function_body, walk_program};
use oxc_ast_visit::{Visit, VisitMut};
use oxc_span::SPAN;
use std::collections::{HashMap, HashSet};

struct ShallowCallCounter<'s> {
    getters: &'s HashSet<String>,
    counts: HashMap<String, usize>,
}

impl<'s, 'a> Visit<'a> for ShallowCallCounter<'s> {
    fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
        if call.arguments.is_empty() {
            if let Expression::Identifier(id) = &call.callee {
                if self.getters.contains(id.name.as_str()) {
                    *self.counts.entry(id.name.to_string()).or_insert(0) += 1;
                }
            }
        }
        oxc_ast_visit::walk::walk_call_expression(self, call);
    }

    fn visit_function(&mut self, _it: &Function<'a>, _flags: oxc_syntax::scope::ScopeFlags) {}
    fn visit_arrow_function_expression(&mut self, _it: &ArrowFunctionExpression<'a>) {}
}

struct ShallowCacheRewriter<'s, 'a> {
    targets: &'s HashMap<String, String>,
    ast: AstBuilder<'a>,
}

impl<'s, 'a> VisitMut<'a> for ShallowCacheRewriter<'s, 'a> {
    fn visit_expression(&mut self, expr: &mut Expression<'a>) {
        if let Expression::CallExpression(call) = expr {
            if call.arguments.is_empty() {
                if let Expression::Identifier(id) = &call.callee {
                    if let Some(cached) = self.targets.get(id.name.as_str()) {
                        *expr = self.ast.expression_identifier(SPAN, self.ast.allocator.alloc_str(cached));
                        return;
                    }
                }
            }
        }
        walk_expression(self, expr);
    }

    fn visit_function(&mut self, _it: &mut Function<'a>, _flags: oxc_syntax::scope::ScopeFlags) {}
    fn visit_arrow_function_expression(&mut self, _it: &mut ArrowFunctionExpression<'a>) {}
}

/// Turns `myValue` into `MyValue` so the generated local reads
/// `__cachedMyValue` rather than colliding with `__cached` plus a lowercase
/// run that's harder to eyeball in generated output.
fn heading_case(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn cache_body<'a>(ast: &AstBuilder<'a>, getters: &HashSet<String>, body: &mut FunctionBody<'a>) {
    let mut counter = ShallowCallCounter { getters, counts: HashMap::new() };
    for stmt in body.statements.iter() {
        counter.visit_statement(stmt);
    }

    let mut targets: HashMap<String, String> = HashMap::new();
    let mut prelude = Vec::new();
    for (name, count) in &counter.counts {
        if *count < 2 {
            continue;
        }
        let cached = format!("__cached{}", heading_case(name));
        let getter_call = ast.expression_call(
            SPAN,
            ast.expression_identifier(SPAN, ast.allocator.alloc_str(name)),
            None::<oxc_allocator::Box<TSTypeParameterInstantiation>>,
            ast.vec(),
            false,
        );
        prelude.push(const_decl(ast, &cached, getter_call));
        targets.insert(name.clone(), cached);
    }
    if targets.is_empty() {
        return;
    }

    let mut rewriter = ShallowCacheRewriter { targets: &targets, ast: *ast };
    for stmt in body.statements.iter_mut() {
        rewriter.visit_statement(stmt);
    }

    let old = std::mem::replace(&mut body.statements, ast.vec());
    for stmt in prelude {
        body.statements.push(stmt);
    }
    for stmt in old {
        body.statements.push(stmt);
    }
}

struct CacheWalker<'a> {
    ast: AstBuilder<'a>,
    getters: HashSet<String>,
}

impl<'a> VisitMut<'a> for CacheWalker<'a> {
    fn visit_program(&mut self, program: &mut Program<'a>) {
        walk_program(self, program);
    }

    fn visit_function_body(&mut self, body: &mut FunctionBody<'a>) {
        cache_body(&self.ast, &self.getters, body);
        walk_function_body(self, body);
    }
}

/// Runs the `getterCache` pass over the whole program. `getters` is the
/// set of names `policy::compute_policy` classified `Getter`; only those
/// are candidates since a memo-classified derivation is already cached by
/// its own `useMemo`.
pub fn cache_getters<'a>(allocator: &'a Allocator, program: &mut Program<'a>, getters: HashSet<String>) {
    let mut walker = CacheWalker { ast: AstBuilder::new(allocator), getters };
    walker.visit_program(program);
}
