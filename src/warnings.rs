//! Warning pass (spec §2 step 6, §6 Diagnostics): non-fatal, coded
//! structural warnings. Runs after the macro/scope, dependency, region, and
//! policy passes so it can ask those side tables questions (is this name a
//! memo? a store? an alias?) instead of re-deriving them.
//!
//! Grounded on the teacher's `validate.rs` (a `Visit`-based pass that
//! collects warnings into a flat list rather than failing the compile) and
//! `policy.rs`'s own `SinkCollector` for the "does this subtree read a
//! reactive name" shape reused here for a few of the checks below.

use crate::diagnostics::{warning_code, Warning, WarningSink};
use crate::loc::LineIndex;
use crate::scope::{BindingKind, ScopeId, ScopeTree};
use oxc_ast::ast::*;
use oxc_ast_visit::Visit;
use std::collections::HashMap;

struct WarningPass<'x> {
    tree: &'x ScopeTree,
    lines: &'x LineIndex,
    file: &'x str,
    effect_local: Option<&'x str>,
    scope_by_span: &'x HashMap<u32, ScopeId>,
    sink: WarningSink,
    scope_stack: Vec<ScopeId>,
    /// `true` once inside some component/hook body (mirrors scope.rs's
    /// host-depth tracking, but only needs a boolean here).
    in_host: Vec<bool>,
}

impl<'x> WarningPass<'x> {
    fn current_scope(&self) -> ScopeId {
        *self.scope_stack.last().expect("non-empty scope stack")
    }

    fn push_scope_for(&mut self, span: oxc_span::Span) {
        let scope = self.scope_by_span.get(&span.start).copied().unwrap_or_else(|| self.current_scope());
        self.scope_stack.push(scope);
    }

    fn warn(&mut self, code: &str, message: impl Into<String>, span: oxc_span::Span) {
        let loc = self.lines.locate_span(span);
        self.sink.push(Warning::new(code, message, self.file, loc.line, loc.column));
    }

    fn resolve_kind(&self, name: &str) -> Option<BindingKind> {
        self.tree.resolve(self.current_scope(), name).map(|b| b.kind)
    }

    fn check_member_mutation(&mut self, member: &StaticMemberExpression, span: oxc_span::Span) {
        let Some(root) = root_identifier(&member.object) else { return };
        if matches!(self.resolve_kind(&root), Some(BindingKind::State | BindingKind::Store)) {
            self.warn(
                warning_code::DIRECT_NESTED_MUTATION,
                format!("mutating `{}`'s nested structure directly bypasses reactivity; replace with a setter call", root),
                span,
            );
        }
    }

    fn check_dynamic_access(&mut self, member: &ComputedMemberExpression) {
        if let Some(root) = root_identifier(&member.object) {
            if matches!(
                self.resolve_kind(&root),
                Some(BindingKind::State | BindingKind::Derived | BindingKind::DerivedMemo | BindingKind::DerivedGetter | BindingKind::Store)
            ) {
                self.warn(
                    warning_code::DYNAMIC_PROPERTY_ACCESS,
                    format!("computed member access on `{}` cannot be statically tracked", root),
                    member.span,
                );
            }
        }
    }

    fn check_black_box_call(&mut self, call: &CallExpression) {
        let Expression::Identifier(callee) = &call.callee else { return };
        if KNOWN_RUNTIME_CALLS.contains(&callee.name.as_str()) {
            return;
        }
        for arg in &call.arguments {
            if let Some(Expression::Identifier(id)) = arg.as_expression() {
                if matches!(
                    self.resolve_kind(id.name.as_str()),
                    Some(BindingKind::State | BindingKind::Derived | BindingKind::DerivedMemo | BindingKind::DerivedGetter | BindingKind::Store)
                ) {
                    self.warn(
                        warning_code::BLACK_BOX_FUNCTION_CALL,
                        format!("passing `{}` into `{}(...)` hides it from static dependency tracking", id.name, callee.name),
                        call.span,
                    );
                }
            }
        }
    }

    fn check_effect_call(&mut self, call: &CallExpression) {
        let Expression::Identifier(callee) = &call.callee else { return };
        if Some(callee.name.as_str()) != self.effect_local {
            return;
        }
        let Some(first_expr) = call.arguments.first().and_then(|a| a.as_expression()) else { return };
        match first_expr {
            Expression::ArrowFunctionExpression(arrow) if arrow.body.statements.is_empty() => {
                self.warn(warning_code::EMPTY_EFFECT, "effect body is empty", arrow.span);
            }
            Expression::FunctionExpression(func) => {
                if let Some(body) = &func.body {
                    if body.statements.is_empty() {
                        self.warn(warning_code::EMPTY_EFFECT, "effect body is empty", body.span);
                    }
                }
            }
            _ => {}
        }
    }

    fn check_module_level_store(&mut self) {
        let module_scope = self.tree.get(0);
        for binding in module_scope.bindings.values() {
            if binding.kind == BindingKind::Store {
                self.warn(
                    warning_code::MODULE_LEVEL_STATE,
                    format!("`{}` is a store declared at module scope; it is shared by every instance", binding.name),
                    oxc_span::SPAN,
                );
            }
        }
    }

    fn check_memo_side_effect(&mut self, declarator: &VariableDeclarator, is_memo: bool) {
        if !is_memo {
            return;
        }
        let Some(init) = &declarator.init else { return };
        let mut finder = SideEffectFinder { found: None };
        finder.visit_expression(init);
        if let Some(span) = finder.found {
            self.warn(
                warning_code::MEMO_SIDE_EFFECT,
                "a memoized derivation should be pure; this one contains an assignment or update",
                span,
            );
        }
    }

    fn check_reactive_in_control_flow(&mut self, declarator: &VariableDeclarator) {
        let Some(init) = &declarator.init else { return };
        let mut finder = ControlFlowReactiveFinder { scope: self.current_scope(), tree: self.tree, found: None };
        finder.visit_expression(init);
        if let Some(span) = finder.found {
            self.warn(
                warning_code::REACTIVE_IN_CONTROL_FLOW,
                "reactive read inside a conditional branch may not re-run when the condition changes",
                span,
            );
        }
    }
}

const KNOWN_RUNTIME_CALLS: &[&str] = &[
    "h", "fragment", "template", "insert", "bindAttribute", "bindClass", "bindStyle", "bindProperty", "bindEvent",
    "createKeyedList", "createConditional", "propGetter", "propsRest", "state", "effect", "memo", "store",
];

fn root_identifier(expr: &Expression) -> Option<String> {
    match expr {
        Expression::Identifier(id) => Some(id.name.to_string()),
        Expression::StaticMemberExpression(m) => root_identifier(&m.object),
        Expression::ComputedMemberExpression(m) => root_identifier(&m.object),
        _ => None,
    }
}

struct SideEffectFinder {
    found: Option<oxc_span::Span>,
}

impl<'a> Visit<'a> for SideEffectFinder {
    fn visit_assignment_expression(&mut self, expr: &AssignmentExpression<'a>) {
        if self.found.is_none() {
            self.found = Some(expr.span);
        }
    }
    fn visit_update_expression(&mut self, expr: &UpdateExpression<'a>) {
        if self.found.is_none() {
            self.found = Some(expr.span);
        }
    }
    // A nested component/hook's own assignments are its own business.
    fn visit_function(&mut self, _it: &Function<'a>, _flags: oxc_syntax::scope::ScopeFlags) {}
    fn visit_arrow_function_expression(&mut self, _it: &ArrowFunctionExpression<'a>) {}
}

struct ControlFlowReactiveFinder<'x> {
    scope: ScopeId,
    tree: &'x ScopeTree,
    found: Option<oxc_span::Span>,
}

impl<'a, 'x> Visit<'a> for ControlFlowReactiveFinder<'x> {
    fn visit_conditional_expression(&mut self, expr: &ConditionalExpression<'a>) {
        if self.found.is_none() && (self.reads_reactive(&expr.consequent) || self.reads_reactive(&expr.alternate)) {
            self.found = Some(expr.span);
        }
        oxc_ast_visit::walk::walk_conditional_expression(self, expr);
    }
    fn visit_logical_expression(&mut self, expr: &LogicalExpression<'a>) {
        if self.found.is_none() && self.reads_reactive(&expr.right) {
            self.found = Some(expr.span);
        }
        oxc_ast_visit::walk::walk_logical_expression(self, expr);
    }
}

impl<'x> ControlFlowReactiveFinder<'x> {
    fn reads_reactive(&self, expr: &Expression) -> bool {
        struct Check<'x> {
            scope: ScopeId,
            tree: &'x ScopeTree,
            found: bool,
        }
        impl<'a, 'x> Visit<'a> for Check<'x> {
            fn visit_identifier_reference(&mut self, ident: &IdentifierReference<'a>) {
                if matches!(
                    self.tree.resolve(self.scope, ident.name.as_str()).map(|b| b.kind),
                    Some(BindingKind::State | BindingKind::Derived | BindingKind::DerivedMemo | BindingKind::DerivedGetter | BindingKind::Prop | BindingKind::Store)
                ) {
                    self.found = true;
                }
            }
        }
        let mut check = Check { scope: self.scope, tree: self.tree, found: false };
        check.visit_expression(expr);
        check.found
    }
}

fn looks_like_component_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_uppercase())
}

fn body_has_any_return(body: &FunctionBody) -> bool {
    struct Finder {
        found: bool,
    }
    impl<'a> Visit<'a> for Finder {
        fn visit_return_statement(&mut self, _stmt: &ReturnStatement<'a>) {
            self.found = true;
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

impl<'a, 'x> Visit<'a> for WarningPass<'x> {
    fn visit_assignment_expression(&mut self, expr: &AssignmentExpression<'a>) {
        if let AssignmentTarget::StaticMemberExpression(member) = &expr.left {
            self.check_member_mutation(member, expr.span);
        }
        if let AssignmentTarget::AssignmentTargetIdentifier(id) = &expr.left {
            if matches!(self.resolve_kind(id.name.as_str()), Some(BindingKind::Alias | BindingKind::DestructuredStateAlias)) {
                self.warn(
                    warning_code::ALIAS_REASSIGNMENT,
                    format!("reassigning alias `{}` does not change the underlying state", id.name),
                    expr.span,
                );
            }
        }
        oxc_ast_visit::walk::walk_assignment_expression(self, expr);
    }

    fn visit_member_expression(&mut self, expr: &MemberExpression<'a>) {
        if let MemberExpression::ComputedMemberExpression(member) = expr {
            self.check_dynamic_access(member);
        }
        oxc_ast_visit::walk::walk_member_expression(self, expr);
    }

    fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
        self.check_black_box_call(call);
        self.check_effect_call(call);
        oxc_ast_visit::walk::walk_call_expression(self, call);
    }

    fn visit_variable_declarator(&mut self, declarator: &VariableDeclarator<'a>) {
        let kind = if let BindingPattern::BindingIdentifier(id) = &declarator.id {
            self.resolve_kind(id.name.as_str())
        } else {
            None
        };
        let is_memo = matches!(kind, Some(BindingKind::DerivedMemo));
        self.check_memo_side_effect(declarator, is_memo);
        if matches!(kind, Some(BindingKind::Derived | BindingKind::DerivedMemo | BindingKind::DerivedGetter)) {
            self.check_reactive_in_control_flow(declarator);
        }
        oxc_ast_visit::walk::walk_variable_declarator(self, declarator);
    }

    fn visit_function(&mut self, func: &Function<'a>, flags: oxc_syntax::scope::ScopeFlags) {
        let name = func.id.as_ref().map(|i| i.name.to_string());
        if let Some(body) = &func.body {
            let is_component_like = name.as_deref().is_some_and(looks_like_component_name) || body_returns_jsx_shallow(body);
            if is_component_like && *self.in_host.last().unwrap_or(&false) {
                self.warn(
                    warning_code::NESTED_COMPONENT,
                    format!("`{}` looks like a component defined inside another component", name.as_deref().unwrap_or("<anonymous>")),
                    func.span,
                );
            }
            if is_component_like && !body_has_any_return(body) {
                self.warn(
                    warning_code::NO_RETURN_STATEMENT,
                    format!("component `{}` has no return statement", name.as_deref().unwrap_or("<anonymous>")),
                    func.span,
                );
            }
            self.push_scope_for(body.span);
            self.in_host.push(is_component_like || *self.in_host.last().unwrap_or(&false));
            oxc_ast_visit::walk::walk_function(self, func, flags);
            self.in_host.pop();
            self.scope_stack.pop();
        }
    }

    fn visit_arrow_function_expression(&mut self, arrow: &ArrowFunctionExpression<'a>) {
        self.push_scope_for(arrow.body.span);
        oxc_ast_visit::walk::walk_arrow_function_expression(self, arrow);
        self.scope_stack.pop();
    }
}

fn body_returns_jsx_shallow(body: &FunctionBody) -> bool {
    struct Finder {
        found: bool,
    }
    impl<'a> Visit<'a> for Finder {
        fn visit_return_statement(&mut self, stmt: &ReturnStatement<'a>) {
            if let Some(arg) = &stmt.argument {
                if matches!(arg, Expression::JSXElement(_) | Expression::JSXFragment(_)) {
                    self.found = true;
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

/// Runs the warning pass (spec §2 step 6) over the analyzed program,
/// returning every coded, non-fatal warning found.
pub fn collect_warnings(
    program: &Program,
    tree: &ScopeTree,
    module_scope: ScopeId,
    scope_by_span: &HashMap<u32, ScopeId>,
    lines: &LineIndex,
    file: &str,
    effect_local: Option<&str>,
) -> Vec<Warning> {
    let mut pass = WarningPass {
        tree,
        lines,
        file,
        effect_local,
        scope_by_span,
        sink: WarningSink::new(),
        scope_stack: vec![module_scope],
        in_host: vec![false],
    };
    pass.check_module_level_store();
    pass.visit_program(program);
    pass.sink.into_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::warning_code;
    use oxc_allocator::Allocator;
    use oxc_parser::Parser;
    use oxc_span::SourceType;

    fn warnings_for(src: &str) -> Vec<Warning> {
        let allocator = Allocator::default();
        let source_type = SourceType::default().with_typescript(true).with_jsx(true).with_module(true);
        let program = Parser::new(&allocator, src, source_type).parse().program;
        let lines = LineIndex::new(src);
        let analysis = crate::scope::analyze(&program, "test.tsx", &lines, src).unwrap();
        collect_warnings(&program, &analysis.tree, analysis.module_scope, &analysis.scope_by_span, &lines, "test.tsx", None)
    }

    #[test]
    fn mutating_a_state_field_directly_warns() {
        let src = "import { state } from 'fict';\n\
             function App() {\n\
               const s = state({ count: 0 });\n\
               s().count = 1;\n\
               return <div />;\n\
             }\n";
        let warnings = warnings_for(src);
        assert!(warnings.iter().any(|w| w.code == warning_code::DIRECT_NESTED_MUTATION), "{warnings:?}");
    }

    #[test]
    fn reassigning_an_alias_warns() {
        let src = "import { state } from 'fict';\n\
             function App() {\n\
               const s = state(0);\n\
               const alias = s;\n\
               alias = 1;\n\
               return <div />;\n\
             }\n";
        let warnings = warnings_for(src);
        assert!(warnings.iter().any(|w| w.code == warning_code::ALIAS_REASSIGNMENT), "{warnings:?}");
    }

    #[test]
    fn component_with_no_return_statement_warns() {
        let src = "function App() { const x = 1; }\n";
        let warnings = warnings_for(src);
        assert!(warnings.iter().any(|w| w.code == warning_code::NO_RETURN_STATEMENT), "{warnings:?}");
    }

    #[test]
    fn plain_helper_function_is_not_flagged_as_a_component() {
        let src = "function add(a, b) { return a + b; }\n";
        let warnings = warnings_for(src);
        assert!(!warnings.iter().any(|w| w.code == warning_code::NO_RETURN_STATEMENT), "{warnings:?}");
    }

    #[test]
    fn module_level_store_is_flagged() {
        let src = "import { store } from 'fict';\nconst s = store({ count: 0 });\n";
        let warnings = warnings_for(src);
        assert!(warnings.iter().any(|w| w.code == warning_code::MODULE_LEVEL_STATE), "{warnings:?}");
    }
}
