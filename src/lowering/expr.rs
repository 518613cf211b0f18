//! Expression lowering (spec §4.5): rewrites reactive identifier reads to
//! accessor calls and reactive writes to setter calls, in every scope
//! (function bodies, event handlers, effects, JSX expression holes).
//!
//! Grounded on the teacher's `ScriptRenamer` (`jsx_lowerer.rs`): a
//! `VisitMut` over the script AST carrying its own scope stack rather than
//! the immutable analyzer's, special-casing identifiers and declarations
//! while falling back to `walk_mut` everywhere else. Generalized from "one
//! flat `state_bindings` set renamed to `state.x`" to "resolve through the
//! real scope tree and rewrite per `BindingKind`."

use crate::diagnostics::{error_code, CompileError};
use crate::lowering::{region_accessor_name, LoweringContext};
use crate::scope::{BindingKind, ScopeId};
use oxc_allocator::{Allocator, CloneIn};
use oxc_ast::ast::*;
use oxc_ast::AstBuilder;
use oxc_ast_visit::walk_mut::{walk_assignment_target, walk_expression, walk_program, walk_statement};
use oxc_ast_visit::VisitMut;
use oxc_span::{GetSpan, Span, SPAN};
use oxc_syntax::operator::{AssignmentOperator, BinaryOperator, UpdateOperator};

pub struct ExprLowerer<'a, 'r> {
    ast: AstBuilder<'a>,
    ctx: &'r LoweringContext<'r>,
    scope_stack: Vec<ScopeId>,
    error: Option<CompileError>,
}

impl<'a, 'r> ExprLowerer<'a, 'r> {
    pub fn new(allocator: &'a Allocator, ctx: &'r LoweringContext<'r>, module_scope: ScopeId) -> Self {
        Self {
            ast: AstBuilder::new(allocator),
            ctx,
            scope_stack: vec![module_scope],
            error: None,
        }
    }

    fn current_scope(&self) -> ScopeId {
        *self.scope_stack.last().expect("non-empty scope stack")
    }

    /// Pushes the scope recorded for `span`, or — for a span the analysis
    /// pass never saw (a synthetic node introduced by an earlier lowering
    /// step, e.g. a JSX-hole thunk) — re-pushes the *current* scope rather
    /// than falling back to module scope, so free variables inside a
    /// generated wrapper still resolve against the scope they lexically
    /// appeared in before lowering wrapped them.
    fn push_scope(&mut self, span: Span) {
        let scope = self
            .ctx
            .scope_by_span
            .get(&span.start)
            .copied()
            .unwrap_or_else(|| self.current_scope());
        self.scope_stack.push(scope);
    }

    fn pop_scope(&mut self) {
        self.scope_stack.pop();
    }

    fn fail(&mut self, code: &str, message: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(CompileError::new(code, message, self.ctx.file, 1, 1));
        }
    }

    fn call0(&self, name: &str) -> Expression<'a> {
        let callee = self.ast.expression_identifier(SPAN, self.ast.allocator.alloc_str(name));
        self.ast
            .expression_call(SPAN, callee, None::<oxc_allocator::Box<TSTypeParameterInstantiation>>, self.ast.vec(), false)
    }

    fn call1(&self, name: &str, arg: Expression<'a>) -> Expression<'a> {
        let callee = self.ast.expression_identifier(SPAN, self.ast.allocator.alloc_str(name));
        let mut args = self.ast.vec();
        args.push(Argument::from(arg));
        self.ast
            .expression_call(SPAN, callee, None::<oxc_allocator::Box<TSTypeParameterInstantiation>>, args, false)
    }

    /// The replacement expression for a *read* of `name` in `scope`, or
    /// `None` if `name` is not reactive (leave the bare identifier alone).
    fn rewrite_read(&self, scope: ScopeId, name: &str) -> Option<Expression<'a>> {
        if let Some(region) = self.ctx.regions.region_of(name) {
            let accessor = region_accessor_name(region.id);
            let call = self.call0(&accessor);
            return Some(Expression::from(self.ast.member_expression_static(
                SPAN,
                call,
                self.ast.identifier_name(SPAN, self.ast.allocator.alloc_str(name)),
                false,
            )));
        }
        let binding = self.ctx.tree.resolve(scope, name)?;
        match binding.kind {
            BindingKind::State
            | BindingKind::Derived
            | BindingKind::DerivedMemo
            | BindingKind::DerivedGetter
            | BindingKind::Alias
            | BindingKind::Prop
            | BindingKind::Store => Some(self.call0(name)),
            BindingKind::DestructuredStateAlias | BindingKind::PropRest | BindingKind::Plain => None,
        }
    }

    /// Lowers a write to `name`: `None` if `name` is not reactive (leave
    /// the assignment alone), `Some(Err(..))` for a hard-error write
    /// target, `Some(Ok(setter_call))` for a legal reactive write.
    fn rewrite_write(&self, scope: ScopeId, name: &str, new_value: Expression<'a>) -> Option<Result<Expression<'a>, CompileError>> {
        let binding = self.ctx.tree.resolve(scope, name)?;
        match binding.kind {
            BindingKind::State => Some(Ok(self.call1(name, new_value))),
            BindingKind::Derived | BindingKind::DerivedMemo | BindingKind::DerivedGetter => Some(Err(
                CompileError::new(error_code::DERIVED_REASSIGNED, format!("cannot reassign derived binding `{}`", name), self.ctx.file, 1, 1),
            )),
            BindingKind::Alias => Some(Err(CompileError::new(
                error_code::ALIAS_REASSIGNED,
                format!("cannot reassign alias `{}`; it captures a live accessor, not a value", name),
                self.ctx.file,
                1,
                1,
            ))),
            BindingKind::DestructuredStateAlias => Some(Err(CompileError::new(
                error_code::DESTRUCTURED_ALIAS_WRITE,
                format!("cannot write to destructured state alias `{}`", name),
                self.ctx.file,
                1,
                1,
            ))),
            BindingKind::Prop | BindingKind::PropRest | BindingKind::Store | BindingKind::Plain => None,
        }
    }

    fn compound_to_binary(op: AssignmentOperator) -> Option<BinaryOperator> {
        Some(match op {
            AssignmentOperator::Addition => BinaryOperator::Addition,
            AssignmentOperator::Subtraction => BinaryOperator::Subtraction,
            AssignmentOperator::Multiplication => BinaryOperator::Multiplication,
            AssignmentOperator::Division => BinaryOperator::Division,
            AssignmentOperator::Remainder => BinaryOperator::Remainder,
            AssignmentOperator::Exponential => BinaryOperator::Exponential,
            AssignmentOperator::ShiftLeft => BinaryOperator::ShiftLeft,
            AssignmentOperator::ShiftRight => BinaryOperator::ShiftRight,
            AssignmentOperator::ShiftRightZeroFill => BinaryOperator::ShiftRightZeroFill,
            AssignmentOperator::BitwiseOR => BinaryOperator::BitwiseOR,
            AssignmentOperator::BitwiseXOR => BinaryOperator::BitwiseXOR,
            AssignmentOperator::BitwiseAnd => BinaryOperator::BitwiseAnd,
            _ => return None,
        })
    }

    fn assignment_target_name(target: &AssignmentTarget) -> Option<String> {
        match target {
            AssignmentTarget::AssignmentTargetIdentifier(id) => Some(id.name.to_string()),
            _ => None,
        }
    }

    fn lower_object_property(&mut self, prop: &mut ObjectPropertyKind<'a>) {
        if let ObjectPropertyKind::ObjectProperty(op) = prop {
            if op.shorthand {
                if let Expression::Identifier(id) = &op.value {
                    let name = id.name.to_string();
                    if let Some(replacement) = self.rewrite_read(self.current_scope(), &name) {
                        op.value = replacement;
                        op.shorthand = false;
                        return;
                    }
                }
            }
            self.visit_expression(&mut op.value);
        }
    }
}

impl<'a, 'r> VisitMut<'a> for ExprLowerer<'a, 'r> {
    fn visit_program(&mut self, program: &mut Program<'a>) {
        walk_program(self, program);
    }

    fn visit_statement(&mut self, stmt: &mut Statement<'a>) {
        match stmt {
            Statement::BlockStatement(block) => {
                self.push_scope(block.span);
                for s in &mut block.body {
                    self.visit_statement(s);
                }
                self.pop_scope();
            }
            Statement::IfStatement(if_stmt) => {
                self.visit_expression(&mut if_stmt.test);
                self.push_scope(if_stmt.consequent.span());
                self.visit_statement(&mut if_stmt.consequent);
                self.pop_scope();
                if let Some(alt) = &mut if_stmt.alternate {
                    self.push_scope(alt.span());
                    self.visit_statement(alt);
                    self.pop_scope();
                }
            }
            Statement::SwitchStatement(switch) => {
                self.visit_expression(&mut switch.discriminant);
                for case in &mut switch.cases {
                    self.push_scope(case.span);
                    for s in &mut case.consequent {
                        self.visit_statement(s);
                    }
                    self.pop_scope();
                }
            }
            Statement::ForStatement(f) => {
                self.push_scope(f.body.span());
                self.visit_statement(&mut f.body);
                self.pop_scope();
            }
            Statement::ForInStatement(f) => {
                self.push_scope(f.body.span());
                self.visit_statement(&mut f.body);
                self.pop_scope();
            }
            Statement::ForOfStatement(f) => {
                self.push_scope(f.body.span());
                self.visit_statement(&mut f.body);
                self.pop_scope();
            }
            Statement::WhileStatement(w) => {
                self.visit_expression(&mut w.test);
                self.push_scope(w.body.span());
                self.visit_statement(&mut w.body);
                self.pop_scope();
            }
            Statement::DoWhileStatement(w) => {
                self.push_scope(w.body.span());
                self.visit_statement(&mut w.body);
                self.pop_scope();
                self.visit_expression(&mut w.test);
            }
            Statement::TryStatement(t) => {
                self.push_scope(t.block.span);
                for s in &mut t.block.body {
                    self.visit_statement(s);
                }
                self.pop_scope();
                if let Some(handler) = &mut t.handler {
                    self.push_scope(handler.body.span);
                    for s in &mut handler.body.body {
                        self.visit_statement(s);
                    }
                    self.pop_scope();
                }
                if let Some(finalizer) = &mut t.finalizer {
                    self.push_scope(finalizer.span);
                    for s in &mut finalizer.body {
                        self.visit_statement(s);
                    }
                    self.pop_scope();
                }
            }
            Statement::FunctionDeclaration(func) => {
                if let Some(body) = &mut func.body {
                    self.push_scope(body.span);
                    for s in &mut body.statements {
                        self.visit_statement(s);
                    }
                    self.pop_scope();
                }
            }
            _ => walk_statement(self, stmt),
        }
    }

    fn visit_expression(&mut self, expr: &mut Expression<'a>) {
        match expr {
            Expression::ParenthesizedExpression(inner) => {
                let mut unwrapped = inner.expression.clone_in(self.ast.allocator);
                self.visit_expression(&mut unwrapped);
                *expr = unwrapped;
                return;
            }
            Expression::Identifier(id) => {
                let name = id.name.to_string();
                if let Some(replacement) = self.rewrite_read(self.current_scope(), &name) {
                    *expr = replacement;
                }
                return;
            }
            Expression::AssignmentExpression(assign) => {
                self.visit_expression(&mut assign.right);
                let target_name = Self::assignment_target_name(&assign.left);
                if assign.operator == AssignmentOperator::Assign {
                    if let Some(name) = &target_name {
                        let rhs = assign.right.clone_in(self.ast.allocator);
                        match self.rewrite_write(self.current_scope(), name, rhs) {
                            Some(Ok(call)) => *expr = call,
                            Some(Err(e)) => self.fail(&e.code, e.message),
                            None => walk_assignment_target(self, &mut assign.left),
                        }
                        return;
                    }
                } else if let Some(name) = &target_name {
                    if let Some(bin_op) = Self::compound_to_binary(assign.operator) {
                        let current_read = self
                            .rewrite_read(self.current_scope(), name)
                            .unwrap_or_else(|| self.ast.expression_identifier(SPAN, self.ast.allocator.alloc_str(name)));
                        let rhs = assign.right.clone_in(self.ast.allocator);
                        let combined = self.ast.expression_binary(SPAN, current_read, bin_op, rhs);
                        match self.rewrite_write(self.current_scope(), name, combined) {
                            Some(Ok(call)) => *expr = call,
                            Some(Err(e)) => self.fail(&e.code, e.message),
                            None => walk_assignment_target(self, &mut assign.left),
                        }
                        return;
                    }
                }
                walk_assignment_target(self, &mut assign.left);
                return;
            }
            Expression::UpdateExpression(update) => {
                if let SimpleAssignmentTarget::AssignmentTargetIdentifier(id) = &update.argument {
                    let name = id.name.to_string();
                    let one = self.ast.expression_numeric_literal(SPAN, 1.0, None, NumberBase::Decimal);
                    let bin_op = if update.operator == UpdateOperator::Increment {
                        BinaryOperator::Addition
                    } else {
                        BinaryOperator::Subtraction
                    };
                    let current_read = self
                        .rewrite_read(self.current_scope(), &name)
                        .unwrap_or_else(|| self.ast.expression_identifier(SPAN, self.ast.allocator.alloc_str(&name)));
                    let combined = self.ast.expression_binary(SPAN, current_read, bin_op, one);
                    match self.rewrite_write(self.current_scope(), &name, combined) {
                        Some(Ok(call)) => *expr = call,
                        Some(Err(e)) => self.fail(&e.code, e.message),
                        None => {}
                    }
                    return;
                }
            }
            Expression::ArrowFunctionExpression(arrow) => {
                self.push_scope(arrow.body.span);
                for s in &mut arrow.body.statements {
                    self.visit_statement(s);
                }
                self.pop_scope();
                return;
            }
            Expression::FunctionExpression(func) => {
                if let Some(body) = &mut func.body {
                    self.push_scope(body.span);
                    for s in &mut body.statements {
                        self.visit_statement(s);
                    }
                    self.pop_scope();
                }
                return;
            }
            Expression::ObjectExpression(obj) => {
                for prop in &mut obj.properties {
                    self.lower_object_property(prop);
                }
                return;
            }
            _ => {}
        }
        walk_expression(self, expr);
    }
}

/// Runs expression lowering over `program`'s top-level statements (and
/// everything reachable from them). Declarations handled by component
/// lowering (state/derivation declarators) are skipped here; this pass only
/// rewrites *uses*.
pub fn lower_expressions<'a, 'r>(
    allocator: &'a Allocator,
    program: &mut Program<'a>,
    ctx: &'r LoweringContext<'r>,
    module_scope: ScopeId,
) -> Result<(), CompileError> {
    let mut lowerer = ExprLowerer::new(allocator, ctx, module_scope);
    lowerer.visit_program(program);
    match lowerer.error {
        Some(e) => Err(e),
        None => Ok(()),
    }
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

    fn lower(src: &str) -> Result<String, CompileError> {
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
        lower_expressions(&allocator, &mut program, &ctx, analysis.module_scope)?;
        Ok(Codegen::new().build(&program).code)
    }

    #[test]
    fn bare_read_of_state_becomes_a_call() {
        let src = "import { state } from 'fict';\n\
             function App() {\n\
               const count = state(0);\n\
               return <div>{count + 1}</div>;\n\
             }\n";
        let code = lower(src).unwrap();
        assert!(code.contains("count()"), "{code}");
        assert!(!code.contains("{count "), "{code}");
    }

    #[test]
    fn plain_assignment_to_state_becomes_a_setter_call() {
        let src = "import { state } from 'fict';\n\
             function App() {\n\
               const count = state(0);\n\
               count = 5;\n\
               return <div />;\n\
             }\n";
        let code = lower(src).unwrap();
        assert!(code.contains("count(5)"), "{code}");
    }

    #[test]
    fn compound_assignment_reads_then_writes() {
        let src = "import { state } from 'fict';\n\
             function App() {\n\
               const count = state(0);\n\
               count += 1;\n\
               return <div />;\n\
             }\n";
        let code = lower(src).unwrap();
        assert!(code.contains("count(count()"), "{code}");
    }

    #[test]
    fn increment_expands_to_a_read_add_write() {
        let src = "import { state } from 'fict';\n\
             function App() {\n\
               const count = state(0);\n\
               count++;\n\
               return <div />;\n\
             }\n";
        let code = lower(src).unwrap();
        assert!(code.contains("count(count()"), "{code}");
    }

    #[test]
    fn reassigning_a_derived_binding_is_a_hard_error() {
        let src = "import { state, derived } from 'fict';\n\
             function App() {\n\
               const s = state(0);\n\
               const total = derived(() => s + 1);\n\
               total = 2;\n\
               return <div />;\n\
             }\n";
        let err = lower(src).unwrap_err();
        assert_eq!(err.code, error_code::DERIVED_REASSIGNED);
    }

    #[test]
    fn region_member_read_goes_through_the_region_accessor() {
        let src = "import { state, derived } from 'fict';\n\
             function App() {\n\
               const s = state(0);\n\
               const a = derived(() => s + 1);\n\
               const b = derived(() => s + 2);\n\
               return <div>{a + b}</div>;\n\
             }\n";
        let code = lower(src).unwrap();
        assert!(code.contains("__region0().a"), "{code}");
        assert!(code.contains("__region0().b"), "{code}");
    }
}
