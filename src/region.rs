//! Region grouping (spec §4.3): sibling derivations written in the same
//! control-flow block, consumed together, get materialized as one memo
//! returning a record instead of N separate memos. Also covers the
//! conditionally-reassigned-`let` case: two or more `let`s declared just
//! outside an `if`/`else` whose every arm reassigns the full group from a
//! reactive expression collapse into the same mechanism, which gives
//! condition hoisting for free once `component.rs` wraps the `if` in a
//! memo callback — the condition only re-evaluates when the memo's own
//! dependencies change, not at every read of its outputs.
//!
//! Grounded on the teacher's block-scoped bookkeeping in `component.rs`'s
//! `ResolutionContext` (per-instance collections keyed by an owning block),
//! generalized from "one Zenith component instance" to "one lexical block".

use crate::scope::{free_reactive_deps, Binding, BindingKind, ScopeId, ScopeTree};
use oxc_ast::ast::*;
use oxc_ast_visit::Visit;
use std::collections::{BTreeSet, HashMap};

pub struct Region {
    pub id: usize,
    pub block_scope: ScopeId,
    /// Output names in source-textual order; a region always has >= 2.
    pub outputs: Vec<String>,
    /// Span start of the `if` statement this region replaces, for the
    /// conditionally-reassigned-`let` case; `None` for a plain sibling-const
    /// group, which materializes in place with no surrounding control flow.
    pub condition_span: Option<u32>,
}

#[derive(Default)]
pub struct RegionTable {
    pub regions: Vec<Region>,
    member_of: HashMap<String, usize>,
}

impl RegionTable {
    pub fn region_of(&self, name: &str) -> Option<&Region> {
        self.member_of.get(name).map(|id| &self.regions[*id])
    }

    fn push(&mut self, block_scope: ScopeId, outputs: Vec<String>, condition_span: Option<u32>) {
        let id = self.regions.len();
        for name in &outputs {
            self.member_of.insert(name.clone(), id);
        }
        self.regions.push(Region { id, block_scope, outputs, condition_span });
    }
}

fn is_derivation(kind: BindingKind) -> bool {
    matches!(kind, BindingKind::Derived | BindingKind::DerivedMemo | BindingKind::DerivedGetter)
}

/// Collects every free identifier read anywhere in a function body
/// (including inside nested closures), used to gate grouping on spec
/// §4.3's "at least one consumer reads two-or-more together" — approximated
/// here as "at least two of the candidate names are read somewhere in the
/// owning function," cheaper than per-read-site co-occurrence and still
/// requiring genuine multi-name consumption (see DESIGN.md).
#[derive(Default)]
struct IdentCollector {
    names: BTreeSet<String>,
}

impl<'a> Visit<'a> for IdentCollector {
    fn visit_identifier_reference(&mut self, ident: &IdentifierReference<'a>) {
        self.names.insert(ident.name.to_string());
    }
}

fn co_read_count(names: &[String], read_names: &BTreeSet<String>) -> usize {
    names.iter().filter(|n| read_names.contains(n.as_str())).count()
}

/// Direct (non-nested) `name = expr;` assignments inside one `if`/`else`
/// arm, restricted to `candidates`. Only statements at the arm's own top
/// level count — an assignment inside a further-nested block does not
/// reassign "only in one block" per spec §4.3's grouping rule.
fn direct_assigns<'s, 'a>(arm: &'s Statement<'a>, candidates: &[String]) -> HashMap<String, &'s Expression<'a>> {
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
        if candidates.iter().any(|c| c == &name) {
            out.insert(name, &assign.right);
        }
    }
    out
}

/// Scans one function (or module) body's own top-level statements for both
/// grouping mechanisms. `stmts` is never descended into recursively here —
/// matches the bound `component::rewrite_top_level` already has (it only
/// rewrites a component/hook body's immediate statement list), so a region
/// this pass finds is always one `component.rs` can actually materialize.
fn scan_body<'a>(
    table: &mut RegionTable,
    tree: &ScopeTree,
    fn_scope: ScopeId,
    stmts: &oxc_allocator::Vec<'a, Statement<'a>>,
    lazy_conditional: bool,
) {
    let mut collector = IdentCollector::default();
    for stmt in stmts.iter() {
        collector.visit_statement(stmt);
    }
    let read_names = collector.names;

    let scope = tree.get(fn_scope);
    let mut siblings: Vec<&Binding> = scope.bindings.values().filter(|b| is_derivation(b.kind)).collect();
    siblings.sort_by_key(|b| (b.declared_at.line, b.declared_at.column));
    if siblings.len() >= 2 {
        let names: Vec<String> = siblings.iter().map(|b| b.name.clone()).collect();
        if co_read_count(&names, &read_names) >= 2 {
            table.push(fn_scope, names, None);
        }
    }

    if lazy_conditional {
        // spec §6 `lazyConditional` (default on): branch-local derivations
        // stay lazy accessors instead of being hoisted into an eager region
        // memo — skip the conditionally-reassigned-`let` mechanism entirely.
        return;
    }

    let mut let_names: Vec<String> = Vec::new();
    for stmt in stmts.iter() {
        if let Statement::VariableDeclaration(decl) = stmt {
            if decl.kind == VariableDeclarationKind::Let {
                for d in &decl.declarations {
                    if let BindingPattern::BindingIdentifier(id) = &d.id {
                        let_names.push(id.name.to_string());
                    }
                }
            }
            continue;
        }
        let Statement::IfStatement(if_stmt) = stmt else { continue };
        if let_names.is_empty() {
            continue;
        }
        let Some(alternate) = &if_stmt.alternate else { continue };
        let cons = direct_assigns(&if_stmt.consequent, &let_names);
        let alt = direct_assigns(alternate, &let_names);
        if cons.is_empty() {
            continue;
        }
        let cons_keys: BTreeSet<&String> = cons.keys().collect();
        let alt_keys: BTreeSet<&String> = alt.keys().collect();
        if cons_keys != alt_keys {
            continue;
        }
        let all_reactive = cons
            .values()
            .chain(alt.values())
            .all(|expr| !free_reactive_deps(tree, fn_scope, expr).is_empty());
        if !all_reactive {
            continue;
        }
        let mut names: Vec<String> = cons_keys.into_iter().cloned().collect();
        names.sort();
        if names.len() < 2 {
            // A single output degenerates to a plain memo/getter (spec
            // §4.3); leave it for `policy`/`component` to handle as usual.
            continue;
        }
        if co_read_count(&names, &read_names) < 2 {
            continue;
        }
        table.push(fn_scope, names, Some(if_stmt.span.start));
    }
}

struct BodyWalker<'t> {
    table: RegionTable,
    tree: &'t ScopeTree,
    scope_by_span: &'t HashMap<u32, ScopeId>,
    lazy_conditional: bool,
}

impl<'t, 'a> Visit<'a> for BodyWalker<'t> {
    fn visit_function_body(&mut self, body: &FunctionBody<'a>) {
        if let Some(&scope) = self.scope_by_span.get(&body.span.start) {
            scan_body(&mut self.table, self.tree, scope, &body.statements, self.lazy_conditional);
        }
        oxc_ast_visit::walk::walk_function_body(self, body);
    }
}

/// Groups sibling derivations/conditionally-reassigned `let`s per spec
/// §4.3. Needs the program alongside the scope tree because the grouping
/// rule is about statement-level control flow (which `let`s an `if`'s arms
/// reassign together), not just which names share a scope. `lazy_conditional`
/// is `CompileOptions::lazy_conditional` (spec §6): when set, conditionally-
/// reassigned `let` groups are left alone rather than hoisted into an eager
/// region memo.
pub fn group_regions<'a>(
    tree: &ScopeTree,
    scope_by_span: &HashMap<u32, ScopeId>,
    module_scope: ScopeId,
    program: &Program<'a>,
    lazy_conditional: bool,
) -> RegionTable {
    let mut walker = BodyWalker { table: RegionTable::default(), tree, scope_by_span, lazy_conditional };
    scan_body(&mut walker.table, tree, module_scope, &program.body, lazy_conditional);
    walker.visit_program(program);
    walker.table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loc::LineIndex;
    use crate::scope;
    use oxc_allocator::Allocator;
    use oxc_parser::Parser;
    use oxc_span::SourceType;

    fn parse(allocator: &Allocator, src: &str) -> Program<'_> {
        let source_type = SourceType::default().with_jsx(true).with_typescript(true);
        Parser::new(allocator, src, source_type).parse().program
    }

    fn group(program: &Program, src: &str) -> RegionTable {
        let lines = LineIndex::new(src);
        let analysis = scope::analyze(program, "test.tsx", &lines, src).unwrap();
        group_regions(&analysis.tree, &analysis.scope_by_span, analysis.module_scope, program, false)
    }

    #[test]
    fn two_co_read_derivations_form_a_region() {
        let allocator = Allocator::default();
        let src = "import { state, derived } from 'fict';\n\
             function App() {\n\
               const s = state(1);\n\
               const a = derived(() => s() + 1);\n\
               const b = derived(() => s() + 2);\n\
               return <p>{a()}{b()}</p>;\n\
             }\n";
        let program = parse(&allocator, src);
        let table = group(&program, src);
        assert!(table.region_of("a").is_some());
        assert_eq!(table.region_of("a").unwrap().id, table.region_of("b").unwrap().id);
    }

    #[test]
    fn uncorrelated_derivation_has_no_region() {
        let allocator = Allocator::default();
        let src = "import { state, derived } from 'fict';\n\
             function App() {\n\
               const s = state(1);\n\
               const a = derived(() => s() + 1);\n\
               return <p>{a()}</p>;\n\
             }\n";
        let program = parse(&allocator, src);
        let table = group(&program, src);
        assert!(table.region_of("a").is_none());
    }

    #[test]
    fn conditionally_reassigned_lets_form_a_region() {
        let allocator = Allocator::default();
        let src = "import { state } from 'fict';\n\
             function App() {\n\
               const s = state(1);\n\
               let a; let b;\n\
               if (s() > 0) { a = s() + 1; b = s() + 2; } else { a = s() - 1; b = s() - 2; }\n\
               return <p>{a}{b}</p>;\n\
             }\n";
        let program = parse(&allocator, src);
        let table = group(&program, src);
        let region = table.region_of("a").expect("a should be grouped");
        assert_eq!(table.region_of("b").unwrap().id, region.id);
        assert!(region.condition_span.is_some());
    }

    #[test]
    fn asymmetric_arms_are_not_grouped() {
        let allocator = Allocator::default();
        let src = "import { state } from 'fict';\n\
             function App() {\n\
               const s = state(1);\n\
               let a; let b;\n\
               if (s() > 0) { a = s() + 1; b = s() + 2; } else { a = s() - 1; }\n\
               return <p>{a}{b}</p>;\n\
             }\n";
        let program = parse(&allocator, src);
        let table = group(&program, src);
        assert!(table.region_of("a").is_none());
    }

    #[test]
    fn lazy_conditional_suppresses_the_let_mechanism() {
        let allocator = Allocator::default();
        let src = "import { state } from 'fict';\n\
             function App() {\n\
               const s = state(1);\n\
               let a; let b;\n\
               if (s() > 0) { a = s() + 1; b = s() + 2; } else { a = s() - 1; b = s() - 2; }\n\
               return <p>{a}{b}</p>;\n\
             }\n";
        let program = parse(&allocator, src);
        let lines = LineIndex::new(src);
        let analysis = scope::analyze(&program, "test.tsx", &lines, src).unwrap();
        let table = group_regions(&analysis.tree, &analysis.scope_by_span, analysis.module_scope, &program, true);
        assert!(table.region_of("a").is_none());
    }
}
