//! Policy pass (spec §4.4): decide memo vs getter per derivation.
//!
//! A name is scanned for three kinds of "reactive sink" use: inside another
//! derivation's initializer (already on `Binding::deps`), inside JSX (text
//! or a non-event, non-`key` attribute expression), or inside an `effect`
//! body. Any of those make it a memo; module-scope derivations are always
//! memos regardless of use site. Everything else becomes a getter.
//!
//! The scanning style (a `Visit` impl that special-cases JSX attribute
//! names) follows the teacher's `jsx_lowerer.rs` attribute-matching code.

use crate::scope::{BindingKind, ScopeId, ScopeTree};
use oxc_ast::ast::*;
use oxc_ast_visit::Visit;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivationPolicy {
    Memo,
    Getter,
}

#[derive(Default)]
pub struct PolicyOverlay {
    policies: HashMap<String, DerivationPolicy>,
}

impl PolicyOverlay {
    pub fn policy_of(&self, name: &str) -> DerivationPolicy {
        self.policies.get(name).copied().unwrap_or(DerivationPolicy::Getter)
    }

    /// Names classified `Getter` — the candidates `getter_cache` (spec §6)
    /// considers for hoisting a repeated read within one callback body.
    pub fn getter_names(&self) -> impl Iterator<Item = &str> {
        self.policies
            .iter()
            .filter(|(_, policy)| **policy == DerivationPolicy::Getter)
            .map(|(name, _)| name.as_str())
    }
}

fn is_derivation(kind: BindingKind) -> bool {
    matches!(
        kind,
        BindingKind::Derived | BindingKind::DerivedMemo | BindingKind::DerivedGetter
    )
}

fn is_event_attr_name(name: &str) -> bool {
    name.len() > 2 && name.starts_with("on") && name.as_bytes()[2].is_ascii_uppercase()
}

#[derive(Default)]
struct SinkCollector {
    names: HashSet<String>,
}

impl<'a> Visit<'a> for SinkCollector {
    fn visit_jsx_attribute_item(&mut self, item: &JSXAttributeItem<'a>) {
        if let JSXAttributeItem::Attribute(attr) = item {
            let name = match &attr.name {
                JSXAttributeName::Identifier(id) => id.name.to_string(),
                JSXAttributeName::NamespacedName(ns) => ns.name.name.to_string(),
            };
            if name == "key" || is_event_attr_name(&name) {
                return;
            }
            if let Some(JSXAttributeValue::ExpressionContainer(container)) = &attr.value {
                if let Some(expr) = container.expression.as_expression() {
                    self.visit_expression(expr);
                }
            }
        }
    }

    fn visit_jsx_expression_container(&mut self, container: &JSXExpressionContainer<'a>) {
        if let Some(expr) = container.expression.as_expression() {
            self.visit_expression(expr);
        }
    }

    fn visit_identifier_reference(&mut self, ident: &IdentifierReference<'a>) {
        self.names.insert(ident.name.to_string());
    }
}

fn jsx_sink_names(program: &Program) -> HashSet<String> {
    let mut collector = SinkCollector::default();
    collector.visit_program(program);
    collector.names
}

fn effect_sink_names(program: &Program, effect_local: Option<&str>) -> HashSet<String> {
    let Some(effect_local) = effect_local else {
        return HashSet::new();
    };

    struct EffectFinder<'x> {
        effect_local: &'x str,
        names: HashSet<String>,
    }
    impl<'a, 'x> Visit<'a> for EffectFinder<'x> {
        fn visit_call_expression(&mut self, call: &CallExpression<'a>) {
            if let Expression::Identifier(callee) = &call.callee {
                if callee.name.as_str() == self.effect_local {
                    let mut collector = SinkCollector::default();
                    for arg in &call.arguments {
                        if let Some(expr) = arg.as_expression() {
                            collector.visit_expression(expr);
                        }
                    }
                    self.names.extend(collector.names);
                }
            }
            oxc_ast_visit::walk::walk_call_expression(self, call);
        }
    }
    let mut finder = EffectFinder {
        effect_local,
        names: HashSet::new(),
    };
    finder.visit_program(program);
    finder.names
}

/// Runs the policy pass. `effect_local` is the local name bound to the
/// effect intrinsic (after import-alias resolution), if any was imported.
pub fn compute_policy(
    tree: &ScopeTree,
    program: &Program,
    module_scope: ScopeId,
    effect_local: Option<&str>,
) -> PolicyOverlay {
    let mut sink_names = jsx_sink_names(program);
    sink_names.extend(effect_sink_names(program, effect_local));

    for scope_id in 0..tree.len() {
        let scope = tree.get(scope_id);
        for binding in scope.bindings.values() {
            if is_derivation(binding.kind) {
                sink_names.extend(binding.deps.iter().cloned());
            }
        }
    }

    let mut overlay = PolicyOverlay::default();
    for scope_id in 0..tree.len() {
        let scope = tree.get(scope_id);
        for binding in scope.bindings.values() {
            if !is_derivation(binding.kind) {
                continue;
            }
            let is_module_level = binding.owner_scope == module_scope;
            let policy = if is_module_level || sink_names.contains(&binding.name) {
                DerivationPolicy::Memo
            } else {
                DerivationPolicy::Getter
            };
            overlay.policies.insert(binding.name.clone(), policy);
        }
    }
    overlay
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxc_allocator::Allocator;
    use oxc_parser::Parser;
    use oxc_span::SourceType;

    fn parse(src: &str) -> (Allocator, SourceType) {
        (Allocator::default(), SourceType::default().with_typescript(true).with_jsx(true).with_module(true))
    }

    #[test]
    fn jsx_read_makes_a_memo() {
        let src = "function App() { return <div>{total}</div>; }";
        let (allocator, source_type) = parse(src);
        let ret = Parser::new(&allocator, src, source_type).parse();
        let program = ret.program;
        let names = jsx_sink_names(&program);
        assert!(names.contains("total"));
    }

    #[test]
    fn event_handler_is_not_a_sink() {
        let src = "function App() { return <button onClick={() => total}>x</button>; }";
        let (allocator, source_type) = parse(src);
        let ret = Parser::new(&allocator, src, source_type).parse();
        let program = ret.program;
        let names = jsx_sink_names(&program);
        assert!(!names.contains("total"));
    }
}
