//! Generated-symbol naming and the delegated-event table (spec §4.7,
//! §5, GLOSSARY "Delegated event").
//!
//! The symbol counter is owned by one `compile()` call rather than kept in
//! a process-wide static, per spec §5 ("reset at the start of each run").
//! The teacher instead uses a module-wide `lazy_static` counter
//! (`EXPRESSION_ID_COUNTER` in `transform.rs`) because it compiles many
//! files in one process; this crate's core compiles one translation unit
//! per call so the counter lives on the call's own `SymbolGen`.

/// The fixed delegated-event set named verbatim in the spec (§4.7). Spec
/// §9's Open Questions explicitly defer the *exact* membership to whatever
/// runtime the output targets ("must be derived from the runtime... import
/// or otherwise share that set verbatim"); this is the literal set the spec
/// text enumerates, kept as a single named constant so an embedder can swap
/// it for its runtime's actual table without touching the lowering code.
pub const DELEGATED_EVENTS: &[&str] = &[
    "click",
    "input",
    "change",
    "submit",
    "keydown",
    "keyup",
    "mousedown",
    "mouseup",
    "mouseenter",
    "mouseleave",
    "focus",
    "blur",
    "pointerdown",
    "pointerup",
    "touchstart",
    "touchend",
];

pub fn is_delegated_event(name: &str) -> bool {
    DELEGATED_EVENTS.contains(&name)
}

/// Strips the `on` prefix and lowercases the whole remainder, e.g.
/// `onPointerDown` -> `pointerdown`, matching the all-lowercase entries in
/// `DELEGATED_EVENTS`. Returns `None` for non-event-shaped attribute names.
pub fn event_name_from_attr(attr: &str) -> Option<String> {
    if attr.len() <= 2 || !attr.starts_with("on") {
        return None;
    }
    let rest = &attr[2..];
    let mut chars = rest.chars();
    let first = chars.next()?;
    if !first.is_ascii_uppercase() {
        return None;
    }
    Some(rest.to_ascii_lowercase())
}

/// Monotone counter for stable generated identifiers (`__fictCtx`,
/// `__tmpl0`, `__cached_name`, ...), scoped to a single `compile()` call.
pub struct SymbolGen {
    next: u32,
}

impl SymbolGen {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    pub fn next(&mut self, prefix: &str) -> String {
        let id = self.next;
        self.next += 1;
        format!("__{}{}", prefix, id)
    }
}

impl Default for SymbolGen {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_stable_increasing_names() {
        let mut gen = SymbolGen::new();
        assert_eq!(gen.next("tmpl"), "__tmpl0");
        assert_eq!(gen.next("tmpl"), "__tmpl1");
    }

    #[test]
    fn recognizes_delegated_vs_non_delegated() {
        assert!(is_delegated_event("click"));
        assert!(!is_delegated_event("scroll"));
    }

    #[test]
    fn extracts_event_name_from_handler_attr() {
        assert_eq!(event_name_from_attr("onClick").as_deref(), Some("click"));
        assert_eq!(event_name_from_attr("onPointerDown").as_deref(), Some("pointerdown"));
        assert_eq!(event_name_from_attr("class"), None);
    }
}
