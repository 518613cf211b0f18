//! Hoisted template strings for fine-grained JSX lowering (spec §4.7): a
//! static intrinsic-only subtree is serialized once to an HTML string and
//! referred to everywhere it is rendered through a `template(html)` call
//! hoisted to module scope, per spec "emit a single static HTML template
//! string at module scope and refer to it through a `template(...)`
//! accessor."
//!
//! No teacher module does this (the teacher is virtual-DOM only); grounded
//! on `symbols.rs`'s `SymbolGen` for the naming convention (`__tmplN`,
//! monotone per compile) and written in the same plain-registry style as
//! `region.rs`'s `RegionTable`.

#[derive(Default)]
pub struct TemplateRegistry {
    htmls: Vec<String>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a template's HTML, returning the id used to name its const
    /// (`__tmplN`) and to refer to it at render sites.
    pub fn register(&mut self, html: String) -> usize {
        let id = self.htmls.len();
        self.htmls.push(html);
        id
    }

    pub fn name(id: usize) -> String {
        format!("__tmpl{}", id)
    }

    /// Consumes the registry, yielding `(const name, html)` pairs in
    /// registration order — the order the hoisted declarations are emitted
    /// at the top of the module (spec §5's determinism: "assigned by
    /// traversal order").
    pub fn into_decls(self) -> Vec<(String, String)> {
        self.htmls
            .into_iter()
            .enumerate()
            .map(|(id, html)| (Self::name(id), html))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_stable_and_ordered() {
        let mut reg = TemplateRegistry::new();
        let a = reg.register("<div></div>".to_string());
        let b = reg.register("<span></span>".to_string());
        assert_eq!(TemplateRegistry::name(a), "__tmpl0");
        assert_eq!(TemplateRegistry::name(b), "__tmpl1");
        let decls = reg.into_decls();
        assert_eq!(decls, vec![
            ("__tmpl0".to_string(), "<div></div>".to_string()),
            ("__tmpl1".to_string(), "<span></span>".to_string()),
        ]);
    }
}
