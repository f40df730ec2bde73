//! Scopes, variables, and the per-compilation tables everything else hangs
//! off of. Scope frames form an append-only arena with parent indices;
//! instructions refer to variables by index so no back-pointer cycles exist
//! between a function, its scopes, and its body.

use std::rc::Rc;

use hashbrown::HashMap;

use crate::{
    diagnostics::DiagnosticSink,
    frontend::{
        ast::{DeferKind, Expr, FnProto},
        intern::InternedSymbol,
        SourceFile, Span,
    },
    index::{arena_id, IndexVec},
    middle::{
        ty::{FnSig, Type, TypeContext},
        value::Value,
    },
};

arena_id! {
    pub struct ScopeId;
}

arena_id! {
    pub struct VarId;
}

arena_id! {
    pub struct FnId;
}

arena_id! {
    pub struct ImportId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    FnBody,
    Block,
    Loop,
    Defer,
}

#[derive(Debug)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub kind: ScopeKind,
    /// The AST node that introduced this scope
    pub node: Option<Rc<Expr>>,
    pub fn_id: Option<FnId>,
    pub variables: Vec<VarId>,
    pub defers: Vec<DeferEntry>,
    /// `@setDebugSafety` override; `None` inherits from the parent
    pub safety_off: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct DeferEntry {
    pub kind: DeferKind,
    pub expr: Rc<Expr>,
}

#[derive(Debug)]
pub struct Variable {
    pub name: InternedSymbol,
    pub scope: ScopeId,
    pub decl_span: Span,
    /// Starts invalid; the analyzer assigns the real type
    pub ty: Type,
    /// Declared `const` in the source
    pub src_is_const: bool,
    /// The generator observed that this binding never mutates
    pub gen_is_const: bool,
    /// Compile-time storage cell, when the binding has one
    pub mem_slot_index: Option<usize>,
    pub is_inline: bool,
    pub ref_count: usize,
}

#[derive(Debug)]
pub struct FnDecl {
    pub proto: FnProto,
    pub body: Rc<Expr>,
    pub sig: FnSig,
    pub ty: Type,
    pub scope: ScopeId,
    /// Attribute state driven by `@setFnTest` / `@setFnVisible`
    pub is_test: bool,
    pub is_visible: bool,
}

#[derive(Debug, Clone)]
pub struct Decl {
    pub kind: DeclKind,
    pub is_public: bool,
}

#[derive(Debug, Clone)]
pub enum DeclKind {
    Fn(FnId),
    Type(Type),
    Const(Value),
}

/// One importable namespace: its own declarations plus re-exports pulled in
/// through use declarations.
#[derive(Debug)]
pub struct Import {
    pub name: InternedSymbol,
    pub decls: HashMap<InternedSymbol, Decl>,
    pub uses: Vec<ImportId>,
}

/// Everything one compilation owns. Single-threaded; the type interner and
/// import table are append-only caches with deterministic key equality.
#[derive(Debug)]
pub struct CompileUnit {
    pub source: SourceFile,
    pub types: TypeContext,
    pub sink: DiagnosticSink,
    pub scopes: IndexVec<ScopeId, Scope>,
    pub variables: IndexVec<VarId, Variable>,
    pub fns: IndexVec<FnId, FnDecl>,
    pub imports: IndexVec<ImportId, Import>,
    import_names: HashMap<InternedSymbol, ImportId>,
    /// Build-configuration queries served to `@compileVar`
    pub compile_vars: HashMap<InternedSymbol, Value>,
}

impl CompileUnit {
    pub fn new(source: SourceFile) -> Self {
        let mut compile_vars = HashMap::new();
        compile_vars.insert(InternedSymbol::new("is_release"), Value::from_bool(false));
        compile_vars.insert(InternedSymbol::new("is_test"), Value::from_bool(false));

        Self {
            source,
            types: TypeContext::new(),
            sink: DiagnosticSink::new(),
            scopes: IndexVec::new(),
            variables: IndexVec::new(),
            fns: IndexVec::new(),
            imports: IndexVec::new(),
            import_names: HashMap::new(),
            compile_vars,
        }
    }

    pub fn create_scope(
        &mut self,
        parent: Option<ScopeId>,
        kind: ScopeKind,
        node: Option<Rc<Expr>>,
    ) -> ScopeId {
        let fn_id = parent.and_then(|p| self.scopes[p].fn_id);
        self.scopes.push(Scope {
            parent,
            kind,
            node,
            fn_id,
            variables: Vec::new(),
            defers: Vec::new(),
            safety_off: None,
        })
    }

    pub fn add_variable(
        &mut self,
        scope: ScopeId,
        name: InternedSymbol,
        decl_span: Span,
        src_is_const: bool,
        is_inline: bool,
    ) -> VarId {
        let ty = self.types.invalid();
        let id = self.variables.push(Variable {
            name,
            scope,
            decl_span,
            ty,
            src_is_const,
            // Until an assignment proves otherwise the binding is treated
            // as never-mutating
            gen_is_const: true,
            mem_slot_index: None,
            is_inline,
            ref_count: 0,
        });
        self.scopes[scope].variables.push(id);
        id
    }

    /// Walks the scope chain looking for a variable by name
    pub fn find_variable(&self, scope: ScopeId, name: InternedSymbol) -> Option<VarId> {
        let mut current = Some(scope);

        while let Some(scope_id) = current {
            let scope = &self.scopes[scope_id];

            for var_id in scope.variables.iter().rev() {
                if self.variables[*var_id].name == name {
                    return Some(*var_id);
                }
            }

            current = scope.parent;
        }

        None
    }

    /// Effective debug-safety setting for a scope, following parents until
    /// an override is found
    pub fn debug_safety_enabled(&self, scope: ScopeId) -> bool {
        let mut current = Some(scope);

        while let Some(scope_id) = current {
            if let Some(off) = self.scopes[scope_id].safety_off {
                return !off;
            }
            current = self.scopes[scope_id].parent;
        }

        true
    }

    pub fn add_fn(&mut self, proto: FnProto, body: Rc<Expr>, sig: FnSig) -> FnId {
        let ty = self.types.fn_type(sig.clone());
        let scope = self.create_scope(None, ScopeKind::FnBody, Some(body.clone()));
        let id = self.fns.push(FnDecl {
            proto,
            body,
            sig,
            ty,
            scope,
            is_test: false,
            is_visible: false,
        });
        self.scopes[scope].fn_id = Some(id);
        id
    }

    /// Looks a function up by name in the function table
    pub fn find_fn(&self, name: InternedSymbol) -> Option<FnId> {
        self.fns
            .enumerate()
            .find(|(_, decl)| decl.proto.name == name)
            .map(|(id, _)| id)
    }

    pub fn add_import(&mut self, name: InternedSymbol, import: Import) -> ImportId {
        let id = self.imports.push(import);
        self.import_names.insert(name, id);
        id
    }

    pub fn find_import(&self, name: InternedSymbol) -> Option<ImportId> {
        self.import_names.get(&name).copied()
    }

    /// Resolves `name` inside an import namespace, chasing use declarations
    /// to a fixpoint. `from_outside` enforces visibility across the import
    /// boundary; the caller reports the violation.
    pub fn resolve_in_import(
        &self,
        import: ImportId,
        name: InternedSymbol,
        from_outside: bool,
    ) -> ImportLookup {
        let mut visited = Vec::new();
        self.resolve_in_import_inner(import, name, from_outside, &mut visited)
    }

    fn resolve_in_import_inner(
        &self,
        import: ImportId,
        name: InternedSymbol,
        from_outside: bool,
        visited: &mut Vec<ImportId>,
    ) -> ImportLookup {
        if visited.contains(&import) {
            return ImportLookup::NotFound;
        }
        visited.push(import);

        if let Some(decl) = self.imports[import].decls.get(&name) {
            if from_outside && !decl.is_public {
                return ImportLookup::Private(decl.clone());
            }
            return ImportLookup::Found(decl.clone());
        }

        for used in &self.imports[import].uses {
            match self.resolve_in_import_inner(*used, name, true, visited) {
                ImportLookup::NotFound => continue,
                found => return found,
            }
        }

        ImportLookup::NotFound
    }
}

#[derive(Debug)]
pub enum ImportLookup {
    Found(Decl),
    /// The name exists but is not visible across the import boundary
    Private(Decl),
    NotFound,
}
