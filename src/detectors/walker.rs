//! Statement walker shared by the static analyzers
//!
//! Walks every routine of a unit in source order, tracking the set of
//! locks held at each statement, and reports lock acquisitions, attribute
//! accesses and `self.method()` calls through [`WalkEvents`].
//!
//! Two hold modes exist:
//! - [`HoldMode::Must`]: a lock counts as held after a branch only if it is
//!   still held at the end of every branch. Used for protection checks.
//! - [`HoldMode::May`]: a lock explicitly acquired in any branch stays
//!   possibly held afterwards. Used for conservative lock-order edges.
//!
//! `with` acquisitions are scoped to their body in both modes. A
//! `release()` only takes effect on straight-line code or in `finally`.

use crate::detectors::locks::{
    call_callee, decorator_names, is_lock_constructor, module_lock_names, thread_safe_type,
    LockPatterns, ATOMIC_METHODS, LOCK_DECORATORS, MUTATING_METHODS,
};
use crate::models::AccessKind;
use crate::parsers::SourceUnit;
use rustc_hash::{FxHashMap, FxHashSet};
use tree_sitter::Node;

/// How held locks survive branching control flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldMode {
    Must,
    May,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldLock {
    pub name: String,
    /// Acquired by `with` or a decorator, released at scope end
    pub scoped: bool,
}

/// Locks held at a program point, in acquisition order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeldLocks(Vec<HeldLock>);

impl HeldLocks {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|l| l.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|l| l.name.as_str())
    }

    /// Most recently acquired lock
    pub fn innermost(&self) -> Option<&str> {
        self.0.last().map(|l| l.name.as_str())
    }

    fn push(&mut self, name: String, scoped: bool) {
        self.0.push(HeldLock { name, scoped });
    }

    fn release(&mut self, name: &str, scoped: bool) {
        if let Some(pos) = self
            .0
            .iter()
            .rposition(|l| l.name == name && l.scoped == scoped)
        {
            self.0.remove(pos);
        }
    }

    /// Join the lock sets at the end of each path through a statement
    fn merge(&mut self, ends: &[HeldLocks], mode: HoldMode) {
        match mode {
            HoldMode::Must => {
                let Some((first, rest)) = ends.split_first() else {
                    return;
                };
                self.0 = first
                    .0
                    .iter()
                    .filter(|l| rest.iter().all(|end| end.contains(&l.name)))
                    .cloned()
                    .collect();
            }
            HoldMode::May => {
                for end in ends {
                    for lock in &end.0 {
                        if !lock.scoped && !self.contains(&lock.name) {
                            self.0.push(lock.clone());
                        }
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutineKind {
    /// Top-level statements of the unit
    Module,
    /// Module-level function
    Function,
    /// Statements directly in a class body
    ClassBody,
    Method,
    /// Function or lambda nested inside another routine
    Closure,
}

/// The routine a statement belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routine {
    /// Qualified, e.g. `Account.deposit` or `Account.deposit.worker`
    pub name: String,
    /// Bare function name (class name for class bodies)
    pub short_name: String,
    pub class: Option<String>,
    pub kind: RoutineKind,
}

/// One access to a `self` attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrAccess {
    pub attr: String,
    pub kind: AccessKind,
    pub line: u32,
    pub read_modify_write: bool,
    /// Name the attribute was reached through (`self`, `cls`, the class name)
    pub receiver: String,
    /// Method invoked on the attribute for call-based writes (`append`, `cas`)
    pub via_method: Option<String>,
    /// Thread-safe type the attribute was constructed from
    pub thread_safe: Option<String>,
}

/// Callbacks fired by [`walk_unit`]
pub trait WalkEvents {
    fn enter_routine(&mut self, _routine: &Routine) {}

    /// `lock` is acquired while `held` (not including `lock`) is held
    fn acquire(&mut self, _routine: &Routine, _held: &HeldLocks, _lock: &str, _line: u32) {}

    fn access(&mut self, _routine: &Routine, _held: &HeldLocks, _access: AttrAccess) {}

    fn self_call(&mut self, _routine: &Routine, _held: &HeldLocks, _method: &str, _line: u32) {}
}

/// Per-class facts gathered before walking its methods
#[derive(Debug, Clone, Default)]
pub struct ClassContext {
    pub name: String,
    pub methods: FxHashSet<String>,
    pub lock_attrs: FxHashSet<String>,
    pub thread_safe_attrs: FxHashMap<String, String>,
}

struct Scope<'c> {
    routine: Routine,
    class: Option<&'c ClassContext>,
    receivers: Vec<String>,
}

/// Walk every routine of `unit`, reporting to `events`
pub fn walk_unit<E: WalkEvents>(
    unit: &SourceUnit,
    patterns: &LockPatterns,
    mode: HoldMode,
    events: &mut E,
) {
    let mut walker = Walker {
        unit,
        patterns,
        mode,
        module_locks: module_lock_names(unit),
        events,
    };
    let scope = Scope {
        routine: Routine {
            name: "<module>".to_string(),
            short_name: "<module>".to_string(),
            class: None,
            kind: RoutineKind::Module,
        },
        class: None,
        receivers: Vec::new(),
    };
    walker.events.enter_routine(&scope.routine);
    let mut held = HeldLocks::default();
    walker.walk_block(unit.root(), &scope, &mut held);
}

struct Walker<'u, 'p, 'e, E: WalkEvents> {
    unit: &'u SourceUnit,
    patterns: &'p LockPatterns,
    mode: HoldMode,
    module_locks: FxHashSet<String>,
    events: &'e mut E,
}

fn line_of(node: Node) -> u32 {
    node.start_position().row as u32 + 1
}

impl<'u, 'p, 'e, E: WalkEvents> Walker<'u, 'p, 'e, E> {
    fn text(&self, node: Node<'u>) -> &'u str {
        self.unit.text(&node)
    }

    fn walk_block(&mut self, block: Node<'u>, scope: &Scope, held: &mut HeldLocks) {
        let mut cursor = block.walk();
        let stmts: Vec<Node<'u>> = block.named_children(&mut cursor).collect();
        for stmt in stmts {
            self.walk_stmt(stmt, scope, held);
        }
    }

    fn walk_stmt(&mut self, node: Node<'u>, scope: &Scope, held: &mut HeldLocks) {
        match node.kind() {
            "expression_statement" => {
                let mut cursor = node.walk();
                let exprs: Vec<Node<'u>> = node.named_children(&mut cursor).collect();
                for expr in exprs {
                    self.walk_expression_statement(expr, scope, held);
                }
            }
            "delete_statement" => {
                let mut cursor = node.walk();
                let targets: Vec<Node<'u>> = node.named_children(&mut cursor).collect();
                for target in targets {
                    self.visit_target(target, scope, held, false);
                }
            }
            "with_statement" => self.walk_with(node, scope, held),
            "try_statement" => self.walk_try(node, scope, held),
            "function_definition" => {
                let kind = match scope.routine.kind {
                    RoutineKind::Module => RoutineKind::Function,
                    _ => RoutineKind::Closure,
                };
                self.walk_function(node, scope, kind);
            }
            "decorated_definition" => {
                if let Some(definition) = node.child_by_field_name("definition") {
                    self.walk_stmt(definition, scope, held);
                }
            }
            "class_definition" => self.walk_class(node, scope),
            "import_statement" | "import_from_statement" | "future_import_statement"
            | "global_statement" | "nonlocal_statement" | "pass_statement"
            | "break_statement" | "continue_statement" | "comment" => {}
            "return_statement" | "raise_statement" | "assert_statement" | "print_statement"
            | "exec_statement" | "type_alias_statement" => self.visit_children(node, scope, held),
            _ => self.walk_compound(node, scope, held),
        }
    }

    fn walk_expression_statement(&mut self, expr: Node<'u>, scope: &Scope, held: &mut HeldLocks) {
        match expr.kind() {
            "assignment" => self.walk_assignment(expr, scope, held),
            "augmented_assignment" => {
                if let Some(left) = expr.child_by_field_name("left") {
                    self.visit_target(left, scope, held, true);
                }
                if let Some(right) = expr.child_by_field_name("right") {
                    self.visit_expr(right, scope, held);
                }
            }
            "call" => {
                if !self.explicit_lock_call(expr, scope, held) {
                    self.visit_expr(expr, scope, held);
                }
            }
            _ => self.visit_expr(expr, scope, held),
        }
    }

    fn walk_assignment(&mut self, node: Node<'u>, scope: &Scope, held: &mut HeldLocks) {
        if let Some(right) = node.child_by_field_name("right") {
            if right.kind() == "assignment" {
                self.walk_assignment(right, scope, held);
            } else {
                self.visit_expr(right, scope, held);
            }
        }
        if let Some(left) = node.child_by_field_name("left") {
            self.visit_target(left, scope, held, false);
        }
    }

    /// `lock.acquire()` / `lock.release()` as a statement
    fn explicit_lock_call(&mut self, call: Node<'u>, scope: &Scope, held: &mut HeldLocks) -> bool {
        let Some(function) = call.child_by_field_name("function") else {
            return false;
        };
        if function.kind() != "attribute" {
            return false;
        }
        let (Some(object), Some(method)) = (
            function.child_by_field_name("object"),
            function.child_by_field_name("attribute"),
        ) else {
            return false;
        };
        let method = self.text(method);
        if method != "acquire" && method != "release" {
            return false;
        }
        let Some(lock) = self.lock_identity(object, scope) else {
            return false;
        };
        if method == "acquire" {
            self.events.acquire(&scope.routine, held, &lock, line_of(call));
            held.push(lock, false);
        } else {
            held.release(&lock, false);
        }
        if let Some(args) = call.child_by_field_name("arguments") {
            self.visit_expr(args, scope, held);
        }
        true
    }

    fn walk_with(&mut self, node: Node<'u>, scope: &Scope, held: &mut HeldLocks) {
        let mut acquired = Vec::new();
        let mut items = Vec::new();
        collect_kind(node, "with_item", "block", &mut items);
        for item in items {
            let Some(mut value) = item.child_by_field_name("value") else {
                continue;
            };
            if value.kind() == "as_pattern" {
                match value.named_child(0) {
                    Some(inner) => value = inner,
                    None => continue,
                }
            }
            match self.lock_identity(value, scope) {
                Some(lock) => {
                    self.events.acquire(&scope.routine, held, &lock, line_of(value));
                    held.push(lock.clone(), true);
                    acquired.push(lock);
                }
                None => self.visit_expr(value, scope, held),
            }
        }
        if let Some(body) = node.child_by_field_name("body") {
            self.walk_block(body, scope, held);
        }
        for lock in acquired.iter().rev() {
            held.release(lock, true);
        }
    }

    fn walk_try(&mut self, node: Node<'u>, scope: &Scope, held: &mut HeldLocks) {
        let before = held.clone();
        let mut ends = Vec::new();
        let mut body_end = None;
        let mut finally = None;
        let mut cursor = node.walk();
        let children: Vec<Node<'u>> = node.named_children(&mut cursor).collect();
        for child in children {
            match child.kind() {
                "block" => {
                    let mut branch = before.clone();
                    self.walk_block(child, scope, &mut branch);
                    body_end = Some(ends.len());
                    ends.push(branch);
                }
                // `else` only runs once the try body completed
                "else_clause" => match body_end {
                    Some(index) => {
                        let start = ends[index].clone();
                        let mut continued = Vec::new();
                        self.collect_branches(child, scope, &start, &mut continued);
                        let mut end = start;
                        end.merge(&continued, self.mode);
                        ends[index] = end;
                    }
                    None => self.collect_branches(child, scope, &before, &mut ends),
                },
                "finally_clause" => finally = Some(child),
                "comment" => {}
                _ => self.collect_branches(child, scope, &before, &mut ends),
            }
        }
        held.merge(&ends, self.mode);
        if let Some(finally) = finally {
            let mut cursor = finally.walk();
            let blocks: Vec<Node<'u>> = finally.named_children(&mut cursor).collect();
            for block in blocks.into_iter().filter(|b| b.kind() == "block") {
                self.walk_block(block, scope, held);
            }
        }
    }

    /// `if`/`for`/`while`/`match` and anything else with nested blocks
    fn walk_compound(&mut self, node: Node<'u>, scope: &Scope, held: &mut HeldLocks) {
        let before = held.clone();
        let mut ends = Vec::new();
        self.collect_branches(node, scope, &before, &mut ends);
        // only an if with an else is guaranteed to run one of its blocks
        let exhaustive = node.kind() == "if_statement"
            && node
                .children_by_field_name("alternative", &mut node.walk())
                .any(|alt| alt.kind() == "else_clause");
        if !exhaustive {
            ends.push(before);
        }
        held.merge(&ends, self.mode);
    }

    fn collect_branches(
        &mut self,
        node: Node<'u>,
        scope: &Scope,
        before: &HeldLocks,
        ends: &mut Vec<HeldLocks>,
    ) {
        let mut cursor = node.walk();
        let children: Vec<Node<'u>> = node.named_children(&mut cursor).collect();
        for child in children {
            match child.kind() {
                "block" => {
                    let mut branch = before.clone();
                    self.walk_block(child, scope, &mut branch);
                    ends.push(branch);
                }
                kind if kind.ends_with("_clause") => {
                    self.collect_branches(child, scope, before, ends)
                }
                "comment" => {}
                _ => self.visit_expr(child, scope, before),
            }
        }
    }

    fn walk_function(&mut self, node: Node<'u>, outer: &Scope, kind: RoutineKind) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let short_name = self.text(name_node).to_string();
        let name = match kind {
            RoutineKind::Function => short_name.clone(),
            _ => format!("{}.{}", outer.routine.name, short_name),
        };
        let decorators = decorator_names(self.unit, node);

        let receivers = match kind {
            RoutineKind::Method => {
                let mut receivers = Vec::new();
                if !decorators.contains(&"staticmethod") {
                    if let Some(first) = self.first_parameter(node) {
                        receivers.push(first);
                    }
                }
                if let Some(class) = outer.class {
                    receivers.push(class_leaf(&class.name).to_string());
                }
                receivers
            }
            RoutineKind::Closure => outer.receivers.clone(),
            _ => Vec::new(),
        };

        let scope = Scope {
            routine: Routine {
                name,
                short_name,
                class: outer.class.map(|c| c.name.clone()),
                kind,
            },
            class: outer.class,
            receivers,
        };
        self.events.enter_routine(&scope.routine);

        let mut held = HeldLocks::default();
        let owner = outer
            .class
            .map(|c| c.name.as_str())
            .unwrap_or("<module>")
            .to_string();
        for decorator in decorators {
            if LOCK_DECORATORS.contains(&decorator) {
                let lock = format!("{}.@{}", owner, decorator);
                self.events.acquire(&scope.routine, &held, &lock, line_of(node));
                held.push(lock, true);
            }
        }
        if let Some(body) = node.child_by_field_name("body") {
            self.walk_block(body, &scope, &mut held);
        }
    }

    fn first_parameter(&self, function: Node<'u>) -> Option<String> {
        let params = function.child_by_field_name("parameters")?;
        let first = params.named_child(0)?;
        let ident = match first.kind() {
            "identifier" => first,
            "typed_parameter" => first.named_child(0)?,
            "default_parameter" | "typed_default_parameter" => first.child_by_field_name("name")?,
            _ => return None,
        };
        (ident.kind() == "identifier").then(|| self.text(ident).to_string())
    }

    fn walk_class(&mut self, node: Node<'u>, outer: &Scope) {
        let (Some(name_node), Some(body)) = (
            node.child_by_field_name("name"),
            node.child_by_field_name("body"),
        ) else {
            return;
        };
        let name = match outer.class {
            Some(parent) => format!("{}.{}", parent.name, self.text(name_node)),
            None => self.text(name_node).to_string(),
        };
        let context = self.scan_class(&name, body);
        let scope = Scope {
            routine: Routine {
                name: name.clone(),
                short_name: class_leaf(&name).to_string(),
                class: Some(name.clone()),
                kind: RoutineKind::ClassBody,
            },
            class: Some(&context),
            receivers: Vec::new(),
        };
        self.events.enter_routine(&scope.routine);

        let empty = HeldLocks::default();
        let mut cursor = body.walk();
        let stmts: Vec<Node<'u>> = body.named_children(&mut cursor).collect();
        for stmt in stmts {
            let definition = if stmt.kind() == "decorated_definition" {
                stmt.child_by_field_name("definition").unwrap_or(stmt)
            } else {
                stmt
            };
            match definition.kind() {
                "function_definition" => self.walk_function(definition, &scope, RoutineKind::Method),
                "class_definition" => self.walk_class(definition, &scope),
                "expression_statement" => {
                    let mut inner = definition.walk();
                    let exprs: Vec<Node<'u>> = definition.named_children(&mut inner).collect();
                    for expr in exprs {
                        self.class_body_assignment(expr, &scope, &empty);
                    }
                }
                _ => {}
            }
        }
    }

    fn class_body_assignment(&mut self, expr: Node<'u>, scope: &Scope, held: &HeldLocks) {
        let (Some(left), right) = (
            expr.child_by_field_name("left"),
            expr.child_by_field_name("right"),
        ) else {
            return;
        };
        let rmw = match expr.kind() {
            "assignment" => false,
            "augmented_assignment" => true,
            _ => return,
        };
        if let Some(right) = right {
            if right.kind() == "assignment" {
                self.class_body_assignment(right, scope, held);
            }
        }
        let mut names = Vec::new();
        if left.kind() == "identifier" {
            names.push(left);
        } else {
            collect_kind(left, "identifier", "", &mut names);
        }
        for ident in names {
            self.emit(scope, held, ident, AccessKind::Write, line_of(ident), rmw, None);
        }
    }

    fn scan_class(&self, name: &str, body: Node<'u>) -> ClassContext {
        let mut context = ClassContext {
            name: name.to_string(),
            ..Default::default()
        };
        let mut cursor = body.walk();
        for stmt in body.named_children(&mut cursor) {
            let definition = if stmt.kind() == "decorated_definition" {
                stmt.child_by_field_name("definition").unwrap_or(stmt)
            } else {
                stmt
            };
            if definition.kind() == "function_definition" {
                if let Some(n) = definition.child_by_field_name("name") {
                    context.methods.insert(self.text(n).to_string());
                }
            }
        }
        self.scan_constructed_attrs(body, &mut context);
        context
    }

    fn scan_constructed_attrs(&self, node: Node<'u>, context: &mut ClassContext) {
        if node.kind() == "assignment" {
            if let (Some(left), Some(right)) = (
                node.child_by_field_name("left"),
                node.child_by_field_name("right"),
            ) {
                let attr = match left.kind() {
                    "attribute" => left
                        .child_by_field_name("attribute")
                        .map(|a| self.text(a)),
                    "identifier" => Some(self.text(left)),
                    _ => None,
                };
                if let (Some(attr), Some(callee)) = (attr, call_callee(self.unit, right)) {
                    if is_lock_constructor(callee) {
                        context.lock_attrs.insert(attr.to_string());
                    } else if let Some(kind) = thread_safe_type(callee) {
                        context
                            .thread_safe_attrs
                            .insert(attr.to_string(), kind.to_string());
                    }
                }
            }
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() != "class_definition" {
                self.scan_constructed_attrs(child, context);
            }
        }
    }

    /// Stable name for a lock expression, or `None` if it is not a lock
    fn lock_identity(&self, expr: Node<'u>, scope: &Scope) -> Option<String> {
        match expr.kind() {
            "identifier" => {
                let name = self.text(expr);
                (self.module_locks.contains(name) || self.patterns.looks_like_lock(name))
                    .then(|| name.to_string())
            }
            "attribute" => {
                let object = expr.child_by_field_name("object")?;
                let attr = self.text(expr.child_by_field_name("attribute")?);
                if self.is_receiver(object, scope) {
                    let class = scope.class?;
                    let is_lock = class.lock_attrs.contains(attr)
                        || self.patterns.looks_like_lock(attr);
                    return is_lock.then(|| format!("{}.{}", class.name, attr));
                }
                self.patterns
                    .looks_like_lock(attr)
                    .then(|| self.text(expr).to_string())
            }
            "subscript" => {
                let value = expr.child_by_field_name("value")?;
                self.lock_identity(value, scope).map(|l| format!("{}[]", l))
            }
            "parenthesized_expression" => self.lock_identity(expr.named_child(0)?, scope),
            _ => None,
        }
    }

    fn is_receiver(&self, node: Node<'u>, scope: &Scope) -> bool {
        node.kind() == "identifier" && scope.receivers.iter().any(|r| r == self.text(node))
    }

    /// Attribute of the receiver a chain like `self.a.b[k]` is rooted in
    fn receiver_attr(&self, mut node: Node<'u>, scope: &Scope) -> Option<Node<'u>> {
        loop {
            match node.kind() {
                "attribute" => {
                    let object = node.child_by_field_name("object")?;
                    if self.is_receiver(object, scope) {
                        return node.child_by_field_name("attribute");
                    }
                    node = object;
                }
                "subscript" => node = node.child_by_field_name("value")?,
                _ => return None,
            }
        }
    }

    fn visit_target(&mut self, node: Node<'u>, scope: &Scope, held: &HeldLocks, rmw: bool) {
        match node.kind() {
            "attribute" | "subscript" => {
                let Some(attr) = self.receiver_attr(node, scope) else {
                    self.visit_expr(node, scope, held);
                    return;
                };
                let direct = node.kind() == "attribute"
                    && node
                        .child_by_field_name("object")
                        .is_some_and(|o| self.is_receiver(o, scope));
                let via = (!direct).then(|| "[]".to_string());
                self.emit(scope, held, attr, AccessKind::Write, line_of(node), rmw, via);
                if node.kind() == "subscript" {
                    if let Some(index) = node.child_by_field_name("subscript") {
                        self.visit_expr(index, scope, held);
                    }
                }
            }
            "pattern_list" | "tuple_pattern" | "list_pattern" | "tuple" | "list"
            | "expression_list" | "parenthesized_expression" | "list_splat_pattern"
            | "list_splat" => {
                let mut cursor = node.walk();
                let children: Vec<Node<'u>> = node.named_children(&mut cursor).collect();
                for child in children {
                    self.visit_target(child, scope, held, rmw);
                }
            }
            "identifier" => {}
            _ => self.visit_expr(node, scope, held),
        }
    }

    fn visit_children(&mut self, node: Node<'u>, scope: &Scope, held: &HeldLocks) {
        let mut cursor = node.walk();
        let children: Vec<Node<'u>> = node.named_children(&mut cursor).collect();
        for child in children {
            self.visit_expr(child, scope, held);
        }
    }

    fn visit_expr(&mut self, node: Node<'u>, scope: &Scope, held: &HeldLocks) {
        match node.kind() {
            "lambda" => {
                if let Some(body) = node.child_by_field_name("body") {
                    self.visit_expr(body, scope, &HeldLocks::default());
                }
            }
            "call" => {
                let function = node.child_by_field_name("function");
                match function {
                    Some(f) if f.kind() == "attribute" => self.visit_method_call(f, scope, held),
                    Some(f) => self.visit_expr(f, scope, held),
                    None => {}
                }
                if let Some(args) = node.child_by_field_name("arguments") {
                    self.visit_expr(args, scope, held);
                }
            }
            "attribute" => match self.receiver_attr(node, scope) {
                Some(attr) => {
                    self.emit(scope, held, attr, AccessKind::Read, line_of(node), false, None)
                }
                None => self.visit_children(node, scope, held),
            },
            "comment" | "integer" | "float" | "identifier" => {}
            _ => self.visit_children(node, scope, held),
        }
    }

    fn visit_method_call(&mut self, function: Node<'u>, scope: &Scope, held: &HeldLocks) {
        let (Some(object), Some(method_node)) = (
            function.child_by_field_name("object"),
            function.child_by_field_name("attribute"),
        ) else {
            return;
        };
        let method = self.text(method_node);
        let line = line_of(function);

        if self.is_receiver(object, scope) {
            if scope.class.is_some_and(|c| c.methods.contains(method)) {
                self.events.self_call(&scope.routine, held, method, line);
            } else {
                self.emit(scope, held, method_node, AccessKind::Read, line, false, None);
            }
            return;
        }

        let Some(attr) = self.receiver_attr(object, scope) else {
            self.visit_expr(object, scope, held);
            return;
        };
        if MUTATING_METHODS.contains(&method) || ATOMIC_METHODS.contains(&method) {
            let via = Some(method.to_string());
            self.emit(scope, held, attr, AccessKind::Write, line, false, via);
        } else {
            self.emit(scope, held, attr, AccessKind::Read, line, false, None);
        }
        if object.kind() == "subscript" {
            if let Some(index) = object.child_by_field_name("subscript") {
                self.visit_expr(index, scope, held);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &mut self,
        scope: &Scope,
        held: &HeldLocks,
        attr_node: Node<'u>,
        kind: AccessKind,
        line: u32,
        read_modify_write: bool,
        via_method: Option<String>,
    ) {
        let Some(class) = scope.class else {
            return;
        };
        let attr = self.text(attr_node).to_string();
        if attr.starts_with("__") && attr.ends_with("__") {
            return;
        }
        if class.methods.contains(&attr)
            || class.lock_attrs.contains(&attr)
            || self.patterns.looks_like_lock(&attr)
        {
            return;
        }
        let thread_safe = class.thread_safe_attrs.get(&attr).cloned();
        // class-body names have no receiver expression
        let receiver = attr_node
            .parent()
            .filter(|p| p.kind() == "attribute")
            .and_then(|p| p.child_by_field_name("object"))
            .filter(|o| self.is_receiver(*o, scope))
            .map(|o| self.text(o).to_string())
            .unwrap_or_else(|| class_leaf(&class.name).to_string());
        self.events.access(
            &scope.routine,
            held,
            AttrAccess {
                attr,
                kind,
                line,
                read_modify_write,
                receiver,
                via_method,
                thread_safe,
            },
        );
    }
}

/// Last segment of a nested class name
fn class_leaf(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Collect descendants of `kind`, not descending into nodes of kind `stop`
fn collect_kind<'t>(node: Node<'t>, kind: &str, stop: &str, out: &mut Vec<Node<'t>>) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == kind {
            out.push(child);
        } else if child.kind() != stop {
            collect_kind(child, kind, stop, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::python::parse_source;
    use std::path::Path;

    #[derive(Default)]
    struct Recorder {
        acquires: Vec<(String, Vec<String>, String)>,
        accesses: Vec<(String, AttrAccess, Vec<String>)>,
        calls: Vec<(String, String, Vec<String>)>,
    }

    impl WalkEvents for Recorder {
        fn acquire(&mut self, routine: &Routine, held: &HeldLocks, lock: &str, _line: u32) {
            self.acquires.push((
                lock.to_string(),
                held.names().map(String::from).collect(),
                routine.name.clone(),
            ));
        }

        fn access(&mut self, routine: &Routine, held: &HeldLocks, access: AttrAccess) {
            self.accesses
                .push((routine.name.clone(), access, held.names().map(String::from).collect()));
        }

        fn self_call(&mut self, routine: &Routine, held: &HeldLocks, method: &str, _line: u32) {
            self.calls.push((
                routine.name.clone(),
                method.to_string(),
                held.names().map(String::from).collect(),
            ));
        }
    }

    fn record(source: &str, mode: HoldMode) -> Recorder {
        let unit = parse_source(source, Path::new("t.py")).unwrap();
        let mut recorder = Recorder::default();
        walk_unit(&unit, &LockPatterns::default(), mode, &mut recorder);
        recorder
    }

    fn writes_of<'a>(r: &'a Recorder, attr: &str) -> Vec<&'a (String, AttrAccess, Vec<String>)> {
        r.accesses
            .iter()
            .filter(|(_, a, _)| a.attr == attr && a.kind == AccessKind::Write)
            .collect()
    }

    #[test]
    fn test_with_lock_scopes_the_body() {
        let r = record(
            r#"
import threading
class Counter:
    def __init__(self):
        self._lock = threading.Lock()
        self.value = 0

    def inc(self):
        with self._lock:
            self.value += 1
        self.value = 5
"#,
            HoldMode::Must,
        );
        let writes = writes_of(&r, "value");
        assert_eq!(writes.len(), 3);
        assert!(writes[0].2.is_empty());
        assert_eq!(writes[1].2, vec!["Counter._lock"]);
        assert!(writes[1].1.read_modify_write);
        assert!(writes[2].2.is_empty());
        assert!(r.accesses.iter().all(|(_, a, _)| a.attr != "_lock"));
    }

    #[test]
    fn test_acquire_release_with_finally() {
        let r = record(
            r#"
class Box:
    def put(self, v):
        self._lock.acquire()
        try:
            self.items.append(v)
        finally:
            self._lock.release()
        self.items.append(v)
"#,
            HoldMode::Must,
        );
        let writes = writes_of(&r, "items");
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].2, vec!["Box._lock"]);
        assert_eq!(writes[0].1.via_method.as_deref(), Some("append"));
        assert!(writes[1].2.is_empty());
    }

    #[test]
    fn test_branch_acquire_is_only_may_held() {
        let source = r#"
class Svc:
    def run(self, flag):
        if flag:
            self.lock_a.acquire()
        with self.lock_b:
            self.count = 1
"#;
        let must = record(source, HoldMode::Must);
        let b = must.acquires.iter().find(|(l, _, _)| l == "Svc.lock_b").unwrap();
        assert!(b.1.is_empty());

        let may = record(source, HoldMode::May);
        let b = may.acquires.iter().find(|(l, _, _)| l == "Svc.lock_b").unwrap();
        assert_eq!(b.1, vec!["Svc.lock_a"]);
    }

    #[test]
    fn test_lock_taken_on_every_branch_is_must_held() {
        let r = record(
            r#"
class Svc:
    def run(self, fast):
        if fast:
            self._lock.acquire()
        else:
            self._lock.acquire()
        self.count = 1
        self._lock.release()
        for _ in range(3):
            self._lock.acquire()
        self.count = 2
"#,
            HoldMode::Must,
        );
        let writes = writes_of(&r, "count");
        assert_eq!(writes[0].2, vec!["Svc._lock"]);
        assert!(writes[1].2.is_empty());
    }

    #[test]
    fn test_nested_with_items_and_module_locks() {
        let r = record(
            r#"
import threading
first = threading.Lock()
second = threading.Lock()

def transfer():
    with first, second:
        pass
"#,
            HoldMode::May,
        );
        assert_eq!(r.acquires.len(), 2);
        assert_eq!(r.acquires[1].0, "second");
        assert_eq!(r.acquires[1].1, vec!["first"]);
        assert_eq!(r.acquires[1].2, "transfer");
    }

    #[test]
    fn test_closures_start_without_locks() {
        let r = record(
            r#"
class Pool:
    def submit(self):
        with self._lock:
            def job():
                self.done += 1
            cb = lambda: self.results.append(1)
"#,
            HoldMode::Must,
        );
        let done = writes_of(&r, "done");
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].0, "Pool.submit.job");
        assert!(done[0].2.is_empty());
        let results = writes_of(&r, "results");
        assert_eq!(results.len(), 1);
        assert!(results[0].2.is_empty());
    }

    #[test]
    fn test_self_calls_and_decorator_locks() {
        let r = record(
            r#"
class Bank:
    @synchronized
    def audit(self):
        self.helper()

    def helper(self):
        return self.total
"#,
            HoldMode::May,
        );
        assert_eq!(r.acquires[0].0, "Bank.@synchronized");
        assert_eq!(r.calls.len(), 1);
        assert_eq!(r.calls[0].1, "helper");
        assert_eq!(r.calls[0].2, vec!["Bank.@synchronized"]);
        assert!(r
            .accesses
            .iter()
            .any(|(_, a, _)| a.attr == "total" && a.kind == AccessKind::Read));
    }

    #[test]
    fn test_class_body_and_subscript_writes() {
        let r = record(
            r#"
import queue
class Registry:
    instances = 0

    def __init__(self):
        self.jobs = queue.Queue()
        self.cache = {}

    def store(self, k, v):
        self.cache[k] = v
        Registry.instances += 1
        del self.cache[k]
"#,
            HoldMode::Must,
        );
        let instances = writes_of(&r, "instances");
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].0, "Registry");
        assert!(instances[1].1.read_modify_write);
        assert_eq!(writes_of(&r, "cache").len(), 3);
        let jobs = writes_of(&r, "jobs");
        assert_eq!(jobs[0].1.thread_safe.as_deref(), Some("Queue"));
    }
}
