//! Recognition of locks, thread-safe primitives and concurrency markers
//!
//! Shared by the shared-state and lock-order analyzers so both agree on
//! what counts as a lock.

use crate::parsers::SourceUnit;
use regex::Regex;
use rustc_hash::FxHashSet;
use std::sync::OnceLock;
use tree_sitter::Node;

/// Callees that construct a lock
pub const LOCK_CONSTRUCTORS: &[&str] = &[
    "Lock",
    "RLock",
    "Semaphore",
    "BoundedSemaphore",
    "Condition",
    "allocate_lock",
];

/// Callees that construct a container whose operations are atomic
pub const THREAD_SAFE_CONSTRUCTORS: &[&str] = &[
    "Queue",
    "SimpleQueue",
    "LifoQueue",
    "PriorityQueue",
    "JoinableQueue",
    "Event",
    "Barrier",
    "deque",
    "count",
];

/// Compare-and-swap style method names
pub const ATOMIC_METHODS: &[&str] = &[
    "compare_and_swap",
    "compare_and_set",
    "compare_exchange",
    "cas",
    "fetch_add",
    "fetch_sub",
    "get_and_set",
    "get_and_add",
    "get_and_increment",
    "increment_and_get",
    "add_and_get",
    "atomic_add",
];

/// Container methods that mutate their receiver
pub const MUTATING_METHODS: &[&str] = &[
    "append",
    "appendleft",
    "extend",
    "extendleft",
    "insert",
    "remove",
    "pop",
    "popleft",
    "popitem",
    "clear",
    "update",
    "add",
    "discard",
    "setdefault",
    "sort",
    "reverse",
    "put",
    "put_nowait",
    "set",
    "rotate",
];

/// Decorators that wrap a method body in a lock
pub const LOCK_DECORATORS: &[&str] = &["synchronized", "synchronize", "locked", "with_lock"];

/// Imports that mean the module participates in concurrency
pub const CONCURRENCY_MODULES: &[&str] = &[
    "threading",
    "_thread",
    "concurrent",
    "multiprocessing",
    "asyncio",
    "queue",
    "gevent",
    "eventlet",
];

static LOCK_NAME: OnceLock<Regex> = OnceLock::new();

fn lock_name() -> &'static Regex {
    LOCK_NAME.get_or_init(|| {
        Regex::new(
            r"(?i:(?:^|_)(?:r?lock|locks|mutex|sem|semaphore|cond|condition|cv)(?:_|\d|$))|[a-z0-9](?:Lock|Mutex|Semaphore|Condition)$",
        )
        .expect("valid regex")
    })
}

/// Last dotted segment of a callee, `threading.Lock` -> `Lock`
pub fn callee_name(callee: &str) -> &str {
    callee.rsplit('.').next().unwrap_or(callee)
}

pub fn is_lock_constructor(callee: &str) -> bool {
    LOCK_CONSTRUCTORS.contains(&callee_name(callee))
}

/// Thread-safe container type constructed by `callee`, if any
pub fn thread_safe_type(callee: &str) -> Option<&str> {
    let name = callee_name(callee);
    if THREAD_SAFE_CONSTRUCTORS.contains(&name) || name.starts_with("Atomic") {
        Some(name)
    } else {
        None
    }
}

/// Name-based lock heuristics plus configured names
#[derive(Debug, Clone, Default)]
pub struct LockPatterns {
    extra_names: FxHashSet<String>,
}

impl LockPatterns {
    pub fn new(extra_names: &[String]) -> Self {
        Self {
            extra_names: extra_names.iter().cloned().collect(),
        }
    }

    pub fn looks_like_lock(&self, name: &str) -> bool {
        self.extra_names.contains(name) || lock_name().is_match(name)
    }
}

/// Callee text of a `call` node, when it is a plain or dotted name
pub fn call_callee<'a>(unit: &'a SourceUnit, call: Node) -> Option<&'a str> {
    if call.kind() != "call" {
        return None;
    }
    let function = call.child_by_field_name("function")?;
    match function.kind() {
        "identifier" | "attribute" => Some(unit.text(&function)),
        _ => None,
    }
}

/// Whether the unit imports a concurrency module
pub fn imports_concurrency(unit: &SourceUnit) -> bool {
    let mut found = false;
    visit_imports(unit, unit.root(), &mut |module| {
        let root = module.split('.').next().unwrap_or(module);
        if CONCURRENCY_MODULES.contains(&root) {
            found = true;
        }
    });
    found
}

fn visit_imports<F: FnMut(&str)>(unit: &SourceUnit, node: Node, on_module: &mut F) {
    match node.kind() {
        "import_statement" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                let name = match child.kind() {
                    "aliased_import" => child.child_by_field_name("name"),
                    "dotted_name" => Some(child),
                    _ => None,
                };
                if let Some(name) = name {
                    on_module(unit.text(&name));
                }
            }
        }
        "import_from_statement" => {
            if let Some(module) = node.child_by_field_name("module_name") {
                on_module(unit.text(&module));
            }
        }
        _ => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                visit_imports(unit, child, on_module);
            }
        }
    }
}

/// Module-level names bound to a lock constructor, e.g. `db_lock = threading.Lock()`
pub fn module_lock_names(unit: &SourceUnit) -> FxHashSet<String> {
    let mut names = FxHashSet::default();
    let root = unit.root();
    let mut cursor = root.walk();
    for stmt in root.named_children(&mut cursor) {
        if stmt.kind() != "expression_statement" {
            continue;
        }
        let mut inner = stmt.walk();
        for expr in stmt.named_children(&mut inner) {
            if expr.kind() != "assignment" {
                continue;
            }
            let (Some(left), Some(right)) = (
                expr.child_by_field_name("left"),
                expr.child_by_field_name("right"),
            ) else {
                continue;
            };
            if left.kind() == "identifier"
                && call_callee(unit, right).is_some_and(is_lock_constructor)
            {
                names.insert(unit.text(&left).to_string());
            }
        }
    }
    names
}

/// Decorator names on a definition wrapped in `decorated_definition`
pub fn decorator_names<'a>(unit: &'a SourceUnit, function: Node) -> Vec<&'a str> {
    let Some(parent) = function.parent() else {
        return vec![];
    };
    if parent.kind() != "decorated_definition" {
        return vec![];
    }
    let mut names = Vec::new();
    let mut cursor = parent.walk();
    for child in parent.named_children(&mut cursor) {
        if child.kind() != "decorator" {
            continue;
        }
        let Some(expr) = child.named_child(0) else {
            continue;
        };
        let target = if expr.kind() == "call" {
            expr.child_by_field_name("function").unwrap_or(expr)
        } else {
            expr
        };
        names.push(callee_name(unit.text(&target)));
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::python::parse_source;
    use std::path::Path;

    #[test]
    fn test_lock_name_heuristics() {
        let patterns = LockPatterns::default();
        for name in ["_lock", "lock", "db_lock", "lock_a", "_mutex", "cv", "_cond", "stateLock", "lock2"] {
            assert!(patterns.looks_like_lock(name), "{name} should look like a lock");
        }
        for name in ["clock", "block", "locked", "unlock", "second", "semantic", "count"] {
            assert!(!patterns.looks_like_lock(name), "{name} should not look like a lock");
        }
    }

    #[test]
    fn test_configured_lock_names() {
        let patterns = LockPatterns::new(&["_guard".to_string()]);
        assert!(patterns.looks_like_lock("_guard"));
        assert!(!patterns.looks_like_lock("guardian"));
    }

    #[test]
    fn test_constructor_recognition() {
        assert!(is_lock_constructor("threading.Lock"));
        assert!(is_lock_constructor("RLock"));
        assert!(!is_lock_constructor("threading.Thread"));
        assert_eq!(thread_safe_type("queue.Queue"), Some("Queue"));
        assert_eq!(thread_safe_type("AtomicInteger"), Some("AtomicInteger"));
        assert_eq!(thread_safe_type("collections.deque"), Some("deque"));
        assert_eq!(thread_safe_type("dict"), None);
    }

    #[test]
    fn test_concurrency_imports() {
        let threaded = parse_source("import threading\n", Path::new("a.py")).unwrap();
        assert!(imports_concurrency(&threaded));
        let futures =
            parse_source("from concurrent.futures import ThreadPoolExecutor\n", Path::new("b.py"))
                .unwrap();
        assert!(imports_concurrency(&futures));
        let aliased = parse_source("import multiprocessing as mp\n", Path::new("c.py")).unwrap();
        assert!(imports_concurrency(&aliased));
        let plain = parse_source("import os\nimport json\n", Path::new("d.py")).unwrap();
        assert!(!imports_concurrency(&plain));
    }

    #[test]
    fn test_module_lock_names() {
        let unit = parse_source(
            "import threading\nfirst = threading.Lock()\nsecond = threading.RLock()\nother = 3\n",
            Path::new("m.py"),
        )
        .unwrap();
        let names = module_lock_names(&unit);
        assert!(names.contains("first"));
        assert!(names.contains("second"));
        assert!(!names.contains("other"));
    }
}
