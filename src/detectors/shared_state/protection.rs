//! Recognized protection idioms
//!
//! The set is closed: a write is protected by a held lock, by an atomic
//! operation, or by being confined to a single thread of control.

use crate::detectors::locks::ATOMIC_METHODS;
use crate::detectors::walker::{AttrAccess, Routine, RoutineKind};
use serde::Serialize;

/// Methods that run before an instance can be shared
pub const CONSTRUCTOR_METHODS: &[&str] = &[
    "__init__",
    "__new__",
    "__post_init__",
    "__init_subclass__",
    "__set_name__",
    "setUp",
    "setup_method",
];

/// Why an access cannot race
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confinement {
    /// Inside a constructor-like method
    Constructor,
    /// Class-body statement, executed once at import
    ClassBody,
    /// The unit never imports or uses threading primitives
    NoConcurrencyMarkers,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProtectionKind {
    LockHeld { lock: String },
    Atomic { idiom: String },
    ThreadConfined { reason: Confinement },
}

impl ProtectionKind {
    /// Classify one access. Lock protection wins over the other idioms.
    pub fn classify(
        routine: &Routine,
        lock: Option<&str>,
        access: &AttrAccess,
        concurrent_unit: bool,
    ) -> Option<Self> {
        if let Some(lock) = lock {
            return Some(ProtectionKind::LockHeld {
                lock: lock.to_string(),
            });
        }
        if let Some(idiom) = atomic_idiom(access) {
            return Some(ProtectionKind::Atomic { idiom });
        }
        confinement(routine, concurrent_unit).map(|reason| ProtectionKind::ThreadConfined { reason })
    }

    /// Whether this protection synchronizes against other threads, as
    /// opposed to only being unreachable from them
    pub fn is_synchronizing(&self) -> bool {
        !matches!(self, ProtectionKind::ThreadConfined { .. })
    }

    pub fn label(&self) -> String {
        match self {
            ProtectionKind::LockHeld { lock } => format!("lock:{}", lock),
            ProtectionKind::Atomic { idiom } => format!("atomic:{}", idiom),
            ProtectionKind::ThreadConfined { reason } => match reason {
                Confinement::Constructor => "confined:constructor".to_string(),
                Confinement::ClassBody => "confined:class_body".to_string(),
                Confinement::NoConcurrencyMarkers => "confined:single_threaded".to_string(),
            },
        }
    }
}

fn atomic_idiom(access: &AttrAccess) -> Option<String> {
    let method = access.via_method.as_deref()?;
    if ATOMIC_METHODS.contains(&method) {
        return Some(method.to_string());
    }
    access
        .thread_safe
        .as_ref()
        .map(|kind| format!("{}.{}", kind, method))
}

fn confinement(routine: &Routine, concurrent_unit: bool) -> Option<Confinement> {
    match routine.kind {
        RoutineKind::ClassBody => Some(Confinement::ClassBody),
        RoutineKind::Method if CONSTRUCTOR_METHODS.contains(&routine.short_name.as_str()) => {
            Some(Confinement::Constructor)
        }
        _ if !concurrent_unit => Some(Confinement::NoConcurrencyMarkers),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccessKind;

    fn routine(short: &str, kind: RoutineKind) -> Routine {
        Routine {
            name: format!("C.{}", short),
            short_name: short.to_string(),
            class: Some("C".to_string()),
            kind,
        }
    }

    fn write(via: Option<&str>, thread_safe: Option<&str>) -> AttrAccess {
        AttrAccess {
            attr: "x".to_string(),
            kind: AccessKind::Write,
            line: 1,
            read_modify_write: false,
            receiver: "self".to_string(),
            via_method: via.map(String::from),
            thread_safe: thread_safe.map(String::from),
        }
    }

    #[test]
    fn test_lock_takes_precedence() {
        let p = ProtectionKind::classify(
            &routine("__init__", RoutineKind::Method),
            Some("C._lock"),
            &write(None, None),
            true,
        );
        assert_eq!(
            p,
            Some(ProtectionKind::LockHeld {
                lock: "C._lock".to_string()
            })
        );
    }

    #[test]
    fn test_atomic_idioms() {
        let run = routine("run", RoutineKind::Method);
        let cas = ProtectionKind::classify(&run, None, &write(Some("compare_and_swap"), None), true);
        assert!(matches!(cas, Some(ProtectionKind::Atomic { .. })));

        let queue = ProtectionKind::classify(&run, None, &write(Some("put"), Some("Queue")), true);
        assert_eq!(queue.unwrap().label(), "atomic:Queue.put");

        // rebinding a thread-safe attribute is not atomic
        assert_eq!(
            ProtectionKind::classify(&run, None, &write(None, Some("Queue")), true),
            None
        );
    }

    #[test]
    fn test_confinement() {
        let init = ProtectionKind::classify(
            &routine("__init__", RoutineKind::Method),
            None,
            &write(None, None),
            true,
        );
        assert_eq!(
            init,
            Some(ProtectionKind::ThreadConfined {
                reason: Confinement::Constructor
            })
        );
        assert!(!init.unwrap().is_synchronizing());

        let closure = routine("__init__", RoutineKind::Closure);
        assert_eq!(ProtectionKind::classify(&closure, None, &write(None, None), true), None);

        let single = ProtectionKind::classify(
            &routine("run", RoutineKind::Method),
            None,
            &write(None, None),
            false,
        );
        assert_eq!(single.unwrap().label(), "confined:single_threaded");
    }
}
