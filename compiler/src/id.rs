// id.rs — Parameter identity and process-unique names
//
// Every parameter object gets an identity token when it is created. Names
// that the caller does not supply are synthesized from a prefix character
// plus a counter; explicitly supplied names can be reserved so that no
// synthesized name ever collides with them.
//
// Preconditions: none.
// Postconditions: `unique_name` never returns a name returned before or
//   reserved before, within one process.
// Failure modes: none.
// Side effects: mutates the process-wide name table.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

/// Identity token for a parameter object. Copies of a handle share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(pub u32);

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

static NEXT_PARAM: AtomicU32 = AtomicU32::new(0);

/// Allocate a fresh parameter identity.
pub fn alloc_param_id() -> ParamId {
    ParamId(NEXT_PARAM.fetch_add(1, Ordering::Relaxed))
}

// ── Name table ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct NameTable {
    counters: HashMap<char, u32>,
    used: HashSet<String>,
}

fn names() -> &'static Mutex<NameTable> {
    static NAMES: OnceLock<Mutex<NameTable>> = OnceLock::new();
    NAMES.get_or_init(|| Mutex::new(NameTable::default()))
}

/// Produce a fresh name of the form `{prefix}{n}` that was neither produced
/// nor reserved before.
pub fn unique_name(prefix: char) -> String {
    let mut table = names().lock().unwrap_or_else(PoisonError::into_inner);
    loop {
        let counter = table.counters.entry(prefix).or_insert(0);
        let candidate = format!("{}{}", prefix, *counter);
        *counter += 1;
        if table.used.insert(candidate.clone()) {
            return candidate;
        }
    }
}

/// Mark `name` as taken so future synthesized names avoid it.
/// Returns false if it was already taken.
pub fn reserve_name(name: &str) -> bool {
    let mut table = names().lock().unwrap_or_else(PoisonError::into_inner);
    table.used.insert(name.to_string())
}

/// Synthesize the name of an unnamed entity. `kind` is only used for
/// tracing (e.g. `"Param"`, `"ImageParam"`).
pub fn make_entity_name(id: ParamId, kind: &str, prefix: char) -> String {
    let name = unique_name(prefix);
    tracing::trace!(%id, kind, name = %name, "synthesized entity name");
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let a = alloc_param_id();
        let b = alloc_param_id();
        assert!(b > a);
    }

    #[test]
    fn unique_names_do_not_repeat() {
        let a = unique_name('q');
        let b = unique_name('q');
        assert_ne!(a, b);
        assert!(a.starts_with('q'));
    }

    #[test]
    fn reserved_names_are_skipped() {
        // Reserve the next few candidates for a private prefix, then check
        // the generator steps over them.
        for n in 0..3 {
            reserve_name(&format!("z{n}"));
        }
        let name = unique_name('z');
        assert!(!["z0", "z1", "z2"].contains(&name.as_str()), "got {name}");
    }

    #[test]
    fn reserving_twice_reports_collision() {
        assert!(reserve_name("explicit_name_for_id_test"));
        assert!(!reserve_name("explicit_name_for_id_test"));
    }
}
