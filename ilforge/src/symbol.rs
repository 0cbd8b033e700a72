use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, Ordering as AtomicOrdering},
    },
};

use parking_lot::RwLock;
use rustc_hash::FxHashSet;

/// A variable, label or local name.
///
/// Interned symbols compare by their text. Generated symbols compare only by
/// the counter value they were allocated with; the hint is for diagnostics.
#[derive(Clone)]
pub enum Symbol {
    Interned(Arc<str>),
    Generated { id: u64, hint: Option<Arc<str>> },
}

impl Symbol {
    pub fn new(name: &str) -> Self {
        Symbol::Interned(interner().intern(name))
    }

    pub fn is_generated(&self) -> bool {
        matches!(self, Symbol::Generated { .. })
    }

    /// The textual name, or the hint for a generated symbol.
    pub fn name(&self) -> Option<&str> {
        match self {
            Symbol::Interned(name) => Some(name),
            Symbol::Generated { hint, .. } => hint.as_deref(),
        }
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol::new(name)
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Symbol::Interned(a), Symbol::Interned(b)) => a == b,
            (Symbol::Generated { id: a, .. }, Symbol::Generated { id: b, .. }) => {
                a == b
            }
            _ => false,
        }
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Symbol::Interned(name) => {
                state.write_u8(0);
                name.hash(state);
            }
            Symbol::Generated { id, .. } => {
                state.write_u8(1);
                id.hash(state);
            }
        }
    }
}

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Symbol {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Symbol::Interned(a), Symbol::Interned(b)) => a.cmp(b),
            (Symbol::Interned(_), Symbol::Generated { .. }) => Ordering::Less,
            (Symbol::Generated { .. }, Symbol::Interned(_)) => Ordering::Greater,
            (Symbol::Generated { id: a, .. }, Symbol::Generated { id: b, .. }) => {
                a.cmp(b)
            }
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Interned(name) => write!(f, "{name}"),
            Symbol::Generated { id, hint: Some(hint) } => write!(f, "{hint}#{id}"),
            Symbol::Generated { id, hint: None } => write!(f, "#{id}"),
        }
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Interned(name) => write!(f, "'{name}"),
            _ => write!(f, "{self}"),
        }
    }
}

// ── Interning ───────────────────────────────────────────────────────

struct Interner {
    names: RwLock<FxHashSet<Arc<str>>>,
}

impl Interner {
    fn intern(&self, name: &str) -> Arc<str> {
        if let Some(existing) = self.names.read().get(name) {
            return Arc::clone(existing);
        }
        let mut names = self.names.write();
        if let Some(existing) = names.get(name) {
            return Arc::clone(existing);
        }
        let interned: Arc<str> = Arc::from(name);
        names.insert(Arc::clone(&interned));
        interned
    }
}

fn interner() -> &'static Interner {
    static INTERNER: OnceLock<Interner> = OnceLock::new();
    INTERNER.get_or_init(|| Interner {
        names: RwLock::new(FxHashSet::default()),
    })
}

// ── Generated symbols ───────────────────────────────────────────────

/// Process-wide counter behind [`SymbolGenerator::global`]. Never reset.
static GLOBAL_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Clone)]
enum Counter {
    Global,
    Isolated(Arc<AtomicU64>),
}

/// Allocates generated symbols.
///
/// The global generator shares one atomic counter for the whole process, so
/// trees built on different threads never hand out the same symbol. An
/// isolated generator owns its counter and is only unique within itself.
#[derive(Clone)]
pub struct SymbolGenerator {
    counter: Counter,
}

impl SymbolGenerator {
    pub fn global() -> Self {
        Self {
            counter: Counter::Global,
        }
    }

    pub fn isolated() -> Self {
        Self {
            counter: Counter::Isolated(Arc::new(AtomicU64::new(0))),
        }
    }

    fn next_id(&self) -> u64 {
        match &self.counter {
            Counter::Global => GLOBAL_COUNTER.fetch_add(1, AtomicOrdering::Relaxed),
            Counter::Isolated(counter) => {
                counter.fetch_add(1, AtomicOrdering::Relaxed)
            }
        }
    }

    pub fn fresh(&self) -> Symbol {
        Symbol::Generated {
            id: self.next_id(),
            hint: None,
        }
    }

    pub fn fresh_named(&self, hint: &str) -> Symbol {
        Symbol::Generated {
            id: self.next_id(),
            hint: Some(interner().intern(hint)),
        }
    }
}

impl Default for SymbolGenerator {
    fn default() -> Self {
        Self::global()
    }
}

impl fmt::Debug for SymbolGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.counter {
            Counter::Global => write!(f, "SymbolGenerator(global)"),
            Counter::Isolated(counter) => write!(
                f,
                "SymbolGenerator(isolated @ {})",
                counter.load(AtomicOrdering::Relaxed)
            ),
        }
    }
}
