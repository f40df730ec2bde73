//! Global string interning. A symbol is a table index, so comparing two
//! symbols never touches string contents, and interned text is leaked once
//! so a symbol can hand out `&'static str` for the rest of the process.

use std::sync::Mutex;

use hashbrown::HashMap;
use once_cell::sync::Lazy;

#[derive(Default)]
struct SymbolTable {
    strings: Vec<&'static str>,
    ids: HashMap<&'static str, u32>,
}

static SYMBOLS: Lazy<Mutex<SymbolTable>> = Lazy::new(Default::default);

/// Handle to a string in the global symbol table
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InternedSymbol(u32);

impl InternedSymbol {
    pub fn new(string: &str) -> Self {
        let mut table = SYMBOLS.lock().unwrap();

        if let Some(&id) = table.ids.get(string) {
            return Self(id);
        }

        let leaked: &'static str = Box::leak(string.to_owned().into_boxed_str());
        let id = table.strings.len() as u32;
        table.strings.push(leaked);
        table.ids.insert(leaked, id);
        Self(id)
    }

    pub fn value(self) -> &'static str {
        SYMBOLS.lock().unwrap().strings[self.0 as usize]
    }
}

impl core::fmt::Debug for InternedSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sym({:?})", self.value())
    }
}

impl core::fmt::Display for InternedSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let a = InternedSymbol::new("while_cond");
        let b = InternedSymbol::new("while_cond");
        let c = InternedSymbol::new("while_body");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.value(), "while_cond");
    }
}
