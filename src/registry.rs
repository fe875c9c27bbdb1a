use std::collections::HashMap;
use std::fmt;

/// Host callback reachable through `&name args...`.
///
/// Receives the whole tape and the literal arguments parsed from the program.
/// Nothing is handed back to the interpreter; effects are visible through the
/// tape only. An `Err` aborts the run.
pub type ExternalFunction = Box<dyn Fn(&mut [u8], &[u64]) -> anyhow::Result<()>>;

/// Name to callback map consulted by `&`. Filled in by the host before a run
/// and only read while the interpreter executes.
#[derive(Default)]
pub struct Registry {
    functions: HashMap<String, ExternalFunction>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `function` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, function: F) -> &mut Self
    where
        F: Fn(&mut [u8], &[u64]) -> anyhow::Result<()> + 'static,
    {
        self.functions.insert(name.into(), Box::new(function));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ExternalFunction> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("Registry").field("functions", &names).finish()
    }
}

#[test]
fn test_register_and_call() -> anyhow::Result<()> {
    let mut registry = Registry::new();
    registry.register("poke", |tape: &mut [u8], args: &[u64]| {
        tape[0] = args.len() as u8;
        Ok(())
    });
    assert!(registry.contains("poke"));
    assert!(!registry.contains("peek"));

    let mut tape = [0u8; 4];
    let poke = registry.get("poke").expect("poke must be registered");
    poke(&mut tape[..], &[1, 2, 3])?;
    assert_eq!(tape, [3, 0, 0, 0]);
    Ok(())
}

#[test]
fn test_register_replaces() -> anyhow::Result<()> {
    let mut registry = Registry::new();
    registry
        .register("f", |tape: &mut [u8], _: &[u64]| {
            tape[0] = 1;
            Ok(())
        })
        .register("f", |tape: &mut [u8], _: &[u64]| {
            tape[0] = 2;
            Ok(())
        });
    assert_eq!(registry.len(), 1);

    let mut tape = [0u8; 1];
    registry.get("f").expect("f must be registered")(&mut tape[..], &[])?;
    assert_eq!(tape, [2]);
    Ok(())
}
