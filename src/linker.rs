//! Resolves a main module's transitive `use` dependencies, compiles each
//! exactly once, and concatenates them (in dependency-first order) into one
//! flat bytecode image ready for the virtual machine.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::rc::Rc;

use crate::codegen::compile_module;
use crate::error::{Error, Result};
use crate::opcode::{Element, Instr};

struct LinkState {
    own_bytecode: HashMap<String, Vec<Element>>,
    ordered: Vec<String>,
    in_progress: HashSet<String>,
    processed_defs: Rc<RefCell<HashSet<String>>>,
}

/// Compiles `main_path` and links it with every module it (transitively)
/// `use`s, relative to `main_path`'s own directory. The result still
/// contains label markers; `vm::Vm::load` resolves them.
pub fn link_program(main_path: &Path) -> Result<Vec<Element>> {
    let main_module_name = main_path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::module(format!("invalid module path: {}", main_path.display())))?
        .to_string();
    let base_dir = main_path.parent().map(|p| p.to_path_buf()).unwrap_or_else(|| ".".into());

    let mut state = LinkState {
        own_bytecode: HashMap::new(),
        ordered: Vec::new(),
        in_progress: HashSet::new(),
        processed_defs: Rc::new(RefCell::new(HashSet::new())),
    };

    compile_recursive(&main_module_name, &base_dir, &mut state)?;

    let mut image: Vec<Element> = Vec::new();
    for module_name in &state.ordered {
        let code = state
            .own_bytecode
            .get(module_name)
            .expect("ordered module must have cached bytecode");
        let is_main = module_name == &main_module_name;
        if !is_main && ends_in_bare_halt(code) {
            image.extend(code[..code.len() - 1].iter().cloned());
        } else {
            image.extend(code.iter().cloned());
        }
    }

    if image.is_empty() || !ends_in_terminator(&image) {
        image.push(Element::Instr(Instr::Halt));
    }

    Ok(image)
}

fn compile_recursive(module_name: &str, base_dir: &Path, state: &mut LinkState) -> Result<()> {
    if state.own_bytecode.contains_key(module_name) {
        return Ok(());
    }
    if state.in_progress.contains(module_name) {
        return Ok(());
    }
    state.in_progress.insert(module_name.to_string());

    let path = base_dir.join(format!("{}.ns", module_name));
    let source = fs::read_to_string(&path).map_err(|e| {
        state.in_progress.remove(module_name);
        Error::module(format!("module file not found: {} ({})", path.display(), e))
    })?;

    let (code, deps) = compile_module(module_name, &source, base_dir, state.processed_defs.clone())
        .map_err(|e| {
            state.in_progress.remove(module_name);
            Error::module(format!("error compiling module '{}': {}", module_name, e))
        })?;

    for dep in &deps {
        compile_recursive(dep, base_dir, state)?;
    }

    if !state.own_bytecode.contains_key(module_name) {
        state.own_bytecode.insert(module_name.to_string(), code);
        if !state.ordered.iter().any(|m| m == module_name) {
            state.ordered.push(module_name.to_string());
        }
    }
    state.in_progress.remove(module_name);
    Ok(())
}

fn ends_in_bare_halt(code: &[Element]) -> bool {
    matches!(code.last(), Some(Element::Instr(Instr::Halt)))
}

fn ends_in_terminator(code: &[Element]) -> bool {
    code.iter().rev().find_map(|e| match e {
        Element::Instr(i) => Some(i.is_terminator()),
        Element::Label(_) => None,
    }).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(format!("{}.ns", name)), contents).unwrap();
    }

    #[test]
    fn links_single_module_and_appends_halt() {
        let dir = std::env::temp_dir().join(format!("ns_link_test_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        write(&dir, "main", "(print \"hi\")");
        let image = link_program(&dir.join("main.ns")).unwrap();
        assert!(matches!(image.last(), Some(Element::Instr(Instr::Halt))));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn links_transitive_dependency_before_main() {
        let dir = std::env::temp_dir().join(format!("ns_link_test2_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        write(&dir, "helper", "(fn double (x) (* x 2))");
        write(&dir, "main", "(use helper (double))\n(print (double 3))");
        let image = link_program(&dir.join("main.ns")).unwrap();
        // the helper's `fn double` must be emitted (and thus its MakeClosure
        // present) ahead of main's call, which this just sanity-checks by
        // confirming linking succeeds and produces a non-trivial image.
        assert!(image.len() > 2);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn circular_use_does_not_infinite_loop() {
        let dir = std::env::temp_dir().join(format!("ns_link_test3_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        write(&dir, "a", "(use b *)\n(fn from_a () 1)");
        write(&dir, "b", "(use a *)\n(fn from_b () 2)");
        write(&dir, "main", "(use a *)\n(use b *)\n(print (from_a))");
        let image = link_program(&dir.join("main.ns")).unwrap();
        assert!(!image.is_empty());
        fs::remove_dir_all(&dir).ok();
    }
}
