//! Translates a parsed `Program` into a flat stream of `Element`s (either
//! real instructions or label markers), plus the set of modules directly
//! and transitively referenced via `use`.
//!
//! One `Compiler` instance compiles one module. `use` resolution spins up a
//! nested `Compiler` sharing the same `processed` guard set so that import
//! cycles terminate (a module already being summarized is skipped, not
//! re-summarized) -- mirroring how the linker (see `linker.rs`) breaks
//! cycles at the whole-module level with its own `in_progress` stack.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::ast::{Datum, Expr, Item, Number, Program, UseItems};
use crate::error::{Error, Result};
use crate::lexer::lex;
use crate::opcode::{Element, Instr};
use crate::parser::parse;
use crate::value::Value;

#[derive(Debug, Clone)]
pub enum GlobalDescriptor {
    Static,
    Function { label: String, params: Vec<String> },
    StructType { fields: Vec<String> },
}

type Processed = Rc<RefCell<HashSet<String>>>;

pub struct Compiler {
    module_name: String,
    base_dir: PathBuf,
    label_count: usize,
    scope_depth: usize,
    code: Vec<Element>,
    pub global_env: HashMap<String, GlobalDescriptor>,
    pub struct_definitions: HashMap<String, Vec<String>>,
    pub discovered_dependencies: HashSet<String>,
    processed: Processed,
}

const PRIMITIVE_UNARY: &[(&str, fn() -> Instr)] = &[
    ("not", || Instr::Not),
    ("is_nil", || Instr::IsNil),
    ("first", || Instr::First),
    ("rest", || Instr::Rest),
    ("is_boolean", || Instr::IsBoolean),
    ("is_number", || Instr::IsNumber),
    ("is_string", || Instr::IsString),
    ("is_list", || Instr::IsList),
    ("is_struct", || Instr::IsStruct),
    ("is_function", || Instr::IsFunction),
];

const PRIMITIVE_BINARY: &[(&str, fn() -> Instr)] = &[
    ("+", || Instr::Add),
    ("-", || Instr::Sub),
    ("*", || Instr::Mul),
    ("/", || Instr::Div),
    ("=", || Instr::Eq),
    (">", || Instr::Gt),
    ("<", || Instr::Lt),
];

impl Compiler {
    pub fn new(module_name: impl Into<String>, base_dir: PathBuf, processed: Processed) -> Compiler {
        Compiler {
            module_name: module_name.into(),
            base_dir,
            label_count: 0,
            scope_depth: 0,
            code: Vec::new(),
            global_env: HashMap::new(),
            struct_definitions: HashMap::new(),
            discovered_dependencies: HashSet::new(),
            processed,
        }
    }

    pub fn into_code(self) -> Vec<Element> {
        self.code
    }

    fn new_label(&mut self, prefix: &str) -> String {
        self.label_count += 1;
        format!("{}_{}{}", sanitize(&self.module_name), prefix, self.label_count)
    }

    fn emit(&mut self, instr: Instr) {
        self.code.push(Element::Instr(instr));
    }

    fn emit_label(&mut self, label: String) {
        self.code.push(Element::Label(label));
    }

    fn enter_scope(&mut self) {
        self.scope_depth += 1;
    }

    fn exit_scope(&mut self) {
        if self.scope_depth > 0 {
            self.scope_depth -= 1;
        } else {
            log::warn!("attempted to pop the global scope in module '{}'", self.module_name);
        }
    }

    fn last_instr_suppresses_pop(&self) -> bool {
        matches!(self.code.last(), Some(Element::Instr(i)) if i.suppresses_top_level_pop())
    }

    pub fn generate_program(&mut self, program: &Program) -> Result<()> {
        let uses: Vec<&Item> = program
            .items
            .iter()
            .filter(|i| matches!(i, Item::Use { .. }))
            .collect();
        let rest: Vec<&Item> = program
            .items
            .iter()
            .filter(|i| !matches!(i, Item::Use { .. }))
            .collect();

        for item in uses {
            self.generate_use(item)?;
        }

        let last_idx = rest.len().checked_sub(1);
        for (idx, item) in rest.into_iter().enumerate() {
            let is_last = Some(idx) == last_idx;
            self.generate_top_level(item, is_last)?;
        }
        Ok(())
    }

    fn generate_top_level(&mut self, item: &Item, is_last: bool) -> Result<()> {
        match item {
            Item::Static { name, value } => {
                self.generate_expr(value)?;
                self.emit(Instr::Store(name.clone()));
                self.global_env.insert(name.clone(), GlobalDescriptor::Static);
            }
            Item::Fn { name, params, body } => {
                self.generate_fn_or_lambda(Some(name.clone()), params, body)?;
            }
            Item::StructDef { name, fields } => {
                self.generate_struct_def(name, fields)?;
            }
            Item::Use { .. } => unreachable!("use items are processed separately"),
            Item::Expr(expr) => {
                self.generate_expr(expr)?;
                if !is_last && !self.last_instr_suppresses_pop() {
                    self.emit(Instr::Pop);
                }
            }
        }
        Ok(())
    }

    fn generate_struct_def(&mut self, name: &str, fields: &[String]) -> Result<()> {
        if let Some(existing) = self.struct_definitions.get(name) {
            if existing != fields {
                return Err(Error::codegen(format!(
                    "struct '{}' already defined with different fields",
                    name
                )));
            }
        }
        self.struct_definitions.insert(name.to_string(), fields.to_vec());
        self.global_env.insert(
            name.to_string(),
            GlobalDescriptor::StructType { fields: fields.to_vec() },
        );
        Ok(())
    }

    fn generate_fn_or_lambda(
        &mut self,
        name: Option<String>,
        params: &[String],
        body: &[Expr],
    ) -> Result<()> {
        let label_prefix = match &name {
            Some(n) => format!("fn_{}_", n),
            None => "lambda_".to_string(),
        };
        let entry_label = self.new_label(&label_prefix);

        self.emit(Instr::MakeClosure(entry_label.clone()));
        if let Some(n) = &name {
            self.emit(Instr::Store(n.clone()));
            self.global_env.insert(
                n.clone(),
                GlobalDescriptor::Function { label: entry_label.clone(), params: params.to_vec() },
            );
        }

        let end_label = self.new_label(&format!("end_{}", label_prefix));
        self.emit(Instr::Jump(end_label.clone()));
        self.emit_label(entry_label);
        self.enter_scope();
        for param in params.iter().rev() {
            self.emit(Instr::Store(param.clone()));
        }
        self.generate_body(body)?;
        self.emit(Instr::Return);
        self.exit_scope();
        self.emit_label(end_label);
        Ok(())
    }

    /// Unconditional except-last POP, used for `let`/`fn`/`lambda`/`begin`
    /// bodies (as opposed to the conditional POP used between top-level
    /// forms).
    fn generate_body(&mut self, body: &[Expr]) -> Result<()> {
        if body.is_empty() {
            self.emit(Instr::Push(Value::Nil));
            return Ok(());
        }
        let last = body.len() - 1;
        for (i, expr) in body.iter().enumerate() {
            self.generate_expr(expr)?;
            if i != last {
                self.emit(Instr::Pop);
            }
        }
        Ok(())
    }

    fn generate_expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Number(Number::Int(n)) => self.emit(Instr::Push(Value::Int(*n))),
            Expr::Number(Number::Float(x)) => self.emit(Instr::Push(Value::Float(*x))),
            Expr::Str(s) => self.emit(Instr::Push(Value::str(s.clone()))),
            Expr::Boolean(b) => self.emit(Instr::Push(Value::Bool(*b))),
            Expr::Nil => self.emit(Instr::Push(Value::Nil)),
            Expr::Symbol(name) => self.emit(Instr::Load(name.clone())),
            Expr::Quote(datum) => self.generate_quoted(datum),
            Expr::If { cond, then, els } => {
                let else_label = self.new_label("else");
                let end_label = self.new_label("end_if");
                self.generate_expr(cond)?;
                self.emit(Instr::JumpIfFalse(else_label.clone()));
                self.generate_expr(then)?;
                self.emit(Instr::Jump(end_label.clone()));
                self.emit_label(else_label);
                self.generate_expr(els)?;
                self.emit_label(end_label);
            }
            Expr::Let { bindings, body } => {
                self.enter_scope();
                for (name, value) in bindings {
                    self.generate_expr(value)?;
                    self.emit(Instr::Store(name.clone()));
                }
                self.generate_body(body)?;
                self.exit_scope();
            }
            Expr::Lambda { params, body } => {
                self.generate_fn_or_lambda(None, params, body)?;
            }
            Expr::Get { instance, field } => {
                self.generate_expr(instance)?;
                self.emit(Instr::GetField(field.clone()));
            }
            Expr::Set { instance, field, value } => {
                self.generate_expr(instance)?;
                self.generate_expr(value)?;
                self.emit(Instr::SetField(field.clone()));
            }
            Expr::While { cond, body } => {
                let start_label = self.new_label("while_start");
                let end_label = self.new_label("while_end");
                self.emit_label(start_label.clone());
                self.generate_expr(cond)?;
                self.emit(Instr::JumpIfFalse(end_label.clone()));
                for expr in body {
                    self.generate_expr(expr)?;
                    self.emit(Instr::Pop);
                }
                self.emit(Instr::Jump(start_label));
                self.emit_label(end_label);
                self.emit(Instr::Push(Value::Nil));
            }
            Expr::Begin(exprs) => self.generate_body(exprs)?,
            Expr::Call { callee, args } => self.generate_call(callee, args)?,
        }
        Ok(())
    }

    fn generate_quoted(&mut self, datum: &Datum) {
        match datum {
            Datum::Symbol(s) => self.emit(Instr::Push(Value::symbol(s.clone()))),
            Datum::List(items) => {
                for item in items {
                    self.generate_quoted(item);
                }
                self.emit(Instr::MakeList(items.len()));
            }
            Datum::Number(Number::Int(n)) => self.emit(Instr::Push(Value::Int(*n))),
            Datum::Number(Number::Float(x)) => self.emit(Instr::Push(Value::Float(*x))),
            Datum::Str(s) => self.emit(Instr::Push(Value::str(s.clone()))),
            Datum::Boolean(b) => self.emit(Instr::Push(Value::Bool(*b))),
            Datum::Nil => self.emit(Instr::Push(Value::Nil)),
        }
    }

    fn generate_call(&mut self, callee: &Expr, args: &[Expr]) -> Result<()> {
        if let Expr::Symbol(op_name) = callee {
            if op_name == "print" {
                if args.is_empty() {
                    self.emit(Instr::Push(Value::str(String::new())));
                    self.emit(Instr::Print);
                } else {
                    for arg in args {
                        self.generate_expr(arg)?;
                        self.emit(Instr::Print);
                    }
                }
                self.emit(Instr::Push(Value::Nil));
                return Ok(());
            }
            if op_name == "list" {
                for arg in args {
                    self.generate_expr(arg)?;
                }
                self.emit(Instr::MakeList(args.len()));
                return Ok(());
            }
            if op_name == "cons" {
                if args.len() != 2 {
                    return Err(Error::codegen(format!(
                        "primitive 'cons' expects 2 args, got {}",
                        args.len()
                    )));
                }
                self.generate_expr(&args[1])?;
                self.generate_expr(&args[0])?;
                self.emit(Instr::Cons);
                return Ok(());
            }
            if let Some((_, make)) = PRIMITIVE_BINARY.iter().find(|(n, _)| n == op_name) {
                if args.len() != 2 {
                    return Err(Error::codegen(format!(
                        "primitive '{}' expects 2 args, got {}",
                        op_name,
                        args.len()
                    )));
                }
                self.generate_expr(&args[0])?;
                self.generate_expr(&args[1])?;
                self.emit(make());
                return Ok(());
            }
            if let Some((_, make)) = PRIMITIVE_UNARY.iter().find(|(n, _)| n == op_name) {
                if args.len() != 1 {
                    return Err(Error::codegen(format!(
                        "primitive '{}' expects 1 arg, got {}",
                        op_name,
                        args.len()
                    )));
                }
                self.generate_expr(&args[0])?;
                self.emit(make());
                return Ok(());
            }
            if let Some(fields) = self.struct_definitions.get(op_name).cloned() {
                return self.generate_struct_construction(op_name, &fields, args);
            }
            if let Some(GlobalDescriptor::StructType { fields }) = self.global_env.get(op_name).cloned() {
                return self.generate_struct_construction(op_name, &fields, args);
            }
        }

        for arg in args {
            self.generate_expr(arg)?;
        }
        self.generate_expr(callee)?;
        self.emit(Instr::Call(args.len()));
        Ok(())
    }

    fn generate_struct_construction(
        &mut self,
        struct_name: &str,
        fields: &[String],
        args: &[Expr],
    ) -> Result<()> {
        if args.len() != fields.len() {
            return Err(Error::codegen(format!(
                "struct '{}': expected {} args, got {}",
                struct_name,
                fields.len(),
                args.len()
            )));
        }
        for arg in args {
            self.generate_expr(arg)?;
        }
        self.emit(Instr::MakeStruct(struct_name.to_string(), fields.to_vec()));
        Ok(())
    }

    fn generate_use(&mut self, item: &Item) -> Result<()> {
        let (module, items) = match item {
            Item::Use { module, items } => (module, items),
            _ => unreachable!(),
        };

        self.discovered_dependencies.insert(module.clone());
        if self.processed.borrow().contains(module) {
            return Ok(());
        }
        self.processed.borrow_mut().insert(module.clone());

        let path = self.base_dir.join(format!("{}.ns", module));
        let source = fs::read_to_string(&path).map_err(|e| {
            Error::module(format!("could not read module file {}: {}", path.display(), e))
        })?;
        let tokens = lex(&source).map_err(|e| {
            Error::module(format!("error compiling used module '{}' for definitions: {}", module, e))
        })?;
        let dep_ast = parse(tokens).map_err(|e| {
            Error::module(format!("error compiling used module '{}' for definitions: {}", module, e))
        })?;

        let mut dep_compiler = Compiler::new(module.clone(), self.base_dir.clone(), self.processed.clone());
        dep_compiler.generate_program(&dep_ast)?;
        for dep in &dep_compiler.discovered_dependencies {
            self.discovered_dependencies.insert(dep.clone());
        }

        let names: Vec<String> = match items {
            UseItems::All => {
                let mut all: HashSet<String> = dep_compiler.global_env.keys().cloned().collect();
                all.extend(dep_compiler.struct_definitions.keys().cloned());
                all.into_iter().collect()
            }
            UseItems::Named(names) => names.clone(),
        };

        let import_all = matches!(items, UseItems::All);
        for name in names {
            let mut imported = false;
            if let Some(descriptor) = dep_compiler.global_env.get(&name) {
                self.global_env.insert(name.clone(), descriptor.clone());
                imported = true;
            }
            if let Some(fields) = dep_compiler.struct_definitions.get(&name) {
                self.struct_definitions.insert(name.clone(), fields.clone());
                self.global_env
                    .entry(name.clone())
                    .or_insert_with(|| GlobalDescriptor::StructType { fields: fields.clone() });
                imported = true;
            }
            if !imported && !import_all {
                println!("Warning: Item '{}' in '(use {} ...)' not found in module '{}'.", name, module, module);
            }
        }

        Ok(())
    }
}

fn sanitize(module_name: &str) -> String {
    module_name.replace(['.', '/', '\\'], "_")
}

/// Compiles a single module's source into its raw `Element` stream plus the
/// set of modules it (transitively) depends on via `use`.
pub fn compile_module(
    module_name: &str,
    source: &str,
    base_dir: &Path,
    processed: Processed,
) -> Result<(Vec<Element>, HashSet<String>)> {
    let tokens = lex(source)?;
    let program = parse(tokens)?;
    let mut compiler = Compiler::new(module_name, base_dir.to_path_buf(), processed);
    compiler.generate_program(&program)?;
    let deps = compiler.discovered_dependencies.clone();
    Ok((compiler.into_code(), deps))
}
