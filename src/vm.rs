//! The stack-based virtual machine. Executes a linked `Vec<Element>` image:
//! an operand stack, a call stack of `(return_ip, saved_env_chain)` frames,
//! and a chain of name-keyed lexical frames searched innermost-first.

use std::rc::Rc;

use crate::error::{Error, Result};
use crate::opcode::{Element, Instr};
use crate::value::{new_frame, Closure, EnvChain, StructInstance, Value};

pub struct Vm {
    code: Vec<Instr>,
    labels: std::collections::HashMap<String, usize>,
    operand_stack: Vec<Value>,
    call_stack: Vec<(usize, EnvChain)>,
    env_chain: EnvChain,
    ip: usize,
    /// Every value a `PRINT` instruction has rendered, in order -- kept
    /// alongside the `println!` to stdout so embedders and tests can
    /// inspect program output without capturing the process's stdout.
    prints: Vec<String>,
}

impl Vm {
    /// Resolves label markers against the instruction stream that remains
    /// after they are stripped, mirroring the reference VM's two-pass
    /// `_find_labels` / `effective_code` split. Duplicate labels are a
    /// load-time error.
    pub fn load(elements: Vec<Element>) -> Result<Vm> {
        let mut labels = std::collections::HashMap::new();
        let mut code = Vec::with_capacity(elements.len());
        for el in elements {
            match el {
                Element::Label(name) => {
                    if labels.contains_key(&name) {
                        return Err(Error::load(format!("duplicate label found: {}", name)));
                    }
                    labels.insert(name, code.len());
                }
                Element::Instr(instr) => code.push(instr),
            }
        }
        Ok(Vm {
            code,
            labels,
            operand_stack: Vec::new(),
            call_stack: Vec::new(),
            env_chain: vec![new_frame()],
            ip: 0,
            prints: Vec::new(),
        })
    }

    /// Values rendered by `PRINT` so far, in order.
    pub fn prints(&self) -> &[String] {
        &self.prints
    }

    fn resolve_label(&self, label: &str) -> Result<usize> {
        self.labels
            .get(label)
            .copied()
            .ok_or_else(|| Error::load(format!("undefined label referenced: {}", label)))
    }

    /// Runs to completion. Never propagates a runtime error out of this
    /// call: a runtime error is logged and execution halts cleanly,
    /// matching the reference VM's `run()`, which always returns normally
    /// (the final top-of-stack value, or nothing).
    pub fn run(&mut self) -> Option<Value> {
        let code_len = self.code.len();
        while self.ip < code_len {
            let ip_for_error = self.ip;
            let instr = self.code[self.ip].clone();
            self.ip += 1;

            match self.step(&instr) {
                Ok(StepResult::Continue) => {}
                Ok(StepResult::Halt) => {
                    self.ip = code_len;
                    break;
                }
                Err(kind_and_message) => {
                    let (kind, message) = kind_and_message;
                    let stack_snapshot: Vec<String> =
                        self.operand_stack.iter().rev().map(|v| v.to_string()).collect();
                    let err = Error::runtime(kind, message, ip_for_error, instr.mnemonic(), stack_snapshot);
                    log::error!("{}", err);
                    eprintln!("{}", err);
                    self.ip = code_len;
                    break;
                }
            }
        }
        self.operand_stack.last().cloned()
    }

    fn store(&mut self, name: &str, value: Value) {
        self.env_chain
            .last()
            .expect("environment chain is never empty")
            .borrow_mut()
            .insert(name.to_string(), value);
    }

    fn load_var(&self, name: &str) -> Option<Value> {
        for frame in self.env_chain.iter().rev() {
            if let Some(v) = frame.borrow().get(name) {
                return Some(v.clone());
            }
        }
        None
    }

    fn pop(&mut self) -> std::result::Result<Value, (String, String)> {
        self.operand_stack
            .pop()
            .ok_or_else(|| ("StackUnderflow".to_string(), "operand stack is empty".to_string()))
    }

    fn step(&mut self, instr: &Instr) -> std::result::Result<StepResult, (String, String)> {
        match instr {
            Instr::Push(v) => self.operand_stack.push(v.clone()),
            Instr::Pop => {
                self.pop()?;
            }
            Instr::Add | Instr::Sub | Instr::Mul | Instr::Div => {
                let right = self.pop()?;
                let left = self.pop()?;
                self.operand_stack.push(arith(instr, left, right)?);
            }
            Instr::Eq => {
                let right = self.pop()?;
                let left = self.pop()?;
                self.operand_stack.push(Value::Bool(left.value_eq(&right)));
            }
            Instr::Lt | Instr::Gt => {
                let right = self.pop()?;
                let left = self.pop()?;
                self.operand_stack.push(compare(instr, &left, &right)?);
            }
            Instr::Not => {
                let v = self.pop()?;
                self.operand_stack.push(Value::Bool(!v.is_truthy()));
            }
            Instr::Load(name) => {
                let v = self.load_var(name).ok_or_else(|| {
                    ("NameError".to_string(), format!("variable '{}' not defined", name))
                })?;
                self.operand_stack.push(v);
            }
            Instr::Store(name) => {
                let v = self.pop()?;
                self.store(name, v);
            }
            Instr::Jump(label) => {
                self.ip = self
                    .resolve_label(label)
                    .map_err(|e| ("LoadError".to_string(), e.to_string()))?;
            }
            Instr::JumpIfFalse(label) => {
                let v = self.pop()?;
                if !v.is_truthy() {
                    self.ip = self
                        .resolve_label(label)
                        .map_err(|e| ("LoadError".to_string(), e.to_string()))?;
                }
            }
            Instr::MakeClosure(label) => {
                self.operand_stack.push(Value::Closure(Rc::new(Closure {
                    label: label.clone(),
                    env: self.env_chain.clone(),
                })));
            }
            Instr::Call(argc) => self.call(*argc)?,
            Instr::Return => {
                match self.call_stack.pop() {
                    Some((ret_ip, saved_env)) => {
                        self.ip = ret_ip;
                        self.env_chain = saved_env;
                    }
                    None => {
                        log::warn!("RETURN from top level");
                        println!("Warning: RETURN from top level.");
                        return Ok(StepResult::Halt);
                    }
                }
            }
            Instr::MakeStruct(name, fields) => self.make_struct(name, fields)?,
            Instr::GetField(field) => self.get_field(field)?,
            Instr::SetField(field) => self.set_field(field)?,
            Instr::Halt => {
                println!("Execution halted.");
                return Ok(StepResult::Halt);
            }
            Instr::Print => {
                let v = self.pop()?;
                println!("Output: {}", v);
                self.prints.push(v.to_string());
            }
            Instr::IsNil => {
                let v = self.pop()?;
                self.operand_stack.push(Value::Bool(matches!(v, Value::Nil)));
            }
            Instr::Cons => self.cons()?,
            Instr::First => self.first()?,
            Instr::Rest => self.rest()?,
            Instr::MakeList(n) => self.make_list(*n)?,
            Instr::IsBoolean => {
                let v = self.pop()?;
                self.operand_stack.push(Value::Bool(matches!(v, Value::Bool(_))));
            }
            Instr::IsNumber => {
                let v = self.pop()?;
                self.operand_stack
                    .push(Value::Bool(matches!(v, Value::Int(_) | Value::Float(_))));
            }
            Instr::IsString => {
                let v = self.pop()?;
                self.operand_stack.push(Value::Bool(matches!(v, Value::Str(_))));
            }
            Instr::IsList => {
                let v = self.pop()?;
                self.operand_stack
                    .push(Value::Bool(matches!(v, Value::List(_) | Value::Nil)));
            }
            Instr::IsStruct => {
                let v = self.pop()?;
                self.operand_stack.push(Value::Bool(matches!(v, Value::Struct(_))));
            }
            Instr::IsFunction => {
                let v = self.pop()?;
                self.operand_stack.push(Value::Bool(matches!(v, Value::Closure(_))));
            }
        }
        Ok(StepResult::Continue)
    }

    fn call(&mut self, argc: usize) -> std::result::Result<(), (String, String)> {
        if self.operand_stack.len() < argc + 1 {
            return Err(("StackUnderflow".to_string(), "CALL stack underflow".to_string()));
        }
        let callee = self.pop()?;
        let closure = match callee {
            Value::Closure(c) => c,
            other => {
                let type_name = other.type_name();
                self.operand_stack.push(other);
                return Err((
                    "TypeMismatch".to_string(),
                    format!("CALL expects a function, got {}", type_name),
                ));
            }
        };
        self.call_stack.push((self.ip, self.env_chain.clone()));
        let mut new_env = closure.env.clone();
        new_env.push(new_frame());
        self.env_chain = new_env;
        self.ip = self
            .resolve_label(&closure.label)
            .map_err(|e| ("LoadError".to_string(), e.to_string()))?;
        Ok(())
    }

    fn make_struct(&mut self, name: &str, fields: &[String]) -> std::result::Result<(), (String, String)> {
        if self.operand_stack.len() < fields.len() {
            return Err((
                "StackUnderflow".to_string(),
                format!("MAKE_STRUCT '{}' needs {} values", name, fields.len()),
            ));
        }
        let mut values: Vec<Value> = (0..fields.len()).map(|_| self.operand_stack.pop().unwrap()).collect();
        values.reverse();
        let instance = StructInstance {
            type_name: name.to_string(),
            fields: fields.iter().cloned().zip(values).collect(),
        };
        self.operand_stack
            .push(Value::Struct(Rc::new(std::cell::RefCell::new(instance))));
        Ok(())
    }

    fn get_field(&mut self, field: &str) -> std::result::Result<(), (String, String)> {
        let instance = self.pop()?;
        let s = match &instance {
            Value::Struct(s) => s.clone(),
            other => {
                let type_name = other.type_name();
                self.operand_stack.push(instance);
                return Err((
                    "TypeMismatch".to_string(),
                    format!("GET_FIELD expects a struct, got {}", type_name),
                ));
            }
        };
        let value = {
            let borrowed = s.borrow();
            borrowed.get(field).cloned()
        };
        match value {
            Some(v) => {
                self.operand_stack.push(v);
                Ok(())
            }
            None => {
                let type_name = s.borrow().type_name.clone();
                self.operand_stack.push(instance);
                Err(("AttributeError".to_string(), format!("struct {} has no field '{}'", type_name, field)))
            }
        }
    }

    fn set_field(&mut self, field: &str) -> std::result::Result<(), (String, String)> {
        let new_value = self.pop()?;
        let instance = self.pop()?;
        let s = match &instance {
            Value::Struct(s) => s.clone(),
            other => {
                let type_name = other.type_name();
                self.operand_stack.push(instance);
                self.operand_stack.push(new_value);
                return Err((
                    "TypeMismatch".to_string(),
                    format!("SET_FIELD expects a struct, got {}", type_name),
                ));
            }
        };
        let ok = s.borrow_mut().set(field, new_value.clone());
        if !ok {
            let type_name = s.borrow().type_name.clone();
            self.operand_stack.push(instance);
            self.operand_stack.push(new_value);
            return Err(("AttributeError".to_string(), format!("struct {} has no field '{}'", type_name, field)));
        }
        self.operand_stack.push(instance);
        Ok(())
    }

    fn cons(&mut self) -> std::result::Result<(), (String, String)> {
        let item = self.pop()?;
        let lst = self.pop()?;
        match lst {
            Value::Nil => self.operand_stack.push(Value::list(vec![item])),
            Value::List(items) => {
                let mut new_items = Vec::with_capacity(items.len() + 1);
                new_items.push(item);
                new_items.extend(items.iter().cloned());
                self.operand_stack.push(Value::list(new_items));
            }
            other => {
                let type_name = other.type_name();
                self.operand_stack.push(other);
                self.operand_stack.push(item);
                return Err(("TypeMismatch".to_string(), format!("CONS expects a list or nil, got {}", type_name)));
            }
        }
        Ok(())
    }

    fn first(&mut self) -> std::result::Result<(), (String, String)> {
        let lst = self.pop()?;
        if let Value::List(items) = &lst {
            if !items.is_empty() {
                let head = items[0].clone();
                self.operand_stack.push(head);
                return Ok(());
            }
        }
        let type_name = lst.type_name();
        let err = Err(("TypeMismatch".to_string(), format!("FIRST requires a non-empty list, got {}", type_name)));
        self.operand_stack.push(lst);
        err
    }

    fn rest(&mut self) -> std::result::Result<(), (String, String)> {
        let lst = self.pop()?;
        if let Value::List(items) = &lst {
            if !items.is_empty() {
                let tail = if items.len() == 1 { Value::Nil } else { Value::list(items[1..].to_vec()) };
                self.operand_stack.push(tail);
                return Ok(());
            }
        }
        let type_name = lst.type_name();
        let err = Err(("TypeMismatch".to_string(), format!("REST requires a non-empty list, got {}", type_name)));
        self.operand_stack.push(lst);
        err
    }

    fn make_list(&mut self, n: usize) -> std::result::Result<(), (String, String)> {
        if self.operand_stack.len() < n {
            return Err(("StackUnderflow".to_string(), format!("MAKE_LIST needs {} values", n)));
        }
        let mut items: Vec<Value> = (0..n).map(|_| self.operand_stack.pop().unwrap()).collect();
        items.reverse();
        self.operand_stack.push(Value::list(items));
        Ok(())
    }
}

enum StepResult {
    Continue,
    Halt,
}

fn arith(instr: &Instr, left: Value, right: Value) -> std::result::Result<Value, (String, String)> {
    use Value::{Float, Int};
    let op_name = match instr {
        Instr::Add => "ADD",
        Instr::Sub => "SUB",
        Instr::Mul => "MUL",
        Instr::Div => "DIV",
        _ => unreachable!(),
    };
    if matches!(instr, Instr::Div) {
        let (l, r) = as_f64_pair(&left, &right, op_name)?;
        if r == 0.0 {
            return Err(("ZeroDivisionError".to_string(), "division by zero".to_string()));
        }
        return Ok(Float(l / r));
    }
    match (left, right) {
        (Int(a), Int(b)) => Ok(match instr {
            Instr::Add => Int(a + b),
            Instr::Sub => Int(a - b),
            Instr::Mul => Int(a * b),
            _ => unreachable!(),
        }),
        (a, b) => {
            let (l, r) = as_f64_pair(&a, &b, op_name)?;
            Ok(match instr {
                Instr::Add => Float(l + r),
                Instr::Sub => Float(l - r),
                Instr::Mul => Float(l * r),
                _ => unreachable!(),
            })
        }
    }
}

fn as_f64_pair(left: &Value, right: &Value, op_name: &str) -> std::result::Result<(f64, f64), (String, String)> {
    let l = as_f64(left).ok_or_else(|| {
        ("TypeMismatch".to_string(), format!("{} expects numbers, got {}", op_name, left.type_name()))
    })?;
    let r = as_f64(right).ok_or_else(|| {
        ("TypeMismatch".to_string(), format!("{} expects numbers, got {}", op_name, right.type_name()))
    })?;
    Ok((l, r))
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Int(n) => Some(*n as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    }
}

fn compare(instr: &Instr, left: &Value, right: &Value) -> std::result::Result<Value, (String, String)> {
    let op_name = if matches!(instr, Instr::Lt) { "LT" } else { "GT" };
    let (l, r) = as_f64_pair(left, right, op_name)?;
    Ok(Value::Bool(if matches!(instr, Instr::Lt) { l < r } else { l > r }))
}
