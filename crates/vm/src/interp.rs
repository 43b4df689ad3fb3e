//! Deterministic tree-walking evaluator for contract script.
//!
//! Every statement and expression step consumes one unit of fuel; every
//! 1024 units the wall clock is checked against the per-call deadline, so
//! tight arithmetic loops cannot outrun the budget. All state access goes
//! through the working set held by the [`CallContext`]; there is no other
//! channel out of the sandbox.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use num_bigint::BigInt;
use rust_decimal::Decimal;

use dvm_types::error::VmError;
use dvm_types::{
    canonical_decimal_string, is_reserved_name, Address, ContractHash, DvmTransaction, Value,
    ValueKind, ValueMap,
};

use crate::contract::{Event, WorkingSet};
use crate::script::{BinOp, Expr, Method, Stmt, UnOp};

const FUEL_CHECK_WINDOW: u64 = 1024;
const MAX_FRAME_DEPTH: usize = 128;

/// All mutable state of one top-level dispatch: the working set, the
/// pending event queue, and the active-instance stack. Replaces the
/// process-wide registers of a global cache with an explicit value
/// threaded through every evaluation.
pub(crate) struct CallContext<'a> {
    ws: &'a mut WorkingSet,
    tx: &'a DvmTransaction,
    pub events: Vec<(ContractHash, Event)>,
    /// Every contract instantiated during this dispatch, entry point
    /// first. Never popped: each handle adds a metered instance.
    pub instances: Vec<ContractHash>,
    current: ContractHash,
    deadline: Instant,
    fuel: u64,
    frame_depth: usize,
}

/// Result of evaluating an expression: a plain value, a contract handle
/// (usable only for method calls), or nothing (a call with no return).
enum Eval {
    Val(Value),
    Handle(ContractHash),
    Void,
}

impl Eval {
    fn value(self) -> Result<Value, VmError> {
        match self {
            Self::Val(v) => Ok(v),
            Self::Handle(_) => Err(VmError::Execution(
                "a contract handle cannot be used as a value".to_string(),
            )),
            Self::Void => Err(VmError::Execution(
                "method did not return a value".to_string(),
            )),
        }
    }
}

enum Flow {
    Next,
    Return(Option<Value>),
}

struct Frame {
    locals: HashMap<String, Value>,
    handles: HashMap<String, ContractHash>,
}

impl<'a> CallContext<'a> {
    pub fn new(
        ws: &'a mut WorkingSet,
        tx: &'a DvmTransaction,
        entry: ContractHash,
        timeout: Duration,
    ) -> Self {
        Self {
            ws,
            tx,
            events: Vec::new(),
            instances: vec![entry],
            current: entry,
            deadline: Instant::now() + timeout,
            fuel: 0,
            frame_depth: 0,
        }
    }

    fn tick(&mut self) -> Result<(), VmError> {
        self.fuel += 1;
        if self.fuel % FUEL_CHECK_WINDOW == 0 && Instant::now() >= self.deadline {
            return Err(VmError::Timeout);
        }
        Ok(())
    }

    /// Invokes `method_name` on `target` with externally supplied
    /// arguments. `sender` is injected into a leading `sender` parameter
    /// when given; internal calls pass `None` and supply every argument
    /// positionally.
    pub fn invoke(
        &mut self,
        target: ContractHash,
        method_name: &str,
        sender: Option<&Address>,
        args: Vec<Value>,
        exported_only: bool,
    ) -> Result<Option<Value>, VmError> {
        let contract = self
            .ws
            .get(&target)
            .ok_or_else(|| VmError::Execution(format!("contract {target} is not loaded")))?;
        let program = contract.program.clone();
        let method = if exported_only {
            program.exported(method_name)
        } else {
            program.method(method_name)
        }
        .ok_or_else(|| VmError::UnknownMethod(method_name.to_string()))?;

        let mut args = args;
        if let (Some(sender), Some(first)) = (sender, method.params.first()) {
            if first.name == "sender" {
                args.insert(0, Value::str(sender.to_string()));
            }
        }
        let locals = bind_args(method, args)?;

        if self.frame_depth >= MAX_FRAME_DEPTH {
            return Err(VmError::Execution("call stack too deep".to_string()));
        }
        tracing::trace!(
            target: "vm",
            contract = %target,
            method = method_name,
            "invoking method"
        );
        self.frame_depth += 1;
        let prev = self.current;
        self.current = target;
        let mut frame = Frame {
            locals,
            handles: HashMap::new(),
        };
        let result = self.eval_block(&method.body, &mut frame);
        self.current = prev;
        self.frame_depth -= 1;

        match result? {
            Flow::Return(value) => Ok(value),
            Flow::Next => Ok(None),
        }
    }

    fn eval_block(&mut self, body: &[Stmt], frame: &mut Frame) -> Result<Flow, VmError> {
        for stmt in body {
            if let Flow::Return(v) = self.eval_stmt(stmt, frame)? {
                return Ok(Flow::Return(v));
            }
        }
        Ok(Flow::Next)
    }

    fn eval_stmt(&mut self, stmt: &Stmt, frame: &mut Frame) -> Result<Flow, VmError> {
        self.tick()?;
        match stmt {
            Stmt::Let(name, expr) => {
                match self.eval_expr(expr, frame)? {
                    Eval::Val(value) => {
                        frame.handles.remove(name);
                        frame.locals.insert(name.clone(), value);
                    }
                    Eval::Handle(hash) => {
                        frame.locals.remove(name);
                        frame.handles.insert(name.clone(), hash);
                    }
                    Eval::Void => {
                        return Err(VmError::Execution(format!(
                            "cannot bind `{name}`: method did not return a value"
                        )))
                    }
                }
                Ok(Flow::Next)
            }
            Stmt::Assign(target, expr) => {
                let value = self.eval_expr(expr, frame)?.value()?;
                self.assign(target, value, frame)?;
                Ok(Flow::Next)
            }
            Stmt::If { cond, then, els } => {
                let cond = self.eval_bool(cond, frame)?;
                if cond {
                    self.eval_block(then, frame)
                } else {
                    self.eval_block(els, frame)
                }
            }
            Stmt::While { cond, body } => {
                while self.eval_bool(cond, frame)? {
                    self.tick()?;
                    if let Flow::Return(v) = self.eval_block(body, frame)? {
                        return Ok(Flow::Return(v));
                    }
                }
                Ok(Flow::Next)
            }
            Stmt::For { var, iter, body } => {
                let items = match self.eval_expr(iter, frame)?.value()? {
                    Value::List(items) | Value::Tuple(items) => items,
                    Value::Map(map) => map.keys().cloned().collect(),
                    other => {
                        return Err(VmError::Execution(format!(
                            "cannot iterate over {}",
                            other.kind()
                        )))
                    }
                };
                for item in items {
                    self.tick()?;
                    frame.handles.remove(var);
                    frame.locals.insert(var.clone(), item);
                    if let Flow::Return(v) = self.eval_block(body, frame)? {
                        return Ok(Flow::Return(v));
                    }
                }
                Ok(Flow::Next)
            }
            Stmt::Return(expr) => {
                let value = match expr {
                    Some(expr) => Some(self.eval_expr(expr, frame)?.value()?),
                    None => None,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Assert(cond, message) => {
                if self.eval_bool(cond, frame)? {
                    Ok(Flow::Next)
                } else {
                    Err(VmError::Execution(
                        message
                            .clone()
                            .unwrap_or_else(|| "assertion failed".to_string()),
                    ))
                }
            }
            Stmt::Fail(message) => Err(VmError::Execution(message.clone())),
            Stmt::Expr(expr) => {
                self.eval_expr(expr, frame)?;
                Ok(Flow::Next)
            }
        }
    }

    fn eval_bool(&mut self, expr: &Expr, frame: &mut Frame) -> Result<bool, VmError> {
        match self.eval_expr(expr, frame)?.value()? {
            Value::Bool(b) => Ok(b),
            other => Err(VmError::Execution(format!(
                "condition must be a boolean, got {}",
                other.kind()
            ))),
        }
    }

    fn eval_expr(&mut self, expr: &Expr, frame: &mut Frame) -> Result<Eval, VmError> {
        self.tick()?;
        match expr {
            Expr::Int(n) => Ok(Eval::Val(Value::Int(n.clone()))),
            Expr::Dec(d) => Ok(Eval::Val(Value::Decimal(*d))),
            Expr::Str(s) => Ok(Eval::Val(Value::Str(s.clone()))),
            Expr::Bool(b) => Ok(Eval::Val(Value::Bool(*b))),
            Expr::This => Err(VmError::Execution(
                "`self` cannot be used as a value".to_string(),
            )),
            Expr::Ident(name) => {
                if let Some(value) = frame.locals.get(name) {
                    Ok(Eval::Val(value.clone()))
                } else if let Some(hash) = frame.handles.get(name) {
                    Ok(Eval::Handle(*hash))
                } else {
                    Err(VmError::Execution(format!("undefined variable `{name}`")))
                }
            }
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item, frame)?.value()?);
                }
                Ok(Eval::Val(Value::List(values)))
            }
            Expr::Tuple(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item, frame)?.value()?);
                }
                Ok(Eval::Val(Value::Tuple(values)))
            }
            Expr::Map(entries) => {
                let mut map = ValueMap::new();
                for (key, value) in entries {
                    let key = self.eval_expr(key, frame)?.value()?;
                    let value = self.eval_expr(value, frame)?.value()?;
                    map.insert(key, value);
                }
                Ok(Eval::Val(Value::Map(map)))
            }
            Expr::Attr(base, name) => {
                if matches!(**base, Expr::This) {
                    return self.read_state(name);
                }
                match self.eval_expr(base, frame)? {
                    Eval::Handle(_) => Err(VmError::Execution(
                        "contract handles expose methods only".to_string(),
                    )),
                    Eval::Val(v) => Err(VmError::Execution(format!(
                        "{} has no attribute `{name}`",
                        v.kind()
                    ))),
                    Eval::Void => Err(VmError::Execution(format!(
                        "nothing to read `{name}` from"
                    ))),
                }
            }
            Expr::Index(base, index) => {
                let container = self.eval_expr(base, frame)?.value()?;
                let key = self.eval_expr(index, frame)?.value()?;
                read_index(&container, &key).map(Eval::Val)
            }
            Expr::Unary(op, operand) => {
                let value = self.eval_expr(operand, frame)?.value()?;
                match (op, value) {
                    (UnOp::Neg, Value::Int(n)) => Ok(Eval::Val(Value::Int(-n))),
                    (UnOp::Neg, Value::Decimal(d)) => Ok(Eval::Val(Value::Decimal(-d))),
                    (UnOp::Not, Value::Bool(b)) => Ok(Eval::Val(Value::Bool(!b))),
                    (op, value) => Err(VmError::Execution(format!(
                        "unsupported operand for {}: {}",
                        match op {
                            UnOp::Neg => "-",
                            UnOp::Not => "not",
                        },
                        value.kind()
                    ))),
                }
            }
            Expr::Binary(BinOp::And, left, right) => {
                let l = self.eval_bool(left, frame)?;
                Ok(Eval::Val(Value::Bool(l && self.eval_bool(right, frame)?)))
            }
            Expr::Binary(BinOp::Or, left, right) => {
                let l = self.eval_bool(left, frame)?;
                Ok(Eval::Val(Value::Bool(l || self.eval_bool(right, frame)?)))
            }
            Expr::Binary(op, left, right) => {
                let l = self.eval_expr(left, frame)?.value()?;
                let r = self.eval_expr(right, frame)?.value()?;
                apply_binary(*op, l, r).map(Eval::Val)
            }
            Expr::Call(callee, args) => self.eval_call(callee, args, frame),
        }
    }

    /// Reads `self.<name>`: reserved projections first, then state
    /// variables.
    fn read_state(&mut self, name: &str) -> Result<Eval, VmError> {
        match name {
            "address" => return Ok(Eval::Val(Value::str(self.current.to_hex()))),
            "transaction" => return Ok(Eval::Val(self.tx.to_value())),
            _ if is_reserved_name(name) => {
                return Err(VmError::Execution(format!("`{name}` is not available")))
            }
            _ => {}
        }
        let contract = self
            .ws
            .get(&self.current)
            .ok_or_else(|| VmError::Execution("current contract is not loaded".to_string()))?;
        if let Some(value) = contract.variables.get(name) {
            return Ok(Eval::Val(value.clone()));
        }
        if contract.program.method(name).is_some() {
            return Err(VmError::Execution(format!(
                "method `{name}` must be called, not read"
            )));
        }
        Err(VmError::Execution(format!(
            "undefined state variable `{name}`"
        )))
    }

    fn eval_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        frame: &mut Frame,
    ) -> Result<Eval, VmError> {
        match callee {
            Expr::Ident(name) if is_builtin(name) => self.eval_builtin(name, args, frame),
            Expr::Ident(name) => {
                let is_method = self
                    .ws
                    .get(&self.current)
                    .is_some_and(|c| c.program.method(name).is_some());
                if !is_method {
                    return Err(VmError::Execution(format!("unknown function `{name}`")));
                }
                let values = self.eval_args(args, frame)?;
                self.call_method(self.current, name, None, values, false)
            }
            Expr::Attr(base, name) if matches!(**base, Expr::This) => {
                let values = self.eval_args(args, frame)?;
                self.call_method(self.current, name, None, values, false)
            }
            Expr::Attr(base, name) => match self.eval_expr(base, frame)? {
                Eval::Handle(target) => {
                    if name == "constructor" {
                        return Err(VmError::Execution(
                            "cannot call a constructor through a handle".to_string(),
                        ));
                    }
                    let values = self.eval_args(args, frame)?;
                    let caller = Address::from_contract(&self.current);
                    self.call_method(target, name, Some(caller), values, true)
                }
                Eval::Val(v) => Err(VmError::Execution(format!(
                    "{} is not callable",
                    v.kind()
                ))),
                Eval::Void => Err(VmError::Execution("nothing to call".to_string())),
            },
            _ => Err(VmError::Execution("expression is not callable".to_string())),
        }
    }

    fn call_method(
        &mut self,
        target: ContractHash,
        name: &str,
        sender: Option<Address>,
        args: Vec<Value>,
        exported_only: bool,
    ) -> Result<Eval, VmError> {
        match self.invoke(target, name, sender.as_ref(), args, exported_only)? {
            Some(value) => Ok(Eval::Val(value)),
            None => Ok(Eval::Void),
        }
    }

    fn eval_args(&mut self, args: &[Expr], frame: &mut Frame) -> Result<Vec<Value>, VmError> {
        args.iter()
            .map(|arg| self.eval_expr(arg, frame)?.value())
            .collect()
    }

    fn eval_builtin(
        &mut self,
        name: &str,
        args: &[Expr],
        frame: &mut Frame,
    ) -> Result<Eval, VmError> {
        let values = self.eval_args(args, frame)?;
        match name {
            "load_contract" => {
                let [target] = take_args::<1>(name, values)?;
                let hash = parse_contract_hash(&target)?;
                self.load_contract(hash)
            }
            "emit" => {
                let [event_name, fields] = take_args::<2>(name, values)?;
                let event_name = match event_name {
                    Value::Str(s) => s,
                    other => {
                        return Err(VmError::Execution(format!(
                            "event name must be a string, got {}",
                            other.kind()
                        )))
                    }
                };
                let fields = match fields {
                    Value::Map(m) => m,
                    other => {
                        return Err(VmError::Execution(format!(
                            "event fields must be a map, got {}",
                            other.kind()
                        )))
                    }
                };
                if fields.keys().any(|k| k.kind() != ValueKind::Str) {
                    return Err(VmError::Execution(
                        "event field names must be strings".to_string(),
                    ));
                }
                self.events.push((
                    self.current,
                    Event {
                        name: event_name,
                        fields,
                    },
                ));
                Ok(Eval::Void)
            }
            _ => builtin_pure(name, values).map(Eval::Val),
        }
    }

    /// Obtains a restricted handle onto another loaded contract. Fails if
    /// the target is absent from the working set or already instantiated
    /// in this dispatch (self-reentry).
    fn load_contract(&mut self, hash: ContractHash) -> Result<Eval, VmError> {
        if !self.ws.contains(&hash) {
            return Err(VmError::Execution(format!(
                "contract <{hash}> must be present in the working set"
            )));
        }
        if self.instances.contains(&hash) {
            return Err(VmError::Reentrancy(hash));
        }
        self.instances.push(hash);
        Ok(Eval::Handle(hash))
    }

    fn assign(&mut self, target: &Expr, value: Value, frame: &mut Frame) -> Result<(), VmError> {
        match target {
            Expr::Ident(name) => {
                if frame.handles.contains_key(name) {
                    return Err(VmError::ForbiddenWrite(format!("handle `{name}`")));
                }
                if !frame.locals.contains_key(name) {
                    return Err(VmError::Execution(format!(
                        "assignment to undeclared variable `{name}`; declare it with let"
                    )));
                }
                frame.locals.insert(name.clone(), value);
                Ok(())
            }
            Expr::Attr(base, name) if matches!(**base, Expr::This) => {
                self.write_state_root(name)?;
                let contract = self
                    .ws
                    .get_mut(&self.current)
                    .ok_or_else(|| VmError::Execution("current contract is not loaded".into()))?;
                contract.variables.insert(name.clone(), value);
                Ok(())
            }
            Expr::Index(_, _) => {
                let (root, keys) = flatten_index(target)?;
                let mut key_values = Vec::with_capacity(keys.len());
                for key in keys {
                    key_values.push(self.eval_expr(key, frame)?.value()?);
                }
                let slot = match root {
                    Expr::Ident(name) => {
                        if frame.handles.contains_key(name) {
                            return Err(VmError::ForbiddenWrite(format!("handle `{name}`")));
                        }
                        frame.locals.get_mut(name).ok_or_else(|| {
                            VmError::Execution(format!("undefined variable `{name}`"))
                        })?
                    }
                    Expr::Attr(base, name) if matches!(**base, Expr::This) => {
                        self.write_state_root(name)?;
                        let contract = self.ws.get_mut(&self.current).ok_or_else(|| {
                            VmError::Execution("current contract is not loaded".into())
                        })?;
                        contract.variables.get_mut(name).ok_or_else(|| {
                            VmError::Execution(format!("undefined state variable `{name}`"))
                        })?
                    }
                    _ => return Err(VmError::ForbiddenWrite("expression".to_string())),
                };
                let (last, path) = key_values.split_last().expect("index chain is non-empty");
                let container = navigate_mut(slot, path)?;
                write_index(container, last, value)
            }
            _ => Err(VmError::ForbiddenWrite("expression".to_string())),
        }
    }

    /// Guards a write through `self.<name>`: reserved names and method
    /// names are never writable.
    fn write_state_root(&self, name: &str) -> Result<(), VmError> {
        if is_reserved_name(name) {
            return Err(VmError::ReservedName(name.to_string()));
        }
        let is_method = self
            .ws
            .get(&self.current)
            .is_some_and(|c| c.program.method(name).is_some());
        if is_method {
            return Err(VmError::ForbiddenWrite(format!("method `{name}`")));
        }
        Ok(())
    }
}

fn is_builtin(name: &str) -> bool {
    matches!(
        name,
        "len"
            | "keys"
            | "values"
            | "has"
            | "get"
            | "sum"
            | "str"
            | "int"
            | "decimal"
            | "emit"
            | "load_contract"
    )
}

fn take_args<const N: usize>(name: &str, values: Vec<Value>) -> Result<[Value; N], VmError> {
    let got = values.len();
    values.try_into().map_err(|_| VmError::ArgumentCount {
        method: name.to_string(),
        expected: N,
        got,
    })
}

/// Builtins with no access to the execution context.
fn builtin_pure(name: &str, values: Vec<Value>) -> Result<Value, VmError> {
    match name {
        "len" => {
            let [v] = take_args::<1>(name, values)?;
            let len = match &v {
                Value::Str(s) => s.chars().count(),
                Value::Bytes(b) => b.len(),
                Value::List(items) | Value::Tuple(items) => items.len(),
                Value::Map(m) => m.len(),
                other => {
                    return Err(VmError::Execution(format!(
                        "{} has no length",
                        other.kind()
                    )))
                }
            };
            Ok(Value::Int(BigInt::from(len)))
        }
        "keys" => {
            let [v] = take_args::<1>(name, values)?;
            let map = expect_map(name, &v)?;
            Ok(Value::List(map.keys().cloned().collect()))
        }
        "values" => {
            let [v] = take_args::<1>(name, values)?;
            let map = expect_map(name, &v)?;
            Ok(Value::List(map.values().cloned().collect()))
        }
        "has" => {
            let [m, key] = take_args::<2>(name, values)?;
            let map = expect_map(name, &m)?;
            Ok(Value::Bool(map.contains_key(&key)))
        }
        "get" => {
            let [m, key, default] = take_args::<3>(name, values)?;
            let map = expect_map(name, &m)?;
            Ok(map.get(&key).cloned().unwrap_or(default))
        }
        "sum" => {
            let [v] = take_args::<1>(name, values)?;
            let items = match v {
                Value::List(items) | Value::Tuple(items) => items,
                other => {
                    return Err(VmError::Execution(format!(
                        "sum expects a sequence, got {}",
                        other.kind()
                    )))
                }
            };
            let mut acc = Value::int(0);
            for item in items {
                acc = apply_binary(BinOp::Add, acc, item)?;
            }
            Ok(acc)
        }
        "str" => {
            let [v] = take_args::<1>(name, values)?;
            Ok(Value::Str(render_scalar(&v)?))
        }
        "int" => {
            let [v] = take_args::<1>(name, values)?;
            match v {
                Value::Int(n) => Ok(Value::Int(n)),
                Value::Str(s) => s
                    .trim()
                    .parse::<BigInt>()
                    .map(Value::Int)
                    .map_err(|_| VmError::Execution(format!("`{s}` is not an integer"))),
                other => Err(VmError::Execution(format!(
                    "cannot convert {} to int",
                    other.kind()
                ))),
            }
        }
        "decimal" => {
            let [v] = take_args::<1>(name, values)?;
            match v {
                Value::Decimal(d) => Ok(Value::Decimal(d)),
                Value::Int(n) => bigint_to_decimal(&n).map(Value::Decimal),
                Value::Str(s) => parse_decimal_str(s.trim())
                    .map(Value::Decimal)
                    .map_err(|_| VmError::Execution(format!("`{s}` is not a decimal"))),
                other => Err(VmError::Execution(format!(
                    "cannot convert {} to decimal",
                    other.kind()
                ))),
            }
        }
        _ => Err(VmError::Execution(format!("unknown function `{name}`"))),
    }
}

fn expect_map<'v>(builtin: &str, v: &'v Value) -> Result<&'v ValueMap, VmError> {
    v.as_map().ok_or_else(|| {
        VmError::Execution(format!("{builtin} expects a map, got {}", v.kind()))
    })
}

fn parse_contract_hash(v: &Value) -> Result<ContractHash, VmError> {
    match v {
        Value::Str(s) => s
            .parse()
            .map_err(|_| VmError::Execution(format!("`{s}` is not a contract hash"))),
        Value::Bytes(b) => ContractHash::from_slice(b)
            .map_err(|_| VmError::Execution("contract hash must be 32 bytes".to_string())),
        other => Err(VmError::Execution(format!(
            "load_contract expects a hash, got {}",
            other.kind()
        ))),
    }
}

fn flatten_index<'e>(expr: &'e Expr) -> Result<(&'e Expr, Vec<&'e Expr>), VmError> {
    let mut keys = Vec::new();
    let mut cursor = expr;
    while let Expr::Index(base, key) = cursor {
        keys.push(key.as_ref());
        cursor = base;
    }
    keys.reverse();
    Ok((cursor, keys))
}

fn navigate_mut<'v>(slot: &'v mut Value, path: &[Value]) -> Result<&'v mut Value, VmError> {
    let mut cursor = slot;
    for key in path {
        cursor = match cursor {
            Value::Map(map) => map
                .get_mut(key)
                .ok_or_else(|| VmError::Execution(format!("key {} not found", render(key))))?,
            Value::List(items) => {
                let idx = index_of(key, items.len())?;
                &mut items[idx]
            }
            other => {
                return Err(VmError::ForbiddenWrite(other.kind().name().to_string()));
            }
        };
    }
    Ok(cursor)
}

fn write_index(container: &mut Value, key: &Value, value: Value) -> Result<(), VmError> {
    match container {
        Value::Map(map) => {
            map.insert(key.clone(), value);
            Ok(())
        }
        Value::List(items) => {
            let idx = index_of(key, items.len())?;
            items[idx] = value;
            Ok(())
        }
        other => Err(VmError::ForbiddenWrite(other.kind().name().to_string())),
    }
}

fn read_index(container: &Value, key: &Value) -> Result<Value, VmError> {
    match container {
        Value::Map(map) => map
            .get(key)
            .cloned()
            .ok_or_else(|| VmError::Execution(format!("key {} not found", render(key)))),
        Value::List(items) | Value::Tuple(items) => {
            let idx = index_of(key, items.len())?;
            Ok(items[idx].clone())
        }
        other => Err(VmError::Execution(format!(
            "{} is not indexable",
            other.kind()
        ))),
    }
}

fn index_of(key: &Value, len: usize) -> Result<usize, VmError> {
    let n = key.as_int().ok_or_else(|| {
        VmError::Execution(format!("sequence index must be an int, got {}", key.kind()))
    })?;
    let idx = usize::try_from(n)
        .map_err(|_| VmError::Execution(format!("index {n} out of range")))?;
    if idx >= len {
        return Err(VmError::Execution(format!("index {idx} out of range")));
    }
    Ok(idx)
}

fn apply_binary(op: BinOp, left: Value, right: Value) -> Result<Value, VmError> {
    use BinOp::*;
    match op {
        Eq => return Ok(Value::Bool(values_equal(&left, &right))),
        Ne => return Ok(Value::Bool(!values_equal(&left, &right))),
        Lt | Le | Gt | Ge => {
            let ord = compare_values(&left, &right)?;
            let result = match op {
                Lt => ord.is_lt(),
                Le => ord.is_le(),
                Gt => ord.is_gt(),
                Ge => ord.is_ge(),
                _ => unreachable!(),
            };
            return Ok(Value::Bool(result));
        }
        _ => {}
    }

    match (left, right) {
        (Value::Int(a), Value::Int(b)) => int_arith(op, a, b),
        (Value::Decimal(a), Value::Decimal(b)) => decimal_arith(op, a, b),
        (Value::Int(a), Value::Decimal(b)) => decimal_arith(op, bigint_to_decimal(&a)?, b),
        (Value::Decimal(a), Value::Int(b)) => decimal_arith(op, a, bigint_to_decimal(&b)?),
        (Value::Str(a), Value::Str(b)) if op == Add => Ok(Value::Str(a + &b)),
        (Value::List(mut a), Value::List(b)) if op == Add => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (l, r) => Err(VmError::Execution(format!(
            "unsupported operand types: {} {} {}",
            l.kind(),
            op.symbol(),
            r.kind()
        ))),
    }
}

fn int_arith(op: BinOp, a: BigInt, b: BigInt) -> Result<Value, VmError> {
    use num_bigint::Sign;
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b.sign() == Sign::NoSign {
                return Err(VmError::Execution("division by zero".to_string()));
            }
            a / b
        }
        BinOp::Rem => {
            if b.sign() == Sign::NoSign {
                return Err(VmError::Execution("division by zero".to_string()));
            }
            a % b
        }
        _ => unreachable!("comparisons handled above"),
    };
    Ok(Value::Int(result))
}

fn decimal_arith(op: BinOp, a: Decimal, b: Decimal) -> Result<Value, VmError> {
    let result = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Div => {
            if b.is_zero() {
                return Err(VmError::Execution("division by zero".to_string()));
            }
            a.checked_div(b)
        }
        BinOp::Rem => {
            if b.is_zero() {
                return Err(VmError::Execution("division by zero".to_string()));
            }
            a.checked_rem(b)
        }
        _ => unreachable!("comparisons handled above"),
    };
    result
        .map(Value::Decimal)
        .ok_or_else(|| VmError::Execution("decimal overflow".to_string()))
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(a), Value::Decimal(b)) | (Value::Decimal(b), Value::Int(a)) => {
            bigint_to_decimal(a).map(|a| a == *b).unwrap_or(false)
        }
        (l, r) => l == r,
    }
}

fn compare_values(left: &Value, right: &Value) -> Result<std::cmp::Ordering, VmError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::Decimal(a), Value::Decimal(b)) => Ok(a.cmp(b)),
        (Value::Int(a), Value::Decimal(b)) => Ok(bigint_to_decimal(a)?.cmp(b)),
        (Value::Decimal(a), Value::Int(b)) => Ok(a.cmp(&bigint_to_decimal(b)?)),
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::Bytes(a), Value::Bytes(b)) => Ok(a.cmp(b)),
        (l, r) => Err(VmError::Execution(format!(
            "cannot compare {} with {}",
            l.kind(),
            r.kind()
        ))),
    }
}

fn bigint_to_decimal(n: &BigInt) -> Result<Decimal, VmError> {
    let i = i128::try_from(n)
        .map_err(|_| VmError::Execution("integer too large for decimal arithmetic".to_string()))?;
    Decimal::try_from_i128_with_scale(i, 0)
        .map_err(|_| VmError::Execution("integer too large for decimal arithmetic".to_string()))
}

fn parse_decimal_str(s: &str) -> Result<Decimal, rust_decimal::Error> {
    s.parse::<Decimal>().or_else(|_| Decimal::from_scientific(s))
}

fn render_scalar(v: &Value) -> Result<String, VmError> {
    match v {
        Value::Int(n) => Ok(n.to_string()),
        Value::Decimal(d) => Ok(canonical_decimal_string(d)),
        Value::Str(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Bytes(b) => Ok(hex::encode(b)),
        other => Err(VmError::Execution(format!(
            "cannot stringify {}",
            other.kind()
        ))),
    }
}

fn render(v: &Value) -> String {
    render_scalar(v).unwrap_or_else(|_| format!("<{}>", v.kind()))
}

/// Binds external arguments to declared parameters, applying the two
/// lenient coercions: a string may stand in for a declared decimal or
/// integer. Any other mismatch aborts the call.
fn bind_args(method: &Method, args: Vec<Value>) -> Result<HashMap<String, Value>, VmError> {
    if args.len() != method.params.len() {
        return Err(VmError::ArgumentCount {
            method: method.name.clone(),
            expected: method.params.len(),
            got: args.len(),
        });
    }
    let mut locals = HashMap::with_capacity(args.len());
    for (index, (param, arg)) in method.params.iter().zip(args).enumerate() {
        let got = arg.kind();
        let coerced = coerce(arg, param.kind).ok_or(VmError::ArgumentType {
            method: method.name.clone(),
            index: index + 1,
            expected: param.kind.name(),
            got: got.name(),
        })?;
        locals.insert(param.name.clone(), coerced);
    }
    Ok(locals)
}

fn coerce(arg: Value, want: ValueKind) -> Option<Value> {
    if arg.kind() == want {
        return Some(arg);
    }
    match (want, arg) {
        (ValueKind::Decimal, Value::Str(s)) => {
            parse_decimal_str(s.trim()).ok().map(Value::Decimal)
        }
        (ValueKind::Int, Value::Str(s)) => s.trim().parse::<BigInt>().ok().map(Value::Int),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coercion_rules() {
        assert_eq!(
            coerce(Value::str("12.5"), ValueKind::Decimal),
            Some(Value::Decimal("12.5".parse().unwrap()))
        );
        assert_eq!(
            coerce(Value::str("42"), ValueKind::Int),
            Some(Value::int(42))
        );
        assert_eq!(coerce(Value::int(1), ValueKind::Decimal), None);
        assert_eq!(coerce(Value::Bool(true), ValueKind::Str), None);
    }

    #[test]
    fn mixed_numeric_comparison() {
        let d: Decimal = "100".parse().unwrap();
        assert!(values_equal(&Value::int(100), &Value::Decimal(d)));
        assert_eq!(
            compare_values(&Value::int(99), &Value::Decimal(d)).unwrap(),
            std::cmp::Ordering::Less
        );
    }

    #[test]
    fn integer_division_by_zero() {
        let err = apply_binary(BinOp::Div, Value::int(1), Value::int(0)).unwrap_err();
        assert!(err.to_string().contains("division by zero"));
    }
}
