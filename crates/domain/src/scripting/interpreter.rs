//! Tree-walking interpreter over a flat variable table
//!
//! The only ways out of a script are the [`ScriptHost`] callbacks; there is no
//! path to files, sockets or processes.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value as Json;

use super::ast::{BinOp, Builtin, CmpOp, Expr, Program, Stmt, StmtKind, Target, UnaryOp};
use super::error::ScriptError;

/// Script value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Str(String),
    Bool(bool),
    Nil,
    /// Tuple or list
    Seq(Vec<Value>),
    /// Read-mostly mapping, e.g. event data; scripts cannot build one
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Number(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bool(b) => *b,
            Value::Nil => false,
            Value::Seq(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
        }
    }

    /// Numeric view used by arithmetic; booleans count as 0 and 1.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Looser numeric view used by built-ins: numeric strings also count.
    fn coerce_number(&self) -> Option<f64> {
        match self {
            Value::Str(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            other => other.as_number(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Bool(_) => "boolean",
            Value::Nil => "nil",
            Value::Seq(_) => "sequence",
            Value::Map(_) => "mapping",
        }
    }

    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::Nil,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Nil),
            Json::String(s) => Value::Str(s.clone()),
            Json::Array(items) => Value::Seq(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{n}"),
            Value::Str(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Nil => f.write_str("nil"),
            Value::Seq(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(map) => {
                f.write_str("{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

/// Variables visible to one script execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    vars: BTreeMap<String, Value>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Finite numeric value of a variable
    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name)
            .and_then(Value::as_number)
            .filter(|n| n.is_finite())
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }
}

/// Capabilities a script may reach
pub trait ScriptHost {
    /// Uniform integer in `[1, sides]`; `sides` is already at least 1.
    fn roll(&mut self, sides: i64) -> i64;

    fn say(&mut self, text: &str);

    /// Re-enters event dispatch for `event`. The environment is passed so the
    /// host can commit the script's state first and refresh it afterwards.
    fn trigger(&mut self, event: &str, env: &mut Environment);
}

/// Runs a validated program against `env`.
pub fn execute(
    program: &Program,
    env: &mut Environment,
    host: &mut dyn ScriptHost,
) -> Result<(), ScriptError> {
    Interpreter { env, host }.block(&program.body)
}

struct Interpreter<'a> {
    env: &'a mut Environment,
    host: &'a mut dyn ScriptHost,
}

impl Interpreter<'_> {
    fn block(&mut self, body: &[Stmt]) -> Result<(), ScriptError> {
        body.iter().try_for_each(|stmt| self.statement(stmt))
    }

    fn statement(&mut self, stmt: &Stmt) -> Result<(), ScriptError> {
        let line = stmt.line;
        match &stmt.kind {
            StmtKind::Assign { target, value } => {
                let value = self.eval(value, line)?;
                self.assign(target, value, line)
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = match target {
                    Target::Name(name) => self.lookup(name, line)?,
                    Target::Index { name, index } => {
                        let container = self.lookup(name, line)?;
                        let index = self.eval(index, line)?;
                        index_value(&container, &index, line)?
                    }
                };
                let rhs = self.eval(value, line)?;
                let updated = arithmetic(*op, &current, &rhs, line)?;
                self.assign(target, updated, line)
            }
            StmtKind::If {
                branches,
                otherwise,
            } => {
                for (condition, body) in branches {
                    if self.eval(condition, line)?.is_truthy() {
                        return self.block(body);
                    }
                }
                self.block(otherwise)
            }
            StmtKind::Expr(expr) => self.eval(expr, line).map(drop),
        }
    }

    fn lookup(&self, name: &str, line: usize) -> Result<Value, ScriptError> {
        self.env
            .get(name)
            .cloned()
            .ok_or_else(|| ScriptError::runtime(line, format!("name '{name}' is not defined")))
    }

    fn assign(&mut self, target: &Target, value: Value, line: usize) -> Result<(), ScriptError> {
        match target {
            Target::Name(name) => {
                self.env.set(name.clone(), value);
                Ok(())
            }
            Target::Index { name, index } => {
                let index = self.eval(index, line)?;
                let container = self.env.vars.get_mut(name).ok_or_else(|| {
                    ScriptError::runtime(line, format!("name '{name}' is not defined"))
                })?;
                match container {
                    Value::Seq(items) => {
                        let slot = seq_index(items.len(), &index, line)?;
                        items[slot] = value;
                        Ok(())
                    }
                    Value::Map(map) => match index {
                        Value::Str(key) => {
                            map.insert(key, value);
                            Ok(())
                        }
                        other => Err(ScriptError::runtime(
                            line,
                            format!("mapping keys must be strings, not {}", other.type_name()),
                        )),
                    },
                    other => Err(ScriptError::runtime(
                        line,
                        format!("{} does not support item assignment", other.type_name()),
                    )),
                }
            }
        }
    }

    fn eval(&mut self, expr: &Expr, line: usize) -> Result<Value, ScriptError> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Nil => Ok(Value::Nil),
            Expr::Name(name) => self.lookup(name, line),
            Expr::Sequence(items) => items
                .iter()
                .map(|item| self.eval(item, line))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Seq),
            Expr::Index { target, index } => {
                let container = self.eval(target, line)?;
                let index = self.eval(index, line)?;
                index_value(&container, &index, line)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, line)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOp::Neg | UnaryOp::Pos => {
                        let n = value.as_number().ok_or_else(|| {
                            ScriptError::runtime(
                                line,
                                format!("bad operand for unary minus: {}", value.type_name()),
                            )
                        })?;
                        Ok(Value::Number(if *op == UnaryOp::Neg { -n } else { n }))
                    }
                }
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, line)?;
                let right = self.eval(right, line)?;
                arithmetic(*op, &left, &right, line)
            }
            Expr::Compare { first, rest } => {
                let mut left = self.eval(first, line)?;
                for (op, next) in rest {
                    let right = self.eval(next, line)?;
                    if !compare(*op, &left, &right, line)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::And(left, right) => {
                let left = self.eval(left, line)?;
                if !left.is_truthy() {
                    return Ok(left);
                }
                self.eval(right, line)
            }
            Expr::Or(left, right) => {
                let left = self.eval(left, line)?;
                if left.is_truthy() {
                    return Ok(left);
                }
                self.eval(right, line)
            }
            Expr::Call { builtin, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, line))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(*builtin, args, line)
            }
        }
    }

    fn number_var(&self, name: &str, line: usize) -> Result<f64, ScriptError> {
        self.env
            .number(name)
            .ok_or_else(|| ScriptError::runtime(line, format!("'{name}' is not a number")))
    }

    fn call(&mut self, builtin: Builtin, args: Vec<Value>, line: usize) -> Result<Value, ScriptError> {
        let mut args = args.into_iter();
        let mut next = || args.next().unwrap_or(Value::Nil);

        match builtin {
            Builtin::Roll => {
                let sides = next()
                    .coerce_number()
                    .map(|n| n.trunc() as i64)
                    .unwrap_or(1)
                    .max(1);
                Ok(Value::Number(self.host.roll(sides) as f64))
            }
            Builtin::Damage => {
                let amount = next().coerce_number().unwrap_or(0.0);
                let hp = self.number_var("hp", line)?;
                self.env.set("hp", (hp - amount).max(0.0));
                Ok(Value::Nil)
            }
            Builtin::Heal => {
                let amount = next().coerce_number().unwrap_or(0.0);
                let hp = self.number_var("hp", line)?;
                let max_hp = self.number_var("max_hp", line)?;
                self.env.set("hp", (hp + amount).min(max_hp));
                Ok(Value::Nil)
            }
            Builtin::Move => {
                let (dx, dy) = match (next().coerce_number(), next().coerce_number()) {
                    (Some(dx), Some(dy)) => (dx, dy),
                    _ => (0.0, 0.0),
                };
                let x = self.number_var("x", line)?;
                let y = self.number_var("y", line)?;
                self.env.set("x", x + dx);
                self.env.set("y", y + dy);
                Ok(Value::Nil)
            }
            Builtin::Say => {
                let text = next().to_string();
                self.host.say(&text);
                Ok(Value::Nil)
            }
            Builtin::Set => {
                let name = next();
                let value = next();
                if let Value::Str(name) = name {
                    self.env.set(name, value);
                }
                Ok(Value::Nil)
            }
            Builtin::Trigger => {
                let event = next().to_string();
                self.host.trigger(&event, self.env);
                Ok(Value::Nil)
            }
        }
    }
}

fn seq_index(len: usize, index: &Value, line: usize) -> Result<usize, ScriptError> {
    let raw = index
        .as_number()
        .filter(|n| n.fract() == 0.0)
        .ok_or_else(|| {
            ScriptError::runtime(
                line,
                format!("sequence indices must be integers, not {}", index.type_name()),
            )
        })? as i64;
    let resolved = if raw < 0 { raw + len as i64 } else { raw };
    usize::try_from(resolved)
        .ok()
        .filter(|i| *i < len)
        .ok_or_else(|| ScriptError::runtime(line, format!("index {raw} out of range")))
}

fn index_value(container: &Value, index: &Value, line: usize) -> Result<Value, ScriptError> {
    match container {
        Value::Seq(items) => Ok(items[seq_index(items.len(), index, line)?].clone()),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = seq_index(chars.len(), index, line)?;
            Ok(Value::Str(chars[i].to_string()))
        }
        Value::Map(map) => match index {
            Value::Str(key) => map
                .get(key)
                .cloned()
                .ok_or_else(|| ScriptError::runtime(line, format!("key '{key}' not found"))),
            other => Err(ScriptError::runtime(
                line,
                format!("mapping keys must be strings, not {}", other.type_name()),
            )),
        },
        other => Err(ScriptError::runtime(
            line,
            format!("{} is not indexable", other.type_name()),
        )),
    }
}

fn arithmetic(op: BinOp, left: &Value, right: &Value, line: usize) -> Result<Value, ScriptError> {
    if op == BinOp::Add {
        match (left, right) {
            (Value::Str(a), Value::Str(b)) => return Ok(Value::Str(format!("{a}{b}"))),
            (Value::Seq(a), Value::Seq(b)) => {
                return Ok(Value::Seq(a.iter().chain(b).cloned().collect()))
            }
            _ => {}
        }
    }

    let (Some(a), Some(b)) = (left.as_number(), right.as_number()) else {
        return Err(ScriptError::runtime(
            line,
            format!(
                "unsupported operand types for {op:?}: {} and {}",
                left.type_name(),
                right.type_name()
            ),
        ));
    };

    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div | BinOp::FloorDiv | BinOp::Mod if b == 0.0 => {
            return Err(ScriptError::runtime(line, "division by zero"));
        }
        BinOp::Div => a / b,
        BinOp::FloorDiv => (a / b).floor(),
        BinOp::Mod => a - b * (a / b).floor(),
        BinOp::Pow => {
            let p = a.powf(b);
            if !p.is_finite() {
                return Err(ScriptError::runtime(line, "numeric result out of range"));
            }
            p
        }
    };
    Ok(Value::Number(result))
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Seq(a), Value::Seq(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        _ => match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => a == b,
            _ => left == right,
        },
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value, line: usize) -> Result<bool, ScriptError> {
    match op {
        CmpOp::Eq => return Ok(values_equal(left, right)),
        CmpOp::NotEq => return Ok(!values_equal(left, right)),
        _ => {}
    }

    let ordering = match (left, right) {
        (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
        _ => match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => {
                return Err(ScriptError::runtime(
                    line,
                    format!(
                        "cannot order {} and {}",
                        left.type_name(),
                        right.type_name()
                    ),
                ))
            }
        },
    };
    let Some(ordering) = ordering else {
        return Ok(false);
    };
    Ok(match op {
        CmpOp::Lt => ordering.is_lt(),
        CmpOp::Le => ordering.is_le(),
        CmpOp::Gt => ordering.is_gt(),
        CmpOp::Ge => ordering.is_ge(),
        CmpOp::Eq => ordering.is_eq(),
        CmpOp::NotEq => ordering.is_ne(),
    })
}
