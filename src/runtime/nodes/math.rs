//! Arithmetic over node inputs
//!
//! Integers stay integers as long as the result is exact; any float operand
//! turns the result into a float. Overflow and division by zero are errors,
//! never silent wraparound or infinities.

use super::first_input;
use crate::runtime::context::ExecutionContext;
use crate::runtime::registry::NodeExecutor;
use crate::workflow::Node;
use anyhow::{anyhow, bail};
use futures::future::BoxFuture;
use serde_json::Value;

/// Numeric value with exact integer semantics
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub(crate) fn from_value(value: &Value) -> anyhow::Result<Self> {
        if let Some(i) = value.as_i64() {
            return Ok(Number::Int(i));
        }
        value
            .as_f64()
            .map(Number::Float)
            .ok_or_else(|| anyhow!("expected a number, got {}", value))
    }

    pub(crate) fn into_value(self) -> anyhow::Result<Value> {
        match self {
            Number::Int(i) => Ok(Value::from(i)),
            Number::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| anyhow!("result {} is not a finite number", f)),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

/// Operation over two numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

/// Operation over the first input alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Double,
    Negate,
    Abs,
}

/// Operation over every input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AggregateOp {
    Sum,
    Product,
    Min,
    Max,
    Avg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MathOp {
    Binary(BinaryOp),
    Unary(UnaryOp),
    Aggregate(AggregateOp),
}

impl MathOp {
    pub(crate) fn parse(name: &str) -> anyhow::Result<Self> {
        let op = match name {
            "add" => MathOp::Binary(BinaryOp::Add),
            "subtract" => MathOp::Binary(BinaryOp::Subtract),
            "multiply" => MathOp::Binary(BinaryOp::Multiply),
            "divide" => MathOp::Binary(BinaryOp::Divide),
            "modulo" => MathOp::Binary(BinaryOp::Modulo),
            "double" => MathOp::Unary(UnaryOp::Double),
            "negate" => MathOp::Unary(UnaryOp::Negate),
            "abs" => MathOp::Unary(UnaryOp::Abs),
            "sum" => MathOp::Aggregate(AggregateOp::Sum),
            "product" => MathOp::Aggregate(AggregateOp::Product),
            "min" => MathOp::Aggregate(AggregateOp::Min),
            "max" => MathOp::Aggregate(AggregateOp::Max),
            "avg" => MathOp::Aggregate(AggregateOp::Avg),
            other => bail!("unsupported math op '{}'", other),
        };
        Ok(op)
    }
}

pub(crate) fn binary(op: BinaryOp, left: Number, right: Number) -> anyhow::Result<Number> {
    use Number::{Float, Int};

    let overflow = || anyhow!("integer overflow in {:?}", op);
    match (op, left, right) {
        (BinaryOp::Divide | BinaryOp::Modulo, _, Int(0)) => bail!("division by zero"),
        (BinaryOp::Divide | BinaryOp::Modulo, _, Float(r)) if r == 0.0 => bail!("division by zero"),

        (BinaryOp::Add, Int(l), Int(r)) => l.checked_add(r).map(Int).ok_or_else(overflow),
        (BinaryOp::Subtract, Int(l), Int(r)) => l.checked_sub(r).map(Int).ok_or_else(overflow),
        (BinaryOp::Multiply, Int(l), Int(r)) => l.checked_mul(r).map(Int).ok_or_else(overflow),
        (BinaryOp::Modulo, Int(l), Int(r)) => l.checked_rem(r).map(Int).ok_or_else(overflow),
        (BinaryOp::Divide, Int(l), Int(r)) => match l.checked_rem(r) {
            Some(0) => l.checked_div(r).map(Int).ok_or_else(overflow),
            Some(_) => Ok(Float(l as f64 / r as f64)),
            None => Err(overflow()),
        },

        (op, l, r) => {
            let (l, r) = (l.as_f64(), r.as_f64());
            Ok(Float(match op {
                BinaryOp::Add => l + r,
                BinaryOp::Subtract => l - r,
                BinaryOp::Multiply => l * r,
                BinaryOp::Divide => l / r,
                BinaryOp::Modulo => l % r,
            }))
        }
    }
}

pub(crate) fn unary(op: UnaryOp, value: Number) -> anyhow::Result<Number> {
    match (op, value) {
        (UnaryOp::Double, n) => binary(BinaryOp::Multiply, n, Number::Int(2)),
        (UnaryOp::Negate, Number::Int(i)) => i
            .checked_neg()
            .map(Number::Int)
            .ok_or_else(|| anyhow!("integer overflow in negate")),
        (UnaryOp::Negate, Number::Float(f)) => Ok(Number::Float(-f)),
        (UnaryOp::Abs, Number::Int(i)) => i
            .checked_abs()
            .map(Number::Int)
            .ok_or_else(|| anyhow!("integer overflow in abs")),
        (UnaryOp::Abs, Number::Float(f)) => Ok(Number::Float(f.abs())),
    }
}

pub(crate) fn aggregate(op: AggregateOp, values: &[Number]) -> anyhow::Result<Number> {
    match op {
        AggregateOp::Sum => values
            .iter()
            .try_fold(Number::Int(0), |acc, n| binary(BinaryOp::Add, acc, *n)),
        AggregateOp::Product => values
            .iter()
            .try_fold(Number::Int(1), |acc, n| binary(BinaryOp::Multiply, acc, *n)),
        AggregateOp::Min | AggregateOp::Max => {
            let mut iter = values.iter().copied();
            let first = iter
                .next()
                .ok_or_else(|| anyhow!("{:?} of no numbers", op))?;
            Ok(iter.fold(first, |best, n| {
                let better = if op == AggregateOp::Min {
                    n.as_f64() < best.as_f64()
                } else {
                    n.as_f64() > best.as_f64()
                };
                if better {
                    n
                } else {
                    best
                }
            }))
        }
        AggregateOp::Avg => {
            if values.is_empty() {
                bail!("average of no numbers");
            }
            let total = aggregate(AggregateOp::Sum, values)?;
            let count = i64::try_from(values.len()).map_err(|_| anyhow!("too many values"))?;
            binary(BinaryOp::Divide, total, Number::Int(count))
        }
    }
}

/// Numbers of every input, with array inputs flattened one level
fn flatten_numbers(inputs: &[Value]) -> anyhow::Result<Vec<Number>> {
    let mut numbers = Vec::new();
    for input in inputs {
        match input {
            Value::Array(items) => {
                for item in items {
                    numbers.push(Number::from_value(item)?);
                }
            }
            other => numbers.push(Number::from_value(other)?),
        }
    }
    Ok(numbers)
}

/// `math` node
///
/// Config: `op` and, for binary ops, `operand`. Without an operand a binary op
/// uses the second input as its right-hand side.
#[derive(Debug, Clone, Copy, Default)]
pub struct MathExecutor;

impl NodeExecutor for MathExecutor {
    fn type_tag(&self) -> &str {
        "math"
    }

    fn validate(&self, node: &Node) -> anyhow::Result<()> {
        MathOp::parse(node.require_str("op")?)?;
        if let Some(operand) = node.config_value("operand") {
            Number::from_value(operand).map_err(|e| anyhow!("invalid 'operand': {}", e))?;
        }
        Ok(())
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        node: &'a Node,
    ) -> BoxFuture<'a, anyhow::Result<Value>> {
        Box::pin(async move {
            let op = MathOp::parse(node.require_str("op")?)?;

            let result = match op {
                MathOp::Binary(op) => {
                    let inputs = ctx.node_inputs().await?;
                    let left = inputs
                        .first()
                        .ok_or_else(|| anyhow!("math '{:?}' needs an input", op))?;
                    let right = node
                        .config_value("operand")
                        .or_else(|| inputs.get(1))
                        .ok_or_else(|| anyhow!("math '{:?}' needs an operand", op))?;
                    binary(op, Number::from_value(left)?, Number::from_value(right)?)?
                }
                MathOp::Unary(op) => unary(op, Number::from_value(&first_input(ctx).await?)?)?,
                MathOp::Aggregate(op) => {
                    aggregate(op, &flatten_numbers(&ctx.node_inputs().await?)?)?
                }
            };

            tracing::debug!("🧮 Math {:?} on node '{}' = {:?}", op, node.id, result);
            result.into_value()
        })
    }
}
