#![allow(dead_code)]

use std::time::Duration;

use fado_core::{ChainFunction, FunctionRef, ReadError, Variable, VariableRef, reader::from_fn};

pub fn scalar(name: &str, initial: f64) -> VariableRef {
    VariableRef::new(Variable::new(name, [initial]).unwrap())
}

/// `x²`, read straight from the variable.
pub fn square(name: &str, x: &VariableRef) -> FunctionRef {
    let (vx, gx) = (x.clone(), x.clone());
    FunctionRef::new(
        ChainFunction::new(name, from_fn(move || Ok(vec![vx.borrow().current()[0].powi(2)])))
            .input(x, from_fn(move || Ok(vec![2.0 * gx.borrow().current()[0]])))
            .poll_interval(Duration::ZERO),
    )
}

/// `x`, read straight from the variable.
pub fn identity(name: &str, x: &VariableRef) -> FunctionRef {
    let vx = x.clone();
    FunctionRef::new(
        ChainFunction::new(name, from_fn(move || Ok(vec![vx.borrow().current()[0]])))
            .input(x, from_fn(|| Ok(vec![1.0])))
            .poll_interval(Duration::ZERO),
    )
}

/// A function whose value can never be read, with a fallback of `-1`.
pub fn broken(name: &str, x: &VariableRef) -> FunctionRef {
    FunctionRef::new(
        ChainFunction::new(name, from_fn(|| Err(ReadError::Message("solver diverged".into()))))
            .input(x, from_fn(|| Ok(vec![0.0])))
            .with_default_value(-1.0),
    )
}
