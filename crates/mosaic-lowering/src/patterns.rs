//! Recognizing loops that are really counted loops.
//!
//! Front ends express `fori_loop` either as a `scan` carrying its own index
//! or as a `while` whose condition compares an index against a bound. Both
//! are rewritten here into a body jaxpr taking `[consts, index, carries]`
//! with the index increment removed, so the loop can be emitted as a single
//! `scf.for`.

use mosaic_jaxpr::{Atom, DType, Jaxpr, Primitive, Var};

use crate::error::LoweringError;

fn is_scalar_int(var: &Var) -> bool {
    var.aval.shape().is_empty()
        && !var.aval.is_ref()
        && matches!(var.aval.dtype(), DType::I32 | DType::I64)
}

fn is_scalar_int_atom(atom: &Atom) -> bool {
    atom.aval().shape().is_empty() && matches!(atom.aval().dtype(), DType::I32 | DType::I64)
}

/// Position of the equation computing `out = index + 1`.
fn find_increment(jaxpr: &Jaxpr, index: &Var, out: &Atom) -> Option<usize> {
    jaxpr.eqns.iter().position(|eqn| {
        eqn.primitive == Primitive::Add
            && eqn.inputs.len() == 2
            && eqn.inputs[0].is_var(index)
            && eqn.inputs[1]
                .as_literal()
                .map_or(false, |lit| lit.value.as_i64() == Some(1))
            && eqn.outputs.first().map_or(false, |v| out.is_var(v))
    })
}

fn uses_var(jaxpr: &Jaxpr, var: &Var) -> bool {
    jaxpr
        .eqns
        .iter()
        .any(|eqn| eqn.inputs.iter().any(|a| a.is_var(var)))
        || jaxpr.outvars.iter().any(|a| a.is_var(var))
}

/// Rewrites a `scan` body into a counted-loop body.
///
/// Returns the rewritten jaxpr and whether it still takes the loop index.
/// Without carries the index has been eliminated and the body does not
/// expect one.
pub fn match_scan_to_fori(
    jaxpr: &Jaxpr,
    num_consts: usize,
    num_carry: usize,
) -> Result<(Jaxpr, bool), LoweringError> {
    if num_carry == 0 {
        return Ok((jaxpr.clone(), false));
    }
    let (in_index, out_index) = match (jaxpr.invars.get(num_consts), jaxpr.outvars.first()) {
        (Some(i), Some(o)) => (i, o),
        _ => {
            return Err(LoweringError::UnimplementedScan(
                "scan body is missing its carried index".to_string(),
            ))
        }
    };
    if !is_scalar_int(in_index) {
        return Err(LoweringError::UnimplementedScan(format!(
            "not a fori_loop index in: {}",
            in_index.aval
        )));
    }
    if !is_scalar_int_atom(out_index) {
        return Err(LoweringError::UnimplementedScan(format!(
            "not a fori_loop index out: {}",
            out_index.aval()
        )));
    }
    let position = find_increment(jaxpr, in_index, out_index).ok_or_else(|| {
        LoweringError::UnimplementedScan("Unable to match fori_loop pattern".to_string())
    })?;
    let mut rewritten = jaxpr.clone();
    rewritten.eqns.remove(position);
    rewritten.outvars.remove(0);
    Ok((rewritten, true))
}

/// Rewrites a `while` loop bounded by `index < upper` into a counted-loop
/// body. On failure the reason is returned instead.
pub fn match_while_to_fori(
    cond_jaxpr: &Jaxpr,
    cond_nconsts: usize,
    body_jaxpr: &Jaxpr,
    body_nconsts: usize,
) -> Result<Jaxpr, String> {
    if cond_nconsts != 0 {
        return Err("Conditional jaxpr can't contain consts.".to_string());
    }
    let cond_carry = &cond_jaxpr.invars[cond_nconsts.min(cond_jaxpr.invars.len())..];
    if cond_carry.len() < 2 {
        return Err("Conditional jaxpr must have at least two carry args.".to_string());
    }
    if !is_scalar_int(&cond_carry[0]) {
        return Err("First conditional jaxpr carry arg is not a scalar int.".to_string());
    }
    if !is_scalar_int(&cond_carry[1]) {
        return Err("Second conditional jaxpr carry arg is not a scalar int.".to_string());
    }
    let trivial = match (cond_jaxpr.eqns.as_slice(), cond_jaxpr.outvars.as_slice()) {
        ([eqn], [out]) => {
            eqn.primitive == Primitive::Lt
                && eqn.outputs.len() == 1
                && out.is_var(&eqn.outputs[0])
                && eqn.inputs.len() == 2
                && eqn.inputs[0].is_var(&cond_carry[0])
                && eqn.inputs[1].is_var(&cond_carry[1])
        }
        _ => false,
    };
    if !trivial {
        return Err("Non-trivial conditional jaxprs not supported.".to_string());
    }

    let body_carry = &body_jaxpr.invars[body_nconsts.min(body_jaxpr.invars.len())..];
    if body_carry.len() < 2 || body_jaxpr.outvars.len() < 2 {
        return Err("Loop body does not carry an index and a bound.".to_string());
    }
    let (index, upper) = (&body_carry[0], &body_carry[1]);
    if !body_jaxpr.outvars[1].is_var(upper) {
        return Err("Loop upper bound is not constant.".to_string());
    }
    let position = find_increment(body_jaxpr, index, &body_jaxpr.outvars[0])
        .ok_or_else(|| "Loop index not incremented in loop body.".to_string())?;

    let mut rewritten = body_jaxpr.clone();
    rewritten.eqns.remove(position);
    rewritten.outvars.drain(..2);
    rewritten.invars.remove(body_nconsts + 1);
    if uses_var(&rewritten, upper) {
        return Err("Loop upper bound is used inside the loop body.".to_string());
    }
    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_jaxpr::{lit_i32, AbstractValue, Tracer};

    fn int() -> AbstractValue {
        AbstractValue::scalar(DType::I32)
    }

    fn f32_vec() -> AbstractValue {
        AbstractValue::array(vec![8, 128], DType::F32)
    }

    #[test]
    fn scan_with_index_drops_the_increment() {
        let mut t = Tracer::new();
        let c = t.input(f32_vec());
        let i = t.input(int());
        let acc = t.input(f32_vec());
        let next_i = t.binary(Primitive::Add, &i, &lit_i32(1)).unwrap();
        let next_acc = t.binary(Primitive::Add, &acc, &c).unwrap();
        let body = t.finish(vec![next_i, next_acc]);

        let (rewritten, has_index) = match_scan_to_fori(&body, 1, 2).unwrap();
        assert!(has_index);
        assert_eq!(rewritten.eqns.len(), 1);
        assert_eq!(rewritten.outvars.len(), 1);
        assert_eq!(rewritten.invars.len(), 3);
    }

    #[test]
    fn scan_without_carry_has_no_index() {
        let mut t = Tracer::new();
        let c = t.input(f32_vec());
        let body = t.finish(vec![c]);
        let (_, has_index) = match_scan_to_fori(&body, 1, 0).unwrap();
        assert!(!has_index);
    }

    #[test]
    fn scan_stepping_by_two_is_rejected() {
        let mut t = Tracer::new();
        let i = t.input(int());
        let next_i = t.binary(Primitive::Add, &i, &lit_i32(2)).unwrap();
        let body = t.finish(vec![next_i]);
        let err = match_scan_to_fori(&body, 0, 1).unwrap_err();
        assert!(matches!(err, LoweringError::UnimplementedScan(_)));
    }

    fn bounded_cond() -> Jaxpr {
        let mut t = Tracer::new();
        let i = t.input(int());
        let ub = t.input(int());
        let _x = t.input(f32_vec());
        let keep_going = t.compare(Primitive::Lt, &i, &ub).unwrap();
        t.finish(vec![keep_going])
    }

    #[test]
    fn counter_bounded_while_becomes_fori() {
        let mut t = Tracer::new();
        let i = t.input(int());
        let ub = t.input(int());
        let x = t.input(f32_vec());
        let next_i = t.binary(Primitive::Add, &i, &lit_i32(1)).unwrap();
        let next_x = t.binary(Primitive::Mul, &x, &x).unwrap();
        let body = t.finish(vec![next_i, ub, next_x]);

        let fori = match_while_to_fori(&bounded_cond(), 0, &body, 0).unwrap();
        assert_eq!(fori.invars.len(), 2);
        assert_eq!(fori.outvars.len(), 1);
        assert_eq!(fori.eqns.len(), 1);
    }

    #[test]
    fn moving_upper_bound_is_not_a_fori() {
        let mut t = Tracer::new();
        let i = t.input(int());
        let ub = t.input(int());
        let x = t.input(f32_vec());
        let next_i = t.binary(Primitive::Add, &i, &lit_i32(1)).unwrap();
        let next_ub = t.binary(Primitive::Sub, &ub, &lit_i32(1)).unwrap();
        let body = t.finish(vec![next_i, next_ub, x]);

        let reason = match_while_to_fori(&bounded_cond(), 0, &body, 0).unwrap_err();
        assert!(reason.contains("upper bound"));
    }

    #[test]
    fn body_reading_the_bound_is_not_a_fori() {
        let mut t = Tracer::new();
        let i = t.input(int());
        let ub = t.input(int());
        let next_i = t.binary(Primitive::Add, &i, &lit_i32(1)).unwrap();
        let doubled = t.binary(Primitive::Mul, &ub, &lit_i32(2)).unwrap();
        let body = t.finish(vec![next_i, ub, doubled]);

        let mut c = Tracer::new();
        let ci = c.input(int());
        let cub = c.input(int());
        let _ = c.input(int());
        let keep_going = c.compare(Primitive::Lt, &ci, &cub).unwrap();
        let cond = c.finish(vec![keep_going]);

        assert!(match_while_to_fori(&cond, 0, &body, 0).is_err());
    }
}
