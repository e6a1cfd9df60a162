use popcanon_ir::{Attribute, NodeKind};
use popcanon_ops::builder;
use popcanon_ops::kinds;

use super::{RuleContext, RuleResult, RuleSet, register_aten, replace, scalar_type_from_code};

pub(super) fn register(rules: &mut RuleSet) {
    register_aten(rules, &["matmul", "mm", "bmm"], matmul);
    register_aten(rules, &["softmax"], softmax);
    register_aten(rules, &["sum"], |cx| reduce(cx, kinds::REDUCESUM));
    register_aten(rules, &["mean"], |cx| reduce(cx, kinds::REDUCEMEAN));
    register_aten(rules, &["to", "type_as"], to);
}

fn matmul(cx: &mut RuleContext<'_>) -> RuleResult {
    let a = cx.input(0)?;
    let b = cx.input(1)?;
    replace(cx.op(kinds::MATMUL, &[a, b], Vec::new())?)
}

/// `softmax(self, dim, dtype)`; a requested dtype casts the input first.
fn softmax(cx: &mut RuleContext<'_>) -> RuleResult {
    let mut x = cx.input(0)?;
    let axis = cx.const_int(1)?;
    if let Some(code) = cx.opt_int(2)? {
        let dtype = scalar_type_from_code(code)
            .ok_or_else(|| cx.error(format!("unknown scalar type code {code}")))?;
        x = builder::cast_to_type(cx.graph, x, dtype)?;
    }
    replace(cx.op(kinds::SOFTMAX, &[x], vec![("axis", Attribute::Int(axis))])?)
}

/// `sum(self, dtype)` reduces everything; `sum(self, dims, keepdim, dtype)`
/// reduces the listed dimensions. `mean` has the same overloads.
fn reduce(cx: &mut RuleContext<'_>, kind: NodeKind) -> RuleResult {
    let x = cx.input(0)?;
    let (axes, keepdims, dtype) = if cx.num_inputs() >= 3 {
        let axes = match cx.opt_int(1) {
            Ok(None) => Vec::new(),
            Ok(Some(dim)) => vec![dim],
            Err(_) => cx.const_ints(1)?,
        };
        (axes, cx.opt_int(2)?.unwrap_or(0), cx.opt_int(3)?)
    } else {
        (Vec::new(), 0, cx.opt_int(1)?)
    };
    let x = match dtype {
        Some(code) => {
            let dtype = scalar_type_from_code(code)
                .ok_or_else(|| cx.error(format!("unknown scalar type code {code}")))?;
            builder::cast_to_type(cx.graph, x, dtype)?
        }
        None => x,
    };
    replace(cx.op(
        kind,
        &[x],
        vec![
            ("axes", Attribute::Ints(axes)),
            ("keepdims", Attribute::Int(i64::from(keepdims != 0))),
        ],
    )?)
}

/// Every `to` overload and `type_as`: the traced output already names the
/// target element type.
fn to(cx: &mut RuleContext<'_>) -> RuleResult {
    let x = cx.input(0)?;
    let elem = cx.output_elem()?;
    replace(builder::cast_to_type(cx.graph, x, elem)?)
}

#[cfg(test)]
mod tests {
    use popcanon_ir::{ElementType, Graph, ValueType};

    use super::super::testing::*;
    use super::*;

    #[test]
    fn matmul_shapes() {
        let mut graph = Graph::new();
        let a = graph.add_input(ValueType::tensor(ElementType::Float32, &[2, 8]), "a");
        let b = graph.add_input(ValueType::tensor(ElementType::Float32, &[8, 3]), "b");
        let node = aten(&mut graph, "matmul", vec![a, b], ValueType::tensor(ElementType::Float32, &[2, 3]));
        let out = lower_one(&mut graph, node);
        assert_eq!(kind_of(&graph, out), kinds::MATMUL);
        assert_eq!(graph.value_type(out), &ValueType::tensor(ElementType::Float32, &[2, 3]));
    }

    #[test]
    fn softmax_with_dtype_casts_first() {
        let mut graph = Graph::new();
        let x = graph.add_input(ValueType::tensor(ElementType::Float16, &[2, 5]), "x");
        let dim = int(&mut graph, -1);
        let dtype = int(&mut graph, 6);
        let node = aten(&mut graph, "softmax", vec![x, dim, dtype], ValueType::tensor(ElementType::Float32, &[2, 5]));
        let out = lower_one(&mut graph, node);
        let softmax = node_of(&graph, out);
        assert_eq!(softmax.i("axis"), Some(-1));
        assert_eq!(kind_of(&graph, softmax.inputs()[0]), kinds::CAST);
        assert_eq!(graph.value_type(out), &ValueType::tensor(ElementType::Float32, &[2, 5]));
    }

    #[test]
    fn sum_over_dims_and_whole_tensor() {
        let mut graph = Graph::new();
        let x = graph.add_input(ValueType::tensor(ElementType::Float32, &[2, 3, 4]), "x");
        let dims = ints(&mut graph, &[1]);
        let keep = int(&mut graph, 1);
        let dtype = none(&mut graph);
        let node = aten(
            &mut graph,
            "sum",
            vec![x, dims, keep, dtype],
            ValueType::tensor(ElementType::Float32, &[2, 1, 4]),
        );
        let out = lower_one(&mut graph, node);
        assert_eq!(kind_of(&graph, out), kinds::REDUCESUM);
        assert_eq!(graph.value_type(out), &ValueType::tensor(ElementType::Float32, &[2, 1, 4]));

        let node = aten(&mut graph, "mean", vec![x, dtype], ValueType::tensor(ElementType::Float32, &[]));
        let out = lower_one(&mut graph, node);
        assert_eq!(kind_of(&graph, out), kinds::REDUCEMEAN);
        assert_eq!(graph.value_type(out), &ValueType::tensor(ElementType::Float32, &[]));
    }

    #[test]
    fn to_reads_the_traced_output_type() {
        let mut graph = Graph::new();
        let x = graph.add_input(ValueType::tensor(ElementType::Float32, &[3]), "x");
        let dtype = int(&mut graph, 5);
        let node = aten(&mut graph, "to", vec![x, dtype], ValueType::tensor(ElementType::Float16, &[3]));
        let out = lower_one(&mut graph, node);
        assert_eq!(node_of(&graph, out).s("to"), Some("FLOAT16"));

        let node = aten(&mut graph, "to", vec![x, dtype], ValueType::tensor(ElementType::Float32, &[3]));
        assert_eq!(lower_one(&mut graph, node), x);
    }
}
